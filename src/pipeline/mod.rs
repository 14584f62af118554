//! Bulk pipeline — apply the per-site submission operation to thousands of
//! targets under bounded concurrency.
//!
//! Two stages. **Discover** fans root sites out across a worker pool and
//! asks the discovery service for scored contact-page candidates; one root's
//! failure never aborts the others. **Submit** drains the resulting job
//! queue with a global worker cap layered over per-domain gates, retries
//! transient faults with backed-off attempts, and appends every terminal
//! state to a durable result log.
//!
//! Jobs complete in completion order, not submission order. Within one job,
//! discovery always finishes before its submit attempt starts.

pub mod gate;
pub mod progress;
pub mod results;
pub mod retry;

use crate::discovery::{select_candidates, DiscoveryClient};
use crate::submit::{ContentRecord, Submitter};
use futures::stream::{self, StreamExt};
use gate::{domain_of, DomainGates};
use progress::{emit, RunEventKind, RunEventSender, StageCounters};
use results::{ResultLog, ResultRecord};
use retry::{retry_with_backoff, RetryPolicy};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Lifecycle of one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Discovering,
    Discovered,
    Submitting,
    Success,
    Fail,
    Error,
}

/// One (site, payload) submission attempt tracked through the pipeline.
///
/// The discover stage creates jobs; the submit stage consumes each exactly
/// once and owns its terminal state.
#[derive(Debug, Clone)]
pub struct Job {
    pub root_url: String,
    pub contact_url: String,
    pub score: i32,
    pub state: JobState,
}

impl Job {
    pub fn new(root_url: &str, contact_url: &str, score: i32) -> Self {
        Self {
            root_url: root_url.to_string(),
            contact_url: contact_url.to_string(),
            score,
            state: JobState::Discovered,
        }
    }
}

/// Concurrency, selection, and retry knobs for a run.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Global worker cap for the discover stage.
    pub discover_workers: usize,
    /// Global worker cap for the submit stage.
    pub submit_workers: usize,
    /// Per-domain concurrency degree (1 = strictly serialized per domain).
    pub per_domain: usize,
    /// Bound on the per-domain gate registry.
    pub max_tracked_domains: usize,
    /// Minimum discovery score to keep a candidate.
    pub score_threshold: i32,
    /// Candidates kept per root after filtering (0 = all).
    pub top_per_root: usize,
    pub retry: RetryPolicy,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            discover_workers: 64,
            submit_workers: 8,
            per_domain: 1,
            max_tracked_domains: 1024,
            score_threshold: 50,
            top_per_root: 1,
            retry: RetryPolicy::default(),
        }
    }
}

/// Cooperative cancellation: stops scheduling new work, lets in-flight jobs
/// finish and flush their results.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What the discover stage produced.
#[derive(Debug)]
pub struct DiscoverSummary {
    pub jobs: Vec<Job>,
    pub failed_roots: usize,
    pub elapsed: Duration,
}

/// What the submit stage produced.
#[derive(Debug)]
pub struct SubmitSummary {
    pub ok: u64,
    pub fail: u64,
    pub error: u64,
    /// Jobs skipped because the result log already had them.
    pub skipped: usize,
    pub elapsed: Duration,
}

impl SubmitSummary {
    pub fn done(&self) -> u64 {
        self.ok + self.fail + self.error
    }
}

/// Discover contact-page candidates for every root, in parallel.
///
/// Per-root failures are isolated: they are counted and reported, and the
/// stage keeps going.
pub async fn run_discover_stage(
    discovery: &DiscoveryClient,
    roots: &[String],
    options: &PipelineOptions,
    events: &Option<RunEventSender>,
    run_id: &str,
    cancel: &CancelFlag,
) -> DiscoverSummary {
    let start = Instant::now();
    let seq = AtomicU64::new(0);
    emit(
        events,
        run_id,
        &seq,
        RunEventKind::DiscoverStarted { roots: roots.len() },
    );

    let per_root: Vec<Option<Vec<Job>>> = stream::iter(roots.iter())
        .map(|root| {
            let seq = &seq;
            async move {
                if cancel.is_cancelled() {
                    return Some(Vec::new());
                }
                match discovery.discover(root).await {
                    Ok(candidates) => {
                        let selected = select_candidates(
                            candidates,
                            options.score_threshold,
                            options.top_per_root,
                        );
                        emit(
                            events,
                            run_id,
                            seq,
                            RunEventKind::RootDiscovered {
                                root: root.clone(),
                                candidates: selected.len(),
                            },
                        );
                        Some(
                            selected
                                .into_iter()
                                .map(|c| Job::new(root, &c.url, c.score))
                                .collect(),
                        )
                    }
                    Err(e) => {
                        warn!("discovery failed for {root}: {e:#}");
                        emit(
                            events,
                            run_id,
                            seq,
                            RunEventKind::RootFailed {
                                root: root.clone(),
                                error: format!("{e:#}"),
                            },
                        );
                        None
                    }
                }
            }
        })
        .buffer_unordered(options.discover_workers.max(1))
        .collect()
        .await;

    let failed_roots = per_root.iter().filter(|r| r.is_none()).count();
    let jobs: Vec<Job> = per_root.into_iter().flatten().flatten().collect();

    let elapsed = start.elapsed();
    emit(
        events,
        run_id,
        &seq,
        RunEventKind::DiscoverComplete {
            jobs: jobs.len(),
            failed_roots,
            elapsed_ms: elapsed.as_millis() as u64,
        },
    );
    info!(
        "discover stage: {} jobs from {} roots ({} failed) in {:.1}s",
        jobs.len(),
        roots.len(),
        failed_roots,
        elapsed.as_secs_f64()
    );

    DiscoverSummary {
        jobs,
        failed_roots,
        elapsed,
    }
}

/// Submit every job, bounded globally by `submit_workers` and per target
/// domain by `per_domain`, retrying transient faults per the policy. Every
/// terminal state is appended to `log`.
pub async fn run_submit_stage(
    submitter: Arc<dyn Submitter>,
    jobs: Vec<Job>,
    record: Arc<ContentRecord>,
    log: Arc<ResultLog>,
    options: &PipelineOptions,
    events: Option<RunEventSender>,
    run_id: &str,
    cancel: CancelFlag,
) -> SubmitSummary {
    let start = Instant::now();

    // Idempotent re-run: anything already terminal in the log is skipped.
    let completed = ResultLog::completed_urls(log.path()).unwrap_or_default();
    let (queue, skipped): (VecDeque<Job>, usize) = {
        let total = jobs.len();
        let fresh: VecDeque<Job> = jobs
            .into_iter()
            .filter(|j| !completed.contains(&j.contact_url))
            .collect();
        let skipped = total - fresh.len();
        (fresh, skipped)
    };
    if skipped > 0 {
        info!("skipping {skipped} jobs already present in the result log");
    }

    let seq = Arc::new(AtomicU64::new(0));
    emit(
        &events,
        run_id,
        &seq,
        RunEventKind::SubmitStarted { jobs: queue.len() },
    );

    let queue = Arc::new(Mutex::new(queue));
    let counters = Arc::new(StageCounters::default());
    let gates = Arc::new(DomainGates::new(
        options.per_domain,
        options.max_tracked_domains,
    ));

    let mut workers = Vec::new();
    for _ in 0..options.submit_workers.max(1) {
        let submitter = Arc::clone(&submitter);
        let record = Arc::clone(&record);
        let log = Arc::clone(&log);
        let queue = Arc::clone(&queue);
        let counters = Arc::clone(&counters);
        let gates = Arc::clone(&gates);
        let cancel = cancel.clone();
        let events = events.clone();
        let seq = Arc::clone(&seq);
        let run_id = run_id.to_string();
        let retry_policy = options.retry.clone();

        workers.push(tokio::spawn(async move {
            loop {
                if cancel.is_cancelled() {
                    break;
                }
                let Some(mut job) = queue.lock().expect("queue lock").pop_front() else {
                    break;
                };
                job.state = JobState::Submitting;

                let domain = domain_of(&job.contact_url);
                let gate = gates.gate_for(&domain);
                let _permit = gate.acquire_owned().await.expect("gate never closes");

                let result = retry_with_backoff(&retry_policy, || {
                    submitter.submit(&job.contact_url, &record)
                })
                .await;

                let record_row = match &result {
                    Ok(outcome) => {
                        if outcome.is_success() {
                            job.state = JobState::Success;
                            counters.ok.fetch_add(1, Ordering::Relaxed);
                        } else {
                            job.state = JobState::Fail;
                            counters.fail.fetch_add(1, Ordering::Relaxed);
                        }
                        ResultRecord::for_outcome(
                            &job.root_url,
                            &job.contact_url,
                            job.score,
                            *outcome,
                        )
                    }
                    Err(e) => {
                        job.state = JobState::Error;
                        counters.error.fetch_add(1, Ordering::Relaxed);
                        ResultRecord::for_error(
                            &job.root_url,
                            &job.contact_url,
                            job.score,
                            &format!("{e}"),
                        )
                    }
                };
                counters.done.fetch_add(1, Ordering::Relaxed);

                if let Err(e) = log.append(&record_row).await {
                    warn!("failed to log result for {}: {e:#}", job.contact_url);
                }

                emit(
                    &events,
                    &run_id,
                    &seq,
                    RunEventKind::JobFinished {
                        url: job.contact_url.clone(),
                        outcome: result.as_ref().ok().map(|o| o.to_string()),
                        error: result.as_ref().err().map(|e| e.to_string()),
                    },
                );
            }
        }));
    }

    for worker in workers {
        // A panicking worker loses its in-flight job but not the stage.
        if let Err(e) = worker.await {
            warn!("submit worker panicked: {e}");
        }
    }

    let (_, ok, fail, error) = counters.snapshot();
    let elapsed = start.elapsed();
    emit(
        &events,
        run_id,
        &seq,
        RunEventKind::SubmitComplete {
            ok,
            fail,
            error,
            elapsed_ms: elapsed.as_millis() as u64,
        },
    );
    info!(
        "submit stage: ok={ok} fail={fail} error={error} in {:.1}s",
        elapsed.as_secs_f64()
    );

    SubmitSummary {
        ok,
        fail,
        error,
        skipped,
        elapsed,
    }
}
