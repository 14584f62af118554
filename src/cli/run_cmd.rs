//! `formrelay run` — the full two-stage bulk pipeline.

use crate::cli::output;
use crate::config::RelayConfig;
use crate::discovery::{DiscoveryClient, DiscoveryParams};
use crate::matching::cache::{DiskCache, EmbeddingRetriever, InMemoryCache, VectorCache};
use crate::matching::embedding::HttpEmbedder;
use crate::matching::FieldMatcher;
use crate::pipeline::progress::{RunEventKind, RunEventSender};
use crate::pipeline::results::ResultLog;
use crate::pipeline::retry::RetryPolicy;
use crate::pipeline::{
    run_discover_stage, run_submit_stage, CancelFlag, Job, PipelineOptions,
};
use crate::renderer::chromium::ChromiumRenderer;
use crate::submit::browser::BrowserSubmitter;
use crate::submit::http::HttpSubmitter;
use crate::submit::{ContentRecord, Submitter};
use anyhow::{bail, Context, Result};
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

/// Arguments for the `run` subcommand.
#[derive(Args, Debug)]
pub struct RunParams {
    /// File with one root URL per line (`#` starts a comment)
    #[arg(long)]
    pub input: PathBuf,

    /// JSON file mapping content keys to values (e.g. {"name": "...", "email_address": "..."})
    #[arg(long)]
    pub payload: PathBuf,

    /// Treat input URLs as contact URLs and skip the discover stage
    #[arg(long)]
    pub contacts_only: bool,

    /// Discovery service endpoint
    #[arg(long, default_value = "http://localhost:8080/discover")]
    pub discover_url: String,

    /// Embedding service base URL; semantic matching is off when omitted
    #[arg(long)]
    pub embed_url: Option<String>,

    /// Minimum discovery score for a candidate contact page
    #[arg(long, default_value = "50")]
    pub threshold: i32,

    /// Contact pages kept per root (0 = all above threshold)
    #[arg(long, default_value = "1")]
    pub top: usize,

    /// Global concurrency of the discover stage
    #[arg(long, default_value = "64")]
    pub discover_workers: usize,

    /// Global concurrency of the submit stage
    #[arg(long, default_value = "8")]
    pub submit_workers: usize,

    /// Concurrency per destination domain (1 = strictly serialized)
    #[arg(long, default_value = "1")]
    pub per_domain: usize,

    /// Retries per job on transient failures
    #[arg(long, default_value = "1")]
    pub retries: u32,

    /// Base back-off delay between retries, in milliseconds
    #[arg(long, default_value = "1000")]
    pub backoff_ms: u64,

    /// Drive a headless browser instead of submitting over plain HTTP
    #[arg(long)]
    pub browser: bool,

    /// Result log (NDJSON); contact URLs already in it are skipped
    #[arg(long, default_value = "results.ndjson")]
    pub results: PathBuf,

    /// Extra success keyword (repeatable; adds to the defaults)
    #[arg(long = "success-keyword")]
    pub success_keywords: Vec<String>,
}

/// Run the bulk pipeline.
pub async fn run(params: RunParams) -> Result<()> {
    let started = Instant::now();
    let run_id = uuid::Uuid::new_v4().to_string();

    let urls = read_url_list(&params.input)
        .with_context(|| format!("failed to read {}", params.input.display()))?;
    if urls.is_empty() {
        bail!("no URLs in {}", params.input.display());
    }

    let payload_text = std::fs::read_to_string(&params.payload)
        .with_context(|| format!("failed to read {}", params.payload.display()))?;
    let record: ContentRecord =
        serde_json::from_str(&payload_text).context("payload is not a flat JSON object")?;
    if record.is_empty() {
        bail!("payload has no content keys");
    }

    let mut config = RelayConfig::default();
    config
        .success_keywords
        .extend(params.success_keywords.iter().cloned());
    let config = Arc::new(config);

    let matcher = Arc::new(build_matcher(params.embed_url.as_deref()));
    let submitter = build_submitter(params.browser, &matcher, &config).await?;

    let options = PipelineOptions {
        discover_workers: params.discover_workers,
        submit_workers: params.submit_workers,
        per_domain: params.per_domain,
        score_threshold: params.threshold,
        top_per_root: params.top,
        retry: RetryPolicy {
            max_retries: params.retries,
            base_delay_ms: params.backoff_ms,
            ..RetryPolicy::default()
        },
        ..PipelineOptions::default()
    };

    // Ctrl-C stops scheduling; in-flight jobs finish and flush.
    let cancel = CancelFlag::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\ninterrupted — letting in-flight jobs finish");
                cancel.cancel();
            }
        });
    }

    let (events, _keepalive) = crate::pipeline::progress::channel();
    let events = Some(events);

    // ── Stage 1: discover (or take the input as contact URLs directly) ──
    let jobs = if params.contacts_only {
        urls.iter().map(|u| Job::new(u, u, 100)).collect::<Vec<_>>()
    } else {
        let discovery = DiscoveryClient::new(
            &params.discover_url,
            DiscoveryParams::default(),
            config.request_timeout,
        );
        let bar = spawn_discover_bar(&events, urls.len() as u64);
        let summary =
            run_discover_stage(&discovery, &urls, &options, &events, &run_id, &cancel).await;
        finish_bar(bar).await;
        if !output::is_quiet() && !output::is_json() {
            println!(
                "discover: {} contacts from {} roots ({} failed)",
                summary.jobs.len(),
                urls.len(),
                summary.failed_roots
            );
        }
        summary.jobs
    };

    if jobs.is_empty() {
        if output::is_json() {
            output::print_json(&serde_json::json!({ "ok": 0, "fail": 0, "error": 0, "jobs": 0 }));
        } else {
            println!("no contact pages to submit to");
        }
        return Ok(());
    }

    // ── Stage 2: submit ──
    let log = Arc::new(ResultLog::open_append(&params.results)?);
    let bar = spawn_submit_bar(&events, jobs.len() as u64);
    let summary = run_submit_stage(
        submitter,
        jobs,
        Arc::new(record),
        Arc::clone(&log),
        &options,
        events.clone(),
        &run_id,
        cancel,
    )
    .await;
    finish_bar(bar).await;

    let elapsed = started.elapsed();
    let rate = summary.done() as f64 / elapsed.as_secs_f64().max(1e-9);
    if output::is_json() {
        output::print_json(&serde_json::json!({
            "ok": summary.ok,
            "fail": summary.fail,
            "error": summary.error,
            "skipped": summary.skipped,
            "elapsed_s": elapsed.as_secs_f64(),
            "jobs_per_s": rate,
            "results": params.results,
        }));
    } else {
        println!(
            "done: ok={} fail={} error={} skipped={} | {:.2}s, {rate:.1} jobs/s | results in {}",
            summary.ok,
            summary.fail,
            summary.error,
            summary.skipped,
            elapsed.as_secs_f64(),
            params.results.display()
        );
    }
    Ok(())
}

fn build_matcher(embed_url: Option<&str>) -> FieldMatcher {
    match embed_url {
        Some(url) => {
            let embedder = Arc::new(HttpEmbedder::new(url));
            let cache: Arc<dyn VectorCache> = match DiskCache::default_cache() {
                Ok(disk) => Arc::new(disk),
                Err(e) => {
                    tracing::warn!("vector disk cache unavailable ({e:#}), using memory");
                    Arc::new(InMemoryCache::new())
                }
            };
            FieldMatcher::new(Some(EmbeddingRetriever::new(embedder, cache)))
        }
        None => FieldMatcher::heuristic_only(),
    }
}

async fn build_submitter(
    browser: bool,
    matcher: &Arc<FieldMatcher>,
    config: &Arc<RelayConfig>,
) -> Result<Arc<dyn Submitter>> {
    if browser {
        let renderer = Arc::new(ChromiumRenderer::new().await?);
        Ok(Arc::new(BrowserSubmitter::new(
            renderer,
            Arc::clone(matcher),
            Arc::clone(config),
        )))
    } else {
        Ok(Arc::new(HttpSubmitter::new(
            Arc::clone(matcher),
            Arc::clone(config),
        )))
    }
}

/// Read the URL list: one per line, `#` comments and blanks skipped, scheme
/// defaulted to https, order-preserving de-duplication.
pub fn read_url_list(path: &std::path::Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path)?;
    let mut seen = std::collections::HashSet::new();
    let mut urls = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let url = if line.starts_with("http://") || line.starts_with("https://") {
            line.to_string()
        } else {
            format!("https://{line}")
        };
        if seen.insert(url.clone()) {
            urls.push(url);
        }
    }
    Ok(urls)
}

// ── progress bars ───────────────────────────────────────────────────────────

fn stage_bar(label: &'static str, len: u64) -> ProgressBar {
    if output::is_quiet() || output::is_json() {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(len);
    bar.set_style(
        ProgressStyle::with_template("{prefix:>9} [{bar:30}] {pos}/{len} {msg}")
            .expect("static template")
            .progress_chars("=> "),
    );
    bar.set_prefix(label);
    bar
}

/// Drive a discover-stage bar from the event stream until the stage
/// completes. Returns the task handle so the caller can await the final
/// redraw.
fn spawn_discover_bar(
    events: &Option<RunEventSender>,
    roots: u64,
) -> Option<tokio::task::JoinHandle<()>> {
    let mut rx = events.as_ref()?.subscribe();
    let bar = stage_bar("discover", roots);
    Some(tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            match event.event {
                RunEventKind::RootDiscovered { candidates, .. } => {
                    bar.inc(1);
                    if candidates == 0 {
                        bar.set_message("no candidates");
                    }
                }
                RunEventKind::RootFailed { .. } => bar.inc(1),
                RunEventKind::DiscoverComplete { jobs, .. } => {
                    bar.set_message(format!("{jobs} contacts"));
                    bar.finish();
                    break;
                }
                _ => {}
            }
        }
    }))
}

fn spawn_submit_bar(
    events: &Option<RunEventSender>,
    jobs: u64,
) -> Option<tokio::task::JoinHandle<()>> {
    let mut rx = events.as_ref()?.subscribe();
    let bar = stage_bar("submit", jobs);
    let mut counts = (0u64, 0u64, 0u64);
    Some(tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            match event.event {
                RunEventKind::JobFinished { outcome, error, .. } => {
                    bar.inc(1);
                    match (outcome.as_deref(), error) {
                        (Some("success"), _) => counts.0 += 1,
                        (Some(_), _) => counts.1 += 1,
                        (None, _) => counts.2 += 1,
                    }
                    bar.set_message(format!(
                        "ok={} fail={} error={}",
                        counts.0, counts.1, counts.2
                    ));
                }
                RunEventKind::SubmitComplete { .. } => {
                    bar.finish();
                    break;
                }
                _ => {}
            }
        }
    }))
}

async fn finish_bar(handle: Option<tokio::task::JoinHandle<()>>) {
    if let Some(handle) = handle {
        let _ = handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn url_list_parsing_normalizes_and_dedupes() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "# targets\nshop.example\nhttps://a.example/\n\nshop.example\nhttp://b.example"
        )
        .unwrap();

        let urls = read_url_list(file.path()).unwrap();
        assert_eq!(
            urls,
            vec![
                "https://shop.example",
                "https://a.example/",
                "http://b.example",
            ]
        );
    }

    #[test]
    fn url_list_missing_file_is_an_error() {
        assert!(read_url_list(std::path::Path::new("/nonexistent/urls.txt")).is_err());
    }
}
