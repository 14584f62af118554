// Copyright 2026 Formrelay Contributors
// SPDX-License-Identifier: Apache-2.0

//! Progress event types and broadcast channel for real-time run telemetry.
//!
//! The pipeline emits `RunEvent`s as stages advance, which flow through a
//! `tokio::sync::broadcast` channel to all subscribers (CLI progress bars,
//! log files). When no subscriber exists, events are silently dropped.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// A progress event emitted during a relay run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEvent {
    /// The run this event belongs to.
    pub run_id: String,
    /// Monotonically increasing sequence number.
    pub seq: u64,
    /// The kind of progress event.
    pub event: RunEventKind,
}

/// The specific kind of progress event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RunEventKind {
    /// The discover stage started over this many root sites.
    DiscoverStarted { roots: usize },
    /// One root produced candidates (possibly zero after filtering).
    RootDiscovered { root: String, candidates: usize },
    /// One root failed discovery; the stage continues without it.
    RootFailed { root: String, error: String },
    /// The discover stage finished.
    DiscoverComplete {
        jobs: usize,
        failed_roots: usize,
        elapsed_ms: u64,
    },
    /// The submit stage started over this many jobs.
    SubmitStarted { jobs: usize },
    /// One job reached a terminal state.
    JobFinished {
        url: String,
        outcome: Option<String>,
        error: Option<String>,
    },
    /// The submit stage finished.
    SubmitComplete {
        ok: u64,
        fail: u64,
        error: u64,
        elapsed_ms: u64,
    },
    /// A non-fatal warning occurred.
    Warning { message: String },
}

/// Sender handle for emitting run events.
///
/// Backed by a `tokio::sync::broadcast` channel so multiple listeners can
/// subscribe independently. When no listeners exist, `send()` returns an
/// error which we silently ignore (zero cost when nobody's watching).
pub type RunEventSender = tokio::sync::broadcast::Sender<RunEvent>;

/// Receiver handle for consuming run events.
pub type RunEventReceiver = tokio::sync::broadcast::Receiver<RunEvent>;

/// Create a new progress broadcast channel with a bounded buffer.
pub fn channel() -> (RunEventSender, RunEventReceiver) {
    tokio::sync::broadcast::channel(1024)
}

/// Convenience helper: emit a run event, silently ignoring send errors
/// (which occur when no receivers are listening).
pub fn emit(tx: &Option<RunEventSender>, run_id: &str, seq: &AtomicU64, event: RunEventKind) {
    if let Some(sender) = tx {
        let _ = sender.send(RunEvent {
            run_id: run_id.to_string(),
            seq: seq.fetch_add(1, Ordering::Relaxed) + 1,
            event,
        });
    }
}

/// Shared counters for the submit stage. Increment-only, read for the
/// terminal summary and the progress display.
#[derive(Debug, Default)]
pub struct StageCounters {
    pub done: AtomicU64,
    pub ok: AtomicU64,
    pub fail: AtomicU64,
    pub error: AtomicU64,
}

impl StageCounters {
    pub fn snapshot(&self) -> (u64, u64, u64, u64) {
        (
            self.done.load(Ordering::Relaxed),
            self.ok.load(Ordering::Relaxed),
            self.fail.load(Ordering::Relaxed),
            self.error.load(Ordering::Relaxed),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serialization_roundtrips() {
        let event = RunEvent {
            run_id: "run-1".to_string(),
            seq: 3,
            event: RunEventKind::RootDiscovered {
                root: "https://a.example".to_string(),
                candidates: 2,
            },
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("RootDiscovered"));

        let parsed: RunEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.run_id, "run-1");
        assert_eq!(parsed.seq, 3);
    }

    #[test]
    fn emit_without_receivers_does_not_panic() {
        let (tx, rx) = channel();
        drop(rx);
        emit(
            &Some(tx),
            "run",
            &AtomicU64::new(0),
            RunEventKind::Warning {
                message: "test".to_string(),
            },
        );
    }

    #[test]
    fn emit_none_sender_is_a_noop() {
        emit(
            &None,
            "run",
            &AtomicU64::new(0),
            RunEventKind::Warning {
                message: "test".to_string(),
            },
        );
    }

    #[test]
    fn counters_snapshot() {
        let counters = StageCounters::default();
        counters.done.fetch_add(3, Ordering::Relaxed);
        counters.ok.fetch_add(2, Ordering::Relaxed);
        counters.fail.fetch_add(1, Ordering::Relaxed);
        assert_eq!(counters.snapshot(), (3, 2, 1, 0));
    }
}
