//! Per-domain concurrency gates.
//!
//! Submissions to one domain must be serialized (degree 1 by default):
//! concurrent browser sessions against the same site race on shared
//! session/cookie state, and hammering one target is how you get blocked.
//! The registry is bounded — gates for domains nobody currently holds are
//! LRU-evicted once `max_domains` is reached, so a million-row input file
//! doesn't grow a million semaphores.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::Semaphore;
use url::Url;

struct GateEntry {
    semaphore: Arc<Semaphore>,
    last_used: Instant,
}

/// Bounded registry of per-domain semaphores.
pub struct DomainGates {
    entries: Mutex<HashMap<String, GateEntry>>,
    permits: usize,
    max_domains: usize,
}

impl DomainGates {
    /// `permits` is the per-domain concurrency degree; `max_domains` bounds
    /// how many gates are tracked at once.
    pub fn new(permits: usize, max_domains: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            permits: permits.max(1),
            max_domains: max_domains.max(1),
        }
    }

    /// The semaphore gating `domain`. Tasks hold the returned `Arc` for the
    /// duration of their permit, which is what makes eviction safe: only
    /// gates referenced by nobody else (`strong_count == 1`) are eligible,
    /// so an evicted domain can never end up with two live semaphores.
    pub fn gate_for(&self, domain: &str) -> Arc<Semaphore> {
        let mut entries = self.entries.lock().expect("gate lock");

        if let Some(entry) = entries.get_mut(domain) {
            entry.last_used = Instant::now();
            return Arc::clone(&entry.semaphore);
        }

        if entries.len() >= self.max_domains {
            Self::evict_lru(&mut entries);
        }

        let semaphore = Arc::new(Semaphore::new(self.permits));
        entries.insert(
            domain.to_string(),
            GateEntry {
                semaphore: Arc::clone(&semaphore),
                last_used: Instant::now(),
            },
        );
        semaphore
    }

    fn evict_lru(entries: &mut HashMap<String, GateEntry>) {
        if let Some(lru) = entries
            .iter()
            .filter(|(_, e)| Arc::strong_count(&e.semaphore) == 1)
            .min_by_key(|(_, e)| e.last_used)
            .map(|(domain, _)| domain.clone())
        {
            tracing::debug!("evicting idle domain gate {lru}");
            entries.remove(&lru);
        }
        // Every gate is held somewhere: let the map grow past the bound
        // rather than break serialization.
    }

    /// Number of currently tracked domains.
    pub fn tracked(&self) -> usize {
        self.entries.lock().expect("gate lock").len()
    }
}

/// The gate key for a URL: its host, lowercased. URLs without a parseable
/// host fall back to the raw string so they still serialize among themselves.
pub fn domain_of(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
        .unwrap_or_else(|| url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn domain_of_extracts_lowercased_host() {
        assert_eq!(domain_of("https://Shop.Example/contact"), "shop.example");
        assert_eq!(domain_of("http://a.example:8080/x"), "a.example");
        assert_eq!(domain_of("not a url"), "not a url");
    }

    #[test]
    fn same_domain_returns_same_gate() {
        let gates = DomainGates::new(1, 16);
        let a = gates.gate_for("a.example");
        let b = gates.gate_for("a.example");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(gates.tracked(), 1);
    }

    #[test]
    fn registry_evicts_idle_gates_at_capacity() {
        let gates = DomainGates::new(1, 2);
        drop(gates.gate_for("a.example"));
        drop(gates.gate_for("b.example"));
        drop(gates.gate_for("c.example"));
        assert_eq!(gates.tracked(), 2);
    }

    #[test]
    fn held_gates_are_not_evicted() {
        let gates = DomainGates::new(1, 2);
        let held_a = gates.gate_for("a.example");
        let held_b = gates.gate_for("b.example");
        let _c = gates.gate_for("c.example");
        // Both existing gates are held, so the registry grows instead.
        assert_eq!(gates.tracked(), 3);
        let again = gates.gate_for("a.example");
        assert!(Arc::ptr_eq(&held_a, &again));
        drop(held_b);
    }

    #[tokio::test(start_paused = true)]
    async fn degree_one_serializes_a_domain() {
        let gates = Arc::new(DomainGates::new(1, 16));
        let concurrent = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let gates = Arc::clone(&gates);
            let concurrent = Arc::clone(&concurrent);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                let gate = gates.gate_for("one.example");
                let _permit = gate.acquire_owned().await.unwrap();
                let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                concurrent.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        let start = tokio::time::Instant::now();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1, "no overlap within one domain");
        // 10 strictly serialized 10ms jobs take at least 100ms of (paused)
        // virtual time.
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn distinct_domains_run_in_parallel() {
        let gates = Arc::new(DomainGates::new(1, 16));
        let start = tokio::time::Instant::now();

        let mut handles = Vec::new();
        for i in 0..5 {
            let gates = Arc::clone(&gates);
            handles.push(tokio::spawn(async move {
                let gate = gates.gate_for(&format!("site{i}.example"));
                let _permit = gate.acquire_owned().await.unwrap();
                tokio::time::sleep(Duration::from_millis(10)).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(start.elapsed() < Duration::from_millis(50));
    }
}
