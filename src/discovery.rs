//! Client for the external contact-page discovery service.
//!
//! The service crawls a root site (sitemap + heuristics) and returns
//! candidate contact URLs with relevance scores from 0 to 100. This module
//! only speaks the wire protocol and applies the caller's threshold/top-N
//! selection; the crawling itself is the service's problem.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables forwarded to the discovery service with each request.
#[derive(Debug, Clone)]
pub struct DiscoveryParams {
    /// Pages the service may fetch per root.
    pub fetch_limit: usize,
    /// Candidates the service returns per root.
    pub top_n: usize,
    /// Fetch concurrency inside the service.
    pub concurrency: usize,
    /// URLs taken from the sitemap before heuristic ranking.
    pub sitemap_url_limit: usize,
}

impl Default for DiscoveryParams {
    fn default() -> Self {
        Self {
            fetch_limit: 80,
            top_n: 20,
            concurrency: 4,
            sitemap_url_limit: 500,
        }
    }
}

#[derive(Serialize)]
struct DiscoverRequest<'a> {
    root_url: &'a str,
    fetch_limit: usize,
    top_n: usize,
    concurrency: usize,
    sitemap_url_limit: usize,
}

/// One candidate contact URL with its relevance score.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Candidate {
    pub url: String,
    #[serde(default)]
    pub score: i32,
}

#[derive(Deserialize)]
struct DiscoverResponse {
    #[serde(default)]
    results_top: Vec<Candidate>,
}

/// HTTP client for the discovery service.
pub struct DiscoveryClient {
    client: reqwest::Client,
    endpoint: String,
    params: DiscoveryParams,
}

impl DiscoveryClient {
    /// Create a client for the discovery service at `endpoint`
    /// (e.g. `http://localhost:8080/discover`).
    pub fn new(endpoint: &str, params: DiscoveryParams, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint: endpoint.to_string(),
            params,
        }
    }

    /// All candidate contact URLs the service found for `root_url`,
    /// unfiltered. Callers apply [`select_candidates`].
    pub async fn discover(&self, root_url: &str) -> Result<Vec<Candidate>> {
        let request = DiscoverRequest {
            root_url,
            fetch_limit: self.params.fetch_limit,
            top_n: self.params.top_n,
            concurrency: self.params.concurrency,
            sitemap_url_limit: self.params.sitemap_url_limit,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("discovery request for {root_url} failed"))?;

        if !response.status().is_success() {
            bail!(
                "discovery service returned status {} for {root_url}",
                response.status()
            );
        }

        let body: DiscoverResponse = response
            .json()
            .await
            .context("discovery response parse error")?;
        Ok(body.results_top)
    }
}

/// Keep candidates scoring at least `threshold`, best first, at most `top`
/// (`top == 0` keeps them all).
pub fn select_candidates(mut candidates: Vec<Candidate>, threshold: i32, top: usize) -> Vec<Candidate> {
    candidates.retain(|c| c.score >= threshold && !c.url.is_empty());
    candidates.sort_by(|a, b| b.score.cmp(&a.score));
    if top > 0 {
        candidates.truncate(top);
    }
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn cand(url: &str, score: i32) -> Candidate {
        Candidate {
            url: url.to_string(),
            score,
        }
    }

    #[test]
    fn selection_filters_sorts_and_truncates() {
        let candidates = vec![
            cand("https://a.example/contact", 80),
            cand("https://a.example/about", 60),
            cand("https://a.example/blog", 40),
            cand("https://a.example/inquiry", 90),
        ];
        let selected = select_candidates(candidates, 50, 2);
        assert_eq!(
            selected,
            vec![
                cand("https://a.example/inquiry", 90),
                cand("https://a.example/contact", 80),
            ]
        );
    }

    #[test]
    fn selection_with_zero_top_keeps_everything_above_threshold() {
        let candidates = vec![cand("https://a.example/a", 70), cand("https://a.example/b", 55)];
        assert_eq!(select_candidates(candidates, 50, 0).len(), 2);
    }

    #[test]
    fn selection_drops_empty_urls() {
        let candidates = vec![cand("", 99), cand("https://a.example/c", 60)];
        let selected = select_candidates(candidates, 50, 5);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].url, "https://a.example/c");
    }

    #[tokio::test]
    async fn discover_posts_params_and_parses_results() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/discover"))
            .and(body_partial_json(serde_json::json!({
                "root_url": "https://a.example",
                "top_n": 20,
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "root_url": "https://a.example",
                "results_top": [
                    { "url": "https://a.example/contact", "score": 85 },
                    { "url": "https://a.example/about", "score": 30 },
                ],
            })))
            .mount(&server)
            .await;

        let client = DiscoveryClient::new(
            &format!("{}/discover", server.uri()),
            DiscoveryParams::default(),
            Duration::from_secs(5),
        );
        let candidates = client.discover("https://a.example").await.unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].score, 85);
    }

    #[tokio::test]
    async fn discover_error_status_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/discover"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = DiscoveryClient::new(
            &format!("{}/discover", server.uri()),
            DiscoveryParams::default(),
            Duration::from_secs(5),
        );
        assert!(client.discover("https://a.example").await.is_err());
    }
}
