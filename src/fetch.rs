//! Async HTTP client wrapping reqwest.
//!
//! Not a browser — just HTTP requests. Page fetches follow redirects the
//! normal way; form submissions follow them *manually* so the status of each
//! hop stays observable (outcome inference needs to know whether the first
//! hop after a submit was a permanent redirect).

use crate::error::SubmitError;
use crate::schema::FormMethod;
use std::time::Duration;

/// Maximum redirects followed for both fetches and submissions.
const MAX_REDIRECTS: usize = 5;

/// Response from a page fetch.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Original requested URL.
    pub url: String,
    /// Final URL after redirects.
    pub final_url: String,
    /// HTTP status code.
    pub status: u16,
    /// Response body as text.
    pub body: String,
}

/// Response from a form submission, with the redirect chain it traversed.
#[derive(Debug, Clone)]
pub struct SubmitResponse {
    /// Status of the terminal response.
    pub status: u16,
    /// URL of the terminal response.
    pub final_url: String,
    /// Terminal response body.
    pub body: String,
    /// Status codes of the redirect responses, in traversal order. Empty
    /// when the submission did not redirect.
    pub redirect_hops: Vec<u16>,
}

impl SubmitResponse {
    /// Status of the first redirect hop, if the submission redirected.
    pub fn first_hop(&self) -> Option<u16> {
        self.redirect_hops.first().copied()
    }
}

/// HTTP client for page fetches and form submissions.
#[derive(Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    /// HTTP/1.1-only fallback client for sites that reject HTTP/2.
    h1_client: reqwest::Client,
    /// Non-redirecting client used by `submit_form` to walk hops manually.
    bare_client: reqwest::Client,
}

impl HttpClient {
    /// Create a new HTTP client with the given user agent.
    pub fn new(user_agent: &str, timeout_ms: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .user_agent(user_agent)
            .build()
            .unwrap_or_default();

        let h1_client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .user_agent(user_agent)
            .http1_only()
            .build()
            .unwrap_or_default();

        let bare_client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(user_agent)
            .build()
            .unwrap_or_default();

        Self {
            client,
            h1_client,
            bare_client,
        }
    }

    /// Perform a GET request. Any reached status is an `Ok` — the caller
    /// decides what a 404 means for it.
    ///
    /// Falls back to HTTP/1.1 on protocol errors (some CDNs reject HTTP/2).
    pub async fn get(&self, url: &str, timeout_ms: u64) -> Result<HttpResponse, SubmitError> {
        match self.get_inner(&self.client, url, timeout_ms).await {
            Ok(resp) => Ok(resp),
            Err(e) => {
                let err_str = format!("{e}");
                if err_str.contains("http2")
                    || err_str.contains("protocol")
                    || err_str.contains("connection closed")
                {
                    self.get_inner(&self.h1_client, url, timeout_ms).await
                } else {
                    Err(e)
                }
            }
        }
    }

    async fn get_inner(
        &self,
        client: &reqwest::Client,
        url: &str,
        timeout_ms: u64,
    ) -> Result<HttpResponse, SubmitError> {
        let resp = client
            .get(url)
            .timeout(Duration::from_millis(timeout_ms))
            .send()
            .await
            .map_err(|e| SubmitError::from_reqwest(&e, url))?;

        let status = resp.status().as_u16();
        let final_url = resp.url().to_string();
        let body = resp.text().await.unwrap_or_default();

        Ok(HttpResponse {
            url: url.to_string(),
            final_url,
            status,
            body,
        })
    }

    /// Submit `fields` to `url` with the given method and follow redirects
    /// manually, recording each hop's status.
    ///
    /// GET submissions carry the fields as a query string, POST submissions
    /// as a `application/x-www-form-urlencoded` body — what a browser would
    /// send for an unscripted form. Redirect hops are re-requested as GET.
    pub async fn submit_form(
        &self,
        url: &str,
        method: FormMethod,
        fields: &[(String, String)],
        timeout_ms: u64,
    ) -> Result<SubmitResponse, SubmitError> {
        let mut hops: Vec<u16> = Vec::new();
        let mut current = url.to_string();
        let mut first_request = true;

        for _ in 0..=MAX_REDIRECTS {
            let builder = if first_request {
                match method {
                    FormMethod::Post => self.bare_client.post(&current).form(fields),
                    FormMethod::Get => self.bare_client.get(&current).query(fields),
                }
            } else {
                self.bare_client.get(&current)
            };

            let resp = builder
                .timeout(Duration::from_millis(timeout_ms))
                .send()
                .await
                .map_err(|e| SubmitError::from_reqwest(&e, &current))?;

            let status = resp.status().as_u16();
            if (300..400).contains(&status) {
                if let Some(location) = resp
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                {
                    let next = resp.url().join(location).map_err(|e| {
                        SubmitError::Transport(format!("bad redirect location {location:?}: {e}"))
                    })?;
                    hops.push(status);
                    current = next.to_string();
                    first_request = false;
                    continue;
                }
                // 3xx without a Location is terminal.
            }

            let final_url = resp.url().to_string();
            let body = resp.text().await.unwrap_or_default();
            return Ok(SubmitResponse {
                status,
                final_url,
                body,
                redirect_hops: hops,
            });
        }

        Err(SubmitError::Transport(format!(
            "too many redirects submitting to {url}"
        )))
    }
}
