//! HTTP-mode submission — fetch the page, match fields against the extracted
//! schema, and replay what a browser would send, without rendering anything.
//!
//! Field-matching completeness is strict here: a form is only submitted when
//! *every* content key resolves to a field. A partial POST that drops half
//! the payload looks like garbage to the receiving site, so no-match means
//! no submission. (Browser-mode deliberately uses the looser policy — see
//! [`super::browser`].)

use super::{ContentRecord, SubmissionOutcome, Submitter};
use crate::config::{contains_any, RelayConfig};
use crate::error::SubmitError;
use crate::fetch::{HttpClient, SubmitResponse};
use crate::matching::FieldMatcher;
use crate::schema::{extract_forms, Form};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

/// Submits contact forms over plain HTTP.
pub struct HttpSubmitter {
    client: HttpClient,
    matcher: Arc<FieldMatcher>,
    config: Arc<RelayConfig>,
}

impl HttpSubmitter {
    pub fn new(matcher: Arc<FieldMatcher>, config: Arc<RelayConfig>) -> Self {
        let client = HttpClient::new(&config.user_agent, config.request_timeout_ms());
        Self {
            client,
            matcher,
            config,
        }
    }

    /// Resolve every content key against `form`. Returns `None` as soon as
    /// one key has no match.
    async fn resolve_all(
        &self,
        form: &Form,
        record: &ContentRecord,
    ) -> Option<Vec<(String, String)>> {
        let mut body = Vec::with_capacity(record.len());
        for (key, value) in record.iter() {
            let matched = self
                .matcher
                .match_field(form, key, value, self.config.similarity_threshold)
                .await?;
            // Matching requires a field name, so this always yields a pair.
            let name = matched.field.name.clone()?;
            body.push((name, matched.value));
        }
        Some(body)
    }
}

#[async_trait]
impl Submitter for HttpSubmitter {
    async fn submit(
        &self,
        url: &str,
        record: &ContentRecord,
    ) -> Result<SubmissionOutcome, SubmitError> {
        let timeout_ms = self.config.request_timeout_ms();
        let page = self.client.get(url, timeout_ms).await?;
        if page.status != 200 {
            return Err(SubmitError::Status {
                status: page.status,
                url: url.to_string(),
            });
        }

        if contains_any(&page.body, &self.config.decline_keywords) {
            debug!("{url}: page refuses unsolicited contact");
            return Ok(SubmissionOutcome::Declined);
        }

        let forms = extract_forms(&page.body, &page.final_url);
        if forms.is_empty() {
            return Ok(SubmissionOutcome::NoFormFound);
        }

        // First form where every content key resolves wins.
        for form in &forms {
            let Some(mut body) = self.resolve_all(form, record).await else {
                continue;
            };

            // Hidden fields ride along verbatim so CSRF-token-style values
            // round-trip unchanged.
            for field in form.fields.iter().filter(|f| f.is_hidden()) {
                if let Some(name) = &field.name {
                    body.push((name.clone(), field.value.clone().unwrap_or_default()));
                }
            }

            // A form without an action submits to the page itself, the way a
            // browser treats a missing action attribute.
            let action = form
                .action_absolute
                .clone()
                .unwrap_or_else(|| page.final_url.clone());

            debug!(
                "{url}: submitting form #{} ({} fields) to {action}",
                form.index,
                body.len()
            );

            return match self
                .client
                .submit_form(&action, form.method, &body, timeout_ms)
                .await
            {
                Ok(resp) => Ok(infer_outcome(&resp, &self.config.success_keywords)),
                Err(e) => {
                    warn!("{url}: submit action failed: {e}");
                    Ok(SubmissionOutcome::SubmitActionFailed)
                }
            };
        }

        Ok(SubmissionOutcome::NoFieldsMatched)
    }
}

/// Infer the outcome of a submission response.
///
/// Checked in order: a [200, 204] status, a redirect chain whose first hop
/// was a permanent redirect, or a success keyword in the body all mean
/// success. An error status with none of those means the action failed;
/// anything else is indeterminate.
fn infer_outcome(resp: &SubmitResponse, success_keywords: &[String]) -> SubmissionOutcome {
    if (200..=204).contains(&resp.status) {
        return SubmissionOutcome::Success;
    }
    if resp.first_hop() == Some(301) {
        return SubmissionOutcome::Success;
    }
    if contains_any(&resp.body, success_keywords) {
        return SubmissionOutcome::Success;
    }
    if resp.status >= 400 {
        return SubmissionOutcome::SubmitActionFailed;
    }
    SubmissionOutcome::Indeterminate
}
