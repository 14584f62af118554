//! Browser-mode submission — drive a real rendering engine for forms that
//! only work with JavaScript enabled.
//!
//! Matching completeness is deliberately looser than HTTP-mode: rendered
//! contact pages routinely carry optional fields the payload has no value
//! for, so unmatched keys are skipped instead of disqualifying the form.
//! Consent checkboxes are driven unconditionally — many forms refuse to
//! submit without them regardless of payload content.

use super::{ContentRecord, SubmissionOutcome, Submitter};
use crate::config::{contains_any, RelayConfig};
use crate::error::SubmitError;
use crate::matching::FieldMatcher;
use crate::renderer::{RenderContext, Renderer};
use crate::schema::{extract_forms, FieldLocator, Form};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Submits contact forms through a headless browser.
pub struct BrowserSubmitter {
    renderer: Arc<dyn Renderer>,
    matcher: Arc<FieldMatcher>,
    config: Arc<RelayConfig>,
}

impl BrowserSubmitter {
    pub fn new(
        renderer: Arc<dyn Renderer>,
        matcher: Arc<FieldMatcher>,
        config: Arc<RelayConfig>,
    ) -> Self {
        Self {
            renderer,
            matcher,
            config,
        }
    }

    async fn run(
        &self,
        ctx: &mut dyn RenderContext,
        url: &str,
        record: &ContentRecord,
    ) -> Result<SubmissionOutcome, SubmitError> {
        ctx.navigate(url, self.config.request_timeout_ms())
            .await
            .map_err(|e| SubmitError::Navigation(format!("{url}: {e:#}")))?;

        // Re-extract against the post-script-execution DOM: forms injected
        // or rewritten by JS are invisible to a plain fetch.
        let html = ctx
            .page_source()
            .await
            .map_err(|e| SubmitError::Navigation(format!("{url}: {e:#}")))?;

        if contains_any(&html, &self.config.decline_keywords) {
            debug!("{url}: page refuses unsolicited contact");
            return Ok(SubmissionOutcome::Declined);
        }

        let base = ctx.current_url().await.unwrap_or_else(|_| url.to_string());
        let forms = extract_forms(&html, &base);
        if forms.is_empty() {
            return Ok(SubmissionOutcome::NoFormFound);
        }

        let mut outcome = SubmissionOutcome::SubmitActionFailed;
        for form in &forms {
            match self.attempt_form(ctx, form, record).await {
                Some(SubmissionOutcome::Success) => return Ok(SubmissionOutcome::Success),
                Some(o) => outcome = o,
                None => continue,
            }
        }
        Ok(outcome)
    }

    /// Fill and submit one form. `None` means the form offered nothing to
    /// fill and was skipped without clicking anything.
    async fn attempt_form(
        &self,
        ctx: &mut dyn RenderContext,
        form: &Form,
        record: &ContentRecord,
    ) -> Option<SubmissionOutcome> {
        // Best-effort resolution: unmatched keys are skipped, not fatal.
        let mut resolved = Vec::new();
        for (key, value) in record.iter() {
            if let Some(matched) = self
                .matcher
                .match_field(form, key, value, self.config.similarity_threshold)
                .await
            {
                resolved.push(matched);
            }
        }
        if resolved.is_empty() {
            return None;
        }

        for matched in &resolved {
            let locator = &matched.field.locator;
            if matched.field.is_checkbox() {
                if let Err(e) = ctx.set_checked(locator, true).await {
                    debug!("checkbox {locator} not driven: {e:#}");
                }
            } else if matched.field.is_texty() {
                // Leave prefilled values alone and don't type into fields
                // the page keeps hidden.
                if let Ok(current) = ctx.input_value(locator).await {
                    if !current.trim().is_empty() {
                        continue;
                    }
                }
                if let Ok(false) = ctx.is_visible(locator).await {
                    continue;
                }
                if let Err(e) = ctx.fill(locator, &matched.value).await {
                    debug!("field {locator} not filled: {e:#}");
                }
                // Let JS-bound forms react to one field before the next.
                tokio::time::sleep(self.config.settle).await;
            }
        }

        // Consent checkboxes, matched or not.
        for field in form.fields.iter().filter(|f| f.is_checkbox()) {
            if let Err(e) = ctx.set_checked(&field.locator, true).await {
                debug!("checkbox {} not driven: {e:#}", field.locator);
            }
        }

        let Some(submit_locator) = self.find_submit_control(ctx, form).await else {
            return Some(SubmissionOutcome::SubmitActionFailed);
        };

        let url_before = ctx.current_url().await.unwrap_or_default();
        if ctx.click(&submit_locator).await.is_err() {
            return Some(SubmissionOutcome::SubmitActionFailed);
        }
        tokio::time::sleep(self.config.settle).await;

        // Client-side validation often re-renders the same submit button
        // without navigating; one more click gets past it.
        let url_after = ctx.current_url().await.unwrap_or_default();
        if url_after == url_before && ctx.exists(&submit_locator).await.unwrap_or(false) {
            let _ = ctx.click(&submit_locator).await;
            tokio::time::sleep(self.config.settle).await;
        }

        let text = ctx.visible_text().await.unwrap_or_default();
        if contains_any(&text, &self.config.success_keywords) {
            Some(SubmissionOutcome::Success)
        } else {
            Some(SubmissionOutcome::SubmitActionFailed)
        }
    }

    /// The form's own submit-typed control first, then anything on the page
    /// whose class or name mentions "submit" (themed forms often wrap the
    /// real control in a styled div).
    async fn find_submit_control(
        &self,
        ctx: &dyn RenderContext,
        form: &Form,
    ) -> Option<FieldLocator> {
        if let Some(control) = form.submit_control() {
            if ctx.exists(&control.locator).await.unwrap_or(false) {
                return Some(control.locator.clone());
            }
        }

        let loose = FieldLocator {
            css: r#"[class*="submit"], [name*="submit"]"#.to_string(),
            index: 0,
        };
        if ctx.exists(&loose).await.unwrap_or(false) {
            return Some(loose);
        }
        None
    }
}

#[async_trait]
impl Submitter for BrowserSubmitter {
    async fn submit(
        &self,
        url: &str,
        record: &ContentRecord,
    ) -> Result<SubmissionOutcome, SubmitError> {
        let mut ctx = self
            .renderer
            .new_context()
            .await
            .map_err(|e| SubmitError::Navigation(format!("{e:#}")))?;

        let result = self.run(ctx.as_mut(), url, record).await;
        let _ = ctx.close().await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{bail, Result};
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    /// Scripted in-process page standing in for a rendered browser tab.
    #[derive(Default)]
    struct FakePageState {
        filled: HashMap<String, String>,
        checked: HashMap<String, bool>,
        clicks: Vec<String>,
        url: String,
    }

    struct FakePage {
        html: String,
        /// Locator keys (`locator.to_string()`) that resolve on this page.
        elements: HashSet<String>,
        /// Locator keys that count as submit controls when clicked.
        submit_keys: HashSet<String>,
        hidden: HashSet<String>,
        prefilled: HashMap<String, String>,
        /// Visible text before/after the submit control has been clicked.
        text_before: String,
        text_after: String,
        /// URL the page navigates to on the first submit click, if any.
        url_after_submit: Option<String>,
        navigate_fails: bool,
        state: Mutex<FakePageState>,
    }

    impl FakePage {
        fn new(html: &str) -> Self {
            let forms = extract_forms(html, "https://site.example/contact");
            let elements = forms
                .iter()
                .flat_map(|f| f.fields.iter().map(|field| field.locator.to_string()))
                .collect();
            let submit_keys = forms
                .iter()
                .filter_map(|f| f.submit_control())
                .map(|field| field.locator.to_string())
                .collect();
            Self {
                html: html.to_string(),
                elements,
                submit_keys,
                hidden: HashSet::new(),
                prefilled: HashMap::new(),
                text_before: String::new(),
                text_after: String::new(),
                url_after_submit: None,
                navigate_fails: false,
                state: Mutex::new(FakePageState {
                    url: "https://site.example/contact".to_string(),
                    ..Default::default()
                }),
            }
        }

        /// Add a loose submit control outside any form schema.
        fn with_loose_submit(mut self) -> Self {
            let key = r#"[class*="submit"], [name*="submit"]"#.to_string();
            self.elements.insert(key.clone());
            self.submit_keys.insert(key);
            self
        }

        fn submit_clicked(&self) -> usize {
            self.state
                .lock()
                .unwrap()
                .clicks
                .iter()
                .filter(|c| self.submit_keys.contains(*c))
                .count()
        }
    }

    struct FakeContext(Arc<FakePage>);

    #[async_trait]
    impl RenderContext for FakeContext {
        async fn navigate(&mut self, _url: &str, _timeout_ms: u64) -> Result<()> {
            if self.0.navigate_fails {
                bail!("net::ERR_CONNECTION_REFUSED");
            }
            Ok(())
        }

        async fn page_source(&self) -> Result<String> {
            Ok(self.0.html.clone())
        }

        async fn current_url(&self) -> Result<String> {
            Ok(self.0.state.lock().unwrap().url.clone())
        }

        async fn fill(&self, locator: &FieldLocator, text: &str) -> Result<()> {
            let key = locator.to_string();
            if !self.0.elements.contains(&key) {
                bail!("element not found: {locator}");
            }
            self.0
                .state
                .lock()
                .unwrap()
                .filled
                .insert(key, text.to_string());
            Ok(())
        }

        async fn input_value(&self, locator: &FieldLocator) -> Result<String> {
            let key = locator.to_string();
            let state = self.0.state.lock().unwrap();
            if let Some(v) = state.filled.get(&key) {
                return Ok(v.clone());
            }
            Ok(self.0.prefilled.get(&key).cloned().unwrap_or_default())
        }

        async fn set_checked(&self, locator: &FieldLocator, checked: bool) -> Result<()> {
            self.0
                .state
                .lock()
                .unwrap()
                .checked
                .insert(locator.to_string(), checked);
            Ok(())
        }

        async fn click(&self, locator: &FieldLocator) -> Result<()> {
            let key = locator.to_string();
            let mut state = self.0.state.lock().unwrap();
            if self.0.submit_keys.contains(&key) {
                if let Some(next) = &self.0.url_after_submit {
                    state.url = next.clone();
                }
            }
            state.clicks.push(key);
            Ok(())
        }

        async fn exists(&self, locator: &FieldLocator) -> Result<bool> {
            Ok(self.0.elements.contains(&locator.to_string()))
        }

        async fn is_visible(&self, locator: &FieldLocator) -> Result<bool> {
            let key = locator.to_string();
            Ok(self.0.elements.contains(&key) && !self.0.hidden.contains(&key))
        }

        async fn visible_text(&self) -> Result<String> {
            let clicked = self
                .0
                .state
                .lock()
                .unwrap()
                .clicks
                .iter()
                .any(|c| self.0.submit_keys.contains(c));
            Ok(if clicked {
                self.0.text_after.clone()
            } else {
                self.0.text_before.clone()
            })
        }

        async fn close(self: Box<Self>) -> Result<()> {
            Ok(())
        }
    }

    struct FakeRenderer(Arc<FakePage>);

    #[async_trait]
    impl Renderer for FakeRenderer {
        async fn new_context(&self) -> Result<Box<dyn RenderContext>> {
            Ok(Box::new(FakeContext(Arc::clone(&self.0))))
        }
        async fn shutdown(&self) -> Result<()> {
            Ok(())
        }
        fn active_contexts(&self) -> usize {
            0
        }
    }

    fn config() -> Arc<RelayConfig> {
        Arc::new(RelayConfig {
            settle: std::time::Duration::ZERO,
            ..RelayConfig::default()
        })
    }

    fn submitter_for(page: &Arc<FakePage>) -> BrowserSubmitter {
        BrowserSubmitter::new(
            Arc::new(FakeRenderer(Arc::clone(page))),
            Arc::new(FieldMatcher::heuristic_only()),
            config(),
        )
    }

    fn record() -> ContentRecord {
        let mut r = ContentRecord::new();
        r.insert("name", "Taro");
        r.insert("email_address", "t@example.com");
        r.insert("message_content", "Hello there");
        r
    }

    const RENDERED_FORM: &str = r#"
        <form action="/send" method="post">
          <input type="text" name="name">
          <input type="email" name="email">
          <textarea name="message"></textarea>
          <input type="checkbox" name="privacy_ok">
          <input type="submit" value="送信">
        </form>
    "#;

    const CONSENT_CSS: &str = r#"form [name="privacy_ok"]"#;

    #[tokio::test]
    async fn fills_fields_checks_consent_and_succeeds_on_keyword() {
        let mut page = FakePage::new(RENDERED_FORM);
        page.text_after = "お問い合わせが送信されました。".to_string();
        page.url_after_submit = Some("https://site.example/thanks".to_string());
        let page = Arc::new(page);

        let outcome = submitter_for(&page)
            .submit("https://site.example/contact", &record())
            .await
            .unwrap();
        assert_eq!(outcome, SubmissionOutcome::Success);

        let state = page.state.lock().unwrap();
        assert_eq!(
            state.filled.get(r#"form [name="name"]"#),
            Some(&"Taro".to_string())
        );
        assert_eq!(
            state.filled.get(r#"form [name="email"]"#),
            Some(&"t@example.com".to_string())
        );
        assert_eq!(state.checked.get(CONSENT_CSS), Some(&true), "consent box driven");
        drop(state);
        assert_eq!(page.submit_clicked(), 1, "URL changed, so no second click");
    }

    #[tokio::test]
    async fn unmatched_keys_are_skipped_not_fatal() {
        // Form carries no message field; name and email still go through.
        let html = r#"
            <form action="/send">
              <input type="text" name="name">
              <input type="email" name="email">
              <input type="submit">
            </form>
        "#;
        let mut page = FakePage::new(html);
        page.text_after = "Thank you".to_string();
        let page = Arc::new(page);

        let outcome = submitter_for(&page)
            .submit("https://site.example/contact", &record())
            .await
            .unwrap();
        assert_eq!(outcome, SubmissionOutcome::Success);
    }

    #[tokio::test]
    async fn reclicks_when_url_unchanged_and_control_still_present() {
        let mut page = FakePage::new(RENDERED_FORM);
        page.text_after = "Thank you".to_string();
        // No navigation on click: same URL, submit control still there.
        let page = Arc::new(page);

        let outcome = submitter_for(&page)
            .submit("https://site.example/contact", &record())
            .await
            .unwrap();
        assert_eq!(outcome, SubmissionOutcome::Success);
        assert_eq!(page.submit_clicked(), 2, "re-render without navigation gets a second click");
    }

    #[tokio::test]
    async fn prefilled_fields_are_left_alone() {
        let mut page = FakePage::new(RENDERED_FORM);
        page.prefilled.insert(
            r#"form [name="name"]"#.to_string(),
            "Existing".to_string(),
        );
        page.text_after = "Thank you".to_string();
        let page = Arc::new(page);

        submitter_for(&page)
            .submit("https://site.example/contact", &record())
            .await
            .unwrap();

        let state = page.state.lock().unwrap();
        assert!(!state.filled.contains_key(r#"form [name="name"]"#));
        assert!(state.filled.contains_key(r#"form [name="email"]"#));
    }

    #[tokio::test]
    async fn invisible_fields_are_not_typed_into() {
        let mut page = FakePage::new(RENDERED_FORM);
        page.hidden
            .insert(r#"form [name="email"]"#.to_string());
        page.text_after = "Thank you".to_string();
        let page = Arc::new(page);

        submitter_for(&page)
            .submit("https://site.example/contact", &record())
            .await
            .unwrap();

        let state = page.state.lock().unwrap();
        assert!(!state.filled.contains_key(r#"form [name="email"]"#));
    }

    #[tokio::test]
    async fn falls_back_to_loose_submit_control() {
        let html = r#"
            <form action="/send">
              <input type="text" name="name">
              <div class="form-submit-wrap"></div>
            </form>
        "#;
        let mut page = FakePage::new(html).with_loose_submit();
        page.text_after = "Thank you".to_string();
        let page = Arc::new(page);

        let outcome = submitter_for(&page)
            .submit("https://site.example/contact", &record())
            .await
            .unwrap();
        assert_eq!(outcome, SubmissionOutcome::Success);
    }

    #[tokio::test]
    async fn missing_submit_control_fails_the_action() {
        let html = r#"<form action="/send"><input type="text" name="name"></form>"#;
        let page = Arc::new(FakePage::new(html));

        let outcome = submitter_for(&page)
            .submit("https://site.example/contact", &record())
            .await
            .unwrap();
        assert_eq!(outcome, SubmissionOutcome::SubmitActionFailed);
    }

    #[tokio::test]
    async fn no_keyword_after_submit_fails_the_action() {
        let mut page = FakePage::new(RENDERED_FORM);
        page.text_after = "入力内容をご確認ください".to_string();
        let page = Arc::new(page);

        let outcome = submitter_for(&page)
            .submit("https://site.example/contact", &record())
            .await
            .unwrap();
        assert_eq!(outcome, SubmissionOutcome::SubmitActionFailed);
    }

    #[tokio::test]
    async fn rendered_page_without_forms_is_no_form_found() {
        let page = Arc::new(FakePage::new("<div>call us</div>"));
        let outcome = submitter_for(&page)
            .submit("https://site.example/contact", &record())
            .await
            .unwrap();
        assert_eq!(outcome, SubmissionOutcome::NoFormFound);
    }

    #[tokio::test]
    async fn refusal_keyword_declines() {
        let html = format!("<p>営業目的のお問い合わせはご遠慮ください</p>{RENDERED_FORM}");
        let page = Arc::new(FakePage::new(&html));
        let outcome = submitter_for(&page)
            .submit("https://site.example/contact", &record())
            .await
            .unwrap();
        assert_eq!(outcome, SubmissionOutcome::Declined);
    }

    #[tokio::test]
    async fn navigation_failure_is_a_retriable_error() {
        let mut page = FakePage::new(RENDERED_FORM);
        page.navigate_fails = true;
        let page = Arc::new(page);

        let err = submitter_for(&page)
            .submit("https://site.example/contact", &record())
            .await
            .unwrap_err();
        assert!(err.is_retriable());
    }
}
