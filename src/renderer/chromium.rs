//! Chromium-based renderer using chromiumoxide.

use super::{RenderContext, Renderer};
use crate::schema::FieldLocator;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::Page;
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Find the Chromium binary path.
pub fn find_chromium() -> Option<PathBuf> {
    // 1. FORMRELAY_CHROMIUM_PATH env
    if let Ok(p) = std::env::var("FORMRELAY_CHROMIUM_PATH") {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    // 2. ~/.formrelay/chromium/
    if let Some(home) = dirs::home_dir() {
        let candidates = if cfg!(target_os = "macos") {
            vec![
                home.join(".formrelay/chromium/chrome-mac-arm64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing"),
                home.join(".formrelay/chromium/chrome-mac-x64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing"),
                home.join(".formrelay/chromium/chrome"),
            ]
        } else {
            vec![
                home.join(".formrelay/chromium/chrome-linux64/chrome"),
                home.join(".formrelay/chromium/chrome"),
            ]
        };
        for c in candidates {
            if c.exists() {
                return Some(c);
            }
        }
    }

    // 3. System PATH
    if let Ok(path) = which::which("google-chrome") {
        return Some(path);
    }
    if let Ok(path) = which::which("chromium") {
        return Some(path);
    }
    if let Ok(path) = which::which("chromium-browser") {
        return Some(path);
    }

    // 4. Common macOS location
    if cfg!(target_os = "macos") {
        let common =
            PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome");
        if common.exists() {
            return Some(common);
        }
    }

    None
}

/// Chromium-based renderer.
pub struct ChromiumRenderer {
    browser: Browser,
    active_count: Arc<AtomicUsize>,
}

impl ChromiumRenderer {
    /// Create a new ChromiumRenderer, launching a headless Chromium instance.
    pub async fn new() -> Result<Self> {
        let chrome_path = find_chromium()
            .context("Chromium not found. Install it or set FORMRELAY_CHROMIUM_PATH.")?;

        let config = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-background-networking")
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build browser config: {e}"))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("failed to launch Chromium")?;

        // Spawn the handler task
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                let _ = event;
            }
        });

        Ok(Self {
            browser,
            active_count: Arc::new(AtomicUsize::new(0)),
        })
    }
}

#[async_trait]
impl Renderer for ChromiumRenderer {
    async fn new_context(&self) -> Result<Box<dyn RenderContext>> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .context("failed to create new page")?;

        self.active_count.fetch_add(1, Ordering::Relaxed);

        Ok(Box::new(ChromiumContext {
            page,
            active_count: Arc::clone(&self.active_count),
        }))
    }

    async fn shutdown(&self) -> Result<()> {
        // Browser is dropped when ChromiumRenderer is dropped
        Ok(())
    }

    fn active_contexts(&self) -> usize {
        self.active_count.load(Ordering::Relaxed)
    }
}

/// A single Chromium page context.
pub struct ChromiumContext {
    page: Page,
    active_count: Arc<AtomicUsize>,
}

impl ChromiumContext {
    /// Evaluate a JS body over the locator's element, returning the
    /// `missing` literal when the element cannot be found.
    async fn eval_on_element(
        &self,
        locator: &FieldLocator,
        body: &str,
        missing: &str,
    ) -> Result<serde_json::Value> {
        let script = format!(
            r#"(() => {{
                const els = document.querySelectorAll('{css}');
                const el = els[{index}];
                if (!el) return {missing};
                {body}
            }})()"#,
            css = sanitize_js_string(&locator.css),
            index = locator.index,
        );
        let result = self
            .page
            .evaluate(script)
            .await
            .context("JS execution failed")?;
        result
            .into_value()
            .map_err(|e| anyhow::anyhow!("failed to convert JS result: {e:?}"))
    }
}

#[async_trait]
impl RenderContext for ChromiumContext {
    async fn navigate(&mut self, url: &str, timeout_ms: u64) -> Result<()> {
        let result = tokio::time::timeout(
            std::time::Duration::from_millis(timeout_ms),
            self.page.goto(url),
        )
        .await;

        match result {
            Ok(Ok(_response)) => {
                // Wait for page to be loaded
                let _ = self.page.wait_for_navigation().await;
                Ok(())
            }
            Ok(Err(e)) => bail!("navigation failed: {e}"),
            Err(_) => bail!("navigation timed out after {timeout_ms}ms"),
        }
    }

    async fn page_source(&self) -> Result<String> {
        let result = self
            .page
            .evaluate("document.documentElement.outerHTML")
            .await
            .context("failed to get HTML")?;

        let html: String = result
            .into_value()
            .map_err(|e| anyhow::anyhow!("failed to convert HTML result: {e:?}"))?;

        Ok(html)
    }

    async fn current_url(&self) -> Result<String> {
        let url = self
            .page
            .url()
            .await
            .context("failed to get URL")?
            .map(|u| u.to_string())
            .unwrap_or_default();
        Ok(url)
    }

    async fn fill(&self, locator: &FieldLocator, text: &str) -> Result<()> {
        let element = self
            .page
            .find_elements(locator.css.as_str())
            .await
            .with_context(|| format!("query failed for {locator}"))?
            .into_iter()
            .nth(locator.index)
            .ok_or_else(|| anyhow::anyhow!("element not found: {locator}"))?;
        // Click to focus, then send real key events, so JS-bound forms see
        // input the way a typing user produces it.
        element
            .click()
            .await
            .with_context(|| format!("focus click failed for {locator}"))?;
        element
            .type_str(text)
            .await
            .with_context(|| format!("typing failed for {locator}"))?;
        Ok(())
    }

    async fn input_value(&self, locator: &FieldLocator) -> Result<String> {
        let value = self
            .eval_on_element(locator, "return el.value || '';", "''")
            .await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn set_checked(&self, locator: &FieldLocator, checked: bool) -> Result<()> {
        // Toggle via click so change handlers fire, never by typing.
        let toggled = self
            .eval_on_element(
                locator,
                &format!("if (el.checked !== {checked}) {{ el.click(); }} return true;"),
                "false",
            )
            .await?;
        if toggled.as_bool() != Some(true) {
            anyhow::bail!("element not found: {locator}");
        }
        Ok(())
    }

    async fn click(&self, locator: &FieldLocator) -> Result<()> {
        let element = self
            .page
            .find_elements(locator.css.as_str())
            .await
            .with_context(|| format!("query failed for {locator}"))?
            .into_iter()
            .nth(locator.index)
            .ok_or_else(|| anyhow::anyhow!("element not found: {locator}"))?;
        element
            .click()
            .await
            .with_context(|| format!("click failed for {locator}"))?;
        Ok(())
    }

    async fn exists(&self, locator: &FieldLocator) -> Result<bool> {
        let elements = self.page.find_elements(locator.css.as_str()).await;
        Ok(matches!(elements, Ok(els) if els.len() > locator.index))
    }

    async fn is_visible(&self, locator: &FieldLocator) -> Result<bool> {
        let value = self
            .eval_on_element(
                locator,
                r#"const style = window.getComputedStyle(el);
                if (style.display === 'none' || style.visibility === 'hidden') return false;
                const rect = el.getBoundingClientRect();
                return rect.width > 0 && rect.height > 0;"#,
                "false",
            )
            .await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn visible_text(&self) -> Result<String> {
        // Walk text nodes, skipping any with a CSS-hidden ancestor.
        let script = r#"(() => {
            const walker = document.createTreeWalker(document.body, NodeFilter.SHOW_TEXT, {
                acceptNode(node) {
                    if (!node.textContent || !node.textContent.trim()) return NodeFilter.FILTER_REJECT;
                    let el = node.parentElement;
                    while (el) {
                        const style = window.getComputedStyle(el);
                        if (style.display === 'none' || style.visibility === 'hidden' || style.opacity === '0') {
                            return NodeFilter.FILTER_REJECT;
                        }
                        el = el.parentElement;
                    }
                    return NodeFilter.FILTER_ACCEPT;
                }
            });
            const parts = [];
            let n;
            while ((n = walker.nextNode())) parts.push(n.textContent);
            return parts.join('\n');
        })()"#;

        let result = self
            .page
            .evaluate(script)
            .await
            .context("failed to collect visible text")?;
        let text: String = result
            .into_value()
            .map_err(|e| anyhow::anyhow!("failed to convert text result: {e:?}"))?;
        Ok(text)
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.active_count.fetch_sub(1, Ordering::Relaxed);
        let _ = self.page.close().await;
        Ok(())
    }
}

/// Sanitize a string for safe injection into a JavaScript string literal.
///
/// Escapes all characters that could break out of a JS string context:
/// backslashes, quotes, backticks, newlines, null bytes, and angle brackets
/// (to prevent `</script>` injection if a value is reflected into HTML).
fn sanitize_js_string(s: &str) -> String {
    let mut result = String::with_capacity(s.len() + 8);
    for ch in s.chars() {
        match ch {
            '\\' => result.push_str("\\\\"),
            '\'' => result.push_str("\\'"),
            '"' => result.push_str("\\\""),
            '`' => result.push_str("\\`"),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            '\t' => result.push_str("\\t"),
            '\0' => {}
            '<' => result.push_str("\\x3c"),
            '>' => result.push_str("\\x3e"),
            _ => result.push(ch),
        }
    }
    result
}
