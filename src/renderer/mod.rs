//! Renderer abstraction for browser-based submission.
//!
//! Defines the `Renderer` and `RenderContext` traits that abstract over the
//! browser engine (currently Chromium via chromiumoxide). The browser-mode
//! submitter drives pages exclusively through these traits, so tests can run
//! against an in-process fake and the engine can be swapped without touching
//! submission logic.

pub mod chromium;

use crate::schema::FieldLocator;
use anyhow::Result;
use async_trait::async_trait;

/// A browser engine that can create rendering contexts.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Create a new browser context (tab).
    async fn new_context(&self) -> Result<Box<dyn RenderContext>>;
    /// Shut down the browser engine.
    async fn shutdown(&self) -> Result<()>;
    /// Number of currently active contexts.
    fn active_contexts(&self) -> usize;
}

/// A single browser context (tab) driving one live page.
#[async_trait]
pub trait RenderContext: Send + Sync {
    /// Navigate to a URL with a timeout and wait for the load to settle.
    async fn navigate(&mut self, url: &str, timeout_ms: u64) -> Result<()>;
    /// Post-script-execution HTML of the current page.
    async fn page_source(&self) -> Result<String>;
    /// The current URL.
    async fn current_url(&self) -> Result<String>;
    /// Type `text` into the element, simulating keystrokes.
    async fn fill(&self, locator: &FieldLocator, text: &str) -> Result<()>;
    /// Current value of an input-like element.
    async fn input_value(&self, locator: &FieldLocator) -> Result<String>;
    /// Drive a checkbox to the given state (toggling via click, not typing).
    async fn set_checked(&self, locator: &FieldLocator, checked: bool) -> Result<()>;
    /// Click the element.
    async fn click(&self, locator: &FieldLocator) -> Result<()>;
    /// Whether the locator resolves to an element at all.
    async fn exists(&self, locator: &FieldLocator) -> Result<bool>;
    /// Whether the element is rendered visibly (not display:none /
    /// visibility:hidden / zero-sized).
    async fn is_visible(&self, locator: &FieldLocator) -> Result<bool>;
    /// Concatenated text of all visibly rendered text nodes.
    async fn visible_text(&self) -> Result<String>;
    /// Close this context.
    async fn close(self: Box<Self>) -> Result<()>;
}

/// A no-op renderer used when Chromium is unavailable.
///
/// HTTP-mode submission works without a browser; this stub makes browser-mode
/// return errors while everything else still functions.
pub struct NoopRenderer;

#[async_trait]
impl Renderer for NoopRenderer {
    async fn new_context(&self) -> Result<Box<dyn RenderContext>> {
        Err(anyhow::anyhow!("Browser not available — HTTP-only mode"))
    }
    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
    fn active_contexts(&self) -> usize {
        0
    }
}
