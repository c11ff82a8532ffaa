use crate::{AutomationError, PageElement};

pub mod extension;
pub mod memory;

pub use extension::ExtensionPage;
pub use memory::{MemoryPage, NodeSpec};

/// The common trait that every page backend must implement
#[async_trait::async_trait]
pub trait PageEngine: Send + Sync {
    /// All elements matching a CSS selector, in document order.
    /// No visibility filtering happens here; that is the locator's job.
    async fn query_all(&self, selector: &str) -> Result<Vec<PageElement>, AutomationError>;

    /// Dispatch a key press to the focused document (e.g. `"Escape"`)
    async fn press_key(&self, key: &str) -> Result<(), AutomationError>;

    /// Scroll the page viewport by the given offset in CSS pixels
    async fn scroll_by(&self, dx: f64, dy: f64) -> Result<(), AutomationError>;

    /// Enable downcasting to concrete engine types
    fn as_any(&self) -> &dyn std::any::Any;
}
