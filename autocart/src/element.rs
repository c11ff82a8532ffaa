use crate::errors::AutomationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::Debug;
use tracing::{debug, instrument};

/// Rendered box of an element, in CSS pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ElementBounds {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl ElementBounds {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// True when the box occupies at least some area on screen
    pub fn has_area(&self) -> bool {
        self.width > 0.0 && self.height > 0.0
    }
}

/// Backend-specific element implementation.
///
/// A handle is only as good as the page state it was taken from: once the
/// page re-renders, methods may return [`AutomationError::StaleElement`].
#[async_trait::async_trait]
pub trait PageElementImpl: Send + Sync + Debug {
    /// Backend reference that identifies the node while it is attached
    fn object_id(&self) -> String;
    fn tag(&self) -> String;
    async fn text(&self) -> Result<String, AutomationError>;
    async fn bounds(&self) -> Result<ElementBounds, AutomationError>;
    /// Computed style check (`display`/`visibility`), independent of size
    async fn is_displayed(&self) -> Result<bool, AutomationError>;
    async fn click(&self) -> Result<(), AutomationError>;
    async fn parent(&self) -> Result<Option<PageElement>, AutomationError>;
    fn clone_box(&self) -> Box<dyn PageElementImpl>;
}

/// Opaque handle to a single live element on the page
pub struct PageElement {
    inner: Box<dyn PageElementImpl>,
}

impl PageElement {
    pub fn new(impl_: Box<dyn PageElementImpl>) -> Self {
        Self { inner: impl_ }
    }

    pub fn id(&self) -> String {
        self.inner.object_id()
    }

    pub fn tag(&self) -> String {
        self.inner.tag()
    }

    pub async fn text(&self) -> Result<String, AutomationError> {
        self.inner.text().await
    }

    /// Trimmed text, or an empty string if the element could not be read
    pub async fn text_or_empty(&self) -> String {
        self.inner
            .text()
            .await
            .map(|t| t.trim().to_string())
            .unwrap_or_default()
    }

    pub async fn bounds(&self) -> Result<ElementBounds, AutomationError> {
        self.inner.bounds().await
    }

    /// Visible means displayed and with a non-zero rendered size.
    /// Read failures count as not visible.
    pub async fn is_visible(&self) -> bool {
        match self.inner.is_displayed().await {
            Ok(true) => {}
            Ok(false) => return false,
            Err(e) => {
                debug!(element = %self.id(), "visibility check failed: {}", e);
                return false;
            }
        }
        match self.inner.bounds().await {
            Ok(b) => b.has_area(),
            Err(_) => false,
        }
    }

    #[instrument(level = "debug", skip(self), fields(element = %self.id()))]
    pub async fn click(&self) -> Result<(), AutomationError> {
        self.inner.click().await
    }

    pub async fn parent(&self) -> Result<Option<PageElement>, AutomationError> {
        self.inner.parent().await
    }
}

impl Clone for PageElement {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone_box(),
        }
    }
}

impl PartialEq for PageElement {
    fn eq(&self, other: &Self) -> bool {
        self.inner.object_id() == other.inner.object_id()
    }
}

impl Eq for PageElement {}

impl Debug for PageElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageElement")
            .field("id", &self.inner.object_id())
            .field("tag", &self.inner.tag())
            .finish()
    }
}

impl fmt::Display for PageElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} ref={}>", self.inner.tag(), self.inner.object_id())
    }
}
