//! Resilient menu-to-cart automation over a live DOM
//!
//! This crate walks a storefront page the way a person would: open each
//! category, open each item, add it from the item's modal, close the modal.
//! Every target on the page is described by a chain of fallback selectors
//! and resolved to the first *visible* match, so small markup changes do not
//! break a run.

use std::sync::Arc;
use tracing::instrument;

pub mod automation;
pub mod browser_script;
pub mod cart;
pub mod channel;
pub mod element;
pub mod errors;
pub mod extension_bridge;
pub mod locator;
pub mod platforms;
pub mod price;
pub mod protocol;
pub mod selector;
pub mod types;
pub mod wait;

pub use automation::Automation;
pub use cart::{CartLedger, CartLineItem, CartSnapshot};
pub use channel::{ControlClient, ControlServer};
pub use element::{ElementBounds, PageElement, PageElementImpl};
pub use errors::{AutomationError, ChannelError};
pub use locator::Locator;
pub use platforms::PageEngine;
pub use protocol::{Command, ControlMessage, Event, Frame, Reply};
pub use selector::{TargetDescriptor, TargetKind, TargetSet};
pub use types::{AutomationConfig, AutomationStatus, LogLevel, Progress, RunState};
pub use wait::{Clock, ManualClock, TokioClock};

/// The entry point for automating one document
#[derive(Clone)]
pub struct Page {
    engine: Arc<dyn PageEngine>,
    clock: Arc<dyn Clock>,
}

impl Page {
    /// Wrap a backend, keeping time with the tokio runtime
    pub fn new(engine: impl PageEngine + 'static) -> Self {
        Self::with_clock(engine, TokioClock::new())
    }

    /// Wrap a backend with an explicit time source (tests use [`ManualClock`])
    pub fn with_clock(engine: impl PageEngine + 'static, clock: impl Clock + 'static) -> Self {
        Self {
            engine: Arc::new(engine),
            clock: Arc::new(clock),
        }
    }

    #[instrument(level = "debug", skip(self, descriptor), fields(target = %descriptor.name))]
    pub fn locator(&self, descriptor: TargetDescriptor) -> Locator {
        Locator::new(self.engine.clone(), self.clock.clone(), descriptor)
    }

    pub async fn press_key(&self, key: &str) -> Result<(), AutomationError> {
        self.engine.press_key(key).await
    }

    pub async fn scroll_by(&self, dx: f64, dy: f64) -> Result<(), AutomationError> {
        self.engine.scroll_by(dx, dy).await
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn engine(&self) -> &Arc<dyn PageEngine> {
        &self.engine
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page").field("clock", &self.clock).finish()
    }
}
