use tracing::{debug, instrument, warn};

use crate::element::PageElement;
use crate::errors::AutomationError;
use crate::platforms::PageEngine;
use crate::selector::TargetDescriptor;
use crate::wait::{wait_for, Clock};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Resolves a logical target to live elements on the page.
///
/// Selectors are tried in the descriptor's priority order; the first one that
/// yields at least one *visible* element wins and later selectors are never
/// queried. Finding nothing is not an error here: callers decide whether an
/// absent target is fatal.
#[derive(Clone)]
pub struct Locator {
    engine: Arc<dyn PageEngine>,
    clock: Arc<dyn Clock>,
    descriptor: TargetDescriptor,
    poll_interval: Duration,
}

impl Locator {
    pub(crate) fn new(
        engine: Arc<dyn PageEngine>,
        clock: Arc<dyn Clock>,
        descriptor: TargetDescriptor,
    ) -> Self {
        Self {
            engine,
            clock,
            descriptor,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn set_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn descriptor(&self) -> &TargetDescriptor {
        &self.descriptor
    }

    /// First visible match, or `None`
    #[instrument(level = "debug", skip(self), fields(target = %self.descriptor.name))]
    pub async fn first(&self) -> Option<PageElement> {
        for selector in &self.descriptor.selectors {
            let candidates = self.query(selector).await;
            for el in candidates {
                if el.is_visible().await {
                    debug!(selector = %selector, element = %el, "resolved");
                    return Some(el);
                }
            }
        }
        debug!("no visible match for any selector");
        None
    }

    /// Every visible match of the first selector that has any
    #[instrument(level = "debug", skip(self), fields(target = %self.descriptor.name))]
    pub async fn all(&self) -> Vec<PageElement> {
        for selector in &self.descriptor.selectors {
            let mut visible = Vec::new();
            for el in self.query(selector).await {
                if el.is_visible().await {
                    visible.push(el);
                }
            }
            if !visible.is_empty() {
                debug!(selector = %selector, count = visible.len(), "resolved all");
                return visible;
            }
        }
        Vec::new()
    }

    pub async fn is_present(&self) -> bool {
        self.first().await.is_some()
    }

    /// Wait for a visible match to appear, up to `timeout`
    pub async fn wait(&self, timeout: Duration) -> Result<PageElement, AutomationError> {
        let found = wait_for(
            self.clock.as_ref(),
            timeout,
            self.poll_interval,
            move || self.is_present(),
        )
        .await;
        let element = if found { self.first().await } else { None };
        element.ok_or_else(|| {
            AutomationError::Timeout(format!(
                "Timed out after {timeout:?} waiting for {}",
                self.descriptor
            ))
        })
    }

    /// Wait until no visible match remains. Returns `false` on timeout.
    pub async fn wait_gone(&self, timeout: Duration) -> bool {
        wait_for(
            self.clock.as_ref(),
            timeout,
            self.poll_interval,
            move || async move { !self.is_present().await },
        )
        .await
    }

    /// A failing selector only disqualifies itself; the chain moves on.
    async fn query(&self, selector: &str) -> Vec<PageElement> {
        match self.engine.query_all(selector).await {
            Ok(found) => found,
            Err(e) => {
                warn!(selector, target = %self.descriptor.name, "selector query failed: {}", e);
                Vec::new()
            }
        }
    }
}
