use crate::browser_script::{self, NodeRef};
use crate::element::{ElementBounds, PageElementImpl};
use crate::extension_bridge::ExtensionBridge;
use crate::platforms::PageEngine;
use crate::{AutomationError, PageElement};
use serde::Deserialize;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const DEFAULT_EVAL_TIMEOUT: Duration = Duration::from_secs(10);

/// A live browser tab driven through the extension bridge
#[derive(Clone)]
pub struct ExtensionPage {
    bridge: Arc<ExtensionBridge>,
    eval_timeout: Duration,
}

impl ExtensionPage {
    pub fn new(bridge: Arc<ExtensionBridge>) -> Self {
        Self {
            bridge,
            eval_timeout: DEFAULT_EVAL_TIMEOUT,
        }
    }

    pub fn with_eval_timeout(mut self, timeout: Duration) -> Self {
        self.eval_timeout = timeout;
        self
    }

    pub fn bridge(&self) -> &Arc<ExtensionBridge> {
        &self.bridge
    }

    async fn run<T: serde::de::DeserializeOwned>(&self, code: String) -> Result<T, AutomationError> {
        run_script(&self.bridge, self.eval_timeout, code).await
    }

    fn element(&self, node: NodeRef) -> PageElement {
        PageElement::new(Box::new(ExtensionElement {
            node,
            bridge: self.bridge.clone(),
            eval_timeout: self.eval_timeout,
        }))
    }
}

async fn run_script<T: serde::de::DeserializeOwned>(
    bridge: &ExtensionBridge,
    timeout: Duration,
    code: String,
) -> Result<T, AutomationError> {
    let raw = bridge.eval(&code, timeout).await?;
    browser_script::decode_as(raw)
}

#[async_trait::async_trait]
impl PageEngine for ExtensionPage {
    async fn query_all(&self, selector: &str) -> Result<Vec<PageElement>, AutomationError> {
        let nodes: Vec<NodeRef> = self.run(browser_script::query_all(selector)).await?;
        debug!(selector, count = nodes.len(), "extension query");
        Ok(nodes.into_iter().map(|n| self.element(n)).collect())
    }

    async fn press_key(&self, key: &str) -> Result<(), AutomationError> {
        let _: bool = self.run(browser_script::press_key(key)).await?;
        Ok(())
    }

    async fn scroll_by(&self, dx: f64, dy: f64) -> Result<(), AutomationError> {
        let y: f64 = self.run(browser_script::scroll_by(dx, dy)).await?;
        debug!(scroll_y = y, "scrolled");
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

#[derive(Deserialize)]
struct Rect {
    x: f64,
    y: f64,
    width: f64,
    height: f64,
}

#[derive(Clone)]
struct ExtensionElement {
    node: NodeRef,
    bridge: Arc<ExtensionBridge>,
    eval_timeout: Duration,
}

impl Debug for ExtensionElement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionElement")
            .field("ref", &self.node.reference)
            .field("tag", &self.node.tag)
            .finish()
    }
}

impl ExtensionElement {
    async fn run<T: serde::de::DeserializeOwned>(&self, code: String) -> Result<T, AutomationError> {
        run_script(&self.bridge, self.eval_timeout, code).await
    }
}

#[async_trait::async_trait]
impl PageElementImpl for ExtensionElement {
    fn object_id(&self) -> String {
        self.node.reference.clone()
    }

    fn tag(&self) -> String {
        self.node.tag.clone()
    }

    async fn text(&self) -> Result<String, AutomationError> {
        self.run(browser_script::text(&self.node.reference)).await
    }

    async fn bounds(&self) -> Result<ElementBounds, AutomationError> {
        let r: Rect = self.run(browser_script::bounds(&self.node.reference)).await?;
        Ok(ElementBounds::new(r.x, r.y, r.width, r.height))
    }

    async fn is_displayed(&self) -> Result<bool, AutomationError> {
        self.run(browser_script::is_displayed(&self.node.reference))
            .await
    }

    async fn click(&self) -> Result<(), AutomationError> {
        let _: bool = self.run(browser_script::click(&self.node.reference)).await?;
        Ok(())
    }

    async fn parent(&self) -> Result<Option<PageElement>, AutomationError> {
        let parent: Option<NodeRef> = self
            .run(browser_script::parent(&self.node.reference))
            .await?;
        Ok(parent.map(|node| {
            PageElement::new(Box::new(ExtensionElement {
                node,
                bridge: self.bridge.clone(),
                eval_timeout: self.eval_timeout,
            }))
        }))
    }

    fn clone_box(&self) -> Box<dyn PageElementImpl> {
        Box::new(self.clone())
    }
}
