//! In-memory page used by tests and the `--demo` mode of the CLI.
//!
//! The DOM is a flat arena of nodes with parent links. Behaviour is attached
//! with click/key/scroll handlers that mutate the DOM, which is enough to
//! model a storefront that re-renders on every interaction.

use super::PageEngine;
use crate::element::{ElementBounds, PageElement, PageElementImpl};
use crate::errors::AutomationError;
use crate::selector::TargetKind;
use crate::TargetSet;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, trace};

pub type NodeId = usize;
pub type DomHandler = Arc<dyn Fn(&mut Dom) + Send + Sync>;

const DEFAULT_SIZE: (f64, f64) = (120.0, 32.0);

/// Description of a node to insert
#[derive(Debug, Clone)]
pub struct NodeSpec {
    pub tag: String,
    pub id: Option<String>,
    pub classes: Vec<String>,
    pub attrs: BTreeMap<String, String>,
    pub text: String,
    pub size: (f64, f64),
    pub displayed: bool,
    pub parent: Option<NodeId>,
}

impl NodeSpec {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_lowercase(),
            id: None,
            classes: Vec::new(),
            attrs: BTreeMap::new(),
            text: String::new(),
            size: DEFAULT_SIZE,
            displayed: true,
            parent: None,
        }
    }

    pub fn id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    pub fn class(mut self, class: &str) -> Self {
        self.classes.push(class.to_string());
        self
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.insert(name.to_string(), value.to_string());
        self
    }

    pub fn text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }

    pub fn size(mut self, width: f64, height: f64) -> Self {
        self.size = (width, height);
        self
    }

    pub fn hidden(mut self) -> Self {
        self.displayed = false;
        self
    }

    pub fn child_of(mut self, parent: NodeId) -> Self {
        self.parent = Some(parent);
        self
    }
}

struct Node {
    spec: NodeSpec,
    attached: bool,
    on_click: Option<DomHandler>,
}

struct Deferred {
    remaining: usize,
    handler: DomHandler,
}

/// Mutable document state, handed to handlers
#[derive(Default)]
pub struct Dom {
    nodes: Vec<Node>,
    key_handlers: Vec<(String, DomHandler)>,
    scroll_handlers: Vec<DomHandler>,
    deferred: Vec<Deferred>,
    clicks: Vec<NodeId>,
    keys: Vec<String>,
    scroll_y: f64,
    queries: usize,
}

impl Dom {
    pub fn add(&mut self, spec: NodeSpec) -> NodeId {
        let attached = spec.parent.map_or(true, |p| self.is_attached(p));
        self.nodes.push(Node {
            spec,
            attached,
            on_click: None,
        });
        self.nodes.len() - 1
    }

    /// Detach a node and its whole subtree
    pub fn remove(&mut self, id: NodeId) {
        if id >= self.nodes.len() {
            return;
        }
        self.nodes[id].attached = false;
        let children: Vec<NodeId> = (0..self.nodes.len())
            .filter(|&c| self.nodes[c].attached && self.nodes[c].spec.parent == Some(id))
            .collect();
        for child in children {
            self.remove(child);
        }
    }

    pub fn remove_matching(&mut self, selector: &str) -> Result<usize, AutomationError> {
        let ids = self.query(selector)?;
        let count = ids.len();
        for id in ids {
            self.remove(id);
        }
        Ok(count)
    }

    pub fn is_attached(&self, id: NodeId) -> bool {
        self.nodes.get(id).is_some_and(|n| n.attached)
    }

    pub fn set_displayed(&mut self, id: NodeId, displayed: bool) {
        if let Some(node) = self.nodes.get_mut(id) {
            node.spec.displayed = displayed;
        }
    }

    pub fn set_text(&mut self, id: NodeId, text: &str) {
        if let Some(node) = self.nodes.get_mut(id) {
            node.spec.text = text.to_string();
        }
    }

    pub fn set_attr(&mut self, id: NodeId, name: &str, value: &str) {
        if let Some(node) = self.nodes.get_mut(id) {
            node.spec.attrs.insert(name.to_string(), value.to_string());
        }
    }

    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        self.nodes.get(id)?.spec.attrs.get(name).map(String::as_str)
    }

    pub fn set_size(&mut self, id: NodeId, width: f64, height: f64) {
        if let Some(node) = self.nodes.get_mut(id) {
            node.spec.size = (width, height);
        }
    }

    pub fn on_click(&mut self, id: NodeId, handler: impl Fn(&mut Dom) + Send + Sync + 'static) {
        if let Some(node) = self.nodes.get_mut(id) {
            node.on_click = Some(Arc::new(handler));
        }
    }

    pub fn on_key(&mut self, key: &str, handler: impl Fn(&mut Dom) + Send + Sync + 'static) {
        self.key_handlers.push((key.to_string(), Arc::new(handler)));
    }

    pub fn on_scroll(&mut self, handler: impl Fn(&mut Dom) + Send + Sync + 'static) {
        self.scroll_handlers.push(Arc::new(handler));
    }

    /// Run `handler` right before the `queries`-th following query is evaluated.
    /// Models content that renders a little while after an interaction.
    pub fn after_queries(&mut self, queries: usize, handler: impl Fn(&mut Dom) + Send + Sync + 'static) {
        if queries == 0 {
            handler(self);
            return;
        }
        self.deferred.push(Deferred {
            remaining: queries,
            handler: Arc::new(handler),
        });
    }

    /// Attached nodes matching `selector`, in document order
    pub fn query(&self, selector: &str) -> Result<Vec<NodeId>, AutomationError> {
        let parsed = parse_selector(selector)?;
        Ok((0..self.nodes.len())
            .filter(|&id| self.nodes[id].attached)
            .filter(|&id| parsed.iter().any(|steps| self.matches(id, steps)))
            .collect())
    }

    pub fn clicks(&self) -> &[NodeId] {
        &self.clicks
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn scroll_y(&self) -> f64 {
        self.scroll_y
    }

    /// Own text followed by attached descendants' text, space separated
    pub fn text_content(&self, id: NodeId) -> String {
        let mut parts = Vec::new();
        self.collect_text(id, &mut parts);
        parts.join(" ")
    }

    fn collect_text(&self, id: NodeId, out: &mut Vec<String>) {
        let Some(node) = self.nodes.get(id) else {
            return;
        };
        let own = node.spec.text.trim();
        if !own.is_empty() {
            out.push(own.to_string());
        }
        for child in 0..self.nodes.len() {
            if self.nodes[child].attached && self.nodes[child].spec.parent == Some(id) {
                self.collect_text(child, out);
            }
        }
    }

    /// `display: none` is inherited from ancestors
    fn is_displayed(&self, id: NodeId) -> bool {
        let mut cur = Some(id);
        while let Some(i) = cur {
            let node = &self.nodes[i];
            if !node.spec.displayed {
                return false;
            }
            cur = node.spec.parent;
        }
        true
    }

    fn tick(&mut self) {
        self.queries += 1;
        let mut due = Vec::new();
        self.deferred.retain_mut(|d| {
            d.remaining -= 1;
            if d.remaining == 0 {
                due.push(d.handler.clone());
                false
            } else {
                true
            }
        });
        for handler in due {
            handler(self);
        }
    }

    fn is_within(&self, id: NodeId, ancestor: NodeId) -> bool {
        let mut cur = Some(id);
        while let Some(i) = cur {
            if i == ancestor {
                return true;
            }
            cur = self.nodes[i].spec.parent;
        }
        false
    }

    fn click(&mut self, id: NodeId) -> Result<(), AutomationError> {
        if !self.is_attached(id) {
            return Err(AutomationError::StaleElement(format!("mem-{id} is detached")));
        }
        // an attached `data-overlay` node swallows clicks aimed outside it
        let overlay = (0..self.nodes.len()).find(|&o| {
            self.nodes[o].attached
                && self.nodes[o].spec.attrs.contains_key("data-overlay")
                && !self.is_within(id, o)
        });
        if let Some(o) = overlay {
            return Err(AutomationError::PlatformError(format!(
                "click on mem-{id} intercepted by overlay mem-{o}"
            )));
        }
        self.clicks.push(id);
        let handler = self.nodes[id].on_click.clone();
        if let Some(handler) = handler {
            handler(self);
        }
        Ok(())
    }

    fn press_key(&mut self, key: &str) {
        self.keys.push(key.to_string());
        let handlers: Vec<DomHandler> = self
            .key_handlers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, h)| h.clone())
            .collect();
        for handler in handlers {
            handler(self);
        }
    }

    fn scroll(&mut self, dy: f64) {
        self.scroll_y += dy;
        let handlers = self.scroll_handlers.clone();
        for handler in handlers {
            handler(self);
        }
    }

    fn matches(&self, id: NodeId, steps: &[Step]) -> bool {
        match steps.last() {
            Some(last) if last.compound.matches(&self.nodes[id].spec) => {
                self.matches_ancestors(id, steps, steps.len() - 1)
            }
            _ => false,
        }
    }

    fn matches_ancestors(&self, id: NodeId, steps: &[Step], idx: usize) -> bool {
        if idx == 0 {
            return true;
        }
        let prev = &steps[idx - 1].compound;
        let mut cur = self.nodes[id].spec.parent;
        while let Some(p) = cur {
            if prev.matches(&self.nodes[p].spec) && self.matches_ancestors(p, steps, idx - 1) {
                return true;
            }
            if steps[idx].combinator == Combinator::Child {
                return false;
            }
            cur = self.nodes[p].spec.parent;
        }
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combinator {
    Descendant,
    Child,
}

#[derive(Debug, Default, Clone)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attrs: Vec<(String, Option<String>)>,
}

impl Compound {
    fn matches(&self, spec: &NodeSpec) -> bool {
        if self.tag.as_ref().is_some_and(|t| *t != spec.tag) {
            return false;
        }
        if self.id.is_some() && self.id != spec.id {
            return false;
        }
        if !self.classes.iter().all(|c| spec.classes.contains(c)) {
            return false;
        }
        self.attrs.iter().all(|(name, value)| {
            let actual = match name.as_str() {
                "id" => spec.id.as_ref(),
                _ => spec.attrs.get(name),
            };
            match (actual, value) {
                (Some(a), Some(v)) => a == v,
                (Some(_), None) => true,
                (None, _) => false,
            }
        })
    }
}

#[derive(Debug, Clone)]
struct Step {
    compound: Compound,
    combinator: Combinator,
}

/// Supported subset: `tag`, `*`, `.class`, `#id`, `[attr]`, `[attr=value]`,
/// descendant (whitespace) and child (`>`) combinators, `,` alternatives.
/// Attribute values must not contain whitespace.
fn parse_selector(selector: &str) -> Result<Vec<Vec<Step>>, AutomationError> {
    let invalid = |why: &str| AutomationError::InvalidSelector(format!("\"{selector}\": {why}"));
    let mut alternatives = Vec::new();
    for alt in selector.split(',') {
        let spaced = alt.replace('>', " > ");
        let mut steps = Vec::new();
        let mut pending = Combinator::Descendant;
        for token in spaced.split_whitespace() {
            if token == ">" {
                if steps.is_empty() {
                    return Err(invalid("combinator without a left-hand side"));
                }
                pending = Combinator::Child;
                continue;
            }
            steps.push(Step {
                compound: parse_compound(token).map_err(|e| invalid(&e))?,
                combinator: pending,
            });
            pending = Combinator::Descendant;
        }
        if steps.is_empty() || pending == Combinator::Child {
            return Err(invalid("empty selector"));
        }
        alternatives.push(steps);
    }
    Ok(alternatives)
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

fn parse_compound(token: &str) -> Result<Compound, String> {
    let chars: Vec<char> = token.chars().collect();
    let mut c = Compound::default();
    let mut i = 0;

    let read_ident = |i: &mut usize| -> String {
        let start = *i;
        while *i < chars.len() && is_ident_char(chars[*i]) {
            *i += 1;
        }
        chars[start..*i].iter().collect()
    };

    if chars.first() == Some(&'*') {
        i = 1;
    } else {
        let tag = read_ident(&mut i);
        if !tag.is_empty() {
            c.tag = Some(tag.to_lowercase());
        }
    }

    while i < chars.len() {
        match chars[i] {
            '.' => {
                i += 1;
                let class = read_ident(&mut i);
                if class.is_empty() {
                    return Err("empty class name".into());
                }
                c.classes.push(class);
            }
            '#' => {
                i += 1;
                let id = read_ident(&mut i);
                if id.is_empty() {
                    return Err("empty id".into());
                }
                c.id = Some(id);
            }
            '[' => {
                let close = chars[i..]
                    .iter()
                    .position(|&ch| ch == ']')
                    .map(|p| p + i)
                    .ok_or("unterminated attribute selector")?;
                let inner: String = chars[i + 1..close].iter().collect();
                let (name, value) = match inner.split_once('=') {
                    Some((n, v)) => {
                        let v = v.trim().trim_matches(|q| q == '"' || q == '\'');
                        (n.trim().to_string(), Some(v.to_string()))
                    }
                    None => (inner.trim().to_string(), None),
                };
                if name.is_empty() {
                    return Err("empty attribute name".into());
                }
                c.attrs.push((name, value));
                i = close + 1;
            }
            other => return Err(format!("unexpected character '{other}'")),
        }
    }
    Ok(c)
}

/// Shared handle to an in-memory page; clones see the same document
#[derive(Clone, Default)]
pub struct MemoryPage {
    dom: Arc<Mutex<Dom>>,
}

impl MemoryPage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Dom> {
        // A panicking handler must not wedge the page for everyone else
        self.dom.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add(&self, spec: NodeSpec) -> NodeId {
        self.lock().add(spec)
    }

    /// Run `f` with exclusive access to the document
    pub fn with_dom<R>(&self, f: impl FnOnce(&mut Dom) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn clicks(&self) -> Vec<NodeId> {
        self.lock().clicks().to_vec()
    }

    pub fn query_count(&self) -> usize {
        self.lock().queries
    }

    fn element(&self, node: NodeId) -> PageElement {
        let tag = self
            .lock()
            .nodes
            .get(node)
            .map(|n| n.spec.tag.clone())
            .unwrap_or_default();
        PageElement::new(Box::new(MemoryElement {
            page: self.clone(),
            node,
            tag,
        }))
    }
}

#[async_trait::async_trait]
impl PageEngine for MemoryPage {
    async fn query_all(&self, selector: &str) -> Result<Vec<PageElement>, AutomationError> {
        let ids = {
            let mut dom = self.lock();
            dom.tick();
            dom.query(selector)?
        };
        trace!(selector, matches = ids.len(), "memory query");
        Ok(ids.into_iter().map(|id| self.element(id)).collect())
    }

    async fn press_key(&self, key: &str) -> Result<(), AutomationError> {
        debug!(key, "memory key press");
        self.lock().press_key(key);
        Ok(())
    }

    async fn scroll_by(&self, _dx: f64, dy: f64) -> Result<(), AutomationError> {
        self.lock().scroll(dy);
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

#[derive(Clone)]
struct MemoryElement {
    page: MemoryPage,
    node: NodeId,
    tag: String,
}

impl std::fmt::Debug for MemoryElement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryElement")
            .field("node", &self.node)
            .field("tag", &self.tag)
            .finish()
    }
}

impl MemoryElement {
    fn read<R>(&self, f: impl FnOnce(&Dom, &Node) -> R) -> Result<R, AutomationError> {
        let dom = self.page.lock();
        match dom.nodes.get(self.node) {
            Some(node) if node.attached => Ok(f(&dom, node)),
            _ => Err(AutomationError::StaleElement(format!(
                "mem-{} is detached",
                self.node
            ))),
        }
    }
}

#[async_trait::async_trait]
impl PageElementImpl for MemoryElement {
    fn object_id(&self) -> String {
        format!("mem-{}", self.node)
    }

    fn tag(&self) -> String {
        self.tag.clone()
    }

    async fn text(&self) -> Result<String, AutomationError> {
        self.read(|dom, _| dom.text_content(self.node))
    }

    async fn bounds(&self) -> Result<ElementBounds, AutomationError> {
        self.read(|_, node| {
            let (w, h) = node.spec.size;
            ElementBounds::new(0.0, 0.0, w, h)
        })
    }

    async fn is_displayed(&self) -> Result<bool, AutomationError> {
        self.read(|dom, _| dom.is_displayed(self.node))
    }

    async fn click(&self) -> Result<(), AutomationError> {
        self.page.lock().click(self.node)
    }

    async fn parent(&self) -> Result<Option<PageElement>, AutomationError> {
        let parent = self.read(|_, node| node.spec.parent)?;
        Ok(parent
            .filter(|p| self.page.lock().is_attached(*p))
            .map(|p| self.page.element(p)))
    }

    fn clone_box(&self) -> Box<dyn PageElementImpl> {
        Box::new(self.clone())
    }
}

/// One dish on the demo storefront
#[derive(Debug, Clone)]
pub struct DemoItem {
    pub name: String,
    pub price: f64,
    /// Clicking the item never opens the modal
    pub broken_modal: bool,
    /// The modal renders without an add control
    pub missing_add: bool,
    /// Add only counts once an option of the required group is picked
    pub required_option: bool,
    /// The add control renders but the site ignores clicks on it
    pub ignores_add: bool,
}

impl DemoItem {
    pub fn new(name: &str, price: f64) -> Self {
        Self {
            name: name.to_string(),
            price,
            broken_modal: false,
            missing_add: false,
            required_option: false,
            ignores_add: false,
        }
    }

    pub fn broken_modal(mut self) -> Self {
        self.broken_modal = true;
        self
    }

    pub fn missing_add(mut self) -> Self {
        self.missing_add = true;
        self
    }

    pub fn required_option(mut self) -> Self {
        self.required_option = true;
        self
    }

    pub fn ignores_add(mut self) -> Self {
        self.ignores_add = true;
        self
    }
}

#[derive(Debug, Clone)]
pub struct DemoCategory {
    pub name: String,
    pub items: Vec<DemoItem>,
    /// The item list never renders after the tab is clicked
    pub never_renders: bool,
    /// A promo overlay renders with the item list and blocks clicks until closed
    pub overlay: bool,
}

impl DemoCategory {
    pub fn new(name: &str, items: Vec<DemoItem>) -> Self {
        Self {
            name: name.to_string(),
            items,
            never_renders: false,
            overlay: false,
        }
    }

    pub fn never_renders(mut self) -> Self {
        self.never_renders = true;
        self
    }

    pub fn with_overlay(mut self) -> Self {
        self.overlay = true;
        self
    }
}

/// A small restaurant-style menu: category tabs, an item list that renders
/// a few polls after each tab click, and an item modal with add and close
/// controls. Every re-render replaces nodes, so stale handles fail loudly.
#[derive(Debug, Clone)]
pub struct Storefront {
    pub categories: Vec<DemoCategory>,
    /// Queries between a tab click and the item list appearing
    pub render_delay_queries: usize,
    /// Items beyond this many only render after a scroll
    pub items_per_screen: Option<usize>,
}

impl Storefront {
    pub fn new(categories: Vec<DemoCategory>) -> Self {
        Self {
            categories,
            render_delay_queries: 2,
            items_per_screen: None,
        }
    }

    pub fn render_delay(mut self, queries: usize) -> Self {
        self.render_delay_queries = queries;
        self
    }

    pub fn items_per_screen(mut self, n: usize) -> Self {
        self.items_per_screen = Some(n);
        self
    }

    /// The selector configuration that matches [`build`](Self::build).
    /// Each chain starts with a selector that never matches, so the
    /// fallback path is exercised on every lookup.
    pub fn targets() -> TargetSet {
        TargetSet::new()
            .with(TargetKind::Category, [".legacy-tab", "nav.categories .category-tab"])
            .with(TargetKind::MenuItem, ["[data-testid=menu-item]", "li.menu-item"])
            .with(TargetKind::AddButton, ["button.add-to-cart", "[data-action=add]"])
            .with(TargetKind::Modal, ["[role=dialog]", "div.item-modal"])
            .with(TargetKind::CloseButton, ["button.modal-close"])
            .with(TargetKind::PriceLabel, [".modal-price"])
            .with(
                TargetKind::AddOn,
                ["div.option-group[data-required=true] button.option"],
            )
            .with(TargetKind::CartCount, ["#cart-count"])
    }

    pub fn build(&self) -> MemoryPage {
        let page = MemoryPage::new();
        let categories = self.categories.clone();
        let delay = self.render_delay_queries;
        let per_screen = self.items_per_screen;

        page.with_dom(|dom| {
            let body = dom.add(NodeSpec::new("body").size(1280.0, 800.0));
            let nav = dom.add(NodeSpec::new("nav").class("categories").child_of(body));
            // zero-size decoy that shares the tab class
            dom.add(
                NodeSpec::new("button")
                    .class("category-tab")
                    .text("Hidden promo")
                    .size(0.0, 0.0)
                    .child_of(nav),
            );
            let main = dom.add(NodeSpec::new("main").id("menu").child_of(body));
            let cart = dom.add(NodeSpec::new("span").id("cart-count").text("0").child_of(body));

            for category in categories {
                let tab = dom.add(
                    NodeSpec::new("button")
                        .class("category-tab")
                        .text(&category.name)
                        .child_of(nav),
                );
                dom.on_click(tab, move |dom| {
                    let _ = dom.remove_matching("ul.menu-list");
                    if category.never_renders {
                        return;
                    }
                    let category = category.clone();
                    dom.after_queries(delay, move |dom| {
                        render_items(dom, main, cart, &category.items, per_screen);
                        if category.overlay {
                            render_overlay(dom, main);
                        }
                    });
                });
            }

            dom.on_key("Escape", |dom| {
                let _ = dom.remove_matching("div.item-modal");
            });
        });
        page
    }
}

fn render_items(
    dom: &mut Dom,
    main: NodeId,
    cart: NodeId,
    items: &[DemoItem],
    per_screen: Option<usize>,
) {
    let list = dom.add(NodeSpec::new("ul").class("menu-list").child_of(main));
    for (i, item) in items.iter().enumerate() {
        let mut spec = NodeSpec::new("li")
            .class("menu-item")
            .text(&item.name)
            .child_of(list);
        if per_screen.is_some_and(|n| i >= n) {
            spec = spec.hidden();
        }
        let node = dom.add(spec);
        let item = item.clone();
        dom.on_click(node, move |dom| open_modal(dom, main, cart, &item));
    }
    if per_screen.is_some() {
        dom.on_scroll(move |dom| {
            // reveal everything under this list once the user scrolls
            let hidden: Vec<NodeId> = dom
                .query("ul.menu-list li.menu-item")
                .unwrap_or_default()
                .into_iter()
                .filter(|&id| dom.nodes[id].spec.parent == Some(list))
                .collect();
            for id in hidden {
                dom.set_displayed(id, true);
            }
        });
    }
}

fn render_overlay(dom: &mut Dom, main: NodeId) {
    let overlay = dom.add(
        NodeSpec::new("div")
            .class("item-modal")
            .attr("data-overlay", "promo")
            .size(800.0, 600.0)
            .child_of(main),
    );
    dom.add(NodeSpec::new("p").text("Free delivery today!").child_of(overlay));
    let close = dom.add(
        NodeSpec::new("button")
            .class("modal-close")
            .text("×")
            .child_of(overlay),
    );
    dom.on_click(close, move |dom| dom.remove(overlay));
}

fn open_modal(dom: &mut Dom, main: NodeId, cart: NodeId, item: &DemoItem) {
    if item.broken_modal {
        return;
    }
    let modal = dom.add(
        NodeSpec::new("div")
            .class("item-modal")
            .size(600.0, 400.0)
            .child_of(main),
    );
    dom.add(NodeSpec::new("h2").text(&item.name).child_of(modal));
    if item.required_option {
        let group = dom.add(
            NodeSpec::new("div")
                .class("option-group")
                .attr("data-required", "true")
                .child_of(modal),
        );
        for choice in ["Grilled", "Fried"] {
            let option = dom.add(
                NodeSpec::new("button")
                    .class("option")
                    .text(choice)
                    .child_of(group),
            );
            dom.on_click(option, move |dom| dom.set_attr(modal, "data-chosen", choice));
        }
    }
    let footer = dom.add(NodeSpec::new("div").class("modal-footer").child_of(modal));
    dom.add(
        NodeSpec::new("span")
            .class("modal-price")
            .text(&format!("${:.2}", item.price))
            .child_of(footer),
    );
    if !item.missing_add {
        let add = dom.add(
            NodeSpec::new("button")
                .class("add-to-cart")
                .attr("data-action", "add")
                .text("Add to order")
                .child_of(footer),
        );
        let ignored = item.ignores_add;
        let needs_option = item.required_option;
        dom.on_click(add, move |dom| {
            if ignored || (needs_option && dom.attr(modal, "data-chosen").is_none()) {
                return;
            }
            let count: usize = dom.nodes[cart].spec.text.parse().unwrap_or(0);
            dom.set_text(cart, &(count + 1).to_string());
        });
    }
    let close = dom.add(
        NodeSpec::new("button")
            .class("modal-close")
            .text("×")
            .child_of(modal),
    );
    dom.on_click(close, move |dom| dom.remove(modal));
}

/// Number of successful add clicks recorded by a [`Storefront`] page
pub fn storefront_cart_count(page: &MemoryPage) -> usize {
    page.with_dom(|dom| {
        dom.query("#cart-count")
            .ok()
            .and_then(|ids| ids.first().copied())
            .and_then(|id| dom.nodes[id].spec.text.parse().ok())
            .unwrap_or(0)
    })
}
