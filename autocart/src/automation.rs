//! The run/stop state machine that walks categories, opens each item and
//! adds it to the cart.
//!
//! One [`Automation`] owns exactly one status and one ledger. A run executes
//! on its own task; hosts observe it only through status snapshots and the
//! event stream, never through shared references.

use crate::cart::{CartLedger, CartLineItem, CartSnapshot};
use crate::element::PageElement;
use crate::errors::AutomationError;
use crate::locator::Locator;
use crate::price::{extract_price_from, parse_count};
use crate::protocol::Event;
use crate::selector::{TargetDescriptor, TargetKind, TargetSet};
use crate::types::{AutomationConfig, AutomationStatus, LogLevel, RunState};
use crate::wait::wait_for;
use crate::Page;
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

const EVENT_BUFFER: usize = 256;
/// Vertical distance of one lazy-load scroll
const SCROLL_STEP_PX: f64 = 600.0;

struct Shared {
    status: watch::Sender<AutomationStatus>,
    ledger: Mutex<CartLedger>,
    events: broadcast::Sender<Event>,
    // Guards run start/stop so a stop can never slip between the state flip
    // and the token swap.
    cancel: Mutex<CancellationToken>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Shared {
    fn emit(&self, event: Event) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn log(&self, level: LogLevel, text: impl Into<String>) {
        let text = text.into();
        match level {
            LogLevel::Error => error!("{}", text),
            LogLevel::Warning => warn!("{}", text),
            LogLevel::Info | LogLevel::Success => info!("{}", text),
        }
        self.emit(Event::Log { level, text });
    }

    fn snapshot(&self) -> AutomationStatus {
        self.status.borrow().clone()
    }

    /// Apply `f` and return the status exactly as `f` left it
    fn update(&self, f: impl FnOnce(&mut AutomationStatus)) -> AutomationStatus {
        let mut after = AutomationStatus::default();
        self.status.send_modify(|s| {
            f(s);
            after = s.clone();
        });
        after
    }

    async fn fail(&self, reason: String) {
        let status = self.update(|s| s.state = RunState::Failed);
        self.log(LogLevel::Error, reason.clone());
        debug!(?status, "run failed");
        self.emit(Event::Error { reason });
    }
}

/// Automation engine bound to one page
#[derive(Clone)]
pub struct Automation {
    page: Page,
    shared: Arc<Shared>,
}

impl Automation {
    pub fn new(page: Page) -> Self {
        let (status, _) = watch::channel(AutomationStatus::default());
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            page,
            shared: Arc::new(Shared {
                status,
                ledger: Mutex::new(CartLedger::new()),
                events,
                cancel: Mutex::new(CancellationToken::new()),
                task: Mutex::new(None),
            }),
        }
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    /// Current status; always answerable, never waits on the run
    pub fn status(&self) -> AutomationStatus {
        self.shared.snapshot()
    }

    /// Lifecycle, progress and log events of every run
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.shared.events.subscribe()
    }

    pub async fn items(&self) -> Vec<CartLineItem> {
        self.shared.ledger.lock().await.items().to_vec()
    }

    pub async fn total(&self) -> f64 {
        self.shared.ledger.lock().await.total()
    }

    pub async fn snapshot(&self) -> CartSnapshot {
        self.shared.ledger.lock().await.snapshot()
    }

    /// Begin a run. Rejected while another run is in progress.
    #[instrument(skip(self, targets))]
    pub async fn start(
        &self,
        config: AutomationConfig,
        targets: TargetSet,
    ) -> Result<(), AutomationError> {
        config.validate()?;
        targets.validate()?;
        let locators = Locators::new(&self.page, &config, &targets)?;

        let mut cancel = self.shared.cancel.lock().await;
        let mut accepted = false;
        self.shared.status.send_if_modified(|s| {
            if s.state == RunState::Running {
                return false;
            }
            *s = AutomationStatus {
                state: RunState::Running,
                ..AutomationStatus::default()
            };
            accepted = true;
            true
        });
        if !accepted {
            self.shared
                .log(LogLevel::Warning, "Automation is already running");
            return Err(AutomationError::AlreadyRunning);
        }

        self.shared.ledger.lock().await.clear();
        *cancel = CancellationToken::new();

        let run = Run {
            page: self.page.clone(),
            locators,
            config,
            cancel: cancel.clone(),
            shared: self.shared.clone(),
        };
        drop(cancel);

        let shared = self.shared.clone();
        let worker = tokio::spawn(run.execute());
        // Supervisor: a panicking run still produces a terminal event
        let supervisor = tokio::spawn(async move {
            if let Err(e) = worker.await {
                shared.fail(format!("Automation crashed: {e}")).await;
            }
        });
        *self.shared.task.lock().await = Some(supervisor);
        Ok(())
    }

    /// Ask the current run to stop after its in-flight step.
    /// Returns `false` when nothing was running.
    #[instrument(skip(self))]
    pub async fn stop(&self) -> bool {
        let cancel = self.shared.cancel.lock().await;
        if self.shared.snapshot().state != RunState::Running {
            debug!("stop requested while not running");
            return false;
        }
        cancel.cancel();
        self.shared
            .log(LogLevel::Info, "Stop requested; finishing current step");
        true
    }

    /// Return a finished machine to `Idle` and clear its cart
    pub async fn reset(&self) -> Result<(), AutomationError> {
        let _cancel = self.shared.cancel.lock().await;
        if self.shared.snapshot().state == RunState::Running {
            return Err(AutomationError::AlreadyRunning);
        }
        self.shared.ledger.lock().await.clear();
        self.shared.update(|s| *s = AutomationStatus::default());
        Ok(())
    }

    /// Wait for the current run (if any) to finish
    pub async fn join(&self) {
        let handle = self.shared.task.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

/// Locators for every configured target, built once per run
struct Locators {
    category: Locator,
    item: Locator,
    add: Locator,
    modal: Locator,
    close: Locator,
    price: Option<Locator>,
    /// One locator per required modifier group
    add_ons: Vec<Locator>,
    cart_count: Option<Locator>,
}

impl Locators {
    fn new(
        page: &Page,
        config: &AutomationConfig,
        targets: &TargetSet,
    ) -> Result<Self, AutomationError> {
        let locate =
            |d: TargetDescriptor| page.locator(d).set_poll_interval(config.poll_interval());
        let make = |kind: TargetKind| -> Result<Locator, AutomationError> {
            Ok(locate(targets.require(kind)?.clone()))
        };
        let add_ons: Vec<Locator> = targets
            .get(TargetKind::AddOn)
            .map(|d| {
                d.selectors
                    .iter()
                    .map(|s| locate(TargetDescriptor::new(d.name.clone(), [s.clone()])))
                    .collect()
            })
            .unwrap_or_default();
        Ok(Self {
            category: make(TargetKind::Category)?,
            item: make(TargetKind::MenuItem)?,
            add: make(TargetKind::AddButton)?,
            modal: make(TargetKind::Modal)?,
            close: make(TargetKind::CloseButton)?,
            price: targets
                .get(TargetKind::PriceLabel)
                .map(|d| locate(d.clone())),
            add_ons,
            cart_count: targets
                .get(TargetKind::CartCount)
                .map(|d| locate(d.clone())),
        })
    }
}

enum ItemOutcome {
    Added,
    Skipped,
}

/// State of one accepted run, moved onto the worker task
struct Run {
    page: Page,
    locators: Locators,
    config: AutomationConfig,
    cancel: CancellationToken,
    shared: Arc<Shared>,
}

impl Run {
    fn cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    async fn pause(&self) {
        self.page.clock().sleep(self.config.step_delay()).await;
    }

    async fn execute(self) {
        self.shared.log(LogLevel::Info, "Automation started");

        let category_count = self.locators.category.all().await.len();
        if category_count == 0 {
            self.shared
                .fail(format!(
                    "No categories found on page (tried {})",
                    self.locators.category.descriptor()
                ))
                .await;
            return;
        }
        let per_category = self.config.max_items_per_category;
        self.shared
            .update(|s| s.progress.total = category_count * per_category);
        self.shared.log(
            LogLevel::Info,
            format!("Found {category_count} categories"),
        );

        for index in 0..category_count {
            if self.cancelled() {
                break;
            }
            self.process_category(index, category_count).await;
        }
        self.finish().await;
    }

    async fn finish(&self) {
        let stopped = self.cancelled();
        // Leaving Running lets a new start clear the ledger, so the cart must
        // be captured before the state flips.
        let (status, cart) = {
            let ledger = self.shared.ledger.lock().await;
            let cart = ledger.snapshot();
            let status = self.shared.update(|s| {
                s.state = if stopped {
                    RunState::Stopped
                } else {
                    RunState::Completed
                };
            });
            (status, cart)
        };
        if stopped {
            self.shared.log(
                LogLevel::Warning,
                format!("Automation stopped with {} items in cart", status.items_count),
            );
        } else {
            self.shared.log(
                LogLevel::Success,
                format!(
                    "Automation complete: {} items, total ${:.2}",
                    status.items_count, status.total_value
                ),
            );
        }
        self.shared.emit(Event::Complete { status, cart });
    }

    /// Shrink the progress total once a category's real item count is known
    fn replan(&self, planned: usize) {
        let assumed = self.config.max_items_per_category;
        self.shared.update(|s| {
            s.progress.total = s.progress.total.saturating_sub(assumed) + planned;
        });
    }

    #[instrument(level = "debug", skip(self))]
    async fn process_category(&self, index: usize, count: usize) {
        // Handles from earlier steps may be stale; look the tab up again.
        let tabs = self.locators.category.all().await;
        let Some(tab) = tabs.get(index) else {
            self.shared.log(
                LogLevel::Warning,
                format!("Category {} of {count} is no longer on the page", index + 1),
            );
            self.replan(0);
            return;
        };
        let label = non_empty_or(tab.text_or_empty().await, || {
            format!("Category {}", index + 1)
        });
        self.shared.log(
            LogLevel::Info,
            format!("Opening category {label} ({}/{count})", index + 1),
        );
        if let Err(e) = tab.click().await {
            self.shared.log(
                LogLevel::Warning,
                format!("Could not open category {label}: {e}"),
            );
            self.replan(0);
            return;
        }
        drop(tabs);
        self.pause().await;

        if let Err(e) = self.locators.item.wait(self.config.items_timeout()).await {
            debug!(category = %label, "{}", e);
            self.shared.log(
                LogLevel::Warning,
                format!("No items appeared for category {label}; skipping"),
            );
            self.replan(0);
            return;
        }

        let available = self.discover_items().await;
        let planned = available.min(self.config.max_items_per_category);
        self.replan(planned);
        debug!(category = %label, available, planned, "items discovered");

        for item_index in 0..planned {
            if self.cancelled() {
                return;
            }
            let outcome = self.process_item(&label, item_index).await;
            if self.cancelled() {
                // the terminal event reports whatever this last item did
                return;
            }
            let status = self.shared.update(|s| s.progress.current += 1);
            if matches!(outcome, ItemOutcome::Skipped) {
                debug!(category = %label, item_index, "item skipped");
            }
            self.shared.emit(Event::Progress { status });
        }
    }

    /// Count visible items, scrolling for lazily rendered ones if allowed
    async fn discover_items(&self) -> usize {
        let wanted = self.config.max_items_per_category;
        let mut count = self.locators.item.all().await.len();
        let Some(max_scrolls) = self.config.max_scrolls else {
            return count;
        };
        let mut scrolls = 0;
        while count < wanted && scrolls < max_scrolls && !self.cancelled() {
            if let Err(e) = self.page.scroll_by(0.0, SCROLL_STEP_PX).await {
                debug!("scroll failed: {}", e);
                break;
            }
            scrolls += 1;
            self.pause().await;
            count = self.locators.item.all().await.len();
        }
        debug!(scrolls, count, "lazy load finished");
        count
    }

    #[instrument(level = "debug", skip(self))]
    async fn process_item(&self, category: &str, index: usize) -> ItemOutcome {
        let items = self.locators.item.all().await;
        let Some(item) = items.get(index) else {
            self.shared.log(
                LogLevel::Warning,
                format!("Item {} in {category} is no longer on the page", index + 1),
            );
            return ItemOutcome::Skipped;
        };
        let name = first_line(&item.text_or_empty().await)
            .unwrap_or_else(|| format!("Item {}", index + 1));
        let clicked = item.click().await;
        drop(items);
        let outcome = match clicked {
            Ok(()) => {
                self.pause().await;
                self.add_from_modal(category, &name).await
            }
            Err(e) => {
                self.shared
                    .log(LogLevel::Warning, format!("Could not open {name}: {e}"));
                ItemOutcome::Skipped
            }
        };
        // Whatever happened above, do not leave a modal over the next item
        self.close_modal().await;
        outcome
    }

    async fn add_from_modal(&self, category: &str, name: &str) -> ItemOutcome {
        if let Err(e) = self.locators.modal.wait(self.config.modal_timeout()).await {
            debug!(item = %name, "{}", e);
            self.shared.log(
                LogLevel::Warning,
                format!("Modal did not open for {name}; skipping"),
            );
            return ItemOutcome::Skipped;
        }
        if self.cancelled() {
            return ItemOutcome::Skipped;
        }
        self.choose_add_ons(name).await;

        let Some(add) = self.locators.add.first().await else {
            self.shared.log(
                LogLevel::Warning,
                format!("No add button found for {name}; skipping"),
            );
            return ItemOutcome::Skipped;
        };
        let price = self.read_price(&add).await;
        let count_before = self.cart_count().await;
        if let Err(e) = add.click().await {
            self.shared.log(
                LogLevel::Warning,
                format!("Add button for {name} could not be clicked: {e}"),
            );
            return ItemOutcome::Skipped;
        }
        if let Some(before) = count_before {
            if !self.wait_for_count_above(before).await {
                self.shared.log(
                    LogLevel::Warning,
                    format!("Cart count did not change after adding {name}; skipping"),
                );
                return ItemOutcome::Skipped;
            }
        }

        {
            let mut ledger = self.shared.ledger.lock().await;
            ledger.append(CartLineItem::new(name, price, category));
            let (count, total) = (ledger.len(), ledger.total());
            self.shared.update(|s| {
                s.items_count = count;
                s.total_value = total;
            });
        }
        self.shared.log(
            LogLevel::Success,
            format!("Added {name} (${price:.2}) from {category}"),
        );
        self.pause().await;
        ItemOutcome::Added
    }

    /// Pick the first visible choice of every required modifier group.
    /// Groups that are absent or refuse the click are left to the site.
    async fn choose_add_ons(&self, name: &str) {
        let mut picked = 0;
        for group in &self.locators.add_ons {
            let Some(choice) = group.first().await else {
                continue;
            };
            match choice.click().await {
                Ok(()) => picked += 1,
                Err(e) => debug!(item = %name, group = %group.descriptor(), "add-on click failed: {}", e),
            }
        }
        if picked > 0 {
            debug!(item = %name, picked, "add-ons chosen");
            self.pause().await;
        }
    }

    /// Basket counter value, when a counter target is configured.
    /// A configured counter that is missing or unreadable reads as zero.
    async fn cart_count(&self) -> Option<u64> {
        let counter = self.locators.cart_count.as_ref()?;
        let text = match counter.first().await {
            Some(el) => el.text_or_empty().await,
            None => String::new(),
        };
        Some(parse_count(&text).unwrap_or(0))
    }

    async fn wait_for_count_above(&self, before: u64) -> bool {
        wait_for(
            self.page.clock().as_ref(),
            self.config.add_confirm_timeout(),
            self.config.poll_interval(),
            move || async move { self.cart_count().await.is_some_and(|n| n > before) },
        )
        .await
    }

    /// Add control label, then the configured price label, then the
    /// control's container; the first text holding a number wins.
    async fn read_price(&self, add: &PageElement) -> f64 {
        let mut sources = vec![add.text_or_empty().await];
        if let Some(label) = &self.locators.price {
            if let Some(el) = label.first().await {
                sources.push(el.text_or_empty().await);
            }
        }
        if let Ok(Some(parent)) = add.parent().await {
            sources.push(parent.text_or_empty().await);
        }
        extract_price_from(&sources)
    }

    /// Close control first, Escape as fallback. Never fails.
    async fn close_modal(&self) {
        let modal = &self.locators.modal;
        if !modal.is_present().await {
            return;
        }
        let timeout = self.config.close_timeout();

        if let Some(close) = self.locators.close.first().await {
            match close.click().await {
                Ok(()) => {
                    if modal.wait_gone(timeout).await {
                        self.pause().await;
                        return;
                    }
                    debug!("modal survived close click");
                }
                Err(e) => debug!("close click failed: {}", e),
            }
        }

        if let Err(e) = self.page.press_key("Escape").await {
            debug!("escape dismissal failed: {}", e);
        }
        if modal.wait_gone(timeout).await {
            self.pause().await;
        } else {
            self.shared
                .log(LogLevel::Warning, "Modal is still open after close attempts");
        }
    }
}

fn non_empty_or(text: String, fallback: impl FnOnce() -> String) -> String {
    first_line(&text).unwrap_or_else(fallback)
}

fn first_line(text: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
}
