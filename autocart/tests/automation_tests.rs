use autocart::platforms::memory::{storefront_cart_count, DemoCategory, DemoItem, Storefront};
use autocart::platforms::MemoryPage;
use autocart::{
    Automation, AutomationConfig, AutomationError, Event, LogLevel, ManualClock, Page, RunState,
};
use tokio::sync::broadcast;

fn config(max_items: usize) -> AutomationConfig {
    AutomationConfig {
        step_delay_ms: 20,
        max_items_per_category: max_items,
        ..AutomationConfig::default()
    }
}

fn menu(categories: usize, items: usize, price: f64) -> Storefront {
    Storefront::new(
        (0..categories)
            .map(|c| {
                DemoCategory::new(
                    &format!("Category {c}"),
                    (0..items)
                        .map(|i| DemoItem::new(&format!("Dish {c}-{i}"), price))
                        .collect(),
                )
            })
            .collect(),
    )
}

fn engine(store: &Storefront) -> (Automation, MemoryPage) {
    let dom = store.build();
    let page = Page::with_clock(dom.clone(), ManualClock::new());
    (Automation::new(page), dom)
}

/// Drain everything emitted so far; call after the run has finished
fn drain(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        out.push(event);
    }
    out
}

fn warnings(events: &[Event]) -> Vec<&str> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::Log {
                level: LogLevel::Warning,
                text,
            } => Some(text.as_str()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn caps_items_per_category_and_totals_prices() {
    let (automation, dom) = engine(&menu(2, 3, 1.0));
    let mut events = automation.subscribe();

    automation
        .start(config(2), Storefront::targets())
        .await
        .unwrap();
    automation.join().await;

    let status = automation.status();
    assert_eq!(status.state, RunState::Completed);
    assert_eq!(status.items_count, 4);
    assert!((status.total_value - 4.0).abs() < 1e-9);
    assert_eq!(status.progress.current, status.progress.total);
    assert_eq!(status.progress.total, 4);
    assert_eq!(storefront_cart_count(&dom), 4);

    let items = automation.items().await;
    assert_eq!(items.len(), 4);
    assert_eq!(items[0].name, "Dish 0-0");
    assert_eq!(items[0].category, "Category 0");
    assert_eq!(items[3].name, "Dish 1-1");

    let events = drain(&mut events);
    assert!(matches!(
        events.first(),
        Some(Event::Log { level: LogLevel::Info, .. })
    ));
    let progress: Vec<usize> = events
        .iter()
        .filter_map(|e| match e {
            Event::Progress { status } => Some(status.progress.current),
            _ => None,
        })
        .collect();
    assert_eq!(progress, vec![1, 2, 3, 4]);
    match events.last() {
        Some(Event::Complete { status, cart }) => {
            assert_eq!(status.state, RunState::Completed);
            assert_eq!(cart.items_count, 4);
            assert!((cart.total - 4.0).abs() < 1e-9);
        }
        other => panic!("expected complete last, got {other:?}"),
    }
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
}

#[tokio::test]
async fn broken_modal_is_skipped_and_the_run_completes() {
    let store = Storefront::new(vec![DemoCategory::new(
        "Tacos",
        vec![
            DemoItem::new("Al Pastor", 3.5).broken_modal(),
            DemoItem::new("Carnitas", 4.25),
            DemoItem::new("Barbacoa", 4.75),
        ],
    )]);
    let (automation, dom) = engine(&store);
    let mut events = automation.subscribe();

    automation
        .start(config(3), Storefront::targets())
        .await
        .unwrap();
    automation.join().await;

    let status = automation.status();
    assert_eq!(status.state, RunState::Completed);
    assert_eq!(status.items_count, 2);
    assert!((status.total_value - 9.0).abs() < 1e-9);
    assert_eq!(status.progress.current, 3);
    assert_eq!(storefront_cart_count(&dom), 2);

    let events = drain(&mut events);
    assert!(warnings(&events)
        .iter()
        .any(|w| w.contains("Modal did not open for Al Pastor")));
}

#[tokio::test]
async fn missing_add_control_skips_the_item_and_closes_the_modal() {
    let store = Storefront::new(vec![DemoCategory::new(
        "Drinks",
        vec![
            DemoItem::new("Horchata", 2.0).missing_add(),
            DemoItem::new("Jamaica", 2.5),
        ],
    )]);
    let (automation, dom) = engine(&store);
    let mut events = automation.subscribe();

    automation
        .start(config(5), Storefront::targets())
        .await
        .unwrap();
    automation.join().await;

    let items = automation.items().await;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].name, "Jamaica");
    assert!((items[0].price - 2.5).abs() < 1e-9);
    assert_eq!(automation.status().state, RunState::Completed);
    // no modal left behind
    assert!(dom.with_dom(|d| d.query("div.item-modal").unwrap().is_empty()));

    let events = drain(&mut events);
    assert!(warnings(&events)
        .iter()
        .any(|w| w.contains("No add button found for Horchata")));
}

#[tokio::test]
async fn no_categories_fails_with_a_reason() {
    let (automation, _dom) = engine(&Storefront::new(Vec::new()));
    let mut events = automation.subscribe();

    automation
        .start(config(2), Storefront::targets())
        .await
        .unwrap();
    automation.join().await;

    let status = automation.status();
    assert_eq!(status.state, RunState::Failed);
    assert_eq!(status.items_count, 0);

    let events = drain(&mut events);
    match events.last() {
        Some(Event::Error { reason }) => assert!(reason.contains("No categories found")),
        other => panic!("expected error event, got {other:?}"),
    }
    assert!(!events.iter().any(|e| matches!(e, Event::Complete { .. })));
}

#[tokio::test]
async fn category_that_never_renders_is_skipped() {
    let store = Storefront::new(vec![
        DemoCategory::new("Specials", vec![DemoItem::new("Mystery", 9.0)]).never_renders(),
        DemoCategory::new("Sides", vec![DemoItem::new("Chips", 1.5), DemoItem::new("Salsa", 0.5)]),
    ]);
    let (automation, _dom) = engine(&store);
    let mut events = automation.subscribe();

    automation
        .start(config(4), Storefront::targets())
        .await
        .unwrap();
    automation.join().await;

    let status = automation.status();
    assert_eq!(status.state, RunState::Completed);
    assert_eq!(status.items_count, 2);
    assert_eq!(status.progress.total, 2);
    assert_eq!(status.progress.current, 2);

    let events = drain(&mut events);
    assert!(warnings(&events)
        .iter()
        .any(|w| w.contains("No items appeared for category Specials")));
}

#[tokio::test]
async fn scrolls_for_lazily_rendered_items_only_when_allowed() {
    let store = menu(1, 3, 2.0).items_per_screen(1);

    let (automation, _dom) = engine(&store);
    automation
        .start(config(3), Storefront::targets())
        .await
        .unwrap();
    automation.join().await;
    assert_eq!(automation.status().items_count, 1);

    let (automation, dom) = engine(&store);
    let scrolling = AutomationConfig {
        max_scrolls: Some(2),
        ..config(3)
    };
    automation
        .start(scrolling, Storefront::targets())
        .await
        .unwrap();
    automation.join().await;
    assert_eq!(automation.status().items_count, 3);
    assert!(dom.with_dom(|d| d.scroll_y()) > 0.0);
}

#[tokio::test]
async fn second_start_while_running_is_rejected() {
    let (automation, _dom) = engine(&menu(3, 3, 1.0));
    automation
        .start(config(3), Storefront::targets())
        .await
        .unwrap();

    let again = automation.start(config(3), Storefront::targets()).await;
    assert!(matches!(again, Err(AutomationError::AlreadyRunning)));
    assert!(matches!(
        automation.reset().await,
        Err(AutomationError::AlreadyRunning)
    ));

    automation.join().await;
    assert_eq!(automation.status().state, RunState::Completed);
    assert_eq!(automation.status().items_count, 9);
}

#[tokio::test]
async fn stop_ends_the_run_and_freezes_the_cart() {
    let (automation, dom) = engine(&menu(3, 3, 1.0));
    let mut events = automation.subscribe();
    automation
        .start(config(3), Storefront::targets())
        .await
        .unwrap();

    // stop as soon as the first item has been processed
    loop {
        match events.recv().await.unwrap() {
            Event::Progress { .. } => break,
            e if e.is_terminal() => panic!("run ended before it could be stopped: {e:?}"),
            _ => {}
        }
    }
    assert!(automation.stop().await);
    automation.join().await;

    let status = automation.status();
    assert_eq!(status.state, RunState::Stopped);
    assert!(status.items_count < 9);
    assert_eq!(automation.items().await.len(), status.items_count);
    assert_eq!(storefront_cart_count(&dom), status.items_count);

    let rest = drain(&mut events);
    let terminal_at = rest
        .iter()
        .position(Event::is_terminal)
        .expect("stopped run still reports a terminal event");
    match &rest[terminal_at] {
        Event::Complete { status, cart } => {
            assert_eq!(status.state, RunState::Stopped);
            assert_eq!(cart.items_count, status.items_count);
        }
        other => panic!("expected complete, got {other:?}"),
    }
    assert!(!rest.iter().any(|e| matches!(e, Event::Progress { .. })));
    assert_eq!(terminal_at, rest.len() - 1);

    // nothing to stop any more
    assert!(!automation.stop().await);
}

#[tokio::test]
async fn restart_clears_the_previous_cart() {
    let (automation, _dom) = engine(&menu(1, 2, 3.0));
    automation
        .start(config(2), Storefront::targets())
        .await
        .unwrap();
    automation.join().await;
    assert_eq!(automation.items().await.len(), 2);

    automation
        .start(config(1), Storefront::targets())
        .await
        .unwrap();
    automation.join().await;
    assert_eq!(automation.status().items_count, 1);
    assert_eq!(automation.items().await.len(), 1);

    automation.reset().await.unwrap();
    assert_eq!(automation.status().state, RunState::Idle);
    assert!(automation.items().await.is_empty());
}

#[tokio::test]
async fn invalid_configuration_is_rejected_without_a_run() {
    let (automation, _dom) = engine(&menu(1, 1, 1.0));
    let bad = AutomationConfig {
        step_delay_ms: 0,
        ..config(1)
    };
    assert!(matches!(
        automation.start(bad, Storefront::targets()).await,
        Err(AutomationError::InvalidConfig(_))
    ));
    assert_eq!(automation.status().state, RunState::Idle);
}

#[tokio::test]
async fn final_cart_exports_to_json() {
    let (automation, _dom) = engine(&menu(2, 2, 12.5));
    automation
        .start(config(2), Storefront::targets())
        .await
        .unwrap();
    automation.join().await;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cart.json");
    automation.snapshot().await.write_json(&path).unwrap();

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(json["itemsCount"], 4);
    assert_eq!(json["total"], 50.0);
    assert_eq!(json["items"][1]["name"], "Dish 0-1");
    assert!(json["exportedAt"].is_string());
}

#[tokio::test]
async fn required_options_are_picked_before_adding() {
    let store = Storefront::new(vec![DemoCategory::new(
        "Chicken",
        vec![
            DemoItem::new("Half Chicken", 9.5).required_option(),
            DemoItem::new("Wings", 6.0),
        ],
    )]);
    let (automation, dom) = engine(&store);

    automation
        .start(config(2), Storefront::targets())
        .await
        .unwrap();
    automation.join().await;

    let items = automation.items().await;
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].name, "Half Chicken");
    assert!((items[0].price - 9.5).abs() < 1e-9);
    assert_eq!(storefront_cart_count(&dom), 2);
}

#[tokio::test]
async fn add_the_site_ignores_is_not_recorded() {
    let store = Storefront::new(vec![DemoCategory::new(
        "Drinks",
        vec![
            DemoItem::new("Sold Out Shake", 5.0).ignores_add(),
            DemoItem::new("Lemonade", 2.0),
        ],
    )]);
    let (automation, dom) = engine(&store);
    let mut events = automation.subscribe();

    automation
        .start(config(2), Storefront::targets())
        .await
        .unwrap();
    automation.join().await;

    let status = automation.status();
    assert_eq!(status.state, RunState::Completed);
    assert_eq!(status.items_count, 1);
    assert_eq!(status.progress.current, 2);
    assert_eq!(automation.items().await[0].name, "Lemonade");
    assert_eq!(storefront_cart_count(&dom), 1);

    let events = drain(&mut events);
    assert!(warnings(&events)
        .iter()
        .any(|w| w.contains("Cart count did not change after adding Sold Out Shake")));
}

#[tokio::test]
async fn failed_item_click_still_dismisses_the_blocking_modal() {
    let store = Storefront::new(vec![DemoCategory::new(
        "Bakery",
        vec![DemoItem::new("Concha", 1.5), DemoItem::new("Churro", 2.0)],
    )
    .with_overlay()]);
    let (automation, dom) = engine(&store);
    let mut events = automation.subscribe();

    automation
        .start(config(2), Storefront::targets())
        .await
        .unwrap();
    automation.join().await;

    // the overlay ate the first click and was closed before the second item
    let items = automation.items().await;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].name, "Churro");
    assert!(dom.with_dom(|d| d.query("div.item-modal").unwrap().is_empty()));
    assert!(dom.with_dom(|d| d.keys().is_empty()));

    let events = drain(&mut events);
    assert!(warnings(&events)
        .iter()
        .any(|w| w.contains("Could not open Concha")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn restart_racing_the_finish_keeps_the_first_cart() {
    let (automation, _dom) = engine(&menu(2, 2, 1.0));
    let mut events = automation.subscribe();

    automation
        .start(config(2), Storefront::targets())
        .await
        .unwrap();

    // start again the moment the first run leaves Running
    let restarter = automation.clone();
    let second = tokio::spawn(async move {
        loop {
            if restarter.status().state.is_terminal() {
                return restarter.start(config(1), Storefront::targets()).await;
            }
            tokio::task::yield_now().await;
        }
    });

    let first_terminal = loop {
        let event = events.recv().await.unwrap();
        if event.is_terminal() {
            break event;
        }
    };
    match first_terminal {
        Event::Complete { status, cart } => {
            assert_eq!(status.state, RunState::Completed);
            assert_eq!(status.items_count, 4);
            assert_eq!(cart.items_count, 4);
            assert_eq!(cart.items.len(), 4);
        }
        other => panic!("expected complete, got {other:?}"),
    }

    second.await.unwrap().unwrap();
    automation.join().await;
    assert_eq!(automation.status().items_count, 2);
}
