use autocart::channel::Link;
use autocart::platforms::memory::{DemoCategory, DemoItem, Storefront};
use autocart::{
    Automation, AutomationConfig, AutomationError, ChannelError, ControlClient, ControlServer,
    Event, ManualClock, Page, RunState,
};
use std::time::Duration;

fn config(max_items: usize) -> AutomationConfig {
    AutomationConfig {
        step_delay_ms: 10,
        max_items_per_category: max_items,
        ..AutomationConfig::default()
    }
}

fn server(store: &Storefront) -> ControlServer {
    let page = Page::with_clock(store.build(), ManualClock::new());
    ControlServer::new(Automation::new(page))
}

fn two_by_three() -> Storefront {
    Storefront::new(vec![
        DemoCategory::new(
            "Burritos",
            vec![
                DemoItem::new("Bean", 1.0),
                DemoItem::new("Chicken", 1.0),
                DemoItem::new("Steak", 1.0),
            ],
        ),
        DemoCategory::new(
            "Bowls",
            vec![
                DemoItem::new("Veggie", 1.0),
                DemoItem::new("Carnitas", 1.0),
                DemoItem::new("Sofritas", 1.0),
            ],
        ),
    ])
}

#[tokio::test]
async fn in_process_run_reports_progress_and_completes() {
    let server = server(&two_by_three());
    let client = ControlClient::new(server.connect_in_process());
    let mut events = client.subscribe();

    assert_eq!(client.get_status().await.unwrap().state, RunState::Idle);
    client
        .start(config(2), Storefront::targets())
        .await
        .unwrap();

    let terminal = client.wait_for_terminal().await.unwrap();
    let Event::Complete { status, cart } = terminal else {
        panic!("expected complete, got {terminal:?}");
    };
    assert_eq!(status.state, RunState::Completed);
    assert_eq!(status.items_count, 4);
    assert!((status.total_value - 4.0).abs() < 1e-9);
    assert_eq!(cart.items.len(), 4);

    let mut progress = 0;
    loop {
        match events.recv().await.unwrap() {
            Event::Progress { .. } => progress += 1,
            e if e.is_terminal() => break,
            _ => {}
        }
    }
    assert_eq!(progress, 4);

    let status = client.get_status().await.unwrap();
    assert_eq!(status.state, RunState::Completed);
    assert_eq!(status.progress.current, status.progress.total);
}

#[tokio::test]
async fn failed_run_surfaces_error_event() {
    let server = server(&Storefront::new(Vec::new()));
    let client = ControlClient::new(server.connect_in_process());

    client
        .start(config(2), Storefront::targets())
        .await
        .unwrap();
    match client.wait_for_terminal().await.unwrap() {
        Event::Error { reason } => assert!(reason.contains("No categories found")),
        other => panic!("expected error, got {other:?}"),
    }
    let status = client.get_status().await.unwrap();
    assert_eq!(status.state, RunState::Failed);
    assert_eq!(status.items_count, 0);
}

#[tokio::test]
async fn start_rejections_carry_the_reason() {
    // big and slow enough that the run is still going when stop arrives
    let store = Storefront::new(
        (0..4)
            .map(|c| {
                DemoCategory::new(
                    &format!("Category {c}"),
                    (0..5).map(|i| DemoItem::new(&format!("Dish {i}"), 1.0)).collect(),
                )
            })
            .collect(),
    )
    .render_delay(20);
    let server = server(&store);
    let client = ControlClient::new(server.connect_in_process());

    let bad = AutomationConfig {
        max_items_per_category: 0,
        ..config(1)
    };
    match client.start(bad, Storefront::targets()).await {
        Err(AutomationError::Rejected(msg)) => assert!(msg.contains("maxItemsPerCategory")),
        other => panic!("expected rejection, got {other:?}"),
    }

    client
        .start(config(5), Storefront::targets())
        .await
        .unwrap();
    match client.start(config(5), Storefront::targets()).await {
        Err(AutomationError::Rejected(msg)) => assert!(msg.contains("already running")),
        other => panic!("expected rejection, got {other:?}"),
    }
    assert!(client.stop().await.unwrap());
    let terminal = client.wait_for_terminal().await.unwrap();
    assert!(matches!(
        terminal,
        Event::Complete { ref status, .. } if status.state == RunState::Stopped
    ));
    // stopping an idle engine is fine, it just stops nothing
    assert!(!client.stop().await.unwrap());
}

#[tokio::test]
async fn engine_that_never_answers_times_out() {
    // an engine context that exists but is busy elsewhere
    let (host, _engine) = Link::pair();
    let client = ControlClient::new(host).with_timeout(Duration::from_millis(30));
    assert_eq!(
        client.get_status().await,
        Err(ChannelError::Timeout(Duration::from_millis(30)))
    );
}

#[tokio::test]
async fn engine_that_is_gone_is_unreachable() {
    let (host, engine) = Link::pair();
    drop(engine);
    let client = ControlClient::new(host);
    assert!(matches!(
        client.start(config(1), Storefront::targets()).await,
        Err(AutomationError::Channel(ChannelError::Unreachable(_)))
    ));
}

#[tokio::test]
async fn websocket_loopback_runs_a_full_session() {
    let (addr, listener) = server(&two_by_three())
        .listen("127.0.0.1:0")
        .await
        .unwrap();
    let client = ControlClient::connect(&format!("ws://{addr}"), Duration::from_secs(5))
        .await
        .unwrap();

    client
        .start(config(2), Storefront::targets())
        .await
        .unwrap();
    let terminal = tokio::time::timeout(Duration::from_secs(10), client.wait_for_terminal())
        .await
        .expect("run should finish")
        .unwrap();
    match terminal {
        Event::Complete { status, cart } => {
            assert_eq!(status.items_count, 4);
            assert_eq!(cart.items_count, 4);
        }
        other => panic!("expected complete, got {other:?}"),
    }
    assert_eq!(client.get_status().await.unwrap().state, RunState::Completed);

    listener.abort();
}

#[tokio::test]
async fn port_that_never_completes_the_handshake_times_out() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    // accept TCP connections and hold them without ever speaking WebSocket
    let holder = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    let timeout = Duration::from_millis(200);
    let outcome = tokio::time::timeout(
        Duration::from_secs(3),
        ControlClient::connect(&format!("ws://{addr}"), timeout),
    )
    .await
    .expect("connect must give up on its own");
    assert!(matches!(outcome, Err(ChannelError::Timeout(t)) if t == timeout));

    holder.abort();
}

#[tokio::test]
async fn late_host_can_fetch_the_cart_of_a_finished_run() {
    let server = server(&two_by_three());
    let first = ControlClient::new(server.connect_in_process());
    first
        .start(config(2), Storefront::targets())
        .await
        .unwrap();
    first.wait_for_terminal().await.unwrap();
    drop(first);

    // a host that connects after the run ended never saw the complete event
    let late = ControlClient::new(server.connect_in_process());
    let cart = late.get_cart().await.unwrap();
    assert_eq!(cart.items_count, 4);
    assert_eq!(cart.items[0].name, "Bean");
    assert_eq!(cart.items[3].category, "Bowls");
    assert!((cart.total - 4.0).abs() < 1e-9);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cart.json");
    cart.write_json(&path).unwrap();
    let exported = std::fs::read_to_string(&path).unwrap();
    assert!(exported.contains("Veggie"));
    assert!(!exported.contains("Sofritas"));
}

#[tokio::test]
async fn reset_over_the_channel_empties_the_cart() {
    let server = server(&two_by_three());
    let client = ControlClient::new(server.connect_in_process());
    client
        .start(config(1), Storefront::targets())
        .await
        .unwrap();
    client.wait_for_terminal().await.unwrap();
    assert_eq!(client.get_cart().await.unwrap().items_count, 2);

    client.reset().await.unwrap();
    assert_eq!(client.get_status().await.unwrap().state, RunState::Idle);
    assert!(client.get_cart().await.unwrap().items.is_empty());
}
