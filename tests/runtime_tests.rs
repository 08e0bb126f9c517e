use async_trait::async_trait;
use bms_sim::fleet::Fleet;
use bms_sim::transport::{
    BusEvent, ChannelEvents, InboundMessage, MemoryTransport, Transport, TransportError,
};
use bms_sim::Simulator;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task;

/// Records like `MemoryTransport` but yields to the scheduler on every call,
/// the way a real broker round trip does.
#[derive(Debug, Default)]
struct YieldingTransport {
    inner: MemoryTransport,
}

#[async_trait]
impl Transport for YieldingTransport {
    async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        task::yield_now().await;
        self.inner.subscribe(topic).await
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        task::yield_now().await;
        self.inner.unsubscribe(topic).await
    }

    async fn publish(&self, topic: &str, payload: String, retain: bool) -> Result<(), TransportError> {
        task::yield_now().await;
        self.inner.publish(topic, payload, retain).await
    }
}

fn yielding_simulator(modules: usize, cells: usize) -> (Arc<Simulator<YieldingTransport>>, Arc<YieldingTransport>) {
    let transport = Arc::new(YieldingTransport::default());
    let fleet = Fleet::new(modules, cells).unwrap();
    let simulator = Arc::new(Simulator::new(fleet, Arc::clone(&transport), Duration::from_secs(60)));
    (simulator, transport)
}

fn simulator(modules: usize, cells: usize, interval: Duration) -> (Arc<Simulator<MemoryTransport>>, Arc<MemoryTransport>) {
    let transport = Arc::new(MemoryTransport::new());
    let fleet = Fleet::new(modules, cells).unwrap();
    let simulator = Arc::new(Simulator::new(fleet, Arc::clone(&transport), interval));
    (simulator, transport)
}

#[tokio::test(start_paused = true)]
async fn test_run_publishes_on_interval_and_handles_events() {
    let (simulator, transport) = simulator(1, 2, Duration::from_secs(3));
    let (tx, events) = ChannelEvents::new();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();

    let runner = tokio::spawn(Arc::clone(&simulator).run_until(events, async {
        let _ = stop_rx.await;
    }));

    tx.send(BusEvent::Connected).unwrap();
    tx.send(BusEvent::Message(InboundMessage::new(
        "esp-module/bat-sim-1/cell/1/balance_request",
        Vec::new(),
    )))
    .unwrap();

    // nothing goes out before the first interval elapses
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(transport.published().is_empty());
    assert_eq!(transport.active_subscriptions().len(), 3 + 2);
    assert_eq!(simulator.snapshot().await[0].cell_balancing.as_slice(), &[true, false]);

    tokio::time::sleep(Duration::from_secs(5)).await;
    let frames = transport.published().len() / 8;
    assert_eq!(frames, 2);

    let balancing = transport
        .published()
        .into_iter()
        .find(|(topic, _, _)| topic == "esp-module/bat-sim-1/cell/0/is_balancing")
        .map(|(_, payload, _)| payload);
    assert_eq!(balancing.as_deref(), Some("1"));

    stop_tx.send(()).unwrap();
    runner.await.unwrap().unwrap();

    // the telemetry task is gone with the loop
    let after_stop = transport.published().len();
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(transport.published().len(), after_stop);
}

#[tokio::test(start_paused = true)]
async fn test_run_ends_when_event_stream_closes() {
    let (simulator, _transport) = simulator(1, 1, Duration::from_secs(3));
    let (tx, events) = ChannelEvents::new();
    drop(tx);
    simulator
        .run_until(events, std::future::pending::<()>())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_reconnect_reissues_subscriptions_under_current_names() {
    let (simulator, transport) = simulator(2, 1, Duration::from_secs(60));
    let (tx, events) = ChannelEvents::new();

    tx.send(BusEvent::Connected).unwrap();
    tx.send(BusEvent::Message(InboundMessage::new(
        "esp-module/bat-sim-2/set_config",
        "north,1,1",
    )))
    .unwrap();
    tx.send(BusEvent::Connected).unwrap();
    drop(tx);

    Arc::clone(&simulator)
        .run_until(events, std::future::pending::<()>())
        .await
        .unwrap();

    let active = transport.active_subscriptions();
    assert_eq!(active.len(), 2 * (3 + 1));
    assert!(active.contains("esp-module/north/set_config"));
    assert!(active.contains("esp-module/bat-sim-1/cell/1/balance_request"));
    assert!(!active.iter().any(|t| t.contains("bat-sim-2")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_renames_and_ticks_keep_frames_consistent() {
    let (simulator, transport) = simulator(3, 2, Duration::from_secs(60));
    simulator.subscribe_all().await.unwrap();

    let mut tasks = Vec::new();
    for round in 0..20 {
        let renamer = Arc::clone(&simulator);
        tasks.push(tokio::spawn(async move {
            let module = round % 3 + 1;
            let current = renamer.snapshot().await[module - 1].name;
            let topic = format!("esp-module/{current}/set_config");
            let payload = format!("m{module}-r{round},1,0");
            // a concurrent rename of the same module may win first
            let _ = renamer.handle_message(&topic, payload.as_bytes()).await;
        }));

        let ticker = Arc::clone(&simulator);
        tasks.push(tokio::spawn(async move {
            ticker.publish_telemetry().await;
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    // each module block of each frame is published under a single name
    let published = transport.published();
    assert_eq!(published.len() % 8, 0);
    for block in published.chunks(4 + 2 * 2) {
        let prefix = block[0].0.trim_end_matches("uptime");
        assert!(block.iter().all(|(topic, _, _)| topic.starts_with(prefix)), "{block:?}");
    }

    // the names the fleet ended with are reachable
    let active = transport.active_subscriptions();
    for state in simulator.snapshot().await {
        assert!(active.contains(&format!("esp-module/{}/blink", state.name)));
        assert!(active.contains(&format!("esp-module/{}/cell/2/balance_request", state.name)));
    }
}

#[tokio::test]
async fn test_name_taken_over_during_rename_stays_subscribed() {
    let (simulator, transport) = yielding_simulator(2, 1);
    simulator.subscribe_all().await.unwrap();

    let first = Arc::clone(&simulator);
    let vacate = tokio::spawn(async move {
        first
            .handle_message("esp-module/bat-sim-1/set_config", b"x,0,0")
            .await
    });
    task::yield_now().await;

    let second = Arc::clone(&simulator);
    let take_over = tokio::spawn(async move {
        second
            .handle_message("esp-module/bat-sim-2/set_config", b"bat-sim-1,0,0")
            .await
    });

    vacate.await.unwrap().unwrap();
    take_over.await.unwrap().unwrap();

    let names: Vec<String> = simulator
        .snapshot()
        .await
        .iter()
        .map(|state| state.name.to_string())
        .collect();
    assert_eq!(names, ["x", "bat-sim-1"]);

    let active = transport.inner.active_subscriptions();
    assert_eq!(active.len(), 2 * (3 + 1));
    for name in &names {
        for suffix in ["set_config", "blink", "restart", "cell/1/balance_request"] {
            let topic = format!("esp-module/{name}/{suffix}");
            assert!(active.contains(&topic), "missing {topic}, active: {active:?}");
        }
    }
}

#[tokio::test]
async fn test_queued_tick_reports_state_at_publish_time() {
    let (simulator, transport) = yielding_simulator(2, 1);

    let first = Arc::clone(&simulator);
    let first_tick = tokio::spawn(async move { first.publish_telemetry().await });
    task::yield_now().await;

    let second = Arc::clone(&simulator);
    let second_tick = tokio::spawn(async move { second.publish_telemetry().await });
    task::yield_now().await;

    // lands while the first frame is still going out
    simulator
        .handle_message("esp-module/bat-sim-1/set_config", b"y,0,0")
        .await
        .unwrap();

    assert_eq!(first_tick.await.unwrap().published, 12);
    assert_eq!(second_tick.await.unwrap().published, 12);

    let topics: Vec<String> = transport
        .inner
        .published()
        .into_iter()
        .map(|(topic, _, _)| topic)
        .collect();
    assert_eq!(topics.len(), 24);
    // frames never interleave and the last one carries the latest name
    assert_eq!(topics[12], "esp-module/y/uptime");
    assert_eq!(topics[18], "esp-module/bat-sim-2/uptime");
}
