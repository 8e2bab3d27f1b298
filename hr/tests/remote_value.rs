//! Integration tests for replicated values across processes

use std::time::Duration;

use hubrpc::broker::{Broker, BrokerConfig, BrokerHandle, CallOptions, ProcessKind};
use hubrpc::transport::MemoryNetwork;
use hubrpc::value::{RemoteValue, ValueError, ValueRegistry, ValueState};
use serde::{Deserialize, Serialize};

fn coordinator(net: &MemoryNetwork) -> BrokerHandle {
    let (transport, inbound) = net.coordinator();
    Broker::new(BrokerConfig::default(), ProcessKind::Coordinator, transport, inbound)
        .spawn()
        .0
}

fn peer(net: &MemoryNetwork, name: &str) -> BrokerHandle {
    let (transport, inbound) = net.peer(name);
    Broker::new(BrokerConfig::default(), ProcessKind::Peer, transport, inbound)
        .spawn()
        .0
}

async fn wait_for<T>(value: &RemoteValue<T>, expected: T)
where
    T: hubrpc::value::Replicable + PartialEq + std::fmt::Debug,
{
    let mut changes = value.subscribe();
    let reached = tokio::time::timeout(Duration::from_secs(2), changes.wait_for(|v| v.as_ref() == Some(&expected)))
        .await
        .map(|seen| seen.is_ok())
        .unwrap_or(false);
    assert!(reached, "value {} never became {:?}, is {:?}", value.name(), expected, value.get());
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Settings {
    volume: u8,
    muted: bool,
}

#[tokio::test]
async fn test_convergence() {
    let net = MemoryNetwork::new();
    let p1 = ValueRegistry::new(coordinator(&net));
    let p2 = ValueRegistry::new(peer(&net, "p2"));

    let x1 = p1.get_or_create("x", Some(1i64)).await.unwrap();
    x1.ready().await.unwrap();

    let x2 = p2.get_or_create::<i64>("x", None).await.unwrap();
    x2.ready().await.unwrap();
    assert_eq!(x2.get(), Some(1));
    assert_eq!(x2.state(), ValueState::Ready);

    x1.set_value(2).await.unwrap();
    wait_for(&x2, 2).await;
}

#[tokio::test]
async fn test_peer_change_reaches_coordinator_and_other_peers() {
    let net = MemoryNetwork::new();
    let hub = ValueRegistry::new(coordinator(&net));
    let a = ValueRegistry::new(peer(&net, "a"));
    let b = ValueRegistry::new(peer(&net, "b"));

    let initial = Settings {
        volume: 3,
        muted: false,
    };
    let on_hub = hub.get_or_create("settings", Some(initial.clone())).await.unwrap();
    let on_a = a.get_or_create::<Settings>("settings", None).await.unwrap();
    let on_b = b.get_or_create::<Settings>("settings", None).await.unwrap();
    on_a.ready().await.unwrap();
    on_b.ready().await.unwrap();
    assert_eq!(on_b.get(), Some(initial));

    let louder = Settings {
        volume: 9,
        muted: false,
    };
    on_a.set_value(louder.clone()).await.unwrap();
    assert_eq!(on_a.get(), Some(louder.clone()));

    wait_for(&on_hub, louder.clone()).await;
    wait_for(&on_b, louder).await;
}

#[tokio::test]
async fn test_singleton_per_name() {
    let net = MemoryNetwork::new();
    let p1 = ValueRegistry::new(coordinator(&net));

    let first = p1.get_or_create("x", Some(1u32)).await.unwrap();
    let again = p1.get_or_create("x", Some(5u32)).await.unwrap();

    assert_eq!(again.get(), Some(1));
    assert_eq!(p1.len().await, 1);

    again.set_value(3).await.unwrap();
    assert_eq!(first.get(), Some(3));
}

#[tokio::test]
async fn test_seeding_peer_updates_ready_processes() {
    let net = MemoryNetwork::new();
    let hub = ValueRegistry::new(coordinator(&net));
    let a = ValueRegistry::new(peer(&net, "a"));
    let b = ValueRegistry::new(peer(&net, "b"));

    let on_hub = hub.get_or_create::<String>("mode", None).await.unwrap();
    let on_a = a.get_or_create::<String>("mode", None).await.unwrap();
    on_a.ready().await.unwrap();
    assert_eq!(on_a.get(), None);

    // b supplies a value while creating its instance
    let on_b = b.get_or_create("mode", Some("night".to_string())).await.unwrap();
    assert_eq!(on_b.state(), ValueState::Ready);

    wait_for(&on_hub, "night".to_string()).await;
    wait_for(&on_a, "night".to_string()).await;
}

#[tokio::test]
async fn test_fetch_failure_then_update() {
    let net = MemoryNetwork::new();
    let hub_broker = coordinator(&net);
    let fast = CallOptions::new(Duration::from_millis(50)).with_retries(2);
    let a = ValueRegistry::with_fetch_options(peer(&net, "a"), fast);

    // nobody hosts "orphan" yet
    let orphan = a.get_or_create::<u32>("orphan", None).await.unwrap();
    let err = orphan.ready().await.unwrap_err();
    assert!(matches!(err, ValueError::FetchFailed { .. }));
    assert!(matches!(orphan.state(), ValueState::Failed(_)));

    // hosting it later and publishing still reaches the failed instance
    let hub = ValueRegistry::new(hub_broker);
    let hosted = hub.get_or_create("orphan", Some(4u32)).await.unwrap();
    wait_for(&orphan, 4).await;

    hosted.set_value(5).await.unwrap();
    wait_for(&orphan, 5).await;
    assert!(matches!(orphan.state(), ValueState::Failed(_)));
}

#[tokio::test]
async fn test_deregister_tears_down_wiring() {
    let net = MemoryNetwork::new();
    let hub = ValueRegistry::new(coordinator(&net));
    let a_broker = peer(&net, "a");
    let fast = CallOptions::new(Duration::from_millis(50)).with_retries(1);
    let a = ValueRegistry::with_fetch_options(a_broker.clone(), fast);

    let hosted = hub.get_or_create("x", Some(1u32)).await.unwrap();
    let held = a.get_or_create::<u32>("x", None).await.unwrap();
    held.ready().await.unwrap();

    assert!(hub.deregister("x").await.unwrap());
    assert!(a.deregister("x").await.unwrap());
    assert!(!a.contains("x").await);

    // the hub no longer answers x-init
    let fresh = a.get_or_create::<u32>("x", None).await.unwrap();
    assert!(fresh.ready().await.is_err());

    // and the old holder no longer follows updates, but keeps its value
    hosted.set_value(2).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(held.get(), Some(1));
    assert_eq!(fresh.get(), Some(2));
}

#[tokio::test]
async fn test_clear_registry() {
    let net = MemoryNetwork::new();
    let hub_broker = coordinator(&net);
    let hub = ValueRegistry::new(hub_broker.clone());

    hub.get_or_create("a", Some(1u8)).await.unwrap();
    hub.get_or_create("b", Some("two".to_string())).await.unwrap();
    assert_eq!(hub.len().await, 2);

    hub.clear().await.unwrap();
    assert!(hub.is_empty().await);

    let metrics = hub_broker.metrics().await.unwrap();
    assert_eq!(metrics.handlers, 0);
    assert_eq!(metrics.events, 0);
}
