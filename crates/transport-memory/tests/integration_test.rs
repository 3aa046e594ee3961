//! Integration tests for memory transport

use bytes::Bytes;
use futures::StreamExt;
use meridian_topology::NodeId;
use meridian_transport::{Transport, TransportError};
use meridian_transport_memory::MemoryNetwork;
use std::time::Duration;
use tokio::time::timeout;
use uuid::Uuid;

#[tokio::test]
async fn test_envelopes_are_delivered_with_metadata() {
    let _ = tracing_subscriber::fmt::try_init();

    let network = MemoryNetwork::new();
    let a = network.transport(NodeId::new(1)).unwrap();
    let b = network.transport(NodeId::new(2)).unwrap();
    let mut incoming = b.incoming();

    let correlation_id = Uuid::new_v4();
    a.send_envelope(
        &NodeId::new(2),
        &Bytes::from("hello"),
        "test.message",
        Some(correlation_id),
    )
    .await
    .unwrap();

    let envelope = timeout(Duration::from_secs(1), incoming.next())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(envelope.sender, NodeId::new(1));
    assert_eq!(envelope.message_type, "test.message");
    assert_eq!(envelope.correlation_id, Some(correlation_id));
    assert_eq!(envelope.payload, Bytes::from("hello"));
}

#[tokio::test]
async fn test_duplicate_registration_fails() {
    let network = MemoryNetwork::new();
    let _first = network.transport(NodeId::new(1)).unwrap();

    assert!(network.transport(NodeId::new(1)).is_err());
}

#[tokio::test]
async fn test_unknown_recipient_fails() {
    let network = MemoryNetwork::new();
    let a = network.transport(NodeId::new(1)).unwrap();

    let result = a
        .send_envelope(&NodeId::new(9), &Bytes::new(), "test.message", None)
        .await;

    assert!(matches!(
        result,
        Err(TransportError::ConnectionFailed { .. })
    ));
}

#[tokio::test]
async fn test_blocked_link_drops_one_direction_only() {
    let network = MemoryNetwork::new();
    let a = network.transport(NodeId::new(1)).unwrap();
    let b = network.transport(NodeId::new(2)).unwrap();
    let mut a_incoming = a.incoming();
    let mut b_incoming = b.incoming();

    network.block(NodeId::new(1), NodeId::new(2));

    a.send_envelope(&NodeId::new(2), &Bytes::from("lost"), "test", None)
        .await
        .unwrap();
    b.send_envelope(&NodeId::new(1), &Bytes::from("kept"), "test", None)
        .await
        .unwrap();

    let received = timeout(Duration::from_secs(1), a_incoming.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received.payload, Bytes::from("kept"));
    assert!(
        timeout(Duration::from_millis(50), b_incoming.next())
            .await
            .is_err()
    );

    network.heal();
    a.send_envelope(&NodeId::new(2), &Bytes::from("after heal"), "test", None)
        .await
        .unwrap();
    let received = timeout(Duration::from_secs(1), b_incoming.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received.payload, Bytes::from("after heal"));
}

#[tokio::test]
async fn test_isolated_node_neither_sends_nor_receives() {
    let network = MemoryNetwork::new();
    let a = network.transport(NodeId::new(1)).unwrap();
    let b = network.transport(NodeId::new(2)).unwrap();
    let mut a_incoming = a.incoming();
    let mut b_incoming = b.incoming();

    network.isolate(NodeId::new(2));

    a.send_envelope(&NodeId::new(2), &Bytes::new(), "test", None)
        .await
        .unwrap();
    b.send_envelope(&NodeId::new(1), &Bytes::new(), "test", None)
        .await
        .unwrap();

    assert!(
        timeout(Duration::from_millis(50), a_incoming.next())
            .await
            .is_err()
    );
    assert!(
        timeout(Duration::from_millis(50), b_incoming.next())
            .await
            .is_err()
    );
}

#[tokio::test]
async fn test_shutdown_ends_incoming_stream() {
    let network = MemoryNetwork::new();
    let a = network.transport(NodeId::new(1)).unwrap();
    let b = network.transport(NodeId::new(2)).unwrap();
    let mut incoming = b.incoming();

    b.shutdown().await.unwrap();

    assert!(
        timeout(Duration::from_secs(1), incoming.next())
            .await
            .unwrap()
            .is_none()
    );
    assert!(matches!(
        a.send_envelope(&NodeId::new(2), &Bytes::new(), "test", None)
            .await,
        Err(TransportError::ConnectionFailed { .. })
    ));
    assert!(matches!(
        b.send_envelope(&NodeId::new(1), &Bytes::new(), "test", None)
            .await,
        Err(TransportError::Shutdown)
    ));
}
