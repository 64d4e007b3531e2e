//! Tests for the in-memory transport.

use super::*;
use futures::StreamExt;
use std::time::Duration;

fn queue() -> QueueName {
    QueueName::new("product-queue".to_string()).unwrap()
}

async fn next_delivery(stream: &mut DeliveryStream) -> Delivery {
    tokio::time::timeout(Duration::from_secs(1), stream.next())
        .await
        .expect("a delivery should arrive")
        .expect("stream should still be open")
        .expect("delivery should not be an error")
}

// ============================================================================
// Queue Management
// ============================================================================

mod queue_management {
    use super::*;

    #[tokio::test]
    async fn test_consume_requires_declared_queue() {
        let broker = InMemoryBroker::new();
        let transport = broker.connect_transport();

        let result = transport.consume(&queue()).await;

        assert!(matches!(
            result,
            Err(TransportError::QueueNotFound { ref queue_name }) if queue_name == "product-queue"
        ));
    }

    #[tokio::test]
    async fn test_redeclare_with_same_durability_is_idempotent() {
        let broker = InMemoryBroker::new();
        let transport = broker.connect_transport();

        transport.declare_queue(&queue(), true).await.unwrap();
        transport.declare_queue(&queue(), true).await.unwrap();
    }

    #[tokio::test]
    async fn test_redeclare_with_different_durability_fails() {
        let broker = InMemoryBroker::new();
        let transport = broker.connect_transport();
        transport.declare_queue(&queue(), true).await.unwrap();

        let result = transport.declare_queue(&queue(), false).await;

        assert!(matches!(result, Err(TransportError::Protocol { .. })));
    }

    #[tokio::test]
    async fn test_publish_to_undeclared_queue_fails() {
        let broker = InMemoryBroker::new();
        let transport = broker.connect_transport();

        let result = transport.publish(&queue(), Bytes::from_static(b"{}")).await;

        assert!(matches!(result, Err(TransportError::QueueNotFound { .. })));
    }
}

// ============================================================================
// Delivery and Settlement
// ============================================================================

mod settlement {
    use super::*;

    #[tokio::test]
    async fn test_ack_removes_message() {
        let broker = InMemoryBroker::new();
        let transport = broker.connect_transport();
        transport.declare_queue(&queue(), true).await.unwrap();
        transport
            .publish(&queue(), Bytes::from_static(b"first"))
            .await
            .unwrap();

        let mut stream = transport.consume(&queue()).await.unwrap();
        let delivery = next_delivery(&mut stream).await;
        assert_eq!(delivery.payload().as_ref(), b"first");
        assert!(!delivery.is_redelivered());
        assert_eq!(broker.unsettled_count(), 1);

        transport.ack(delivery).await.unwrap();

        assert_eq!(broker.unsettled_count(), 0);
        assert_eq!(broker.ready_count(&queue()), 0);
        let settlements = broker.settlements();
        assert_eq!(settlements.len(), 1);
        assert_eq!(settlements[0].settlement, Settlement::Ack);
    }

    #[tokio::test]
    async fn test_nack_with_requeue_redelivers_flagged() {
        let broker = InMemoryBroker::new();
        let transport = broker.connect_transport();
        transport.declare_queue(&queue(), true).await.unwrap();
        broker.enqueue(&queue(), [Bytes::from_static(b"retry-me")]);

        let mut stream = transport.consume(&queue()).await.unwrap();
        let first = next_delivery(&mut stream).await;
        let first_tag = first.tag();
        transport.nack(first, true).await.unwrap();

        let second = next_delivery(&mut stream).await;
        assert_eq!(second.payload().as_ref(), b"retry-me");
        assert!(second.is_redelivered());
        assert_ne!(second.tag(), first_tag);
    }

    #[tokio::test]
    async fn test_nack_without_requeue_discards() {
        let broker = InMemoryBroker::new();
        let transport = broker.connect_transport();
        transport.declare_queue(&queue(), true).await.unwrap();
        broker.enqueue(&queue(), [Bytes::from_static(b"poison")]);

        let mut stream = transport.consume(&queue()).await.unwrap();
        let delivery = next_delivery(&mut stream).await;
        transport.nack(delivery, false).await.unwrap();

        assert_eq!(broker.ready_count(&queue()), 0);
        assert_eq!(broker.unsettled_count(), 0);
        assert_eq!(
            broker.settlements()[0].settlement,
            Settlement::Nack { requeue: false }
        );
    }

    #[tokio::test]
    async fn test_settling_on_another_connection_is_rejected() {
        let broker = InMemoryBroker::new();
        let owner = broker.connect_transport();
        let other = broker.connect_transport();
        owner.declare_queue(&queue(), true).await.unwrap();
        broker.enqueue(&queue(), [Bytes::from_static(b"mine")]);

        let mut stream = owner.consume(&queue()).await.unwrap();
        let delivery = next_delivery(&mut stream).await;
        let tag = delivery.tag();
        let forged = Delivery::new(tag, delivery.payload().clone(), false);

        let result = other.ack(forged).await;

        assert_eq!(
            result,
            Err(TransportError::UnknownDelivery { tag: tag.value() })
        );
        assert_eq!(broker.unsettled_count(), 1);
        owner.ack(delivery).await.unwrap();
    }

    #[tokio::test]
    async fn test_stream_wakes_up_for_late_publish() {
        let broker = InMemoryBroker::new();
        let transport = Arc::new(broker.connect_transport());
        transport.declare_queue(&queue(), true).await.unwrap();
        let mut stream = transport.consume(&queue()).await.unwrap();

        let publisher = Arc::clone(&transport);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            publisher
                .publish(&queue(), Bytes::from_static(b"late"))
                .await
                .unwrap();
        });

        let delivery = next_delivery(&mut stream).await;
        assert_eq!(delivery.payload().as_ref(), b"late");
    }
}

// ============================================================================
// Connection Lifecycle
// ============================================================================

mod connection_lifecycle {
    use super::*;

    #[tokio::test]
    async fn test_close_ends_stream_and_returns_unsettled() {
        let broker = InMemoryBroker::new();
        let transport = broker.connect_transport();
        transport.declare_queue(&queue(), true).await.unwrap();
        broker.enqueue(&queue(), [Bytes::from_static(b"in-flight")]);

        let mut stream = transport.consume(&queue()).await.unwrap();
        let delivery = next_delivery(&mut stream).await;

        transport.close().await.unwrap();

        assert!(stream.next().await.is_none());
        assert_eq!(broker.unsettled_count(), 0);
        assert_eq!(
            broker.peek(&queue()),
            vec![(Bytes::from_static(b"in-flight"), true)]
        );
        assert_eq!(transport.ack(delivery).await, Err(TransportError::Closed));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let broker = InMemoryBroker::new();
        let transport = broker.connect_transport();

        transport.close().await.unwrap();
        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_sever_reports_single_error_then_ends() {
        let broker = InMemoryBroker::new();
        let transport = broker.connect_transport();
        transport.declare_queue(&queue(), true).await.unwrap();
        let mut stream = transport.consume(&queue()).await.unwrap();

        transport.sever();

        let item = stream.next().await.expect("error item expected");
        assert!(matches!(item, Err(TransportError::ConnectionFailed { .. })));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_sever_fails_settlement_and_requeues() {
        let broker = InMemoryBroker::new();
        let transport = broker.connect_transport();
        transport.declare_queue(&queue(), true).await.unwrap();
        broker.enqueue(&queue(), [Bytes::from_static(b"orphan")]);
        let mut stream = transport.consume(&queue()).await.unwrap();
        let delivery = next_delivery(&mut stream).await;

        transport.sever();

        let result = transport.ack(delivery).await;
        assert!(matches!(result, Err(TransportError::ChannelClosed { .. })));
        assert_eq!(broker.ready_count(&queue()), 1);
        assert!(broker.settlements().is_empty());
    }

    #[tokio::test]
    async fn test_sever_all_drops_every_open_connection() {
        let broker = InMemoryBroker::new();
        let first = broker.connect_transport();
        let second = broker.connect_transport();
        first.declare_queue(&queue(), true).await.unwrap();
        let mut first_stream = first.consume(&queue()).await.unwrap();
        let mut second_stream = second.consume(&queue()).await.unwrap();

        broker.sever_all();

        assert!(matches!(first_stream.next().await, Some(Err(_))));
        assert!(matches!(second_stream.next().await, Some(Err(_))));
        assert!(first_stream.next().await.is_none());

        // New connections are unaffected
        let third = broker.connect_transport();
        assert!(third.publish(&queue(), Bytes::from_static(b"after")).await.is_ok());
    }

    #[tokio::test]
    async fn test_refused_connections() {
        let broker = InMemoryBroker::new();
        broker.refuse_connections(2);

        assert!(broker.connect().await.is_err());
        assert!(broker.connect().await.is_err());
        let transport = broker.connect().await.expect("third attempt should connect");
        assert_eq!(transport.provider_type(), ProviderType::InMemory);
    }
}
