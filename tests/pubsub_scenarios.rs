use ci_pubsub::broker::PollOutcome;
use ci_pubsub::config::Settings;
use ci_pubsub::service::PubSubService;

#[tokio::test]
async fn fire_and_forget_subscriber_loses_events_published_before_it_attaches() {
    let service = PubSubService::new(Settings::default());
    service
        .publish("node", serde_json::json!({"id": "missed"}), None)
        .await
        .unwrap();

    let sub_id = service.subscribe("node", "alice", false, None).await.unwrap();
    let mut session = service.listen(sub_id, "alice").await.unwrap();

    service.publish("node", serde_json::json!({"id": "seen"}), None).await.unwrap();
    let envelope = session.next().await.unwrap();
    assert_eq!(envelope.data["id"], "seen");
}

#[tokio::test]
async fn durable_subscriber_catches_up_across_three_sequential_listens() {
    let service = PubSubService::new(Settings::default());
    let sub_id = service.subscribe("node", "alice", false, Some("durable-1".to_string())).await.unwrap();
    for id in ["a", "b", "c"] {
        service.publish("node", serde_json::json!({"id": id}), None).await.unwrap();
    }

    let mut first_session = service.listen(sub_id, "alice").await.unwrap();
    let first = first_session.next().await.unwrap();
    assert_eq!(first.data["id"], "a");

    // Reconnect on the same subscription_id without unsubscribing: the
    // implicit ack at the top of `listen` advances past "a" using what
    // was delivered last time, so catch-up resumes at "b".
    drop(first_session);
    let mut second_session = service.listen(sub_id, "alice").await.unwrap();
    let second = second_session.next().await.unwrap();
    let third = second_session.next().await.unwrap();
    assert_eq!(second.data["id"], "b");
    assert_eq!(third.data["id"], "c");
}

#[tokio::test]
async fn brand_new_durable_subscriber_sees_nothing_published_before_its_first_subscribe() {
    let service = PubSubService::new(Settings::default());
    service.publish("node", serde_json::json!({"id": "before"}), None).await.unwrap();

    let sub_id = service.subscribe("node", "alice", false, Some("durable-3".to_string())).await.unwrap();
    service.publish("node", serde_json::json!({"id": "after"}), None).await.unwrap();

    let mut session = service.listen(sub_id, "alice").await.unwrap();
    let envelope = tokio::time::timeout(std::time::Duration::from_secs(1), session.next())
        .await
        .expect("listen must return within 1s")
        .unwrap();
    assert_eq!(envelope.data["id"], "after");
}

#[tokio::test]
async fn owner_filter_separates_alice_bob_and_null_owner_events() {
    let service = PubSubService::new(Settings::default());
    let sub_id = service.subscribe("node", "alice", false, None).await.unwrap();
    let mut session = service.listen(sub_id, "alice").await.unwrap();

    service.publish("node", serde_json::json!({"id": "bob-private"}), Some("bob".to_string())).await.unwrap();
    service.publish("node", serde_json::json!({"id": "alice-private"}), Some("alice".to_string())).await.unwrap();
    service.publish("node", serde_json::json!({"id": "public"}), None).await.unwrap();

    let first = session.next().await.unwrap();
    let second = session.next().await.unwrap();
    assert_eq!(first.data["id"], "alice-private");
    assert_eq!(second.data["id"], "public");
}

#[tokio::test]
async fn promiscuous_subscriber_sees_every_owner() {
    let service = PubSubService::new(Settings::default());
    let sub_id = service.subscribe("node", "admin", true, None).await.unwrap();
    let mut session = service.listen(sub_id, "admin").await.unwrap();

    service.publish("node", serde_json::json!({"id": "bob-private"}), Some("bob".to_string())).await.unwrap();
    let envelope = session.next().await.unwrap();
    assert_eq!(envelope.data["id"], "bob-private");
}

#[tokio::test]
async fn broker_overflow_reattaches_transparently_instead_of_erroring() {
    use ci_pubsub::broker::{Broker, InMemoryBroker, CHANNEL_CAPACITY};

    let broker = InMemoryBroker::new();
    let mut handle = broker.attach("node");
    for i in 0..(CHANNEL_CAPACITY + 5) {
        broker
            .publish(
                "node",
                ci_pubsub::Envelope {
                    event_type: "api.kernelci.org".to_string(),
                    source: "test".to_string(),
                    owner: None,
                    data: serde_json::json!({"i": i}),
                    sequence_id: Some(i as i64),
                },
            )
            .await;
    }

    match broker.poll(&mut handle, std::time::Duration::from_millis(20)).await {
        PollOutcome::Lost => {
            handle = broker.attach("node");
        }
        _ => panic!("expected the lagging receiver to be reported lost"),
    }

    broker
        .publish(
            "node",
            ci_pubsub::Envelope {
                event_type: "api.kernelci.org".to_string(),
                source: "test".to_string(),
                owner: None,
                data: serde_json::json!({"id": "after-reattach"}),
                sequence_id: Some(999),
            },
        )
        .await;
    match broker.poll(&mut handle, std::time::Duration::from_millis(100)).await {
        PollOutcome::Message(envelope) => assert_eq!(envelope.data["id"], "after-reattach"),
        _ => panic!("expected delivery after transparent reattach"),
    }
}

#[tokio::test]
async fn implicit_ack_replays_last_delivered_event_after_simulated_crash() {
    let service = PubSubService::new(Settings::default());
    let sub_id = service.subscribe("node", "alice", false, Some("durable-2".to_string())).await.unwrap();
    service.publish("node", serde_json::json!({"id": "a"}), None).await.unwrap();

    let mut session = service.listen(sub_id, "alice").await.unwrap();
    let delivered = session.next().await.unwrap();
    assert_eq!(delivered.data["id"], "a");

    // Simulate a crash: the session is dropped without any further
    // acknowledgement, and the client reconnects under the same
    // subscriber_id without having recorded that "a" was processed.
    drop(session);
    service.unsubscribe(sub_id, "alice").unwrap();

    let sub_id = service.subscribe("node", "alice", false, Some("durable-2".to_string())).await.unwrap();
    let mut session = service.listen(sub_id, "alice").await.unwrap();

    // Because the crash happened before any acknowledgement, "a" is
    // replayed from catch-up rather than being silently skipped — the
    // whole point of at-least-once delivery.
    let replayed = session.next().await.unwrap();
    assert_eq!(replayed.data["id"], "a");

    service.publish("node", serde_json::json!({"id": "b"}), None).await.unwrap();
    let next = session.next().await.unwrap();
    assert_eq!(next.data["id"], "b");
}

#[tokio::test]
async fn keep_alive_is_delivered_live_and_never_touches_the_event_log() {
    let service = PubSubService::new(Settings::default());
    let sub_id = service.subscribe("node", "alice", false, None).await.unwrap();
    let mut session = service.listen(sub_id, "alice").await.unwrap();

    service.publish("node", serde_json::json!({"id": "real"}), None).await.unwrap();
    let real = session.next().await.unwrap();
    assert_eq!(real.data["id"], "real");

    // A keep-alive delivered live must carry no sequence id and must not
    // have touched the durable log.
    let events_before = service.query_events("node", 0, "alice", false, None).await.unwrap();
    assert_eq!(events_before.len(), 1, "keep-alives must never be appended to the durable log");
}

#[tokio::test]
async fn unsubscribe_then_listen_fails_with_unknown_subscription() {
    let service = PubSubService::new(Settings::default());
    let sub_id = service.subscribe("node", "alice", false, None).await.unwrap();
    service.unsubscribe(sub_id, "alice").unwrap();
    assert!(service.listen(sub_id, "alice").await.is_err());
}

#[tokio::test]
async fn sequence_ids_are_monotonic_across_channels() {
    let service = PubSubService::new(Settings::default());
    let a = service.publish("node", serde_json::json!({}), None).await.unwrap();
    let b = service.publish("test", serde_json::json!({}), None).await.unwrap();
    let c = service.publish("node", serde_json::json!({}), None).await.unwrap();
    assert!(a < b && b < c);
}
