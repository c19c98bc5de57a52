use fedlink::constants::{BROADCAST_RECEIVER_ID, COORDINATOR_ID};
use fedlink::domain::{CommunicationError, Message};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;

mod common;
use common::*;

const MSG_TASK: i32 = 5;

fn participant(rank: usize, broker: &str) -> serde_json::Value {
    json!({
        "run_id": 9,
        "rank": rank,
        "worker_ids": [1, 2, 3],
        "backend": "broker",
        "broker": { "url": format!("memory://{}", broker) },
        "send_readiness_timeout_ms": 2000
    })
}

#[tokio::test]
async fn deliver_point_to_point_and_broadcast() {
    let broker = unique("routing");

    let coordinator = manager(participant(0, &broker));
    let mut loops = vec![start(&coordinator).await];
    let mut inboxes = Vec::new();
    let mut workers = Vec::new();

    for rank in 1..=3 {
        let worker = manager(participant(rank, &broker));
        let (recorder, inbox) = recorder();
        worker.add_observer(recorder).unwrap();
        loops.push(start(&worker).await);
        inboxes.push(inbox);
        workers.push(worker);
    }

    let mut task = Message::new(COORDINATOR_ID, 2, MSG_TASK);
    task.set_param("epochs", 3).unwrap();
    coordinator.send_message(&task).await.unwrap();

    assert_eq!(next(&mut inboxes[1]).await, task);
    nothing(&mut inboxes[0]).await;
    nothing(&mut inboxes[2]).await;

    let announcement = Message::new(COORDINATOR_ID, BROADCAST_RECEIVER_ID, MSG_TASK);
    coordinator.send_message(&announcement).await.unwrap();

    for inbox in inboxes.iter_mut() {
        assert_eq!(next(inbox).await, announcement);
        nothing(inbox).await;
    }

    for manager in workers.iter().chain(std::iter::once(&coordinator)) {
        manager.stop_receive_message().await;
    }

    for handle in loops {
        handle.await.unwrap().unwrap();
    }
}

#[tokio::test]
async fn reject_unknown_receivers() {
    let broker = unique("unknown-receiver");
    let coordinator = manager(participant(0, &broker));
    let running = start(&coordinator).await;

    let result = coordinator
        .send_message(&Message::new(COORDINATOR_ID, 99, MSG_TASK))
        .await;
    assert!(matches!(
        result,
        Err(CommunicationError::UnknownReceiver { receiver_id: 99, .. })
    ));

    coordinator.stop_receive_message().await;
    running.await.unwrap().unwrap();
}

#[tokio::test]
async fn publish_run_status_out_of_band() {
    use fedlink::domain::StatusPublisher;
    use fedlink::library::communication::implementation::memory::InMemoryBroker;
    use fedlink::library::communication::{PubSubConnector, PubSubSubscriber};
    use futures::StreamExt;

    let broker = unique("status");
    let config = participant(1, &broker);
    let worker = manager(config.clone());
    let running = start(&worker).await;

    let mut spy = InMemoryBroker::named(&broker).subscriber().await.unwrap();
    spy.subscribe("fedml_9_status").await.unwrap();
    let mut wire = spy.into_on_message();

    let topology = fedlink::domain::BusConfig::from_json_str(&config.to_string())
        .unwrap()
        .topology()
        .unwrap();
    let status = StatusPublisher::new(Arc::clone(&worker), &topology);
    status.publish_status("RUNNING").await.unwrap();

    let published = tokio::time::timeout(PATIENCE, wire.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let document: serde_json::Value = serde_json::from_slice(&published.payload).unwrap();

    assert_eq!(document["status"], json!("RUNNING"));
    assert_eq!(document["rank"], json!(1));

    worker.stop_receive_message().await;
    running.await.unwrap().unwrap();
}
