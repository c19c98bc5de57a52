#![allow(dead_code)]

use async_trait::async_trait;
use fedlink::domain::{
    BusConfig, CommunicationError, CommunicationManager, LifecycleEvent, Message, Observer,
};
use fedlink::library::EmptyResult;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

pub const PATIENCE: Duration = Duration::from_secs(5);

/// Observer forwarding every message into a channel
pub struct Recorder(mpsc::UnboundedSender<Message>);

#[async_trait]
impl Observer for Recorder {
    async fn receive_message(&self, message: &Message) -> EmptyResult {
        self.0.send(message.clone())?;
        Ok(())
    }
}

pub fn recorder() -> (Arc<Recorder>, mpsc::UnboundedReceiver<Message>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(Recorder(tx)), rx)
}

/// Name which is not shared with any other test of the process
pub fn unique(name: &str) -> String {
    format!("{}-{}", name, uuid::Uuid::new_v4())
}

pub fn manager(config: serde_json::Value) -> Arc<CommunicationManager> {
    let config = BusConfig::from_json_str(&config.to_string()).unwrap();
    Arc::new(CommunicationManager::from_config(&config).unwrap())
}

/// Runs the receive loop in the background and waits for it to become ready
pub async fn start(
    manager: &Arc<CommunicationManager>,
) -> JoinHandle<Result<(), CommunicationError>> {
    let mut lifecycle = manager.lifecycle();
    let handle = tokio::spawn({
        let manager = manager.clone();
        async move { manager.handle_receive_message().await }
    });

    timeout(PATIENCE, async {
        while lifecycle.recv().await.unwrap() != LifecycleEvent::SubscriptionsReady {}
    })
    .await
    .expect("receive loop did not become ready");

    handle
}

pub async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    timeout(PATIENCE, rx.recv())
        .await
        .expect("nothing received in time")
        .expect("channel closed")
}

pub async fn nothing<T: std::fmt::Debug>(rx: &mut mpsc::UnboundedReceiver<T>) {
    if let Ok(Some(unexpected)) = timeout(Duration::from_millis(100), rx.recv()).await {
        panic!("unexpectedly received {:?}", unexpected);
    }
}
