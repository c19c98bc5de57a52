use anyhow::Result;
use fedlink::constants::{COORDINATOR_ID, KEY_MODEL_PARAMS};
use fedlink::domain::{
    BackendConfig, BusConfig, CommunicationManager, LifecycleEvent, Message, MessageError, Role,
    StatusPublisher, Topology,
};
use fedlink::harness::Orchestrator;
use fedlink::library::EmptyResult;
use options::{LogFormat, MainOptions};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use structopt::StructOpt;
use tracing::{info, warn};

mod options;

const MSG_PING: i32 = 1;
const MSG_PONG: i32 = 2;
const MSG_HELLO: i32 = 3;

const PARAM_ROUND: &str = "round";
const PARAM_ROUNDS: &str = "rounds";
const PARAM_RECEIVED_BYTES: &str = "received_bytes";

#[tokio::main]
async fn main() -> Result<()> {
    let options = MainOptions::from_args();

    let formatter = tracing_subscriber::fmt().with_env_filter(options.log.as_str());

    match options.log_format {
        LogFormat::Text => formatter.init(),
        LogFormat::Compact => formatter.compact().init(),
    };

    let config = BusConfig::from_json_file(&options.config)?;
    let topology = config.topology()?;
    let manager = Arc::new(CommunicationManager::from_config(&config)?);
    let orchestrator = Arc::new(Orchestrator::new(manager.clone()));

    info!(
        run = %config.run_id,
        rank = config.rank,
        transport = manager.transport_name(),
        "fedlink-probe {}",
        env!("CARGO_PKG_VERSION")
    );

    match orchestrator.role() {
        Role::Coordinator => register_coordinator(&orchestrator, &options, &topology)?,
        Role::Worker => register_worker(&orchestrator, local_identity(&config, &topology))?,
    }

    let mut lifecycle = orchestrator.lifecycle();
    let run = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.run().await }
    });

    loop {
        match lifecycle.recv().await? {
            LifecycleEvent::SubscriptionsReady => break,
            LifecycleEvent::Stopped => break,
            event => info!(?event, "Lifecycle"),
        }
    }

    let status = StatusPublisher::new(manager.clone(), &topology);
    publish_status(&status, "RUNNING").await;

    match orchestrator.role() {
        Role::Coordinator if topology.worker_ids().is_empty() => {
            warn!("No workers configured, nothing to probe");
            orchestrator.finish().await;
        }
        Role::Coordinator => {}
        Role::Worker => {
            let identity = local_identity(&config, &topology);
            orchestrator
                .send(&Message::new(identity, COORDINATOR_ID, MSG_HELLO))
                .await?;
        }
    }

    run.await??;
    info!("Probe completed");

    Ok(())
}

/// Identity used in envelopes, matching what the coordinator routes on
fn local_identity(config: &BusConfig, topology: &Topology) -> i64 {
    match config.backend {
        BackendConfig::Broker { .. } | BackendConfig::BrokerWithBlobStore { .. } => topology
            .local_external_id()
            .and_then(|id| id.parse().ok())
            .unwrap_or(config.rank as i64),
        _ => config.rank as i64,
    }
}

async fn publish_status(status: &StatusPublisher, state: &str) {
    if let Err(e) = status.publish_status(state).await {
        warn!(%e, topic = status.topic(), "Unable to publish run status");
    }
}

fn register_coordinator(
    orchestrator: &Arc<Orchestrator>,
    options: &MainOptions,
    topology: &Topology,
) -> Result<()> {
    let manager = orchestrator.manager().clone();
    let expected = topology.worker_ids().len();
    let completed: Arc<Mutex<HashMap<i64, u32>>> = Arc::default();
    let pings = PingOptions {
        rounds: options.rounds.max(1),
        payload_bytes: options.payload_bytes,
    };

    let hello_manager = manager.clone();
    orchestrator.register_handler(MSG_HELLO, move |message: Message| {
        let manager = hello_manager.clone();
        async move {
            info!(worker = message.sender_id(), "Worker ready");
            manager
                .send_message(&pings.ping(message.sender_id(), 1)?)
                .await?;
            EmptyResult::Ok(())
        }
    })?;

    orchestrator.register_handler(MSG_PONG, move |message: Message| {
        let manager = manager.clone();
        let completed = completed.clone();
        async move {
            let worker = message.sender_id();
            let round: u32 = message.param_or(PARAM_ROUND, 0);
            let received: usize = message.param_or(PARAM_RECEIVED_BYTES, 0);
            info!(worker, round, received, "Pong");

            if round < pings.rounds {
                manager.send_message(&pings.ping(worker, round + 1)?).await?;
                return Ok(());
            }

            let done = {
                let mut completed = completed.lock().unwrap_or_else(|e| e.into_inner());
                completed.insert(worker, round);
                completed.len() >= expected
            };

            if done {
                info!("All workers answered");
                manager.stop_receive_message().await;
            }

            EmptyResult::Ok(())
        }
    })?;

    Ok(())
}

#[derive(Clone, Copy)]
struct PingOptions {
    rounds: u32,
    payload_bytes: usize,
}

impl PingOptions {
    fn ping(&self, receiver: i64, round: u32) -> Result<Message, MessageError> {
        let mut message = Message::new(COORDINATOR_ID, receiver, MSG_PING);
        message.set_param(PARAM_ROUND, round)?;
        message.set_param(PARAM_ROUNDS, self.rounds)?;

        if self.payload_bytes > 0 {
            message.set_param(KEY_MODEL_PARAMS, "x".repeat(self.payload_bytes))?;
        }

        Ok(message)
    }
}

fn register_worker(orchestrator: &Arc<Orchestrator>, identity: i64) -> Result<()> {
    let manager = orchestrator.manager().clone();

    orchestrator.register_handler(MSG_PING, move |message: Message| {
        let manager = manager.clone();
        async move {
            let round: u32 = message.param_or(PARAM_ROUND, 0);
            let rounds: u32 = message.param_or(PARAM_ROUNDS, 1);
            let received = message
                .param(KEY_MODEL_PARAMS)
                .and_then(|payload| payload.as_str())
                .map(str::len)
                .unwrap_or_default();

            info!(round, received, "Ping");

            let mut pong = Message::new(identity, COORDINATOR_ID, MSG_PONG);
            pong.set_param(PARAM_ROUND, round)?;
            pong.set_param(PARAM_RECEIVED_BYTES, received)?;
            manager.send_message(&pong).await?;

            if round >= rounds {
                manager.stop_receive_message().await;
            }

            EmptyResult::Ok(())
        }
    })?;

    Ok(())
}
