use super::transport::{Backend, FrameStream, InboundFrame, TransportBackend};
use super::{
    select_backend, BusConfig, CommunicationError, ConfigError, DeliveryReport, FailureKind,
    LifecycleEvent, Message, MessageError, MessageType, Observer, ObserverSet, PayloadOffloader,
};
use crate::library::communication::BlackboxError;
use crate::library::BoxedError;
use futures::StreamExt;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, trace, warn};

const LIFECYCLE_QUEUE_SIZE: usize = 16;
const REPORT_QUEUE_SIZE: usize = 256;

/// Uniform façade over all transport families
///
/// Owns the transport, applies the offload policy to every message passing through, and hands
/// each decoded inbound message to all registered observers in registration order. Connection
/// state changes and failed deliveries are broadcast separately, see [`lifecycle`](Self::lifecycle)
/// and [`reports`](Self::reports).
///
/// Sends wait until the transport confirmed its inbound channels, bounded by the readiness
/// timeout. Without a timeout they wait indefinitely, which requires the receive loop to be
/// started before or concurrently with the first send.
pub struct CommunicationManager {
    transport: Box<dyn TransportBackend>,
    offloader: Option<PayloadOffloader>,
    observers: ObserverSet,
    lifecycle: broadcast::Sender<LifecycleEvent>,
    reports: broadcast::Sender<DeliveryReport>,
    shutdown: watch::Sender<bool>,
    readiness_timeout: Option<Duration>,
    running: AtomicBool,
    stopped: AtomicBool,
}

impl CommunicationManager {
    /// Creates a new manager taking ownership of a not yet started backend
    pub fn new(backend: Backend) -> Self {
        let (lifecycle, _) = broadcast::channel(LIFECYCLE_QUEUE_SIZE);
        let (reports, _) = broadcast::channel(REPORT_QUEUE_SIZE);
        let (shutdown, _) = watch::channel(false);

        Self {
            transport: backend.transport,
            offloader: backend.offloader,
            observers: ObserverSet::default(),
            lifecycle,
            reports,
            shutdown,
            readiness_timeout: None,
            running: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    /// Selects the backend described by the configuration and wraps it
    pub fn from_config(config: &BusConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(select_backend(config)?).with_readiness_timeout(config.readiness_timeout()))
    }

    /// Bounds the time sends wait for the transport to become ready
    pub fn with_readiness_timeout(mut self, readiness_timeout: Option<Duration>) -> Self {
        self.readiness_timeout = readiness_timeout;
        self
    }

    /// Symbolic name of the underlying transport
    pub fn transport_name(&self) -> &'static str {
        self.transport.name()
    }

    /// Rank of the local participant
    pub fn rank(&self) -> usize {
        self.transport.rank()
    }

    /// Registers an observer which will be notified after all previously registered ones
    pub fn add_observer(&self, observer: Arc<dyn Observer>) -> Result<(), CommunicationError> {
        self.observers.add(observer)
    }

    /// Unregisters an observer, returning whether it was registered
    pub fn remove_observer(&self, observer: &Arc<dyn Observer>) -> bool {
        self.observers.remove(observer)
    }

    /// Subscribes to connection state changes
    pub fn lifecycle(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.lifecycle.subscribe()
    }

    /// Subscribes to reports about inbound messages that could not be delivered
    pub fn reports(&self) -> broadcast::Receiver<DeliveryReport> {
        self.reports.subscribe()
    }

    fn emit(&self, event: LifecycleEvent) {
        debug!(?event, "Lifecycle event");
        self.lifecycle.send(event).ok();
    }

    fn ensure_active(&self) -> Result<(), CommunicationError> {
        if self.stopped.load(Ordering::SeqCst) {
            Err(CommunicationError::NotConnected)
        } else {
            Ok(())
        }
    }

    /// Waits for the transport readiness barrier, giving up once a stop has been requested
    async fn await_readiness(&self) -> Result<(), CommunicationError> {
        let mut shutdown = self.shutdown.subscribe();

        let ready = async {
            match self.readiness_timeout {
                Some(limit) => match timeout(limit, self.transport.ready()).await {
                    Ok(ready) => ready.map_err(CommunicationError::Transport),
                    Err(_) => Err(CommunicationError::NotReady(limit)),
                },
                None => self
                    .transport
                    .ready()
                    .await
                    .map_err(CommunicationError::Transport),
            }
        };

        tokio::select! {
            biased;

            _ = shutdown_requested(&mut shutdown) => Err(CommunicationError::NotConnected),
            ready = ready => ready,
        }
    }

    /// Sends a message to its receiver
    ///
    /// Non-empty payloads are offloaded first if the backend carries an offloader. Broadcasts
    /// are published on every channel the transport derives for them, each with its own blob.
    /// Nothing is published for a channel whose payload could not be offloaded.
    #[instrument(skip(self, message), fields(msg_type = %message.msg_type(), receiver = message.receiver_id()))]
    pub async fn send_message(&self, message: &Message) -> Result<(), CommunicationError> {
        self.ensure_active()?;
        self.await_readiness().await?;

        let channels = self.transport.channels(message).map_err(|source| {
            CommunicationError::UnknownReceiver {
                receiver_id: message.receiver_id(),
                source,
            }
        })?;

        for channel in channels {
            let mut outbound = message.clone();

            if let Some(offloader) = &self.offloader {
                offloader.pack(&mut outbound, &channel).await?;
            }

            let payload = outbound.serialize()?;

            self.transport
                .publish(&channel, &payload)
                .await
                .map_err(CommunicationError::Transport)?;

            debug!(%channel, size = payload.len(), "Sent message");
        }

        Ok(())
    }

    /// Publishes an arbitrary JSON document on a named channel
    ///
    /// The document bypasses envelope handling and offloading. Only transports able to publish
    /// on arbitrary channels, like the broker, accept channels outside the run layout.
    pub async fn send_message_json(
        &self,
        channel: &str,
        document: &Value,
    ) -> Result<(), CommunicationError> {
        self.ensure_active()?;

        let payload = serde_json::to_vec(document)
            .map_err(|e| CommunicationError::MalformedEnvelope(MessageError::Malformed(e)))?;

        self.transport
            .publish(channel, &payload)
            .await
            .map_err(CommunicationError::Transport)?;

        trace!(channel, size = payload.len(), "Sent document");
        Ok(())
    }

    /// Connects the transport and processes inbound messages until stopped
    ///
    /// Runs for the lifetime of the session. Failures related to a single message are reported
    /// and do not end the loop. Returns `Ok` after [`stop_receive_message`](Self::stop_receive_message)
    /// and an error if the connection could not be established or was lost. The transport is
    /// released in either case.
    #[instrument(skip(self), fields(transport = self.transport.name()))]
    pub async fn handle_receive_message(&self) -> Result<(), CommunicationError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(CommunicationError::AlreadyRunning);
        }

        let result = self.receive_loop().await;

        self.transport.stop().await;
        self.running.store(false, Ordering::SeqCst);
        self.emit(LifecycleEvent::Stopped);

        match &result {
            Ok(_) => info!("Receive loop stopped"),
            Err(e) => error!(%e, "Receive loop terminated"),
        }

        result
    }

    async fn receive_loop(&self) -> Result<(), CommunicationError> {
        let mut shutdown = self.shutdown.subscribe();

        let mut frames = tokio::select! {
            biased;

            _ = shutdown_requested(&mut shutdown) => {
                debug!("Stop requested before the transport was established");
                return Ok(());
            }
            frames = self.establish() => frames?,
        };

        info!("Receiving messages");

        loop {
            tokio::select! {
                biased;

                _ = shutdown_requested(&mut shutdown) => return Ok(()),
                frame = frames.next() => match frame {
                    Some(Ok(frame)) => self.process(frame).await,
                    Some(Err(e)) => return Err(self.connection_lost(e.to_string())),
                    None => return Err(self.connection_lost("inbound stream ended".into())),
                },
            }
        }
    }

    async fn establish(&self) -> Result<FrameStream, CommunicationError> {
        self.transport
            .connect()
            .await
            .map_err(CommunicationError::Transport)?;

        self.emit(LifecycleEvent::Connected {
            transport: self.transport.name().to_string(),
        });

        let frames = self
            .transport
            .listen()
            .await
            .map_err(CommunicationError::Transport)?;

        match self.await_readiness().await {
            Ok(_) => self.emit(LifecycleEvent::SubscriptionsReady),
            Err(e) => warn!(%e, "Inbound channels not confirmed"),
        }

        Ok(frames)
    }

    fn connection_lost(&self, reason: String) -> CommunicationError {
        error!(%reason, "Transport connection lost");

        self.emit(LifecycleEvent::ConnectionLost {
            reason: reason.clone(),
        });

        CommunicationError::TransportConnectionLost(reason)
    }

    async fn process(&self, frame: InboundFrame) {
        let InboundFrame { channel, payload } = frame;

        let mut message = match Message::deserialize(&payload) {
            Ok(message) => message,
            Err(e) => {
                return self.report(FailureKind::MalformedEnvelope, &channel, None, e.into());
            }
        };

        let msg_type = message.msg_type();
        trace!(%channel, %msg_type, sender = message.sender_id(), "Received message");

        if let Some(offloader) = &self.offloader {
            if let Err(e) = offloader.unpack(&mut message).await {
                return self.report(
                    FailureKind::BlobStoreUnavailable,
                    &channel,
                    Some(msg_type),
                    e.into(),
                );
            }
        }

        for observer in self.observers.snapshot() {
            if let Err(e) = observer.receive_message(&message).await {
                let kind = match e.downcast_ref::<CommunicationError>() {
                    Some(CommunicationError::UnhandledMessageType(_)) => {
                        FailureKind::UnhandledMessageType
                    }
                    _ => FailureKind::ObserverFailed,
                };

                self.report(kind, &channel, Some(msg_type), e);
            }
        }
    }

    fn report(
        &self,
        kind: FailureKind,
        channel: &str,
        msg_type: Option<MessageType>,
        error: BoxedError,
    ) {
        warn!(?kind, channel, ?msg_type, %error, "Failed to deliver message");

        self.reports
            .send(DeliveryReport {
                kind,
                channel: channel.to_string(),
                msg_type,
                error: BlackboxError::from_boxed(error),
            })
            .ok();
    }

    /// Makes a running receive loop return and releases the transport
    ///
    /// Safe to call from any task, at any time and more than once. Messages currently being
    /// processed are completed first. Afterwards the manager refuses to send.
    pub async fn stop_receive_message(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            info!("Stopping receive loop");
        }

        self.shutdown.send_replace(true);

        if !self.running.load(Ordering::SeqCst) {
            self.transport.stop().await;
        }
    }
}

async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        let requested = *shutdown.borrow_and_update();

        if requested {
            return;
        }

        if shutdown.changed().await.is_err() {
            futures::future::pending::<()>().await;
        }
    }
}
