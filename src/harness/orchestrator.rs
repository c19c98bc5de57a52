use crate::domain::{
    CommunicationError, CommunicationManager, LifecycleEvent, Message, MessageType, Observer, Role,
};
use crate::library::EmptyResult;
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, info, instrument};

/// Callback invoked for messages of one type
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Processes a received message
    async fn handle(&self, message: Message) -> EmptyResult;
}

#[async_trait]
impl<F, Fut> MessageHandler for F
where
    F: Fn(Message) -> Fut + Send + Sync,
    Fut: Future<Output = EmptyResult> + Send,
{
    async fn handle(&self, message: Message) -> EmptyResult {
        (self)(message).await
    }
}

/// Dispatches received messages to the handler registered for their type
///
/// Serves both the coordinator and the worker role. The orchestrator registers itself as an
/// observer of its [`CommunicationManager`] while [`run`](Orchestrator::run) is active.
pub struct Orchestrator {
    rank: usize,
    manager: Arc<CommunicationManager>,
    handlers: RwLock<HashMap<MessageType, Arc<dyn MessageHandler>>>,
}

impl Orchestrator {
    /// Creates a new orchestrator without any handlers
    ///
    /// The local rank is the one the manager's transport has been set up for.
    pub fn new(manager: Arc<CommunicationManager>) -> Self {
        Self {
            rank: manager.rank(),
            manager,
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Logical rank of the local participant
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Role derived from the local rank
    pub fn role(&self) -> Role {
        if self.rank == 0 {
            Role::Coordinator
        } else {
            Role::Worker
        }
    }

    /// Manager used for sending and receiving
    pub fn manager(&self) -> &Arc<CommunicationManager> {
        &self.manager
    }

    /// Subscribes to connection state changes of the underlying manager
    pub fn lifecycle(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.manager.lifecycle()
    }

    /// Registers the handler for a message type
    ///
    /// Fails if another handler has been registered for the same type before.
    pub fn register_handler(
        &self,
        msg_type: impl Into<MessageType>,
        handler: impl MessageHandler + 'static,
    ) -> Result<(), CommunicationError> {
        let msg_type = msg_type.into();
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);

        if handlers.contains_key(&msg_type) {
            return Err(CommunicationError::DuplicateHandlerRegistration(msg_type));
        }

        handlers.insert(msg_type, Arc::new(handler));
        debug!(%msg_type, "Registered handler");

        Ok(())
    }

    /// Invokes the handler registered for the type of a message
    pub async fn on_receive(&self, message: &Message) -> Result<(), CommunicationError> {
        let msg_type = message.msg_type();
        let handler = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&msg_type)
            .cloned()
            .ok_or(CommunicationError::UnhandledMessageType(msg_type))?;

        handler
            .handle(message.clone())
            .await
            .map_err(|source| CommunicationError::HandlerFailed { msg_type, source })
    }

    /// Sends a message through the manager
    pub async fn send(&self, message: &Message) -> Result<(), CommunicationError> {
        self.manager.send_message(message).await
    }

    /// Receives and dispatches messages until [`finish`](Orchestrator::finish) is called
    ///
    /// See [`CommunicationManager::handle_receive_message`] for the semantics of the result.
    #[instrument(skip(self), fields(rank = self.rank, role = ?self.role()))]
    pub async fn run(self: &Arc<Self>) -> Result<(), CommunicationError> {
        let observer: Arc<dyn Observer> = self.clone();
        self.manager.add_observer(observer.clone())?;

        info!(transport = self.manager.transport_name(), "Orchestrator running");
        let result = self.manager.handle_receive_message().await;

        self.manager.remove_observer(&observer);
        result
    }

    /// Stops receiving and releases the transport
    pub async fn finish(&self) {
        info!(rank = self.rank, "Finishing");
        self.manager.stop_receive_message().await;
    }
}

#[async_trait]
impl Observer for Orchestrator {
    async fn receive_message(&self, message: &Message) -> EmptyResult {
        Ok(self.on_receive(message).await?)
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use crate::domain::transport::{Backend, BrokerBackend, CollectiveBackend, CollectiveWorld};
    use crate::domain::Topology;
    use crate::library::communication::implementation::memory::InMemoryBroker;
    use crate::library::BoxedError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn orchestrator(rank: usize) -> Orchestrator {
        let transport = CollectiveBackend::new(rank, CollectiveWorld::new(2)).unwrap();
        let manager = CommunicationManager::new(Backend::new(transport));
        Orchestrator::new(Arc::new(manager))
    }

    struct Counter(Arc<AtomicUsize>);

    #[async_trait]
    impl MessageHandler for Counter {
        async fn handle(&self, _message: Message) -> EmptyResult {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn dispatch_by_message_type() {
        let orchestrator = orchestrator(0);
        let count = Arc::new(AtomicUsize::new(0));

        orchestrator
            .register_handler(1, Counter(count.clone()))
            .unwrap();
        orchestrator.on_receive(&Message::new(1, 0, 1)).await.unwrap();
        orchestrator.on_receive(&Message::new(1, 0, 1)).await.unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn report_unhandled_message_types() {
        let orchestrator = orchestrator(0);

        assert!(matches!(
            orchestrator.on_receive(&Message::new(1, 0, 5)).await,
            Err(CommunicationError::UnhandledMessageType(MessageType(5)))
        ));
    }

    #[tokio::test]
    async fn accept_closures_as_handlers() {
        let orchestrator = orchestrator(1);
        orchestrator
            .register_handler(2, |message: Message| async move {
                let result: EmptyResult = if message.param_or("fail", false) {
                    Err("requested failure".into())
                } else {
                    Ok(())
                };

                result
            })
            .unwrap();

        let mut failing = Message::new(0, 1, 2);
        failing.set_param("fail", true).unwrap();

        assert!(orchestrator.on_receive(&Message::new(0, 1, 2)).await.is_ok());
        assert!(matches!(
            orchestrator.on_receive(&failing).await,
            Err(CommunicationError::HandlerFailed { .. })
        ));
    }

    #[test]
    fn reject_duplicate_handlers() {
        let orchestrator = orchestrator(0);
        let handler = |_: Message| async { Ok::<(), BoxedError>(()) };

        orchestrator.register_handler(3, handler).unwrap();
        assert!(matches!(
            orchestrator.register_handler(3, handler),
            Err(CommunicationError::DuplicateHandlerRegistration(MessageType(3)))
        ));
    }

    #[test]
    fn derive_the_role_from_the_rank() {
        assert_eq!(orchestrator(0).role(), Role::Coordinator);
        assert_eq!(orchestrator(1).role(), Role::Worker);
    }

    #[test]
    fn take_the_rank_from_the_transport() {
        let topology = Topology::new("rank", 2, vec!["a".into(), "b".into()]).unwrap();
        let transport = BrokerBackend::new(InMemoryBroker::new(), topology);
        let manager = CommunicationManager::new(Backend::new(transport));
        let orchestrator = Orchestrator::new(Arc::new(manager));

        assert_eq!(orchestrator.rank(), 2);
        assert_eq!(orchestrator.role(), Role::Worker);
    }
}
