use super::{CommunicationError, Message};
use crate::library::EmptyResult;
use async_trait::async_trait;
use std::sync::{Arc, PoisonError, RwLock};

/// Party interested in every successfully decoded inbound message
#[async_trait]
pub trait Observer: Send + Sync {
    /// Handles one message
    ///
    /// Called from within the receive loop, which waits for the call to return before notifying
    /// further observers or processing the next message.
    async fn receive_message(&self, message: &Message) -> EmptyResult;
}

/// Ordered collection of observers
///
/// Registration order determines notification order. Each observer instance may only be
/// registered once; identity is determined by the address of the shared allocation.
#[derive(Default)]
pub struct ObserverSet {
    observers: RwLock<Vec<Arc<dyn Observer>>>,
}

fn same_observer(a: &Arc<dyn Observer>, b: &Arc<dyn Observer>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

impl ObserverSet {
    /// Appends an observer
    pub fn add(&self, observer: Arc<dyn Observer>) -> Result<(), CommunicationError> {
        let mut observers = self.observers.write().unwrap_or_else(PoisonError::into_inner);

        if observers.iter().any(|o| same_observer(o, &observer)) {
            return Err(CommunicationError::DuplicateObserverRegistration);
        }

        observers.push(observer);
        Ok(())
    }

    /// Removes an observer, returning whether it was registered
    pub fn remove(&self, observer: &Arc<dyn Observer>) -> bool {
        let mut observers = self.observers.write().unwrap_or_else(PoisonError::into_inner);
        let count = observers.len();

        observers.retain(|o| !same_observer(o, observer));
        observers.len() != count
    }

    /// Copy of the current registrations, in notification order
    pub fn snapshot(&self) -> Vec<Arc<dyn Observer>> {
        self.observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of registered observers
    pub fn len(&self) -> usize {
        self.observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no observer is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod does {
    use super::*;

    struct Silent;

    #[async_trait]
    impl Observer for Silent {
        async fn receive_message(&self, _message: &Message) -> EmptyResult {
            Ok(())
        }
    }

    #[test]
    fn reject_duplicate_registrations() {
        let set = ObserverSet::default();
        let observer: Arc<dyn Observer> = Arc::new(Silent);

        set.add(observer.clone()).unwrap();
        assert!(matches!(
            set.add(observer),
            Err(CommunicationError::DuplicateObserverRegistration)
        ));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn keep_registration_order() {
        let set = ObserverSet::default();
        let first: Arc<dyn Observer> = Arc::new(Silent);
        let second: Arc<dyn Observer> = Arc::new(Silent);

        set.add(first.clone()).unwrap();
        set.add(second.clone()).unwrap();

        let snapshot = set.snapshot();
        assert!(same_observer(&snapshot[0], &first));
        assert!(same_observer(&snapshot[1], &second));
    }

    #[test]
    fn remove_registered_observers() {
        let set = ObserverSet::default();
        let observer: Arc<dyn Observer> = Arc::new(Silent);

        set.add(observer.clone()).unwrap();
        assert!(set.remove(&observer));
        assert!(!set.remove(&observer));
        assert!(set.is_empty());
    }
}
