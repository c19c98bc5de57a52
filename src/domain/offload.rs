//! Transparent relocation of large payloads into the blob store
//!
//! The payload travels under [`KEY_MODEL_PARAMS`]. When it is offloaded, the value is replaced
//! by the blob key and the retrieval link is added under [`KEY_MODEL_PARAMS_URL`]. Receivers
//! tell both cases apart purely by the presence of the link.

use super::{BlobStore, BlobStoreError, Message};
use crate::constants::{KEY_MODEL_PARAMS, KEY_MODEL_PARAMS_URL};
use serde_json::Value;
use tracing::{debug, trace};

/// Location of an offloaded payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadReference {
    /// Blob store key
    pub key: String,
    /// Retrieval link
    pub url: String,
}

/// Applies the offload protocol to outbound and inbound messages
#[derive(Clone)]
pub struct PayloadOffloader {
    store: BlobStore,
    inline_threshold: usize,
}

fn is_empty_payload(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(_) => false,
    }
}

impl PayloadOffloader {
    /// Creates a new offloader
    ///
    /// Payloads whose serialized size does not exceed `inline_threshold` bytes stay inline.
    /// A threshold of zero offloads every non-empty payload.
    pub fn new(store: BlobStore, inline_threshold: usize) -> Self {
        Self {
            store,
            inline_threshold,
        }
    }

    /// Offloads the payload of a message about to be sent on `channel`
    ///
    /// Returns the reference if the payload has been moved, `None` if the message is unchanged.
    /// When the write fails the message is left untouched.
    pub async fn pack(
        &self,
        message: &mut Message,
        channel: &str,
    ) -> Result<Option<PayloadReference>, BlobStoreError> {
        let payload = match message.param(KEY_MODEL_PARAMS) {
            value if is_empty_payload(value) => return Ok(None),
            Some(value) => value,
            None => return Ok(None),
        };

        if self.inline_threshold > 0 {
            let size = serde_json::to_vec(payload).map(|v| v.len()).unwrap_or(usize::MAX);

            if size <= self.inline_threshold {
                trace!(size, "Sending payload inline");
                return Ok(None);
            }
        }

        let key = BlobStore::key_for(channel);
        let url = self.store.write(&key, payload).await?;

        let params = message.params_mut();
        params.insert(KEY_MODEL_PARAMS.into(), Value::String(key.clone()));
        params.insert(KEY_MODEL_PARAMS_URL.into(), Value::String(url.clone()));

        debug!(%key, "Offloaded payload");

        Ok(Some(PayloadReference { key, url }))
    }

    /// Resolves an offloaded payload of a received message in place
    ///
    /// On failure the message is left untouched and must not be handed on.
    pub async fn unpack(
        &self,
        message: &mut Message,
    ) -> Result<Option<PayloadReference>, BlobStoreError> {
        let reference = match (
            message.param(KEY_MODEL_PARAMS),
            message.param(KEY_MODEL_PARAMS_URL),
        ) {
            (Some(Value::String(key)), Some(url)) if !key.trim().is_empty() => PayloadReference {
                key: key.trim().to_string(),
                url: url.as_str().unwrap_or_default().to_string(),
            },
            _ => return Ok(None),
        };

        let payload = self.store.read(&reference.key).await?;

        let params = message.params_mut();
        params.insert(KEY_MODEL_PARAMS.into(), payload);
        params.remove(KEY_MODEL_PARAMS_URL);

        debug!(key = %reference.key, "Resolved offloaded payload");

        Ok(Some(reference))
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use crate::library::storage::InMemoryStorageBackend;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;

    fn offloader(threshold: usize) -> PayloadOffloader {
        let store = BlobStore::new(Arc::new(InMemoryStorageBackend::new()), 60);
        PayloadOffloader::new(store, threshold)
    }

    fn with_payload(payload: Value) -> Message {
        let mut message = Message::new(7, 0, 1);
        message.set_param(KEY_MODEL_PARAMS, payload).unwrap();
        message
    }

    #[tokio::test]
    async fn restore_offloaded_payloads() {
        let offloader = offloader(0);
        let payload = json!({ "layer": [1, 2, 3] });
        let original = with_payload(payload.clone());
        let mut message = original.clone();

        let reference = offloader
            .pack(&mut message, "fedml_42_7")
            .await
            .unwrap()
            .unwrap();

        assert!(reference.key.starts_with("fedml_42_7_"));
        assert_eq!(message.param(KEY_MODEL_PARAMS), Some(&json!(reference.key)));
        assert_eq!(message.param(KEY_MODEL_PARAMS_URL), Some(&json!(reference.url)));

        offloader.unpack(&mut message).await.unwrap();
        assert_eq!(message, original);
    }

    #[tokio::test]
    async fn leave_empty_payloads_alone() {
        let offloader = offloader(0);

        for payload in [json!(""), json!("   "), Value::Null] {
            let mut message = with_payload(payload);
            let before = message.clone();

            assert_eq!(offloader.pack(&mut message, "topic").await.unwrap(), None);
            assert_eq!(message, before);
        }

        let mut bare = Message::new(0, 1, 1);
        assert_eq!(offloader.pack(&mut bare, "topic").await.unwrap(), None);
    }

    #[tokio::test]
    async fn keep_small_payloads_inline() {
        let offloader = offloader(64);
        let mut message = with_payload(json!("short but not empty"));
        let before = message.clone();

        assert_eq!(offloader.pack(&mut message, "topic").await.unwrap(), None);
        assert_eq!(message, before);

        // Without a link the receiver must not treat the inline string as a key
        assert_eq!(offloader.unpack(&mut message).await.unwrap(), None);
        assert_eq!(message, before);
    }

    #[tokio::test]
    async fn fail_on_unresolvable_references() {
        let offloader = offloader(0);
        let mut message = with_payload(json!("topic_missing"));
        message
            .set_param(KEY_MODEL_PARAMS_URL, "memory://nowhere/topic_missing")
            .unwrap();
        let before = message.clone();

        assert!(offloader.unpack(&mut message).await.is_err());
        assert_eq!(message, before);
    }
}
