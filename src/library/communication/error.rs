use crate::library::BoxedError;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{self, Display, Formatter};

/// Flattened error chain which can be cloned and sent to any number of receivers
///
/// Delivery failures are broadcast to subscribers that know nothing about the concrete error
/// types involved. The chain is captured as plain messages, outermost first.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct BlackboxError {
    causes: Vec<String>,
}

impl BlackboxError {
    /// Captures the chain of a boxed error
    pub fn from_boxed(error: BoxedError) -> Self {
        let mut causes = Vec::new();
        let mut current: Option<&(dyn Error + 'static)> = Some(error.as_ref());

        while let Some(error) = current {
            match error.downcast_ref::<BlackboxError>() {
                Some(captured) => causes.extend(captured.causes.iter().cloned()),
                None => causes.push(error.to_string()),
            }

            current = error.source();
        }

        Self { causes }
    }

    /// Messages of the error and all its causes, outermost first
    pub fn causes(&self) -> &[String] {
        &self.causes
    }
}

impl Error for BlackboxError {}

impl Display for BlackboxError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.causes.is_empty() {
            return write!(f, "unknown error");
        }

        write!(f, "{}", self.causes.join(": "))
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use pretty_assertions::assert_eq;
    use thiserror::Error;

    #[derive(Error, Debug)]
    #[error("payload of message 4 could not be retrieved")]
    struct Retrieval(#[source] std::io::Error);

    #[derive(Error, Debug)]
    #[error("observer failed")]
    struct Wrapped(#[source] BlackboxError);

    #[test]
    fn capture_the_whole_chain() {
        let cause = std::io::Error::new(std::io::ErrorKind::NotFound, "no such blob");
        let error = BlackboxError::from_boxed(Box::new(Retrieval(cause)));

        assert_eq!(
            error.causes(),
            ["payload of message 4 could not be retrieved", "no such blob"]
        );
        assert_eq!(
            error.to_string(),
            "payload of message 4 could not be retrieved: no such blob"
        );
    }

    #[test]
    fn flatten_captured_chains() {
        let inner = BlackboxError::from_boxed("connection refused".into());
        let error = BlackboxError::from_boxed(Box::new(Wrapped(inner)));

        assert_eq!(error.causes(), ["observer failed", "connection refused"]);
    }

    #[test]
    fn survive_serialization() {
        let error = BlackboxError::from_boxed("malformed envelope".into());
        let encoded = serde_json::to_string(&error).unwrap();

        assert_eq!(encoded, r#"{"causes":["malformed envelope"]}"#);
        assert_eq!(serde_json::from_str::<BlackboxError>(&encoded).unwrap(), error);
    }
}
