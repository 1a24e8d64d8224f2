//! Transport seam: session identity and outbound reply delivery.
//!
//! The core never formats text.  It emits semantic [`Reply`] values
//! addressed by [`SessionKey`]; a [`ReplySink`] renders and delivers them.
//! The binary ships a line-oriented console transport ([`console`]); a chat
//! bot adapter would implement the same trait.

pub mod console;

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

use crate::session::Reply;

// ---------------------------------------------------------------------------
// SessionKey
// ---------------------------------------------------------------------------

/// Stable external identity of a conversation (chat id, user id, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionKey(String);

impl SessionKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for SessionKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

// ---------------------------------------------------------------------------
// Outbound / ReplySink
// ---------------------------------------------------------------------------

/// One reply addressed to one session.
#[derive(Debug, Clone)]
pub struct Outbound {
    pub key: SessionKey,
    pub reply: Reply,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport closed")]
    Closed,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Delivers replies to the outside world.
///
/// Called from session tasks, one reply at a time per session and in the
/// order the session produced them.  Implementors must be `Send + Sync` so a
/// single sink can be shared as `Arc<dyn ReplySink>` by every session.
#[async_trait]
pub trait ReplySink: Send + Sync {
    async fn deliver(&self, outbound: Outbound) -> Result<(), TransportError>;
}

// Compile-time assertion: Box<dyn ReplySink> must be constructible.
const _: fn() = || {
    fn _assert_object_safe(_: Box<dyn ReplySink>) {}
};

// ---------------------------------------------------------------------------
// RecordingSink  (test-only)
// ---------------------------------------------------------------------------

/// Sink that keeps every delivered reply for later inspection.
#[cfg(test)]
#[derive(Default)]
pub struct RecordingSink {
    sent: std::sync::Mutex<Vec<Outbound>>,
}

#[cfg(test)]
impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<Outbound> {
        self.sent.lock().unwrap().clone()
    }

    /// Replies delivered to `key`, in order.
    pub fn replies_for(&self, key: &SessionKey) -> Vec<Reply> {
        self.all()
            .into_iter()
            .filter(|o| &o.key == key)
            .map(|o| o.reply)
            .collect()
    }

    /// Poll until `done` holds for `key`'s replies or `timeout` elapses.
    /// Returns the replies seen at that point.
    pub async fn wait_for(
        &self,
        key: &SessionKey,
        timeout: std::time::Duration,
        done: impl Fn(&[Reply]) -> bool,
    ) -> Vec<Reply> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let replies = self.replies_for(key);
            if done(&replies) || tokio::time::Instant::now() >= deadline {
                return replies;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    }
}

#[cfg(test)]
#[async_trait]
impl ReplySink for RecordingSink {
    async fn deliver(&self, outbound: Outbound) -> Result<(), TransportError> {
        self.sent.lock().unwrap().push(outbound);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_key_conversions() {
        let a = SessionKey::from("42");
        let b = SessionKey::from(String::from("42"));
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "42");
        assert_eq!(a.to_string(), "42");
    }

    #[tokio::test]
    async fn recording_sink_filters_by_key() {
        let sink = RecordingSink::new();
        let (a, b) = (SessionKey::from("a"), SessionKey::from("b"));
        sink.deliver(Outbound {
            key: a.clone(),
            reply: Reply::WorkInProgress,
        })
        .await
        .unwrap();
        sink.deliver(Outbound {
            key: b.clone(),
            reply: Reply::NotStarted,
        })
        .await
        .unwrap();

        assert!(matches!(sink.replies_for(&a).as_slice(), [Reply::WorkInProgress]));
        assert!(matches!(sink.replies_for(&b).as_slice(), [Reply::NotStarted]));
        assert_eq!(sink.all().len(), 2);
    }
}
