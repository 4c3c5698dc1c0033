use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

use super::PoolRegistry;

/// A live registration in a path's pool.
///
/// Receives encoded [`Message`](super::Message)s. Dropping it (or the guard
/// returned by [`Subscription::into_parts`]) unregisters the member.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    path: String,
    version: String,
    receiver: mpsc::Receiver<Bytes>,
    guard: SubscriptionGuard,
}

impl Subscription {
    pub(crate) fn new(
        id: u64,
        path: &str,
        version: String,
        receiver: mpsc::Receiver<Bytes>,
        registry: Arc<PoolRegistry>,
    ) -> Self {
        Self {
            id,
            path: path.to_string(),
            version,
            receiver,
            guard: SubscriptionGuard {
                id,
                path: path.to_string(),
                registry,
            },
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Version of the view at subscribe time, as sent on the wire.
    pub fn version(&self) -> &str {
        &self.version
    }

    pub async fn recv(&mut self) -> Option<Bytes> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Result<Bytes, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Splits into the raw receiver and the guard owning the registration.
    pub fn into_parts(self) -> (mpsc::Receiver<Bytes>, SubscriptionGuard) {
        (self.receiver, self.guard)
    }
}

/// Unregisters its member from the pool when dropped.
#[derive(Debug)]
pub struct SubscriptionGuard {
    id: u64,
    path: String,
    registry: Arc<PoolRegistry>,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.registry.unregister(&self.path, self.id);
    }
}
