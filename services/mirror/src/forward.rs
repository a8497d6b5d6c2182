//! Forward references to manifest list members.
//!
//! A list can reach the relate stage before its members have been stored.
//! Each member digest gets a watch channel when the list is classified; the
//! persist stage marks it ready once the member manifest exists, and the
//! relate stage waits on it before relating the list to the member.

use std::future::Future;

use content::Digest;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Pending,
    Ready,
}

/// Outcome of waiting on a forward reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Resolution {
    /// The member manifest is stored.
    Ready,

    /// The member will never be stored.
    Abandoned,
}

#[derive(Debug, Default)]
pub(crate) struct ForwardRefs {
    references: DashMap<Digest, watch::Sender<State>>,
}

impl ForwardRefs {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Declare `digest` as pending. Returns `true` the first time a digest is
    /// declared; the caller is then responsible for storing it.
    pub(crate) fn declare(&self, digest: &Digest) -> bool {
        match self.references.entry(digest.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                entry.insert(watch::channel(State::Pending).0);
                true
            }
        }
    }

    /// Mark `digest` as stored, waking every waiter.
    pub(crate) fn resolve(&self, digest: &Digest) {
        if let Some(sender) = self.references.get(digest) {
            sender.send_replace(State::Ready);
        }
    }

    /// Wait until `digest` is stored. Digests which were never declared are
    /// abandoned immediately.
    pub(crate) fn wait(&self, digest: &Digest) -> impl Future<Output = Resolution> + Send + 'static {
        let receiver = self.references.get(digest).map(|sender| sender.subscribe());
        async move {
            let Some(mut receiver) = receiver else {
                return Resolution::Abandoned;
            };
            let result = receiver.wait_for(|state| *state == State::Ready).await.map(|_| ());
            match result {
                Ok(_) => Resolution::Ready,
                Err(_) => Resolution::Abandoned,
            }
        }
    }

    /// Drop every reference which is still pending. Their waiters see
    /// [`Resolution::Abandoned`].
    pub(crate) fn abandon_pending(&self) -> usize {
        let before = self.references.len();
        self.references
            .retain(|_, sender| *sender.borrow() == State::Ready);
        before - self.references.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn declared_once() {
        let refs = ForwardRefs::new();
        let digest = content::compute_digest(b"member");
        assert!(refs.declare(&digest));
        assert!(!refs.declare(&digest));
    }

    #[tokio::test]
    async fn resolve_wakes_waiters() {
        let refs = ForwardRefs::new();
        let digest = content::compute_digest(b"member");
        refs.declare(&digest);

        let waiter = tokio::spawn(refs.wait(&digest));
        tokio::task::yield_now().await;
        refs.resolve(&digest);
        assert_eq!(waiter.await.unwrap(), Resolution::Ready);

        // Late waiters see the resolved state.
        assert_eq!(refs.wait(&digest).await, Resolution::Ready);
    }

    #[tokio::test]
    async fn abandoned_references() {
        let refs = ForwardRefs::new();
        let pending = content::compute_digest(b"pending");
        let ready = content::compute_digest(b"ready");
        refs.declare(&pending);
        refs.declare(&ready);
        refs.resolve(&ready);

        let waiter = tokio::spawn(refs.wait(&pending));
        assert_eq!(refs.abandon_pending(), 1);
        assert_eq!(waiter.await.unwrap(), Resolution::Abandoned);
        assert_eq!(refs.wait(&ready).await, Resolution::Ready);

        let unknown = content::compute_digest(b"unknown");
        assert_eq!(refs.wait(&unknown).await, Resolution::Abandoned);
    }
}
