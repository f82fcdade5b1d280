//! The authoritative in-process session store.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use auth_protocol_types::Session;
use tracing::{debug, warn};

use crate::backend::{SessionStorageBackend, SESSION_KEY};
use crate::{StaleGeneration, StorageError};

type Subscriber = Box<dyn Fn(Option<&Session>, u64, CommitOrigin) + Send + Sync>;

/// Where a committed change came from. Subscribers that mirror local
/// changes outward use this to leave replicated ones alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOrigin {
    /// Committed by this instance's own flows or refresh handler.
    Local,
    /// Applied from a peer instance, or restored from disk at startup.
    Replicated,
}

struct Inner {
    session: Option<Session>,
    generation: u64,
}

/// Owns the current session and its generation counter.
///
/// Every mutation goes through [`set`](SessionStore::set) (or the
/// conditional [`set_if_generation`](SessionStore::set_if_generation)),
/// which bumps the generation, persists to the backend, and fans the change
/// out to subscribers synchronously. Commits are fully serialized: the
/// persist and the subscriber fan-out happen under one commit lock, so
/// concurrent writers always deliver notifications in generation order.
/// The in-memory copy is authoritative: a backend write failure is logged
/// and swallowed, never surfaced to the caller of an auth flow.
pub struct SessionStore<B> {
    backend: B,
    inner: Mutex<Inner>,
    // Held across the generation bump, the persist, and the subscriber
    // fan-out. Notification order equals commit order.
    commit: Mutex<()>,
    subscribers: Mutex<Vec<(u64, Arc<Subscriber>)>>,
    next_subscriber_id: AtomicU64,
}

/// Returned by [`SessionStore::subscribe`]; pass it back to
/// [`SessionStore::unsubscribe`] to detach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionHandle(u64);

impl<B: SessionStorageBackend> SessionStore<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            inner: Mutex::new(Inner {
                session: None,
                generation: 0,
            }),
            commit: Mutex::new(()),
            subscribers: Mutex::new(Vec::new()),
            next_subscriber_id: AtomicU64::new(1),
        }
    }

    /// Current session, cloned out.
    pub fn get(&self) -> Option<Session> {
        self.inner.lock().expect("lock poisoned").session.clone()
    }

    /// Current generation. Advances by one on every committed change.
    pub fn generation(&self) -> u64 {
        self.inner.lock().expect("lock poisoned").generation
    }

    /// Session and generation read under one lock, for writers that will
    /// commit conditionally with [`set_if_generation`](Self::set_if_generation).
    pub fn snapshot(&self) -> (Option<Session>, u64) {
        let inner = self.inner.lock().expect("lock poisoned");
        (inner.session.clone(), inner.generation)
    }

    /// Replaces the session wholesale. Returns the new generation.
    pub fn set(&self, session: Option<Session>) -> u64 {
        self.commit_unconditional(session, CommitOrigin::Local)
    }

    /// Like [`set`](Self::set), but marks the commit as replicated from
    /// a peer so subscribers do not publish it back out.
    pub fn set_replicated(&self, session: Option<Session>) -> u64 {
        self.commit_unconditional(session, CommitOrigin::Replicated)
    }

    fn commit_unconditional(&self, session: Option<Session>, origin: CommitOrigin) -> u64 {
        let _ordering = self.commit.lock().expect("lock poisoned");
        let (snapshot, generation) = {
            let mut inner = self.inner.lock().expect("lock poisoned");
            inner.generation += 1;
            inner.session = session;
            (inner.session.clone(), inner.generation)
        };
        self.persist(snapshot.as_ref());
        self.notify(snapshot.as_ref(), generation, origin);
        generation
    }

    /// Replaces the session only if the store is still at `expected`
    /// generation. A mismatch means someone else committed first; the
    /// caller's value is stale and must be discarded.
    pub fn set_if_generation(
        &self,
        expected: u64,
        session: Option<Session>,
    ) -> Result<u64, StaleGeneration> {
        let _ordering = self.commit.lock().expect("lock poisoned");
        let (snapshot, generation) = {
            let mut inner = self.inner.lock().expect("lock poisoned");
            if inner.generation != expected {
                debug!(
                    expected,
                    current = inner.generation,
                    "discarding stale session write"
                );
                return Err(StaleGeneration {
                    expected,
                    current: inner.generation,
                });
            }
            inner.generation += 1;
            inner.session = session;
            (inner.session.clone(), inner.generation)
        };
        self.persist(snapshot.as_ref());
        self.notify(snapshot.as_ref(), generation, CommitOrigin::Local);
        Ok(generation)
    }

    /// Loads a persisted session from the backend into the store, if one
    /// exists. Fail-open: an unreadable or corrupt value is treated as "no
    /// session" so a bad disk state can never wedge startup. Subscribers
    /// see the restore as a replicated commit.
    pub fn restore(&self) -> Option<Session> {
        let session = match self.backend.get(SESSION_KEY) {
            Ok(Some(raw)) => match serde_json::from_str::<Session>(&raw) {
                Ok(session) => Some(session),
                Err(error) => {
                    warn!(%error, "persisted session is corrupt, ignoring");
                    None
                }
            },
            Ok(None) => None,
            Err(error) => {
                warn!(%error, "failed to read persisted session, ignoring");
                None
            }
        };
        if let Some(ref session) = session {
            let _ordering = self.commit.lock().expect("lock poisoned");
            let (snapshot, generation) = {
                let mut inner = self.inner.lock().expect("lock poisoned");
                inner.generation += 1;
                inner.session = Some(session.clone());
                (inner.session.clone(), inner.generation)
            };
            self.notify(snapshot.as_ref(), generation, CommitOrigin::Replicated);
        }
        session
    }

    /// Registers a change callback. Callbacks run synchronously on the
    /// mutating thread, under the commit lock, with the new session, its
    /// generation, and the commit's origin. They must not call back into
    /// the store.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionHandle
    where
        F: Fn(Option<&Session>, u64, CommitOrigin) + Send + Sync + 'static,
    {
        let id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .lock()
            .expect("lock poisoned")
            .push((id, Arc::new(Box::new(callback))));
        SubscriptionHandle(id)
    }

    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        self.subscribers
            .lock()
            .expect("lock poisoned")
            .retain(|(id, _)| *id != handle.0);
    }

    fn persist(&self, session: Option<&Session>) {
        let result = match session {
            Some(session) => match serde_json::to_string(session) {
                Ok(raw) => self.write_with_retry(&raw),
                Err(error) => Err(StorageError::Serialization(error)),
            },
            None => self.backend.remove(SESSION_KEY),
        };
        if let Err(error) = result {
            warn!(%error, "failed to persist session, in-memory copy remains authoritative");
        }
    }

    fn write_with_retry(&self, raw: &str) -> Result<(), StorageError> {
        match self.backend.set(SESSION_KEY, raw) {
            Ok(()) => Ok(()),
            Err(first) => {
                debug!(error = %first, "session persist failed, retrying once");
                self.backend.set(SESSION_KEY, raw)
            }
        }
    }

    fn notify(&self, session: Option<&Session>, generation: u64, origin: CommitOrigin) {
        let subscribers: Vec<Arc<Subscriber>> = self
            .subscribers
            .lock()
            .expect("lock poisoned")
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for callback in subscribers {
            callback(session, generation, origin);
        }
    }
}
