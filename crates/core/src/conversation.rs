//! Conversation-related types.
//!
//! The [`ConversationStore`] owns every thread. Threads are append-only:
//! messages are never removed or reordered once committed.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};
use toolloop_model::ModelMessage;

use crate::error::CheckpointError;

const CHECKPOINT_VERSION: u32 = 1;

/// An identified, ordered conversation history.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationThread {
    id: String,
    messages: Vec<ModelMessage>,
}

impl ConversationThread {
    /// Returns the thread id.
    #[inline]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the messages in insertion order.
    #[inline]
    pub fn messages(&self) -> &[ModelMessage] {
        &self.messages
    }

    /// Returns the number of messages.
    #[inline]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Returns `true` if nothing has been said on this thread yet.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Consumes the thread and returns its messages.
    #[inline]
    pub fn into_messages(self) -> Vec<ModelMessage> {
        self.messages
    }
}

/// An opaque, transportable serialization of a thread.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Checkpoint(String);

impl Checkpoint {
    /// Wraps a serialized checkpoint, e.g. one read back from disk. It is
    /// validated when restored.
    #[inline]
    pub fn from_string(raw: String) -> Self {
        Self(raw)
    }

    /// Returns the serialized form.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the checkpoint and returns the serialized form.
    #[inline]
    pub fn into_string(self) -> String {
        self.0
    }
}

#[derive(Serialize)]
struct CheckpointRef<'a> {
    version: u32,
    thread_id: &'a str,
    messages: &'a [ModelMessage],
}

#[derive(Deserialize)]
struct CheckpointDocument {
    version: u32,
    thread_id: String,
    messages: Vec<ModelMessage>,
}

/// Exclusive right to run a query on a thread, and to write its
/// history. Released on drop.
#[derive(Debug)]
pub struct ThreadLease {
    thread_id: String,
    _guard: OwnedMutexGuard<()>,
}

impl ThreadLease {
    /// Returns the leased thread id.
    #[inline]
    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }
}

#[derive(Default)]
struct ThreadSlot {
    messages: RwLock<Vec<ModelMessage>>,
    run_lock: Arc<Mutex<()>>,
}

/// An in-memory, thread-keyed store of conversations.
///
/// The store is meant to be shared (behind an [`Arc`]) by every agent of
/// a process. Operations on different threads never contend on the same
/// lock, except briefly when a thread is first created.
#[derive(Default)]
pub struct ConversationStore {
    threads: RwLock<HashMap<String, Arc<ThreadSlot>>>,
}

impl ConversationStore {
    /// Creates an empty store.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, thread_id: &str) -> Arc<ThreadSlot> {
        {
            let threads =
                self.threads.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(slot) = threads.get(thread_id) {
                return Arc::clone(slot);
            }
        }
        let mut threads =
            self.threads.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(threads.entry(thread_id.to_owned()).or_default())
    }

    /// Returns the thread, creating an empty one if absent.
    pub fn get(&self, thread_id: &str) -> ConversationThread {
        let slot = self.slot(thread_id);
        let messages = slot
            .messages
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        ConversationThread {
            id: thread_id.to_owned(),
            messages,
        }
    }

    /// Returns the number of messages in the thread, `0` if absent.
    pub fn len(&self, thread_id: &str) -> usize {
        let threads =
            self.threads.read().unwrap_or_else(PoisonError::into_inner);
        threads.get(thread_id).map_or(0, |slot| {
            slot.messages
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .len()
        })
    }

    /// Returns the ids of every known thread, sorted.
    pub fn thread_ids(&self) -> Vec<String> {
        let threads =
            self.threads.read().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<_> = threads.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Appends one message to the leased thread.
    #[inline]
    pub fn append(&self, lease: &ThreadLease, message: ModelMessage) {
        self.commit(lease, vec![message]);
    }

    /// Appends a whole turn to the leased thread at once. Readers see
    /// either none or all of the messages.
    pub fn commit(&self, lease: &ThreadLease, messages: Vec<ModelMessage>) {
        if messages.is_empty() {
            return;
        }
        let thread_id = lease.thread_id();
        let slot = self.slot(thread_id);
        let mut history = slot
            .messages
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        debug!(
            "committing {} messages to thread `{thread_id}` ({} before)",
            messages.len(),
            history.len()
        );
        history.extend(messages);
    }

    /// Serializes the thread's current state.
    pub fn snapshot(
        &self,
        thread_id: &str,
    ) -> Result<Checkpoint, CheckpointError> {
        let slot = self.slot(thread_id);
        let messages = slot
            .messages
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let raw = serde_json::to_string(&CheckpointRef {
            version: CHECKPOINT_VERSION,
            thread_id,
            messages: messages.as_slice(),
        })?;
        Ok(Checkpoint(raw))
    }

    /// Reconstructs the thread a checkpoint was taken from. The store is
    /// left untouched, see [`ConversationStore::import`].
    pub fn restore(
        &self,
        checkpoint: &Checkpoint,
    ) -> Result<ConversationThread, CheckpointError> {
        let doc: CheckpointDocument = serde_json::from_str(&checkpoint.0)?;
        if doc.version != CHECKPOINT_VERSION {
            return Err(CheckpointError::UnsupportedVersion(doc.version));
        }
        Ok(ConversationThread {
            id: doc.thread_id,
            messages: doc.messages,
        })
    }

    /// Restores a checkpoint and installs it as the thread's history.
    ///
    /// The stored history must be a prefix of the checkpoint's history, so
    /// that importing only ever appends. Fails if a query holds the thread.
    pub fn import(
        &self,
        checkpoint: &Checkpoint,
    ) -> Result<ConversationThread, CheckpointError> {
        let thread = self.restore(checkpoint)?;
        let Some(_lease) = self.try_lease(&thread.id) else {
            return Err(CheckpointError::Busy(thread.id));
        };
        let slot = self.slot(&thread.id);
        let mut history = slot
            .messages
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if !thread.messages.starts_with(history.as_slice()) {
            return Err(CheckpointError::Conflict(thread.id));
        }
        let missing = &thread.messages[history.len()..];
        history.extend_from_slice(missing);
        drop(history);
        Ok(thread)
    }

    /// Waits for exclusive use of the thread.
    pub async fn lease(&self, thread_id: &str) -> ThreadLease {
        let run_lock = Arc::clone(&self.slot(thread_id).run_lock);
        ThreadLease {
            thread_id: thread_id.to_owned(),
            _guard: run_lock.lock_owned().await,
        }
    }

    /// Takes exclusive use of the thread if nobody holds it.
    pub fn try_lease(&self, thread_id: &str) -> Option<ThreadLease> {
        let run_lock = Arc::clone(&self.slot(thread_id).run_lock);
        let guard = run_lock.try_lock_owned().ok()?;
        Some(ThreadLease {
            thread_id: thread_id.to_owned(),
            _guard: guard,
        })
    }
}
