//! Session Registry
//!
//! Tracks which live connections are subscribed to which conversation and
//! fans events out to them. Each connection owns a bounded outbound queue;
//! a broadcast never waits on a slow receiver. Receivers whose queue is full
//! or closed are evicted and their connection is cancelled.
//!
//! Chat messages are persisted and broadcast while holding the conversation's
//! [`Turn`], so every connection sees them in commit order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use super::protocol::ServerFrame;
use crate::config::DuplicateConnectionPolicy;

pub type ConnectionId = Uuid;

/// Shared frame handed to every subscriber of a broadcast.
pub type OutboundFrame = Arc<ServerFrame>;

/// One live connection's endpoint in the registry.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub principal_id: i64,
    sender: mpsc::Sender<OutboundFrame>,
    cancel: CancellationToken,
}

impl ConnectionHandle {
    pub fn new(
        principal_id: i64,
        sender: mpsc::Sender<OutboundFrame>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            principal_id,
            sender,
            cancel,
        }
    }
}

/// Outcome of a single broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub evicted: usize,
}

type Groups = HashMap<i64, HashMap<ConnectionId, ConnectionHandle>>;
type TurnLocks = HashMap<i64, Arc<AsyncMutex<()>>>;

#[derive(Debug, Default)]
pub struct SessionRegistry {
    groups: RwLock<Groups>,
    /// Per-conversation ordering locks, removed by the last holder.
    turns: Mutex<TurnLocks>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // Every update leaves the map consistent, so a poisoned lock is still usable.
    fn read(&self) -> RwLockReadGuard<'_, Groups> {
        self.groups.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Groups> {
        self.groups.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn turn_locks(&self) -> MutexGuard<'_, TurnLocks> {
        self.turns.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait for exclusive use of a conversation's persist-then-broadcast step.
    pub async fn turn(&self, conversation_id: i64) -> Turn<'_> {
        let lock = Arc::clone(self.turn_locks().entry(conversation_id).or_default());
        Turn {
            registry: self,
            conversation_id,
            guard: lock.lock_owned().await,
        }
    }

    /// Add a handle to a conversation's set. Under `Replace`, the principal's
    /// existing handles in that conversation are removed and cancelled first.
    /// Returns how many handles were replaced.
    pub fn join(
        &self,
        conversation_id: i64,
        handle: ConnectionHandle,
        policy: DuplicateConnectionPolicy,
    ) -> usize {
        let mut groups = self.write();
        let members = groups.entry(conversation_id).or_default();

        let mut replaced = 0;
        if policy == DuplicateConnectionPolicy::Replace {
            members.retain(|_, existing| {
                if existing.principal_id == handle.principal_id {
                    existing.cancel.cancel();
                    replaced += 1;
                    false
                } else {
                    true
                }
            });
        }

        debug!(
            conversation_id,
            connection_id = %handle.id,
            principal_id = handle.principal_id,
            replaced,
            "Connection joined conversation"
        );
        members.insert(handle.id, handle);
        replaced
    }

    /// Join and hand back a guard that leaves when released or dropped.
    pub fn register(
        self: &Arc<Self>,
        conversation_id: i64,
        handle: ConnectionHandle,
        policy: DuplicateConnectionPolicy,
    ) -> Registration {
        let connection_id = handle.id;
        self.join(conversation_id, handle, policy);
        Registration {
            registry: Arc::clone(self),
            conversation_id,
            connection_id,
            released: AtomicBool::new(false),
        }
    }

    /// Remove a handle. Returns false if it was not registered (already left
    /// or evicted). A conversation with no handles left is dropped entirely.
    pub fn leave(&self, conversation_id: i64, connection_id: ConnectionId) -> bool {
        let mut groups = self.write();
        let Some(members) = groups.get_mut(&conversation_id) else {
            return false;
        };
        let removed = members.remove(&connection_id).is_some();
        if members.is_empty() {
            groups.remove(&conversation_id);
        }
        if removed {
            debug!(conversation_id, connection_id = %connection_id, "Connection left conversation");
        }
        removed
    }

    /// Queue `frame` on every handle in the conversation except `exclude`.
    ///
    /// Enqueueing happens under the read lock, so a handle that has returned
    /// from `leave` never receives anything afterwards.
    pub fn broadcast(
        &self,
        conversation_id: i64,
        frame: ServerFrame,
        exclude: Option<ConnectionId>,
    ) -> BroadcastReport {
        let frame: OutboundFrame = Arc::new(frame);
        let mut report = BroadcastReport::default();
        let mut failed = Vec::new();

        {
            let groups = self.read();
            let Some(members) = groups.get(&conversation_id) else {
                return report;
            };
            for (id, handle) in members {
                if exclude == Some(*id) {
                    continue;
                }
                match handle.sender.try_send(Arc::clone(&frame)) {
                    Ok(()) => report.delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        warn!(
                            conversation_id,
                            connection_id = %id,
                            "Outbound queue full, evicting slow receiver"
                        );
                        failed.push(*id);
                    }
                    Err(TrySendError::Closed(_)) => failed.push(*id),
                }
            }
        }

        if !failed.is_empty() {
            let mut groups = self.write();
            if let Some(members) = groups.get_mut(&conversation_id) {
                for id in failed {
                    if let Some(handle) = members.remove(&id) {
                        handle.cancel.cancel();
                        report.evicted += 1;
                    }
                }
                if members.is_empty() {
                    groups.remove(&conversation_id);
                }
            }
        }

        report
    }

    /// Number of live handles subscribed to a conversation.
    pub fn connection_count(&self, conversation_id: i64) -> usize {
        self.read().get(&conversation_id).map_or(0, HashMap::len)
    }

    /// Number of conversations with at least one live handle.
    pub fn conversation_count(&self) -> usize {
        self.read().len()
    }
}

/// Exclusive turn in one conversation. Released on drop.
pub struct Turn<'a> {
    registry: &'a SessionRegistry,
    conversation_id: i64,
    guard: OwnedMutexGuard<()>,
}

impl Drop for Turn<'_> {
    fn drop(&mut self) {
        let mut turns = self.registry.turn_locks();
        let lock = OwnedMutexGuard::mutex(&self.guard);
        // Held by the map and this guard only: nobody is waiting.
        if Arc::strong_count(lock) == 2
            && turns
                .get(&self.conversation_id)
                .is_some_and(|entry| Arc::ptr_eq(entry, lock))
        {
            turns.remove(&self.conversation_id);
        }
    }
}

/// Membership of one connection in one conversation. Leaves the registry
/// exactly once, on `release` or on drop, whichever comes first.
#[derive(Debug)]
pub struct Registration {
    registry: Arc<SessionRegistry>,
    conversation_id: i64,
    connection_id: ConnectionId,
    released: AtomicBool,
}

impl Registration {
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Returns true only for the call that actually removed the handle.
    pub fn release(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.registry.leave(self.conversation_id, self.connection_id)
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.release();
    }
}
