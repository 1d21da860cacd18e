//! Connected-client registry and fan-out.
//!
//! Each client owns a bounded queue of encoded frames drained by its own
//! writer task. Broadcasting only ever `try_send`s, so a slow reader fills
//! its own queue and is dropped while the engine keeps going.

use bytes::Bytes;
use rwalk_wire::{encode_to_bytes, Message};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

/// Identifies one accepted connection for its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(pub u64);

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// Outbound frame queue handle for one client.
pub type FrameSender = mpsc::Sender<Bytes>;

#[derive(Debug)]
pub struct ClientRegistry {
    clients: Mutex<HashMap<ClientId, FrameSender>>,
    next_id: AtomicU64,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ClientId, FrameSender>> {
        self.clients.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Hands out a fresh id without registering anything yet.
    pub fn allocate_id(&self) -> ClientId {
        ClientId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn register(&self, id: ClientId, sender: FrameSender) {
        self.lock().insert(id, sender);
        debug!(%id, "Client registered");
    }

    /// Removes a client. Safe to call more than once; only the first call
    /// returns true.
    pub fn unregister(&self, id: ClientId) -> bool {
        let removed = self.lock().remove(&id).is_some();
        if removed {
            debug!(%id, "Client unregistered");
        }
        removed
    }

    pub fn active_count(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.active_count() == 0
    }

    pub fn contains(&self, id: ClientId) -> bool {
        self.lock().contains_key(&id)
    }

    /// Encodes `msg` once and queues it for every client.
    pub fn broadcast(&self, msg: &Message) -> usize {
        self.broadcast_frame(encode_to_bytes(msg))
    }

    /// Queues an already-encoded frame for every client. Clients whose queue
    /// is full or whose writer is gone are removed. Returns how many clients
    /// accepted the frame.
    pub fn broadcast_frame(&self, frame: Bytes) -> usize {
        let mut clients = self.lock();
        let mut delivered = 0;

        clients.retain(|id, sender| match sender.try_send(frame.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                warn!(%id, "Client queue full, dropping client");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(%id, "Client writer gone, removing");
                false
            }
        });

        delivered
    }

    /// Queues a frame for one client only, with the same drop rules as
    /// [`broadcast_frame`](Self::broadcast_frame).
    pub fn send_to(&self, id: ClientId, frame: Bytes) -> bool {
        let mut clients = self.lock();
        let Some(sender) = clients.get(&id) else {
            return false;
        };
        match sender.try_send(frame) {
            Ok(()) => true,
            Err(_) => {
                warn!(%id, "Client queue unavailable, dropping client");
                clients.remove(&id);
                false
            }
        }
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}
