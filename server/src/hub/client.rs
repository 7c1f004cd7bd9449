//! The hub's model of one connected user.
//!
//! A `Client` owns the producing side of a bounded outbound queue and a
//! one-shot `done` signal. The connection's writer task holds the receiving
//! side of the queue; the reader and writer both watch `done` to learn when
//! the hub has revoked the connection.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

/// Outbound queue bound used when no capacity is configured.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

/// Lifecycle of a single connection as seen by the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ClientState {
    /// Created, not yet applied by the hub loop.
    Connecting = 0,
    /// Registered and receiving dispatches.
    Active = 1,
    /// Removal in progress on the hub loop.
    Unregistering = 2,
    /// Outbound closed and `done` signalled. Terminal.
    Closed = 3,
}

impl ClientState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Active,
            2 => Self::Unregistering,
            _ => Self::Closed,
        }
    }
}

/// Outcome of a single best-effort enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// Queue full; the payload was discarded.
    Dropped,
    /// The client's outbound queue has already been closed.
    Closed,
    /// No client is registered for the target.
    Offline,
}

impl Delivery {
    pub fn is_queued(self) -> bool {
        self == Self::Queued
    }
}

pub struct Client {
    conn_id: Uuid,
    user_id: i64,
    room_id: Option<i64>,
    /// `None` once closed. Enqueues take the read side, close takes the write side.
    outbound: RwLock<Option<mpsc::Sender<Bytes>>>,
    done: watch::Sender<bool>,
    state: AtomicU8,
}

impl Client {
    /// Create a client and the receiving half of its outbound queue.
    pub fn new(
        user_id: i64,
        room_id: Option<i64>,
        capacity: usize,
    ) -> (Arc<Self>, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (done, _) = watch::channel(false);
        let client = Arc::new(Self {
            conn_id: Uuid::now_v7(),
            user_id,
            room_id,
            outbound: RwLock::new(Some(tx)),
            done,
            state: AtomicU8::new(ClientState::Connecting as u8),
        });
        (client, rx)
    }

    /// Identifier of this particular connection. Distinguishes successive
    /// connections of the same user.
    pub fn conn_id(&self) -> Uuid {
        self.conn_id
    }

    pub fn user_id(&self) -> i64 {
        self.user_id
    }

    pub fn room_id(&self) -> Option<i64> {
        self.room_id
    }

    pub fn state(&self) -> ClientState {
        ClientState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Subscribe to the done signal.
    pub fn done(&self) -> watch::Receiver<bool> {
        self.done.subscribe()
    }

    pub fn is_done(&self) -> bool {
        *self.done.borrow()
    }

    /// Attempt a non-blocking enqueue. Never waits for queue space.
    pub fn try_enqueue(&self, payload: Bytes) -> Delivery {
        let outbound = self.outbound.read().unwrap_or_else(PoisonError::into_inner);
        match outbound.as_ref() {
            None => Delivery::Closed,
            Some(tx) => match tx.try_send(payload) {
                Ok(()) => Delivery::Queued,
                Err(mpsc::error::TrySendError::Full(_)) => Delivery::Dropped,
                Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
            },
        }
    }

    /// Close the outbound queue and signal `done`.
    ///
    /// Returns `true` only for the call that actually performed the close;
    /// every later call is a no-op returning `false`.
    pub fn close(&self) -> bool {
        let sender = self
            .outbound
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if sender.is_none() {
            return false;
        }
        // Dropping the only sender ends the writer's stream once drained.
        drop(sender);
        self.set_state(ClientState::Closed);
        self.done.send_replace(true);
        true
    }

    pub(crate) fn mark_active(&self) {
        // A client closed before the hub got to it stays closed.
        let _ = self.state.compare_exchange(
            ClientState::Connecting as u8,
            ClientState::Active as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    pub(crate) fn mark_unregistering(&self) {
        let _ = self.state.compare_exchange(
            ClientState::Active as u8,
            ClientState::Unregistering as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    fn set_state(&self, state: ClientState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("conn_id", &self.conn_id)
            .field("user_id", &self.user_id)
            .field("room_id", &self.room_id)
            .field("state", &self.state())
            .finish()
    }
}

/// Resolves once `done` has been signalled (or its sender is gone).
pub async fn revoked(mut done: watch::Receiver<bool>) {
    while !*done.borrow_and_update() {
        if done.changed().await.is_err() {
            return;
        }
    }
}
