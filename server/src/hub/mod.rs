//! In-memory connection registry and fan-out engine.
//!
//! All mutation of the registry happens on a single control loop
//! ([`HubLoop::run`]) fed by [`HubCommand`]s. Dispatch calls
//! (see [`dispatch`]) take the shared side of the same lock and never mutate.

pub mod client;
pub mod dispatch;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

pub use client::{Client, ClientState, Delivery, DEFAULT_OUTBOUND_CAPACITY};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HubError {
    #[error("hub has been stopped")]
    Stopped,
}

/// Control events processed serially by the hub loop.
pub enum HubCommand {
    Register {
        client: Arc<Client>,
        ack: oneshot::Sender<()>,
    },
    Unregister {
        client: Arc<Client>,
        ack: oneshot::Sender<()>,
    },
    /// Deliver to every registered client, regardless of room.
    Broadcast(Bytes),
    Stop {
        ack: oneshot::Sender<()>,
    },
}

/// Canonical connection state. Every client in `rooms` is also in `clients`.
#[derive(Default)]
pub(crate) struct Registry {
    pub(crate) clients: HashMap<i64, Arc<Client>>,
    pub(crate) rooms: HashMap<i64, HashMap<Uuid, Arc<Client>>>,
}

impl Registry {
    fn leave_room(&mut self, client: &Client) {
        let Some(room_id) = client.room_id() else {
            return;
        };
        if let Some(members) = self.rooms.get_mut(&room_id) {
            members.remove(&client.conn_id());
            if members.is_empty() {
                self.rooms.remove(&room_id);
            }
        }
    }
}

#[derive(Default)]
struct Shared {
    registry: RwLock<Registry>,
    stopped: AtomicBool,
}

impl Shared {
    fn read(&self) -> RwLockReadGuard<'_, Registry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Registry> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Cloneable handle to a running hub.
#[derive(Clone)]
pub struct Hub {
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<HubCommand>,
}

/// The single consumer of [`HubCommand`]s. Owns all registry writes.
pub struct HubLoop {
    shared: Arc<Shared>,
    commands: mpsc::UnboundedReceiver<HubCommand>,
}

impl Hub {
    /// Create a hub handle and the loop that must be driven for it to work.
    pub fn new() -> (Self, HubLoop) {
        let shared = Arc::new(Shared::default());
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                shared: shared.clone(),
                commands: tx,
            },
            HubLoop {
                shared,
                commands: rx,
            },
        )
    }

    /// Create a hub and spawn its loop on the current runtime.
    pub fn spawn() -> (Self, JoinHandle<()>) {
        let (hub, hub_loop) = Self::new();
        let handle = tokio::spawn(hub_loop.run());
        (hub, handle)
    }

    /// Submit a client and wait until the loop has applied it.
    ///
    /// After `stop` the client is closed instead and `Stopped` is returned.
    pub async fn register(&self, client: Arc<Client>) -> Result<(), HubError> {
        let (ack, applied) = oneshot::channel();
        let command = HubCommand::Register {
            client: client.clone(),
            ack,
        };
        let result = self.submit(command, applied).await;
        if result.is_err() {
            client.close();
        }
        result
    }

    /// Remove a client. Absent or already-replaced clients are a no-op.
    pub async fn unregister(&self, client: &Arc<Client>) -> Result<(), HubError> {
        let (ack, applied) = oneshot::channel();
        let command = HubCommand::Unregister {
            client: client.clone(),
            ack,
        };
        self.submit(command, applied).await
    }

    /// Queue a payload for delivery to every registered client.
    pub fn broadcast(&self, payload: Bytes) -> Result<(), HubError> {
        if self.is_stopped() {
            return Err(HubError::Stopped);
        }
        self.commands
            .send(HubCommand::Broadcast(payload))
            .map_err(|_| HubError::Stopped)
    }

    /// Close every live client and terminate the loop. Calling it again, or
    /// after the loop has exited, returns immediately.
    pub async fn stop(&self) {
        let (ack, applied) = oneshot::channel();
        let _ = self.submit(HubCommand::Stop { ack }, applied).await;
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::Acquire) || self.commands.is_closed()
    }

    /// Number of registered clients.
    pub fn client_count(&self) -> usize {
        self.shared.read().clients.len()
    }

    /// Number of rooms with at least one member.
    pub fn room_count(&self) -> usize {
        self.shared.read().rooms.len()
    }

    pub fn room_size(&self, room_id: i64) -> usize {
        self.shared
            .read()
            .rooms
            .get(&room_id)
            .map(|members| members.len())
            .unwrap_or(0)
    }

    /// The connection currently registered for `user_id`, if any.
    pub fn connection_id(&self, user_id: i64) -> Option<Uuid> {
        self.shared
            .read()
            .clients
            .get(&user_id)
            .map(|client| client.conn_id())
    }

    async fn submit(
        &self,
        command: HubCommand,
        applied: oneshot::Receiver<()>,
    ) -> Result<(), HubError> {
        if self.is_stopped() {
            return Err(HubError::Stopped);
        }
        self.commands.send(command).map_err(|_| HubError::Stopped)?;
        // The ack is dropped unanswered if the loop exits first.
        applied.await.map_err(|_| HubError::Stopped)
    }
}

impl HubLoop {
    /// Process control events until `Stop` arrives or every handle is dropped.
    pub async fn run(mut self) {
        tracing::info!("Hub started");

        while let Some(command) = self.commands.recv().await {
            match command {
                HubCommand::Register { client, ack } => {
                    self.register(client);
                    let _ = ack.send(());
                }
                HubCommand::Unregister { client, ack } => {
                    self.unregister(&client);
                    let _ = ack.send(());
                }
                HubCommand::Broadcast(payload) => {
                    self.broadcast(payload);
                }
                HubCommand::Stop { ack } => {
                    tracing::info!("Hub stopping: closing all client connections");
                    self.cleanup();
                    let _ = ack.send(());
                    return;
                }
            }
        }

        tracing::info!("All hub handles dropped, shutting down");
        self.cleanup();
    }

    fn register(&self, client: Arc<Client>) {
        let mut registry = self.shared.write();

        if let Some(previous) = registry.clients.insert(client.user_id(), client.clone()) {
            if previous.conn_id() != client.conn_id() {
                registry.leave_room(&previous);
                previous.close();
                tracing::info!(
                    user_id = previous.user_id(),
                    old_conn = %previous.conn_id(),
                    new_conn = %client.conn_id(),
                    "Replaced existing connection, previous one closed"
                );
            }
        }

        if let Some(room_id) = client.room_id() {
            registry
                .rooms
                .entry(room_id)
                .or_default()
                .insert(client.conn_id(), client.clone());
            tracing::info!(
                user_id = client.user_id(),
                room_id,
                members = registry.rooms.get(&room_id).map(|m| m.len()).unwrap_or(0),
                "Client joined room"
            );
        } else {
            tracing::info!(user_id = client.user_id(), "Client connected");
        }

        client.mark_active();
    }

    fn unregister(&self, client: &Arc<Client>) {
        let mut registry = self.shared.write();

        let is_current = registry
            .clients
            .get(&client.user_id())
            .is_some_and(|current| current.conn_id() == client.conn_id());
        if !is_current {
            tracing::debug!(
                user_id = client.user_id(),
                conn_id = %client.conn_id(),
                "Unregister for a connection that is not registered"
            );
            return;
        }

        client.mark_unregistering();
        registry.leave_room(client);
        registry.clients.remove(&client.user_id());
        client.close();

        tracing::info!(
            user_id = client.user_id(),
            room_id = ?client.room_id(),
            remaining = registry.clients.len(),
            "Client unregistered"
        );
    }

    fn broadcast(&self, payload: Bytes) {
        let registry = self.shared.read();
        let mut dropped = 0usize;
        for client in registry.clients.values() {
            if !client.try_enqueue(payload.clone()).is_queued() {
                dropped += 1;
            }
        }
        if dropped > 0 {
            tracing::debug!(
                recipients = registry.clients.len(),
                dropped,
                "Broadcast skipped clients with full or closed queues"
            );
        }
    }

    fn cleanup(&self) {
        let mut registry = self.shared.write();
        let mut closed = 0usize;
        for (_, client) in registry.clients.drain() {
            if client.close() {
                closed += 1;
            }
        }
        registry.rooms.clear();
        self.shared.stopped.store(true, Ordering::Release);
        tracing::info!(closed, "Hub cleanup complete: all connections closed");
    }
}
