//! Best-effort delivery from arbitrary caller tasks.
//!
//! These take the shared side of the registry lock, never mutate the
//! registry, and never wait on a client's queue: a full queue drops the
//! payload, a missing client is simply offline.

use bytes::Bytes;

use super::{Delivery, Hub};

impl Hub {
    /// Enqueue `payload` for the client registered under `user_id`.
    pub fn send_to_user(&self, user_id: i64, payload: Bytes) -> Delivery {
        let registry = self.shared.read();
        let Some(client) = registry.clients.get(&user_id) else {
            return Delivery::Offline;
        };

        let outcome = client.try_enqueue(payload);
        if outcome == Delivery::Dropped {
            tracing::debug!(user_id, "Outbound queue full, message dropped");
        }
        outcome
    }

    /// Enqueue `payload` for each listed user. Returns how many were queued.
    pub fn send_to_users(&self, user_ids: &[i64], payload: Bytes) -> usize {
        let registry = self.shared.read();
        user_ids
            .iter()
            .filter_map(|id| registry.clients.get(id))
            .filter(|client| client.try_enqueue(payload.clone()).is_queued())
            .count()
    }

    /// Enqueue `payload` for every member of `room_id` at the time of the call.
    /// Returns how many were queued.
    pub fn broadcast_to_room(&self, room_id: i64, payload: Bytes) -> usize {
        let registry = self.shared.read();
        let Some(members) = registry.rooms.get(&room_id) else {
            return 0;
        };

        let delivered = members
            .values()
            .filter(|client| client.try_enqueue(payload.clone()).is_queued())
            .count();
        if delivered < members.len() {
            tracing::debug!(
                room_id,
                members = members.len(),
                delivered,
                "Room broadcast skipped slow or closed clients"
            );
        }
        delivered
    }
}
