#![forbid(unsafe_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parley_domain::RoomKey;
use parley_protocol::ServerEvent;
use tokio::sync::{Mutex, mpsc};
use tracing::debug;

/// Per-room hub that fans out server events to member connections.
///
/// Membership is an explicit map of room → connection senders; fan-out
/// delivers to the membership snapshot at publish time. A full or closed
/// subscriber queue never blocks delivery to the rest.
#[derive(Clone)]
pub struct RoomHub {
	inner: Arc<Mutex<Inner>>,
	cfg: RoomHubConfig,
}

/// Configuration for `RoomHub`.
#[derive(Debug, Clone)]
pub struct RoomHubConfig {
	pub debug_logs: bool,
}

impl Default for RoomHubConfig {
	fn default() -> Self {
		Self { debug_logs: false }
	}
}

#[derive(Default)]
struct Inner {
	rooms: HashMap<RoomKey, RoomEntry>,
	rooms_by_conn: HashMap<u64, HashSet<RoomKey>>,
}

#[derive(Default)]
struct RoomEntry {
	members: HashMap<u64, mpsc::Sender<ServerEvent>>,
}

impl RoomHub {
	pub fn new(cfg: RoomHubConfig) -> Self {
		Self {
			inner: Arc::new(Mutex::new(Inner::default())),
			cfg,
		}
	}

	/// Add a connection to a room. Joining twice replaces the sender.
	pub async fn join(&self, room: RoomKey, conn_id: u64, tx: mpsc::Sender<ServerEvent>) {
		let mut inner = self.inner.lock().await;
		inner.rooms.entry(room).or_default().members.insert(conn_id, tx);
		inner.rooms_by_conn.entry(conn_id).or_default().insert(room);

		if self.cfg.debug_logs {
			let members = inner.rooms.get(&room).map(|e| e.members.len()).unwrap_or(0);
			debug!(room = %room, conn_id, members, "room hub: joined");
		}
	}

	/// Remove a connection from a room. Returns whether it was a member.
	pub async fn leave(&self, room: &RoomKey, conn_id: u64) -> bool {
		let mut inner = self.inner.lock().await;
		inner.leave_one(room, conn_id)
	}

	/// Remove a connection from every room it joined; returns those rooms.
	pub async fn leave_all(&self, conn_id: u64) -> Vec<RoomKey> {
		let mut inner = self.inner.lock().await;
		let Some(rooms) = inner.rooms_by_conn.get(&conn_id).cloned() else {
			return Vec::new();
		};

		let mut left = Vec::with_capacity(rooms.len());
		for room in rooms {
			if inner.leave_one(&room, conn_id) {
				left.push(room);
			}
		}
		left
	}

	#[allow(dead_code)]
	pub async fn is_member(&self, room: &RoomKey, conn_id: u64) -> bool {
		let inner = self.inner.lock().await;
		inner
			.rooms
			.get(room)
			.map(|e| e.members.contains_key(&conn_id))
			.unwrap_or(false)
	}

	/// Publish to every member of the room.
	pub async fn broadcast(&self, room: &RoomKey, event: ServerEvent) -> usize {
		self.publish(room, event, None).await
	}

	/// Publish to every member except the originating connection.
	pub async fn broadcast_except(&self, room: &RoomKey, except_conn: u64, event: ServerEvent) -> usize {
		self.publish(room, event, Some(except_conn)).await
	}

	async fn publish(&self, room: &RoomKey, event: ServerEvent, except: Option<u64>) -> usize {
		let mut inner = self.inner.lock().await;
		let Some(entry) = inner.rooms.get_mut(room) else {
			return 0;
		};

		let mut delivered = 0usize;
		let mut dropped = 0usize;
		let mut closed: Vec<u64> = Vec::new();

		for (conn_id, tx) in entry.members.iter() {
			if Some(*conn_id) == except {
				continue;
			}

			match tx.try_send(event.clone()) {
				Ok(()) => delivered += 1,
				Err(mpsc::error::TrySendError::Full(_)) => dropped += 1,
				Err(mpsc::error::TrySendError::Closed(_)) => closed.push(*conn_id),
			}
		}

		for conn_id in closed {
			inner.leave_one(room, conn_id);
		}

		if dropped > 0 {
			metrics::counter!("parley_server_fanout_dropped_total").increment(dropped as u64);
			if self.cfg.debug_logs {
				debug!(room = %room, dropped, "room hub: dropped due to full member queues");
			}
		}

		delivered
	}

	/// Snapshot of member counts per room.
	#[allow(dead_code)]
	pub async fn member_counts(&self) -> HashMap<RoomKey, usize> {
		let inner = self.inner.lock().await;
		inner.rooms.iter().map(|(k, v)| (*k, v.members.len())).collect()
	}
}

impl Inner {
	fn leave_one(&mut self, room: &RoomKey, conn_id: u64) -> bool {
		let mut was_member = false;
		if let Some(entry) = self.rooms.get_mut(room) {
			was_member = entry.members.remove(&conn_id).is_some();
			if entry.members.is_empty() {
				self.rooms.remove(room);
			}
		}
		if let Some(set) = self.rooms_by_conn.get_mut(&conn_id) {
			set.remove(room);
			if set.is_empty() {
				self.rooms_by_conn.remove(&conn_id);
			}
		}
		was_member
	}
}
