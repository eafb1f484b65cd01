#![forbid(unsafe_code)]

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;
use parley_domain::{PresenceStatus, UserId};
use parley_util::time::unix_ms_now;

/// Presence snapshot for one principal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceView {
	pub status: PresenceStatus,
	pub last_seen: i64,
	pub live_connections: usize,
}

#[derive(Debug)]
struct Entry {
	status: PresenceStatus,
	last_seen: i64,
	conns: HashSet<u64>,
}

/// Tracks each principal's live connections and displayed status.
///
/// Mutated only by connection lifecycle events and explicit status changes;
/// offline is derived from an empty live-connection set, never requested.
#[derive(Default)]
pub struct PresenceTracker {
	inner: Mutex<HashMap<UserId, Entry>>,
}

impl PresenceTracker {
	pub fn new() -> Self {
		Self::default()
	}

	/// Register a live connection. Returns true when this was the
	/// principal's first live connection (offline → online transition).
	pub fn connection_opened(&self, user_id: UserId, conn_id: u64) -> bool {
		let now = unix_ms_now();
		let mut inner = self.inner.lock();
		let entry = inner.entry(user_id).or_insert_with(|| Entry {
			status: PresenceStatus::Offline,
			last_seen: now,
			conns: HashSet::new(),
		});

		let was_offline = entry.conns.is_empty();
		entry.conns.insert(conn_id);
		entry.last_seen = now;
		if was_offline {
			entry.status = PresenceStatus::Online;
		}
		was_offline
	}

	/// Remove a live connection. Returns true when the live-connection set
	/// became empty (online → offline transition).
	pub fn connection_closed(&self, user_id: UserId, conn_id: u64) -> bool {
		let now = unix_ms_now();
		let mut inner = self.inner.lock();
		let Some(entry) = inner.get_mut(&user_id) else {
			return false;
		};

		entry.conns.remove(&conn_id);
		entry.last_seen = now;
		if entry.conns.is_empty() {
			entry.status = PresenceStatus::Offline;
			true
		} else {
			false
		}
	}

	/// Explicit status override; does not touch the live-connection set.
	/// Returns the new last-seen timestamp.
	pub fn set_status(&self, user_id: UserId, status: PresenceStatus) -> i64 {
		let now = unix_ms_now();
		let mut inner = self.inner.lock();
		let entry = inner.entry(user_id).or_insert_with(|| Entry {
			status,
			last_seen: now,
			conns: HashSet::new(),
		});
		entry.status = status;
		entry.last_seen = now;
		now
	}

	#[allow(dead_code)]
	pub fn status_of(&self, user_id: UserId) -> PresenceStatus {
		self.inner
			.lock()
			.get(&user_id)
			.map(|e| e.status)
			.unwrap_or(PresenceStatus::Offline)
	}

	#[allow(dead_code)]
	pub fn view(&self, user_id: UserId) -> Option<PresenceView> {
		self.inner.lock().get(&user_id).map(|e| PresenceView {
			status: e.status,
			last_seen: e.last_seen,
			live_connections: e.conns.len(),
		})
	}
}
