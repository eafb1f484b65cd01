#![forbid(unsafe_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use parley_domain::UserId;
use tracing::debug;

/// Sweep cadence and idle TTL for garbage collection of stale windows.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);
const IDLE_TTL: Duration = Duration::from_secs(5 * 60);

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(60 * 60);

/// Rate-limited action classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
	Message,
	Typing,
	Join,
	ChannelCreate,
}

impl ActionKind {
	/// Stable name for metrics labels.
	pub const fn as_str(self) -> &'static str {
		match self {
			ActionKind::Message => "message",
			ActionKind::Typing => "typing",
			ActionKind::Join => "join",
			ActionKind::ChannelCreate => "channel_create",
		}
	}
}

/// Per-action ceilings; a ceiling of 0 disables limiting for that action.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
	pub message_per_minute: u32,
	pub typing_per_minute: u32,
	pub join_per_minute: u32,
	pub channel_create_per_hour: u32,
}

impl Default for RateLimitConfig {
	fn default() -> Self {
		Self {
			message_per_minute: 60,
			typing_per_minute: 30,
			join_per_minute: 20,
			channel_create_per_hour: 5,
		}
	}
}

/// Per-principal, per-action sliding-window limiter.
///
/// Process-local and never persisted; a restart resets every window. All
/// operations are non-blocking (a short parking_lot critical section over
/// the window map).
pub struct RateLimiter {
	cfg: RateLimitConfig,
	windows: Mutex<HashMap<(UserId, ActionKind), Window>>,
}

#[derive(Debug, Default)]
struct Window {
	stamps: VecDeque<Instant>,
}

impl RateLimiter {
	pub fn new(cfg: RateLimitConfig) -> Self {
		Self {
			cfg,
			windows: Mutex::new(HashMap::new()),
		}
	}

	const fn limit_for(&self, action: ActionKind) -> (u32, Duration) {
		match action {
			ActionKind::Message => (self.cfg.message_per_minute, MINUTE),
			ActionKind::Typing => (self.cfg.typing_per_minute, MINUTE),
			ActionKind::Join => (self.cfg.join_per_minute, MINUTE),
			ActionKind::ChannelCreate => (self.cfg.channel_create_per_hour, HOUR),
		}
	}

	/// Check-and-record: returns true and records a timestamp when under the
	/// ceiling; a denied call records nothing.
	pub fn allow(&self, user_id: UserId, action: ActionKind) -> bool {
		self.allow_at(user_id, action, Instant::now())
	}

	pub(crate) fn allow_at(&self, user_id: UserId, action: ActionKind, now: Instant) -> bool {
		let (ceiling, span) = self.limit_for(action);
		if ceiling == 0 {
			return true;
		}

		let mut windows = self.windows.lock();
		let window = windows.entry((user_id, action)).or_default();

		while let Some(front) = window.stamps.front() {
			if now.duration_since(*front) >= span {
				window.stamps.pop_front();
			} else {
				break;
			}
		}

		if window.stamps.len() < ceiling as usize {
			window.stamps.push_back(now);
			true
		} else {
			metrics::counter!("parley_server_rate_limited_total", "action" => action.as_str()).increment(1);
			false
		}
	}

	/// Drop windows whose newest timestamp is older than the idle TTL.
	pub fn sweep(&self) {
		self.sweep_at(Instant::now());
	}

	pub(crate) fn sweep_at(&self, now: Instant) {
		let mut windows = self.windows.lock();
		let before = windows.len();
		windows.retain(|_, w| {
			w.stamps
				.back()
				.is_some_and(|last| now.duration_since(*last) < IDLE_TTL)
		});

		let removed = before - windows.len();
		if removed > 0 {
			debug!(removed, remaining = windows.len(), "rate limiter sweep");
		}
	}

	#[allow(dead_code)]
	pub(crate) fn tracked_keys(&self) -> usize {
		self.windows.lock().len()
	}

	/// Spawn the periodic sweep task.
	pub fn spawn_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
		let limiter = Arc::clone(self);
		tokio::spawn(async move {
			let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
			ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
			// interval's first tick completes immediately
			ticker.tick().await;
			loop {
				ticker.tick().await;
				limiter.sweep();
			}
		})
	}
}
