#![forbid(unsafe_code)]

use std::collections::HashSet;
use std::sync::Arc;

use parley_directory::{DirectoryStore, MessageDraft, MessagePatch};
use parley_domain::{ChannelId, MessageId, MessageKind, PresenceStatus, Principal, RoomKey};
use parley_protocol::{ClientEvent, ServerEvent, WireMessage};
use parley_util::time::unix_ms_now;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::server::audit::AuditService;
use crate::server::error::ChatError;
use crate::server::guard::AccessGuard;
use crate::server::handshake::SessionTicket;
use crate::server::presence::PresenceTracker;
use crate::server::rate_limit::{ActionKind, RateLimiter};
use crate::server::room_hub::RoomHub;

/// Per-connection lifecycle. There is no reconnect/resume state: a dropped
/// connection is fully torn down and a new handshake starts over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnPhase {
	Connected,
	Closing,
	Closed,
}

/// Per-connection routing state: the principal, the joined room set, and
/// the outbound queue events are fanned into.
pub struct Session {
	pub conn_id: u64,
	pub principal: Principal,
	pub rooms: HashSet<RoomKey>,
	pub phase: ConnPhase,
	outbound: mpsc::Sender<ServerEvent>,
}

impl Session {
	pub fn new(conn_id: u64, principal: Principal, outbound: mpsc::Sender<ServerEvent>) -> Self {
		Self {
			conn_id,
			principal,
			rooms: HashSet::new(),
			phase: ConnPhase::Connected,
			outbound,
		}
	}

	/// Sender handle used to register this connection in rooms.
	pub fn outbound_sender(&self) -> mpsc::Sender<ServerEvent> {
		self.outbound.clone()
	}

	/// Queue an event for this connection; drops (with a metric) rather
	/// than blocking when the client cannot keep up.
	pub fn reply(&self, event: ServerEvent) {
		if self.outbound.try_send(event).is_err() {
			metrics::counter!("parley_server_reply_dropped_total").increment(1);
			debug!(conn_id = self.conn_id, "dropped reply to slow or closed connection");
		}
	}
}

/// The central dispatcher: every inbound event passes rate limiting and
/// access checks before its handler runs, then fans out by room.
pub struct EventRouter {
	directory: Arc<dyn DirectoryStore>,
	guard: AccessGuard,
	limiter: Arc<RateLimiter>,
	presence: Arc<PresenceTracker>,
	rooms: RoomHub,
	audit: Arc<AuditService>,
}

impl EventRouter {
	pub fn new(
		directory: Arc<dyn DirectoryStore>,
		limiter: Arc<RateLimiter>,
		presence: Arc<PresenceTracker>,
		rooms: RoomHub,
		audit: Arc<AuditService>,
	) -> Self {
		let guard = AccessGuard::new(Arc::clone(&directory));
		Self {
			directory,
			guard,
			limiter,
			presence,
			rooms,
			audit,
		}
	}

	#[allow(dead_code)]
	pub fn presence(&self) -> &PresenceTracker {
		&self.presence
	}

	#[allow(dead_code)]
	pub fn rooms(&self) -> &RoomHub {
		&self.rooms
	}

	/// Register a freshly handshaken session: join its rooms and mark the
	/// principal online (broadcasting the transition on first connection).
	pub async fn register_session(&self, session: &mut Session, ticket: &SessionTicket) {
		for room in &ticket.rooms {
			session.rooms.insert(*room);
			self.rooms.join(*room, session.conn_id, session.outbound_sender()).await;
		}

		let first_connection = self.presence.connection_opened(session.principal.user_id, session.conn_id);
		if first_connection {
			self.rooms
				.broadcast(
					&session.principal.tenant_room(),
					ServerEvent::UserStatusChange {
						user_id: session.principal.user_id,
						status: PresenceStatus::Online,
						last_seen: unix_ms_now(),
					},
				)
				.await;
		}

		metrics::gauge!("parley_server_active_sessions").increment(1.0);
	}

	/// Dispatch one inbound event. Per-connection ordering is the caller's
	/// concern (one sequential loop per connection); this method only ever
	/// suspends on directory I/O.
	pub async fn handle_event(&self, session: &mut Session, event: ClientEvent) {
		if session.phase != ConnPhase::Connected {
			return;
		}

		metrics::counter!("parley_server_events_in_total", "event" => event.kind_str()).increment(1);

		// typing is high-frequency and low-stakes: rate-limit and access
		// failures are swallowed instead of spamming the client
		let silent = matches!(event, ClientEvent::TypingStart { .. } | ClientEvent::TypingStop { .. });

		let result = match event.validate() {
			Err(e) => Err(ChatError::from(e)),
			Ok(()) => match event {
				ClientEvent::Hello { .. } => Err(ChatError::InvalidPayload("unexpected hello".to_string())),
				ClientEvent::JoinChannel { channel_id } => self.on_join(session, channel_id).await,
				ClientEvent::LeaveChannel { channel_id } => self.on_leave(session, channel_id).await,
				ClientEvent::SendMessage {
					channel_id,
					content,
					kind,
					reply_to,
					temp_id,
				} => {
					self.on_send(session, channel_id, content, kind, reply_to, temp_id)
						.await
				}
				ClientEvent::EditMessage {
					channel_id,
					message_id,
					content,
				} => self.on_edit(session, channel_id, message_id, content).await,
				ClientEvent::DeleteMessage { channel_id, message_id } => {
					self.on_delete(session, channel_id, message_id).await
				}
				ClientEvent::TypingStart { channel_id } => self.on_typing(session, channel_id, true).await,
				ClientEvent::TypingStop { channel_id } => self.on_typing(session, channel_id, false).await,
				ClientEvent::MarkAsRead { channel_id } => self.on_mark_read(session, channel_id).await,
				ClientEvent::StatusChange { status } => self.on_status_change(session, status).await,
			},
		};

		if let Err(e) = result {
			metrics::counter!("parley_server_events_rejected_total", "reason" => e.kind_str()).increment(1);
			debug!(conn_id = session.conn_id, error = %e, "event rejected");
			if !silent {
				session.reply(ServerEvent::error(e.to_string()));
			}
		}
	}

	/// Tear a connection down: vacate rooms, release the presence slot, and
	/// broadcast offline when the principal's last connection drops.
	pub async fn disconnect(&self, session: &mut Session) {
		if session.phase == ConnPhase::Closed {
			return;
		}
		session.phase = ConnPhase::Closing;

		self.rooms.leave_all(session.conn_id).await;
		session.rooms.clear();

		let went_offline = self
			.presence
			.connection_closed(session.principal.user_id, session.conn_id);
		if went_offline {
			self.rooms
				.broadcast(
					&session.principal.tenant_room(),
					ServerEvent::UserStatusChange {
						user_id: session.principal.user_id,
						status: PresenceStatus::Offline,
						last_seen: unix_ms_now(),
					},
				)
				.await;
		}

		session.phase = ConnPhase::Closed;
		metrics::gauge!("parley_server_active_sessions").decrement(1.0);
	}

	async fn on_join(&self, session: &mut Session, channel_id: ChannelId) -> Result<(), ChatError> {
		if !self.limiter.allow(session.principal.user_id, ActionKind::Join) {
			return Err(ChatError::RateLimited);
		}
		if !self.guard.can_access(&session.principal, channel_id).await? {
			return Err(ChatError::AccessDenied);
		}

		let room = RoomKey::Channel(channel_id);
		let newly_joined = session.rooms.insert(room);
		if newly_joined {
			self.rooms.join(room, session.conn_id, session.outbound_sender()).await;
		}

		session.reply(ServerEvent::JoinedChannel { channel_id });

		if newly_joined {
			self.rooms
				.broadcast_except(
					&room,
					session.conn_id,
					ServerEvent::UserJoinedChannel {
						channel_id,
						user_id: session.principal.user_id,
						user_name: session.principal.display_name(),
					},
				)
				.await;
		}

		Ok(())
	}

	async fn on_leave(&self, session: &mut Session, channel_id: ChannelId) -> Result<(), ChatError> {
		let room = RoomKey::Channel(channel_id);

		// leaving a room the connection is not in is a no-op: no error, no
		// duplicate notification
		if !session.rooms.remove(&room) {
			return Ok(());
		}

		self.rooms.leave(&room, session.conn_id).await;
		session.reply(ServerEvent::LeftChannel { channel_id });

		self.rooms
			.broadcast_except(
				&room,
				session.conn_id,
				ServerEvent::UserLeftChannel {
					channel_id,
					user_id: session.principal.user_id,
					user_name: session.principal.display_name(),
				},
			)
			.await;

		Ok(())
	}

	#[allow(clippy::too_many_arguments)]
	async fn on_send(
		&self,
		session: &mut Session,
		channel_id: ChannelId,
		content: String,
		kind: Option<MessageKind>,
		reply_to: Option<MessageId>,
		temp_id: Option<String>,
	) -> Result<(), ChatError> {
		if !self.limiter.allow(session.principal.user_id, ActionKind::Message) {
			return Err(ChatError::RateLimited);
		}
		if !self.guard.can_access(&session.principal, channel_id).await? {
			return Err(ChatError::AccessDenied);
		}

		// a reply must anchor to a live message in the same channel
		if let Some(reply_id) = reply_to {
			let target = self.directory.find_message(reply_id, channel_id).await?;
			if !target.is_some_and(|m| m.reply_target_in(channel_id)) {
				return Err(ChatError::ReplyTargetInvalid);
			}
		}

		let draft = MessageDraft {
			channel_id,
			tenant_id: session.principal.tenant_id,
			sender_id: session.principal.user_id,
			sender_name: session.principal.display_name(),
			content,
			kind: kind.unwrap_or(MessageKind::Text),
			reply_to,
		};

		let message = self.directory.create_message(draft).await?;

		if let Err(e) = self
			.directory
			.update_channel_activity(channel_id, message.id, message.created_at)
			.await
		{
			warn!(channel_id = %channel_id, error = %e, "failed to bump channel activity");
		}

		self.record_audit(session, channel_id, "send", Some(message.id)).await;

		let wire = WireMessage::from(&message);
		self.rooms
			.broadcast_except(
				&RoomKey::Channel(channel_id),
				session.conn_id,
				ServerEvent::NewMessage { message: wire.clone() },
			)
			.await;

		session.reply(ServerEvent::MessageSent {
			temp_id,
			message: wire,
		});

		Ok(())
	}

	async fn on_edit(
		&self,
		session: &mut Session,
		channel_id: ChannelId,
		message_id: MessageId,
		content: String,
	) -> Result<(), ChatError> {
		if !self.guard.can_access(&session.principal, channel_id).await? {
			return Err(ChatError::AccessDenied);
		}

		let message = self
			.directory
			.find_message(message_id, channel_id)
			.await?
			.ok_or(ChatError::NotEditable)?;

		let now = unix_ms_now();
		if !message.editable_by(session.principal.user_id, now) {
			return Err(ChatError::NotEditable);
		}

		let updated = self
			.directory
			.update_message(message_id, MessagePatch::Edit { content, at_ms: now })
			.await?;

		self.record_audit(session, channel_id, "edit", Some(message_id)).await;

		self.rooms
			.broadcast(
				&RoomKey::Channel(channel_id),
				ServerEvent::MessageEdited {
					channel_id,
					message: WireMessage::from(&updated),
				},
			)
			.await;

		Ok(())
	}

	async fn on_delete(
		&self,
		session: &mut Session,
		channel_id: ChannelId,
		message_id: MessageId,
	) -> Result<(), ChatError> {
		if !self.guard.can_access(&session.principal, channel_id).await? {
			return Err(ChatError::AccessDenied);
		}

		let message = self
			.directory
			.find_message(message_id, channel_id)
			.await?
			.ok_or(ChatError::NotFound)?;

		if !message.deletable_by(session.principal.user_id, session.principal.role) {
			return Err(ChatError::AccessDenied);
		}

		// always a soft tombstone so reply chains stay resolvable
		self.directory
			.update_message(
				message_id,
				MessagePatch::Delete {
					by: session.principal.user_id,
					at_ms: unix_ms_now(),
				},
			)
			.await?;

		self.record_audit(session, channel_id, "delete", Some(message_id)).await;

		self.rooms
			.broadcast(
				&RoomKey::Channel(channel_id),
				ServerEvent::MessageDeleted {
					channel_id,
					message_id,
					deleted_by: session.principal.user_id,
				},
			)
			.await;

		Ok(())
	}

	async fn on_typing(&self, session: &mut Session, channel_id: ChannelId, start: bool) -> Result<(), ChatError> {
		if start && !self.limiter.allow(session.principal.user_id, ActionKind::Typing) {
			return Ok(());
		}
		match self.guard.can_access(&session.principal, channel_id).await {
			Ok(true) => {}
			// swallowed, including directory failures
			Ok(false) | Err(_) => return Ok(()),
		}

		let event = if start {
			ServerEvent::UserTyping {
				channel_id,
				user_id: session.principal.user_id,
				user_name: session.principal.display_name(),
			}
		} else {
			ServerEvent::UserStopTyping {
				channel_id,
				user_id: session.principal.user_id,
			}
		};

		self.rooms
			.broadcast_except(&RoomKey::Channel(channel_id), session.conn_id, event)
			.await;

		Ok(())
	}

	async fn on_mark_read(&self, session: &mut Session, channel_id: ChannelId) -> Result<(), ChatError> {
		if !self.guard.can_access(&session.principal, channel_id).await? {
			return Err(ChatError::AccessDenied);
		}

		// TODO: persist per-user read state once the directory grows a
		// read-cursor surface; until then this is broadcast-only
		self.rooms
			.broadcast_except(
				&RoomKey::Channel(channel_id),
				session.conn_id,
				ServerEvent::MessagesRead {
					channel_id,
					user_id: session.principal.user_id,
					read_at: unix_ms_now(),
				},
			)
			.await;

		Ok(())
	}

	async fn on_status_change(&self, session: &mut Session, status: PresenceStatus) -> Result<(), ChatError> {
		// validate() already rejected non-selectable statuses
		let last_seen = self.presence.set_status(session.principal.user_id, status);

		self.rooms
			.broadcast(
				&session.principal.tenant_room(),
				ServerEvent::UserStatusChange {
					user_id: session.principal.user_id,
					status,
					last_seen,
				},
			)
			.await;

		Ok(())
	}

	async fn record_audit(&self, session: &Session, channel_id: ChannelId, action: &str, message_id: Option<MessageId>) {
		if let Err(e) = self
			.audit
			.record_message_event(
				session.principal.tenant_id,
				channel_id,
				session.principal.user_id,
				action,
				message_id,
			)
			.await
		{
			warn!(action, error = %e, "audit write failed");
		}
	}
}
