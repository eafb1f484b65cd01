#![forbid(unsafe_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parley_directory::{
	DirectoryStore, HmacVerifier, InMemoryDirectory, MessageDraft, MessagePatch, SecretString,
	identity::issue_hmac_token,
};
use parley_domain::{
	Account, Channel, ChannelId, ChannelKind, MESSAGE_EDIT_WINDOW_MS, Message, MessageId, MessageKind,
	PresenceStatus, Role, RoomKey, TenantId, UserId,
};
use parley_protocol::{ClientEvent, ServerEvent};
use parley_util::time::{unix_ms_now, unix_secs_now};
use tokio::sync::mpsc;

use crate::server::audit::AuditService;
use crate::server::handshake::SessionHandshake;
use crate::server::presence::PresenceTracker;
use crate::server::rate_limit::{RateLimitConfig, RateLimiter};
use crate::server::room_hub::{RoomHub, RoomHubConfig};
use crate::server::router::{ConnPhase, EventRouter, Session};

const SECRET: &str = "router-secret";

struct TestBed {
	directory: Arc<InMemoryDirectory>,
	handshake: SessionHandshake,
	router: EventRouter,
	next_conn: AtomicU64,
}

impl TestBed {
	fn new() -> Self {
		let directory = Arc::new(InMemoryDirectory::new());
		let store: Arc<dyn DirectoryStore> = directory.clone();
		let verifier = Arc::new(HmacVerifier::new(SecretString::new(SECRET)));
		let handshake = SessionHandshake::new(verifier, Arc::clone(&store));
		let router = EventRouter::new(
			store,
			Arc::new(RateLimiter::new(RateLimitConfig::default())),
			Arc::new(PresenceTracker::new()),
			RoomHub::new(RoomHubConfig::default()),
			Arc::new(AuditService::disabled()),
		);

		Self {
			directory,
			handshake,
			router,
			next_conn: AtomicU64::new(1),
		}
	}

	fn seed_user(&self, tenant: TenantId, role: Role, first: &str, last: &str) -> UserId {
		let account = Account {
			user_id: UserId::new_v4(),
			tenant_id: Some(tenant),
			role,
			first_name: first.to_string(),
			last_name: last.to_string(),
			active: true,
		};
		let id = account.user_id;
		self.directory.upsert_account(account);
		id
	}

	fn seed_channel(&self, tenant: TenantId, participants: Vec<UserId>) -> ChannelId {
		let channel = Channel {
			id: ChannelId::new_v4(),
			tenant_id: tenant,
			name: "general".to_string(),
			kind: ChannelKind::Group,
			participants,
			project_id: None,
			archived: false,
			private: false,
			allowed_roles: None,
			last_message_id: None,
			last_activity_at: None,
		};
		let id = channel.id;
		self.directory.insert_channel(channel).unwrap();
		id
	}

	async fn seed_message(&self, tenant: TenantId, channel: ChannelId, sender: UserId, content: &str) -> Message {
		self.directory
			.create_message(MessageDraft {
				channel_id: channel,
				tenant_id: tenant,
				sender_id: sender,
				sender_name: "Seeded Sender".to_string(),
				content: content.to_string(),
				kind: MessageKind::Text,
				reply_to: None,
			})
			.await
			.unwrap()
	}

	async fn connect(&self, user: UserId) -> (Session, mpsc::Receiver<ServerEvent>) {
		let token = issue_hmac_token(user, unix_secs_now() + 600, SECRET);
		let ticket = self.handshake.authenticate(Some(&token)).await.expect("handshake");
		let conn_id = self.next_conn.fetch_add(1, Ordering::Relaxed);
		let (tx, rx) = mpsc::channel(512);
		let mut session = Session::new(conn_id, ticket.principal.clone(), tx);
		self.router.register_session(&mut session, &ticket).await;
		(session, rx)
	}
}

fn drain(rx: &mut mpsc::Receiver<ServerEvent>) -> Vec<ServerEvent> {
	let mut out = Vec::new();
	while let Ok(ev) = rx.try_recv() {
		out.push(ev);
	}
	out
}

fn send_msg(channel_id: ChannelId, content: &str, temp_id: Option<&str>) -> ClientEvent {
	ClientEvent::SendMessage {
		channel_id,
		content: content.to_string(),
		kind: None,
		reply_to: None,
		temp_id: temp_id.map(str::to_string),
	}
}

#[tokio::test]
async fn send_message_fans_out_and_echoes_to_sender() {
	let bed = TestBed::new();
	let tenant = TenantId::new_v4();
	let a = bed.seed_user(tenant, Role::Member, "Ada", "Lovelace");
	let b = bed.seed_user(tenant, Role::Member, "Grace", "Hopper");
	let channel = bed.seed_channel(tenant, vec![a, b]);

	let (mut sa, mut rxa) = bed.connect(a).await;
	let (_sb, mut rxb) = bed.connect(b).await;
	drain(&mut rxa);
	drain(&mut rxb);

	bed.router.handle_event(&mut sa, send_msg(channel, "hi", Some("tmp-1"))).await;

	let b_events = drain(&mut rxb);
	let new_message = b_events
		.iter()
		.find_map(|ev| match ev {
			ServerEvent::NewMessage { message } => Some(message.clone()),
			_ => None,
		})
		.expect("B receives new_message");
	assert_eq!(new_message.content, "hi");
	assert_eq!(new_message.sender_id, a);
	assert_eq!(new_message.channel_id, channel);

	let a_events = drain(&mut rxa);
	assert!(
		!a_events.iter().any(|ev| matches!(ev, ServerEvent::NewMessage { .. })),
		"sender gets the echo, not the fan-out"
	);
	let (temp_id, echoed) = a_events
		.iter()
		.find_map(|ev| match ev {
			ServerEvent::MessageSent { temp_id, message } => Some((temp_id.clone(), message.clone())),
			_ => None,
		})
		.expect("A receives message_sent");
	assert_eq!(temp_id.as_deref(), Some("tmp-1"));
	assert_eq!(echoed.id, new_message.id);

	// persisted, and channel activity bumped
	let stored = bed.directory.find_message(new_message.id, channel).await.unwrap().unwrap();
	assert_eq!(stored.content, "hi");
	let ch = bed.directory.find_channel(channel, tenant).await.unwrap().unwrap();
	assert_eq!(ch.last_message_id, Some(new_message.id));
	assert!(ch.last_activity_at.is_some());
}

#[tokio::test]
async fn last_disconnect_broadcasts_offline() {
	let bed = TestBed::new();
	let tenant = TenantId::new_v4();
	let a = bed.seed_user(tenant, Role::Member, "Ada", "Lovelace");
	let b = bed.seed_user(tenant, Role::Member, "Grace", "Hopper");

	let (mut sa, _rxa) = bed.connect(a).await;
	let (_sb, mut rxb) = bed.connect(b).await;
	drain(&mut rxb);

	bed.router.disconnect(&mut sa).await;

	let b_events = drain(&mut rxb);
	assert!(
		b_events.iter().any(|ev| matches!(
			ev,
			ServerEvent::UserStatusChange { user_id, status: PresenceStatus::Offline, .. } if *user_id == a
		)),
		"tenant room hears the offline transition, got: {b_events:?}"
	);

	assert_eq!(bed.router.presence().status_of(a), PresenceStatus::Offline);
	assert_eq!(sa.phase, ConnPhase::Closed);
	assert!(sa.rooms.is_empty());
}

#[tokio::test]
async fn online_broadcast_fires_only_for_the_first_connection() {
	let bed = TestBed::new();
	let tenant = TenantId::new_v4();
	let a = bed.seed_user(tenant, Role::Member, "Ada", "Lovelace");
	let b = bed.seed_user(tenant, Role::Member, "Grace", "Hopper");

	let (_sb, mut rxb) = bed.connect(b).await;
	drain(&mut rxb);

	let (_sa1, _rxa1) = bed.connect(a).await;
	let first = drain(&mut rxb);
	assert_eq!(
		first
			.iter()
			.filter(|ev| matches!(
				ev,
				ServerEvent::UserStatusChange { user_id, status: PresenceStatus::Online, .. } if *user_id == a
			))
			.count(),
		1
	);

	// second device: presence is already online, nothing to announce
	let (_sa2, _rxa2) = bed.connect(a).await;
	assert!(
		drain(&mut rxb)
			.iter()
			.all(|ev| !matches!(ev, ServerEvent::UserStatusChange { user_id, .. } if *user_id == a))
	);
}

#[tokio::test]
async fn multi_device_principal_stays_online_until_last_drop() {
	let bed = TestBed::new();
	let tenant = TenantId::new_v4();
	let a = bed.seed_user(tenant, Role::Member, "Ada", "Lovelace");
	let b = bed.seed_user(tenant, Role::Member, "Grace", "Hopper");

	let (mut sa1, _rxa1) = bed.connect(a).await;
	let (mut sa2, _rxa2) = bed.connect(a).await;
	let (_sb, mut rxb) = bed.connect(b).await;
	drain(&mut rxb);

	bed.router.disconnect(&mut sa1).await;
	assert!(drain(&mut rxb).is_empty(), "no offline broadcast while a device remains");
	assert_eq!(bed.router.presence().status_of(a), PresenceStatus::Online);

	bed.router.disconnect(&mut sa2).await;
	assert!(
		drain(&mut rxb)
			.iter()
			.any(|ev| matches!(ev, ServerEvent::UserStatusChange { status: PresenceStatus::Offline, .. }))
	);
	assert_eq!(bed.router.presence().status_of(a), PresenceStatus::Offline);
}

#[tokio::test]
async fn join_then_leave_notifies_the_room() {
	let bed = TestBed::new();
	let tenant = TenantId::new_v4();
	let a = bed.seed_user(tenant, Role::Member, "Ada", "Lovelace");
	let b = bed.seed_user(tenant, Role::Member, "Grace", "Hopper");

	let (mut sa, mut rxa) = bed.connect(a).await;
	let (mut sb, mut rxb) = bed.connect(b).await;
	drain(&mut rxa);
	drain(&mut rxb);

	// the channel appears after both connected, so neither is in its room
	let channel = bed.seed_channel(tenant, vec![a, b]);

	bed.router.handle_event(&mut sa, ClientEvent::JoinChannel { channel_id: channel }).await;
	assert!(
		drain(&mut rxa)
			.iter()
			.any(|ev| matches!(ev, ServerEvent::JoinedChannel { channel_id } if *channel_id == channel))
	);

	bed.router.handle_event(&mut sb, ClientEvent::JoinChannel { channel_id: channel }).await;
	assert!(
		drain(&mut rxb)
			.iter()
			.any(|ev| matches!(ev, ServerEvent::JoinedChannel { .. }))
	);
	assert!(
		drain(&mut rxa)
			.iter()
			.any(|ev| matches!(ev, ServerEvent::UserJoinedChannel { user_id, .. } if *user_id == b)),
		"existing members hear the join"
	);

	bed.router.handle_event(&mut sa, ClientEvent::LeaveChannel { channel_id: channel }).await;
	assert!(
		drain(&mut rxa)
			.iter()
			.any(|ev| matches!(ev, ServerEvent::LeftChannel { channel_id } if *channel_id == channel))
	);
	assert!(
		drain(&mut rxb)
			.iter()
			.any(|ev| matches!(ev, ServerEvent::UserLeftChannel { user_id, .. } if *user_id == a))
	);
}

#[tokio::test]
async fn leave_without_membership_is_a_silent_no_op() {
	let bed = TestBed::new();
	let tenant = TenantId::new_v4();
	let a = bed.seed_user(tenant, Role::Member, "Ada", "Lovelace");
	let b = bed.seed_user(tenant, Role::Member, "Grace", "Hopper");

	let (mut sa, mut rxa) = bed.connect(a).await;
	let (_sb, mut rxb) = bed.connect(b).await;
	drain(&mut rxa);
	drain(&mut rxb);

	// a is a participant but never joined this post-connect channel's room
	let channel = bed.seed_channel(tenant, vec![a, b]);
	bed.router.handle_event(&mut sa, ClientEvent::LeaveChannel { channel_id: channel }).await;

	assert!(drain(&mut rxa).is_empty(), "no error, no left_channel");
	assert!(drain(&mut rxb).is_empty(), "no duplicate notification");
}

#[tokio::test]
async fn join_is_refused_for_outsiders_and_archived_channels() {
	let bed = TestBed::new();
	let tenant = TenantId::new_v4();
	let a = bed.seed_user(tenant, Role::Member, "Ada", "Lovelace");
	let outsider = bed.seed_user(tenant, Role::Member, "Mallory", "Intruder");

	let (mut sa, mut rxa) = bed.connect(a).await;
	let (mut so, mut rxo) = bed.connect(outsider).await;
	drain(&mut rxa);
	drain(&mut rxo);

	let channel = bed.seed_channel(tenant, vec![a]);

	bed.router.handle_event(&mut so, ClientEvent::JoinChannel { channel_id: channel }).await;
	assert!(
		drain(&mut rxo)
			.iter()
			.any(|ev| matches!(ev, ServerEvent::Error { message } if message == "access denied"))
	);

	bed.directory.set_archived(channel, true);
	bed.router.handle_event(&mut sa, ClientEvent::JoinChannel { channel_id: channel }).await;
	assert!(
		drain(&mut rxa)
			.iter()
			.any(|ev| matches!(ev, ServerEvent::Error { message } if message == "access denied"))
	);
}

#[tokio::test]
async fn sixty_first_send_within_a_minute_is_rejected() {
	let bed = TestBed::new();
	let tenant = TenantId::new_v4();
	let a = bed.seed_user(tenant, Role::Member, "Ada", "Lovelace");
	let b = bed.seed_user(tenant, Role::Member, "Grace", "Hopper");
	let channel = bed.seed_channel(tenant, vec![a, b]);

	let (mut sa, mut rxa) = bed.connect(a).await;
	let (_sb, mut rxb) = bed.connect(b).await;
	drain(&mut rxa);
	drain(&mut rxb);

	for i in 0..61 {
		bed.router
			.handle_event(&mut sa, send_msg(channel, &format!("m{i}"), None))
			.await;
	}

	let a_events = drain(&mut rxa);
	let sent = a_events
		.iter()
		.filter(|ev| matches!(ev, ServerEvent::MessageSent { .. }))
		.count();
	let errors = a_events
		.iter()
		.filter(|ev| matches!(ev, ServerEvent::Error { message } if message == "rate limit exceeded"))
		.count();
	assert_eq!(sent, 60, "exactly the ceiling goes through");
	assert_eq!(errors, 1, "the 61st is rejected");

	let fanned_out = drain(&mut rxb)
		.iter()
		.filter(|ev| matches!(ev, ServerEvent::NewMessage { .. }))
		.count();
	assert_eq!(fanned_out, 60, "the rejected send is never persisted or fanned out");
}

#[tokio::test]
async fn replies_must_anchor_to_a_live_message_in_the_same_channel() {
	let bed = TestBed::new();
	let tenant = TenantId::new_v4();
	let a = bed.seed_user(tenant, Role::Member, "Ada", "Lovelace");
	let b = bed.seed_user(tenant, Role::Member, "Grace", "Hopper");
	let channel_x = bed.seed_channel(tenant, vec![a, b]);
	let channel_y = bed.seed_channel(tenant, vec![a]);

	let (mut sa, mut rxa) = bed.connect(a).await;
	let (_sb, mut rxb) = bed.connect(b).await;
	drain(&mut rxa);
	drain(&mut rxb);

	let reply = |target: MessageId| ClientEvent::SendMessage {
		channel_id: channel_x,
		content: "re".to_string(),
		kind: None,
		reply_to: Some(target),
		temp_id: None,
	};

	// cross-channel target
	let elsewhere = bed.seed_message(tenant, channel_y, a, "over here").await;
	bed.router.handle_event(&mut sa, reply(elsewhere.id)).await;
	assert!(
		drain(&mut rxa).iter().any(|ev| matches!(ev, ServerEvent::Error { .. })),
		"cross-channel reply is rejected"
	);
	assert!(drain(&mut rxb).is_empty(), "nothing is created or fanned out");

	// deleted target
	let gone = bed.seed_message(tenant, channel_x, b, "fleeting").await;
	bed.directory
		.update_message(gone.id, MessagePatch::Delete { by: b, at_ms: unix_ms_now() })
		.await
		.unwrap();
	bed.router.handle_event(&mut sa, reply(gone.id)).await;
	assert!(drain(&mut rxa).iter().any(|ev| matches!(ev, ServerEvent::Error { .. })));
	assert!(drain(&mut rxb).is_empty());

	// live in-channel target
	let anchor = bed.seed_message(tenant, channel_x, b, "anchor").await;
	bed.router.handle_event(&mut sa, reply(anchor.id)).await;
	let fanned = drain(&mut rxb);
	assert!(
		fanned.iter().any(|ev| matches!(
			ev,
			ServerEvent::NewMessage { message } if message.reply_to == Some(anchor.id)
		)),
		"valid reply lands with its anchor, got: {fanned:?}"
	);
}

#[tokio::test]
async fn edit_window_closes_after_24_hours() {
	let bed = TestBed::new();
	let tenant = TenantId::new_v4();
	let a = bed.seed_user(tenant, Role::Member, "Ada", "Lovelace");
	let b = bed.seed_user(tenant, Role::Member, "Grace", "Hopper");
	let channel = bed.seed_channel(tenant, vec![a, b]);

	let (mut sa, mut rxa) = bed.connect(a).await;
	let (_sb, mut rxb) = bed.connect(b).await;
	drain(&mut rxa);
	drain(&mut rxb);

	let aged = |age_ms: i64| Message {
		id: MessageId::new_v4(),
		channel_id: channel,
		tenant_id: tenant,
		sender_id: a,
		sender_name: "Ada Lovelace".to_string(),
		content: "original".to_string(),
		kind: MessageKind::Text,
		reply_to: None,
		edited: false,
		edited_at: None,
		deleted: false,
		deleted_at: None,
		deleted_by: None,
		created_at: unix_ms_now() - age_ms,
	};

	// one minute inside the window
	let young = aged(MESSAGE_EDIT_WINDOW_MS - 60_000);
	bed.directory.put_message(young.clone());
	bed.router
		.handle_event(&mut sa, ClientEvent::EditMessage {
			channel_id: channel,
			message_id: young.id,
			content: "revised".to_string(),
		})
		.await;
	assert!(
		drain(&mut rxb).iter().any(|ev| matches!(
			ev,
			ServerEvent::MessageEdited { message, .. } if message.id == young.id && message.content == "revised" && message.edited
		))
	);
	assert!(drain(&mut rxa).iter().all(|ev| !matches!(ev, ServerEvent::Error { .. })));

	// one minute past the window
	let stale = aged(MESSAGE_EDIT_WINDOW_MS + 60_000);
	bed.directory.put_message(stale.clone());
	bed.router
		.handle_event(&mut sa, ClientEvent::EditMessage {
			channel_id: channel,
			message_id: stale.id,
			content: "too late".to_string(),
		})
		.await;
	assert!(
		drain(&mut rxa)
			.iter()
			.any(|ev| matches!(ev, ServerEvent::Error { message } if message == "message is not editable"))
	);
	let stored = bed.directory.find_message(stale.id, channel).await.unwrap().unwrap();
	assert_eq!(stored.content, "original");
}

#[tokio::test]
async fn only_the_author_edits_and_only_text_messages() {
	let bed = TestBed::new();
	let tenant = TenantId::new_v4();
	let a = bed.seed_user(tenant, Role::Member, "Ada", "Lovelace");
	let b = bed.seed_user(tenant, Role::Member, "Grace", "Hopper");
	let channel = bed.seed_channel(tenant, vec![a, b]);

	let (mut sb, mut rxb) = bed.connect(b).await;
	drain(&mut rxb);

	let theirs = bed.seed_message(tenant, channel, a, "not yours").await;
	bed.router
		.handle_event(&mut sb, ClientEvent::EditMessage {
			channel_id: channel,
			message_id: theirs.id,
			content: "hijack".to_string(),
		})
		.await;
	assert!(
		drain(&mut rxb)
			.iter()
			.any(|ev| matches!(ev, ServerEvent::Error { message } if message == "message is not editable"))
	);

	let mut attachment = bed.seed_message(tenant, channel, b, "report.pdf").await;
	attachment.kind = MessageKind::File;
	bed.directory.put_message(attachment.clone());
	bed.router
		.handle_event(&mut sb, ClientEvent::EditMessage {
			channel_id: channel,
			message_id: attachment.id,
			content: "renamed".to_string(),
		})
		.await;
	assert!(
		drain(&mut rxb)
			.iter()
			.any(|ev| matches!(ev, ServerEvent::Error { message } if message == "message is not editable"))
	);
}

#[tokio::test]
async fn delete_is_author_or_admin_and_always_a_tombstone() {
	let bed = TestBed::new();
	let tenant = TenantId::new_v4();
	let a = bed.seed_user(tenant, Role::Member, "Ada", "Lovelace");
	let b = bed.seed_user(tenant, Role::Member, "Grace", "Hopper");
	let admin = bed.seed_user(tenant, Role::Admin, "Alan", "Turing");
	let channel = bed.seed_channel(tenant, vec![a, b, admin]);

	let (mut sa, mut rxa) = bed.connect(a).await;
	let (mut sb, mut rxb) = bed.connect(b).await;
	let (mut sadmin, mut rxadmin) = bed.connect(admin).await;
	drain(&mut rxa);
	drain(&mut rxb);
	drain(&mut rxadmin);

	// a plain member cannot delete someone else's message
	let m1 = bed.seed_message(tenant, channel, a, "target one").await;
	bed.router
		.handle_event(&mut sb, ClientEvent::DeleteMessage { channel_id: channel, message_id: m1.id })
		.await;
	assert!(
		drain(&mut rxb)
			.iter()
			.any(|ev| matches!(ev, ServerEvent::Error { message } if message == "access denied"))
	);

	// the author can
	bed.router
		.handle_event(&mut sa, ClientEvent::DeleteMessage { channel_id: channel, message_id: m1.id })
		.await;
	for rx in [&mut rxa, &mut rxb, &mut rxadmin] {
		assert!(
			drain(rx).iter().any(|ev| matches!(
				ev,
				ServerEvent::MessageDeleted { message_id, deleted_by, .. } if *message_id == m1.id && *deleted_by == a
			)),
			"every room member converges on the deletion"
		);
	}

	// a tenant admin can delete anyone's
	let m2 = bed.seed_message(tenant, channel, a, "target two").await;
	bed.router
		.handle_event(&mut sadmin, ClientEvent::DeleteMessage { channel_id: channel, message_id: m2.id })
		.await;
	assert!(
		drain(&mut rxa)
			.iter()
			.any(|ev| matches!(ev, ServerEvent::MessageDeleted { message_id, .. } if *message_id == m2.id))
	);

	// soft delete: storage keeps the body
	let stored = bed.directory.find_message(m2.id, channel).await.unwrap().unwrap();
	assert!(stored.deleted);
	assert_eq!(stored.content, "target two");
	assert_eq!(stored.deleted_by, Some(admin));
}

#[tokio::test]
async fn typing_indicators_fan_out_and_fail_silently() {
	let bed = TestBed::new();
	let tenant = TenantId::new_v4();
	let a = bed.seed_user(tenant, Role::Member, "Ada", "Lovelace");
	let b = bed.seed_user(tenant, Role::Member, "Grace", "Hopper");
	let outsider = bed.seed_user(tenant, Role::Member, "Mallory", "Intruder");
	let channel = bed.seed_channel(tenant, vec![a, b]);

	let (mut sa, mut rxa) = bed.connect(a).await;
	let (_sb, mut rxb) = bed.connect(b).await;
	let (mut so, mut rxo) = bed.connect(outsider).await;
	drain(&mut rxa);
	drain(&mut rxb);
	drain(&mut rxo);

	bed.router.handle_event(&mut sa, ClientEvent::TypingStart { channel_id: channel }).await;
	assert!(
		drain(&mut rxb)
			.iter()
			.any(|ev| matches!(ev, ServerEvent::UserTyping { user_id, .. } if *user_id == a))
	);
	assert!(drain(&mut rxa).is_empty(), "sender is excluded from typing fan-out");

	bed.router.handle_event(&mut sa, ClientEvent::TypingStop { channel_id: channel }).await;
	assert!(
		drain(&mut rxb)
			.iter()
			.any(|ev| matches!(ev, ServerEvent::UserStopTyping { user_id, .. } if *user_id == a))
	);

	// access failure: swallowed, no error event
	bed.router.handle_event(&mut so, ClientEvent::TypingStart { channel_id: channel }).await;
	assert!(drain(&mut rxo).is_empty());
	assert!(drain(&mut rxb).is_empty());

	// rate-limit failure: swallowed too (ceiling is 30/min, one already spent)
	for _ in 0..40 {
		bed.router.handle_event(&mut sa, ClientEvent::TypingStart { channel_id: channel }).await;
	}
	let b_events = drain(&mut rxb);
	assert_eq!(
		b_events
			.iter()
			.filter(|ev| matches!(ev, ServerEvent::UserTyping { .. }))
			.count(),
		29
	);
	assert!(drain(&mut rxa).is_empty(), "no rate-limit error spam for typing");
}

#[tokio::test]
async fn mark_as_read_broadcasts_but_never_persists() {
	let bed = TestBed::new();
	let tenant = TenantId::new_v4();
	let a = bed.seed_user(tenant, Role::Member, "Ada", "Lovelace");
	let b = bed.seed_user(tenant, Role::Member, "Grace", "Hopper");
	let outsider = bed.seed_user(tenant, Role::Member, "Mallory", "Intruder");
	let channel = bed.seed_channel(tenant, vec![a, b]);

	let (mut sa, mut rxa) = bed.connect(a).await;
	let (_sb, mut rxb) = bed.connect(b).await;
	let (mut so, mut rxo) = bed.connect(outsider).await;
	drain(&mut rxa);
	drain(&mut rxb);
	drain(&mut rxo);

	bed.router.handle_event(&mut sa, ClientEvent::MarkAsRead { channel_id: channel }).await;
	let b_events = drain(&mut rxb);
	assert!(
		b_events.iter().any(|ev| matches!(
			ev,
			ServerEvent::MessagesRead { channel_id, user_id, read_at } if *channel_id == channel && *user_id == a && *read_at > 0
		))
	);
	assert!(drain(&mut rxa).is_empty());

	// read receipts stay access-checked and loud on failure
	bed.router.handle_event(&mut so, ClientEvent::MarkAsRead { channel_id: channel }).await;
	assert!(
		drain(&mut rxo)
			.iter()
			.any(|ev| matches!(ev, ServerEvent::Error { message } if message == "access denied"))
	);
}

#[tokio::test]
async fn status_change_reaches_the_tenant_room() {
	let bed = TestBed::new();
	let tenant = TenantId::new_v4();
	let a = bed.seed_user(tenant, Role::Member, "Ada", "Lovelace");
	let b = bed.seed_user(tenant, Role::Member, "Grace", "Hopper");

	let (mut sa, mut rxa) = bed.connect(a).await;
	let (_sb, mut rxb) = bed.connect(b).await;
	drain(&mut rxa);
	drain(&mut rxb);

	bed.router
		.handle_event(&mut sa, ClientEvent::StatusChange { status: PresenceStatus::Busy })
		.await;

	for rx in [&mut rxa, &mut rxb] {
		assert!(
			drain(rx).iter().any(|ev| matches!(
				ev,
				ServerEvent::UserStatusChange { user_id, status: PresenceStatus::Busy, .. } if *user_id == a
			)),
			"the whole tenant room, the origin's devices included, converges"
		);
	}
	assert_eq!(bed.router.presence().status_of(a), PresenceStatus::Busy);

	// offline is derived, never requested
	bed.router
		.handle_event(&mut sa, ClientEvent::StatusChange { status: PresenceStatus::Offline })
		.await;
	assert!(
		drain(&mut rxa)
			.iter()
			.any(|ev| matches!(ev, ServerEvent::Error { message } if message.starts_with("invalid payload")))
	);
	assert_eq!(bed.router.presence().status_of(a), PresenceStatus::Busy);
}

#[tokio::test]
async fn session_rooms_are_exactly_tenant_plus_memberships() {
	let bed = TestBed::new();
	let tenant = TenantId::new_v4();
	let a = bed.seed_user(tenant, Role::Member, "Ada", "Lovelace");
	let c1 = bed.seed_channel(tenant, vec![a]);
	let c2 = bed.seed_channel(tenant, vec![a, bed.seed_user(tenant, Role::Member, "Grace", "Hopper")]);
	// not a member of this one
	bed.seed_channel(tenant, vec![UserId::new_v4()]);

	let (mut sa, _rxa) = bed.connect(a).await;

	let expected = [RoomKey::Tenant(tenant), RoomKey::Channel(c1), RoomKey::Channel(c2)];
	assert_eq!(sa.rooms.len(), expected.len());
	for room in expected {
		assert!(sa.rooms.contains(&room));
		assert!(bed.router.rooms().is_member(&room, sa.conn_id).await);
	}

	bed.router.disconnect(&mut sa).await;
	assert!(sa.rooms.is_empty());
	assert!(!bed.router.rooms().is_member(&RoomKey::Tenant(tenant), sa.conn_id).await);
}

#[tokio::test]
async fn role_allow_list_gates_channel_access() {
	let bed = TestBed::new();
	let tenant = TenantId::new_v4();
	let manager = bed.seed_user(tenant, Role::Manager, "Margaret", "Hamilton");
	let member = bed.seed_user(tenant, Role::Member, "Ada", "Lovelace");

	let (mut sm, mut rxm) = bed.connect(manager).await;
	let (mut sa, mut rxa) = bed.connect(member).await;
	drain(&mut rxm);
	drain(&mut rxa);

	let leads = Channel {
		id: ChannelId::new_v4(),
		tenant_id: tenant,
		name: "leads".to_string(),
		kind: ChannelKind::Group,
		participants: vec![manager, member],
		project_id: None,
		archived: false,
		private: true,
		allowed_roles: Some(vec![Role::Admin, Role::Manager]),
		last_message_id: None,
		last_activity_at: None,
	};
	let leads_id = leads.id;
	bed.directory.insert_channel(leads).unwrap();

	bed.router.handle_event(&mut sm, ClientEvent::JoinChannel { channel_id: leads_id }).await;
	assert!(
		drain(&mut rxm)
			.iter()
			.any(|ev| matches!(ev, ServerEvent::JoinedChannel { .. }))
	);

	// listed as a participant, but the role allow-list wins
	bed.router.handle_event(&mut sa, ClientEvent::JoinChannel { channel_id: leads_id }).await;
	assert!(
		drain(&mut rxa)
			.iter()
			.any(|ev| matches!(ev, ServerEvent::Error { message } if message == "access denied"))
	);
}

#[tokio::test]
async fn hello_after_handshake_and_closed_sessions_are_rejected() {
	let bed = TestBed::new();
	let tenant = TenantId::new_v4();
	let a = bed.seed_user(tenant, Role::Member, "Ada", "Lovelace");
	let b = bed.seed_user(tenant, Role::Member, "Grace", "Hopper");
	let channel = bed.seed_channel(tenant, vec![a, b]);

	let (mut sa, mut rxa) = bed.connect(a).await;
	let (_sb, mut rxb) = bed.connect(b).await;
	drain(&mut rxa);
	drain(&mut rxb);

	bed.router
		.handle_event(&mut sa, ClientEvent::Hello { token: None, client_name: None })
		.await;
	assert!(
		drain(&mut rxa)
			.iter()
			.any(|ev| matches!(ev, ServerEvent::Error { message } if message.starts_with("invalid payload")))
	);

	bed.router.disconnect(&mut sa).await;
	bed.router.handle_event(&mut sa, send_msg(channel, "ghost", None)).await;
	assert!(drain(&mut rxa).is_empty());
	assert!(drain(&mut rxb).is_empty(), "closed connections route nothing");
}
