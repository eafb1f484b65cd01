#![forbid(unsafe_code)]

use parley_domain::{
	ChannelId, MAX_MESSAGE_CHARS, Message, MessageId, MessageKind, PresenceStatus, UserId,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Content substituted for soft-deleted messages at read time.
pub const DELETED_TOMBSTONE: &str = "[deleted]";

/// Payload-level validation failures.
///
/// Reported to the originating connection as a generic `error` event; the
/// connection itself survives.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
	#[error("message content is required")]
	MissingContent,
	#[error("message content exceeds {MAX_MESSAGE_CHARS} characters (got {0})")]
	ContentTooLong(usize),
	#[error("status must be one of online, away, busy")]
	StatusNotSelectable,
}

/// Client → server events: `{"type": <name>, "payload": {...}}`.
///
/// `hello` is the handshake carrier and is only legal as the first frame of
/// a connection; everything else is routed in `Connected` state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientEvent {
	Hello {
		#[serde(default)]
		token: Option<String>,
		#[serde(rename = "clientName", default, skip_serializing_if = "Option::is_none")]
		client_name: Option<String>,
	},
	JoinChannel {
		#[serde(rename = "channelId")]
		channel_id: ChannelId,
	},
	LeaveChannel {
		#[serde(rename = "channelId")]
		channel_id: ChannelId,
	},
	SendMessage {
		#[serde(rename = "channelId")]
		channel_id: ChannelId,
		#[serde(default)]
		content: String,
		#[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
		kind: Option<MessageKind>,
		#[serde(rename = "replyTo", default, skip_serializing_if = "Option::is_none")]
		reply_to: Option<MessageId>,
		#[serde(rename = "tempId", default, skip_serializing_if = "Option::is_none")]
		temp_id: Option<String>,
	},
	EditMessage {
		#[serde(rename = "channelId")]
		channel_id: ChannelId,
		#[serde(rename = "messageId")]
		message_id: MessageId,
		content: String,
	},
	DeleteMessage {
		#[serde(rename = "channelId")]
		channel_id: ChannelId,
		#[serde(rename = "messageId")]
		message_id: MessageId,
	},
	TypingStart {
		#[serde(rename = "channelId")]
		channel_id: ChannelId,
	},
	TypingStop {
		#[serde(rename = "channelId")]
		channel_id: ChannelId,
	},
	MarkAsRead {
		#[serde(rename = "channelId")]
		channel_id: ChannelId,
	},
	StatusChange {
		status: PresenceStatus,
	},
}

impl ClientEvent {
	/// Stable event name for logging and metrics labels.
	pub const fn kind_str(&self) -> &'static str {
		match self {
			ClientEvent::Hello { .. } => "hello",
			ClientEvent::JoinChannel { .. } => "join_channel",
			ClientEvent::LeaveChannel { .. } => "leave_channel",
			ClientEvent::SendMessage { .. } => "send_message",
			ClientEvent::EditMessage { .. } => "edit_message",
			ClientEvent::DeleteMessage { .. } => "delete_message",
			ClientEvent::TypingStart { .. } => "typing_start",
			ClientEvent::TypingStop { .. } => "typing_stop",
			ClientEvent::MarkAsRead { .. } => "mark_as_read",
			ClientEvent::StatusChange { .. } => "status_change",
		}
	}

	/// Boundary validation beyond what serde enforces structurally.
	pub fn validate(&self) -> Result<(), ValidationError> {
		match self {
			ClientEvent::SendMessage { content, kind, .. } => {
				let kind = kind.unwrap_or(MessageKind::Text);
				validate_content(content, kind)
			}
			ClientEvent::EditMessage { content, .. } => validate_content(content, MessageKind::Text),
			ClientEvent::StatusChange { status } => {
				if status.is_user_selectable() {
					Ok(())
				} else {
					Err(ValidationError::StatusNotSelectable)
				}
			}
			_ => Ok(()),
		}
	}
}

fn validate_content(content: &str, kind: MessageKind) -> Result<(), ValidationError> {
	if kind.requires_content() && content.trim().is_empty() {
		return Err(ValidationError::MissingContent);
	}
	let chars = content.chars().count();
	if chars > MAX_MESSAGE_CHARS {
		return Err(ValidationError::ContentTooLong(chars));
	}
	Ok(())
}

/// Message object as serialized to clients.
///
/// Soft-deleted messages are tombstoned here; storage keeps the original
/// content untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
	pub id: MessageId,
	pub channel_id: ChannelId,
	pub sender_id: UserId,
	pub sender_name: String,
	pub content: String,
	#[serde(rename = "type")]
	pub kind: MessageKind,
	pub reply_to: Option<MessageId>,
	pub edited: bool,
	pub edited_at: Option<i64>,
	pub deleted: bool,
	pub created_at: i64,
}

impl From<&Message> for WireMessage {
	fn from(m: &Message) -> Self {
		Self {
			id: m.id,
			channel_id: m.channel_id,
			sender_id: m.sender_id,
			sender_name: m.sender_name.clone(),
			content: if m.deleted {
				DELETED_TOMBSTONE.to_string()
			} else {
				m.content.clone()
			},
			kind: m.kind,
			reply_to: m.reply_to,
			edited: m.edited,
			edited_at: m.edited_at,
			deleted: m.deleted,
			created_at: m.created_at,
		}
	}
}

/// Server → client events, same `{"type", "payload"}` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerEvent {
	Welcome {
		#[serde(rename = "userId")]
		user_id: UserId,
		#[serde(rename = "userName")]
		user_name: String,
		#[serde(rename = "channelIds")]
		channel_ids: Vec<ChannelId>,
		#[serde(rename = "serverTimeMs")]
		server_time_ms: i64,
	},
	JoinedChannel {
		#[serde(rename = "channelId")]
		channel_id: ChannelId,
	},
	UserJoinedChannel {
		#[serde(rename = "channelId")]
		channel_id: ChannelId,
		#[serde(rename = "userId")]
		user_id: UserId,
		#[serde(rename = "userName")]
		user_name: String,
	},
	LeftChannel {
		#[serde(rename = "channelId")]
		channel_id: ChannelId,
	},
	UserLeftChannel {
		#[serde(rename = "channelId")]
		channel_id: ChannelId,
		#[serde(rename = "userId")]
		user_id: UserId,
		#[serde(rename = "userName")]
		user_name: String,
	},
	NewMessage {
		message: WireMessage,
	},
	MessageSent {
		#[serde(rename = "tempId")]
		temp_id: Option<String>,
		message: WireMessage,
	},
	MessageEdited {
		#[serde(rename = "channelId")]
		channel_id: ChannelId,
		message: WireMessage,
	},
	MessageDeleted {
		#[serde(rename = "channelId")]
		channel_id: ChannelId,
		#[serde(rename = "messageId")]
		message_id: MessageId,
		#[serde(rename = "deletedBy")]
		deleted_by: UserId,
	},
	UserTyping {
		#[serde(rename = "channelId")]
		channel_id: ChannelId,
		#[serde(rename = "userId")]
		user_id: UserId,
		#[serde(rename = "userName")]
		user_name: String,
	},
	UserStopTyping {
		#[serde(rename = "channelId")]
		channel_id: ChannelId,
		#[serde(rename = "userId")]
		user_id: UserId,
	},
	MessagesRead {
		#[serde(rename = "channelId")]
		channel_id: ChannelId,
		#[serde(rename = "userId")]
		user_id: UserId,
		#[serde(rename = "readAt")]
		read_at: i64,
	},
	UserStatusChange {
		#[serde(rename = "userId")]
		user_id: UserId,
		status: PresenceStatus,
		#[serde(rename = "lastSeen")]
		last_seen: i64,
	},
	Error {
		message: String,
	},
}

impl ServerEvent {
	/// Stable event name for logging and metrics labels.
	pub const fn kind_str(&self) -> &'static str {
		match self {
			ServerEvent::Welcome { .. } => "welcome",
			ServerEvent::JoinedChannel { .. } => "joined_channel",
			ServerEvent::UserJoinedChannel { .. } => "user_joined_channel",
			ServerEvent::LeftChannel { .. } => "left_channel",
			ServerEvent::UserLeftChannel { .. } => "user_left_channel",
			ServerEvent::NewMessage { .. } => "new_message",
			ServerEvent::MessageSent { .. } => "message_sent",
			ServerEvent::MessageEdited { .. } => "message_edited",
			ServerEvent::MessageDeleted { .. } => "message_deleted",
			ServerEvent::UserTyping { .. } => "user_typing",
			ServerEvent::UserStopTyping { .. } => "user_stop_typing",
			ServerEvent::MessagesRead { .. } => "messages_read",
			ServerEvent::UserStatusChange { .. } => "user_status_change",
			ServerEvent::Error { .. } => "error",
		}
	}

	/// Error event sent to the originating connection only.
	pub fn error(message: impl Into<String>) -> Self {
		ServerEvent::Error { message: message.into() }
	}
}
