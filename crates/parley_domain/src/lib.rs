#![forbid(unsafe_code)]

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Maximum characters in a chat message body.
pub const MAX_MESSAGE_CHARS: usize = 4000;

/// Maximum participants in any channel.
pub const MAX_CHANNEL_PARTICIPANTS: usize = 100;

/// A direct channel always has exactly this many participants.
pub const DIRECT_CHANNEL_PARTICIPANTS: usize = 2;

/// Maximum characters in a channel name.
pub const MAX_CHANNEL_NAME_CHARS: usize = 100;

/// Window (ms) during which the author may edit a text message.
pub const MESSAGE_EDIT_WINDOW_MS: i64 = 24 * 60 * 60 * 1000;

/// Errors for parsing identifiers and enum values from strings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseIdError {
	#[error("empty value")]
	Empty,
	#[error("invalid identifier: {0}")]
	InvalidId(String),
	#[error("unknown value: {0}")]
	UnknownValue(String),
	#[error("invalid format: {0}")]
	InvalidFormat(String),
}

macro_rules! uuid_id {
	($(#[$doc:meta])* $name:ident) => {
		$(#[$doc])*
		#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
		#[serde(transparent)]
		pub struct $name(pub Uuid);

		impl $name {
			/// Create a new random id.
			pub fn new_v4() -> Self {
				Self(Uuid::new_v4())
			}

			pub fn as_uuid(&self) -> &Uuid {
				&self.0
			}
		}

		impl fmt::Display for $name {
			fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				write!(f, "{}", self.0)
			}
		}

		impl FromStr for $name {
			type Err = ParseIdError;

			fn from_str(s: &str) -> Result<Self, Self::Err> {
				let s = s.trim();
				if s.is_empty() {
					return Err(ParseIdError::Empty);
				}
				Uuid::parse_str(s).map(Self).map_err(|_| ParseIdError::InvalidId(s.to_string()))
			}
		}
	};
}

uuid_id!(
	/// Authenticated user identifier.
	UserId
);
uuid_id!(
	/// Tenant (company) identifier; the unit of data isolation.
	TenantId
);
uuid_id!(
	/// Channel identifier.
	ChannelId
);
uuid_id!(
	/// Message identifier.
	MessageId
);
uuid_id!(
	/// Project identifier (owning reference for project channels).
	ProjectId
);

/// Fixed role set for tenant members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
	Admin,
	Manager,
	Member,
}

impl Role {
	/// Stable string identifier.
	pub const fn as_str(self) -> &'static str {
		match self {
			Role::Admin => "admin",
			Role::Manager => "manager",
			Role::Member => "member",
		}
	}

	/// Whether the role carries tenant-admin privileges (e.g. delete any message).
	pub const fn is_admin(self) -> bool {
		matches!(self, Role::Admin)
	}
}

impl fmt::Display for Role {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for Role {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let s = s.trim();
		if s.is_empty() {
			return Err(ParseIdError::Empty);
		}
		match s.to_ascii_lowercase().as_str() {
			"admin" => Ok(Role::Admin),
			"manager" => Ok(Role::Manager),
			"member" => Ok(Role::Member),
			other => Err(ParseIdError::UnknownValue(other.to_string())),
		}
	}
}

/// Channel kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
	Direct,
	Group,
	Project,
}

impl ChannelKind {
	pub const fn as_str(self) -> &'static str {
		match self {
			ChannelKind::Direct => "direct",
			ChannelKind::Group => "group",
			ChannelKind::Project => "project",
		}
	}
}

impl fmt::Display for ChannelKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for ChannelKind {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_lowercase().as_str() {
			"" => Err(ParseIdError::Empty),
			"direct" => Ok(ChannelKind::Direct),
			"group" => Ok(ChannelKind::Group),
			"project" => Ok(ChannelKind::Project),
			other => Err(ParseIdError::UnknownValue(other.to_string())),
		}
	}
}

/// Message kinds carried on the wire as `type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
	Text,
	File,
	Image,
	System,
}

impl MessageKind {
	pub const fn as_str(self) -> &'static str {
		match self {
			MessageKind::Text => "text",
			MessageKind::File => "file",
			MessageKind::Image => "image",
			MessageKind::System => "system",
		}
	}

	/// Whether a body is required for this kind.
	pub const fn requires_content(self) -> bool {
		matches!(self, MessageKind::Text)
	}
}

impl fmt::Display for MessageKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for MessageKind {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_lowercase().as_str() {
			"" => Err(ParseIdError::Empty),
			"text" => Ok(MessageKind::Text),
			"file" => Ok(MessageKind::File),
			"image" => Ok(MessageKind::Image),
			"system" => Ok(MessageKind::System),
			other => Err(ParseIdError::UnknownValue(other.to_string())),
		}
	}
}

/// Presence status of a principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
	Online,
	Offline,
	Away,
	Busy,
}

impl PresenceStatus {
	pub const fn as_str(self) -> &'static str {
		match self {
			PresenceStatus::Online => "online",
			PresenceStatus::Offline => "offline",
			PresenceStatus::Away => "away",
			PresenceStatus::Busy => "busy",
		}
	}

	/// Whether a client may request this status via `status_change`.
	///
	/// Offline is derived from the live-connection set, never requested.
	pub const fn is_user_selectable(self) -> bool {
		!matches!(self, PresenceStatus::Offline)
	}
}

impl fmt::Display for PresenceStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for PresenceStatus {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_lowercase().as_str() {
			"" => Err(ParseIdError::Empty),
			"online" => Ok(PresenceStatus::Online),
			"offline" => Ok(PresenceStatus::Offline),
			"away" => Ok(PresenceStatus::Away),
			"busy" => Ok(PresenceStatus::Busy),
			other => Err(ParseIdError::UnknownValue(other.to_string())),
		}
	}
}

/// Fan-out room key: one room per channel, plus one implicit room per tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomKey {
	Tenant(TenantId),
	Channel(ChannelId),
}

impl RoomKey {
	/// Prefix for tenant-wide rooms.
	pub const TENANT_PREFIX: &'static str = "tenant:";
	/// Prefix for channel rooms.
	pub const CHANNEL_PREFIX: &'static str = "channel:";

	/// Parse a `tenant:<uuid>` or `channel:<uuid>` room string.
	pub fn parse(s: &str) -> Result<Self, ParseIdError> {
		let s = s.trim();
		if s.is_empty() {
			return Err(ParseIdError::Empty);
		}

		if let Some(rest) = s.strip_prefix(Self::TENANT_PREFIX) {
			return rest.parse::<TenantId>().map(RoomKey::Tenant);
		}
		if let Some(rest) = s.strip_prefix(Self::CHANNEL_PREFIX) {
			return rest.parse::<ChannelId>().map(RoomKey::Channel);
		}

		Err(ParseIdError::InvalidFormat(
			"expected tenant:<id> or channel:<id>".to_string(),
		))
	}
}

impl fmt::Display for RoomKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			RoomKey::Tenant(id) => write!(f, "{}{id}", Self::TENANT_PREFIX),
			RoomKey::Channel(id) => write!(f, "{}{id}", Self::CHANNEL_PREFIX),
		}
	}
}

impl FromStr for RoomKey {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		RoomKey::parse(s)
	}
}

/// Validate a channel name: 1..=100 chars of `[A-Za-z0-9 _-]`.
pub fn validate_channel_name(name: &str) -> bool {
	let name = name.trim();
	!name.is_empty()
		&& name.chars().count() <= MAX_CHANNEL_NAME_CHARS
		&& name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '-' | '_'))
}

/// Directory account record for a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
	pub user_id: UserId,
	pub tenant_id: Option<TenantId>,
	pub role: Role,
	pub first_name: String,
	pub last_name: String,
	pub active: bool,
}

impl Account {
	pub fn display_name(&self) -> String {
		join_name_parts(&self.first_name, &self.last_name)
	}
}

/// Authenticated identity attached to a connection.
///
/// Re-derived fresh on every handshake; never cached across reconnects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
	pub user_id: UserId,
	pub tenant_id: TenantId,
	pub role: Role,
	pub first_name: String,
	pub last_name: String,
}

impl Principal {
	pub fn display_name(&self) -> String {
		join_name_parts(&self.first_name, &self.last_name)
	}

	/// The implicit tenant-wide room for this principal.
	pub fn tenant_room(&self) -> RoomKey {
		RoomKey::Tenant(self.tenant_id)
	}
}

fn join_name_parts(first: &str, last: &str) -> String {
	match (first.trim(), last.trim()) {
		("", "") => String::new(),
		(first, "") => first.to_string(),
		("", last) => last.to_string(),
		(first, last) => format!("{first} {last}"),
	}
}

/// Channel record as read from the directory store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
	pub id: ChannelId,
	pub tenant_id: TenantId,
	pub name: String,
	pub kind: ChannelKind,
	pub participants: Vec<UserId>,
	pub project_id: Option<ProjectId>,
	pub archived: bool,
	pub private: bool,
	pub allowed_roles: Option<Vec<Role>>,
	pub last_message_id: Option<MessageId>,
	pub last_activity_at: Option<i64>,
}

impl Channel {
	pub fn is_participant(&self, user_id: UserId) -> bool {
		self.participants.contains(&user_id)
	}

	/// Role allow-list check; channels without a list allow every role.
	pub fn allows_role(&self, role: Role) -> bool {
		match &self.allowed_roles {
			Some(roles) => roles.contains(&role),
			None => true,
		}
	}

	pub fn room(&self) -> RoomKey {
		RoomKey::Channel(self.id)
	}
}

/// Message record as read from the directory store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
	pub id: MessageId,
	pub channel_id: ChannelId,
	pub tenant_id: TenantId,
	pub sender_id: UserId,
	pub sender_name: String,
	pub content: String,
	pub kind: MessageKind,
	pub reply_to: Option<MessageId>,
	pub edited: bool,
	pub edited_at: Option<i64>,
	pub deleted: bool,
	pub deleted_at: Option<i64>,
	pub deleted_by: Option<UserId>,
	pub created_at: i64,
}

impl Message {
	/// Whether `user_id` may edit this message at `now_ms`.
	///
	/// Text-kind, non-deleted, self-authored, younger than the edit window.
	pub fn editable_by(&self, user_id: UserId, now_ms: i64) -> bool {
		self.kind == MessageKind::Text
			&& !self.deleted
			&& self.sender_id == user_id
			&& now_ms.saturating_sub(self.created_at) < MESSAGE_EDIT_WINDOW_MS
	}

	/// Whether the principal may delete this message (author or tenant admin).
	pub fn deletable_by(&self, user_id: UserId, role: Role) -> bool {
		!self.deleted && (self.sender_id == user_id || role.is_admin())
	}

	/// Whether this message can anchor a reply.
	pub fn reply_target_in(&self, channel_id: ChannelId) -> bool {
		self.channel_id == channel_id && !self.deleted
	}
}
