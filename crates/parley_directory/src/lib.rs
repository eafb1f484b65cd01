#![forbid(unsafe_code)]

pub mod identity;
pub mod memory;
pub mod sqlite;

use core::fmt;

use parley_domain::{
	Account, Channel, ChannelId, Message, MessageId, MessageKind, TenantId, UserId,
};
use thiserror::Error;

pub use identity::{AuthError, HmacVerifier, IdentityVerifier, TokenClaims};
pub use memory::InMemoryDirectory;
pub use sqlite::SqliteDirectory;

/// A secret that never Debug/Display-prints its contents.
#[derive(Clone)]
pub struct SecretString(String);

impl SecretString {
	pub fn new(s: impl Into<String>) -> Self {
		Self(s.into())
	}

	/// Access the inner secret string.
	pub fn expose(&self) -> &str {
		&self.0
	}
}

impl fmt::Debug for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("SecretString(<redacted>)")
	}
}

impl fmt::Display for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("<redacted>")
	}
}

/// Errors surfaced by directory store implementations.
#[derive(Debug, Error)]
pub enum DirectoryError {
	#[error("{0} not found")]
	NotFound(&'static str),

	#[error("constraint violation: {0}")]
	Constraint(String),

	#[error("directory backend error: {0}")]
	Backend(#[source] anyhow::Error),
}

impl DirectoryError {
	pub fn backend(err: impl Into<anyhow::Error>) -> Self {
		Self::Backend(err.into())
	}
}

/// Draft for a message about to be persisted.
///
/// The store assigns the id and creation timestamp.
#[derive(Debug, Clone)]
pub struct MessageDraft {
	pub channel_id: ChannelId,
	pub tenant_id: TenantId,
	pub sender_id: UserId,
	pub sender_name: String,
	pub content: String,
	pub kind: MessageKind,
	pub reply_to: Option<MessageId>,
}

/// In-place message mutations this core performs.
#[derive(Debug, Clone)]
pub enum MessagePatch {
	/// Replace the body and stamp the edit marker.
	Edit {
		content: String,
		at_ms: i64,
	},
	/// Soft-delete: flag only, content stays in storage.
	Delete {
		by: UserId,
		at_ms: i64,
	},
}

/// Read/write interface to the user/company/channel/message directory.
///
/// The directory is the single source of truth for membership and message
/// content; the chat core holds no authoritative cache of it.
#[async_trait::async_trait]
pub trait DirectoryStore: Send + Sync + 'static {
	async fn find_account(&self, user_id: UserId) -> Result<Option<Account>, DirectoryError>;

	async fn find_channel(&self, id: ChannelId, tenant_id: TenantId) -> Result<Option<Channel>, DirectoryError>;

	/// Channels where the user is currently an active participant, archived
	/// channels excluded.
	async fn find_channels_for_user(
		&self,
		user_id: UserId,
		tenant_id: TenantId,
	) -> Result<Vec<Channel>, DirectoryError>;

	async fn find_message(&self, id: MessageId, channel_id: ChannelId) -> Result<Option<Message>, DirectoryError>;

	async fn create_message(&self, draft: MessageDraft) -> Result<Message, DirectoryError>;

	async fn update_message(&self, id: MessageId, patch: MessagePatch) -> Result<Message, DirectoryError>;

	async fn update_channel_activity(
		&self,
		id: ChannelId,
		last_message_id: MessageId,
		at_ms: i64,
	) -> Result<(), DirectoryError>;

	async fn add_participant(&self, channel_id: ChannelId, user_id: UserId) -> Result<(), DirectoryError>;

	async fn remove_participant(&self, channel_id: ChannelId, user_id: UserId) -> Result<(), DirectoryError>;
}
