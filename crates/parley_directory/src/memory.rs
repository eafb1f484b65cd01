#![forbid(unsafe_code)]

use std::collections::HashMap;

use parking_lot::RwLock;
use parley_domain::{
	Account, Channel, ChannelId, ChannelKind, DIRECT_CHANNEL_PARTICIPANTS, MAX_CHANNEL_PARTICIPANTS, Message,
	MessageId, TenantId, UserId, validate_channel_name,
};
use parley_util::time::unix_ms_now;

use crate::{DirectoryError, DirectoryStore, MessageDraft, MessagePatch};

/// In-memory directory store for development and tests.
///
/// Enforces the same creation invariants the production directory does:
/// direct channels carry exactly two fixed participants, participant counts
/// stay within bounds, project channels reference a project.
#[derive(Default)]
pub struct InMemoryDirectory {
	inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
	accounts: HashMap<UserId, Account>,
	channels: HashMap<ChannelId, Channel>,
	messages: HashMap<MessageId, Message>,
}

impl InMemoryDirectory {
	pub fn new() -> Self {
		Self::default()
	}

	/// Seed or replace an account.
	pub fn upsert_account(&self, account: Account) {
		self.inner.write().accounts.insert(account.user_id, account);
	}

	/// Seed a channel, enforcing creation invariants.
	pub fn insert_channel(&self, channel: Channel) -> Result<(), DirectoryError> {
		if !validate_channel_name(&channel.name) {
			return Err(DirectoryError::Constraint(format!(
				"invalid channel name: {:?}",
				channel.name
			)));
		}
		if channel.participants.len() > MAX_CHANNEL_PARTICIPANTS {
			return Err(DirectoryError::Constraint(format!(
				"participant count {} exceeds {MAX_CHANNEL_PARTICIPANTS}",
				channel.participants.len()
			)));
		}
		match channel.kind {
			ChannelKind::Direct if channel.participants.len() != DIRECT_CHANNEL_PARTICIPANTS => {
				return Err(DirectoryError::Constraint(format!(
					"direct channel must have exactly {DIRECT_CHANNEL_PARTICIPANTS} participants"
				)));
			}
			ChannelKind::Project if channel.project_id.is_none() => {
				return Err(DirectoryError::Constraint(
					"project channel must reference a project".to_string(),
				));
			}
			_ => {}
		}

		self.inner.write().channels.insert(channel.id, channel);
		Ok(())
	}

	/// Test helper: overwrite a stored message wholesale.
	pub fn put_message(&self, message: Message) {
		self.inner.write().messages.insert(message.id, message);
	}

	/// Test helper: archive or unarchive a channel in place.
	pub fn set_archived(&self, channel_id: ChannelId, archived: bool) {
		if let Some(ch) = self.inner.write().channels.get_mut(&channel_id) {
			ch.archived = archived;
		}
	}
}

#[async_trait::async_trait]
impl DirectoryStore for InMemoryDirectory {
	async fn find_account(&self, user_id: UserId) -> Result<Option<Account>, DirectoryError> {
		Ok(self.inner.read().accounts.get(&user_id).cloned())
	}

	async fn find_channel(&self, id: ChannelId, tenant_id: TenantId) -> Result<Option<Channel>, DirectoryError> {
		Ok(self
			.inner
			.read()
			.channels
			.get(&id)
			.filter(|ch| ch.tenant_id == tenant_id)
			.cloned())
	}

	async fn find_channels_for_user(
		&self,
		user_id: UserId,
		tenant_id: TenantId,
	) -> Result<Vec<Channel>, DirectoryError> {
		let inner = self.inner.read();
		let mut channels = inner
			.channels
			.values()
			.filter(|ch| ch.tenant_id == tenant_id && !ch.archived && ch.is_participant(user_id))
			.cloned()
			.collect::<Vec<_>>();
		channels.sort_by_key(|ch| ch.id);
		Ok(channels)
	}

	async fn find_message(&self, id: MessageId, channel_id: ChannelId) -> Result<Option<Message>, DirectoryError> {
		Ok(self
			.inner
			.read()
			.messages
			.get(&id)
			.filter(|m| m.channel_id == channel_id)
			.cloned())
	}

	async fn create_message(&self, draft: MessageDraft) -> Result<Message, DirectoryError> {
		let message = Message {
			id: MessageId::new_v4(),
			channel_id: draft.channel_id,
			tenant_id: draft.tenant_id,
			sender_id: draft.sender_id,
			sender_name: draft.sender_name,
			content: draft.content,
			kind: draft.kind,
			reply_to: draft.reply_to,
			edited: false,
			edited_at: None,
			deleted: false,
			deleted_at: None,
			deleted_by: None,
			created_at: unix_ms_now(),
		};

		self.inner.write().messages.insert(message.id, message.clone());
		Ok(message)
	}

	async fn update_message(&self, id: MessageId, patch: MessagePatch) -> Result<Message, DirectoryError> {
		let mut inner = self.inner.write();
		let message = inner.messages.get_mut(&id).ok_or(DirectoryError::NotFound("message"))?;

		match patch {
			MessagePatch::Edit { content, at_ms } => {
				message.content = content;
				message.edited = true;
				message.edited_at = Some(at_ms);
			}
			MessagePatch::Delete { by, at_ms } => {
				message.deleted = true;
				message.deleted_at = Some(at_ms);
				message.deleted_by = Some(by);
			}
		}

		Ok(message.clone())
	}

	async fn update_channel_activity(
		&self,
		id: ChannelId,
		last_message_id: MessageId,
		at_ms: i64,
	) -> Result<(), DirectoryError> {
		let mut inner = self.inner.write();
		let channel = inner.channels.get_mut(&id).ok_or(DirectoryError::NotFound("channel"))?;
		channel.last_message_id = Some(last_message_id);
		channel.last_activity_at = Some(at_ms);
		Ok(())
	}

	async fn add_participant(&self, channel_id: ChannelId, user_id: UserId) -> Result<(), DirectoryError> {
		let mut inner = self.inner.write();
		let channel = inner
			.channels
			.get_mut(&channel_id)
			.ok_or(DirectoryError::NotFound("channel"))?;

		if channel.kind == ChannelKind::Direct {
			return Err(DirectoryError::Constraint(
				"direct channel membership is fixed at creation".to_string(),
			));
		}
		if channel.is_participant(user_id) {
			return Ok(());
		}
		if channel.participants.len() >= MAX_CHANNEL_PARTICIPANTS {
			return Err(DirectoryError::Constraint(format!(
				"participant count would exceed {MAX_CHANNEL_PARTICIPANTS}"
			)));
		}

		channel.participants.push(user_id);
		Ok(())
	}

	async fn remove_participant(&self, channel_id: ChannelId, user_id: UserId) -> Result<(), DirectoryError> {
		let mut inner = self.inner.write();
		let channel = inner
			.channels
			.get_mut(&channel_id)
			.ok_or(DirectoryError::NotFound("channel"))?;

		if channel.kind == ChannelKind::Direct {
			return Err(DirectoryError::Constraint(
				"direct channel membership is fixed at creation".to_string(),
			));
		}

		channel.participants.retain(|p| *p != user_id);
		Ok(())
	}
}
