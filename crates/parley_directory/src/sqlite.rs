#![forbid(unsafe_code)]

use anyhow::Context as _;
use parley_domain::{
	Account, Channel, ChannelId, ChannelKind, Message, MessageId, MessageKind, ProjectId, Role, TenantId, UserId,
};
use parley_util::time::unix_ms_now;
use sqlx::Row as _;
use sqlx::sqlite::SqliteRow;
use tracing::info;

use crate::{DirectoryError, DirectoryStore, MessageDraft, MessagePatch};

/// SQLite-backed directory store.
///
/// Participant and role lists are stored as JSON arrays; ids as UUID text.
pub struct SqliteDirectory {
	pool: sqlx::SqlitePool,
}

impl SqliteDirectory {
	/// Connect and ensure the schema exists.
	pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
		let pool = sqlx::SqlitePool::connect(database_url)
			.await
			.context("connect sqlite directory")?;

		sqlx::query(
			"CREATE TABLE IF NOT EXISTS accounts (\
				user_id TEXT PRIMARY KEY,\
				tenant_id TEXT,\
				role TEXT NOT NULL,\
				first_name TEXT NOT NULL DEFAULT '',\
				last_name TEXT NOT NULL DEFAULT '',\
				active INTEGER NOT NULL DEFAULT 1)",
		)
		.execute(&pool)
		.await
		.context("create accounts table")?;

		sqlx::query(
			"CREATE TABLE IF NOT EXISTS channels (\
				id TEXT PRIMARY KEY,\
				tenant_id TEXT NOT NULL,\
				name TEXT NOT NULL,\
				kind TEXT NOT NULL,\
				participants TEXT NOT NULL DEFAULT '[]',\
				project_id TEXT,\
				archived INTEGER NOT NULL DEFAULT 0,\
				private INTEGER NOT NULL DEFAULT 0,\
				allowed_roles TEXT,\
				last_message_id TEXT,\
				last_activity_at INTEGER)",
		)
		.execute(&pool)
		.await
		.context("create channels table")?;

		sqlx::query(
			"CREATE TABLE IF NOT EXISTS messages (\
				id TEXT PRIMARY KEY,\
				channel_id TEXT NOT NULL,\
				tenant_id TEXT NOT NULL,\
				sender_id TEXT NOT NULL,\
				sender_name TEXT NOT NULL DEFAULT '',\
				content TEXT NOT NULL DEFAULT '',\
				kind TEXT NOT NULL,\
				reply_to TEXT,\
				edited INTEGER NOT NULL DEFAULT 0,\
				edited_at INTEGER,\
				deleted INTEGER NOT NULL DEFAULT 0,\
				deleted_at INTEGER,\
				deleted_by TEXT,\
				created_at INTEGER NOT NULL)",
		)
		.execute(&pool)
		.await
		.context("create messages table")?;

		sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_channel ON messages (channel_id, created_at)")
			.execute(&pool)
			.await
			.context("create messages index")?;

		info!("sqlite directory ready");
		Ok(Self { pool })
	}
}

fn parse_id<T: core::str::FromStr>(s: &str, what: &'static str) -> Result<T, DirectoryError> {
	s.parse::<T>()
		.map_err(|_| DirectoryError::Backend(anyhow::anyhow!("corrupt {what} id in row: {s:?}")))
}

fn parse_opt_id<T: core::str::FromStr>(s: Option<String>, what: &'static str) -> Result<Option<T>, DirectoryError> {
	match s {
		Some(s) => parse_id(&s, what).map(Some),
		None => Ok(None),
	}
}

fn account_from_row(row: &SqliteRow) -> Result<Account, DirectoryError> {
	let user_id: String = row.get("user_id");
	let tenant_id: Option<String> = row.get("tenant_id");
	let role: String = row.get("role");

	Ok(Account {
		user_id: parse_id(&user_id, "user")?,
		tenant_id: parse_opt_id(tenant_id, "tenant")?,
		role: role
			.parse::<Role>()
			.map_err(|e| DirectoryError::Backend(anyhow::anyhow!("corrupt role in row: {e}")))?,
		first_name: row.get("first_name"),
		last_name: row.get("last_name"),
		active: row.get::<i64, _>("active") != 0,
	})
}

fn channel_from_row(row: &SqliteRow) -> Result<Channel, DirectoryError> {
	let id: String = row.get("id");
	let tenant_id: String = row.get("tenant_id");
	let kind: String = row.get("kind");
	let participants_json: String = row.get("participants");
	let allowed_roles_json: Option<String> = row.get("allowed_roles");
	let project_id: Option<String> = row.get("project_id");
	let last_message_id: Option<String> = row.get("last_message_id");

	let participants: Vec<UserId> =
		serde_json::from_str(&participants_json).map_err(DirectoryError::backend)?;
	let allowed_roles: Option<Vec<Role>> = match allowed_roles_json {
		Some(json) => Some(serde_json::from_str(&json).map_err(DirectoryError::backend)?),
		None => None,
	};

	Ok(Channel {
		id: parse_id(&id, "channel")?,
		tenant_id: parse_id(&tenant_id, "tenant")?,
		name: row.get("name"),
		kind: kind
			.parse::<ChannelKind>()
			.map_err(|e| DirectoryError::Backend(anyhow::anyhow!("corrupt channel kind: {e}")))?,
		participants,
		project_id: parse_opt_id::<ProjectId>(project_id, "project")?,
		archived: row.get::<i64, _>("archived") != 0,
		private: row.get::<i64, _>("private") != 0,
		allowed_roles,
		last_message_id: parse_opt_id::<MessageId>(last_message_id, "message")?,
		last_activity_at: row.get("last_activity_at"),
	})
}

fn message_from_row(row: &SqliteRow) -> Result<Message, DirectoryError> {
	let id: String = row.get("id");
	let channel_id: String = row.get("channel_id");
	let tenant_id: String = row.get("tenant_id");
	let sender_id: String = row.get("sender_id");
	let kind: String = row.get("kind");
	let reply_to: Option<String> = row.get("reply_to");
	let deleted_by: Option<String> = row.get("deleted_by");

	Ok(Message {
		id: parse_id(&id, "message")?,
		channel_id: parse_id(&channel_id, "channel")?,
		tenant_id: parse_id(&tenant_id, "tenant")?,
		sender_id: parse_id(&sender_id, "user")?,
		sender_name: row.get("sender_name"),
		content: row.get("content"),
		kind: kind
			.parse::<MessageKind>()
			.map_err(|e| DirectoryError::Backend(anyhow::anyhow!("corrupt message kind: {e}")))?,
		reply_to: parse_opt_id::<MessageId>(reply_to, "message")?,
		edited: row.get::<i64, _>("edited") != 0,
		edited_at: row.get("edited_at"),
		deleted: row.get::<i64, _>("deleted") != 0,
		deleted_at: row.get("deleted_at"),
		deleted_by: parse_opt_id::<UserId>(deleted_by, "user")?,
		created_at: row.get("created_at"),
	})
}

#[async_trait::async_trait]
impl DirectoryStore for SqliteDirectory {
	async fn find_account(&self, user_id: UserId) -> Result<Option<Account>, DirectoryError> {
		let row = sqlx::query("SELECT * FROM accounts WHERE user_id = ?")
			.bind(user_id.to_string())
			.fetch_optional(&self.pool)
			.await
			.map_err(DirectoryError::backend)?;

		row.as_ref().map(account_from_row).transpose()
	}

	async fn find_channel(&self, id: ChannelId, tenant_id: TenantId) -> Result<Option<Channel>, DirectoryError> {
		let row = sqlx::query("SELECT * FROM channels WHERE id = ? AND tenant_id = ?")
			.bind(id.to_string())
			.bind(tenant_id.to_string())
			.fetch_optional(&self.pool)
			.await
			.map_err(DirectoryError::backend)?;

		row.as_ref().map(channel_from_row).transpose()
	}

	async fn find_channels_for_user(
		&self,
		user_id: UserId,
		tenant_id: TenantId,
	) -> Result<Vec<Channel>, DirectoryError> {
		// participant check happens in Rust: membership is a JSON array column.
		let rows = sqlx::query("SELECT * FROM channels WHERE tenant_id = ? AND archived = 0")
			.bind(tenant_id.to_string())
			.fetch_all(&self.pool)
			.await
			.map_err(DirectoryError::backend)?;

		let mut channels = Vec::with_capacity(rows.len());
		for row in &rows {
			let channel = channel_from_row(row)?;
			if channel.is_participant(user_id) {
				channels.push(channel);
			}
		}
		Ok(channels)
	}

	async fn find_message(&self, id: MessageId, channel_id: ChannelId) -> Result<Option<Message>, DirectoryError> {
		let row = sqlx::query("SELECT * FROM messages WHERE id = ? AND channel_id = ?")
			.bind(id.to_string())
			.bind(channel_id.to_string())
			.fetch_optional(&self.pool)
			.await
			.map_err(DirectoryError::backend)?;

		row.as_ref().map(message_from_row).transpose()
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

		sqlx::query(
			"INSERT INTO messages (id, channel_id, tenant_id, sender_id, sender_name, content, kind, reply_to, \
			edited, edited_at, deleted, deleted_at, deleted_by, created_at) \
			VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, NULL, 0, NULL, NULL, ?)",
		)
		.bind(message.id.to_string())
		.bind(message.channel_id.to_string())
		.bind(message.tenant_id.to_string())
		.bind(message.sender_id.to_string())
		.bind(&message.sender_name)
		.bind(&message.content)
		.bind(message.kind.as_str())
		.bind(message.reply_to.map(|id| id.to_string()))
		.bind(message.created_at)
		.execute(&self.pool)
		.await
		.map_err(DirectoryError::backend)?;

		Ok(message)
	}

	async fn update_message(&self, id: MessageId, patch: MessagePatch) -> Result<Message, DirectoryError> {
		let affected = match &patch {
			MessagePatch::Edit { content, at_ms } => {
				sqlx::query("UPDATE messages SET content = ?, edited = 1, edited_at = ? WHERE id = ?")
					.bind(content)
					.bind(at_ms)
					.bind(id.to_string())
					.execute(&self.pool)
					.await
					.map_err(DirectoryError::backend)?
					.rows_affected()
			}
			MessagePatch::Delete { by, at_ms } => {
				sqlx::query("UPDATE messages SET deleted = 1, deleted_at = ?, deleted_by = ? WHERE id = ?")
					.bind(at_ms)
					.bind(by.to_string())
					.bind(id.to_string())
					.execute(&self.pool)
					.await
					.map_err(DirectoryError::backend)?
					.rows_affected()
			}
		};

		if affected == 0 {
			return Err(DirectoryError::NotFound("message"));
		}

		let row = sqlx::query("SELECT * FROM messages WHERE id = ?")
			.bind(id.to_string())
			.fetch_one(&self.pool)
			.await
			.map_err(DirectoryError::backend)?;

		message_from_row(&row)
	}

	async fn update_channel_activity(
		&self,
		id: ChannelId,
		last_message_id: MessageId,
		at_ms: i64,
	) -> Result<(), DirectoryError> {
		let affected = sqlx::query("UPDATE channels SET last_message_id = ?, last_activity_at = ? WHERE id = ?")
			.bind(last_message_id.to_string())
			.bind(at_ms)
			.bind(id.to_string())
			.execute(&self.pool)
			.await
			.map_err(DirectoryError::backend)?
			.rows_affected();

		if affected == 0 {
			return Err(DirectoryError::NotFound("channel"));
		}
		Ok(())
	}

	async fn add_participant(&self, channel_id: ChannelId, user_id: UserId) -> Result<(), DirectoryError> {
		mutate_participants(&self.pool, channel_id, |participants| {
			if !participants.contains(&user_id) {
				participants.push(user_id);
			}
		})
		.await
	}

	async fn remove_participant(&self, channel_id: ChannelId, user_id: UserId) -> Result<(), DirectoryError> {
		mutate_participants(&self.pool, channel_id, |participants| {
			participants.retain(|p| *p != user_id);
		})
		.await
	}
}

async fn mutate_participants(
	pool: &sqlx::SqlitePool,
	channel_id: ChannelId,
	f: impl FnOnce(&mut Vec<UserId>),
) -> Result<(), DirectoryError> {
	let row = sqlx::query("SELECT * FROM channels WHERE id = ?")
		.bind(channel_id.to_string())
		.fetch_optional(pool)
		.await
		.map_err(DirectoryError::backend)?
		.ok_or(DirectoryError::NotFound("channel"))?;

	let channel = channel_from_row(&row)?;
	if channel.kind == ChannelKind::Direct {
		return Err(DirectoryError::Constraint(
			"direct channel membership is fixed at creation".to_string(),
		));
	}

	let mut participants = channel.participants;
	f(&mut participants);

	if participants.len() > parley_domain::MAX_CHANNEL_PARTICIPANTS {
		return Err(DirectoryError::Constraint(format!(
			"participant count would exceed {}",
			parley_domain::MAX_CHANNEL_PARTICIPANTS
		)));
	}

	let json = serde_json::to_string(&participants).map_err(DirectoryError::backend)?;
	sqlx::query("UPDATE channels SET participants = ? WHERE id = ?")
		.bind(json)
		.bind(channel_id.to_string())
		.execute(pool)
		.await
		.map_err(DirectoryError::backend)?;

	Ok(())
}
