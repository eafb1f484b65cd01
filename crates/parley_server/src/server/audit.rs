#![forbid(unsafe_code)]

use anyhow::{Context, anyhow};
use parley_domain::{ChannelId, MessageId, TenantId, UserId};

/// Best-effort audit trail for message mutations (send/edit/delete).
///
/// Failures are logged by callers and never surfaced to clients.
#[derive(Clone)]
pub struct AuditService {
	backend: Option<AuditBackend>,
}

#[derive(Clone)]
enum AuditBackend {
	Sqlite(sqlx::SqlitePool),
	Postgres(sqlx::PgPool),
	Mysql(sqlx::MySqlPool),
}

impl AuditService {
	pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
		let backend = if database_url.starts_with("sqlite:") {
			let pool = sqlx::SqlitePool::connect(database_url).await.context("connect sqlite")?;
			sqlx::query(
				"CREATE TABLE IF NOT EXISTS chat_audit (\
					tenant_id TEXT NOT NULL,\
					channel_id TEXT NOT NULL,\
					user_id TEXT NOT NULL,\
					action TEXT NOT NULL,\
					message_id TEXT,\
					created_at INTEGER NOT NULL DEFAULT (strftime('%s','now')))",
			)
			.execute(&pool)
			.await
			.context("create chat_audit (sqlite)")?;
			AuditBackend::Sqlite(pool)
		} else if database_url.starts_with("postgres:") || database_url.starts_with("postgresql:") {
			let pool = sqlx::PgPool::connect(database_url).await.context("connect postgres")?;
			sqlx::query(
				"CREATE TABLE IF NOT EXISTS chat_audit (\
					tenant_id TEXT NOT NULL,\
					channel_id TEXT NOT NULL,\
					user_id TEXT NOT NULL,\
					action TEXT NOT NULL,\
					message_id TEXT,\
					created_at TIMESTAMPTZ NOT NULL DEFAULT NOW())",
			)
			.execute(&pool)
			.await
			.context("create chat_audit (postgres)")?;
			AuditBackend::Postgres(pool)
		} else if database_url.starts_with("mysql:") || database_url.starts_with("mariadb:") {
			let pool = sqlx::MySqlPool::connect(database_url).await.context("connect mysql")?;
			sqlx::query(
				"CREATE TABLE IF NOT EXISTS chat_audit (\
					tenant_id VARCHAR(36) NOT NULL,\
					channel_id VARCHAR(36) NOT NULL,\
					user_id VARCHAR(36) NOT NULL,\
					action VARCHAR(32) NOT NULL,\
					message_id VARCHAR(36),\
					created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP)",
			)
			.execute(&pool)
			.await
			.context("create chat_audit (mysql)")?;
			AuditBackend::Mysql(pool)
		} else {
			return Err(anyhow!("unsupported database_url for audit"));
		};

		Ok(Self { backend: Some(backend) })
	}

	pub fn disabled() -> Self {
		Self { backend: None }
	}

	pub async fn record_message_event(
		&self,
		tenant_id: TenantId,
		channel_id: ChannelId,
		user_id: UserId,
		action: &str,
		message_id: Option<MessageId>,
	) -> anyhow::Result<()> {
		let Some(backend) = &self.backend else {
			return Ok(());
		};

		let message_id = message_id.map(|id| id.to_string());

		match backend {
			AuditBackend::Sqlite(pool) => {
				sqlx::query(
					"INSERT INTO chat_audit (tenant_id, channel_id, user_id, action, message_id) \
					VALUES (?, ?, ?, ?, ?)",
				)
				.bind(tenant_id.to_string())
				.bind(channel_id.to_string())
				.bind(user_id.to_string())
				.bind(action)
				.bind(message_id)
				.execute(pool)
				.await
				.context("insert chat_audit (sqlite)")?;
			}
			AuditBackend::Postgres(pool) => {
				sqlx::query(
					"INSERT INTO chat_audit (tenant_id, channel_id, user_id, action, message_id) \
					VALUES ($1, $2, $3, $4, $5)",
				)
				.bind(tenant_id.to_string())
				.bind(channel_id.to_string())
				.bind(user_id.to_string())
				.bind(action)
				.bind(message_id)
				.execute(pool)
				.await
				.context("insert chat_audit (postgres)")?;
			}
			AuditBackend::Mysql(pool) => {
				sqlx::query(
					"INSERT INTO chat_audit (tenant_id, channel_id, user_id, action, message_id) \
					VALUES (?, ?, ?, ?, ?)",
				)
				.bind(tenant_id.to_string())
				.bind(channel_id.to_string())
				.bind(user_id.to_string())
				.bind(action)
				.bind(message_id)
				.execute(pool)
				.await
				.context("insert chat_audit (mysql)")?;
			}
		}

		Ok(())
	}
}
