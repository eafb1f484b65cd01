#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as _, anyhow};
use parley_directory::SecretString;
use serde::Deserialize;
use tracing::info;

use crate::server::rate_limit::RateLimitConfig;

/// Default config path: `~/.parley/config.toml`.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
	let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
	Ok(home.join(".parley").join("config.toml"))
}

/// Load the server config from TOML and env overrides.
pub fn load_server_config_from_path(path: &Path) -> anyhow::Result<ServerConfig> {
	let file_cfg = read_toml_if_exists(path)
		.with_context(|| format!("read config from {}", path.display()))?
		.unwrap_or_default();

	let mut cfg = ServerConfig::from_file(file_cfg);

	apply_env_overrides(&mut cfg);

	Ok(cfg)
}

/// Server config (v1).
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
	pub server: ServerSettings,
	pub limits: RateLimitConfig,
	pub persistence: PersistenceSettings,
}

/// Core server settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
	/// PEM-encoded certificate path for QUIC/TLS.
	pub tls_cert_path: Option<PathBuf>,
	/// PEM-encoded private key path for QUIC/TLS.
	pub tls_key_path: Option<PathBuf>,
	/// Optional metrics exporter bind address (host:port).
	pub metrics_bind: Option<String>,
	/// Optional health/readiness HTTP bind address (host:port).
	pub health_bind: Option<String>,
	/// HMAC secret for stateless access tokens. Mandatory: every
	/// connection must authenticate.
	pub auth_hmac_secret: Option<SecretString>,
	/// Budget for the connection handshake.
	pub handshake_timeout: Duration,
	/// Per-connection outbound queue bound.
	pub outbound_queue_capacity: usize,
	/// Maximum wire frame size in bytes.
	pub max_frame_bytes: usize,
}

impl Default for ServerSettings {
	fn default() -> Self {
		Self {
			tls_cert_path: None,
			tls_key_path: None,
			metrics_bind: None,
			health_bind: None,
			auth_hmac_secret: None,
			handshake_timeout: Duration::from_secs(10),
			outbound_queue_capacity: 256,
			max_frame_bytes: parley_protocol::DEFAULT_MAX_FRAME_SIZE,
		}
	}
}

/// Persistence settings.
#[derive(Debug, Clone, Default)]
pub struct PersistenceSettings {
	/// Directory store database URL (sqlite:). Absent means the in-memory
	/// dev directory.
	pub database_url: Option<String>,
	/// Write the chat audit trail (requires `database_url`).
	pub audit_enabled: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
	#[serde(default)]
	server: FileServerSettings,

	#[serde(default)]
	limits: FileLimitSettings,

	#[serde(default)]
	persistence: FilePersistenceSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileServerSettings {
	tls_cert_path: Option<String>,
	tls_key_path: Option<String>,
	metrics_bind: Option<String>,
	health_bind: Option<String>,
	auth_hmac_secret: Option<String>,
	handshake_timeout_secs: Option<u64>,
	outbound_queue_capacity: Option<usize>,
	max_frame_bytes: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileLimitSettings {
	message_per_minute: Option<u32>,
	typing_per_minute: Option<u32>,
	join_per_minute: Option<u32>,
	channel_create_per_hour: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FilePersistenceSettings {
	database_url: Option<String>,
	audit_enabled: Option<bool>,
}

impl ServerConfig {
	fn from_file(file: FileConfig) -> Self {
		let defaults = ServerSettings::default();
		let limit_defaults = RateLimitConfig::default();

		Self {
			server: ServerSettings {
				tls_cert_path: file.server.tls_cert_path.filter(|s| !s.trim().is_empty()).map(PathBuf::from),
				tls_key_path: file.server.tls_key_path.filter(|s| !s.trim().is_empty()).map(PathBuf::from),
				metrics_bind: file.server.metrics_bind.filter(|s| !s.trim().is_empty()),
				health_bind: file.server.health_bind.filter(|s| !s.trim().is_empty()),
				auth_hmac_secret: file
					.server
					.auth_hmac_secret
					.filter(|s| !s.trim().is_empty())
					.map(SecretString::new),
				handshake_timeout: file
					.server
					.handshake_timeout_secs
					.filter(|v| *v > 0)
					.map(Duration::from_secs)
					.unwrap_or(defaults.handshake_timeout),
				outbound_queue_capacity: file
					.server
					.outbound_queue_capacity
					.filter(|v| *v > 0)
					.unwrap_or(defaults.outbound_queue_capacity),
				max_frame_bytes: file
					.server
					.max_frame_bytes
					.filter(|v| *v > 0)
					.unwrap_or(defaults.max_frame_bytes),
			},
			limits: RateLimitConfig {
				message_per_minute: file.limits.message_per_minute.unwrap_or(limit_defaults.message_per_minute),
				typing_per_minute: file.limits.typing_per_minute.unwrap_or(limit_defaults.typing_per_minute),
				join_per_minute: file.limits.join_per_minute.unwrap_or(limit_defaults.join_per_minute),
				channel_create_per_hour: file
					.limits
					.channel_create_per_hour
					.unwrap_or(limit_defaults.channel_create_per_hour),
			},
			persistence: PersistenceSettings {
				database_url: file.persistence.database_url.filter(|s| !s.trim().is_empty()),
				audit_enabled: file.persistence.audit_enabled.unwrap_or(false),
			},
		}
	}
}

fn parse_env_bool(v: &str) -> Option<bool> {
	match v.trim().to_ascii_lowercase().as_str() {
		"1" | "true" | "yes" | "on" => Some(true),
		"0" | "false" | "no" | "off" => Some(false),
		_ => None,
	}
}

fn read_toml_if_exists(path: &Path) -> anyhow::Result<Option<FileConfig>> {
	match fs::read_to_string(path) {
		Ok(s) => {
			let cfg: FileConfig = toml::from_str(&s).context("parse TOML")?;
			Ok(Some(cfg))
		}
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
		Err(e) => Err(anyhow!(e).context("read config file")),
	}
}

fn apply_env_overrides(cfg: &mut ServerConfig) {
	if let Ok(v) = std::env::var("PARLEY_AUTH_HMAC_SECRET") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.server.auth_hmac_secret = Some(SecretString::new(v));
			info!("server auth: auth_hmac_secret overridden by env");
		}
	}

	if let Ok(v) = std::env::var("PARLEY_TLS_CERT") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.server.tls_cert_path = Some(PathBuf::from(v));
			info!("server config: tls_cert_path overridden by env");
		}
	}

	if let Ok(v) = std::env::var("PARLEY_TLS_KEY") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.server.tls_key_path = Some(PathBuf::from(v));
			info!("server config: tls_key_path overridden by env");
		}
	}

	if let Ok(v) = std::env::var("PARLEY_METRICS_BIND") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.server.metrics_bind = Some(v);
			info!("server config: metrics_bind overridden by env");
		}
	}

	if let Ok(v) = std::env::var("PARLEY_HEALTH_BIND") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.server.health_bind = Some(v);
			info!("server config: health_bind overridden by env");
		}
	}

	if let Ok(v) = std::env::var("PARLEY_HANDSHAKE_TIMEOUT_SECS")
		&& let Ok(secs) = v.trim().parse::<u64>()
		&& secs > 0
	{
		cfg.server.handshake_timeout = Duration::from_secs(secs);
		info!(secs, "server config: handshake_timeout overridden by env");
	}

	if let Ok(v) = std::env::var("PARLEY_LIMIT_MESSAGE_PER_MINUTE")
		&& let Ok(rate) = v.trim().parse::<u32>()
	{
		cfg.limits.message_per_minute = rate;
		info!(rate, "limits: message_per_minute overridden by env");
	}

	if let Ok(v) = std::env::var("PARLEY_LIMIT_TYPING_PER_MINUTE")
		&& let Ok(rate) = v.trim().parse::<u32>()
	{
		cfg.limits.typing_per_minute = rate;
		info!(rate, "limits: typing_per_minute overridden by env");
	}

	if let Ok(v) = std::env::var("PARLEY_LIMIT_JOIN_PER_MINUTE")
		&& let Ok(rate) = v.trim().parse::<u32>()
	{
		cfg.limits.join_per_minute = rate;
		info!(rate, "limits: join_per_minute overridden by env");
	}

	if let Ok(v) = std::env::var("PARLEY_LIMIT_CHANNEL_CREATE_PER_HOUR")
		&& let Ok(rate) = v.trim().parse::<u32>()
	{
		cfg.limits.channel_create_per_hour = rate;
		info!(rate, "limits: channel_create_per_hour overridden by env");
	}

	if let Ok(v) = std::env::var("PARLEY_DATABASE_URL") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.persistence.database_url = Some(v);
			info!("persistence: database_url overridden by env");
		}
	}

	if let Ok(v) = std::env::var("PARLEY_AUDIT_ENABLED")
		&& let Some(enabled) = parse_env_bool(&v)
	{
		cfg.persistence.audit_enabled = enabled;
		info!(enabled, "persistence: audit_enabled overridden by env");
	}
}
