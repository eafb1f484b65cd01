#![forbid(unsafe_code)]

use parley_directory::DirectoryError;
use parley_protocol::ValidationError;
use thiserror::Error;

/// Event-time failures: reported to the originating connection only, the
/// connection itself survives.
#[derive(Debug, Error)]
pub enum ChatError {
	#[error("rate limit exceeded")]
	RateLimited,

	#[error("access denied")]
	AccessDenied,

	#[error("invalid payload: {0}")]
	InvalidPayload(String),

	#[error("reply target does not resolve in this channel")]
	ReplyTargetInvalid,

	#[error("message is not editable")]
	NotEditable,

	#[error("message not found")]
	NotFound,

	/// Persistence/collaborator failure; the client-visible message never
	/// carries internal detail.
	#[error("internal error")]
	Internal,
}

impl ChatError {
	/// Stable name for metrics labels.
	pub const fn kind_str(&self) -> &'static str {
		match self {
			ChatError::RateLimited => "rate_limited",
			ChatError::AccessDenied => "access_denied",
			ChatError::InvalidPayload(_) => "invalid_payload",
			ChatError::ReplyTargetInvalid => "reply_target_invalid",
			ChatError::NotEditable => "not_editable",
			ChatError::NotFound => "not_found",
			ChatError::Internal => "internal",
		}
	}
}

impl From<ValidationError> for ChatError {
	fn from(e: ValidationError) -> Self {
		ChatError::InvalidPayload(e.to_string())
	}
}

impl From<DirectoryError> for ChatError {
	fn from(e: DirectoryError) -> Self {
		// the source is logged here; clients only ever see the generic form
		tracing::error!(error = %e, "directory store failure during event handling");
		ChatError::Internal
	}
}
