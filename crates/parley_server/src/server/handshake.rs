#![forbid(unsafe_code)]

use std::sync::Arc;

use parley_directory::{AuthError, DirectoryError, DirectoryStore, IdentityVerifier};
use parley_domain::{ChannelId, Principal, RoomKey};
use thiserror::Error;
use tracing::debug;

/// Handshake failures; every variant aborts connection establishment with
/// no state mutated.
#[derive(Debug, Error)]
pub enum HandshakeError {
	#[error(transparent)]
	Auth(#[from] AuthError),

	#[error("directory store failure: {0}")]
	Directory(#[from] DirectoryError),
}

impl HandshakeError {
	/// Client-visible message; directory failures stay generic.
	pub fn client_message(&self) -> String {
		match self {
			HandshakeError::Auth(e) => e.to_string(),
			HandshakeError::Directory(_) => "internal error".to_string(),
		}
	}
}

/// Result of a successful handshake: the principal plus its initial rooms.
#[derive(Debug, Clone)]
pub struct SessionTicket {
	pub principal: Principal,
	pub channel_ids: Vec<ChannelId>,
	pub rooms: Vec<RoomKey>,
}

/// Authenticates inbound connections and resolves their room memberships.
pub struct SessionHandshake {
	verifier: Arc<dyn IdentityVerifier>,
	directory: Arc<dyn DirectoryStore>,
}

impl SessionHandshake {
	pub fn new(verifier: Arc<dyn IdentityVerifier>, directory: Arc<dyn DirectoryStore>) -> Self {
		Self { verifier, directory }
	}

	/// Verify the credential and build a session ticket.
	///
	/// Pure resolution: registration in the presence tracker and room hub
	/// happens only after this returns Ok, so a rejected handshake leaves
	/// no trace.
	pub async fn authenticate(&self, token: Option<&str>) -> Result<SessionTicket, HandshakeError> {
		let token = match token {
			Some(t) if !t.trim().is_empty() => t,
			_ => return Err(AuthError::MissingToken.into()),
		};

		let claims = self.verifier.verify(token).await?;

		let account = self
			.directory
			.find_account(claims.user_id)
			.await?
			.ok_or(AuthError::UnknownAccount)?;

		if !account.active {
			return Err(AuthError::AccountInactive.into());
		}
		// multi-tenant isolation: no tenant, no rooms, no connection
		let tenant_id = account.tenant_id.ok_or(AuthError::NoTenant)?;

		let principal = Principal {
			user_id: account.user_id,
			tenant_id,
			role: account.role,
			first_name: account.first_name,
			last_name: account.last_name,
		};

		// membership is queried fresh on every handshake; archived channels
		// are filtered by the store
		let channels = self
			.directory
			.find_channels_for_user(principal.user_id, principal.tenant_id)
			.await?;

		let channel_ids = channels.iter().map(|ch| ch.id).collect::<Vec<_>>();
		let mut rooms = Vec::with_capacity(channel_ids.len() + 1);
		rooms.push(principal.tenant_room());
		rooms.extend(channel_ids.iter().map(|id| RoomKey::Channel(*id)));

		debug!(
			user_id = %principal.user_id,
			tenant_id = %principal.tenant_id,
			channels = channel_ids.len(),
			"handshake authenticated"
		);

		Ok(SessionTicket {
			principal,
			channel_ids,
			rooms,
		})
	}
}
