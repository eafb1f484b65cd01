#![forbid(unsafe_code)]

use std::sync::Arc;

use parley_directory::{DirectoryError, DirectoryStore};
use parley_domain::{ChannelId, Principal};

/// Membership/role predicate over the directory store.
///
/// Never mutates state and never caches: membership can change between
/// events, so every check re-queries the store.
#[derive(Clone)]
pub struct AccessGuard {
	directory: Arc<dyn DirectoryStore>,
}

impl AccessGuard {
	pub fn new(directory: Arc<dyn DirectoryStore>) -> Self {
		Self { directory }
	}

	/// A principal may access a channel iff it exists in the principal's
	/// tenant, is not archived, lists the principal as a participant, and
	/// its role allow-list (if any) includes the principal's role.
	pub async fn can_access(&self, principal: &Principal, channel_id: ChannelId) -> Result<bool, DirectoryError> {
		let Some(channel) = self.directory.find_channel(channel_id, principal.tenant_id).await? else {
			return Ok(false);
		};

		Ok(!channel.archived
			&& channel.is_participant(principal.user_id)
			&& channel.allows_role(principal.role))
	}
}
