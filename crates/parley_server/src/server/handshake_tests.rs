#![forbid(unsafe_code)]

use std::sync::Arc;

use parley_directory::{
	AuthError, HmacVerifier, InMemoryDirectory, SecretString, identity::issue_hmac_token,
};
use parley_domain::{
	Account, Channel, ChannelId, ChannelKind, Role, RoomKey, TenantId, UserId,
};
use parley_util::time::unix_secs_now;

use crate::server::handshake::{HandshakeError, SessionHandshake};

const SECRET: &str = "handshake-secret";

fn account(tenant: Option<TenantId>, active: bool) -> Account {
	Account {
		user_id: UserId::new_v4(),
		tenant_id: tenant,
		role: Role::Member,
		first_name: "Ada".to_string(),
		last_name: "Lovelace".to_string(),
		active,
	}
}

fn group_channel(tenant: TenantId, participants: Vec<UserId>) -> Channel {
	Channel {
		id: ChannelId::new_v4(),
		tenant_id: tenant,
		name: "general".to_string(),
		kind: ChannelKind::Group,
		participants,
		project_id: None,
		archived: false,
		private: false,
		allowed_roles: None,
		last_message_id: None,
		last_activity_at: None,
	}
}

fn bed() -> (Arc<InMemoryDirectory>, SessionHandshake) {
	let directory = Arc::new(InMemoryDirectory::new());
	let store: Arc<dyn parley_directory::DirectoryStore> = directory.clone();
	let verifier = Arc::new(HmacVerifier::new(SecretString::new(SECRET)));
	let handshake = SessionHandshake::new(verifier, store);
	(directory, handshake)
}

fn token_for(user: UserId) -> String {
	issue_hmac_token(user, unix_secs_now() + 600, SECRET)
}

fn assert_auth_err(result: Result<crate::server::handshake::SessionTicket, HandshakeError>, expected: AuthError) {
	match result {
		Err(HandshakeError::Auth(e)) => assert_eq!(e, expected),
		other => panic!("expected {expected:?}, got: {other:?}"),
	}
}

#[tokio::test]
async fn builds_ticket_with_tenant_and_channel_rooms() {
	let (directory, handshake) = bed();
	let tenant = TenantId::new_v4();
	let acct = account(Some(tenant), true);
	let user = acct.user_id;
	directory.upsert_account(acct);

	let mine = group_channel(tenant, vec![user, UserId::new_v4()]);
	let mine_id = mine.id;
	directory.insert_channel(mine).unwrap();

	// not a participant here
	directory
		.insert_channel(group_channel(tenant, vec![UserId::new_v4()]))
		.unwrap();

	// archived channels never populate rooms
	let archived = group_channel(tenant, vec![user]);
	let archived_id = archived.id;
	directory.insert_channel(archived).unwrap();
	directory.set_archived(archived_id, true);

	// other-tenant membership never leaks across the isolation boundary
	let other_tenant = TenantId::new_v4();
	directory
		.insert_channel(group_channel(other_tenant, vec![user, UserId::new_v4()]))
		.unwrap();

	let ticket = handshake.authenticate(Some(&token_for(user))).await.expect("handshake");

	assert_eq!(ticket.principal.user_id, user);
	assert_eq!(ticket.principal.tenant_id, tenant);
	assert_eq!(ticket.channel_ids, vec![mine_id]);
	assert_eq!(ticket.rooms, vec![RoomKey::Tenant(tenant), RoomKey::Channel(mine_id)]);
}

#[tokio::test]
async fn missing_token_is_rejected() {
	let (_, handshake) = bed();
	assert_auth_err(handshake.authenticate(None).await, AuthError::MissingToken);
	assert_auth_err(handshake.authenticate(Some("   ")).await, AuthError::MissingToken);
}

#[tokio::test]
async fn garbage_token_is_rejected() {
	let (_, handshake) = bed();
	assert_auth_err(handshake.authenticate(Some("v1.garbage")).await, AuthError::InvalidToken);
}

#[tokio::test]
async fn expired_token_is_rejected_as_expired() {
	let (directory, handshake) = bed();
	let acct = account(Some(TenantId::new_v4()), true);
	let user = acct.user_id;
	directory.upsert_account(acct);

	let token = issue_hmac_token(user, unix_secs_now().saturating_sub(5), SECRET);
	assert_auth_err(handshake.authenticate(Some(&token)).await, AuthError::Expired);
}

#[tokio::test]
async fn unknown_account_is_rejected() {
	let (_, handshake) = bed();
	let token = token_for(UserId::new_v4());
	assert_auth_err(handshake.authenticate(Some(&token)).await, AuthError::UnknownAccount);
}

#[tokio::test]
async fn inactive_account_is_rejected() {
	let (directory, handshake) = bed();
	let acct = account(Some(TenantId::new_v4()), false);
	let user = acct.user_id;
	directory.upsert_account(acct);

	assert_auth_err(handshake.authenticate(Some(&token_for(user))).await, AuthError::AccountInactive);
}

#[tokio::test]
async fn tenantless_account_is_rejected() {
	let (directory, handshake) = bed();
	let acct = account(None, true);
	let user = acct.user_id;
	directory.upsert_account(acct);

	assert_auth_err(handshake.authenticate(Some(&token_for(user))).await, AuthError::NoTenant);
}
