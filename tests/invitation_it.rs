mod common;

// std
use std::sync::Arc;
// self
use authn_broker::{
	auth::TokenSecret,
	identity::UserService,
	resource::{InvitationError, InvitationService, InvitationStatus},
	store::MemoryStore,
};
use common::{app_id, seeded_directory, user_id};
use time::{Duration, OffsetDateTime};

#[tokio::test]
async fn redemption_activates_the_invited_user_once() {
	let directory = seeded_directory();
	let invited = authn_broker::identity::User {
		id: user_id("user-invited"),
		ou_id: authn_broker::auth::OuId::new("ou-1").expect("OU fixture should be valid."),
		user_type: "person".into(),
		active: false,
		attributes: serde_json::Map::new(),
	};

	directory.add_user(invited, None);

	let service = InvitationService::new(Arc::new(MemoryStore::new()));
	let invitation = service
		.create(user_id("user-invited"), app_id("app-basic"))
		.await
		.expect("Create should succeed.");

	assert_eq!(invitation.status, InvitationStatus::Pending);
	assert!(invitation.expires_at > OffsetDateTime::now_utc() + Duration::days(6));

	let now = OffsetDateTime::now_utc();
	let redeemed = service
		.redeem(&invitation.token, now)
		.await
		.expect("Pending invitation should redeem.");

	assert_eq!(redeemed.status, InvitationStatus::Redeemed);
	assert_eq!(redeemed.redeemed_at, Some(now));

	// The onboarding step sets the credential and activates the account.
	let activated = directory
		.set_credentials_and_activate(&user_id("user-invited"), &TokenSecret::new("p"))
		.await
		.expect("Activation should succeed.");

	assert!(activated.active);

	assert_eq!(
		service.redeem(&invitation.token, OffsetDateTime::now_utc()).await,
		Err(InvitationError::AlreadyRedeemed),
		"Second redemption of the same token must fail."
	);
}

#[tokio::test]
async fn expiry_and_revocation_are_terminal() {
	let service =
		InvitationService::new(Arc::new(MemoryStore::new())).with_ttl(Duration::hours(1));
	let invitation = service
		.create(user_id("user-1"), app_id("app-basic"))
		.await
		.expect("Create should succeed.");
	let late = invitation.expires_at + Duration::seconds(1);

	assert_eq!(service.redeem(&invitation.token, late).await, Err(InvitationError::Expired));
	assert_eq!(
		service
			.get_by_id(&invitation.id)
			.await
			.expect("Invitation should persist.")
			.status,
		InvitationStatus::Expired
	);

	let second = service
		.create(user_id("user-1"), app_id("app-basic"))
		.await
		.expect("Create should succeed.");

	service.revoke(&second.id).await.expect("Revoke should succeed.");

	assert_eq!(
		service.redeem(&second.token, OffsetDateTime::now_utc()).await,
		Err(InvitationError::Revoked)
	);
}

#[tokio::test]
async fn tokens_are_unique_and_unguessable_shape() {
	let service = InvitationService::new(Arc::new(MemoryStore::new()));
	let mut tokens = std::collections::HashSet::new();

	for _ in 0..32 {
		let invitation = service
			.create(user_id("user-1"), app_id("app-basic"))
			.await
			.expect("Create should succeed.");

		assert!(tokens.insert(invitation.token.clone()), "Tokens must not repeat.");
		assert!(invitation.token.len() >= 43, "256 bits of URL-safe base64.");
	}
}

#[tokio::test]
async fn error_codes_are_stable() {
	assert_eq!(InvitationError::InvalidToken.code(), "INV-40006");
	assert_eq!(InvitationError::AlreadyRedeemed.code(), "INV-40003");
	assert_eq!(InvitationError::Expired.code(), "INV-40004");
	assert_eq!(InvitationError::Revoked.code(), "INV-40005");
	assert_eq!(
		InvitationError::Backend { message: "db".into() }.code(),
		"INV-50001"
	);
}
