//! Invitation resource family: single-use tokens onboarding pre-created users.

// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
// self
use crate::{
	_prelude::*,
	auth::{ApplicationId, UserId, id::random_string},
	resource::{ResourceExporter, ResourceRules},
	store::{RecordStore, ResourceRecord, StoreError, StoreFuture},
};

/// Default invitation lifetime: seven days.
pub const DEFAULT_INVITATION_TTL: Duration = Duration::seconds(7 * 24 * 3_600);

const TOKEN_BYTES: usize = 32;
const TOKEN_RETRY_LIMIT: usize = 8;

/// Lifecycle status of an invitation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvitationStatus {
	/// Issued and redeemable until expiry.
	Pending,
	/// Redeemed exactly once; terminal.
	Redeemed,
	/// Reached its expiry before redemption; terminal.
	Expired,
	/// Administratively revoked; terminal.
	Revoked,
}

/// Invitation record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Invitation {
	/// Unique invitation id.
	pub id: String,
	/// Pre-created user the invitation onboards.
	pub user_id: UserId,
	/// Application the invitation was issued for.
	pub application_id: ApplicationId,
	/// URL-safe base64 of 256 random bits; globally unique.
	pub token: String,
	/// Lifecycle status.
	pub status: InvitationStatus,
	/// Instant after which the invitation can no longer be redeemed.
	pub expires_at: OffsetDateTime,
	/// Creation instant.
	pub created_at: OffsetDateTime,
	/// Redemption instant; immutable once set.
	pub redeemed_at: Option<OffsetDateTime>,
}

/// Errors raised by the invitation family.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum InvitationError {
	/// The request is structurally invalid.
	#[error("Invalid invitation request: {message}.")]
	InvalidRequest {
		/// Validation failure text.
		message: String,
	},
	/// No invitation matched the requested id.
	#[error("Invitation `{id}` was not found.")]
	NotFound {
		/// Requested id.
		id: String,
	},
	/// The invitation was already redeemed.
	#[error("Invitation has already been redeemed.")]
	AlreadyRedeemed,
	/// The invitation expired before redemption.
	#[error("Invitation has expired.")]
	Expired,
	/// The invitation was revoked.
	#[error("Invitation has been revoked.")]
	Revoked,
	/// No invitation matched the presented token.
	#[error("Invitation token is invalid.")]
	InvalidToken,
	/// Underlying storage failure.
	#[error("Invitation storage failure: {message}.")]
	Backend {
		/// Redacted upstream failure text.
		message: String,
	},
}
impl InvitationError {
	/// Returns the stable client-facing code for this error.
	pub fn code(&self) -> &'static str {
		match self {
			Self::InvalidRequest { .. } => "INV-40001",
			Self::NotFound { .. } => "INV-40002",
			Self::AlreadyRedeemed => "INV-40003",
			Self::Expired => "INV-40004",
			Self::Revoked => "INV-40005",
			Self::InvalidToken => "INV-40006",
			Self::Backend { .. } => "INV-50001",
		}
	}

	/// Classifies the error as a client or server failure.
	pub fn kind(&self) -> crate::error::ErrorKind {
		match self {
			Self::Backend { .. } => crate::error::ErrorKind::Server,
			_ => crate::error::ErrorKind::Client,
		}
	}

	fn from_store(e: StoreError) -> Self {
		match e {
			StoreError::NotFound { id } => Self::NotFound { id },
			other => Self::Backend { message: other.to_string() },
		}
	}
}

/// Generates a URL-safe base64 token from 32 random bytes.
pub fn generate_invitation_token() -> String {
	let mut bytes = [0_u8; TOKEN_BYTES];

	rand::rng().fill_bytes(&mut bytes);

	URL_SAFE_NO_PAD.encode(bytes)
}

/// Service exposing invitations over a mutable database store.
///
/// Invitations are never layered over declarative files; the family is
/// database-backed in every deployment.
pub struct InvitationService {
	store: Arc<dyn RecordStore<Invitation>>,
	ttl: Duration,
}
impl Debug for InvitationService {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("InvitationService").field("ttl", &self.ttl).finish()
	}
}
impl InvitationService {
	/// Builds the service with the default seven-day lifetime.
	pub fn new(store: Arc<dyn RecordStore<Invitation>>) -> Self {
		Self { store, ttl: DEFAULT_INVITATION_TTL }
	}

	/// Overrides the invitation lifetime.
	pub fn with_ttl(mut self, ttl: Duration) -> Self {
		self.ttl = ttl;

		self
	}

	/// Issues a pending invitation for a pre-created user.
	pub async fn create(
		&self,
		user_id: UserId,
		application_id: ApplicationId,
	) -> Result<Invitation, InvitationError> {
		let now = OffsetDateTime::now_utc();
		let token = self.unique_token().await?;
		let invitation = Invitation {
			id: format!("inv-{}", random_string(16)),
			user_id,
			application_id,
			token,
			status: InvitationStatus::Pending,
			expires_at: now + self.ttl,
			created_at: now,
			redeemed_at: None,
		};

		self.store
			.create(ResourceRecord::new(invitation.id.clone(), invitation.clone()))
			.await
			.map_err(InvitationError::from_store)?;

		Ok(invitation)
	}

	/// Fetches an invitation by id.
	pub async fn get_by_id(&self, id: &str) -> Result<Invitation, InvitationError> {
		self.store
			.get(id)
			.await
			.map(|record| record.payload)
			.map_err(InvitationError::from_store)
	}

	/// Fetches an invitation by its token.
	pub async fn get_by_token(&self, token: &str) -> Result<Invitation, InvitationError> {
		self.store
			.get_by_field(token, |invitation| Some(invitation.token.clone()))
			.await
			.map(|record| record.payload)
			.map_err(|e| match e {
				StoreError::NotFound { .. } => InvitationError::InvalidToken,
				other => InvitationError::from_store(other),
			})
	}

	/// Redeems a pending, unexpired invitation at `now`.
	///
	/// A pending invitation past its expiry transitions to `Expired` and the
	/// call fails; terminal statuses map to their typed errors. `redeemed_at`
	/// is set exactly once.
	pub async fn redeem(
		&self,
		token: &str,
		now: OffsetDateTime,
	) -> Result<Invitation, InvitationError> {
		let mut invitation = self.get_by_token(token).await?;

		match invitation.status {
			InvitationStatus::Redeemed => return Err(InvitationError::AlreadyRedeemed),
			InvitationStatus::Expired => return Err(InvitationError::Expired),
			InvitationStatus::Revoked => return Err(InvitationError::Revoked),
			InvitationStatus::Pending => {},
		}

		if now >= invitation.expires_at {
			invitation.status = InvitationStatus::Expired;

			self.store
				.update(ResourceRecord::new(invitation.id.clone(), invitation))
				.await
				.map_err(InvitationError::from_store)?;

			return Err(InvitationError::Expired);
		}

		invitation.status = InvitationStatus::Redeemed;
		invitation.redeemed_at = Some(now);

		self.store
			.update(ResourceRecord::new(invitation.id.clone(), invitation.clone()))
			.await
			.map_err(InvitationError::from_store)?;

		Ok(invitation)
	}

	/// Revokes a pending invitation.
	pub async fn revoke(&self, id: &str) -> Result<Invitation, InvitationError> {
		let mut invitation = self.get_by_id(id).await?;

		match invitation.status {
			InvitationStatus::Redeemed => return Err(InvitationError::AlreadyRedeemed),
			InvitationStatus::Revoked => return Err(InvitationError::Revoked),
			InvitationStatus::Expired => return Err(InvitationError::Expired),
			InvitationStatus::Pending => {},
		}

		invitation.status = InvitationStatus::Revoked;

		self.store
			.update(ResourceRecord::new(invitation.id.clone(), invitation.clone()))
			.await
			.map_err(InvitationError::from_store)?;

		Ok(invitation)
	}

	/// Pages through invitations, optionally filtered by user and application.
	pub async fn list(
		&self,
		user_id: Option<&UserId>,
		application_id: Option<&ApplicationId>,
		limit: u32,
		offset: u32,
	) -> Result<Vec<Invitation>, InvitationError> {
		let mut invitations: Vec<_> = self
			.store
			.list()
			.await
			.map_err(InvitationError::from_store)?
			.into_iter()
			.map(|record| record.payload)
			.filter(|invitation| {
				user_id.map(|user_id| &invitation.user_id == user_id).unwrap_or(true)
					&& application_id
						.map(|application_id| &invitation.application_id == application_id)
						.unwrap_or(true)
			})
			.collect();

		invitations.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

		Ok(invitations.into_iter().skip(offset as usize).take(limit as usize).collect())
	}

	/// Counts invitations matching the filters; store errors propagate without partial data.
	pub async fn count(
		&self,
		user_id: Option<&UserId>,
		application_id: Option<&ApplicationId>,
	) -> Result<u32, InvitationError> {
		Ok(self.list(user_id, application_id, u32::MAX, 0).await?.len() as u32)
	}

	/// Deletes an invitation by id.
	pub async fn delete(&self, id: &str) -> Result<(), InvitationError> {
		self.store.delete(id).await.map_err(InvitationError::from_store)
	}

	/// Exporter round-tripping invitation records into YAML documents.
	pub fn exporter(&self) -> InvitationExporter {
		InvitationExporter { store: self.store.clone() }
	}

	async fn unique_token(&self) -> Result<String, InvitationError> {
		for _ in 0..TOKEN_RETRY_LIMIT {
			let token = generate_invitation_token();

			match self.get_by_token(&token).await {
				Ok(_) => continue,
				Err(InvitationError::InvalidToken) => return Ok(token),
				Err(e) => return Err(e),
			}
		}

		Err(InvitationError::Backend { message: "failed to allocate a unique token".into() })
	}
}

/// [`ResourceExporter`] implementation for invitations.
#[derive(Clone)]
pub struct InvitationExporter {
	store: Arc<dyn RecordStore<Invitation>>,
}
impl Debug for InvitationExporter {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("InvitationExporter(..)")
	}
}
impl ResourceExporter for InvitationExporter {
	fn resource_type(&self) -> &'static str {
		"invitations"
	}

	fn parameterizer_type(&self) -> &'static str {
		"invitation"
	}

	fn all_resource_ids(&self) -> StoreFuture<'_, Vec<String>> {
		Box::pin(async move {
			let mut ids: Vec<_> =
				self.store.list().await?.into_iter().map(|record| record.id).collect();

			ids.sort();

			Ok(ids)
		})
	}

	fn resource_by_id<'a>(&'a self, id: &'a str) -> StoreFuture<'a, (serde_json::Value, String)> {
		Box::pin(async move {
			let record = self.store.get(id).await?;
			let display_name = record.payload.id.clone();
			let document = serde_json::to_value(&record.payload)
				.map_err(|e| StoreError::Serialization { message: e.to_string() })?;

			Ok((document, display_name))
		})
	}

	fn validate_resource(&self, payload: &serde_json::Value, id: &str) -> Result<(), StoreError> {
		let invitation: Invitation = serde_json::from_value(payload.clone())
			.map_err(|e| StoreError::Serialization { message: e.to_string() })?;

		if invitation.id != id {
			return Err(StoreError::Serialization {
				message: format!("exported document id `{}` does not match `{id}`", invitation.id),
			});
		}

		validate(&invitation).map_err(|message| StoreError::Serialization { message })
	}

	fn resource_rules(&self) -> ResourceRules {
		ResourceRules {
			variables: vec!["id", "user_id", "application_id", "status"],
			array_variables: vec![],
		}
	}
}

fn validate(invitation: &Invitation) -> Result<(), String> {
	if invitation.token.is_empty() {
		return Err("invitation token must not be empty".into());
	}
	if invitation.expires_at <= invitation.created_at {
		return Err("invitation expiry must fall after creation".into());
	}
	if invitation.status == InvitationStatus::Redeemed && invitation.redeemed_at.is_none() {
		return Err("redeemed invitations must record a redemption instant".into());
	}

	Ok(())
}
