//! JSON-over-HTTP credentials client speaking through the transport seam.

// crates.io
use serde_json::json;
// self
use crate::{
	_prelude::*,
	auth::{ApplicationId, OuId, TokenSecret, UserId},
	http::{JsonTransport, TransportError},
	identity::{
		AttributeMap, AttributeQuery, CredentialsService, IdentityError, IdentityFuture,
		VerifiedCredentials,
	},
};

/// Credentials service client calling a remote verification endpoint.
///
/// The endpoint contract is JSON over three routes under the base URL:
/// `authenticate`, `identify`, and `attributes`. HTTP 401 maps to
/// [`IdentityError::InvalidCredentials`] and 404 to
/// [`IdentityError::UserNotFound`]; remaining failures keep their
/// client/server classification.
#[derive(Clone)]
pub struct HttpCredentialsService {
	base: Url,
	transport: Arc<dyn JsonTransport>,
}
impl HttpCredentialsService {
	/// Builds a client for the provided base URL and transport.
	pub fn new(base: Url, transport: Arc<dyn JsonTransport>) -> Self {
		Self { base, transport }
	}

	fn route(&self, segment: &str) -> Result<Url, IdentityError> {
		self.base
			.join(segment)
			.map_err(|e| IdentityError::Server { message: e.to_string() })
	}

	fn map_transport(e: TransportError) -> IdentityError {
		match e.status() {
			Some(401) => IdentityError::InvalidCredentials,
			Some(404) => IdentityError::UserNotFound,
			Some(status) if (400..500).contains(&status) =>
				IdentityError::Client { message: e.to_string() },
			_ => IdentityError::Server { message: e.to_string() },
		}
	}

	fn string_field(value: &serde_json::Value, name: &'static str) -> Result<String, IdentityError> {
		value
			.get(name)
			.and_then(serde_json::Value::as_str)
			.map(str::to_owned)
			.ok_or_else(|| IdentityError::Server {
				message: format!("credentials response is missing `{name}`"),
			})
	}
}
impl Debug for HttpCredentialsService {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("HttpCredentialsService").field("base", &self.base.as_str()).finish()
	}
}
impl CredentialsService for HttpCredentialsService {
	fn authenticate<'a>(
		&'a self,
		app_id: &'a ApplicationId,
		identifying: &'a AttributeMap,
		verifying: &'a AttributeMap,
	) -> IdentityFuture<'a, VerifiedCredentials> {
		Box::pin(async move {
			let url = self.route("authenticate")?;
			let body = json!({
				"app_id": app_id.as_ref(),
				"identifying": identifying,
				"verifying": verifying,
			});
			let response =
				self.transport.post_json(&url, &body).await.map_err(Self::map_transport)?;
			let user_id = UserId::new(Self::string_field(&response, "user_id")?)
				.map_err(|e| IdentityError::Server { message: e.to_string() })?;
			let ou_id = OuId::new(Self::string_field(&response, "ou_id")?)
				.map_err(|e| IdentityError::Server { message: e.to_string() })?;
			let available_attributes = response
				.get("available_attributes")
				.and_then(serde_json::Value::as_array)
				.map(|names| {
					names
						.iter()
						.filter_map(serde_json::Value::as_str)
						.map(str::to_owned)
						.collect()
				})
				.unwrap_or_default();

			Ok(VerifiedCredentials {
				user_id,
				ou_id,
				user_type: Self::string_field(&response, "user_type")?,
				token: TokenSecret::new(Self::string_field(&response, "token")?),
				available_attributes,
			})
		})
	}

	fn identify<'a>(&'a self, identifying: &'a AttributeMap) -> IdentityFuture<'a, Option<UserId>> {
		Box::pin(async move {
			let url = self.route("identify")?;
			let body = json!({ "identifying": identifying });
			let response = match self.transport.post_json(&url, &body).await {
				Ok(response) => response,
				Err(e) if e.status() == Some(404) => return Ok(None),
				Err(e) => return Err(Self::map_transport(e)),
			};

			match response.get("user_id").and_then(serde_json::Value::as_str) {
				Some(raw) => UserId::new(raw)
					.map(Some)
					.map_err(|e| IdentityError::Server { message: e.to_string() }),
				None => Ok(None),
			}
		})
	}

	fn attributes<'a>(
		&'a self,
		token: &'a TokenSecret,
		query: &'a AttributeQuery,
	) -> IdentityFuture<'a, serde_json::Map<String, serde_json::Value>> {
		Box::pin(async move {
			let url = self.route("attributes")?;
			let body = json!({ "token": token.expose(), "query": query });
			let response =
				self.transport.post_json(&url, &body).await.map_err(Self::map_transport)?;

			match response.get("attributes") {
				Some(serde_json::Value::Object(attributes)) => Ok(attributes.clone()),
				_ => Err(IdentityError::Server {
					message: "credentials response is missing `attributes`".into(),
				}),
			}
		})
	}
}
