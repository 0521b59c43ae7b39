//! Transport primitives for outbound collaborator and federated-IdP calls.
//!
//! The module exposes [`JsonTransport`] as the broker's only dependency on an
//! HTTP stack. Credential verification and federated token exchanges both go
//! through this seam, so embedders can substitute their own client while the
//! default `reqwest` implementation stays behind the `reqwest` feature.

// self
use crate::_prelude::*;

/// Boxed future returned by transport operations.
pub type TransportFuture<'a, T> =
	Pin<Box<dyn Future<Output = Result<T, TransportError>> + 'a + Send>>;

/// Form parameters submitted to token endpoints.
pub type FormParams<'a> = [(&'a str, String)];

/// Errors raised by [`JsonTransport`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum TransportError {
	/// Network-level failure (DNS, TCP, TLS, timeout).
	#[error("Network error occurred while calling `{url}`: {message}.")]
	Network {
		/// Target URL.
		url: String,
		/// Transport-specific error text.
		message: String,
	},
	/// The endpoint answered with a non-success status.
	#[error("`{url}` answered with status {status}.")]
	Status {
		/// Target URL.
		url: String,
		/// HTTP status code.
		status: u16,
		/// Response body, for diagnostics.
		message: String,
	},
	/// The endpoint answered with a body that is not the expected JSON.
	#[error("`{url}` answered with malformed JSON: {message}.")]
	Decode {
		/// Target URL.
		url: String,
		/// Structured parse failure text.
		message: String,
	},
}
impl TransportError {
	/// Returns the stable client-facing code for this error.
	pub fn code(&self) -> &'static str {
		match self {
			Self::Network { .. } => "TRN-50001",
			Self::Status { .. } => "TRN-50002",
			Self::Decode { .. } => "TRN-50003",
		}
	}

	/// Classifies the error; upstream 4xx answers count as client failures.
	pub fn kind(&self) -> crate::error::ErrorKind {
		match self {
			Self::Status { status, .. } if (400..500).contains(status) =>
				crate::error::ErrorKind::Client,
			_ => crate::error::ErrorKind::Server,
		}
	}

	/// HTTP status answered by the upstream endpoint, when one was received.
	pub fn status(&self) -> Option<u16> {
		match self {
			Self::Status { status, .. } => Some(*status),
			_ => None,
		}
	}
}

/// Abstraction over HTTP stacks capable of JSON and form exchanges.
///
/// Implementations must be `Send + Sync` so executors can share them behind
/// `Arc` across request handlers. Every method resolves to decoded JSON;
/// non-success statuses surface as [`TransportError::Status`].
pub trait JsonTransport
where
	Self: Send + Sync,
{
	/// Performs a GET, optionally attaching a bearer token.
	fn get_json<'a>(
		&'a self,
		url: &'a Url,
		bearer: Option<&'a str>,
	) -> TransportFuture<'a, serde_json::Value>;

	/// Performs a POST with a JSON body.
	fn post_json<'a>(
		&'a self,
		url: &'a Url,
		body: &'a serde_json::Value,
	) -> TransportFuture<'a, serde_json::Value>;

	/// Performs a POST with URL-encoded form parameters, requesting JSON back.
	fn post_form<'a>(
		&'a self,
		url: &'a Url,
		params: &'a FormParams<'a>,
	) -> TransportFuture<'a, serde_json::Value>;
}

/// Decodes a JSON body with path-aware error diagnostics.
pub(crate) fn decode_json(url: &Url, bytes: &[u8]) -> Result<serde_json::Value, TransportError> {
	let mut deserializer = serde_json::Deserializer::from_slice(bytes);

	serde_path_to_error::deserialize(&mut deserializer)
		.map_err(|e| TransportError::Decode { url: url.to_string(), message: e.to_string() })
}

/// Thin wrapper around [`reqwest::Client`] so shared HTTP behavior lives in one place.
///
/// Token endpoints return results directly instead of delegating to another
/// URI, so any custom client passed in should disable redirect following.
#[cfg(feature = "reqwest")]
#[derive(Clone, Default)]
pub struct ReqwestJsonTransport(pub reqwest::Client);
#[cfg(feature = "reqwest")]
impl ReqwestJsonTransport {
	/// Wraps an existing [`reqwest::Client`].
	pub fn with_client(client: reqwest::Client) -> Self {
		Self(client)
	}

	/// Builds a client enforcing the provided per-request timeout.
	pub fn with_timeout(timeout: std::time::Duration) -> Result<Self, TransportError> {
		reqwest::Client::builder().timeout(timeout).build().map(Self).map_err(|e| {
			TransportError::Network { url: String::new(), message: e.to_string() }
		})
	}

	async fn read_json(
		url: &Url,
		response: reqwest::Response,
	) -> Result<serde_json::Value, TransportError> {
		let status = response.status();
		let bytes = response
			.bytes()
			.await
			.map_err(|e| TransportError::Network { url: url.to_string(), message: e.to_string() })?;

		if !status.is_success() {
			return Err(TransportError::Status {
				url: url.to_string(),
				status: status.as_u16(),
				message: String::from_utf8_lossy(&bytes).into_owned(),
			});
		}

		decode_json(url, &bytes)
	}
}
#[cfg(feature = "reqwest")]
impl Debug for ReqwestJsonTransport {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("ReqwestJsonTransport(..)")
	}
}
#[cfg(feature = "reqwest")]
impl JsonTransport for ReqwestJsonTransport {
	fn get_json<'a>(
		&'a self,
		url: &'a Url,
		bearer: Option<&'a str>,
	) -> TransportFuture<'a, serde_json::Value> {
		Box::pin(async move {
			let mut request = self.0.get(url.clone()).header(reqwest::header::ACCEPT, "application/json");

			if let Some(bearer) = bearer {
				request = request.bearer_auth(bearer);
			}

			let response = request.send().await.map_err(|e| TransportError::Network {
				url: url.to_string(),
				message: e.to_string(),
			})?;

			Self::read_json(url, response).await
		})
	}

	fn post_json<'a>(
		&'a self,
		url: &'a Url,
		body: &'a serde_json::Value,
	) -> TransportFuture<'a, serde_json::Value> {
		Box::pin(async move {
			let response =
				self.0.post(url.clone()).json(body).send().await.map_err(|e| {
					TransportError::Network { url: url.to_string(), message: e.to_string() }
				})?;

			Self::read_json(url, response).await
		})
	}

	fn post_form<'a>(
		&'a self,
		url: &'a Url,
		params: &'a FormParams<'a>,
	) -> TransportFuture<'a, serde_json::Value> {
		Box::pin(async move {
			let response = self
				.0
				.post(url.clone())
				.header(reqwest::header::ACCEPT, "application/json")
				.form(params)
				.send()
				.await
				.map_err(|e| TransportError::Network {
					url: url.to_string(),
					message: e.to_string(),
				})?;

			Self::read_json(url, response).await
		})
	}
}
