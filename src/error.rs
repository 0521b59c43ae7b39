//! Broker-level error types shared across flows, stores, resource families, and the bridge.

// self
use crate::_prelude::*;

/// Broker-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Classification used when mapping an error onto an HTTP response family.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
	/// Caller mistake; surfaced verbatim with a 4xx status.
	Client,
	/// Internal failure; details are redacted and a 5xx status is returned.
	Server,
}

/// Client-facing error document with a stable code.
///
/// Every failure surfaced by the broker carries a `PREFIX-NXXXX` code, a short
/// message, and a description. Descriptions of server errors are redacted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiErrorBody {
	/// Stable machine-readable code, e.g. `LAY-5001`.
	pub code: String,
	/// Short human-readable summary.
	pub message: String,
	/// Detail text; safe to forward for client errors only.
	pub description: String,
}

/// Canonical broker error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Storage-layer failure.
	#[error("{0}")]
	Store(
		#[from]
		#[source]
		crate::store::StoreError,
	),
	/// Declarative resource load failure.
	#[error(transparent)]
	Declarative(#[from] crate::store::DeclarativeError),
	/// Flow graph construction failure.
	#[error(transparent)]
	Graph(#[from] crate::flow::GraphError),
	/// Flow engine failure.
	#[error(transparent)]
	Flow(#[from] crate::flow::FlowError),
	/// Application family failure.
	#[error(transparent)]
	Application(#[from] crate::resource::ApplicationError),
	/// Layout family failure.
	#[error(transparent)]
	Layout(#[from] crate::resource::LayoutError),
	/// User schema family failure.
	#[error(transparent)]
	UserSchema(#[from] crate::resource::UserSchemaError),
	/// Resource server family failure.
	#[error(transparent)]
	ResourceServer(#[from] crate::resource::ResourceServerError),
	/// Invitation family failure.
	#[error(transparent)]
	Invitation(#[from] crate::resource::InvitationError),
	/// Collaborator identity service failure.
	#[error(transparent)]
	Identity(#[from] crate::identity::IdentityError),
	/// Authorization session bridge failure.
	#[error(transparent)]
	Session(#[from] crate::session::SessionError),
	/// Assertion signing or verification failure.
	#[error(transparent)]
	Jwt(#[from] crate::jwt::JwtError),
	/// Bearer token sealing failure.
	#[error(transparent)]
	Seal(#[from] crate::crypt::SealError),
	/// Outbound transport failure.
	#[error(transparent)]
	Transport(#[from] crate::http::TransportError),
}
impl Error {
	/// Returns the stable client-facing code for this error.
	pub fn code(&self) -> &'static str {
		match self {
			Self::Store(e) => e.code(),
			Self::Declarative(_) => "SRV-50002",
			Self::Graph(_) => "FLO-50001",
			Self::Flow(e) => e.code(),
			Self::Application(e) => e.code(),
			Self::Layout(e) => e.code(),
			Self::UserSchema(e) => e.code(),
			Self::ResourceServer(e) => e.code(),
			Self::Invitation(e) => e.code(),
			Self::Identity(e) => e.code(),
			Self::Session(e) => e.code(),
			Self::Jwt(_) => "SRV-50003",
			Self::Seal(_) => "SRV-50004",
			Self::Transport(e) => e.code(),
		}
	}

	/// Classifies the error as a client or server failure.
	pub fn kind(&self) -> ErrorKind {
		match self {
			Self::Store(e) => e.kind(),
			Self::Declarative(_) | Self::Graph(_) | Self::Jwt(_) | Self::Seal(_) =>
				ErrorKind::Server,
			Self::Flow(e) => e.kind(),
			Self::Application(e) => e.kind(),
			Self::Layout(e) => e.kind(),
			Self::UserSchema(e) => e.kind(),
			Self::ResourceServer(e) => e.kind(),
			Self::Invitation(e) => e.kind(),
			Self::Identity(e) => e.kind(),
			Self::Session(e) => e.kind(),
			Self::Transport(e) => e.kind(),
		}
	}

	/// Builds the client-facing error document, redacting server-error details.
	pub fn to_api(&self) -> ApiErrorBody {
		let (message, description) = match self.kind() {
			ErrorKind::Client => (self.to_string(), self.to_string()),
			ErrorKind::Server =>
				("Internal server error.".into(), "Something went wrong. Try again later.".into()),
		};

		ApiErrorBody { code: self.code().into(), message, description }
	}
}
