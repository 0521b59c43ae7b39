//! Auth-domain identifiers, scope sets, secrets, and authenticated-user state.

pub mod id;
pub mod scope;
pub mod secret;
pub mod user;

pub use id::*;
pub use scope::*;
pub use secret::*;
pub use user::*;
