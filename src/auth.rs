//! Auth-domain identifiers, scope sets, credential records, and access grants.

pub mod credential;
pub mod grant;
pub mod id;
pub mod scope;

pub use credential::*;
pub use grant::*;
pub use id::*;
pub use scope::*;
