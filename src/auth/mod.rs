mod claims;
mod error;
mod identity;
mod resolver;

pub use claims::{ClaimSource, HeaderClaims, PrincipalClaims, claim_keys};
pub use error::AuthError;
pub use identity::{AuthContext, Identity};
pub use resolver::{resolve_display_name, resolve_email};
