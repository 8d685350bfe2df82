/// Authentication module
///
/// Signed token codec, opaque secrets for single-use links,
/// and password hashing.

mod claims;
mod jwt;
mod opaque_secret;
mod password;

pub use claims::{
    AccessClaims, AccessPayload, RefreshClaims, RefreshPayload, SignedClaims, TokenPayload,
};
pub use jwt::{issue_access, issue_refresh, sign, verify, verify_access, verify_refresh};
pub use opaque_secret::{generate_secret, hash_secret, SECRET_BYTES};
pub use password::{hash_password, verify_against_dummy, verify_password};
