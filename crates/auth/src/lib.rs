//! `cardvault-auth`: authorization boundary for the card shop core.
//!
//! Login, sessions and OAuth live elsewhere; this crate only turns an already
//! verified identity into a typed `Principal` and answers capability checks.
//! It is intentionally decoupled from HTTP and storage.

pub mod authorize;
pub mod claims;
pub mod jwt;
pub mod permissions;
pub mod principal;
pub mod roles;

pub use authorize::{authorize, authorize_owner, AuthzError};
pub use claims::{validate_claims, JwtClaims, TokenValidationError};
pub use jwt::{Hs256JwtValidator, JwtError, JwtValidator};
pub use permissions::Capability;
pub use principal::Principal;
pub use roles::Role;
