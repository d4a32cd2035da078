use thiserror::Error;

use cardvault_core::UserId;

use crate::{Capability, Principal};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("forbidden: missing capability '{0}'")]
    Forbidden(Capability),

    #[error("forbidden: resource belongs to another user")]
    NotOwner,
}

/// Check a capability for a principal.
///
/// - No IO
/// - No panics
/// - No business logic (pure policy check)
pub fn authorize(principal: &Principal, required: Capability) -> Result<(), AuthzError> {
    if principal.can(required) {
        Ok(())
    } else {
        tracing::debug!(
            principal = %principal.id(),
            role = %principal.role(),
            capability = %required,
            "authorization denied"
        );
        Err(AuthzError::Forbidden(required))
    }
}

/// Allow the owner of a resource, or anyone holding `ViewAnyOrder`.
pub fn authorize_owner(principal: &Principal, owner: UserId) -> Result<(), AuthzError> {
    if principal.id() == owner || principal.can(Capability::ViewAnyOrder) {
        Ok(())
    } else {
        Err(AuthzError::NotOwner)
    }
}
