use serde::{Deserialize, Serialize};

use cardvault_core::UserId;

use crate::{Capability, Role};

/// Authenticated caller, tagged by role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Principal {
    Buyer { id: UserId },
    Admin { id: UserId },
}

impl Principal {
    pub fn from_role(id: UserId, role: Role) -> Self {
        match role {
            Role::Buyer => Principal::Buyer { id },
            Role::Admin => Principal::Admin { id },
        }
    }

    pub fn id(&self) -> UserId {
        match self {
            Principal::Buyer { id } | Principal::Admin { id } => *id,
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Principal::Buyer { .. } => Role::Buyer,
            Principal::Admin { .. } => Role::Admin,
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Principal::Admin { .. })
    }

    pub fn can(&self, capability: Capability) -> bool {
        self.role().capabilities().contains(&capability)
    }
}
