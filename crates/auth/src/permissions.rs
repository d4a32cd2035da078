use serde::{Deserialize, Serialize};

use crate::Role;

/// Something a principal may be allowed to do.
///
/// Every admin-only entry point names the capability it needs instead of
/// probing role fields ad hoc.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    PlaceOrder,
    ViewOwnOrders,
    RequestRefund,
    ViewAnyOrder,
    CompleteOrder,
    ApproveRefund,
    RejectRefund,
    AttestManualRefund,
    SyncWithGateway,
    RunSweep,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::PlaceOrder => "orders.place",
            Capability::ViewOwnOrders => "orders.view_own",
            Capability::RequestRefund => "refunds.request",
            Capability::ViewAnyOrder => "orders.view_any",
            Capability::CompleteOrder => "orders.complete",
            Capability::ApproveRefund => "refunds.approve",
            Capability::RejectRefund => "refunds.reject",
            Capability::AttestManualRefund => "refunds.attest_manual",
            Capability::SyncWithGateway => "orders.sync_gateway",
            Capability::RunSweep => "orders.sweep",
        }
    }
}

impl core::fmt::Display for Capability {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

const BUYER: &[Capability] = &[
    Capability::PlaceOrder,
    Capability::ViewOwnOrders,
    Capability::RequestRefund,
];

const ADMIN: &[Capability] = &[
    Capability::PlaceOrder,
    Capability::ViewOwnOrders,
    Capability::RequestRefund,
    Capability::ViewAnyOrder,
    Capability::CompleteOrder,
    Capability::ApproveRefund,
    Capability::RejectRefund,
    Capability::AttestManualRefund,
    Capability::SyncWithGateway,
    Capability::RunSweep,
];

impl Role {
    /// Static role → capability policy.
    pub fn capabilities(&self) -> &'static [Capability] {
        match self {
            Role::Buyer => BUYER,
            Role::Admin => ADMIN,
        }
    }
}
