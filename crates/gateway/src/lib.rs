//! `cardvault-gateway`: client side of the third-party payment gateway.
//!
//! Everything that touches the gateway's wire format lives here: the MD5
//! signing algorithm, the browser payment form, inbound notification
//! verification, the server-to-server query/refund client and the signed
//! manual-refund handoff. Nothing in this crate knows about storage.

pub mod client;
pub mod config;
pub mod error;
pub mod handoff;
pub mod mock;
pub mod notify;
pub mod request;
pub mod retry;
pub mod signing;

pub use client::{GatewayOrder, HttpGatewayClient, OrderLookup, PaymentGateway};
pub use config::GatewayConfig;
pub use error::{GatewayError, GatewayResult};
pub use handoff::{HandoffError, RefundHandoff};
pub use mock::MockGateway;
pub use notify::{Notification, NotifyError, TRADE_SUCCESS};
pub use request::{PaymentForm, PaymentRequest};
pub use retry::RetryPolicy;
pub use signing::{sign, signing_string, verify_signature, Merchant, Params};
