//! Orders domain module.
//!
//! This crate contains the order model and its state machine, implemented
//! purely as deterministic domain logic (no IO, no HTTP, no storage). Storage
//! backends turn a planned [`Transition`] into a conditional update.

pub mod order;
pub mod transition;

pub use order::{generate_order_no, Order, OrderStatus, PlaceOrder};
pub use transition::{plan, OrderEvent, Transition, TransitionPolicy, LEGAL_EDGES};
