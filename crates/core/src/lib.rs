//! `cardvault-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod clock;
pub mod entity;
pub mod error;
pub mod id;
pub mod money;
pub mod secret;
pub mod value_object;

pub use clock::{Clock, ManualClock, SystemClock};
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{CardId, OrderId, ProductId, UserId};
pub use money::{minor_units, Amount};
pub use secret::Secret;
pub use value_object::ValueObject;
