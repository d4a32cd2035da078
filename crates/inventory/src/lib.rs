//! Card inventory domain module.
//!
//! This crate contains the business rules for individual cards, implemented
//! purely as deterministic domain logic (no IO, no HTTP, no storage). Storage
//! backends call these transitions inside their own transactions.

pub mod card;

pub use card::{Card, CardStatus, CardView};
