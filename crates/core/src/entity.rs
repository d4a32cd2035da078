//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Cards and orders are entities: two rows with the same id are the same
/// thing even when their status differs.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}
