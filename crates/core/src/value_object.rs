//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are immutable and compared by their attribute values.
/// `Amount` is the main example in this workspace: two amounts that render to
/// the same minor units are the same value regardless of how they were parsed.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
