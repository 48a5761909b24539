//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Apps and users implement this so stores can key them uniformly.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}
