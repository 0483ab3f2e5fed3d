//! Core data models for the tracker.

mod aggregates;
mod ids;
mod matches;
mod player;
mod raw;
mod reference;

pub use aggregates::*;
pub use ids::*;
pub use matches::*;
pub use player::*;
pub use raw::*;
pub use reference::*;
