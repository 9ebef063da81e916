//! Generator state machine
//!
//! The generator's runtime behaviour is a function of the current state and
//! an event. "Uninitialised" and "shut down" are not states: they are
//! represented by the generator value not existing.

pub mod events;
pub mod machine;

pub use events::Event;
pub use machine::State;
