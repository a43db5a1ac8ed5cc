//! Live playback synchronization
//!
//! The controller keeps the backend's single sounding source in line with
//! the session. Anything that changes what the source should play is
//! applied as stop, short grace delay, play again.

pub mod backend;
pub mod clock;
pub mod controller;
pub mod coordinator;
pub mod deferred;

#[cfg(test)]
mod fake;

pub use backend::{AudioBackend, PlayRequest};
pub use clock::PlaybackTime;
pub use controller::PlaybackController;
