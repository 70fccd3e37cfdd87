//! Session management over a facecrawl data directory.

pub mod manager;

pub use manager::{ScoutSession, SessionStats};
