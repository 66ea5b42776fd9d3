//! Connection state and the byte transport underneath it.

pub mod connection;
pub mod transport;

pub use connection::{Connection, ReadOutcome};
pub use transport::Transport;
