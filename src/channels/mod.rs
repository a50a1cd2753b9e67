//! Channel adapters for message I/O.

pub mod email;
pub mod imap;
pub mod registry;
pub mod signal;

pub use email::{EmailChannel, EmailConfig};
pub use registry::ChannelRegistry;
pub use signal::{SignalChannel, SignalConfig};
