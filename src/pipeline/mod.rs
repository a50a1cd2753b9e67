//! Message processing pipeline.
//!
//! Every non-operator message flows through:
//! 1. `ChannelAdapter::poll()`: channel-specific I/O
//! 2. `Classifier::classify()`: structured verdict, or drop
//! 3. `Drafter::draft()`: reply text when a response is needed
//! 4. The approval queue: nothing is sent without operator approval

pub mod classifier;
pub mod drafter;
pub mod types;

pub use classifier::{Classifier, Verdict};
pub use drafter::Drafter;
pub use types::*;

/// Longest prefix of `s` holding at most `max` characters.
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
