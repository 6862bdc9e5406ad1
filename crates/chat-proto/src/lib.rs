//! chat-proto: wire envelope types, access-mode bitmasks, and topic name
//! grammar shared by the topic engine and the transport layer that hosts it.

pub mod envelope;
pub mod error_codes;
pub mod mode;
pub mod topic_name;

pub use envelope::*;
pub use mode::{AccessMode, ModePair, ModeParseError};
pub use topic_name::{TopicNameError, TopicRef};
