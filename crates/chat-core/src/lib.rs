//! chat-core: the per-topic concurrency and fan-out engine. A topic is a
//! single-writer actor ([`topic`]) reached only through the registry
//! ([`hub`]); a connection is a [`session`] that holds no lock of its own
//! and talks to topics purely by message passing.

pub mod access;
pub mod auth;
pub mod hub;
pub mod message;
pub mod presence;
pub mod session;
pub mod topic;

pub use hub::Hub;
pub use session::Session;
pub use topic::{TopicCommand, TopicError, TopicHandle};
