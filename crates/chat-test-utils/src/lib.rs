//! Shared test utilities: a WS client speaking the topic engine's wire
//! protocol, for integration tests in `chat-server` that drive a real
//! server instance end to end rather than exercising `chat-core` in
//! process.

pub mod mock_ws_client;

pub use mock_ws_client::MockWsClient;
