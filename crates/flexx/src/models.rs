//! These models represent the objects passed between the client and the relay
//!
//! There are two related formats we need to interact with:
//! - the chat request/response envelopes exchanged with the browser client
//! - openai style messages, handed to a provider which converts them to its own wire format
//!
//! Request messages are close enough to the openai shape that they are forwarded
//! mostly as-is, only system messages are dropped and inline images normalized.
pub mod chat;
pub mod message;
