//! branchat is a client-side engine for branching, streamed chat
//! conversations.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`core`] owns conversation and message state ([`core::store`]), the pure
//!   tree operations ([`core::tree`]), the single-session generation state
//!   machine ([`core::generation`]) and the façade presentation code calls
//!   ([`core::controller`]).
//! - [`api`] defines the wire payloads and the HTTP client that implements
//!   the generation and conversation endpoints.
//! - [`utils`] holds id generation, URL joining, event-stream decoding and
//!   logging setup.
//!
//! Runtime entrypoints live in the binary crate (`src/main.rs`) and route
//! through [`crate::cli::main`].

pub mod api;
pub mod cli;
pub mod core;
pub mod utils;
