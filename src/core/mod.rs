pub mod chat_stream;
pub mod config;
pub mod controller;
pub mod conversation;
pub mod error;
pub mod generation;
pub mod message;
pub mod remote;
pub mod store;
pub mod tree;
