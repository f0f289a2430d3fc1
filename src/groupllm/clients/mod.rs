//! Concrete [`ClientWrapper`](crate::client_wrapper::ClientWrapper) implementations.
//!
//! The group chat only needs one wire format: any endpoint that speaks the
//! OpenAI chat-completions protocol under a `/v<N>` root.

pub mod common;

pub mod openai_compatible;
