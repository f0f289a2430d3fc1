// src/groupllm/mod.rs

pub mod agent;
pub mod client_wrapper;
pub mod clients;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod event;
pub mod mention;
pub mod message;
pub mod queue;
pub mod registry;
pub mod session;
pub mod store;
pub mod turn;

// Let's explicitly export GroupChat so we don't have to access it via groupllm::session::GroupChat
pub use session::GroupChat;
