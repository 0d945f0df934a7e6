// src/agentroom/mod.rs

pub mod agent;
pub mod chat_service;
pub mod client_wrapper;
pub mod clients;
pub mod config;
pub mod context;
pub mod event;
pub mod memory;
pub mod message;
pub mod orchestration_client;
pub mod pipeline;
pub mod registry;
pub mod relationship;
pub mod sink;
pub mod strategy;

// Export the two entry points at module level so callers can write agentroom::RoomRegistry
// instead of agentroom::registry::RoomRegistry
pub use orchestration_client::OrchestrationClient;
pub use registry::RoomRegistry;
