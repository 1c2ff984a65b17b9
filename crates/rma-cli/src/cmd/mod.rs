pub mod chat;
pub mod config;
pub mod orchestrator;
pub mod serve;
pub mod session_manager;
