pub mod common;
pub mod local_chat;
pub mod managed_agent;
