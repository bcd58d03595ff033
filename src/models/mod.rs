//! Domain model module declarations.

pub mod hook;
pub mod message;
pub mod permission;
pub mod tool_server;
