#![forbid(unsafe_code)]

//! Client library that drives an external agent process over
//! newline-delimited JSON on its stdio.
//!
//! The process streams conversation messages and, in the same channel,
//! exchanges correlated control requests with the caller: the caller can
//! interrupt or reconfigure the agent, and the agent asks the caller for
//! permission decisions, hook results and in-process tool calls.

pub mod config;
pub mod control;
pub mod decode;
pub mod errors;
pub mod logging;
pub mod models;
pub mod session;
pub mod transport;

pub use config::{ProcessSpec, SessionConfig};
pub use control::{Query, QueryOptions, SessionState};
pub use errors::{Result, SdkError};
pub use session::Session;
