//! Ferry library
//!
//! Whole-file upload and download over a newline-header + raw-payload TCP protocol

pub mod cli;
pub mod client;
pub mod command;
pub mod config;
pub mod error;
pub mod frame;
pub mod logger;
pub mod menu;
pub mod protocol;
pub mod server;
pub mod storage;
pub mod transfer;

pub use command::{Command, Response};
pub use error::ProtocolError;
