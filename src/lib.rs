/*
 * CEP Bridge - Filesystem Command Channel for Host Scripting
 * File Path: src/lib.rs
 * Responsibility: Shared library modules
 */

pub mod channel;
pub mod command;
pub mod config;
pub mod error;
pub mod init;
pub mod janitor;
pub mod response;
pub mod script;
pub mod security;
pub mod tools;

pub use channel::{CommandChannel, SendOptions};
pub use config::{BridgeConfig, Config};
pub use error::{BridgeError, BridgeResult};
pub use response::Response;
