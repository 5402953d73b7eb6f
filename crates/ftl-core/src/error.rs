//! Error types shared across the orchestrator

use std::path::PathBuf;
use thiserror::Error;

use ftl_protocol::ProtocolError;

/// Transport-level errors
#[derive(Error, Debug)]
pub enum TransportError {
    /// The TLS handshake did not complete
    #[error("TLS handshake failed: {0}")]
    Handshake(String),

    /// TLS context setup or mid-stream TLS failure
    #[error("TLS error: {0}")]
    Tls(String),

    /// The transport has already been started once
    #[error("transport already started")]
    AlreadyStarted,

    /// The transport is closed
    #[error("transport is closed")]
    Closed,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Connection-level errors
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// Transport error
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Protocol error
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The connection is closed
    #[error("connection is closed")]
    Closed,
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Pre-shared key is not valid hex
    #[error("invalid pre-shared key: {0}")]
    InvalidKey(String),

    /// Config file not found
    #[error("config file not found: {0}")]
    NotFound(PathBuf),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
