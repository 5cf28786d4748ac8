//! Error taxonomy (spec §7): transient-recoverable, liveness, configuration,
//! fatal. Each component returns its own typed error; `MceError` is the
//! crate-wide enum callers outside a single component match on to decide
//! retry vs. log-and-continue vs. escalate.

use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SocketError {
    #[error("device-state manager socket unavailable")]
    Unavailable,
    #[error("failed to open lifecycle socket: {0}")]
    Open(#[source] io::Error),
    #[error("failed to register with process watchdog: {0}")]
    WatchdogRegister(#[source] io::Error),
    #[error("send failed: {0}")]
    Send(#[source] io::Error),
    #[error("peer closed the connection")]
    PeerClosed,
    #[error("protocol error: {0}")]
    Proto(#[from] mce_proto::ProtoError),
}

#[derive(Debug, Error)]
pub enum FbError {
    #[error("frame buffer ioctl failed: {0}")]
    Ioctl(#[source] io::Error),
    #[error("frame buffer device not found")]
    NoDevice,
    #[error("timed out waiting for kernel to acknowledge power transition")]
    Timeout,
}

#[derive(Debug, Error)]
pub enum CompositorError {
    #[error("compositor method call failed: {0}")]
    MethodFailed(String),
    #[error("compositor is not a known bus peer")]
    NoPeer,
    #[error("compositor call was cancelled")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file: {0}")]
    Read(#[source] io::Error),
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("unknown configuration key: {0}")]
    UnknownKey(String),
}

/// Crate-wide error. Most components keep their own, more specific, error
/// type internally and only fold into this one at the boundary where the
/// display state machine decides whether to retry, escalate, or ignore.
#[derive(Debug, Error)]
pub enum MceError {
    #[error(transparent)]
    Socket(#[from] SocketError),
    #[error(transparent)]
    Fb(#[from] FbError),
    #[error(transparent)]
    Compositor(#[from] CompositorError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("bus transport error: {0}")]
    Bus(String),
}
