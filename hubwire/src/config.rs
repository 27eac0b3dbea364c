use serde::{Deserialize, Serialize};
use serde_inline_default::serde_inline_default;
use std::time::Duration;

#[serde_inline_default]
#[derive(Deserialize, Serialize, Debug, PartialEq, Eq, Clone)]
pub struct RouterConfig {
    /// Deadline for a single call. `None` waits until the response arrives
    /// or the router is disposed.
    #[serde_inline_default(None)]
    #[serde(with = "humantime_serde")]
    pub call_timeout: Option<Duration>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self { call_timeout: None }
    }
}

#[serde_inline_default]
#[derive(Deserialize, Serialize, Debug, PartialEq, Eq, Clone)]
pub struct TransportConfig {
    /// Capacity of the inbound and per-connection outbound queues.
    #[serde_inline_default(1024)]
    pub channel_capacity: usize,
    /// Frames larger than this are rejected by the TCP transport.
    #[serde_inline_default(64 << 20)]
    pub max_frame_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
            max_frame_size: 64 << 20,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, PartialEq, Eq, Clone, Copy, clap::ValueEnum)]
pub enum TransportType {
    Tcp,
    WebSocket,
}

impl std::fmt::Display for TransportType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

#[derive(Deserialize, Serialize, Debug, PartialEq, Eq, Clone, Copy, clap::ValueEnum)]
pub enum CodecType {
    Json,
    MessagePack,
}

impl std::fmt::Display for CodecType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}
