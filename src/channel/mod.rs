//! # Channel Abstraction
//!
//! A channel is an already-established path to one server endpoint. The load
//! client only needs two things from it: a synchronous readiness check at the
//! moment a request is dispatched, and an async request/response exchange.
//! Connection management, framing and server logic all live behind this seam.

use crate::error::{CallError, ConfigError, DispatchError};
use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

pub mod simulated;
pub mod tcp;

pub use simulated::{SimulatedChannel, SimulatedEndpoint};
pub use tcp::{serve_echo, TcpChannel};

/// Per-request options handed to a channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestOptions {
    pub endpoint: String,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
    pub timeout: Duration,
}

/// Response returned by a channel. `ok` is the application-level success flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    pub body: Vec<u8>,
}

impl Response {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            ok: true,
            body: body.into(),
        }
    }

    pub fn not_ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            ok: false,
            body: body.into(),
        }
    }
}

/// Transport interface used by the load client
#[async_trait]
pub trait Channel: Send + Sync {
    /// Channel name for identification in logs and errors
    fn name(&self) -> &str;

    /// Check that a request can be issued right now.
    ///
    /// Called synchronously at fan-out time. An error here is a dispatch
    /// failure and aborts the whole run.
    fn check_dispatch(&self) -> Result<(), DispatchError> {
        Ok(())
    }

    /// Issue one request and wait for its response.
    ///
    /// The caller enforces `options.timeout`; implementations may also honour
    /// it but are not required to.
    async fn send(&self, options: &RequestOptions) -> Result<Response, CallError>;
}

/// Read-only pool of channels shared by all in-flight requests
#[derive(Clone)]
pub struct ChannelPool {
    channels: Arc<[Arc<dyn Channel>]>,
}

impl ChannelPool {
    pub fn new(channels: Vec<Arc<dyn Channel>>) -> Result<Self, ConfigError> {
        if channels.is_empty() {
            return Err(ConfigError::EmptyPool);
        }
        Ok(Self {
            channels: channels.into(),
        })
    }

    /// Pick a channel uniformly at random
    pub fn pick(&self) -> &Arc<dyn Channel> {
        let index = rand::thread_rng().gen_range(0..self.channels.len());
        &self.channels[index]
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Channel>> {
        self.channels.iter()
    }
}

impl std::fmt::Debug for ChannelPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.channels.iter().map(|c| c.name()))
            .finish()
    }
}
