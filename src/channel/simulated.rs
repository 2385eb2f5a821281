//! In-process channel with scripted endpoint behaviour.
//!
//! Used by tests and by the binary when no remote peers are given. Each
//! endpoint only has to honour a latency contract: answer after some delay,
//! answer with an error, or never answer at all.

use super::{Channel, RequestOptions, Response};
use crate::error::{CallError, DispatchError};
use crate::time_window::TimeWindow;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// Behaviour of a simulated endpoint
#[derive(Debug, Clone)]
pub enum SimulatedEndpoint {
    /// Reply immediately with the request body
    Echo,
    /// Reply immediately with "OK"
    Health,
    /// Reply with the request body after a fixed delay
    Delay(Duration),
    /// Reply after as many milliseconds as the window's current value
    WindowDelay(Arc<TimeWindow>),
    /// Never reply; the caller's timeout decides the outcome
    Timeout,
    /// Reject the request
    Declined,
    /// Reply with `ok == false`
    NotOk,
    /// Fail with the given transport error
    Fail(CallError),
}

impl SimulatedEndpoint {
    async fn handle(&self, options: &RequestOptions) -> Result<Response, CallError> {
        match self {
            SimulatedEndpoint::Echo => Ok(Response::ok(options.body.clone())),
            SimulatedEndpoint::Health => Ok(Response::ok("OK")),
            SimulatedEndpoint::Delay(delay) => {
                sleep(*delay).await;
                Ok(Response::ok(options.body.clone()))
            }
            SimulatedEndpoint::WindowDelay(window) => {
                sleep(Duration::from_millis(window.current_value())).await;
                Ok(Response::ok(options.body.clone()))
            }
            SimulatedEndpoint::Timeout => std::future::pending().await,
            SimulatedEndpoint::Declined => Err(CallError::Declined(format!(
                "endpoint '{}' declined the request",
                options.endpoint
            ))),
            SimulatedEndpoint::NotOk => Ok(Response::not_ok(options.body.clone())),
            SimulatedEndpoint::Fail(err) => Err(err.clone()),
        }
    }
}

pub struct SimulatedChannel {
    name: String,
    routes: HashMap<String, SimulatedEndpoint>,
    fallback: Option<SimulatedEndpoint>,
    dispatch_failure: Option<String>,
    served: AtomicU64,
}

impl SimulatedChannel {
    /// A channel that answers every endpoint with `behaviour`
    pub fn new(name: impl Into<String>, behaviour: SimulatedEndpoint) -> Self {
        Self {
            name: name.into(),
            routes: HashMap::new(),
            fallback: Some(behaviour),
            dispatch_failure: None,
            served: AtomicU64::new(0),
        }
    }

    /// A channel with explicit routes only; unknown endpoints are protocol errors
    pub fn routed(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            routes: HashMap::new(),
            fallback: None,
            dispatch_failure: None,
            served: AtomicU64::new(0),
        }
    }

    /// A channel that refuses every dispatch
    pub fn failing_dispatch(name: impl Into<String>, reason: impl Into<String>) -> Self {
        let mut channel = Self::routed(name);
        channel.dispatch_failure = Some(reason.into());
        channel
    }

    pub fn route(mut self, endpoint: impl Into<String>, behaviour: SimulatedEndpoint) -> Self {
        self.routes.insert(endpoint.into(), behaviour);
        self
    }

    /// Number of requests that reached an endpoint
    pub fn requests_served(&self) -> u64 {
        self.served.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Channel for SimulatedChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn check_dispatch(&self) -> Result<(), DispatchError> {
        match &self.dispatch_failure {
            Some(reason) => Err(DispatchError::Refused {
                channel: self.name.clone(),
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }

    async fn send(&self, options: &RequestOptions) -> Result<Response, CallError> {
        let behaviour = self
            .routes
            .get(&options.endpoint)
            .or(self.fallback.as_ref())
            .ok_or_else(|| CallError::Protocol(format!("no such endpoint: {}", options.endpoint)))?;

        self.served.fetch_add(1, Ordering::Relaxed);
        behaviour.handle(options).await
    }
}
