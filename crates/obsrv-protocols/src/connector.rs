// Copyright 2025 The ocabox-server Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The connector abstraction shared by all device protocols.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::component::Component;

/// Named request arguments (e.g. `{"RightAscension": 12.5}`).
pub type RequestData = Map<String, Value>;

/// Errors reported by connectors.
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("{0} connector not connected")]
    NotConnected(&'static str),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("command failed: {0}")]
    CommandFailed(String),

    #[error("unknown variable '{variable}' for {kind} component")]
    UnknownVariable { kind: String, variable: String },

    #[error("unknown function: {0}")]
    UnknownFunction(String),

    #[error("missing argument '{argument}' for action '{action}'")]
    MissingArgument { action: String, argument: String },

    #[error("unknown protocol: {protocol}. Available: {available:?}")]
    UnknownProtocol {
        protocol: String,
        available: Vec<&'static str>,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Network location of a device system.
///
/// Mock protocols ignore it; Pilar requires both fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: Option<String>,
    pub port: Option<u16>,
}

impl Endpoint {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: Some(host.into()),
            port: Some(port),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.host, self.port) {
            (Some(host), Some(port)) => write!(f, "{host}:{port}"),
            (Some(host), None) => f.write_str(host),
            _ => f.write_str("<no endpoint>"),
        }
    }
}

/// A variable change pushed by a subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionUpdate {
    pub component: String,
    pub variable: String,
    pub value: Value,
}

/// Async interface to one device system.
///
/// Connectors are shared between concurrent requests, so every method takes
/// `&self` and implementations keep their mutable state behind locks.
#[async_trait]
pub trait Connector: Send + Sync + fmt::Debug {
    /// Protocol name, as accepted by [`crate::create_connector`].
    fn protocol(&self) -> &'static str;

    async fn connect(&self, endpoint: &Endpoint) -> Result<(), ConnectorError>;

    async fn disconnect(&self);

    fn is_connected(&self) -> bool;

    /// Read a variable of a component.
    ///
    /// Variables the protocol does not know resolve to `Value::Null`.
    async fn get(
        &self,
        component: &Component,
        variable: &str,
        data: &RequestData,
    ) -> Result<Value, ConnectorError>;

    /// Write a variable or issue a command, returning a protocol status value.
    async fn put(
        &self,
        component: &Component,
        variable: &str,
        data: &RequestData,
    ) -> Result<Value, ConnectorError>;

    async fn call(
        &self,
        component: &Component,
        function: &str,
        data: &RequestData,
    ) -> Result<Value, ConnectorError>;

    /// Subscribe to `(component, variable)` pairs.
    ///
    /// Protocols without push support log and return `Ok(())` without ever
    /// sending on `updates`.
    async fn subscribe(
        &self,
        variables: &[(String, String)],
        updates: mpsc::Sender<SubscriptionUpdate>,
    ) -> Result<(), ConnectorError>;
}

/// Look up the first present key among `keys`.
pub(crate) fn arg<'a>(data: &'a RequestData, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|key| data.get(*key))
}
