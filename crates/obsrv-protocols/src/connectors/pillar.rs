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

//! Pillar protocol for the IRIS telescope mount.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use log::{info, warn};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::sleep;

use super::MOCK_CONNECT_DELAY;
use crate::component::{Component, ComponentKind};
use crate::connector::{arg, Connector, ConnectorError, Endpoint, RequestData, SubscriptionUpdate};

/// Connector for the Pillar telescope mount system.
#[derive(Debug, Default)]
pub struct PillarConnector {
    connected: AtomicBool,
}

impl PillarConnector {
    #[must_use]
    pub fn new() -> Self {
        info!("Pillar connector created");
        Self::default()
    }

    fn ensure_connected(&self) -> Result<(), ConnectorError> {
        if self.connected.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(ConnectorError::NotConnected("Pillar"))
        }
    }
}

#[async_trait]
impl Connector for PillarConnector {
    fn protocol(&self) -> &'static str {
        "pillar"
    }

    async fn connect(&self, endpoint: &Endpoint) -> Result<(), ConnectorError> {
        sleep(MOCK_CONNECT_DELAY).await;
        self.connected.store(true, Ordering::Release);
        info!("Connected to Pillar telescope system ({endpoint})");
        Ok(())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::Release);
        info!("Disconnected from Pillar telescope system");
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn get(
        &self,
        component: &Component,
        variable: &str,
        _data: &RequestData,
    ) -> Result<Value, ConnectorError> {
        self.ensure_connected()?;

        let value = match (&component.kind, variable) {
            (ComponentKind::Telescope, "rightascension") => json!(12.5),
            (ComponentKind::Telescope, "declination") => json!(45.0),
            (ComponentKind::Telescope, "tracking") => json!(true),
            (ComponentKind::Focuser, "position") => json!(5000),
            (kind, _) => {
                warn!("Unknown Pillar GET: {kind}.{variable}");
                Value::Null
            }
        };
        Ok(value)
    }

    async fn put(
        &self,
        component: &Component,
        variable: &str,
        data: &RequestData,
    ) -> Result<Value, ConnectorError> {
        self.ensure_connected()?;

        let status = match (&component.kind, variable) {
            (ComponentKind::Telescope, "slewtocoordinates") => {
                let ra = arg(data, &["RightAscension"]).cloned().unwrap_or(json!(0));
                let dec = arg(data, &["Declination"]).cloned().unwrap_or(json!(0));
                info!("Pillar: Slewing to RA={ra}, Dec={dec}");
                json!({"status": "slewing_started", "estimated_time": 30.0})
            }
            (ComponentKind::Focuser, "move") => {
                let position = arg(data, &["Position"]).cloned().unwrap_or(json!(0));
                info!("Pillar: Moving focuser to {position}");
                json!({"status": "moving", "target_position": position})
            }
            (kind, _) => {
                warn!("Unknown Pillar PUT: {kind}.{variable}");
                json!({"status": "unknown_command"})
            }
        };
        Ok(status)
    }

    async fn call(
        &self,
        component: &Component,
        function: &str,
        _data: &RequestData,
    ) -> Result<Value, ConnectorError> {
        info!("Pillar CALL: {}.{}", component.kind, function);
        Ok(json!({"status": "called", "function": function}))
    }

    async fn subscribe(
        &self,
        variables: &[(String, String)],
        _updates: mpsc::Sender<SubscriptionUpdate>,
    ) -> Result<(), ConnectorError> {
        info!("Pillar SUBSCRIBE: {variables:?}");
        Ok(())
    }
}
