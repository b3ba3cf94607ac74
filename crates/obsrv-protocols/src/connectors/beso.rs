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

//! BESO spectrograph protocol.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use log::{info, warn};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::sleep;

use super::MOCK_CONNECT_DELAY;
use crate::component::{Component, ComponentKind};
use crate::connector::{arg, Connector, ConnectorError, Endpoint, RequestData, SubscriptionUpdate};

/// Connector for the BESO spectrograph system.
#[derive(Debug, Default)]
pub struct BesoConnector {
    connected: AtomicBool,
}

impl BesoConnector {
    #[must_use]
    pub fn new() -> Self {
        info!("BESO connector created");
        Self::default()
    }

    fn ensure_connected(&self) -> Result<(), ConnectorError> {
        if self.connected.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(ConnectorError::NotConnected("BESO"))
        }
    }
}

#[async_trait]
impl Connector for BesoConnector {
    fn protocol(&self) -> &'static str {
        "beso"
    }

    async fn connect(&self, endpoint: &Endpoint) -> Result<(), ConnectorError> {
        sleep(MOCK_CONNECT_DELAY).await;
        self.connected.store(true, Ordering::Release);
        info!("Connected to BESO spectrograph system ({endpoint})");
        Ok(())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::Release);
        info!("Disconnected from BESO spectrograph system");
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
            (ComponentKind::Camera, "temperature") => json!(-110.0),
            (ComponentKind::Camera, "exposurestate") => json!("idle"),
            (ComponentKind::Switch, "position") => json!("science"),
            (_, "calibration_status") => json!({"thar_lamp": false, "bias_lamp": true}),
            (kind, _) => {
                warn!("Unknown BESO GET: {kind}.{variable}");
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
            (ComponentKind::Camera, "startexposure") => {
                let exposure_time = arg(data, &["Duration"]).cloned().unwrap_or(json!(1.0));
                info!("BESO: Starting {exposure_time}s exposure");
                json!({"status": "exposure_started", "exposure_time": exposure_time})
            }
            (ComponentKind::Switch, "setposition") => {
                let position = arg(data, &["Position"]).cloned().unwrap_or(json!("science"));
                info!("BESO: Setting optical switch to {position}");
                json!({"status": "moving", "target_position": position})
            }
            (_, "thar_lamp") => {
                let state = arg(data, &["State"]).and_then(Value::as_bool).unwrap_or(false);
                info!("BESO: ThAr lamp {}", if state { "ON" } else { "OFF" });
                json!({"status": "lamp_set", "state": state})
            }
            (kind, _) => {
                warn!("Unknown BESO PUT: {kind}.{variable}");
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
        info!("BESO CALL: {}.{}", component.kind, function);
        Ok(json!({"status": "called", "function": function}))
    }

    async fn subscribe(
        &self,
        variables: &[(String, String)],
        _updates: mpsc::Sender<SubscriptionUpdate>,
    ) -> Result<(), ConnectorError> {
        info!("BESO SUBSCRIBE: {variables:?}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_spectrograph_values() {
        let beso = BesoConnector::new();
        beso.connect(&Endpoint::default()).await.unwrap();

        let camera = Component::new("camera", ComponentKind::Camera);
        let switch = Component::new("optics", ComponentKind::Switch);
        let empty = RequestData::new();

        assert_eq!(beso.get(&camera, "temperature", &empty).await.unwrap(), json!(-110.0));
        assert_eq!(beso.get(&switch, "position", &empty).await.unwrap(), json!("science"));
        assert_eq!(
            beso.get(&switch, "calibration_status", &empty).await.unwrap(),
            json!({"thar_lamp": false, "bias_lamp": true})
        );
    }

    #[tokio::test]
    async fn test_lamp_and_exposure_commands() {
        let beso = BesoConnector::new();
        beso.connect(&Endpoint::default()).await.unwrap();

        let camera = Component::new("camera", ComponentKind::Camera);
        let mut data = RequestData::new();
        data.insert("State".to_string(), json!(true));
        assert_eq!(
            beso.put(&camera, "thar_lamp", &data).await.unwrap(),
            json!({"status": "lamp_set", "state": true})
        );
        assert_eq!(
            beso.put(&camera, "startexposure", &RequestData::new()).await.unwrap(),
            json!({"status": "exposure_started", "exposure_time": 1.0})
        );
    }

    #[tokio::test]
    async fn test_disconnected_put_fails() {
        let beso = BesoConnector::new();
        let camera = Component::new("camera", ComponentKind::Camera);
        assert!(beso.put(&camera, "startexposure", &RequestData::new()).await.is_err());
    }
}
