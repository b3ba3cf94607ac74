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

//! IRIS CCD protocol for the infrared camera driver.
//!
//! Exposures are simulated: starting one flips the exposure state to
//! `exposing` and a background task flips it to `ready` once the requested
//! duration has elapsed. Disconnecting cancels pending exposures.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use log::{info, warn};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use super::MOCK_CONNECT_DELAY;
use crate::component::{Component, ComponentKind};
use crate::connector::{arg, Connector, ConnectorError, Endpoint, RequestData, SubscriptionUpdate};

const STATE_IDLE: &str = "idle";
const STATE_EXPOSING: &str = "exposing";
const STATE_READY: &str = "ready";

/// Connector for the IRIS CCD custom driver.
#[derive(Debug)]
pub struct IrisCcdConnector {
    connected: AtomicBool,
    exposure_state: Arc<Mutex<&'static str>>,
    cancel_token: Mutex<CancellationToken>,
}

impl Default for IrisCcdConnector {
    fn default() -> Self {
        Self {
            connected: AtomicBool::new(false),
            exposure_state: Arc::new(Mutex::new(STATE_IDLE)),
            cancel_token: Mutex::new(CancellationToken::new()),
        }
    }
}

impl IrisCcdConnector {
    #[must_use]
    pub fn new() -> Self {
        info!("IRIS CCD connector created");
        Self::default()
    }

    fn ensure_connected(&self) -> Result<(), ConnectorError> {
        if self.connected.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(ConnectorError::NotConnected("IRIS CCD"))
        }
    }

    fn exposure_state(&self) -> &'static str {
        self.exposure_state.lock().map_or(STATE_IDLE, |s| *s)
    }

    fn start_exposure(&self, duration: Duration) {
        if let Ok(mut state) = self.exposure_state.lock() {
            *state = STATE_EXPOSING;
        }

        let state = Arc::clone(&self.exposure_state);
        let cancel = self
            .cancel_token
            .lock()
            .map(|token| token.child_token())
            .unwrap_or_default();

        tokio::spawn(async move {
            tokio::select! {
                () = sleep(duration) => {
                    if let Ok(mut state) = state.lock() {
                        *state = STATE_READY;
                    }
                    info!("IRIS CCD: Exposure completed");
                }
                () = cancel.cancelled() => {
                    info!("IRIS CCD: Exposure aborted");
                }
            }
        });
    }
}

#[async_trait]
impl Connector for IrisCcdConnector {
    fn protocol(&self) -> &'static str {
        "iris_ccd"
    }

    async fn connect(&self, endpoint: &Endpoint) -> Result<(), ConnectorError> {
        sleep(MOCK_CONNECT_DELAY).await;
        if let Ok(mut token) = self.cancel_token.lock() {
            if token.is_cancelled() {
                *token = CancellationToken::new();
            }
        }
        self.connected.store(true, Ordering::Release);
        info!("Connected to IRIS CCD system ({endpoint})");
        Ok(())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::Release);
        if let Ok(token) = self.cancel_token.lock() {
            token.cancel();
        }
        info!("Disconnected from IRIS CCD system");
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
            (ComponentKind::Camera, "temperature") => json!(-80.0),
            (ComponentKind::Camera, "exposurestate") => json!(self.exposure_state()),
            (ComponentKind::Camera, "coolerstatus") => json!("cooling"),
            (ComponentKind::Switch, "shutter") => json!("closed"),
            (kind, _) => {
                warn!("Unknown IRIS CCD GET: {kind}.{variable}");
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
                let exposure_time = arg(data, &["Duration"]).and_then(Value::as_f64).unwrap_or(1.0);
                let duration = Duration::try_from_secs_f64(exposure_time).unwrap_or_default();
                info!("IRIS CCD: Starting {exposure_time}s exposure");
                self.start_exposure(duration);
                json!({"status": "exposure_started", "exposure_time": exposure_time})
            }
            (ComponentKind::Camera, "settemperature") => {
                let temp = arg(data, &["Temperature"]).cloned().unwrap_or(json!(-80.0));
                info!("IRIS CCD: Setting temperature to {temp}°C");
                json!({"status": "cooling", "target_temp": temp})
            }
            (ComponentKind::Switch, "shutter") => {
                let state = arg(data, &["State"]).cloned().unwrap_or(json!("closed"));
                info!("IRIS CCD: Setting shutter {state}");
                json!({"status": "shutter_set", "state": state})
            }
            (kind, _) => {
                warn!("Unknown IRIS CCD PUT: {kind}.{variable}");
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
        info!("IRIS CCD CALL: {}.{}", component.kind, function);
        Ok(json!({"status": "called", "function": function}))
    }

    async fn subscribe(
        &self,
        variables: &[(String, String)],
        _updates: mpsc::Sender<SubscriptionUpdate>,
    ) -> Result<(), ConnectorError> {
        info!("IRIS CCD SUBSCRIBE: {variables:?}");
        Ok(())
    }
}

impl Drop for IrisCcdConnector {
    fn drop(&mut self) {
        if let Ok(token) = self.cancel_token.lock() {
            token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera() -> Component {
        Component::new("camera", ComponentKind::Camera)
    }

    #[tokio::test]
    async fn test_exposure_completes() {
        let iris = IrisCcdConnector::new();
        iris.connect(&Endpoint::default()).await.unwrap();
        let empty = RequestData::new();
        assert_eq!(iris.get(&camera(), "exposurestate", &empty).await.unwrap(), json!("idle"));

        let mut data = RequestData::new();
        data.insert("Duration".to_string(), json!(0.05));
        let status = iris.put(&camera(), "startexposure", &data).await.unwrap();
        assert_eq!(status["status"], json!("exposure_started"));
        assert_eq!(iris.get(&camera(), "exposurestate", &empty).await.unwrap(), json!("exposing"));

        sleep(Duration::from_millis(300)).await;
        assert_eq!(iris.get(&camera(), "exposurestate", &empty).await.unwrap(), json!("ready"));
    }

    #[tokio::test]
    async fn test_disconnect_aborts_exposure() {
        let iris = IrisCcdConnector::new();
        iris.connect(&Endpoint::default()).await.unwrap();

        let mut data = RequestData::new();
        data.insert("Duration".to_string(), json!(0.05));
        iris.put(&camera(), "startexposure", &data).await.unwrap();
        iris.disconnect().await;
        sleep(Duration::from_millis(200)).await;

        assert_eq!(iris.exposure_state(), STATE_EXPOSING);
        assert!(iris
            .get(&camera(), "exposurestate", &RequestData::new())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_unknown_put_reports_status() {
        let iris = IrisCcdConnector::new();
        iris.connect(&Endpoint::default()).await.unwrap();
        let focuser = Component::new("focuser", ComponentKind::Focuser);
        assert_eq!(
            iris.put(&focuser, "move", &RequestData::new()).await.unwrap(),
            json!({"status": "unknown_command"})
        );
    }
}
