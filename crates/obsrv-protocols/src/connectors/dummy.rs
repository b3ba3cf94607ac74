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

//! Dummy protocol for testing.
//!
//! Logs every command and answers with example values for a telescope mount
//! placed roughly at the OCA site.

use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use log::{info, warn};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::component::{Component, ComponentKind};
use crate::connector::{arg, Connector, ConnectorError, Endpoint, RequestData, SubscriptionUpdate};

#[derive(Debug, Clone)]
struct MountState {
    connected: bool,
    slewing: bool,
    tracking: bool,
    /// Hours.
    ra: f64,
    /// Degrees.
    dec: f64,
    azimuth: f64,
    altitude: f64,
}

impl Default for MountState {
    fn default() -> Self {
        Self {
            connected: false,
            slewing: false,
            tracking: true,
            ra: 15.5,
            dec: -24.5,
            azimuth: 180.0,
            altitude: 45.0,
        }
    }
}

/// Connector that logs commands and returns example values.
#[derive(Debug, Default)]
pub struct DummyConnector {
    mount: Mutex<MountState>,
}

impl DummyConnector {
    #[must_use]
    pub fn new() -> Self {
        info!("Dummy connector created for testing");
        Self::default()
    }

    fn mount(&self) -> MountState {
        self.mount.lock().map(|m| m.clone()).unwrap_or_default()
    }

    fn update_mount(&self, f: impl FnOnce(&mut MountState)) {
        if let Ok(mut mount) = self.mount.lock() {
            f(&mut mount);
        }
    }
}

/// Rough local sidereal time in hours, good enough for a simulator.
#[allow(clippy::cast_precision_loss, reason = "seconds since epoch fit f64 comfortably")]
fn sidereal_time() -> f64 {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default();
    (secs / 3600.0) % 24.0
}

fn mount_variable(mount: &MountState, variable: &str) -> Option<Value> {
    let value = match variable {
        "connected" => json!(mount.connected),
        "slewing" => json!(mount.slewing),
        "tracking" => json!(mount.tracking),
        "rightascension" => json!(mount.ra),
        "declination" => json!(mount.dec),
        "azimuth" => json!(mount.azimuth),
        "altitude" => json!(mount.altitude),
        "athome" | "atpark" => json!(false),
        "canfindhome" | "canpark" | "canslew" | "cantrack" => json!(true),
        "siderealtime" => json!(sidereal_time()),
        _ => return None,
    };
    Some(value)
}

#[async_trait]
impl Connector for DummyConnector {
    fn protocol(&self) -> &'static str {
        "dummy"
    }

    async fn connect(&self, endpoint: &Endpoint) -> Result<(), ConnectorError> {
        info!("DUMMY CONNECT: {endpoint}");
        Ok(())
    }

    async fn disconnect(&self) {
        info!("DUMMY DISCONNECT");
    }

    fn is_connected(&self) -> bool {
        true
    }

    async fn get(
        &self,
        component: &Component,
        variable: &str,
        data: &RequestData,
    ) -> Result<Value, ConnectorError> {
        info!("DUMMY GET: {}.{} (data={:?})", component.name, variable, data);

        if component.is(&ComponentKind::Telescope) {
            if let Some(value) = mount_variable(&self.mount(), variable) {
                return Ok(value);
            }
        }

        let value = match variable {
            "connected" => json!(true),
            "name" => json!(format!("Dummy {}", component.name)),
            "description" => json!(format!("Dummy {} for testing", component.kind)),
            _ => {
                warn!("DUMMY GET: Unknown variable {} for {}", variable, component.name);
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
        info!("DUMMY PUT: {}.{} = {:?}", component.name, variable, data);

        if component.is(&ComponentKind::Telescope) {
            self.update_mount(|mount| match variable {
                "connected" => {
                    mount.connected = arg(data, &["value", "Connected"])
                        .and_then(Value::as_bool)
                        .unwrap_or(false);
                    info!("DUMMY: Mount connection set to {}", mount.connected);
                }
                "tracking" => {
                    mount.tracking = arg(data, &["value", "Tracking"])
                        .and_then(Value::as_bool)
                        .unwrap_or(true);
                    info!("DUMMY: Mount tracking set to {}", mount.tracking);
                }
                "rightascension" => {
                    if let Some(ra) = arg(data, &["value", "RightAscension"]).and_then(Value::as_f64) {
                        mount.ra = ra;
                    }
                    info!("DUMMY: Mount RA set to {}", mount.ra);
                }
                "declination" => {
                    if let Some(dec) = arg(data, &["value", "Declination"]).and_then(Value::as_f64) {
                        mount.dec = dec;
                    }
                    info!("DUMMY: Mount Dec set to {}", mount.dec);
                }
                _ => {}
            });
        }

        Ok(json!(true))
    }

    async fn call(
        &self,
        component: &Component,
        function: &str,
        data: &RequestData,
    ) -> Result<Value, ConnectorError> {
        info!("DUMMY CALL: {}.{}({:?})", component.name, function, data);

        if component.is(&ComponentKind::Telescope) {
            self.update_mount(|mount| match function {
                "slewtocoordinates" => {
                    let ra = arg(data, &["RightAscension", "ra"]).and_then(Value::as_f64);
                    let dec = arg(data, &["Declination", "dec"]).and_then(Value::as_f64);
                    info!("DUMMY: Starting slew to RA={ra:?}, Dec={dec:?}");
                    mount.slewing = true;
                    mount.ra = ra.unwrap_or(mount.ra);
                    mount.dec = dec.unwrap_or(mount.dec);
                }
                "abortslew" => {
                    info!("DUMMY: Aborting slew");
                    mount.slewing = false;
                }
                "park" => {
                    info!("DUMMY: Parking mount");
                    mount.slewing = false;
                }
                "unpark" => info!("DUMMY: Unparking mount"),
                "findhome" => {
                    info!("DUMMY: Finding home position");
                    mount.slewing = false;
                }
                "setpark" => info!("DUMMY: Setting park position"),
                _ => {}
            });
        }

        Ok(json!(true))
    }

    async fn subscribe(
        &self,
        variables: &[(String, String)],
        _updates: mpsc::Sender<SubscriptionUpdate>,
    ) -> Result<(), ConnectorError> {
        info!("DUMMY SUBSCRIBE: {variables:?}");
        Ok(())
    }
}

impl Drop for DummyConnector {
    fn drop(&mut self) {
        info!("Dummy connector destroyed");
    }
}
