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

//! Pilar telescope control protocol.
//!
//! The connector keeps a fixed-size pool of TCP sessions and a pool of
//! command IDs. Every command borrows one of each for its duration, so
//! independent commands run in parallel on different sessions. Writes to
//! variables mapped to the same resource are additionally serialized.

mod config;
mod connection;
mod pool;

pub use config::{ActionStep, Mappings, PilarConfig, Settings, Timeouts};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error, info, warn};
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;

use self::connection::PilarConnection;
use self::pool::Pool;
use crate::component::Component;
use crate::connector::{Connector, ConnectorError, Endpoint, RequestData, SubscriptionUpdate};

/// Connector speaking the Pilar line protocol.
#[derive(Debug)]
pub struct PilarConnector {
    config: PilarConfig,
    connections: Pool<PilarConnection>,
    ids: Pool<u32>,
    resource_locks: HashMap<String, Mutex<()>>,
    connected: AtomicBool,
}

impl PilarConnector {
    #[must_use]
    pub fn new(config: PilarConfig) -> Self {
        let resource_locks = config
            .mappings
            .resource_locks
            .values()
            .map(|resource| (resource.clone(), Mutex::new(())))
            .collect();
        info!("Pilar advanced connector created");
        Self {
            config,
            connections: Pool::new(),
            ids: Pool::new(),
            resource_locks,
            connected: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn config(&self) -> &PilarConfig {
        &self.config
    }

    fn timeout(secs: f64) -> Duration {
        PilarConfig::timeout(secs)
    }

    fn command_for(&self, component: &Component, variable: &str) -> Result<&str, ConnectorError> {
        self.config
            .command(component.kind.as_str(), variable)
            .ok_or_else(|| ConnectorError::UnknownVariable {
                kind: component.kind.to_string(),
                variable: variable.to_string(),
            })
    }

    /// Run a command, holding the lock of the resource `pilar_cmd` is mapped to.
    async fn execute_locked(
        &self,
        pilar_cmd: &str,
        command: &str,
        timeout: Duration,
    ) -> Result<String, ConnectorError> {
        let lock = self
            .config
            .resource_for(pilar_cmd)
            .and_then(|resource| self.resource_locks.get(resource).map(|lock| (resource, lock)));

        match lock {
            Some((resource, lock)) => {
                debug!("Waiting to acquire lock for resource: {resource}");
                let _guard = lock.lock().await;
                debug!("Lock acquired for resource: {resource}");
                self.execute_pooled(command, timeout).await
            }
            None => self.execute_pooled(command, timeout).await,
        }
    }

    async fn execute_pooled(&self, command: &str, timeout: Duration) -> Result<String, ConnectorError> {
        if !self.is_connected() {
            return Err(ConnectorError::NotConnected("Pilar"));
        }

        let pool_wait = Self::timeout(self.config.settings.timeouts.pool_get);
        let exhausted = || ConnectorError::Timeout("No available connection or ID in the pool.".to_string());

        // Leases go back to their pools on drop, even if this future is cancelled
        let cmd_id = self.ids.take(pool_wait).await.ok_or_else(exhausted)?;
        let mut conn = self.connections.take(pool_wait).await.ok_or_else(exhausted)?;
        if conn.is_stale() {
            conn.reopen(Self::timeout(self.config.settings.timeouts.connection))
                .await?;
        }

        let result = conn.execute(*cmd_id, command, timeout).await;

        if !self.is_connected() {
            if let Some(conn) = conn.detach() {
                conn.close().await;
            }
        }
        result
    }

    /// Pick the value to write: `value`, then the argument named like the
    /// variable, then whatever argument comes first.
    fn value_to_set<'a>(variable: &str, data: &'a RequestData) -> Option<&'a Value> {
        data.get("value")
            .or_else(|| data.get(variable))
            .or_else(|| data.values().next())
    }

    async fn set(&self, component: &Component, variable: &str, value: &Value) -> Result<Value, ConnectorError> {
        let pilar_cmd = self.command_for(component, variable)?;
        let rendered = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let command = format!("SET {pilar_cmd}={rendered}");
        let timeout = Self::timeout(self.config.settings.timeouts.set_command);
        self.execute_locked(pilar_cmd, &command, timeout).await?;
        Ok(json!({"status": "ok", "value_set": value}))
    }
}

impl Default for PilarConnector {
    fn default() -> Self {
        Self::new(PilarConfig::default())
    }
}

#[async_trait]
impl Connector for PilarConnector {
    fn protocol(&self) -> &'static str {
        "pilar"
    }

    async fn connect(&self, endpoint: &Endpoint) -> Result<(), ConnectorError> {
        if self.is_connected() {
            return Ok(());
        }
        let (Some(host), Some(port)) = (endpoint.host.clone(), endpoint.port) else {
            return Err(ConnectorError::Config(
                "Pilar connector needs both host and port".to_string(),
            ));
        };

        for leftover in self.connections.drain() {
            leftover.close().await;
        }

        let [lo, hi] = self.config.settings.id_pool_range;
        self.ids.drain();
        for id in lo..=hi {
            self.ids.put(id);
        }

        let pool_size = self.config.settings.connection_pool_size;
        let connect_timeout = Self::timeout(self.config.settings.timeouts.connection);
        let mut tasks = JoinSet::new();
        for _ in 0..pool_size {
            let host = host.clone();
            tasks.spawn(async move { PilarConnection::open(&host, port, connect_timeout).await });
        }
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(conn)) => self.connections.put(conn),
                Ok(Err(e)) => error!("Failed to create a pooled connection: {e}"),
                Err(e) => error!("Pooled connection task failed: {e}"),
            }
        }

        let opened = self.connections.len();
        if opened == pool_size {
            self.connected.store(true, Ordering::Release);
            info!("Pilar connector is now online ({host}:{port}, {pool_size} sessions).");
            Ok(())
        } else {
            self.disconnect().await;
            Err(ConnectorError::Connection(format!(
                "only {opened} of {pool_size} Pilar sessions to {host}:{port} could be opened"
            )))
        }
    }

    async fn disconnect(&self) {
        let was_connected = self.connected.swap(false, Ordering::AcqRel);
        let idle = self.connections.drain();
        if !was_connected && idle.is_empty() {
            return;
        }
        for conn in idle {
            conn.close().await;
        }
        info!("Pilar connection pool closed.");
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
        let pilar_cmd = self.command_for(component, variable).inspect_err(|e| {
            error!("Pilar GET failed for {}.{variable}: {e}", component.kind);
        })?;
        let timeout = Self::timeout(self.config.settings.timeouts.get_command);
        let reply = self
            .execute_pooled(&format!("GET {pilar_cmd}"), timeout)
            .await
            .inspect_err(|e| error!("Pilar GET failed for {}.{variable}: {e}", component.kind))?;
        Ok(Value::String(reply))
    }

    async fn put(
        &self,
        component: &Component,
        variable: &str,
        data: &RequestData,
    ) -> Result<Value, ConnectorError> {
        let value = Self::value_to_set(variable, data).cloned().ok_or_else(|| {
            ConnectorError::MissingArgument {
                action: variable.to_string(),
                argument: "value".to_string(),
            }
        })?;
        self.set(component, variable, &value)
            .await
            .inspect_err(|e| error!("Pilar PUT failed for {}.{variable}: {e}", component.kind))
    }

    async fn call(
        &self,
        component: &Component,
        function: &str,
        data: &RequestData,
    ) -> Result<Value, ConnectorError> {
        let Some(steps) = self.config.actions.get(function) else {
            warn!("Unknown Pilar action called: {function}");
            return Err(ConnectorError::UnknownFunction(function.to_string()));
        };
        info!("Executing Pilar action: {function} with data {data:?}");

        for step in steps {
            let value = match step.placeholder() {
                Some(argument) => data.get(argument).ok_or_else(|| ConnectorError::MissingArgument {
                    action: function.to_string(),
                    argument: argument.to_string(),
                })?,
                None => &step.value,
            };
            let target = Component::new(component.name.clone(), step.component.clone().into());
            self.set(&target, &step.variable, value)
                .await
                .inspect_err(|e| error!("Pilar CALL failed for action {function}: {e}"))?;
        }
        Ok(json!({"status": format!("action_{function}_completed")}))
    }

    async fn subscribe(
        &self,
        _variables: &[(String, String)],
        _updates: mpsc::Sender<SubscriptionUpdate>,
    ) -> Result<(), ConnectorError> {
        warn!("Pilar protocol does not support subscriptions.");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::ComponentKind;
    use std::sync::Arc;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    const CONFIG: &str = r#"
[settings]
connection_pool_size = 2
id_pool_range = [1, 4]

[settings.timeouts]
connection = 1.0
get_command = 1.0
set_command = 1.0
pool_get = 0.2

[mappings.commands.telescope]
rightascension = "MOUNT.RA"
declination = "MOUNT.DEC"

[mappings.resource_locks]
"MOUNT.RA" = "mount"
"MOUNT.DEC" = "mount"

[[actions.goto]]
component = "telescope"
variable = "rightascension"
value = "{ra}"

[[actions.goto]]
component = "telescope"
variable = "declination"
value = 10
"#;

    /// Fake Pilar server: answers `GET x` with `x=42`, records every command.
    async fn fake_pilar() -> (u16, Arc<std::sync::Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let server_log = Arc::clone(&log);
        tokio::spawn(async move {
            loop {
                let (socket, _) = listener.accept().await.unwrap();
                let log = Arc::clone(&server_log);
                tokio::spawn(async move {
                    let (read, mut write) = socket.into_split();
                    write.write_all(b"PILAR 1.0\n").await.unwrap();
                    let mut lines = BufReader::new(read).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        let (id, command) = line.split_once(' ').unwrap();
                        log.lock().unwrap().push(command.to_string());
                        if let Some(var) = command.strip_prefix("GET ") {
                            write.write_all(format!("{id} {var}=42\n").as_bytes()).await.unwrap();
                        }
                        write
                            .write_all(format!("{id} COMMAND COMPLETE\n").as_bytes())
                            .await
                            .unwrap();
                    }
                });
            }
        });
        (port, log)
    }

    fn mount() -> Component {
        Component::new("telescope", ComponentKind::Telescope)
    }

    #[tokio::test]
    async fn test_get_and_put_over_pool() {
        let (port, log) = fake_pilar().await;
        let pilar = PilarConnector::new(PilarConfig::from_toml(CONFIG).unwrap());
        pilar.connect(&Endpoint::new("127.0.0.1", port)).await.unwrap();
        assert!(pilar.is_connected());

        let ra = pilar.get(&mount(), "rightascension", &RequestData::new()).await.unwrap();
        assert_eq!(ra, json!("42"));

        let mut data = RequestData::new();
        data.insert("value".to_string(), json!(12.5));
        let status = pilar.put(&mount(), "declination", &data).await.unwrap();
        assert_eq!(status, json!({"status": "ok", "value_set": 12.5}));

        let log = log.lock().unwrap().clone();
        assert_eq!(log, vec!["GET MOUNT.RA".to_string(), "SET MOUNT.DEC=12.5".to_string()]);
    }

    #[tokio::test]
    async fn test_concurrent_gets_share_pool() {
        let (port, _log) = fake_pilar().await;
        let pilar = Arc::new(PilarConnector::new(PilarConfig::from_toml(CONFIG).unwrap()));
        pilar.connect(&Endpoint::new("127.0.0.1", port)).await.unwrap();

        let mut tasks = JoinSet::new();
        for _ in 0..8 {
            let pilar = Arc::clone(&pilar);
            tasks.spawn(async move {
                pilar.get(&mount(), "rightascension", &RequestData::new()).await
            });
        }
        while let Some(result) = tasks.join_next().await {
            assert_eq!(result.unwrap().unwrap(), json!("42"));
        }
        assert_eq!(pilar.connections.len(), 2);
        assert_eq!(pilar.ids.len(), 4);
    }

    #[tokio::test]
    async fn test_action_substitutes_arguments() {
        let (port, log) = fake_pilar().await;
        let pilar = PilarConnector::new(PilarConfig::from_toml(CONFIG).unwrap());
        pilar.connect(&Endpoint::new("127.0.0.1", port)).await.unwrap();

        let mut data = RequestData::new();
        data.insert("ra".to_string(), json!(3.5));
        let status = pilar.call(&mount(), "goto", &data).await.unwrap();
        assert_eq!(status, json!({"status": "action_goto_completed"}));
        assert_eq!(
            log.lock().unwrap().clone(),
            vec!["SET MOUNT.RA=3.5".to_string(), "SET MOUNT.DEC=10".to_string()]
        );

        let err = pilar.call(&mount(), "goto", &RequestData::new()).await.unwrap_err();
        assert!(matches!(err, ConnectorError::MissingArgument { ref argument, .. } if argument == "ra"));

        let err = pilar.call(&mount(), "dance", &RequestData::new()).await.unwrap_err();
        assert!(matches!(err, ConnectorError::UnknownFunction(_)));
    }

    #[tokio::test]
    async fn test_unmapped_variable_and_offline() {
        let pilar = PilarConnector::new(PilarConfig::from_toml(CONFIG).unwrap());
        let err = pilar.get(&mount(), "tracking", &RequestData::new()).await.unwrap_err();
        assert!(matches!(err, ConnectorError::UnknownVariable { .. }));

        let err = pilar.get(&mount(), "rightascension", &RequestData::new()).await.unwrap_err();
        assert!(matches!(err, ConnectorError::NotConnected("Pilar")));
    }

    #[tokio::test]
    async fn test_connect_fails_when_server_down() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let pilar = PilarConnector::new(PilarConfig::from_toml(CONFIG).unwrap());
        let err = pilar.connect(&Endpoint::new("127.0.0.1", port)).await.unwrap_err();
        assert!(matches!(err, ConnectorError::Connection(_)));
        assert!(!pilar.is_connected());
        assert_eq!(pilar.connections.len(), 0);
    }

    #[tokio::test]
    async fn test_disconnect_closes_pool() {
        let (port, _log) = fake_pilar().await;
        let pilar = PilarConnector::new(PilarConfig::from_toml(CONFIG).unwrap());
        pilar.connect(&Endpoint::new("127.0.0.1", port)).await.unwrap();
        pilar.disconnect().await;
        assert!(!pilar.is_connected());
        assert_eq!(pilar.connections.len(), 0);
    }

    /// Fake Pilar server that greets but never completes a command.
    async fn silent_pilar() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                let (socket, _) = listener.accept().await.unwrap();
                tokio::spawn(async move {
                    let (read, mut write) = socket.into_split();
                    write.write_all(b"PILAR 1.0\n").await.unwrap();
                    let mut lines = BufReader::new(read).lines();
                    while let Ok(Some(_)) = lines.next_line().await {}
                });
            }
        });
        port
    }

    #[tokio::test]
    async fn test_cancelled_commands_return_session_and_id() {
        let port = silent_pilar().await;
        let pilar = PilarConnector::new(PilarConfig::from_toml(CONFIG).unwrap());
        pilar.connect(&Endpoint::new("127.0.0.1", port)).await.unwrap();

        for _ in 0..3 {
            let cancelled = tokio::time::timeout(
                Duration::from_millis(100),
                pilar.get(&mount(), "rightascension", &RequestData::new()),
            )
            .await;
            assert!(cancelled.is_err());
        }
        assert_eq!(pilar.connections.len(), 2);
        assert_eq!(pilar.ids.len(), 4);
    }

    #[tokio::test]
    async fn test_session_reopened_after_timed_out_command() {
        let (port, log) = fake_pilar().await;
        let config = CONFIG.replace("pool_size = 2", "pool_size = 1");
        let pilar = PilarConnector::new(PilarConfig::from_toml(&config).unwrap());
        pilar.connect(&Endpoint::new("127.0.0.1", port)).await.unwrap();

        // Cancel a command before the reply arrives, leaving the session stale
        let mut pending = pilar.connections.take(Duration::from_secs(1)).await.unwrap();
        let _ = pending.execute(1, "GET MOUNT.RA", Duration::ZERO).await;
        drop(pending);

        let ra = pilar.get(&mount(), "rightascension", &RequestData::new()).await.unwrap();
        assert_eq!(ra, json!("42"));
        assert_eq!(pilar.connections.len(), 1);
        assert!(!pilar.connections.take(Duration::from_secs(1)).await.unwrap().is_stale());
        assert_eq!(log.lock().unwrap().last().map(String::as_str), Some("GET MOUNT.RA"));
    }

    #[test]
    fn test_value_to_set_precedence() {
        let mut data = RequestData::new();
        data.insert("Tracking".to_string(), json!(true));
        assert_eq!(PilarConnector::value_to_set("tracking", &data), Some(&json!(true)));
        data.insert("tracking".to_string(), json!(false));
        assert_eq!(PilarConnector::value_to_set("tracking", &data), Some(&json!(false)));
        data.insert("value".to_string(), json!(1));
        assert_eq!(PilarConnector::value_to_set("tracking", &data), Some(&json!(1)));
    }
}
