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

//! A single Pilar TCP session.
//!
//! Message format:
//! ```text
//! -> <id> <command>
//! <- <id> <name>=<value>         (zero or more)
//! <- <id> COMMAND COMPLETE | <id> COMMAND FAILED
//! ```
//!
//! Lines carrying other IDs are ignored. A command that times out or is
//! cancelled leaves the session stale: its late replies could be taken for
//! those of a later command reusing the same ID, so stale sessions are
//! reopened before their next use.

use std::fmt;
use std::time::Duration;

use log::{debug, info};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::connector::ConnectorError;

const WELCOME_TIMEOUT: Duration = Duration::from_secs(10);
const ENC_TIMEOUT: Duration = Duration::from_secs(5);
const WELCOME_MAX_BYTES: usize = 4096;

pub(crate) trait PilarStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> PilarStream for T {}

/// Classification of one response line for a given command ID.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Reply<'a> {
    Value(&'a str),
    Complete,
    Failed,
    /// Belongs to another command or carries no information.
    Other,
}

pub(crate) fn parse_reply(cmd_id: u32, line: &str) -> Reply<'_> {
    let prefix = format!("{cmd_id} ");
    let Some(rest) = line.strip_prefix(&prefix) else {
        return Reply::Other;
    };
    if rest.starts_with("COMMAND COMPLETE") {
        Reply::Complete
    } else if rest.starts_with("COMMAND FAILED") {
        Reply::Failed
    } else if let Some((_, value)) = rest.split_once('=') {
        Reply::Value(value.trim())
    } else {
        Reply::Other
    }
}

pub(crate) struct PilarConnection {
    stream: BufReader<Box<dyn PilarStream>>,
    host: String,
    port: u16,
    peer: String,
    /// A command was sent and its completion line not yet read.
    in_flight: bool,
}

impl fmt::Debug for PilarConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PilarConnection")
            .field("peer", &self.peer)
            .field("in_flight", &self.in_flight)
            .finish_non_exhaustive()
    }
}

impl PilarConnection {
    /// Connect, read the welcome banner and negotiate TLS if the server asks.
    pub(crate) async fn open(
        host: &str,
        port: u16,
        connect_timeout: Duration,
    ) -> Result<Self, ConnectorError> {
        let peer = format!("{host}:{port}");
        let mut tcp = timeout(connect_timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|elapsed| ConnectorError::Timeout(format!("connecting to {peer}: {elapsed}")))??;

        let mut welcome = vec![0u8; WELCOME_MAX_BYTES];
        let n = timeout(WELCOME_TIMEOUT, tcp.read(&mut welcome))
            .await
            .map_err(|elapsed| ConnectorError::Timeout(format!("welcome from {peer}: {elapsed}")))??;
        let welcome = &welcome[..n];
        debug!("Pilar welcome from {peer}: {}", String::from_utf8_lossy(welcome).trim());

        let stream: Box<dyn PilarStream> = if welcome.windows(3).any(|w| w == b"TLS") {
            tcp.write_all(b"ENC TLS\n").await?;
            tcp.flush().await?;

            let mut reader = BufReader::new(tcp);
            let mut line = String::new();
            timeout(ENC_TIMEOUT, reader.read_line(&mut line))
                .await
                .map_err(|elapsed| ConnectorError::Timeout(format!("TLS negotiation with {peer}: {elapsed}")))??;
            if !line.contains("ENC OK") {
                return Err(ConnectorError::Connection("Pilar TLS negotiation failed.".to_string()));
            }
            upgrade_tls(reader.into_inner(), host).await?
        } else {
            Box::new(tcp)
        };

        Ok(Self {
            stream: BufReader::new(stream),
            host: host.to_string(),
            port,
            peer,
            in_flight: false,
        })
    }

    /// Whether an earlier command on this session never completed.
    pub(crate) fn is_stale(&self) -> bool {
        self.in_flight
    }

    /// Replace the session with a fresh one to the same peer.
    pub(crate) async fn reopen(&mut self, connect_timeout: Duration) -> Result<(), ConnectorError> {
        debug!("Reopening stale Pilar session to {}", self.peer);
        let fresh = Self::open(&self.host, self.port, connect_timeout).await?;
        let stale = std::mem::replace(self, fresh);
        stale.close().await;
        Ok(())
    }

    /// Send one command and wait for its completion line.
    ///
    /// Returns the last value reported for the command, or `"OK"` when the
    /// command completed without reporting one.
    pub(crate) async fn execute(
        &mut self,
        cmd_id: u32,
        command: &str,
        read_timeout: Duration,
    ) -> Result<String, ConnectorError> {
        debug!("Pilar OUT on {} [ID:{cmd_id}] >>> {command}", self.peer);
        self.in_flight = true;
        self.stream
            .write_all(format!("{cmd_id} {command}\n").as_bytes())
            .await?;
        self.stream.flush().await?;

        let mut value = None;
        let mut line = String::new();
        loop {
            line.clear();
            let n = timeout(read_timeout, self.stream.read_line(&mut line))
                .await
                .map_err(|elapsed| {
                    ConnectorError::Timeout(format!("Pilar command '{command}': {elapsed}"))
                })??;
            if n == 0 {
                return Err(ConnectorError::Connection(
                    "Pilar connection closed unexpectedly.".to_string(),
                ));
            }

            let response = line.trim();
            debug!("Pilar IN on {} [ID:{cmd_id}] <<< {response}", self.peer);
            match parse_reply(cmd_id, response) {
                Reply::Value(v) => value = Some(v.to_string()),
                Reply::Complete => {
                    self.in_flight = false;
                    return Ok(value.unwrap_or_else(|| "OK".to_string()));
                }
                Reply::Failed => {
                    self.in_flight = false;
                    return Err(ConnectorError::CommandFailed(format!(
                        "Pilar command failed: {command}"
                    )));
                }
                Reply::Other => {}
            }
        }
    }

    pub(crate) async fn close(mut self) {
        if let Err(e) = self.stream.get_mut().shutdown().await {
            debug!("Pilar connection to {} closed with error: {e}", self.peer);
        }
    }
}

#[cfg(feature = "tls")]
async fn upgrade_tls(tcp: TcpStream, host: &str) -> Result<Box<dyn PilarStream>, ConnectorError> {
    let connector = tokio_native_tls::native_tls::TlsConnector::new()
        .map_err(|e| ConnectorError::Connection(format!("TLS setup failed: {e}")))?;
    let stream = tokio_native_tls::TlsConnector::from(connector)
        .connect(host, tcp)
        .await
        .map_err(|e| ConnectorError::Connection(format!("Pilar TLS handshake failed: {e}")))?;
    info!("Pilar session to {host} upgraded to TLS");
    Ok(Box::new(stream))
}

#[cfg(not(feature = "tls"))]
#[allow(clippy::unused_async, reason = "mirrors the signature of the TLS-enabled variant")]
async fn upgrade_tls(_tcp: TcpStream, host: &str) -> Result<Box<dyn PilarStream>, ConnectorError> {
    info!("Pilar server {host} requested TLS");
    Err(ConnectorError::Connection(
        "Pilar server requires TLS but this build lacks the `tls` feature".to_string(),
    ))
}
