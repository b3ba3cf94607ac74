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

//! Creates protocol-specific connectors by name.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::connector::{Connector, ConnectorError};
use crate::connectors::{
    BesoConnector, DummyConnector, IrisCcdConnector, PilarConfig, PilarConnector, PillarConnector,
};

/// Device protocols this build can talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolKind {
    Pilar,
    Pillar,
    Beso,
    IrisCcd,
    /// Logs commands and returns example values.
    Dummy,
}

impl ProtocolKind {
    pub const ALL: [Self; 5] = [Self::Pilar, Self::Pillar, Self::Beso, Self::IrisCcd, Self::Dummy];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pilar => "pilar",
            Self::Pillar => "pillar",
            Self::Beso => "beso",
            Self::IrisCcd => "iris_ccd",
            Self::Dummy => "dummy",
        }
    }

    #[must_use]
    pub fn available() -> Vec<&'static str> {
        Self::ALL.iter().map(|p| p.as_str()).collect()
    }
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProtocolKind {
    type Err = ConnectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| ConnectorError::UnknownProtocol {
                protocol: s.to_string(),
                available: Self::available(),
            })
    }
}

/// Protocol-specific construction options.
#[derive(Debug, Clone, Default)]
pub struct ConnectorOptions {
    /// Pilar configuration file; built-in defaults when `None`.
    pub pilar_config: Option<PathBuf>,
}

/// Create a connector for the named protocol.
pub fn create_connector(
    protocol: &str,
    options: &ConnectorOptions,
) -> Result<Arc<dyn Connector>, ConnectorError> {
    create_connector_for(protocol.parse()?, options)
}

pub fn create_connector_for(
    protocol: ProtocolKind,
    options: &ConnectorOptions,
) -> Result<Arc<dyn Connector>, ConnectorError> {
    let connector: Arc<dyn Connector> = match protocol {
        ProtocolKind::Pilar => {
            let config = match &options.pilar_config {
                Some(path) => PilarConfig::load(path)?,
                None => PilarConfig::default(),
            };
            Arc::new(PilarConnector::new(config))
        }
        ProtocolKind::Pillar => Arc::new(PillarConnector::new()),
        ProtocolKind::Beso => Arc::new(BesoConnector::new()),
        ProtocolKind::IrisCcd => Arc::new(IrisCcdConnector::new()),
        ProtocolKind::Dummy => Arc::new(DummyConnector::new()),
    };
    Ok(connector)
}
