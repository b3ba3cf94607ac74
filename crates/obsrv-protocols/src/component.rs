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

//! Standard telescope component types.
//!
//! These kinds are protocol-agnostic and shared by every connector: a
//! connector decides what to do with a request by looking at the kind of the
//! component it targets, never at the component name.

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Kind of an observatory device component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ComponentKind {
    /// Telescope mount.
    Telescope,
    Dome,
    Camera,
    FilterWheel,
    Focuser,
    Rotator,
    Switch,
    SafetyMonitor,
    CoverCalibrator,
    /// Tertiary mirror selector.
    Tertiary,
    /// Anything not covered by the standard kinds.
    Other(String),
}

impl ComponentKind {
    /// Lowercase name used in configuration files and by device protocols.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Telescope => "telescope",
            Self::Dome => "dome",
            Self::Camera => "camera",
            Self::FilterWheel => "filterwheel",
            Self::Focuser => "focuser",
            Self::Rotator => "rotator",
            Self::Switch => "switch",
            Self::SafetyMonitor => "safetymonitor",
            Self::CoverCalibrator => "covercalibrator",
            Self::Tertiary => "tertiary",
            Self::Other(kind) => kind,
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComponentKind {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s.trim().to_ascii_lowercase().as_str() {
            "telescope" => Self::Telescope,
            "dome" => Self::Dome,
            "camera" => Self::Camera,
            "filterwheel" => Self::FilterWheel,
            "focuser" => Self::Focuser,
            "rotator" => Self::Rotator,
            "switch" => Self::Switch,
            "safetymonitor" => Self::SafetyMonitor,
            "covercalibrator" => Self::CoverCalibrator,
            "tertiary" => Self::Tertiary,
            other => Self::Other(other.to_string()),
        };
        Ok(kind)
    }
}

impl From<String> for ComponentKind {
    fn from(value: String) -> Self {
        match value.parse() {
            Ok(kind) => kind,
            Err(never) => match never {},
        }
    }
}

impl From<ComponentKind> for String {
    fn from(value: ComponentKind) -> Self {
        value.as_str().to_string()
    }
}

/// A device component addressed by a connector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Component {
    /// Component name as it appears in request addresses (e.g. "telescope").
    pub name: String,
    /// Standard kind, drives how connectors interpret variables.
    pub kind: ComponentKind,
}

impl Component {
    #[must_use]
    pub fn new(name: impl Into<String>, kind: ComponentKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    /// Shorthand for `self.kind == kind`.
    #[must_use]
    pub fn is(&self, kind: &ComponentKind) -> bool {
        &self.kind == kind
    }
}
