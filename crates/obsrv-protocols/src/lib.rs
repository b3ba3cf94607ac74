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

//! Protocol connectors for observatory device systems.
//!
//! This library hides the wire details of the device systems an observatory
//! server talks to behind a single async [`Connector`] trait:
//!
//! - **Pilar**: TCP line protocol with a connection pool, command ID pool,
//!   per-resource locks and optional TLS upgrade
//! - **Pillar**: IRIS telescope mount
//! - **BESO**: spectrograph
//! - **IRIS CCD**: infrared camera driver
//! - **Dummy**: logs commands and answers with example values, for testing
//!
//! # Quick Start
//!
//! ```no_run
//! use obsrv_protocols::{create_connector, Component, ComponentKind, ConnectorOptions, Endpoint};
//! use serde_json::Map;
//!
//! # async fn example() -> Result<(), obsrv_protocols::ConnectorError> {
//! let connector = create_connector("dummy", &ConnectorOptions::default())?;
//! connector.connect(&Endpoint::default()).await?;
//!
//! let mount = Component::new("telescope", ComponentKind::Telescope);
//! let ra = connector.get(&mount, "rightascension", &Map::new()).await?;
//! println!("RA: {ra}");
//! # Ok(())
//! # }
//! ```

pub mod component;
pub mod connector;
pub mod connectors;
pub mod factory;

pub use component::{Component, ComponentKind};
pub use connector::{Connector, ConnectorError, Endpoint, RequestData, SubscriptionUpdate};
pub use connectors::{BesoConnector, DummyConnector, IrisCcdConnector, PilarConfig, PilarConnector, PillarConnector};
pub use factory::{create_connector, create_connector_for, ConnectorOptions, ProtocolKind};
