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

//! Connector implementations, one module per device protocol.

mod beso;
mod dummy;
mod iris_ccd;
mod pilar;
mod pillar;

pub use beso::BesoConnector;
pub use dummy::DummyConnector;
pub use iris_ccd::IrisCcdConnector;
pub use pilar::{ActionStep, Mappings, PilarConfig, PilarConnector, Settings, Timeouts};
pub use pillar::PillarConnector;

use std::time::Duration;

/// Simulated link setup time of the mock device systems.
const MOCK_CONNECT_DELAY: Duration = Duration::from_millis(100);
