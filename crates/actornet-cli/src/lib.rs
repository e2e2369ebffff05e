// Copyright 2025 actornet Authors
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

//! # actornet CLI
//!
//! Support code for the `actornet` binary:
//!
//! - [`config`]: node configuration, loaded from a JSON/TOML file or a
//!   directory of them merged together
//! - [`logging`]: `tracing-subscriber` bootstrap
//!
//! ## Key Commands
//!
//! - `actornet node`: run a node until Ctrl-C
//! - `actornet call`: make one RPC call and print the JSON reply

pub mod config;
pub mod logging;

pub use config::NodeConfig;
pub use logging::{LogConfig, LogFormat};
