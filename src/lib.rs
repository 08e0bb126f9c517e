//! # Battery Module Fleet Simulator
//!
//! Stands in for a fleet of battery management modules on an MQTT bus so the
//! monitoring platform can be integration-tested without hardware.
//!
//! ## Features
//!
//! - **Diurnal cell voltage model**: every cell follows a 24 hour sine cycle
//! - **Command handling**: `set_config`, `blink`, `restart` and per-cell balance requests
//! - **Retained telemetry**: uptime, module voltage, temperatures and per-cell state on a fixed cadence
//! - **Rename-safe addressing**: a precomputed route table swapped together with the module name
//!
//! ## Quick Start
//!
//! ```rust
//! use bms_sim::{Fleet, MemoryTransport, Simulator};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # tokio_test_block_on(async {
//! let fleet = Fleet::new(2, 3).unwrap();
//! let transport = Arc::new(MemoryTransport::new());
//! let simulator = Simulator::new(fleet, Arc::clone(&transport), Duration::from_secs(3));
//!
//! simulator
//!     .handle_message("esp-module/bat-sim-1/cell/2/balance_request", b"")
//!     .await
//!     .unwrap();
//! let report = simulator.publish_telemetry().await;
//! assert_eq!(report.published, 20);
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Runtime::new().unwrap().block_on(f)
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`signal`] - Cell voltage as a function of the time of day
//! - [`module`] - One module's mutable state and derived readings
//! - [`fleet`] - The ordered module set and its route table
//! - [`topics`] - The `esp-module/<name>/...` topic namespace
//! - [`command`] - Inbound command parsing and application
//! - [`telemetry`] - Periodic telemetry frames
//! - [`transport`] / [`mqtt`] - The bus seam and its MQTT implementation
//! - [`simulator`] - Application context driving commands and telemetry
//! - [`config`] - YAML configuration and credentials

#![deny(warnings)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::uninlined_format_args)]

pub mod command;
pub mod config;
pub mod fleet;
pub mod module;
pub mod mqtt;
pub mod signal;
pub mod simulator;
pub mod telemetry;
pub mod topics;
pub mod transport;

// Re-export main public types for convenience
pub use command::{Command, CommandError, CommandOutcome, CommandRouter};
pub use config::{Credentials, SimulatorConfig};
pub use fleet::{Fleet, FleetError};
pub use module::BatteryModule;
pub use mqtt::MqttTransport;
pub use simulator::{Simulator, SimulatorError};
pub use telemetry::{TelemetryPublisher, TelemetryValue};
pub use transport::{BusEvent, ChannelEvents, MemoryTransport, Transport};
