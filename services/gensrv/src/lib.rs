//! Genset Controller Bridge (gensrv)
//!
//! Polls a genset controller's register table over Modbus RTU or TCP,
//! decodes it into a state snapshot and publishes it on MQTT. Commands
//! arriving on MQTT become single coil writes, gated by a global cooldown.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐    ┌─────────────────┐    ┌─────────────────┐
//! │   Transport     │───►│   PollEngine    │───►│   MqttBridge    │
//! │  (RTU / TCP)    │    │ decode+classify │    │ state/avail     │
//! └─────────────────┘    └─────────────────┘    └─────────────────┘
//!          ▲                                             │
//!          │             ┌─────────────────┐             │
//!          └─────────────│CommandDispatcher│◄────────────┘
//!                        │   (cooldown)    │   command/<id>
//!                        └─────────────────┘
//! ```
//!
//! - **`layout`**: register layout loading and startup validation
//! - **`decoder`**, **`classifier`**, **`mode`**: pure decoding of one register image
//! - **`run_cycle`**, **`alarm_log`**, **`snapshot`**: state carried between polls
//! - **`poller`**, **`command`**, **`mqtt`**, **`transport`**: async edges

pub mod alarm_log;
pub mod bootstrap;
pub mod classifier;
pub mod command;
pub mod config;
pub mod decoder;
pub mod error;
pub mod layout;
pub mod mode;
pub mod mqtt;
pub mod poller;
pub mod run_cycle;
pub mod snapshot;
pub mod transport;

pub use command::{CommandDispatcher, DispatchOutcome, InboundCommand, RejectReason};
pub use config::ServiceConfig;
pub use error::{GenSrvError, Result};
pub use layout::RegisterLayout;
pub use mqtt::MqttBridge;
pub use poller::{PollEngine, PollOutcome, PollStats, StatePublisher};
pub use snapshot::{StateAggregator, StateSnapshot};
pub use transport::{ModbusTransport, RegisterTransport};
