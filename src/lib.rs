//! Client library for the MC protocol family spoken by MELSEC PLCs over TCP.
//!
//! Three layers, leaves first: [`protocol`] builds and parses byte frames for
//! the 3E and 4E envelopes, [`client`] owns one PLC connection and serialises
//! request/response exchanges over it, and [`monitor`] polls registered
//! device targets on a background worker and dispatches change callbacks.

#![allow(clippy::len_without_is_empty)]
#![allow(clippy::new_without_default)]

pub mod client;
pub mod device;
pub mod error;
pub mod logging;
pub mod monitor;
pub mod protocol;

pub use crate::client::{ClientConfig, PlcClient};
pub use crate::device::{DeviceType, Value};
pub use crate::error::{PlcError, PlcResult};
pub use crate::monitor::{DeviceReader, PlcMonitor, TargetHandle, TargetId};
pub use crate::protocol::{AccessRoute, FrameType};
