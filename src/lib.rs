//! Relay environmental telemetry from a BLE sensor peripheral to an HTTP sink.
//!
//! The radio side is split into a pure [`link::LinkMachine`] and the btleplug
//! driver in [`ble`]; decoded values are folded by [`assembler`] and pushed
//! by [`relay`] to the sink client in [`sink`]. [`server`] is the sink itself.

pub mod assembler;
pub mod ble;
pub mod config;
pub mod db;
pub mod decode;
pub mod error;
pub mod gatt;
pub mod link;
pub mod models;
pub mod relay;
pub mod server;
pub mod sink;
