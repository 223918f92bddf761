//! Mock Modbus-RTU inverter used for integration testing.
//!
//! The simulator answers read-holding-register requests (function 0x03)
//! from a configurable register map, raises Modbus exception responses for
//! blacklisted addresses, and echoes write frames back with a fresh CRC.
//! Frames cross the boundary hex-encoded; transport is out of scope.

pub mod crc;
pub mod frame;
pub mod simulator;

pub use crc::{append_crc, crc16};
pub use frame::{decode_hex_frame, encode_hex_frame, FrameError, ReadRequest};
pub use simulator::InverterSimulator;
