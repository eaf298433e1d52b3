//! Volatile memory devices.

pub mod ram;

pub use ram::RamDevice;
