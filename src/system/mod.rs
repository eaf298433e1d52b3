//! System assembly: the physical address map, the program loader, and the
//! machine that owns the CPU, bus and devices for a run.

pub mod loader;
pub mod machine;
pub mod memory_map;

pub use loader::{load_image, LoadError};
pub use machine::{Machine, StopReason};
