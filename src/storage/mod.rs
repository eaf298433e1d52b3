//! The storage stack: NAND cell model, flash translation layer, and the
//! NVMe-like controller that fronts them on the bus.

pub mod controller;
pub mod ftl;
pub mod nand;

pub use controller::StorageController;
pub use ftl::{BlockInfo, BlockState, Ftl, Lba, Pba};
pub use nand::{NandChip, NandError, OOB_SIZE, PAGES_PER_BLOCK, PAGE_DATA_SIZE};
