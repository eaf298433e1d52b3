//! Program loader.
//!
//! Writes a flat binary image into RAM through the bus bypass path, the
//! way a bootloader or DMA engine would copy code from external storage
//! into main memory. The destination range is validated against the RAM
//! window before any byte is written.

use log::info;
use thiserror::Error;

use crate::bus::Bus;
use crate::core::{Address, Data};

use super::memory_map;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error("cannot load an empty image")]
    EmptyImage,
    #[error("load range {start:#x}..{end:#x} leaves the RAM window")]
    OutsideRam { start: Address, end: Address },
    #[error("bus write failed at {0:#x}")]
    WriteFailed(Address),
}

/// Load `image` into RAM at `load_address`, byte by byte over the bus.
pub fn load_image(bus: &mut Bus, image: &[u8], load_address: Address) -> Result<(), LoadError> {
    if image.is_empty() {
        return Err(LoadError::EmptyImage);
    }

    let end_address = load_address + image.len() as Address - 1;
    if !memory_map::is_ram_address(load_address) || !memory_map::is_ram_address(end_address) {
        return Err(LoadError::OutsideRam {
            start: load_address,
            end: end_address,
        });
    }

    for (i, byte) in image.iter().enumerate() {
        let addr = load_address + i as Address;
        if !bus.write(addr, Data::from(*byte)) {
            return Err(LoadError::WriteFailed(addr));
        }
    }

    info!(
        "loaded {} bytes at {load_address:#x}..{end_address:#x}",
        image.len()
    );
    Ok(())
}
