//! NAND flash cell model.
//!
//! Enforces the program/erase physics of real NAND: erasing a block sets
//! every bit to 1 (all bytes 0xFF), and programming can only pull bits from
//! 1 to 0. A program request carrying a 1 where the cell already holds a 0
//! fails atomically, mutating nothing — that transition needs an erase.
//!
//! Geometry: a page is 4096 data bytes plus a 64-byte out-of-band (OOB)
//! area; a block is 64 pages and is the smallest erasable unit.

use thiserror::Error;

/// Data bytes per page.
pub const PAGE_DATA_SIZE: usize = 4096;
/// Out-of-band bytes per page (metadata / ECC area in real hardware).
pub const OOB_SIZE: usize = 64;
/// Pages per erase block.
pub const PAGES_PER_BLOCK: usize = 64;

/// Failure modes of the cell array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum NandError {
    /// A program operation required a 0→1 bit transition.
    #[error("program would flip a bit from 0 to 1 without an erase")]
    WriteError,
    /// Block or page index out of range, or buffer size mismatch.
    #[error("block/page address out of range or buffer size mismatch")]
    InvalidAddress,
}

struct Page {
    data: [u8; PAGE_DATA_SIZE],
    oob: [u8; OOB_SIZE],
}

impl Page {
    /// Pages come up erased: every cell reads as 1.
    fn erased() -> Self {
        Self {
            data: [0xFF; PAGE_DATA_SIZE],
            oob: [0xFF; OOB_SIZE],
        }
    }
}

struct Block {
    pages: Vec<Page>,
    bad: bool,
    erase_count: u32,
}

impl Block {
    fn new() -> Self {
        Self {
            pages: (0..PAGES_PER_BLOCK).map(|_| Page::erased()).collect(),
            bad: false,
            erase_count: 0,
        }
    }
}

/// The cell array: a vector of blocks.
pub struct NandChip {
    blocks: Vec<Block>,
}

impl NandChip {
    /// A chip with `num_blocks` erased blocks.
    pub fn new(num_blocks: usize) -> Self {
        Self {
            blocks: (0..num_blocks).map(|_| Block::new()).collect(),
        }
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Erase counter for wear tracking.
    pub fn erase_count(&self, block: usize) -> u32 {
        self.blocks.get(block).map_or(0, |b| b.erase_count)
    }

    /// Factory/bad-block marker.
    pub fn is_bad(&self, block: usize) -> bool {
        self.blocks.get(block).map_or(true, |b| b.bad)
    }

    fn page(&self, block: usize, page: usize) -> Result<&Page, NandError> {
        self.blocks
            .get(block)
            .and_then(|b| b.pages.get(page))
            .ok_or(NandError::InvalidAddress)
    }

    /// Read a page's data area into `data`, and its OOB area into `oob`
    /// when a buffer is supplied.
    pub fn read_page(
        &self,
        block: usize,
        page: usize,
        data: &mut [u8],
        oob: Option<&mut [u8]>,
    ) -> Result<(), NandError> {
        if data.len() < PAGE_DATA_SIZE {
            return Err(NandError::InvalidAddress);
        }
        let src = self.page(block, page)?;
        data[..PAGE_DATA_SIZE].copy_from_slice(&src.data);
        if let Some(oob) = oob {
            if oob.len() < OOB_SIZE {
                return Err(NandError::InvalidAddress);
            }
            oob[..OOB_SIZE].copy_from_slice(&src.oob);
        }
        Ok(())
    }

    /// Program a page: verify that no byte of either area requires a 0→1
    /// transition, then accumulate charge with a bitwise AND. Fails without
    /// mutating anything if the verification trips anywhere.
    pub fn program_page(
        &mut self,
        block: usize,
        page: usize,
        data: &[u8],
        oob: Option<&[u8]>,
    ) -> Result<(), NandError> {
        if data.len() != PAGE_DATA_SIZE {
            return Err(NandError::InvalidAddress);
        }
        if oob.map_or(false, |oob| oob.len() > OOB_SIZE) {
            return Err(NandError::InvalidAddress);
        }

        let target = self
            .blocks
            .get_mut(block)
            .and_then(|b| b.pages.get_mut(page))
            .ok_or(NandError::InvalidAddress)?;

        // Physics verification across both areas before touching either:
        // incoming may not carry a 1 where the cell holds a 0.
        let data_ok = target
            .data
            .iter()
            .zip(data)
            .all(|(old, new)| old & new == *new);
        let oob_ok = oob.map_or(true, |oob| {
            target.oob.iter().zip(oob).all(|(old, new)| old & new == *new)
        });
        if !data_ok || !oob_ok {
            return Err(NandError::WriteError);
        }

        for (cell, new) in target.data.iter_mut().zip(data) {
            *cell &= new;
        }
        if let Some(oob) = oob {
            for (cell, new) in target.oob.iter_mut().zip(oob) {
                *cell &= new;
            }
        }
        Ok(())
    }

    /// Erase a block: every byte of every page (data and OOB) back to 0xFF,
    /// erase counter incremented.
    pub fn erase_block(&mut self, block: usize) -> Result<(), NandError> {
        let target = self.blocks.get_mut(block).ok_or(NandError::InvalidAddress)?;
        for page in &mut target.pages {
            *page = Page::erased();
        }
        target.erase_count += 1;
        Ok(())
    }
}
