//! Flash translation layer.
//!
//! Log-structured block management over the NAND cell model. One block is
//! the current write frontier ("active"); writes append to it at an
//! ever-increasing page offset, and when it fills the next write allocates
//! a fresh block from the free list. Every programmed page carries an OOB
//! record `{magic, lba}`, which is the single source of truth at mount
//! time: the logical-to-physical map, the per-block valid bitmaps, and the
//! write frontier are all reconstructed by scanning it.
//!
//! When the free list runs dry, greedy garbage collection picks the block
//! with the fewest valid pages, migrates the survivors back through the
//! normal write path, and erases the victim.

use std::collections::BTreeMap;

use byteorder::{ByteOrder, LittleEndian};
use log::debug;

use super::nand::{NandChip, NandError, OOB_SIZE, PAGES_PER_BLOCK, PAGE_DATA_SIZE};

/// Logical block address.
pub type Lba = u32;
/// Physical page address, encoded as `block * 64 + page`.
pub type Pba = u32;

/// Magic constant identifying a programmed page's OOB record.
pub const FTL_MAGIC: u64 = 0xDEAD_BEEF;

/// Lifecycle state of a physical block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    /// Erased and available for allocation.
    Free,
    /// The current write frontier.
    Active,
    /// Completely written.
    Full,
    /// Unusable (failed erase or factory bad).
    Bad,
}

/// Per-block bookkeeping.
#[derive(Debug, Clone, Copy)]
pub struct BlockInfo {
    pub state: BlockState,
    pub erase_count: u32,
    /// One bit per page; a set bit means the page is the current location
    /// of its LBA.
    pub valid_bitmap: u64,
}

impl BlockInfo {
    fn new() -> Self {
        Self {
            state: BlockState::Free,
            erase_count: 0,
            valid_bitmap: 0,
        }
    }
}

/// OOB metadata written alongside every programmed page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OobRecord {
    magic: u64,
    lba: Lba,
}

impl OobRecord {
    fn encode(self) -> [u8; OOB_SIZE] {
        let mut oob = [0xFF; OOB_SIZE];
        LittleEndian::write_u64(&mut oob[0..8], self.magic);
        LittleEndian::write_u32(&mut oob[8..12], self.lba);
        oob
    }

    fn decode(oob: &[u8]) -> Self {
        Self {
            magic: LittleEndian::read_u64(&oob[0..8]),
            lba: LittleEndian::read_u32(&oob[8..12]),
        }
    }
}

/// The translation layer. Owns the NAND chip for its lifetime; a remount is
/// expressed by releasing the chip and mounting a fresh layer over it.
pub struct Ftl {
    nand: NandChip,
    l2p: BTreeMap<Lba, Pba>,
    block_table: Vec<BlockInfo>,
    free_list: Vec<usize>,
    /// Write frontier: (block index, next page offset).
    active: Option<(usize, usize)>,
}

impl Ftl {
    /// Mount over a chip, reconstructing all volatile state from the OOB
    /// records.
    pub fn mount(nand: NandChip) -> Self {
        let mut ftl = Self {
            block_table: vec![BlockInfo::new(); nand.block_count()],
            nand,
            l2p: BTreeMap::new(),
            free_list: Vec::new(),
            active: None,
        };
        ftl.scan_and_mount();
        ftl
    }

    /// Give the chip back (for persistence tests and host-side teardown).
    pub fn release(self) -> NandChip {
        self.nand
    }

    /// Scan every block in reverse index order (so the free list pops in
    /// ascending index) and classify it from its OOB records.
    fn scan_and_mount(&mut self) {
        let mut data = vec![0u8; PAGE_DATA_SIZE];
        let mut oob = vec![0u8; OOB_SIZE];

        for block in (0..self.block_table.len()).rev() {
            if self
                .nand
                .read_page(block, 0, &mut data, Some(&mut oob))
                .is_err()
            {
                self.block_table[block].state = BlockState::Bad;
                continue;
            }

            let record = OobRecord::decode(&oob);
            if record.magic != FTL_MAGIC {
                self.block_table[block].state = BlockState::Free;
                self.free_list.push(block);
                continue;
            }

            self.insert_mapping(record.lba, (block * PAGES_PER_BLOCK) as Pba);

            let mut found_frontier = false;
            for page in 1..PAGES_PER_BLOCK {
                if self
                    .nand
                    .read_page(block, page, &mut data, Some(&mut oob))
                    .is_err()
                {
                    break;
                }
                let record = OobRecord::decode(&oob);
                if record.magic == FTL_MAGIC {
                    self.insert_mapping(
                        record.lba,
                        (block * PAGES_PER_BLOCK + page) as Pba,
                    );
                } else {
                    // First unprogrammed page in a used block: this is the
                    // write frontier.
                    self.active = Some((block, page));
                    self.block_table[block].state = BlockState::Active;
                    found_frontier = true;
                    break;
                }
            }
            if !found_frontier {
                self.block_table[block].state = BlockState::Full;
            }
        }

        debug!(
            "ftl: mounted {} blocks, {} free, {} mapped LBAs, frontier {:?}",
            self.block_table.len(),
            self.free_list.len(),
            self.l2p.len(),
            self.active,
        );
    }

    /// Point `lba` at `pba`, maintaining the valid bitmaps: the displaced
    /// mapping's bit is cleared, the new page's bit is set.
    fn insert_mapping(&mut self, lba: Lba, pba: Pba) {
        if let Some(old) = self.l2p.insert(lba, pba) {
            let old_block = old as usize / PAGES_PER_BLOCK;
            let old_page = old as usize % PAGES_PER_BLOCK;
            self.block_table[old_block].valid_bitmap &= !(1u64 << old_page);
        }
        let block = pba as usize / PAGES_PER_BLOCK;
        let page = pba as usize % PAGES_PER_BLOCK;
        self.block_table[block].valid_bitmap |= 1u64 << page;
    }

    // ---------------------------------------------------------------------
    // Host interface
    // ---------------------------------------------------------------------

    /// Write one logical page. `data` must be exactly one page.
    pub fn write(&mut self, lba: Lba, data: &[u8]) -> Result<(), NandError> {
        if data.len() != PAGE_DATA_SIZE {
            return Err(NandError::WriteError);
        }

        let oob = OobRecord {
            magic: FTL_MAGIC,
            lba,
        }
        .encode();

        // Invalidate the page currently holding this LBA, if any.
        if let Some(&old) = self.l2p.get(&lba) {
            let old_block = old as usize / PAGES_PER_BLOCK;
            let old_page = old as usize % PAGES_PER_BLOCK;
            self.block_table[old_block].valid_bitmap &= !(1u64 << old_page);
        }

        self.ensure_active_block()?;
        let (block, page) = self.active.expect("active block after allocation");

        self.nand.program_page(block, page, data, Some(&oob))?;

        self.l2p
            .insert(lba, (block * PAGES_PER_BLOCK + page) as Pba);
        self.block_table[block].valid_bitmap |= 1u64 << page;

        let next = page + 1;
        if next >= PAGES_PER_BLOCK {
            // Frontier filled: close it, next write allocates.
            self.block_table[block].state = BlockState::Full;
            self.active = None;
        } else {
            self.active = Some((block, next));
        }
        Ok(())
    }

    /// Read one logical page. An unmapped LBA reads as erased flash: the
    /// buffer is filled with 0xFF and the read succeeds.
    pub fn read(&mut self, lba: Lba, buffer: &mut [u8]) -> Result<(), NandError> {
        let Some(&pba) = self.l2p.get(&lba) else {
            buffer.fill(0xFF);
            return Ok(());
        };
        let block = pba as usize / PAGES_PER_BLOCK;
        let page = pba as usize % PAGES_PER_BLOCK;
        self.nand.read_page(block, page, buffer, None)
    }

    // ---------------------------------------------------------------------
    // Allocation and reclamation
    // ---------------------------------------------------------------------

    fn ensure_active_block(&mut self) -> Result<(), NandError> {
        if self.active.is_some() {
            return Ok(());
        }
        if self.free_list.is_empty() {
            self.garbage_collect()?;
            // Survivor write-back during GC may already have opened a new
            // frontier (consuming the block it just freed).
            if self.active.is_some() {
                return Ok(());
            }
        }
        let block = self.free_list.pop().ok_or(NandError::WriteError)?;
        self.block_table[block].state = BlockState::Active;
        self.block_table[block].valid_bitmap = 0;
        self.active = Some((block, 0));
        Ok(())
    }

    /// Greedy reclamation: pick the non-free, non-bad block with the fewest
    /// valid pages, migrate its live pages, erase it.
    fn garbage_collect(&mut self) -> Result<(), NandError> {
        let active_block = self.active.map(|(block, _)| block);

        let mut victim: Option<usize> = None;
        let mut min_valid = (PAGES_PER_BLOCK + 1) as u32;
        for (index, info) in self.block_table.iter().enumerate() {
            if Some(index) == active_block {
                continue;
            }
            if matches!(info.state, BlockState::Free | BlockState::Bad) {
                continue;
            }
            let valid = info.valid_bitmap.count_ones();
            if valid < min_valid {
                min_valid = valid;
                victim = Some(index);
            }
        }
        let victim = victim.ok_or(NandError::WriteError)?;
        debug!("ftl: gc victim {victim} with {min_valid} valid pages");

        // Copy-back: collect live pages whose OOB still agrees with the map.
        let mut survivors: Vec<(Lba, Vec<u8>)> = Vec::new();
        let mut data = vec![0u8; PAGE_DATA_SIZE];
        let mut oob = vec![0u8; OOB_SIZE];
        for page in 0..PAGES_PER_BLOCK {
            if self.block_table[victim].valid_bitmap & (1u64 << page) == 0 {
                continue;
            }
            if self
                .nand
                .read_page(victim, page, &mut data, Some(&mut oob))
                .is_err()
            {
                continue;
            }
            let record = OobRecord::decode(&oob);
            let expected = (victim * PAGES_PER_BLOCK + page) as Pba;
            // A page whose mapping moved since the bitmap was set is stale;
            // drop it.
            if self.l2p.get(&record.lba) == Some(&expected) {
                survivors.push((record.lba, data.clone()));
            }
        }

        if self.nand.erase_block(victim).is_err() {
            self.block_table[victim].state = BlockState::Bad;
            return Err(NandError::WriteError);
        }
        self.block_table[victim].state = BlockState::Free;
        self.block_table[victim].valid_bitmap = 0;
        self.block_table[victim].erase_count += 1;
        self.free_list.push(victim);

        // Rewrite survivors through the normal path; each write invalidates
        // its stale self-mapping.
        for (lba, data) in survivors {
            self.write(lba, &data)?;
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Inspection
    // ---------------------------------------------------------------------

    pub fn block_info(&self, block: usize) -> BlockInfo {
        self.block_table[block]
    }

    pub fn block_count(&self) -> usize {
        self.block_table.len()
    }

    /// Current physical location of an LBA, if mapped.
    pub fn mapping(&self, lba: Lba) -> Option<Pba> {
        self.l2p.get(&lba).copied()
    }

    /// The write frontier block, if one is open.
    pub fn active_block(&self) -> Option<usize> {
        self.active.map(|(block, _)| block)
    }

    /// NAND-side erase counter, the raw wear signal.
    pub fn wear(&self, block: usize) -> u32 {
        self.nand.erase_count(block)
    }
}
