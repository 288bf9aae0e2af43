//! sdio-dma-sdmmc - Blocks and block addressing

use core::ops::{Deref, DerefMut};

/// Represents a standard 512 byte block (also known as a sector). IBM PC
/// formatted 5.25" and 3.5" floppy disks, SD/MMC cards up to 1 GiB in size
/// and IDE/SATA Hard Drives up to about 2 TiB all have 512 byte blocks.
///
/// The alignment lets the DMA engine move whole words in and out of it.
#[repr(C, align(4))]
#[derive(Clone, PartialEq, Eq)]
pub struct Block {
    /// The 512 bytes in this block (or sector).
    pub contents: [u8; Block::LEN],
}

impl Block {
    /// All our blocks are a fixed length of 512 bytes. We do not support
    /// 'Advanced Format' Hard Drives with 4 KiB blocks, nor weird old
    /// pre-3.5-inch floppy disk formats.
    pub const LEN: usize = 512;

    /// Sometimes we want `LEN` as a `u32` and the casts don't look nice.
    pub const LEN_U32: u32 = 512;

    /// Create a new block full of zeros.
    pub fn new() -> Block {
        Block {
            contents: [0u8; Self::LEN],
        }
    }

    /// View a run of blocks as one contiguous byte slice.
    pub fn slice_as_bytes(blocks: &[Block]) -> &[u8] {
        // SAFETY: `Block` is `repr(C)` around a byte array whose length is a
        // multiple of its alignment, so there is no padding between blocks.
        unsafe {
            core::slice::from_raw_parts(blocks.as_ptr() as *const u8, blocks.len() * Self::LEN)
        }
    }

    /// View a run of blocks as one contiguous, mutable byte slice.
    pub fn slice_as_bytes_mut(blocks: &mut [Block]) -> &mut [u8] {
        // SAFETY: see `slice_as_bytes`.
        unsafe {
            core::slice::from_raw_parts_mut(
                blocks.as_mut_ptr() as *mut u8,
                blocks.len() * Self::LEN,
            )
        }
    }
}

impl Default for Block {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for Block {
    type Target = [u8; 512];
    fn deref(&self) -> &[u8; 512] {
        &self.contents
    }
}

impl DerefMut for Block {
    fn deref_mut(&mut self) -> &mut [u8; 512] {
        &mut self.contents
    }
}

impl core::fmt::Debug for Block {
    fn fmt(&self, fmt: &mut core::fmt::Formatter) -> core::fmt::Result {
        writeln!(fmt, "Block:")?;
        for line in self.contents.chunks(32) {
            for b in line {
                write!(fmt, "{:02x}", b)?;
            }
            writeln!(fmt)?;
        }
        Ok(())
    }
}

/// The linear numeric address of a block (or sector). The first block on a
/// disk gets `BlockIdx(0)` (which usually contains the Master Boot Record).
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct BlockIdx(pub u32);

/// Represents the a number of blocks (or sectors). Add this to a `BlockIdx`
/// to get an actual address on disk.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct BlockCount(pub u32);

impl core::ops::Add<BlockCount> for BlockIdx {
    type Output = BlockIdx;
    fn add(self, rhs: BlockCount) -> BlockIdx {
        BlockIdx(self.0 + rhs.0)
    }
}

impl BlockCount {
    /// How many bytes this many blocks hold.
    pub fn bytes(self) -> u64 {
        u64::from(self.0) * Block::LEN as u64
    }
}
