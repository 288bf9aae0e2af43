//! sdio-dma-sdmmc - Storage adapter
//!
//! The disk I/O surface a FatFs-style filesystem expects from its media
//! layer: initialise, status, read, write and a small set of control codes.
//! Results use FatFs' numbering.

use embedded_hal::blocking::delay::{DelayMs, DelayUs};

use crate::restart::Restart;
use crate::sdio::regs::{DmaStream, SdioRegisters};
use crate::sdio::{AcquireOpts, Error, Initialized, NotInit, SdioCard};
use crate::{Block, BlockIdx};

#[cfg(feature = "log")]
use log::{error, warn};

#[cfg(feature = "defmt-log")]
use defmt::{error, warn};

/// Control code: finish pending writes.
pub const CTRL_SYNC: u8 = 0;
/// Control code: number of sectors on the card.
pub const GET_SECTOR_COUNT: u8 = 1;
/// Control code: sector size in bytes.
pub const GET_SECTOR_SIZE: u8 = 2;

/// Outcome of [`Disk::initialize`].
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum DiskStatus {
    /// Card ready
    Ok = 0,
    /// Not initialised, or initialisation failed
    InitError = 1,
    /// Nothing answered on the bus
    NoCard = 2,
}

/// Outcome of a disk operation.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum DiskResult {
    /// Done
    Ok = 0,
    /// The transfer failed
    Error = 1,
    /// The medium is write protected
    WriteProtected = 2,
    /// The card hasn't been initialised
    NotReady = 3,
    /// Bad control code or buffer
    ParameterError = 4,
}

/// Answer to a control code.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum IoctlReply {
    /// Nothing left to flush
    Synced,
    /// Number of 512-byte sectors
    SectorCount(u32),
    /// Sector size in bytes
    SectorSize(u16),
}

enum Slot<'f, HOST, DMA, DELAY>
where
    HOST: SdioRegisters,
    DMA: DmaStream,
    DELAY: DelayMs<u32> + DelayUs<u32>,
{
    Idle(SdioCard<'f, HOST, DMA, DELAY, NotInit>),
    Ready(SdioCard<'f, HOST, DMA, DELAY, Initialized>),
    Empty,
}

/// A single SD card, as a FatFs physical drive.
pub struct Disk<'f, HOST, DMA, DELAY, R>
where
    HOST: SdioRegisters,
    DMA: DmaStream,
    DELAY: DelayMs<u32> + DelayUs<u32>,
    R: Restart,
{
    slot: Slot<'f, HOST, DMA, DELAY>,
    restart: R,
    options: AcquireOpts,
    status: DiskStatus,
    sector_count: u32,
}

impl<'f, HOST, DMA, DELAY, R> Disk<'f, HOST, DMA, DELAY, R>
where
    HOST: SdioRegisters,
    DMA: DmaStream,
    DELAY: DelayMs<u32> + DelayUs<u32>,
    R: Restart,
{
    /// Wrap a card that hasn't been acquired yet.
    pub fn new(card: SdioCard<'f, HOST, DMA, DELAY, NotInit>, restart: R) -> Self {
        Disk::with_opts(card, restart, AcquireOpts::default())
    }

    /// Wrap a card, acquiring it with the given options.
    pub fn with_opts(
        card: SdioCard<'f, HOST, DMA, DELAY, NotInit>,
        restart: R,
        options: AcquireOpts,
    ) -> Self {
        Disk {
            slot: Slot::Idle(card),
            restart,
            options,
            status: DiskStatus::InitError,
            sector_count: 0,
        }
    }

    /// Bring the card up and leave it deselected. May be called again to
    /// start over.
    pub fn initialize(&mut self) -> DiskStatus {
        let card = match core::mem::replace(&mut self.slot, Slot::Empty) {
            Slot::Idle(card) => card,
            Slot::Ready(card) => card.deinit(),
            Slot::Empty => return DiskStatus::InitError,
        };
        self.status = match card.acquire_with_opts(self.options, &mut self.restart) {
            Ok(mut card) => match card.read_csd() {
                Ok(csd) => {
                    self.sector_count = csd.sector_count();
                    self.slot = Slot::Ready(card);
                    DiskStatus::Ok
                }
                Err(e) => {
                    warn!("Can't read CSD: {:?}", e);
                    self.slot = Slot::Idle(card.deinit());
                    DiskStatus::InitError
                }
            },
            Err((e, card)) => {
                error!("Error initializing card: {:?}", e);
                self.slot = Slot::Idle(card);
                match e {
                    Error::CardNotFound => DiskStatus::NoCard,
                    _ => DiskStatus::InitError,
                }
            }
        };
        self.status
    }

    /// Result of the last [`Disk::initialize`].
    pub fn status(&self) -> DiskStatus {
        self.status
    }

    /// Read `count` sectors, starting at `start`.
    pub fn read_blocks(&mut self, start: u32, count: u16, buffer: &mut [u8]) -> DiskResult {
        match &mut self.slot {
            Slot::Ready(card) => result(card.read_blocks(BlockIdx(start), count, buffer)),
            _ => DiskResult::NotReady,
        }
    }

    /// Write `count` sectors, starting at `start`.
    pub fn write_blocks(&mut self, start: u32, count: u16, buffer: &[u8]) -> DiskResult {
        match &mut self.slot {
            Slot::Ready(card) => result(card.write_blocks(BlockIdx(start), count, buffer)),
            _ => DiskResult::NotReady,
        }
    }

    /// Number of sectors, as read from the CSD when the card was initialised.
    pub fn sector_count(&self) -> u32 {
        self.sector_count
    }

    /// Always 512.
    pub fn sector_size(&self) -> u16 {
        Block::LEN as u16
    }

    /// Writes complete before they return, so there is nothing to do.
    pub fn sync(&mut self) -> DiskResult {
        DiskResult::Ok
    }

    /// Run a FatFs control code. The sector count is read from the card
    /// again.
    pub fn ioctl(&mut self, code: u8) -> Result<IoctlReply, DiskResult> {
        match code {
            CTRL_SYNC => Ok(IoctlReply::Synced),
            GET_SECTOR_COUNT => {
                let card = match &mut self.slot {
                    Slot::Ready(card) => card,
                    _ => return Err(DiskResult::NotReady),
                };
                let csd = card.read_csd().map_err(|e| {
                    warn!("Can't read CSD: {:?}", e);
                    DiskResult::Error
                })?;
                self.sector_count = csd.sector_count();
                Ok(IoctlReply::SectorCount(self.sector_count))
            }
            GET_SECTOR_SIZE => Ok(IoctlReply::SectorSize(self.sector_size())),
            _ => Err(DiskResult::ParameterError),
        }
    }
}

fn result(outcome: Result<(), Error>) -> DiskResult {
    match outcome {
        Ok(()) => DiskResult::Ok,
        Err(Error::BufferLength) => DiskResult::ParameterError,
        Err(e) => {
            warn!("Transfer failed: {:?}", e);
            DiskResult::Error
        }
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
