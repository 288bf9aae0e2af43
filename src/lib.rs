//! # sdio-dma-sdmmc
//!
//! > An SD card driver for the SDIO host controller, written in Embedded Rust
//!
//! This crate drives a single SD memory card over a dedicated SDIO bus (one
//! command line, one or four data lines) with the help of two DMA streams. It
//! is `#![no_std]`, does not use `alloc` and exposes plain 512-byte block
//! reads and writes, either through the [`BlockDevice`] trait or through the
//! FatFs-shaped [`Disk`] adapter.
//!
//! The driver never touches the hardware directly. It talks to the host
//! controller through [`SdioRegisters`], to the DMA engine through
//! [`DmaStream`] and waits for the interrupt handlers in [`irq`] to clear the
//! completion flags. The [`stm32f4`] module provides register-level
//! implementations for the STM32F405 SDIO peripheral and DMA2.
//!
//! ## Using the crate
//!
//! ```rust,ignore
//! static FLAGS: CompletionFlags = CompletionFlags::new();
//!
//! let (signaller, waiter) = FLAGS.split().unwrap();
//! // Hand `signaller` over to the SDIO interrupt vector, which calls
//! // `irq::on_sdio(&mut sdio_regs, &signaller).unwrap_or_else(|e| irq::halt(e))`.
//!
//! let card = SdioCard::new(sdio, dma_tx, dma_rx, delay, waiter);
//! match card.acquire(&mut BootImage::default()) {
//!     Ok(mut card) => {
//!         let mut block = [0u8; 512];
//!         card.read_blocks(BlockIdx(0), 1, &mut block).unwrap();
//!     }
//!     Err((e, _card)) => writeln!(uart, "{:?}!", e).unwrap(),
//! };
//! ```
//!
//! ## Features
//!
//! * `defmt-log`: By turning off the default features and enabling the `defmt-log` feature you can
//! configure this crate to log messages over defmt instead.
//! * `stm32f4` (default): Enables the [`stm32f4`] module, register-level implementations of
//! the host controller and DMA traits for the STM32F405.
//! * `cortex-m`: Enables [`restart::BootImage`], which jumps into a secondary
//! program image when card enumeration fails for good.
//!
//! Make sure that either the `log` feature or the `defmt-log` feature is enabled.

#![cfg_attr(not(test), no_std)]
// #![deny(missing_docs)]

// ****************************************************************************
//
// Imports
//
// ****************************************************************************


#[macro_use]
mod structure;

pub mod block_device;
pub mod disk;
pub mod irq;
pub mod proto;
pub mod restart;
pub mod sdio;
#[cfg(feature = "stm32f4")]
pub mod stm32f4;

pub use crate::block_device::{Block, BlockCount, BlockDevice, BlockIdx};
pub use crate::disk::{Disk, DiskResult, DiskStatus};
pub use crate::irq::{CompletionFlags, FatalError, Signaller, Waiter};
pub use crate::restart::Restart;
pub use crate::sdio::regs::{DmaStream, SdioRegisters};
pub use crate::sdio::Error as SdioError;
pub use crate::sdio::{AcquireOpts, SdioCard};

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
