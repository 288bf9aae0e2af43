//! sdio-dma-sdmmc - Interrupt completion layer
//!
//! The SDIO and DMA interrupt handlers turn hardware events into the two
//! completion flags the foreground busy-waits on. Fatal events are returned
//! as [`FatalError`] so the vector can [`halt`].

use core::sync::atomic::{AtomicBool, Ordering};

use crate::sdio::regs::{DmaEvents, DmaStreamStatus, SdioInterruptStatus, Status};

#[cfg(feature = "log")]
use log::{error, warn};

#[cfg(feature = "defmt-log")]
use defmt::{error, warn};

/// Problems nobody can recover from.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FatalError {
    /// The card never answered a command we sent
    CommandTimeout,
    /// The DMA engine failed mid-transfer, the buffer can't be trusted
    DmaTransfer,
}

/// What the SDIO handler did.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SdioEvent {
    /// Response received, command flag cleared
    CommandDone,
    /// Data counter reached zero, data flag cleared
    DataDone,
    /// Data phase timed out, latched for the foreground
    DataTimeout,
    /// Nothing we handle was pending
    None,
}

/// What a DMA stream handler did.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DmaEvent {
    /// Transfer complete
    Complete,
    /// Half transfer
    HalfComplete,
    /// FIFO error, cleared together with transfer complete
    FifoError,
    /// Nothing we handle was pending
    None,
}

/// The flags shared between the interrupt handlers and the driver.
///
/// A flag is armed (set) by the foreground before it starts an operation and
/// cleared by the interrupt handler once the operation completes. Use
/// [`CompletionFlags::split`] to get the only producer and the only consumer.
#[derive(Debug)]
pub struct CompletionFlags {
    command_pending: AtomicBool,
    data_pending: AtomicBool,
    data_timeout: AtomicBool,
    split: AtomicBool,
}

impl CompletionFlags {
    /// Create the flags, with nothing pending.
    pub const fn new() -> CompletionFlags {
        CompletionFlags {
            command_pending: AtomicBool::new(false),
            data_pending: AtomicBool::new(false),
            data_timeout: AtomicBool::new(false),
            split: AtomicBool::new(false),
        }
    }

    /// Hand out the interrupt-side and foreground-side handles. Only the
    /// first call succeeds.
    pub fn split(&self) -> Option<(Signaller<'_>, Waiter<'_>)> {
        if self.split.swap(true, Ordering::AcqRel) {
            return None;
        }
        Some((Signaller { flags: self }, Waiter { flags: self }))
    }
}

impl Default for CompletionFlags {
    fn default() -> Self {
        CompletionFlags::new()
    }
}

/// Producer handle, owned by interrupt context.
#[derive(Debug)]
pub struct Signaller<'f> {
    flags: &'f CompletionFlags,
}

impl<'f> Signaller<'f> {
    /// A command response came in.
    pub fn command_done(&self) {
        self.flags.command_pending.store(false, Ordering::Release);
    }

    /// The data phase finished.
    pub fn data_done(&self) {
        self.flags.data_pending.store(false, Ordering::Release);
    }

    /// The data phase timed out.
    pub fn data_timed_out(&self) {
        self.flags.data_timeout.store(true, Ordering::Release);
    }
}

/// Consumer handle, owned by the driver.
#[derive(Debug)]
pub struct Waiter<'f> {
    flags: &'f CompletionFlags,
}

impl<'f> Waiter<'f> {
    /// Mark a command as in flight. Call before sending it.
    pub fn arm_command(&self) {
        self.flags.command_pending.store(true, Ordering::Release);
    }

    /// Still waiting for the command response?
    pub fn command_pending(&self) -> bool {
        self.flags.command_pending.load(Ordering::Acquire)
    }

    /// Mark a data phase as in flight and forget any old timeout. Call
    /// before the data path is enabled.
    pub fn arm_data(&self) {
        self.flags.data_timeout.store(false, Ordering::Release);
        self.flags.data_pending.store(true, Ordering::Release);
    }

    /// Still waiting for the data phase?
    pub fn data_pending(&self) -> bool {
        self.flags.data_pending.load(Ordering::Acquire)
    }

    /// Did the data phase time out since it was armed?
    pub fn data_timed_out(&self) -> bool {
        self.flags.data_timeout.load(Ordering::Acquire)
    }
}

/// SDIO global interrupt. Handles one event per call, the vector fires again
/// while more are pending.
pub fn on_sdio<R>(regs: &mut R, signaller: &Signaller<'_>) -> Result<SdioEvent, FatalError>
where
    R: SdioInterruptStatus + ?Sized,
{
    let status = regs.status();
    if status.contains(Status::CTIMEOUT) {
        regs.clear_status(Status::CTIMEOUT);
        error!("Command timeout");
        Err(FatalError::CommandTimeout)
    } else if status.contains(Status::DTIMEOUT) {
        regs.clear_status(Status::DTIMEOUT);
        warn!("Data timeout");
        signaller.data_timed_out();
        Ok(SdioEvent::DataTimeout)
    } else if status.contains(Status::CMDREND) {
        regs.clear_status(Status::CMDREND);
        signaller.command_done();
        Ok(SdioEvent::CommandDone)
    } else if status.contains(Status::DATAEND) {
        regs.clear_status(Status::DATAEND);
        signaller.data_done();
        Ok(SdioEvent::DataDone)
    } else {
        Ok(SdioEvent::None)
    }
}

/// DMA stream interrupt, for either direction.
///
/// Completion is observed through the SDIO data flag, so a complete transfer
/// only needs acknowledging here.
pub fn on_dma_stream<S>(stream: &mut S) -> Result<DmaEvent, FatalError>
where
    S: DmaStreamStatus + ?Sized,
{
    let events = stream.events();
    if events.contains(DmaEvents::TRANSFER_COMPLETE) {
        stream.clear_events(DmaEvents::TRANSFER_COMPLETE);
        Ok(DmaEvent::Complete)
    } else if events.contains(DmaEvents::HALF_TRANSFER) {
        stream.clear_events(DmaEvents::HALF_TRANSFER);
        Ok(DmaEvent::HalfComplete)
    } else if events.contains(DmaEvents::FIFO_ERROR) {
        stream.clear_events(DmaEvents::FIFO_ERROR | DmaEvents::TRANSFER_COMPLETE);
        warn!("DMA FIFO error");
        Ok(DmaEvent::FifoError)
    } else if events.contains(DmaEvents::TRANSFER_ERROR) {
        error!("DMA transfer error!");
        Err(FatalError::DmaTransfer)
    } else {
        Ok(DmaEvent::None)
    }
}

/// Report a fatal error and stop here for good.
pub fn halt(error: FatalError) -> ! {
    error!("Fatal SD card error: {:?}", error);
    loop {
        core::hint::spin_loop();
    }
}
