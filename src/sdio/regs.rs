//! sdio-dma-sdmmc - Host controller and DMA register interface
//!
//! The driver reaches the hardware only through the traits in this module.
//! The bit layouts follow the STM32F4 SDIO peripheral and its DMA2 streams.

use bitflags::bitflags;

bitflags! {
    /// The bits shared by the status (STA), interrupt clear (ICR) and
    /// interrupt mask (MASK) registers.
    pub struct Status: u32 {
        /// Command response received, CRC check failed. Also raised for R3,
        /// which carries no CRC.
        const CCRCFAIL = 1 << 0;
        /// Data block sent or received, CRC check failed
        const DCRCFAIL = 1 << 1;
        /// Command response timeout
        const CTIMEOUT = 1 << 2;
        /// Data timeout
        const DTIMEOUT = 1 << 3;
        /// Transmit FIFO underrun
        const TXUNDERR = 1 << 4;
        /// Receive FIFO overrun
        const RXOVERR = 1 << 5;
        /// Command response received, CRC check passed
        const CMDREND = 1 << 6;
        /// Command sent, no response required
        const CMDSENT = 1 << 7;
        /// Data counter reached zero
        const DATAEND = 1 << 8;
        /// Start bit not detected on a data line
        const STBITERR = 1 << 9;
        /// Data block sent or received, CRC check passed
        const DBCKEND = 1 << 10;
    }
}

bitflags! {
    /// Interrupt flags of one DMA stream, normalised to the bit positions of
    /// stream 0. Each stream owns a six-bit group in LISR/HISR.
    pub struct DmaEvents: u32 {
        /// FIFO error
        const FIFO_ERROR = 1 << 0;
        /// Direct mode error
        const DIRECT_MODE_ERROR = 1 << 2;
        /// Transfer error
        const TRANSFER_ERROR = 1 << 3;
        /// Half transfer
        const HALF_TRANSFER = 1 << 4;
        /// Transfer complete
        const TRANSFER_COMPLETE = 1 << 5;
    }
}

/// SDIO_CMD fields.
pub mod cmd {
    /// Command index
    pub const CMDINDEX_MASK: u32 = 0x3F;
    /// Wait for response bits
    pub const WAITRESP_SHIFT: u32 = 6;
    /// Wait for response bits
    pub const WAITRESP_MASK: u32 = 0b11 << WAITRESP_SHIFT;
    /// Command path state machine enable. Setting it sends the command.
    pub const CPSMEN: u32 = 1 << 10;
}

/// SDIO_CLKCR fields.
pub mod clkcr {
    /// Clock divide factor, SDIO_CK = SDIOCLK / (CLKDIV + 2)
    pub const CLKDIV_MASK: u32 = 0xFF;
    /// Clock enable
    pub const CLKEN: u32 = 1 << 8;
    /// Wide bus mode
    pub const WIDBUS_SHIFT: u32 = 11;
    /// Wide bus mode
    pub const WIDBUS_MASK: u32 = 0b11 << WIDBUS_SHIFT;
}

/// SDIO_DCTRL fields.
pub mod dctrl {
    /// Data transfer enabled, starts the data path state machine
    pub const DTEN: u32 = 1 << 0;
    /// Direction: set for card to host
    pub const DTDIR: u32 = 1 << 1;
    /// Stream mode. SD memory cards only do block mode.
    pub const DTMODE: u32 = 1 << 2;
    /// DMA requests enabled
    pub const DMAEN: u32 = 1 << 3;
    /// log2 of the block size
    pub const DBLOCKSIZE_SHIFT: u32 = 4;
    /// log2 of the block size
    pub const DBLOCKSIZE_MASK: u32 = 0xF << DBLOCKSIZE_SHIFT;
}

/// Which way data moves on the bus.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Direction {
    /// Writes: memory to card, through the TX stream
    HostToCard,
    /// Reads: card to memory, through the RX stream
    CardToHost,
}

/// The status half of the host controller. This is all the interrupt
/// handler needs.
pub trait SdioInterruptStatus {
    /// Read the static flags (SDIO_STA).
    fn status(&self) -> Status;
    /// Clear static flags (SDIO_ICR).
    fn clear_status(&mut self, flags: Status);
}

/// The SDIO host controller registers.
///
/// Implementations are expected to be thin: each method is one register
/// access. Writing a command value with [`cmd::CPSMEN`] set sends the
/// command.
pub trait SdioRegisters: SdioInterruptStatus {
    /// Switch the card supply and clock on or off (SDIO_POWER).
    fn set_power(&mut self, on: bool);
    /// SDIO_CLKCR
    fn clock_control(&self) -> u32;
    /// SDIO_CLKCR
    fn set_clock_control(&mut self, value: u32);
    /// SDIO_ARG
    fn set_argument(&mut self, value: u32);
    /// SDIO_CMD
    fn command(&self) -> u32;
    /// SDIO_CMD
    fn set_command(&mut self, value: u32);
    /// SDIO_RESP1 to SDIO_RESP4, by index 0 to 3.
    fn response(&self, index: usize) -> u32;
    /// SDIO_DTIMER, in bus clock ticks
    fn set_data_timer(&mut self, ticks: u32);
    /// SDIO_DLEN, in bytes
    fn set_data_length(&mut self, bytes: u32);
    /// SDIO_DCTRL
    fn data_control(&self) -> u32;
    /// SDIO_DCTRL
    fn set_data_control(&mut self, value: u32);
    /// SDIO_MASK
    fn set_interrupt_mask(&mut self, mask: Status);
}

/// The flag half of a DMA stream, used from its interrupt handler.
pub trait DmaStreamStatus {
    /// Pending interrupt flags of this stream.
    fn events(&self) -> DmaEvents;
    /// Clear interrupt flags of this stream.
    fn clear_events(&mut self, events: DmaEvents);
}

/// One DMA stream wired to the SDIO FIFO.
pub trait DmaStream {
    /// One-off setup for the given direction: peripheral flow control,
    /// FIFO mode and interrupts.
    fn configure(&mut self, direction: Direction);

    /// Point the stream at `memory` and enable it.
    ///
    /// The SDIO peripheral is the flow controller, so `len` is informative
    /// only.
    ///
    /// # Safety
    ///
    /// `memory` must stay valid for `len` bytes until [`DmaStream::stop`] is
    /// called. For a host to card stream the memory is only read.
    unsafe fn start(&mut self, memory: *mut u8, len: usize);

    /// Disable the stream.
    fn stop(&mut self);
}
