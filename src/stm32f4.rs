//! sdio-dma-sdmmc - STM32F405 register access
//!
//! Memory-mapped implementations of the host controller and DMA traits for
//! the SDIO peripheral and DMA2 (stream 3 for TX and stream 6 for RX, both
//! on channel 4). The register maps are declared with `tock-registers`.
//!
//! The bus pins and the peripheral clocks (RCC) must be set up before any of
//! this is used.

use tock_registers::interfaces::{ReadWriteable, Readable, Writeable};
use tock_registers::registers::{ReadOnly, ReadWrite, WriteOnly};
use tock_registers::{register_bitfields, register_structs};

use crate::sdio::regs::{
    Direction, DmaEvents, DmaStream, DmaStreamStatus, SdioInterruptStatus, SdioRegisters, Status,
};

/// SDIO peripheral base address.
pub const SDIO_BASE: usize = 0x4001_2C00;
/// DMA2 controller base address.
pub const DMA2_BASE: usize = 0x4002_6400;
/// DMA2 stream wired to the SDIO FIFO for writes.
pub const SDIO_TX_STREAM: u8 = 3;
/// DMA2 stream wired to the SDIO FIFO for reads.
pub const SDIO_RX_STREAM: u8 = 6;

/// DMA2 request channel of the SDIO peripheral.
const SDIO_CHANNEL: u32 = 4;

/// The six flag bits of one stream, before shifting into LISR/HISR.
const EVENT_MASK: u32 = 0x3D;

register_bitfields! [
    u32,
    /// SDIO power control
    POWER [
        PWRCTRL OFFSET(0) NUMBITS(2) [
            Off = 0b00,
            On = 0b11
        ]
    ],

    /// DMA stream configuration
    CR [
        EN OFFSET(0) NUMBITS(1) [],
        TEIE OFFSET(2) NUMBITS(1) [],
        HTIE OFFSET(3) NUMBITS(1) [],
        TCIE OFFSET(4) NUMBITS(1) [],
        /// The peripheral decides when the transfer ends
        PFCTRL OFFSET(5) NUMBITS(1) [],
        DIR OFFSET(6) NUMBITS(2) [
            PeripheralToMemory = 0b00,
            MemoryToPeripheral = 0b01
        ],
        CIRC OFFSET(8) NUMBITS(1) [],
        PINC OFFSET(9) NUMBITS(1) [],
        MINC OFFSET(10) NUMBITS(1) [],
        PSIZE OFFSET(11) NUMBITS(2) [
            Byte = 0b00,
            HalfWord = 0b01,
            Word = 0b10
        ],
        MSIZE OFFSET(13) NUMBITS(2) [
            Byte = 0b00,
            HalfWord = 0b01,
            Word = 0b10
        ],
        PBURST OFFSET(21) NUMBITS(2) [
            Single = 0b00,
            Incr4 = 0b01
        ],
        MBURST OFFSET(23) NUMBITS(2) [
            Single = 0b00,
            Incr4 = 0b01
        ],
        CHSEL OFFSET(25) NUMBITS(3) []
    ],

    /// DMA stream FIFO control
    FCR [
        FTH OFFSET(0) NUMBITS(2) [
            Quarter = 0b00,
            Half = 0b01,
            ThreeQuarters = 0b10,
            Full = 0b11
        ],
        /// Direct mode off, the FIFO is used
        DMDIS OFFSET(2) NUMBITS(1) [],
        FEIE OFFSET(7) NUMBITS(1) []
    ]
];

register_structs! {
    /// The SDIO peripheral.
    #[allow(dead_code)]
    SdioRegisterBlock {
        (0x00 => power: ReadWrite<u32, POWER::Register>),
        (0x04 => clkcr: ReadWrite<u32>),
        (0x08 => arg: ReadWrite<u32>),
        (0x0C => cmd: ReadWrite<u32>),
        (0x10 => respcmd: ReadOnly<u32>),
        (0x14 => resp: [ReadOnly<u32>; 4]),
        (0x24 => dtimer: ReadWrite<u32>),
        (0x28 => dlen: ReadWrite<u32>),
        (0x2C => dctrl: ReadWrite<u32>),
        (0x30 => dcount: ReadOnly<u32>),
        (0x34 => sta: ReadOnly<u32>),
        (0x38 => icr: WriteOnly<u32>),
        (0x3C => mask: ReadWrite<u32>),
        (0x40 => _reserved0),
        (0x48 => fifocnt: ReadOnly<u32>),
        (0x4C => _reserved1),
        (0x80 => fifo: [ReadWrite<u32>; 32]),
        (0x100 => @END),
    },

    /// One of the eight streams of a DMA controller.
    #[allow(dead_code)]
    DmaStreamRegisters {
        (0x00 => cr: ReadWrite<u32, CR::Register>),
        (0x04 => ndtr: ReadWrite<u32>),
        (0x08 => par: ReadWrite<u32>),
        (0x0C => m0ar: ReadWrite<u32>),
        (0x10 => m1ar: ReadWrite<u32>),
        (0x14 => fcr: ReadWrite<u32, FCR::Register>),
        (0x18 => @END),
    },

    /// A DMA controller. `isr` is LISR then HISR, `ifcr` is LIFCR then HIFCR.
    DmaRegisterBlock {
        (0x00 => isr: [ReadOnly<u32>; 2]),
        (0x08 => ifcr: [WriteOnly<u32>; 2]),
        (0x10 => streams: [DmaStreamRegisters; 8]),
        (0xD0 => @END),
    }
}

/// The SDIO host controller.
pub struct Stm32Sdio {
    registers: &'static SdioRegisterBlock,
}

impl Stm32Sdio {
    /// # Safety
    ///
    /// Only one instance may exist, plus the one handed to the interrupt
    /// handler, which must only touch the status registers.
    pub unsafe fn new() -> Stm32Sdio {
        Stm32Sdio {
            registers: &*(SDIO_BASE as *const SdioRegisterBlock),
        }
    }

    /// Address of the data FIFO, the peripheral end of both DMA streams.
    pub fn fifo_address(&self) -> usize {
        self.registers.fifo.as_ptr() as usize
    }
}

impl SdioInterruptStatus for Stm32Sdio {
    fn status(&self) -> Status {
        Status::from_bits_truncate(self.registers.sta.get())
    }

    fn clear_status(&mut self, flags: Status) {
        self.registers.icr.set(flags.bits());
    }
}

impl SdioRegisters for Stm32Sdio {
    fn set_power(&mut self, on: bool) {
        self.registers.power.write(if on {
            POWER::PWRCTRL::On
        } else {
            POWER::PWRCTRL::Off
        });
    }

    fn clock_control(&self) -> u32 {
        self.registers.clkcr.get()
    }

    fn set_clock_control(&mut self, value: u32) {
        self.registers.clkcr.set(value);
    }

    fn set_argument(&mut self, value: u32) {
        self.registers.arg.set(value);
    }

    fn command(&self) -> u32 {
        self.registers.cmd.get()
    }

    fn set_command(&mut self, value: u32) {
        self.registers.cmd.set(value);
    }

    fn response(&self, index: usize) -> u32 {
        self.registers.resp[index & 0b11].get()
    }

    fn set_data_timer(&mut self, ticks: u32) {
        self.registers.dtimer.set(ticks);
    }

    fn set_data_length(&mut self, bytes: u32) {
        self.registers.dlen.set(bytes);
    }

    fn data_control(&self) -> u32 {
        self.registers.dctrl.get()
    }

    fn set_data_control(&mut self, value: u32) {
        self.registers.dctrl.set(value);
    }

    fn set_interrupt_mask(&mut self, mask: Status) {
        self.registers.mask.set(mask.bits());
    }
}

/// Where a stream's six flag bits live: (LISR/HISR index, shift).
fn flag_position(stream: usize) -> (usize, u32) {
    const SHIFTS: [u32; 4] = [0, 6, 16, 22];
    (stream / 4, SHIFTS[stream % 4])
}

/// One DMA2 stream on the SDIO channel.
pub struct Stm32DmaStream {
    registers: &'static DmaRegisterBlock,
    stream: usize,
    fifo: u32,
}

impl Stm32DmaStream {
    /// # Safety
    ///
    /// Only one instance per stream may exist, plus the one handed to its
    /// interrupt handler, which must only touch the flags.
    pub unsafe fn new(stream: u8, sdio: &Stm32Sdio) -> Stm32DmaStream {
        Stm32DmaStream {
            registers: &*(DMA2_BASE as *const DmaRegisterBlock),
            stream: usize::from(stream & 0b111),
            fifo: sdio.fifo_address() as u32,
        }
    }

    /// The stream that feeds the card.
    ///
    /// # Safety
    ///
    /// See [`Stm32DmaStream::new`].
    pub unsafe fn tx(sdio: &Stm32Sdio) -> Stm32DmaStream {
        Stm32DmaStream::new(SDIO_TX_STREAM, sdio)
    }

    /// The stream that drains the card.
    ///
    /// # Safety
    ///
    /// See [`Stm32DmaStream::new`].
    pub unsafe fn rx(sdio: &Stm32Sdio) -> Stm32DmaStream {
        Stm32DmaStream::new(SDIO_RX_STREAM, sdio)
    }

    fn channel(&self) -> &'static DmaStreamRegisters {
        &self.registers.streams[self.stream]
    }
}

impl DmaStreamStatus for Stm32DmaStream {
    fn events(&self) -> DmaEvents {
        let (group, shift) = flag_position(self.stream);
        DmaEvents::from_bits_truncate((self.registers.isr[group].get() >> shift) & EVENT_MASK)
    }

    fn clear_events(&mut self, events: DmaEvents) {
        let (group, shift) = flag_position(self.stream);
        self.registers.ifcr[group].set((events.bits() & EVENT_MASK) << shift);
    }
}

impl DmaStream for Stm32DmaStream {
    fn configure(&mut self, direction: Direction) {
        self.stop();

        let direction = match direction {
            Direction::HostToCard => CR::DIR::MemoryToPeripheral,
            Direction::CardToHost => CR::DIR::PeripheralToMemory,
        };
        let channel = self.channel();
        // Not circular, no peripheral increment.
        channel.cr.write(
            CR::CHSEL.val(SDIO_CHANNEL)
                + CR::MBURST::Incr4
                + CR::PBURST::Incr4
                + CR::MSIZE::Byte
                + CR::PSIZE::Word
                + CR::MINC::SET
                + direction
                + CR::PFCTRL::SET
                + CR::TCIE::SET
                + CR::HTIE::SET
                + CR::TEIE::SET,
        );
        channel.par.set(self.fifo);
        channel.fcr.write(FCR::FEIE::SET + FCR::DMDIS::SET + FCR::FTH::Full);
        self.clear_events(DmaEvents::all());
    }

    unsafe fn start(&mut self, memory: *mut u8, _len: usize) {
        let channel = self.channel();
        // Flow control belongs to the peripheral, NDTR is not used.
        channel.m0ar.set(memory as usize as u32);
        self.clear_events(DmaEvents::all());
        channel.cr.modify(CR::EN::SET);
    }

    fn stop(&mut self) {
        self.channel().cr.modify(CR::EN::CLEAR);
    }
}


// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
