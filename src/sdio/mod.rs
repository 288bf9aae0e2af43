//! sdio-dma-sdmmc - SD card session
//!
//! Implements the SD memory card protocol on an SDIO host controller, with
//! the data phase handled by DMA.
//!
//! This is currently optimised for readability and debugability, not
//! performance.

pub mod regs;
mod transfer;
pub mod transport;

use core::convert::TryFrom;

use embedded_hal::blocking::delay::{DelayMs, DelayUs};

use crate::irq::Waiter;
use crate::proto::*;
use crate::restart::Restart;
use crate::{Block, BlockCount, BlockDevice, BlockIdx};
use regs::{clkcr, Direction, DmaStream, SdioRegisters, Status};
use transport::{send_to_selected, send_to_unselected};

#[cfg(feature = "log")]
use log::{debug, error, trace};

#[cfg(feature = "defmt-log")]
use defmt::{debug, error, trace};

const DEFAULT_DELAY_COUNT: u32 = 100_000;

/// Represents an SD card on an SDIO host controller, plus the two DMA
/// streams that move its data and the completion flags the interrupt
/// handlers clear.
pub struct SdioCard<'f, HOST, DMA, DELAY, State>
where
    HOST: SdioRegisters,
    DMA: DmaStream,
    DELAY: DelayMs<u32> + DelayUs<u32>,
{
    host: HOST,
    dma_tx: DMA,
    dma_rx: DMA,
    delay: DELAY,
    flags: Waiter<'f>,
    options: AcquireOpts,
    session: Session,
    state: State,
}

/// The possible errors `SdioCard` can generate.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Error {
    /// We didn't get a response when executing this command
    TimeoutCommand(u8),
    /// The data phase didn't finish, or the host flagged a data timeout
    TimeoutData,
    /// The card didn't get into this state in time
    TimeoutWaitState(CardState),
    /// Nothing answered the voltage check
    CardNotFound,
    /// The card answered the voltage check without echoing our pattern
    VoltageCheck(u32),
    /// The card never finished its power-up routine
    CardNotReady,
    /// The buffer isn't exactly `count` blocks long, or `count` is zero
    BufferLength,
    /// Can't perform this operation with the card in this state
    BadState,
}

/// The state of an SdioCard if it is not initialized
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub struct NotInit;

/// The state of an SdioCard if it is initialized
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub struct Initialized;

/// Data bus widths.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BusWidth {
    /// DAT0 only
    One,
    /// DAT0 to DAT3
    Four,
}

impl BusWidth {
    fn argument(self) -> u16 {
        match self {
            BusWidth::One => 0,
            BusWidth::Four => BUS_WIDTH_4_ARG,
        }
    }

    fn widbus(self) -> u32 {
        match self {
            BusWidth::One => 0b00,
            BusWidth::Four => 0b01,
        }
    }
}

/// What we know about the card on the bus.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Session {
    /// Valid once the card has published one
    pub rca: Option<Rca>,
    /// Where we believe the card's state machine is
    pub state: CardState,
    /// Negotiated data bus width
    pub bus_width: BusWidth,
    /// Current host clock divider
    pub clock_divider: u8,
    /// The raw card identification, as returned by ALL_SEND_CID
    pub cid: [u32; 4],
}

impl Session {
    fn new(clock_divider: u8) -> Session {
        Session {
            rca: None,
            state: CardState::Idle,
            bus_width: BusWidth::One,
            clock_divider,
            cid: [0; 4],
        }
    }
}

/// Counts down the polls we are willing to make while we wait for the card
/// (or the interrupt handler) to sort itself out.
struct Delay {
    remaining: u32,
    interval_us: u32,
}

impl Delay {
    fn new(options: &AcquireOpts) -> Delay {
        Delay {
            remaining: options.poll_limit,
            interval_us: options.poll_interval_us,
        }
    }

    fn delay<D>(&mut self, delay: &mut D, err: Error) -> Result<(), Error>
    where
        D: DelayUs<u32>,
    {
        if self.remaining == 0 {
            Err(err)
        } else {
            delay.delay_us(self.interval_us);
            self.remaining -= 1;
            Ok(())
        }
    }
}

/// Options for acquiring the card.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone)]
pub struct AcquireOpts {
    /// How many times we offer our operating conditions before giving up
    /// and restarting.
    pub op_cond_attempts: u8,
    /// Pause between two offers.
    pub op_cond_interval_ms: u32,
    /// How many times we poll a flag or the card status before timing out.
    pub poll_limit: u32,
    /// Pause between two polls.
    pub poll_interval_us: u32,
    /// Settle time after power-up, before the first command.
    pub power_up_delay_ms: u32,
    /// Settle time after reset and after the RCA comes back.
    pub settle_delay_ms: u32,
    /// Clock divider for identification mode (must give <= 400 kHz).
    pub identification_clock_divider: u8,
    /// Clock divider once the card has an RCA.
    pub transfer_clock_divider: u8,
    /// Data path timeout, in bus clock ticks.
    pub data_timeout: u32,
    /// Bus width to negotiate.
    pub bus_width: BusWidth,
}

impl Default for AcquireOpts {
    fn default() -> Self {
        AcquireOpts {
            op_cond_attempts: 10,
            op_cond_interval_ms: 1,
            poll_limit: DEFAULT_DELAY_COUNT,
            poll_interval_us: 10,
            power_up_delay_ms: 250,
            settle_delay_ms: 1,
            // 16 MHz / (80 + 2) is just under 200 kHz.
            identification_clock_divider: 80,
            // 16 MHz / (2 + 2)
            transfer_clock_divider: 2,
            data_timeout: 0xFFFF,
            bus_width: BusWidth::Four,
        }
    }
}

impl<'f, HOST, DMA, DELAY> SdioCard<'f, HOST, DMA, DELAY, NotInit>
where
    HOST: SdioRegisters,
    DMA: DmaStream,
    DELAY: DelayMs<u32> + DelayUs<u32>,
{
    /// Create a new SD card driver. The bus pins and the host's kernel clock
    /// must already be set up.
    pub fn new(host: HOST, dma_tx: DMA, dma_rx: DMA, delay: DELAY, flags: Waiter<'f>) -> Self {
        let options = AcquireOpts::default();
        SdioCard {
            host,
            dma_tx,
            dma_rx,
            delay,
            flags,
            session: Session::new(options.identification_clock_divider),
            options,
            state: NotInit {},
        }
    }

    /// Initializes the card into a known state
    pub fn acquire<R>(
        self,
        restart: &mut R,
    ) -> Result<SdioCard<'f, HOST, DMA, DELAY, Initialized>, (Error, Self)>
    where
        R: Restart + ?Sized,
    {
        self.acquire_with_opts(Default::default(), restart)
    }

    /// Initializes the card into a known state
    ///
    /// Runs the identification sequence at the slow clock, then switches to
    /// the transfer clock and the configured bus width. The card is left
    /// deselected, in standby.
    ///
    /// If the card never leaves the idle state, `restart` is asked to restart
    /// the device. Should it return, this fails with
    /// [`Error::CardNotReady`].
    pub fn acquire_with_opts<R>(
        mut self,
        options: AcquireOpts,
        restart: &mut R,
    ) -> Result<SdioCard<'f, HOST, DMA, DELAY, Initialized>, (Error, Self)>
    where
        R: Restart + ?Sized,
    {
        debug!("acquiring card with opts: {:?}", options);
        self.options = options;
        match self.bring_up(restart) {
            Ok(()) => Ok(self.into_state(Initialized {})),
            Err(e) => Err((e, self)),
        }
    }

    fn bring_up<R>(&mut self, restart: &mut R) -> Result<(), Error>
    where
        R: Restart + ?Sized,
    {
        self.power_up();
        self.enumerate(restart)?;
        self.set_clock_divider(self.options.transfer_clock_divider);
        self.select_card()?;
        self.set_bus_width(self.options.bus_width)?;
        self.deselect_card()?;
        debug!("Card ready: {:?}", self.session);
        Ok(())
    }

    /// Get back the peripherals.
    pub fn free(self) -> (HOST, DMA, DMA, DELAY, Waiter<'f>) {
        (self.host, self.dma_tx, self.dma_rx, self.delay, self.flags)
    }
}

impl<'f, HOST, DMA, DELAY, State> SdioCard<'f, HOST, DMA, DELAY, State>
where
    HOST: SdioRegisters,
    DMA: DmaStream,
    DELAY: DelayMs<u32> + DelayUs<u32>,
{
    /// What we know about the card.
    pub fn session(&self) -> &Session {
        &self.session
    }

    fn into_state<S>(self, state: S) -> SdioCard<'f, HOST, DMA, DELAY, S> {
        SdioCard {
            host: self.host,
            dma_tx: self.dma_tx,
            dma_rx: self.dma_rx,
            delay: self.delay,
            flags: self.flags,
            options: self.options,
            session: self.session,
            state,
        }
    }

    /// Card power and clock on, 1-wide bus at the identification clock, and
    /// the interrupts the completion flags depend on.
    fn power_up(&mut self) {
        trace!("Power up..");
        self.host.set_power(true);
        self.delay.delay_ms(self.options.settle_delay_ms);

        let mut value = self.host.clock_control();
        value &= !(clkcr::WIDBUS_MASK | clkcr::CLKDIV_MASK);
        value |= u32::from(self.options.identification_clock_divider);
        value |= clkcr::CLKEN;
        self.host.set_clock_control(value);

        self.host.set_interrupt_mask(
            Status::CMDREND | Status::DATAEND | Status::CTIMEOUT | Status::DTIMEOUT,
        );
        self.dma_tx.configure(Direction::HostToCard);
        self.dma_rx.configure(Direction::CardToHost);

        self.session = Session::new(self.options.identification_clock_divider);
    }

    /// Idle -> Ready -> Identification -> Standby.
    fn enumerate<R>(&mut self, restart: &mut R) -> Result<(), Error>
    where
        R: Restart + ?Sized,
    {
        trace!("Reset card..");
        self.delay.delay_ms(self.options.power_up_delay_ms);
        self.command(Command::GoIdleState, 0, 0)?;
        self.session.rca = None;
        self.session.state = CardState::Idle;
        self.delay.delay_ms(self.options.settle_delay_ms);

        trace!("Check voltage..");
        let echo = match self.command(Command::SendIfCond, 0, IF_COND_ARG) {
            Err(Error::TimeoutCommand(_)) => return Err(Error::CardNotFound),
            other => other?,
        };
        if echo & IF_COND_ECHO_MASK != u32::from(IF_COND_ARG) {
            return Err(Error::VoltageCheck(echo));
        }

        let mut attempts = 0;
        loop {
            if attempts >= self.options.op_cond_attempts {
                error!("Card still busy after {} attempts, restarting..", attempts);
                restart.restart();
                return Err(Error::CardNotReady);
            }
            attempts += 1;
            trace!("Offer operating conditions, attempt: {}..", attempts);
            self.command(Command::AppCmd, 0, 0)?;
            let ocr = self.command(
                Command::SdSendOpCond,
                (OP_COND_ARG >> 16) as u16,
                OP_COND_ARG as u16,
            )?;
            if ocr & OCR_READY != 0 {
                break;
            }
            self.delay.delay_ms(self.options.op_cond_interval_ms);
        }
        self.session.state = CardState::Ready;

        self.command(Command::AllSendCid, 0, 0)?;
        self.session.cid = self.long_response();
        self.session.state = CardState::Identification;

        self.command(Command::SendRelativeAddr, 0, 0)?;
        self.delay.delay_ms(self.options.settle_delay_ms);
        let rca = Rca::from_r6(self.host.response(0));
        debug!("Card published RCA {:#x}", rca.0);
        self.session.rca = Some(rca);
        self.session.state = CardState::Standby;
        Ok(())
    }

    fn set_clock_divider(&mut self, divider: u8) {
        let value = (self.host.clock_control() & !clkcr::CLKDIV_MASK) | u32::from(divider);
        self.host.set_clock_control(value);
        self.session.clock_divider = divider;
    }

    /// Tell the card, then the host, about the new bus width.
    fn set_bus_width(&mut self, width: BusWidth) -> Result<(), Error> {
        if self.session.state != CardState::Transfer {
            return Err(Error::BadState);
        }
        let rca = self.rca()?;
        self.command(Command::AppCmd, rca.0, 0)?;
        self.command(Command::SetBusWidth, 0, width.argument())?;

        let value = (self.host.clock_control() & !clkcr::WIDBUS_MASK)
            | (width.widbus() << clkcr::WIDBUS_SHIFT);
        self.host.set_clock_control(value);
        self.session.bus_width = width;
        Ok(())
    }

    /// An addressed CMD7 to a card already in "tran" gets no response, so a
    /// selected card is left alone.
    fn select_card(&mut self) -> Result<(), Error> {
        match self.session.state {
            CardState::Transfer => return Ok(()),
            CardState::Standby => {}
            _ => return Err(Error::BadState),
        }
        let rca = self.rca()?;
        self.command(Command::SelectCard, rca.0, 0)?;
        self.session.state = CardState::Transfer;
        Ok(())
    }

    fn deselect_card(&mut self) -> Result<(), Error> {
        self.command(Command::DeselectCard, 0, 0)?;
        self.session.state = CardState::Standby;
        Ok(())
    }

    fn rca(&self) -> Result<Rca, Error> {
        self.session.rca.ok_or(Error::BadState)
    }

    fn long_response(&self) -> [u32; 4] {
        [
            self.host.response(0),
            self.host.response(1),
            self.host.response(2),
            self.host.response(3),
        ]
    }

    /// Send a command to a card that isn't selected, wait for it to
    /// complete and return the first response word.
    fn command(&mut self, command: Command, rca: u16, argument: u16) -> Result<u32, Error> {
        self.arm(command);
        send_to_unselected(&mut self.host, command, rca, argument);
        self.finish(command)
    }

    /// Send a command with a 32-bit argument to the selected card.
    fn selected_command(&mut self, command: Command, argument: u32) -> Result<u32, Error> {
        self.arm(command);
        send_to_selected(&mut self.host, command, argument);
        self.finish(command)
    }

    fn arm(&self, command: Command) {
        if command.response().has_crc() {
            self.flags.arm_command();
        }
    }

    fn finish(&mut self, command: Command) -> Result<u32, Error> {
        match command.response() {
            Response::None => self.wait_status(Status::CMDSENT, command)?,
            Response::R3 => self.wait_status(Status::CCRCFAIL, command)?,
            _ => self.wait_command(command)?,
        }
        Ok(self.host.response(0))
    }

    /// Wait for the interrupt handler to see the response.
    fn wait_command(&mut self, command: Command) -> Result<(), Error> {
        let mut delay = Delay::new(&self.options);
        while self.flags.command_pending() {
            delay.delay(&mut self.delay, Error::TimeoutCommand(command.index()))?;
        }
        Ok(())
    }

    /// Poll a status flag that doesn't raise an interrupt, then clear it.
    fn wait_status(&mut self, flag: Status, command: Command) -> Result<(), Error> {
        let mut delay = Delay::new(&self.options);
        while !self.host.status().contains(flag) {
            delay.delay(&mut self.delay, Error::TimeoutCommand(command.index()))?;
        }
        self.host.clear_status(flag);
        Ok(())
    }

    fn card_status(&mut self) -> Result<CardStatus, Error> {
        let rca = self.rca()?;
        self.command(Command::SendStatus, rca.0, 0).map(CardStatus)
    }

    /// Poll the card status until the card reports `wanted`.
    fn wait_for_state(&mut self, wanted: CardState) -> Result<(), Error> {
        let mut delay = Delay::new(&self.options);
        loop {
            let state = self.card_status()?.state();
            if state == wanted {
                self.session.state = state;
                return Ok(());
            }
            delay.delay(&mut self.delay, Error::TimeoutWaitState(wanted))?;
        }
    }
}

impl<'f, HOST, DMA, DELAY> SdioCard<'f, HOST, DMA, DELAY, Initialized>
where
    HOST: SdioRegisters,
    DMA: DmaStream,
    DELAY: DelayMs<u32> + DelayUs<u32>,
{
    /// Mark the card as unused.
    /// This should be kept infallible, because Drop is unable to fail.
    /// See https://github.com/rust-lang/rfcs/issues/814
    // Writes complete before they return, so there is nothing to flush.
    pub fn deinit(self) -> SdioCard<'f, HOST, DMA, DELAY, NotInit> {
        self.into_state(NotInit {})
    }

    /// Select the card (standby -> transfer). Transfers leave a card
    /// selected this way selected. Does nothing if the card is already
    /// selected.
    pub fn select(&mut self) -> Result<(), Error> {
        self.select_card()
    }

    /// Deselect the card (transfer -> standby).
    pub fn deselect(&mut self) -> Result<(), Error> {
        self.deselect_card()
    }

    /// Ask the card for its status.
    pub fn status(&mut self) -> Result<CardStatus, Error> {
        self.card_status()
    }

    /// Run `f` with the card selected.
    ///
    /// If the card wasn't selected already, it is deselected again, even if an
    /// error occured in `f`
    fn with_selected<F, R>(&mut self, f: F) -> Result<R, Error>
    where
        F: FnOnce(&mut Self) -> Result<R, Error>,
    {
        if self.session.state == CardState::Transfer {
            return f(self);
        }
        self.select_card()?;
        let result = f(self);
        let deselected = self.deselect_card();
        let value = result?;
        deselected?;
        Ok(value)
    }

    /// Read the 'card specific data' block. The card must not be selected.
    pub fn read_csd(&mut self) -> Result<Csd, Error> {
        if self.session.state != CardState::Standby {
            return Err(Error::BadState);
        }
        let rca = self.rca()?;
        self.command(Command::SendCsd, rca.0, 0)?;
        Ok(Csd::from_response(self.long_response()))
    }

    /// Return the usable size of this SD card in bytes.
    pub fn card_size_bytes(&mut self) -> Result<u64, Error> {
        self.read_csd().map(|csd| csd.card_capacity_bytes())
    }
}

impl<'f, HOST, DMA, DELAY> BlockDevice for SdioCard<'f, HOST, DMA, DELAY, Initialized>
where
    HOST: SdioRegisters,
    DMA: DmaStream,
    DELAY: DelayMs<u32> + DelayUs<u32>,
{
    type Error = Error;

    /// Read one or more blocks, starting at the given block index.
    fn read(
        &mut self,
        blocks: &mut [Block],
        start_block_idx: BlockIdx,
        _reason: &str,
    ) -> Result<(), Self::Error> {
        if blocks.is_empty() {
            return Ok(());
        }
        let count = u16::try_from(blocks.len()).map_err(|_| Error::BufferLength)?;
        self.read_blocks(start_block_idx, count, Block::slice_as_bytes_mut(blocks))
    }

    /// Write one or more blocks, starting at the given block index.
    fn write(&mut self, blocks: &[Block], start_block_idx: BlockIdx) -> Result<(), Self::Error> {
        if blocks.is_empty() {
            return Ok(());
        }
        let count = u16::try_from(blocks.len()).map_err(|_| Error::BufferLength)?;
        self.write_blocks(start_block_idx, count, Block::slice_as_bytes(blocks))
    }

    /// Determine how many blocks this device can hold.
    fn num_blocks(&mut self) -> Result<BlockCount, Self::Error> {
        let csd = self.read_csd()?;
        Ok(BlockCount(csd.card_capacity_blocks()))
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
