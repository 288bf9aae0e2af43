//! sdio-dma-sdmmc - Block transfers
//!
//! Moves whole blocks between memory and the selected card. The data path
//! and the DMA stream are armed before the command goes out, the card is
//! polled back into the transfer state afterwards.

use embedded_hal::blocking::delay::{DelayMs, DelayUs};

use super::regs::{dctrl, Direction, DmaStream, SdioRegisters};
use super::{Error, Initialized, SdioCard};
use crate::proto::*;
use crate::{Block, BlockIdx};

#[cfg(feature = "log")]
use log::{debug, warn};

#[cfg(feature = "defmt-log")]
use defmt::{debug, warn};

impl<'f, HOST, DMA, DELAY> SdioCard<'f, HOST, DMA, DELAY, Initialized>
where
    HOST: SdioRegisters,
    DMA: DmaStream,
    DELAY: DelayMs<u32> + DelayUs<u32>,
{
    /// Read `count` blocks, starting at `start`, into `buffer`.
    ///
    /// `buffer` must be exactly `count` blocks long. The card is selected for
    /// the duration of the transfer and left in standby, unless it was
    /// selected already.
    pub fn read_blocks(
        &mut self,
        start: BlockIdx,
        count: u16,
        buffer: &mut [u8],
    ) -> Result<(), Error> {
        check_length(count, buffer.len())?;
        debug!("Read {} blocks @ {}", count, start.0);
        let memory = buffer.as_mut_ptr();
        let length = u32::from(count) * Block::LEN_U32;
        self.with_selected(|s| unsafe {
            // SAFETY: `buffer` is `length` bytes and outlives the transfer.
            s.run_data_phase(Direction::CardToHost, length, BLOCK_SIZE_LOG2, memory, |s| {
                s.read_commands(start, count)
            })
        })
    }

    /// Write `count` blocks from `buffer`, starting at `start`.
    ///
    /// Returns once the card has finished programming.
    pub fn write_blocks(
        &mut self,
        start: BlockIdx,
        count: u16,
        buffer: &[u8],
    ) -> Result<(), Error> {
        check_length(count, buffer.len())?;
        debug!("Write {} blocks @ {}", count, start.0);
        // The TX stream only ever reads from memory.
        let memory = buffer.as_ptr() as *mut u8;
        let length = u32::from(count) * Block::LEN_U32;
        self.with_selected(|s| unsafe {
            // SAFETY: `buffer` is `length` bytes and outlives the transfer.
            s.run_data_phase(Direction::HostToCard, length, BLOCK_SIZE_LOG2, memory, |s| {
                s.write_commands(start, count)
            })
        })
    }

    /// Read the 512-bit SD status register (ACMD13).
    pub fn read_sd_status(&mut self, buffer: &mut [u8; SD_STATUS_LEN]) -> Result<(), Error> {
        let memory = buffer.as_mut_ptr();
        self.with_selected(|s| unsafe {
            // SAFETY: `buffer` is SD_STATUS_LEN bytes and outlives the transfer.
            s.run_data_phase(
                Direction::CardToHost,
                SD_STATUS_LEN as u32,
                SD_STATUS_SIZE_LOG2,
                memory,
                |s| {
                    let rca = s.rca()?;
                    s.command(Command::AppCmd, rca.0, 0)?;
                    // The card starts sending right after its response.
                    s.enable_data_path();
                    s.command(Command::SdStatus, 0, 0)?;
                    Ok(())
                },
            )
        })
    }

    /// Arm the data path, issue the commands, wait for the data and then for
    /// the card to get back to the transfer state. The stream is stopped on
    /// every path out.
    ///
    /// # Safety
    ///
    /// `memory` must be valid for `length` bytes until this returns.
    unsafe fn run_data_phase<F>(
        &mut self,
        direction: Direction,
        length: u32,
        block_size_log2: u8,
        memory: *mut u8,
        commands: F,
    ) -> Result<(), Error>
    where
        F: FnOnce(&mut Self) -> Result<(), Error>,
    {
        if self.session.state != CardState::Transfer {
            return Err(Error::BadState);
        }
        self.prepare_data_path(direction, length, block_size_log2, memory);
        let result = commands(self)
            .and_then(|_| self.wait_data())
            .and_then(|_| self.wait_for_state(CardState::Transfer));
        self.stream(direction).stop();
        result
    }

    unsafe fn prepare_data_path(
        &mut self,
        direction: Direction,
        length: u32,
        block_size_log2: u8,
        memory: *mut u8,
    ) {
        let mut value = self.host.data_control() & !dctrl::DTEN;
        self.host.set_data_control(value);
        self.host.set_data_timer(self.options.data_timeout);
        self.host.set_data_length(length);

        value &= !(dctrl::DTMODE | dctrl::DTDIR | dctrl::DBLOCKSIZE_MASK);
        if direction == Direction::CardToHost {
            value |= dctrl::DTDIR;
        }
        value |= dctrl::DMAEN;
        self.host.set_data_control(value);

        self.flags.arm_data();
        self.stream(direction).start(memory, length as usize);

        value |= u32::from(block_size_log2) << dctrl::DBLOCKSIZE_SHIFT;
        self.host.set_data_control(value);
    }

    fn enable_data_path(&mut self) {
        let value = self.host.data_control() | dctrl::DTEN;
        self.host.set_data_control(value);
    }

    fn read_commands(&mut self, start: BlockIdx, count: u16) -> Result<(), Error> {
        if count == 1 {
            self.selected_command(Command::ReadSingleBlock, start.0)?;
            self.enable_data_path();
        } else {
            self.selected_command(Command::SetBlockCount, u32::from(count))?;
            // The card starts sending as soon as it sees the read command.
            self.enable_data_path();
            self.selected_command(Command::ReadMultipleBlock, start.0)?;
        }
        Ok(())
    }

    fn write_commands(&mut self, start: BlockIdx, count: u16) -> Result<(), Error> {
        if count == 1 {
            self.selected_command(Command::WriteBlock, start.0)?;
        } else {
            self.selected_command(Command::SetBlockCount, u32::from(count))?;
            self.selected_command(Command::WriteMultipleBlock, start.0)?;
            self.wait_for_state(CardState::ReceivingData)?;
        }
        self.enable_data_path();
        Ok(())
    }

    /// Wait for the interrupt handler to see the end of the data phase.
    fn wait_data(&mut self) -> Result<(), Error> {
        let mut delay = super::Delay::new(&self.options);
        loop {
            if self.flags.data_timed_out() {
                warn!("Data phase timed out");
                return Err(Error::TimeoutData);
            }
            if !self.flags.data_pending() {
                return Ok(());
            }
            delay.delay(&mut self.delay, Error::TimeoutData)?;
        }
    }

    fn stream(&mut self, direction: Direction) -> &mut DMA {
        match direction {
            Direction::HostToCard => &mut self.dma_tx,
            Direction::CardToHost => &mut self.dma_rx,
        }
    }
}

fn check_length(count: u16, len: usize) -> Result<(), Error> {
    if count == 0 || len != usize::from(count) * Block::LEN {
        Err(Error::BufferLength)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_must_match_count() {
        assert_eq!(check_length(1, 512), Ok(()));
        assert_eq!(check_length(4, 2048), Ok(()));
        assert_eq!(check_length(0, 0), Err(Error::BufferLength));
        assert_eq!(check_length(2, 512), Err(Error::BufferLength));
        assert_eq!(check_length(1, 513), Err(Error::BufferLength));
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
