//! sdio-dma-sdmmc - Command transport
//!
//! Frames one command into the host's command path. Nothing here waits:
//! the caller arms the matching completion before sending and waits
//! afterwards.

use super::regs::{cmd, SdioRegisters};
use crate::proto::Command;

#[cfg(feature = "log")]
use log::trace;

#[cfg(feature = "defmt-log")]
use defmt::trace;

/// Send a command to a card that isn't selected yet. The argument is the
/// RCA (or zero) in the upper half and a 16-bit argument in the lower half.
pub fn send_to_unselected<H>(host: &mut H, command: Command, rca: u16, argument: u16)
where
    H: SdioRegisters + ?Sized,
{
    issue(host, command, (u32::from(rca) << 16) | u32::from(argument));
}

/// Send a command with a full 32-bit argument, such as a block address or
/// count, to the selected card.
pub fn send_to_selected<H>(host: &mut H, command: Command, argument: u32)
where
    H: SdioRegisters + ?Sized,
{
    issue(host, command, argument);
}

fn issue<H>(host: &mut H, command: Command, argument: u32)
where
    H: SdioRegisters + ?Sized,
{
    trace!("CMD{} arg {:#x}", command.index(), argument);

    // A running command path sends as soon as the register is written, so
    // stop it before touching anything.
    let mut value = host.command() & !cmd::CPSMEN;
    host.set_command(value);
    value &= !cmd::CMDINDEX_MASK;
    value &= !cmd::WAITRESP_MASK;
    value |= command.wait().bits() << cmd::WAITRESP_SHIFT;
    host.set_command(value);

    host.set_argument(argument);

    value |= u32::from(command.index());
    host.set_command(value);
    host.set_command(value | cmd::CPSMEN);
}
