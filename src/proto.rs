//! sdio-dma-sdmmc - Constants and registers from the SD Specifications
//!
//! Everything in here is pure decoding. Nothing touches the host controller.

//==============================================================================

// Fixed arguments

/// SEND_IF_COND argument: 2.7-3.6V supply (VHS = 0b0001) and check pattern 0xAA.
pub const IF_COND_ARG: u16 = 0x1AA;

/// The part of the SEND_IF_COND response that echoes our argument.
pub const IF_COND_ECHO_MASK: u32 = 0xFFF;

/// SD_SEND_OP_COND argument: host capacity support (HCS) plus the 3.2-3.4V
/// window.
pub const OP_COND_ARG: u32 = 0x4010_0000;

/// OCR bit 31, set once the card has finished its power-up routine.
pub const OCR_READY: u32 = 1 << 31;

/// SET_BUS_WIDTH argument for a 4-wide bus.
pub const BUS_WIDTH_4_ARG: u16 = 0b10;

/// log2 of the block length. Everything we transfer is a 512 byte block.
pub const BLOCK_SIZE_LOG2: u8 = 9;

/// log2 of the SD status length (64 bytes).
pub const SD_STATUS_SIZE_LOG2: u8 = 6;

/// Length of the SD status register, in bytes.
pub const SD_STATUS_LEN: usize = 64;

//==============================================================================

/// The commands this driver knows how to send.
///
/// The `A` commands are application commands and must follow an
/// [`Command::AppCmd`].
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Command {
    /// CMD0 GO_IDLE_STATE - reset the card
    GoIdleState,
    /// CMD2 ALL_SEND_CID - ask for the card identification
    AllSendCid,
    /// CMD3 SEND_RELATIVE_ADDR - ask the card to publish an RCA
    SendRelativeAddr,
    /// ACMD6 SET_BUS_WIDTH
    SetBusWidth,
    /// CMD7 SELECT_CARD, addressed with the RCA
    SelectCard,
    /// CMD7 with RCA 0. Deselects every card and nobody answers.
    DeselectCard,
    /// CMD8 SEND_IF_COND - check the supply voltage
    SendIfCond,
    /// CMD9 SEND_CSD - read the Card Specific Data
    SendCsd,
    /// CMD10 SEND_CID - read the card identification
    SendCid,
    /// CMD13 SEND_STATUS - read the card status
    SendStatus,
    /// ACMD13 SD_STATUS - read the 512-bit SD status over the data lines
    SdStatus,
    /// CMD17 READ_SINGLE_BLOCK
    ReadSingleBlock,
    /// CMD18 READ_MULTIPLE_BLOCK
    ReadMultipleBlock,
    /// CMD23 SET_BLOCK_COUNT - pre-defined length for CMD18 and CMD25
    SetBlockCount,
    /// CMD24 WRITE_BLOCK
    WriteBlock,
    /// CMD25 WRITE_MULTIPLE_BLOCK
    WriteMultipleBlock,
    /// ACMD41 SD_SEND_OP_COND - start card initialisation
    SdSendOpCond,
    /// CMD55 APP_CMD - the next command is an application command
    AppCmd,
}

impl Command {
    /// The command index that goes on the wire.
    pub const fn index(self) -> u8 {
        match self {
            Command::GoIdleState => 0,
            Command::AllSendCid => 2,
            Command::SendRelativeAddr => 3,
            Command::SetBusWidth => 6,
            Command::SelectCard | Command::DeselectCard => 7,
            Command::SendIfCond => 8,
            Command::SendCsd => 9,
            Command::SendCid => 10,
            Command::SendStatus | Command::SdStatus => 13,
            Command::ReadSingleBlock => 17,
            Command::ReadMultipleBlock => 18,
            Command::SetBlockCount => 23,
            Command::WriteBlock => 24,
            Command::WriteMultipleBlock => 25,
            Command::SdSendOpCond => 41,
            Command::AppCmd => 55,
        }
    }

    /// The response format the card answers this command with.
    pub const fn response(self) -> Response {
        match self {
            Command::GoIdleState | Command::DeselectCard => Response::None,
            Command::AllSendCid | Command::SendCsd | Command::SendCid => Response::R2,
            Command::SendRelativeAddr => Response::R6,
            Command::SelectCard => Response::R1b,
            Command::SendIfCond => Response::R7,
            Command::SdSendOpCond => Response::R3,
            _ => Response::R1,
        }
    }

    /// How long a response the host has to wait for.
    pub const fn wait(self) -> WaitResponse {
        match self {
            Command::DeselectCard => WaitResponse::None,
            _ => WaitResponse::for_index(self.index()),
        }
    }
}

/// The response formats of the SD bus protocol.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Response {
    /// No response at all
    None,
    /// Normal response: card status
    R1,
    /// R1 with busy signalled on DAT0
    R1b,
    /// 136 bits of CID or CSD
    R2,
    /// OCR register, without a valid CRC
    R3,
    /// Published RCA plus a few status bits
    R6,
    /// Card interface condition
    R7,
}

impl Response {
    /// Whether the host can check a CRC on this response, and therefore
    /// raises its "response received" interrupt for it.
    pub const fn has_crc(self) -> bool {
        !matches!(self, Response::None | Response::R3)
    }
}

/// The host-side view of a response: none, 48 bits or 136 bits.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WaitResponse {
    /// Don't wait for a response
    None,
    /// Wait for a 48-bit response
    Short,
    /// Wait for a 136-bit response
    Long,
}

impl WaitResponse {
    /// Index 0 has no response, 2, 9 and 10 return a long one and everything
    /// else a short one.
    pub const fn for_index(index: u8) -> WaitResponse {
        match index {
            0 => WaitResponse::None,
            2 | 9 | 10 => WaitResponse::Long,
            _ => WaitResponse::Short,
        }
    }

    /// The encoding of the host's WAITRESP field.
    pub const fn bits(self) -> u32 {
        match self {
            WaitResponse::None => 0b00,
            WaitResponse::Short => 0b01,
            WaitResponse::Long => 0b11,
        }
    }
}

//==============================================================================

/// The states of the SD memory card state machine.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CardState {
    /// Freshly reset
    Idle,
    /// Operating conditions accepted
    Ready,
    /// CID sent, waiting for an RCA request
    Identification,
    /// Has an RCA, not selected ("stby")
    Standby,
    /// Selected and waiting for a data command ("tran")
    Transfer,
    /// Sending data to the host ("data")
    SendingData,
    /// Receiving data from the host ("rcv")
    ReceivingData,
    /// Writing received data to flash ("prg")
    Programming,
    /// Deselected while programming ("dis")
    Disconnected,
    /// Any other value of the CURRENT_STATE field
    Reserved(u8),
}

impl CardState {
    /// Decode the four-bit CURRENT_STATE field.
    pub const fn from_bits(bits: u8) -> CardState {
        match bits {
            0 => CardState::Idle,
            1 => CardState::Ready,
            2 => CardState::Identification,
            3 => CardState::Standby,
            4 => CardState::Transfer,
            5 => CardState::SendingData,
            6 => CardState::ReceivingData,
            7 => CardState::Programming,
            8 => CardState::Disconnected,
            other => CardState::Reserved(other),
        }
    }
}

/// The 32-bit card status returned in an R1 response.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CardStatus(pub u32);

impl CardStatus {
    /// Bits [12:9].
    pub const fn state(self) -> CardState {
        CardState::from_bits(((self.0 >> 9) & 0xF) as u8)
    }

    /// The card accepts data on the bus.
    pub const fn ready_for_data(self) -> bool {
        self.0 & (1 << 8) != 0
    }

    /// The card expects an application command next.
    pub const fn app_cmd(self) -> bool {
        self.0 & (1 << 5) != 0
    }
}

/// A relative card address, published by the card in its R6 response.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Rca(pub u16);

impl Rca {
    /// Take the RCA out of the upper half of an R6 response.
    pub const fn from_r6(response: u32) -> Rca {
        Rca((response >> 16) as u16)
    }
}

//==============================================================================

/// Card Specific Data, version 2 (SDHC/SDXC).
///
/// Built from the four long response words. The hardware strips the start
/// bits, so the words hold CSD bits [127:0] with bit 0 always clear.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct Csd {
    /// The 16-bytes of data in this Card Specific Data block
    pub data: [u8; 16],
}

impl Csd {
    /// Build a CSD from the response registers, most significant word first.
    pub fn from_response(words: [u32; 4]) -> Csd {
        let mut data = [0u8; 16];
        for (chunk, word) in data.chunks_exact_mut(4).zip(words.iter()) {
            chunk.copy_from_slice(&word.to_be_bytes());
        }
        Csd { data }
    }

    fn data(&self) -> &[u8; 16] {
        &self.data
    }

    define_field!(csd_ver, u8, 0, 6, 2);
    define_field!(data_read_access_time1, u8, 1, 0, 8);
    define_field!(data_read_access_time2, u8, 2, 0, 8);
    define_field!(max_data_transfer_rate, u8, 3, 0, 8);
    define_field!(card_command_classes, u16, [(4, 0, 8), (5, 4, 4)]);
    define_field!(read_block_length, u8, 5, 0, 4);
    define_field!(read_partial_blocks, bool, 6, 7);
    define_field!(write_block_misalignment, bool, 6, 6);
    define_field!(read_block_misalignment, bool, 6, 5);
    define_field!(dsr_implemented, bool, 6, 4);
    define_field!(device_size, u32, [(7, 0, 6), (8, 0, 8), (9, 0, 8)]);
    define_field!(erase_single_block_enabled, bool, 10, 6);
    define_field!(erase_sector_size, u8, [(10, 0, 6), (11, 7, 1)]);
    define_field!(write_protect_group_size, u8, 11, 0, 7);
    define_field!(write_protect_group_enable, bool, 12, 7);
    define_field!(write_speed_factor, u8, 12, 2, 3);
    define_field!(max_write_data_length, u8, [(12, 0, 2), (13, 6, 2)]);
    define_field!(write_partial_blocks, bool, 13, 5);
    define_field!(file_format, u8, 14, 2, 2);
    define_field!(temporary_write_protection, bool, 14, 4);
    define_field!(permanent_write_protection, bool, 14, 5);
    define_field!(copy_flag_set, bool, 14, 6);
    define_field!(file_format_group_set, bool, 14, 7);
    define_field!(crc, u8, 15, 1, 7);

    /// C_SIZE scaled by 1024. This is what the storage adapter reports as
    /// its sector count.
    pub fn sector_count(&self) -> u32 {
        self.device_size() << 10
    }

    /// Returns the card capacity in bytes
    pub fn card_capacity_bytes(&self) -> u64 {
        (u64::from(self.device_size()) + 1) * 512 * 1024
    }

    /// Returns the card capacity in 512-byte blocks
    pub fn card_capacity_blocks(&self) -> u32 {
        // C_SIZE = 0x3FFFFF is one block more than a u32 holds.
        (self.device_size() + 1).saturating_mul(1024)
    }
}
