use hex_literal::hex;

use sdio_dma_sdmmc::{
    disk::{DiskResult, DiskStatus},
    irq::{self, CompletionFlags, DmaEvent, FatalError, SdioEvent},
    proto::{CardState, CardStatus, Command, Csd, Rca, Response, WaitResponse},
    sdio::regs::{DmaEvents, DmaStreamStatus, SdioInterruptStatus, Status},
    Block, BlockCount, BlockIdx,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// CSD of a 32 GB SDHC card, as it comes off the wire.
const CSD_32GB: [u8; 16] = hex!("400E0032 5B590000 EDC87F80 0A404000");

#[test]
fn csd_capacity() {
    init_logging();
    let csd = Csd { data: CSD_32GB };
    assert_eq!(csd.csd_ver(), 1);
    assert_eq!(csd.read_block_length(), 9);
    assert_eq!(csd.device_size(), 0xEDC8);
    assert_eq!(csd.sector_count(), 0xEDC8 << 10);
    assert_eq!(csd.card_capacity_blocks(), (0xEDC8 + 1) * 1024);
    assert_eq!(csd.card_capacity_bytes(), 31_914_983_424);

    let from_registers =
        Csd::from_response([0x400E_0032, 0x5B59_0000, 0xEDC8_7F80, 0x0A40_4000]);
    assert_eq!(from_registers, csd);
}

#[test]
fn commands_on_the_wire() {
    assert_eq!(Command::SendIfCond.index(), 8);
    assert_eq!(Command::SendIfCond.response(), Response::R7);
    assert_eq!(Command::SdSendOpCond.index(), 41);
    assert!(!Command::SdSendOpCond.response().has_crc());
    assert_eq!(Command::SelectCard.wait(), WaitResponse::Short);
    assert_eq!(Command::DeselectCard.index(), 7);
    assert_eq!(Command::DeselectCard.wait(), WaitResponse::None);
    assert_eq!(Command::SendCsd.wait(), WaitResponse::Long);
    assert_eq!(Command::SetBlockCount.index(), 23);
    assert_eq!(Command::WriteMultipleBlock.index(), 25);
}

#[test]
fn status_states() {
    // Transfer state, ready for data
    assert_eq!(CardStatus(0x0000_0900).state(), CardState::Transfer);
    assert!(CardStatus(0x0000_0900).ready_for_data());
    assert_eq!(CardStatus(0x0000_0B00).state(), CardState::SendingData);
    assert_eq!(CardStatus(0x0000_0C00).state(), CardState::ReceivingData);
    assert_eq!(CardStatus(0x0000_0E00).state(), CardState::Programming);
    assert_eq!(CardStatus(0x0000_1E00).state(), CardState::Reserved(15));
    assert_eq!(Rca::from_r6(0xB368_0500), Rca(0xB368));
}

struct Registers(Status);

impl SdioInterruptStatus for Registers {
    fn status(&self) -> Status {
        self.0
    }
    fn clear_status(&mut self, flags: Status) {
        self.0.remove(flags);
    }
}

struct Stream(DmaEvents);

impl DmaStreamStatus for Stream {
    fn events(&self) -> DmaEvents {
        self.0
    }
    fn clear_events(&mut self, events: DmaEvents) {
        self.0.remove(events);
    }
}

#[test]
fn interrupt_handlers() {
    init_logging();
    static FLAGS: CompletionFlags = CompletionFlags::new();
    let (signaller, waiter) = FLAGS.split().unwrap();
    assert!(FLAGS.split().is_none());

    waiter.arm_command();
    waiter.arm_data();
    let mut regs = Registers(Status::CMDREND | Status::DATAEND | Status::CMDSENT);
    assert_eq!(irq::on_sdio(&mut regs, &signaller), Ok(SdioEvent::CommandDone));
    assert!(!waiter.command_pending());
    assert!(waiter.data_pending());
    assert_eq!(irq::on_sdio(&mut regs, &signaller), Ok(SdioEvent::DataDone));
    assert!(!waiter.data_pending());
    // Not ours to handle.
    assert_eq!(irq::on_sdio(&mut regs, &signaller), Ok(SdioEvent::None));
    assert_eq!(regs.0, Status::CMDSENT);

    let mut regs = Registers(Status::CTIMEOUT);
    assert_eq!(
        irq::on_sdio(&mut regs, &signaller),
        Err(FatalError::CommandTimeout)
    );

    let mut stream = Stream(DmaEvents::FIFO_ERROR | DmaEvents::TRANSFER_COMPLETE);
    assert_eq!(irq::on_dma_stream(&mut stream), Ok(DmaEvent::Complete));
    assert_eq!(irq::on_dma_stream(&mut stream), Ok(DmaEvent::FifoError));
    assert_eq!(irq::on_dma_stream(&mut stream), Ok(DmaEvent::None));
    let mut stream = Stream(DmaEvents::TRANSFER_ERROR);
    assert_eq!(irq::on_dma_stream(&mut stream), Err(FatalError::DmaTransfer));
}

#[test]
fn fatfs_codes() {
    assert_eq!(DiskStatus::Ok as u8, 0);
    assert_eq!(DiskStatus::InitError as u8, 1);
    assert_eq!(DiskStatus::NoCard as u8, 2);
    assert_eq!(DiskResult::Ok as u8, 0);
    assert_eq!(DiskResult::Error as u8, 1);
    assert_eq!(DiskResult::NotReady as u8, 3);
    assert_eq!(DiskResult::ParameterError as u8, 4);
}

#[test]
fn blocks() {
    let mut blocks = [Block::new(), Block::new()];
    blocks[1][0] = 0xAA;
    assert_eq!(Block::slice_as_bytes(&blocks).len(), 1024);
    assert_eq!(Block::slice_as_bytes(&blocks)[512], 0xAA);
    Block::slice_as_bytes_mut(&mut blocks)[1023] = 0x55;
    assert_eq!(blocks[1][511], 0x55);
    assert_eq!(BlockIdx(7) + BlockCount(3), BlockIdx(10));
    assert_eq!(BlockCount(4).bytes(), 2048);
}
