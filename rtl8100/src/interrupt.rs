// Interrupt status bits and the dispatcher

use crate::chip::ChipSetup;
use crate::device::Device;
use crate::dma::DmaMemory;
use crate::pci::acknowledge_bus_error;
use crate::regs::{self, Registers};
use crate::rx::RxSummary;
use crate::stats::TallyCounters;
use crate::tx::ReclaimSummary;
use crate::upstream::Upstream;
use bitflags::bitflags;
use log::{error, trace};

bitflags! {
    /// IntrStatus / IntrMask bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct InterruptStatus: u16 {
        const SYS_ERR = 0x8000;
        const TX_DESC_UNAVAIL = 0x0080;
        const RX_FIFO_OVER = 0x0040;
        const LINK_CHG = 0x0020;
        const RX_DESC_UNAVAIL = 0x0010;
        const TX_ERR = 0x0008;
        const TX_OK = 0x0004;
        const RX_ERR = 0x0002;
        const RX_OK = 0x0001;
    }
}

impl InterruptStatus {
    /// Events that call for a receive scan
    pub const RX_EVENTS: Self = Self::RX_OK
        .union(Self::RX_DESC_UNAVAIL)
        .union(Self::RX_FIFO_OVER);

    /// Events that call for a transmit reclaim
    pub const TX_EVENTS: Self = Self::TX_OK.union(Self::TX_ERR).union(Self::TX_DESC_UNAVAIL);

    /// Status as read from the register, undefined bits included
    pub fn from_register(raw: u16) -> Self {
        Self::from_bits_retain(raw)
    }

    /// All ones means the device is gone; zero means it was not ours.
    pub fn is_spurious(&self) -> bool {
        self.bits() == 0 || self.bits() == 0xFFFF
    }
}

/// What one pass of the interrupt handler did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InterruptOutcome {
    pub status: InterruptStatus,
    pub spurious: bool,
    pub pci_error: bool,
    pub rx: Option<RxSummary>,
    pub tx: Option<ReclaimSummary>,
    pub stats_updated: bool,
}

impl<R, C, M, U> Device<R, C, M, U>
where
    R: Registers,
    C: ChipSetup,
    M: DmaMemory,
    U: Upstream,
{
    /// Service the interrupt line.
    ///
    /// Interrupts stay masked for the whole pass. On exit the status that
    /// was read is acknowledged and the mask restored, whatever happened
    /// in between.
    pub fn handle_interrupt(&mut self) -> InterruptOutcome {
        self.regs.write16(regs::INTR_MASK, 0);
        let status = InterruptStatus::from_register(self.regs.read16(regs::INTR_STATUS));

        let mut outcome = InterruptOutcome {
            status,
            spurious: status.is_spurious(),
            ..InterruptOutcome::default()
        };
        trace!("rtl8100: interrupt status {:#06x}", status.bits());

        if !outcome.spurious && self.enabled {
            if status.contains(InterruptStatus::SYS_ERR) {
                self.pci_error();
                outcome.pci_error = true;
            }

            if status.intersects(InterruptStatus::RX_EVENTS) {
                outcome.rx = self.rx_pass();
            }

            if status.intersects(InterruptStatus::TX_EVENTS) {
                outcome.tx = self.reclaim_tx();
            }

            if self.needs_update
                && self.regs.read32(regs::COUNTER_ADDR_LOW) & regs::COUNTER_DUMP == 0
            {
                self.update_statistics();
                outcome.stats_updated = true;
            }
        }

        self.regs.write16(regs::INTR_STATUS, status.bits());
        let mask = if self.enabled {
            self.caps.interrupt_mask
        } else {
            InterruptStatus::empty()
        };
        self.regs.write16(regs::INTR_MASK, mask.bits());
        outcome
    }

    pub(crate) fn rx_pass(&mut self) -> Option<RxSummary> {
        let rings = self.rings.as_mut()?;
        Some(rings.rx.scan(
            self.caps.checksum_v2,
            &mut self.memory,
            &mut self.upstream,
            &mut self.stats.counters,
        ))
    }

    pub(crate) fn reclaim_tx(&mut self) -> Option<ReclaimSummary> {
        let rings = self.rings.as_mut()?;
        Some(rings.tx.reclaim(
            self.config.max_segments,
            &mut self.regs,
            &mut self.memory,
            &mut self.upstream,
            &mut self.stats.counters,
        ))
    }

    fn update_statistics(&mut self) {
        if let Some(rings) = &self.rings {
            self.stats.tally = TallyCounters::read_from(&rings.tally);
        }
        self.needs_update = false;
    }

    /// System error: clear the latched PCI error and restart the chip.
    fn pci_error(&mut self) {
        self.stats.counters.pci_errors += 1;
        match self.chip.pci_config() {
            Some(config) => {
                let status = acknowledge_bus_error(config);
                error!("rtl8100: PCI bus error, status {:#06x}", status);
            }
            None => error!("rtl8100: system error interrupt"),
        }
        self.restart();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chip::ChipVersion;
    use crate::descriptor::{FIRST_FRAG, LAST_FRAG};
    use crate::link::LinkState;
    use crate::pci::{PCI_STATUS, STATUS_SIGNALED_SYSTEM_ERROR};
    use crate::testing::{enabled_device, linked_device, small_config, FakePci, TestChip};
    use crate::tx::TxPacket;

    #[test]
    fn test_spurious_interrupt_acknowledged() {
        let mut device = enabled_device(small_config(), ChipVersion::Rtl8106e);
        let mask = device.capabilities().interrupt_mask.bits();
        device.registers_mut().mask_writes.clear();

        let outcome = device.handle_interrupt();
        assert!(outcome.spurious);
        assert_eq!(outcome.rx, None);
        assert_eq!(outcome.tx, None);

        let regs = device.registers();
        assert_eq!(regs.status_acks, vec![0]);
        assert_eq!(regs.mask_writes, vec![0, mask]);
    }

    #[test]
    fn test_device_gone_does_no_work() {
        let mut device = linked_device(small_config());
        device.registers_mut().isr = 0xFFFF;

        let outcome = device.handle_interrupt();
        assert!(outcome.spurious);
        assert!(!outcome.pci_error);
        assert_eq!(device.statistics().counters.tx_interrupts, 0);
        assert_eq!(device.registers().status_acks.last(), Some(&0xFFFF));
    }

    #[test]
    fn test_undefined_status_bits_acknowledged() {
        let mut device = linked_device(small_config());
        device.registers_mut().isr = 0x4000 | InterruptStatus::LINK_CHG.bits();

        let outcome = device.handle_interrupt();
        assert!(!outcome.spurious);
        assert_eq!(outcome.rx, None);
        assert_eq!(outcome.tx, None);
        assert_eq!(outcome.status.bits(), 0x4020);
        assert_eq!(device.registers().status_acks.last(), Some(&0x4020));
    }

    #[test]
    fn test_event_groups() {
        assert!(InterruptStatus::RX_EVENTS.contains(InterruptStatus::RX_FIFO_OVER));
        assert!(InterruptStatus::TX_EVENTS.contains(InterruptStatus::TX_DESC_UNAVAIL));
        assert!(!InterruptStatus::RX_EVENTS.intersects(InterruptStatus::TX_EVENTS));
        assert!(InterruptStatus::from_register(0).is_spurious());
        assert!(InterruptStatus::from_register(0xFFFF).is_spurious());
        assert!(!InterruptStatus::from_register(0x0001).is_spurious());
    }

    #[test]
    fn test_rx_interrupt_delivers() {
        let mut device = linked_device(small_config());
        device
            .rings_mut()
            .rx
            .device_fill(0, &[0x5a; 60], FIRST_FRAG | LAST_FRAG, 0);
        device.registers_mut().isr = InterruptStatus::RX_OK.bits();

        let outcome = device.handle_interrupt();
        assert_eq!(outcome.rx.map(|rx| rx.delivered), Some(1));
        assert_eq!(outcome.tx, None);
        assert_eq!(device.upstream().delivered.len(), 1);
        assert_eq!(device.upstream().delivered[0].len(), 60);
        assert_eq!(device.registers().isr, 0);
        assert_eq!(
            device.registers().read16(regs::INTR_MASK),
            device.capabilities().interrupt_mask.bits()
        );
    }

    #[test]
    fn test_tx_interrupt_reclaims() {
        let mut device = linked_device(small_config());
        let mut buffer = device.alloc_tx_buffer(60).unwrap();
        buffer.set_len(60);
        assert!(device.transmit(TxPacket::new(buffer)).is_queued());

        device.rings_mut().tx.ring_mut().device_complete(0, 0, 0);
        device.registers_mut().isr = (InterruptStatus::TX_OK | InterruptStatus::RX_OK).bits();

        let outcome = device.handle_interrupt();
        assert_eq!(outcome.tx.map(|tx| tx.reclaimed), Some(1));
        assert_eq!(outcome.rx.map(|rx| rx.delivered), Some(0));
        assert_eq!(device.tx_ring().unwrap().ring().free_count(), 63);
        assert!(device.tx_ring().unwrap().has_deferred());
        assert_eq!(device.statistics().counters.tx_interrupts, 1);
    }

    #[test]
    fn test_system_error_restarts_chip() {
        let chip = TestChip {
            version: Some(ChipVersion::Rtl8106e),
            pci: Some(FakePci::default()),
            ..TestChip::default()
        };
        let mut device = crate::device::Device::new(
            crate::testing::FakeRegs::new(),
            chip,
            crate::testing::TestMemory::new(),
            crate::testing::RecordingUpstream::default(),
            small_config(),
        )
        .unwrap();
        device.enable().unwrap();
        device.registers_mut().set_link(true);
        device.on_timer();

        let latched = (STATUS_SIGNALED_SYSTEM_ERROR as u32) << 16;
        if let Some(pci) = device.chip.pci.as_mut() {
            use crate::pci::PciConfigSpace;
            pci.write32(PCI_STATUS & 0xFC, latched);
        }
        let resets = device.registers().resets;
        device.registers_mut().isr = InterruptStatus::SYS_ERR.bits();

        let outcome = device.handle_interrupt();
        assert!(outcome.pci_error);
        assert_eq!(device.statistics().counters.pci_errors, 1);
        assert_eq!(device.registers().resets, resets + 2);
        assert_eq!(device.link_state(), LinkState::Down);
        assert_eq!(device.chip().hw_starts, 2);
        let pci = device.chip().pci.as_ref().unwrap();
        assert_eq!(pci.status_clears, vec![STATUS_SIGNALED_SYSTEM_ERROR]);
    }

    #[test]
    fn test_statistics_read_after_dump_completes() {
        let mut device = linked_device(small_config());
        assert!(device.needs_update);

        let mut raw = [0u8; 64];
        raw[0..8].copy_from_slice(&42u64.to_le_bytes());
        raw[8..16].copy_from_slice(&7u64.to_le_bytes());
        let tally = &device.rings_mut().tally;
        // SAFETY: the region is 64 bytes of host memory owned by the device.
        unsafe { core::ptr::copy_nonoverlapping(raw.as_ptr(), tally.as_ptr(), raw.len()) };

        device.registers_mut().isr = InterruptStatus::RX_OK.bits();
        assert!(!device.handle_interrupt().stats_updated);
        assert_eq!(device.statistics().tally.tx_packets, 0);

        device.registers_mut().finish_dump();
        device.registers_mut().isr = InterruptStatus::RX_OK.bits();
        assert!(device.handle_interrupt().stats_updated);
        assert_eq!(device.statistics().tally.tx_packets, 42);
        assert_eq!(device.statistics().net().input_packets, 7);
        assert!(!device.needs_update);
    }

    #[test]
    fn test_interrupt_ignored_while_disabled() {
        let mut device = enabled_device(small_config(), ChipVersion::Rtl8106e);
        device.disable();
        device.registers_mut().isr = (InterruptStatus::RX_OK | InterruptStatus::TX_OK).bits();

        let outcome = device.handle_interrupt();
        assert_eq!(outcome.rx, None);
        assert_eq!(device.registers().read16(regs::INTR_MASK), 0);
        assert_eq!(device.registers().status_acks.last(), Some(&(InterruptStatus::RX_OK | InterruptStatus::TX_OK).bits()));
    }
}
