// RTL8100 device controller.
//
// Device owns the register window, both descriptor rings, the tally
// block and the link state, and is the only thing that mutates them.
// Interrupt handling lives in interrupt.rs, the periodic link and
// health check in monitor.rs.

use crate::chip::{Capabilities, ChipSetup, ChipVersion};
use crate::config::DriverConfig;
use crate::dma::{DmaMemory, DmaRegion, PacketBuffer};
use crate::error::NicError;
use crate::filter::{MacAddress, MulticastFilter, RxMode};
use crate::link::{LinkState, Medium};
use crate::monitor::HealthMonitor;
use crate::regs::{self, Registers};
use crate::ring::{DescriptorRing, RING_ALIGN};
use crate::rx::RxRing;
use crate::stats::{Statistics, TALLY_ALIGN, TALLY_SIZE};
use crate::tx::{ChecksumFlags, DropReason, TxOutcome, TxPacket, TxRing};
use crate::upstream::Upstream;
use bitflags::bitflags;
use log::{error, info};

/// Which way checksum offload applies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumDirection {
    Input,
    Output,
}

bitflags! {
    /// Offload features advertised to the network stack
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Features: u32 {
        /// Packets may span several non-contiguous pages
        const MULTI_PAGES = 1 << 0;
        const HW_VLAN = 1 << 1;
        const TSO_IPV4 = 1 << 2;
    }
}

/// DMA state that exists only while the interface is enabled
pub(crate) struct Rings {
    pub(crate) tx: TxRing,
    pub(crate) rx: RxRing,
    pub(crate) tally: DmaRegion,
}

pub struct Device<R, C, M, U>
where
    R: Registers,
    C: ChipSetup,
    M: DmaMemory,
    U: Upstream,
{
    pub(crate) regs: R,
    pub(crate) chip: C,
    pub(crate) memory: M,
    pub(crate) upstream: U,
    pub(crate) config: DriverConfig,
    pub(crate) caps: Capabilities,
    version: ChipVersion,
    mac: MacAddress,
    permanent_mac: MacAddress,
    pub(crate) medium: Medium,
    pub(crate) rings: Option<Rings>,
    pub(crate) link: LinkState,
    pub(crate) enabled: bool,
    pub(crate) needs_update: bool,
    pub(crate) monitor: HealthMonitor,
    pub(crate) stats: Statistics,
    rx_mode: RxMode,
}

impl<R, C, M, U> Device<R, C, M, U>
where
    R: Registers,
    C: ChipSetup,
    M: DmaMemory,
    U: Upstream,
{
    /// Identify and reset the chip. The interface stays disabled.
    ///
    /// # Arguments
    /// * `regs` - Register window of the device
    /// * `chip` - Revision-specific setup hooks
    /// * `memory` - Source of DMA memory for rings and buffers
    /// * `upstream` - Network stack callbacks
    /// * `config` - Validated before anything touches the hardware
    ///
    /// # Returns
    /// * `Err(NicError::ResetTimeout)` - The chip never acknowledged reset
    pub fn new(
        mut regs: R,
        mut chip: C,
        memory: M,
        upstream: U,
        config: DriverConfig,
    ) -> Result<Self, NicError> {
        config.validate()?;

        let version = chip.identify(&mut regs);
        let caps = Capabilities::resolve(version, &config);
        chip.power_up(&mut regs);
        chip.nic_reset(&mut regs)?;

        let mut bytes = [0u8; 6];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = regs.read8(regs::MAC0 + i as u16);
        }
        let mac = MacAddress::new(bytes);

        info!(
            "rtl8100: {} at MAC {}, checksum encoding v{}",
            version,
            mac,
            if caps.checksum_v2 { 2 } else { 1 }
        );

        let monitor = HealthMonitor::new(&config);
        Ok(Self {
            regs,
            chip,
            memory,
            upstream,
            medium: config.medium,
            monitor,
            config,
            caps,
            version,
            mac,
            permanent_mac: mac,
            rings: None,
            link: LinkState::Down,
            enabled: false,
            needs_update: false,
            stats: Statistics::default(),
            rx_mode: RxMode::default(),
        })
    }

    /// Allocate rings, arm the receive ring and start the chip.
    ///
    /// The link is reported on the next monitor tick.
    pub fn enable(&mut self) -> Result<(), NicError> {
        if self.enabled {
            return Ok(());
        }

        let tx_len = self.config.tx_ring_size;
        let rx_len = self.config.rx_ring_size;

        let region = self
            .memory
            .alloc_coherent(DescriptorRing::region_size(tx_len), RING_ALIGN)?;
        let tx = TxRing::new(region, tx_len, &mut self.memory)?;

        let rx = match self
            .memory
            .alloc_coherent(DescriptorRing::region_size(rx_len), RING_ALIGN)
            .and_then(|region| RxRing::new(region, rx_len, self.config.rx_buffer_size, &mut self.memory))
        {
            Ok(rx) => rx,
            Err(e) => {
                let region = tx.release(&mut self.memory);
                self.memory.free_coherent(region);
                return Err(e);
            }
        };

        let tally = match self.memory.alloc_coherent(TALLY_SIZE, TALLY_ALIGN) {
            Ok(tally) => tally,
            Err(e) => {
                let region = tx.release(&mut self.memory);
                self.memory.free_coherent(region);
                let region = rx.release(&mut self.memory);
                self.memory.free_coherent(region);
                return Err(e);
            }
        };

        self.rings = Some(Rings { tx, rx, tally });
        self.stats = Statistics::default();
        self.monitor.reset();
        self.needs_update = false;
        self.link = LinkState::Down;
        self.start_hardware();
        self.enabled = true;

        info!(
            "rtl8100: enabled with {} TX / {} RX descriptors",
            tx_len, rx_len
        );
        Ok(())
    }

    /// Stop the chip and release every buffer and ring.
    pub fn disable(&mut self) {
        if !self.enabled {
            return;
        }

        self.upstream.stop_output();
        self.upstream.flush_output();
        self.enabled = false;
        self.needs_update = false;

        self.regs.write16(regs::INTR_MASK, 0);
        let status = self.regs.read16(regs::INTR_STATUS);
        self.regs.write16(regs::INTR_STATUS, status);
        self.reset_chip();
        self.chip.power_down(&mut self.regs);

        if self.link.is_up() {
            self.link = LinkState::Down;
            self.upstream.link_changed(LinkState::Down);
        }

        if let Some(rings) = self.rings.take() {
            let region = rings.tx.release(&mut self.memory);
            self.memory.free_coherent(region);
            let region = rings.rx.release(&mut self.memory);
            self.memory.free_coherent(region);
            self.memory.free_coherent(rings.tally);
        }

        info!("rtl8100: disabled");
    }

    /// Common start sequence for enable and restart.
    pub(crate) fn start_hardware(&mut self) {
        self.chip.power_up(&mut self.regs);
        self.regs
            .write32(regs::RX_CONFIG, regs::RX_DMA_BURST << regs::RX_CFG_DMA_SHIFT);
        self.reset_chip();

        self.regs.write8(regs::CFG9346, regs::CFG9346_UNLOCK);
        self.chip.hw_start(&mut self.regs, &self.caps);
        self.regs.write8(regs::MTPS, regs::MTPS_DEFAULT);
        self.regs.write32(
            regs::TX_CONFIG,
            (regs::TX_DMA_BURST << regs::TX_DMA_SHIFT)
                | (regs::TX_INTER_FRAME_GAP << regs::TX_INTER_FRAME_GAP_SHIFT),
        );
        self.regs
            .write16(regs::INTR_MITIGATE, self.config.interrupt_mitigation);

        if let Some(rings) = &self.rings {
            let tx = rings.tx.ring().phys_addr();
            let rx = rings.rx.ring().phys_addr();
            self.regs.write32(regs::TX_DESC_START_ADDR_LOW, tx as u32);
            self.regs.write32(regs::TX_DESC_START_ADDR_HIGH, (tx >> 32) as u32);
            self.regs.write32(regs::RX_DESC_ADDR_LOW, rx as u32);
            self.regs.write32(regs::RX_DESC_ADDR_HIGH, (rx >> 32) as u32);
        }

        let cplus = self.regs.read16(regs::CPLUS_CMD) | regs::CPLUS_RX_CHKSUM | regs::CPLUS_RX_VLAN;
        self.regs.write16(regs::CPLUS_CMD, cplus);
        self.regs.write16(regs::RX_MAX_SIZE, self.caps.rx_max_size);
        self.apply_rx_mode();
        self.regs.write8(regs::CFG9346, regs::CFG9346_LOCK);

        self.regs
            .write8(regs::CHIP_CMD, regs::CMD_TX_ENB | regs::CMD_RX_ENB);
        self.regs.write16(regs::INTR_MASK, self.caps.interrupt_mask.bits());
        self.chip.set_speed(&mut self.regs, self.medium);
    }

    /// Chip reset during recovery: a timeout is logged and counted, and
    /// the caller carries on.
    pub(crate) fn reset_chip(&mut self) {
        if let Err(e) = self.chip.nic_reset(&mut self.regs) {
            error!("rtl8100: {}", e);
            self.stats.counters.reset_timeouts += 1;
        }
    }

    fn apply_rx_mode(&mut self) {
        let (accept, filter) = self.rx_mode.accept_bits();
        let rx_config = (regs::RX_DMA_BURST << regs::RX_CFG_DMA_SHIFT)
            | accept
            | (self.regs.read32(regs::RX_CONFIG) & self.caps.rx_config_mask);
        let (mar0, mar1) = filter.register_words();

        self.regs.write32(regs::RX_CONFIG, rx_config);
        self.regs.write32(regs::MAR0, mar0);
        self.regs.write32(regs::MAR1, mar1);
    }

    /// Queue a packet for transmission.
    ///
    /// Never blocks: a full ring hands the packet back as
    /// [`TxOutcome::Stalled`] and upstream is serviced once room frees up.
    pub fn transmit(&mut self, packet: TxPacket) -> TxOutcome {
        let rings = match self.rings.as_mut() {
            Some(rings) if self.enabled && self.link.is_up() => rings,
            _ => {
                self.stats.counters.tx_dropped += 1;
                packet.release(&mut self.memory);
                return TxOutcome::Dropped(DropReason::LinkDown);
            }
        };

        rings.tx.enqueue(
            packet,
            &self.caps,
            self.config.max_segments,
            &mut self.regs,
            &mut self.memory,
            &mut self.stats.counters,
        )
    }

    /// Whether a transmit attempt right now could be queued.
    pub fn can_transmit(&self) -> bool {
        self.enabled
            && self.link.is_up()
            && self
                .rings
                .as_ref()
                .map_or(false, |rings| !rings.tx.is_stalled())
    }

    /// Buffer for building an outgoing frame.
    pub fn alloc_tx_buffer(&mut self, len: usize) -> Option<PacketBuffer> {
        self.memory.alloc_buffer(len)
    }

    /// Give a buffer (for example from a delivered frame) back to the pool.
    pub fn recycle_buffer(&mut self, buffer: PacketBuffer) {
        self.memory.recycle(buffer);
    }

    /// Free a packet that will not be transmitted.
    pub fn discard_packet(&mut self, packet: TxPacket) {
        packet.release(&mut self.memory);
    }

    pub fn select_medium(&mut self, medium: Medium) {
        self.medium = medium;
        if self.enabled {
            self.chip.set_speed(&mut self.regs, medium);
        }
        info!("rtl8100: medium set to {:?}", medium);
    }

    pub fn set_promiscuous(&mut self, enabled: bool) {
        self.rx_mode.promiscuous = enabled;
        if self.enabled {
            self.apply_rx_mode();
        }
    }

    pub fn set_multicast_mode(&mut self, enabled: bool) {
        self.rx_mode.all_multicast = enabled;
        if self.enabled {
            self.apply_rx_mode();
        }
    }

    pub fn set_multicast_list(&mut self, addrs: &[MacAddress]) {
        self.rx_mode.filter =
            MulticastFilter::from_addresses(addrs, self.config.multicast_filter_limit);
        if self.enabled {
            self.apply_rx_mode();
        }
    }

    pub fn rx_mode(&self) -> RxMode {
        self.rx_mode
    }

    pub fn mac_address(&self) -> MacAddress {
        self.mac
    }

    /// Address read from the chip at creation
    pub fn permanent_mac_address(&self) -> MacAddress {
        self.permanent_mac
    }

    pub fn set_mac_address(&mut self, mac: MacAddress) {
        self.chip.set_mac_address(&mut self.regs, &mac);
        self.mac = mac;
    }

    pub fn checksum_support(&self, direction: ChecksumDirection) -> ChecksumFlags {
        let ipv4 = ChecksumFlags::TCP | ChecksumFlags::UDP | ChecksumFlags::IP;
        let ipv6 = ChecksumFlags::TCP_IPV6 | ChecksumFlags::UDP_IPV6;

        match direction {
            ChecksumDirection::Input if self.caps.checksum_v2 => ipv4 | ipv6,
            ChecksumDirection::Output if self.caps.ipv6_tx_checksum => ipv4 | ipv6,
            _ => ipv4,
        }
    }

    pub fn features(&self) -> Features {
        let mut features = Features::MULTI_PAGES | Features::HW_VLAN;
        features.set(Features::TSO_IPV4, self.caps.tso_ipv4);
        features
    }

    pub fn max_packet_size(&self) -> usize {
        self.config.max_frame_size()
    }

    pub fn statistics(&self) -> &Statistics {
        &self.stats
    }

    pub fn link_state(&self) -> LinkState {
        self.link
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn chip_version(&self) -> ChipVersion {
        self.version
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.caps
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn tx_ring(&self) -> Option<&TxRing> {
        self.rings.as_ref().map(|rings| &rings.tx)
    }

    pub fn rx_ring(&self) -> Option<&RxRing> {
        self.rings.as_ref().map(|rings| &rings.rx)
    }

    pub fn upstream(&self) -> &U {
        &self.upstream
    }

    pub fn upstream_mut(&mut self) -> &mut U {
        &mut self.upstream
    }

    pub fn registers(&self) -> &R {
        &self.regs
    }

    pub fn registers_mut(&mut self) -> &mut R {
        &mut self.regs
    }

    pub fn chip(&self) -> &C {
        &self.chip
    }

    pub fn memory(&self) -> &M {
        &self.memory
    }

    #[cfg(test)]
    pub(crate) fn rings_mut(&mut self) -> &mut Rings {
        self.rings.as_mut().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        enabled_device, linked_device, small_config, FakeRegs, RecordingUpstream, TestChip,
        TestMemory,
    };

    fn packet(device: &mut crate::testing::TestDevice, len: usize) -> TxPacket {
        let mut buffer = device.alloc_tx_buffer(len).unwrap();
        buffer.set_len(len);
        TxPacket::new(buffer)
    }

    #[test]
    fn test_new_reads_mac_and_stays_disabled() {
        let mut regs = FakeRegs::new();
        for (i, byte) in [0x00, 0xe0, 0x4c, 0x01, 0x02, 0x03].iter().enumerate() {
            regs.write8(regs::MAC0 + i as u16, *byte);
        }
        regs.write32(regs::TX_CONFIG, 0x4480_0000);

        let device = Device::new(
            regs,
            TestChip::default(),
            TestMemory::new(),
            RecordingUpstream::default(),
            small_config(),
        )
        .unwrap();
        assert_eq!(device.chip_version(), ChipVersion::Rtl8106e);
        assert_eq!(
            device.mac_address(),
            MacAddress::new([0x00, 0xe0, 0x4c, 0x01, 0x02, 0x03])
        );
        assert!(!device.is_enabled());
        assert_eq!(device.registers().resets, 1);
    }

    #[test]
    fn test_new_fails_when_reset_never_completes() {
        let mut regs = FakeRegs::new();
        regs.stuck_reset = true;
        let result = Device::new(
            regs,
            TestChip::default(),
            TestMemory::new(),
            RecordingUpstream::default(),
            small_config(),
        );
        assert!(matches!(result, Err(NicError::ResetTimeout(_))));
    }

    #[test]
    fn test_new_rejects_bad_config() {
        let config = DriverConfig {
            tx_ring_size: 6,
            ..small_config()
        };
        let result = Device::new(
            FakeRegs::new(),
            TestChip::default(),
            TestMemory::new(),
            RecordingUpstream::default(),
            config,
        );
        assert!(matches!(result, Err(NicError::InvalidConfig(_))));
    }

    #[test]
    fn test_enable_programs_rings_and_mask() {
        let device = enabled_device(small_config(), ChipVersion::Rtl8106e);
        let regs = device.registers();

        let tx = device.tx_ring().unwrap().ring().phys_addr();
        let rx = device.rx_ring().unwrap().ring().phys_addr();
        assert_eq!(regs.read32(regs::TX_DESC_START_ADDR_LOW), tx as u32);
        assert_eq!(regs.read32(regs::TX_DESC_START_ADDR_HIGH), (tx >> 32) as u32);
        assert_eq!(regs.read32(regs::RX_DESC_ADDR_LOW), rx as u32);
        assert_eq!(regs.read8(regs::CHIP_CMD), regs::CMD_TX_ENB | regs::CMD_RX_ENB);
        assert_eq!(regs.read16(regs::INTR_MASK), device.capabilities().interrupt_mask.bits());
        assert_eq!(regs.read16(regs::RX_MAX_SIZE), 0x05F3);
        assert_ne!(regs.read16(regs::CPLUS_CMD) & regs::CPLUS_RX_CHKSUM, 0);
        assert_eq!(regs.read8(regs::CFG9346), regs::CFG9346_LOCK);
        assert_eq!(device.chip().speeds, vec![Medium::Auto]);
        assert_eq!(device.memory().outstanding(), 16);
    }

    #[test]
    fn test_transmit_requires_link() {
        let mut device = enabled_device(small_config(), ChipVersion::Rtl8106e);
        let p = packet(&mut device, 60);
        assert!(matches!(
            device.transmit(p),
            TxOutcome::Dropped(DropReason::LinkDown)
        ));
        assert_eq!(device.statistics().counters.tx_dropped, 1);
        assert_eq!(device.memory().outstanding(), 16);
    }

    #[test]
    fn test_transmit_when_linked() {
        let mut device = linked_device(small_config());
        let p = packet(&mut device, 60);
        assert!(device.transmit(p).is_queued());
        assert_eq!(device.tx_ring().unwrap().ring().free_count(), 62);
        assert_eq!(device.registers().tx_polls, 1);
    }

    #[test]
    fn test_disable_releases_everything() {
        let mut device = linked_device(small_config());
        for _ in 0..3 {
            let p = packet(&mut device, 60);
            device.transmit(p);
        }

        device.disable();
        assert!(!device.is_enabled());
        assert!(device.tx_ring().is_none());
        assert_eq!(device.memory().outstanding(), 0);
        assert_eq!(device.memory().regions(), 0);
        assert_eq!(device.link_state(), LinkState::Down);
        assert_eq!(device.upstream().links.last(), Some(&LinkState::Down));
        assert_eq!(device.registers().read16(regs::INTR_MASK), 0);
        assert_eq!(device.chip().power_downs, 1);
        assert_eq!(device.on_timer(), None);
    }

    #[test]
    fn test_enable_is_idempotent_and_reenables() {
        let mut device = enabled_device(small_config(), ChipVersion::Rtl8106e);
        device.enable().unwrap();
        assert_eq!(device.chip().hw_starts, 1);

        device.disable();
        device.enable().unwrap();
        assert!(device.is_enabled());
        assert_eq!(device.memory().outstanding(), 16);
    }

    #[test]
    fn test_enable_fails_cleanly_without_buffers() {
        let mut memory = TestMemory::new();
        memory.set_buffer_limit(Some(4));
        let mut device = Device::new(
            FakeRegs::new(),
            TestChip::default(),
            memory,
            RecordingUpstream::default(),
            small_config(),
        )
        .unwrap();

        assert!(matches!(device.enable(), Err(NicError::BufferExhausted)));
        assert!(!device.is_enabled());
        assert_eq!(device.memory().outstanding(), 0);
        assert_eq!(device.memory().regions(), 0);
    }

    #[test]
    fn test_rx_filters() {
        let mut device = enabled_device(small_config(), ChipVersion::Rtl8106e);
        let group = MacAddress::new([0x01, 0x00, 0x5e, 0x00, 0x00, 0x01]);
        device.set_multicast_list(&[group]);

        let expected = MulticastFilter::from_addresses(&[group], 32).register_words();
        let regs = device.registers();
        assert_eq!((regs.read32(regs::MAR0), regs.read32(regs::MAR1)), expected);
        assert_eq!(regs.read32(regs::RX_CONFIG) & regs::ACCEPT_ALL_PHYS, 0);

        device.set_promiscuous(true);
        let regs = device.registers();
        assert_ne!(regs.read32(regs::RX_CONFIG) & regs::ACCEPT_ALL_PHYS, 0);
        assert_eq!(regs.read32(regs::MAR0), u32::MAX);

        device.set_promiscuous(false);
        device.set_multicast_mode(true);
        let regs = device.registers();
        assert_eq!(regs.read32(regs::RX_CONFIG) & regs::ACCEPT_ALL_PHYS, 0);
        assert_eq!(regs.read32(regs::MAR1), u32::MAX);
    }

    #[test]
    fn test_checksum_support() {
        let config = DriverConfig {
            enable_cso6: true,
            ..small_config()
        };
        let modern = enabled_device(config.clone(), ChipVersion::Rtl8106e);
        assert!(modern
            .checksum_support(ChecksumDirection::Output)
            .contains(ChecksumFlags::UDP_IPV6));

        let legacy = enabled_device(config, ChipVersion::Rtl8101e);
        let input = legacy.checksum_support(ChecksumDirection::Input);
        assert!(input.contains(ChecksumFlags::TCP | ChecksumFlags::IP));
        assert!(!input.contains(ChecksumFlags::TCP_IPV6));
        assert!(!legacy
            .checksum_support(ChecksumDirection::Output)
            .contains(ChecksumFlags::TCP_IPV6));
    }

    #[test]
    fn test_medium_and_mac() {
        let mut device = enabled_device(small_config(), ChipVersion::Rtl8106e);
        device.select_medium(Medium::Full100);
        assert_eq!(device.chip().speeds.last(), Some(&Medium::Full100));

        let mac = MacAddress::new([0x02, 0, 0, 0, 0, 0x42]);
        device.set_mac_address(mac);
        assert_eq!(device.mac_address(), mac);
        assert_ne!(device.permanent_mac_address(), mac);
        assert_eq!(device.registers().read32(regs::MAC0), 0x0000_0002);
        assert_eq!(device.max_packet_size(), 1518);
        assert!(device.features().contains(Features::MULTI_PAGES | Features::HW_VLAN));
        assert!(!device.features().contains(Features::TSO_IPV4));
    }
}
