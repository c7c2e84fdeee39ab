// Fakes shared by the unit tests: a register file, a chip, memory with
// deterministic bus addresses, PCI config space and a recording upstream.

use crate::chip::{ChipSetup, ChipVersion};
use crate::config::DriverConfig;
use crate::device::Device;
use crate::dma::{DmaMemory, DmaRegion, HeapMemory, PacketBuffer, PhysAddr};
use crate::error::NicError;
use crate::link::{LinkState, Medium, PhyStatus, PHY_100BPS, PHY_FULL_DUP, PHY_LINK_STATUS};
use crate::pci::{PciConfigSpace, PCI_STATUS};
use crate::regs::{self, Registers};
use crate::rx::RxPacket;
use crate::upstream::Upstream;

/// Register file with the side effects the driver relies on
pub struct FakeRegs {
    file: [u8; regs::REGISTER_WINDOW],
    pub isr: u16,
    pub stuck_reset: bool,
    pub resets: usize,
    pub tx_polls: usize,
    pub mask_writes: Vec<u16>,
    pub status_acks: Vec<u16>,
}

impl FakeRegs {
    pub fn new() -> Self {
        Self {
            file: [0; regs::REGISTER_WINDOW],
            isr: 0,
            stuck_reset: false,
            resets: 0,
            tx_polls: 0,
            mask_writes: Vec::new(),
            status_acks: Vec::new(),
        }
    }

    pub fn set_phy(&mut self, value: u8) {
        self.file[regs::PHY_STATUS as usize] = value;
    }

    pub fn set_link(&mut self, up: bool) {
        self.set_phy(if up {
            PHY_LINK_STATUS | PHY_100BPS | PHY_FULL_DUP
        } else {
            0
        });
    }

    /// The NIC finished writing the tally block.
    pub fn finish_dump(&mut self) {
        let value = self.read32(regs::COUNTER_ADDR_LOW) & !regs::COUNTER_DUMP;
        self.store(regs::COUNTER_ADDR_LOW, &value.to_le_bytes());
    }

    fn store(&mut self, offset: u16, bytes: &[u8]) {
        let start = offset as usize;
        self.file[start..start + bytes.len()].copy_from_slice(bytes);
    }

    fn load<const N: usize>(&self, offset: u16) -> [u8; N] {
        let start = offset as usize;
        let mut out = [0u8; N];
        out.copy_from_slice(&self.file[start..start + N]);
        out
    }
}

impl Registers for FakeRegs {
    fn read8(&self, offset: u16) -> u8 {
        self.file[offset as usize]
    }

    fn read16(&self, offset: u16) -> u16 {
        if offset == regs::INTR_STATUS {
            return self.isr;
        }
        u16::from_le_bytes(self.load(offset))
    }

    fn read32(&self, offset: u16) -> u32 {
        u32::from_le_bytes(self.load(offset))
    }

    fn write8(&mut self, offset: u16, value: u8) {
        let value = match offset {
            regs::CHIP_CMD if value & regs::CMD_RESET != 0 => {
                self.resets += 1;
                if self.stuck_reset {
                    value
                } else {
                    value & !regs::CMD_RESET
                }
            }
            regs::TX_POLL => {
                self.tx_polls += 1;
                value
            }
            _ => value,
        };
        self.file[offset as usize] = value;
    }

    fn write16(&mut self, offset: u16, value: u16) {
        match offset {
            regs::INTR_STATUS => {
                self.status_acks.push(value);
                self.isr &= !value;
            }
            regs::INTR_MASK => {
                self.mask_writes.push(value);
                self.store(offset, &value.to_le_bytes());
            }
            _ => self.store(offset, &value.to_le_bytes()),
        }
    }

    fn write32(&mut self, offset: u16, value: u32) {
        self.store(offset, &value.to_le_bytes());
    }
}

/// Chip hooks that record what the driver asked for
#[derive(Default)]
pub struct TestChip {
    pub version: Option<ChipVersion>,
    pub pci: Option<FakePci>,
    pub power_ups: usize,
    pub power_downs: usize,
    pub hw_starts: usize,
    pub link_up_tunings: usize,
    pub link_down_tunings: usize,
    pub speeds: Vec<Medium>,
}

impl ChipSetup for TestChip {
    fn identify(&mut self, regs: &mut dyn Registers) -> ChipVersion {
        match self.version {
            Some(version) => version,
            None => ChipVersion::from_tx_config(regs.read32(regs::TX_CONFIG)),
        }
    }

    fn delay_us(&mut self, _us: u32) {}

    fn power_up(&mut self, _regs: &mut dyn Registers) {
        self.power_ups += 1;
    }

    fn hw_start(&mut self, _regs: &mut dyn Registers, _caps: &crate::chip::Capabilities) {
        self.hw_starts += 1;
    }

    fn power_down(&mut self, _regs: &mut dyn Registers) {
        self.power_downs += 1;
    }

    fn link_up_tuning(&mut self, _regs: &mut dyn Registers, _phy: PhyStatus) {
        self.link_up_tunings += 1;
    }

    fn link_down_tuning(&mut self, _regs: &mut dyn Registers) {
        self.link_down_tunings += 1;
    }

    fn set_speed(&mut self, _regs: &mut dyn Registers, medium: Medium) {
        self.speeds.push(medium);
    }

    fn pci_config(&mut self) -> Option<&mut dyn PciConfigSpace> {
        self.pci.as_mut().map(|pci| pci as &mut dyn PciConfigSpace)
    }
}

/// Configuration space with write-1-to-clear status semantics
pub struct FakePci {
    space: [u32; 64],
    pub status_clears: Vec<u16>,
}

impl Default for FakePci {
    fn default() -> Self {
        Self {
            space: [0; 64],
            status_clears: Vec::new(),
        }
    }
}

impl PciConfigSpace for FakePci {
    fn read32(&self, offset: u8) -> u32 {
        self.space[(offset >> 2) as usize]
    }

    fn write32(&mut self, offset: u8, value: u32) {
        self.space[(offset >> 2) as usize] = value;
    }

    fn write16(&mut self, offset: u8, value: u16) {
        let dword = self.read32(offset & 0xFC);
        let dword = if offset == PCI_STATUS {
            self.status_clears.push(value);
            dword & !((value as u32) << 16)
        } else if offset & 2 == 0 {
            (dword & 0xFFFF_0000) | value as u32
        } else {
            (dword & 0x0000_FFFF) | ((value as u32) << 16)
        };
        self.write32(offset & 0xFC, dword);
    }
}

/// Memory whose packet buffers sit at page-aligned, made-up bus addresses,
/// so scatter lists do not depend on where the host heap put them.
pub struct TestMemory {
    coherent: HeapMemory,
    regions: usize,
    buffer_limit: Option<usize>,
    outstanding: usize,
    next_phys: PhysAddr,
}

impl TestMemory {
    pub fn new() -> Self {
        Self {
            coherent: HeapMemory::new(),
            regions: 0,
            buffer_limit: None,
            outstanding: 0,
            next_phys: 0x1000_0000,
        }
    }

    pub fn set_buffer_limit(&mut self, limit: Option<usize>) {
        self.buffer_limit = limit;
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    /// Coherent regions not yet freed
    pub fn regions(&self) -> usize {
        self.regions
    }
}

impl DmaMemory for TestMemory {
    fn alloc_coherent(&mut self, size: usize, align: usize) -> Result<DmaRegion, NicError> {
        let region = self.coherent.alloc_coherent(size, align)?;
        self.regions += 1;
        Ok(region)
    }

    fn free_coherent(&mut self, region: DmaRegion) {
        self.regions -= 1;
        self.coherent.free_coherent(region)
    }

    fn alloc_buffer(&mut self, size: usize) -> Option<PacketBuffer> {
        if let Some(limit) = self.buffer_limit {
            if self.outstanding >= limit {
                return None;
            }
        }
        let phys = self.next_phys;
        let pages = (size as u64 + 0xfff) / 0x1000;
        self.next_phys += pages.max(1) * 0x1000;
        self.outstanding += 1;
        Some(PacketBuffer::new(vec![0u8; size].into_boxed_slice(), phys))
    }

    fn recycle(&mut self, _buffer: PacketBuffer) {
        self.outstanding -= 1;
    }
}

/// Upstream that records every callback
#[derive(Default)]
pub struct RecordingUpstream {
    pub delivered: Vec<RxPacket>,
    pub flushes: usize,
    pub services: usize,
    pub starts: usize,
    pub stops: usize,
    pub output_flushes: usize,
    pub links: Vec<LinkState>,
}

impl Upstream for RecordingUpstream {
    fn input(&mut self, packet: RxPacket) {
        self.delivered.push(packet);
    }

    fn flush_input(&mut self) {
        self.flushes += 1;
    }

    fn service(&mut self) {
        self.services += 1;
    }

    fn start_output(&mut self) {
        self.starts += 1;
    }

    fn stop_output(&mut self) {
        self.stops += 1;
    }

    fn flush_output(&mut self) {
        self.output_flushes += 1;
    }

    fn link_changed(&mut self, state: LinkState) {
        self.links.push(state);
    }
}

pub type TestDevice = Device<FakeRegs, TestChip, TestMemory, RecordingUpstream>;

/// Small rings so scenarios stay readable.
pub fn small_config() -> DriverConfig {
    DriverConfig {
        tx_ring_size: 64,
        rx_ring_size: 16,
        max_segments: 4,
        ..DriverConfig::default()
    }
}

/// An enabled device on a chip of `version`, link still down.
pub fn enabled_device(config: DriverConfig, version: ChipVersion) -> TestDevice {
    let chip = TestChip {
        version: Some(version),
        ..TestChip::default()
    };
    let mut device = Device::new(
        FakeRegs::new(),
        chip,
        TestMemory::new(),
        RecordingUpstream::default(),
        config,
    )
    .unwrap();
    device.enable().unwrap();
    device
}

/// An enabled device whose link came up on the first tick.
pub fn linked_device(config: DriverConfig) -> TestDevice {
    let mut device = enabled_device(config, ChipVersion::Rtl8106e);
    device.registers_mut().set_link(true);
    device.on_timer();
    assert!(device.link_state().is_up());
    device
}
