// Chip identification, capabilities and the revision-specific setup hooks

use crate::config::DriverConfig;
use crate::error::NicError;
use crate::filter::MacAddress;
use crate::interrupt::InterruptStatus;
use crate::link::{Medium, PhyStatus};
use crate::pci::PciConfigSpace;
use crate::regs::{self, Registers};
use core::fmt;

/// Number of ChipCmd polls while waiting for a soft reset to finish.
pub const RESET_POLL_ATTEMPTS: u32 = 1000;

/// Delay between two soft-reset polls.
pub const RESET_POLL_DELAY_US: u32 = 10;

/// Interrupts unmasked on every chip
const BASE_INTERRUPTS: InterruptStatus = InterruptStatus::SYS_ERR
    .union(InterruptStatus::RX_DESC_UNAVAIL)
    .union(InterruptStatus::TX_ERR)
    .union(InterruptStatus::TX_OK)
    .union(InterruptStatus::RX_ERR)
    .union(InterruptStatus::RX_OK);

/// Hardware revision bits in TxConfig.
const TX_CONFIG_VERSION_MASK: u32 = 0x7cf0_0000;

/// Chip family members handled by this driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChipVersion {
    Rtl8101e,
    Rtl8102e,
    Rtl8103e,
    Rtl8401,
    Rtl8105e,
    Rtl8402,
    Rtl8106e,
    Rtl8106eus,
}

impl ChipVersion {
    /// Decode the revision bits of the TxConfig register.
    ///
    /// Unknown revisions fall back to RTL8101E, the most conservative
    /// member of the family.
    pub fn from_tx_config(tx_config: u32) -> Self {
        match tx_config & TX_CONFIG_VERSION_MASK {
            0x3400_0000 | 0x3420_0000 | 0x2400_0000 => ChipVersion::Rtl8101e,
            0x2480_0000 => ChipVersion::Rtl8102e,
            0x3480_0000 => ChipVersion::Rtl8103e,
            0x24c0_0000 => ChipVersion::Rtl8401,
            0x4080_0000 => ChipVersion::Rtl8105e,
            0x4400_0000 => ChipVersion::Rtl8402,
            0x4480_0000 => ChipVersion::Rtl8106e,
            0x4490_0000 | 0x5490_0000 => ChipVersion::Rtl8106eus,
            other => {
                log::warn!(
                    "rtl8100: unknown chip revision {:#010x}, assuming RTL8101E",
                    other
                );
                ChipVersion::Rtl8101e
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ChipVersion::Rtl8101e => "RTL8101E",
            ChipVersion::Rtl8102e => "RTL8102E",
            ChipVersion::Rtl8103e => "RTL8103E",
            ChipVersion::Rtl8401 => "RTL8401",
            ChipVersion::Rtl8105e => "RTL8105E",
            ChipVersion::Rtl8402 => "RTL8402",
            ChipVersion::Rtl8106e => "RTL8106E",
            ChipVersion::Rtl8106eus => "RTL8106EUS",
        }
    }

    /// Whether the chip uses the second descriptor offload encoding.
    pub fn uses_checksum_v2(&self) -> bool {
        !matches!(self, ChipVersion::Rtl8101e)
    }

    fn is_late_generation(&self) -> bool {
        matches!(
            self,
            ChipVersion::Rtl8105e | ChipVersion::Rtl8402 | ChipVersion::Rtl8106e | ChipVersion::Rtl8106eus
        )
    }
}

impl fmt::Display for ChipVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Feature set resolved once from the chip version and the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub checksum_v2: bool,
    pub ipv6_tx_checksum: bool,
    pub tso_ipv4: bool,
    pub interrupt_mask: InterruptStatus,
    pub rx_max_size: u16,
    pub rx_config_mask: u32,
}

impl Capabilities {
    pub fn resolve(version: ChipVersion, config: &DriverConfig) -> Self {
        let checksum_v2 = version.uses_checksum_v2();
        // Legacy chips do not raise LinkChg reliably; the monitor polls PHYstatus anyway.
        let interrupt_mask = if checksum_v2 {
            BASE_INTERRUPTS | InterruptStatus::LINK_CHG
        } else {
            BASE_INTERRUPTS
        };

        Self {
            checksum_v2,
            ipv6_tx_checksum: checksum_v2 && config.enable_cso6,
            tso_ipv4: config.enable_tso4,
            interrupt_mask,
            rx_max_size: if version.is_late_generation() { 0x05F3 } else { 0x05EF },
            rx_config_mask: 0xff7e_1880,
        }
    }
}

/// Revision-specific chip programming.
///
/// The register sequences that differ between family members (PHY and
/// EPHY tables, OOB handshakes, PLL power, ASPM fixups) live behind this
/// trait. Every hook except [`ChipSetup::identify`] has a default that
/// performs only the steps common to the whole family.
pub trait ChipSetup {
    /// Determine the chip revision.
    fn identify(&mut self, regs: &mut dyn Registers) -> ChipVersion {
        ChipVersion::from_tx_config(regs.read32(regs::TX_CONFIG))
    }

    /// Busy-wait for `us` microseconds.
    fn delay_us(&mut self, us: u32) {
        for _ in 0..us.saturating_mul(100) {
            core::hint::spin_loop();
        }
    }

    /// Reset the MAC and wait for the chip to acknowledge.
    fn nic_reset(&mut self, regs: &mut dyn Registers) -> Result<(), NicError> {
        soft_reset(regs, |us| self.delay_us(us))
    }

    /// Bring the chip out of low-power state before the start sequence.
    fn power_up(&mut self, _regs: &mut dyn Registers) {}

    /// Revision register table, applied with Cfg9346 unlocked.
    fn hw_start(&mut self, _regs: &mut dyn Registers, _caps: &Capabilities) {}

    /// Put the chip into its lowest power state after disable.
    fn power_down(&mut self, _regs: &mut dyn Registers) {}

    /// Tuning applied when the link comes up.
    fn link_up_tuning(&mut self, _regs: &mut dyn Registers, _phy: PhyStatus) {}

    /// Tuning applied when the link goes down.
    fn link_down_tuning(&mut self, _regs: &mut dyn Registers) {}

    /// Program autonegotiation or forced speed/duplex into the PHY.
    fn set_speed(&mut self, _regs: &mut dyn Registers, _medium: Medium) {}

    /// Called once per monitor tick.
    fn periodic(&mut self, _regs: &mut dyn Registers) {}

    /// Write a station address into the receive address registers.
    fn set_mac_address(&mut self, regs: &mut dyn Registers, mac: &MacAddress) {
        let bytes = mac.as_bytes();
        regs.write8(regs::CFG9346, regs::CFG9346_UNLOCK);
        regs.write32(
            regs::MAC0,
            u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        );
        regs.write32(regs::MAC4, u32::from_le_bytes([bytes[4], bytes[5], 0, 0]));
        regs.write8(regs::CFG9346, regs::CFG9346_LOCK);
    }

    /// PCI configuration space of the device, if the platform exposes it.
    fn pci_config(&mut self) -> Option<&mut dyn PciConfigSpace> {
        None
    }
}

/// Issue a soft reset and spin until the chip clears the reset bit.
///
/// This is the only busy-wait in the driver: at most
/// [`RESET_POLL_ATTEMPTS`] polls, [`RESET_POLL_DELAY_US`] apart.
pub fn soft_reset(regs: &mut dyn Registers, mut delay_us: impl FnMut(u32)) -> Result<(), NicError> {
    regs.write8(regs::CHIP_CMD, regs::CMD_RESET);

    for _ in 0..RESET_POLL_ATTEMPTS {
        if regs.read8(regs::CHIP_CMD) & regs::CMD_RESET == 0 {
            return Ok(());
        }
        delay_us(RESET_POLL_DELAY_US);
    }

    Err(NicError::ResetTimeout(RESET_POLL_ATTEMPTS))
}

/// Family-generic setup with no revision tables.
///
/// Suitable for chips that come out of firmware already configured, and
/// for hosted testing.
#[derive(Debug, Default)]
pub struct GenericChip;

impl ChipSetup for GenericChip {}
