// PCI configuration space access and bus error acknowledgment

/// Realtek vendor ID
pub const REALTEK_VENDOR_ID: u16 = 0x10EC;

/// Device ID shared by the RTL8101E/8102E/8103E/8105E/8106E family
pub const RTL8101_DEVICE_ID: u16 = 0x8136;

// Configuration space offsets
pub const PCI_COMMAND: u8 = 0x04;
pub const PCI_STATUS: u8 = 0x06;

// Command register bits
pub const COMMAND_PARITY_RESPONSE: u16 = 0x0040;
pub const COMMAND_SERR_ENABLE: u16 = 0x0100;

// Status register bits
pub const STATUS_SIGNALED_TARGET_ABORT: u16 = 0x0800;
pub const STATUS_RECEIVED_TARGET_ABORT: u16 = 0x1000;
pub const STATUS_RECEIVED_MASTER_ABORT: u16 = 0x2000;
pub const STATUS_SIGNALED_SYSTEM_ERROR: u16 = 0x4000;
pub const STATUS_DETECTED_PARITY_ERROR: u16 = 0x8000;

const STATUS_ERROR_BITS: u16 = STATUS_DETECTED_PARITY_ERROR
    | STATUS_SIGNALED_SYSTEM_ERROR
    | STATUS_RECEIVED_MASTER_ABORT
    | STATUS_RECEIVED_TARGET_ABORT
    | STATUS_SIGNALED_TARGET_ABORT;

/// Whether a vendor/device pair is driven by this crate.
pub fn is_supported_device(vendor_id: u16, device_id: u16) -> bool {
    vendor_id == REALTEK_VENDOR_ID && device_id == RTL8101_DEVICE_ID
}

/// Access to one function's configuration space
pub trait PciConfigSpace {
    fn read32(&self, offset: u8) -> u32;
    fn write32(&mut self, offset: u8, value: u32);

    fn read16(&self, offset: u8) -> u16 {
        let dword = self.read32(offset & 0xFC);
        if offset & 2 == 0 {
            (dword & 0xFFFF) as u16
        } else {
            (dword >> 16) as u16
        }
    }

    fn write16(&mut self, offset: u8, value: u16) {
        let aligned = offset & 0xFC;
        let dword = self.read32(aligned);
        let dword = if offset & 2 == 0 {
            (dword & 0xFFFF_0000) | value as u32
        } else {
            (dword & 0x0000_FFFF) | ((value as u32) << 16)
        };
        self.write32(aligned, dword);
    }
}

/// Re-arm error reporting and clear latched bus errors after a system error.
///
/// # Returns
/// The status register value that was latched before clearing.
pub fn acknowledge_bus_error(config: &mut dyn PciConfigSpace) -> u16 {
    let command = config.read16(PCI_COMMAND) | COMMAND_SERR_ENABLE | COMMAND_PARITY_RESPONSE;
    config.write16(PCI_COMMAND, command);

    let status = config.read16(PCI_STATUS);
    // Status error bits are write-1-to-clear.
    config.write16(PCI_STATUS, status & STATUS_ERROR_BITS);
    status
}

/// Legacy port-I/O configuration mechanism (0xCF8/0xCFC)
#[cfg(target_arch = "x86_64")]
#[derive(Debug, Clone, Copy)]
pub struct PortConfigSpace {
    pub bus: u8,
    pub device: u8,
    pub function: u8,
}

#[cfg(target_arch = "x86_64")]
impl PortConfigSpace {
    pub fn new(bus: u8, device: u8, function: u8) -> Self {
        Self {
            bus,
            device,
            function,
        }
    }

    fn address(&self, offset: u8) -> u32 {
        (1u32 << 31)
            | ((self.bus as u32) << 16)
            | ((self.device as u32) << 11)
            | ((self.function as u32) << 8)
            | (offset as u32 & 0xFC)
    }
}

#[cfg(target_arch = "x86_64")]
impl PciConfigSpace for PortConfigSpace {
    fn read32(&self, offset: u8) -> u32 {
        use x86_64::instructions::port::Port;

        // SAFETY: 0xCF8/0xCFC are the configuration mechanism #1 ports.
        unsafe {
            Port::<u32>::new(0xCF8).write(self.address(offset));
            Port::<u32>::new(0xCFC).read()
        }
    }

    fn write32(&mut self, offset: u8, value: u32) {
        use x86_64::instructions::port::Port;

        // SAFETY: as for `read32`.
        unsafe {
            Port::<u32>::new(0xCF8).write(self.address(offset));
            Port::<u32>::new(0xCFC).write(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakePci;

    #[test]
    fn test_supported_device() {
        assert!(is_supported_device(0x10EC, 0x8136));
        assert!(!is_supported_device(0x10EC, 0x8168));
        assert!(!is_supported_device(0x1AF4, 0x1000));
    }

    #[test]
    fn test_word_access_within_dword() {
        let mut pci = FakePci::default();
        pci.write32(0x3C, 0xabcd_0007);
        assert_eq!(pci.read16(0x3C), 0x0007);
        assert_eq!(pci.read16(0x3E), 0xabcd);

        pci.write16(0x3E, 0x1234);
        assert_eq!(pci.read32(0x3C), 0x1234_0007);
    }

    #[test]
    fn test_acknowledge_bus_error() {
        let mut pci = FakePci::default();
        let latched = (STATUS_SIGNALED_SYSTEM_ERROR | 0x0010) as u32;
        pci.write32(PCI_COMMAND, (latched << 16) | 0x0007);

        assert_eq!(acknowledge_bus_error(&mut pci), STATUS_SIGNALED_SYSTEM_ERROR | 0x0010);
        assert_eq!(
            pci.read16(PCI_COMMAND),
            0x0007 | COMMAND_SERR_ENABLE | COMMAND_PARITY_RESPONSE
        );
        assert_eq!(pci.status_clears, vec![STATUS_SIGNALED_SYSTEM_ERROR]);
        assert_eq!(pci.read16(PCI_STATUS), 0x0010);
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn test_port_address_encoding() {
        let cfg = PortConfigSpace::new(1, 2, 3);
        assert_eq!(cfg.address(0x06), 0x8001_1304);
    }
}
