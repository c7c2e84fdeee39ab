// RTL8100 register map and register access

use core::ptr::NonNull;
use volatile::VolatilePtr;

// Register offsets
pub const MAC0: u16 = 0x00;
pub const MAC4: u16 = 0x04;
pub const MAR0: u16 = 0x08;
pub const MAR1: u16 = 0x0C;
pub const COUNTER_ADDR_LOW: u16 = 0x10;
pub const COUNTER_ADDR_HIGH: u16 = 0x14;
pub const TX_DESC_START_ADDR_LOW: u16 = 0x20;
pub const TX_DESC_START_ADDR_HIGH: u16 = 0x24;
pub const CHIP_CMD: u16 = 0x37;
pub const TX_POLL: u16 = 0x38;
pub const INTR_MASK: u16 = 0x3C;
pub const INTR_STATUS: u16 = 0x3E;
pub const TX_CONFIG: u16 = 0x40;
pub const RX_CONFIG: u16 = 0x44;
pub const CFG9346: u16 = 0x50;
pub const PHY_STATUS: u16 = 0x6C;
pub const RX_MAX_SIZE: u16 = 0xDA;
pub const CPLUS_CMD: u16 = 0xE0;
pub const INTR_MITIGATE: u16 = 0xE2;
pub const RX_DESC_ADDR_LOW: u16 = 0xE4;
pub const RX_DESC_ADDR_HIGH: u16 = 0xE8;
pub const MTPS: u16 = 0xEC;

/// Size of the register window mapped from BAR2.
pub const REGISTER_WINDOW: usize = 0x100;

// ChipCmd bits
pub const CMD_RESET: u8 = 0x10;
pub const CMD_RX_ENB: u8 = 0x08;
pub const CMD_TX_ENB: u8 = 0x04;

// TxPoll bits
pub const NPQ: u8 = 0x40;

// CounterAddrLow bits
pub const COUNTER_DUMP: u32 = 0x08;

// Cfg9346 values
pub const CFG9346_LOCK: u8 = 0x00;
pub const CFG9346_UNLOCK: u8 = 0xC0;

// CPlusCmd bits
pub const CPLUS_RX_VLAN: u16 = 1 << 6;
pub const CPLUS_RX_CHKSUM: u16 = 1 << 5;

// RxConfig bits
pub const ACCEPT_ALL_PHYS: u32 = 0x01;
pub const ACCEPT_MY_PHYS: u32 = 0x02;
pub const ACCEPT_MULTICAST: u32 = 0x04;
pub const ACCEPT_BROADCAST: u32 = 0x08;
pub const RX_CFG_DMA_SHIFT: u32 = 8;
pub const RX_DMA_BURST: u32 = 7;

// TxConfig bits
pub const TX_DMA_SHIFT: u32 = 8;
pub const TX_DMA_BURST: u32 = 6;
pub const TX_INTER_FRAME_GAP_SHIFT: u32 = 24;
pub const TX_INTER_FRAME_GAP: u32 = 0x03;

// MTPS value for chips without jumbo support
pub const MTPS_DEFAULT: u8 = 0x3F;

/// Access to the NIC's register window.
///
/// Offsets are byte offsets from the start of the window. Implementations
/// must perform each access exactly once and in program order.
pub trait Registers {
    fn read8(&self, offset: u16) -> u8;
    fn read16(&self, offset: u16) -> u16;
    fn read32(&self, offset: u16) -> u32;
    fn write8(&mut self, offset: u16, value: u8);
    fn write16(&mut self, offset: u16, value: u16);
    fn write32(&mut self, offset: u16, value: u32);
}

/// Memory-mapped register window
pub struct Mmio {
    base: NonNull<u8>,
}

// The window is owned exclusively by the device that holds it.
unsafe impl Send for Mmio {}

impl Mmio {
    /// Wrap a mapped register window
    ///
    /// # Safety
    /// `base` must point to at least [`REGISTER_WINDOW`] bytes of
    /// uncached device memory that stays mapped for the lifetime of the
    /// returned value, and no other code may access it concurrently.
    pub unsafe fn new(base: NonNull<u8>) -> Self {
        Self { base }
    }

    fn ptr<T>(&self, offset: u16) -> VolatilePtr<'_, T> {
        debug_assert!(offset as usize + core::mem::size_of::<T>() <= REGISTER_WINDOW);
        // SAFETY: the offset is inside the window promised by `new`.
        unsafe {
            let raw = self.base.as_ptr().add(offset as usize) as *mut T;
            VolatilePtr::new(NonNull::new_unchecked(raw))
        }
    }
}

impl Registers for Mmio {
    fn read8(&self, offset: u16) -> u8 {
        self.ptr::<u8>(offset).read()
    }

    fn read16(&self, offset: u16) -> u16 {
        u16::from_le(self.ptr::<u16>(offset).read())
    }

    fn read32(&self, offset: u16) -> u32 {
        u32::from_le(self.ptr::<u32>(offset).read())
    }

    fn write8(&mut self, offset: u16, value: u8) {
        self.ptr::<u8>(offset).write(value)
    }

    fn write16(&mut self, offset: u16, value: u16) {
        self.ptr::<u16>(offset).write(value.to_le())
    }

    fn write32(&mut self, offset: u16, value: u32) {
        self.ptr::<u32>(offset).write(value.to_le())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mmio_roundtrip_on_plain_memory() {
        let mut window = [0u8; REGISTER_WINDOW];
        let base = NonNull::new(window.as_mut_ptr()).unwrap();
        let mut regs = unsafe { Mmio::new(base) };

        regs.write32(TX_DESC_START_ADDR_LOW, 0xdead_beef);
        regs.write16(INTR_MASK, 0x8025);
        regs.write8(CHIP_CMD, CMD_RX_ENB | CMD_TX_ENB);

        assert_eq!(regs.read32(TX_DESC_START_ADDR_LOW), 0xdead_beef);
        assert_eq!(regs.read16(INTR_MASK), 0x8025);
        assert_eq!(regs.read8(CHIP_CMD), 0x0C);
        drop(regs);

        // Registers are little-endian on the bus.
        assert_eq!(&window[0x20..0x24], &[0xef, 0xbe, 0xad, 0xde]);
        assert_eq!(&window[0x3C..0x3E], &[0x25, 0x80]);
    }
}
