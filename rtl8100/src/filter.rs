// Station address and multicast hash filtering

use core::fmt;

const ETHER_CRC_POLY: u32 = 0x04c1_1db7;

/// 48-bit Ethernet station address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

/// Big-endian Ethernet CRC-32 as used by the hardware multicast hash.
///
/// Bits are consumed LSB first; no final inversion.
pub fn ether_crc(data: &[u8]) -> u32 {
    let mut crc: u32 = 0xffff_ffff;

    for &octet in data {
        let mut current = octet;
        for _ in 0..8 {
            let msb = crc >> 31;
            crc <<= 1;
            if msb ^ (current as u32 & 1) != 0 {
                crc ^= ETHER_CRC_POLY;
            }
            current >>= 1;
        }
    }

    crc
}

/// 64-bit multicast hash filter as laid out in MAR0..MAR7
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MulticastFilter(u64);

impl MulticastFilter {
    pub const ACCEPT_ALL: Self = Self(u64::MAX);

    /// Build a filter from a list of group addresses.
    ///
    /// Lists longer than `limit` accept every multicast frame.
    pub fn from_addresses(addrs: &[MacAddress], limit: usize) -> Self {
        if addrs.len() > limit {
            return Self::ACCEPT_ALL;
        }

        let mut filter = 0u64;
        for addr in addrs {
            let bit = ether_crc(addr.as_bytes()) >> 26;
            filter |= 1u64 << bit;
        }
        Self(filter)
    }

    pub fn bits(&self) -> u64 {
        self.0
    }

    /// Register values for MAR0 and MAR1.
    pub fn register_words(&self) -> (u32, u32) {
        let swapped = self.0.swap_bytes();
        (swapped as u32, (swapped >> 32) as u32)
    }
}

/// Receive acceptance mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RxMode {
    pub promiscuous: bool,
    pub all_multicast: bool,
    pub filter: MulticastFilter,
}

impl RxMode {
    /// Accept bits for RxConfig and the filter to load into MAR0/MAR1.
    pub fn accept_bits(&self) -> (u32, MulticastFilter) {
        use crate::regs::{ACCEPT_ALL_PHYS, ACCEPT_BROADCAST, ACCEPT_MULTICAST, ACCEPT_MY_PHYS};

        let mut accept = ACCEPT_BROADCAST | ACCEPT_MULTICAST | ACCEPT_MY_PHYS;
        let mut filter = self.filter;

        if self.promiscuous {
            accept |= ACCEPT_ALL_PHYS;
            filter = MulticastFilter::ACCEPT_ALL;
        } else if self.all_multicast {
            filter = MulticastFilter::ACCEPT_ALL;
        }

        (accept, filter)
    }
}
