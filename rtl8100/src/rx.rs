// Receive path.
//
// Every receive descriptor is armed with a buffer. When the NIC hands a
// descriptor back, the frame is delivered upstream only if a
// replacement buffer can be bound to the slot; otherwise the frame is
// dropped and the slot is re-armed with the buffer it already had, so
// the ring never runs dry.

use crate::buffer::RxSlots;
use crate::descriptor::{FIRST_FRAG, LAST_FRAG, RX_LEN_MASK};
use crate::dma::{DmaMemory, DmaRegion, PacketBuffer};
use crate::error::NicError;
use crate::ring::DescriptorRing;
use crate::stats::Counters;
use crate::tx::ChecksumFlags;
use crate::upstream::Upstream;
use log::debug;

// opts1 status, legacy encoding
pub const RX_PROTO_MASK: u32 = 3 << 17;
pub const RX_PROTO_UDP: u32 = 1 << 17;
pub const RX_PROTO_TCP: u32 = 2 << 17;
pub const RX_PROTO_IP: u32 = 3 << 17;

// opts1 status, second encoding
pub const RX_TCPT: u32 = 1 << 17;
pub const RX_UDPT: u32 = 1 << 18;

// opts1 checksum failure bits, both encodings
pub const RX_IPF: u32 = 1 << 16;
pub const RX_UDPF: u32 = 1 << 15;
pub const RX_TCPF: u32 = 1 << 14;

// opts2 status
pub const RX_VLAN_TAG: u32 = 1 << 16;
pub const RX_V4F: u32 = 1 << 30;
pub const RX_V6F: u32 = 1 << 31;

/// Frame check sequence appended by the NIC
pub const CRC_LEN: usize = 4;

/// A received frame, FCS stripped
#[derive(Debug)]
pub struct RxPacket {
    buffer: PacketBuffer,
    checksums: ChecksumFlags,
    vlan: Option<u16>,
}

impl RxPacket {
    pub fn data(&self) -> &[u8] {
        self.buffer.as_slice()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Checksums the NIC verified as correct
    pub fn checksums(&self) -> ChecksumFlags {
        self.checksums
    }

    pub fn vlan(&self) -> Option<u16> {
        self.vlan
    }

    pub fn into_buffer(self) -> PacketBuffer {
        self.buffer
    }
}

/// Work done by one receive scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RxSummary {
    pub delivered: usize,
    pub dropped: usize,
}

/// Decode the checksum verdict of a received frame.
pub fn rx_checksums(opts1: u32, opts2: u32, checksum_v2: bool) -> ChecksumFlags {
    if !checksum_v2 {
        return match opts1 & RX_PROTO_MASK {
            RX_PROTO_TCP if opts1 & (RX_IPF | RX_TCPF) == 0 => ChecksumFlags::TCP | ChecksumFlags::IP,
            RX_PROTO_UDP if opts1 & (RX_IPF | RX_UDPF) == 0 => ChecksumFlags::UDP | ChecksumFlags::IP,
            RX_PROTO_IP if opts1 & RX_IPF == 0 => ChecksumFlags::IP,
            _ => ChecksumFlags::empty(),
        };
    }

    let v4 = opts2 & RX_V4F != 0;
    let v6 = opts2 & RX_V6F != 0;

    if opts1 & RX_TCPT != 0 {
        if v4 && opts1 & (RX_IPF | RX_TCPF) == 0 {
            ChecksumFlags::TCP | ChecksumFlags::IP
        } else if v6 && opts1 & RX_TCPF == 0 {
            ChecksumFlags::TCP_IPV6
        } else {
            ChecksumFlags::empty()
        }
    } else if opts1 & RX_UDPT != 0 {
        if v4 && opts1 & (RX_IPF | RX_UDPF) == 0 {
            ChecksumFlags::UDP | ChecksumFlags::IP
        } else if v6 && opts1 & RX_UDPF == 0 {
            ChecksumFlags::UDP_IPV6
        } else {
            ChecksumFlags::empty()
        }
    } else if v4 && opts1 & RX_IPF == 0 {
        ChecksumFlags::IP
    } else {
        ChecksumFlags::empty()
    }
}

/// VLAN tag stripped by the NIC, if any.
pub fn rx_vlan(opts2: u32) -> Option<u16> {
    if opts2 & RX_VLAN_TAG == 0 {
        return None;
    }
    match ((opts2 & 0xffff) as u16).swap_bytes() {
        0 => None,
        tag => Some(tag),
    }
}

/// Receive ring with its bound buffers
pub struct RxRing {
    ring: DescriptorRing,
    slots: RxSlots,
    cursor: usize,
}

impl RxRing {
    /// Build a ring with every descriptor armed.
    pub fn new(
        region: DmaRegion,
        len: usize,
        buffer_size: usize,
        memory: &mut dyn DmaMemory,
    ) -> Result<Self, NicError> {
        let ring = DescriptorRing::new(region, len, memory)?;
        let slots = match RxSlots::allocate(memory, len, buffer_size) {
            Ok(slots) => slots,
            Err(e) => {
                memory.free_coherent(ring.into_region());
                return Err(e);
            }
        };

        let mut rx = Self {
            ring,
            slots,
            cursor: 0,
        };
        for index in 0..len {
            let opts1 = rx.arm_bits(index) | crate::descriptor::DESC_OWN;
            let addr = rx.slots.phys(index);
            rx.ring.prime(index, opts1, 0, addr);
        }
        Ok(rx)
    }

    pub fn ring(&self) -> &DescriptorRing {
        &self.ring
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Start the next scan at slot 0, matching the NIC after a chip reset.
    pub fn reset_cursor(&mut self) {
        self.cursor = 0;
    }

    fn arm_bits(&self, index: usize) -> u32 {
        self.ring.end_marker(index) | (self.slots.buffer_size() as u32 & RX_LEN_MASK)
    }

    fn rearm(&mut self, index: usize) {
        let opts1 = self.arm_bits(index);
        let addr = self.slots.phys(index);
        if let Some(desc) = self.ring.claim(index) {
            desc.publish(opts1, 0, addr);
        }
    }

    /// Process every descriptor the NIC has filled.
    pub fn scan(
        &mut self,
        checksum_v2: bool,
        memory: &mut dyn DmaMemory,
        upstream: &mut dyn Upstream,
        counters: &mut Counters,
    ) -> RxSummary {
        let mut summary = RxSummary::default();

        for _ in 0..self.ring.len() {
            let index = self.cursor;
            let fields = match self.ring.claim(index) {
                Some(desc) => desc.fields(),
                None => break,
            };

            if !fields.has(FIRST_FRAG | LAST_FRAG) {
                // Frame larger than one buffer.
                debug!("rtl8100: dropping fragmented frame at slot {}", index);
                counters.rx_frame_too_long += 1;
                summary.dropped += 1;
            } else {
                let raw_len = (fields.opts1 & RX_LEN_MASK) as usize;
                if raw_len <= CRC_LEN || raw_len - CRC_LEN > self.slots.buffer_size() {
                    debug!("rtl8100: bad frame length {} at slot {}", raw_len, index);
                    counters.rx_length_errors += 1;
                    summary.dropped += 1;
                } else if let Some(replacement) = memory.alloc_buffer(self.slots.buffer_size()) {
                    let mut buffer = self.slots.swap(index, replacement);
                    buffer.set_len(raw_len - CRC_LEN);
                    upstream.input(RxPacket {
                        buffer,
                        checksums: rx_checksums(fields.opts1, fields.opts2, checksum_v2),
                        vlan: rx_vlan(fields.opts2),
                    });
                    counters.rx_delivered += 1;
                    summary.delivered += 1;
                } else {
                    counters.rx_resource_errors += 1;
                    summary.dropped += 1;
                }
            }

            self.rearm(index);
            self.cursor = self.ring.wrap(index, 1);
        }

        if summary.delivered > 0 {
            upstream.flush_input();
        }
        summary
    }

    /// Return all buffers and the ring memory. The NIC must be stopped.
    pub fn release(mut self, memory: &mut dyn DmaMemory) -> DmaRegion {
        self.ring.reset(crate::ring::ResetMode::Hard);
        self.slots.release(memory);
        self.ring.into_region()
    }

    /// Let a test play the NIC: write a frame into `index` and return it.
    #[cfg(test)]
    pub(crate) fn device_fill(&mut self, index: usize, payload: &[u8], flags: u32, opts2: u32) {
        let buffer = self.slots.buffer_mut(index);
        buffer.storage_mut()[..payload.len()].copy_from_slice(payload);
        let opts1 = flags | ((payload.len() + CRC_LEN) as u32 & RX_LEN_MASK);
        self.ring.device_complete(index, opts1, opts2);
    }
}
