// Transmit path.
//
// Packets are split into scatter segments, encoded into consecutive
// descriptors and handed to the NIC with the first descriptor's OWN bit
// set last, so the NIC never sees a partially written packet. Completed
// descriptors are reclaimed from interrupt context; the packet of the
// most recently reclaimed slot is kept for one extra cycle before its
// buffers are released.

use crate::buffer::TxSlots;
use crate::chip::Capabilities;
use crate::config::{ETH_FRAME_LEN, MAX_DESCRIPTOR_LEN, MAX_SEGMENTS_LIMIT};
use crate::descriptor::{FIRST_FRAG, LAST_FRAG, TX_LEN_MASK};
use crate::dma::{DmaMemory, DmaRegion, PacketBuffer, PhysAddr};
use crate::error::NicError;
use crate::regs::{self, Registers};
use crate::ring::{DescriptorRing, ResetMode};
use crate::stats::Counters;
use crate::upstream::Upstream;
use alloc::vec;
use alloc::vec::Vec;
use bitflags::bitflags;
use log::{debug, warn};

// Legacy encoding, all in opts1
pub const TX_TCPCS: u32 = 1 << 16;
pub const TX_UDPCS: u32 = 1 << 17;
pub const TX_IPCS: u32 = 1 << 18;
pub const LARGE_SEND: u32 = 1 << 27;
pub const MSS_SHIFT: u32 = 16;
pub const MSS_MASK: u32 = 0x7ff;

// Second encoding, in opts2
pub const TX_IPV6_C: u32 = 1 << 28;
pub const TX_IPCS_C: u32 = 1 << 29;
pub const TX_TCPCS_C: u32 = 1 << 30;
pub const TX_UDPCS_C: u32 = 1 << 31;
pub const MSS_SHIFT_C: u32 = 18;
pub const L4_OFF_MASK: u32 = 0x3ff;
/// Transport header offset for untagged IPv6 frames without options.
pub const MIN_L4_HDR_OFFSET_V6: u32 = 54;

pub const TX_VLAN_TAG: u32 = 1 << 17;

/// Segments never cross a page, since physical contiguity ends there.
pub const PAGE_SIZE: u64 = 4096;

bitflags! {
    /// Checksum offload requested for, or verified on, a frame
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ChecksumFlags: u32 {
        const IP = 0x0001;
        const TCP = 0x0002;
        const UDP = 0x0004;
        const TCP_IPV6 = 0x0020;
        const UDP_IPV6 = 0x0040;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpFamily {
    V4,
    V6,
}

/// TCP segmentation offload request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segmentation {
    pub mss: u16,
    pub family: IpFamily,
}

/// A frame queued for transmission, possibly spread over several buffers
#[derive(Debug)]
pub struct TxPacket {
    fragments: Vec<PacketBuffer>,
    checksums: ChecksumFlags,
    segmentation: Option<Segmentation>,
    vlan: Option<u16>,
}

impl TxPacket {
    pub fn new(buffer: PacketBuffer) -> Self {
        Self::from_fragments(vec![buffer])
    }

    pub fn from_fragments(fragments: Vec<PacketBuffer>) -> Self {
        Self {
            fragments,
            checksums: ChecksumFlags::empty(),
            segmentation: None,
            vlan: None,
        }
    }

    pub fn with_checksum(mut self, checksums: ChecksumFlags) -> Self {
        self.checksums = checksums;
        self
    }

    pub fn with_segmentation(mut self, segmentation: Segmentation) -> Self {
        self.segmentation = Some(segmentation);
        self
    }

    pub fn with_vlan(mut self, tag: u16) -> Self {
        self.vlan = Some(tag);
        self
    }

    /// Total frame length
    pub fn len(&self) -> usize {
        self.fragments.iter().map(|f| f.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn fragments(&self) -> &[PacketBuffer] {
        &self.fragments
    }

    /// Return every buffer of the packet to `memory`.
    pub fn release(self, memory: &mut dyn DmaMemory) {
        for fragment in self.fragments {
            memory.recycle(fragment);
        }
    }

    /// Physical segments of the packet, split at page boundaries and at
    /// the descriptor length limit.
    pub fn scatter(
        &self,
        max_segments: usize,
        out: &mut heapless::Vec<Segment, MAX_SEGMENTS_LIMIT>,
    ) -> Result<(), DropReason> {
        out.clear();

        for fragment in &self.fragments {
            let mut addr = fragment.phys();
            let mut remaining = fragment.len() as u64;

            while remaining > 0 {
                let to_page_end = PAGE_SIZE - (addr % PAGE_SIZE);
                let len = remaining.min(to_page_end).min(MAX_DESCRIPTOR_LEN as u64);
                out.push(Segment {
                    addr,
                    len: len as u32,
                })
                .map_err(|_| DropReason::ScatterList)?;
                addr += len;
                remaining -= len;
            }
        }

        if out.is_empty() || out.len() > max_segments {
            return Err(DropReason::ScatterList);
        }
        Ok(())
    }
}

/// One physically contiguous piece of a packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub addr: PhysAddr,
    pub len: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Interface disabled or link down
    LinkDown,
    /// Packet is empty or needs more segments than allowed
    ScatterList,
    /// Requested offload cannot be encoded for this chip
    Offload,
}

/// Result of [`crate::device::Device::transmit`]
#[derive(Debug)]
pub enum TxOutcome {
    Queued,
    /// The ring is full; the packet is handed back untouched.
    Stalled(TxPacket),
    /// The packet was freed.
    Dropped(DropReason),
}

impl TxOutcome {
    pub fn is_queued(&self) -> bool {
        matches!(self, TxOutcome::Queued)
    }
}

/// Work done by one reclaim pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReclaimSummary {
    pub reclaimed: usize,
    pub resumed: bool,
}

/// Command bits for `opts1` and `opts2` of every descriptor of a packet.
pub fn command_bits(packet: &TxPacket, caps: &Capabilities) -> Result<(u32, u32), DropReason> {
    let mut opts1 = 0;
    let mut opts2 = 0;
    let mut checksums = packet.checksums;

    if let Some(segmentation) = packet.segmentation {
        if packet.len() <= ETH_FRAME_LEN {
            // Fits in one frame; let the checksum engine do the work.
            checksums = match segmentation.family {
                IpFamily::V4 => ChecksumFlags::TCP | ChecksumFlags::IP,
                IpFamily::V6 => ChecksumFlags::TCP_IPV6,
            };
        } else {
            let mss = segmentation.mss as u32;
            if segmentation.family != IpFamily::V4 || !caps.tso_ipv4 || mss == 0 || mss > MSS_MASK {
                return Err(DropReason::Offload);
            }

            if caps.checksum_v2 {
                opts1 |= LARGE_SEND;
                opts2 |= (mss << MSS_SHIFT_C) | TX_IPCS_C | TX_TCPCS_C;
            } else {
                opts1 |= LARGE_SEND | (mss << MSS_SHIFT);
            }
            checksums = ChecksumFlags::empty();
        }
    }

    if caps.checksum_v2 {
        if checksums.contains(ChecksumFlags::TCP) {
            opts2 |= TX_IPCS_C | TX_TCPCS_C;
        } else if checksums.contains(ChecksumFlags::UDP) {
            opts2 |= TX_IPCS_C | TX_UDPCS_C;
        } else if checksums.contains(ChecksumFlags::IP) {
            opts2 |= TX_IPCS_C;
        } else if checksums.contains(ChecksumFlags::TCP_IPV6) {
            opts2 |= TX_TCPCS_C | TX_IPV6_C | ((MIN_L4_HDR_OFFSET_V6 & L4_OFF_MASK) << MSS_SHIFT_C);
        } else if checksums.contains(ChecksumFlags::UDP_IPV6) {
            opts2 |= TX_UDPCS_C | TX_IPV6_C | ((MIN_L4_HDR_OFFSET_V6 & L4_OFF_MASK) << MSS_SHIFT_C);
        }
    } else if checksums.contains(ChecksumFlags::TCP) {
        opts1 |= TX_IPCS | TX_TCPCS;
    } else if checksums.contains(ChecksumFlags::UDP) {
        opts1 |= TX_IPCS | TX_UDPCS;
    } else if checksums.contains(ChecksumFlags::IP) {
        opts1 |= TX_IPCS;
    } else if checksums.intersects(ChecksumFlags::TCP_IPV6 | ChecksumFlags::UDP_IPV6) {
        return Err(DropReason::Offload);
    }

    if let Some(tag) = packet.vlan {
        opts2 |= tag.swap_bytes() as u32 | TX_VLAN_TAG;
    }

    Ok((opts1, opts2))
}

/// Transmit ring with its packets and stall state
pub struct TxRing {
    ring: DescriptorRing,
    slots: TxSlots,
    stalled: bool,
    completed: u64,
}

impl TxRing {
    pub fn new(region: DmaRegion, len: usize, memory: &mut dyn DmaMemory) -> Result<Self, NicError> {
        Ok(Self {
            ring: DescriptorRing::new(region, len, memory)?,
            slots: TxSlots::new(len),
            stalled: false,
            completed: 0,
        })
    }

    pub fn ring(&self) -> &DescriptorRing {
        &self.ring
    }

    #[cfg(test)]
    pub(crate) fn ring_mut(&mut self) -> &mut DescriptorRing {
        &mut self.ring
    }

    pub fn is_stalled(&self) -> bool {
        self.stalled
    }

    /// Clear the stall flag; returns `true` if it was set, meaning upstream
    /// must be serviced.
    pub fn take_stall(&mut self) -> bool {
        core::mem::replace(&mut self.stalled, false)
    }

    /// Descriptors completed since the ring was created
    pub fn completed(&self) -> u64 {
        self.completed
    }

    pub fn has_deferred(&self) -> bool {
        self.slots.has_deferred()
    }

    /// Queue `packet` on the ring and ring the doorbell.
    pub fn enqueue(
        &mut self,
        packet: TxPacket,
        caps: &Capabilities,
        max_segments: usize,
        regs: &mut dyn Registers,
        memory: &mut dyn DmaMemory,
        counters: &mut Counters,
    ) -> TxOutcome {
        if self.stalled {
            return TxOutcome::Stalled(packet);
        }

        let mut segments = heapless::Vec::new();
        if let Err(reason) = packet.scatter(max_segments, &mut segments) {
            debug!("rtl8100: dropping {} byte packet: {:?}", packet.len(), reason);
            counters.tx_resource_errors += 1;
            counters.tx_dropped += 1;
            packet.release(memory);
            return TxOutcome::Dropped(reason);
        }

        let (cmd1, opts2) = match command_bits(&packet, caps) {
            Ok(bits) => bits,
            Err(reason) => {
                debug!("rtl8100: dropping packet with unsupported offload");
                counters.tx_dropped += 1;
                packet.release(memory);
                return TxOutcome::Dropped(reason);
            }
        };

        let count = segments.len();
        let reservation = match self.ring.allocate(count) {
            Ok(reservation) => reservation,
            Err(_) => {
                self.stalled = true;
                counters.tx_stalls += 1;
                return TxOutcome::Stalled(packet);
            }
        };

        let encode = |ring: &DescriptorRing, offset: usize, segment: &Segment| {
            let index = ring.wrap(reservation.start, offset);
            let mut opts1 = cmd1 | ring.end_marker(index) | (segment.len & TX_LEN_MASK);
            if offset == 0 {
                opts1 |= FIRST_FRAG;
            }
            if offset == count - 1 {
                opts1 |= LAST_FRAG;
            }
            opts1
        };

        // Everything but the first descriptor goes to the NIC right away;
        // the NIC stops at the first one until it is handed over below.
        for (offset, segment) in segments.iter().enumerate().skip(1) {
            let opts1 = encode(&self.ring, offset, segment);
            self.ring
                .claim_reserved(&reservation, offset)
                .publish(opts1, opts2, segment.addr);
        }

        let last = self.ring.wrap(reservation.start, count - 1);
        self.slots.bind(last, packet);

        let opts1 = encode(&self.ring, 0, &segments[0]);
        self.ring
            .claim_reserved(&reservation, 0)
            .stage(opts1, opts2, segments[0].addr)
            .hand_to_hardware();

        regs.write8(regs::TX_POLL, regs::NPQ);
        TxOutcome::Queued
    }

    /// Reclaim descriptors the NIC has finished with.
    pub fn reclaim(
        &mut self,
        max_segments: usize,
        regs: &mut dyn Registers,
        memory: &mut dyn DmaMemory,
        upstream: &mut dyn Upstream,
        counters: &mut Counters,
    ) -> ReclaimSummary {
        let before = self.ring.dirty();
        let slots = &mut self.slots;
        let reclaimed = self.ring.release_completed(|index| slots.retire(index, memory));
        self.completed += reclaimed as u64;

        let mut resumed = false;
        if self.stalled && self.ring.free_count() > max_segments {
            self.stalled = false;
            upstream.service();
            resumed = true;
        }

        // Kick the NIC again in case it went idle with work queued.
        if self.ring.dirty() != before {
            regs.write8(regs::TX_POLL, regs::NPQ);
        }

        counters.tx_interrupts += 1;
        ReclaimSummary { reclaimed, resumed }
    }

    pub fn release_deferred(&mut self, memory: &mut dyn DmaMemory) {
        self.slots.release_deferred(memory);
    }

    /// Forget everything on the ring and free all queued packets.
    pub fn clear(&mut self, mode: ResetMode, memory: &mut dyn DmaMemory) {
        self.ring.reset(mode);
        let dropped = self.slots.release_all(memory);
        if dropped > 0 {
            warn!("rtl8100: dropped {} queued packets on ring reset", dropped);
        }
    }

    /// Free all packets and hand back the ring memory.
    pub fn release(mut self, memory: &mut dyn DmaMemory) -> DmaRegion {
        self.clear(ResetMode::Hard, memory);
        self.ring.into_region()
    }
}
