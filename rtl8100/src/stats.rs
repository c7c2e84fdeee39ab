// Hardware tally counters and driver-maintained counters

use crate::dma::DmaRegion;

/// Size of the block the NIC writes on a counter dump.
pub const TALLY_SIZE: usize = 64;

/// The tally block must be 64-byte aligned.
pub const TALLY_ALIGN: usize = 64;

/// Snapshot of the NIC's hardware counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TallyCounters {
    pub tx_packets: u64,
    pub rx_packets: u64,
    pub tx_errors: u64,
    pub rx_errors: u32,
    pub rx_missed: u16,
    pub align_errors: u16,
    pub tx_one_collision: u32,
    pub tx_multi_collision: u32,
    pub rx_unicast: u64,
    pub rx_broadcast: u64,
    pub rx_multicast: u32,
    pub tx_aborted: u16,
    pub tx_underrun: u16,
}

impl TallyCounters {
    /// Decode the little-endian dump layout.
    pub fn parse(raw: &[u8; TALLY_SIZE]) -> Self {
        let u64_at = |off: usize| {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&raw[off..off + 8]);
            u64::from_le_bytes(bytes)
        };
        let u32_at = |off: usize| u32::from_le_bytes([raw[off], raw[off + 1], raw[off + 2], raw[off + 3]]);
        let u16_at = |off: usize| u16::from_le_bytes([raw[off], raw[off + 1]]);

        Self {
            tx_packets: u64_at(0),
            rx_packets: u64_at(8),
            tx_errors: u64_at(16),
            rx_errors: u32_at(24),
            rx_missed: u16_at(28),
            align_errors: u16_at(30),
            tx_one_collision: u32_at(32),
            tx_multi_collision: u32_at(36),
            rx_unicast: u64_at(40),
            rx_broadcast: u64_at(48),
            rx_multicast: u32_at(56),
            tx_aborted: u16_at(60),
            tx_underrun: u16_at(62),
        }
    }

    /// Read a completed dump out of the tally region.
    pub fn read_from(region: &DmaRegion) -> Self {
        let mut raw = [0u8; TALLY_SIZE];
        region.read_bytes(0, &mut raw);
        Self::parse(&raw)
    }
}

/// Counters maintained by the driver itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Counters {
    pub tx_interrupts: u64,
    pub tx_resource_errors: u64,
    pub tx_dropped: u64,
    pub tx_timeouts: u64,
    pub tx_resets: u64,
    pub tx_stalls: u64,
    pub rx_frame_too_long: u64,
    pub rx_length_errors: u64,
    pub rx_resource_errors: u64,
    pub rx_delivered: u64,
    pub pci_errors: u64,
    pub reset_timeouts: u64,
}

/// Interface statistics as reported upstream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NetStats {
    pub input_packets: u64,
    pub input_errors: u64,
    pub output_packets: u64,
    pub output_errors: u64,
    pub collisions: u64,
}

/// Ethernet-specific statistics as reported upstream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EtherStats {
    pub single_collision_frames: u64,
    pub multiple_collision_frames: u64,
    pub alignment_errors: u64,
    pub missed_frames: u64,
    pub underruns: u64,
    pub aborted_transmits: u64,
    pub frame_too_longs: u64,
    pub resource_errors: u64,
    pub timeouts: u64,
    pub resets: u64,
    pub tx_interrupts: u64,
}

/// Everything the driver knows about traffic on this interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Statistics {
    pub counters: Counters,
    pub tally: TallyCounters,
}

impl Statistics {
    pub fn net(&self) -> NetStats {
        NetStats {
            input_packets: self.tally.rx_packets,
            input_errors: self.tally.rx_errors as u64,
            output_packets: self.tally.tx_packets,
            output_errors: self.tally.tx_errors,
            collisions: self.tally.tx_one_collision as u64 + self.tally.tx_multi_collision as u64,
        }
    }

    pub fn ether(&self) -> EtherStats {
        EtherStats {
            single_collision_frames: self.tally.tx_one_collision as u64,
            multiple_collision_frames: self.tally.tx_multi_collision as u64,
            alignment_errors: self.tally.align_errors as u64,
            missed_frames: self.tally.rx_missed as u64,
            underruns: self.tally.tx_underrun as u64,
            aborted_transmits: self.tally.tx_aborted as u64,
            frame_too_longs: self.counters.rx_frame_too_long,
            resource_errors: self.counters.rx_resource_errors + self.counters.tx_resource_errors,
            timeouts: self.counters.tx_timeouts,
            resets: self.counters.tx_resets,
            tx_interrupts: self.counters.tx_interrupts,
        }
    }
}
