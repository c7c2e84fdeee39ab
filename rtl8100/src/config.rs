// Driver configuration
//
// Tunables fixed at device creation. Ring sizes, the per-packet segment
// limit and the health-monitor thresholds live here so that hosts and
// tests can shrink them without touching the data path.

use crate::error::NicError;
use crate::link::Medium;
use alloc::format;
use serde::{Deserialize, Serialize};

/// Upper bound on `max_segments`; the scatter scratch list is sized by it.
pub const MAX_SEGMENTS_LIMIT: usize = 64;

/// Largest length the 13-bit descriptor length field can carry.
pub const MAX_DESCRIPTOR_LEN: usize = 0x1fff;

/// Standard Ethernet frame without FCS.
pub const ETH_FRAME_LEN: usize = 1514;

/// Configuration for one RTL8100 device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Number of transmit descriptors (power of two)
    pub tx_ring_size: usize,
    /// Number of receive descriptors (power of two)
    pub rx_ring_size: usize,
    /// Maximum scatter segments per transmitted packet
    pub max_segments: usize,
    /// Size of every receive buffer in bytes
    pub rx_buffer_size: usize,
    /// Health monitor period
    pub tick_interval_ms: u32,
    /// Ticks without TX progress before a manual reclaim is attempted
    pub tx_check_threshold: u32,
    /// Ticks without TX progress before the chip is reset
    pub tx_deadlock_threshold: u32,
    /// Raw value for the IntrMitigate register
    pub interrupt_mitigation: u16,
    /// Advertise TCP segmentation offload for IPv4
    pub enable_tso4: bool,
    /// Advertise IPv6 TCP/UDP transmit checksum offload
    pub enable_cso6: bool,
    /// Multicast addresses accepted before falling back to all-multicast
    pub multicast_filter_limit: usize,
    /// Initial medium selection
    pub medium: Medium,
    /// MTU reported to the network stack
    pub mtu: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            tx_ring_size: 1024,
            rx_ring_size: 512,
            max_segments: 24,
            rx_buffer_size: 2048,
            tick_interval_ms: 1000,
            tx_check_threshold: 2,
            tx_deadlock_threshold: 3,
            interrupt_mitigation: 0,
            enable_tso4: false,
            enable_cso6: false,
            multicast_filter_limit: 32,
            medium: Medium::Auto,
            mtu: 1500,
        }
    }
}

impl DriverConfig {
    /// Check the configuration for values the hardware or the ring
    /// arithmetic cannot work with.
    ///
    /// # Returns
    /// * `Ok(())` - Configuration is usable
    /// * `Err(NicError::InvalidConfig)` - Describes the first offending field
    pub fn validate(&self) -> Result<(), NicError> {
        for (name, size) in [("tx_ring_size", self.tx_ring_size), ("rx_ring_size", self.rx_ring_size)] {
            if size < 4 || !size.is_power_of_two() {
                return Err(NicError::InvalidConfig(format!(
                    "{} must be a power of two >= 4, got {}",
                    name, size
                )));
            }
        }

        if self.max_segments == 0 || self.max_segments > MAX_SEGMENTS_LIMIT {
            return Err(NicError::InvalidConfig(format!(
                "max_segments must be in 1..={}, got {}",
                MAX_SEGMENTS_LIMIT, self.max_segments
            )));
        }

        // A packet of max_segments must be able to fit while one slot stays free.
        if self.max_segments + 1 >= self.tx_ring_size {
            return Err(NicError::InvalidConfig(format!(
                "tx_ring_size {} too small for {} segments",
                self.tx_ring_size, self.max_segments
            )));
        }

        if self.rx_buffer_size < self.max_frame_size() || self.rx_buffer_size > MAX_DESCRIPTOR_LEN {
            return Err(NicError::InvalidConfig(format!(
                "rx_buffer_size must be in {}..={}, got {}",
                self.max_frame_size(),
                MAX_DESCRIPTOR_LEN,
                self.rx_buffer_size
            )));
        }

        if self.tx_check_threshold == 0 || self.tx_check_threshold >= self.tx_deadlock_threshold {
            return Err(NicError::InvalidConfig(format!(
                "tx_check_threshold {} must be nonzero and below tx_deadlock_threshold {}",
                self.tx_check_threshold, self.tx_deadlock_threshold
            )));
        }

        if self.tick_interval_ms == 0 {
            return Err(NicError::InvalidConfig("tick_interval_ms must be nonzero".into()));
        }

        Ok(())
    }

    /// Largest frame on the wire: MTU plus Ethernet header and FCS.
    pub fn max_frame_size(&self) -> usize {
        self.mtu + 14 + 4
    }
}
