#![cfg_attr(not(test), no_std)]

// Driver core for the Realtek RTL8100/8101E PCIe Fast Ethernet family
// Descriptor rings, transmit and receive paths, interrupt dispatch and the
// link/health monitor, on top of a register window and a DMA allocator

#[macro_use]
extern crate alloc;

pub mod buffer;
pub mod chip;
pub mod config;
pub mod descriptor;
pub mod device;
pub mod dma;
pub mod error;
pub mod filter;
pub mod interrupt;
pub mod link;
pub mod monitor;
pub mod pci;
pub mod phy;
pub mod regs;
pub mod ring;
pub mod rx;
pub mod stats;
pub mod tx;
pub mod upstream;
pub mod workloop;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use chip::{Capabilities, ChipSetup, ChipVersion, GenericChip};
pub use config::DriverConfig;
pub use device::{ChecksumDirection, Device, Features};
pub use dma::{DmaMemory, DmaRegion, HeapMemory, PacketBuffer, PhysAddr};
pub use error::NicError;
pub use filter::{MacAddress, MulticastFilter};
pub use interrupt::{InterruptOutcome, InterruptStatus};
pub use link::{Duplex, LinkSpeed, LinkState, LinkStatus, Medium};
pub use phy::{NicPhy, QueuedUpstream};
pub use regs::{Mmio, Registers};
pub use rx::RxPacket;
pub use stats::{Counters, Statistics, TallyCounters};
pub use tx::{ChecksumFlags, DropReason, IpFamily, Segmentation, TxOutcome, TxPacket};
pub use upstream::Upstream;
pub use workloop::{Task, WorkLoop};
