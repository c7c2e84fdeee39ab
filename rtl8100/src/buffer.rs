// Buffer bookkeeping for both rings
//
// Receive slots always hold exactly one buffer. Transmit slots hold the
// packet on the slot of its last segment; one reclaimed packet is kept
// back for a single cycle before being released.

use crate::dma::{DmaMemory, PacketBuffer, PhysAddr};
use crate::error::NicError;
use crate::tx::TxPacket;
use alloc::vec::Vec;

/// Buffers bound to receive descriptors, one per slot
pub struct RxSlots {
    buffers: Vec<PacketBuffer>,
    buffer_size: usize,
}

impl RxSlots {
    /// Allocate `count` buffers of `buffer_size` bytes.
    ///
    /// On exhaustion every buffer obtained so far is returned to `memory`.
    pub fn allocate(
        memory: &mut dyn DmaMemory,
        count: usize,
        buffer_size: usize,
    ) -> Result<Self, NicError> {
        let mut buffers = Vec::with_capacity(count);

        for _ in 0..count {
            match memory.alloc_buffer(buffer_size) {
                Some(buffer) => buffers.push(buffer),
                None => {
                    for buffer in buffers.drain(..) {
                        memory.recycle(buffer);
                    }
                    return Err(NicError::BufferExhausted);
                }
            }
        }

        Ok(Self {
            buffers,
            buffer_size,
        })
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn phys(&self, index: usize) -> PhysAddr {
        self.buffers[index].phys()
    }

    /// Bind `replacement` to `index`, returning the buffer it displaces.
    pub fn swap(&mut self, index: usize, replacement: PacketBuffer) -> PacketBuffer {
        core::mem::replace(&mut self.buffers[index], replacement)
    }

    #[cfg(test)]
    pub(crate) fn buffer_mut(&mut self, index: usize) -> &mut PacketBuffer {
        &mut self.buffers[index]
    }

    /// Return every bound buffer to `memory`.
    pub fn release(self, memory: &mut dyn DmaMemory) {
        for buffer in self.buffers {
            memory.recycle(buffer);
        }
    }
}

/// Packets queued on the transmit ring, plus the deferred-free packet
pub struct TxSlots {
    packets: Vec<Option<TxPacket>>,
    deferred: Option<TxPacket>,
}

impl TxSlots {
    pub fn new(count: usize) -> Self {
        let mut packets = Vec::with_capacity(count);
        packets.resize_with(count, || None);
        Self {
            packets,
            deferred: None,
        }
    }

    pub fn bind(&mut self, index: usize, packet: TxPacket) {
        debug_assert!(self.packets[index].is_none());
        self.packets[index] = Some(packet);
    }

    #[cfg(test)]
    pub(crate) fn is_bound(&self, index: usize) -> bool {
        self.packets[index].is_some()
    }

    /// Move the content of a reclaimed slot into the deferred position,
    /// releasing whatever was deferred before.
    pub fn retire(&mut self, index: usize, memory: &mut dyn DmaMemory) {
        let reclaimed = self.packets[index].take();
        if let Some(previous) = core::mem::replace(&mut self.deferred, reclaimed) {
            previous.release(memory);
        }
    }

    pub fn has_deferred(&self) -> bool {
        self.deferred.is_some()
    }

    pub fn release_deferred(&mut self, memory: &mut dyn DmaMemory) {
        if let Some(packet) = self.deferred.take() {
            packet.release(memory);
        }
    }

    /// Release every queued packet and the deferred one. Returns how many
    /// queued packets were dropped.
    pub fn release_all(&mut self, memory: &mut dyn DmaMemory) -> usize {
        let mut dropped = 0;
        for slot in self.packets.iter_mut() {
            if let Some(packet) = slot.take() {
                packet.release(memory);
                dropped += 1;
            }
        }
        self.release_deferred(memory);
        dropped
    }
}
