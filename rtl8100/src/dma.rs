// DMA memory: coherent regions for rings and counters, packet buffers for frames

use crate::error::NicError;
use alloc::alloc::{alloc_zeroed, dealloc, Layout};
use alloc::boxed::Box;
use alloc::format;
use alloc::vec;
use alloc::vec::Vec;
use core::ptr::NonNull;

/// Bus address as seen by the NIC
pub type PhysAddr = u64;

/// Physically contiguous, device-visible memory
///
/// Descriptor rings and the tally counter block live in regions. A region
/// must be handed back to the [`DmaMemory`] that produced it.
pub struct DmaRegion {
    virt: NonNull<u8>,
    phys: PhysAddr,
    size: usize,
    align: usize,
}

// A region is plain memory owned by whoever holds the value.
unsafe impl Send for DmaRegion {}

impl DmaRegion {
    /// Describe an already mapped region
    ///
    /// # Safety
    /// `virt` must be valid for reads and writes of `size` bytes for as
    /// long as the region is alive, aligned to `align`, and `phys` must be
    /// the bus address of the same memory.
    pub unsafe fn from_raw(virt: NonNull<u8>, phys: PhysAddr, size: usize, align: usize) -> Self {
        Self {
            virt,
            phys,
            size,
            align,
        }
    }

    pub fn phys(&self) -> PhysAddr {
        self.phys
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn align(&self) -> usize {
        self.align
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.virt.as_ptr()
    }

    /// Copy device-written bytes out of the region.
    pub fn read_bytes(&self, offset: usize, out: &mut [u8]) {
        assert!(offset + out.len() <= self.size);
        for (i, byte) in out.iter_mut().enumerate() {
            // SAFETY: bounds checked above; the region is valid for reads.
            *byte = unsafe { core::ptr::read_volatile(self.virt.as_ptr().add(offset + i)) };
        }
    }

    pub fn zero(&mut self) {
        for i in 0..self.size {
            // SAFETY: `i` is inside the region.
            unsafe { core::ptr::write_volatile(self.virt.as_ptr().add(i), 0) };
        }
    }
}

/// Host buffer that a single frame is received into or transmitted from
#[derive(Debug)]
pub struct PacketBuffer {
    data: Box<[u8]>,
    phys: PhysAddr,
    len: usize,
}

impl PacketBuffer {
    pub fn new(data: Box<[u8]>, phys: PhysAddr) -> Self {
        Self { data, phys, len: 0 }
    }

    pub fn phys(&self) -> PhysAddr {
        self.phys
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Number of valid bytes
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Set the number of valid bytes, clamped to the capacity.
    pub fn set_len(&mut self, len: usize) {
        self.len = len.min(self.data.len());
    }

    /// Valid bytes
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data[..self.len]
    }

    /// The whole backing storage, regardless of `len`
    pub fn storage_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Copy `payload` into the buffer and mark it valid.
    ///
    /// Returns `false` if the payload does not fit.
    pub fn fill(&mut self, payload: &[u8]) -> bool {
        if payload.len() > self.data.len() {
            return false;
        }
        self.data[..payload.len()].copy_from_slice(payload);
        self.len = payload.len();
        true
    }
}

/// Source of device-visible memory
pub trait DmaMemory {
    /// Allocate a zeroed coherent region.
    fn alloc_coherent(&mut self, size: usize, align: usize) -> Result<DmaRegion, NicError>;

    /// Return a region obtained from [`DmaMemory::alloc_coherent`].
    fn free_coherent(&mut self, region: DmaRegion);

    /// Allocate a packet buffer of at least `size` bytes, or `None` when
    /// the pool is exhausted.
    fn alloc_buffer(&mut self, size: usize) -> Option<PacketBuffer>;

    /// Return a packet buffer to the pool.
    fn recycle(&mut self, buffer: PacketBuffer);
}

/// Spare buffers kept for reuse.
const MAX_SPARE_BUFFERS: usize = 64;

/// Heap-backed memory for identity-mapped environments
///
/// Physical addresses are the virtual addresses, as in the moteOS UEFI
/// mapping. An optional limit on outstanding packet buffers models a
/// bounded pool.
#[derive(Default)]
pub struct HeapMemory {
    buffer_limit: Option<usize>,
    outstanding: usize,
    spares: Vec<PacketBuffer>,
}

impl HeapMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap the number of packet buffers that may be outstanding at once.
    pub fn with_buffer_limit(limit: usize) -> Self {
        Self {
            buffer_limit: Some(limit),
            ..Self::default()
        }
    }

    pub fn set_buffer_limit(&mut self, limit: Option<usize>) {
        self.buffer_limit = limit;
    }

    /// Packet buffers currently handed out
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }
}

impl DmaMemory for HeapMemory {
    fn alloc_coherent(&mut self, size: usize, align: usize) -> Result<DmaRegion, NicError> {
        let layout = Layout::from_size_align(size.max(1), align)
            .map_err(|e| NicError::DmaAllocation(format!("bad layout: {}", e)))?;

        // SAFETY: the layout has a nonzero size.
        let ptr = unsafe { alloc_zeroed(layout) };
        let virt = NonNull::new(ptr).ok_or_else(|| {
            NicError::DmaAllocation(format!("out of memory for {} bytes", size))
        })?;

        Ok(DmaRegion {
            virt,
            phys: ptr as PhysAddr,
            size,
            align,
        })
    }

    fn free_coherent(&mut self, region: DmaRegion) {
        if let Ok(layout) = Layout::from_size_align(region.size.max(1), region.align) {
            // SAFETY: the region came from `alloc_coherent` with this layout.
            unsafe { dealloc(region.virt.as_ptr(), layout) };
        }
    }

    fn alloc_buffer(&mut self, size: usize) -> Option<PacketBuffer> {
        if let Some(limit) = self.buffer_limit {
            if self.outstanding >= limit {
                return None;
            }
        }

        let buffer = match self.spares.iter().position(|b| b.capacity() >= size) {
            Some(index) => {
                let mut buffer = self.spares.swap_remove(index);
                buffer.set_len(0);
                buffer
            }
            None => {
                let data = vec![0u8; size].into_boxed_slice();
                let phys = data.as_ptr() as PhysAddr;
                PacketBuffer::new(data, phys)
            }
        };

        self.outstanding += 1;
        Some(buffer)
    }

    fn recycle(&mut self, buffer: PacketBuffer) {
        debug_assert!(self.outstanding > 0, "recycled a buffer that was never handed out");
        self.outstanding -= 1;
        if self.spares.len() < MAX_SPARE_BUFFERS {
            self.spares.push(buffer);
        }
    }
}
