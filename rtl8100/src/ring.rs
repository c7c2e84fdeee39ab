// Descriptor ring bookkeeping.
//
// A ring of `len` descriptors (a power of two) in a coherent DMA region.
// `next` is where software produces, `dirty` is where it next expects
// the NIC to hand a descriptor back. One slot always stays free so that a
// full ring can be told apart from an empty one:
// `free_count() + in_flight() == len - 1`.

use crate::descriptor::{self, DescFields, Descriptor, Owner, SoftwareDesc, RING_END};
use crate::dma::{DmaMemory, DmaRegion, PhysAddr};
use crate::error::NicError;
use alloc::format;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicUsize, Ordering};

/// Alignment the NIC requires for descriptor ring bases.
pub const RING_ALIGN: usize = 256;

/// Not enough free descriptors; nothing was changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stall;

/// Descriptors handed out by [`DescriptorRing::allocate`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    pub start: usize,
    pub count: usize,
}

/// How [`DescriptorRing::reset`] treats the cursors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetMode {
    /// Both cursors back to slot 0, as after a chip reset.
    Hard,
    /// Cursors stay where the producer is; in-flight work is forgotten.
    Soft,
}

pub struct DescriptorRing {
    region: DmaRegion,
    descs: NonNull<Descriptor>,
    len: usize,
    next: usize,
    dirty: usize,
    free: AtomicUsize,
}

// The ring memory is owned by the ring.
unsafe impl Send for DescriptorRing {}

impl DescriptorRing {
    /// Bytes needed for a ring of `len` descriptors.
    pub fn region_size(len: usize) -> usize {
        len * core::mem::size_of::<Descriptor>()
    }

    /// Lay out a ring over `region`, all descriptors software-owned.
    ///
    /// A region that cannot hold the ring goes back to `memory`.
    pub fn new(
        mut region: DmaRegion,
        len: usize,
        memory: &mut dyn DmaMemory,
    ) -> Result<Self, NicError> {
        let descs = match Self::check_region(&region, len) {
            Ok(descs) => descs,
            Err(e) => {
                memory.free_coherent(region);
                return Err(e);
            }
        };

        region.zero();
        let mut ring = Self {
            region,
            descs,
            len,
            next: 0,
            dirty: 0,
            free: AtomicUsize::new(len - 1),
        };
        ring.reset(ResetMode::Hard);
        Ok(ring)
    }

    fn check_region(region: &DmaRegion, len: usize) -> Result<NonNull<Descriptor>, NicError> {
        if len < 2 || !len.is_power_of_two() {
            return Err(NicError::InvalidConfig(format!("ring length {} is not a power of two", len)));
        }
        if region.len() < Self::region_size(len) || region.phys() as usize % RING_ALIGN != 0 {
            return Err(NicError::DmaAllocation(format!(
                "ring region of {} bytes at {:#x} cannot hold {} descriptors",
                region.len(),
                region.phys(),
                len
            )));
        }
        NonNull::new(region.as_ptr() as *mut Descriptor)
            .ok_or_else(|| NicError::DmaAllocation("null ring region".into()))
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.in_flight() == 0
    }

    pub fn phys_addr(&self) -> PhysAddr {
        self.region.phys()
    }

    pub fn next(&self) -> usize {
        self.next
    }

    pub fn dirty(&self) -> usize {
        self.dirty
    }

    pub fn free_count(&self) -> usize {
        self.free.load(Ordering::Acquire)
    }

    pub fn in_flight(&self) -> usize {
        self.len - 1 - self.free_count()
    }

    /// Slot index `offset` positions after `index`.
    pub fn wrap(&self, index: usize, offset: usize) -> usize {
        (index + offset) & (self.len - 1)
    }

    pub fn is_last(&self, index: usize) -> bool {
        index == self.len - 1
    }

    /// `RING_END` for the last physical slot, otherwise 0.
    pub fn end_marker(&self, index: usize) -> u32 {
        if self.is_last(index) {
            RING_END
        } else {
            0
        }
    }

    fn slot(&self, index: usize) -> *mut Descriptor {
        debug_assert!(index < self.len);
        // SAFETY: index < len and the region holds len descriptors.
        unsafe { self.descs.as_ptr().add(index) }
    }

    pub fn owner(&self, index: usize) -> Owner {
        // SAFETY: `slot` returns a live descriptor.
        unsafe { descriptor::owner_of(self.slot(index)) }
    }

    pub fn fields(&self, index: usize) -> DescFields {
        // SAFETY: `slot` returns a live descriptor.
        unsafe { descriptor::read_fields(self.slot(index)) }
    }

    /// Take `count` descriptors starting at `next`.
    ///
    /// Succeeds only if strictly more than `count` descriptors are free.
    pub fn allocate(&mut self, count: usize) -> Result<Reservation, Stall> {
        if count == 0 || self.free_count() <= count {
            return Err(Stall);
        }

        self.free.fetch_sub(count, Ordering::AcqRel);
        let start = self.next;
        self.next = self.wrap(self.next, count);
        Ok(Reservation { start, count })
    }

    /// Handle on a descriptor that is part of a live reservation.
    pub fn claim_reserved(&mut self, reservation: &Reservation, offset: usize) -> SoftwareDesc<'_> {
        assert!(offset < reservation.count);
        let index = self.wrap(reservation.start, offset);
        // SAFETY: reserved slots were reclaimed or reset, so software owns them,
        // and `&mut self` prevents a second handle.
        unsafe { SoftwareDesc::new(self.slot(index)) }
    }

    /// Handle on `index` if software currently owns it.
    pub fn claim(&mut self, index: usize) -> Option<SoftwareDesc<'_>> {
        match self.owner(index) {
            // SAFETY: OWN is clear and `&mut self` prevents a second handle.
            Owner::Software => Some(unsafe { SoftwareDesc::new(self.slot(index)) }),
            Owner::Hardware => None,
        }
    }

    /// Walk descriptors the NIC has finished with.
    ///
    /// Calls `completed` with each slot index in order, stopping at the
    /// first descriptor still owned by hardware. Returns how many were
    /// reclaimed.
    pub fn release_completed(&mut self, mut completed: impl FnMut(usize)) -> usize {
        let mut reclaimed = 0;

        while self.in_flight() > 0 && self.owner(self.dirty) == Owner::Software {
            completed(self.dirty);
            self.free.fetch_add(1, Ordering::AcqRel);
            self.dirty = self.wrap(self.dirty, 1);
            reclaimed += 1;
        }

        reclaimed
    }

    /// Return every descriptor to software and clear it.
    ///
    /// Only valid while the NIC is stopped or held in reset.
    pub fn reset(&mut self, mode: ResetMode) {
        for index in 0..self.len {
            // SAFETY: the caller guarantees the NIC is not walking the ring.
            unsafe { descriptor::force_write(self.slot(index), self.end_marker(index), 0, 0) };
        }

        match mode {
            ResetMode::Hard => {
                self.next = 0;
                self.dirty = 0;
            }
            ResetMode::Soft => self.dirty = self.next,
        }
        self.free.store(self.len - 1, Ordering::Release);
    }

    /// Overwrite one descriptor while the NIC is stopped.
    ///
    /// Used to prime receive rings with buffers before the first enable.
    pub(crate) fn prime(&mut self, index: usize, opts1: u32, opts2: u32, addr: PhysAddr) {
        // SAFETY: callers only prime before the NIC is started or while it is in reset.
        unsafe { descriptor::force_write(self.slot(index), opts1, opts2, addr) };
    }

    /// Release the ring, handing back its memory.
    pub fn into_region(self) -> DmaRegion {
        self.region
    }

    /// Let a test play the NIC: clear OWN and set the status word.
    #[cfg(test)]
    pub(crate) fn device_complete(&mut self, index: usize, opts1: u32, opts2: u32) {
        let addr = self.fields(index).addr;
        unsafe {
            descriptor::force_write(self.slot(index), opts1 & !descriptor::DESC_OWN, opts2, addr)
        };
    }
}
