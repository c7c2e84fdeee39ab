// Hardware descriptor layout and ownership handoff.
//
// A descriptor belongs either to software or to the NIC, as recorded by
// the OWN bit of `opts1`. Software may only write a descriptor it owns.
// The types here make that rule structural: a SoftwareDesc can only
// be obtained for a descriptor whose OWN bit is clear, and the only ways
// to set OWN are SoftwareDesc::publish and
// StagedDesc::hand_to_hardware, both of which consume the handle.

use crate::dma::PhysAddr;
use core::marker::PhantomData;
use core::ptr::{addr_of, addr_of_mut};
use core::sync::atomic::{fence, Ordering};

// opts1 bits common to both directions
pub const DESC_OWN: u32 = 1 << 31;
pub const RING_END: u32 = 1 << 30;
pub const FIRST_FRAG: u32 = 1 << 29;
pub const LAST_FRAG: u32 = 1 << 28;

/// RX length field
pub const RX_LEN_MASK: u32 = 0x1fff;
/// TX length field
pub const TX_LEN_MASK: u32 = 0xffff;

/// One 16-byte hardware descriptor, little-endian in memory.
#[repr(C, align(16))]
#[derive(Debug, Default)]
pub struct Descriptor {
    opts1: u32,
    opts2: u32,
    addr: u64,
}

/// Who may currently touch a descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    Software,
    Hardware,
}

/// Decoded copy of a descriptor's fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescFields {
    pub opts1: u32,
    pub opts2: u32,
    pub addr: PhysAddr,
}

impl DescFields {
    pub fn owner(&self) -> Owner {
        if self.opts1 & DESC_OWN != 0 {
            Owner::Hardware
        } else {
            Owner::Software
        }
    }

    pub fn has(&self, flags: u32) -> bool {
        self.opts1 & flags == flags
    }
}

/// Read the OWN bit of a descriptor.
///
/// # Safety
/// `desc` must point to a live descriptor in a ring.
pub(crate) unsafe fn owner_of(desc: *const Descriptor) -> Owner {
    let opts1 = u32::from_le(core::ptr::read_volatile(addr_of!((*desc).opts1)));
    if opts1 & DESC_OWN != 0 {
        Owner::Hardware
    } else {
        Owner::Software
    }
}

/// Read all fields of a descriptor.
///
/// # Safety
/// `desc` must point to a live descriptor in a ring.
pub(crate) unsafe fn read_fields(desc: *const Descriptor) -> DescFields {
    let opts1 = u32::from_le(core::ptr::read_volatile(addr_of!((*desc).opts1)));
    // Fields written by the device before it cleared OWN must be visible.
    fence(Ordering::Acquire);
    DescFields {
        opts1,
        opts2: u32::from_le(core::ptr::read_volatile(addr_of!((*desc).opts2))),
        addr: u64::from_le(core::ptr::read_volatile(addr_of!((*desc).addr))),
    }
}

/// Overwrite a descriptor regardless of its owner.
///
/// # Safety
/// `desc` must point to a live descriptor and the NIC must not be
/// processing the ring (stopped or held in reset).
pub(crate) unsafe fn force_write(desc: *mut Descriptor, opts1: u32, opts2: u32, addr: PhysAddr) {
    core::ptr::write_volatile(addr_of_mut!((*desc).addr), addr.to_le());
    core::ptr::write_volatile(addr_of_mut!((*desc).opts2), opts2.to_le());
    core::ptr::write_volatile(addr_of_mut!((*desc).opts1), opts1.to_le());
}

/// Exclusive handle on a software-owned descriptor
pub struct SoftwareDesc<'r> {
    desc: *mut Descriptor,
    _ring: PhantomData<&'r mut Descriptor>,
}

impl<'r> SoftwareDesc<'r> {
    /// # Safety
    /// `desc` must point to a live descriptor whose OWN bit is clear, and
    /// no other handle to it may exist for `'r`.
    pub(crate) unsafe fn new(desc: *mut Descriptor) -> Self {
        debug_assert_eq!(owner_of(desc), Owner::Software);
        Self {
            desc,
            _ring: PhantomData,
        }
    }

    pub fn fields(&self) -> DescFields {
        // SAFETY: the handle guarantees a live descriptor.
        unsafe { read_fields(self.desc) }
    }

    fn write_body(&mut self, opts2: u32, addr: PhysAddr) {
        // SAFETY: software owns the descriptor.
        unsafe {
            core::ptr::write_volatile(addr_of_mut!((*self.desc).addr), addr.to_le());
            core::ptr::write_volatile(addr_of_mut!((*self.desc).opts2), opts2.to_le());
        }
    }

    fn write_opts1(&mut self, opts1: u32) {
        // SAFETY: software owns the descriptor, or is setting OWN as its last write.
        unsafe { core::ptr::write_volatile(addr_of_mut!((*self.desc).opts1), opts1.to_le()) };
    }

    /// Fill the descriptor and give it to the NIC in one step.
    pub fn publish(mut self, opts1: u32, opts2: u32, addr: PhysAddr) {
        self.write_body(opts2, addr);
        fence(Ordering::Release);
        self.write_opts1(opts1 | DESC_OWN);
    }

    /// Fill the descriptor but keep it in software's hands.
    pub fn stage(mut self, opts1: u32, opts2: u32, addr: PhysAddr) -> StagedDesc<'r> {
        self.write_body(opts2, addr);
        self.write_opts1(opts1 & !DESC_OWN);
        StagedDesc {
            inner: self,
            opts1: opts1 & !DESC_OWN,
        }
    }
}

/// A filled descriptor waiting to be handed over
pub struct StagedDesc<'r> {
    inner: SoftwareDesc<'r>,
    opts1: u32,
}

impl StagedDesc<'_> {
    /// Set OWN after every earlier descriptor write is visible.
    pub fn hand_to_hardware(mut self) {
        fence(Ordering::Release);
        let opts1 = self.opts1 | DESC_OWN;
        self.inner.write_opts1(opts1);
    }
}
