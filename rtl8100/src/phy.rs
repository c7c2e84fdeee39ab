// smoltcp glue: exposes a Device as a smoltcp phy::Device

use crate::chip::ChipSetup;
use crate::device::Device;
use crate::dma::{DmaMemory, PacketBuffer};
use crate::link::LinkState;
use crate::regs::Registers;
use crate::rx::RxPacket;
use crate::tx::{TxOutcome, TxPacket};
use crate::upstream::Upstream;
use alloc::collections::VecDeque;
use alloc::vec::Vec;
use log::debug;
use smoltcp::phy::{self, DeviceCapabilities, Medium};
use smoltcp::time::Instant;

/// Ethernet header length, counted in smoltcp's MTU
const ETH_HEADER_LEN: usize = 14;

/// Upstream that parks received frames until smoltcp polls for them
pub struct QueuedUpstream {
    queue: VecDeque<RxPacket>,
    capacity: usize,
    overflow: Vec<PacketBuffer>,
    output_running: bool,
    link: LinkState,
}

impl QueuedUpstream {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(capacity),
            capacity,
            overflow: Vec::new(),
            output_running: false,
            link: LinkState::Down,
        }
    }

    pub fn pop(&mut self) -> Option<RxPacket> {
        self.queue.pop_front()
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn link(&self) -> LinkState {
        self.link
    }

    pub fn output_running(&self) -> bool {
        self.output_running
    }

    /// Buffers of frames dropped because the queue was full.
    fn take_overflow(&mut self) -> Vec<PacketBuffer> {
        core::mem::take(&mut self.overflow)
    }
}

impl Upstream for QueuedUpstream {
    fn input(&mut self, packet: RxPacket) {
        if self.queue.len() >= self.capacity {
            debug!("rtl8100: receive queue full, dropping frame");
            self.overflow.push(packet.into_buffer());
            return;
        }
        self.queue.push_back(packet);
    }

    fn service(&mut self) {
        self.output_running = true;
    }

    fn start_output(&mut self) {
        self.output_running = true;
    }

    fn stop_output(&mut self) {
        self.output_running = false;
    }

    fn link_changed(&mut self, state: LinkState) {
        self.link = state;
    }
}

/// A [`Device`] seen through smoltcp's `phy::Device`
pub struct NicPhy<'d, R, C, M>
where
    R: Registers,
    C: ChipSetup,
    M: DmaMemory,
{
    device: &'d mut Device<R, C, M, QueuedUpstream>,
    spent: Vec<PacketBuffer>,
    scratch: Vec<u8>,
}

impl<'d, R, C, M> NicPhy<'d, R, C, M>
where
    R: Registers,
    C: ChipSetup,
    M: DmaMemory,
{
    pub fn new(device: &'d mut Device<R, C, M, QueuedUpstream>) -> Self {
        Self {
            device,
            spent: Vec::new(),
            scratch: Vec::new(),
        }
    }

    /// Return consumed receive buffers to the device's pool.
    fn recycle(&mut self) {
        for buffer in self.spent.drain(..) {
            self.device.recycle_buffer(buffer);
        }
        for buffer in self.device.upstream_mut().take_overflow() {
            self.device.recycle_buffer(buffer);
        }
    }
}

impl<R, C, M> Drop for NicPhy<'_, R, C, M>
where
    R: Registers,
    C: ChipSetup,
    M: DmaMemory,
{
    fn drop(&mut self) {
        self.recycle();
    }
}

pub struct NicRxToken<'a> {
    packet: RxPacket,
    spent: &'a mut Vec<PacketBuffer>,
}

impl phy::RxToken for NicRxToken<'_> {
    fn consume<T, F>(self, f: F) -> T
    where
        F: FnOnce(&mut [u8]) -> T,
    {
        let mut buffer = self.packet.into_buffer();
        let result = f(buffer.as_mut_slice());
        self.spent.push(buffer);
        result
    }
}

pub struct NicTxToken<'a, R, C, M>
where
    R: Registers,
    C: ChipSetup,
    M: DmaMemory,
{
    device: &'a mut Device<R, C, M, QueuedUpstream>,
    scratch: &'a mut Vec<u8>,
}

impl<R, C, M> phy::TxToken for NicTxToken<'_, R, C, M>
where
    R: Registers,
    C: ChipSetup,
    M: DmaMemory,
{
    fn consume<T, F>(self, len: usize, f: F) -> T
    where
        F: FnOnce(&mut [u8]) -> T,
    {
        let Some(mut buffer) = self.device.alloc_tx_buffer(len) else {
            // No buffer: let smoltcp build the frame, then drop it.
            debug!("rtl8100: no transmit buffer for {} byte frame", len);
            self.scratch.resize(len, 0);
            return f(&mut self.scratch[..len]);
        };

        buffer.set_len(len);
        let result = f(buffer.as_mut_slice());

        match self.device.transmit(TxPacket::new(buffer)) {
            TxOutcome::Queued | TxOutcome::Dropped(_) => {}
            TxOutcome::Stalled(packet) => self.device.discard_packet(packet),
        }
        result
    }
}

impl<R, C, M> phy::Device for NicPhy<'_, R, C, M>
where
    R: Registers,
    C: ChipSetup,
    M: DmaMemory,
{
    type RxToken<'a> = NicRxToken<'a> where Self: 'a;
    type TxToken<'a> = NicTxToken<'a, R, C, M> where Self: 'a;

    fn receive(&mut self, _timestamp: Instant) -> Option<(Self::RxToken<'_>, Self::TxToken<'_>)> {
        self.recycle();
        let packet = self.device.upstream_mut().pop()?;
        Some((
            NicRxToken {
                packet,
                spent: &mut self.spent,
            },
            NicTxToken {
                device: &mut *self.device,
                scratch: &mut self.scratch,
            },
        ))
    }

    fn transmit(&mut self, _timestamp: Instant) -> Option<Self::TxToken<'_>> {
        self.recycle();
        if !self.device.can_transmit() {
            return None;
        }
        Some(NicTxToken {
            device: &mut *self.device,
            scratch: &mut self.scratch,
        })
    }

    fn capabilities(&self) -> DeviceCapabilities {
        let mut caps = DeviceCapabilities::default();
        caps.max_transmission_unit = self.device.config().mtu + ETH_HEADER_LEN;
        caps.medium = Medium::Ethernet;
        caps
    }
}
