// Interface to the network stack above the driver

use crate::link::LinkState;
use crate::rx::RxPacket;

/// Callbacks into the network stack.
///
/// All calls are made from the driver's serialized context and must not
/// call back into the driver.
pub trait Upstream {
    /// Hand a received frame to the stack.
    fn input(&mut self, packet: RxPacket);

    /// Called once after a receive batch that delivered at least one frame.
    fn flush_input(&mut self) {}

    /// The transmit ring has room again after a stall.
    fn service(&mut self);

    /// Begin feeding packets to the driver.
    fn start_output(&mut self) {}

    /// Stop feeding packets to the driver.
    fn stop_output(&mut self) {}

    /// Drop every packet queued above the driver.
    fn flush_output(&mut self) {}

    /// Link state changed.
    fn link_changed(&mut self, _state: LinkState) {}
}
