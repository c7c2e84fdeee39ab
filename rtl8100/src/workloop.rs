// Serialized execution context for one device
//
// Interrupt and timer events are posted from any context and run later,
// one at a time, under the device lock. Transmit requests take the same
// lock, so the device is never touched from two places at once.

use crate::chip::ChipSetup;
use crate::device::Device;
use crate::dma::DmaMemory;
use crate::interrupt::InterruptOutcome;
use crate::regs::Registers;
use crate::tx::{TxOutcome, TxPacket};
use crate::upstream::Upstream;
use heapless::Deque;
use log::warn;
use spin::Mutex;

/// Events waiting for the work loop
pub const TASK_QUEUE_DEPTH: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    Interrupt,
    Timer,
}

/// What one [`WorkLoop::run_pending`] call did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WorkSummary {
    pub interrupts: usize,
    pub ticks: usize,
    /// Delay until the next tick, from the last timer task that ran
    pub next_tick_ms: Option<u32>,
    pub last_interrupt: Option<InterruptOutcome>,
}

pub struct WorkLoop<R, C, M, U>
where
    R: Registers,
    C: ChipSetup,
    M: DmaMemory,
    U: Upstream,
{
    device: Mutex<Device<R, C, M, U>>,
    pending: Mutex<Deque<Task, TASK_QUEUE_DEPTH>>,
}

impl<R, C, M, U> WorkLoop<R, C, M, U>
where
    R: Registers,
    C: ChipSetup,
    M: DmaMemory,
    U: Upstream,
{
    pub fn new(device: Device<R, C, M, U>) -> Self {
        Self {
            device: Mutex::new(device),
            pending: Mutex::new(Deque::new()),
        }
    }

    /// Queue a task. A task of the same kind that is already waiting
    /// covers this one.
    ///
    /// # Returns
    /// `false` if the queue was full and the task was lost.
    pub fn post(&self, task: Task) -> bool {
        let mut pending = self.pending.lock();
        if pending.iter().any(|queued| *queued == task) {
            return true;
        }
        if pending.push_back(task).is_err() {
            warn!("rtl8100: work queue full, dropping {:?}", task);
            return false;
        }
        true
    }

    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    /// Run every queued task in order.
    pub fn run_pending(&self) -> WorkSummary {
        let mut summary = WorkSummary::default();

        loop {
            // The queue lock is dropped before the device lock is taken.
            let task = self.pending.lock().pop_front();
            let Some(task) = task else {
                break;
            };

            let mut device = self.device.lock();
            match task {
                Task::Interrupt => {
                    summary.last_interrupt = Some(device.handle_interrupt());
                    summary.interrupts += 1;
                }
                Task::Timer => {
                    summary.next_tick_ms = device.on_timer();
                    summary.ticks += 1;
                }
            }
        }

        summary
    }

    /// Transmit from any context.
    pub fn transmit(&self, packet: TxPacket) -> TxOutcome {
        self.device.lock().transmit(packet)
    }

    /// Run `f` with exclusive access to the device.
    pub fn with_device<T>(&self, f: impl FnOnce(&mut Device<R, C, M, U>) -> T) -> T {
        let mut device = self.device.lock();
        f(&mut device)
    }

    pub fn into_device(self) -> Device<R, C, M, U> {
        self.device.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{FIRST_FRAG, LAST_FRAG};
    use crate::interrupt::InterruptStatus;
    use crate::testing::{linked_device, small_config};

    #[test]
    fn test_duplicate_tasks_coalesce() {
        let work = WorkLoop::new(linked_device(small_config()));
        assert!(work.post(Task::Interrupt));
        assert!(work.post(Task::Interrupt));
        assert!(work.post(Task::Timer));
        assert_eq!(work.pending(), 2);

        let summary = work.run_pending();
        assert_eq!(summary.interrupts, 1);
        assert_eq!(summary.ticks, 1);
        assert_eq!(summary.next_tick_ms, Some(1000));
        assert_eq!(work.pending(), 0);
    }

    #[test]
    fn test_interrupt_task_runs_handler() {
        let work = WorkLoop::new(linked_device(small_config()));
        work.with_device(|device| {
            device
                .rings_mut()
                .rx
                .device_fill(0, &[0xab; 42], FIRST_FRAG | LAST_FRAG, 0);
            device.registers_mut().isr = InterruptStatus::RX_OK.bits();
        });

        work.post(Task::Interrupt);
        let summary = work.run_pending();
        let outcome = summary.last_interrupt.unwrap();
        assert_eq!(outcome.rx.map(|rx| rx.delivered), Some(1));

        let device = work.into_device();
        assert_eq!(device.upstream().delivered[0].data(), &[0xab; 42][..]);
    }

    #[test]
    fn test_transmit_through_lock() {
        let work = WorkLoop::new(linked_device(small_config()));
        let mut buffer = work.with_device(|device| device.alloc_tx_buffer(60)).unwrap();
        buffer.set_len(60);

        assert!(work.transmit(TxPacket::new(buffer)).is_queued());
        let free = work.with_device(|device| device.tx_ring().unwrap().ring().free_count());
        assert_eq!(free, 62);
    }
}
