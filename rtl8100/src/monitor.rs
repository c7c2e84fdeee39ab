// Periodic link and transmit health monitor.
//
// Runs once per tick from the driver's serialized context. Each tick
// polls the PHY, publishes link transitions, watches the transmit ring
// for lost interrupts and deadlocks, requests a tally dump and releases
// the packet whose free was deferred by the last reclaim.

use crate::chip::ChipSetup;
use crate::config::DriverConfig;
use crate::device::Device;
use crate::dma::DmaMemory;
use crate::link::{LinkState, PhyStatus};
use crate::regs::{self, Registers};
use crate::ring::ResetMode;
use crate::upstream::Upstream;
use log::{error, info, warn};

/// Result of one transmit health check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Completions progressed, or nothing is in flight
    Healthy,
    /// No progress yet, below every threshold
    Waiting,
    /// Completions may have happened without an interrupt
    LostInterrupt,
    /// The ring has not moved for too long; the chip needs a restart
    Deadlock,
}

/// Tracks transmit progress between ticks
#[derive(Debug, Clone)]
pub struct HealthMonitor {
    last_completed: u64,
    warnings: u32,
    check_threshold: u32,
    deadlock_threshold: u32,
}

impl HealthMonitor {
    pub fn new(config: &DriverConfig) -> Self {
        Self {
            last_completed: 0,
            warnings: 0,
            check_threshold: config.tx_check_threshold,
            deadlock_threshold: config.tx_deadlock_threshold,
        }
    }

    /// Compare the completion count against the last tick.
    pub fn assess(&mut self, completed: u64, in_flight: usize) -> Verdict {
        if completed != self.last_completed || in_flight == 0 {
            self.warnings = 0;
            return Verdict::Healthy;
        }

        self.warnings += 1;
        if self.warnings >= self.deadlock_threshold {
            Verdict::Deadlock
        } else if self.warnings == self.check_threshold {
            Verdict::LostInterrupt
        } else {
            Verdict::Waiting
        }
    }

    /// Remember the completion count for the next tick.
    pub fn end_tick(&mut self, completed: u64) {
        self.last_completed = completed;
    }

    pub fn reset(&mut self) {
        self.warnings = 0;
    }

    pub fn warnings(&self) -> u32 {
        self.warnings
    }
}

impl<R, C, M, U> Device<R, C, M, U>
where
    R: Registers,
    C: ChipSetup,
    M: DmaMemory,
    U: Upstream,
{
    /// One monitor tick.
    ///
    /// # Returns
    /// The delay in milliseconds until the next tick, or `None` when the
    /// interface is disabled and the timer should stop.
    pub fn on_timer(&mut self) -> Option<u32> {
        if !self.enabled {
            return None;
        }

        let phy = PhyStatus(self.regs.read8(regs::PHY_STATUS));
        if phy.link_up() != self.link.is_up() {
            if phy.link_up() {
                self.set_link_up(phy);
            } else {
                self.set_link_down();
            }
        }

        self.chip.periodic(&mut self.regs);

        let mut restarted = false;
        if self.link.is_up() {
            restarted = self.check_deadlock();
            if !restarted {
                self.request_tally_dump();
            }
        }

        if let Some(rings) = self.rings.as_mut() {
            if !restarted {
                rings.tx.release_deferred(&mut self.memory);
            }
            self.monitor.end_tick(rings.tx.completed());
        }

        Some(self.config.tick_interval_ms)
    }

    fn set_link_up(&mut self, phy: PhyStatus) {
        self.chip.link_up_tuning(&mut self.regs, phy);

        let status = phy.status();
        self.link = LinkState::Up(status);
        self.upstream.start_output();
        if let Some(rings) = self.rings.as_mut() {
            if rings.tx.take_stall() {
                self.upstream.service();
            }
        }
        self.upstream.link_changed(self.link);

        self.regs
            .write8(regs::CHIP_CMD, regs::CMD_RX_ENB | regs::CMD_TX_ENB);
        info!("rtl8100: link up, {}", status);
    }

    fn set_link_down(&mut self) {
        self.chip.link_down_tuning(&mut self.regs);
        self.monitor.reset();
        self.needs_update = false;

        self.upstream.stop_output();
        self.upstream.flush_output();
        self.link = LinkState::Down;
        self.upstream.link_changed(LinkState::Down);

        if let Some(rings) = self.rings.as_mut() {
            rings.tx.clear(ResetMode::Soft, &mut self.memory);
        }
        info!("rtl8100: link down");
    }

    /// Returns `true` if the chip was restarted.
    fn check_deadlock(&mut self) -> bool {
        let (completed, in_flight) = match self.rings.as_ref() {
            Some(rings) => (rings.tx.completed(), rings.tx.ring().in_flight()),
            None => return false,
        };

        match self.monitor.assess(completed, in_flight) {
            Verdict::Healthy | Verdict::Waiting => false,
            Verdict::LostInterrupt => {
                warn!(
                    "rtl8100: no transmit progress, {} descriptors pending; polling ring",
                    in_flight
                );
                self.stats.counters.tx_timeouts += 1;
                self.reclaim_tx();
                false
            }
            Verdict::Deadlock => {
                error!(
                    "rtl8100: transmitter stuck with {} descriptors pending, restarting",
                    in_flight
                );
                self.stats.counters.tx_resets += 1;
                self.restart();
                true
            }
        }
    }

    /// Ask the NIC to write its counters into the tally block.
    ///
    /// Skipped while the receiver is off: the chip ignores the request and
    /// the dump bit would never clear.
    fn request_tally_dump(&mut self) {
        if self.regs.read8(regs::CHIP_CMD) & regs::CMD_RX_ENB == 0 {
            return;
        }
        let Some(rings) = self.rings.as_ref() else {
            return;
        };

        let phys = rings.tally.phys();
        self.regs
            .write32(regs::COUNTER_ADDR_HIGH, (phys >> 32) as u32);
        self.regs.write32(regs::COUNTER_ADDR_LOW, phys as u32);
        self.regs
            .write32(regs::COUNTER_ADDR_LOW, phys as u32 | regs::COUNTER_DUMP);
        self.needs_update = true;
    }

    /// Reset the chip and bring it back with empty rings.
    ///
    /// Upstream sees the link go down; the next tick reports it up again
    /// once the PHY has relinked.
    pub fn restart(&mut self) {
        if !self.enabled || self.rings.is_none() {
            return;
        }

        self.upstream.stop_output();
        self.upstream.flush_output();
        if self.link.is_up() {
            self.link = LinkState::Down;
            self.upstream.link_changed(LinkState::Down);
        }
        self.needs_update = false;

        self.reset_chip();

        if let Some(rings) = self.rings.as_mut() {
            rings.tx.clear(ResetMode::Hard, &mut self.memory);
        }
        // Frames already in host memory are still good.
        self.rx_pass();
        if let Some(rings) = self.rings.as_mut() {
            rings.rx.reset_cursor();
        }

        self.monitor.reset();
        self.start_hardware();
    }
}
