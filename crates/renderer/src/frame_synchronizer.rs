//! Per-frame synchronization primitives.
//!
//! Each of the [`MAX_FRAMES_IN_FLIGHT`] slots owns:
//!
//! - an "image available" semaphore, signaled by acquisition
//! - a "render finished" semaphore, signaled by the submission and waited on
//!   by presentation
//! - an in-flight fence, signaled by the submission and waited on by the host
//!   before the slot is reused
//!
//! ```text
//! tick N (slot N % 2)
//!   wait_idle(slot)           host blocks on in_flight
//!   acquire                   signals image_available
//!   signal_on_completion      resets in_flight, hands it to the submit
//!   submit                    waits image_available, signals render_finished + in_flight
//!   present                   waits render_finished
//! ```
//!
//! Slots are created once and survive swapchain rebuilds.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use viewer_rhi::device::Device;
use viewer_rhi::sync::{Fence, Semaphore};
use viewer_rhi::{RhiError, RhiResult};

use crate::MAX_FRAMES_IN_FLIGHT;

/// Monotonic tick counter. The active slot is `ticks % MAX_FRAMES_IN_FLIGHT`,
/// independent of which swapchain image is acquired.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameCounter {
    ticks: u64,
}

impl FrameCounter {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    #[inline]
    pub fn slot(&self) -> usize {
        (self.ticks % MAX_FRAMES_IN_FLIGHT as u64) as usize
    }

    /// Number of completed passes over every slot.
    #[inline]
    pub fn wraps(&self) -> u64 {
        self.ticks / MAX_FRAMES_IN_FLIGHT as u64
    }

    #[inline]
    pub fn advance(&mut self) {
        self.ticks += 1;
    }
}

/// Host-side view of one slot's fence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Completion of the last submission (if any) has been observed.
    Idle,
    /// Handed to a submission whose completion nobody has waited for yet.
    Armed,
}

/// Bookkeeping that enforces "never rearm before observing completion".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotLedger {
    states: [SlotState; MAX_FRAMES_IN_FLIGHT],
}

impl SlotLedger {
    /// All slots start idle because their fences are created signaled.
    pub fn new() -> Self {
        Self {
            states: [SlotState::Idle; MAX_FRAMES_IN_FLIGHT],
        }
    }

    pub fn state(&self, slot: usize) -> SlotState {
        self.states[slot]
    }

    /// Records that the slot's completion has been waited for.
    pub fn observe(&mut self, slot: usize) {
        self.states[slot] = SlotState::Idle;
    }

    /// Marks the slot as handed to a submission.
    pub fn arm(&mut self, slot: usize) -> RhiResult<()> {
        if self.states[slot] == SlotState::Armed {
            return Err(RhiError::CommandError(format!(
                "Frame slot {} rearmed before its previous submission completed",
                slot
            )));
        }
        self.states[slot] = SlotState::Armed;
        Ok(())
    }

    /// Slots with a submission whose completion has not been observed.
    pub fn in_flight(&self) -> usize {
        self.states
            .iter()
            .filter(|&&state| state == SlotState::Armed)
            .count()
    }
}

impl Default for SlotLedger {
    fn default() -> Self {
        Self::new()
    }
}

pub struct FrameSlot {
    image_available: Semaphore,
    render_finished: Semaphore,
    in_flight: Fence,
}

impl FrameSlot {
    fn new(device: Arc<Device>) -> RhiResult<Self> {
        Ok(Self {
            image_available: Semaphore::new(device.clone())?,
            render_finished: Semaphore::new(device.clone())?,
            // Signaled so the first wait on each slot returns immediately.
            in_flight: Fence::new(device, true)?,
        })
    }

    #[inline]
    pub fn image_available(&self) -> vk::Semaphore {
        self.image_available.handle()
    }

    #[inline]
    pub fn render_finished(&self) -> vk::Semaphore {
        self.render_finished.handle()
    }

    #[inline]
    pub fn in_flight(&self) -> &Fence {
        &self.in_flight
    }
}

/// Owns every [`FrameSlot`]. Not thread-safe.
pub struct FrameSynchronizer {
    slots: Vec<FrameSlot>,
    ledger: SlotLedger,
}

impl FrameSynchronizer {
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let mut slots = Vec::with_capacity(MAX_FRAMES_IN_FLIGHT);
        for i in 0..MAX_FRAMES_IN_FLIGHT {
            slots.push(FrameSlot::new(device.clone())?);
            debug!("Created frame slot {}", i);
        }

        info!(
            "Frame synchronizer created with {} frames in flight",
            MAX_FRAMES_IN_FLIGHT
        );

        Ok(Self {
            slots,
            ledger: SlotLedger::new(),
        })
    }

    /// Slot index for the counter's current tick.
    #[inline]
    pub fn acquire_slot(&self, counter: &FrameCounter) -> usize {
        counter.slot()
    }

    pub fn slot(&self, slot: usize) -> RhiResult<&FrameSlot> {
        self.slots.get(slot).ok_or_else(|| {
            RhiError::InvalidHandle(format!(
                "Frame slot {} unavailable ({} slots live)",
                slot,
                self.slots.len()
            ))
        })
    }

    /// Blocks until the slot's previous submission has completed.
    pub fn wait_idle(&mut self, slot: usize) -> RhiResult<()> {
        self.slot(slot)?.in_flight.wait(u64::MAX)?;
        self.ledger.observe(slot);
        Ok(())
    }

    /// Resets the slot's fence and returns it for the submission to signal.
    ///
    /// Called immediately before submit, so an aborted tick never leaves an
    /// unsignaled fence behind.
    pub fn signal_on_completion(&mut self, slot: usize) -> RhiResult<vk::Fence> {
        let fence = self.slot(slot)?.in_flight.handle();
        self.ledger.arm(slot)?;
        self.slots[slot].in_flight.reset()?;
        Ok(fence)
    }

    #[inline]
    pub fn in_flight(&self) -> usize {
        self.ledger.in_flight()
    }

    /// Destroys every slot. The device must be idle.
    pub fn teardown(&mut self) {
        if !self.slots.is_empty() {
            self.slots.clear();
            self.ledger = SlotLedger::new();
            info!("Frame synchronizer destroyed");
        }
    }
}
