//! The frame-presentation state machine.
//!
//! [`PresentationLoop`] decides *when* to wait, acquire, submit, present and
//! rebuild; [`FrameBackend`] does the GPU work. The viewer's backend is
//! [`Viewer`](crate::viewer::Viewer); tests drive the loop against an
//! in-memory backend.
//!
//! ```text
//!     acquire OUT_OF_DATE / present not optimal / resize pending
//! RUNNING ---------------------------------------------------> RESIZING
//!    ^                                                            |
//!    +------------- rebuild(extent), surface non-zero ------------+
//!
//! any state --- shutdown() ---> SHUTTING_DOWN
//! ```

use ash::vk;
use tracing::{debug, info, warn};

use viewer_platform::ResizeSignal;
use viewer_rhi::{RhiError, RhiResult};

use crate::frame_synchronizer::FrameCounter;

/// Result of asking the swapchain for the next image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// `suboptimal` images are still rendered and presented; a rebuild
    /// follows.
    Image { index: u32, suboptimal: bool },
    OutOfDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    /// Shown, but the swapchain no longer matches the surface exactly.
    Suboptimal,
    /// Not shown; the swapchain no longer matches the surface.
    OutOfDate,
}

impl PresentOutcome {
    /// Whether the image reached the screen.
    #[inline]
    pub fn was_shown(self) -> bool {
        !matches!(self, PresentOutcome::OutOfDate)
    }
}

/// GPU side of a tick.
///
/// Slots are `0..MAX_FRAMES_IN_FLIGHT`; image indices come from
/// [`acquire_image`](Self::acquire_image).
pub trait FrameBackend {
    /// Whether a swapchain graph exists to render into.
    fn is_built(&self) -> bool;

    /// Blocks until the slot's previous submission has completed.
    fn wait_for_slot(&mut self, slot: usize) -> RhiResult<()>;

    fn acquire_image(&mut self, slot: usize) -> RhiResult<AcquireOutcome>;

    /// Submits the image's recorded commands, arming the slot's fence.
    fn submit(&mut self, slot: usize, image_index: u32) -> RhiResult<()>;

    fn present(&mut self, slot: usize, image_index: u32) -> RhiResult<PresentOutcome>;

    fn wait_device_idle(&mut self) -> RhiResult<()>;

    /// Rebuilds the swapchain graph at `extent` and re-records every command
    /// buffer against it.
    ///
    /// Returns [`RhiError::ZeroExtent`] without touching the current build
    /// when the surface has zero area.
    fn rebuild(&mut self, extent: vk::Extent2D) -> RhiResult<()>;

    /// Destroys everything, in reverse construction order. Called once, with
    /// the device idle.
    fn teardown(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Running,
    Resizing,
    ShuttingDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Submitted and handed to the presentation engine.
    Presented { image_index: u32 },
    /// Acquisition reported the swapchain out of date; nothing was submitted.
    Skipped,
    /// The window or its surface has zero area; no rebuild until it grows.
    WaitingForExtent,
    ShutDown,
}

pub struct PresentationLoop<B: FrameBackend> {
    backend: B,
    state: LoopState,
    counter: FrameCounter,
    resize: ResizeSignal,
    rebuilds: u64,
    frames_presented: u64,
}

impl<B: FrameBackend> PresentationLoop<B> {
    /// Starts in `Running` when the backend is already built, otherwise in
    /// `Resizing` so the first tick builds it.
    pub fn new(backend: B, resize: ResizeSignal) -> Self {
        let state = if backend.is_built() {
            LoopState::Running
        } else {
            LoopState::Resizing
        };

        Self {
            backend,
            state,
            counter: FrameCounter::new(),
            resize,
            rebuilds: 0,
            frames_presented: 0,
        }
    }

    /// Runs one iteration. `extent` is the window's current framebuffer
    /// size.
    ///
    /// Errors are fatal; the caller is expected to call
    /// [`shutdown`](Self::shutdown) afterwards.
    pub fn tick(&mut self, extent: vk::Extent2D) -> RhiResult<TickOutcome> {
        match self.state {
            LoopState::ShuttingDown => return Ok(TickOutcome::ShutDown),
            LoopState::Running if self.resize.is_pending() => {
                debug!("Resize pending at start of tick");
                self.state = LoopState::Resizing;
            }
            _ => {}
        }

        if self.state == LoopState::Resizing {
            if extent.width == 0 || extent.height == 0 {
                return Ok(TickOutcome::WaitingForExtent);
            }

            self.resize.take();
            self.backend.wait_device_idle()?;
            match self.backend.rebuild(extent) {
                Ok(()) => {}
                Err(RhiError::ZeroExtent { width, height }) => {
                    debug!("Surface resolved to {}x{}, waiting", width, height);
                    return Ok(TickOutcome::WaitingForExtent);
                }
                Err(e) => return Err(e),
            }
            self.rebuilds += 1;
            self.state = LoopState::Running;
            info!(
                "Presentation resumed at {}x{} (rebuild #{})",
                extent.width, extent.height, self.rebuilds
            );
        }

        self.render()
    }

    fn render(&mut self) -> RhiResult<TickOutcome> {
        let slot = self.counter.slot();
        self.backend.wait_for_slot(slot)?;

        let (image_index, suboptimal) = match self.backend.acquire_image(slot)? {
            AcquireOutcome::Image { index, suboptimal } => (index, suboptimal),
            AcquireOutcome::OutOfDate => {
                self.state = LoopState::Resizing;
                return Ok(TickOutcome::Skipped);
            }
        };

        self.backend.submit(slot, image_index)?;
        let presented = self.backend.present(slot, image_index)?;

        self.counter.advance();
        if presented.was_shown() {
            self.frames_presented += 1;
        }

        if suboptimal || presented != PresentOutcome::Presented || self.resize.is_pending() {
            self.state = LoopState::Resizing;
        }

        Ok(TickOutcome::Presented { image_index })
    }

    /// Waits for the device and tears the backend down. Idempotent.
    pub fn shutdown(&mut self) -> RhiResult<()> {
        if self.state == LoopState::ShuttingDown {
            return Ok(());
        }
        self.state = LoopState::ShuttingDown;

        let idle = self.backend.wait_device_idle();
        if let Err(ref e) = idle {
            warn!("Device wait failed during shutdown: {}", e);
        }
        self.backend.teardown();

        info!(
            "Presentation loop shut down after {} frames, {} rebuilds",
            self.frames_presented, self.rebuilds
        );
        idle
    }

    /// Ticks until `next_extent` returns `None` (window closed), then shuts
    /// down. A failed tick shuts down before its error is returned.
    ///
    /// Returns the number of frames that reached the screen.
    pub fn run<F>(&mut self, mut next_extent: F) -> RhiResult<u64>
    where
        F: FnMut() -> Option<vk::Extent2D>,
    {
        while let Some(extent) = next_extent() {
            match self.tick(extent) {
                Ok(TickOutcome::ShutDown) => break,
                Ok(_) => {}
                Err(e) => {
                    if let Err(shutdown_err) = self.shutdown() {
                        warn!("Shutdown after fatal error also failed: {}", shutdown_err);
                    }
                    return Err(e);
                }
            }
        }
        self.shutdown()?;
        Ok(self.frames_presented)
    }

    #[inline]
    pub fn state(&self) -> LoopState {
        self.state
    }

    #[inline]
    pub fn counter(&self) -> FrameCounter {
        self.counter
    }

    #[inline]
    pub fn rebuilds(&self) -> u64 {
        self.rebuilds
    }

    /// Frames that reached the screen; out-of-date presents are not counted.
    #[inline]
    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    #[inline]
    pub fn backend(&self) -> &B {
        &self.backend
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;
    use crate::MAX_FRAMES_IN_FLIGHT;
    use crate::frame_synchronizer::SlotLedger;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Call {
        Wait(usize),
        Acquire(usize),
        Submit { slot: usize, image: u32 },
        Present { slot: usize, image: u32 },
        Idle,
        Rebuild(vk::Extent2D),
        Teardown,
    }

    /// Models a swapchain of `image_count` images whose submissions complete
    /// as soon as the host waits on their slot.
    struct FakeBackend {
        built_extent: Option<vk::Extent2D>,
        image_count: u32,
        next_image: u32,
        ledger: SlotLedger,
        max_in_flight: usize,
        acquire_script: VecDeque<AcquireOutcome>,
        present_script: VecDeque<PresentOutcome>,
        submitted_extents: Vec<vk::Extent2D>,
        calls: Vec<Call>,
        teardowns: usize,
        device_lost: bool,
        /// Rebuilds left that see a zero-area surface.
        minimized_rebuilds: usize,
    }

    impl FakeBackend {
        fn built(extent: vk::Extent2D) -> Self {
            Self {
                built_extent: Some(extent),
                image_count: 3,
                next_image: 0,
                ledger: SlotLedger::new(),
                max_in_flight: 0,
                acquire_script: VecDeque::new(),
                present_script: VecDeque::new(),
                submitted_extents: Vec::new(),
                calls: Vec::new(),
                teardowns: 0,
                device_lost: false,
                minimized_rebuilds: 0,
            }
        }

        fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
            self.calls.iter().filter(|c| pred(c)).count()
        }
    }

    impl FrameBackend for FakeBackend {
        fn is_built(&self) -> bool {
            self.built_extent.is_some()
        }

        fn wait_for_slot(&mut self, slot: usize) -> RhiResult<()> {
            self.calls.push(Call::Wait(slot));
            self.ledger.observe(slot);
            Ok(())
        }

        fn acquire_image(&mut self, slot: usize) -> RhiResult<AcquireOutcome> {
            self.calls.push(Call::Acquire(slot));
            if self.device_lost {
                return Err(RhiError::VulkanError(vk::Result::ERROR_DEVICE_LOST));
            }
            if let Some(outcome) = self.acquire_script.pop_front() {
                return Ok(outcome);
            }
            let index = self.next_image;
            self.next_image = (self.next_image + 1) % self.image_count;
            Ok(AcquireOutcome::Image {
                index,
                suboptimal: false,
            })
        }

        fn submit(&mut self, slot: usize, image_index: u32) -> RhiResult<()> {
            self.calls.push(Call::Submit {
                slot,
                image: image_index,
            });
            self.ledger.arm(slot)?;
            self.max_in_flight = self.max_in_flight.max(self.ledger.in_flight());
            if let Some(extent) = self.built_extent {
                self.submitted_extents.push(extent);
            }
            Ok(())
        }

        fn present(&mut self, slot: usize, image_index: u32) -> RhiResult<PresentOutcome> {
            self.calls.push(Call::Present {
                slot,
                image: image_index,
            });
            Ok(self
                .present_script
                .pop_front()
                .unwrap_or(PresentOutcome::Presented))
        }

        fn wait_device_idle(&mut self) -> RhiResult<()> {
            self.calls.push(Call::Idle);
            for slot in 0..MAX_FRAMES_IN_FLIGHT {
                self.ledger.observe(slot);
            }
            Ok(())
        }

        fn rebuild(&mut self, extent: vk::Extent2D) -> RhiResult<()> {
            self.calls.push(Call::Rebuild(extent));
            if self.minimized_rebuilds > 0 {
                self.minimized_rebuilds -= 1;
                return Err(RhiError::ZeroExtent {
                    width: 0,
                    height: 0,
                });
            }
            self.built_extent = Some(extent);
            self.next_image = 0;
            Ok(())
        }

        fn teardown(&mut self) {
            self.calls.push(Call::Teardown);
            self.teardowns += 1;
            self.built_extent = None;
        }
    }

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    fn new_loop() -> (PresentationLoop<FakeBackend>, ResizeSignal) {
        let resize = ResizeSignal::new();
        let backend = FakeBackend::built(extent(640, 480));
        (PresentationLoop::new(backend, resize.clone()), resize)
    }

    #[test]
    fn test_thousand_frames_wrap_counter_500_times() {
        let (mut pl, _resize) = new_loop();
        for _ in 0..1000 {
            let outcome = pl.tick(extent(640, 480)).unwrap();
            assert!(matches!(outcome, TickOutcome::Presented { .. }));
        }
        assert_eq!(pl.counter().ticks(), 1000);
        assert_eq!(pl.counter().wraps(), 500);
        assert_eq!(pl.rebuilds(), 0);
        assert_eq!(pl.frames_presented(), 1000);
    }

    #[test]
    fn test_in_flight_never_exceeds_two() {
        let (mut pl, _resize) = new_loop();
        for _ in 0..100 {
            pl.tick(extent(640, 480)).unwrap();
        }
        assert!(pl.backend().max_in_flight <= MAX_FRAMES_IN_FLIGHT);
        assert_eq!(pl.backend().max_in_flight, MAX_FRAMES_IN_FLIGHT);
    }

    #[test]
    fn test_every_submit_is_preceded_by_a_wait_on_its_slot() {
        let (mut pl, _resize) = new_loop();
        for _ in 0..10 {
            pl.tick(extent(640, 480)).unwrap();
        }

        let calls = &pl.backend().calls;
        for (i, call) in calls.iter().enumerate() {
            if let Call::Submit { slot, .. } = call {
                assert_eq!(calls[i - 2], Call::Wait(*slot));
                assert_eq!(calls[i - 1], Call::Acquire(*slot));
            }
        }
    }

    #[test]
    fn test_resize_mid_loop_rebuilds_exactly_once() {
        let (mut pl, resize) = new_loop();
        for _ in 0..10 {
            pl.tick(extent(640, 480)).unwrap();
        }

        resize.notify();
        for _ in 0..10 {
            pl.tick(extent(800, 600)).unwrap();
        }

        assert_eq!(pl.rebuilds(), 1);
        assert!(!resize.is_pending());
        assert_eq!(
            pl.backend().count(|c| matches!(c, Call::Rebuild(_))),
            1
        );

        let submitted = &pl.backend().submitted_extents;
        assert_eq!(submitted.len(), 20);
        assert!(submitted[..10].iter().all(|&e| e == extent(640, 480)));
        assert!(submitted[10..].iter().all(|&e| e == extent(800, 600)));
    }

    #[test]
    fn test_repeated_resize_notifications_collapse() {
        let (mut pl, resize) = new_loop();
        resize.notify();
        resize.notify();
        resize.notify();
        pl.tick(extent(800, 600)).unwrap();
        pl.tick(extent(800, 600)).unwrap();
        assert_eq!(pl.rebuilds(), 1);
    }

    #[test]
    fn test_out_of_date_acquire_skips_submit_then_rebuilds() {
        let (mut pl, _resize) = new_loop();
        pl.tick(extent(640, 480)).unwrap();

        pl.backend.acquire_script.push_back(AcquireOutcome::OutOfDate);
        let before = pl.backend().calls.len();
        let outcome = pl.tick(extent(640, 480)).unwrap();
        assert_eq!(outcome, TickOutcome::Skipped);
        assert_eq!(pl.state(), LoopState::Resizing);

        let tick_calls = &pl.backend().calls[before..];
        assert!(
            !tick_calls
                .iter()
                .any(|c| matches!(c, Call::Submit { .. } | Call::Present { .. }))
        );
        // The slot is reused on the next tick; its fence was never reset.
        assert_eq!(pl.counter().ticks(), 1);

        let outcome = pl.tick(extent(640, 480)).unwrap();
        assert!(matches!(outcome, TickOutcome::Presented { .. }));
        assert_eq!(pl.rebuilds(), 1);
        assert_eq!(pl.state(), LoopState::Running);
    }

    #[test]
    fn test_suboptimal_acquire_still_presents_then_rebuilds() {
        let (mut pl, _resize) = new_loop();
        pl.backend.acquire_script.push_back(AcquireOutcome::Image {
            index: 0,
            suboptimal: true,
        });

        let outcome = pl.tick(extent(640, 480)).unwrap();
        assert_eq!(outcome, TickOutcome::Presented { image_index: 0 });
        assert_eq!(pl.state(), LoopState::Resizing);

        pl.tick(extent(640, 480)).unwrap();
        assert_eq!(pl.rebuilds(), 1);
    }

    #[test]
    fn test_out_of_date_present_triggers_rebuild() {
        let (mut pl, _resize) = new_loop();
        pl.backend.present_script.push_back(PresentOutcome::OutOfDate);

        pl.tick(extent(640, 480)).unwrap();
        assert_eq!(pl.state(), LoopState::Resizing);

        pl.tick(extent(640, 480)).unwrap();
        assert_eq!(pl.rebuilds(), 1);
        assert_eq!(pl.state(), LoopState::Running);
    }

    #[test]
    fn test_suboptimal_present_triggers_rebuild() {
        let (mut pl, _resize) = new_loop();
        pl.backend.present_script.push_back(PresentOutcome::Suboptimal);

        pl.tick(extent(640, 480)).unwrap();
        assert_eq!(pl.state(), LoopState::Resizing);

        pl.tick(extent(640, 480)).unwrap();
        assert_eq!(pl.rebuilds(), 1);
    }

    #[test]
    fn test_only_shown_frames_are_counted() {
        let (mut pl, _resize) = new_loop();
        pl.backend.present_script.extend([
            PresentOutcome::Presented,
            PresentOutcome::OutOfDate,
            PresentOutcome::Suboptimal,
        ]);

        for _ in 0..3 {
            pl.tick(extent(640, 480)).unwrap();
        }

        assert_eq!(pl.frames_presented(), 2);
        // Every submission still advances the slot.
        assert_eq!(pl.counter().ticks(), 3);
    }

    #[test]
    fn test_minimized_surface_waits_without_tearing_down() {
        let (mut pl, resize) = new_loop();
        pl.tick(extent(640, 480)).unwrap();

        pl.backend.minimized_rebuilds = 2;
        resize.notify();
        let before = pl.backend().calls.len();

        for _ in 0..2 {
            assert_eq!(
                pl.tick(extent(800, 600)).unwrap(),
                TickOutcome::WaitingForExtent
            );
            assert_eq!(pl.state(), LoopState::Resizing);
        }
        assert_eq!(pl.rebuilds(), 0);
        assert_eq!(pl.backend().built_extent, Some(extent(640, 480)));
        assert_eq!(pl.backend().teardowns, 0);
        assert!(
            !pl.backend().calls[before..]
                .iter()
                .any(|c| matches!(c, Call::Submit { .. } | Call::Present { .. }))
        );

        let outcome = pl.tick(extent(800, 600)).unwrap();
        assert!(matches!(outcome, TickOutcome::Presented { .. }));
        assert_eq!(pl.rebuilds(), 1);
        assert_eq!(pl.backend().built_extent, Some(extent(800, 600)));
    }

    #[test]
    fn test_rebuild_waits_for_device_idle_first() {
        let (mut pl, resize) = new_loop();
        resize.notify();
        pl.tick(extent(800, 600)).unwrap();

        let calls = &pl.backend().calls;
        let rebuild = calls
            .iter()
            .position(|c| matches!(c, Call::Rebuild(_)))
            .unwrap();
        assert_eq!(calls[rebuild - 1], Call::Idle);
    }

    #[test]
    fn test_zero_extent_waits_without_rebuilding() {
        let (mut pl, resize) = new_loop();
        resize.notify();

        for _ in 0..5 {
            assert_eq!(
                pl.tick(extent(0, 600)).unwrap(),
                TickOutcome::WaitingForExtent
            );
        }
        assert_eq!(pl.tick(extent(800, 0)).unwrap(), TickOutcome::WaitingForExtent);
        assert_eq!(pl.rebuilds(), 0);
        assert!(resize.is_pending());

        let outcome = pl.tick(extent(800, 600)).unwrap();
        assert!(matches!(outcome, TickOutcome::Presented { .. }));
        assert_eq!(pl.rebuilds(), 1);
        assert!(!resize.is_pending());
    }

    #[test]
    fn test_unbuilt_backend_builds_on_first_tick() {
        let mut backend = FakeBackend::built(extent(640, 480));
        backend.built_extent = None;
        let mut pl = PresentationLoop::new(backend, ResizeSignal::new());
        assert_eq!(pl.state(), LoopState::Resizing);

        pl.tick(extent(640, 480)).unwrap();
        assert_eq!(pl.rebuilds(), 1);
        assert_eq!(pl.backend().built_extent, Some(extent(640, 480)));
    }

    #[test]
    fn test_shutdown_tears_down_once() {
        let (mut pl, _resize) = new_loop();
        pl.tick(extent(640, 480)).unwrap();

        pl.shutdown().unwrap();
        pl.shutdown().unwrap();
        assert_eq!(pl.backend().teardowns, 1);
        assert_eq!(pl.state(), LoopState::ShuttingDown);
        assert_eq!(pl.tick(extent(640, 480)).unwrap(), TickOutcome::ShutDown);

        let calls = &pl.backend().calls;
        let n = calls.len();
        assert_eq!(calls[n - 2], Call::Idle);
        assert_eq!(calls[n - 1], Call::Teardown);
    }

    #[test]
    fn test_run_until_close() {
        let (mut pl, _resize) = new_loop();
        let mut remaining = 25;
        let presented = pl
            .run(|| {
                if remaining == 0 {
                    None
                } else {
                    remaining -= 1;
                    Some(extent(640, 480))
                }
            })
            .unwrap();

        assert_eq!(presented, 25);
        assert_eq!(pl.backend().teardowns, 1);
    }

    #[test]
    fn test_run_shuts_down_on_fatal_error() {
        let (mut pl, _resize) = new_loop();
        pl.backend.device_lost = true;

        let result = pl.run(|| Some(extent(640, 480)));
        assert!(matches!(
            result,
            Err(RhiError::VulkanError(vk::Result::ERROR_DEVICE_LOST))
        ));
        assert_eq!(pl.backend().teardowns, 1);
        assert_eq!(pl.state(), LoopState::ShuttingDown);
    }
}
