//! 3D Viewer - Main Entry Point
//!
//! Opens a window and presents a triangle every frame until the window is
//! closed or any key is pressed.

use anyhow::{Result, anyhow};
use tracing::{error, info};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::WindowId;

use viewer_core::{Timer, ViewerConfig, config_path};
use viewer_platform::{ResizeSignal, Window};
use viewer_renderer::{PresentationLoop, TickOutcome, Viewer, vk};

struct App {
    config: ViewerConfig,
    resize: ResizeSignal,
    // Declared before `window` so the surface goes before the window.
    presentation: Option<PresentationLoop<Viewer>>,
    window: Option<Window>,
    timer: Timer,
    frames: u64,
    fatal: Option<anyhow::Error>,
}

impl App {
    fn new(config: ViewerConfig) -> Self {
        Self {
            config,
            resize: ResizeSignal::new(),
            presentation: None,
            window: None,
            timer: Timer::new(),
            frames: 0,
            fatal: None,
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let window = Window::new(event_loop, &self.config.window)?;
        let viewer = Viewer::new(&window, &self.config)?;
        self.presentation = Some(PresentationLoop::new(viewer, self.resize.clone()));
        self.window = Some(window);
        self.timer.reset();
        info!("Initialization complete, entering main loop");
        Ok(())
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        let (Some(window), Some(presentation)) = (&self.window, &mut self.presentation) else {
            return;
        };

        let (width, height) = window.framebuffer_extent();
        match presentation.tick(vk::Extent2D { width, height }) {
            Ok(TickOutcome::WaitingForExtent) => event_loop.set_control_flow(ControlFlow::Wait),
            Ok(TickOutcome::ShutDown) => event_loop.exit(),
            Ok(_) => {}
            Err(e) => {
                error!("Fatal render error: {}", e);
                self.fatal = Some(anyhow!(e));
                self.shutdown();
                event_loop.exit();
            }
        }
    }

    fn shutdown(&mut self) {
        if let Some(mut presentation) = self.presentation.take() {
            self.frames = presentation.frames_presented();
            if let Err(e) = presentation.shutdown() {
                error!("Shutdown failed: {}", e);
            }
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        if let Err(e) = self.init(event_loop) {
            error!("Failed to initialize viewer: {:#}", e);
            self.fatal = Some(e);
            event_loop.exit();
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested, shutting down");
                self.shutdown();
                event_loop.exit();
            }
            WindowEvent::KeyboardInput { event, .. } if event.state.is_pressed() => {
                info!("Key pressed, shutting down");
                self.shutdown();
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                info!("Window resized to {}x{}", size.width, size.height);
                self.resize.notify();
                event_loop.set_control_flow(ControlFlow::Poll);
                if let Some(ref window) = self.window {
                    window.request_redraw();
                }
            }
            WindowEvent::RedrawRequested => self.redraw(event_loop),
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if event_loop.control_flow() == ControlFlow::Poll
            && let Some(ref window) = self.window
        {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.shutdown();
    }
}

fn main() -> Result<()> {
    viewer_core::init_logging();

    let config = ViewerConfig::load(&config_path())?;
    info!("Starting {}", config.window.title);

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    info!(
        "Presented {} frames ({:.1} fps)",
        app.frames,
        app.timer.rate(app.frames)
    );

    match app.fatal.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
