mod input_state;
mod timer;
mod watcher;

use std::path::Path;
use std::sync::Arc;
use color_eyre::{Report, Result};
use glam::Vec2;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{Key, NamedKey};
use winit::window::{Window, WindowId};
use crate::app::input_state::PointerState;
use crate::app::timer::{local_date, FrameTimer};
use crate::app::watcher::{DirectoryWatcher, MatchMode};
use crate::renderer::config::{RenderConfig, ResourcePaths, APP_NAME};
use crate::renderer::hot_reload::HotReloadCoordinator;
use crate::renderer::image_loader::FileImageDecoder;
use crate::renderer::shader_compiler::GlslCompiler;
use crate::renderer::shader_data::FrameInput;
use crate::renderer::Renderer;

/// Opens the window and runs the render loop until the window closes or a fatal error
/// occurs. The fatal error, if any, is returned after teardown.
pub fn run(config: RenderConfig) -> Result<()> {
    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;
    app.finish()
}

struct App {
    config: RenderConfig,
    reloader: HotReloadCoordinator,
    window: Option<Arc<Window>>,
    renderer: Option<Renderer>,
    image_watcher: Option<DirectoryWatcher>,
    shader_watcher: Option<DirectoryWatcher>,

    // State
    pointer: PointerState,
    timer: FrameTimer,
    frame_index: u64,
    close_requested: bool,
    fatal: Option<Report>,
}

impl App {
    fn new(config: RenderConfig) -> Self {
        let reloader = HotReloadCoordinator::new(
            config.paths(),
            Box::new(FileImageDecoder),
            Box::new(GlslCompiler),
        );

        Self {
            config,
            reloader,
            window: None,
            renderer: None,
            image_watcher: None,
            shader_watcher: None,

            pointer: PointerState::default(),
            timer: FrameTimer::new(),
            frame_index: 0,
            close_requested: false,
            fatal: None,
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let attributes = Window::default_attributes()
            .with_title(APP_NAME)
            .with_inner_size(PhysicalSize::new(self.config.width, self.config.height));
        let window = Arc::new(event_loop.create_window(attributes)?);

        let renderer = Renderer::new(window.clone(), &self.config, &self.reloader)?;

        let paths = self.reloader.paths();
        self.image_watcher = spawn_watcher(
            &paths.texture_dir,
            ResourcePaths::channel_watch_list(),
            MatchMode::CropExtension,
            &self.config,
        )?;
        self.shader_watcher = spawn_watcher(
            &paths.shader_dir,
            ResourcePaths::shader_watch_list(),
            MatchMode::Exact,
            &self.config,
        )?;

        self.window = Some(window);
        self.renderer = Some(renderer);
        self.timer = FrameTimer::new();
        Ok(())
    }

    /// One iteration of the outer loop: clock, title, pending reloads, then the frame.
    fn frame(&mut self) -> Result<()> {
        let (Some(window), Some(renderer)) = (self.window.as_ref(), self.renderer.as_mut()) else {
            return Ok(());
        };

        self.timer.tick();
        if self.timer.take_fps_updated() {
            let extent = renderer.extent();
            window.set_title(&format!(
                "{APP_NAME}  {}x{}    {}    {} fps",
                extent.width,
                extent.height,
                self.timer.elapsed().round(),
                self.timer.fps(),
            ));
        }

        if let Some(watcher) = self.image_watcher.as_mut() {
            if watcher.has_changes() {
                let changed = watcher.drain();
                self.reloader.on_image_changes(&changed, &mut *renderer)?;
            }
        }
        if let Some(watcher) = self.shader_watcher.as_mut() {
            if watcher.has_changes() {
                let changed = watcher.drain();
                self.reloader.on_shader_changes(&changed, &mut *renderer)?;
            }
        }

        let input = FrameInput {
            time: self.timer.elapsed(),
            delta: self.timer.delta(),
            frame_index: self.frame_index,
            mouse: self.pointer.as_vec4(),
            date: local_date(),
        };
        renderer.render(&input)?;
        self.frame_index += 1;

        Ok(())
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: Report) {
        log::error!("{err:#}");
        self.fatal.get_or_insert(err);
        self.close_requested = true;
        event_loop.exit();
    }

    /// Stops the watchers, releases the GPU, then reports the first fatal error.
    fn finish(mut self) -> Result<()> {
        let mut result = Ok(());
        for watcher in [self.image_watcher.take(), self.shader_watcher.take()]
            .into_iter()
            .flatten()
        {
            if let Err(err) = watcher.stop() {
                log::error!("{err}");
                result = Err(err);
            }
        }

        self.renderer = None;
        match self.fatal.take() {
            Some(err) => Err(err),
            None => result,
        }
    }
}

/// A missing directory disables reloading for it instead of failing startup.
fn spawn_watcher(
    directory: &Path,
    watched: Vec<String>,
    mode: MatchMode,
    config: &RenderConfig,
) -> Result<Option<DirectoryWatcher>> {
    if !directory.is_dir() {
        log::warn!("{} does not exist, changes in it are not watched", directory.display());
        return Ok(None);
    }
    DirectoryWatcher::spawn(directory.to_path_buf(), watched, mode, config.watch_interval()).map(Some)
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.renderer.is_some() || self.fatal.is_some() {
            return;
        }

        if let Err(err) = self.init(event_loop) {
            self.fail(event_loop, err);
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent
    ) {
        let Some(window) = self.window.as_ref() else {
            return;
        };
        if window_id != window.id() {
            return;
        }

        let size = window.inner_size();
        self.pointer
            .process_window_events(&event, Vec2::new(size.width as f32, size.height as f32));

        match event {
            WindowEvent::CloseRequested => {
                self.close_requested = true;
            }
            WindowEvent::Resized(_) | WindowEvent::ScaleFactorChanged { .. } => {
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.request_resize();
                }
            }
            WindowEvent::RedrawRequested => {
                if let Err(err) = self.frame() {
                    self.fail(event_loop, err);
                }
            }
            WindowEvent::KeyboardInput {
                event:
                KeyEvent {
                    logical_key: Key::Named(NamedKey::Escape),
                    state: ElementState::Pressed,
                    ..
                },
                ..
            } => {
                self.close_requested = true;
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.close_requested {
            event_loop.exit();
            return;
        }

        if let Some(window) = self.window.as_ref() {
            window.request_redraw();
        }
    }
}
