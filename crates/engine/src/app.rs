use std::{
    ffi::CStr,
    sync::Arc,
    time::{Duration, Instant},
};

use ash::vk;
use gfx_hal::{
    device::Device,
    error::GfxHalError,
    instance::{Instance, InstanceConfig},
    physical_device::{PhysicalDevice, Suitability},
    surface::Surface,
};
use glam::Vec4;
use mesh::{MeshError, Sphere};
use renderer::{Renderer, RendererError};
use resource_manager::{ResourceManager, ResourceManagerError};
use scene::{Scene, SceneError};
use tracing::{debug, error, info, warn};
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::{ElementState, KeyEvent, WindowEvent},
    event_loop::ActiveEventLoop,
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowId},
};

use crate::Args;

const APP_NAME: &str = "Sphere Demo";
const ENGINE_NAME: &str = "Sphere Engine";

const SPHERE_COLOR: Vec4 = Vec4::new(1.0, 0.5, 0.2, 1.0);

const REQUIRED_DEVICE_EXTENSIONS: [&CStr; 1] = [ash::khr::swapchain::NAME];

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Window Creation Error: {0}")]
    WindowCreation(#[from] winit::error::OsError),
    #[error("Mesh Error: {0}")]
    Mesh(#[from] MeshError),
    #[error("Graphics HAL Error: {0}")]
    GfxHal(#[from] GfxHalError),
    #[error("Resource Manager Error: {0}")]
    ResourceManager(#[from] ResourceManagerError),
    #[error("Scene Error: {0}")]
    Scene(#[from] SceneError),
    #[error("Renderer Error: {0}")]
    Renderer(#[from] RendererError),
    #[error("Suitable physical device not found")]
    NoSuitableDevice,
}

/// Frames per second, averaged over windows of at least one second.
struct FpsCounter {
    frame_count: u32,
    window_start: Instant,
}

impl FpsCounter {
    fn new(now: Instant) -> Self {
        Self {
            frame_count: 0,
            window_start: now,
        }
    }

    /// Counts a frame; returns the rate once a full second has passed.
    fn tick(&mut self, now: Instant) -> Option<f64> {
        self.frame_count += 1;
        let elapsed = now.duration_since(self.window_start);
        if elapsed < Duration::from_secs(1) {
            return None;
        }
        let fps = self.frame_count as f64 / elapsed.as_secs_f64();
        self.frame_count = 0;
        self.window_start = now;
        Some(fps)
    }
}

fn window_title(fps: Option<f64>) -> String {
    match fps {
        Some(fps) => format!("{} - {} - {:.0} FPS", ENGINE_NAME, APP_NAME, fps),
        None => format!("{} - {}", ENGINE_NAME, APP_NAME),
    }
}

/// Everything that lives as long as the window. Fields drop top to bottom,
/// so GPU objects go before the device and the window goes last.
struct Application {
    renderer: Renderer,
    _resource_manager: Arc<ResourceManager>,
    _surface: Arc<Surface>,
    _device: Arc<Device>,
    _instance: Arc<Instance>,

    start_time: Instant,
    fps: FpsCounter,

    window: Arc<Window>,
}

impl Application {
    fn new(window: Arc<Window>, args: &Args) -> Result<Self, AppError> {
        info!("Initializing Application...");

        // Bad parameters should fail before any Vulkan work.
        let mut sphere = Sphere::new(args.sphere_params())?;
        if args.reverse_normals {
            sphere.reverse_normals();
        }

        let instance_config = InstanceConfig {
            application_name: APP_NAME.to_string(),
            engine_name: ENGINE_NAME.to_string(),
            enable_validation: args.enable_validation(),
            ..Default::default()
        };
        let instance = Instance::new(&instance_config, &*window)?;
        info!("Vulkan Instance created.");

        let surface = unsafe { instance.create_surface(&*window)? };
        info!("Vulkan Surface created.");

        let (physical_device, suitability) = pick_physical_device(&instance, &surface)?;
        let Suitability::Suitable {
            indices,
            properties,
            ..
        } = suitability
        else {
            return Err(AppError::NoSuitableDevice);
        };
        info!(
            "Selected Physical Device: {} ({:?})",
            physical_device.name(),
            properties.device_type
        );
        debug!("Using Queue Families: {:?}", indices);

        let device = unsafe {
            physical_device.create_logical_device(
                &REQUIRED_DEVICE_EXTENSIONS,
                &indices,
                &vk::PhysicalDeviceFeatures::default(),
            )?
        };

        let resource_manager = Arc::new(ResourceManager::new(instance.clone(), device.clone())?);
        info!("Resource Manager initialized.");

        let scene = Scene::new(
            &sphere,
            resource_manager.clone(),
            args.spin()?,
            SPHERE_COLOR,
        )?;

        let initial_size = window.inner_size();
        let renderer = Renderer::new(
            &instance,
            device.clone(),
            surface.clone(),
            resource_manager.clone(),
            scene,
            args.renderer_config(),
            initial_size.width,
            initial_size.height,
        )?;

        let now = Instant::now();
        Ok(Self {
            renderer,
            _resource_manager: resource_manager,
            _surface: surface,
            _device: device,
            _instance: instance,
            start_time: now,
            fps: FpsCounter::new(now),
            window,
        })
    }

    fn handle_event(
        &mut self,
        event: &WindowEvent,
        event_loop: &ActiveEventLoop,
    ) -> Result<(), AppError> {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested. Exiting...");
                event_loop.exit();
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(KeyCode::Escape),
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } => {
                info!("Escape pressed. Exiting...");
                event_loop.exit();
            }
            WindowEvent::Resized(physical_size) => {
                info!(
                    "Window resized to: {}x{}",
                    physical_size.width, physical_size.height
                );
                self.renderer
                    .resize(physical_size.width, physical_size.height);
            }
            WindowEvent::ScaleFactorChanged { scale_factor, .. } => {
                info!("Scale factor changed: {}", scale_factor);
                let new_inner_size = self.window.inner_size();
                self.renderer
                    .resize(new_inner_size.width, new_inner_size.height);
            }
            WindowEvent::RedrawRequested => {
                let now = Instant::now();
                if let Some(fps) = self.fps.tick(now) {
                    self.window.set_title(&window_title(Some(fps)));
                }

                let elapsed = now.duration_since(self.start_time);
                self.renderer.render_frame(elapsed)?;

                self.window.request_redraw();
            }
            _ => {}
        }
        Ok(())
    }
}

/// Picks the highest scoring suitable device.
fn pick_physical_device(
    instance: &Arc<Instance>,
    surface: &Surface,
) -> Result<(PhysicalDevice, Suitability), AppError> {
    let mut best: Option<(u32, PhysicalDevice, Suitability)> = None;

    for physical_device in instance.enumerate_physical_devices()? {
        let suitability =
            unsafe { physical_device.check_suitability(&REQUIRED_DEVICE_EXTENSIONS, surface)? };
        let score = match &suitability {
            Suitability::Suitable { score, .. } => *score,
            Suitability::NotSuitable { reason } => {
                warn!("Skipping physical device: {}", reason);
                continue;
            }
        };
        debug!("{} is suitable (score {})", physical_device.name(), score);
        if best.as_ref().map_or(true, |(best_score, ..)| score > *best_score) {
            best = Some((score, physical_device, suitability));
        }
    }

    best.map(|(_, physical_device, suitability)| (physical_device, suitability))
        .ok_or(AppError::NoSuitableDevice)
}

/// winit entry point. Holds the application once the window exists and the
/// first error that stopped the event loop.
pub struct ApplicationWrapper {
    args: Args,
    app: Option<Application>,
    error: Option<AppError>,
}

impl ApplicationWrapper {
    pub fn new(args: Args) -> Self {
        Self {
            args,
            app: None,
            error: None,
        }
    }

    /// The error that ended the event loop, if any.
    pub fn into_result(self) -> Result<(), AppError> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, e: AppError) {
        error!("{}", e);
        if self.error.is_none() {
            self.error = Some(e);
        }
        // Release GPU resources while the window still exists.
        self.app = None;
        event_loop.exit();
    }

    fn create_application(&self, event_loop: &ActiveEventLoop) -> Result<Application, AppError> {
        let attributes = Window::default_attributes()
            .with_title(window_title(None))
            .with_inner_size(PhysicalSize::new(self.args.width, self.args.height));
        let window = Arc::new(event_loop.create_window(attributes)?);
        Application::new(window, &self.args)
    }
}

impl ApplicationHandler for ApplicationWrapper {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.app.is_some() || self.error.is_some() {
            return;
        }
        match self.create_application(event_loop) {
            Ok(app) => {
                app.window.request_redraw();
                self.app = Some(app);
            }
            Err(e) => self.fail(event_loop, e),
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        let Some(app) = &mut self.app else {
            return;
        };
        if let Err(e) = app.handle_event(&event, event_loop) {
            self.fail(event_loop, e);
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        info!("Event loop exiting.");
        self.app = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fps_is_reported_once_per_second() {
        let start = Instant::now();
        let mut counter = FpsCounter::new(start);

        for i in 1..60 {
            let now = start + Duration::from_millis(i * 16);
            assert_eq!(counter.tick(now), None);
        }

        let fps = counter.tick(start + Duration::from_secs(1)).unwrap();
        assert!((fps - 60.0).abs() < 1e-9, "got {fps}");

        // the window restarts after a report
        assert_eq!(counter.tick(start + Duration::from_millis(1016)), None);
    }

    #[test]
    fn title_shows_rounded_fps() {
        assert_eq!(window_title(None), "Sphere Engine - Sphere Demo");
        assert_eq!(
            window_title(Some(59.6)),
            "Sphere Engine - Sphere Demo - 60 FPS"
        );
    }
}
