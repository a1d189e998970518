mod app;

use std::{error::Error, fs::OpenOptions};

use clap::Parser;
use glam::Vec3;
use mesh::SphereParams;
use renderer::RendererConfig;
use scene::Spin;
use shared::{CameraInfo, Projection};
use tracing::info;
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt, Layer};
use winit::event_loop::EventLoop;

use crate::app::ApplicationWrapper;

/// Renders a rotating, flat-coloured sphere.
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Sphere radius
    #[arg(long, default_value_t = 1.0)]
    pub radius: f32,
    /// Longitude divisions
    #[arg(long, default_value_t = 8)]
    pub sectors: u32,
    /// Latitude divisions
    #[arg(long, default_value_t = 8)]
    pub stacks: u32,
    /// Shared, smooth vertex normals instead of flat faces
    #[arg(long, default_value_t = false)]
    pub smooth: bool,
    /// Point the normals (and front faces) inwards
    #[arg(long, default_value_t = false)]
    pub reverse_normals: bool,
    /// Draw back faces too
    #[arg(long, default_value_t = false)]
    pub no_cull: bool,

    #[arg(long, default_value_t = 800)]
    pub width: u32,
    #[arg(long, default_value_t = 600)]
    pub height: u32,

    /// Distance from the camera to the sphere centre
    #[arg(long, default_value_t = 4.0)]
    pub camera_distance: f32,
    /// Vertical field of view in degrees
    #[arg(long, default_value_t = 40.0)]
    pub fov: f32,
    /// Orthographic instead of perspective projection
    #[arg(long, default_value_t = false)]
    pub ortho: bool,

    #[arg(long, default_value_t = 50.0)]
    pub degrees_per_second: f32,

    /// Also write logs to log-debug.log
    #[arg(short, long, default_value_t = false)]
    pub debug_log: bool,
    /// Disable the Vulkan validation layers
    #[arg(long, default_value_t = false)]
    pub no_validation: bool,
}

impl Args {
    pub fn sphere_params(&self) -> SphereParams {
        SphereParams::new(self.radius, self.sectors, self.stacks, self.smooth)
    }

    pub fn camera_info(&self) -> CameraInfo {
        let projection = if self.ortho {
            // Same apparent size as the perspective view at the sphere's centre.
            let height = 2.0 * self.camera_distance * (self.fov.to_radians() * 0.5).tan();
            Projection::Orthographic { height }
        } else {
            Projection::Perspective
        };
        CameraInfo {
            distance: self.camera_distance,
            fov_y_degrees: self.fov,
            projection,
            ..Default::default()
        }
    }

    pub fn spin(&self) -> Result<Spin, scene::SceneError> {
        Spin::new(Vec3::new(0.5, 1.0, 0.0), self.degrees_per_second)
    }

    pub fn renderer_config(&self) -> RendererConfig {
        RendererConfig {
            cull_back_faces: !self.no_cull,
            camera: self.camera_info(),
            ..Default::default()
        }
    }

    pub fn enable_validation(&self) -> bool {
        cfg!(debug_assertions) && !self.no_validation
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    color_eyre::install()?;
    let args = Args::parse();

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_ansi(true)
        .with_file(false)
        .with_line_number(false)
        .with_filter(filter::LevelFilter::DEBUG);

    let registry = tracing_subscriber::registry().with(fmt_layer);

    if args.debug_log {
        let log_file = OpenOptions::new()
            .append(true)
            .create(true)
            .open("log-debug.log")?;

        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .without_time()
            .with_writer(log_file)
            .with_filter(filter::LevelFilter::DEBUG);

        registry.with(file_layer).init();
    } else {
        registry.init();
    }

    info!("Starting with {:?}", args);

    let event_loop = EventLoop::new()?;

    info!("Starting event loop...");
    let mut app = ApplicationWrapper::new(args);
    event_loop.run_app(&mut app)?;

    // Start-up failures end the loop early; surface them as the exit error.
    app.into_result()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("engine").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn defaults_reproduce_the_demo() {
        let args = parse(&[]);

        assert_eq!(args.sphere_params(), SphereParams::new(1.0, 8, 8, false));
        assert_eq!((args.width, args.height), (800, 600));
        assert!(!args.reverse_normals);
        assert!(!args.debug_log);

        assert_eq!(args.camera_info(), CameraInfo::default());
        assert_eq!(args.renderer_config(), RendererConfig::default());

        let spin = args.spin().unwrap();
        assert_eq!(spin, Spin::default());
    }

    #[test]
    fn flags_are_parsed() {
        let args = parse(&[
            "--radius",
            "2.5",
            "--sectors",
            "36",
            "--stacks",
            "18",
            "--smooth",
            "--reverse-normals",
            "--no-cull",
            "--width",
            "1024",
            "--height",
            "768",
            "--degrees-per-second",
            "90",
            "-d",
            "--no-validation",
        ]);

        assert_eq!(args.sphere_params(), SphereParams::new(2.5, 36, 18, true));
        assert!(args.reverse_normals);
        assert!(!args.renderer_config().cull_back_faces);
        assert_eq!((args.width, args.height), (1024, 768));
        assert_eq!(args.spin().unwrap().degrees_per_second(), 90.0);
        assert!(args.debug_log);
        assert!(!args.enable_validation());
    }

    #[test]
    fn ortho_matches_the_perspective_framing() {
        let args = parse(&["--ortho", "--camera-distance", "4", "--fov", "90"]);
        let camera = args.camera_info();

        assert_eq!(camera.distance, 4.0);
        match camera.projection {
            Projection::Orthographic { height } => assert!((height - 8.0).abs() < 1e-4),
            other => panic!("expected orthographic projection, got {other:?}"),
        }
    }

    #[test]
    fn malformed_values_are_rejected() {
        let argv = ["engine", "--sectors", "-3"];
        assert!(Args::try_parse_from(argv).is_err());

        let argv = ["engine", "--radius", "big"];
        assert!(Args::try_parse_from(argv).is_err());
    }
}
