//! capmock - Perspective logo placement for product mockups
//!
//! Composites a logo onto a photo of a product at a perspective-distorted
//! position given by four corner points, either in one shot from the command
//! line or interactively through a small web API.

mod blend;
mod capture;
mod config;
mod error;
mod geometry;
mod output;
mod pipeline;
mod raster;
mod server;
mod transform;
mod warp;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::capture::CaptureSession;
use crate::geometry::{Point, Quad};
use crate::pipeline::{CompositeRequest, Compositor};

/// capmock - preview a logo on a product photo
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Composite a logo onto a base image and write the result
    Compose {
        /// Base (product) photo
        #[arg(long)]
        base: PathBuf,

        /// Logo image; PNG alpha is honored
        #[arg(long)]
        logo: PathBuf,

        /// Destination corners as x,y (top-left, top-right, bottom-right, bottom-left)
        #[arg(long, num_args = 4, value_name = "X,Y", conflicts_with_all = ["center", "size"])]
        quad: Option<Vec<Point>>,

        /// Logo center as x,y for an undistorted placement
        #[arg(long, value_name = "X,Y", requires = "size")]
        center: Option<Point>,

        /// Logo size in pixels as w,h for an undistorted placement
        #[arg(long, value_name = "W,H", requires = "center")]
        size: Option<Point>,

        /// Treat --quad points as clicks on a preview this many pixels wide
        #[arg(long)]
        display_width: Option<u32>,

        /// Output path (defaults to the configured output)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Start the web API
    Serve {
        /// Web server host
        #[arg(long)]
        host: Option<String>,

        /// Web server port
        #[arg(short, long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let _subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    info!("capmock v{}", env!("CARGO_PKG_VERSION"));

    let config = config::Config::load_or_create(&args.config)?;

    match args.command {
        Command::Compose {
            base,
            logo,
            quad,
            center,
            size,
            display_width,
            output,
        } => {
            let handle = tokio::task::spawn_blocking(move || -> Result<_> {
                let quad = match (quad, center, size) {
                    (Some(points), _, _) => {
                        quad_from_points(&points, display_width, &base, &config)?
                    }
                    (None, Some(center), Some(size)) => Quad::centered(center, size.x, size.y)
                        .context("Invalid --center/--size placement")?,
                    _ => bail!("Either --quad or --center with --size is required"),
                };

                let output = output.unwrap_or_else(|| config.output.default_path());
                let request = CompositeRequest {
                    base: base.into(),
                    logo: logo.into(),
                    quad,
                    output,
                };
                Ok(Compositor::from_config(&config).run(request)?)
            })
            .await
            .context("Composite task panicked")??;

            println!("{}", handle.path.display());
        }
        Command::Serve { host, port } => {
            let host = host.unwrap_or_else(|| config.server.host.clone());
            let port = port.unwrap_or(config.server.port);

            let state = Arc::new(server::AppState::new(Arc::new(
                parking_lot::RwLock::new(config),
            )));

            let addr = format!("{}:{}", host, port);
            info!("Starting web server at http://{}", addr);
            server::run_server(&addr, state).await?;
        }
    }

    Ok(())
}

/// Build the destination quad from command-line corner points
///
/// With a display width the points go through a capture session, exactly as
/// clicks on a scaled preview would.
fn quad_from_points(
    points: &[Point],
    display_width: Option<u32>,
    base: &std::path::Path,
    config: &config::Config,
) -> Result<Quad> {
    let corners: [Point; 4] = points
        .try_into()
        .map_err(|_| anyhow::anyhow!("--quad needs exactly four points"))?;

    let Some(display_width) = display_width else {
        return Quad::new(corners, config.capture.winding).context("Invalid --quad");
    };

    let (width, height) = image::image_dimensions(base)
        .with_context(|| format!("Failed to read base image {:?}", base))?;
    let mut session = CaptureSession::new(width, height, display_width, config.capture.winding)?;
    for p in corners {
        session.add_point(p).context("Invalid --quad")?;
    }

    session
        .finish()
        .context("Capture session did not complete")
}
