//! QuadMap - corner-pin projection mapping
//!
//! Maps image, video and live camera textures onto freely draggable
//! quadrilateral surfaces. The engine renders the output on the CPU and
//! serves it as an MJPEG stream next to a web control panel.

mod capture;
mod config;
mod engine;
mod error;
mod geometry;
mod history;
mod interaction;
mod media;
mod presets;
mod project;
mod render;
mod server;
mod snow;
mod state;
mod surface;
mod texture;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use crate::engine::{Engine, EngineSettings};
use crate::render::Frame;
use crate::server::AppState;

/// QuadMap - projection mapping server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "quadmap.toml")]
    config: PathBuf,

    /// Web server host (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Web server port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Output width (overrides config)
    #[arg(long)]
    width: Option<u32>,

    /// Output height (overrides config)
    #[arg(long)]
    height: Option<u32>,

    /// Render rate (overrides config)
    #[arg(long)]
    fps: Option<u32>,

    /// Project document to load at start-up
    #[arg(long)]
    project: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// Tick and render at the configured rate, publishing JPEG frames
fn run_render_loop(state: Arc<AppState>) -> Result<()> {
    let output = state.config().output.clone();
    let frame_interval = Duration::from_secs_f64(1.0 / output.fps.max(1) as f64);
    let mut frame = Frame::new(1, 1);
    let mut frames: u64 = 0;
    let mut last_log = Instant::now();

    info!("Render loop started at {} fps", output.fps);

    loop {
        let started = Instant::now();

        {
            let mut engine = state.engine.lock();
            engine.tick(started);
            engine.render(started, &mut frame);
        }

        match frame.to_jpeg(output.preview_quality) {
            Ok(jpeg) => state.update_preview(jpeg),
            Err(e) => warn!("Failed to encode frame: {:#}", e),
        }
        frames += 1;

        if last_log.elapsed() >= Duration::from_secs(10) {
            let fps = frames as f64 / last_log.elapsed().as_secs_f64();
            debug!("Rendering at {:.1} fps ({}x{})", fps, frame.width(), frame.height());
            frames = 0;
            last_log = Instant::now();
        }

        let elapsed = started.elapsed();
        if elapsed < frame_interval {
            std::thread::sleep(frame_interval - elapsed);
        }
    }
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

    info!("QuadMap v{}", env!("CARGO_PKG_VERSION"));

    // Load or create configuration
    let mut config = config::Config::load_or_create(&args.config)?;

    // CLI args override config file values
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(width) = args.width {
        config.output.width = width;
    }
    if let Some(height) = args.height {
        config.output.height = height;
    }
    if let Some(fps) = args.fps {
        config.output.fps = fps;
    }

    let viewport = config.output.viewport();
    info!(
        "Output: {}x{} @ {}x, {} fps",
        config.output.width, config.output.height, viewport.device_pixel_ratio, config.output.fps
    );

    let mut engine = Engine::new(viewport, EngineSettings::from_config(&config));

    if let Some(path) = &args.project {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read project from {:?}", path))?;
        engine
            .import_project(&text)
            .with_context(|| format!("Failed to load project {:?}", path))?;
        info!("Loaded project {:?}", path);
    }

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = Arc::new(AppState::new(engine, config));

    // Start the render loop
    let render_state = state.clone();
    let render_handle = tokio::task::spawn_blocking(move || run_render_loop(render_state));

    // Start the web server
    info!("Starting web server at http://{}", addr);
    let server_state = state.clone();
    let server_handle = tokio::spawn(async move {
        server::run_server(&addr, server_state).await
    });

    // Wait for either to finish (or error)
    tokio::select! {
        result = render_handle => {
            match result {
                Ok(Ok(())) => info!("Render loop exited normally"),
                Ok(Err(e)) => tracing::error!("Render loop error: {}", e),
                Err(e) => tracing::error!("Render loop panicked: {}", e),
            }
        }
        result = server_handle => {
            match result {
                Ok(Ok(())) => info!("Server exited normally"),
                Ok(Err(e)) => tracing::error!("Server error: {}", e),
                Err(e) => tracing::error!("Server task panicked: {}", e),
            }
        }
    }

    Ok(())
}
