//! x11m - magnified live mirror of an X11 window
//!
//! Mirrors one window into a new window scaled up by an integer factor,
//! repainting from damage events. Input on the mirror is translated back
//! to source coordinates and forwarded, so the mirror stays usable as a
//! control surface.
//!
//! ```text
//! x11m list                  → pick a window id
//! x11m mirror 0x3a00007 -s 3 → triple-size mirror of that window
//! ```

mod capture;
mod display;
mod error;
mod geometry;
mod mirror;
mod relay;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::display::DisplayServer;
use crate::geometry::Scale;

#[derive(Parser)]
#[command(name = "x11m")]
#[command(about = "Magnified live mirror of an X11 window")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mirror a window at an integer magnification
    /// Input on the mirror is forwarded to the source window
    Mirror {
        /// Source window id (hex 0x... or decimal)
        #[arg(value_name = "WINDOW")]
        window: String,

        /// Magnification factor (positive integer)
        #[arg(short, long, default_value = "2")]
        scale: Scale,

        /// X display to connect to (e.g., :0)
        #[arg(short, long)]
        display: Option<String>,
    },

    /// List viewable windows to pick a source from
    List {
        /// X display to connect to (e.g., :0)
        #[arg(short, long)]
        display: Option<String>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("x11m=info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Mirror {
            window,
            scale,
            display,
        } => run_mirror(&window, scale, display.as_deref()),
        Commands::List { display } => run_list(display.as_deref()),
    }
}

/// Parse a window id as printed by `x11m list` or `xwininfo`.
fn parse_window_id(s: &str) -> Result<u32> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.with_context(|| format!("invalid window id: {s}"))
}

fn run_mirror(window: &str, scale: Scale, display: Option<&str>) -> Result<()> {
    let source = parse_window_id(window)?;
    let server = DisplayServer::open(display)?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))
        .context("failed to install the interrupt handler")?;

    mirror::run(&server, source, scale, shutdown)
}

fn run_list(display: Option<&str>) -> Result<()> {
    let server = DisplayServer::open(display)?;
    let windows = server.list_windows()?;
    if windows.is_empty() {
        eprintln!("no viewable windows found");
        return Ok(());
    }
    for (id, info, name) in windows {
        println!(
            "{:#010x}  {:>4}x{:<4} {:+}{:+}  {}",
            id,
            info.width,
            info.height,
            info.x,
            info.y,
            name.as_deref().unwrap_or("(unnamed)")
        );
    }
    Ok(())
}
