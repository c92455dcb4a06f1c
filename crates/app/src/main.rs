mod canvas;

use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{Receiver, RecvTimeoutError},
        Arc,
    },
    time::Duration,
};

use audio_visualiser_core::{
    frame_channel, list_input_devices, list_output_devices, render_channel, render_packet,
    AppConfig, CaptureWorker, Color, OutputRing, RenderMode, RenderPacket, Visualiser,
    VisualiserError,
};
use clap::{Args, Parser, Subcommand};
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use tracing_subscriber::EnvFilter;

use crate::canvas::TerminalCanvas;

/// How long one interface tick waits for a packet before polling the
/// keyboard again.
const FRAME_WAIT: Duration = Duration::from_millis(50);

/// Colours the 'c' key steps through.
const COLOR_CYCLE: [Color; 6] = [
    Color::WHITE,
    Color::new(0xff, 0x55, 0x55),
    Color::new(0x55, 0xff, 0x55),
    Color::new(0x55, 0x55, 0xff),
    Color::new(0xff, 0xff, 0x55),
    Color::new(0x55, 0xff, 0xff),
];

fn main() -> audio_visualiser_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Live(args) => run_live(args),
        Commands::Devices => run_devices(),
    }
}

fn run_live(args: LiveArgs) -> audio_visualiser_core::Result<()> {
    let config = load_config(&args)?;
    config.validate()?;
    tracing::info!(
        chunk_size = config.audio.chunk_size,
        sample_rate = config.audio.sample_rate,
        "starting live mode"
    );

    let (frame_tx, frame_rx) = frame_channel();
    let (render_tx, render_rx) = render_channel();
    let playback = OutputRing::new(config.audio.chunk_size * 4);

    let mut visualiser = Visualiser::new(config.clone(), frame_tx, playback.clone());
    visualiser.select_input_device(args.input.as_deref())?;
    visualiser.select_output_device(args.output.as_deref())?;

    let stop = Arc::new(AtomicBool::new(false));
    let worker = CaptureWorker::new(
        frame_rx,
        playback,
        visualiser.state_handle(),
        render_tx,
        stop.clone(),
    )
    .spawn()?;

    let outcome = if args.dump {
        run_dump(&render_rx, &config, args.frames)
    } else {
        run_interactive(&mut visualiser, &render_rx)
    };

    stop.store(true, Ordering::Relaxed);
    visualiser.close_devices();
    match worker.join() {
        Ok(result) => result?,
        Err(_) => return Err("capture worker panicked".into()),
    }
    outcome
}

fn run_devices() -> audio_visualiser_core::Result<()> {
    println!("Input devices:");
    for device in list_input_devices()? {
        let marker = if device.is_default { " (default)" } else { "" };
        println!("  {}{marker}", device.name);
    }

    println!("Output devices:");
    for device in list_output_devices()? {
        let marker = if device.is_default { " (default)" } else { "" };
        println!("  {}{marker}", device.name);
    }
    Ok(())
}

// Headless mode: lay frames out against the configured canvas and print one
// JSON array of primitives per line.
fn run_dump(
    renders: &Receiver<RenderPacket>,
    config: &AppConfig,
    limit: Option<u64>,
) -> audio_visualiser_core::Result<()> {
    let canvas = config.canvas_size();
    let mut emitted = 0u64;

    loop {
        if let Some(limit) = limit {
            if emitted >= limit {
                return Ok(());
            }
        }

        let packet = match renders.recv_timeout(Duration::from_secs(1)) {
            Ok(packet) => packet,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return Err("render channel closed".into()),
        };

        let primitives = packet.mode.render(&packet.frame, canvas, packet.color)?;
        let line = serde_json::to_string(&primitives)
            .map_err(|err| VisualiserError::msg(err.to_string()))?;
        println!("{line}");
        emitted += 1;
    }
}

fn run_interactive(
    visualiser: &mut Visualiser,
    renders: &Receiver<RenderPacket>,
) -> audio_visualiser_core::Result<()> {
    let mut canvas = TerminalCanvas::new()?;

    loop {
        while event::poll(Duration::ZERO)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press && handle_key(visualiser, key.code)? {
                    return Ok(());
                }
            }
        }

        match renders.recv_timeout(FRAME_WAIT) {
            Ok(packet) => {
                if let Err(err) = render_packet(&packet, &mut canvas) {
                    tracing::warn!(%err, "frame skipped");
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return Err("render channel closed".into()),
        }
    }
}

// Returns true when the interface should quit.
fn handle_key(visualiser: &mut Visualiser, code: KeyCode) -> audio_visualiser_core::Result<bool> {
    match code {
        KeyCode::Char('q') | KeyCode::Esc => return Ok(true),
        KeyCode::Char(digit @ '1'..='7') => {
            let index = digit as usize - '1' as usize;
            visualiser.select_mode(RenderMode::ALL[index])?;
        }
        KeyCode::Char('c') => cycle_color(visualiser)?,
        KeyCode::Char('i') => cycle_input_device(visualiser)?,
        KeyCode::Char('o') => cycle_output_device(visualiser)?,
        _ => {}
    }
    Ok(false)
}

fn cycle_color(visualiser: &Visualiser) -> audio_visualiser_core::Result<()> {
    let current = visualiser.snapshot()?.color;
    let position = COLOR_CYCLE.iter().position(|&color| color == current);
    let next = COLOR_CYCLE[position.map_or(0, |p| p + 1) % COLOR_CYCLE.len()];
    visualiser.select_color(next)
}

// A failed reselection keeps the current device running, so these only warn.
fn cycle_input_device(visualiser: &mut Visualiser) -> audio_visualiser_core::Result<()> {
    let devices = list_input_devices()?;
    if devices.is_empty() {
        return Ok(());
    }

    let current = visualiser.snapshot()?.input_device;
    let position = current
        .as_deref()
        .and_then(|name| devices.iter().position(|device| device.name == name));
    let next = &devices[position.map_or(0, |p| p + 1) % devices.len()];
    if let Err(err) = visualiser.select_input_device(Some(&next.name)) {
        tracing::warn!(%err, device = %next.name, "input reselection failed");
    }
    Ok(())
}

fn cycle_output_device(visualiser: &mut Visualiser) -> audio_visualiser_core::Result<()> {
    let devices = list_output_devices()?;
    if devices.is_empty() {
        return Ok(());
    }

    let current = visualiser.snapshot()?.output_device;
    let position = current
        .as_deref()
        .and_then(|name| devices.iter().position(|device| device.name == name));
    let next = &devices[position.map_or(0, |p| p + 1) % devices.len()];
    if let Err(err) = visualiser.select_output_device(Some(&next.name)) {
        tracing::warn!(%err, device = %next.name, "output reselection failed");
    }
    Ok(())
}

fn load_config(args: &LiveArgs) -> audio_visualiser_core::Result<AppConfig> {
    let mut config = match &args.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };

    if let Some(chunk_size) = args.chunk_size {
        config.audio.chunk_size = chunk_size;
    }
    if let Some(mode) = args.mode {
        config.visual.mode = mode;
    }
    if let Some(color) = &args.color {
        config.visual.bar_color = Color::from_hex(color)?;
    }
    Ok(config)
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Real-time audio visualiser", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Capture, play through and visualise live audio.
    Live(LiveArgs),
    /// List the available audio devices.
    Devices,
}

#[derive(Args, Debug)]
struct LiveArgs {
    /// Optional JSON config file.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Input device name (case-insensitive substring match).
    #[arg(short, long)]
    input: Option<String>,
    /// Output device name (case-insensitive substring match).
    #[arg(short, long)]
    output: Option<String>,
    /// Initial render mode.
    #[arg(short, long)]
    mode: Option<RenderMode>,
    /// Initial bar colour as #rrggbb.
    #[arg(long)]
    color: Option<String>,
    /// Samples per captured frame.
    #[arg(long)]
    chunk_size: Option<usize>,
    /// Print draw primitives as JSON lines instead of opening a canvas.
    #[arg(long)]
    dump: bool,
    /// With --dump, stop after this many frames.
    #[arg(long)]
    frames: Option<u64>,
}
