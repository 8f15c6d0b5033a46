
use std::error::Error as StdError;
use std::io::{self, Write};
use std::path::PathBuf;
use std::thread;
use std::time::Instant;

use clap::{Parser, Subcommand};
use log::{info, LevelFilter};
use serde::Serialize;

use scopectl::config::RunConfig;
use scopectl::devices::Identity;
use scopectl::devices::oscilloscope::{Encoding, ScreenshotArtifact, Session};
use scopectl::devices::signal_generator::{SignalGenerator, Waveform};
use scopectl::render::{self, Renderer, View};
use scopectl::synthetic;
use scopectl::Result;

// Tolerance between the ASCII and binary copies of the same record
const ENCODING_TOLERANCE:f32 = 1e-5;

#[derive(Parser, Debug)]
#[command(name = "scopectl", version, about = "Single-shot oscilloscope acquisition and signal generator control")]
struct Cli {
    /// TOML run configuration; built-in defaults when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// -v for debug, -vv for trace
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Configure, arm, wait, fetch the trace in both encodings, screenshot and export
    Acquire {
        /// Instrument resource string, e.g. TCPIP::10.0.0.5::INSTR or SIM
        #[arg(short, long)]
        address: Option<String>,
        /// Encoding of the exported trace (ascii or binary)
        #[arg(short, long)]
        encoding: Option<Encoding>,
        #[arg(long)]
        csv: Option<PathBuf>,
        /// Host path for the copied screenshot
        #[arg(long)]
        screenshot: Option<PathBuf>,
        #[arg(long)]
        no_screenshot: bool,
    },
    /// Set signal generator frequency, power, waveform and output
    Siggen {
        #[arg(short, long)]
        address: Option<String>,
        #[arg(short, long)]
        frequency_mhz: Option<f64>,
        #[arg(short, long, allow_hyphen_values = true)]
        power_dbm: Option<f64>,
        #[arg(short, long)]
        waveform: Option<Waveform>,
        /// Turn the RF output on
        #[arg(long, conflicts_with = "off")]
        on: bool,
        /// Turn the RF output off
        #[arg(long)]
        off: bool,
    },
    /// Print the synthetic waveform table
    Table {
        #[arg(short, long, default_value_t = synthetic::TABLE_ROWS)]
        rows: usize,
    },
    /// Draw the mock live trace in the terminal
    Live {
        /// 1, 2, 3 or "all"
        #[arg(long, default_value = "1", value_parser = parse_view)]
        channel: View,
        /// Stop after this many frames
        #[arg(short, long, default_value_t = 50)]
        frames: u32,
        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        offset: f64,
        #[arg(long, default_value_t = 100)]
        cols: usize,
        #[arg(long, default_value_t = 25)]
        lines: usize,
    },
}

fn parse_view(s:&str) -> std::result::Result<View, String> {
    if s.eq_ignore_ascii_case("all") { return Ok(View::All); }
    match s.trim_start_matches(|c:char| c.is_ascii_alphabetic()).parse::<u8>() {
        Ok(n) if n >= 1 && n <= render::DISPLAY_CHANNELS => Ok(View::Channel(n)),
        _ => Err(format!("expected 1..{} or \"all\", got '{}'", render::DISPLAY_CHANNELS, s)),
    }
}

#[derive(Serialize)]
struct AcquisitionSummary {
    address: String,
    identity: Identity,
    options: Vec<String>,
    points: usize,
    x_start: f64,
    x_stop: f64,
    dominant_frequency_hz: Option<f64>,
    encodings_agree: bool,
    csv: PathBuf,
    screenshot: Option<ScreenshotArtifact>,
}

fn acquire(cfg:&RunConfig, json:bool) -> Result<()> {
    let mut session = Session::connect(&cfg.address, cfg.session.clone())?;
    let channel = cfg.acquisition.channel;

    session.configure(&cfg.acquisition)?;
    session.wait_for_settled()?;
    session.arm()?;
    session.wait_for_acquisition()?;

    let binary = session.fetch_trace(channel, Encoding::Real32)?;
    let ascii = session.fetch_trace(channel, Encoding::Ascii)?;
    let encodings_agree = binary.approx_eq(&ascii, ENCODING_TOLERANCE);
    if !encodings_agree {
        log::warn!("ASCII and binary traces differ by more than {}", ENCODING_TOLERANCE);
    }

    let exported = match cfg.output.encoding { Encoding::Real32 => &binary, Encoding::Ascii => &ascii };
    exported.write_csv(&cfg.output.trace_csv)?;
    info!("Wrote {} samples to {}", exported.len(), cfg.output.trace_csv.display());

    let screenshot = if cfg.output.instrument_screenshot.is_empty() { None } else {
        session.capture_screenshot(&cfg.output.instrument_screenshot)?;
        Some(session.transfer_file(&cfg.output.instrument_screenshot, &cfg.output.host_screenshot)?)
    };

    let summary = AcquisitionSummary {
        address: cfg.address.clone(),
        identity: session.identity().clone(),
        options: session.options().to_vec(),
        points: exported.len(),
        x_start: exported.x_start,
        x_stop: exported.x_stop,
        dominant_frequency_hz: exported.dominant_frequency(),
        encodings_agree,
        csv: cfg.output.trace_csv.clone(),
        screenshot,
    };
    session.close()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary).map_err(|e| io::Error::new(io::ErrorKind::Other, e))?);
    } else {
        println!("{}", summary.identity);
        println!("{} points from {:e} s to {:e} s", summary.points, summary.x_start, summary.x_stop);
        if let Some(f) = summary.dominant_frequency_hz { println!("Dominant frequency: {:.3} Hz", f); }
        println!("ASCII and binary agree: {}", summary.encodings_agree);
        println!("Trace: {}", summary.csv.display());
        if let Some(s) = &summary.screenshot { println!("Screenshot: {} ({} bytes)", s.path.display(), s.size); }
    }
    Ok(())
}

fn siggen(cfg:&RunConfig) -> Result<()> {
    let mut generator = SignalGenerator::connect(cfg.generator_address(), cfg.session.clone())?;
    generator.apply(&cfg.signal)?;
    let on = generator.output()?;
    println!("{}: {} at {} MHz, {} dBm, output {}", generator.identity(), cfg.signal.waveform,
        cfg.signal.frequency_mhz, cfg.signal.power_dbm, if on { "on" } else { "off" });
    generator.close()
}

fn table(rows:usize, json:bool) -> Result<()> {
    let data = synthetic::waveform_table(rows);
    if json {
        println!("{}", serde_json::to_string(&data).map_err(|e| io::Error::new(io::ErrorKind::Other, e))?);
        return Ok(());
    }

    let stdout = io::stdout();
    let mut out = stdout.lock();
    writeln!(out, "{:>8} {:>10}", "time", "voltage")?;
    for (t, v) in data {
        writeln!(out, "{:>8.1} {:>10.4}", t, v)?;
    }
    Ok(())
}

fn live(view:View, frames:u32, offset:f64, cols:usize, lines:usize) -> Result<()> {
    let mut renderer = Renderer::new(view).with_offset(offset);
    let stdout = io::stdout();
    let mut last = Instant::now();

    for _ in 0..frames {
        let frame = renderer.frame();
        let mut out = stdout.lock();
        write!(out, "\x1b[2J\x1b[H")?;
        for line in render::rasterize(&frame, cols, lines) {
            writeln!(out, "{}", line)?;
        }
        writeln!(out, "phase {:.1}", frame.phase)?;
        out.flush()?;
        drop(out);

        thread::sleep(renderer.step());
        let now = Instant::now();
        renderer.advance(now - last);
        last = now;
    }
    Ok(())
}

fn run(cli:Cli) -> Result<()> {
    let mut cfg = match &cli.config {
        Some(path) => RunConfig::load(path)?,
        None => RunConfig::default(),
    };

    match cli.command {
        Command::Acquire{ address, encoding, csv, screenshot, no_screenshot } => {
            if let Some(a) = address { cfg.address = a; }
            if let Some(e) = encoding { cfg.output.encoding = e; }
            if let Some(p) = csv { cfg.output.trace_csv = p; }
            if let Some(p) = screenshot { cfg.output.host_screenshot = p; }
            if no_screenshot { cfg.output.instrument_screenshot.clear(); }
            acquire(&cfg, cli.json)
        },
        Command::Siggen{ address, frequency_mhz, power_dbm, waveform, on, off } => {
            if let Some(a) = address { cfg.generator_address = Some(a); }
            if let Some(f) = frequency_mhz { cfg.signal.frequency_mhz = f; }
            if let Some(p) = power_dbm { cfg.signal.power_dbm = p; }
            if let Some(w) = waveform { cfg.signal.waveform = w; }
            if on { cfg.signal.output = true; }
            if off { cfg.signal.output = false; }
            siggen(&cfg)
        },
        Command::Table{ rows } => table(rows, cli.json),
        Command::Live{ channel, frames, offset, cols, lines } => live(channel, frames, offset, cols, lines),
    }
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    // RUST_LOG, when set, takes precedence over -v
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        let mut source = e.source();
        while let Some(s) = source {
            eprintln!("  caused by: {}", s);
            source = s.source();
        }
        std::process::exit(1);
    }
}
