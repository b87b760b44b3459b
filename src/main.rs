use anyhow::Context;
use clap::Parser;
use radio_engine::console::run_session;
use radio_engine::{
    DecoderCommand, EngineSettings, PlaybackController, PlayerSettings, SpectrumMonitor,
    SpectrumSettings, StreamingEngine, output_device_names,
};
use std::fs::File;
use std::io;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "radio-engine", version, about = "Stream internet radio to the speakers")]
struct Cli {
    /// Station URL to start with
    url: Option<String>,

    /// Output device name (as printed by --list-devices)
    #[arg(long)]
    device: Option<String>,

    /// Initial volume, 0-100
    #[arg(long, default_value_t = 50, value_parser = clap::value_parser!(u8).range(0..=100))]
    volume: u8,

    /// Number of spectrum bands
    #[arg(long, default_value_t = 9)]
    bands: usize,

    /// Decoder program; must accept ffmpeg's arguments
    #[arg(long, default_value = "ffmpeg")]
    decoder: String,

    /// Print output devices and exit
    #[arg(long)]
    list_devices: bool,

    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) -> anyhow::Result<()> {
    let level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let file = File::create("radio-engine.log").context("failed to create log file")?;
    let file_layer = fmt::layer()
        .with_writer(file)
        .with_ansi(false)
        .with_thread_names(true)
        .with_level(true);

    let console_layer = fmt::layer()
        .with_writer(io::stderr)
        .with_ansi(true)
        .with_target(false)
        .with_thread_names(true)
        .with_level(true);

    tracing_subscriber::registry()
        .with(level)
        .with(console_layer)
        .with(file_layer)
        .init();
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    if cli.list_devices {
        for name in output_device_names()? {
            println!("{name}");
        }
        return Ok(());
    }

    let mut engine_settings = EngineSettings::default().with_device_id(cli.device.clone());
    let mut decoder = DecoderCommand::ffmpeg(engine_settings.spec);
    decoder.program = cli.decoder.clone();
    engine_settings = engine_settings.with_decoder(decoder);

    let engine = StreamingEngine::with_cpal(engine_settings);
    let monitor = SpectrumMonitor::spawn(
        engine.chunk_slot(),
        SpectrumSettings::default().with_bands(cli.bands),
    )
    .context("failed to start spectrum monitor")?;
    let mut player = PlaybackController::new(
        engine,
        PlayerSettings::default().with_initial_volume(cli.volume),
    );

    if let Some(url) = cli.url.as_deref() {
        if let Err(e) = player.start_playback(Some(url)) {
            eprintln!("Error: {e}");
        }
    }

    let stdin = io::BufReader::new(io::stdin());
    run_session(stdin, &mut io::stdout(), &mut player, &monitor)
}
