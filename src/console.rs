use anyhow::Result;
use crossbeam_channel::{Receiver, select, tick, unbounded};
use std::io::{BufRead, Write};
use std::thread;
use std::time::Duration;

use crate::analysis::SpectrumMonitor;
use crate::error::PlaybackError;
use crate::player::PlaybackController;

const HEALTH_INTERVAL: Duration = Duration::from_millis(500);
const VOLUME_STEP: i32 = 5;
const BARS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    TogglePlay,
    VolumeUp,
    VolumeDown,
    ToggleMute,
    Spectrum,
    Station(String),
    Status,
    Help,
    Quit,
}

/// Map one input line to a command. A lone space toggles playback.
pub fn parse_command(line: &str) -> Option<Command> {
    let raw = line.trim_end_matches(['\r', '\n']);
    if raw == " " {
        return Some(Command::TogglePlay);
    }
    let mut parts = raw.trim().splitn(2, char::is_whitespace);
    let head = parts.next()?.to_lowercase();
    let rest = parts.next().map(str::trim).filter(|s| !s.is_empty());
    let cmd = match (head.as_str(), rest) {
        ("p" | "play" | "space", None) => Command::TogglePlay,
        ("+" | "=" | "up", None) => Command::VolumeUp,
        ("-" | "down", None) => Command::VolumeDown,
        ("m" | "mute", None) => Command::ToggleMute,
        ("s" | "spectrum", None) => Command::Spectrum,
        ("u" | "url", Some(url)) => Command::Station(url.to_string()),
        ("" | "status", None) => Command::Status,
        ("h" | "help" | "?", None) => Command::Help,
        ("q" | "quit" | "exit", None) => Command::Quit,
        _ => return None,
    };
    Some(cmd)
}

/// One block character per band, scaled by its level.
pub fn render_bars(bands: &[f32]) -> String {
    bands
        .iter()
        .map(|v| {
            let idx = (v.clamp(0.0, 1.0) * (BARS.len() - 1) as f32).round() as usize;
            BARS[idx]
        })
        .collect()
}

pub fn status_line(player: &PlaybackController) -> String {
    let station = player.current_url().unwrap_or("<none>");
    let state = if player.is_playing() {
        format!("Now playing: {station}")
    } else {
        format!("Stopped ({station})")
    };
    if player.is_muted() {
        format!("{state} | Muted")
    } else {
        format!("{state} | Volume: {}", player.volume())
    }
}

/// Interactive loop: reads commands from `input`, reports to `out`, polls
/// stream health in between. Returns on `q` or end of input.
pub fn run_session<R, W>(
    input: R,
    out: &mut W,
    player: &mut PlaybackController,
    monitor: &SpectrumMonitor,
) -> Result<()>
where
    R: BufRead + Send + 'static,
    W: Write,
{
    let lines = spawn_line_reader(input)?;
    let health = tick(HEALTH_INTERVAL);

    writeln!(out, "Commands: p|space play/stop, +/- volume, m mute, s spectrum, u URL, q quit")?;
    writeln!(out, "{}", status_line(player))?;

    loop {
        select! {
            recv(lines) -> line => {
                let Ok(line) = line else { break };
                let Some(cmd) = parse_command(&line) else {
                    writeln!(out, "unknown command: {}", line.trim())?;
                    continue;
                };
                if cmd == Command::Quit {
                    break;
                }
                execute(cmd, out, player, monitor)?;
                report_health(out, player)?;
            }
            recv(health) -> _ => report_health(out, player)?,
        }
    }

    player.cleanup();
    writeln!(out, "bye")?;
    Ok(())
}

fn execute<W: Write>(
    cmd: Command,
    out: &mut W,
    player: &mut PlaybackController,
    monitor: &SpectrumMonitor,
) -> Result<()> {
    match cmd {
        Command::TogglePlay if player.is_playing() => {
            player.stop_playback();
            writeln!(out, "{}", status_line(player))?;
        }
        Command::TogglePlay => start(out, player, None)?,
        Command::Station(url) => start(out, player, Some(&url))?,
        Command::VolumeUp => {
            player.change_volume(VOLUME_STEP);
            writeln!(out, "{}", status_line(player))?;
        }
        Command::VolumeDown => {
            player.change_volume(-VOLUME_STEP);
            writeln!(out, "{}", status_line(player))?;
        }
        Command::ToggleMute => {
            player.toggle_mute();
            writeln!(out, "{}", status_line(player))?;
        }
        Command::Spectrum => {
            let snap = monitor.snapshot();
            writeln!(out, "[{}] #{}", render_bars(&snap.bands), snap.sequence)?;
        }
        Command::Status => writeln!(out, "{}", status_line(player))?,
        Command::Help => {
            writeln!(out, "p|space play/stop, +/- volume, m mute, s spectrum, u URL, q quit")?
        }
        Command::Quit => {}
    }
    Ok(())
}

fn start<W: Write>(out: &mut W, player: &mut PlaybackController, url: Option<&str>) -> Result<()> {
    match player.start_playback(url) {
        Ok(()) => writeln!(out, "{}", status_line(player))?,
        Err(PlaybackError::NoStation) => writeln!(out, "No station selected; use `u URL`")?,
        Err(e) => writeln!(out, "Error: {e}")?,
    }
    Ok(())
}

fn report_health<W: Write>(out: &mut W, player: &mut PlaybackController) -> Result<()> {
    let was_playing = player.is_playing();
    match player.check_health() {
        Err(e) => writeln!(out, "Error: {e}")?,
        Ok(false) if was_playing => writeln!(out, "Stream ended")?,
        Ok(_) => {}
    }
    Ok(())
}

fn spawn_line_reader<R: BufRead + Send + 'static>(input: R) -> Result<Receiver<String>> {
    let (tx, rx) = unbounded();
    thread::Builder::new()
        .name("console-input".into())
        .spawn(move || {
            for line in input.lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        })?;
    Ok(rx)
}
