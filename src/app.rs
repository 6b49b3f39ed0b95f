use crate::config;
use crate::core::hardware::{HardwareMessage, HardwareWriter, PinLayout, SerialDevice};
use crate::game::clap::{ClapMapper, SynthClap};
use crate::game::parsing::simfile::load_simfile;
use crate::game::player::{
    self, ChartPlayer, ClockSource, EndReason, PlayerEvent, PlayerHandle, PlayerOptions,
    WriteEvent,
};
use crate::game::row::ChartInstant;
use crate::game::schedule::{EventScheduler, MessageKind};
use crate::game::snap::{self, SnapPin};
use crate::game::song::Simfile;
use crate::game::time::Time;
use clap::Parser;
use log::{info, warn};
use std::error::Error;
use std::fmt::Write as _;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "etternuino", about = "Plays SM simfiles on a lane/snap lamp controller")]
#[command(version)]
pub struct Cli {
    /// Path to a .sm simfile
    pub simfile: PathBuf,

    /// Chart to play, as listed by --list
    #[arg(long, default_value_t = 0)]
    pub chart: usize,

    /// List the simfile's charts and exit
    #[arg(long)]
    pub list: bool,

    /// Pin controller device file
    #[arg(long)]
    pub device: Option<PathBuf>,

    /// Do not open the pin controller
    #[arg(long)]
    pub no_hardware: bool,

    /// Keep the music silent
    #[arg(long)]
    pub no_music: bool,

    /// Mix a clap into the audio on every note
    #[arg(long)]
    pub claps: bool,

    /// Audio time, in seconds, that plays when playback starts
    #[arg(long, allow_hyphen_values = true)]
    pub sound_start: Option<String>,

    /// Print the hardware message sequence as JSON lines and exit
    #[arg(long)]
    pub dump_schedule: bool,

    /// Configuration file to use instead of etternuino.ini
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Transport {
    Pause,
    Resume,
    Seek(Time),
    ToggleMute,
    Quit,
}

fn parse_command(line: &str) -> Option<Transport> {
    let line = line.trim();
    let (head, rest) = line.split_once(' ').unwrap_or((line, ""));
    match head {
        "p" | "pause" => Some(Transport::Pause),
        "r" | "resume" => Some(Transport::Resume),
        "s" | "seek" => Time::parse(rest.trim()).ok().map(Transport::Seek),
        "m" | "mute" => Some(Transport::ToggleMute),
        "q" | "quit" => Some(Transport::Quit),
        _ => None,
    }
}

fn spawn_stdin_reader() -> Receiver<Transport> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            match parse_command(&line) {
                Some(cmd) => {
                    if tx.send(cmd).is_err() {
                        break;
                    }
                }
                None if line.trim().is_empty() => {}
                None => eprintln!("commands: p | r | s <seconds> | m | q"),
            }
        }
    });
    rx
}

/// Console stand-in for the lamp board: mirrors pin state and prints one
/// line per main message.
struct Visualizer {
    layout: PinLayout,
    pins: Vec<bool>,
}

impl Visualizer {
    fn new(layout: PinLayout) -> Self {
        let pins = vec![false; layout.message_length()];
        Self { layout, pins }
    }

    fn apply(&mut self, message: &HardwareMessage) {
        message.apply_to(&mut self.pins);
    }

    fn render(&self, event: &WriteEvent) -> String {
        let mut line = format!("{:>9.3}s  ", event.time.to_f64());
        for lane in 0..self.layout.lane_count() {
            let lit = self
                .layout
                .lane_pin(lane)
                .is_some_and(|pin| self.pins[pin]);
            line.push(if lit { '#' } else { '.' });
        }
        line.push_str("  ");
        for role in SnapPin::ALL {
            let lit = self.pins[self.layout.snap_pin(role)];
            line.push(if lit { '*' } else { '-' });
        }
        if let Some(row) = &event.row {
            let snap = snap::classify(row.position());
            let [r, g, b] = snap.color();
            let _ = write!(
                line,
                "  \x1b[38;2;{r};{g};{b}m1/{:<3}\x1b[0m {}",
                snap.value(),
                row.bare()
            );
        }
        line
    }
}

fn list_charts(simfile: &Simfile) {
    println!(
        "{} / {} ({} BPM)",
        simfile.metadata.full_title(),
        simfile.metadata.artist,
        simfile.display_bpm()
    );
    for (i, chart) in simfile.charts.iter().enumerate() {
        println!(
            "  [{i}] {} ({} lanes, {} rows)",
            chart.label(),
            chart.lanes(),
            chart.notes.len()
        );
    }
}

fn dump_schedule(
    simfile: &Simfile,
    chart: usize,
    sound_start: &Time,
    scheduler: &EventScheduler,
) -> Result<(), Box<dyn Error>> {
    let chart = simfile
        .chart(chart)
        .ok_or_else(|| format!("chart {chart} does not exist"))?;
    let rows = player::scheduled_rows(chart, sound_start)?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for message in scheduler.schedule(&rows) {
        writeln!(out, "{}", serde_json::to_string(&message.record())?)?;
    }
    Ok(())
}

fn open_hardware(device: &std::path::Path) -> Option<Box<dyn HardwareWriter>> {
    match SerialDevice::open(device) {
        Ok(device) => Some(Box::new(device)),
        Err(e) => {
            warn!(
                "Pin controller at {} unavailable ({e}); continuing without hardware.",
                device.display()
            );
            None
        }
    }
}

fn apply_transport(handle: &PlayerHandle, command: Transport) -> bool {
    match command {
        Transport::Pause => handle.pause(),
        Transport::Resume => handle.resume(),
        Transport::Seek(time) => handle.seek(time),
        Transport::ToggleMute => {
            let muted = !handle.is_hardware_muted();
            handle.set_hardware_muted(muted);
            println!("hardware {}", if muted { "muted" } else { "live" });
        }
        Transport::Quit => {
            handle.stop();
            return false;
        }
    }
    true
}

pub fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let simfile = load_simfile(&cli.simfile)?;
    if cli.list {
        list_charts(&simfile);
        return Ok(());
    }

    let cfg = config::get();
    let sound_start = match &cli.sound_start {
        Some(text) => Time::parse(text)?,
        None => cfg.sound_start.clone(),
    };
    let params = cfg.schedule_params();

    if cli.dump_schedule {
        return dump_schedule(&simfile, cli.chart, &sound_start, &EventScheduler::new(params));
    }

    let writer = if cli.no_hardware || !cfg.hardware_enabled {
        None
    } else {
        open_hardware(cli.device.as_deref().unwrap_or(&cfg.device))
    };
    let clap_mapper: Option<Arc<dyn ClapMapper>> = if cli.claps || cfg.claps {
        Some(Arc::new(SynthClap::default()))
    } else {
        None
    };
    let options = PlayerOptions {
        chart_index: cli.chart,
        sound_start,
        music_out: cfg.music_out && !cli.no_music,
        clap_mapper,
        schedule: params.clone(),
        poll_interval: cfg.poll_interval(),
        clock: ClockSource::Audio,
    };

    println!("{}", simfile.metadata.full_title());
    if let Some(chart) = simfile.chart(cli.chart) {
        println!("{}", chart.label());
    }
    let (handle, events) = ChartPlayer::spawn(Arc::new(simfile), options, writer);
    let commands = spawn_stdin_reader();
    let mut visualizer = Visualizer::new(params.layout);
    let mut failed = None;

    loop {
        while let Ok(command) = commands.try_recv() {
            if !apply_transport(&handle, command) {
                break;
            }
        }
        match events.recv_timeout(Duration::from_millis(20)) {
            Ok(PlayerEvent::Started) => {
                println!("p pause | r resume | s <seconds> seek | m mute | q quit");
            }
            Ok(PlayerEvent::ChartObtained(rows)) => info!("{} rows scheduled.", rows.len()),
            Ok(PlayerEvent::Wrote(event)) => {
                visualizer.apply(&event.message);
                if event.kind == MessageKind::Main {
                    println!("{}", visualizer.render(&event));
                }
            }
            Ok(PlayerEvent::Failed(e)) => failed = Some(e),
            Ok(PlayerEvent::Ended(reason)) => {
                info!("Session ended: {reason:?}.");
                if reason == EndReason::Completed {
                    println!("done");
                }
                break;
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    handle.join();

    match failed {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}
