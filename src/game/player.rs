use crate::core::audio::{self, AudioError, AudioOutput, Mixer, OutputDevice, Track};
use crate::core::clock::{ElapsedClock, PlaybackClock};
use crate::core::hardware::{HardwareMessage, HardwareWriter};
use crate::game::chart::{Chart, ChartError};
use crate::game::clap::ClapMapper;
use crate::game::row::ScheduledRow;
use crate::game::schedule::{EventScheduler, MessageKind, ScheduleParams, ScheduledMessage};
use crate::game::song::Simfile;
use crate::game::time::Time;
use log::{debug, info, trace, warn};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Idle,
    Loading,
    Armed,
    Running,
    Paused,
    Finished,
    Cancelled,
}

#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("chart {0} does not exist")]
    MissingChart(usize),
    #[error(transparent)]
    Chart(#[from] ChartError),
    #[error("simfile has no playable music")]
    MissingAudio,
    #[error(transparent)]
    Audio(#[from] AudioError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    Completed,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone)]
pub struct WriteEvent {
    pub time: Time,
    pub message: HardwareMessage,
    pub kind: MessageKind,
    /// Row that produced the message.
    pub row: Option<ScheduledRow>,
}

#[derive(Debug)]
pub enum PlayerEvent {
    Started,
    ChartObtained(Arc<[ScheduledRow]>),
    Wrote(WriteEvent),
    Failed(PlayerError),
    Ended(EndReason),
}

/// Where playback time comes from.
#[derive(Clone)]
pub enum ClockSource {
    /// The mixer's frame cursor on the default output device. Falls back to
    /// wall-clock time when neither music nor claps are requested.
    Audio,
    Elapsed,
    Injected(Arc<dyn PlaybackClock>),
}

#[derive(Clone)]
pub struct PlayerOptions {
    pub chart_index: usize,
    /// Audio time that plays at playback time 0. Negative values lead in
    /// with silence.
    pub sound_start: Time,
    pub music_out: bool,
    pub clap_mapper: Option<Arc<dyn ClapMapper>>,
    pub schedule: ScheduleParams,
    pub poll_interval: Duration,
    pub clock: ClockSource,
}

impl Default for PlayerOptions {
    fn default() -> Self {
        Self {
            chart_index: 0,
            sound_start: Time::zero(),
            music_out: true,
            clap_mapper: None,
            schedule: ScheduleParams::default(),
            poll_interval: Duration::from_millis(1),
            clock: ClockSource::Audio,
        }
    }
}

struct Control {
    state: PlayerState,
    pause: Option<bool>,
    seek: Option<Time>,
    stop: bool,
    hardware_muted: bool,
}

struct Shared {
    control: Mutex<Control>,
    wake: Condvar,
}

impl Shared {
    fn set_state(&self, state: PlayerState) {
        self.control.lock().unwrap().state = state;
    }

    fn request(&self, f: impl FnOnce(&mut Control)) {
        let mut control = self.control.lock().unwrap();
        f(&mut control);
        self.wake.notify_all();
    }
}

/// Transport for a running session. Requests take effect at the driver's
/// next wait point.
pub struct PlayerHandle {
    shared: Arc<Shared>,
    thread: Option<thread::JoinHandle<()>>,
}

impl PlayerHandle {
    pub fn pause(&self) {
        self.shared.request(|c| c.pause = Some(true));
    }

    pub fn resume(&self) {
        self.shared.request(|c| c.pause = Some(false));
    }

    pub fn seek(&self, time: Time) {
        self.shared.request(|c| c.seek = Some(time));
    }

    pub fn stop(&self) {
        self.shared.request(|c| c.stop = true);
    }

    pub fn set_hardware_muted(&self, muted: bool) {
        self.shared.request(|c| c.hardware_muted = muted);
    }

    pub fn is_hardware_muted(&self) -> bool {
        self.shared.control.lock().unwrap().hardware_muted
    }

    pub fn state(&self) -> PlayerState {
        self.shared.control.lock().unwrap().state
    }

    pub fn join(mut self) {
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            warn!("Player thread panicked.");
        }
    }
}

enum Wake {
    Arrived,
    Seeked,
    Stopped,
}

struct Prepared {
    rows: Arc<[ScheduledRow]>,
    messages: Vec<ScheduledMessage>,
    clock: Arc<dyn PlaybackClock>,
    _output: Option<AudioOutput>,
}

fn elapsed_clock() -> Arc<dyn PlaybackClock> {
    Arc::new(ElapsedClock::new())
}

/// Non-blank rows of a timed chart, moved onto the playback clock: a row at
/// chart time `t` plays at `t - sound_start`.
pub fn scheduled_rows(chart: &Chart, sound_start: &Time) -> Result<Vec<ScheduledRow>, ChartError> {
    let offset = -sound_start.clone();
    Ok(chart
        .timed_rows()?
        .iter()
        .filter(|row| !row.positioned.row.is_blank())
        .map(|row| ScheduledRow::from_timed(row.clone(), &offset))
        .collect())
}

/// Plays one chart of a simfile: compiles its message sequence, then writes
/// each message when the playback clock reaches it.
pub struct ChartPlayer {
    simfile: Arc<Simfile>,
    options: PlayerOptions,
    writer: Option<Box<dyn HardwareWriter>>,
    shared: Arc<Shared>,
    events: Sender<PlayerEvent>,
}

impl ChartPlayer {
    /// Starts a driver thread for the session.
    pub fn spawn(
        simfile: Arc<Simfile>,
        options: PlayerOptions,
        writer: Option<Box<dyn HardwareWriter>>,
    ) -> (PlayerHandle, Receiver<PlayerEvent>) {
        let (events, rx) = mpsc::channel();
        let shared = Arc::new(Shared {
            control: Mutex::new(Control {
                state: PlayerState::Idle,
                pause: None,
                seek: None,
                stop: false,
                hardware_muted: false,
            }),
            wake: Condvar::new(),
        });
        let player = ChartPlayer {
            simfile,
            options,
            writer,
            shared: shared.clone(),
            events,
        };
        let thread = thread::spawn(move || player.run());
        (
            PlayerHandle {
                shared,
                thread: Some(thread),
            },
            rx,
        )
    }

    fn emit(&self, event: PlayerEvent) {
        // The receiver may be gone; playback continues regardless.
        let _ = self.events.send(event);
    }

    fn run(mut self) {
        self.shared.set_state(PlayerState::Loading);
        let prepared = match self.load() {
            Ok(prepared) => prepared,
            Err(e) => {
                warn!("Playback failed to load: {e}");
                self.emit(PlayerEvent::Failed(e));
                self.emit(PlayerEvent::Ended(EndReason::Failed));
                self.shared.set_state(PlayerState::Finished);
                return;
            }
        };
        self.shared.set_state(PlayerState::Armed);

        let clock = prepared.clock.clone();
        clock.resume();
        if self.shared.control.lock().unwrap().stop {
            self.cancel(clock.as_ref());
            return;
        }
        self.shared.set_state(PlayerState::Running);
        self.emit(PlayerEvent::Started);
        self.emit(PlayerEvent::ChartObtained(prepared.rows.clone()));
        info!(
            "Playing {} rows as {} messages.",
            prepared.rows.len(),
            prepared.messages.len()
        );

        let mut index = 0;
        while index < prepared.messages.len() {
            match self.wait_till(clock.as_ref(), &prepared.messages[index].time) {
                Wake::Arrived => {
                    self.dispatch(&prepared, index);
                    index += 1;
                }
                Wake::Seeked => {
                    let now = clock.current_time();
                    index = prepared.messages.partition_point(|m| m.time < now);
                    debug!("Seeked to {:.3}s, resuming at message {index}.", now.to_f64());
                }
                Wake::Stopped => {
                    self.cancel(clock.as_ref());
                    return;
                }
            }
        }

        self.shared.set_state(PlayerState::Finished);
        self.emit(PlayerEvent::Ended(EndReason::Completed));
        info!("Playback completed.");
    }

    fn load(&self) -> Result<Prepared, PlayerError> {
        let index = self.options.chart_index;
        let chart = self
            .simfile
            .chart(index)
            .ok_or(PlayerError::MissingChart(index))?;
        let rows = scheduled_rows(chart, &self.options.sound_start)?;
        let messages = EventScheduler::new(self.options.schedule.clone()).schedule(&rows);
        let (clock, output) = self.prime_clock(&rows)?;
        debug!("Loaded chart {index} ({}).", chart.label());
        Ok(Prepared {
            rows: rows.into(),
            messages,
            clock,
            _output: output,
        })
    }

    fn prime_clock(
        &self,
        rows: &[ScheduledRow],
    ) -> Result<(Arc<dyn PlaybackClock>, Option<AudioOutput>), PlayerError> {
        let options = &self.options;
        match &options.clock {
            ClockSource::Injected(clock) => Ok((clock.clone(), None)),
            ClockSource::Elapsed => Ok((elapsed_clock(), None)),
            ClockSource::Audio if !options.music_out && options.clap_mapper.is_none() => {
                Ok((elapsed_clock(), None))
            }
            ClockSource::Audio => {
                let device = OutputDevice::default_output()?;
                let (rate, channels) = (device.sample_rate(), device.channels());
                let mut track = if options.music_out {
                    let payload = self
                        .simfile
                        .music
                        .as_ref()
                        .ok_or(PlayerError::MissingAudio)?;
                    let decoded = audio::resample(audio::decode(payload)?, rate, channels)?;
                    let mut track = Track::from_decoded(decoded);
                    track.apply_sound_start(&options.sound_start);
                    track
                } else {
                    let last = rows.last().map_or_else(Time::zero, |r| r.time.clone());
                    Track::silence(&(last + Time::from_seconds(1)), rate, channels)
                };
                if let Some(mapper) = &options.clap_mapper {
                    let mut added = 0usize;
                    for row in rows {
                        if let Some(burst) = mapper.clap(row, rate, channels) {
                            track.add_sound(&burst, &row.time);
                            added += 1;
                        }
                    }
                    debug!("Mixed {added} claps.");
                }
                debug!("Audio track runs {:.3}s.", track.duration().to_f64());
                let mixer = Arc::new(Mixer::new(track));
                let output = device.start(mixer.clone())?;
                let clock: Arc<dyn PlaybackClock> = mixer;
                Ok((clock, Some(output)))
            }
        }
    }

    fn wait_till(&self, clock: &dyn PlaybackClock, target: &Time) -> Wake {
        let mut control = self.shared.control.lock().unwrap();
        loop {
            if control.stop {
                return Wake::Stopped;
            }
            if let Some(pause) = control.pause.take() {
                if pause {
                    clock.pause();
                    control.state = PlayerState::Paused;
                } else {
                    clock.resume();
                    control.state = PlayerState::Running;
                }
            }
            if let Some(time) = control.seek.take() {
                clock.seek(&time);
                return Wake::Seeked;
            }
            if !clock.is_paused() && clock.current_time() >= *target {
                return Wake::Arrived;
            }
            control = self
                .shared
                .wake
                .wait_timeout(control, self.options.poll_interval)
                .unwrap()
                .0;
        }
    }

    fn dispatch(&mut self, prepared: &Prepared, index: usize) {
        let scheduled = &prepared.messages[index];
        let muted = self.shared.control.lock().unwrap().hardware_muted;
        if let Some(writer) = self.writer.as_mut()
            && !muted
            && let Err(e) = writer.write_message(scheduled.message.as_bytes())
        {
            warn!("Hardware write failed at {:.3}s: {e}", scheduled.time.to_f64());
        }
        trace!(
            "{:>9.3}s {} {:?}",
            scheduled.time.to_f64(),
            scheduled.message,
            scheduled.kind
        );
        self.emit(PlayerEvent::Wrote(WriteEvent {
            time: scheduled.time.clone(),
            message: scheduled.message.clone(),
            kind: scheduled.kind,
            row: prepared.rows.get(scheduled.row).cloned(),
        }));
    }

    fn cancel(&mut self, clock: &dyn PlaybackClock) {
        clock.pause();
        let off = self.options.schedule.layout.all_off_message();
        if let Some(writer) = self.writer.as_mut()
            && let Err(e) = writer.write_message(off.as_bytes())
        {
            warn!("Could not turn lamps off: {e}");
        }
        self.shared.set_state(PlayerState::Cancelled);
        self.emit(PlayerEvent::Ended(EndReason::Cancelled));
        info!("Playback cancelled.");
    }
}
