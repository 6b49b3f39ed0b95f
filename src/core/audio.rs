use crate::core::clock::PlaybackClock;
use crate::game::song::MediaPayload;
use crate::game::time::Time;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Sample, SampleFormat, StreamConfig};
use lewton::inside_ogg::OggStreamReader;
use log::{debug, error, info, warn};
use rubato::{
    Resampler, SincFixedOut, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use thiserror::Error;

const OUT_FRAMES_PER_CALL: usize = 512;
/// Longest buffer a track may grow to.
const MAX_TRACK_SECONDS: usize = 60 * 60;

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("unsupported audio format '{0}'")]
    UnsupportedFormat(String),
    #[error("could not decode audio: {0}")]
    Decode(String),
    #[error("could not resample audio: {0}")]
    Resample(String),
    #[error("audio device: {0}")]
    Device(String),
}

/// Interleaved 16-bit PCM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedAudio {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub channels: usize,
}

impl DecodedAudio {
    #[inline(always)]
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1)
    }
}

/* ================================ Decoding ================================ */

/// Decodes a music payload, picking the codec from its extension.
pub fn decode(payload: &MediaPayload) -> Result<DecodedAudio, AudioError> {
    let extension = payload.extension().unwrap_or_default();
    let audio = match extension.as_str() {
        "ogg" | "oga" => decode_ogg(&payload.bytes)?,
        "mp3" => decode_mp3(&payload.bytes)?,
        "flac" => decode_flac(&payload.bytes)?,
        other => return Err(AudioError::UnsupportedFormat(other.to_string())),
    };
    info!(
        "Decoded {:?}: {} frames, {} Hz, {} ch.",
        payload.path.file_name().unwrap_or_default(),
        audio.frames(),
        audio.sample_rate,
        audio.channels
    );
    Ok(audio)
}

fn decode_ogg(bytes: &[u8]) -> Result<DecodedAudio, AudioError> {
    let mut ogg = OggStreamReader::new(Cursor::new(bytes))
        .map_err(|e| AudioError::Decode(e.to_string()))?;
    let channels = ogg.ident_hdr.audio_channels as usize;
    let sample_rate = ogg.ident_hdr.audio_sample_rate;
    let mut samples = Vec::new();
    while let Some(packet) = ogg
        .read_dec_packet_itl()
        .map_err(|e| AudioError::Decode(e.to_string()))?
    {
        samples.extend_from_slice(&packet);
    }
    Ok(DecodedAudio {
        samples,
        sample_rate,
        channels,
    })
}

fn decode_mp3(bytes: &[u8]) -> Result<DecodedAudio, AudioError> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(bytes));
    let mut samples = Vec::new();
    let mut format: Option<(u32, usize)> = None;
    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                if format.is_none() {
                    format = Some((frame.sample_rate.max(1) as u32, frame.channels.max(1)));
                }
                samples.extend_from_slice(&frame.data);
            }
            Err(minimp3::Error::Eof) => break,
            Err(minimp3::Error::SkippedData) => continue,
            Err(e) => return Err(AudioError::Decode(e.to_string())),
        }
    }
    let (sample_rate, channels) =
        format.ok_or_else(|| AudioError::Decode("no MP3 frames found".to_string()))?;
    Ok(DecodedAudio {
        samples,
        sample_rate,
        channels,
    })
}

fn decode_flac(bytes: &[u8]) -> Result<DecodedAudio, AudioError> {
    let mut reader =
        claxon::FlacReader::new(Cursor::new(bytes)).map_err(|e| AudioError::Decode(e.to_string()))?;
    let info = reader.streaminfo();
    let bits = info.bits_per_sample;
    let mut samples = Vec::new();
    for sample in reader.samples() {
        let sample = sample.map_err(|e| AudioError::Decode(e.to_string()))?;
        let scaled = if bits > 16 {
            sample >> (bits - 16)
        } else {
            sample << (16 - bits)
        };
        samples.push(scaled.clamp(i16::MIN as i32, i16::MAX as i32) as i16);
    }
    Ok(DecodedAudio {
        samples,
        sample_rate: info.sample_rate,
        channels: info.channels as usize,
    })
}

/* =============================== Resampling =============================== */

#[inline(always)]
fn to_i16(v: f32) -> i16 {
    (v * 32767.0).round().clamp(-32768.0, 32767.0) as i16
}

/// Appends planar resampler output as interleaved samples for `out_ch`
/// channels, reusing source channels round-robin.
fn push_interleaved(dst: &mut Vec<i16>, planar: &[Vec<f32>], out_ch: usize) {
    if planar.is_empty() {
        return;
    }
    let frames = planar[0].len();
    dst.reserve(frames * out_ch);
    for f in 0..frames {
        for c in 0..out_ch {
            dst.push(to_i16(planar[c % planar.len()][f]));
        }
    }
}

fn remap_channels(audio: DecodedAudio, out_ch: usize) -> DecodedAudio {
    if audio.channels == out_ch {
        return audio;
    }
    let in_ch = audio.channels.max(1);
    let mut samples = Vec::with_capacity(audio.frames() * out_ch);
    for frame in audio.samples.chunks_exact(in_ch) {
        for c in 0..out_ch {
            samples.push(frame[c % in_ch]);
        }
    }
    DecodedAudio {
        samples,
        sample_rate: audio.sample_rate,
        channels: out_ch,
    }
}

/// Converts decoded audio to the device rate and channel count.
pub fn resample(audio: DecodedAudio, out_hz: u32, out_ch: usize) -> Result<DecodedAudio, AudioError> {
    if audio.sample_rate == out_hz {
        return Ok(remap_channels(audio, out_ch));
    }
    let in_ch = audio.channels.max(1);
    let ratio = out_hz as f64 / audio.sample_rate as f64;
    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 128,
        window: WindowFunction::BlackmanHarris2,
    };
    let resample_err = |e: &dyn std::fmt::Display| AudioError::Resample(e.to_string());
    let mut resampler = SincFixedOut::<f32>::new(ratio, 1.0, params, OUT_FRAMES_PER_CALL, in_ch)
        .map_err(|e| resample_err(&e))?;

    let mut in_planar: Vec<Vec<f32>> = vec![Vec::with_capacity(audio.frames()); in_ch];
    for frame in audio.samples.chunks_exact(in_ch) {
        for (c, s) in frame.iter().enumerate() {
            in_planar[c].push(*s as f32 / 32768.0);
        }
    }

    let mut out = Vec::with_capacity((audio.frames() as f64 * ratio) as usize * out_ch + 1024);
    let mut consumed = 0usize;
    let total = in_planar[0].len();
    loop {
        let need = resampler.input_frames_next();
        if total - consumed < need {
            break;
        }
        let slices: Vec<&[f32]> = in_planar
            .iter()
            .map(|ch| &ch[consumed..consumed + need])
            .collect();
        let block = resampler.process(&slices, None).map_err(|e| resample_err(&e))?;
        consumed += need;
        push_interleaved(&mut out, &block, out_ch);
    }

    if consumed < total {
        let slices: Vec<&[f32]> = in_planar.iter().map(|ch| &ch[consumed..]).collect();
        let block = resampler
            .process_partial(Some(&slices), None)
            .map_err(|e| resample_err(&e))?;
        push_interleaved(&mut out, &block, out_ch);
    }
    let tail = resampler
        .process_partial::<&[f32]>(None, None)
        .map_err(|e| resample_err(&e))?;
    push_interleaved(&mut out, &tail, out_ch);

    debug!(
        "Resampled {} Hz -> {} Hz ({} -> {} frames).",
        audio.sample_rate,
        out_hz,
        audio.frames(),
        out.len() / out_ch.max(1)
    );
    Ok(DecodedAudio {
        samples: out,
        sample_rate: out_hz,
        channels: out_ch,
    })
}

/* ================================= Track ================================= */

/// Mutable sample buffer assembled during loading, before playback starts.
#[derive(Debug, Clone)]
pub struct Track {
    samples: Vec<i16>,
    sample_rate: u32,
    channels: usize,
}

impl Track {
    pub fn from_decoded(audio: DecodedAudio) -> Self {
        Self {
            samples: audio.samples,
            sample_rate: audio.sample_rate.max(1),
            channels: audio.channels.max(1),
        }
    }

    pub fn silence(length: &Time, sample_rate: u32, channels: usize) -> Self {
        let mut track = Self {
            samples: Vec::new(),
            sample_rate: sample_rate.max(1),
            channels: channels.max(1),
        };
        let len = track.sample_index(length).min(track.max_samples());
        track.samples.resize(len, 0);
        track
    }

    /// First interleaved sample at `time`, saturating for times far past
    /// anything addressable.
    fn sample_index(&self, time: &Time) -> usize {
        usize::try_from(time.to_frame(self.sample_rate))
            .unwrap_or(usize::MAX)
            .saturating_mul(self.channels)
    }

    fn max_samples(&self) -> usize {
        MAX_TRACK_SECONDS
            .saturating_mul(self.sample_rate as usize)
            .saturating_mul(self.channels)
    }

    #[inline(always)]
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels
    }

    pub fn duration(&self) -> Time {
        Time::from_frames(self.frames() as u64, self.sample_rate)
    }

    #[inline(always)]
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    /// Moves the track so that playback time 0 plays audio time
    /// `sound_start`: negative values prepend silence, positive ones skip audio.
    /// The lead-in is capped at `MAX_TRACK_SECONDS`.
    pub fn apply_sound_start(&mut self, sound_start: &Time) {
        if sound_start.is_negative() {
            let wanted = self.sample_index(&-sound_start.clone());
            let pad = wanted.min(self.max_samples());
            if pad < wanted {
                warn!(
                    "Lead-in of {:.1}s is too long; capping it at {MAX_TRACK_SECONDS}s.",
                    -sound_start.to_f64()
                );
            }
            let mut padded = vec![0i16; pad + self.samples.len()];
            padded[pad..].copy_from_slice(&self.samples);
            self.samples = padded;
        } else if sound_start.is_positive() {
            let skip = self.sample_index(sound_start).min(self.samples.len());
            self.samples.drain(..skip);
        }
    }

    /// Mixes an interleaved burst in at `at`, growing the track when the
    /// burst runs past its end. A window that would clip is scaled down.
    /// Bursts that would grow the track past `MAX_TRACK_SECONDS` are dropped.
    pub fn add_sound(&mut self, burst: &[i16], at: &Time) {
        if burst.is_empty() || at.is_negative() {
            return;
        }
        let start = self.sample_index(at);
        let end = start.saturating_add(burst.len());
        if end > self.samples.len().max(self.max_samples()) {
            debug!("Dropping a sound at {:.3}s past the track limit.", at.to_f64());
            return;
        }
        if end > self.samples.len() {
            self.samples.resize(end, 0);
        }
        let window = &mut self.samples[start..end];
        let mixed: Vec<i32> = window
            .iter()
            .zip(burst)
            .map(|(&a, &b)| i32::from(a) + i32::from(b))
            .collect();
        let peak = mixed.iter().map(|v| v.abs()).max().unwrap_or(0);
        let scale = if peak > i32::from(i16::MAX) {
            f64::from(i16::MAX) / f64::from(peak)
        } else {
            1.0
        };
        for (slot, value) in window.iter_mut().zip(mixed) {
            *slot = (f64::from(value) * scale).round() as i16;
        }
    }
}

/* ================================= Mixer ================================= */

/// Playback buffer shared with the audio callback. The frame cursor is the
/// playback clock: the callback advances it, seeks overwrite it.
pub struct Mixer {
    samples: Arc<[i16]>,
    sample_rate: u32,
    channels: usize,
    cursor: AtomicU64,
    paused: AtomicBool,
}

impl Mixer {
    /// Starts paused at frame 0.
    pub fn new(track: Track) -> Self {
        Self {
            samples: track.samples.into(),
            sample_rate: track.sample_rate,
            channels: track.channels,
            cursor: AtomicU64::new(0),
            paused: AtomicBool::new(true),
        }
    }

    #[inline(always)]
    pub fn current_frame(&self) -> u64 {
        self.cursor.load(Ordering::Acquire)
    }

    /// Audio callback body. Claims the next block of frames and copies it out.
    /// Past the end of the buffer it plays silence but keeps time moving.
    pub fn fill(&self, out: &mut [i16]) {
        if self.paused.load(Ordering::Acquire) {
            out.fill(0);
            return;
        }
        let frames = (out.len() / self.channels) as u64;
        let mut start = self.cursor.load(Ordering::Acquire);
        while let Err(actual) = self.cursor.compare_exchange_weak(
            start,
            start + frames,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            start = actual;
        }

        let begin = (start as usize).saturating_mul(self.channels).min(self.samples.len());
        let available = (self.samples.len() - begin).min(out.len());
        out[..available].copy_from_slice(&self.samples[begin..begin + available]);
        out[available..].fill(0);
    }
}

impl PlaybackClock for Mixer {
    fn current_time(&self) -> Time {
        Time::from_frames(self.current_frame(), self.sample_rate)
    }

    fn pause(&self) {
        self.paused.store(true, Ordering::Release);
    }

    fn resume(&self) {
        self.paused.store(false, Ordering::Release);
    }

    fn seek(&self, time: &Time) {
        self.cursor.store(time.to_frame(self.sample_rate), Ordering::Release);
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }
}

/* ============================== Output device ============================== */

/// Default output device and its preferred configuration.
pub struct OutputDevice {
    device: cpal::Device,
    config: cpal::SupportedStreamConfig,
}

impl OutputDevice {
    pub fn default_output() -> Result<Self, AudioError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| AudioError::Device("no audio output device".to_string()))?;
        let config = device
            .default_output_config()
            .map_err(|e| AudioError::Device(e.to_string()))?;
        Ok(Self { device, config })
    }

    #[inline(always)]
    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate().0
    }

    #[inline(always)]
    pub fn channels(&self) -> usize {
        self.config.channels() as usize
    }

    /// Builds and starts a stream that plays `mixer`.
    pub fn start(self, mixer: Arc<Mixer>) -> Result<AudioOutput, AudioError> {
        let stream_config: StreamConfig = self.config.clone().into();
        let mut mix_i16: Vec<i16> = Vec::new();
        let err_fn = |err| error!("Audio stream error: {}", err);

        let stream = match self.config.sample_format() {
            SampleFormat::I16 => self.device.build_output_stream(
                &stream_config,
                move |out: &mut [i16], _| mixer.fill(out),
                err_fn,
                None,
            ),
            SampleFormat::U16 => self.device.build_output_stream(
                &stream_config,
                move |out: &mut [u16], _| {
                    if mix_i16.len() != out.len() {
                        mix_i16.resize(out.len(), 0);
                    }
                    mixer.fill(&mut mix_i16);
                    for (o, s) in out.iter_mut().zip(&mix_i16) {
                        *o = (i32::from(*s) + 32768) as u16;
                    }
                },
                err_fn,
                None,
            ),
            SampleFormat::F32 => self.device.build_output_stream(
                &stream_config,
                move |out: &mut [f32], _| {
                    if mix_i16.len() != out.len() {
                        mix_i16.resize(out.len(), 0);
                    }
                    mixer.fill(&mut mix_i16);
                    for (o, s) in out.iter_mut().zip(&mix_i16) {
                        *o = (*s).to_sample::<f32>();
                    }
                },
                err_fn,
                None,
            ),
            other => {
                return Err(AudioError::Device(format!(
                    "unsupported sample format {other:?}"
                )));
            }
        }
        .map_err(|e| AudioError::Device(e.to_string()))?;

        stream.play().map_err(|e| AudioError::Device(e.to_string()))?;
        info!(
            "Audio output started ({} Hz, {} ch).",
            stream_config.sample_rate.0, stream_config.channels
        );
        Ok(AudioOutput { _stream: stream })
    }
}

/// Keeps the device stream alive; dropping it stops audio.
pub struct AudioOutput {
    _stream: cpal::Stream,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(samples: Vec<i16>, channels: usize) -> Track {
        Track::from_decoded(DecodedAudio {
            samples,
            sample_rate: 10,
            channels,
        })
    }

    #[test]
    fn negative_sound_start_pads_with_silence() {
        let mut t = track(vec![1, 1, 2, 2], 2);
        t.apply_sound_start(&Time::from_ratio(-2, 10));
        assert_eq!(t.samples(), &[0, 0, 0, 0, 1, 1, 2, 2]);
    }

    #[test]
    fn positive_sound_start_skips_audio() {
        let mut t = track(vec![1, 2, 3, 4, 5], 1);
        t.apply_sound_start(&Time::from_ratio(3, 10));
        assert_eq!(t.samples(), &[4, 5]);
        t.apply_sound_start(&Time::from_seconds(10));
        assert!(t.samples().is_empty());
    }

    #[test]
    fn add_sound_extends_and_mixes() {
        let mut t = track(vec![100, 100, 100], 1);
        t.add_sound(&[10, 20, 30], &Time::from_ratio(2, 10));
        assert_eq!(t.samples(), &[100, 100, 110, 20, 30]);
        assert_eq!(t.duration(), Time::from_ratio(1, 2));
    }

    #[test]
    fn add_sound_scales_a_clipping_window() {
        let mut t = track(vec![30_000, -10_000], 1);
        t.add_sound(&[30_000, 0], &Time::zero());
        let samples = t.samples();
        assert_eq!(samples[0], i16::MAX);
        // Same scale for the whole window.
        let expected = (-10_000.0 * f64::from(i16::MAX) / 60_000.0).round() as i16;
        assert_eq!(samples[1], expected);
    }

    #[test]
    fn mixer_is_a_clock_driven_by_the_callback() {
        let mixer = Mixer::new(track((0..20).collect(), 2));
        let mut out = [7i16; 4];

        mixer.fill(&mut out);
        assert_eq!(out, [0; 4], "paused mixer plays silence");
        assert_eq!(mixer.current_time(), Time::zero());

        mixer.resume();
        mixer.fill(&mut out);
        assert_eq!(out, [0, 1, 2, 3]);
        assert_eq!(mixer.current_frame(), 2);
        assert_eq!(mixer.current_time(), Time::from_ratio(2, 10));

        mixer.seek(&Time::from_ratio(9, 10));
        mixer.fill(&mut out);
        assert_eq!(out, [18, 19, 0, 0]);
        assert_eq!(mixer.current_frame(), 11, "time keeps moving past the end");
    }

    #[test]
    fn absurd_sound_start_is_capped() {
        let mut t = track(vec![1, 2], 1);
        t.apply_sound_start(&Time::from_seconds(-i64::MAX));
        assert_eq!(t.frames(), MAX_TRACK_SECONDS * 10 + 2);
        assert_eq!(&t.samples()[t.frames() - 2..], &[1, 2]);

        t.apply_sound_start(&Time::from_seconds(i64::MAX));
        assert!(t.samples().is_empty());
    }

    #[test]
    fn far_away_sounds_are_dropped() {
        let mut t = track(vec![5, 5], 1);
        t.add_sound(&[1, 1], &Time::from_seconds(i64::MAX));
        assert_eq!(t.samples(), &[5, 5]);

        let long = Track::silence(&Time::from_seconds(i64::MAX), 10, 2);
        assert_eq!(long.frames(), MAX_TRACK_SECONDS * 10);
    }

    #[test]
    fn silence_track_length() {
        let t = Track::silence(&Time::from_seconds(2), 44_100, 2);
        assert_eq!(t.frames(), 88_200);
        assert_eq!(t.duration(), Time::from_seconds(2));
    }

    #[test]
    fn same_rate_resample_only_remaps_channels() {
        let mono = DecodedAudio {
            samples: vec![1, 2, 3],
            sample_rate: 48_000,
            channels: 1,
        };
        let stereo = resample(mono, 48_000, 2).unwrap();
        assert_eq!(stereo.samples, vec![1, 1, 2, 2, 3, 3]);
        assert_eq!(stereo.channels, 2);
    }

    #[test]
    fn resample_changes_length_by_ratio() {
        let audio = DecodedAudio {
            samples: vec![0; 22_050 * 2],
            sample_rate: 22_050,
            channels: 2,
        };
        let out = resample(audio, 44_100, 2).unwrap();
        assert_eq!(out.sample_rate, 44_100);
        let frames = out.frames() as i64;
        assert!((frames - 44_100).abs() < 2_048, "got {frames} frames");
    }

    #[test]
    fn unknown_extensions_are_rejected() {
        let payload = MediaPayload::new("song.wma".into(), vec![0; 16]);
        assert!(matches!(decode(&payload), Err(AudioError::UnsupportedFormat(e)) if e == "wma"));
    }

    #[test]
    fn garbage_ogg_fails_to_decode() {
        let payload = MediaPayload::new("song.ogg".into(), vec![0; 64]);
        assert!(matches!(decode(&payload), Err(AudioError::Decode(_))));
    }
}
