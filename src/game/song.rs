use crate::game::chart::Chart;
use crate::game::time::Time;
use crate::game::timing::{BpmSegment, StopSegment};
use std::path::PathBuf;
use std::sync::Arc;

/// Audio referenced by a simfile, read into memory at parse time.
#[derive(Clone)]
pub struct MediaPayload {
    pub path: PathBuf,
    pub bytes: Arc<[u8]>,
}

impl MediaPayload {
    pub fn new(path: PathBuf, bytes: Vec<u8>) -> Self {
        Self { path, bytes: bytes.into() }
    }

    /// Lowercased file extension, the hint used to pick a decoder.
    pub fn extension(&self) -> Option<String> {
        self.path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
    }
}

impl std::fmt::Debug for MediaPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaPayload")
            .field("path", &self.path)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimfileMetadata {
    pub title: String,
    pub subtitle: String,
    pub artist: String,
    pub genre: String,
    pub credit: String,
    pub display_bpm: String,
}

impl SimfileMetadata {
    pub fn full_title(&self) -> String {
        if self.subtitle.trim().is_empty() {
            self.title.clone()
        } else {
            format!("{} {}", self.title, self.subtitle)
        }
    }
}

#[derive(Debug, Clone)]
pub struct Simfile {
    pub metadata: SimfileMetadata,
    pub sample_start: Time,
    pub sample_length: Time,
    pub offset: Time,
    pub bpm_segments: Vec<BpmSegment>,
    pub stop_segments: Vec<StopSegment>,
    pub music: Option<MediaPayload>,
    pub charts: Vec<Chart>,
}

impl Default for Simfile {
    fn default() -> Self {
        Self {
            metadata: SimfileMetadata::default(),
            sample_start: Time::zero(),
            sample_length: Time::from_seconds(10),
            offset: Time::zero(),
            bpm_segments: Vec::new(),
            stop_segments: Vec::new(),
            music: None,
            charts: Vec::new(),
        }
    }
}

impl Simfile {
    #[inline(always)]
    pub fn chart(&self, index: usize) -> Option<&Chart> {
        self.charts.get(index)
    }

    /// Display BPM tag when present, else the min/max of the BPM segments.
    pub fn display_bpm(&self) -> String {
        let tag = self.metadata.display_bpm.trim();
        if !tag.is_empty() && tag != "*" {
            return tag.to_string();
        }
        let min = self.bpm_segments.iter().map(|s| &s.bpm).min();
        let max = self.bpm_segments.iter().map(|s| &s.bpm).max();
        match (min, max) {
            (Some(lo), Some(hi)) if lo == hi => format!("{}", lo.round()),
            (Some(lo), Some(hi)) => format!("{} - {}", lo.round(), hi.round()),
            _ => String::new(),
        }
    }
}
