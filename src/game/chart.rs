use crate::game::row::{PositionedRow, TimedRow};
use crate::game::time::Time;
use crate::game::timing::{self, BpmSegment, StopSegment, TimingError};
use log::debug;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChartError {
    #[error("chart has already been timed")]
    AlreadyTimed,
    #[error("chart has not been timed yet")]
    NotTimed,
    #[error(transparent)]
    Timing(#[from] TimingError),
}

/// Rows of one chart, before or after the timing pass.
#[derive(Debug, Clone)]
pub enum NoteField {
    Positioned(Vec<PositionedRow>),
    Timed(Vec<TimedRow>),
}

impl NoteField {
    pub fn len(&self) -> usize {
        match self {
            NoteField::Positioned(rows) => rows.len(),
            NoteField::Timed(rows) => rows.len(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Chart {
    pub step_type: String,
    pub step_artist: String,
    pub diff_name: String,
    pub diff_value: u32,
    pub offset: Time,
    pub notes: NoteField,
}

impl Chart {
    pub fn new(
        step_type: String,
        step_artist: String,
        diff_name: String,
        diff_value: u32,
        offset: Time,
        rows: Vec<PositionedRow>,
    ) -> Self {
        Self {
            step_type,
            step_artist,
            diff_name,
            diff_value,
            offset,
            notes: NoteField::Positioned(rows),
        }
    }

    /// Converts the note field to timed rows. Only valid once per chart; on a
    /// timing failure the positioned rows are left in place.
    pub fn apply_timing(
        &mut self,
        bpms: &[BpmSegment],
        stops: &[StopSegment],
    ) -> Result<(), ChartError> {
        let NoteField::Positioned(rows) = &self.notes else {
            return Err(ChartError::AlreadyTimed);
        };
        let timed = timing::time_rows(rows.clone(), bpms, stops, &self.offset)?;
        debug!("Timed chart {} ({} rows).", self.label(), timed.len());
        self.notes = NoteField::Timed(timed);
        Ok(())
    }

    pub fn timed_rows(&self) -> Result<&[TimedRow], ChartError> {
        match &self.notes {
            NoteField::Timed(rows) => Ok(rows),
            NoteField::Positioned(_) => Err(ChartError::NotTimed),
        }
    }

    /// Lane count of the widest row, or 0 for an empty chart.
    pub fn lanes(&self) -> usize {
        match &self.notes {
            NoteField::Positioned(rows) => rows.iter().map(|r| r.row.width()).max(),
            NoteField::Timed(rows) => rows.iter().map(|r| r.positioned.row.width()).max(),
        }
        .unwrap_or(0)
    }

    pub fn label(&self) -> String {
        let artist = if self.step_artist.trim().is_empty() {
            String::new()
        } else {
            format!(" by {}", self.step_artist.trim())
        };
        format!(
            "{} {} {}{}",
            self.step_type, self.diff_name, self.diff_value, artist
        )
    }
}
