use crate::game::snap::{self, Snap};
use crate::game::time::{GlobalPosition, LocalPosition, Time};
use smallvec::SmallVec;
use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RowError {
    #[error("invalid note symbol '{symbol}' in column {column}")]
    InvalidSymbol { symbol: char, column: usize },
    #[error("a row needs at least one column")]
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NoteSymbol {
    Empty,
    Tap,
    HoldHead,
    HoldTail,
    RollHead,
    RollTail,
    Mine,
}

impl NoteSymbol {
    pub const fn from_char(c: char) -> Option<Self> {
        match c {
            '0' => Some(Self::Empty),
            '1' => Some(Self::Tap),
            '2' => Some(Self::HoldHead),
            '3' => Some(Self::HoldTail),
            '4' => Some(Self::RollHead),
            '5' => Some(Self::RollTail),
            'M' => Some(Self::Mine),
            _ => None,
        }
    }

    pub const fn as_char(self) -> char {
        match self {
            Self::Empty => '0',
            Self::Tap => '1',
            Self::HoldHead => '2',
            Self::HoldTail => '3',
            Self::RollHead => '4',
            Self::RollTail => '5',
            Self::Mine => 'M',
        }
    }

    #[inline(always)]
    pub const fn is_head(self) -> bool {
        matches!(self, Self::HoldHead | Self::RollHead)
    }

    #[inline(always)]
    pub const fn is_tail(self) -> bool {
        matches!(self, Self::HoldTail | Self::RollTail)
    }

    /// Empty and mine columns never light anything.
    #[inline(always)]
    pub const fn is_inert(self) -> bool {
        matches!(self, Self::Empty | Self::Mine)
    }
}

/// One rhythmic instant's per-lane symbols, nothing else.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BareRow {
    symbols: SmallVec<[NoteSymbol; 8]>,
}

impl BareRow {
    pub fn parse(text: &str) -> Result<Self, RowError> {
        let mut symbols = SmallVec::new();
        for (column, c) in text.chars().enumerate() {
            let symbol =
                NoteSymbol::from_char(c).ok_or(RowError::InvalidSymbol { symbol: c, column })?;
            symbols.push(symbol);
        }
        if symbols.is_empty() {
            return Err(RowError::Empty);
        }
        Ok(Self { symbols })
    }

    #[inline(always)]
    pub fn symbols(&self) -> &[NoteSymbol] {
        &self.symbols
    }

    #[inline(always)]
    pub fn width(&self) -> usize {
        self.symbols.len()
    }

    /// Only empty or mine columns.
    pub fn is_blank(&self) -> bool {
        self.symbols.iter().all(|s| s.is_inert())
    }

    /// True when the row lights the snap indicators: any tap or head.
    pub fn activates_snap(&self) -> bool {
        self.symbols.iter().any(|s| !s.is_inert() && !s.is_tail())
    }
}

impl fmt::Display for BareRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for symbol in &self.symbols {
            write!(f, "{}", symbol.as_char())?;
        }
        Ok(())
    }
}

/// A row placed inside its measure.
#[derive(Debug, Clone)]
pub struct LocalRow {
    pub row: BareRow,
    pub position: LocalPosition,
}

impl LocalRow {
    pub fn new(row: BareRow, position: LocalPosition) -> Self {
        Self { row, position }
    }

    pub fn globalize(self, measure_index: u64) -> PositionedRow {
        let position = GlobalPosition::from_local(measure_index, &self.position);
        PositionedRow::new(self.row, position)
    }
}

impl PartialEq for LocalRow {
    fn eq(&self, other: &Self) -> bool {
        self.position == other.position
    }
}

impl Eq for LocalRow {}

/// A row placed in the whole chart. Compared by position only.
#[derive(Debug, Clone)]
pub struct PositionedRow {
    pub row: BareRow,
    pub position: GlobalPosition,
}

impl PositionedRow {
    pub fn new(row: BareRow, position: GlobalPosition) -> Self {
        Self { row, position }
    }

    #[inline(always)]
    pub fn measure_index(&self) -> u64 {
        self.position.measure_index()
    }

    pub fn snap(&self) -> Snap {
        snap::classify(&self.position)
    }
}

impl PartialEq for PositionedRow {
    fn eq(&self, other: &Self) -> bool {
        self.position == other.position
    }
}

impl Eq for PositionedRow {}

impl PartialOrd for PositionedRow {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PositionedRow {
    fn cmp(&self, other: &Self) -> Ordering {
        self.position.cmp(&other.position)
    }
}

/// A positioned row with its elapsed time. Compared by time only.
#[derive(Debug, Clone)]
pub struct TimedRow {
    pub positioned: PositionedRow,
    pub time: Time,
}

impl TimedRow {
    pub fn new(positioned: PositionedRow, time: Time) -> Self {
        Self { positioned, time }
    }
}

impl PartialEq for TimedRow {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time
    }
}

impl Eq for TimedRow {}

impl PartialOrd for TimedRow {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimedRow {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time.cmp(&other.time)
    }
}

/// A timed row moved onto the playback clock by the session's start offset.
#[derive(Debug, Clone)]
pub struct ScheduledRow {
    pub timed: TimedRow,
    pub time: Time,
}

impl ScheduledRow {
    pub fn from_timed(timed: TimedRow, offset: &Time) -> Self {
        let time = &timed.time + offset;
        Self { timed, time }
    }
}

impl PartialEq for ScheduledRow {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time
    }
}

impl Eq for ScheduledRow {}

impl PartialOrd for ScheduledRow {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledRow {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time.cmp(&other.time)
    }
}

/// Anything the scheduler can turn into pin events: a row with a position
/// and a moment on some clock.
pub trait ChartInstant {
    fn bare(&self) -> &BareRow;
    fn position(&self) -> &GlobalPosition;
    fn time(&self) -> &Time;
}

impl ChartInstant for TimedRow {
    fn bare(&self) -> &BareRow {
        &self.positioned.row
    }

    fn position(&self) -> &GlobalPosition {
        &self.positioned.position
    }

    fn time(&self) -> &Time {
        &self.time
    }
}

impl ChartInstant for ScheduledRow {
    fn bare(&self) -> &BareRow {
        &self.timed.positioned.row
    }

    fn position(&self) -> &GlobalPosition {
        &self.timed.positioned.position
    }

    fn time(&self) -> &Time {
        &self.time
    }
}
