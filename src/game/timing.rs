use crate::game::row::{PositionedRow, TimedRow};
use crate::game::time::{Beat, Measure, Time, ratio};
use log::debug;
use num_rational::BigRational;
use num_traits::{Signed, Zero};
use std::fmt;
use std::iter::Peekable;
use std::slice;
use thiserror::Error;

/// Seconds per measure at 1 BPM: 60 seconds per beat times 4 beats.
const SECONDS_PER_MEASURE_AT_1BPM: i64 = 240;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimingError {
    #[error("no initial BPM segment")]
    MissingInitialBpm,
    #[error("segment at negative measure {0}")]
    NegativeMeasure(Measure),
    #[error("BPM must be positive, got {0}")]
    NonPositiveBpm(BigRational),
    #[error("stop length must be positive, got {0}")]
    NonPositiveStop(BigRational),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BpmSegment {
    pub measure: Measure,
    pub bpm: BigRational,
}

impl BpmSegment {
    pub fn new(measure: Measure, bpm: BigRational) -> Result<Self, TimingError> {
        if measure.is_negative() {
            return Err(TimingError::NegativeMeasure(measure));
        }
        if !bpm.is_positive() {
            return Err(TimingError::NonPositiveBpm(bpm));
        }
        Ok(Self { measure, bpm })
    }

    /// Builds a segment from the beat units `#BPMS` is authored in.
    pub fn from_beat(beat: &Beat, bpm: BigRational) -> Result<Self, TimingError> {
        Self::new(Measure::from_beat(beat), bpm)
    }
}

impl fmt::Display for BpmSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.measure, self.bpm)
    }
}

/// A pause at `measure`. `value` is in measure-equivalent units: the pause
/// lasts `240 / value` seconds regardless of tempo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopSegment {
    pub measure: Measure,
    pub value: BigRational,
}

impl StopSegment {
    pub fn new(measure: Measure, value: BigRational) -> Result<Self, TimingError> {
        if measure.is_negative() {
            return Err(TimingError::NegativeMeasure(measure));
        }
        if !value.is_positive() {
            return Err(TimingError::NonPositiveStop(value));
        }
        Ok(Self { measure, value })
    }

    /// Builds a stop from `#STOPS` units (beat, seconds) so that the inserted
    /// pause equals the authored seconds.
    pub fn from_beat_seconds(beat: &Beat, seconds: &BigRational) -> Result<Self, TimingError> {
        if !seconds.is_positive() {
            return Err(TimingError::NonPositiveStop(seconds.clone()));
        }
        let value = ratio(SECONDS_PER_MEASURE_AT_1BPM, 1) / seconds;
        Self::new(Measure::from_beat(beat), value)
    }

    pub fn duration(&self) -> Time {
        Time::new(ratio(SECONDS_PER_MEASURE_AT_1BPM, 1) / &self.value)
    }
}

impl fmt::Display for StopSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.measure, self.value)
    }
}

#[inline(always)]
fn seconds_per_measure(bpm: &BigRational) -> BigRational {
    ratio(SECONDS_PER_MEASURE_AT_1BPM, 1) / bpm
}

/// Running totals of one timing pass. Lives only for the duration of
/// `time_rows`.
struct Sweep<'a> {
    elapsed: BigRational,
    last_measure: BigRational,
    last_bpm: BigRational,
    bpms: Peekable<slice::Iter<'a, BpmSegment>>,
    stops: Peekable<slice::Iter<'a, StopSegment>>,
}

impl<'a> Sweep<'a> {
    fn new(bpms: &'a [BpmSegment], stops: &'a [StopSegment]) -> Result<Self, TimingError> {
        let mut bpms = bpms.iter().peekable();
        let first = bpms.next().ok_or(TimingError::MissingInitialBpm)?;
        Ok(Self {
            elapsed: BigRational::zero(),
            last_measure: BigRational::zero(),
            last_bpm: first.bpm.clone(),
            bpms,
            stops: stops.iter().peekable(),
        })
    }

    /// Moves the sweep forward to `position` and returns the elapsed seconds
    /// there, stops included.
    fn advance_to(&mut self, position: &BigRational) -> &BigRational {
        let mut delta_measure = position - &self.last_measure;

        // A tempo change exactly on the row takes effect from that row on.
        while let Some(segment) = self.bpms.next_if(|s| s.measure.value() < position) {
            let span = segment.measure.value() - &self.last_measure;
            self.elapsed += seconds_per_measure(&self.last_bpm) * &span;
            delta_measure -= span;
            self.last_measure = segment.measure.value().clone();
            self.last_bpm = segment.bpm.clone();
        }

        self.elapsed += seconds_per_measure(&self.last_bpm) * &delta_measure;

        let reached = &self.last_measure + &delta_measure;
        while let Some(stop) = self.stops.next_if(|s| s.measure.value() <= &reached) {
            self.elapsed += ratio(SECONDS_PER_MEASURE_AT_1BPM, 1) / &stop.value;
        }

        self.last_measure = reached;
        &self.elapsed
    }
}

/// Annotates positioned rows with their elapsed time in seconds.
///
/// Rows and segments are processed in ascending position order; the output
/// follows that order. Each row's time is the integrated tempo up to its
/// position plus every stop at or before it, minus `offset`.
pub fn time_rows(
    mut rows: Vec<PositionedRow>,
    bpms: &[BpmSegment],
    stops: &[StopSegment],
    offset: &Time,
) -> Result<Vec<TimedRow>, TimingError> {
    let mut bpms = bpms.to_vec();
    bpms.sort_by(|a, b| a.measure.cmp(&b.measure));
    let mut stops = stops.to_vec();
    stops.sort_by(|a, b| a.measure.cmp(&b.measure));
    rows.sort();

    let mut sweep = Sweep::new(&bpms, &stops)?;
    let timed: Vec<TimedRow> = rows
        .into_iter()
        .map(|row| {
            let elapsed = sweep.advance_to(row.position.value());
            let time = Time::new(elapsed - offset.value());
            TimedRow::new(row, time)
        })
        .collect();

    debug!(
        "Timed {} rows across {} BPM and {} stop segments.",
        timed.len(),
        bpms.len(),
        stops.len()
    );
    Ok(timed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::row::BareRow;
    use crate::game::time::GlobalPosition;
    use proptest::prelude::*;

    fn row_at(numer: i64, denom: i64) -> PositionedRow {
        PositionedRow::new(
            BareRow::parse("1000").unwrap(),
            GlobalPosition::new(ratio(numer, denom)).unwrap(),
        )
    }

    fn bpm(measure: i64, bpm: i64) -> BpmSegment {
        BpmSegment::new(Measure::from_integer(measure), ratio(bpm, 1)).unwrap()
    }

    fn times(timed: &[TimedRow]) -> Vec<Time> {
        timed.iter().map(|r| r.time.clone()).collect()
    }

    #[test]
    fn constant_tempo_two_measures() {
        let rows = vec![row_at(0, 1), row_at(1, 1)];
        let timed = time_rows(rows, &[bpm(0, 120)], &[], &Time::zero()).unwrap();
        assert_eq!(times(&timed), vec![Time::zero(), Time::from_seconds(2)]);
    }

    #[test]
    fn stop_adds_its_length_at_and_after_its_measure() {
        let rows = vec![row_at(0, 1), row_at(1, 1), row_at(3, 2)];
        let stop = StopSegment::new(Measure::from_integer(1), ratio(4, 1)).unwrap();
        let timed = time_rows(rows, &[bpm(0, 120)], &[stop], &Time::zero()).unwrap();
        assert_eq!(
            times(&timed),
            vec![Time::zero(), Time::from_seconds(62), Time::from_seconds(63)]
        );
    }

    #[test]
    fn bpm_change_on_a_row_applies_from_that_row() {
        let rows = vec![row_at(0, 1), row_at(1, 1), row_at(2, 1)];
        let timed =
            time_rows(rows, &[bpm(0, 120), bpm(1, 240)], &[], &Time::zero()).unwrap();
        assert_eq!(
            times(&timed),
            vec![Time::zero(), Time::from_seconds(2), Time::from_seconds(3)]
        );
    }

    #[test]
    fn bpm_change_between_rows_is_integrated_piecewise() {
        let rows = vec![row_at(0, 1), row_at(2, 1)];
        let segments = [bpm(0, 120), BpmSegment::new(Measure::new(ratio(1, 2)), ratio(60, 1)).unwrap()];
        let timed = time_rows(rows, &segments, &[], &Time::zero()).unwrap();
        // 1/2 measure at 120 (1 s) then 3/2 measures at 60 (6 s).
        assert_eq!(times(&timed)[1], Time::from_seconds(7));
    }

    #[test]
    fn coincident_stop_and_bpm_change_commute() {
        let rows = vec![row_at(0, 1), row_at(1, 1), row_at(2, 1)];
        let stop = StopSegment::new(Measure::from_integer(1), ratio(240, 1)).unwrap();
        let expected = vec![Time::zero(), Time::from_seconds(3), Time::from_seconds(4)];

        let a = time_rows(rows.clone(), &[bpm(0, 120), bpm(1, 240)], &[stop.clone()], &Time::zero())
            .unwrap();
        let b = time_rows(rows, &[bpm(1, 240), bpm(0, 120)], &[stop], &Time::zero()).unwrap();
        assert_eq!(times(&a), expected);
        assert_eq!(times(&b), expected);
    }

    #[test]
    fn coincident_stop_and_bpm_change_between_rows() {
        let rows = vec![row_at(0, 1), row_at(2, 1)];
        let stop = StopSegment::new(Measure::from_integer(1), ratio(120, 1)).unwrap();
        let timed =
            time_rows(rows, &[bpm(0, 120), bpm(1, 60)], &[stop], &Time::zero()).unwrap();
        // 2 s at 120, 2 s stop, 4 s at 60.
        assert_eq!(times(&timed)[1], Time::from_seconds(8));
    }

    #[test]
    fn stops_before_the_first_row_are_applied_to_it() {
        let rows = vec![row_at(2, 1)];
        let stop = StopSegment::new(Measure::from_integer(1), ratio(240, 1)).unwrap();
        let timed = time_rows(rows, &[bpm(0, 240)], &[stop], &Time::zero()).unwrap();
        assert_eq!(times(&timed), vec![Time::from_seconds(3)]);
    }

    #[test]
    fn offset_is_subtracted() {
        let rows = vec![row_at(0, 1), row_at(1, 1)];
        let timed = time_rows(rows, &[bpm(0, 120)], &[], &Time::from_ratio(-1, 10)).unwrap();
        assert_eq!(
            times(&timed),
            vec![Time::from_ratio(1, 10), Time::from_ratio(21, 10)]
        );
    }

    #[test]
    fn unsorted_rows_are_timed_in_position_order() {
        let rows = vec![row_at(1, 1), row_at(0, 1)];
        let timed = time_rows(rows, &[bpm(0, 60)], &[], &Time::zero()).unwrap();
        assert_eq!(times(&timed), vec![Time::zero(), Time::from_seconds(4)]);
    }

    #[test]
    fn empty_bpm_list_is_fatal() {
        let err = time_rows(vec![row_at(0, 1)], &[], &[], &Time::zero()).unwrap_err();
        assert_eq!(err, TimingError::MissingInitialBpm);
    }

    #[test]
    fn segment_validation() {
        assert!(matches!(
            BpmSegment::new(Measure::from_integer(-1), ratio(120, 1)),
            Err(TimingError::NegativeMeasure(_))
        ));
        assert!(matches!(
            BpmSegment::new(Measure::from_integer(0), ratio(0, 1)),
            Err(TimingError::NonPositiveBpm(_))
        ));
        assert!(matches!(
            StopSegment::new(Measure::from_integer(0), ratio(-4, 1)),
            Err(TimingError::NonPositiveStop(_))
        ));
    }

    #[test]
    fn authored_stop_seconds_round_trip() {
        let stop = StopSegment::from_beat_seconds(&Beat::new(ratio(4, 1)), &ratio(1, 2)).unwrap();
        assert_eq!(stop.measure, Measure::from_integer(1));
        assert_eq!(stop.value, ratio(480, 1));
        assert_eq!(stop.duration(), Time::from_ratio(1, 2));
        assert!(StopSegment::from_beat_seconds(&Beat::new(ratio(0, 1)), &ratio(0, 1)).is_err());
    }

    fn positions() -> impl Strategy<Value = Vec<(u32, u32, u32)>> {
        let divisions = prop::sample::select(vec![1u32, 2, 3, 4, 8, 12, 16, 24, 32, 48, 64, 192]);
        prop::collection::vec(
            (0u32..64, divisions).prop_flat_map(|(measure, rows)| (Just(measure), 0..rows, Just(rows))),
            0..40,
        )
    }

    fn to_rows(positions: &[(u32, u32, u32)]) -> Vec<PositionedRow> {
        positions
            .iter()
            .map(|&(measure, index, rows)| {
                row_at(i64::from(measure) * i64::from(rows) + i64::from(index), i64::from(rows))
            })
            .collect()
    }

    proptest! {
        #[test]
        fn constant_bpm_matches_closed_form(
            positions in positions(),
            bpm_numer in 1i64..600,
            bpm_denom in 1i64..8,
            offset_ms in -5_000i64..5_000,
        ) {
            let tempo = ratio(bpm_numer, bpm_denom);
            let segment = BpmSegment::new(Measure::from_integer(0), tempo.clone()).unwrap();
            let offset = Time::from_ratio(offset_ms, 1000);
            let timed = time_rows(to_rows(&positions), &[segment], &[], &offset).unwrap();
            for row in &timed {
                let expected = row.positioned.position.value() * ratio(240, 1) / &tempo - offset.value();
                prop_assert_eq!(row.time.value(), &expected);
            }
        }

        #[test]
        fn times_never_decrease_in_position_order(
            positions in positions(),
            changes in prop::collection::vec((0u32..64, 1i64..400), 0..6),
            stops in prop::collection::vec((0u32..64, 1i64..1000), 0..6),
        ) {
            let mut segments = vec![bpm(0, 150)];
            segments.extend(changes.iter().map(|&(m, b)| bpm(i64::from(m), b)));
            let stop_segments: Vec<StopSegment> = stops
                .iter()
                .map(|&(m, v)| StopSegment::new(Measure::from_integer(i64::from(m)), ratio(v, 1)).unwrap())
                .collect();
            let timed = time_rows(to_rows(&positions), &segments, &stop_segments, &Time::zero()).unwrap();
            for pair in timed.windows(2) {
                prop_assert!(pair[0].positioned.position <= pair[1].positioned.position);
                prop_assert!(pair[0].time <= pair[1].time);
            }
        }
    }
}
