use crate::game::chart::Chart;
use crate::game::parsing::SimfileError;
use crate::game::row::{BareRow, LocalRow, PositionedRow};
use crate::game::song::{MediaPayload, Simfile};
use crate::game::time::{LocalPosition, Time};
use crate::game::timing::{BpmSegment, StopSegment};
use log::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataField {
    Title,
    Subtitle,
    Artist,
    Genre,
    Credit,
    DisplayBpm,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChartHeader {
    pub step_type: String,
    pub step_artist: String,
    pub diff_name: String,
    pub diff_value: u32,
}

/// What a simfile front-end hands to the assembler. Rows arrive in file order;
/// `MeasureEnd` closes the current measure and `ChartEnd` the current chart.
#[derive(Debug)]
pub enum SimfileToken {
    Metadata(MetadataField, String),
    Offset(Time),
    SampleStart(Time),
    SampleLength(Time),
    BpmSegments(Vec<BpmSegment>),
    StopSegments(Vec<StopSegment>),
    Music(Option<MediaPayload>),
    ChartHeader(ChartHeader),
    Row(BareRow),
    MeasureEnd,
    ChartEnd,
}

impl SimfileToken {
    fn kind(&self) -> &'static str {
        match self {
            SimfileToken::Metadata(..) => "metadata",
            SimfileToken::Offset(_) => "offset",
            SimfileToken::SampleStart(_) => "sample start",
            SimfileToken::SampleLength(_) => "sample length",
            SimfileToken::BpmSegments(_) => "BPM segments",
            SimfileToken::StopSegments(_) => "stop segments",
            SimfileToken::Music(_) => "music",
            SimfileToken::ChartHeader(_) => "chart header",
            SimfileToken::Row(_) => "row",
            SimfileToken::MeasureEnd => "measure end",
            SimfileToken::ChartEnd => "chart end",
        }
    }
}

/// Chart under construction between a `ChartHeader` and its `ChartEnd`.
struct ChartBuilder {
    header: ChartHeader,
    measure_index: u64,
    pending: Vec<BareRow>,
    rows: Vec<PositionedRow>,
}

impl ChartBuilder {
    fn new(header: ChartHeader) -> Self {
        Self {
            header,
            measure_index: 0,
            pending: Vec::new(),
            rows: Vec::new(),
        }
    }

    fn close_measure(&mut self) -> Result<(), SimfileError> {
        let count = self.pending.len();
        if count == 0 {
            warn!(
                "Empty measure {} in chart '{} {}'; skipping.",
                self.measure_index, self.header.step_type, self.header.diff_name
            );
        }
        for (index, row) in self.pending.drain(..).enumerate() {
            let position = LocalPosition::from_row_index(index, count)
                .map_err(|source| SimfileError::Value { line: 0, source })?;
            self.rows
                .push(LocalRow::new(row, position).globalize(self.measure_index));
        }
        self.measure_index += 1;
        Ok(())
    }

    fn finish(mut self) -> Result<Chart, SimfileError> {
        if !self.pending.is_empty() {
            self.close_measure()?;
        }
        let ChartHeader {
            step_type,
            step_artist,
            diff_name,
            diff_value,
        } = self.header;
        Ok(Chart::new(
            step_type,
            step_artist,
            diff_name,
            diff_value,
            Time::zero(),
            self.rows,
        ))
    }
}

impl Simfile {
    /// Builds a simfile from a token stream and times every chart once all
    /// tokens are consumed, so segment and offset tokens may appear anywhere.
    pub fn from_tokens<I>(tokens: I) -> Result<Simfile, SimfileError>
    where
        I: IntoIterator<Item = SimfileToken>,
    {
        let mut simfile = Simfile::default();
        let mut current: Option<ChartBuilder> = None;

        for token in tokens {
            match token {
                SimfileToken::ChartHeader(header) => {
                    if current.is_some() {
                        return Err(SimfileError::UnexpectedToken {
                            found: "chart header",
                            context: "inside an unfinished chart",
                        });
                    }
                    current = Some(ChartBuilder::new(header));
                }
                SimfileToken::Row(row) => match current.as_mut() {
                    Some(chart) => chart.pending.push(row),
                    None => {
                        return Err(SimfileError::UnexpectedToken {
                            found: "row",
                            context: "outside of a chart",
                        });
                    }
                },
                SimfileToken::MeasureEnd => match current.as_mut() {
                    Some(chart) => chart.close_measure()?,
                    None => {
                        return Err(SimfileError::UnexpectedToken {
                            found: "measure end",
                            context: "outside of a chart",
                        });
                    }
                },
                SimfileToken::ChartEnd => match current.take() {
                    Some(chart) => simfile.charts.push(chart.finish()?),
                    None => {
                        return Err(SimfileError::UnexpectedToken {
                            found: "chart end",
                            context: "outside of a chart",
                        });
                    }
                },
                other if current.is_some() => {
                    return Err(SimfileError::UnexpectedToken {
                        found: other.kind(),
                        context: "inside a chart",
                    });
                }
                SimfileToken::Metadata(field, text) => {
                    let slot = match field {
                        MetadataField::Title => &mut simfile.metadata.title,
                        MetadataField::Subtitle => &mut simfile.metadata.subtitle,
                        MetadataField::Artist => &mut simfile.metadata.artist,
                        MetadataField::Genre => &mut simfile.metadata.genre,
                        MetadataField::Credit => &mut simfile.metadata.credit,
                        MetadataField::DisplayBpm => &mut simfile.metadata.display_bpm,
                    };
                    *slot = text;
                }
                SimfileToken::Offset(offset) => simfile.offset = offset,
                SimfileToken::SampleStart(time) => simfile.sample_start = time,
                SimfileToken::SampleLength(time) => simfile.sample_length = time,
                SimfileToken::BpmSegments(segments) => simfile.bpm_segments.extend(segments),
                SimfileToken::StopSegments(segments) => simfile.stop_segments.extend(segments),
                SimfileToken::Music(music) => simfile.music = music,
            }
        }

        if current.is_some() {
            return Err(SimfileError::UnexpectedToken {
                found: "end of input",
                context: "inside an unfinished chart",
            });
        }

        for (index, chart) in simfile.charts.iter_mut().enumerate() {
            chart.offset = simfile.offset.clone();
            chart
                .apply_timing(&simfile.bpm_segments, &simfile.stop_segments)
                .map_err(|source| SimfileError::Chart { index, source })?;
        }

        info!(
            "Assembled '{}': {} chart(s), {} BPM segment(s), {} stop(s).",
            simfile.metadata.full_title(),
            simfile.charts.len(),
            simfile.bpm_segments.len(),
            simfile.stop_segments.len()
        );
        Ok(simfile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::chart::ChartError;
    use crate::game::time::{Measure, ratio};
    use crate::game::timing::TimingError;

    fn header() -> SimfileToken {
        SimfileToken::ChartHeader(ChartHeader {
            step_type: "dance-single".to_string(),
            step_artist: "x".to_string(),
            diff_name: "Easy".to_string(),
            diff_value: 3,
        })
    }

    fn row(text: &str) -> SimfileToken {
        SimfileToken::Row(BareRow::parse(text).unwrap())
    }

    fn bpms() -> SimfileToken {
        SimfileToken::BpmSegments(vec![
            BpmSegment::new(Measure::from_integer(0), ratio(120, 1)).unwrap(),
        ])
    }

    #[test]
    fn rows_are_placed_by_index_within_their_measure() {
        let tokens = vec![
            bpms(),
            header(),
            row("1000"),
            row("0000"),
            row("0100"),
            row("0000"),
            SimfileToken::MeasureEnd,
            row("0010"),
            SimfileToken::MeasureEnd,
            SimfileToken::ChartEnd,
        ];
        let simfile = Simfile::from_tokens(tokens).unwrap();
        let rows = simfile.charts[0].timed_rows().unwrap();
        let positions: Vec<_> = rows.iter().map(|r| r.positioned.position.value().clone()).collect();
        assert_eq!(
            positions,
            vec![ratio(0, 1), ratio(1, 4), ratio(1, 2), ratio(3, 4), ratio(1, 1)]
        );
        assert_eq!(rows[4].time, Time::from_seconds(2));
    }

    #[test]
    fn offset_after_charts_still_applies() {
        let tokens = vec![
            header(),
            row("1000"),
            SimfileToken::ChartEnd,
            bpms(),
            SimfileToken::Offset(Time::from_ratio(1, 2)),
        ];
        let simfile = Simfile::from_tokens(tokens).unwrap();
        let chart = &simfile.charts[0];
        assert_eq!(chart.offset, Time::from_ratio(1, 2));
        assert_eq!(chart.timed_rows().unwrap()[0].time, Time::from_ratio(-1, 2));
    }

    #[test]
    fn empty_measures_still_advance_the_measure_index() {
        let tokens = vec![
            bpms(),
            header(),
            SimfileToken::MeasureEnd,
            row("0001"),
            SimfileToken::MeasureEnd,
            SimfileToken::ChartEnd,
        ];
        let simfile = Simfile::from_tokens(tokens).unwrap();
        let rows = simfile.charts[0].timed_rows().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].positioned.measure_index(), 1);
    }

    #[test]
    fn metadata_and_music_are_recorded() {
        let tokens = vec![
            SimfileToken::Metadata(MetadataField::Title, "Song".to_string()),
            SimfileToken::Metadata(MetadataField::Artist, "Band".to_string()),
            SimfileToken::SampleStart(Time::from_seconds(30)),
            SimfileToken::Music(None),
        ];
        let simfile = Simfile::from_tokens(tokens).unwrap();
        assert_eq!(simfile.metadata.title, "Song");
        assert_eq!(simfile.metadata.artist, "Band");
        assert_eq!(simfile.sample_start, Time::from_seconds(30));
        assert!(simfile.music.is_none());
        assert!(simfile.charts.is_empty());
    }

    #[test]
    fn structural_errors() {
        assert!(matches!(
            Simfile::from_tokens(vec![row("1000")]),
            Err(SimfileError::UnexpectedToken { found: "row", .. })
        ));
        assert!(matches!(
            Simfile::from_tokens(vec![header(), row("1000")]),
            Err(SimfileError::UnexpectedToken { found: "end of input", .. })
        ));
        assert!(matches!(
            Simfile::from_tokens(vec![header(), bpms()]),
            Err(SimfileError::UnexpectedToken { found: "BPM segments", .. })
        ));
        assert!(matches!(
            Simfile::from_tokens(vec![SimfileToken::ChartEnd]),
            Err(SimfileError::UnexpectedToken { found: "chart end", .. })
        ));
    }

    #[test]
    fn charts_without_tempo_fail_to_time() {
        let result = Simfile::from_tokens(vec![header(), row("1000"), SimfileToken::ChartEnd]);
        assert!(matches!(
            result,
            Err(SimfileError::Chart {
                index: 0,
                source: ChartError::Timing(TimingError::MissingInitialBpm)
            })
        ));
    }
}
