use crate::game::parsing::SimfileError;
use crate::game::parsing::tokens::{ChartHeader, MetadataField, SimfileToken};
use crate::game::row::BareRow;
use crate::game::song::{MediaPayload, Simfile};
use crate::game::time::{Beat, Time, parse_decimal};
use crate::game::timing::{BpmSegment, StopSegment, TimingError};
use log::{debug, info, warn};
use num_rational::BigRational;
use std::fs;
use std::path::Path;
use std::time::Instant;

/// One `#TAG:value;` entry with the line its tag starts on.
struct Tag<'a> {
    name: String,
    value: &'a str,
    line: usize,
}

/// Removes `//` comments up to the end of their line.
fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for (i, line) in text.split('\n').enumerate() {
        if i > 0 {
            out.push('\n');
        }
        match line.find("//") {
            Some(cut) => out.push_str(&line[..cut]),
            None => out.push_str(line),
        }
    }
    out
}

fn split_tags(text: &str) -> Vec<Tag<'_>> {
    let mut tags = Vec::new();
    let mut rest = text;
    let mut consumed = 0usize;
    while let Some(hash) = rest.find('#') {
        let start = consumed + hash;
        let after_hash = &text[start + 1..];
        let Some(colon) = after_hash.find(':') else {
            break;
        };
        let body = &after_hash[colon + 1..];
        // A missing ';' ends the value at the next tag or end of file.
        let end = body
            .find(';')
            .or_else(|| body.find('#'))
            .unwrap_or(body.len());
        tags.push(Tag {
            name: after_hash[..colon].trim().to_ascii_uppercase(),
            value: &body[..end],
            line: text[..start].matches('\n').count() + 1,
        });
        consumed = start + 1 + colon + 1 + end;
        if consumed >= text.len() {
            break;
        }
        rest = &text[consumed..];
    }
    tags
}

fn decimal(text: &str, line: usize) -> Result<BigRational, SimfileError> {
    parse_decimal(text).map_err(|source| SimfileError::Value { line, source })
}

fn time(text: &str, line: usize) -> Result<Time, SimfileError> {
    decimal(text, line).map(Time::new)
}

/// Splits `beat=value,beat=value` lists. Empty lists are allowed.
fn pairs(value: &str, line: usize) -> Result<Vec<(Beat, BigRational)>, SimfileError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (beat, amount) = pair.split_once('=').ok_or_else(|| SimfileError::Syntax {
                line,
                message: format!("'{pair}' is not a beat=value pair"),
            })?;
            Ok((Beat::new(decimal(beat, line)?), decimal(amount, line)?))
        })
        .collect()
}

fn bpm_segments(value: &str, line: usize) -> Result<Vec<BpmSegment>, SimfileError> {
    pairs(value, line)?
        .into_iter()
        .map(|(beat, bpm)| {
            BpmSegment::from_beat(&beat, bpm).map_err(|source| SimfileError::Segment { line, source })
        })
        .collect()
}

fn stop_segments(value: &str, line: usize) -> Result<Vec<StopSegment>, SimfileError> {
    let mut stops = Vec::new();
    for (beat, seconds) in pairs(value, line)? {
        match StopSegment::from_beat_seconds(&beat, &seconds) {
            Ok(stop) => stops.push(stop),
            Err(TimingError::NonPositiveStop(_)) => {
                warn!("Dropping stop of {seconds} s at beat {beat} (line {line}).");
            }
            Err(source) => return Err(SimfileError::Segment { line, source }),
        }
    }
    Ok(stops)
}

fn music(value: &str, base_dir: &Path, line: usize) -> SimfileToken {
    let name = value.trim();
    if name.is_empty() {
        return SimfileToken::Music(None);
    }
    let path = base_dir.join(name);
    match fs::read(&path) {
        Ok(bytes) => {
            debug!("Read {} bytes of music from {:?}.", bytes.len(), path);
            SimfileToken::Music(Some(MediaPayload::new(path, bytes)))
        }
        Err(e) => {
            warn!("Music file {:?} (line {line}) could not be read: {e}", path);
            SimfileToken::Music(None)
        }
    }
}

/// `#NOTES:type:artist:difficulty:meter:radar:data;`
fn notes(value: &str, line: usize, out: &mut Vec<SimfileToken>) -> Result<(), SimfileError> {
    let fields: Vec<&str> = value.splitn(6, ':').collect();
    if fields.len() != 6 {
        return Err(SimfileError::Syntax {
            line,
            message: format!("#NOTES needs 6 fields, found {}", fields.len()),
        });
    }
    let diff_value = fields[3].trim().parse::<u32>().unwrap_or_else(|_| {
        warn!("Invalid meter '{}' on line {line}; using 0.", fields[3].trim());
        0
    });
    out.push(SimfileToken::ChartHeader(ChartHeader {
        step_type: fields[0].trim().to_string(),
        step_artist: fields[1].trim().to_string(),
        diff_name: fields[2].trim().to_string(),
        diff_value,
    }));

    let data = fields[5];
    let data_line = line + value[..value.len() - data.len()].matches('\n').count();
    let mut row_line = data_line;
    for measure in data.split(',') {
        for text in measure.split('\n') {
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                let row = BareRow::parse(trimmed)
                    .map_err(|source| SimfileError::Row { line: row_line, source })?;
                out.push(SimfileToken::Row(row));
            }
            row_line += 1;
        }
        row_line -= 1;
        out.push(SimfileToken::MeasureEnd);
    }
    out.push(SimfileToken::ChartEnd);
    Ok(())
}

/// Lexes `.sm` text into the assembler's tokens. `base_dir` resolves the
/// `#MUSIC` file; an unreadable music file becomes `Music(None)`.
pub fn tokenize(text: &str, base_dir: &Path) -> Result<Vec<SimfileToken>, SimfileError> {
    let text = strip_comments(text);
    let mut tokens = Vec::new();
    for tag in split_tags(&text) {
        let Tag { name, value, line } = tag;
        let metadata = |field| SimfileToken::Metadata(field, value.trim().to_string());
        match name.as_str() {
            "TITLE" => tokens.push(metadata(MetadataField::Title)),
            "SUBTITLE" => tokens.push(metadata(MetadataField::Subtitle)),
            "ARTIST" => tokens.push(metadata(MetadataField::Artist)),
            "GENRE" => tokens.push(metadata(MetadataField::Genre)),
            "CREDIT" => tokens.push(metadata(MetadataField::Credit)),
            "DISPLAYBPM" => tokens.push(metadata(MetadataField::DisplayBpm)),
            "OFFSET" => tokens.push(SimfileToken::Offset(time(value, line)?)),
            "SAMPLESTART" => tokens.push(SimfileToken::SampleStart(time(value, line)?)),
            "SAMPLELENGTH" => tokens.push(SimfileToken::SampleLength(time(value, line)?)),
            "BPMS" => tokens.push(SimfileToken::BpmSegments(bpm_segments(value, line)?)),
            "STOPS" | "FREEZES" => {
                tokens.push(SimfileToken::StopSegments(stop_segments(value, line)?))
            }
            "MUSIC" => tokens.push(music(value, base_dir, line)),
            "NOTES" => notes(value, line, &mut tokens)?,
            other => debug!("Ignoring tag #{other} on line {line}."),
        }
    }
    Ok(tokens)
}

/// Parses `.sm` text; the music file is looked up relative to `base_dir`.
pub fn parse_simfile(text: &str, base_dir: &Path) -> Result<Simfile, SimfileError> {
    Simfile::from_tokens(tokenize(text, base_dir)?)
}

pub fn load_simfile(path: &Path) -> Result<Simfile, SimfileError> {
    let started = Instant::now();
    let bytes = fs::read(path).map_err(|source| SimfileError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let text = String::from_utf8_lossy(&bytes);
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    let simfile = parse_simfile(&text, base_dir)?;
    info!(
        "Loaded {:?} in {:.1} ms.",
        path.file_name().unwrap_or_default(),
        started.elapsed().as_secs_f64() * 1000.0
    );
    Ok(simfile)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::time::{Measure, ratio};
    use std::io::Write;

    const SIMPLE: &str = "\
#TITLE:Test Song;
#ARTIST:Someone; // trailing comment
#OFFSET:-0.100;
#BPMS:0.000=120.000,
4.000=240.000;
#STOPS:8.000=0.500;
#BANNER:banner.png;
#NOTES:
     dance-single:
     Charter:
     Hard:
     9:
     0.1,0.2,0.3,0.4,0.5:
1000
0100
0010
0001
,
2000
0000
3000
0000
;
";

    #[test]
    fn tags_and_comments() {
        let tokens = tokenize(SIMPLE, Path::new(".")).unwrap();
        assert!(matches!(&tokens[0], SimfileToken::Metadata(MetadataField::Title, t) if t == "Test Song"));
        assert!(matches!(&tokens[1], SimfileToken::Metadata(MetadataField::Artist, t) if t == "Someone"));
        assert!(matches!(&tokens[2], SimfileToken::Offset(t) if *t == Time::from_ratio(-1, 10)));
    }

    #[test]
    fn bpms_and_stops_are_converted_to_measures() {
        let simfile = parse_simfile(SIMPLE, Path::new(".")).unwrap();
        assert_eq!(
            simfile.bpm_segments,
            vec![
                BpmSegment::new(Measure::from_integer(0), ratio(120, 1)).unwrap(),
                BpmSegment::new(Measure::from_integer(1), ratio(240, 1)).unwrap(),
            ]
        );
        assert_eq!(simfile.stop_segments.len(), 1);
        assert_eq!(simfile.stop_segments[0].measure, Measure::from_integer(2));
        assert_eq!(simfile.stop_segments[0].duration(), Time::from_ratio(1, 2));
    }

    #[test]
    fn chart_rows_are_timed() {
        let simfile = parse_simfile(SIMPLE, Path::new(".")).unwrap();
        assert_eq!(simfile.charts.len(), 1);
        let chart = &simfile.charts[0];
        assert_eq!(chart.step_artist, "Charter");
        assert_eq!(chart.diff_name, "Hard");
        assert_eq!(chart.diff_value, 9);
        let rows = chart.timed_rows().unwrap();
        assert_eq!(rows.len(), 8);
        // Measure 0 at 120 BPM lasts 2 s; offset -0.1 shifts everything later.
        assert_eq!(rows[0].time, Time::from_ratio(1, 10));
        assert_eq!(rows[1].time, Time::from_ratio(6, 10));
        // Measure 1 runs at 240 BPM, 1 s per measure.
        assert_eq!(rows[4].time, Time::from_ratio(21, 10));
        assert_eq!(rows[6].time, Time::from_ratio(26, 10));
    }

    #[test]
    fn zero_length_stops_are_dropped() {
        let text = "#BPMS:0=120;#STOPS:4=0.000,8=1.0;";
        let simfile = parse_simfile(text, Path::new(".")).unwrap();
        assert_eq!(simfile.stop_segments.len(), 1);
    }

    #[test]
    fn bad_rows_report_their_line() {
        let text = "#BPMS:0=120;\n#NOTES:dance-single::Easy:1::\n1000\n10X0\n;";
        match parse_simfile(text, Path::new(".")) {
            Err(SimfileError::Row { line, .. }) => assert_eq!(line, 4),
            other => panic!("expected a row error, got {other:?}"),
        }
    }

    #[test]
    fn malformed_notes_and_pairs() {
        assert!(matches!(
            tokenize("#NOTES:dance-single:x:Easy;", Path::new(".")),
            Err(SimfileError::Syntax { line: 1, .. })
        ));
        assert!(matches!(
            tokenize("#BPMS:0-120;", Path::new(".")),
            Err(SimfileError::Syntax { .. })
        ));
        assert!(matches!(
            tokenize("#BPMS:0=-120;", Path::new(".")),
            Err(SimfileError::Segment { .. })
        ));
    }

    #[test]
    fn music_is_read_relative_to_the_simfile() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("song.ogg"), [1u8, 2, 3, 4]).unwrap();
        let path = dir.path().join("chart.sm");
        let mut file = fs::File::create(&path).unwrap();
        write!(file, "#MUSIC:song.ogg;#BPMS:0=120;").unwrap();
        drop(file);

        let simfile = load_simfile(&path).unwrap();
        let music = simfile.music.unwrap();
        assert_eq!(&*music.bytes, &[1, 2, 3, 4]);

        let missing = parse_simfile("#MUSIC:nope.ogg;", dir.path()).unwrap();
        assert!(missing.music.is_none());
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = load_simfile(Path::new("/definitely/not/here.sm")).unwrap_err();
        assert!(matches!(err, SimfileError::Io { .. }));
    }
}
