pub mod simfile;
pub mod tokens;

use crate::game::chart::ChartError;
use crate::game::row::RowError;
use crate::game::time::TimeError;
use crate::game::timing::TimingError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimfileError {
    #[error("could not read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },
    #[error("line {line}: {source}")]
    Row {
        line: usize,
        #[source]
        source: RowError,
    },
    #[error("line {line}: {source}")]
    Value {
        line: usize,
        #[source]
        source: TimeError,
    },
    #[error("line {line}: {source}")]
    Segment {
        line: usize,
        #[source]
        source: TimingError,
    },
    #[error("unexpected {found} {context}")]
    UnexpectedToken {
        found: &'static str,
        context: &'static str,
    },
    #[error("chart {index}: {source}")]
    Chart {
        index: usize,
        #[source]
        source: ChartError,
    },
}
