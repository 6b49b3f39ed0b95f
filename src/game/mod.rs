pub mod chart;
pub mod clap;
pub mod parsing;
pub mod player;
pub mod row;
pub mod schedule;
pub mod snap;
pub mod song;
pub mod time;
pub mod timing;
