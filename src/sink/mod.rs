// src/sink/mod.rs

//! Report consumers: the monitoring authority's command file and the
//! time-series store.

pub mod command;
pub mod trend;

pub use command::CommandWriter;
pub use trend::{CsvTrendSink, TimeSeriesSink, TrendRecorder, TrendSample};
