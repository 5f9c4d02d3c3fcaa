//! Live ingestion of circuit-simulation output.
//!
//! A [`channel::DataChannel`] watches one remote file, downloads it when its
//! modification time changes, decodes it (CSV, HSPICE listing or PNG) and
//! pushes the result to the [`sink::PlotSink`]s it targets.  The
//! [`registry::Registry`] owns channels and sinks by id.  [`params`] edits
//! the model parameter cards the simulation reads.

pub mod channel;
pub mod config;
pub mod data;
pub mod error;
pub mod params;
pub mod registry;
pub mod remote;
pub mod sink;
pub mod watcher;
