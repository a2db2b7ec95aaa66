//! Real-time scan core: volume transport, series ingestion, ROI analysis,
//! and results serving for streamed fMRI acquisitions.
//!
//! The modules mirror the shape of the running system. A scanner-side
//! sender streams volumes through [`transport`] into the [`receiver`]'s 4D
//! buffer; the session driver pulls each completed volume through
//! [`preprocessing`] and [`analysis`] and publishes the output via
//! [`results`], where an external presentation client polls for it.

pub mod analysis;
pub mod io;
pub mod math;
pub mod prelude;
pub mod preprocessing;
pub mod receiver;
pub mod results;
pub mod series;
pub mod telemetry;
pub mod transport;

pub use prelude::{AnalysisResult, ScanError, ScanResult, VolumeAnalysis};
