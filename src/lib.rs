//! Core library for the polarscope sequencer.
//!
//! Drives a rotating-polarizer optical microscopy rig: locates
//! crossed-Nicols extinction angles with a sweep-and-fit procedure (plus a
//! line-search/Newton refinement path), adapts camera exposure to a target
//! intensity, and captures magnetic/ferroelectric domain images at symmetric
//! offsets from extinction across a polarizer sweep.
//!
//! Hardware is reached only through the capability traits in [`hardware`];
//! simulated implementations there back the tests and the simulation binary.

pub mod averager;
pub mod config;
pub mod error;
pub mod exposure;
pub mod fit;
pub mod frame;
pub mod hardware;
pub mod locator;
pub mod optimizer;
pub mod preview;
pub mod scan_log;
pub mod sequence;

pub use config::ScanConfiguration;
pub use error::{AppResult, PolarError};
pub use fit::FitResult;
pub use frame::{Frame, Roi};
pub use scan_log::{ScanLog, ScanSample};
pub use sequence::SequenceRunner;
