//! Pacing and synchronization between a pull-style processing stage and a
//! push-style real-time track.
//!
//! Data Flow (one per output):
//! ```text
//!                       SampleCmd
//! processing stage ──────────────► OutputTask ──► Output::on_sample_pulled
//!                                                        │
//!                               ClockReference ◄─────────┤ running time
//!                                                        ▼
//!                                                   PacingGate
//!                                      ┌────────────────┼───────────────┐
//!                                      ▼                ▼               ▼
//!                                    Drop        WaitThenForward     Forward
//!                                  (stats)              └──────┬────────┘
//!                                                              ▼
//!                                                          TrackSink
//! ```
//!
//! All outputs of a [`session::Session`] share one clock and one
//! [`lifecycle::Lifecycle`]; whichever output hits end-of-stream, a track
//! failure or an explicit close first tears the whole session down.

pub mod clock;
pub mod config;
pub mod encoder;
pub mod error;
pub mod gate;
pub mod lifecycle;
pub mod output;
pub mod sample;
pub mod session;
pub mod stats;
pub mod track;

#[cfg(test)]
mod testing;

pub use clock::{ClockReference, ClockTime, Segment, SystemClock};
pub use config::PacerConfig;
pub use error::PacerError;
pub use gate::{DropReason, PacingDecision, PacingGate};
pub use lifecycle::{CloseReason, Lifecycle};
pub use output::{Output, OutputTask, PullOutcome};
pub use sample::{Codec, MediaKind, RawSample, Sample, SampleCmd};
pub use session::Session;
pub use track::TrackSink;
