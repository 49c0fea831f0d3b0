//! Demo ingress around a pacing session
//!
//! ```text
//! SyntheticStage (audio) ──► Output (audio) ──► LoggingTrack
//!                                 │
//!                           Session clock + lifecycle
//!                                 │
//! SyntheticStage (video) ──► Output (video) ──► LoggingTrack
//!        ▲                        │
//!        └──── keyframe requests ─┘
//! ```

pub mod ingress;
pub mod stage;
pub mod track;
