//! # vocalcv-core
//!
//! Talk to a resume: microphone audio is streamed to a hosted voice model and
//! its spoken answers are played back without gaps, with barge-in.
//!
//! ## Architecture
//!
//! ```text
//! Microphone → cpal callback → SPSC ring → capture thread (resample, 4096-sample blocks)
//!                                                 │ FrameCaptured
//!                                                 ▼
//!   VoiceAgent ──Connect/Disconnect──► control loop (spawn_blocking) ◄── transport task
//!                                          │   Session state machine       (websocket)
//!                                          ▼
//!                        PlaybackScheduler → output voices → speaker
//!                                                      └──► AnalysisTap → Visualizer
//! ```
//!
//! Audio callbacks never block. Their buffers are sized up front and only
//! grow if a device asks for more than 8192 frames per callback or more than
//! 1024 voices are queued at once. Finished speech is freed and reported from
//! a separate playback thread, not the output callback. Session state is only
//! touched by the control loop.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod codec;
pub mod error;
pub mod ipc;
pub mod playback;
pub mod resume;
pub mod session;
pub mod transport;
pub mod visualizer;

// Convenience re-exports for downstream crates
pub use error::{AgentError, Result};
pub use ipc::events::{SessionState, SessionStatusEvent};
pub use resume::ResumeData;
pub use session::{agent::VoiceAgent, AgentConfig, SessionStats};
pub use transport::{LiveTransport, LiveTransportConfig, SessionSetup};
pub use visualizer::{VisualFrame, Visualizer};

#[cfg(feature = "audio-cpal")]
pub use audio::CpalBackend;
