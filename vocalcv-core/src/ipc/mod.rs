//! Status types published to whatever UI hosts the agent.
//!
//! All types derive `serde::Serialize` + `serde::Deserialize` so a host can
//! forward them over its own event bus unchanged.

pub mod events;
