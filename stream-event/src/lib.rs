//! Wire-shape types shared between the agent execution core and anything that
//! persists or renders its lifecycle: async-subagent status/mode, the
//! persisted subagent record and index-entry projections, and the tagging
//! used for streamed content deltas.
//!
//! This crate has no dependency on `agent-core` and no async runtime
//! dependency at all — it is pure data, so a future UI or storage layer can
//! depend on it without pulling in `tokio`.

mod content;
mod record;
mod status;

pub use content::ContentKind;
pub use record::{format_duration, AsyncIndexEntry, AsyncSubagentRecord};
pub use status::{AsyncMode, AsyncStatus};
