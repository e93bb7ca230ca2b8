pub mod clock;
pub mod config;
pub mod format;
pub mod model;
pub mod transcript;
pub mod tree;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{load_config, load_config_with, MonitorConfig};
pub use format::{StatusCounts, SubagentStats};
pub use model::{
    agent_id_for_key, derive_status, records_from_wire, subagents_from_wire, AgentGroup,
    SessionRecord, SessionStatus, SubagentNode, ACTIVE_THRESHOLD_MS,
};
pub use transcript::{TranscriptMessage, TranscriptRole, TranscriptStore, TranscriptView};
pub use tree::{build_tree, NodeId, Snapshot, TreeRow, TreeView};
