// Scan pipeline: planning, per-chunk sessions and orchestration

pub mod clean;
pub mod live;
pub mod orchestrator;
pub mod planner;
pub mod session;
pub mod types;
