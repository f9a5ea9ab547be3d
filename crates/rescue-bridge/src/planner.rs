//! Plan generation seam.

use async_trait::async_trait;
use rescue_types::Plan;

/// Turns a mission prompt into an ordered list of subtasks.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, prompt: &str) -> Plan;
}

/// Fixed five-step plan used until a real planner is wired in.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlaceholderPlanner;

#[async_trait]
impl Planner for PlaceholderPlanner {
    async fn plan(&self, prompt: &str) -> Plan {
        Plan::new(vec![
            format!("Locate objects for: {prompt}"),
            "Pick up first block".to_string(),
            "Place block at target position".to_string(),
            "Verify placement in simulation".to_string(),
            "Report result".to_string(),
        ])
    }
}
