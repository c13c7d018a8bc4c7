//! Display-side state for a live analysis run.
//!
//! Everything here is owned by the client and mutated only by the reducer,
//! one event at a time. The orchestrator never reads any of it back.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use uuid::Uuid;

use crate::protocol::{
    AgentStatus, AnalysisResults, BaselineSnapshot, PerspectiveAnalysis, ANALYSIS_AGENTS,
    JUDGE_AGENT,
};

/// Lifecycle of the current run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    #[default]
    Idle,
    /// A start request was sent; the orchestrator has not yet confirmed.
    Starting,
    Running,
    Completed,
    Error,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Error)
    }
}

/// Live view of one named agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AgentState {
    pub status: AgentStatus,
    pub perspective: String,
    pub output: String,
    /// In [0, 1]. Retains its last populated value when an update omits it.
    pub confidence: f64,
    pub step: Option<u32>,
    pub cot_guidance: Option<String>,
}

/// One judge verdict over a pipeline stage. Appended, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageAssessment {
    pub stage: String,
    pub assessment: String,
    pub confidence: f64,
    /// Wire timestamp if the orchestrator sent one.
    pub timestamp: Option<String>,
    pub received_at: DateTime<Utc>,
}

/// Chronological audit entry for one received `agent_update`.
///
/// Snapshots the agent's merged state at the moment of receipt; later
/// updates to the agent never touch entries already in the log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiveResponse {
    pub id: String,
    pub agent: String,
    pub status: AgentStatus,
    pub perspective: String,
    pub output: String,
    pub confidence: f64,
    pub step: Option<u32>,
    pub is_judge_assessment: bool,
    pub received_at: DateTime<Utc>,
}

/// Unique id for a [`LiveResponse`].
///
/// Receipt time alone is not enough: bursts of updates for one agent land
/// within the same millisecond, so a random suffix disambiguates.
pub fn live_response_id(agent: &str, received_at: DateTime<Utc>) -> String {
    let nonce = Uuid::new_v4().simple().to_string();
    format!(
        "{}-{}-{}",
        agent,
        received_at.timestamp_millis(),
        &nonce[..8]
    )
}

/// Everything the display renders for one run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DisplayState {
    pub status: RunStatus,
    pub query: String,
    /// 1-based step counter, assigned (not validated) from `step_complete`.
    pub current_step: u32,
    pub agents: BTreeMap<String, AgentState>,
    /// Append-only judge log, oldest first.
    pub assessments: Vec<StageAssessment>,
    /// Audit log of agent updates, most recent first.
    pub responses: VecDeque<LiveResponse>,
    pub baselines: BTreeMap<String, BaselineSnapshot>,
    pub analyses: BTreeMap<String, PerspectiveAnalysis>,
    /// Terminal snapshot; at most one per run.
    pub results: Option<AnalysisResults>,
    pub processing_time: Option<f64>,
    pub last_error: Option<String>,
}

impl DisplayState {
    /// Fresh state with the full agent roster seeded idle.
    pub fn new() -> Self {
        let mut state = Self::default();
        state.seed_agents();
        state
    }

    fn seed_agents(&mut self) {
        self.agents.clear();
        for agent in ANALYSIS_AGENTS {
            self.agents.insert(agent.to_string(), AgentState::default());
        }
        self.agents
            .insert(JUDGE_AGENT.to_string(), AgentState::default());
    }

    /// Clear every per-run accumulator. A run must never inherit stale data
    /// from a previous one.
    pub fn reset_run(&mut self) {
        self.seed_agents();
        self.current_step = 0;
        self.assessments.clear();
        self.responses.clear();
        self.baselines.clear();
        self.analyses.clear();
        self.results = None;
        self.processing_time = None;
        self.last_error = None;
    }

    /// Local transition when the user sends a start request, before the
    /// orchestrator confirms with `analysis_started`.
    pub fn begin_run(&mut self, query: &str) {
        self.reset_run();
        self.status = RunStatus::Starting;
        self.query = query.to_string();
    }
}
