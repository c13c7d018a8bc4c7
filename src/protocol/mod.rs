//! Wire protocol for the ensemble event stream.
//!
//! Every frame is one UTF-8 JSON object with a mandatory `type`
//! discriminator. Upstream (client → orchestrator) carries analysis
//! requests; downstream (orchestrator → client) carries typed progress
//! events.
//!
//! The historical protocol is inconsistent about which key carries "the
//! text" (`output` vs `content` vs `assessment`); that is normalized here at
//! the boundary via serde aliases so the rest of the crate sees one name per
//! event. Unknown `type` values are tolerated (forward compatibility);
//! known types with missing required fields are a parse failure.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::errors::ProtocolError;

/// The three analysis agents, in pipeline order.
pub const ANALYSIS_AGENTS: [&str; 3] = ["claude", "gpt", "grok"];

/// The designated judge agent.
pub const JUDGE_AGENT: &str = "judge";

/// The three analytical perspectives, in stage order.
pub const PERSPECTIVES: [&str; 3] = ["economic", "environmental", "technological"];

/// Number of pipeline steps reported via `step_complete`.
pub const TOTAL_STEPS: u32 = 6;

/// Confidence assigned to a stage assessment that arrives without one.
pub const DEFAULT_ASSESSMENT_CONFIDENCE: f64 = 0.9;

/// Confidence assigned to a baseline response that arrives without one.
pub const DEFAULT_BASELINE_CONFIDENCE: f64 = 0.7;

fn default_assessment_confidence() -> f64 {
    DEFAULT_ASSESSMENT_CONFIDENCE
}

fn default_baseline_confidence() -> f64 {
    DEFAULT_BASELINE_CONFIDENCE
}

// ── Agent status ─────────────────────────────────────────────────────

/// Lifecycle of a single agent within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    #[default]
    Idle,
    Thinking,
    Processing,
    Completed,
    Error,
}

impl AgentStatus {
    /// True once the agent will produce no further output this run.
    pub fn is_terminal(self) -> bool {
        matches!(self, AgentStatus::Completed | AgentStatus::Error)
    }
}

// ── Upstream messages ────────────────────────────────────────────────

/// Per-perspective chain-of-thought guidance, forwarded verbatim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerspectiveCots {
    #[serde(default)]
    pub economic: String,
    #[serde(default)]
    pub environmental: String,
    #[serde(default)]
    pub technological: String,
}

/// Messages a client sends to the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    StartAnalysis {
        query: String,
        #[serde(default, rename = "universalCot")]
        universal_cot: String,
        #[serde(default, rename = "perspectiveCots")]
        perspective_cots: PerspectiveCots,
    },
    Ping,
}

// ── Downstream events ────────────────────────────────────────────────

/// Progress events the orchestrator emits during a run.
///
/// Serialized form matches the historical frontend protocol exactly,
/// including camelCase field names where it used them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    AnalysisStarted {
        query: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<f64>,
    },
    JudgeAssessment {
        stage: String,
        #[serde(alias = "output")]
        assessment: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        confidence: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<AgentStatus>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        step: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },
    BaselineResponse {
        agent: String,
        #[serde(alias = "output")]
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        confidence: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },
    AgentUpdate {
        agent: String,
        status: AgentStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        perspective: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        confidence: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        step: Option<u32>,
        #[serde(default, rename = "cotGuidance", skip_serializing_if = "Option::is_none")]
        cot_guidance: Option<String>,
        #[serde(default, rename = "isJudgeAssessment")]
        is_judge_assessment: bool,
    },
    StepComplete {
        step: u32,
    },
    MultiPerspectiveUpdate {
        agent: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        step1_economic: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        step2_economic_environmental: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        step3_complete_synthesis: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        final_confidence: Option<f64>,
        #[serde(default)]
        reasoning_evolution: Vec<String>,
    },
    AnalysisComplete {
        results: AnalysisResults,
        #[serde(default)]
        processing_time: f64,
    },
    Error {
        message: String,
    },
    /// Greeting sent by the server on accept; a no-op for display state.
    ConnectionConfirmed {
        #[serde(default)]
        client_id: String,
        #[serde(default)]
        message: String,
    },
    /// Reply to an upstream `ping`; a no-op for display state.
    Pong,
}

impl ServerEvent {
    /// The wire `type` tag of this event.
    pub fn type_name(&self) -> &'static str {
        match self {
            ServerEvent::AnalysisStarted { .. } => "analysis_started",
            ServerEvent::JudgeAssessment { .. } => "judge_assessment",
            ServerEvent::BaselineResponse { .. } => "baseline_response",
            ServerEvent::AgentUpdate { .. } => "agent_update",
            ServerEvent::StepComplete { .. } => "step_complete",
            ServerEvent::MultiPerspectiveUpdate { .. } => "multi_perspective_update",
            ServerEvent::AnalysisComplete { .. } => "analysis_complete",
            ServerEvent::Error { .. } => "error",
            ServerEvent::ConnectionConfirmed { .. } => "connection_confirmed",
            ServerEvent::Pong => "pong",
        }
    }
}

/// Downstream `type` values this client understands.
pub const KNOWN_EVENT_TYPES: [&str; 10] = [
    "analysis_started",
    "judge_assessment",
    "baseline_response",
    "agent_update",
    "step_complete",
    "multi_perspective_update",
    "analysis_complete",
    "error",
    "connection_confirmed",
    "pong",
];

/// Upstream `type` values the orchestrator understands.
pub const KNOWN_MESSAGE_TYPES: [&str; 2] = ["start_analysis", "ping"];

// ── Final results snapshot ───────────────────────────────────────────

/// Raw baseline answer from one agent, produced without guidance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineSnapshot {
    #[serde(default)]
    pub content: String,
    #[serde(default = "default_baseline_confidence")]
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl Default for BaselineSnapshot {
    fn default() -> Self {
        Self {
            content: String::new(),
            confidence: DEFAULT_BASELINE_CONFIDENCE,
            timestamp: None,
        }
    }
}

/// One agent's staged multi-perspective analysis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerspectiveAnalysis {
    pub step1_economic: String,
    pub step2_economic_environmental: String,
    pub step3_complete_synthesis: String,
    pub final_confidence: f64,
    pub reasoning_evolution: Vec<String>,
}

/// A judge assessment as embedded in the final results map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentSnapshot {
    #[serde(default)]
    pub assessment: String,
    #[serde(default = "default_assessment_confidence")]
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<u32>,
}

impl Default for AssessmentSnapshot {
    fn default() -> Self {
        Self {
            assessment: String::new(),
            confidence: DEFAULT_ASSESSMENT_CONFIDENCE,
            timestamp: None,
            step: None,
        }
    }
}

/// The judge's final evaluation of the run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JudgeEvaluation {
    pub final_synthesis: String,
    pub reasoning: String,
    pub confidence: f64,
    pub comparative_analysis: String,
}

/// Which pipeline stages finished before the run ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionStatus {
    pub baselines_complete: bool,
    pub step1_complete: bool,
    pub step2_complete: bool,
    pub step3_complete: bool,
    pub judging_complete: bool,
    pub logging_complete: bool,
}

/// Terminal, immutable snapshot delivered once per completed run.
///
/// The embedded baseline and multi-perspective maps are authoritative: on
/// receipt they are merged over any partial data streamed earlier in the
/// run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisResults {
    pub final_synthesis: String,
    pub judge_analysis: String,
    pub judge_evaluation: JudgeEvaluation,
    pub quality_scores: BTreeMap<String, f64>,
    pub baseline_comparison: BTreeMap<String, f64>,
    pub improvement_metrics: BTreeMap<String, f64>,
    pub completion_status: CompletionStatus,
    pub baseline_responses: BTreeMap<String, BaselineSnapshot>,
    pub multi_perspective_analyses: BTreeMap<String, PerspectiveAnalysis>,
    pub judge_assessments: BTreeMap<String, AssessmentSnapshot>,
}

// ── Boundary parsing ─────────────────────────────────────────────────

/// A decoded downstream frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Downstream {
    Event(ServerEvent),
    /// Valid envelope, but a `type` this client does not know. Ignored.
    Unknown(String),
}

/// A decoded upstream frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Upstream {
    Message(ClientMessage),
    /// Valid envelope, but a `type` the orchestrator does not know.
    Unknown(String),
}

fn split_type(text: &str) -> Result<(String, Value), ProtocolError> {
    let value: Value = serde_json::from_str(text).map_err(ProtocolError::InvalidJson)?;
    let ty = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingType)?
        .to_string();
    Ok((ty, value))
}

/// Decode a downstream frame.
///
/// Unknown `type` values come back as [`Downstream::Unknown`] rather than an
/// error so that newer orchestrators can add event types without breaking
/// older clients. A known type that fails to decode is a hard parse failure
/// and the frame must be dropped.
pub fn parse_event(text: &str) -> Result<Downstream, ProtocolError> {
    let (ty, value) = split_type(text)?;
    if !KNOWN_EVENT_TYPES.contains(&ty.as_str()) {
        return Ok(Downstream::Unknown(ty));
    }
    serde_json::from_value(value)
        .map(Downstream::Event)
        .map_err(|source| ProtocolError::InvalidPayload {
            event_type: ty,
            source,
        })
}

/// Decode an upstream frame. Same tolerance rules as [`parse_event`].
pub fn parse_client_message(text: &str) -> Result<Upstream, ProtocolError> {
    let (ty, value) = split_type(text)?;
    if !KNOWN_MESSAGE_TYPES.contains(&ty.as_str()) {
        return Ok(Upstream::Unknown(ty));
    }
    serde_json::from_value(value)
        .map(Upstream::Message)
        .map_err(|source| ProtocolError::InvalidPayload {
            event_type: ty,
            source,
        })
}
