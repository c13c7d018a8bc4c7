//! Deterministic fold of the orchestrator event stream into [`DisplayState`].
//!
//! Each event is a pure merge against current state, processed to
//! completion before the next one. Malformed frames are dropped at the
//! boundary and logged; unknown event types are ignored. Neither can
//! corrupt in-progress state.

use chrono::Utc;
use tracing::{debug, error, warn};

use crate::client::state::{
    live_response_id, DisplayState, LiveResponse, RunStatus, StageAssessment,
};
use crate::protocol::{
    self, AgentStatus, AnalysisResults, Downstream, ServerEvent, DEFAULT_ASSESSMENT_CONFIDENCE,
    DEFAULT_BASELINE_CONFIDENCE, JUDGE_AGENT,
};

/// What a received frame did to the state.
#[derive(Debug, Clone, PartialEq)]
pub enum Reduced {
    /// The event was applied; the applied event is returned for projection.
    Applied(ServerEvent),
    /// Valid frame with an unrecognized `type`; state untouched.
    Ignored(String),
    /// Undecodable frame; dropped, state untouched.
    Malformed,
}

/// Decode one raw frame and fold it into `state`.
pub fn apply_frame(state: &mut DisplayState, text: &str) -> Reduced {
    match protocol::parse_event(text) {
        Ok(Downstream::Event(event)) => {
            apply(state, event.clone());
            Reduced::Applied(event)
        }
        Ok(Downstream::Unknown(ty)) => {
            debug!(event_type = %ty, "ignoring unknown event type");
            Reduced::Ignored(ty)
        }
        Err(err) => {
            warn!(error = %err, "dropping malformed frame");
            Reduced::Malformed
        }
    }
}

/// Fold one decoded event into `state`.
pub fn apply(state: &mut DisplayState, event: ServerEvent) {
    match event {
        ServerEvent::AnalysisStarted { query, .. } => {
            state.reset_run();
            state.status = RunStatus::Running;
            state.current_step = 1;
            state.query = query;
        }

        ServerEvent::JudgeAssessment {
            stage,
            assessment,
            confidence,
            status,
            step,
            timestamp,
        } => {
            let confidence = confidence.unwrap_or(DEFAULT_ASSESSMENT_CONFIDENCE);
            state.assessments.push(StageAssessment {
                stage,
                assessment: assessment.clone(),
                confidence,
                timestamp,
                received_at: Utc::now(),
            });

            let judge = state.agents.entry(JUDGE_AGENT.to_string()).or_default();
            judge.output = assessment;
            judge.confidence = confidence;
            if let Some(status) = status {
                judge.status = status;
            }
            if step.is_some() {
                judge.step = step;
            }
        }

        ServerEvent::BaselineResponse {
            agent,
            content,
            confidence,
            timestamp,
        } => {
            // Whole-record upsert: an omitted confidence falls back to the
            // type default, not to the previously stored value.
            state.baselines.insert(
                agent,
                protocol::BaselineSnapshot {
                    content,
                    confidence: confidence.unwrap_or(DEFAULT_BASELINE_CONFIDENCE),
                    timestamp,
                },
            );
        }

        ServerEvent::AgentUpdate {
            agent,
            status,
            perspective,
            output,
            confidence,
            step,
            cot_guidance,
            is_judge_assessment,
        } => {
            let entry = state.agents.entry(agent.clone()).or_default();
            entry.status = status;
            // Absent fields never overwrite populated ones.
            if let Some(perspective) = perspective {
                entry.perspective = perspective;
            }
            if let Some(output) = output {
                entry.output = output;
            }
            if let Some(confidence) = confidence {
                entry.confidence = confidence;
            }
            if step.is_some() {
                entry.step = step;
            }
            if cot_guidance.is_some() {
                entry.cot_guidance = cot_guidance;
            }

            let received_at = Utc::now();
            let response = LiveResponse {
                id: live_response_id(&agent, received_at),
                agent,
                status: entry.status,
                perspective: entry.perspective.clone(),
                output: entry.output.clone(),
                confidence: entry.confidence,
                step: entry.step,
                is_judge_assessment,
                received_at,
            };
            state.responses.push_front(response);
        }

        ServerEvent::StepComplete { step } => {
            // Steps should be non-decreasing but out-of-order values are
            // assigned, not rejected.
            state.current_step = step;
        }

        ServerEvent::MultiPerspectiveUpdate {
            agent,
            step1_economic,
            step2_economic_environmental,
            step3_complete_synthesis,
            final_confidence,
            reasoning_evolution,
        } => {
            let entry = state.analyses.entry(agent).or_default();
            if let Some(text) = step1_economic {
                entry.step1_economic = text;
            }
            if let Some(text) = step2_economic_environmental {
                entry.step2_economic_environmental = text;
            }
            if let Some(text) = step3_complete_synthesis {
                entry.step3_complete_synthesis = text;
            }
            if let Some(confidence) = final_confidence {
                entry.final_confidence = confidence;
            }
            if !reasoning_evolution.is_empty() {
                entry.reasoning_evolution = reasoning_evolution;
            }
        }

        ServerEvent::AnalysisComplete {
            results,
            processing_time,
        } => {
            merge_results(state, &results);
            state.status = RunStatus::Completed;
            state.processing_time = Some(processing_time);
            state.results = Some(results);
        }

        ServerEvent::Error { message } => {
            error!(message = %message, "orchestrator reported an error");
            state.status = RunStatus::Error;
            state.last_error = Some(message);
        }

        ServerEvent::ConnectionConfirmed { client_id, .. } => {
            debug!(client_id = %client_id, "connection confirmed by orchestrator");
        }

        ServerEvent::Pong => {}
    }
}

/// Merge the maps embedded in the terminal snapshot over streamed partials.
/// Embedded data wins for overlapping keys.
fn merge_results(state: &mut DisplayState, results: &AnalysisResults) {
    for (agent, baseline) in &results.baseline_responses {
        state.baselines.insert(agent.clone(), baseline.clone());
    }
    for (agent, analysis) in &results.multi_perspective_analyses {
        state.analyses.insert(agent.clone(), analysis.clone());
    }
    if let Some(judge) = state.agents.get_mut(JUDGE_AGENT) {
        if !results.final_synthesis.is_empty() {
            judge.output = results.final_synthesis.clone();
        }
        judge.status = AgentStatus::Completed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{BaselineSnapshot, PerspectiveAnalysis};

    fn running_state() -> DisplayState {
        let mut state = DisplayState::new();
        apply(
            &mut state,
            ServerEvent::AnalysisStarted {
                query: "q".to_string(),
                timestamp: None,
            },
        );
        state
    }

    fn update(agent: &str, status: AgentStatus) -> ServerEvent {
        ServerEvent::AgentUpdate {
            agent: agent.to_string(),
            status,
            perspective: None,
            output: None,
            confidence: None,
            step: None,
            cot_guidance: None,
            is_judge_assessment: false,
        }
    }

    #[test]
    fn analysis_started_resets_from_any_prior_state() {
        let mut state = DisplayState::new();
        state.status = RunStatus::Error;
        state.last_error = Some("boom".to_string());
        state.current_step = 6;
        state.results = Some(AnalysisResults::default());
        apply(&mut state, update("claude", AgentStatus::Completed));
        assert_eq!(state.responses.len(), 1);

        apply(
            &mut state,
            ServerEvent::AnalysisStarted {
                query: "again".to_string(),
                timestamp: Some(12.5),
            },
        );

        assert_eq!(state.status, RunStatus::Running);
        assert_eq!(state.current_step, 1);
        assert_eq!(state.query, "again");
        assert!(state.responses.is_empty());
        assert!(state.assessments.is_empty());
        assert!(state.baselines.is_empty());
        assert!(state.analyses.is_empty());
        assert!(state.results.is_none());
        assert!(state.last_error.is_none());
        assert_eq!(state.agents["claude"].status, AgentStatus::Idle);
    }

    #[test]
    fn response_log_length_tracks_agent_update_count() {
        let mut state = running_state();
        for i in 0..5 {
            let agent = if i % 2 == 0 { "claude" } else { "gpt" };
            apply(&mut state, update(agent, AgentStatus::Thinking));
        }
        assert_eq!(state.responses.len(), 5);

        // A new run starts the count over.
        apply(
            &mut state,
            ServerEvent::AnalysisStarted {
                query: "q2".to_string(),
                timestamp: None,
            },
        );
        apply(&mut state, update("grok", AgentStatus::Thinking));
        assert_eq!(state.responses.len(), 1);
    }

    #[test]
    fn agent_update_without_confidence_retains_prior_value() {
        let mut state = running_state();
        apply(
            &mut state,
            ServerEvent::AgentUpdate {
                agent: "gpt".to_string(),
                status: AgentStatus::Processing,
                perspective: Some("economic".to_string()),
                output: Some("working".to_string()),
                confidence: Some(0.42),
                step: Some(2),
                cot_guidance: None,
                is_judge_assessment: false,
            },
        );
        apply(
            &mut state,
            ServerEvent::AgentUpdate {
                agent: "gpt".to_string(),
                status: AgentStatus::Completed,
                perspective: None,
                output: Some("done".to_string()),
                confidence: None,
                step: None,
                cot_guidance: None,
                is_judge_assessment: false,
            },
        );

        let gpt = &state.agents["gpt"];
        assert_eq!(gpt.status, AgentStatus::Completed);
        assert_eq!(gpt.confidence, 0.42);
        assert_eq!(gpt.output, "done");
        assert_eq!(gpt.perspective, "economic");
        assert_eq!(gpt.step, Some(2));
    }

    #[test]
    fn same_millisecond_updates_get_distinct_response_ids() {
        let mut state = running_state();
        apply(&mut state, update("gpt", AgentStatus::Thinking));
        apply(&mut state, update("gpt", AgentStatus::Processing));
        assert_eq!(state.responses.len(), 2);
        assert_ne!(state.responses[0].id, state.responses[1].id);
    }

    #[test]
    fn response_log_is_most_recent_first() {
        let mut state = running_state();
        apply(&mut state, update("claude", AgentStatus::Thinking));
        apply(&mut state, update("gpt", AgentStatus::Thinking));
        assert_eq!(state.responses[0].agent, "gpt");
        assert_eq!(state.responses[1].agent, "claude");
    }

    #[test]
    fn baseline_reupsert_without_confidence_falls_back_to_type_default() {
        let mut state = running_state();
        apply(
            &mut state,
            ServerEvent::BaselineResponse {
                agent: "claude".to_string(),
                content: "X".to_string(),
                confidence: Some(0.6),
                timestamp: None,
            },
        );
        apply(
            &mut state,
            ServerEvent::BaselineResponse {
                agent: "claude".to_string(),
                content: "Y".to_string(),
                confidence: None,
                timestamp: None,
            },
        );

        let baseline = &state.baselines["claude"];
        assert_eq!(baseline.content, "Y");
        assert_eq!(baseline.confidence, DEFAULT_BASELINE_CONFIDENCE);
    }

    #[test]
    fn judge_assessment_appends_and_updates_judge_agent() {
        let mut state = running_state();
        apply(
            &mut state,
            ServerEvent::JudgeAssessment {
                stage: "baseline".to_string(),
                assessment: "coherent start".to_string(),
                confidence: None,
                status: Some(AgentStatus::Processing),
                step: Some(1),
                timestamp: Some("00:02".to_string()),
            },
        );

        assert_eq!(state.assessments.len(), 1);
        assert_eq!(state.assessments[0].stage, "baseline");
        assert_eq!(
            state.assessments[0].confidence,
            DEFAULT_ASSESSMENT_CONFIDENCE
        );

        let judge = &state.agents[JUDGE_AGENT];
        assert_eq!(judge.output, "coherent start");
        assert_eq!(judge.status, AgentStatus::Processing);
        assert_eq!(judge.step, Some(1));
    }

    #[test]
    fn judge_assessment_without_status_keeps_prior_status() {
        let mut state = running_state();
        apply(&mut state, update("judge", AgentStatus::Processing));
        apply(
            &mut state,
            ServerEvent::JudgeAssessment {
                stage: "step1_economic".to_string(),
                assessment: "good depth".to_string(),
                confidence: Some(0.92),
                status: None,
                step: None,
                timestamp: None,
            },
        );
        assert_eq!(state.agents[JUDGE_AGENT].status, AgentStatus::Processing);
        assert_eq!(state.agents[JUDGE_AGENT].confidence, 0.92);
    }

    #[test]
    fn step_complete_assigns_even_out_of_order() {
        let mut state = running_state();
        apply(&mut state, ServerEvent::StepComplete { step: 4 });
        assert_eq!(state.current_step, 4);
        apply(&mut state, ServerEvent::StepComplete { step: 2 });
        assert_eq!(state.current_step, 2);
    }

    #[test]
    fn multi_perspective_update_merges_per_field() {
        let mut state = running_state();
        apply(
            &mut state,
            ServerEvent::MultiPerspectiveUpdate {
                agent: "grok".to_string(),
                step1_economic: Some("econ".to_string()),
                step2_economic_environmental: None,
                step3_complete_synthesis: None,
                final_confidence: Some(0.8),
                reasoning_evolution: vec!["Step 2: economic perspective".to_string()],
            },
        );
        apply(
            &mut state,
            ServerEvent::MultiPerspectiveUpdate {
                agent: "grok".to_string(),
                step1_economic: None,
                step2_economic_environmental: Some("econ+env".to_string()),
                step3_complete_synthesis: None,
                final_confidence: None,
                reasoning_evolution: vec![],
            },
        );

        let analysis = &state.analyses["grok"];
        assert_eq!(analysis.step1_economic, "econ");
        assert_eq!(analysis.step2_economic_environmental, "econ+env");
        assert_eq!(analysis.final_confidence, 0.8);
        assert_eq!(analysis.reasoning_evolution.len(), 1);
    }

    #[test]
    fn analysis_complete_embedded_baseline_overrides_streamed_partial() {
        let mut state = running_state();
        apply(
            &mut state,
            ServerEvent::BaselineResponse {
                agent: "claude".to_string(),
                content: "partial".to_string(),
                confidence: Some(0.5),
                timestamp: None,
            },
        );

        let mut results = AnalysisResults::default();
        results.baseline_responses.insert(
            "claude".to_string(),
            BaselineSnapshot {
                content: "authoritative".to_string(),
                confidence: 0.75,
                timestamp: None,
            },
        );
        results.multi_perspective_analyses.insert(
            "gpt".to_string(),
            PerspectiveAnalysis {
                step3_complete_synthesis: "synthesis".to_string(),
                ..Default::default()
            },
        );
        apply(
            &mut state,
            ServerEvent::AnalysisComplete {
                results,
                processing_time: 18.7,
            },
        );

        assert_eq!(state.status, RunStatus::Completed);
        assert_eq!(state.processing_time, Some(18.7));
        assert_eq!(state.baselines["claude"].content, "authoritative");
        assert_eq!(state.baselines["claude"].confidence, 0.75);
        assert_eq!(
            state.analyses["gpt"].step3_complete_synthesis,
            "synthesis"
        );
        assert!(state.results.is_some());
    }

    #[test]
    fn error_event_is_terminal_for_the_run() {
        let mut state = running_state();
        apply(
            &mut state,
            ServerEvent::Error {
                message: "backend failed".to_string(),
            },
        );
        assert_eq!(state.status, RunStatus::Error);
        assert_eq!(state.last_error.as_deref(), Some("backend failed"));
    }

    #[test]
    fn malformed_frame_leaves_state_untouched() {
        let mut state = running_state();
        apply(&mut state, update("claude", AgentStatus::Thinking));
        let before = state.clone();

        assert_eq!(apply_frame(&mut state, "{not json"), Reduced::Malformed);
        assert_eq!(
            apply_frame(&mut state, r#"{"type":"agent_update","agent":"claude"}"#),
            Reduced::Malformed
        );

        assert_eq!(state.status, before.status);
        assert_eq!(state.responses.len(), before.responses.len());
        assert_eq!(state.agents, before.agents);
    }

    #[test]
    fn unknown_event_type_is_ignored_without_state_change() {
        let mut state = running_state();
        let before_step = state.current_step;
        match apply_frame(&mut state, r#"{"type":"heartbeat","seq":9}"#) {
            Reduced::Ignored(ty) => assert_eq!(ty, "heartbeat"),
            other => panic!("expected Ignored, got {:?}", other),
        }
        assert_eq!(state.current_step, before_step);
    }

    #[test]
    fn apply_frame_applies_known_events() {
        let mut state = running_state();
        match apply_frame(&mut state, r#"{"type":"step_complete","step":3}"#) {
            Reduced::Applied(ServerEvent::StepComplete { step }) => assert_eq!(step, 3),
            other => panic!("expected Applied, got {:?}", other),
        }
        assert_eq!(state.current_step, 3);
    }
}
