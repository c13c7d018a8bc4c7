//! The six-stage analysis pipeline.
//!
//! Baseline generation, three perspective-integration stages, judge
//! synthesis, then metrics and the terminal results snapshot. Each stage
//! emits progress events as it goes; pacing between emissions is
//! configurable and zero in tests.
//!
//! The run is fire-and-forget from the server's point of view: clients that
//! disconnect mid-run are not told apart from clients that never connected,
//! and there is no cancellation path.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::info;

use super::{results, EventSink};
use crate::protocol::{
    AgentStatus, AssessmentSnapshot, BaselineSnapshot, PerspectiveAnalysis, PerspectiveCots,
    ServerEvent, ANALYSIS_AGENTS, JUDGE_AGENT, PERSPECTIVES,
};

/// Confidence reported for every baseline response.
const BASELINE_CONFIDENCE: f64 = 0.75;

/// A validated `start_analysis` request.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub query: String,
    pub universal_cot: String,
    pub perspective_cots: PerspectiveCots,
}

/// Execute one full run, emitting the event stream described in the wire
/// protocol. Never returns an error: a run either completes or reports an
/// `error` event, and the scripted stages cannot fail.
pub async fn run_analysis(request: AnalysisRequest, sink: &EventSink, pace: Duration) {
    let started = Instant::now();
    info!(query = %request.query, "starting analysis run");

    sink.emit(&ServerEvent::AnalysisStarted {
        query: request.query.clone(),
        timestamp: Some(Utc::now().timestamp_millis() as f64 / 1000.0),
    });

    let mut baselines: BTreeMap<String, BaselineSnapshot> = BTreeMap::new();
    let mut analyses: BTreeMap<String, PerspectiveAnalysis> = BTreeMap::new();
    let mut assessments: BTreeMap<String, AssessmentSnapshot> = BTreeMap::new();

    // Stage 1: baselines, bracketed by the judge's initial and baseline
    // assessments.
    sink.emit(&ServerEvent::StepComplete { step: 1 });
    judge_assessment(
        sink,
        &mut assessments,
        "initial",
        initial_assessment(&request.query),
        0.9,
        1,
        &started,
    );

    for agent in ANALYSIS_AGENTS {
        sink.emit(&agent_update(
            agent,
            AgentStatus::Thinking,
            "baseline",
            "Generating baseline response...".to_string(),
            0.1,
            1,
            None,
        ));
        tokio::time::sleep(pace).await;

        let content = baseline_content(agent, &request.query);
        baselines.insert(
            agent.to_string(),
            BaselineSnapshot {
                content: content.clone(),
                confidence: BASELINE_CONFIDENCE,
                timestamp: Some(stamp(&started)),
            },
        );
        sink.emit(&ServerEvent::BaselineResponse {
            agent: agent.to_string(),
            content: content.clone(),
            confidence: Some(BASELINE_CONFIDENCE),
            timestamp: Some(stamp(&started)),
        });
        sink.emit(&agent_update(
            agent,
            AgentStatus::Completed,
            "baseline",
            content,
            BASELINE_CONFIDENCE,
            1,
            None,
        ));
    }

    judge_assessment(
        sink,
        &mut assessments,
        "baseline",
        "Baseline responses demonstrate solid foundational understanding. All \
         agents produced coherent initial answers; ready for perspective-specific \
         analysis."
            .to_string(),
        0.88,
        1,
        &started,
    );

    // Stages 2-4: one perspective at a time, layered over the previous.
    for (index, perspective) in PERSPECTIVES.iter().enumerate() {
        let step = index as u32 + 2;
        tokio::time::sleep(pace).await;
        sink.emit(&ServerEvent::StepComplete { step });

        let guidance = guidance_for(&request.perspective_cots, perspective)
            .map(str::to_owned)
            .unwrap_or_else(|| format!("Analyze from the {perspective} perspective"));

        for agent in ANALYSIS_AGENTS {
            sink.emit(&agent_update(
                agent,
                AgentStatus::Processing,
                perspective,
                format!(
                    "[{}] Analyzing from the {} perspective... {}",
                    agent.to_uppercase(),
                    perspective,
                    preview(&guidance)
                ),
                0.5,
                step,
                Some(guidance.clone()),
            ));
            tokio::time::sleep(pace).await;

            let output = perspective_output(perspective, &request.query);
            let analysis = analyses.entry(agent.to_string()).or_default();
            match step {
                2 => analysis.step1_economic = output.clone(),
                3 => analysis.step2_economic_environmental = output.clone(),
                4 => analysis.step3_complete_synthesis = output.clone(),
                _ => unreachable!("perspective stages are steps 2 through 4"),
            }
            analysis.final_confidence = 0.85;
            analysis
                .reasoning_evolution
                .push(format!("Step {step}: {perspective} perspective"));

            sink.emit(&agent_update(
                agent,
                AgentStatus::Completed,
                perspective,
                output,
                0.85 + f64::from(step) * 0.03,
                step,
                None,
            ));
        }

        for agent in ANALYSIS_AGENTS {
            let analysis = analyses.entry(agent.to_string()).or_default().clone();
            sink.emit(&ServerEvent::MultiPerspectiveUpdate {
                agent: agent.to_string(),
                step1_economic: Some(analysis.step1_economic),
                step2_economic_environmental: Some(analysis.step2_economic_environmental),
                step3_complete_synthesis: Some(analysis.step3_complete_synthesis),
                final_confidence: Some(analysis.final_confidence),
                reasoning_evolution: analysis.reasoning_evolution,
            });
        }

        judge_assessment(
            sink,
            &mut assessments,
            &format!("step{}_{}", step - 1, perspective),
            stage_assessment(step),
            0.90 + f64::from(step) * 0.02,
            step,
            &started,
        );
    }

    // Stage 5: judge synthesis.
    tokio::time::sleep(pace).await;
    sink.emit(&ServerEvent::StepComplete { step: 5 });
    sink.emit(&judge_update(
        AgentStatus::Processing,
        "Evaluating all perspectives and synthesizing the final response...".to_string(),
        0.95,
    ));
    tokio::time::sleep(pace).await;

    let synthesis = final_synthesis(&request.query, &request.universal_cot);
    sink.emit(&judge_update(AgentStatus::Completed, synthesis.clone(), 0.92));
    judge_assessment(
        sink,
        &mut assessments,
        "final",
        format!(
            "Final evaluation complete. All {} models analyzed \"{}\" across {} \
             perspectives; the synthesis shows strong coherence and comprehensive \
             coverage.",
            ANALYSIS_AGENTS.len(),
            request.query,
            PERSPECTIVES.len()
        ),
        0.92,
        5,
        &started,
    );

    // Stage 6: metrics and the terminal snapshot.
    tokio::time::sleep(pace).await;
    sink.emit(&ServerEvent::StepComplete { step: 6 });
    let results = results::assemble(&request, synthesis, baselines, analyses, assessments);
    let processing_time = started.elapsed().as_secs_f64();
    info!(seconds = processing_time, "analysis run complete");
    sink.emit(&ServerEvent::AnalysisComplete {
        results,
        processing_time,
    });
}

fn agent_update(
    agent: &str,
    status: AgentStatus,
    perspective: &str,
    output: String,
    confidence: f64,
    step: u32,
    cot_guidance: Option<String>,
) -> ServerEvent {
    ServerEvent::AgentUpdate {
        agent: agent.to_string(),
        status,
        perspective: Some(perspective.to_string()),
        output: Some(output),
        confidence: Some(confidence),
        step: Some(step),
        cot_guidance,
        is_judge_assessment: false,
    }
}

fn judge_update(status: AgentStatus, output: String, confidence: f64) -> ServerEvent {
    ServerEvent::AgentUpdate {
        agent: JUDGE_AGENT.to_string(),
        status,
        perspective: Some("synthesis".to_string()),
        output: Some(output),
        confidence: Some(confidence),
        step: Some(5),
        cot_guidance: None,
        is_judge_assessment: true,
    }
}

/// Emit a stage assessment and record it for the final results map.
fn judge_assessment(
    sink: &EventSink,
    assessments: &mut BTreeMap<String, AssessmentSnapshot>,
    stage: &str,
    assessment: String,
    confidence: f64,
    step: u32,
    started: &Instant,
) {
    let timestamp = stamp(started);
    assessments.insert(
        stage.to_string(),
        AssessmentSnapshot {
            assessment: assessment.clone(),
            confidence,
            timestamp: Some(timestamp.clone()),
            step: Some(step),
        },
    );
    sink.emit(&ServerEvent::JudgeAssessment {
        stage: stage.to_string(),
        assessment,
        confidence: Some(confidence),
        status: None,
        step: Some(step),
        timestamp: Some(timestamp),
    });
}

fn guidance_for<'a>(cots: &'a PerspectiveCots, perspective: &str) -> Option<&'a str> {
    let text = match perspective {
        "economic" => &cots.economic,
        "environmental" => &cots.environmental,
        "technological" => &cots.technological,
        _ => return None,
    };
    (!text.is_empty()).then_some(text.as_str())
}

/// Elapsed run time as an `mm:ss` stamp.
fn stamp(started: &Instant) -> String {
    let secs = started.elapsed().as_secs();
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

fn preview(text: &str) -> String {
    const MAX: usize = 30;
    if text.chars().count() <= MAX {
        text.to_string()
    } else {
        let cut: String = text.chars().take(MAX).collect();
        format!("{cut}...")
    }
}

fn initial_assessment(query: &str) -> String {
    format!(
        "Initial query assessment: \"{query}\" requires multi-perspective \
         analysis. Each stage will be evaluated for coherence and completeness."
    )
}

fn baseline_content(agent: &str, query: &str) -> String {
    format!(
        "[{}] Baseline analysis: {}. Initial response without perspective guidance.",
        agent.to_uppercase(),
        query
    )
}

fn perspective_output(perspective: &str, query: &str) -> String {
    match perspective {
        "economic" => format!(
            "Economic analysis reveals market implications, cost-benefit \
             considerations, and financial viability factors for {query}. \
             Investment requirements and ROI projections are critical."
        ),
        "environmental" => format!(
            "Environmental impact assessment for {query} shows sustainability \
             implications, resource utilization patterns, and ecological \
             footprint considerations requiring careful balance."
        ),
        "technological" => format!(
            "Technological feasibility analysis of {query} indicates innovation \
             opportunities, implementation challenges, and infrastructure \
             requirements for successful deployment."
        ),
        other => format!("Analysis of {query} from the {other} perspective."),
    }
}

fn stage_assessment(step: u32) -> String {
    match step {
        2 => "Economic perspective analysis shows strong analytical depth. \
              Cost-benefit frameworks are well established across all agents."
            .to_string(),
        3 => "Environmental integration broadens the analysis. Sustainability \
              factors are balanced against the economic considerations."
            .to_string(),
        4 => "Technological synthesis unifies all three perspectives. Ready \
              for final evaluation."
            .to_string(),
        other => format!("Stage {other} assessment: coherent progress."),
    }
}

fn final_synthesis(query: &str, universal_cot: &str) -> String {
    let mut synthesis = format!(
        "Comprehensive multi-perspective analysis of \"{query}\" completed. \
         Integrating economic viability, environmental sustainability, and \
         technological feasibility provides a robust foundation for \
         decision-making."
    );
    if !universal_cot.is_empty() {
        synthesis.push_str(&format!(
            " Chain-of-thought guidance \"{universal_cot}\" sharpened the \
             analysis across all dimensions."
        ));
    }
    synthesis
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{parse_event, Downstream};
    use crate::server::ServerState;

    fn request() -> AnalysisRequest {
        AnalysisRequest {
            query: "should cities ban cars?".to_string(),
            universal_cot: "reason stepwise".to_string(),
            perspective_cots: PerspectiveCots {
                economic: "weigh costs".to_string(),
                ..Default::default()
            },
        }
    }

    async fn collect_run() -> Vec<ServerEvent> {
        let state = ServerState::new(Duration::ZERO);
        let mut rx = state.sink.subscribe();
        run_analysis(request(), &state.sink, Duration::ZERO).await;

        let mut events = Vec::new();
        while let Ok(text) = rx.try_recv() {
            match parse_event(&text).expect("pipeline emitted an undecodable frame") {
                Downstream::Event(event) => events.push(event),
                Downstream::Unknown(ty) => panic!("pipeline emitted unknown type {ty}"),
            }
        }
        events
    }

    #[tokio::test]
    async fn run_brackets_stream_with_started_and_complete() {
        let events = collect_run().await;
        assert!(matches!(
            events.first(),
            Some(ServerEvent::AnalysisStarted { .. })
        ));
        assert!(matches!(
            events.last(),
            Some(ServerEvent::AnalysisComplete { .. })
        ));
    }

    #[tokio::test]
    async fn run_emits_exactly_six_steps_and_full_agent_coverage() {
        let events = collect_run().await;

        let steps: Vec<u32> = events
            .iter()
            .filter_map(|e| match e {
                ServerEvent::StepComplete { step } => Some(*step),
                _ => None,
            })
            .collect();
        assert_eq!(steps, vec![1, 2, 3, 4, 5, 6]);

        let baselines = events
            .iter()
            .filter(|e| matches!(e, ServerEvent::BaselineResponse { .. }))
            .count();
        assert_eq!(baselines, ANALYSIS_AGENTS.len());

        let perspective_updates = events
            .iter()
            .filter(|e| matches!(e, ServerEvent::MultiPerspectiveUpdate { .. }))
            .count();
        assert_eq!(perspective_updates, ANALYSIS_AGENTS.len() * PERSPECTIVES.len());

        // initial + baseline + one per perspective stage + final
        let assessments = events
            .iter()
            .filter(|e| matches!(e, ServerEvent::JudgeAssessment { .. }))
            .count();
        assert_eq!(assessments, 3 + PERSPECTIVES.len());
    }

    #[tokio::test]
    async fn final_snapshot_is_complete_and_internally_consistent() {
        let events = collect_run().await;
        let results = events
            .iter()
            .find_map(|e| match e {
                ServerEvent::AnalysisComplete { results, .. } => Some(results.clone()),
                _ => None,
            })
            .expect("no analysis_complete event");

        assert_eq!(results.baseline_responses.len(), ANALYSIS_AGENTS.len());
        assert_eq!(
            results.multi_perspective_analyses.len(),
            ANALYSIS_AGENTS.len()
        );
        for analysis in results.multi_perspective_analyses.values() {
            assert!(!analysis.step1_economic.is_empty());
            assert!(!analysis.step2_economic_environmental.is_empty());
            assert!(!analysis.step3_complete_synthesis.is_empty());
            assert_eq!(analysis.reasoning_evolution.len(), PERSPECTIVES.len());
        }
        assert!(results.completion_status.judging_complete);
        assert!(!results.final_synthesis.is_empty());
        assert!(results.judge_assessments.contains_key("final"));
    }

    #[tokio::test]
    async fn perspective_guidance_is_forwarded_into_updates() {
        let events = collect_run().await;
        let guided = events.iter().any(|e| {
            matches!(
                e,
                ServerEvent::AgentUpdate {
                    cot_guidance: Some(g),
                    ..
                } if g == "weigh costs"
            )
        });
        assert!(guided, "economic stage updates should carry the supplied CoT");
    }

    #[test]
    fn preview_truncates_long_guidance() {
        assert_eq!(preview("short"), "short");
        let long = "x".repeat(40);
        let p = preview(&long);
        assert!(p.ends_with("..."));
        assert_eq!(p.chars().count(), 33);
    }

    #[test]
    fn guidance_lookup_ignores_empty_strings() {
        let cots = PerspectiveCots {
            economic: "a".to_string(),
            ..Default::default()
        };
        assert_eq!(guidance_for(&cots, "economic"), Some("a"));
        assert_eq!(guidance_for(&cots, "environmental"), None);
        assert_eq!(guidance_for(&cots, "unknown"), None);
    }
}
