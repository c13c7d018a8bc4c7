//! Terminal projection of the live session.
//!
//! Purely derived output: a step progress bar plus one printed line per
//! interesting event, and a results summary when a run completes. No state
//! is kept here beyond the progress bar itself.

use console::{style, Emoji};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use crate::client::{ConnectionState, DisplayState, Reduced, SessionUpdate};
use crate::protocol::{AgentStatus, ServerEvent, TOTAL_STEPS};

static JUDGE: Emoji<'_, '_> = Emoji("⚖️  ", "[judge] ");
static LINK: Emoji<'_, '_> = Emoji("🔌 ", "");
static DONE: Emoji<'_, '_> = Emoji("✨ ", "*");

/// Renders session updates as they are applied.
pub struct LiveRenderer {
    multi: MultiProgress,
    step_bar: ProgressBar,
}

impl Default for LiveRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl LiveRenderer {
    pub fn new() -> Self {
        let multi = MultiProgress::new();

        let step_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:24.cyan/blue}] {pos}/{len} {msg}")
            .expect("progress bar template is a valid static string")
            .progress_chars("█▓▒░");

        let step_bar = multi.add(ProgressBar::new(u64::from(TOTAL_STEPS)));
        step_bar.set_style(step_style);
        step_bar.set_prefix("Steps");

        Self { multi, step_bar }
    }

    /// Print a line via `MultiProgress`, falling back to `eprintln!` if the
    /// rich UI fails.
    fn print_line(&self, msg: impl AsRef<str>) {
        if self.multi.println(msg.as_ref()).is_err() {
            eprintln!("{}", msg.as_ref());
        }
    }

    /// Project one session update onto the terminal.
    pub fn observe(&self, update: &SessionUpdate, state: &DisplayState) {
        match update {
            SessionUpdate::Connection(conn) => self.connection(*conn),
            SessionUpdate::RetryScheduled { attempt, delay } => {
                self.print_line(format!(
                    "{}{}",
                    LINK,
                    style(format!(
                        "reconnecting in {:.1}s (attempt {})",
                        delay.as_secs_f64(),
                        attempt + 1
                    ))
                    .dim()
                ));
            }
            SessionUpdate::GaveUp => {
                self.print_line(
                    style("gave up reconnecting; press start again to retry")
                        .red()
                        .to_string(),
                );
            }
            SessionUpdate::Event(Reduced::Applied(event)) => self.event(event, state),
            SessionUpdate::Event(Reduced::Ignored(ty)) => {
                self.print_line(style(format!("ignoring unknown event: {ty}")).dim().to_string());
            }
            SessionUpdate::Event(Reduced::Malformed) => {
                self.print_line(style("dropped a malformed frame").yellow().to_string());
            }
        }
    }

    fn connection(&self, conn: ConnectionState) {
        let line = match conn {
            ConnectionState::Connecting => style("connecting...").dim().to_string(),
            ConnectionState::Connected => style("connected").green().to_string(),
            ConnectionState::Disconnected => style("disconnected").dim().to_string(),
            ConnectionState::Error => style("connection error").red().to_string(),
        };
        self.print_line(format!("{LINK}{line}"));
    }

    fn event(&self, event: &ServerEvent, state: &DisplayState) {
        match event {
            ServerEvent::AnalysisStarted { query, .. } => {
                self.step_bar.reset();
                self.step_bar.set_message(step_label(1).to_string());
                self.print_line(format!("analysis started: {}", style(query).bold()));
            }
            ServerEvent::StepComplete { step } => {
                self.step_bar
                    .set_position(u64::from((*step).min(TOTAL_STEPS)));
                self.step_bar.set_message(step_label(*step).to_string());
            }
            ServerEvent::AgentUpdate {
                agent,
                status,
                perspective,
                output,
                confidence,
                ..
            } => {
                let text = output.as_deref().unwrap_or("");
                let perspective = perspective.as_deref().unwrap_or("-");
                let confidence = confidence
                    .map(|c| format!("{c:.2}"))
                    .unwrap_or_else(|| "-".to_string());
                self.print_line(format!(
                    "{} {:>6} [{}] {} {}",
                    status_icon(*status),
                    style(agent).cyan(),
                    perspective,
                    truncate(text, 60),
                    style(format!("(conf {confidence})")).dim()
                ));
            }
            ServerEvent::BaselineResponse { agent, content, .. } => {
                self.print_line(
                    style(format!("baseline {agent}: {}", truncate(content, 60)))
                        .dim()
                        .to_string(),
                );
            }
            ServerEvent::JudgeAssessment { stage, assessment, .. } => {
                self.print_line(format!(
                    "{}{} {}",
                    JUDGE,
                    style(format!("[{stage}]")).magenta(),
                    truncate(assessment, 70)
                ));
            }
            ServerEvent::MultiPerspectiveUpdate { agent, .. } => {
                self.print_line(
                    style(format!("perspective progress recorded for {agent}"))
                        .dim()
                        .to_string(),
                );
            }
            ServerEvent::AnalysisComplete { .. } => {
                self.step_bar.finish_with_message("complete");
                self.summary(state);
            }
            ServerEvent::Error { message } => {
                self.print_line(style(format!("run failed: {message}")).red().to_string());
            }
            ServerEvent::ConnectionConfirmed { message, .. } => {
                self.print_line(style(message.as_str()).dim().to_string());
            }
            ServerEvent::Pong => {}
        }
    }

    fn summary(&self, state: &DisplayState) {
        let Some(results) = &state.results else {
            return;
        };

        self.print_line(String::new());
        self.print_line(format!("{DONE}{}", style("Final synthesis").bold()));
        for line in textwrap::wrap(&results.final_synthesis, 78) {
            self.print_line(format!("  {line}"));
        }

        if !results.quality_scores.is_empty() {
            self.print_line(style("quality scores").bold().to_string());
            for (name, score) in &results.quality_scores {
                self.print_line(format!("  {:>8}  {score:.2}", name));
            }
        }
        if let Some(factor) = results.baseline_comparison.get("improvement_factor") {
            self.print_line(format!(
                "  improvement over baselines: {}",
                style(format!("{factor:.2}x")).green()
            ));
        }
        if let Some(seconds) = state.processing_time {
            self.print_line(
                style(format!("completed in {seconds:.1}s")).dim().to_string(),
            );
        }
    }
}

fn status_icon(status: AgentStatus) -> String {
    match status {
        AgentStatus::Idle => style("·").dim().to_string(),
        AgentStatus::Thinking => style("…").yellow().to_string(),
        AgentStatus::Processing => style("▶").cyan().to_string(),
        AgentStatus::Completed => style("✓").green().to_string(),
        AgentStatus::Error => style("✗").red().to_string(),
    }
}

/// Stage name shown beside the step bar.
fn step_label(step: u32) -> &'static str {
    match step {
        1 => "baseline",
        2 => "economic",
        3 => "environmental",
        4 => "technological",
        5 => "judge synthesis",
        _ => "finalizing",
    }
}

/// Truncate a string with ellipsis.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{cut}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_leaves_short_strings_alone() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello", 5), "hello");
    }

    #[test]
    fn truncate_appends_ellipsis() {
        let out = truncate("abcdefghij", 8);
        assert_eq!(out, "abcde...");
    }

    #[test]
    fn truncate_is_char_safe() {
        // Multibyte input must not be sliced mid-codepoint.
        let out = truncate("áéíóúáéíóú", 8);
        assert!(out.ends_with("..."));
    }

    #[test]
    fn step_labels_cover_all_pipeline_steps() {
        for step in 1..=TOTAL_STEPS {
            assert!(!step_label(step).is_empty());
        }
        assert_eq!(step_label(1), "baseline");
        assert_eq!(step_label(5), "judge synthesis");
        assert_eq!(step_label(99), "finalizing");
    }

    #[test]
    fn renderer_constructs_without_a_terminal() {
        let renderer = LiveRenderer::new();
        renderer.print_line("smoke");
    }
}
