//! Live display client: connection management, event reduction, session
//! wiring.
//!
//! The session owns both halves of the client core. Socket I/O runs on the
//! connection manager's task; this side consumes its events one at a time
//! and folds frames into [`DisplayState`], so every mutation completes
//! before the next event is looked at.

pub mod conn;
pub mod reducer;
pub mod state;

use std::time::Duration;

pub use conn::{ConnEvent, ConnectionManager, ConnectionState, RetryPolicy};
pub use reducer::Reduced;
pub use state::{AgentState, DisplayState, LiveResponse, RunStatus, StageAssessment};

use crate::errors::ClientError;
use crate::protocol::{ClientMessage, PerspectiveCots};

/// One processed occurrence, for projection onto a display.
#[derive(Debug, Clone)]
pub enum SessionUpdate {
    Connection(ConnectionState),
    RetryScheduled { attempt: u32, delay: Duration },
    GaveUp,
    /// A frame arrived and was folded into the session state.
    Event(Reduced),
}

/// A live connection to the orchestrator plus the state reduced from its
/// event stream.
pub struct Session {
    conn: ConnectionManager,
    events: tokio::sync::mpsc::UnboundedReceiver<ConnEvent>,
    pub state: DisplayState,
}

impl Session {
    /// Connect with the default reconnect policy.
    pub fn connect(url: impl Into<String>) -> Self {
        let (conn, events) = ConnectionManager::connect(url);
        Self {
            conn,
            events,
            state: DisplayState::new(),
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.conn.state()
    }

    /// Request a new run. Clears all per-run state locally, then sends
    /// `start_analysis` upstream (a no-op if not currently connected).
    pub fn start_analysis(
        &mut self,
        query: &str,
        universal_cot: &str,
        perspective_cots: PerspectiveCots,
    ) -> Result<(), ClientError> {
        self.state.begin_run(query);
        self.conn.send(&ClientMessage::StartAnalysis {
            query: query.to_string(),
            universal_cot: universal_cot.to_string(),
            perspective_cots,
        })
    }

    pub fn reconnect(&self) -> Result<(), ClientError> {
        self.conn.reconnect()
    }

    pub fn disconnect(&self) -> Result<(), ClientError> {
        self.conn.disconnect()
    }

    /// Wait for the next connection event and fold it into the session.
    /// Returns `None` once the connection task has terminated.
    pub async fn next_update(&mut self) -> Option<SessionUpdate> {
        let event = self.events.recv().await?;
        Some(self.ingest(event))
    }

    fn ingest(&mut self, event: ConnEvent) -> SessionUpdate {
        match event {
            ConnEvent::State(state) => SessionUpdate::Connection(state),
            ConnEvent::Frame(text) => {
                SessionUpdate::Event(reducer::apply_frame(&mut self.state, &text))
            }
            ConnEvent::RetryScheduled { attempt, delay } => {
                SessionUpdate::RetryScheduled { attempt, delay }
            }
            ConnEvent::GaveUp => SessionUpdate::GaveUp,
        }
    }
}
