//! Routes upstream tool calls to registry handlers and correlates their replies.

use crate::ws::session::SessionEvent;
use futures_util::FutureExt;
use hume_evi::{ToolCall, ToolResponse};
use serde_json::{Value, json};
use std::{collections::HashMap, panic::AssertUnwindSafe, sync::Arc, time::Instant};
use tokio::sync::mpsc;
use tracing::{Instrument, debug, info, warn};
use voicebridge_core::{ToolError, ToolRegistry};

/// A tool invocation awaiting its handler.
#[derive(Debug, Clone)]
pub struct ToolCallRecord {
    pub call_id: String,
    pub tool_name: String,
    pub parameters: Value,
    pub dispatched_at: Instant,
}

pub struct ToolDispatcher {
    session_id: String,
    tools: Arc<ToolRegistry>,
    events: mpsc::Sender<SessionEvent>,
    in_flight: HashMap<String, ToolCallRecord>,
}

impl ToolDispatcher {
    pub fn new(
        session_id: String,
        tools: Arc<ToolRegistry>,
        events: mpsc::Sender<SessionEvent>,
    ) -> Self {
        Self {
            session_id,
            tools,
            events,
            in_flight: HashMap::new(),
        }
    }

    /// Starts a tool call.
    ///
    /// Calls that can be answered without running a handler (unknown tool,
    /// unparseable parameters) return their response straight away. Otherwise
    /// the handler runs on its own task and reports back through
    /// [`SessionEvent::ToolFinished`].
    pub fn dispatch(&mut self, call: ToolCall) -> Option<ToolResponse> {
        let Some(handler) = self.tools.resolve(&call.name) else {
            warn!(tool = %call.name, call_id = %call.tool_call_id, "Upstream requested an unknown tool");
            let message = format!("tool {} not found", call.name);
            return Some(error_response(call.tool_call_id, call.name, message));
        };

        let parameters = match parse_parameters(&call.parameters) {
            Ok(parameters) => parameters,
            Err(e) => {
                warn!(tool = %call.name, call_id = %call.tool_call_id, error = %e, "Tool call carried invalid parameters");
                let message = ToolError::InvalidParameters(e.to_string()).to_string();
                return Some(error_response(call.tool_call_id, call.name, message));
            }
        };

        if self.in_flight.contains_key(&call.tool_call_id) {
            warn!(call_id = %call.tool_call_id, "Ignoring repeated tool call id that is still in flight");
            return None;
        }

        info!(tool = %call.name, call_id = %call.tool_call_id, "Dispatching tool call");
        self.in_flight.insert(
            call.tool_call_id.clone(),
            ToolCallRecord {
                call_id: call.tool_call_id.clone(),
                tool_name: call.name,
                parameters: parameters.clone(),
                dispatched_at: Instant::now(),
            },
        );

        let session_id = self.session_id.clone();
        let events = self.events.clone();
        let call_id = call.tool_call_id;
        tokio::spawn(
            async move {
                let outcome = AssertUnwindSafe(handler.call(&session_id, parameters))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| Err(ToolError::Failed("tool handler panicked".into())));
                // The session may already be gone; a late result is simply dropped.
                if events
                    .send(SessionEvent::ToolFinished { call_id, outcome })
                    .await
                    .is_err()
                {
                    debug!("Session closed before tool finished");
                }
            }
            .in_current_span(),
        );
        None
    }

    /// Builds the response for a finished call, or `None` if the call id is
    /// not in flight.
    pub fn complete(
        &mut self,
        call_id: &str,
        outcome: Result<Value, ToolError>,
    ) -> Option<ToolResponse> {
        let Some(record) = self.in_flight.remove(call_id) else {
            debug!(call_id, "Dropping result for unknown tool call");
            return None;
        };
        let elapsed_ms = record.dispatched_at.elapsed().as_millis() as u64;
        match outcome {
            Ok(value) => {
                info!(tool = %record.tool_name, call_id, elapsed_ms, "Tool call succeeded");
                Some(ToolResponse {
                    tool_call_id: record.call_id,
                    content: value.to_string(),
                    tool_name: Some(record.tool_name),
                })
            }
            Err(e) => {
                warn!(tool = %record.tool_name, call_id, elapsed_ms, parameters = %record.parameters, error = %e, "Tool call failed");
                Some(error_response(record.call_id, record.tool_name, e.to_string()))
            }
        }
    }

    #[cfg(test)]
    fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Forgets every pending call. Handlers keep running; their results are discarded.
    pub fn abandon(&mut self) {
        if !self.in_flight.is_empty() {
            debug!(count = self.in_flight.len(), "Abandoning in-flight tool calls");
        }
        self.in_flight.clear();
    }
}

/// Empty parameters mean "no arguments".
fn parse_parameters(raw: &str) -> Result<Value, serde_json::Error> {
    if raw.trim().is_empty() {
        return Ok(json!({}));
    }
    serde_json::from_str(raw)
}

fn error_response(call_id: String, tool_name: String, message: String) -> ToolResponse {
    ToolResponse {
        tool_call_id: call_id,
        content: json!({ "error": message }).to_string(),
        tool_name: Some(tool_name),
    }
}
