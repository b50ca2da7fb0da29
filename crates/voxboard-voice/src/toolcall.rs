//! Streamed function-call accumulation.
//!
//! Tool call arguments arrive as JSON text fragments spread over many
//! events. Fragments are buffered per call id; nothing is parsed until the
//! endpoint signals completion. A completion whose buffer does not parse is
//! usually an early signal racing the last fragment, so by default the
//! buffer is kept and the caller waits for more data instead of failing.

use crate::diagram::GenerateDiagramArgs;
use crate::error::{VoiceError, VoiceResult};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, warn};

/// Accumulator behavior knobs
#[derive(Debug, Clone, Default)]
pub struct AccumulatorConfig {
    /// Treat an unparsable buffer at completion as a hard error instead of
    /// waiting for more fragments.
    pub strict: bool,
}

/// Outcome of a completion signal for one tool call.
#[derive(Debug)]
pub enum ToolCallCompletion {
    /// Arguments parsed and passed schema validation; buffer discarded.
    Ready(GenerateDiagramArgs),
    /// Buffer did not parse yet; kept for further fragments.
    Incomplete,
}

#[derive(Debug, Default)]
struct ToolCallBuffer {
    name: Option<String>,
    arguments: String,
}

/// Per-call-id buffers for in-flight tool calls. Shared across the event
/// dispatch path, so all access goes through an internal lock.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    config: AccumulatorConfig,
    buffers: Mutex<HashMap<String, ToolCallBuffer>>,
}

impl ToolCallAccumulator {
    pub fn new(config: AccumulatorConfig) -> Self {
        Self {
            config,
            buffers: Mutex::new(HashMap::new()),
        }
    }

    /// Append one argument fragment to the buffer for `call_id`, creating
    /// the buffer on first sight.
    pub fn on_fragment(&self, call_id: &str, name: Option<&str>, fragment: &str) {
        let mut buffers = match self.buffers.lock() {
            Ok(b) => b,
            Err(poisoned) => poisoned.into_inner(),
        };
        let buffer = buffers.entry(call_id.to_string()).or_default();
        if buffer.name.is_none() {
            buffer.name = name.map(str::to_string);
        }
        buffer.arguments.push_str(fragment);
    }

    /// Handle the completion signal for `call_id`.
    ///
    /// On a clean parse the buffer is consumed and validated arguments are
    /// returned. On a parse failure the buffer is retained and `Incomplete`
    /// is returned (strict mode errors and discards instead). A payload
    /// that parses but violates the diagram schema is discarded with an
    /// error; retrying cannot fix it.
    pub fn on_done(
        &self,
        call_id: &str,
        name: &str,
        final_arguments: Option<&str>,
    ) -> VoiceResult<ToolCallCompletion> {
        let mut buffers = match self.buffers.lock() {
            Ok(b) => b,
            Err(poisoned) => poisoned.into_inner(),
        };

        let buffer = buffers.entry(call_id.to_string()).or_default();
        if let Some(full) = final_arguments {
            // The done event carries the authoritative full argument string
            // when present; prefer it over whatever fragments we collected.
            if !full.is_empty() {
                buffer.arguments = full.to_string();
            }
        }

        if name != "generate_diagram" {
            warn!("Ignoring unknown tool call '{}' (id {})", name, call_id);
            buffers.remove(call_id);
            return Ok(ToolCallCompletion::Incomplete);
        }

        let text = buffer.arguments.clone();
        match serde_json::from_str::<GenerateDiagramArgs>(&text) {
            Ok(args) => {
                buffers.remove(call_id);
                args.validate()?;
                debug!(
                    "Tool call {} complete: {} nodes",
                    call_id,
                    args.diagram_data.nodes.len()
                );
                Ok(ToolCallCompletion::Ready(args))
            }
            Err(e) if self.config.strict => {
                buffers.remove(call_id);
                Err(VoiceError::ToolCall(format!(
                    "tool call {} arguments did not parse: {}",
                    call_id, e
                )))
            }
            Err(e) => {
                if text.is_empty() {
                    // Duplicate done for an already-consumed call; nothing
                    // to keep.
                    buffers.remove(call_id);
                } else {
                    debug!(
                        "Tool call {} buffer not yet parseable ({} bytes): {}",
                        call_id,
                        text.len(),
                        e
                    );
                }
                Ok(ToolCallCompletion::Incomplete)
            }
        }
    }

    /// Drop all in-flight buffers (session reset).
    pub fn clear(&self) {
        let mut buffers = match self.buffers.lock() {
            Ok(b) => b,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !buffers.is_empty() {
            debug!("Discarding {} in-flight tool call buffers", buffers.len());
        }
        buffers.clear();
    }

    /// Number of call ids currently buffered.
    pub fn in_flight(&self) -> usize {
        self.buffers.lock().map(|b| b.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_args() -> String {
        r#"{"diagram_data":{"nodes":[{"id":"a","label":"API","type":"rectangle"}],"edges":[]}}"#
            .to_string()
    }

    #[test]
    fn fragments_assemble_into_parsed_arguments() {
        let acc = ToolCallAccumulator::new(AccumulatorConfig::default());
        let full = valid_args();
        let (head, tail) = full.split_at(full.len() / 2);

        acc.on_fragment("call_1", Some("generate_diagram"), head);
        acc.on_fragment("call_1", None, tail);

        match acc.on_done("call_1", "generate_diagram", None).unwrap() {
            ToolCallCompletion::Ready(args) => {
                assert_eq!(args.diagram_data.nodes.len(), 1);
                assert_eq!(args.diagram_data.nodes[0].id, "a");
            }
            other => panic!("expected Ready, got {:?}", other),
        }
        assert_eq!(acc.in_flight(), 0);
    }

    #[test]
    fn truncated_buffer_waits_for_more_fragments() {
        let acc = ToolCallAccumulator::new(AccumulatorConfig::default());
        let full = valid_args();
        let head = &full[..full.len() - 10];

        acc.on_fragment("call_1", Some("generate_diagram"), head);
        match acc.on_done("call_1", "generate_diagram", None).unwrap() {
            ToolCallCompletion::Incomplete => {}
            other => panic!("expected Incomplete, got {:?}", other),
        }
        // Buffer retained: the tail plus a second done completes the call.
        assert_eq!(acc.in_flight(), 1);
        acc.on_fragment("call_1", None, &full[full.len() - 10..]);
        match acc.on_done("call_1", "generate_diagram", None).unwrap() {
            ToolCallCompletion::Ready(_) => {}
            other => panic!("expected Ready, got {:?}", other),
        }
    }

    #[test]
    fn strict_mode_rejects_truncated_buffer() {
        let acc = ToolCallAccumulator::new(AccumulatorConfig { strict: true });
        acc.on_fragment("call_1", Some("generate_diagram"), r#"{"diagram_data"#);
        let err = acc.on_done("call_1", "generate_diagram", None).unwrap_err();
        assert!(matches!(err, VoiceError::ToolCall(_)));
        assert_eq!(acc.in_flight(), 0);
    }

    #[test]
    fn done_payload_overrides_fragments() {
        let acc = ToolCallAccumulator::new(AccumulatorConfig::default());
        acc.on_fragment("call_1", Some("generate_diagram"), "garbage");
        match acc
            .on_done("call_1", "generate_diagram", Some(&valid_args()))
            .unwrap()
        {
            ToolCallCompletion::Ready(_) => {}
            other => panic!("expected Ready, got {:?}", other),
        }
    }

    #[test]
    fn schema_violation_is_an_error_and_discards_buffer() {
        let acc = ToolCallAccumulator::new(AccumulatorConfig::default());
        let zero_nodes = r#"{"diagram_data":{"nodes":[],"edges":[]}}"#;
        acc.on_fragment("call_1", Some("generate_diagram"), zero_nodes);
        let err = acc.on_done("call_1", "generate_diagram", None).unwrap_err();
        assert!(matches!(err, VoiceError::Schema(_)));
        assert_eq!(acc.in_flight(), 0);
    }

    #[test]
    fn unknown_tool_names_are_drained() {
        let acc = ToolCallAccumulator::new(AccumulatorConfig::default());
        acc.on_fragment("call_9", Some("delete_everything"), "{}");
        match acc.on_done("call_9", "delete_everything", None).unwrap() {
            ToolCallCompletion::Incomplete => {}
            other => panic!("expected Incomplete, got {:?}", other),
        }
        assert_eq!(acc.in_flight(), 0);
    }

    #[test]
    fn second_done_after_success_is_a_no_op() {
        let acc = ToolCallAccumulator::new(AccumulatorConfig::default());
        acc.on_fragment("call_1", Some("generate_diagram"), &valid_args());
        assert!(matches!(
            acc.on_done("call_1", "generate_diagram", None).unwrap(),
            ToolCallCompletion::Ready(_)
        ));
        // Duplicate done never re-delivers the consumed diagram.
        assert!(matches!(
            acc.on_done("call_1", "generate_diagram", None).unwrap(),
            ToolCallCompletion::Incomplete
        ));
        assert_eq!(acc.in_flight(), 0);
    }

    #[test]
    fn done_without_fragments_uses_final_payload() {
        let acc = ToolCallAccumulator::new(AccumulatorConfig::default());
        match acc
            .on_done("call_2", "generate_diagram", Some(&valid_args()))
            .unwrap()
        {
            ToolCallCompletion::Ready(_) => {}
            other => panic!("expected Ready, got {:?}", other),
        }
    }
}
