//! Diagram payload types, schema validation, and the tool definition
//! advertised to the model.
//!
//! A tool call is only handed to the renderer after `validate()` passes;
//! everything downstream can assume a structurally well-formed diagram.

use crate::error::{VoiceError, VoiceResult};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use tracing::debug;

/// Shape vocabulary for nodes. Geo shapes are preferred; `icon` and
/// `actor` are special renderings; the rest are legacy abstract kinds
/// kept for compatibility with older prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    #[default]
    Rectangle,
    Ellipse,
    Diamond,
    Cloud,
    Icon,
    Actor,
    User,
    Server,
    Database,
    Decision,
    Step,
}

/// One node of the diagram
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagramNode {
    pub id: String,
    pub label: String,

    #[serde(rename = "type", default)]
    pub kind: NodeKind,

    /// Icon slug for `NodeKind::Icon` nodes (e.g. "docker", "react")
    #[serde(rename = "iconName", default, skip_serializing_if = "Option::is_none")]
    pub icon_name: Option<String>,

    /// Manual coordinates; 0,0 means "let the renderer lay it out"
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
}

/// A directed connection between two nodes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagramEdge {
    pub source: String,
    pub target: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// The full diagram structure produced by one tool call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagramData {
    pub nodes: Vec<DiagramNode>,
    pub edges: Vec<DiagramEdge>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

impl DiagramData {
    /// Structural validation. Edge endpoints are checked for emptiness but
    /// not for referential integrity; the renderer resolves dangling ids.
    pub fn validate(&self) -> VoiceResult<()> {
        if self.nodes.is_empty() {
            return Err(VoiceError::Schema(
                "diagram must have at least one node".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for node in &self.nodes {
            if node.id.is_empty() {
                return Err(VoiceError::Schema("node id cannot be empty".to_string()));
            }
            if node.label.is_empty() {
                return Err(VoiceError::Schema(format!(
                    "node '{}' has an empty label",
                    node.id
                )));
            }
            if !seen.insert(node.id.as_str()) {
                return Err(VoiceError::Schema(format!(
                    "duplicate node id '{}'",
                    node.id
                )));
            }
        }

        for edge in &self.edges {
            if edge.source.is_empty() || edge.target.is_empty() {
                return Err(VoiceError::Schema(
                    "edge source and target cannot be empty".to_string(),
                ));
            }
        }

        debug!(
            "Validated diagram: {} nodes, {} edges",
            self.nodes.len(),
            self.edges.len()
        );
        Ok(())
    }
}

/// Arguments of the `generate_diagram` function call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateDiagramArgs {
    pub diagram_data: DiagramData,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

impl GenerateDiagramArgs {
    pub fn validate(&self) -> VoiceResult<()> {
        self.diagram_data.validate()
    }
}

/// Consumer of validated diagrams. The session engine calls `render` once
/// per accepted tool call; `clear` wipes any displayed state on reset.
pub trait DiagramRenderer: Send + Sync {
    fn render(&self, data: &DiagramData, explanation: Option<&str>);

    fn clear(&self) {}
}

/// JSON-Schema tool definition for `generate_diagram`, advertised in the
/// session configuration so the model emits structured calls.
pub fn generate_diagram_tool() -> serde_json::Value {
    json!({
        "type": "function",
        "name": "generate_diagram",
        "description": "Generate an architectural diagram with nodes and edges based on user description",
        "parameters": {
            "type": "object",
            "properties": {
                "diagram_data": {
                    "type": "object",
                    "description": "The diagram structure containing nodes and edges",
                    "properties": {
                        "nodes": {
                            "type": "array",
                            "description": "List of nodes (entities, steps, actors) in the diagram",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "id": {
                                        "type": "string",
                                        "description": "Unique identifier for the node (e.g., \"user1\", \"server1\")"
                                    },
                                    "label": {
                                        "type": "string",
                                        "description": "Short, punchy label for the node (e.g., \"Auth Service\")"
                                    },
                                    "type": {
                                        "type": "string",
                                        "enum": [
                                            "rectangle", "ellipse", "diamond", "cloud",
                                            "icon", "actor",
                                            "user", "server", "database", "decision", "step"
                                        ],
                                        "description": "Type of node. Prefer geo shapes: rectangle (boxes), ellipse (rounded), diamond (decisions), cloud (abstract). Special: icon (external logos), actor (user/person)."
                                    },
                                    "iconName": {
                                        "type": "string",
                                        "description": "Optional. Technical slug for external icon (e.g., \"react\", \"docker\"). Used with type=\"icon\"."
                                    },
                                    "x": {
                                        "type": "number",
                                        "description": "Optional. Manual X coordinate for precise positioning"
                                    },
                                    "y": {
                                        "type": "number",
                                        "description": "Optional. Manual Y coordinate for precise positioning"
                                    }
                                },
                                "required": ["id", "label", "type"]
                            }
                        },
                        "edges": {
                            "type": "array",
                            "description": "List of connections (arrows) between nodes",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "source": {
                                        "type": "string",
                                        "description": "ID of the source node"
                                    },
                                    "target": {
                                        "type": "string",
                                        "description": "ID of the target node"
                                    },
                                    "label": {
                                        "type": "string",
                                        "description": "Optional label for the edge (e.g., \"HTTP Request\")"
                                    }
                                },
                                "required": ["source", "target"]
                            }
                        },
                        "explanation": {
                            "type": "string",
                            "description": "Optional markdown summary of the architecture flow and key decisions."
                        }
                    },
                    "required": ["nodes", "edges"]
                }
            },
            "required": ["diagram_data"]
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, label: &str) -> DiagramNode {
        DiagramNode {
            id: id.to_string(),
            label: label.to_string(),
            kind: NodeKind::default(),
            icon_name: None,
            x: 0.0,
            y: 0.0,
        }
    }

    #[test]
    fn valid_diagram_passes() {
        let data = DiagramData {
            nodes: vec![node("a", "API"), node("b", "DB")],
            edges: vec![DiagramEdge {
                source: "a".to_string(),
                target: "b".to_string(),
                label: Some("query".to_string()),
            }],
            explanation: None,
        };
        assert!(data.validate().is_ok());
    }

    #[test]
    fn empty_diagram_is_rejected() {
        let data = DiagramData {
            nodes: vec![],
            edges: vec![],
            explanation: None,
        };
        assert!(matches!(data.validate(), Err(VoiceError::Schema(_))));
    }

    #[test]
    fn duplicate_node_ids_are_rejected() {
        let data = DiagramData {
            nodes: vec![node("a", "One"), node("a", "Two")],
            edges: vec![],
            explanation: None,
        };
        assert!(matches!(data.validate(), Err(VoiceError::Schema(_))));
    }

    #[test]
    fn empty_edge_endpoint_is_rejected() {
        let data = DiagramData {
            nodes: vec![node("a", "API")],
            edges: vec![DiagramEdge {
                source: "a".to_string(),
                target: String::new(),
                label: None,
            }],
            explanation: None,
        };
        assert!(matches!(data.validate(), Err(VoiceError::Schema(_))));
    }

    #[test]
    fn node_kind_defaults_to_rectangle() {
        let json = r#"{"id":"n1","label":"Cache"}"#;
        let node: DiagramNode = serde_json::from_str(json).unwrap();
        assert_eq!(node.kind, NodeKind::Rectangle);
        assert_eq!(node.x, 0.0);
        assert!(node.icon_name.is_none());
    }

    #[test]
    fn node_kind_uses_wire_names() {
        let json = r#"{"id":"n1","label":"Docker","type":"icon","iconName":"docker"}"#;
        let node: DiagramNode = serde_json::from_str(json).unwrap();
        assert_eq!(node.kind, NodeKind::Icon);
        assert_eq!(node.icon_name.as_deref(), Some("docker"));
    }

    #[test]
    fn tool_definition_names_generate_diagram() {
        let tool = generate_diagram_tool();
        assert_eq!(tool["name"], "generate_diagram");
        assert_eq!(tool["type"], "function");
        assert_eq!(
            tool["parameters"]["required"],
            serde_json::json!(["diagram_data"])
        );
    }
}
