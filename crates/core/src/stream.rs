//! Transport-independent tool-call reconstruction.
//!
//! Streaming backends announce a function call once (with a call id and,
//! depending on the API, a separate item id or positional index) and then
//! send argument fragments keyed by whichever identifier they prefer. The
//! [`ToolCallAssembler`] keeps an alias table from every identifier it has
//! seen to one canonical call id, so fragments land on the right call no
//! matter which key the transport used.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A single tool-call event in a provider stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolCallDelta {
    /// A call was announced (or re-announced when the item completes).
    Started {
        call_id: String,
        #[serde(default)]
        item_id: Option<String>,
        #[serde(default)]
        name: Option<String>,
        /// Full or partial argument text carried on the announcement
        #[serde(default)]
        arguments: Option<String>,
    },
    /// An argument fragment to append.
    ArgumentsDelta { key: String, delta: String },
    /// The final argument text, replacing anything accumulated so far.
    ArgumentsDone { key: String, arguments: String },
}

/// A fully reconstructed call, before it is validated as a canvas operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssembledCall {
    pub id: String,
    pub name: String,
    /// Parsed JSON arguments; the raw text as a JSON string when unparsable.
    pub arguments: serde_json::Value,
}

#[derive(Debug, Default)]
struct PendingCall {
    name: Option<String>,
    arguments: String,
}

/// Accumulates [`ToolCallDelta`]s into complete calls.
#[derive(Debug, Default)]
pub struct ToolCallAssembler {
    /// Canonical ids in first-seen order
    order: Vec<String>,
    calls: HashMap<String, PendingCall>,
    aliases: HashMap<String, String>,
}

impl ToolCallAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    fn canonical(&self, key: &str) -> String {
        self.aliases
            .get(key)
            .cloned()
            .unwrap_or_else(|| key.to_string())
    }

    fn entry(&mut self, id: &str) -> &mut PendingCall {
        if !self.calls.contains_key(id) {
            self.order.push(id.to_string());
        }
        self.calls.entry(id.to_string()).or_default()
    }

    pub fn apply(&mut self, delta: ToolCallDelta) {
        match delta {
            ToolCallDelta::Started {
                call_id,
                item_id,
                name,
                arguments,
            } => {
                let call_id = if call_id.is_empty() {
                    match item_id.as_deref() {
                        Some(item) if !item.is_empty() => item.to_string(),
                        _ => return,
                    }
                } else {
                    call_id
                };

                self.aliases.insert(call_id.clone(), call_id.clone());
                if let Some(item) = item_id.filter(|i| !i.is_empty() && *i != call_id) {
                    // Fragments that arrived before the announcement were
                    // stored under the item id; move them to the call id.
                    if let Some(early) = self.calls.remove(&item) {
                        if let Some(pos) = self.order.iter().position(|k| *k == item) {
                            self.order[pos] = call_id.clone();
                        }
                        self.calls.insert(call_id.clone(), early);
                    }
                    self.aliases.insert(item, call_id.clone());
                }

                let record = self.entry(&call_id);
                if let Some(name) = name.filter(|n| !n.is_empty()) {
                    record.name = Some(name);
                }
                if let Some(args) = arguments.filter(|a| !a.is_empty()) {
                    record.arguments = args;
                }
            }
            ToolCallDelta::ArgumentsDelta { key, delta } => {
                let id = self.canonical(&key);
                self.entry(&id).arguments.push_str(&delta);
            }
            ToolCallDelta::ArgumentsDone { key, arguments } => {
                let id = self.canonical(&key);
                self.entry(&id).arguments = arguments;
            }
        }
    }

    /// Finish assembly. Calls that never received a name are dropped.
    pub fn finish(mut self) -> Vec<AssembledCall> {
        let mut out = Vec::with_capacity(self.order.len());
        for id in self.order {
            let Some(pending) = self.calls.remove(&id) else {
                continue;
            };
            let Some(name) = pending.name else {
                tracing::debug!(call_id = %id, "Dropping tool call without a name");
                continue;
            };
            let arguments = if pending.arguments.trim().is_empty() {
                serde_json::Value::Object(serde_json::Map::new())
            } else {
                serde_json::from_str(&pending.arguments)
                    .unwrap_or(serde_json::Value::String(pending.arguments))
            };
            out.push(AssembledCall { id, name, arguments });
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started(call_id: &str, item_id: Option<&str>, name: Option<&str>) -> ToolCallDelta {
        ToolCallDelta::Started {
            call_id: call_id.into(),
            item_id: item_id.map(Into::into),
            name: name.map(Into::into),
            arguments: None,
        }
    }

    #[test]
    fn fragments_keyed_by_item_id_reach_call() {
        let mut asm = ToolCallAssembler::new();
        asm.apply(started("call_a", Some("fc_a"), Some("createNode")));
        asm.apply(ToolCallDelta::ArgumentsDelta {
            key: "fc_a".into(),
            delta: r#"{"type":"#.into(),
        });
        asm.apply(ToolCallDelta::ArgumentsDelta {
            key: "fc_a".into(),
            delta: r#""image"}"#.into(),
        });
        let calls = asm.finish();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call_a");
        assert_eq!(calls[0].name, "createNode");
        assert_eq!(calls[0].arguments["type"], "image");
    }

    #[test]
    fn done_replaces_accumulated_arguments() {
        let mut asm = ToolCallAssembler::new();
        asm.apply(started("call_a", Some("fc_a"), Some("runNode")));
        asm.apply(ToolCallDelta::ArgumentsDelta {
            key: "fc_a".into(),
            delta: r#"{"nodeId":"x"#.into(),
        });
        asm.apply(ToolCallDelta::ArgumentsDone {
            key: "fc_a".into(),
            arguments: r#"{"nodeId":"final"}"#.into(),
        });
        let calls = asm.finish();
        assert_eq!(calls[0].arguments["nodeId"], "final");
    }

    #[test]
    fn early_fragments_are_rekeyed_on_announcement() {
        let mut asm = ToolCallAssembler::new();
        asm.apply(ToolCallDelta::ArgumentsDelta {
            key: "fc_b".into(),
            delta: "{}".into(),
        });
        asm.apply(started("call_b", Some("fc_b"), Some("runNode")));
        let calls = asm.finish();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call_b");
    }

    #[test]
    fn nameless_calls_are_dropped_and_empty_args_become_object() {
        let mut asm = ToolCallAssembler::new();
        asm.apply(started("call_1", None, None));
        asm.apply(started("call_2", None, Some("runNode")));
        let calls = asm.finish();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "runNode");
        assert!(calls[0].arguments.as_object().unwrap().is_empty());
    }

    #[test]
    fn unparsable_arguments_are_kept_as_string() {
        let mut asm = ToolCallAssembler::new();
        asm.apply(ToolCallDelta::Started {
            call_id: "c".into(),
            item_id: None,
            name: Some("updateNode".into()),
            arguments: Some("{not json".into()),
        });
        let calls = asm.finish();
        assert_eq!(calls[0].arguments, serde_json::Value::String("{not json".into()));
    }

    #[test]
    fn order_follows_first_announcement() {
        let mut asm = ToolCallAssembler::new();
        asm.apply(started("b", None, Some("runNode")));
        asm.apply(started("a", None, Some("createNode")));
        asm.apply(started("b", None, None));
        let ids: Vec<_> = asm.finish().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }
}
