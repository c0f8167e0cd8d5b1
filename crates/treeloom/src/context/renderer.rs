//! Assembles the structured context document for one invocation.
//!
//! The document is a fixed sequence of tagged sections:
//!
//! ```text
//! {persona}
//! <latest_user_input>     registered instructions, in order
//! <session_history>       archived partitions and their level-0 results
//! <current_agent_name>
//! <call_tree>             pretty JSON of the live hierarchy
//! <current_task>
//! <current_thinking>      latest progress note of the current invocation
//! <action_history>        the (possibly compressed) transcript
//! ```
//!
//! Rendering is pure: identical inputs give identical output.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use super::action::{ActionRecord, escape_markup, result_json, value_text};
use crate::hierarchy::{AgentStatus, HierarchyGraph, HistoryEntry, Partition, Snapshot, StatusRecord};

const NONE_PLACEHOLDER: &str = "(none)";
const NO_HISTORY: &str = "(no previous sessions)";
const NO_CALLS: &str = "(no call relationships)";
const NO_ACTIONS: &str = "(no actions yet)";

/// Rendering options.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct RendererConfig {
    /// Agent name hidden from the call tree; its children are shown in its place.
    pub coordinator_name: String,
    /// Character cap for notes and outputs in the call tree.
    pub note_char_cap: usize,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            coordinator_name: "judge_agent".to_string(),
            note_char_cap: 500,
        }
    }
}

/// The invocation a document is rendered for.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CurrentInvocation {
    /// Hierarchy id, when the invocation has been pushed.
    pub agent_id: Option<String>,
    pub agent_name: String,
    pub task: String,
}

impl CurrentInvocation {
    pub fn new(agent_name: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            agent_id: None,
            agent_name: agent_name.into(),
            task: task.into(),
        }
    }

    pub fn with_agent_id(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }
}

#[derive(Serialize, Debug)]
struct CallTreeNode {
    agent_id: String,
    agent_name: String,
    level: u32,
    status: AgentStatus,
    is_current: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    final_output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    children: Vec<CallTreeNode>,
}

/// Renders context documents.
#[derive(Debug, Clone, Default)]
pub struct ContextRenderer {
    config: RendererConfig,
}

impl ContextRenderer {
    pub fn new(config: RendererConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn render(
        &self,
        snapshot: &Snapshot,
        transcript: &[ActionRecord],
        persona: &str,
        current: &CurrentInvocation,
    ) -> String {
        let mut doc = String::new();
        let persona = persona.trim_end();
        if !persona.is_empty() {
            doc.push_str(persona);
            doc.push_str("\n\n");
        }

        let sections = [
            ("latest_user_input", render_instructions(&snapshot.current)),
            ("session_history", self.render_history(&snapshot.history)),
            ("current_agent_name", current.agent_name.clone()),
            ("call_tree", self.render_call_tree(&snapshot.current, current)),
            ("current_task", current.task.clone()),
            ("current_thinking", render_thinking(&snapshot.current, current)),
            ("action_history", render_transcript(transcript)),
        ];
        let body: Vec<String> = sections
            .iter()
            .map(|(tag, content)| format!("<{tag}>\n{content}\n</{tag}>"))
            .collect();
        doc.push_str(&body.join("\n\n"));
        doc.push('\n');
        doc
    }

    fn render_history(&self, history: &[HistoryEntry]) -> String {
        if history.is_empty() {
            return NO_HISTORY.to_string();
        }
        history
            .iter()
            .enumerate()
            .map(|(i, entry)| self.render_history_entry(i + 1, entry))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    fn render_history_entry(&self, n: usize, entry: &HistoryEntry) -> String {
        let partition = &entry.partition;
        let mut lines = vec![
            format!("=== Session {n} ==="),
            format!(
                "Time: {} → {}",
                timestamp(&partition.start_time),
                timestamp(&entry.completion_time)
            ),
        ];

        if !partition.instructions.is_empty() {
            lines.push("Instructions:".to_string());
            for instruction in &partition.instructions {
                lines.push(format!("  - {}", instruction.text));
            }
        }

        let top_level: Vec<&StatusRecord> = partition
            .statuses
            .values()
            .filter(|r| r.level == 0 && r.agent_name != self.config.coordinator_name)
            .collect();
        if !top_level.is_empty() {
            lines.push("Level 0 results:".to_string());
            for record in top_level {
                lines.push(format!("  [{}] ({})", record.agent_name, record.status()));
                let text = record
                    .final_output()
                    .or_else(|| record.latest_note())
                    .filter(|t| !t.is_empty())
                    .unwrap_or("(no output)");
                lines.push(format!("  {text}"));
            }
        }

        lines.join("\n")
    }

    /// Pretty JSON forest of the live hierarchy.
    ///
    /// Nodes without a status record are dropped along with their subtree.
    /// Coordinator nodes are not shown; their children attach to the
    /// coordinator's nearest displayed ancestor.
    fn render_call_tree(&self, partition: &Partition, current: &CurrentInvocation) -> String {
        let statuses = &partition.statuses;
        if statuses.is_empty() {
            return NO_CALLS.to_string();
        }

        let graph = HierarchyGraph::new(&partition.hierarchy);
        let mut roots: Vec<&str> = graph
            .roots()
            .into_iter()
            .filter(|id| statuses.contains_key(*id))
            .collect();
        roots.sort_by(|a, b| {
            let start = |id: &str| statuses.get(id).map(|r| r.start_time);
            start(*a).cmp(&start(*b)).then_with(|| a.cmp(b))
        });
        let visits = graph.walk(&roots, |id| statuses.contains_key(id));

        // Preorder guarantees a parent's slot exists before its children.
        let mut nodes: Vec<Option<CallTreeNode>> = Vec::new();
        let mut child_slots: Vec<Vec<usize>> = Vec::new();
        let mut top: Vec<usize> = Vec::new();
        // For each visit, the slot its children attach to (None = top level).
        let mut anchors: Vec<Option<usize>> = Vec::with_capacity(visits.len());

        for visit in &visits {
            let inherited = visit.parent.and_then(|p| anchors[p]);
            let Some(record) = statuses.get(visit.id) else {
                anchors.push(inherited);
                continue;
            };
            if record.agent_name == self.config.coordinator_name {
                anchors.push(inherited);
                continue;
            }

            let slot = nodes.len();
            nodes.push(Some(self.tree_node(visit.id, record, current)));
            child_slots.push(Vec::new());
            match inherited {
                Some(parent) => child_slots[parent].push(slot),
                None => top.push(slot),
            }
            anchors.push(Some(slot));
        }

        // Children always occupy later slots, so a reverse pass builds leaves first.
        for slot in (0..nodes.len()).rev() {
            let children: Vec<CallTreeNode> = child_slots[slot]
                .iter()
                .filter_map(|c| nodes[*c].take())
                .collect();
            if let Some(node) = nodes[slot].as_mut() {
                node.children = children;
            }
        }
        let forest: Vec<CallTreeNode> = top.iter().filter_map(|s| nodes[*s].take()).collect();

        if forest.is_empty() {
            return NO_CALLS.to_string();
        }
        serde_json::to_string_pretty(&forest).unwrap_or_else(|_| NO_CALLS.to_string())
    }

    fn tree_node(&self, id: &str, record: &StatusRecord, current: &CurrentInvocation) -> CallTreeNode {
        let cap = self.config.note_char_cap;
        let clip = |text: &str| (!text.is_empty()).then(|| truncate_chars(text, cap));
        CallTreeNode {
            agent_id: id.to_string(),
            agent_name: record.agent_name.clone(),
            level: record.level,
            status: record.status(),
            is_current: current.agent_id.as_deref() == Some(id),
            final_output: record.final_output().and_then(clip),
            thinking: record.latest_note().and_then(clip),
            children: Vec::new(),
        }
    }
}

fn timestamp(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// First `cap` chars of `text`, with `...` appended when anything was cut.
pub fn truncate_chars(text: &str, cap: usize) -> String {
    if text.chars().count() <= cap {
        return text.to_string();
    }
    let mut out: String = text.chars().take(cap).collect();
    out.push_str("...");
    out
}

fn render_instructions(partition: &Partition) -> String {
    if partition.instructions.is_empty() {
        return NONE_PLACEHOLDER.to_string();
    }
    partition
        .instructions
        .iter()
        .enumerate()
        .map(|(i, instr)| {
            format!("{}. {} (started: {})", i + 1, instr.text, timestamp(&instr.start_time))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_thinking(partition: &Partition, current: &CurrentInvocation) -> String {
    current
        .agent_id
        .as_deref()
        .and_then(|id| partition.statuses.get(id))
        .and_then(StatusRecord::latest_note)
        .filter(|note| !note.is_empty())
        .unwrap_or(NONE_PLACEHOLDER)
        .to_string()
}

/// Flat text form of a transcript; markers render as a labeled summary block.
pub fn render_transcript(transcript: &[ActionRecord]) -> String {
    if transcript.is_empty() {
        return NO_ACTIONS.to_string();
    }
    transcript
        .iter()
        .map(|action| {
            if action.is_marker() {
                return format!(
                    "<compressed_summary>\n{}\n</compressed_summary>",
                    action.result.output
                );
            }
            let mut block = format!("action:\n  tool_name:{}\n", action.tool_name);
            for (name, value) in &action.arguments {
                block.push_str(&format!("  {name}:{}\n", escape_markup(&value_text(value))));
            }
            block.push_str(&format!("  <result>\n{}\n  </result>\n", result_json(&action.result)));
            block
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::action::ActionResult;
    use crate::hierarchy::{AgentState, HierarchyNode, Instruction};
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).single().unwrap()
    }

    fn record(name: &str, level: u32, parent: Option<&str>, start: i64, state: AgentState) -> StatusRecord {
        StatusRecord {
            agent_name: name.into(),
            input: format!("{name} input"),
            level,
            parent_id: parent.map(String::from),
            content_hash: "0".repeat(12),
            start_time: at(start),
            state,
        }
    }

    fn running(note: &str) -> AgentState {
        AgentState::Running {
            latest_note: note.into(),
            note_updated_at: None,
        }
    }

    fn completed(output: &str) -> AgentState {
        AgentState::Completed {
            final_output: output.into(),
            end_time: at(100),
        }
    }

    fn node(parent: Option<&str>, children: &[&str], level: u32) -> HierarchyNode {
        HierarchyNode {
            parent_id: parent.map(String::from),
            children: children.iter().map(|c| c.to_string()).collect(),
            level,
        }
    }

    fn partition(
        hierarchy: Vec<(&str, HierarchyNode)>,
        statuses: Vec<(&str, StatusRecord)>,
    ) -> Partition {
        Partition {
            instructions: Vec::new(),
            hierarchy: hierarchy.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
            statuses: statuses.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
            start_time: at(0),
        }
    }

    fn tree_json(renderer: &ContextRenderer, p: &Partition, current: &CurrentInvocation) -> serde_json::Value {
        serde_json::from_str(&renderer.render_call_tree(p, current)).unwrap()
    }

    #[test]
    fn empty_snapshot_renders_placeholders() {
        let snapshot = Snapshot {
            current: Partition::new(),
            history: Vec::new(),
        };
        let doc = ContextRenderer::default().render(
            &snapshot,
            &[],
            "",
            &CurrentInvocation::new("writer", "draft the doc"),
        );
        assert!(doc.starts_with("<latest_user_input>\n(none)\n</latest_user_input>"));
        assert!(doc.contains("<session_history>\n(no previous sessions)\n</session_history>"));
        assert!(doc.contains("<current_agent_name>\nwriter\n</current_agent_name>"));
        assert!(doc.contains("<call_tree>\n(no call relationships)\n</call_tree>"));
        assert!(doc.contains("<current_task>\ndraft the doc\n</current_task>"));
        assert!(doc.contains("<current_thinking>\n(none)\n</current_thinking>"));
        assert!(doc.contains("<action_history>\n(no actions yet)\n</action_history>"));
    }

    #[test]
    fn sections_appear_in_order_after_persona() {
        let snapshot = Snapshot {
            current: Partition::new(),
            history: Vec::new(),
        };
        let doc = ContextRenderer::default().render(
            &snapshot,
            &[],
            "You are a careful writer.\n",
            &CurrentInvocation::new("writer", "t"),
        );
        assert!(doc.starts_with("You are a careful writer.\n\n<latest_user_input>"));
        let order = [
            "<latest_user_input>",
            "<session_history>",
            "<current_agent_name>",
            "<call_tree>",
            "<current_task>",
            "<current_thinking>",
            "<action_history>",
        ];
        let positions: Vec<usize> = order.iter().map(|t| doc.find(t).unwrap()).collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn instructions_are_numbered() {
        let mut current = Partition::new();
        current.instructions = vec![
            Instruction {
                text: "first".into(),
                instruction_id: "instruction_a".into(),
                start_time: at(0),
            },
            Instruction {
                text: "second".into(),
                instruction_id: "instruction_b".into(),
                start_time: at(60),
            },
        ];
        let text = render_instructions(&current);
        assert_eq!(
            text,
            "1. first (started: 2023-11-14T22:13:20Z)\n2. second (started: 2023-11-14T22:14:20Z)"
        );
    }

    #[test]
    fn call_tree_nests_and_truncates() {
        let long = "n".repeat(600);
        let p = partition(
            vec![
                ("root", node(None, &["child"], 0)),
                ("child", node(Some("root"), &[], 1)),
            ],
            vec![
                ("root", record("planner", 0, None, 0, running(&long))),
                ("child", record("writer", 1, Some("root"), 1, completed("done"))),
            ],
        );
        let current = CurrentInvocation::new("writer", "t").with_agent_id("child");
        let json = tree_json(&ContextRenderer::default(), &p, &current);

        let root = &json[0];
        assert_eq!(root["agent_id"], "root");
        assert_eq!(root["status"], "running");
        assert_eq!(root["is_current"], false);
        let thinking = root["thinking"].as_str().unwrap();
        assert_eq!(thinking.chars().count(), 503);
        assert!(thinking.ends_with("..."));
        assert!(root.get("final_output").is_none());

        let child = &root["children"][0];
        assert_eq!(child["final_output"], "done");
        assert_eq!(child["is_current"], true);
        assert!(child.get("children").is_none());
    }

    #[test]
    fn cycle_renders_each_node_once() {
        // A -> B -> A, with A as the only root.
        let p = partition(
            vec![("A", node(None, &["B"], 0)), ("B", node(Some("A"), &["A"], 1))],
            vec![
                ("A", record("a", 0, None, 0, running(""))),
                ("B", record("b", 1, Some("A"), 1, running(""))),
            ],
        );
        let text = ContextRenderer::default().render_call_tree(&p, &CurrentInvocation::default());
        assert_eq!(text.matches("\"agent_id\": \"A\"").count(), 1);
        assert_eq!(text.matches("\"agent_id\": \"B\"").count(), 1);
    }

    #[test]
    fn self_loop_terminates() {
        let p = partition(
            vec![("A", node(None, &["A"], 0))],
            vec![("A", record("a", 0, None, 0, running("")))],
        );
        let json = tree_json(&ContextRenderer::default(), &p, &CurrentInvocation::default());
        assert_eq!(json.as_array().unwrap().len(), 1);
        assert!(json[0].get("children").is_none());
    }

    #[test]
    fn coordinator_is_transparent() {
        let p = partition(
            vec![
                ("judge", node(None, &["w1", "w2"], 0)),
                ("w1", node(Some("judge"), &["r1"], 1)),
                ("w2", node(Some("judge"), &[], 1)),
                ("r1", node(Some("w1"), &[], 2)),
            ],
            vec![
                ("judge", record("judge_agent", 0, None, 0, running("judging"))),
                ("w1", record("writer", 1, Some("judge"), 1, running("writing"))),
                ("w2", record("editor", 1, Some("judge"), 2, completed("edited"))),
                ("r1", record("researcher", 2, Some("w1"), 3, completed("facts"))),
            ],
        );
        let renderer = ContextRenderer::default();
        let text = renderer.render_call_tree(&p, &CurrentInvocation::default());
        assert!(!text.contains("judge_agent"));

        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        let ids: Vec<&str> = json
            .as_array()
            .unwrap()
            .iter()
            .map(|n| n["agent_id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["w1", "w2"]);
        assert_eq!(json[0]["children"][0]["agent_id"], "r1");
    }

    #[test]
    fn nodes_without_status_are_dropped_with_subtree() {
        let p = partition(
            vec![
                ("root", node(None, &["ghost"], 0)),
                ("ghost", node(Some("root"), &["orphan"], 1)),
                ("orphan", node(Some("ghost"), &[], 2)),
            ],
            vec![
                ("root", record("planner", 0, None, 0, running(""))),
                ("orphan", record("writer", 2, Some("ghost"), 2, running(""))),
            ],
        );
        let text = ContextRenderer::default().render_call_tree(&p, &CurrentInvocation::default());
        assert!(text.contains("\"root\""));
        assert!(!text.contains("ghost"));
        assert!(!text.contains("orphan"));
    }

    #[test]
    fn roots_ordered_by_start_time() {
        let p = partition(
            vec![("a_late", node(None, &[], 0)), ("z_early", node(None, &[], 0))],
            vec![
                ("a_late", record("late", 0, None, 50, running(""))),
                ("z_early", record("early", 0, None, 5, running(""))),
            ],
        );
        let json = tree_json(&ContextRenderer::default(), &p, &CurrentInvocation::default());
        assert_eq!(json[0]["agent_id"], "z_early");
        assert_eq!(json[1]["agent_id"], "a_late");
    }

    #[test]
    fn history_lists_level_zero_results() {
        let mut archived = partition(
            vec![("w", node(None, &[], 0)), ("j", node(None, &[], 0))],
            vec![
                ("w", record("writer", 0, None, 0, completed("the essay"))),
                ("j", record("judge_agent", 0, None, 0, completed("verdict"))),
            ],
        );
        archived.instructions.push(Instruction {
            text: "write an essay".into(),
            instruction_id: "instruction_x".into(),
            start_time: at(0),
        });
        let history = vec![HistoryEntry {
            partition: archived,
            completion_time: at(100),
        }];
        let text = ContextRenderer::default().render_history(&history);
        assert!(text.starts_with("=== Session 1 ===\nTime: 2023-11-14T22:13:20Z → 2023-11-14T22:15:00Z"));
        assert!(text.contains("  - write an essay"));
        assert!(text.contains("  [writer] (completed)\n  the essay"));
        assert!(!text.contains("verdict"));
    }

    #[test]
    fn thinking_section_uses_current_note() {
        let p = partition(
            vec![("w", node(None, &[], 0))],
            vec![("w", record("writer", 0, None, 0, running("outlining")))],
        );
        let current = CurrentInvocation::new("writer", "t").with_agent_id("w");
        assert_eq!(render_thinking(&p, &current), "outlining");
        assert_eq!(render_thinking(&p, &CurrentInvocation::new("writer", "t")), "(none)");
    }

    #[test]
    fn transcript_renders_actions_and_markers() {
        let transcript = vec![
            ActionRecord::marker("earlier: read three files"),
            ActionRecord::new("file_write", ActionResult::success("ok"))
                .with_argument("path", "<out>.md"),
        ];
        let text = render_transcript(&transcript);
        assert!(text.starts_with(
            "<compressed_summary>\nearlier: read three files\n</compressed_summary>\n\naction:\n"
        ));
        assert!(text.contains("  tool_name:file_write\n  path:&lt;out&gt;.md\n  <result>\n{"));
        assert!(text.ends_with("}\n  </result>\n"));
    }

    #[test]
    fn render_is_deterministic() {
        let p = partition(
            vec![("A", node(None, &["B"], 0)), ("B", node(Some("A"), &[], 1))],
            vec![
                ("A", record("a", 0, None, 0, running("x"))),
                ("B", record("b", 1, Some("A"), 1, completed("y"))),
            ],
        );
        let snapshot = Snapshot {
            current: p,
            history: Vec::new(),
        };
        let renderer = ContextRenderer::default();
        let current = CurrentInvocation::new("b", "task").with_agent_id("B");
        let transcript = vec![ActionRecord::new("t", ActionResult::success("o"))];
        let first = renderer.render(&snapshot, &transcript, "persona", &current);
        let second = renderer.render(&snapshot, &transcript, "persona", &current);
        assert_eq!(first, second);
    }

    #[test]
    fn truncate_counts_chars() {
        assert_eq!(truncate_chars("你好世界", 2), "你好...");
        assert_eq!(truncate_chars("abc", 3), "abc");
    }
}
