//! Run ordering: images run now, videos wait for their inputs.

use std::collections::HashSet;

use storyloom_core::error::RuleError;
use storyloom_core::tool::{CanvasOp, ToolCall};

use super::{PolicyContext, PolicyRule, TurnDraft};

/// When images and videos are created in the same turn, the videos must
/// not run before the images they consume exist.
pub struct PrematureVideoRun;

impl PolicyRule for PrematureVideoRun {
    fn name(&self) -> &'static str {
        "premature_video_run"
    }

    fn apply(&self, draft: &TurnDraft, _ctx: &PolicyContext<'_>) -> Result<TurnDraft, RuleError> {
        let videos: HashSet<&str> = draft
            .creates()
            .filter(|(_, c)| c.node_type() == Some("composeVideo"))
            .filter_map(|(_, c)| c.label())
            .collect();
        if videos.is_empty() || draft.created_image_labels().is_empty() {
            return Ok(draft.clone());
        }

        let mut next = draft.clone();
        next.tool_calls
            .retain(|c| !(c.is(CanvasOp::RunNode) && c.node_id().is_some_and(|id| videos.contains(id))));
        Ok(next)
    }
}

/// Every image created this turn gets a `runNode`.
pub struct AutoRunImages;

impl PolicyRule for AutoRunImages {
    fn name(&self) -> &'static str {
        "auto_run_images"
    }

    fn apply(&self, draft: &TurnDraft, _ctx: &PolicyContext<'_>) -> Result<TurnDraft, RuleError> {
        let mut running = draft.run_targets();
        let mut runs = Vec::new();
        for label in draft.created_image_labels() {
            if running.insert(label) {
                runs.push(ToolCall::run(format!("auto_run_{label}"), label));
            }
        }
        if runs.is_empty() {
            return Ok(draft.clone());
        }
        let mut next = draft.clone();
        next.tool_calls.extend(runs);
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::*;
    use super::*;
    use serde_json::json;
    use storyloom_config::PolicyConfig;

    fn apply(rule: &dyn PolicyRule, draft: TurnDraft) -> TurnDraft {
        let s = state("x");
        let config = PolicyConfig::default();
        rule.apply(&draft, &PolicyContext::new(&s, &config)).unwrap()
    }

    #[test]
    fn video_runs_wait_for_images() {
        let draft = TurnDraft::new(
            "",
            vec![image("分镜", "九宫格"), video("视频", json!({})), run("分镜"), run("视频")],
        );
        let out = apply(&PrematureVideoRun, draft);
        assert_eq!(ids(&out), vec!["create_分镜", "create_视频", "run_分镜"]);
    }

    #[test]
    fn video_alone_may_run() {
        let draft = TurnDraft::new("", vec![video("视频", json!({})), run("视频")]);
        let out = apply(&PrematureVideoRun, draft.clone());
        assert_eq!(out, draft);
    }

    #[test]
    fn images_are_run_once() {
        let draft = TurnDraft::new("", vec![image("a", "p"), image("b", "p"), run("a"), image("a", "again")]);
        let out = apply(&AutoRunImages, draft);
        assert_eq!(ids(&out), vec!["create_a", "create_b", "run_a", "create_a", "auto_run_b"]);

        let again = apply(&AutoRunImages, out.clone());
        assert_eq!(again, out);
    }
}
