//! Prompt templates.
//!
//! Every stage builds exactly one prompt; the templates live here so the
//! stage modules only deal with data.

use storyloom_core::role::{self, DEFAULT_ROLE_ID, RoleProfile};

/// Fallback when the router gave no reason.
pub const DEFAULT_ROLE_REASON: &str = "根据对话意图选择。";

pub fn current_date() -> String {
    chrono::Local::now().format("%B %d, %Y").to_string()
}

pub fn role_router(conversation: &str, canvas_context: &str) -> String {
    format!(
        "你是一个创作助手的路由器，负责为本轮对话选择最合适的执行角色，并判断本轮是否允许操作画布。\n\
         \n\
         可选角色：\n{roles}\n\
         \n\
         规则：\n\
         - role_id 必须是上面列出的 id 之一；无法判断时使用 {default}。\n\
         - allow_canvas_tools=true 仅当用户明确要求在画布上创建/修改/连接/运行节点。\n\
         - 闲聊、提问、讨论方向、需要先确认需求时，allow_canvas_tools=false。\n\
         - tool_tier 取值：canvas（操作画布）、rag（查询知识库）、none（只对话）。三者互斥。\n\
         - intent 用一个简短的英文 snake_case 标签描述本轮意图。\n\
         - reason 与 allow_canvas_tools_reason 用一句中文说明。\n\
         \n\
         对话：\n{conversation}\n\
         \n\
         画布上下文：\n{canvas}\n",
        roles = role::roles_prompt_block(),
        default = DEFAULT_ROLE_ID,
        conversation = conversation,
        canvas = non_empty(canvas_context),
    )
}

/// Supervisory review layered on top of the executing persona.
pub fn role_directive(profile: &RoleProfile, reason: &str) -> String {
    let director = role::supervisor();
    let reason = if reason.trim().is_empty() { DEFAULT_ROLE_REASON } else { reason };
    format!(
        "总监审查（{}｜{}）: {}。 审查风格：{}。 你必须先审查本轮是否应该执行画布动作（tool calls）、是否需要用户确认、是否保持风格/上下文一致，再输出最终回复。\n\
         主执行角色（{}｜{}）: {}。回复风格：{}。 选择原因：{}",
        director.name,
        director.id,
        director.summary,
        director.style,
        profile.name,
        profile.id,
        profile.summary,
        profile.style,
        reason,
    )
}

pub fn answer(research_topic: &str, role_directive: &str, snippets: &[String], canvas_context: &str) -> String {
    let knowledge = if snippets.is_empty() {
        "（无）".to_string()
    } else {
        snippets.join("\n---\n\n")
    };
    format!(
        "当前日期：{date}\n\
         \n\
         {directive}\n\
         \n\
         你在一个协作式分镜/视频画布里工作。需要改动画布时，通过提供的工具调用（createNode / updateNode / connectNodes / runNode）完成；\
         节点之间用 label 互相引用。没有提供工具时，只用文字回复，不要假装已经操作了画布。\n\
         如果希望给用户几个可点击的下一步选项，在回复末尾附上：\n\
         ```tapcanvas_actions\n\
         {{\"actions\":[{{\"label\":\"按钮文字\",\"input\":\"点击后发送的完整指令\"}}]}}\n\
         ```\n\
         \n\
         对话：\n{topic}\n\
         \n\
         知识库检索结果：\n{knowledge}\n\
         \n\
         画布上下文：\n{canvas}\n",
        date = current_date(),
        directive = role_directive,
        topic = research_topic,
        knowledge = knowledge,
        canvas = non_empty(canvas_context),
    )
}

pub fn safety_classifier(user_text: &str, planned_prompts: &str) -> String {
    format!(
        "You are a strict-but-practical content safety classifier for a public creative tool.\n\
         Task: judge whether the request/planned prompts contain explicit sexual content, explicit nudity, graphic gore, or explicit violence.\n\
         Rules:\n\
         - sexual=true only for explicit sexual acts/pornographic intent.\n\
         - nudity=true if explicit nudity is requested or described for output.\n\
         - gore=true only for graphic body harm/viscera/dismemberment close-ups.\n\
         - violence=true for explicit harm descriptions that should be softened to PG-13 cinematic implication.\n\
         - should_block=true if the assistant must refuse direct generation and ask to rewrite first (typically sexual/porn; or extreme gore).\n\
         - should_sanitize=true if output should be rewritten/softened (PG-13) before proceeding.\n\
         Return a JSON object matching the provided schema.\n\
         \n\
         USER_TEXT:\n{}\n\
         \n\
         PLANNED_PROMPTS (may be empty):\n{}\n",
        user_text.trim(),
        planned_prompts.trim(),
    )
}

pub fn memory_summary(canvas_context: &str, previous: &str, older: &str, recent: &str) -> String {
    format!(
        "You are a background memory compressor for a creative assistant.\n\
         Goal: produce a compact, durable conversation summary that preserves user intent, preferences, constraints,\n\
         project/canvas facts, and any decisions. This summary will be injected into future prompts.\n\
         Rules:\n\
         - Output plain text only (no markdown fences).\n\
         - Max 1800 characters.\n\
         - Prefer stable facts over transient chatter.\n\
         - Keep named entities, style locks, and any explicit constraints.\n\
         - If there is a previous summary, update it incrementally; do not rewrite from scratch unless necessary.\n\
         \n\
         CANVAS_CONTEXT:\n{canvas_context}\n\
         \n\
         PREVIOUS_SUMMARY:\n{}\n\
         \n\
         OLDER_MESSAGES_TO_COMPRESS:\n{older}\n\
         \n\
         RECENT_TURNS (do not fully duplicate; keep as-is for recency):\n{recent}\n",
        previous.trim(),
    )
}

fn non_empty(text: &str) -> &str {
    if text.trim().is_empty() { "（无）" } else { text }
}
