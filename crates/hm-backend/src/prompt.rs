//! Adaptive system-prompt composition.
//!
//! The prompt an agent works under is assembled from: its role preamble,
//! every skill whose triggers appear in the task description, a hint
//! keyed off its recent performance, a short recent-memory context, and
//! the structured-output contract the parser understands.

use hm_core::types::truncate_chars;

/// Characters of prior output shown per memory line.
const MEMORY_OUTPUT_HEAD: usize = 120;

/// History entries woven into the prompt.
pub const MEMORY_CONTEXT_LEN: usize = 5;

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// A skill template (discovered externally, e.g. from markdown files).
#[derive(Debug, Clone)]
pub struct SkillTemplate {
    pub name: String,
    /// Case-insensitive substrings matched against the task description.
    pub triggers: Vec<String>,
    pub template: String,
}

impl SkillTemplate {
    pub fn matches(&self, task_description: &str) -> bool {
        let haystack = task_description.to_lowercase();
        self.triggers
            .iter()
            .any(|t| haystack.contains(&t.to_lowercase()))
    }
}

/// Performance figures the adaptive hint keys off.
#[derive(Debug, Clone, Copy, Default)]
pub struct PerformanceHint {
    pub overall: u32,
    pub recent_failures: usize,
}

/// One line of recent-memory context.
#[derive(Debug, Clone)]
pub struct HistoryLine {
    pub task_id: String,
    pub agent_name: String,
    pub title: String,
    pub output_head: String,
    pub files: Vec<String>,
}

impl HistoryLine {
    pub fn new(
        task_id: impl Into<String>,
        agent_name: impl Into<String>,
        title: impl Into<String>,
        output: &str,
        files: Vec<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            agent_name: agent_name.into(),
            title: title.into(),
            output_head: truncate_chars(output, MEMORY_OUTPUT_HEAD),
            files,
        }
    }
}

// ---------------------------------------------------------------------------
// Role preambles
// ---------------------------------------------------------------------------

/// Preamble looked up by role tag; unknown roles get the generalist one.
pub fn role_preamble(role: &str) -> &'static str {
    match role {
        "coder" => {
            "You are a senior software engineer. You implement tasks end to end: \
             working code, not sketches."
        }
        "reviewer" => {
            "You are a meticulous code reviewer. You read for correctness first, \
             then clarity, and you propose concrete fixes."
        }
        "tester" => {
            "You are a test engineer. You probe edge cases and encode findings as \
             runnable tests."
        }
        "architect" => {
            "You are a software architect. You favor small composable designs and \
             call out tradeoffs explicitly."
        }
        _ => "You are a capable software engineer who completes coding tasks carefully.",
    }
}

// ---------------------------------------------------------------------------
// Adaptive hint
// ---------------------------------------------------------------------------

fn adaptive_hint(hint: PerformanceHint) -> Option<&'static str> {
    if hint.recent_failures >= 3 {
        return Some(
            "IMPORTANT: your recent outputs scored poorly. Follow the output format \
             EXACTLY as specified below. Emit at least one FILE block with complete \
             file content.",
        );
    }
    if hint.overall < 40 {
        return Some(
            "Reminder: keep your output in the structured format below. Prefer one \
             complete FILE block over prose describing a change.",
        );
    }
    if hint.overall >= 75 {
        return Some(
            "You have a strong track record. Use your judgement: split work into \
             SUBTASK blocks when a task is genuinely divisible.",
        );
    }
    None
}

// ---------------------------------------------------------------------------
// Composition
// ---------------------------------------------------------------------------

const OUTPUT_CONTRACT: &str = "\
## Output format

Reply with explanation text plus zero or more of these blocks, each with
its markers on their own lines:

To write a file:
FILE
path: <relative path>
CONTENT
<complete file content>
END_FILE

To run a shell command:
EXEC
cwd: <relative directory>
cmd: <single-line command>
END_EXEC

To spawn a follow-up task:
SUBTASK
title: <one line>
agent: <agent id or auto>
description: <what to do>
END_SUBTASK

Code inside FILE blocks must be complete and runnable as written: no
elisions, no placeholders.";

/// Assemble the full system prompt for one task execution.
pub fn compose_system_prompt(
    agent_name: &str,
    agent_id: &str,
    role: &str,
    task_description: &str,
    skills: &[SkillTemplate],
    hint: PerformanceHint,
    history: &[HistoryLine],
) -> String {
    let mut sections: Vec<String> = Vec::new();

    sections.push(format!(
        "{} You are {} (agent id `{}`).",
        role_preamble(role),
        agent_name,
        agent_id
    ));

    let matched: Vec<&SkillTemplate> =
        skills.iter().filter(|s| s.matches(task_description)).collect();
    if !matched.is_empty() {
        let mut block = String::from("## Skills\n");
        for skill in matched {
            block.push_str(&format!("### {}\n{}\n", skill.name, skill.template));
        }
        sections.push(block.trim_end().to_string());
    }

    if let Some(text) = adaptive_hint(hint) {
        sections.push(text.to_string());
    }

    if !history.is_empty() {
        let mut block = String::from("## Recent work in this session\n");
        for line in history.iter().take(MEMORY_CONTEXT_LEN) {
            block.push_str(&format!(
                "- {} [{}] {}: {}",
                line.task_id, line.agent_name, line.title, line.output_head
            ));
            if !line.files.is_empty() {
                block.push_str(&format!(" (files: {})", line.files.join(", ")));
            }
            block.push('\n');
        }
        sections.push(block.trim_end().to_string());
    }

    sections.push(OUTPUT_CONTRACT.to_string());
    sections.join("\n\n")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
