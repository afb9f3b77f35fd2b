//! Structured-output parser.
//!
//! Models reply with free text interleaved with literal-delimited blocks:
//!
//! ```text
//! FILE
//! path: src/hello.js
//! CONTENT
//! console.log("hi");
//! END_FILE
//!
//! EXEC
//! cwd: .
//! cmd: node src/hello.js
//! END_EXEC
//!
//! SUBTASK
//! title: add a test
//! agent: auto
//! description: cover the happy path
//! END_SUBTASK
//! ```
//!
//! Matching is repeated and non-overlapping; blocks may appear in any
//! order. A block missing its terminator or a required field is not
//! recognized and its text stays in the residual explanation; the raw
//! text is retained on the task result for audit either way.

use crate::types::{CommandIntent, FileIntent, SubtaskIntent};

/// Everything extracted from one model reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedOutput {
    pub files: Vec<FileIntent>,
    pub commands: Vec<CommandIntent>,
    pub subtasks: Vec<SubtaskIntent>,
    /// Input with all recognized blocks removed and blank runs collapsed.
    pub explanation: String,
}

/// Parse raw model text into intents plus the residual explanation.
pub fn parse_output(raw: &str) -> ParsedOutput {
    let lines: Vec<&str> = raw.lines().collect();
    let mut out = ParsedOutput::default();
    let mut residual: Vec<&str> = Vec::new();

    let mut i = 0;
    while i < lines.len() {
        match strip(lines[i]) {
            "FILE" => {
                if let Some((intent, next)) = parse_file_block(&lines, i) {
                    out.files.push(intent);
                    i = next;
                    continue;
                }
            }
            "EXEC" => {
                if let Some((intent, next)) = parse_exec_block(&lines, i) {
                    out.commands.push(intent);
                    i = next;
                    continue;
                }
            }
            "SUBTASK" => {
                if let Some((intent, next)) = parse_subtask_block(&lines, i) {
                    out.subtasks.push(intent);
                    i = next;
                    continue;
                }
            }
            _ => {}
        }
        residual.push(lines[i]);
        i += 1;
    }

    out.explanation = collapse_blanks(&residual);
    out
}

/// Strip a trailing CR so CRLF input matches the literal markers.
fn strip(line: &str) -> &str {
    line.strip_suffix('\r').unwrap_or(line)
}

fn field<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    strip(line)
        .strip_prefix(key)
        .map(|rest| rest.strip_prefix(' ').unwrap_or(rest))
}

/// `FILE` / `path: <rel>` / `CONTENT` / bytes / `END_FILE`.
///
/// Returns the parsed intent and the index just past `END_FILE`.
fn parse_file_block(lines: &[&str], start: usize) -> Option<(FileIntent, usize)> {
    let path = field(lines.get(start + 1)?, "path:")?;
    if strip(lines.get(start + 2)?) != "CONTENT" {
        return None;
    }
    let mut j = start + 3;
    let mut content: Vec<&str> = Vec::new();
    while j < lines.len() {
        if strip(lines[j]) == "END_FILE" {
            return Some((
                FileIntent {
                    path: path.to_string(),
                    content: content.join("\n"),
                },
                j + 1,
            ));
        }
        content.push(lines[j]);
        j += 1;
    }
    None
}

/// `EXEC` / `cwd: <rel>` / `cmd: <line>` / `END_EXEC`.
fn parse_exec_block(lines: &[&str], start: usize) -> Option<(CommandIntent, usize)> {
    let cwd = field(lines.get(start + 1)?, "cwd:")?;
    let command = field(lines.get(start + 2)?, "cmd:")?;
    if strip(lines.get(start + 3)?) != "END_EXEC" {
        return None;
    }
    Some((
        CommandIntent {
            cwd: cwd.to_string(),
            command: command.to_string(),
        },
        start + 4,
    ))
}

/// `SUBTASK` / `title:` / `agent:` / `description: <multi-line>` / `END_SUBTASK`.
fn parse_subtask_block(lines: &[&str], start: usize) -> Option<(SubtaskIntent, usize)> {
    let title = field(lines.get(start + 1)?, "title:")?;
    let agent = field(lines.get(start + 2)?, "agent:")?;
    let first = field(lines.get(start + 3)?, "description:")?;

    let mut description: Vec<&str> = vec![first];
    let mut j = start + 4;
    while j < lines.len() {
        if strip(lines[j]) == "END_SUBTASK" {
            return Some((
                SubtaskIntent {
                    title: title.to_string(),
                    agent: agent.to_string(),
                    description: description.join("\n"),
                },
                j + 1,
            ));
        }
        description.push(lines[j]);
        j += 1;
    }
    None
}

/// Join residual lines, collapsing runs of blank lines to one, and trim.
fn collapse_blanks(lines: &[&str]) -> String {
    let mut out: Vec<&str> = Vec::with_capacity(lines.len());
    let mut prev_blank = false;
    for line in lines {
        let blank = strip(line).trim().is_empty();
        if blank && prev_blank {
            continue;
        }
        out.push(line);
        prev_blank = blank;
    }
    out.join("\n").trim().to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
