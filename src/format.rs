//! Per-agent cleanup of raw screen text into message content.
//!
//! Agents differ only in prompt markers and spinner habits, so each one is a
//! configuration record rather than a trait implementation. The shared rules
//! strip the input-prompt region, box-drawing chrome, and blank-line noise.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentType {
    Claude,
    Goose,
    Aider,
    Codex,
    Custom,
}

impl AgentType {
    /// Binary launched when no explicit program override is given.
    pub fn default_program(&self) -> Option<&'static str> {
        match self {
            Self::Claude => Some("claude"),
            Self::Goose => Some("goose"),
            Self::Aider => Some("aider"),
            Self::Codex => Some("codex"),
            Self::Custom => None,
        }
    }
}

/// Formatting configuration for one agent type.
#[derive(Debug, Clone)]
pub struct FormatRules {
    agent: AgentType,
    prompt_markers: &'static [&'static str],
    strip_spinners: bool,
}

pub fn rules_for(agent: AgentType) -> FormatRules {
    let prompt_markers: &'static [&'static str] = match agent {
        AgentType::Claude => &["❯", ">"],
        AgentType::Goose => &["( O)>", ">"],
        AgentType::Aider => &[">"],
        AgentType::Codex => &["›", ">"],
        AgentType::Custom => &["❯", "›", ">", "$"],
    };
    FormatRules {
        agent,
        prompt_markers,
        strip_spinners: true,
    }
}

impl FormatRules {
    pub fn agent(&self) -> AgentType {
        self.agent
    }

    /// Extract the agent's current reply from a full screen snapshot.
    ///
    /// The reply region is everything below the last echo of the user's
    /// pending input (when one is known) and above the trailing input prompt.
    pub fn extract_reply(&self, screen_text: &str, last_user_echo: Option<&str>) -> String {
        let lines: Vec<&str> = screen_text.lines().collect();

        let start = last_user_echo
            .map(|echo| echo.lines().next().unwrap_or(echo).trim())
            .filter(|needle| !needle.is_empty())
            .and_then(|needle| {
                lines
                    .iter()
                    .rposition(|line| line.contains(needle))
                    .map(|idx| idx + 1)
            })
            .unwrap_or(0);

        let region = &lines[start.min(lines.len())..];

        // Everything from the last prompt line down is the input area, not
        // reply content.
        let end = region
            .iter()
            .rposition(|line| self.is_prompt_line(line))
            .unwrap_or(region.len());

        self.clean(&region[..end])
    }

    fn is_prompt_line(&self, line: &str) -> bool {
        let bare = line
            .trim_start_matches(|c: char| c.is_whitespace() || is_chrome_char(c))
            .trim_end();
        self.prompt_markers.iter().any(|marker| {
            bare.strip_prefix(marker)
                .is_some_and(|rest| rest.is_empty() || rest.starts_with(' ') || rest.starts_with('\u{00a0}'))
        })
    }

    fn clean(&self, lines: &[&str]) -> String {
        let mut kept: Vec<String> = Vec::with_capacity(lines.len());
        for line in lines {
            if is_chrome_line(line) {
                continue;
            }
            if self.strip_spinners && is_spinner_line(line) {
                continue;
            }
            let cleaned = if self.strip_spinners {
                strip_inline_spinners(line)
            } else {
                line.to_string()
            };
            kept.push(cleaned.trim_end().to_string());
        }

        // Collapse runs of blank lines to a single blank, then trim the ends.
        let mut collapsed: Vec<String> = Vec::with_capacity(kept.len());
        for line in kept {
            if line.is_empty() && collapsed.last().is_some_and(String::is_empty) {
                continue;
            }
            collapsed.push(line);
        }
        while collapsed.first().is_some_and(String::is_empty) {
            collapsed.remove(0);
        }
        while collapsed.last().is_some_and(String::is_empty) {
            collapsed.pop();
        }

        collapsed.join("\n")
    }
}

fn is_chrome_char(c: char) -> bool {
    // Box drawing plus block elements (bordered input boxes, separators).
    ('\u{2500}'..='\u{257F}').contains(&c) || ('\u{2580}'..='\u{259F}').contains(&c)
}

fn is_braille_spinner(c: char) -> bool {
    ('\u{2800}'..='\u{28FF}').contains(&c)
}

/// A line that is purely borders and whitespace carries no content.
fn is_chrome_line(line: &str) -> bool {
    !line.trim().is_empty() && line.chars().all(|c| c.is_whitespace() || is_chrome_char(c))
}

/// A line that is only spinner glyphs and whitespace.
fn is_spinner_line(line: &str) -> bool {
    !line.trim().is_empty()
        && line
            .chars()
            .all(|c| c.is_whitespace() || is_braille_spinner(c))
}

fn strip_inline_spinners(line: &str) -> String {
    line.chars().filter(|c| !is_braille_spinner(*c)).collect()
}

#[cfg(test)]
mod tests {
    use super::{rules_for, AgentType};

    #[test]
    fn strips_trailing_prompt_line() {
        let rules = rules_for(AgentType::Custom);
        let reply = rules.extract_reply("hi!\n> ", None);
        assert_eq!(reply, "hi!");
    }

    #[test]
    fn reply_region_starts_after_user_echo() {
        let rules = rules_for(AgentType::Custom);
        let screen = "welcome\n> hello\nhi there!\n> ";
        let reply = rules.extract_reply(screen, Some("hello"));
        assert_eq!(reply, "hi there!");
    }

    #[test]
    fn echo_match_uses_last_occurrence() {
        let rules = rules_for(AgentType::Custom);
        let screen = "> build it\nok\n> build it\ndone building\n> ";
        let reply = rules.extract_reply(screen, Some("build it"));
        assert_eq!(reply, "done building");
    }

    #[test]
    fn prompt_only_screen_yields_empty_reply() {
        let rules = rules_for(AgentType::Custom);
        assert_eq!(rules.extract_reply("> ", None), "");
        assert_eq!(rules.extract_reply("", None), "");
    }

    #[test]
    fn box_drawing_chrome_is_removed() {
        let rules = rules_for(AgentType::Claude);
        let screen = "answer line\n╭──────────╮\n│ ❯        │\n╰──────────╯";
        let reply = rules.extract_reply(screen, None);
        assert_eq!(reply, "answer line");
    }

    #[test]
    fn claude_prompt_inside_border_is_prompt_line() {
        let rules = rules_for(AgentType::Claude);
        assert!(rules.is_prompt_line("│ ❯ typing here"));
        assert!(rules.is_prompt_line("❯ "));
        assert!(!rules.is_prompt_line("❯code in a word"));
    }

    #[test]
    fn goose_prompt_marker() {
        let rules = rules_for(AgentType::Goose);
        let reply = rules.extract_reply("result ready\n( O)> ", None);
        assert_eq!(reply, "result ready");
    }

    #[test]
    fn blank_runs_collapse_to_single_blank() {
        let rules = rules_for(AgentType::Custom);
        let screen = "first\n\n\n\nsecond\n> ";
        assert_eq!(rules.extract_reply(screen, None), "first\n\nsecond");
    }

    #[test]
    fn trailing_blank_lines_are_trimmed() {
        let rules = rules_for(AgentType::Custom);
        let screen = "only line\n\n\n\n\n> ";
        assert_eq!(rules.extract_reply(screen, None), "only line");
    }

    #[test]
    fn spinner_only_lines_are_dropped() {
        let rules = rules_for(AgentType::Codex);
        let screen = "⠋⠙⠹\nprogress made\n⠼ compiling\n› ";
        assert_eq!(rules.extract_reply(screen, None), "progress made\n compiling");
    }

    #[test]
    fn reply_lines_starting_with_quote_survive_above_prompt() {
        let rules = rules_for(AgentType::Aider);
        // Only the region from the last prompt line down is removed.
        let screen = "> quoted advice\nmore text\n> ";
        assert_eq!(
            rules.extract_reply(screen, None),
            "> quoted advice\nmore text"
        );
    }

    #[test]
    fn default_programs() {
        assert_eq!(AgentType::Claude.default_program(), Some("claude"));
        assert_eq!(AgentType::Custom.default_program(), None);
    }
}
