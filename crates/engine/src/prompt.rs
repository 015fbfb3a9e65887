//! Prompt assembly with context budgeting
//!
//! Sections are admitted in priority order against the token budget
//! (context window minus the reserved completion): preamble and agent
//! instructions always, then the question, the schema snippet, the
//! conversation context (oldest turns dropped first), and finally the
//! retrieved examples (lowest-ranked dropped first).

use sqlscout_core::{estimate_tokens, ScoredExemplar};

use crate::agents::AgentProfile;

/// The assembled prompt plus accounting for tests and logs.
#[derive(Debug, Clone)]
pub struct Prompt {
    pub text: String,
    pub estimated_tokens: usize,
    pub examples_included: usize,
    pub context_lines_dropped: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct PromptBuilder {
    pub context_tokens: usize,
    pub reserved_completion: usize,
}

impl PromptBuilder {
    pub fn new(context_tokens: usize, reserved_completion: usize) -> Self {
        Self {
            context_tokens,
            reserved_completion,
        }
    }

    fn budget(&self) -> usize {
        self.context_tokens.saturating_sub(self.reserved_completion)
    }

    /// Assemble the prompt for one request.
    pub fn build(
        &self,
        profile: &AgentProfile,
        question: &str,
        schema_snippet: Option<&str>,
        conversation: Option<&str>,
        examples: &[ScoredExemplar],
    ) -> Prompt {
        let budget = self.budget();

        // Always-kept sections. Every admitted section is charged one extra
        // token for its separator so the final estimate stays under budget.
        let mut remaining = budget
            .saturating_sub(estimate_tokens(profile.preamble) + 1)
            .saturating_sub(estimate_tokens(profile.instructions) + 1);

        // Question, truncated in the degenerate case where it alone busts
        // the budget.
        let question_block = format!("Question: {}", question);
        let question_block = if estimate_tokens(&question_block) > remaining {
            let max_chars = remaining.saturating_mul(4).max(16);
            let truncated: String = question_block.chars().take(max_chars).collect();
            truncated
        } else {
            question_block
        };
        remaining = remaining.saturating_sub(estimate_tokens(&question_block) + 1);

        // Schema snippet fits or is omitted whole (its internal trimming
        // happened in the injector).
        let schema_block = schema_snippet
            .filter(|s| !s.is_empty())
            .map(|s| format!("Schema:\n{}", s))
            .filter(|block| estimate_tokens(block) <= remaining);
        if let Some(block) = &schema_block {
            remaining = remaining.saturating_sub(estimate_tokens(block) + 1);
        }

        // Conversation context, oldest lines dropped first.
        let mut context_lines_dropped = 0;
        let context_block = conversation
            .filter(|c| !c.trim().is_empty())
            .map(|context| {
                let lines: Vec<&str> = context.lines().collect();
                let mut start = 0;
                loop {
                    let block = format!("Conversation so far:\n{}", lines[start..].join("\n"));
                    if estimate_tokens(&block) <= remaining || start + 1 >= lines.len() {
                        context_lines_dropped = start;
                        return block;
                    }
                    start += 1;
                }
            })
            .filter(|block| estimate_tokens(block) <= remaining);
        if let Some(block) = &context_block {
            remaining = remaining.saturating_sub(estimate_tokens(block) + 1);
        }

        // Examples, highest-ranked first, stop when the budget is gone. The
        // section header is charged up front.
        let mut example_blocks: Vec<String> = Vec::new();
        if !examples.is_empty() {
            remaining = remaining.saturating_sub(estimate_tokens("Known good examples:") + 1);
        }
        for hit in examples {
            let block = format!(
                "-- Example ({}): {}\n{}",
                hit.exemplar.id, hit.exemplar.description, hit.exemplar.sql
            );
            let cost = estimate_tokens(&block) + 1;
            if cost > remaining {
                break;
            }
            remaining = remaining.saturating_sub(cost);
            example_blocks.push(block);
        }
        let examples_included = example_blocks.len();

        // Render in reading order.
        let mut sections: Vec<String> = vec![
            profile.preamble.to_string(),
            profile.instructions.to_string(),
        ];
        if let Some(block) = schema_block {
            sections.push(block);
        }
        if !example_blocks.is_empty() {
            sections.push(format!("Known good examples:\n{}", example_blocks.join("\n\n")));
        }
        if let Some(block) = context_block {
            sections.push(block);
        }
        sections.push(question_block);

        let text = sections.join("\n\n");
        let estimated_tokens = estimate_tokens(&text);

        Prompt {
            text,
            estimated_tokens,
            examples_included,
            context_lines_dropped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use sqlscout_core::{AgentKind, Exemplar};

    use crate::agents::profile;

    fn example(id: &str, sql: &str) -> ScoredExemplar {
        ScoredExemplar {
            exemplar: Arc::new(Exemplar {
                id: id.to_string(),
                sql: sql.to_string(),
                description: format!("example {}", id),
                tables: Vec::new(),
                joins: Vec::new(),
            }),
            fused_score: 1.0,
            vector_score: 1.0,
            lexical_score: 0.0,
        }
    }

    #[test]
    fn test_prompt_contains_sections_in_order() {
        let builder = PromptBuilder::new(8_192, 2_048);
        let prompt = builder.build(
            &profile(AgentKind::Default),
            "top users by spend",
            Some("TABLE ds.users\n  id INT64"),
            Some("user: hello"),
            &[example("a", "SELECT 1")],
        );

        let schema_pos = prompt.text.find("Schema:").unwrap();
        let examples_pos = prompt.text.find("Known good examples:").unwrap();
        let question_pos = prompt.text.find("Question:").unwrap();
        assert!(schema_pos < examples_pos);
        assert!(examples_pos < question_pos);
        assert_eq!(prompt.examples_included, 1);
    }

    #[test]
    fn test_budget_invariant_holds() {
        let builder = PromptBuilder::new(512, 256);
        let big_sql = "SELECT ".to_string() + &"col, ".repeat(400);
        let prompt = builder.build(
            &profile(AgentKind::Default),
            "question",
            None,
            None,
            &[example("big", &big_sql), example("small", "SELECT 1")],
        );

        assert!(prompt.estimated_tokens <= 512 - 256);
        // The oversized example was dropped; the small one fits.
        assert!(prompt.text.contains("small"));
        assert!(!prompt.text.contains("col, col"));
    }

    #[test]
    fn test_lowest_ranked_examples_dropped_first() {
        let builder = PromptBuilder::new(300, 100);
        let filler = "SELECT x FROM y WHERE ".to_string() + &"z = 1 AND ".repeat(20);
        let prompt = builder.build(
            &profile(AgentKind::Chat),
            "q",
            None,
            None,
            &[example("first", &filler), example("second", &filler)],
        );
        assert!(prompt.examples_included <= 1);
        if prompt.examples_included == 1 {
            assert!(prompt.text.contains("first"));
            assert!(!prompt.text.contains("second"));
        }
    }

    #[test]
    fn test_conversation_drops_oldest_lines() {
        let builder = PromptBuilder::new(260, 64);
        let conversation = (0..50)
            .map(|i| format!("turn {}: some prior exchange text", i))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = builder.build(
            &profile(AgentKind::Chat),
            "q",
            None,
            Some(&conversation),
            &[],
        );

        if prompt.text.contains("Conversation so far:") {
            assert!(prompt.context_lines_dropped > 0);
            assert!(prompt.text.contains("turn 49"));
            assert!(!prompt.text.contains("turn 0:"));
        }
    }

    #[test]
    fn test_no_optional_sections() {
        let builder = PromptBuilder::new(8_192, 2_048);
        let prompt = builder.build(&profile(AgentKind::Schema), "what is in users?", None, None, &[]);
        assert!(!prompt.text.contains("Schema:"));
        assert!(!prompt.text.contains("Known good examples:"));
        assert!(prompt.text.ends_with("Question: what is in users?"));
    }
}
