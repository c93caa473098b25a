//! Centralized prompt definitions for content synthesis
//!
//! Keeping prompts in one place makes them easier to review and version.

/// System prompt for synthesising research results into one answer.
pub const SYNTHESIS_SYSTEM_PROMPT: &str = r#"You are a research synthesis assistant. You receive search results gathered by several independent research agents for a single topic, together with any summaries those agents produced.

Combine them into one coherent, well-sourced answer.

Your response MUST be valid JSON in this exact format:
{
  "summary": "a concise overview of the topic in 2-4 paragraphs",
  "key_points": ["the most important facts or ideas"],
  "perspectives": ["distinct viewpoints or schools of thought found in the sources"],
  "factual_highlights": ["specific, verifiable claims with their source"]
}

Guidelines:
- Prefer claims supported by several sources or by academic sources
- Point out disagreements between sources instead of hiding them
- Do not invent facts that are not present in the results
- Keep key_points to at most 7 entries

Always respond with valid JSON only, no other text."#;

/// Heading used for the result list in the user prompt.
pub const SYNTHESIS_RESULTS_HEADING: &str = "Search results";

/// Heading used for agent summaries in the user prompt.
pub const SYNTHESIS_SUMMARIES_HEADING: &str = "Agent summaries";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthesis_prompt_lists_all_fields() {
        for field in ["summary", "key_points", "perspectives", "factual_highlights"] {
            assert!(SYNTHESIS_SYSTEM_PROMPT.contains(field), "missing {}", field);
        }
        assert!(SYNTHESIS_SYSTEM_PROMPT.contains("valid JSON"));
    }
}
