//! Prompt builders and reply extraction for each oracle task

use super::ValidatorSpec;

/// Prompt asking one validator for a verdict on one proposition.
pub fn validator_prompt(spec: &ValidatorSpec, proposition: &str) -> String {
    format!(
        "You are a specialized AI validator: \"{name}\" in the {category} category.\n\n\
         Evaluate this proposition: \"{proposition}\"\n\n\
         {focus}\n\n\
         Respond with:\n\
         1. TRUE or FALSE\n\
         2. Confidence percentage (0-100)\n\
         3. Brief reasoning (2-3 sentences)\n\n\
         Format your response exactly as:\n\
         VERDICT: [TRUE/FALSE]\n\
         CONFIDENCE: [percentage]\n\
         REASONING: [your reasoning]",
        name = spec.name,
        category = spec.category,
        proposition = proposition.trim(),
        focus = spec.category.focus(),
    )
}

/// Prompt asking the oracle to break a text into checkable statements.
pub fn split_prompt(text: &str) -> String {
    format!(
        "Please split the following text into verifiable independent propositions \
         (fact-checkable statements).\n\
         Each proposition should contain one specific fact and should be able to be \
         judged as true/false.\n\n\
         Rules:\n\
         1. Write each proposition on one line\n\
         2. Start with \"- \" in list format\n\
         3. Exclude subjective opinions or ambiguous expressions\n\
         4. Include only specific and verifiable facts\n\n\
         Text: {text}\n\n\
         Proposition list:"
    )
}

/// Prompt for a warm, child-friendly answer: two to three sentences,
/// simple words, an analogy.
pub fn answer_prompt(question: &str) -> String {
    format!(
        "Please answer the following question in a simple and fun way, as if \
         explaining to a 5-year-old child. Always respond in English.\n\
         Tone and style:\n\
         - Use friendly and warm language\n\
         - Use simple words instead of difficult ones\n\
         - Include an analogy the child already knows\n\
         - Explain in 2-3 sentences, clearly and concisely\n\n\
         Question: {question}\n\n\
         Child-friendly answer in English:"
    )
}

/// Pull `- `-prefixed lines out of a split reply.
pub fn extract_propositions(reply: &str) -> Vec<String> {
    reply
        .lines()
        .map(str::trim)
        .filter_map(|line| line.strip_prefix("- ").or_else(|| line.strip_prefix("* ")))
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::panel::ValidatorCategory;

    #[test]
    fn test_validator_prompt_embeds_role_and_focus() {
        let spec = ValidatorSpec::new("context-2", "Historical Background", ValidatorCategory::Context);
        let prompt = validator_prompt(&spec, "  The Berlin Wall fell in 1989. ");

        assert!(prompt.contains("\"Historical Background\" in the context category"));
        assert!(prompt.contains("\"The Berlin Wall fell in 1989.\""));
        assert!(prompt.contains("contextual appropriateness"));
        assert!(prompt.ends_with("REASONING: [your reasoning]"));
    }

    #[test]
    fn test_prompts_differ_by_category() {
        let logic = ValidatorSpec::new("a", "X", ValidatorCategory::Logic);
        let fact = ValidatorSpec::new("a", "X", ValidatorCategory::Fact);
        assert_ne!(validator_prompt(&logic, "p"), validator_prompt(&fact, "p"));
    }

    #[test]
    fn test_extract_propositions() {
        let reply = "Proposition list:\n- Water boils at 100C at sea level.\n  - The Moon orbits Earth.  \n-\nnot a bullet\n* Light is fast.\n- ";
        assert_eq!(
            extract_propositions(reply),
            vec![
                "Water boils at 100C at sea level.",
                "The Moon orbits Earth.",
                "Light is fast."
            ]
        );
    }

    #[test]
    fn test_extract_propositions_none() {
        assert!(extract_propositions("I cannot split this.").is_empty());
    }

    #[test]
    fn test_answer_prompt_keeps_child_friendly_tone() {
        let prompt = answer_prompt("Why is the sky blue?");
        assert!(prompt.contains("5-year-old child"));
        assert!(prompt.contains("2-3 sentences"));
        assert!(prompt.contains("analogy"));
        assert!(prompt.contains("Question: Why is the sky blue?"));
        assert!(prompt.ends_with("Child-friendly answer in English:"));
    }
}
