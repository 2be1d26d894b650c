//! Fixed instructions sent alongside each sample.

pub const FRAME_PROMPT: &str = "\
You are a real-time safety guard. This is a current frame from a child's screen.
Analyze it for: Nudity, Pornography, Gore, or Sexual Violence.
Return ONLY valid JSON:
{
    \"isSafe\": boolean,
    \"category\": \"NUDITY\" | \"VIOLENCE\" | \"SAFE\" | \"OTHER\",
    \"confidence\": float (0.0 to 1.0),
    \"reasoning\": \"short explanation of what was detected\"
}";

pub fn text_prompt(sender: &str, body: &str) -> String {
    format!(
        "\
Analyze this message for: Cyberbullying, Predatory Grooming, Sexual Harassment, or Threats.
Sender: {sender}
Message: \"{body}\"

Return ONLY valid JSON:
{{
    \"isSafe\": boolean,
    \"category\": \"BULLYING\" | \"GROOMING\" | \"THREAT\" | \"SAFE\" | \"OTHER\",
    \"confidence\": float (0.0 to 1.0),
    \"reasoning\": \"short explanation\"
}}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_prompt_embeds_message() {
        let prompt = text_prompt("Sam", "meet me alone");
        assert!(prompt.contains("Sender: Sam"));
        assert!(prompt.contains("Message: \"meet me alone\""));
        assert!(prompt.contains("\"GROOMING\""));
    }
}
