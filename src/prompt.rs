//! Character-conditioned prompt construction.

use crate::scrape::CharacterProfile;
use crate::session::ConversationTurn;
use crate::text::{tail_chars, truncate_chars};

/// Character budget for a rendered prompt. Past this the compacted template
/// takes over.
pub const MAX_PROMPT_CHARS: usize = 2000;

/// Turns rendered into a prompt (the store may hold more).
pub const PROMPT_HISTORY_TURNS: usize = 10;

/// Render the trailing conversation turns as prompt history lines.
pub fn format_history(character_name: &str, turns: &[ConversationTurn]) -> String {
    let start = turns.len().saturating_sub(PROMPT_HISTORY_TURNS);
    turns[start..]
        .iter()
        .map(|turn| format!("User: {}\n{}: {}", turn.user, character_name, turn.bot))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Build the model prompt for one exchange.
///
/// Deterministic: the same profile, input, emotion, and history always yield
/// the same prompt. When the full template blows the character budget, the
/// compacted template truncates every field but keeps the user input verbatim.
pub fn build_character_prompt(
    profile: &CharacterProfile,
    user_input: &str,
    emotion: &str,
    history_text: &str,
) -> String {
    let name = profile.display_name();

    let mut prompt = format!(
        "<|system|>You are {}. Stay in character at all times.\n\
         Background: {}\n\
         Personality: {}\n\
         Speech Style: {}\n\
         User's emotion: {}</s>\n",
        name, profile.description, profile.personality, profile.speech_style, emotion
    );

    if !history_text.is_empty() {
        prompt.push_str(history_text);
        prompt.push('\n');
    }

    prompt.push_str(&format!("<|user|>{}</s>\n<|model|>", user_input));

    if prompt.chars().count() <= MAX_PROMPT_CHARS {
        return prompt;
    }

    // Oversized: rebuild with truncated fields, recent history preferred.
    let personality = truncate_chars(&profile.personality, 500);
    let description = truncate_chars(&profile.description, 500);
    let speech_style = truncate_chars(&profile.speech_style, 300);
    let history = tail_chars(history_text, 800);

    let mut prompt = format!(
        "<|system|>You are {}. Stay in character.\n\
         Personality: {}\n\
         Background: {}\n\
         Speech Style: {}\n\
         User's emotion: {}</s>\n",
        name, personality, description, speech_style, emotion
    );

    if !history.is_empty() {
        prompt.push_str(history);
        prompt.push('\n');
    }

    prompt.push_str(&format!("<|user|>{}</s>\n<|model|>", user_input));

    prompt
}
