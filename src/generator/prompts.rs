//! Prompt text. Every builder is pure so prompts can be inspected in tests.

use crate::types::{ActionType, Persona, Stimulus};

const ONLY_OUTPUT: &str = "Do not write anything else. Do not write explanations, greetings, or extra words.";

/// Post text is quoted into prompts; keep it bounded
const MAX_QUOTED_CHARS: usize = 600;

fn quote(text: &str) -> String {
    let trimmed: String = text.chars().take(MAX_QUOTED_CHARS).collect();
    format!("\"{}\"", trimmed.replace('"', "'"))
}

pub fn comment(stimulus: &Stimulus) -> String {
    format!(
        "Someone posted this on social media:\n{}\n\nWrite ONLY a short, realistic comment as a response. {ONLY_OUTPUT} \
         The comment must be 1 or 2 sentences. Be authentic and match the tone of your character. \
         Only output the comment itself.",
        quote(&stimulus.text)
    )
}

pub fn post(persona: &Persona, topic: Option<&str>) -> String {
    let interest = topic
        .map(|t| format!("You're interested in {t}.\n"))
        .unwrap_or_default();
    format!(
        "{interest}Write ONLY a short, realistic social media post. {ONLY_OUTPUT} \
         The post must be 1 to 3 sentences. Be authentic and match the tone of a {} account. \
         Only output the post itself.",
        persona.category.description()
    )
}

pub fn memory_note(action: ActionType, stimulus: &Stimulus) -> String {
    format!(
        "You just chose to {action} this post by {}:\n{}\n\nWrite ONLY a short memory (1 sentence) \
         about how you feel about it. This is your internal thought, not something you would say \
         publicly. {ONLY_OUTPUT} Only output the memory itself.",
        stimulus.author,
        quote(&stimulus.text)
    )
}

pub fn full_name(gender: &str) -> String {
    format!(
        "Invent a realistic full name (first and last name) for a {gender} social media user. \
         {ONLY_OUTPUT} Only output the name itself."
    )
}

pub fn username(persona: &Persona, max_len: usize) -> String {
    format!(
        "Create a unique social media username for someone who is {}. \
         The username must be a single word or words connected with underscores. No spaces, \
         no special characters, no numbers. The username must be short (max {max_len} characters) \
         and memorable. {ONLY_OUTPUT} Only output the username itself.\n\nExamples:\nfunny_friend\nmusiclover\nhappycat",
        persona.category.description()
    )
}

pub fn bio(persona: &Persona, age: u8, gender: &str) -> String {
    format!(
        "Write a short social media bio for a {age}-year-old {gender} who is {}. \
         The bio must be 1 to 3 sentences. The style is casual. The bio must reflect the personality. \
         Do NOT use hashtags. Do NOT use emojis. {ONLY_OUTPUT} Only output the bio itself.",
        persona.category.description()
    )
}

/// Appended to the instruction on the retry after a constraint violation
pub fn corrective(instruction: &str, violation: &str) -> String {
    format!(
        "{instruction}\n\nYour previous answer was rejected because {violation}. \
         Follow the instructions exactly."
    )
}

/// Used when generation fails for a memory note
pub fn fallback_note(action: ActionType, stimulus: &Stimulus) -> String {
    let gist: String = stimulus.text.chars().take(80).collect();
    match action {
        ActionType::Like => format!("I liked a post by {} about \"{gist}\".", stimulus.author),
        ActionType::Comment => format!("I commented on {}'s post about \"{gist}\".", stimulus.author),
        ActionType::Follow => format!("I started following {}.", stimulus.author),
        ActionType::Unfollow => format!("I stopped following {}.", stimulus.author),
        ActionType::Post => format!("I posted \"{gist}\"."),
    }
}

pub fn fallback_bio(persona: &Persona) -> String {
    let mut bio = format!("Just here to share thoughts. {}.", capitalize(persona.category.description()));
    if let Some(first) = persona.interests.first() {
        bio.push_str(&format!(" Into {first}."));
    }
    bio
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) => c.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
