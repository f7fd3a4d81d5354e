//! The simple-conversational classifier (spec.md §4.2.2). Open Question (b)
//! treats this as a replaceable policy object rather than baking the regex
//! set into `Agent` directly.

use regex::Regex;
use std::sync::LazyLock;

pub trait ConversationClassifier: Send + Sync {
    /// True if `message` is small talk that should get a direct Brain reply
    /// rather than spawning a new ACCOMPLISH step.
    fn is_simple(&self, message: &str) -> bool;
}

static GREETING_PATTERNS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^\s*(hi|hello|hey|yo|greetings|good\s+(morning|afternoon|evening))[\s!.,]*$",
    )
    .unwrap()
});

static THANKS_PATTERNS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(thanks|thank\s+you|thx|ty|much\s+appreciated)[\s!.,]*$").unwrap()
});

static FAREWELL_PATTERNS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(bye|goodbye|see\s+you|farewell|later)[\s!.,]*$").unwrap()
});

static AFFIRMATION_PATTERNS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(ok|okay|sure|yes|yep|yeah|no|nope|got\s+it|sounds\s+good|cool|great|nice)[\s!.,]*$")
        .unwrap()
});

static HELP_PATTERNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(help|what\s+can\s+you\s+do\??)[\s!.,]*$").unwrap());

static SMALL_TALK_PATTERNS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(how\s+are\s+you|what'?s\s+up|how'?s\s+it\s+going)[\s!?.,]*$").unwrap()
});

static TASK_VERB_PATTERNS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(create|build|make|generate|write|develop|implement|design|analyze|research)\b|\bcan\s+you\b|\bi\s+want\s+to\b",
    )
    .unwrap()
});

/// The regex classifier spec.md §4.2.2 describes: a fixed, case-insensitive
/// regex set for small talk, plus a length-and-verb heuristic for anything
/// else.
pub struct RegexClassifier;

impl ConversationClassifier for RegexClassifier {
    fn is_simple(&self, message: &str) -> bool {
        let trimmed = message.trim();
        if GREETING_PATTERNS.is_match(trimmed)
            || THANKS_PATTERNS.is_match(trimmed)
            || FAREWELL_PATTERNS.is_match(trimmed)
            || AFFIRMATION_PATTERNS.is_match(trimmed)
            || HELP_PATTERNS.is_match(trimmed)
            || SMALL_TALK_PATTERNS.is_match(trimmed)
        {
            return true;
        }
        trimmed.chars().count() < 50 && !TASK_VERB_PATTERNS.is_match(trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_known_simple_messages() {
        let c = RegexClassifier;
        for msg in ["hi", "thanks!", "help", "ok", "Hello there", "thank you very much"] {
            assert!(c.is_simple(msg), "expected {msg:?} to be simple");
        }
    }

    #[test]
    fn classifies_task_requests_as_not_simple() {
        let c = RegexClassifier;
        assert!(!c.is_simple("build a web scraper"));
        assert!(!c.is_simple("can you create a report on Q3 sales"));
        assert!(!c.is_simple(
            "I need a much longer message describing a complex multi-step task with details"
        ));
    }

    #[test]
    fn short_non_task_message_is_simple() {
        let c = RegexClassifier;
        assert!(c.is_simple("good morning"));
        assert!(c.is_simple("nice"));
    }
}
