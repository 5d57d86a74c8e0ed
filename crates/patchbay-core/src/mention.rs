//! Mention routing: turns raw user text into target agents plus a clean body
//!
//! ```text
//! @Gemma327B hi            -> [google-gemma-3-27b], "hi"
//! @"Gemini 3" compare      -> every participant whose name starts with "gemini3"
//! @gpt five ping           -> [gpt-five], "ping"
//! @all hello               -> whole participant set, "hello"
//! ping @nobody             -> [], "ping @nobody"
//! ```
//!
//! A token matches a participant when the token, lower-cased with whitespace
//! removed, is a prefix of the participant's display name normalized the same
//! way. Unquoted tokens greedily absorb following words while the result is
//! still a prefix of some participant's name.

use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::agents::AgentProfile;

static MENTION_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"@(?:"([^"]*)"|([\p{L}\p{N}_()\-]+(?:\.[\p{L}\p{N}_()\-]+)*))"#)
        .expect("MENTION_REGEX is a compile-time constant")
});

/// Tokens that address the whole participant set
const BROADCAST_TOKENS: &[&str] = &["all", "everyone"];

/// Result of routing one raw message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutedMessage {
    /// The text exactly as the user typed it
    pub raw: String,
    /// Resolved agent ids, in order of first mention, without duplicates
    pub targets: Vec<String>,
    /// `raw` with every recognized mention removed, trimmed
    pub body: String,
    /// `@all` / `@everyone` was present
    pub broadcast: bool,
    /// Mention tokens that matched nobody and were left in the body
    pub unmatched: Vec<String>,
}

impl RoutedMessage {
    /// A message addressed to nobody
    pub fn passive(text: impl Into<String>) -> Self {
        let raw = text.into();
        Self {
            body: raw.trim().to_string(),
            raw,
            targets: Vec::new(),
            broadcast: false,
            unmatched: Vec::new(),
        }
    }

    /// A message sent to explicit targets, bypassing mention parsing
    pub fn to_targets(text: impl Into<String>, targets: Vec<String>) -> Self {
        let mut routed = Self::passive(text);
        routed.targets = targets;
        routed
    }

    pub fn is_passive(&self) -> bool {
        self.targets.is_empty()
    }
}

/// Resolve the mentions in `text` against the current participants
pub fn route(text: &str, participants: &[AgentProfile]) -> RoutedMessage {
    let names: Vec<String> = participants.iter().map(|p| normalize(&p.name)).collect();

    let mut targets: Vec<String> = Vec::new();
    let mut strip: Vec<Range<usize>> = Vec::new();
    let mut unmatched = Vec::new();
    let mut broadcast = false;

    for caps in MENTION_REGEX.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        if preceded_by_word(text, whole.start()) {
            // e-mail addresses and the like
            continue;
        }
        let (token, quoted) = match (caps.get(1), caps.get(2)) {
            (Some(phrase), _) => (phrase.as_str(), true),
            (None, Some(ident)) => (ident.as_str(), false),
            (None, None) => continue,
        };

        let mut key = normalize(token);
        let mut end = whole.end();
        if !quoted && !is_known(&key, &names) {
            // "(cc @GPT-4o)": the closing paren belongs to the sentence
            let trimmed = token.trim_end_matches(')');
            let trimmed_key = normalize(trimmed);
            if trimmed.len() < token.len() && is_known(&trimmed_key, &names) {
                end -= token.len() - trimmed.len();
                key = trimmed_key;
            }
        }

        if BROADCAST_TOKENS.contains(&key.as_str()) {
            broadcast = true;
            strip.push(whole.start()..end);
            continue;
        }
        if !is_known(&key, &names) {
            unmatched.push(whole.as_str().to_string());
            continue;
        }

        let (key, end) = if quoted {
            (key, end)
        } else {
            extend_mention(text, end, key, &names)
        };
        strip.push(whole.start()..end);

        for (profile, name) in participants.iter().zip(&names) {
            if name.starts_with(&key) && !targets.contains(&profile.id) {
                targets.push(profile.id.clone());
            }
        }
    }

    if broadcast {
        targets.clear();
        for profile in participants {
            if !targets.contains(&profile.id) {
                targets.push(profile.id.clone());
            }
        }
    }

    let body = strip_spans(text, &strip);
    debug!(
        "Routed message: targets={:?}, broadcast={}, unmatched={:?}",
        targets, broadcast, unmatched
    );

    RoutedMessage {
        raw: text.to_string(),
        targets,
        body,
        broadcast,
        unmatched,
    }
}

/// Lower-case and drop whitespace and quotes
pub fn normalize(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_whitespace() && *c != '"')
        .flat_map(char::to_lowercase)
        .collect()
}

/// A reserved token, or a non-empty prefix of some participant's name
fn is_known(key: &str, names: &[String]) -> bool {
    BROADCAST_TOKENS.contains(&key) || (!key.is_empty() && names.iter().any(|n| n.starts_with(key)))
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '.' | '-' | '_' | '(' | ')')
}

fn preceded_by_word(text: &str, start: usize) -> bool {
    text[..start]
        .chars()
        .next_back()
        .is_some_and(|c| c.is_alphanumeric() || c == '_')
}

/// Absorb following words into an unquoted mention while the combined key
/// still prefixes some participant name. Returns the final key and the byte
/// offset where the mention ends.
fn extend_mention(text: &str, mut end: usize, mut key: String, names: &[String]) -> (String, usize) {
    loop {
        let rest = &text[end..];
        let gap = rest.len() - rest.trim_start_matches([' ', '\t']).len();
        if gap == 0 {
            break;
        }
        let word_start = end + gap;
        let tail = &text[word_start..];
        let word_len = tail.find(|c: char| !is_ident_char(c)).unwrap_or(tail.len());
        let word = tail[..word_len].trim_end_matches('.');
        if word.is_empty() {
            break;
        }

        let candidate = format!("{}{}", key, normalize(word));
        if !names.iter().any(|n| n.starts_with(&candidate)) {
            break;
        }
        key = candidate;
        end = word_start + word.len();
    }
    (key, end)
}

/// Remove `spans` from `text`, swallowing the doubled gap a removal leaves
fn strip_spans(text: &str, spans: &[Range<usize>]) -> String {
    let mut body = String::with_capacity(text.len());
    let mut cursor = 0;
    for span in spans {
        body.push_str(&text[cursor..span.start]);
        cursor = span.end;
        if body.is_empty() || body.ends_with([' ', '\t']) {
            while text[cursor..].starts_with([' ', '\t']) {
                cursor += 1;
            }
        }
    }
    body.push_str(&text[cursor..]);
    body.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Capability;

    fn participants() -> Vec<AgentProfile> {
        vec![
            AgentProfile::new("openai-gpt-4o", "GPT-4o", Capability::Api),
            AgentProfile::new("google-gemma-3-27b", "Gemma 3 27B", Capability::Api),
            AgentProfile::new("google-gemini-3-flash", "Gemini 3 Flash", Capability::Api),
        ]
    }

    fn ids(routed: &RoutedMessage) -> Vec<&str> {
        routed.targets.iter().map(String::as_str).collect()
    }

    #[test]
    fn test_handle_mention() {
        let routed = route("@Gemma327B hi", &participants());
        assert_eq!(ids(&routed), vec!["google-gemma-3-27b"]);
        assert_eq!(routed.body, "hi");
        assert_eq!(routed.raw, "@Gemma327B hi");
    }

    #[test]
    fn test_name_with_punctuation() {
        let routed = route("@GPT-4o hello", &participants());
        assert_eq!(ids(&routed), vec!["openai-gpt-4o"]);
        assert_eq!(routed.body, "hello");
    }

    #[test]
    fn test_prefix_match() {
        let routed = route("@Gemini test", &participants());
        assert_eq!(ids(&routed), vec!["google-gemini-3-flash"]);
        assert_eq!(routed.body, "test");
    }

    #[test]
    fn test_all_resolves_to_every_participant() {
        let routed = route("@all hello", &participants());
        assert_eq!(
            ids(&routed),
            vec!["openai-gpt-4o", "google-gemma-3-27b", "google-gemini-3-flash"]
        );
        assert!(routed.broadcast);
        assert_eq!(routed.body, "hello");
    }

    #[test]
    fn test_everyone_overrides_other_mentions() {
        let routed = route("@GPT-4o @everyone status?", &participants());
        assert_eq!(routed.targets.len(), 3);
        assert_eq!(routed.body, "status?");
    }

    #[test]
    fn test_all_with_two_participants_in_any_order() {
        let a = AgentProfile::new("a", "Alpha", Capability::Api);
        let b = AgentProfile::new("b", "Bravo", Capability::Api);
        let forward = route("@all hello", &[a.clone(), b.clone()]);
        let reverse = route("@all hello", &[b, a]);
        let mut f = forward.targets.clone();
        let mut r = reverse.targets.clone();
        f.sort();
        r.sort();
        assert_eq!(f, vec!["a", "b"]);
        assert_eq!(f, r);
    }

    #[test]
    fn test_case_and_whitespace_insensitive() {
        let people = vec![AgentProfile::new("gpt-five", "GPT Five", Capability::Api)];
        let camel = route("@GptFive ping", &people);
        let spaced = route("@gpt five ping", &people);
        let quoted = route("@\"gpt five\" ping", &people);
        assert_eq!(ids(&camel), vec!["gpt-five"]);
        assert_eq!(ids(&spaced), vec!["gpt-five"]);
        assert_eq!(ids(&quoted), vec!["gpt-five"]);
        assert_eq!(camel.body, "ping");
        assert_eq!(spaced.body, "ping");
        assert_eq!(quoted.body, "ping");
    }

    #[test]
    fn test_quoted_phrase_can_match_several() {
        let routed = route("@\"Gem\" compare notes", &participants());
        assert_eq!(ids(&routed), vec!["google-gemma-3-27b", "google-gemini-3-flash"]);
        assert_eq!(routed.body, "compare notes");
    }

    #[test]
    fn test_duplicates_collapse() {
        let routed = route("@GPT-4o and @gpt-4o again @GPT", &participants());
        assert_eq!(ids(&routed), vec!["openai-gpt-4o"]);
        assert_eq!(routed.body, "and again");
    }

    #[test]
    fn test_targets_follow_mention_order() {
        let routed = route("@Gemini then @GPT-4o", &participants());
        assert_eq!(ids(&routed), vec!["google-gemini-3-flash", "openai-gpt-4o"]);
        assert_eq!(routed.body, "then");
    }

    #[test]
    fn test_unknown_mention_stays_inert() {
        let routed = route("@GPT-4o ask @nobody about it", &participants());
        assert_eq!(ids(&routed), vec!["openai-gpt-4o"]);
        assert_eq!(routed.body, "ask @nobody about it");
        assert_eq!(routed.unmatched, vec!["@nobody"]);
    }

    #[test]
    fn test_no_mentions_is_passive() {
        let routed = route("My name is Kiryl", &participants());
        assert!(routed.is_passive());
        assert_eq!(routed.body, "My name is Kiryl");
    }

    #[test]
    fn test_no_participants_is_passive() {
        let routed = route("@GPT-4o hello", &[]);
        assert!(routed.is_passive());
        assert_eq!(routed.body, "@GPT-4o hello");
    }

    #[test]
    fn test_empty_body_still_routes() {
        let routed = route("  @GPT-4o  ", &participants());
        assert_eq!(ids(&routed), vec!["openai-gpt-4o"]);
        assert_eq!(routed.body, "");
    }

    #[test]
    fn test_email_address_is_not_a_mention() {
        let routed = route("mail me at someone@gpt-4o.com", &participants());
        assert!(routed.is_passive());
        assert_eq!(routed.body, "mail me at someone@gpt-4o.com");
    }

    #[test]
    fn test_trailing_period_is_not_part_of_name() {
        let routed = route("thanks @Gemini.", &participants());
        assert_eq!(ids(&routed), vec!["google-gemini-3-flash"]);
        assert_eq!(routed.body, "thanks .");
    }

    #[test]
    fn test_closing_paren_after_mention() {
        let routed = route("quick question (cc @GPT-4o)", &participants());
        assert_eq!(ids(&routed), vec!["openai-gpt-4o"]);
        assert!(routed.unmatched.is_empty());
        assert_eq!(routed.body, "quick question (cc )");
    }

    #[test]
    fn test_closing_paren_after_broadcast() {
        let routed = route("(@all) status?", &participants());
        assert!(routed.broadcast);
        assert_eq!(routed.targets.len(), 3);
        assert_eq!(routed.body, "() status?");
    }

    #[test]
    fn test_parens_inside_a_name_still_match() {
        let people = vec![AgentProfile::new("llama", "Llama (70B)", Capability::Api)];
        let routed = route("ask @Llama(70B) now", &people);
        assert_eq!(ids(&routed), vec!["llama"]);
        assert_eq!(routed.body, "ask now");
    }

    #[test]
    fn test_short_name_does_not_swallow_everything() {
        let people = vec![
            AgentProfile::new("a", "A", Capability::Api),
            AgentProfile::new("atlas", "Atlas", Capability::Api),
        ];
        let routed = route("@Atlas hi", &people);
        assert_eq!(ids(&routed), vec!["atlas"]);
    }

    #[test]
    fn test_to_targets_keeps_text() {
        let routed = RoutedMessage::to_targets(" hello ", vec!["a".to_string()]);
        assert_eq!(routed.raw, " hello ");
        assert_eq!(routed.body, "hello");
        assert!(!routed.is_passive());
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("Gemma 3 27B"), "gemma327b");
        assert_eq!(normalize("\"GPT Five\""), "gptfive");
    }
}
