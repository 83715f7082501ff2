use std::sync::OnceLock;

use regex::Regex;

use crate::types::{ChatTurn, LeadPayload, Role};

/// Result of scanning a model reply for a `[LEAD_INFO]...[/LEAD_INFO]`
/// envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum EnvelopeScan {
    /// No envelope markers anywhere in the reply.
    NoEnvelope,
    /// Envelope found and parsed. `cleaned` is the reply with every envelope
    /// removed and the remainder trimmed.
    Parsed { payload: LeadPayload, cleaned: String },
    /// Markers are present but the enclosed text is not a JSON object.
    Malformed,
}

fn envelope_regex() -> &'static Regex {
    static ENVELOPE_RE: OnceLock<Regex> = OnceLock::new();
    ENVELOPE_RE.get_or_init(|| {
        Regex::new(r"(?s)\[LEAD_INFO\](.*?)\[/LEAD_INFO\]").expect("envelope regex must compile")
    })
}

fn email_regex() -> &'static Regex {
    static EMAIL_RE: OnceLock<Regex> = OnceLock::new();
    EMAIL_RE.get_or_init(|| {
        Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}")
            .expect("email regex must compile")
    })
}

fn phone_regex() -> &'static Regex {
    static PHONE_RE: OnceLock<Regex> = OnceLock::new();
    PHONE_RE.get_or_init(|| {
        Regex::new(r"\+?\d[\d\s().-]{5,18}\d").expect("phone regex must compile")
    })
}

fn strong_intro_regex() -> &'static Regex {
    static STRONG_INTRO_RE: OnceLock<Regex> = OnceLock::new();
    STRONG_INTRO_RE.get_or_init(|| {
        Regex::new(r"(?i)\b(?:my name is|call me)\s+([A-Za-z][A-Za-z'\-]*(?:\s+[A-Za-z][A-Za-z'\-]*)?)")
            .expect("strong intro regex must compile")
    })
}

fn weak_intro_regex() -> &'static Regex {
    static WEAK_INTRO_RE: OnceLock<Regex> = OnceLock::new();
    WEAK_INTRO_RE.get_or_init(|| {
        Regex::new(r"\b(?i:i'm|i am|this is)\s+([A-Z][a-z'\-]+(?:\s+[A-Z][a-z'\-]+)?)")
            .expect("weak intro regex must compile")
    })
}

fn capitalized_pair_regex() -> &'static Regex {
    static CAPITALIZED_PAIR_RE: OnceLock<Regex> = OnceLock::new();
    CAPITALIZED_PAIR_RE.get_or_init(|| {
        Regex::new(r"\b[A-Z][a-z]+\s+[A-Z][a-z]+\b").expect("capitalized pair regex must compile")
    })
}

// Words that follow intro phrases without being a name ("call me at ...").
const NOT_A_NAME: &[&str] = &[
    "at", "on", "in", "a", "an", "the", "back", "later", "soon", "when", "please", "tomorrow",
    "today", "anytime", "whenever", "now",
];

const INTEREST_KEYWORDS: &[&str] = &["interest", "program"];

/// Minimum and maximum digit counts for a string to LOOK like a phone number
/// in free text. Persistence validation is looser, see `reconcile`.
const PHONE_DETECT_DIGITS: std::ops::RangeInclusive<usize> = 7..=11;

pub fn scan_envelope(raw: &str) -> EnvelopeScan {
    let Some(caps) = envelope_regex().captures(raw) else {
        return EnvelopeScan::NoEnvelope;
    };
    let inner = caps.get(1).map(|m| m.as_str()).unwrap_or("").trim();
    match serde_json::from_str::<LeadPayload>(inner) {
        Ok(mut payload) => {
            payload.normalize();
            let cleaned = envelope_regex().replace_all(raw, "").trim().to_string();
            EnvelopeScan::Parsed { payload, cleaned }
        }
        Err(_) => EnvelopeScan::Malformed,
    }
}

pub fn find_email(text: &str) -> Option<String> {
    email_regex().find(text).map(|m| m.as_str().to_string())
}

pub fn find_phone(text: &str) -> Option<String> {
    // Digit runs inside an email address are not phone numbers.
    let scrubbed = email_regex().replace_all(text, " ");
    for candidate in phone_regex().find_iter(&scrubbed) {
        let digits = candidate.as_str().chars().filter(|c| c.is_ascii_digit()).count();
        if PHONE_DETECT_DIGITS.contains(&digits) {
            return Some(candidate.as_str().to_string());
        }
    }
    None
}

pub fn find_intro_name(text: &str) -> Option<String> {
    let capture = strong_intro_regex()
        .captures(text)
        .or_else(|| weak_intro_regex().captures(text))?;
    let name = capture.get(1)?.as_str().trim();
    let first = name.split_whitespace().next().unwrap_or("");
    if NOT_A_NAME.contains(&first.to_lowercase().as_str()) {
        return None;
    }
    Some(name.to_string())
}

pub fn has_name_mention(text: &str) -> bool {
    find_intro_name(text).is_some() || capitalized_pair_regex().is_match(text)
}

pub fn mentions_interests(text: &str) -> bool {
    let lower = text.to_lowercase();
    INTEREST_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

/// Which of the four lead fields have already shown up in a conversation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FieldPresence {
    pub name: bool,
    pub email: bool,
    pub phone: bool,
    pub interests: bool,
}

impl FieldPresence {
    /// Field names still unseen, in the order the assistant should ask for
    /// them.
    pub fn missing(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if !self.name {
            fields.push("name");
        }
        if !self.email {
            fields.push("email");
        }
        if !self.phone {
            fields.push("phone");
        }
        if !self.interests {
            fields.push("interests");
        }
        fields
    }

    pub fn all_present(&self) -> bool {
        self.name && self.email && self.phone && self.interests
    }
}

/// Scans a conversation for lead fields. Name, email, and phone are only
/// trusted when the user wrote them; the interests keywords and echoed
/// envelope content count from any turn.
pub fn scan_presence(history: &[ChatTurn]) -> FieldPresence {
    let mut presence = FieldPresence::default();
    for turn in history {
        if turn.role == Role::User {
            presence.name = presence.name || has_name_mention(&turn.content);
            presence.email = presence.email || find_email(&turn.content).is_some();
            presence.phone = presence.phone || find_phone(&turn.content).is_some();
        }
        presence.interests = presence.interests || mentions_interests(&turn.content);
        if let EnvelopeScan::Parsed { payload, .. } = scan_envelope(&turn.content) {
            presence.name = presence.name || payload.name.is_some();
            presence.email = presence.email || payload.email.is_some();
            presence.phone = presence.phone || payload.phone.is_some();
            presence.interests = presence.interests || payload.interests.is_some();
        }
    }
    presence
}

/// Best-effort payload rebuilt from prior turns, used when the model is
/// unreachable. Envelope fields win over recognizer guesses; the earliest
/// occurrence of each field wins.
pub fn seed_payload_from_history(history: &[ChatTurn]) -> LeadPayload {
    let mut payload = LeadPayload::default();
    for turn in history {
        if let EnvelopeScan::Parsed { payload: prior, .. } = scan_envelope(&turn.content) {
            payload.fill_missing_from(&prior);
        }
        if turn.role == Role::User {
            if payload.email.is_none() {
                payload.email = find_email(&turn.content);
            }
            if payload.phone.is_none() {
                payload.phone = find_phone(&turn.content);
            }
            if payload.name.is_none() {
                payload.name = find_intro_name(&turn.content);
            }
        }
    }
    payload
}
