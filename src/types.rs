//! Conversation types shared by the analyzers, the nudge queue and the persona system

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    Child,
    Ai,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
}

/// One chat turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub id: String,
    pub text: String,
    pub speaker: Speaker,
    pub topic: String,
    pub engagement: u8, // 1-10
    pub sentiment: Sentiment,
    pub word_count: usize,
    pub is_question: bool,
    pub timestamp: DateTime<Utc>,
}

impl ConversationMessage {
    pub fn new(speaker: Speaker, text: &str, topic: &str, engagement: u8, sentiment: Sentiment) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            text: text.to_string(),
            speaker,
            topic: topic.to_string(),
            engagement: engagement.clamp(1, 10),
            sentiment,
            word_count: text.split_whitespace().count(),
            is_question: text.trim_end().ends_with('?'),
            timestamp: Utc::now(),
        }
    }

    pub fn child(text: &str, topic: &str, engagement: u8, sentiment: Sentiment) -> Self {
        Self::new(Speaker::Child, text, topic, engagement, sentiment)
    }

    pub fn ai(text: &str, topic: &str) -> Self {
        Self::new(Speaker::Ai, text, topic, 5, Sentiment::Neutral)
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn is_child(&self) -> bool {
        self.speaker == Speaker::Child
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngagementLevel {
    Low,
    Medium,
    High,
}

impl EngagementLevel {
    pub fn from_score(score: f64) -> Self {
        if score >= 7.0 {
            EngagementLevel::High
        } else if score >= 4.0 {
            EngagementLevel::Medium
        } else {
            EngagementLevel::Low
        }
    }

    /// Representative 1-10 score for this level
    pub fn as_score(&self) -> f64 {
        match self {
            EngagementLevel::Low => 3.0,
            EngagementLevel::Medium => 5.5,
            EngagementLevel::High => 8.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mood {
    Happy,
    Excited,
    Calm,
    Neutral,
    Tired,
    Sad,
    Frustrated,
    Anxious,
}

impl Mood {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mood::Happy => "happy",
            Mood::Excited => "excited",
            Mood::Calm => "calm",
            Mood::Neutral => "neutral",
            Mood::Tired => "tired",
            Mood::Sad => "sad",
            Mood::Frustrated => "frustrated",
            Mood::Anxious => "anxious",
        }
    }

    /// Moods in which a parent nudge would feel intrusive
    pub fn is_distressed(&self) -> bool {
        matches!(self, Mood::Sad | Mood::Frustrated | Mood::Anxious)
    }
}

/// Per-turn conversation state supplied by the chat handler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationContext {
    pub child_id: String,
    pub child_age: u8,
    pub current_persona_id: String,
    pub current_topic: Option<String>,
    pub engagement_level: EngagementLevel,
    pub child_mood: Mood,
    pub energy_level: u8, // 1-10
    pub message_count: usize,
    pub session_started_at: DateTime<Utc>,
    pub recent_topics: Vec<String>,
}

impl ConversationContext {
    pub fn new(child_id: &str, child_age: u8, persona_id: &str) -> Self {
        Self {
            child_id: child_id.to_string(),
            child_age,
            current_persona_id: persona_id.to_string(),
            current_topic: None,
            engagement_level: EngagementLevel::Medium,
            child_mood: Mood::Neutral,
            energy_level: 5,
            message_count: 0,
            session_started_at: Utc::now(),
            recent_topics: Vec::new(),
        }
    }

    pub fn session_minutes(&self, now: DateTime<Utc>) -> f64 {
        ((now - self.session_started_at).num_seconds().max(0) as f64) / 60.0
    }
}

/// Last `n` messages, oldest first
pub fn recent_window(messages: &[ConversationMessage], n: usize) -> &[ConversationMessage] {
    let start = messages.len().saturating_sub(n);
    &messages[start..]
}

/// Mean engagement of the given messages, or `None` when empty
pub fn average_engagement<'a, I>(messages: I) -> Option<f64>
where
    I: IntoIterator<Item = &'a ConversationMessage>,
{
    let (sum, count) = messages
        .into_iter()
        .fold((0.0, 0usize), |(s, c), m| (s + m.engagement as f64, c + 1));
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}

/// Lowercase and strip apostrophes so "don't" and "dont" match the same phrase
pub fn normalize_text(text: &str) -> String {
    text.to_lowercase().replace(['\'', '\u{2019}'], "")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_message_derives_counts() {
        let m = ConversationMessage::child("Why is the sky blue?", "nature", 12, Sentiment::Neutral);
        assert_eq!(m.word_count, 5);
        assert!(m.is_question);
        assert_eq!(m.engagement, 10);
        assert!(m.is_child());
    }

    #[test]
    fn recent_window_takes_tail() {
        let messages: Vec<_> = (0..15)
            .map(|i| ConversationMessage::child(&format!("m{}", i), "general", 5, Sentiment::Neutral))
            .collect();
        let window = recent_window(&messages, 10);
        assert_eq!(window.len(), 10);
        assert_eq!(window[0].text, "m5");
        assert_eq!(recent_window(&messages[..3], 10).len(), 3);
    }

    #[test]
    fn normalize_strips_apostrophes() {
        assert_eq!(normalize_text("I Don't Know"), "i dont know");
        assert_eq!(normalize_text("I don\u{2019}t know"), "i dont know");
    }

    #[test]
    fn engagement_level_bands() {
        assert_eq!(EngagementLevel::from_score(8.5), EngagementLevel::High);
        assert_eq!(EngagementLevel::from_score(5.0), EngagementLevel::Medium);
        assert_eq!(EngagementLevel::from_score(2.0), EngagementLevel::Low);
    }
}
