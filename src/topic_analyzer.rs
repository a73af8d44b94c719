//! Topic detection, transition signals, saturation and bridge readiness
//!
//! Everything here is a pure function of the supplied messages. The public
//! entry point never fails: internal errors fall back to a neutral analysis.

use crate::error::{CompanionError, Result};
use crate::logging;
use crate::topics::{
    self, AgeBand, CONTEXT_MATCH_SCORE, GENERAL_TOPIC, PRIMARY_MATCH_SCORE, SECONDARY_MATCH_SCORE,
    TOPIC_KEYWORD_TABLES,
};
use crate::types::{average_engagement, normalize_text, recent_window, ConversationMessage, Sentiment};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Messages considered for topic scoring
pub const ANALYSIS_WINDOW: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionSignalType {
    TopicExhaustion,
    NaturalPause,
    QuestionBridge,
    InterestShift,
    EnergyChange,
}

impl TransitionSignalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionSignalType::TopicExhaustion => "topic_exhaustion",
            TransitionSignalType::NaturalPause => "natural_pause",
            TransitionSignalType::QuestionBridge => "question_bridge",
            TransitionSignalType::InterestShift => "interest_shift",
            TransitionSignalType::EnergyChange => "energy_change",
        }
    }

    pub fn base_score(&self) -> f64 {
        match self {
            TransitionSignalType::TopicExhaustion => 6.0,
            TransitionSignalType::NaturalPause => 4.0,
            TransitionSignalType::QuestionBridge => 5.0,
            TransitionSignalType::InterestShift => 7.0,
            TransitionSignalType::EnergyChange => 5.0,
        }
    }

    fn phrases(&self) -> &'static [&'static str] {
        match self {
            TransitionSignalType::TopicExhaustion => &[
                "i dont know", "idk", "whatever", "i guess", "not really", "nothing much", "same as always",
            ],
            TransitionSignalType::NaturalPause => &[
                "anyway", "so yeah", "thats it", "okay", "ok cool", "hmm", "well",
            ],
            TransitionSignalType::QuestionBridge => &[
                "what about", "do you like", "have you ever", "what do you think", "can i ask",
            ],
            TransitionSignalType::InterestShift => &[
                "can we talk about", "guess what", "oh and", "that reminds me", "i want to tell you", "something else",
            ],
            TransitionSignalType::EnergyChange => &[
                "im bored", "im tired", "boring", "sleepy", "this is fun", "so cool", "awesome",
            ],
        }
    }

    pub const ALL: [TransitionSignalType; 5] = [
        TransitionSignalType::TopicExhaustion,
        TransitionSignalType::NaturalPause,
        TransitionSignalType::QuestionBridge,
        TransitionSignalType::InterestShift,
        TransitionSignalType::EnergyChange,
    ];
}

/// Phrases that signal more strongly than their category's base score
const PHRASE_SCORE_OVERRIDES: &[(&str, f64)] = &[
    ("i dont know", 8.0),
    ("idk", 7.5),
    ("whatever", 7.0),
    ("anyway", 6.0),
    ("can we talk about", 9.0),
    ("guess what", 8.0),
    ("im bored", 8.0),
    ("boring", 7.0),
    ("what do you think", 6.0),
];

fn phrase_score(kind: TransitionSignalType, phrase: &str) -> f64 {
    PHRASE_SCORE_OVERRIDES
        .iter()
        .find(|(p, _)| *p == phrase)
        .map(|(_, score)| *score)
        .unwrap_or_else(|| kind.base_score())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionSignal {
    pub signal_type: TransitionSignalType,
    pub phrase: String,
    pub message_id: String,
    pub strength: f64, // 0-10
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmotionalState {
    Excited,
    Happy,
    Neutral,
    Tired,
    Worried,
    Sad,
    Frustrated,
}

/// Analyzer output for one turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextAnalysis {
    pub current_topic: String,
    pub topic_confidence: f64, // 0-10
    pub emotional_state: EmotionalState,
    pub engagement_level: u8,  // 1-10
    pub bridge_readiness: u8,  // 1-10
    pub topic_saturation: u8,  // 1-10
    pub transition_signals: Vec<TransitionSignalType>,
    pub related_topics: Vec<String>,
    pub topic_scores: HashMap<String, f64>,
}

impl Default for ContextAnalysis {
    fn default() -> Self {
        Self {
            current_topic: GENERAL_TOPIC.to_string(),
            topic_confidence: 0.0,
            emotional_state: EmotionalState::Neutral,
            engagement_level: 5,
            bridge_readiness: 5,
            topic_saturation: 1,
            transition_signals: Vec::new(),
            related_topics: Vec::new(),
            topic_scores: HashMap::new(),
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct TopicAnalyzer;

impl TopicAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Analyze the recent conversation. Never fails; falls back to
    /// `ContextAnalysis::default()` on error.
    pub fn analyze_conversation_context(&self, messages: &[ConversationMessage], child_age: u8) -> ContextAnalysis {
        match self.try_analyze(messages, child_age) {
            Ok(analysis) => {
                logging::log_topic(None, &format!(
                    "topic={} confidence={:.1} engagement={} readiness={} saturation={} signals={}",
                    analysis.current_topic,
                    analysis.topic_confidence,
                    analysis.engagement_level,
                    analysis.bridge_readiness,
                    analysis.topic_saturation,
                    analysis.transition_signals.len()
                ));
                analysis
            }
            Err(e) => {
                logging::log_error(None, &format!("Topic analysis fell back to defaults: {}", e));
                ContextAnalysis::default()
            }
        }
    }

    fn try_analyze(&self, messages: &[ConversationMessage], child_age: u8) -> Result<ContextAnalysis> {
        if messages.is_empty() {
            return Err(CompanionError::validation("no messages to analyze"));
        }
        if child_age == 0 {
            return Err(CompanionError::validation("child age must be positive"));
        }

        let window = recent_window(messages, ANALYSIS_WINDOW);
        let topic_scores = self.score_topics(window, child_age);

        let total: f64 = topic_scores.values().sum();
        let (current_topic, best) = topic_scores
            .iter()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(t, s)| (t.clone(), *s))
            .filter(|(_, s)| *s > 0.0)
            .unwrap_or_else(|| (GENERAL_TOPIC.to_string(), 0.0));

        let topic_confidence = if total > 0.0 {
            ((best / total) * 10.0).clamp(0.0, 10.0)
        } else {
            0.0
        };

        let child_messages: Vec<&ConversationMessage> = window.iter().filter(|m| m.is_child()).collect();
        let latest_child = child_messages.last().copied();

        let engagement_level = average_engagement(child_messages.iter().rev().take(5).copied())
            .map(|avg| avg.round().clamp(1.0, 10.0) as u8)
            .unwrap_or(5);

        let bridge_readiness = latest_child.map(assess_bridge_readiness).unwrap_or(5);
        let emotional_state = latest_child.map(detect_emotional_state).unwrap_or(EmotionalState::Neutral);

        // Saturation of the topic the messages themselves are tagged with
        let saturation_topic = latest_child
            .map(|m| m.topic.clone())
            .unwrap_or_else(|| current_topic.clone());
        let topic_saturation = calculate_topic_saturation(messages, &saturation_topic);

        let mut transition_signals: Vec<TransitionSignalType> = Vec::new();
        for signal in detect_transition_signals(window) {
            if !transition_signals.contains(&signal.signal_type) {
                transition_signals.push(signal.signal_type);
            }
        }

        let related_topics = topics::find_topic(&current_topic)
            .map(|t| t.bridgeable_to.clone())
            .unwrap_or_default();

        Ok(ContextAnalysis {
            current_topic,
            topic_confidence,
            emotional_state,
            engagement_level,
            bridge_readiness,
            topic_saturation,
            transition_signals,
            related_topics,
            topic_scores,
        })
    }

    /// Weighted keyword score per topic; newer messages count more
    fn score_topics(&self, window: &[ConversationMessage], child_age: u8) -> HashMap<String, f64> {
        let band = AgeBand::from_age(child_age);
        let n = window.len().max(1) as f64;
        let mut scores: HashMap<String, f64> = TOPIC_KEYWORD_TABLES
            .iter()
            .map(|t| (t.topic_id.to_string(), 0.0))
            .collect();

        for (i, message) in window.iter().enumerate() {
            let text = normalize_text(&message.text);
            let recency = 0.5 + 0.5 * (i as f64 + 1.0) / n;

            for table in TOPIC_KEYWORD_TABLES {
                let raw = topics::count_matches(&text, table.primary) as f64 * PRIMARY_MATCH_SCORE
                    + topics::count_matches(&text, table.secondary) as f64 * SECONDARY_MATCH_SCORE
                    + topics::count_matches(&text, table.context) as f64 * CONTEXT_MATCH_SCORE;
                if raw > 0.0 {
                    if let Some(score) = scores.get_mut(table.topic_id) {
                        *score += raw * table.weight * table.age_multiplier(band) * recency;
                    }
                }
            }
        }

        scores
    }
}

/// Find transition phrases in child messages, strongest first
pub fn detect_transition_signals(messages: &[ConversationMessage]) -> Vec<TransitionSignal> {
    let n = messages.len().max(1) as f64;
    let mut signals = Vec::new();

    for (i, message) in messages.iter().enumerate() {
        if !message.is_child() {
            continue;
        }
        let text = normalize_text(&message.text);
        let recency = 0.9 + 0.3 * (i as f64 + 1.0) / n;

        for kind in TransitionSignalType::ALL {
            for phrase in kind.phrases() {
                if !topics::contains_term(&text, phrase) {
                    continue;
                }
                let mut adjustment = 0.0;
                if message.engagement <= 3
                    && matches!(kind, TransitionSignalType::TopicExhaustion | TransitionSignalType::EnergyChange)
                {
                    adjustment += 1.0;
                }
                if message.engagement >= 8 {
                    adjustment -= 0.5;
                }

                let strength = ((phrase_score(kind, phrase) + adjustment) * recency).clamp(0.0, 10.0);
                signals.push(TransitionSignal {
                    signal_type: kind,
                    phrase: phrase.to_string(),
                    message_id: message.id.clone(),
                    strength,
                });
            }
        }
    }

    signals.sort_by(|a, b| b.strength.partial_cmp(&a.strength).unwrap_or(std::cmp::Ordering::Equal));
    signals
}

/// How tired the child seems of `topic`, 1-10
pub fn calculate_topic_saturation(messages: &[ConversationMessage], topic: &str) -> u8 {
    let tagged: Vec<&ConversationMessage> = messages
        .iter()
        .filter(|m| m.topic.eq_ignore_ascii_case(topic))
        .collect();

    if tagged.len() < 2 {
        return 1;
    }

    let mid = tagged.len() / 2;
    let first = average_engagement(tagged[..mid].iter().copied()).unwrap_or(5.0);
    let second = average_engagement(tagged[mid..].iter().copied()).unwrap_or(5.0);
    let decline = (first - second).max(0.0);
    let duration = (tagged.len() as f64 / 4.0).min(3.0);

    (1.0 + decline * 1.5 + duration).round().clamp(1.0, 10.0) as u8
}

/// How open the child is to a change of topic, judged from one message
pub fn assess_bridge_readiness(message: &ConversationMessage) -> u8 {
    let mut readiness: i32 = 5;

    if message.engagement >= 7 {
        readiness += 2;
    } else if message.engagement <= 3 {
        readiness -= 2;
    }

    if message.is_question {
        readiness += 1;
    }

    if message.word_count >= 8 {
        readiness += 1;
    } else if message.word_count <= 2 {
        readiness -= 1;
    }

    match message.sentiment {
        Sentiment::Positive => readiness += 1,
        Sentiment::Negative => readiness -= 2,
        Sentiment::Neutral => {}
    }

    readiness.clamp(1, 10) as u8
}

fn detect_emotional_state(message: &ConversationMessage) -> EmotionalState {
    let text = normalize_text(&message.text);
    let has = |words: &[&str]| words.iter().any(|w| topics::contains_term(&text, w));

    if has(&["awesome", "amazing", "so cool", "cant wait", "yay"]) || (text.contains('!') && message.engagement >= 8) {
        EmotionalState::Excited
    } else if has(&["sad", "cry", "crying", "miss", "lonely"]) {
        EmotionalState::Sad
    } else if has(&["angry", "mad", "unfair", "hate", "annoying"]) {
        EmotionalState::Frustrated
    } else if has(&["worried", "scared", "nervous", "afraid"]) {
        EmotionalState::Worried
    } else if has(&["tired", "sleepy", "im bored", "boring"]) {
        EmotionalState::Tired
    } else {
        match message.sentiment {
            Sentiment::Positive => EmotionalState::Happy,
            Sentiment::Negative => EmotionalState::Sad,
            Sentiment::Neutral => EmotionalState::Neutral,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn child(text: &str, topic: &str, engagement: u8) -> ConversationMessage {
        ConversationMessage::child(text, topic, engagement, Sentiment::Neutral)
    }

    #[test]
    fn detects_school_topic() {
        let messages = vec![
            child("my teacher gave us so much homework", "school", 6),
            ConversationMessage::ai("Oh no, what subject is it?", "school"),
            child("math and reading for the test tomorrow", "school", 6),
        ];
        let analysis = TopicAnalyzer::new().analyze_conversation_context(&messages, 9);
        assert_eq!(analysis.current_topic, "school");
        assert!(analysis.topic_confidence > 5.0, "{:?}", analysis);
        assert!(analysis.related_topics.contains(&"friends".to_string()));
    }

    #[test]
    fn confidence_is_best_share_of_total() {
        let analyzer = TopicAnalyzer::new();

        let single = analyzer.analyze_conversation_context(&[child("my dog", "nature", 5)], 7);
        assert_eq!(single.current_topic, "nature");
        assert!((single.topic_confidence - 10.0).abs() < 1e-9, "{:?}", single);

        // nature 3 * 1.0 * 1.2, family 3 * 0.9 * 1.2
        let mixed = analyzer.analyze_conversation_context(&[child("my dog and my mom", "nature", 5)], 7);
        assert_eq!(mixed.current_topic, "nature");
        let expected = 3.6 / (3.6 + 3.24) * 10.0;
        assert!((mixed.topic_confidence - expected).abs() < 1e-9, "{:?}", mixed);
    }

    #[test]
    fn empty_input_returns_default() {
        let analysis = TopicAnalyzer::new().analyze_conversation_context(&[], 9);
        assert_eq!(analysis.current_topic, GENERAL_TOPIC);
        assert_eq!(analysis.bridge_readiness, 5);
        assert_eq!(analysis.topic_saturation, 1);
    }

    #[test]
    fn unmatched_text_is_general() {
        let messages = vec![child("blorp zzz", "general", 5)];
        let analysis = TopicAnalyzer::new().analyze_conversation_context(&messages, 7);
        assert_eq!(analysis.current_topic, GENERAL_TOPIC);
        assert_eq!(analysis.topic_confidence, 0.0);
    }

    #[test]
    fn i_dont_know_is_strong_exhaustion() {
        let messages = vec![child("I don't know", "school", 5)];
        let signals = detect_transition_signals(&messages);
        let exhaustion = signals
            .iter()
            .find(|s| s.signal_type == TransitionSignalType::TopicExhaustion)
            .expect("exhaustion signal");
        assert!(exhaustion.strength > TransitionSignalType::TopicExhaustion.base_score());
    }

    #[test]
    fn signals_sorted_and_child_only() {
        let messages = vec![
            ConversationMessage::ai("anyway, guess what", "general"),
            child("hmm okay", "general", 5),
            child("can we talk about dinosaurs", "general", 7),
        ];
        let signals = detect_transition_signals(&messages);
        assert!(!signals.is_empty());
        assert!(signals.windows(2).all(|w| w[0].strength >= w[1].strength));
        assert_eq!(signals[0].signal_type, TransitionSignalType::InterestShift);
        assert!(signals.iter().all(|s| s.message_id != messages[0].id));
    }

    #[test]
    fn declining_engagement_saturates_more() {
        let declining: Vec<_> = [9, 8, 7, 5, 3, 2].iter().map(|e| child("ok", "school", *e)).collect();
        let flat: Vec<_> = [6, 6, 6, 6, 6, 6].iter().map(|e| child("ok", "school", *e)).collect();
        let rising: Vec<_> = [2, 3, 5, 7, 8, 9].iter().map(|e| child("ok", "school", *e)).collect();
        let d = calculate_topic_saturation(&declining, "school");
        assert!(d > calculate_topic_saturation(&flat, "school"));
        assert!(d > calculate_topic_saturation(&rising, "school"));
        assert_eq!(calculate_topic_saturation(&flat[..1], "school"), 1);
        assert_eq!(calculate_topic_saturation(&flat, "nature"), 1);
    }

    #[test]
    fn bridge_readiness_bounds() {
        let eager = ConversationMessage::child(
            "Can you tell me more about how volcanoes work please?",
            "nature",
            9,
            Sentiment::Positive,
        );
        assert_eq!(assess_bridge_readiness(&eager), 10);

        let flat = ConversationMessage::child("no", "school", 1, Sentiment::Negative);
        assert_eq!(assess_bridge_readiness(&flat), 1);
    }

    #[test]
    fn emotional_state_from_keywords() {
        let messages = vec![child("I feel sad because I miss my friend", "feelings", 4)];
        let analysis = TopicAnalyzer::new().analyze_conversation_context(&messages, 8);
        assert_eq!(analysis.emotional_state, EmotionalState::Sad);
        assert_eq!(analysis.current_topic, "feelings");
    }
}
