//! Conversation flow intelligence
//!
//! Second heuristic pass over the conversation: engagement trend, flow
//! quality, active patterns and per-child rhythm. Decides whether a parent
//! nudge should be attempted now, later, or not at all.

use crate::config::FlowConfig;
use crate::error::{CompanionError, Result};
use crate::logging;
use crate::nudge::{NudgeUrgency, ParentNudgeRequest};
use crate::topic_analyzer::{self, TransitionSignalType, ANALYSIS_WINDOW};
use crate::topics::{self, TopicDifficulty};
use crate::types::{
    average_engagement, normalize_text, recent_window, ConversationContext, ConversationMessage, EngagementLevel,
    Speaker,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

// ============ Flow Analysis ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngagementTrend {
    Rising,
    Stable,
    Declining,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowQuality {
    Excellent,
    Good,
    Choppy,
    Declining,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowAnalysis {
    pub engagement_trend: EngagementTrend,
    pub flow_quality: FlowQuality,
    pub average_engagement: f64,
    pub topic_stability: f64, // 0-1
    pub has_natural_pause: bool,
    pub bridge_readiness: u8,
    pub topic_saturation: u8,
    pub current_topic: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NudgeTiming {
    Immediate,
    NextNaturalPause,
    AfterCurrentTopic,
    Later,
    NotSuitable,
}

impl NudgeTiming {
    pub fn as_str(&self) -> &'static str {
        match self {
            NudgeTiming::Immediate => "immediate",
            NudgeTiming::NextNaturalPause => "next_natural_pause",
            NudgeTiming::AfterCurrentTopic => "after_current_topic",
            NudgeTiming::Later => "later",
            NudgeTiming::NotSuitable => "not_suitable",
        }
    }

    /// Messages to wait before trying again
    pub fn suggested_wait_messages(&self) -> Option<usize> {
        match self {
            NudgeTiming::Immediate => Some(0),
            NudgeTiming::NextNaturalPause => Some(2),
            NudgeTiming::AfterCurrentTopic => Some(4),
            NudgeTiming::Later => Some(8),
            NudgeTiming::NotSuitable => None,
        }
    }
}

/// How to get from the current topic to the nudge target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeHint {
    pub from_topic: String,
    pub to_topic: String,
    pub via_topic: Option<String>,
    pub difficulty: TopicDifficulty,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimalTimingResult {
    pub should_attempt: bool,
    pub confidence: u8, // 0-10, 0 only for the declined fallback
    pub timing: NudgeTiming,
    pub reasoning: Vec<String>,
    pub matched_patterns: Vec<String>,
    pub suggested_wait_messages: Option<usize>,
    pub bridge_hint: Option<BridgeHint>,
    pub flow: Option<FlowAnalysis>,
}

impl OptimalTimingResult {
    /// Safe fallback when timing analysis fails
    pub fn declined(reason: &str) -> Self {
        Self {
            should_attempt: false,
            confidence: 0,
            timing: NudgeTiming::NotSuitable,
            reasoning: vec![reason.to_string()],
            matched_patterns: Vec::new(),
            suggested_wait_messages: None,
            bridge_hint: None,
            flow: None,
        }
    }
}

// ============ Flow Patterns ============

#[derive(Debug, Clone, Serialize)]
pub struct FlowPattern {
    pub id: &'static str,
    pub name: &'static str,
    pub min_age: u8,
    pub max_age: u8,
    pub min_messages: usize,
    pub max_messages: usize,
    pub keywords: &'static [&'static str],
    /// Historical share of nudges that landed well during this pattern
    pub success_rate: f64,
}

pub static FLOW_PATTERNS: &[FlowPattern] = &[
    FlowPattern {
        id: "story_time",
        name: "Story Time",
        min_age: 4,
        max_age: 9,
        min_messages: 2,
        max_messages: 40,
        keywords: &["story", "once", "then", "happened", "remember", "yesterday", "and then", "today"],
        success_rate: 0.82,
    },
    FlowPattern {
        id: "curious_explorer",
        name: "Curious Explorer",
        min_age: 6,
        max_age: 13,
        min_messages: 3,
        max_messages: 50,
        keywords: &["why", "how", "what", "wonder", "curious", "learn", "know"],
        success_rate: 0.78,
    },
    FlowPattern {
        id: "excited_sharing",
        name: "Excited Sharing",
        min_age: 5,
        max_age: 14,
        min_messages: 1,
        max_messages: 30,
        keywords: &["guess what", "awesome", "cool", "love", "favorite", "best", "fun"],
        success_rate: 0.74,
    },
    FlowPattern {
        id: "winding_down",
        name: "Winding Down",
        min_age: 4,
        max_age: 16,
        min_messages: 10,
        max_messages: 200,
        keywords: &["tired", "bye", "later", "bed", "sleepy", "goodnight", "done"],
        success_rate: 0.35,
    },
];

const PATTERN_KEYWORD_SHARE: f64 = 0.3;
const HIGH_SUCCESS_PATTERN: f64 = 0.75;

/// Patterns active in the recent conversation, best success rate first
pub fn detect_active_patterns(messages: &[ConversationMessage], child_age: u8) -> Vec<&'static FlowPattern> {
    let text = recent_window(messages, ANALYSIS_WINDOW)
        .iter()
        .map(|m| normalize_text(&m.text))
        .collect::<Vec<_>>()
        .join(" ");

    let mut matches: Vec<&'static FlowPattern> = FLOW_PATTERNS
        .iter()
        .filter(|p| child_age >= p.min_age && child_age <= p.max_age)
        .filter(|p| messages.len() >= p.min_messages && messages.len() <= p.max_messages)
        .filter(|p| {
            let hits = topics::count_matches(&text, p.keywords);
            hits as f64 / p.keywords.len() as f64 >= PATTERN_KEYWORD_SHARE
        })
        .collect();

    matches.sort_by(|a, b| b.success_rate.partial_cmp(&a.success_rate).unwrap_or(std::cmp::Ordering::Equal));
    matches
}

// ============ Conversation Rhythm ============

/// Learned per-child timing profile
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationRhythm {
    pub average_response_secs: f64,
    pub typical_message_words: f64,
    pub attention_span_minutes: f64,
    /// Relative engagement across the four quarters of the attention span
    pub attention_curve: [f64; 4],
    pub samples: u32,
    pub updated_at: DateTime<Utc>,
}

impl ConversationRhythm {
    pub fn for_age(age: u8) -> Self {
        Self {
            average_response_secs: 20.0,
            typical_message_words: 6.0,
            attention_span_minutes: (age as f64 * 2.0 + 5.0).clamp(10.0, 40.0),
            attention_curve: [1.0, 0.9, 0.7, 0.4],
            samples: 0,
            updated_at: Utc::now(),
        }
    }

    fn curve_at(&self, progress: f64) -> f64 {
        let idx = ((progress.clamp(0.0, 0.999)) * 4.0) as usize;
        self.attention_curve[idx.min(3)]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NudgeWindow {
    pub in_messages: usize,
    pub in_minutes: f64,
    pub confidence: f64, // 0-10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrajectoryPrediction {
    pub estimated_remaining_minutes: f64,
    pub attention_remaining: f64, // 0-1
    pub expected_remaining_messages: usize,
    pub nudge_windows: Vec<NudgeWindow>,
}

// ============ Flow Intelligence ============

pub struct ConversationFlowIntelligence {
    config: FlowConfig,
    rhythms: Mutex<HashMap<String, ConversationRhythm>>,
}

impl ConversationFlowIntelligence {
    pub fn new(config: FlowConfig) -> Self {
        Self {
            config,
            rhythms: Mutex::new(HashMap::new()),
        }
    }

    /// Decide whether and when to attempt a nudge. Never fails; falls back to
    /// a declined result on error.
    pub fn analyze_optimal_timing(
        &self,
        nudge: &ParentNudgeRequest,
        context: &ConversationContext,
        recent_messages: &[ConversationMessage],
    ) -> OptimalTimingResult {
        match self.try_optimal_timing(nudge, context, recent_messages) {
            Ok(result) => {
                logging::log_flow(Some(&context.child_id), &format!(
                    "nudge={} confidence={} timing={} attempt={}",
                    nudge.id,
                    result.confidence,
                    result.timing.as_str(),
                    result.should_attempt
                ));
                result
            }
            Err(e) => {
                logging::log_error(Some(&context.child_id), &format!("Timing analysis failed: {}", e));
                OptimalTimingResult::declined("timing analysis unavailable")
            }
        }
    }

    fn try_optimal_timing(
        &self,
        nudge: &ParentNudgeRequest,
        context: &ConversationContext,
        recent_messages: &[ConversationMessage],
    ) -> Result<OptimalTimingResult> {
        if context.child_id.is_empty() {
            return Err(CompanionError::validation("context has no child id"));
        }
        if nudge.child_id != context.child_id {
            return Err(CompanionError::validation(format!(
                "nudge {} belongs to another child",
                nudge.id
            )));
        }

        let flow = self.analyze_flow(context, recent_messages);
        let patterns = detect_active_patterns(recent_messages, context.child_age);
        let mut reasoning = Vec::new();
        let mut confidence: i32 = 5;

        if nudge.urgency == NudgeUrgency::Immediate {
            confidence += 3;
            reasoning.push("Parent marked this immediate".to_string());
        }

        match flow.flow_quality {
            FlowQuality::Excellent => {
                confidence += 2;
                reasoning.push("Conversation is flowing well".to_string());
            }
            FlowQuality::Declining => {
                confidence -= 2;
                reasoning.push("Conversation flow is declining".to_string());
            }
            _ => {}
        }

        match flow.engagement_trend {
            EngagementTrend::Rising => {
                confidence += 1;
                reasoning.push("Engagement is rising".to_string());
            }
            EngagementTrend::Declining => {
                confidence -= 1;
                reasoning.push("Engagement is dropping".to_string());
            }
            EngagementTrend::Stable => {}
        }

        if flow.bridge_readiness >= 8 {
            confidence += 2;
            reasoning.push(format!("Child is very open to a new topic ({})", flow.bridge_readiness));
        } else if flow.bridge_readiness >= 6 {
            confidence += 1;
            reasoning.push(format!("Child is open to a new topic ({})", flow.bridge_readiness));
        } else if flow.bridge_readiness <= 3 {
            confidence -= 2;
            reasoning.push(format!("Child is absorbed or withdrawn ({})", flow.bridge_readiness));
        }

        if flow.has_natural_pause {
            confidence += 1;
            reasoning.push("Natural pause detected".to_string());
        }

        if patterns.iter().any(|p| p.success_rate >= HIGH_SUCCESS_PATTERN) {
            confidence += 1;
            reasoning.push(format!("Favorable pattern: {}", patterns[0].name));
        }

        let confidence = confidence.clamp(1, 10) as u8;
        let threshold = self.config.attempt_threshold;

        let timing = if context.child_mood.is_distressed() && nudge.urgency != NudgeUrgency::Immediate {
            reasoning.push(format!("Child seems {}; not the moment", context.child_mood.as_str()));
            NudgeTiming::NotSuitable
        } else if confidence >= 8 || (nudge.urgency == NudgeUrgency::Immediate && confidence >= threshold) {
            NudgeTiming::Immediate
        } else if confidence >= threshold {
            NudgeTiming::NextNaturalPause
        } else if flow.topic_saturation >= 7 {
            NudgeTiming::AfterCurrentTopic
        } else {
            NudgeTiming::Later
        };

        let current_topic = flow
            .current_topic
            .clone()
            .unwrap_or_else(|| topics::GENERAL_TOPIC.to_string());

        Ok(OptimalTimingResult {
            should_attempt: confidence >= threshold && timing != NudgeTiming::NotSuitable,
            confidence,
            timing,
            reasoning,
            matched_patterns: patterns.iter().map(|p| p.id.to_string()).collect(),
            suggested_wait_messages: timing.suggested_wait_messages(),
            bridge_hint: bridge_hint(&current_topic, &nudge.target_topic),
            flow: Some(flow),
        })
    }

    /// Trend, quality and readiness of the current conversation
    pub fn analyze_flow(&self, context: &ConversationContext, messages: &[ConversationMessage]) -> FlowAnalysis {
        let window = recent_window(messages, ANALYSIS_WINDOW);
        let child: Vec<&ConversationMessage> = window.iter().filter(|m| m.is_child()).collect();

        let (engagement_trend, avg) = if child.len() >= 2 {
            (engagement_trend(&child), average_engagement(child.iter().copied()).unwrap_or(5.0))
        } else {
            (EngagementTrend::Stable, context.engagement_level.as_score())
        };

        let topic_stability = topic_stability(&child);

        let flow_quality = if child.len() < 2 {
            match context.engagement_level {
                EngagementLevel::Low => FlowQuality::Choppy,
                _ => FlowQuality::Good,
            }
        } else if avg >= 7.0 && topic_stability >= 0.6 && engagement_trend != EngagementTrend::Declining {
            FlowQuality::Excellent
        } else if (engagement_trend == EngagementTrend::Declining && avg < 5.0) || avg < 4.0 {
            FlowQuality::Declining
        } else if topic_stability < 0.4 {
            FlowQuality::Choppy
        } else {
            FlowQuality::Good
        };

        let has_natural_pause = topic_analyzer::detect_transition_signals(window)
            .iter()
            .any(|s| s.signal_type == TransitionSignalType::NaturalPause);

        let bridge_readiness = child
            .last()
            .copied()
            .map(topic_analyzer::assess_bridge_readiness)
            .unwrap_or(match context.engagement_level {
                EngagementLevel::High => 7,
                EngagementLevel::Medium => 5,
                EngagementLevel::Low => 3,
            });

        let current_topic = child
            .last()
            .map(|m| m.topic.clone())
            .or_else(|| context.current_topic.clone());

        let topic_saturation = current_topic
            .as_deref()
            .map(|t| topic_analyzer::calculate_topic_saturation(messages, t))
            .unwrap_or(1);

        FlowAnalysis {
            engagement_trend,
            flow_quality,
            average_engagement: avg,
            topic_stability,
            has_natural_pause,
            bridge_readiness,
            topic_saturation,
            current_topic,
        }
    }

    /// Project the rest of the session from the child's learned rhythm
    pub fn predict_conversation_trajectory(
        &self,
        child_id: &str,
        context: &ConversationContext,
        messages: &[ConversationMessage],
    ) -> TrajectoryPrediction {
        let rhythm = self.rhythm_for(child_id, context.child_age);
        let now = messages.last().map(|m| m.timestamp).unwrap_or_else(Utc::now).max(Utc::now());
        let elapsed = context.session_minutes(now);

        let engagement_factor = context.engagement_level.as_score() / EngagementLevel::Medium.as_score();
        let span = rhythm.attention_span_minutes * engagement_factor;
        let remaining = (span - elapsed).max(0.0);
        let attention_remaining = if span > 0.0 { (remaining / span).clamp(0.0, 1.0) } else { 0.0 };

        // One exchange is a child turn plus a reply
        let minutes_per_exchange = (rhythm.average_response_secs * 2.0 / 60.0).max(0.1);
        let expected_remaining_messages = (remaining / minutes_per_exchange).floor() as usize;

        let mut nudge_windows = Vec::new();
        for fraction in [0.25, 0.5] {
            let in_messages = (expected_remaining_messages as f64 * fraction).round() as usize;
            if in_messages == 0 {
                continue;
            }
            let in_minutes = in_messages as f64 * minutes_per_exchange;
            let progress = if span > 0.0 { (elapsed + in_minutes) / span } else { 1.0 };
            nudge_windows.push(NudgeWindow {
                in_messages,
                in_minutes,
                confidence: (rhythm.curve_at(progress) * 10.0).clamp(0.0, 10.0),
            });
        }

        TrajectoryPrediction {
            estimated_remaining_minutes: remaining,
            attention_remaining,
            expected_remaining_messages,
            nudge_windows,
        }
    }

    /// Blend one session's observations into the child's rhythm (EMA)
    pub fn update_conversation_rhythm(
        &self,
        child_id: &str,
        child_age: u8,
        messages: &[ConversationMessage],
        session_minutes: f64,
    ) -> ConversationRhythm {
        let alpha = self.config.ema_alpha;
        let blend = |old: f64, new: f64| old * (1.0 - alpha) + new * alpha;

        let mut rhythms = self.rhythms.lock().unwrap_or_else(PoisonError::into_inner);
        let rhythm = rhythms
            .entry(child_id.to_string())
            .or_insert_with(|| ConversationRhythm::for_age(child_age));

        // Child response time: gap between an AI turn and the child's reply
        let gaps: Vec<f64> = messages
            .windows(2)
            .filter(|w| w[0].speaker == Speaker::Ai && w[1].speaker == Speaker::Child)
            .map(|w| (w[1].timestamp - w[0].timestamp).num_milliseconds() as f64 / 1000.0)
            .filter(|secs| *secs >= 0.0)
            .collect();
        if !gaps.is_empty() {
            let observed = gaps.iter().sum::<f64>() / gaps.len() as f64;
            rhythm.average_response_secs = blend(rhythm.average_response_secs, observed);
        }

        let child: Vec<&ConversationMessage> = messages.iter().filter(|m| m.is_child()).collect();
        if !child.is_empty() {
            let words = child.iter().map(|m| m.word_count as f64).sum::<f64>() / child.len() as f64;
            rhythm.typical_message_words = blend(rhythm.typical_message_words, words);
        }

        if session_minutes > 0.0 {
            rhythm.attention_span_minutes = blend(rhythm.attention_span_minutes, session_minutes);
        }

        if child.len() >= 4 {
            let quarter = child.len() / 4;
            for (i, slot) in rhythm.attention_curve.iter_mut().enumerate() {
                let end = if i == 3 { child.len() } else { (i + 1) * quarter };
                let observed = average_engagement(child[i * quarter..end].iter().copied()).unwrap_or(5.0) / 10.0;
                *slot = blend(*slot, observed);
            }
        }

        rhythm.samples += 1;
        rhythm.updated_at = Utc::now();
        rhythm.clone()
    }

    pub fn rhythm_for(&self, child_id: &str, child_age: u8) -> ConversationRhythm {
        self.rhythms
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(child_id)
            .cloned()
            .unwrap_or_else(|| ConversationRhythm::for_age(child_age))
    }

    pub fn reset_rhythm(&self, child_id: &str) {
        self.rhythms
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(child_id);
    }
}

fn engagement_trend(child: &[&ConversationMessage]) -> EngagementTrend {
    let mid = child.len() / 2;
    let first = average_engagement(child[..mid].iter().copied()).unwrap_or(5.0);
    let second = average_engagement(child[mid..].iter().copied()).unwrap_or(5.0);
    let diff = second - first;
    if diff > 0.5 {
        EngagementTrend::Rising
    } else if diff < -0.5 {
        EngagementTrend::Declining
    } else {
        EngagementTrend::Stable
    }
}

/// Share of consecutive child messages that stay on the same topic
fn topic_stability(child: &[&ConversationMessage]) -> f64 {
    if child.len() < 2 {
        return 1.0;
    }
    let same = child
        .windows(2)
        .filter(|w| w[0].topic.eq_ignore_ascii_case(&w[1].topic))
        .count();
    same as f64 / (child.len() - 1) as f64
}

fn bridge_hint(from: &str, to: &str) -> Option<BridgeHint> {
    let target = topics::find_topic(to)?;
    if topics::is_bridgeable(from, to) {
        return Some(BridgeHint {
            from_topic: from.to_string(),
            to_topic: target.id.clone(),
            via_topic: None,
            difficulty: target.difficulty,
        });
    }
    let via = topics::find_topic(from)?
        .bridgeable_to
        .iter()
        .find(|mid| topics::is_bridgeable(mid, to))?;
    Some(BridgeHint {
        from_topic: from.to_string(),
        to_topic: target.id.clone(),
        via_topic: Some(via.clone()),
        difficulty: target.difficulty,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Mood, Sentiment};

    fn nudge(child_id: &str, topic: &str, urgency: NudgeUrgency) -> ParentNudgeRequest {
        ParentNudgeRequest::new(child_id, "parent-1", topic, urgency, "Maybe chat about how the day went", 3)
    }

    fn child(text: &str, topic: &str, engagement: u8) -> ConversationMessage {
        ConversationMessage::child(text, topic, engagement, Sentiment::Positive)
    }

    fn context(mood: Mood, level: EngagementLevel) -> ConversationContext {
        let mut ctx = ConversationContext::new("child-1", 9, "buddy");
        ctx.child_mood = mood;
        ctx.engagement_level = level;
        ctx
    }

    #[test]
    fn immediate_happy_high_engagement_fires_now() {
        let intel = ConversationFlowIntelligence::new(FlowConfig::default());
        let result = intel.analyze_optimal_timing(
            &nudge("child-1", "school", NudgeUrgency::Immediate),
            &context(Mood::Happy, EngagementLevel::High),
            &[],
        );
        assert!(result.should_attempt, "{:?}", result);
        assert_eq!(result.timing, NudgeTiming::Immediate);
        assert!(result.confidence >= 8);
    }

    #[test]
    fn distressed_child_is_not_suitable() {
        let intel = ConversationFlowIntelligence::new(FlowConfig::default());
        let result = intel.analyze_optimal_timing(
            &nudge("child-1", "school", NudgeUrgency::High),
            &context(Mood::Sad, EngagementLevel::High),
            &[],
        );
        assert_eq!(result.timing, NudgeTiming::NotSuitable);
        assert!(!result.should_attempt);
    }

    #[test]
    fn declining_flow_defers() {
        let intel = ConversationFlowIntelligence::new(FlowConfig::default());
        let messages: Vec<_> = [6, 5, 3, 2]
            .iter()
            .map(|e| ConversationMessage::child("no", "school", *e, Sentiment::Negative))
            .collect();
        let result = intel.analyze_optimal_timing(
            &nudge("child-1", "friends", NudgeUrgency::Low),
            &context(Mood::Neutral, EngagementLevel::Low),
            &messages,
        );
        assert!(!result.should_attempt);
        assert_eq!(result.flow.as_ref().unwrap().flow_quality, FlowQuality::Declining);
        assert!(result.confidence < 6);
    }

    #[test]
    fn open_but_not_urgent_waits_for_a_pause() {
        let intel = ConversationFlowIntelligence::new(FlowConfig::default());
        let result = intel.analyze_optimal_timing(
            &nudge("child-1", "school", NudgeUrgency::High),
            &context(Mood::Neutral, EngagementLevel::High),
            &[],
        );
        assert_eq!(result.confidence, 6);
        assert_eq!(result.timing, NudgeTiming::NextNaturalPause);
        assert!(result.should_attempt);
    }

    #[test]
    fn withdrawn_child_without_saturation_is_later() {
        let intel = ConversationFlowIntelligence::new(FlowConfig::default());
        let result = intel.analyze_optimal_timing(
            &nudge("child-1", "school", NudgeUrgency::Low),
            &context(Mood::Neutral, EngagementLevel::Low),
            &[],
        );
        assert_eq!(result.confidence, 3);
        assert_eq!(result.timing, NudgeTiming::Later);
        assert!(!result.should_attempt);
    }

    #[test]
    fn saturated_topic_waits_for_it_to_end() {
        let intel = ConversationFlowIntelligence::new(FlowConfig::default());
        let messages: Vec<_> = [9, 9, 8, 3, 2, 2]
            .iter()
            .map(|e| ConversationMessage::child("we did stuff", "school", *e, Sentiment::Neutral))
            .collect();
        let result = intel.analyze_optimal_timing(
            &nudge("child-1", "friends", NudgeUrgency::Low),
            &context(Mood::Neutral, EngagementLevel::Medium),
            &messages,
        );
        assert_eq!(result.flow.as_ref().unwrap().topic_saturation, 10);
        assert!(result.confidence < 6, "{:?}", result);
        assert_eq!(result.timing, NudgeTiming::AfterCurrentTopic);
        assert!(!result.should_attempt);
    }

    #[test]
    fn mismatched_child_declines() {
        let intel = ConversationFlowIntelligence::new(FlowConfig::default());
        let result = intel.analyze_optimal_timing(
            &nudge("someone-else", "school", NudgeUrgency::Immediate),
            &context(Mood::Happy, EngagementLevel::High),
            &[],
        );
        assert!(!result.should_attempt);
        assert_eq!(result.confidence, 0);
    }

    #[test]
    fn excellent_flow_when_engaged_and_on_topic() {
        let intel = ConversationFlowIntelligence::new(FlowConfig::default());
        let messages = vec![
            child("I love my dog", "nature", 7),
            child("he can do tricks", "nature", 8),
            child("he jumps so high", "nature", 9),
        ];
        let flow = intel.analyze_flow(&context(Mood::Happy, EngagementLevel::High), &messages);
        assert_eq!(flow.flow_quality, FlowQuality::Excellent);
        assert_eq!(flow.engagement_trend, EngagementTrend::Rising);
        assert_eq!(flow.current_topic.as_deref(), Some("nature"));
    }

    #[test]
    fn patterns_filtered_and_sorted() {
        let messages = vec![
            child("guess what, I got the best new game", "hobbies", 9),
            child("it is so fun and awesome", "hobbies", 9),
            child("why do you think dragons fly, how do they know", "hobbies", 8),
        ];
        let found = detect_active_patterns(&messages, 9);
        let ids: Vec<_> = found.iter().map(|p| p.id).collect();
        assert!(ids.contains(&"excited_sharing"));
        assert!(ids.contains(&"curious_explorer"));
        assert!(found.windows(2).all(|w| w[0].success_rate >= w[1].success_rate));
        // winding_down needs at least 10 messages
        assert!(!ids.contains(&"winding_down"));
        // age outside every range
        assert!(detect_active_patterns(&messages, 17).is_empty());
    }

    #[test]
    fn rhythm_updates_with_ema() {
        let intel = ConversationFlowIntelligence::new(FlowConfig::default());
        let start = Utc::now() - chrono::Duration::minutes(10);
        let messages = vec![
            ConversationMessage::ai("How was your day?", "general").at(start),
            child("good", "general", 6).at(start + chrono::Duration::seconds(40)),
        ];
        let before = intel.rhythm_for("child-1", 9);
        let after = intel.update_conversation_rhythm("child-1", 9, &messages, 30.0);
        assert!((after.average_response_secs - (20.0 * 0.9 + 40.0 * 0.1)).abs() < 1e-6);
        assert!((after.attention_span_minutes - (before.attention_span_minutes * 0.9 + 3.0)).abs() < 1e-6);
        assert_eq!(after.samples, 1);

        intel.reset_rhythm("child-1");
        assert_eq!(intel.rhythm_for("child-1", 9).samples, 0);
    }

    #[test]
    fn trajectory_shrinks_as_session_ages() {
        let intel = ConversationFlowIntelligence::new(FlowConfig::default());
        let fresh = context(Mood::Happy, EngagementLevel::Medium);
        let mut old = fresh.clone();
        old.session_started_at = Utc::now() - chrono::Duration::minutes(20);

        let a = intel.predict_conversation_trajectory("child-1", &fresh, &[]);
        let b = intel.predict_conversation_trajectory("child-1", &old, &[]);
        assert!(a.estimated_remaining_minutes > b.estimated_remaining_minutes);
        assert!(a.attention_remaining > b.attention_remaining);
        assert!(!a.nudge_windows.is_empty());
        assert!(a.nudge_windows.iter().all(|w| w.confidence <= 10.0));
    }

    #[test]
    fn bridge_hint_routes_through_intermediate() {
        let direct = bridge_hint("school", "friends").unwrap();
        assert!(direct.via_topic.is_none());
        let indirect = bridge_hint("school", "sports").unwrap();
        assert!(indirect.via_topic.is_some());
        assert!(bridge_hint("school", "not-a-topic").is_none());
    }
}
