//! Per-child relationship statistics for each persona
//!
//! Tracks how often a child talks with each persona, how engaged they are,
//! which topics come up, and when the child last switched personas.

use crate::logging;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Interactions below which effectiveness is pulled toward the neutral prior
const EFFECTIVENESS_MIN_SAMPLES: u32 = 5;
const NEUTRAL_EFFECTIVENESS: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipPhase {
    Introduction,
    Building,
    Established,
    Deep,
}

impl RelationshipPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipPhase::Introduction => "introduction",
            RelationshipPhase::Building => "building",
            RelationshipPhase::Established => "established",
            RelationshipPhase::Deep => "deep",
        }
    }

    pub fn from_stats(total_interactions: u32, average_engagement: f64) -> Self {
        if total_interactions < 5 {
            RelationshipPhase::Introduction
        } else if total_interactions < 20 {
            RelationshipPhase::Building
        } else if total_interactions >= 50 && average_engagement >= 7.0 {
            RelationshipPhase::Deep
        } else {
            RelationshipPhase::Established
        }
    }

    /// Relationship depth in 0..=1
    pub fn depth(&self) -> f64 {
        match self {
            RelationshipPhase::Introduction => 0.1,
            RelationshipPhase::Building => 0.4,
            RelationshipPhase::Established => 0.7,
            RelationshipPhase::Deep => 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaRelationshipHistory {
    pub child_id: String,
    pub persona_id: String,
    pub total_interactions: u32,
    pub session_count: u32,
    pub average_engagement: f64,
    pub topic_counts: HashMap<String, u32>,
    pub phase: RelationshipPhase,
    pub first_interaction_at: DateTime<Utc>,
    pub last_interaction_at: DateTime<Utc>,
}

impl PersonaRelationshipHistory {
    fn new(child_id: &str, persona_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            child_id: child_id.to_string(),
            persona_id: persona_id.to_string(),
            total_interactions: 0,
            session_count: 0,
            average_engagement: 0.0,
            topic_counts: HashMap::new(),
            phase: RelationshipPhase::Introduction,
            first_interaction_at: now,
            last_interaction_at: now,
        }
    }

    /// Most discussed topics, most frequent first
    pub fn top_topics(&self, n: usize) -> Vec<String> {
        let mut topics: Vec<(&String, &u32)> = self.topic_counts.iter().collect();
        topics.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
        topics.into_iter().take(n).map(|(t, _)| t.clone()).collect()
    }
}

type HistoryKey = (String, String);

#[derive(Default)]
pub struct PersonaRelationshipTracker {
    histories: Mutex<HashMap<HistoryKey, PersonaRelationshipHistory>>,
    switches: Mutex<HashMap<String, Vec<DateTime<Utc>>>>,
}

impl PersonaRelationshipTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn histories(&self) -> MutexGuard<'_, HashMap<HistoryKey, PersonaRelationshipHistory>> {
        self.histories.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn switches(&self) -> MutexGuard<'_, HashMap<String, Vec<DateTime<Utc>>>> {
        self.switches.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fold one turn into the child's history with a persona
    pub fn record_interaction(
        &self,
        child_id: &str,
        persona_id: &str,
        engagement: u8,
        topic: Option<&str>,
    ) -> PersonaRelationshipHistory {
        let now = Utc::now();
        let mut histories = self.histories();
        let history = histories
            .entry((child_id.to_string(), persona_id.to_string()))
            .or_insert_with(|| PersonaRelationshipHistory::new(child_id, persona_id, now));

        let previous_phase = history.phase;
        history.total_interactions += 1;
        let n = history.total_interactions as f64;
        let engagement = engagement.clamp(1, 10) as f64;
        history.average_engagement = (history.average_engagement * (n - 1.0) + engagement) / n;
        if let Some(topic) = topic.filter(|t| !t.is_empty()) {
            *history.topic_counts.entry(topic.to_string()).or_insert(0) += 1;
        }
        history.last_interaction_at = now;
        history.phase = RelationshipPhase::from_stats(history.total_interactions, history.average_engagement);

        if history.phase != previous_phase {
            logging::log_persona(Some(child_id), &format!(
                "Relationship with {} moved {} -> {}",
                persona_id,
                previous_phase.as_str(),
                history.phase.as_str()
            ));
        }

        history.clone()
    }

    pub fn record_session(&self, child_id: &str, persona_id: &str) {
        let now = Utc::now();
        let mut histories = self.histories();
        let history = histories
            .entry((child_id.to_string(), persona_id.to_string()))
            .or_insert_with(|| PersonaRelationshipHistory::new(child_id, persona_id, now));
        history.session_count += 1;
    }

    pub fn record_switch(&self, child_id: &str, at: DateTime<Utc>) {
        self.switches().entry(child_id.to_string()).or_default().push(at);
    }

    /// Drop switches older than `keep_since`. The latest switch is always
    /// kept so the cooldown still applies across sessions.
    pub fn prune_switches(&self, child_id: &str, keep_since: DateTime<Utc>) {
        let mut switches = self.switches();
        let Some(log) = switches.get_mut(child_id) else {
            return;
        };
        let latest = log.iter().max().copied();
        log.retain(|at| *at >= keep_since || Some(*at) == latest);
    }

    pub fn switches_since(&self, child_id: &str, since: DateTime<Utc>) -> u32 {
        self.switches()
            .get(child_id)
            .map(|s| s.iter().filter(|at| **at >= since).count() as u32)
            .unwrap_or(0)
    }

    pub fn last_switch_at(&self, child_id: &str) -> Option<DateTime<Utc>> {
        self.switches().get(child_id).and_then(|s| s.iter().max().copied())
    }

    /// Engagement-based effectiveness in 0..=1, `None` without history
    pub fn persona_effectiveness(&self, child_id: &str, persona_id: &str) -> Option<f64> {
        let histories = self.histories();
        let history = histories.get(&(child_id.to_string(), persona_id.to_string()))?;
        if history.total_interactions == 0 {
            return None;
        }
        let raw = history.average_engagement / 10.0;
        if history.total_interactions < EFFECTIVENESS_MIN_SAMPLES {
            let weight = history.total_interactions as f64 / EFFECTIVENESS_MIN_SAMPLES as f64;
            Some(NEUTRAL_EFFECTIVENESS + (raw - NEUTRAL_EFFECTIVENESS) * weight)
        } else {
            Some(raw)
        }
    }

    pub fn history(&self, child_id: &str, persona_id: &str) -> Option<PersonaRelationshipHistory> {
        self.histories()
            .get(&(child_id.to_string(), persona_id.to_string()))
            .cloned()
    }

    pub fn histories_for(&self, child_id: &str) -> Vec<PersonaRelationshipHistory> {
        let mut found: Vec<PersonaRelationshipHistory> = self
            .histories()
            .values()
            .filter(|h| h.child_id == child_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.total_interactions.cmp(&a.total_interactions));
        found
    }

    pub fn clear_child(&self, child_id: &str) {
        self.histories().retain(|(child, _), _| child != child_id);
        self.switches().remove(child_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn running_average_and_topics() {
        let tracker = PersonaRelationshipTracker::new();
        tracker.record_interaction("c1", "buddy", 6, Some("school"));
        tracker.record_interaction("c1", "buddy", 8, Some("school"));
        let h = tracker.record_interaction("c1", "buddy", 10, Some("friends"));
        assert_eq!(h.total_interactions, 3);
        assert!((h.average_engagement - 8.0).abs() < 1e-9);
        assert_eq!(h.topic_counts["school"], 2);
        assert_eq!(h.top_topics(1), vec!["school".to_string()]);
        assert_eq!(h.phase, RelationshipPhase::Introduction);
    }

    #[test]
    fn phases_follow_interaction_counts() {
        assert_eq!(RelationshipPhase::from_stats(4, 9.0), RelationshipPhase::Introduction);
        assert_eq!(RelationshipPhase::from_stats(5, 9.0), RelationshipPhase::Building);
        assert_eq!(RelationshipPhase::from_stats(20, 9.0), RelationshipPhase::Established);
        assert_eq!(RelationshipPhase::from_stats(50, 6.9), RelationshipPhase::Established);
        assert_eq!(RelationshipPhase::from_stats(50, 7.0), RelationshipPhase::Deep);

        let tracker = PersonaRelationshipTracker::new();
        for _ in 0..20 {
            tracker.record_interaction("c1", "coach", 7, None);
        }
        assert_eq!(tracker.history("c1", "coach").unwrap().phase, RelationshipPhase::Established);
    }

    #[test]
    fn effectiveness_is_damped_for_few_samples() {
        let tracker = PersonaRelationshipTracker::new();
        assert!(tracker.persona_effectiveness("c1", "buddy").is_none());

        tracker.record_interaction("c1", "buddy", 10, None);
        // 0.5 + (1.0 - 0.5) * 1/5
        let e = tracker.persona_effectiveness("c1", "buddy").unwrap();
        assert!((e - 0.6).abs() < 1e-9);

        for _ in 0..4 {
            tracker.record_interaction("c1", "buddy", 10, None);
        }
        let e = tracker.persona_effectiveness("c1", "buddy").unwrap();
        assert!((e - 1.0).abs() < 1e-9);
    }

    #[test]
    fn switch_bookkeeping() {
        let tracker = PersonaRelationshipTracker::new();
        let now = Utc::now();
        tracker.record_switch("c1", now - Duration::minutes(30));
        tracker.record_switch("c1", now - Duration::minutes(2));
        assert_eq!(tracker.switches_since("c1", now - Duration::minutes(10)), 1);
        assert_eq!(tracker.switches_since("c1", now - Duration::hours(1)), 2);
        assert_eq!(tracker.last_switch_at("c1"), Some(now - Duration::minutes(2)));
        assert!(tracker.last_switch_at("c2").is_none());

        tracker.clear_child("c1");
        assert_eq!(tracker.switches_since("c1", now - Duration::hours(1)), 0);
    }

    #[test]
    fn pruning_keeps_only_the_current_session_and_latest_switch() {
        let tracker = PersonaRelationshipTracker::new();
        let now = Utc::now();
        for hours in [5, 4, 3] {
            tracker.record_switch("c1", now - Duration::hours(hours));
        }
        tracker.prune_switches("c1", now - Duration::hours(1));
        assert_eq!(tracker.switches_since("c1", now - Duration::days(1)), 1);
        assert_eq!(tracker.last_switch_at("c1"), Some(now - Duration::hours(3)));

        tracker.record_switch("c1", now);
        tracker.prune_switches("c1", now - Duration::hours(1));
        assert_eq!(tracker.switches_since("c1", now - Duration::days(1)), 1);
        assert_eq!(tracker.last_switch_at("c1"), Some(now));

        // Unknown child is a no-op
        tracker.prune_switches("c2", now);
        assert!(tracker.last_switch_at("c2").is_none());
    }

    #[test]
    fn sessions_and_histories_per_child() {
        let tracker = PersonaRelationshipTracker::new();
        tracker.record_session("c1", "buddy");
        tracker.record_interaction("c1", "jester", 5, None);
        tracker.record_interaction("c1", "jester", 5, None);
        tracker.record_interaction("c2", "buddy", 5, None);

        assert_eq!(tracker.history("c1", "buddy").unwrap().session_count, 1);
        let histories = tracker.histories_for("c1");
        assert_eq!(histories.len(), 2);
        assert_eq!(histories[0].persona_id, "jester");
    }
}
