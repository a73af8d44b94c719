pub mod config;
pub mod db;
pub mod error;
pub mod flow;
pub mod logging;
pub mod nudge;
pub mod persona;
pub mod persona_system;
pub mod persona_tracker;
pub mod topic_analyzer;
pub mod topics;
pub mod types;

pub use config::CompanionConfig;
pub use db::{BridgeAttempt, BridgeHistory, MemoryBridgeHistory, SqliteBridgeHistory};
pub use error::{CompanionError, Result};
pub use flow::{ConversationFlowIntelligence, NudgeTiming, OptimalTimingResult};
pub use nudge::{NudgeHandler, NudgeManager, NudgeSubmission, NudgeUrgency, ParentNudgeRequest, QueueHealth};
pub use persona_system::{PersonaRecommendation, PersonaSwitchRequest, PersonaSystem, ResponseGenerator, ResponseRequest};
pub use persona_tracker::PersonaRelationshipTracker;
pub use topic_analyzer::{ContextAnalysis, TopicAnalyzer};
pub use types::{ConversationContext, ConversationMessage, EngagementLevel, Mood, Sentiment, Speaker};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Analyzer engagement at or below which a different persona is suggested
const LOW_ENGAGEMENT: u8 = 3;

// ============ Initialization ============

#[derive(Debug, Serialize, Deserialize)]
pub struct InitResult {
    pub log_directory: PathBuf,
    pub removed_log_files: usize,
}

/// Set up logging and clear out stale log files
pub fn init(config: &CompanionConfig) -> Result<InitResult> {
    config.validate()?;
    let log_directory = logging::init_logging(&config.logging)?;

    let removed_log_files = match logging::cleanup_old_logs(config.logging.retention_days) {
        Ok(count) => count,
        Err(e) => {
            logging::log_error(None, &format!("Log cleanup failed: {}", e));
            0
        }
    };

    logging::log_session(None, &format!(
        "Companion initialized (logs in {}, {} stale files removed)",
        log_directory.display(),
        removed_log_files
    ));

    Ok(InitResult {
        log_directory,
        removed_log_files,
    })
}

// ============ Per-Turn Chain ============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NudgeDecision {
    pub request_id: String,
    pub target_topic: String,
    pub timing: OptimalTimingResult,
}

/// Everything the chat handler needs to shape the next reply
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnPlan {
    pub analysis: ContextAnalysis,
    pub nudge: Option<NudgeDecision>,
    pub persona_recommendation: Option<PersonaRecommendation>,
}

/// One instance of every component, wired together
pub struct Companion {
    analyzer: TopicAnalyzer,
    flow: ConversationFlowIntelligence,
    nudges: NudgeManager,
    personas: PersonaSystem,
}

impl Companion {
    pub fn new(config: CompanionConfig) -> Result<Self> {
        config.validate()?;

        let history: Arc<dyn BridgeHistory> = match &config.history.sqlite_path {
            Some(path) => Arc::new(SqliteBridgeHistory::open(path)?),
            None => Arc::new(MemoryBridgeHistory::new()),
        };

        Ok(Self {
            analyzer: TopicAnalyzer::new(),
            flow: ConversationFlowIntelligence::new(config.flow.clone()),
            nudges: NudgeManager::new(config.nudge.clone(), history),
            personas: PersonaSystem::new(config.persona.clone(), Arc::new(PersonaRelationshipTracker::new())),
        })
    }

    pub fn analyzer(&self) -> &TopicAnalyzer {
        &self.analyzer
    }

    pub fn flow(&self) -> &ConversationFlowIntelligence {
        &self.flow
    }

    pub fn nudges(&self) -> &NudgeManager {
        &self.nudges
    }

    pub fn personas(&self) -> &PersonaSystem {
        &self.personas
    }

    /// Run the analysis chain for a new child message
    pub fn handle_child_message(&self, context: &ConversationContext, messages: &[ConversationMessage]) -> TurnPlan {
        let analysis = self.analyzer.analyze_conversation_context(messages, context.child_age);

        let nudge = self.nudges.peek_next(&context.child_id).map(|request| NudgeDecision {
            request_id: request.id.clone(),
            target_topic: request.target_topic.clone(),
            timing: self.flow.analyze_optimal_timing(&request, context, messages),
        });

        let persona_recommendation =
            if context.engagement_level == EngagementLevel::Low || analysis.engagement_level <= LOW_ENGAGEMENT {
                self.personas
                    .get_persona_recommendations(&context.child_id, context.child_age, Some(&analysis.current_topic))
                    .into_iter()
                    .find(|r| r.persona_id != context.current_persona_id)
            } else {
                None
            };

        if let Some(rec) = &persona_recommendation {
            logging::log_persona(Some(&context.child_id), &format!(
                "Low engagement; suggesting {} (score {:.2})",
                rec.persona_id, rec.score
            ));
        }

        TurnPlan {
            analysis,
            nudge,
            persona_recommendation,
        }
    }

    /// Close a session and fold its messages into the child's rhythm
    pub fn end_session(&self, child_id: &str, messages: &[ConversationMessage]) -> Option<flow::ConversationRhythm> {
        let context = self.personas.end_session(child_id)?;
        let minutes = context.session_minutes(chrono::Utc::now());
        Some(
            self.flow
                .update_conversation_rhythm(child_id, context.child_age, messages, minutes),
        )
    }

    /// Forget everything held for a child
    pub fn clear_child(&self, child_id: &str) -> Result<()> {
        self.personas.clear_child(child_id);
        self.flow.reset_rhythm(child_id);
        self.nudges.clear_child(child_id)
    }
}
