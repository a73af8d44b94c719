//! Parent nudge queue
//!
//! Each child has a small priority queue of parent requests to steer the
//! conversation toward a topic. Requests are drained one at a time through
//! the child's registered `NudgeHandler`; failures are retried after a
//! cooldown until the attempt budget runs out, and stale requests expire
//! per urgency.

use crate::config::{bounded_minutes, NudgeConfig};
use crate::db::{BridgeAttempt, BridgeHistory};
use crate::error::{CompanionError, Result};
use crate::logging;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use uuid::Uuid;

/// Directive wording that would expose the parent's request to the child
const FORBIDDEN_PHRASES: &[&str] = &[
    "tell your child",
    "tell the child",
    "your parent wants",
    "your parents want",
    "your mom said",
    "your dad said",
    "your mom wants",
    "your dad wants",
    "i was told to",
];

/// Attempts shown in processing statistics
const RECENT_ATTEMPTS_LIMIT: usize = 20;

// ============ Request Types ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NudgeUrgency {
    Low,
    Medium,
    High,
    Immediate,
}

impl NudgeUrgency {
    pub fn as_str(&self) -> &'static str {
        match self {
            NudgeUrgency::Low => "low",
            NudgeUrgency::Medium => "medium",
            NudgeUrgency::High => "high",
            NudgeUrgency::Immediate => "immediate",
        }
    }

    pub fn from_str(s: &str) -> Option<NudgeUrgency> {
        match s.trim().to_lowercase().as_str() {
            "low" => Some(NudgeUrgency::Low),
            "medium" => Some(NudgeUrgency::Medium),
            "high" => Some(NudgeUrgency::High),
            "immediate" => Some(NudgeUrgency::Immediate),
            _ => None,
        }
    }

    fn timeout_minutes(&self, config: &NudgeConfig) -> i64 {
        match self {
            NudgeUrgency::Immediate => config.timeouts.immediate,
            NudgeUrgency::High => config.timeouts.high,
            NudgeUrgency::Medium => config.timeouts.medium,
            NudgeUrgency::Low => config.timeouts.low,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NudgeStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl NudgeStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, NudgeStatus::Completed | NudgeStatus::Failed | NudgeStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParentNudgeRequest {
    pub id: String,
    pub child_id: String,
    pub parent_id: String,
    pub target_topic: String,
    pub urgency: NudgeUrgency,
    pub phrasing: String,
    pub context_hint: Option<String>,
    pub attempts: u32,
    pub max_attempts: u32,
    pub status: NudgeStatus,
    pub created_at: DateTime<Utc>,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
}

impl ParentNudgeRequest {
    pub fn new(
        child_id: &str,
        parent_id: &str,
        target_topic: &str,
        urgency: NudgeUrgency,
        phrasing: &str,
        max_attempts: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            child_id: child_id.to_string(),
            parent_id: parent_id.to_string(),
            target_topic: target_topic.trim().to_string(),
            urgency,
            phrasing: phrasing.trim().to_string(),
            context_hint: None,
            attempts: 0,
            max_attempts,
            status: NudgeStatus::Pending,
            created_at: Utc::now(),
            scheduled_for: None,
            last_attempt_at: None,
            failure_reason: None,
        }
    }

    /// When the request may next be attempted
    fn due_at(&self) -> DateTime<Utc> {
        self.scheduled_for.unwrap_or(self.created_at)
    }

    fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == NudgeStatus::Pending && self.due_at() <= now
    }
}

/// A parent's submission as received from the dashboard
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NudgeSubmission {
    pub child_id: String,
    pub parent_id: String,
    pub target_topic: String,
    pub urgency: String,
    pub phrasing: String,
    #[serde(default)]
    pub context_hint: Option<String>,
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub scheduled_for: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NudgeUpdate {
    pub phrasing: Option<String>,
    pub urgency: Option<String>,
    pub max_attempts: Option<u32>,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub context_hint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionReceipt {
    pub request_id: String,
    pub queue_position: usize, // 1-based
    pub estimated_wait_ms: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueHealth {
    Healthy,
    Busy,
    BackedUp,
}

impl QueueHealth {
    fn from_len(len: usize) -> Self {
        match len {
            0..=1 => QueueHealth::Healthy,
            2..=3 => QueueHealth::Busy,
            _ => QueueHealth::BackedUp,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NudgeQueueStatus {
    pub child_id: String,
    pub queued: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub processing: bool,
    pub next_request: Option<ParentNudgeRequest>,
    pub oldest_waiting_minutes: i64,
    pub queue_health: QueueHealth,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingStatistics {
    pub child_id: String,
    pub total_processed: u64,
    pub total_expired: u64,
    pub success_rate: f64,
    pub average_processing_ms: f64,
    pub queued_by_urgency: HashMap<NudgeUrgency, usize>,
    pub recent_attempts: Vec<BridgeAttempt>,
}

/// Delivers a nudge into the child's live conversation
#[async_trait]
pub trait NudgeHandler: Send + Sync {
    /// `Ok(true)` when the nudge landed, `Ok(false)` when the moment was wrong
    async fn deliver(&self, request: &ParentNudgeRequest) -> Result<bool>;
}

// ============ Queue ============

#[derive(Debug)]
struct NudgeQueue {
    requests: Vec<ParentNudgeRequest>,
    processing: bool,
    success_rate: f64,
    average_processing_ms: f64,
    total_processed: u64,
    total_expired: u64,
}

impl NudgeQueue {
    fn new(default_processing_ms: f64) -> Self {
        Self {
            requests: Vec::new(),
            processing: false,
            success_rate: 1.0,
            average_processing_ms: default_processing_ms,
            total_processed: 0,
            total_expired: 0,
        }
    }

    /// Urgency first, then due time, then submission order
    fn sort(&mut self) {
        self.requests.sort_by(|a, b| {
            b.urgency
                .cmp(&a.urgency)
                .then(a.due_at().cmp(&b.due_at()))
                .then(a.created_at.cmp(&b.created_at))
        });
    }

    fn position_of(&self, id: &str) -> Option<usize> {
        self.requests.iter().position(|r| r.id == id)
    }

    /// Fold an attempt into the running averages, then complete, fail or
    /// reschedule the request
    fn settle(&mut self, config: &NudgeConfig, child_id: &str, request_id: &str, outcome: &AttemptOutcome) {
        let alpha = config.ema_alpha;
        self.success_rate = self.success_rate * (1.0 - alpha) + if outcome.success { alpha } else { 0.0 };
        self.average_processing_ms = self.average_processing_ms * (1.0 - alpha) + outcome.processing_ms * alpha;
        self.total_processed += 1;

        let Some(idx) = self.position_of(request_id) else {
            return;
        };

        if outcome.success {
            let mut done = self.requests.remove(idx);
            done.status = NudgeStatus::Completed;
            logging::log_nudge(Some(child_id), &format!(
                "Nudge {} delivered on attempt {}",
                done.id, done.attempts
            ));
        } else if self.requests[idx].attempts >= self.requests[idx].max_attempts {
            let mut failed = self.requests.remove(idx);
            failed.status = NudgeStatus::Failed;
            failed.failure_reason = outcome.failure_reason.clone();
            logging::log_nudge(Some(child_id), &format!(
                "Nudge {} failed after {} attempts: {}",
                failed.id,
                failed.attempts,
                failed.failure_reason.as_deref().unwrap_or("unknown")
            ));
        } else {
            let retry_at = Utc::now() + bounded_minutes(config.retry_cooldown_minutes);
            let pending = &mut self.requests[idx];
            pending.status = NudgeStatus::Pending;
            pending.scheduled_for = Some(retry_at);
            pending.failure_reason = outcome.failure_reason.clone();
            logging::log_nudge(Some(child_id), &format!(
                "Nudge {} rescheduled for {} (attempt {}/{})",
                pending.id,
                retry_at.to_rfc3339(),
                pending.attempts,
                pending.max_attempts
            ));
            self.sort();
        }
    }
}

struct AttemptOutcome {
    success: bool,
    failure_reason: Option<String>,
    processing_ms: f64,
}

impl AttemptOutcome {
    fn delivered(started: Instant) -> Self {
        Self {
            success: true,
            failure_reason: None,
            processing_ms: started.elapsed().as_secs_f64() * 1000.0,
        }
    }

    fn failed(started: Instant, reason: String) -> Self {
        Self {
            success: false,
            failure_reason: Some(reason),
            processing_ms: started.elapsed().as_secs_f64() * 1000.0,
        }
    }
}

/// Releases a child's drain when `process_queue` exits without reaching an
/// empty queue. That covers a handler panic and a dropped drain future.
/// A delivery cut short counts as a failed attempt.
struct DrainGuard<'a> {
    manager: &'a NudgeManager,
    child_id: &'a str,
    in_flight: Option<(ParentNudgeRequest, Instant)>,
    released: bool,
}

impl<'a> DrainGuard<'a> {
    fn new(manager: &'a NudgeManager, child_id: &'a str) -> Self {
        Self {
            manager,
            child_id,
            in_flight: None,
            released: false,
        }
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let interrupted = self.in_flight.take();
        let outcome = interrupted
            .as_ref()
            .map(|(_, started)| AttemptOutcome::failed(*started, "delivery interrupted".to_string()));
        if let Some(queue) = self.manager.queues().get_mut(self.child_id) {
            queue.processing = false;
            if let (Some((request, _)), Some(outcome)) = (&interrupted, &outcome) {
                queue.settle(&self.manager.inner.config, self.child_id, &request.id, outcome);
            }
        }
        if let (Some((request, _)), Some(outcome)) = (interrupted, outcome) {
            logging::log_error(Some(self.child_id), &format!("Delivery of nudge {} was interrupted", request.id));
            self.manager.record_attempt(self.child_id, &request, outcome);
        }
    }
}

struct Inner {
    config: NudgeConfig,
    queues: Mutex<HashMap<String, NudgeQueue>>,
    handlers: Mutex<HashMap<String, Arc<dyn NudgeHandler>>>,
    history: Arc<dyn BridgeHistory>,
}

#[derive(Clone)]
pub struct NudgeManager {
    inner: Arc<Inner>,
}

impl NudgeManager {
    pub fn new(config: NudgeConfig, history: Arc<dyn BridgeHistory>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                queues: Mutex::new(HashMap::new()),
                handlers: Mutex::new(HashMap::new()),
                history,
            }),
        }
    }

    fn queues(&self) -> MutexGuard<'_, HashMap<String, NudgeQueue>> {
        self.inner.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handler(&self, child_id: &str) -> Option<Arc<dyn NudgeHandler>> {
        self.inner
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(child_id)
            .cloned()
    }

    pub fn register_handler(&self, child_id: &str, handler: Arc<dyn NudgeHandler>) {
        self.inner
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(child_id.to_string(), handler);
        logging::log_nudge(Some(child_id), "Delivery handler registered");
    }

    pub fn unregister_handler(&self, child_id: &str) {
        self.inner
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(child_id);
    }

    /// Validate and enqueue a parent's request
    pub fn submit_nudge_request(&self, submission: NudgeSubmission) -> Result<SubmissionReceipt> {
        let config = &self.inner.config;
        let urgency = validate_submission(config, &submission)?;
        let child_id = submission.child_id.trim().to_string();

        let mut request = ParentNudgeRequest::new(
            &child_id,
            submission.parent_id.trim(),
            &submission.target_topic,
            urgency,
            &submission.phrasing,
            submission.max_attempts.unwrap_or(3),
        );
        request.context_hint = submission.context_hint.clone();
        request.scheduled_for = submission.scheduled_for;

        let receipt = {
            let mut queues = self.queues();
            let queue = queues
                .entry(child_id.clone())
                .or_insert_with(|| NudgeQueue::new(config.default_processing_ms));

            if queue.requests.len() >= config.queue_capacity {
                logging::log_nudge(Some(&child_id), "Rejected submission: queue full");
                return Err(CompanionError::QueueFull {
                    child_id,
                    capacity: config.queue_capacity,
                });
            }

            if let Some(existing) = find_duplicate(&queue.requests, &request, config.similarity_threshold) {
                logging::log_nudge(Some(&child_id), &format!("Rejected duplicate of {}", existing));
                return Err(CompanionError::DuplicateRequest { existing_id: existing });
            }

            let request_id = request.id.clone();
            queue.requests.push(request);
            queue.sort();

            let queue_position = queue.position_of(&request_id).map(|i| i + 1).unwrap_or(queue.requests.len());
            let estimated_wait_ms = queue_position as f64 * queue.average_processing_ms
                + (queue_position.saturating_sub(1)) as f64 * config.poll_interval_ms as f64;

            SubmissionReceipt {
                request_id,
                queue_position,
                estimated_wait_ms,
            }
        };

        logging::log_nudge(Some(&child_id), &format!(
            "Queued nudge {} topic={} urgency={} position={}",
            receipt.request_id,
            submission.target_topic.trim(),
            urgency.as_str(),
            receipt.queue_position
        ));

        self.trigger_processing(&child_id);
        Ok(receipt)
    }

    /// Start draining in the background when a handler is registered and an
    /// async runtime is available
    fn trigger_processing(&self, child_id: &str) {
        if self.handler(child_id).is_none() {
            return;
        }
        if self.queues().get(child_id).map(|q| q.processing).unwrap_or(true) {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let manager = self.clone();
                let child_id = child_id.to_string();
                handle.spawn(async move {
                    manager.process_queue(&child_id).await;
                });
            }
            Err(_) => {
                logging::log_nudge(Some(child_id), "No async runtime; queue drains on next process_queue call");
            }
        }
    }

    /// Drain due requests one at a time. Returns the number of delivery
    /// attempts made. A second concurrent call for the same child returns 0.
    pub async fn process_queue(&self, child_id: &str) -> usize {
        {
            let mut queues = self.queues();
            let Some(queue) = queues.get_mut(child_id) else {
                return 0;
            };
            if queue.processing {
                return 0;
            }
            queue.processing = true;
        }
        let mut guard = DrainGuard::new(self, child_id);

        let Some(handler) = self.handler(child_id) else {
            logging::log_nudge(Some(child_id), "No delivery handler registered");
            return 0;
        };

        let config = &self.inner.config;
        let mut attempts_made = 0;

        loop {
            let next = {
                let mut queues = self.queues();
                let Some(queue) = queues.get_mut(child_id) else {
                    break;
                };
                let now = Utc::now();
                self.expire_stale(child_id, queue, now);

                match queue.requests.iter_mut().find(|r| r.is_due(now)) {
                    Some(request) => {
                        request.status = NudgeStatus::InProgress;
                        request.attempts += 1;
                        request.last_attempt_at = Some(now);
                        Some(request.clone())
                    }
                    None => {
                        // Cleared under the same lock that found nothing due
                        queue.processing = false;
                        guard.released = true;
                        None
                    }
                }
            };

            let Some(request) = next else {
                return attempts_made;
            };

            let started = Instant::now();
            guard.in_flight = Some((request.clone(), started));
            let outcome = handler.deliver(&request).await;
            guard.in_flight = None;

            let outcome = match outcome {
                Ok(true) => AttemptOutcome::delivered(started),
                Ok(false) => AttemptOutcome::failed(started, "handler declined delivery".to_string()),
                Err(e) => AttemptOutcome::failed(started, e.to_string()),
            };

            if let Some(queue) = self.queues().get_mut(child_id) {
                queue.settle(config, child_id, &request.id, &outcome);
            }
            self.record_attempt(child_id, &request, outcome);

            attempts_made += 1;
            tokio::time::sleep(std::time::Duration::from_millis(config.poll_interval_ms)).await;
        }

        attempts_made
    }

    fn record_attempt(&self, child_id: &str, request: &ParentNudgeRequest, outcome: AttemptOutcome) {
        let attempt = BridgeAttempt {
            request_id: request.id.clone(),
            child_id: child_id.to_string(),
            target_topic: request.target_topic.clone(),
            urgency: request.urgency.as_str().to_string(),
            success: outcome.success,
            attempt_number: request.attempts,
            processing_ms: outcome.processing_ms,
            failure_reason: outcome.failure_reason,
            attempted_at: Utc::now(),
        };
        if let Err(e) = self.inner.history.record_attempt(&attempt) {
            logging::log_error(Some(child_id), &format!("Failed to record bridge attempt: {}", e));
        }
    }

    /// Fail requests that have waited longer than their urgency allows
    fn expire_stale(&self, child_id: &str, queue: &mut NudgeQueue, now: DateTime<Utc>) {
        let config = &self.inner.config;
        let before = queue.requests.len();
        queue.requests.retain(|r| {
            let expired = r.status == NudgeStatus::Pending
                && now - r.created_at > bounded_minutes(r.urgency.timeout_minutes(config));
            if expired {
                logging::log_nudge(Some(child_id), &format!(
                    "Nudge {} expired ({} urgency)",
                    r.id,
                    r.urgency.as_str()
                ));
            }
            !expired
        });
        queue.total_expired += (before - queue.requests.len()) as u64;
    }

    /// Drain every child that has a handler. Used by the background scheduler
    /// to pick up requests whose retry cooldown has passed.
    pub async fn process_all_due(&self) -> usize {
        let children: Vec<String> = self.queues().keys().cloned().collect();
        let mut total = 0;
        for child_id in children {
            total += self.process_queue(&child_id).await;
        }
        total
    }

    /// Periodically drain all queues
    pub fn spawn_scheduler(&self, every: std::time::Duration) -> tokio::task::JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                manager.process_all_due().await;
            }
        })
    }

    pub fn cancel_nudge_request(&self, child_id: &str, request_id: &str) -> Result<ParentNudgeRequest> {
        let mut queues = self.queues();
        let queue = queues
            .get_mut(child_id)
            .ok_or_else(|| CompanionError::NotFound(format!("no queue for child {}", child_id)))?;
        let idx = queue
            .position_of(request_id)
            .ok_or_else(|| CompanionError::NotFound(format!("nudge {}", request_id)))?;

        if queue.requests[idx].status == NudgeStatus::InProgress {
            return Err(CompanionError::invalid_state("cannot cancel a nudge that is being delivered"));
        }

        let mut cancelled = queue.requests.remove(idx);
        cancelled.status = NudgeStatus::Cancelled;
        logging::log_nudge(Some(child_id), &format!("Nudge {} cancelled", request_id));
        Ok(cancelled)
    }

    pub fn update_nudge_request(
        &self,
        child_id: &str,
        request_id: &str,
        update: NudgeUpdate,
    ) -> Result<ParentNudgeRequest> {
        let config = &self.inner.config;
        let mut queues = self.queues();
        let queue = queues
            .get_mut(child_id)
            .ok_or_else(|| CompanionError::NotFound(format!("no queue for child {}", child_id)))?;
        let idx = queue
            .position_of(request_id)
            .ok_or_else(|| CompanionError::NotFound(format!("nudge {}", request_id)))?;

        if queue.requests[idx].status.is_terminal() {
            return Err(CompanionError::invalid_state("cannot update a finished nudge"));
        }

        // Validate everything before touching the request
        let urgency = match update.urgency.as_deref() {
            Some(raw) => Some(
                NudgeUrgency::from_str(raw)
                    .ok_or_else(|| CompanionError::validation(format!("invalid urgency: {}", raw)))?,
            ),
            None => None,
        };
        if let Some(max) = update.max_attempts {
            validate_max_attempts(config, max)?;
            if max < queue.requests[idx].attempts {
                return Err(CompanionError::validation("max attempts is below attempts already made"));
            }
        }
        if let Some(phrasing) = update.phrasing.as_deref() {
            validate_phrasing(config, phrasing)?;
        }

        let request = &mut queue.requests[idx];
        if let Some(urgency) = urgency {
            request.urgency = urgency;
        }
        if let Some(max) = update.max_attempts {
            request.max_attempts = max;
        }
        if let Some(phrasing) = update.phrasing {
            request.phrasing = phrasing.trim().to_string();
        }
        if let Some(at) = update.scheduled_for {
            request.scheduled_for = Some(at);
        }
        if update.context_hint.is_some() {
            request.context_hint = update.context_hint;
        }
        let updated = request.clone();
        queue.sort();

        logging::log_nudge(Some(child_id), &format!("Nudge {} updated", request_id));
        Ok(updated)
    }

    /// Highest-priority pending request, if any
    pub fn peek_next(&self, child_id: &str) -> Option<ParentNudgeRequest> {
        self.queues()
            .get(child_id)
            .and_then(|q| q.requests.iter().find(|r| r.status == NudgeStatus::Pending).cloned())
    }

    pub fn get_queue_status(&self, child_id: &str) -> NudgeQueueStatus {
        let queues = self.queues();
        let now = Utc::now();
        match queues.get(child_id) {
            Some(queue) => NudgeQueueStatus {
                child_id: child_id.to_string(),
                queued: queue.requests.len(),
                pending: queue.requests.iter().filter(|r| r.status == NudgeStatus::Pending).count(),
                in_progress: queue.requests.iter().filter(|r| r.status == NudgeStatus::InProgress).count(),
                processing: queue.processing,
                next_request: queue.requests.iter().find(|r| r.status == NudgeStatus::Pending).cloned(),
                oldest_waiting_minutes: queue
                    .requests
                    .iter()
                    .map(|r| (now - r.created_at).num_minutes())
                    .max()
                    .unwrap_or(0),
                queue_health: QueueHealth::from_len(queue.requests.len()),
            },
            None => NudgeQueueStatus {
                child_id: child_id.to_string(),
                queued: 0,
                pending: 0,
                in_progress: 0,
                processing: false,
                next_request: None,
                oldest_waiting_minutes: 0,
                queue_health: QueueHealth::Healthy,
            },
        }
    }

    pub fn get_processing_statistics(&self, child_id: &str) -> ProcessingStatistics {
        let recent_attempts = self
            .inner
            .history
            .recent_attempts(child_id, RECENT_ATTEMPTS_LIMIT)
            .unwrap_or_else(|e| {
                logging::log_error(Some(child_id), &format!("Failed to load bridge attempts: {}", e));
                Vec::new()
            });

        let queues = self.queues();
        let mut queued_by_urgency = HashMap::new();
        let (total_processed, total_expired, success_rate, average_processing_ms) = match queues.get(child_id) {
            Some(queue) => {
                for r in &queue.requests {
                    *queued_by_urgency.entry(r.urgency).or_insert(0) += 1;
                }
                (
                    queue.total_processed,
                    queue.total_expired,
                    queue.success_rate,
                    queue.average_processing_ms,
                )
            }
            None => (0, 0, 1.0, self.inner.config.default_processing_ms),
        };

        ProcessingStatistics {
            child_id: child_id.to_string(),
            total_processed,
            total_expired,
            success_rate,
            average_processing_ms,
            queued_by_urgency,
            recent_attempts,
        }
    }

    /// Drop a child's queue, handler and recorded attempts
    pub fn clear_child(&self, child_id: &str) -> Result<()> {
        self.queues().remove(child_id);
        self.unregister_handler(child_id);
        self.inner.history.clear_child(child_id)
    }
}

// ============ Validation ============

fn validate_max_attempts(config: &NudgeConfig, max_attempts: u32) -> Result<()> {
    if max_attempts < config.min_attempts || max_attempts > config.max_attempts {
        return Err(CompanionError::validation(format!(
            "max attempts must be between {} and {}",
            config.min_attempts, config.max_attempts
        )));
    }
    Ok(())
}

fn validate_phrasing(config: &NudgeConfig, phrasing: &str) -> Result<()> {
    let trimmed = phrasing.trim();
    let len = trimmed.chars().count();
    if len < config.min_phrasing_chars {
        return Err(CompanionError::validation(format!(
            "phrasing must be at least {} characters",
            config.min_phrasing_chars
        )));
    }
    if len > config.max_phrasing_chars {
        return Err(CompanionError::validation(format!(
            "phrasing must be at most {} characters",
            config.max_phrasing_chars
        )));
    }
    let lower = trimmed.to_lowercase();
    if let Some(phrase) = FORBIDDEN_PHRASES.iter().find(|p| lower.contains(*p)) {
        return Err(CompanionError::validation(format!(
            "phrasing must not reveal the request (contains \"{}\")",
            phrase
        )));
    }
    Ok(())
}

/// Check every field of a submission; returns the parsed urgency
pub fn validate_submission(config: &NudgeConfig, submission: &NudgeSubmission) -> Result<NudgeUrgency> {
    if submission.child_id.trim().is_empty() {
        return Err(CompanionError::validation("child id is required"));
    }
    if submission.parent_id.trim().is_empty() {
        return Err(CompanionError::validation("parent id is required"));
    }
    if submission.target_topic.trim().is_empty() {
        return Err(CompanionError::validation("target topic is required"));
    }
    let urgency = NudgeUrgency::from_str(&submission.urgency)
        .ok_or_else(|| CompanionError::validation(format!("invalid urgency: {}", submission.urgency)))?;
    if let Some(max) = submission.max_attempts {
        validate_max_attempts(config, max)?;
    }
    validate_phrasing(config, &submission.phrasing)?;
    Ok(urgency)
}

fn word_set(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_string())
        .collect()
}

/// Jaccard overlap of the word sets of two phrasings
pub fn phrasing_similarity(a: &str, b: &str) -> f64 {
    let a = word_set(a);
    let b = word_set(b);
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(&b).count() as f64;
    let union = a.union(&b).count() as f64;
    intersection / union
}

fn find_duplicate(queued: &[ParentNudgeRequest], candidate: &ParentNudgeRequest, threshold: f64) -> Option<String> {
    queued
        .iter()
        .filter(|r| matches!(r.status, NudgeStatus::Pending | NudgeStatus::InProgress))
        .filter(|r| r.target_topic.eq_ignore_ascii_case(&candidate.target_topic))
        .find(|r| phrasing_similarity(&r.phrasing, &candidate.phrasing) > threshold)
        .map(|r| r.id.clone())
}
