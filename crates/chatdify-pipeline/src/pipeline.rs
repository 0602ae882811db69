// SPDX-FileCopyrightText: 2026 Chatdify Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The dispatch pipeline: one run per queued event.
//!
//! A run walks `received -> normalized -> deduplicated -> ai_requested ->
//! ai_completed -> mutations_applied -> finalized`, or ends in `failed`.
//! All coordination between concurrent runs goes through the
//! [`ConversationStore`]: the AI lease for mutual exclusion, the processed
//! event set for idempotency, and the content slot for the
//! later-received-wins tie-break.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chatdify_config::model::ChatdifyConfig;
use chatdify_core::{
    is_allowed_transition, AIResponse, Assignee, BridgeError, CompletionProvider, ConversationGateway,
    ConversationId, ConversationState, ConversationStatus, ConversationStore, ErrorClass,
    EventType, GatewayErrorKind, InboundEvent, StatusPolicy,
};
use strum::Display;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::context;
use crate::retry::RetryPolicy;
use crate::teams::TeamDirectory;

/// States of a single pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum RunState {
    Received,
    Normalized,
    Deduplicated,
    AiRequested,
    AiCompleted,
    MutationsApplied,
    Finalized,
    Failed,
}

/// Why a conversation was handed to humans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum EscalationReason {
    /// The AI asked for a human.
    Requested,
    /// The AI answer could not be interpreted.
    UnparsableResponse,
    /// The run failed for good and the conversation needs a human signal.
    Failure,
}

/// Why a run did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum SkipReason {
    AlreadyProcessed,
    StatusSynced,
    NoAction,
    ConversationGone,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// AI reply and its suggestions were applied.
    Finalized,
    Escalated { reason: EscalationReason },
    Skipped { reason: SkipReason },
    /// A run for a later message already applied content.
    Superseded,
    /// The lease was taken over by a newer run; nothing was applied.
    Abandoned,
    /// Some mutations exhausted their retries. Applied ones stand.
    Partial { failed: Vec<String> },
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunOutcome::Finalized => write!(f, "finalized"),
            RunOutcome::Escalated { reason } => write!(f, "escalated({reason})"),
            RunOutcome::Skipped { reason } => write!(f, "skipped({reason})"),
            RunOutcome::Superseded => write!(f, "superseded"),
            RunOutcome::Abandoned => write!(f, "abandoned"),
            RunOutcome::Partial { failed } => write!(f, "failed(partial: {})", failed.join(", ")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedMutation {
    pub mutation: &'static str,
    pub error: String,
}

/// Chatwoot mutations attempted by a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationReport {
    pub applied: Vec<&'static str>,
    pub failed: Vec<FailedMutation>,
}

impl MutationReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    fn failed_names(&self) -> Vec<String> {
        self.failed.iter().map(|f| f.mutation.to_string()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub conversation_id: ConversationId,
    pub event_id: String,
    pub state: RunState,
    pub outcome: RunOutcome,
    pub mutations: MutationReport,
}

/// Where escalated conversations go.
#[derive(Debug, Clone, Default)]
pub struct EscalationSettings {
    pub label: String,
    pub assignee_id: Option<i64>,
    pub team_id: Option<i64>,
    pub team_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub lease: Duration,
    pub context_messages: usize,
    pub escalation: EscalationSettings,
    pub mutation_retry: RetryPolicy,
    pub team_cache_ttl: Duration,
}

impl PipelineSettings {
    pub fn from_config(config: &ChatdifyConfig) -> Self {
        Self {
            lease: Duration::from_secs(config.queue.lease_secs),
            context_messages: config.pipeline.context_messages,
            escalation: EscalationSettings {
                label: config.pipeline.escalation_label.clone(),
                assignee_id: config.pipeline.escalation_assignee_id,
                team_id: config.pipeline.escalation_team_id,
                team_name: config.pipeline.escalation_team_name.clone(),
            },
            mutation_retry: RetryPolicy::for_mutations(&config.pipeline),
            team_cache_ttl: Duration::from_secs(config.pipeline.team_cache_ttl_secs),
        }
    }
}

/// Tracks and logs the state of one run.
struct Run<'e> {
    event: &'e InboundEvent,
    state: RunState,
}

impl<'e> Run<'e> {
    fn new(event: &'e InboundEvent) -> Self {
        Self {
            event,
            state: RunState::Received,
        }
    }

    fn advance(&mut self, next: RunState) {
        debug!(
            conversation_id = self.event.conversation_id,
            event_id = %self.event.event_id,
            from = %self.state,
            to = %next,
            "run state"
        );
        self.state = next;
    }

    fn finish(&mut self, outcome: RunOutcome, mutations: MutationReport) -> RunReport {
        let terminal = match outcome {
            RunOutcome::Partial { .. } | RunOutcome::Abandoned => RunState::Failed,
            _ => RunState::Finalized,
        };
        self.advance(terminal);
        info!(
            conversation_id = self.event.conversation_id,
            event_id = %self.event.event_id,
            outcome = %outcome,
            "run finished"
        );
        RunReport {
            conversation_id: self.event.conversation_id,
            event_id: self.event.event_id.clone(),
            state: self.state,
            outcome,
            mutations,
        }
    }
}

/// Orchestrates state store, completion provider, and Chatwoot gateway.
pub struct DispatchPipeline {
    store: Arc<dyn ConversationStore>,
    gateway: Arc<dyn ConversationGateway>,
    completion: Arc<dyn CompletionProvider>,
    teams: Arc<TeamDirectory>,
    policy: StatusPolicy,
    settings: PipelineSettings,
}

impl DispatchPipeline {
    pub fn new(
        config: &ChatdifyConfig,
        store: Arc<dyn ConversationStore>,
        gateway: Arc<dyn ConversationGateway>,
        completion: Arc<dyn CompletionProvider>,
    ) -> Self {
        Self::with_settings(
            PipelineSettings::from_config(config),
            config.policy.status_policy(),
            store,
            gateway,
            completion,
        )
    }

    pub fn with_settings(
        settings: PipelineSettings,
        policy: StatusPolicy,
        store: Arc<dyn ConversationStore>,
        gateway: Arc<dyn ConversationGateway>,
        completion: Arc<dyn CompletionProvider>,
    ) -> Self {
        let teams = Arc::new(TeamDirectory::new(gateway.clone(), settings.team_cache_ttl));
        Self {
            store,
            gateway,
            completion,
            teams,
            policy,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    pub fn gateway(&self) -> &Arc<dyn ConversationGateway> {
        &self.gateway
    }

    pub fn completion(&self) -> &Arc<dyn CompletionProvider> {
        &self.completion
    }

    pub fn teams(&self) -> &Arc<TeamDirectory> {
        &self.teams
    }

    pub fn policy(&self) -> &StatusPolicy {
        &self.policy
    }

    /// Execute one run for `event`.
    ///
    /// Returns [`BridgeError::LeaseConflict`] when another run holds the
    /// conversation's AI lease; the caller re-enqueues with a delay. Other
    /// errors have released the lease and follow the error taxonomy.
    pub async fn run(&self, event: &InboundEvent) -> Result<RunReport, BridgeError> {
        let conversation_id = event.conversation_id;
        let mut run = Run::new(event);
        run.advance(RunState::Normalized);

        let mut state = self.store.get_or_create(conversation_id).await?;
        let payload_status = event.conversation_status.filter(|s| *s != state.status);
        if let Some(status) = payload_status {
            // Chatwoot owns the status; the payload is fresher than the cache.
            self.store.reconcile_status(conversation_id, status).await?;
            debug!(conversation_id, from = %state.status, to = %status, "status reconciled");
            state.status = status;
        }

        if self.store.was_processed(conversation_id, &event.event_id).await? {
            return Ok(run.finish(
                RunOutcome::Skipped {
                    reason: SkipReason::AlreadyProcessed,
                },
                MutationReport::default(),
            ));
        }
        run.advance(RunState::Deduplicated);

        if event.event_type != EventType::MessageCreated {
            self.store
                .record_processed(conversation_id, &event.event_id)
                .await?;
            let reason = match event.event_type {
                EventType::ConversationStatusChanged => SkipReason::StatusSynced,
                _ => SkipReason::NoAction,
            };
            return Ok(run.finish(RunOutcome::Skipped { reason }, MutationReport::default()));
        }

        let token = Uuid::new_v4().to_string();
        if !self
            .store
            .try_begin_ai_request(conversation_id, &token, self.settings.lease)
            .await?
        {
            debug!(conversation_id, event_id = %event.event_id, "AI lease held by another run");
            return Err(BridgeError::LeaseConflict { conversation_id });
        }
        run.advance(RunState::AiRequested);

        match self.converse(&mut run, &state, &token).await {
            Ok(report) => Ok(report),
            Err(e) => {
                run.advance(RunState::Failed);
                match self.store.complete_ai_request(conversation_id, &token).await {
                    Ok(released) => debug!(conversation_id, released, "lease released after failure"),
                    Err(release_err) => {
                        warn!(conversation_id, error = %release_err, "could not release lease; it will expire")
                    }
                }
                warn!(
                    conversation_id,
                    event_id = %event.event_id,
                    error = %e,
                    class = %e.class(),
                    retryable = e.is_retryable(),
                    "run failed"
                );
                Err(e)
            }
        }
    }

    async fn converse(
        &self,
        run: &mut Run<'_>,
        state: &ConversationState,
        token: &str,
    ) -> Result<RunReport, BridgeError> {
        let event = run.event;
        let conversation_id = event.conversation_id;

        let (context, data) = context::assemble(
            self.gateway.as_ref(),
            event,
            state,
            self.settings.context_messages,
        )
        .await?;
        let current_status = match data.status {
            Some(status) if status != state.status => {
                self.store.reconcile_status(conversation_id, status).await?;
                status
            }
            Some(status) => status,
            None => state.status,
        };

        let response = match self.completion.complete(&context).await {
            Ok(response) => Some(response),
            Err(e) if e.class() == ErrorClass::Content => {
                warn!(conversation_id, error = %e, "AI response unusable, escalating");
                None
            }
            Err(e) => return Err(e),
        };
        run.advance(RunState::AiCompleted);

        if let Some(dify_id) = response
            .as_ref()
            .and_then(|r| r.dify_conversation_id.as_deref())
            .filter(|id| state.dify_conversation_id.as_deref() != Some(*id))
        {
            self.store
                .set_dify_conversation_id(conversation_id, Some(dify_id))
                .await?;
        }

        // Ownership check before touching Chatwoot: a newer run may have
        // reclaimed an expired lease while we waited on the AI.
        if !self
            .store
            .renew_ai_request(conversation_id, token, self.settings.lease)
            .await?
        {
            warn!(conversation_id, event_id = %event.event_id, "lease lost, abandoning run");
            return Ok(run.finish(RunOutcome::Abandoned, MutationReport::default()));
        }

        if !self
            .store
            .claim_content_slot(conversation_id, event.received_at)
            .await?
        {
            debug!(conversation_id, event_id = %event.event_id, "newer message already answered");
            self.store.complete_ai_request(conversation_id, token).await?;
            self.store
                .record_processed(conversation_id, &event.event_id)
                .await?;
            return Ok(run.finish(RunOutcome::Superseded, MutationReport::default()));
        }

        let mut mutations = MutationReport::default();
        let outcome = match response {
            Some(response) if !response.escalate => {
                self.auto_reply(conversation_id, current_status, &response, &mut mutations)
                    .await
            }
            Some(_) => {
                self.escalate(conversation_id, current_status, &mut mutations).await;
                RunOutcome::Escalated {
                    reason: EscalationReason::Requested,
                }
            }
            None => {
                self.escalate(conversation_id, current_status, &mut mutations).await;
                RunOutcome::Escalated {
                    reason: EscalationReason::UnparsableResponse,
                }
            }
        };
        let outcome = if mutations.is_clean() {
            outcome
        } else {
            RunOutcome::Partial {
                failed: mutations.failed_names(),
            }
        };
        run.advance(RunState::MutationsApplied);

        if !self.store.complete_ai_request(conversation_id, token).await? {
            warn!(conversation_id, "lease taken over while mutations were applied");
        }
        self.store
            .record_processed(conversation_id, &event.event_id)
            .await?;
        Ok(run.finish(outcome, mutations))
    }

    /// Send the reply, then apply each suggestion independently.
    async fn auto_reply(
        &self,
        conversation_id: ConversationId,
        current_status: ConversationStatus,
        response: &AIResponse,
        mutations: &mut MutationReport,
    ) -> RunOutcome {
        let gateway = self.gateway.as_ref();

        let reply = response.reply_text.as_str();
        let sent = self
            .mutate(mutations, conversation_id, "send_message", move || {
                gateway.send_message(conversation_id, reply, false)
            })
            .await;

        if !response.suggested_labels.is_empty() {
            let labels = &response.suggested_labels;
            self.mutate(mutations, conversation_id, "add_labels", move || {
                gateway.add_labels(conversation_id, labels)
            })
            .await;
        }

        if let Some(priority) = response.suggested_priority {
            let applied = self
                .mutate(mutations, conversation_id, "toggle_priority", move || {
                    gateway.toggle_priority(conversation_id, priority)
                })
                .await;
            if applied {
                if let Err(e) = self.store.update_priority(conversation_id, priority).await {
                    warn!(conversation_id, error = %e, "priority cache not updated");
                }
            }
        }

        if !response.custom_attributes.is_empty() {
            let attributes = &response.custom_attributes;
            self.mutate(mutations, conversation_id, "update_custom_attributes", move || {
                gateway.update_custom_attributes(conversation_id, attributes)
            })
            .await;
        }

        if !sent {
            // The customer got nothing; leave a human hand-off signal.
            self.escalate(conversation_id, current_status, mutations).await;
        }
        RunOutcome::Finalized
    }

    /// Assign to the configured human target, add the escalation label, and
    /// reopen the conversation when policy allows.
    async fn escalate(
        &self,
        conversation_id: ConversationId,
        current_status: ConversationStatus,
        mutations: &mut MutationReport,
    ) {
        let gateway = self.gateway.as_ref();

        match self.escalation_target().await {
            Ok(Some(assignee)) => {
                let assigned = self
                    .mutate(mutations, conversation_id, "assign_conversation", move || {
                        gateway.assign_conversation(conversation_id, assignee)
                    })
                    .await;
                if assigned {
                    if let Assignee::Agent(agent_id) = assignee {
                        if let Err(e) = self.store.set_assignee(conversation_id, Some(agent_id)).await {
                            warn!(conversation_id, error = %e, "assignee cache not updated");
                        }
                    }
                }
            }
            Ok(None) => {
                warn!(conversation_id, "no escalation target, conversation left unassigned");
                mutations.failed.push(FailedMutation {
                    mutation: "assign_conversation",
                    error: "no escalation target".to_string(),
                });
            }
            Err(e) => {
                warn!(conversation_id, error = %e, "escalation team lookup failed");
                mutations.failed.push(FailedMutation {
                    mutation: "assign_conversation",
                    error: e.to_string(),
                });
            }
        }

        let labels = BTreeSet::from([self.settings.escalation.label.clone()]);
        let labels = &labels;
        self.mutate(mutations, conversation_id, "add_labels", move || {
            gateway.add_labels(conversation_id, labels)
        })
        .await;

        self.reopen(conversation_id, current_status, mutations).await;
    }

    async fn reopen(
        &self,
        conversation_id: ConversationId,
        current_status: ConversationStatus,
        mutations: &mut MutationReport,
    ) {
        let target = ConversationStatus::Open;
        if current_status == target
            || !self.policy.permits(target)
            || !is_allowed_transition(current_status, target)
        {
            return;
        }
        let gateway = self.gateway.as_ref();
        let reopened = self
            .mutate(mutations, conversation_id, "update_conversation_status", move || {
                gateway.update_conversation_status(conversation_id, target)
            })
            .await;
        if reopened {
            match self.store.update_status(conversation_id, target).await {
                Ok(true) => {}
                Ok(false) => debug!(conversation_id, "status cache moved concurrently"),
                Err(e) => warn!(conversation_id, error = %e, "status cache not updated"),
            }
        }
    }

    async fn escalation_target(&self) -> Result<Option<Assignee>, BridgeError> {
        let escalation = &self.settings.escalation;
        if let Some(team_id) = escalation.team_id {
            return Ok(Some(Assignee::Team(team_id)));
        }
        let Some(name) = escalation.team_name.as_deref() else {
            return Ok(escalation.assignee_id.map(Assignee::Agent));
        };
        match self.teams.resolve(name).await? {
            Some(team_id) => Ok(Some(Assignee::Team(team_id))),
            None => {
                warn!(team = name, "escalation team not found in Chatwoot");
                Ok(None)
            }
        }
    }

    /// Apply one mutation with its own retry budget and record the result.
    async fn mutate<F, Fut>(
        &self,
        mutations: &mut MutationReport,
        conversation_id: ConversationId,
        name: &'static str,
        op: F,
    ) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), BridgeError>>,
    {
        match self.settings.mutation_retry.run(name, op).await {
            Ok(()) => {
                mutations.applied.push(name);
                true
            }
            Err(e) => {
                warn!(
                    conversation_id,
                    mutation = name,
                    error = %e,
                    class = %e.class(),
                    "mutation failed"
                );
                mutations.failed.push(FailedMutation {
                    mutation: name,
                    error: e.to_string(),
                });
                false
            }
        }
    }

    /// Leave a human signal for an event whose run failed for good.
    ///
    /// A conversation that no longer exists is skipped. Otherwise the
    /// escalation mutations are applied best-effort and the event is recorded
    /// as processed.
    pub async fn handle_failure(
        &self,
        event: &InboundEvent,
        error: &BridgeError,
    ) -> Result<RunReport, BridgeError> {
        let conversation_id = event.conversation_id;
        let mut run = Run::new(event);
        run.advance(RunState::Failed);

        if event.event_type != EventType::MessageCreated {
            return Ok(run.finish(
                RunOutcome::Skipped {
                    reason: SkipReason::NoAction,
                },
                MutationReport::default(),
            ));
        }
        if error.gateway_kind() == Some(GatewayErrorKind::NotFound) {
            info!(conversation_id, "conversation gone upstream, event terminally skipped");
            self.store
                .record_processed(conversation_id, &event.event_id)
                .await?;
            return Ok(run.finish(
                RunOutcome::Skipped {
                    reason: SkipReason::ConversationGone,
                },
                MutationReport::default(),
            ));
        }

        let state = self.store.get_or_create(conversation_id).await?;
        let mut mutations = MutationReport::default();
        self.escalate(conversation_id, state.status, &mut mutations).await;
        self.store
            .record_processed(conversation_id, &event.event_id)
            .await?;
        let outcome = if mutations.is_clean() {
            RunOutcome::Escalated {
                reason: EscalationReason::Failure,
            }
        } else {
            RunOutcome::Partial {
                failed: mutations.failed_names(),
            }
        };
        Ok(run.finish(outcome, mutations))
    }
}
