//! Conflict lifecycle: create -> notify -> collect votes -> resolve by
//! strategy -> notify or escalate (spec.md §4.5).

use crate::error::{EngineError, EngineResult};
use agentset_clients::{BrainClient, BrainConversationType, BrainRequest, MissionControlClient, MissionControlEvent};
use agentset_types::{Conflict, ConflictStatus, ConflictStrategy, Vote};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

pub struct ConflictResolution {
    conflicts: RwLock<HashMap<String, Conflict>>,
    brain: Arc<dyn BrainClient>,
    mission_control: Arc<dyn MissionControlClient>,
}

impl ConflictResolution {
    pub fn new(brain: Arc<dyn BrainClient>, mission_control: Arc<dyn MissionControlClient>) -> Self {
        Self {
            conflicts: RwLock::new(HashMap::new()),
            brain,
            mission_control,
        }
    }

    pub async fn create_conflict(
        &self,
        id: impl Into<String>,
        description: impl Into<String>,
        initiated_by: impl Into<String>,
        participants: Vec<String>,
        strategy: ConflictStrategy,
        deadline: Option<DateTime<Utc>>,
    ) -> Conflict {
        let conflict = Conflict::new(id, description, initiated_by, participants, strategy, deadline);
        self.conflicts
            .write()
            .await
            .insert(conflict.id.clone(), conflict.clone());
        // Notification fan-out to non-initiator participants is the
        // caller's job (`CollaborationManager::route` / HTTP forwarding);
        // this component owns conflict *state*, not message delivery.
        conflict
    }

    pub async fn get(&self, conflict_id: &str) -> Option<Conflict> {
        self.conflicts.read().await.get(conflict_id).cloned()
    }

    pub async fn submit_vote(
        &self,
        conflict_id: &str,
        agent_id: &str,
        vote: String,
        explanation: Option<String>,
    ) -> EngineResult<Conflict> {
        let resolved_now = {
            let mut conflicts = self.conflicts.write().await;
            let conflict = conflicts
                .get_mut(conflict_id)
                .ok_or_else(|| EngineError::not_found(format!("conflict {conflict_id}")))?;

            if conflict.is_terminal() {
                return Err(EngineError::lifecycle(format!(
                    "conflict {conflict_id} is already {:?}",
                    conflict.status
                )));
            }
            if !conflict.participants.iter().any(|p| p == agent_id) {
                return Err(EngineError::contract(format!(
                    "{agent_id} is not a participant in conflict {conflict_id}"
                )));
            }

            conflict.votes.insert(
                agent_id.to_string(),
                Vote {
                    vote,
                    explanation,
                    timestamp: Utc::now(),
                },
            );
            conflict.status = ConflictStatus::InProgress;
            conflict.all_voted()
        };

        if resolved_now {
            self.resolve_conflict(conflict_id).await
        } else {
            Ok(self.get(conflict_id).await.unwrap())
        }
    }

    /// spec.md §4.5 "resolveConflict": dispatches on strategy.
    pub async fn resolve_conflict(&self, conflict_id: &str) -> EngineResult<Conflict> {
        let conflict = self
            .get(conflict_id)
            .await
            .ok_or_else(|| EngineError::not_found(format!("conflict {conflict_id}")))?;

        let outcome = match conflict.strategy {
            ConflictStrategy::Voting => self.resolve_by_voting(&conflict),
            ConflictStrategy::Consensus => self.resolve_by_consensus(&conflict),
            ConflictStrategy::Authority => self.resolve_by_authority(&conflict),
            ConflictStrategy::Negotiation => self.resolve_by_negotiation(&conflict).await,
            ConflictStrategy::External => Ok(None), // escalates below
        };

        let mut conflicts = self.conflicts.write().await;
        let conflict = conflicts
            .get_mut(conflict_id)
            .ok_or_else(|| EngineError::not_found(format!("conflict {conflict_id}")))?;

        match (conflict.strategy, outcome) {
            (ConflictStrategy::External, _) => {
                conflict.status = ConflictStatus::Escalated;
                conflict.escalated_to = Some("MissionControl".to_string());
                let _ = self
                    .mission_control
                    .notify(MissionControlEvent::WorkProductUpdate {
                        agent_id: conflict.initiated_by.clone(),
                        mission_id: String::new(),
                        work_product_id: conflict.id.clone(),
                    })
                    .await;
            }
            (_, Ok(Some((resolution, explanation)))) => {
                conflict.status = ConflictStatus::Resolved;
                conflict.resolution = Some(resolution);
                conflict.explanation = Some(explanation);
            }
            (_, Ok(None)) => {
                conflict.status = ConflictStatus::Escalated;
                conflict.escalated_to = Some("MissionControl".to_string());
            }
            (_, Err(e)) => {
                conflict.status = ConflictStatus::Failed;
                conflict.explanation = Some(e.to_string());
            }
        }

        Ok(conflict.clone())
    }

    /// Count vote frequencies; pick the max, tie-broken by first-seen
    /// insertion order in `participants`.
    fn resolve_by_voting(&self, conflict: &Conflict) -> EngineResult<Option<(String, String)>> {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for vote in conflict.votes.values() {
            *counts.entry(vote.vote.clone()).or_insert(0) += 1;
        }
        if counts.is_empty() {
            return Err(EngineError::contract("no votes to resolve"));
        }
        let total = conflict.votes.len();
        let winner = conflict
            .participants
            .iter()
            .filter_map(|p| conflict.votes.get(p).map(|v| v.vote.clone()))
            .max_by_key(|choice| counts[choice])
            .unwrap();
        let winner_count = counts[&winner];
        let pct = (winner_count as f64 / total as f64) * 100.0;
        Ok(Some((
            winner,
            format!("{winner_count}/{total} votes ({pct:.1}% agreement)"),
        )))
    }

    /// All votes identical -> resolve directly; otherwise fall back to
    /// voting.
    fn resolve_by_consensus(&self, conflict: &Conflict) -> EngineResult<Option<(String, String)>> {
        let mut votes = conflict.votes.values().map(|v| v.vote.as_str());
        let Some(first) = votes.next() else {
            return Err(EngineError::contract("no votes to resolve"));
        };
        if votes.all(|v| v == first) {
            let total = conflict.votes.len();
            Ok(Some((
                first.to_string(),
                format!("{total}/{total} votes (100.0% agreement)"),
            )))
        } else {
            self.resolve_by_voting(conflict)
        }
    }

    fn resolve_by_authority(&self, conflict: &Conflict) -> EngineResult<Option<(String, String)>> {
        conflict
            .votes
            .get(&conflict.initiated_by)
            .map(|v| (v.vote.clone(), "resolved by initiator authority".to_string()))
            .map(Some)
            .ok_or_else(|| EngineError::contract("initiator did not vote"))
    }

    async fn resolve_by_negotiation(&self, conflict: &Conflict) -> EngineResult<Option<(String, String)>> {
        let votes_summary: Vec<String> = conflict
            .votes
            .iter()
            .map(|(agent, v)| format!("{agent}: {} ({})", v.vote, v.explanation.clone().unwrap_or_default()))
            .collect();

        let prompt = format!(
            "Conflict: {}\nVotes:\n{}\nRespond with JSON: {{\"resolution\": ..., \"explanation\": ...}}",
            conflict.description,
            votes_summary.join("\n")
        );

        let response = self
            .brain
            .think(BrainRequest {
                agent_id: conflict.initiated_by.clone(),
                mission_id: String::new(),
                prompt,
                context: serde_json::json!({ "conflictId": conflict.id }),
                conversation_type: BrainConversationType::Negotiate,
            })
            .await;

        let Ok(response) = response else {
            return self.resolve_by_voting(conflict);
        };

        let Some(output) = response.outputs.first() else {
            return self.resolve_by_voting(conflict);
        };

        #[derive(serde::Deserialize)]
        struct NegotiationReply {
            resolution: String,
            explanation: String,
        }

        match serde_json::from_value::<NegotiationReply>(output.result.clone()) {
            Ok(reply) => Ok(Some((reply.resolution, reply.explanation))),
            Err(_) => {
                let raw = output.result.as_str().unwrap_or_default().to_string();
                Ok(Some((raw, "brain reply was not valid JSON; used raw text".to_string())))
            }
        }
    }

    /// Periodic sweep (spec.md §4.5): conflicts past their deadline and not
    /// terminal transition to ESCALATED.
    pub async fn sweep_expired(&self) {
        let now = Utc::now();
        let mut conflicts = self.conflicts.write().await;
        for conflict in conflicts.values_mut() {
            if conflict.is_terminal() {
                continue;
            }
            if let Some(deadline) = conflict.deadline {
                if now > deadline {
                    conflict.status = ConflictStatus::Escalated;
                    conflict.explanation = Some("Conflict deadline expired".to_string());
                    conflict.escalated_to = Some("MissionControl".to_string());
                    let _ = self
                        .mission_control
                        .notify(MissionControlEvent::WorkProductUpdate {
                            agent_id: conflict.initiated_by.clone(),
                            mission_id: String::new(),
                            work_product_id: conflict.id.clone(),
                        })
                        .await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentset_clients::fakes::{FakeBrainClient, FakeMissionControlClient};

    fn resolution() -> (Arc<dyn BrainClient>, Arc<dyn MissionControlClient>, ConflictResolution) {
        let brain: Arc<dyn BrainClient> = Arc::new(FakeBrainClient::new());
        let mc: Arc<dyn MissionControlClient> = Arc::new(FakeMissionControlClient::new());
        let cr = ConflictResolution::new(brain.clone(), mc.clone());
        (brain, mc, cr)
    }

    /// E4 — conflict resolution by consensus: unanimous votes.
    #[tokio::test]
    async fn consensus_resolves_on_unanimous_votes() {
        let (_, _, cr) = resolution();
        cr.create_conflict(
            "c1",
            "which approach",
            "a1",
            vec!["a1".into(), "a2".into(), "a3".into()],
            ConflictStrategy::Consensus,
            None,
        )
        .await;

        cr.submit_vote("c1", "a1", "choiceA".into(), None).await.unwrap();
        cr.submit_vote("c1", "a2", "choiceA".into(), None).await.unwrap();
        let conflict = cr.submit_vote("c1", "a3", "choiceA".into(), None).await.unwrap();

        assert_eq!(conflict.status, ConflictStatus::Resolved);
        assert_eq!(conflict.resolution.as_deref(), Some("choiceA"));
        assert!(conflict.explanation.unwrap().contains("100.0%"));
    }

    /// E4 — consensus falls back to voting on a split, picking the
    /// majority with 66.7% agreement.
    #[tokio::test]
    async fn consensus_falls_back_to_voting_on_split() {
        let (_, _, cr) = resolution();
        cr.create_conflict(
            "c1",
            "which approach",
            "a1",
            vec!["a1".into(), "a2".into(), "a3".into()],
            ConflictStrategy::Consensus,
            None,
        )
        .await;

        cr.submit_vote("c1", "a1", "A".into(), None).await.unwrap();
        cr.submit_vote("c1", "a2", "A".into(), None).await.unwrap();
        let conflict = cr.submit_vote("c1", "a3", "B".into(), None).await.unwrap();

        assert_eq!(conflict.status, ConflictStatus::Resolved);
        assert_eq!(conflict.resolution.as_deref(), Some("A"));
        assert!(conflict.explanation.unwrap().contains("66.7%"));
    }

    #[tokio::test]
    async fn authority_uses_initiator_vote() {
        let (_, _, cr) = resolution();
        cr.create_conflict(
            "c1",
            "d",
            "a1",
            vec!["a1".into(), "a2".into()],
            ConflictStrategy::Authority,
            None,
        )
        .await;
        cr.submit_vote("c1", "a1", "my-call".into(), None).await.unwrap();
        let conflict = cr.submit_vote("c1", "a2", "other".into(), None).await.unwrap();
        assert_eq!(conflict.status, ConflictStatus::Resolved);
        assert_eq!(conflict.resolution.as_deref(), Some("my-call"));
    }

    #[tokio::test]
    async fn voting_rejects_non_participant() {
        let (_, _, cr) = resolution();
        cr.create_conflict("c1", "d", "a1", vec!["a1".into()], ConflictStrategy::Voting, None)
            .await;
        let err = cr.submit_vote("c1", "outsider", "x".into(), None).await.unwrap_err();
        assert!(matches!(err, EngineError::Contract(_)));
    }

    #[tokio::test]
    async fn sweep_escalates_past_deadline_conflicts() {
        let (_, _, cr) = resolution();
        let past = Utc::now() - chrono::Duration::seconds(1);
        cr.create_conflict(
            "c1",
            "d",
            "a1",
            vec!["a1".into()],
            ConflictStrategy::Voting,
            Some(past),
        )
        .await;
        cr.sweep_expired().await;
        let conflict = cr.get("c1").await.unwrap();
        assert_eq!(conflict.status, ConflictStatus::Escalated);
        assert_eq!(conflict.explanation.as_deref(), Some("Conflict deadline expired"));
    }
}
