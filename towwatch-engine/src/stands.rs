use std::sync::Arc;
use towwatch_core::{AlertSink, SnapshotSource};
use towwatch_shared::{StandRecord, TowOperation};
use tracing::{debug, error, info, warn};

/// What happened to a stand update
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StandUpdate {
    Applied,
    /// Stand already in the requested state
    Unchanged,
    NoStand,
    NotFound,
    /// Another operation holds the stand's alert
    NotOwner { owner: String },
    LookupFailed,
    WriteFailed,
}

/// Mirrors an operation's alert state onto its origin stand.
///
/// Stand updates are best effort: a failed lookup or write is logged and
/// dropped until the operation's state changes again.
pub struct StandReconciler {
    source: Arc<dyn SnapshotSource>,
    sink: Arc<dyn AlertSink>,
}

impl StandReconciler {
    pub fn new(source: Arc<dyn SnapshotSource>, sink: Arc<dyn AlertSink>) -> Self {
        Self { source, sink }
    }

    pub async fn update_for_operation(&self, op: &TowOperation, alerted: bool) -> StandUpdate {
        let Some(name) = op.from_stand.as_deref() else {
            return StandUpdate::NoStand;
        };

        let stand = match self.source.find_stand(name).await {
            Ok(Some(stand)) => stand,
            Ok(None) => {
                error!("Stand {} for tow {} not found", name, op.id);
                return StandUpdate::NotFound;
            }
            Err(e) => {
                error!("Stand lookup for tow {} failed: {}", op.id, e);
                return StandUpdate::LookupFailed;
            }
        };

        if stand.is_owned_by_other(&op.id) {
            let owner = stand.owner().unwrap_or_default();
            info!(
                stand = %stand.name,
                tow_id = %op.id,
                owner = %owner,
                "Stand flagged by another tow, leaving it alone"
            );
            return StandUpdate::NotOwner { owner: owner.to_string() };
        }

        let unchanged = if alerted {
            stand.tow_alert && stand.owner() == Some(op.id.as_str())
        } else {
            !stand.needs_clearing()
        };
        if unchanged {
            debug!(stand = %stand.name, alerted, "Stand already up to date");
            return StandUpdate::Unchanged;
        }

        let tow_id = alerted.then_some(op.id.as_str());
        match self.sink.set_stand_custom_fields(&stand, tow_id, alerted).await {
            Ok(()) => {
                info!(stand = %stand.name, tow_id = %op.id, alerted, "Stand updated");
                StandUpdate::Applied
            }
            Err(e) => {
                error!("Failed to update stand {}: {}", stand.name, e);
                StandUpdate::WriteFailed
            }
        }
    }

    /// Reset every stand still carrying alert state. Returns how many were
    /// cleared.
    pub async fn clear_flagged(&self, stands: &[StandRecord]) -> usize {
        let mut cleared = 0;
        for stand in stands.iter().filter(|s| s.needs_clearing()) {
            debug!("Need to clear: {}", stand);
            match self.sink.set_stand_custom_fields(stand, None, false).await {
                Ok(()) => {
                    info!("Cleared stand {}", stand.name);
                    cleared += 1;
                }
                Err(e) => warn!("Failed to clear stand {}: {}", stand.name, e),
            }
        }
        cleared
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{operation, stand, RecordingSink, SinkCall, StaticSnapshots};
    use chrono::Duration;

    fn reconciler(stands: Vec<StandRecord>) -> (StandReconciler, Arc<RecordingSink>, Arc<StaticSnapshots>) {
        let sink = Arc::new(RecordingSink::new());
        let source = Arc::new(StaticSnapshots::with_stands(stands));
        (StandReconciler::new(source.clone(), sink.clone()), sink, source)
    }

    fn tow_from(id: &str, stand: &str) -> TowOperation {
        let mut op = operation(id, Duration::minutes(-5), Duration::hours(1), false, false, vec![]);
        op.from_stand = Some(stand.to_string());
        op
    }

    #[tokio::test]
    async fn test_alert_claims_free_stand() {
        let (stands, sink, _) = reconciler(vec![stand("1001", "A12", false, None)]);

        let outcome = stands.update_for_operation(&tow_from("T1", "A12"), true).await;

        assert_eq!(outcome, StandUpdate::Applied);
        assert_eq!(
            sink.calls(),
            vec![SinkCall::Stand { stand_id: "1001".into(), tow_id: Some("T1".into()), alerted: true }]
        );
    }

    #[tokio::test]
    async fn test_other_owner_is_not_clobbered() {
        let (stands, sink, _) = reconciler(vec![stand("1001", "A12", true, Some("T2"))]);

        assert_eq!(
            stands.update_for_operation(&tow_from("T1", "A12"), false).await,
            StandUpdate::NotOwner { owner: "T2".into() }
        );
        assert_eq!(
            stands.update_for_operation(&tow_from("T1", "A12"), true).await,
            StandUpdate::NotOwner { owner: "T2".into() }
        );
        assert!(sink.calls().is_empty());
    }

    #[tokio::test]
    async fn test_owner_can_clear() {
        let (stands, sink, _) = reconciler(vec![stand("1001", "A12", true, Some("T1"))]);

        let outcome = stands.update_for_operation(&tow_from("T1", "A12"), false).await;

        assert_eq!(outcome, StandUpdate::Applied);
        assert_eq!(
            sink.calls(),
            vec![SinkCall::Stand { stand_id: "1001".into(), tow_id: None, alerted: false }]
        );
    }

    #[tokio::test]
    async fn test_clear_on_clean_stand_is_noop() {
        let (stands, sink, _) = reconciler(vec![stand("1001", "A12", false, None)]);
        assert_eq!(stands.update_for_operation(&tow_from("T1", "A12"), false).await, StandUpdate::Unchanged);
        assert!(sink.calls().is_empty());
    }

    #[tokio::test]
    async fn test_lookup_problems_are_swallowed() {
        let (stands, sink, source) = reconciler(vec![stand("1001", "A12", false, None)]);

        assert_eq!(stands.update_for_operation(&tow_from("T1", "Z99"), true).await, StandUpdate::NotFound);

        source.fail_next(1);
        assert_eq!(stands.update_for_operation(&tow_from("T1", "A12"), true).await, StandUpdate::LookupFailed);

        let mut no_stand = tow_from("T1", "A12");
        no_stand.from_stand = None;
        assert_eq!(stands.update_for_operation(&no_stand, true).await, StandUpdate::NoStand);

        assert!(sink.calls().is_empty());
    }

    #[tokio::test]
    async fn test_clear_flagged_only_touches_dirty_stands() {
        let all = vec![
            stand("1", "A1", true, Some("T1")),
            stand("2", "A2", false, None),
            stand("3", "A3", false, Some("T3")),
        ];
        let (stands, sink, _) = reconciler(all.clone());

        assert_eq!(stands.clear_flagged(&all).await, 2);
        let cleared: Vec<_> = sink
            .calls()
            .into_iter()
            .map(|c| match c {
                SinkCall::Stand { stand_id, .. } => stand_id,
                other => panic!("unexpected call {:?}", other),
            })
            .collect();
        assert_eq!(cleared, vec!["1".to_string(), "3".to_string()]);
    }
}
