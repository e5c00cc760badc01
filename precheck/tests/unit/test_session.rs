//! Session tests: run, resolve, recheck

use std::sync::Arc;
use std::time::Duration;

use patch_precheck::actions::ActionState;
use patch_precheck::app::session::PrecheckSession;
use patch_precheck::engine::{ReportEvent, RunOutcome, RunState};
use patch_precheck::models::UpdateMode;
use patch_precheck::plan::{PlanBuilder, PlanRequest, PoolUpdatePlanBuilder, GROUP_HA, GROUP_STORAGE};
use patch_precheck::remediation::ResolveOutcome;
use patch_precheck::service::PoolService;

use crate::mock_service::{two_hosts, update, MockPool};

fn session(pool: &Arc<MockPool>) -> (PrecheckSession, tokio::sync::mpsc::UnboundedReceiver<ReportEvent>) {
    let service: Arc<dyn PoolService> = pool.clone();
    let builder: Arc<dyn PlanBuilder> = Arc::new(PoolUpdatePlanBuilder::new(Some(update("u1", 100))));
    PrecheckSession::new(
        service,
        builder,
        PlanRequest::new(two_hosts(), UpdateMode::Manual),
    )
}

#[tokio::test]
async fn test_resolve_all_then_recheck_clears_problems() {
    let pool = MockPool::new();
    pool.with(|s| {
        s.ha_pools.insert("pool-a".to_string());
        s.unplugged.insert("h2".to_string(), vec!["NFS".to_string()]);
    });
    let (session, _rx) = session(&pool);

    session.recheck().await.unwrap();
    assert_eq!(session.wait_for_run().await.unwrap(), RunOutcome::Completed);
    assert!(!session.can_proceed().await);
    assert!(session.resolve_all_enabled());

    let handle = session.resolve_all().await.unwrap().unwrap();
    assert_eq!(handle.wait_completed().await, ActionState::Succeeded);
    session.wait_for_remediation().await;
    assert_eq!(session.wait_for_run().await.unwrap(), RunOutcome::Completed);

    assert_eq!(pool.calls("disable_ha"), 1);
    assert_eq!(pool.calls("plug_storage"), 1);
    // the fixes took: the recheck found nothing
    assert!(!session.report().has_problems());
    assert!(session.can_proceed().await);
    assert!(session.ledger().snapshot().iter().all(|p| p.enabled()));
}

#[tokio::test]
async fn test_failures_only_filters_rows() {
    let pool = MockPool::new();
    pool.with(|s| {
        s.unplugged.insert("h1".to_string(), vec!["NFS".to_string()]);
    });
    let (session, _rx) = session(&pool);

    session.recheck().await.unwrap();
    session.wait_for_run().await.unwrap();

    let all_rows: usize = session.rows().iter().map(|g| g.rows.len()).sum();
    session.set_failures_only(true);
    let groups = session.rows();
    let failing_rows: usize = groups.iter().map(|g| g.rows.len()).sum();

    assert_eq!(failing_rows, 1);
    assert!(all_rows > failing_rows);
    // headers are kept even when all their rows are filtered
    let ha = groups.iter().find(|g| g.header.title == GROUP_HA).unwrap();
    assert!(ha.rows.is_empty());
    let storage = groups.iter().find(|g| g.header.title == GROUP_STORAGE).unwrap();
    assert_eq!(storage.rows[0].host_uuid, "h1");
}

#[tokio::test]
async fn test_ok_row_has_nothing_to_resolve() {
    let pool = MockPool::new();
    let (session, _rx) = session(&pool);

    session.recheck().await.unwrap();
    session.wait_for_run().await.unwrap();

    let report = session.report();
    let row = report.rows().next().unwrap();
    assert!(matches!(
        session.resolve_one(row).await.unwrap(),
        ResolveOutcome::Declined
    ));
    assert!(session.resolve_all().await.unwrap().is_none());
}

#[tokio::test]
async fn test_rows_disabled_while_remediating() {
    let pool = MockPool::new();
    pool.with(|s| {
        s.unplugged.insert("h1".to_string(), vec!["NFS".to_string()]);
        s.fix_delay = Some(Duration::from_millis(50));
    });
    let (session, _rx) = session(&pool);

    session.recheck().await.unwrap();
    session.wait_for_run().await.unwrap();

    let report = session.report();
    let row = report.rows().find(|r| r.is_problem()).unwrap().clone();
    assert!(row.enabled());

    let outcome = session.resolve_one(&row).await.unwrap();
    assert!(matches!(outcome, ResolveOutcome::Started(_)));
    assert!(session.is_remediation_in_progress());
    assert!(!row.enabled());
    assert!(!session.resolve_all_enabled());
    assert!(!session.can_proceed().await);

    session.wait_for_remediation().await;
    session.wait_for_run().await.unwrap();
    assert!(!session.is_remediation_in_progress());
    assert!(!session.report().has_problems());
}

#[tokio::test]
async fn test_cancel_session_run() {
    let pool = MockPool::new();
    pool.with(|s| s.live_delay = Some(Duration::from_millis(50)));
    let (session, _rx) = session(&pool);

    session.recheck().await.unwrap();
    session.cancel();

    assert_eq!(session.wait_for_run().await.unwrap(), RunOutcome::Cancelled);
    assert_eq!(session.run_state().await, RunState::Cancelled);

    // a recheck after a cancel runs to the end
    pool.with(|s| s.live_delay = None);
    session.recheck().await.unwrap();
    assert_eq!(session.wait_for_run().await.unwrap(), RunOutcome::Completed);
}

#[tokio::test]
async fn test_cancel_during_remediation_skips_recheck() {
    let pool = MockPool::new();
    pool.with(|s| {
        s.ha_pools.insert("pool-a".to_string());
        s.fix_delay = Some(Duration::from_millis(50));
    });
    let (session, mut rx) = session(&pool);

    session.recheck().await.unwrap();
    session.wait_for_run().await.unwrap();
    session.resolve_all().await.unwrap().unwrap();

    session.cancel();
    session.wait_for_remediation().await;

    assert!(!session.is_remediation_in_progress());
    assert!(session.ledger().snapshot().iter().all(|p| p.enabled()));

    drop(session);
    let mut started = 0;
    while let Some(event) = rx.recv().await {
        if matches!(event, ReportEvent::RunStarted { .. }) {
            started += 1;
        }
    }
    // only the run from before the cancel
    assert_eq!(started, 1);
}

#[tokio::test]
async fn test_shutdown_stops_remediation() {
    let pool = MockPool::new();
    pool.with(|s| {
        s.ha_pools.insert("pool-a".to_string());
        s.fix_delay = Some(Duration::from_millis(20));
    });
    let (session, mut rx) = session(&pool);

    session.recheck().await.unwrap();
    session.wait_for_run().await.unwrap();
    let handle = session.resolve_all().await.unwrap().unwrap();

    session.shutdown().await;
    assert!(handle.is_completed());
    assert!(!session.is_remediation_in_progress());
    assert!(session.run_state().await.is_terminal());

    drop(session);
    let mut finished = 0;
    while let Some(event) = rx.recv().await {
        if matches!(event, ReportEvent::RunFinished { .. }) {
            finished += 1;
        }
    }
    assert_eq!(finished, 1);
}
