//! Orchestrator tests

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_test::assert_ok;

use patch_precheck::checks::{Check, CheckContext};

use patch_precheck::engine::{
    PrecheckOrchestrator, PrecheckReport, ReportEvent, ReportGroup, RunOutcome, RunState,
};
use patch_precheck::errors::PrecheckError;
use patch_precheck::models::{Host, UpdateMode, UpdatePayload, UpgradeSequence};
use patch_precheck::plan::{
    CheckGroup, CheckPlan, PlanBuilder, PlanRequest, PoolUpdatePlanBuilder, GROUP_DISK_SPACE,
    GROUP_EVACUATE, GROUP_HA, GROUP_LIVENESS, GROUP_REBOOT, GROUP_SERVER_SIDE, GROUP_STORAGE,
};
use patch_precheck::problems::{PrecheckResult, Problem, ProblemCondition, ProblemLedger};
use patch_precheck::service::{EvacuationBlocker, EvacuationReason, LivepatchStatus, PoolService};
use xenapi_models::UpdateAfterApplyGuidance;

use crate::mock_service::{host, pool as mock_pool, two_hosts, update, MockPool};

fn orchestrator(
    pool: &Arc<MockPool>,
) -> (PrecheckOrchestrator, mpsc::UnboundedReceiver<ReportEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let service: Arc<dyn PoolService> = pool.clone();
    let orchestrator = PrecheckOrchestrator::new(service, Arc::new(ProblemLedger::new()), tx);
    (orchestrator, rx)
}

fn manual_request() -> PlanRequest {
    PlanRequest::new(two_hosts(), UpdateMode::Manual)
}

fn restart_builder() -> PoolUpdatePlanBuilder {
    let mut payload = update("u1", 100);
    payload.after_apply_guidance = vec![UpdateAfterApplyGuidance::RestartHost];
    PoolUpdatePlanBuilder::new(Some(payload))
}

fn group<'a>(report: &'a PrecheckReport, title: &str) -> &'a ReportGroup {
    report
        .groups
        .iter()
        .find(|g| g.header.title == title)
        .unwrap()
}

fn drain(rx: &mut mpsc::UnboundedReceiver<ReportEvent>) -> Vec<ReportEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_clean_pool_reports_ok_rows() {
    let pool = MockPool::new();
    let (orchestrator, mut rx) = orchestrator(&pool);
    let plan = PoolUpdatePlanBuilder::new(Some(update("u1", 100))).build_plan(&manual_request());

    orchestrator.start(plan).await.unwrap();
    assert_eq!(orchestrator.wait().await.unwrap(), RunOutcome::Completed);
    assert_eq!(orchestrator.state().await, RunState::Completed);

    let report = orchestrator.report_snapshot();
    assert_eq!(report.progress, 100);
    assert_eq!(report.outcome, Some(RunOutcome::Completed));
    assert!(!report.has_problems());
    assert!(!report.resolve_all_enabled());

    let liveness = group(&report, GROUP_LIVENESS);
    assert_eq!(liveness.header.result, Some(PrecheckResult::Ok));
    assert_eq!(liveness.header.text(), "Checking server liveness status OK");
    assert_eq!(liveness.rows[0].description, "    h1: Checking server liveness ok.");

    let ha = group(&report, GROUP_HA);
    assert_eq!(ha.rows.len(), 1);
    assert_eq!(ha.rows[0].description, "    pool-a-name: HA is off.");
    assert!(!ha.rows[0].enabled());

    // events arrive in execution order, bracketed by the run markers
    let events = drain(&mut rx);
    assert!(matches!(events.first(), Some(ReportEvent::RunStarted { .. })));
    assert!(matches!(
        events.last(),
        Some(ReportEvent::RunFinished {
            outcome: RunOutcome::Completed,
            ..
        })
    ));
    let titles: Vec<String> = events
        .iter()
        .filter_map(|e| match e {
            ReportEvent::GroupStarted { header, .. } => Some(header.title.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(
        titles,
        vec![GROUP_LIVENESS, GROUP_HA, GROUP_STORAGE, GROUP_SERVER_SIDE, GROUP_REBOOT]
    );

    let mut last = 0;
    for event in &events {
        if let ReportEvent::Row { progress, .. } | ReportEvent::GroupStarted { progress, .. } = event {
            assert!(*progress >= last);
            last = *progress;
        }
    }
}

#[tokio::test]
async fn test_group_result_is_worst_row() {
    let pool = MockPool::new();
    pool.with(|s| {
        s.blockers.insert(
            "h1".to_string(),
            vec![EvacuationBlocker {
                vm_ref: "OpaqueRef:vm1".to_string(),
                vm_name: "web".to_string(),
                reason: EvacuationReason::CdInserted,
            }],
        );
        s.blockers.insert(
            "h2".to_string(),
            vec![EvacuationBlocker {
                vm_ref: "OpaqueRef:vm2".to_string(),
                vm_name: "db".to_string(),
                reason: EvacuationReason::ToolsMissing,
            }],
        );
    });
    let (orchestrator, _rx) = orchestrator(&pool);

    orchestrator
        .start(restart_builder().build_plan(&manual_request()))
        .await
        .unwrap();
    orchestrator.wait().await.unwrap();

    let report = orchestrator.report_snapshot();
    let evacuate = group(&report, GROUP_EVACUATE);
    assert_eq!(evacuate.rows[0].result(), PrecheckResult::Failed);
    assert_eq!(evacuate.rows[1].result(), PrecheckResult::Warning);
    // the failure wins even though the warning came last
    assert_eq!(evacuate.header.result, Some(PrecheckResult::Failed));

    // the CD row is fixable, the guest tools row only links to help
    assert!(evacuate.rows[0].is_fixable());
    assert_eq!(evacuate.rows[0].solution, "Eject CD");
    assert_eq!(evacuate.rows[1].solution, "Install guest tools");
    assert!(!evacuate.rows[1].is_problem());

    let reboot = group(&report, GROUP_REBOOT);
    assert_eq!(reboot.header.result, Some(PrecheckResult::Info));
    assert!(report.resolve_all_enabled());
}

#[tokio::test]
async fn test_dead_host_skips_later_checks() {
    let pool = MockPool::new();
    pool.with(|s| {
        s.dead_hosts.insert("h2".to_string());
        s.unplugged.insert("h2".to_string(), vec!["NFS".to_string()]);
    });
    let (orchestrator, _rx) = orchestrator(&pool);

    orchestrator
        .start(restart_builder().build_plan(&manual_request()))
        .await
        .unwrap();
    orchestrator.wait().await.unwrap();

    let report = orchestrator.report_snapshot();
    let liveness = group(&report, GROUP_LIVENESS);
    assert_eq!(liveness.header.result, Some(PrecheckResult::Failed));
    assert_eq!(liveness.rows[1].description, "    h2: the server is not live");
    assert!(!liveness.rows[1].is_fixable());

    // only the live host was asked
    assert_eq!(pool.calls("unplugged_storage"), 1);
    assert_eq!(pool.calls("precheck_update"), 1);
    assert_eq!(pool.calls("evacuation_blockers"), 1);
    assert_eq!(group(&report, GROUP_STORAGE).header.result, Some(PrecheckResult::Ok));

    // a non fixable problem keeps resolve-all off
    assert!(report.has_problems());
    assert!(!report.resolve_all_enabled());
}

#[tokio::test]
async fn test_server_side_outcomes() {
    let pool = MockPool::new();
    pool.with(|s| {
        s.livepatch
            .insert("h1".to_string(), LivepatchStatus::OkLivepatchComplete);
        s.precheck_failures.insert(
            "h2".to_string(),
            vec![
                "UPDATE_PRECHECK_FAILED_OUT_OF_SPACE".to_string(),
                "u1".to_string(),
                "100".to_string(),
            ],
        );
    });
    let (orchestrator, _rx) = orchestrator(&pool);

    orchestrator
        .start(restart_builder().build_plan(&manual_request()))
        .await
        .unwrap();
    orchestrator.wait().await.unwrap();

    let report = orchestrator.report_snapshot();
    let server_side = group(&report, GROUP_SERVER_SIDE);
    assert_eq!(server_side.rows[0].result(), PrecheckResult::Ok);
    let failed = server_side.rows[1].problem.as_ref().unwrap();
    assert_eq!(
        failed.condition(),
        &ProblemCondition::UpdatePrecheckFailed {
            code: "UPDATE_PRECHECK_FAILED_OUT_OF_SPACE".to_string(),
            params: vec!["u1".to_string(), "100".to_string()],
        }
    );
    assert!(failed.is_fixable());

    // a livepatched host needs neither a reboot nor an evacuation
    let reboot = group(&report, GROUP_REBOOT);
    assert_eq!(reboot.rows[0].result(), PrecheckResult::Ok);
    assert_eq!(reboot.rows[1].result(), PrecheckResult::Info);
    assert_eq!(pool.calls("evacuation_blockers"), 1);
}

#[tokio::test]
async fn test_update_missing_on_host() {
    let pool = MockPool::new();
    pool.with(|s| s.missing_update.insert("h1".to_string()));
    let (orchestrator, _rx) = orchestrator(&pool);

    let plan = PoolUpdatePlanBuilder::new(Some(update("u1", 100))).build_plan(&manual_request());
    orchestrator.start(plan).await.unwrap();
    orchestrator.wait().await.unwrap();

    let report = orchestrator.report_snapshot();
    let row = &group(&report, GROUP_SERVER_SIDE).rows[0];
    assert_eq!(
        row.problem.as_ref().unwrap().condition(),
        &ProblemCondition::UpdateNotFound {
            update_uuid: "u1".to_string()
        }
    );
}

#[tokio::test]
async fn test_disk_space_boundary() {
    let pool = MockPool::new();
    pool.with(|s| {
        s.disk_space.insert("h1".to_string(), 200);
        s.disk_space.insert("h2".to_string(), 200);
        s.disk_space.insert("h3".to_string(), 199);
    });
    let (orchestrator, _rx) = orchestrator(&pool);

    let p = mock_pool("pool-a");
    let hosts = vec![host("h1", &p, true), host("h2", &p, false), host("h3", &p, false)];
    let payload = UpdatePayload::Update(update("u1", 100));
    let sequence = UpgradeSequence::new(
        hosts
            .iter()
            .map(|h| (h.clone(), vec![payload.clone()]))
            .collect(),
    );
    let request =
        PlanRequest::new(hosts, UpdateMode::Automated).with_upgrade_sequence("pool-a", sequence);
    let plan = PoolUpdatePlanBuilder::new(Some(update("u1", 100))).build_plan(&request);

    orchestrator.start(plan).await.unwrap();
    orchestrator.wait().await.unwrap();

    let report = orchestrator.report_snapshot();
    let disk = group(&report, GROUP_DISK_SPACE);
    let results: Vec<PrecheckResult> = disk.rows.iter().map(|r| r.result()).collect();
    // master and members all need 100 of their own plus the 100 margin
    assert_eq!(
        results,
        vec![PrecheckResult::Ok, PrecheckResult::Ok, PrecheckResult::Failed]
    );
    assert_eq!(
        disk.rows[2].description,
        "    h3: not enough disk space to install the updates (200 B required, 199 B available)"
    );
    assert_eq!(disk.rows[2].solution, "Clean up");
}

#[tokio::test]
async fn test_problems_deduplicated_across_runs() {
    let pool = MockPool::new();
    pool.with(|s| s.ha_pools.insert("pool-a".to_string()));
    let (orchestrator, _rx) = orchestrator(&pool);
    let builder = PoolUpdatePlanBuilder::new(Some(update("u1", 100)));

    orchestrator
        .start(builder.build_plan(&manual_request()))
        .await
        .unwrap();
    orchestrator.wait().await.unwrap();
    let first = group(&orchestrator.report_snapshot(), GROUP_HA).rows[0]
        .problem
        .clone()
        .unwrap();
    first.set_enabled(false);

    orchestrator
        .start(builder.build_plan(&manual_request()))
        .await
        .unwrap();
    orchestrator.wait().await.unwrap();
    let second = group(&orchestrator.report_snapshot(), GROUP_HA).rows[0]
        .problem
        .clone()
        .unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert!(!second.enabled());
    assert_eq!(orchestrator.ledger().len(), 1);
}

#[tokio::test]
async fn test_cancel_stops_at_check_boundary() {
    let pool = MockPool::new();
    pool.with(|s| s.live_delay = Some(Duration::from_millis(50)));
    let (orchestrator, mut rx) = orchestrator(&pool);

    let plan = PoolUpdatePlanBuilder::new(Some(update("u1", 100))).build_plan(&manual_request());
    orchestrator.start(plan).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    orchestrator.cancel();

    assert_eq!(orchestrator.wait().await.unwrap(), RunOutcome::Cancelled);
    assert_eq!(orchestrator.state().await, RunState::Cancelled);

    // the check in flight finished, nothing after it ran
    assert_eq!(pool.calls("host_is_live"), 1);
    assert_eq!(pool.calls("ha_enabled"), 0);

    let report = orchestrator.report_snapshot();
    assert_eq!(report.outcome, Some(RunOutcome::Cancelled));
    assert!(report.progress < 100);
    assert!(matches!(
        drain(&mut rx).last(),
        Some(ReportEvent::RunFinished {
            outcome: RunOutcome::Cancelled,
            ..
        })
    ));
}

#[tokio::test]
async fn test_start_replaces_running_run() {
    let pool = MockPool::new();
    pool.with(|s| s.live_delay = Some(Duration::from_millis(20)));
    let (orchestrator, _rx) = orchestrator(&pool);
    let builder = PoolUpdatePlanBuilder::new(Some(update("u1", 100)));

    let first = orchestrator
        .start(builder.build_plan(&manual_request()))
        .await
        .unwrap();
    let second = orchestrator
        .start(builder.build_plan(&manual_request()))
        .await
        .unwrap();
    assert_ne!(first, second);

    assert_eq!(orchestrator.wait().await.unwrap(), RunOutcome::Completed);
    let report = orchestrator.report_snapshot();
    assert_eq!(group(&report, GROUP_LIVENESS).rows.len(), 2);
}

#[tokio::test]
async fn test_check_error_fails_run() {
    let pool = MockPool::new();
    pool.with(|s| s.broken_hosts.insert("h2".to_string()));
    let (orchestrator, mut rx) = orchestrator(&pool);

    let plan = PoolUpdatePlanBuilder::new(Some(update("u1", 100))).build_plan(&manual_request());
    orchestrator.start(plan).await.unwrap();

    let result = orchestrator.wait().await;
    assert!(matches!(result, Err(PrecheckError::SessionError(_))));
    assert_eq!(orchestrator.state().await, RunState::Failed);
    assert_eq!(orchestrator.report_snapshot().outcome, Some(RunOutcome::Failed));
    assert!(matches!(
        drain(&mut rx).last(),
        Some(ReportEvent::RunFinished {
            outcome: RunOutcome::Failed,
            ..
        })
    ));

    // a new run can start after a failure
    pool.with(|s| s.broken_hosts.clear());
    let plan = PoolUpdatePlanBuilder::new(Some(update("u1", 100))).build_plan(&manual_request());
    assert_ok!(orchestrator.start(plan).await);
    assert_eq!(orchestrator.wait().await.unwrap(), RunOutcome::Completed);
}

struct PanickingCheck {
    host: Host,
}

#[async_trait]
impl Check for PanickingCheck {
    fn host(&self) -> &Host {
        &self.host
    }

    fn description(&self) -> String {
        "Panicking check".to_string()
    }

    async fn run_all_checks(&self, _ctx: &CheckContext) -> Result<Vec<Problem>, PrecheckError> {
        panic!("check blew up");
    }
}

#[tokio::test]
async fn test_panicked_run_does_not_block_next_start() {
    let pool = MockPool::new();
    let (orchestrator, mut rx) = orchestrator(&pool);

    let mut broken = CheckGroup::new(GROUP_LIVENESS);
    broken.push(PanickingCheck {
        host: two_hosts()[0].clone(),
    });
    orchestrator
        .start(CheckPlan {
            groups: vec![broken],
        })
        .await
        .unwrap();

    // the second start awaits the panicked run before starting its own
    let plan = PoolUpdatePlanBuilder::new(None).build_plan(&manual_request());
    assert_ok!(orchestrator.start(plan).await);
    assert_eq!(orchestrator.wait().await.unwrap(), RunOutcome::Completed);

    let finished: Vec<RunOutcome> = drain(&mut rx)
        .into_iter()
        .filter_map(|event| match event {
            ReportEvent::RunFinished { outcome, .. } => Some(outcome),
            _ => None,
        })
        .collect();
    assert_eq!(finished, vec![RunOutcome::Failed, RunOutcome::Completed]);
}

#[tokio::test]
async fn test_wait_on_panicked_run() {
    let pool = MockPool::new();
    let (orchestrator, mut rx) = orchestrator(&pool);

    let mut broken = CheckGroup::new(GROUP_LIVENESS);
    broken.push(PanickingCheck {
        host: two_hosts()[1].clone(),
    });
    orchestrator
        .start(CheckPlan {
            groups: vec![broken],
        })
        .await
        .unwrap();

    assert!(orchestrator.wait().await.is_err());
    assert_eq!(orchestrator.state().await, RunState::Failed);
    assert!(matches!(
        drain(&mut rx).last(),
        Some(ReportEvent::RunFinished {
            outcome: RunOutcome::Failed,
            ..
        })
    ));
}

#[tokio::test]
async fn test_run_survives_dropped_consumer() {
    let pool = MockPool::new();
    let (orchestrator, rx) = orchestrator(&pool);
    drop(rx);

    let plan = PoolUpdatePlanBuilder::new(None).build_plan(&manual_request());
    orchestrator.start(plan).await.unwrap();
    assert_eq!(orchestrator.wait().await.unwrap(), RunOutcome::Completed);
    assert_eq!(orchestrator.report_snapshot().groups.len(), 5);
}

#[tokio::test]
async fn test_wait_without_run() {
    let pool = MockPool::new();
    let (orchestrator, _rx) = orchestrator(&pool);
    assert!(matches!(
        orchestrator.wait().await,
        Err(PrecheckError::RunStateError(_))
    ));
}
