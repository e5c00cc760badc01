//! Command line run: prechecks, optional remediation and apply

use std::future::Future;
use std::sync::Arc;

use colored::{ColoredString, Colorize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::actions::{ActionHandle, ActionState, ApplyPoolUpdatePlanAction, ApplyUpdateAction};
use crate::app::options::AppOptions;
use crate::app::session::PrecheckSession;
use crate::engine::{HostRow, ReportEvent, RunOutcome};
use crate::errors::PrecheckError;
use crate::http::{JsonRpcClient, XenApiService};
use crate::models::{selected_pools, Host, UpdateMode, UpdatePayload, UpgradeSequence};
use crate::plan::{PatchPlanBuilder, PlanBuilder, PlanRequest, PoolUpdatePlanBuilder};
use crate::problems::PrecheckResult;
use crate::service::PoolService;
use crate::storage::settings::{ServerSettings, UpdateKind};
use crate::utils::CancelFlag;

/// Connect to the pool, run the prechecks and the requested follow-ups
pub async fn run(
    server: &ServerSettings,
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), PrecheckError> {
    info!("Connecting to {}", server.url);
    let client = Arc::new(JsonRpcClient::new(&server.url, server.accept_invalid_certs)?);
    client.login(&server.username, &server.password).await?;

    let result = execute(client.clone(), options, shutdown_signal).await;

    client.logout().await;
    result
}

async fn execute(
    client: Arc<JsonRpcClient>,
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), PrecheckError> {
    let xenapi = Arc::new(XenApiService::new(client));
    let service: Arc<dyn PoolService> = xenapi.clone();

    let hosts = xenapi.load_hosts(&options.rollout.hosts).await?;
    if hosts.is_empty() {
        return Err(PrecheckError::ConfigError("No hosts selected".to_string()));
    }

    let (builder, payload) = load_payload(&xenapi, &options).await?;
    let request = plan_request(&service, &hosts, options.rollout.mode, payload.as_ref()).await?;

    let (session, events) = PrecheckSession::new(service.clone(), builder, request);
    let session = Arc::new(session);
    session.set_failures_only(options.actions.failures_only);

    let printer = tokio::spawn(print_events(events, options.actions.failures_only));
    let interrupted = CancelFlag::new();
    let watcher = watch_shutdown(session.clone(), interrupted.clone(), shutdown_signal);

    let result = drive(&session, &service, &hosts, payload, &options, &interrupted).await;

    watcher.abort();
    session.shutdown().await;
    // the printer ends once the last sender is gone
    drop(session);
    if let Err(e) = printer.await {
        warn!("Report printer stopped abnormally: {}", e);
    }
    result
}

async fn load_payload(
    xenapi: &XenApiService,
    options: &AppOptions,
) -> Result<(Arc<dyn PlanBuilder>, Option<UpdatePayload>), PrecheckError> {
    let rollout = &options.rollout;
    match (&rollout.update_uuid, rollout.update_kind) {
        (Some(uuid), UpdateKind::Patch) => {
            let patch = xenapi.load_pool_patch(uuid).await?;
            info!("Checking patch {}", patch.name);
            let payload = UpdatePayload::Patch(patch.clone());
            Ok((Arc::new(PatchPlanBuilder::new(Some(patch))), Some(payload)))
        }
        (Some(uuid), UpdateKind::Update) => {
            let update = xenapi.load_pool_update(uuid).await?;
            info!("Checking update {}", update.name);
            let payload = UpdatePayload::Update(update.clone());
            Ok((Arc::new(PoolUpdatePlanBuilder::new(Some(update))), Some(payload)))
        }
        (None, _) => {
            info!("No update selected, checking for a host restart");
            Ok((Arc::new(PoolUpdatePlanBuilder::new(None)), None))
        }
    }
}

/// Plan inputs; automated mode queues the payload on every host still missing it
async fn plan_request(
    service: &Arc<dyn PoolService>,
    hosts: &[Host],
    mode: UpdateMode,
    payload: Option<&UpdatePayload>,
) -> Result<PlanRequest, PrecheckError> {
    let mut request = PlanRequest::new(hosts.to_vec(), mode);
    let (UpdateMode::Automated, Some(payload)) = (mode, payload) else {
        return Ok(request);
    };

    for pool in selected_pools(hosts) {
        let mut entries = Vec::new();
        for host in hosts.iter().filter(|h| h.pool_uuid() == pool.uuid) {
            let queued = if service.is_update_applied(payload, host).await? {
                Vec::new()
            } else {
                vec![payload.clone()]
            };
            entries.push((host.clone(), queued));
        }
        request = request.with_upgrade_sequence(&pool.uuid, UpgradeSequence::new(entries));
    }
    Ok(request)
}

fn watch_shutdown(
    session: Arc<PrecheckSession>,
    interrupted: CancelFlag,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        shutdown_signal.await;
        interrupted.cancel();
        session.cancel();
    })
}

async fn drive(
    session: &PrecheckSession,
    service: &Arc<dyn PoolService>,
    hosts: &[Host],
    payload: Option<UpdatePayload>,
    options: &AppOptions,
    interrupted: &CancelFlag,
) -> Result<(), PrecheckError> {
    session.recheck().await?;
    let mut outcome = session.wait_for_run().await?;

    if outcome == RunOutcome::Completed && options.actions.resolve_all {
        if session.resolve_all_enabled() {
            outcome = resolve_all(session, interrupted).await?;
        } else if session.report().has_problems() {
            warn!("Some problems cannot be resolved automatically");
        }
    }

    if outcome != RunOutcome::Completed || interrupted.is_cancelled() {
        return Err(PrecheckError::Cancelled);
    }

    print_summary(session);
    if !session.can_proceed().await {
        let blocking = session.report().rows().filter(|r| r.is_problem()).count();
        return Err(PrecheckError::ProblemsFound(blocking));
    }

    if options.actions.apply {
        let payload = payload
            .ok_or_else(|| PrecheckError::ConfigError("Nothing to apply".to_string()))?;
        apply(service, hosts, payload, options, interrupted).await?;
    }
    Ok(())
}

/// Resolve every fixable problem, then wait for the recheck it triggers
async fn resolve_all(
    session: &PrecheckSession,
    interrupted: &CancelFlag,
) -> Result<RunOutcome, PrecheckError> {
    let Some(handle) = session.resolve_all().await? else {
        return Ok(RunOutcome::Completed);
    };
    info!("{}", handle.description());
    report_action(&handle, handle.wait_completed().await);

    session.wait_for_remediation().await;
    if interrupted.is_cancelled() {
        session.cancel();
    }
    session.wait_for_run().await
}

async fn apply(
    service: &Arc<dyn PoolService>,
    hosts: &[Host],
    payload: UpdatePayload,
    options: &AppOptions,
    interrupted: &CancelFlag,
) -> Result<(), PrecheckError> {
    let handles: Vec<ActionHandle> = match options.rollout.mode {
        UpdateMode::Manual => vec![ActionHandle::new(Arc::new(ApplyUpdateAction::new(
            service.clone(),
            vec![payload],
            hosts.to_vec(),
        )))],
        UpdateMode::Automated => {
            // coordinators first
            let mut ordered = hosts.to_vec();
            ordered.sort_by_key(|h| !h.is_master);
            let mut handles = Vec::new();
            for host in ordered {
                if service.is_update_applied(&payload, &host).await? {
                    info!("{} already has {}", host.name, payload.name());
                    continue;
                }
                let action = ApplyPoolUpdatePlanAction::new(service.clone(), host, payload.clone())
                    .with_cooldown(options.task_poll.clone());
                handles.push(ActionHandle::new(Arc::new(action)));
            }
            handles
        }
    };

    for handle in handles {
        if interrupted.is_cancelled() {
            return Err(PrecheckError::Cancelled);
        }
        info!("{}", handle.description());
        let state = handle.run().await;
        report_action(&handle, state.clone());
        if let ActionState::Failed(reason) = state {
            return Err(PrecheckError::TaskError(reason));
        }
    }
    Ok(())
}

fn report_action(handle: &ActionHandle, state: ActionState) {
    match state {
        ActionState::Succeeded => println!("{} {}", "✓".green(), handle.description()),
        ActionState::Cancelled => println!("{} {} (cancelled)", "-".yellow(), handle.description()),
        ActionState::Failed(reason) => {
            error!("{} failed: {}", handle.description(), reason);
            println!("{} {}: {}", "✗".red(), handle.description(), reason);
        }
        ActionState::NotStarted | ActionState::Running => {}
    }
}

fn paint(text: &str, result: PrecheckResult) -> ColoredString {
    match result {
        PrecheckResult::Ok => text.green(),
        PrecheckResult::Info => text.blue(),
        PrecheckResult::Warning => text.yellow(),
        PrecheckResult::Failed => text.red(),
    }
}

fn format_row(row: &HostRow) -> String {
    let mut line = paint(&row.description, row.result()).to_string();
    if !row.solution.is_empty() {
        line.push_str(&format!("\n        {}", row.solution.dimmed()));
    }
    line
}

/// Print rows as the orchestrator reports them
async fn print_events(mut events: mpsc::UnboundedReceiver<ReportEvent>, failures_only: bool) {
    while let Some(event) = events.recv().await {
        match event {
            ReportEvent::RunStarted { .. } => println!("{}", "Running prechecks".bold()),
            ReportEvent::GroupStarted { header, .. } => println!("{}", header.title.bold()),
            ReportEvent::Row { row, progress, .. } => {
                if failures_only && row.problem.is_none() {
                    continue;
                }
                println!("{} {}", format!("[{:>3}%]", progress).dimmed(), format_row(&row));
            }
            ReportEvent::GroupFinished { header } => {
                let result = header.result.unwrap_or(PrecheckResult::Ok);
                println!("{}", paint(&header.text(), result));
            }
            ReportEvent::RunFinished { outcome, .. } => match outcome {
                RunOutcome::Completed => println!("{}", "Prechecks finished".bold()),
                RunOutcome::Cancelled => println!("{}", "Prechecks cancelled".yellow()),
                RunOutcome::Failed => println!("{}", "Prechecks failed".red()),
            },
        }
    }
}

fn print_summary(session: &PrecheckSession) {
    let report = session.report();
    let problems = report.rows().filter(|r| r.is_problem()).count();
    let warnings = report
        .rows()
        .filter(|r| !r.is_problem() && r.problem.is_some())
        .count();
    let elapsed = report
        .duration()
        .map(|d| format!(" in {:.1}s", d.num_milliseconds() as f64 / 1000.0))
        .unwrap_or_default();

    let summary = format!(
        "{} problem(s), {} warning(s){}",
        problems, warnings, elapsed
    );
    if problems > 0 {
        println!("{}", summary.red());
    } else {
        println!("{}", summary.green());
    }
}
