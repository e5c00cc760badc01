//! Check plan layout tests

use patch_precheck::models::{Host, PoolPatch, UpdateMode, UpdatePayload, UpgradeSequence};
use patch_precheck::plan::{
    required_disk_space, PatchPlanBuilder, PlanBuilder, PlanRequest, PoolUpdatePlanBuilder, GROUP_DISK_SPACE,
    GROUP_EVACUATE, GROUP_HA, GROUP_LIVENESS, GROUP_REBOOT, GROUP_SERVER_SIDE, GROUP_STORAGE,
};
use xenapi_models::{AfterApplyGuidance, UpdateAfterApplyGuidance};

use crate::mock_service::{host, pool, two_hosts, update};

#[test]
fn test_manual_update_without_restart() {
    let builder = PoolUpdatePlanBuilder::new(Some(update("u1", 100)));
    let plan = builder.build_plan(&PlanRequest::new(two_hosts(), UpdateMode::Manual));

    assert_eq!(
        plan.group_names(),
        vec![GROUP_LIVENESS, GROUP_HA, GROUP_STORAGE, GROUP_SERVER_SIDE, GROUP_REBOOT]
    );
    // HA is checked once, on the coordinator
    assert_eq!(plan.groups[1].len(), 1);
    assert_eq!(plan.groups[1].checks[0].host().uuid, "h1");
    assert_eq!(plan.check_count(), 2 + 1 + 2 + 2 + 2);
}

#[test]
fn test_restart_guidance_adds_evacuation() {
    let mut restart = update("u1", 100);
    restart.after_apply_guidance = vec![UpdateAfterApplyGuidance::RestartHost];
    let plan = PoolUpdatePlanBuilder::new(Some(restart))
        .build_plan(&PlanRequest::new(two_hosts(), UpdateMode::Manual));

    assert_eq!(plan.group_names().last(), Some(&GROUP_EVACUATE));
}

#[test]
fn test_patch_builder_reads_patch_guidance() {
    let patch = PoolPatch {
        uuid: "p1".to_string(),
        name: "hotfix".to_string(),
        size: 10,
        after_apply_guidance: vec![AfterApplyGuidance::RestartHost],
    };
    let builder = PatchPlanBuilder::new(Some(patch));
    assert!(builder.reboot_guidance().restart_host);
    assert!(matches!(builder.payload(), Some(UpdatePayload::Patch(_))));

    let plan = builder.build_plan(&PlanRequest::new(two_hosts(), UpdateMode::Manual));
    assert!(plan.group_names().contains(&GROUP_SERVER_SIDE));
    assert!(plan.group_names().contains(&GROUP_EVACUATE));
}

#[test]
fn test_no_payload_checks_restart_only() {
    let plan = PoolUpdatePlanBuilder::new(None)
        .build_plan(&PlanRequest::new(two_hosts(), UpdateMode::Manual));

    assert_eq!(
        plan.group_names(),
        vec![GROUP_LIVENESS, GROUP_HA, GROUP_STORAGE, GROUP_REBOOT, GROUP_EVACUATE]
    );
}

#[test]
fn test_automated_mode_checks_disk_space() {
    let hosts = two_hosts();
    let payload = UpdatePayload::Update(update("u1", 100));
    let sequence = UpgradeSequence::new(vec![
        (hosts[0].clone(), vec![payload.clone()]),
        (hosts[1].clone(), vec![payload]),
    ]);
    let request = PlanRequest::new(hosts, UpdateMode::Automated)
        .with_upgrade_sequence("pool-a", sequence);

    let plan = PoolUpdatePlanBuilder::new(Some(update("u1", 100))).build_plan(&request);
    let names = plan.group_names();

    assert!(names.contains(&GROUP_DISK_SPACE));
    // no per-update reboot row when everything is applied unattended
    assert!(!names.contains(&GROUP_REBOOT));
    let disk = plan
        .groups
        .iter()
        .find(|g| g.name == GROUP_DISK_SPACE)
        .unwrap();
    assert_eq!(disk.len(), 2);
}

#[test]
fn test_automated_mode_without_sequence_has_empty_disk_group() {
    let plan = PoolUpdatePlanBuilder::new(Some(update("u1", 100)))
        .build_plan(&PlanRequest::new(two_hosts(), UpdateMode::Automated));

    let disk = plan
        .groups
        .iter()
        .find(|g| g.name == GROUP_DISK_SPACE)
        .unwrap();
    assert!(disk.is_empty());
}

fn three_hosts(ely_or_greater: bool) -> Vec<Host> {
    let mut p = pool("pool-b");
    p.ely_or_greater = ely_or_greater;
    vec![host("m", &p, true), host("s1", &p, false), host("s2", &p, false)]
}

fn same_update_everywhere(hosts: &[Host]) -> UpgradeSequence {
    let payload = UpdatePayload::Update(update("u1", 100));
    UpgradeSequence::new(
        hosts
            .iter()
            .map(|h| (h.clone(), vec![payload.clone()]))
            .collect(),
    )
}

#[test]
fn test_disk_space_with_pool_margin() {
    let hosts = three_hosts(false);
    let sequence = same_update_everywhere(&hosts);

    // own update plus the largest update in the pool, master or not
    let required: Vec<u64> = hosts
        .iter()
        .map(|h| required_disk_space(&sequence, h, false))
        .collect();
    assert_eq!(required, vec![200, 200, 200]);

    let request = PlanRequest::new(hosts, UpdateMode::Automated)
        .with_upgrade_sequence("pool-b", sequence);
    let plan = PoolUpdatePlanBuilder::new(Some(update("u1", 100))).build_plan(&request);
    let disk = plan
        .groups
        .iter()
        .find(|g| g.name == GROUP_DISK_SPACE)
        .unwrap();
    let checked: Vec<&str> = disk.checks.iter().map(|c| c.host().uuid.as_str()).collect();
    assert_eq!(checked, vec!["m", "s1", "s2"]);
}

#[test]
fn test_disk_space_without_margin_on_ely() {
    let hosts = three_hosts(true);
    let sequence = same_update_everywhere(&hosts);

    for h in &hosts {
        assert_eq!(required_disk_space(&sequence, h, true), 100);
    }
}
