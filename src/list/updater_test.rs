use std::sync::Arc;
use std::time::Duration;

use super::CoordinatorServerList;
use crate::list::ServerChangeEvent;
use crate::list::ServiceMask;
use crate::proto::ServerListType;
use crate::proto::ServiceType;
use crate::test_utils::storage_and_membership;
use crate::test_utils::test_config;
use crate::test_utils::FakeRpcFactory;
use crate::test_utils::FakeRpcOutcome;
use crate::test_utils::RecordingTracker;
use crate::MockUpdateRpc;
use crate::MockUpdateRpcFactory;
use crate::RosterConfig;

// Long enough that no RPC deadline fires inside a test run.
const LONG_TIMEOUT_NS: u64 = 600_000_000_000;

fn list_with_factory(config: RosterConfig) -> (CoordinatorServerList, Arc<FakeRpcFactory>) {
    crate::test_utils::enable_logs();
    let factory = Arc::new(FakeRpcFactory::default());
    let list =
        CoordinatorServerList::new(config, factory.clone()).expect("list should build");
    (list, factory)
}

/// Enlist-and-disseminate: a fresh server gets a full list, the change log
/// drains once everything is acknowledged.
#[test]
fn test_enlist_and_disseminate() {
    let (list, factory) = list_with_factory(test_config(5, LONG_TIMEOUT_NS));

    let id = list.generate_unique_id();
    list.add(id, "tcp:a".to_string(), storage_and_membership(), 0);
    assert_eq!(list.committed_version(), 1);

    list.sync().expect("sync should succeed");

    assert_eq!(list.get(id).unwrap().acknowledged_version, 1);
    assert!(!list.get(id).unwrap().update_in_flight);
    assert_eq!(list.history_len(), 0);

    let begun = factory.begun();
    assert_eq!(begun.len(), 1);
    let (target, payload) = &begun[0];
    assert_eq!(*target, id);
    assert_eq!(payload.r#type(), ServerListType::FullList);
    assert_eq!(payload.version_number, 1);
    assert_eq!(payload.servers.len(), 1);
}

/// A server that has already acknowledged a version receives incremental
/// batches, one per missing version, in order.
#[test]
fn test_incremental_updates_follow_full_list() {
    let (list, factory) = list_with_factory(test_config(5, LONG_TIMEOUT_NS));

    let a = list.generate_unique_id();
    list.add(a, "tcp:a".to_string(), storage_and_membership(), 0);
    list.sync().expect("sync should succeed");

    list.halt_updater();
    let b = list.generate_unique_id();
    list.add(b, "tcp:b".to_string(), ServiceMask::empty().with(ServiceType::MasterService), 0);
    let c = list.generate_unique_id();
    list.add(c, "tcp:c".to_string(), ServiceMask::empty().with(ServiceType::BackupService), 100);
    assert_eq!(list.committed_version(), 3);

    list.sync().expect("sync should succeed");

    let to_a: Vec<_> = factory
        .begun()
        .into_iter()
        .filter(|(target, _)| *target == a)
        .collect();
    assert_eq!(to_a.len(), 3);
    assert_eq!(to_a[0].1.r#type(), ServerListType::FullList);
    assert_eq!(to_a[1].1.version_number, 2);
    assert_eq!(to_a[1].1.r#type(), ServerListType::Update);
    assert_eq!(to_a[1].1.servers.len(), 1);
    assert_eq!(to_a[2].1.version_number, 3);
    assert_eq!(to_a[2].1.r#type(), ServerListType::Update);

    assert_eq!(list.get(a).unwrap().acknowledged_version, 3);
    assert_eq!(list.history_len(), 0);
}

/// Timeout retries: the first dispatch hangs past the deadline, the retry
/// succeeds, and the subscriber saw the addition exactly once.
#[test]
fn test_rpc_timeout_triggers_retry() {
    let factory = Arc::new(FakeRpcFactory::default());
    factory.script([FakeRpcOutcome::NeverReady]);
    let tracker = Arc::new(RecordingTracker::default());

    let list = CoordinatorServerList::new(test_config(5, 1), factory.clone())
        .expect("list should build");
    list.register_tracker(tracker.clone());

    let id = list.generate_unique_id();
    list.add(id, "tcp:slow".to_string(), storage_and_membership(), 0);

    list.sync().expect("sync should succeed");

    assert!(factory.begun_count() >= 2, "timed-out dispatch must be retried");
    assert_eq!(list.get(id).unwrap().acknowledged_version, 1);
    let added: Vec<_> = tracker
        .events()
        .into_iter()
        .filter(|(_, event)| *event == ServerChangeEvent::ServerAdded)
        .collect();
    assert_eq!(added.len(), 1);
}

/// The injected factory is handed the target's id, its service locator
/// and the loaded payload.
#[test]
fn test_factory_receives_target_and_payload() {
    crate::test_utils::enable_logs();

    let mut factory = MockUpdateRpcFactory::new();
    factory
        .expect_begin_update()
        .withf(|target, locator, payload| {
            target.slot_index() == 1
                && locator == "tcp:mock"
                && payload.r#type() == ServerListType::FullList
                && payload.version_number == 1
        })
        .times(1)
        .returning(|_, _, _| {
            let mut rpc = MockUpdateRpc::new();
            rpc.expect_is_ready().return_const(true);
            rpc.expect_wait().times(1).returning(|| Ok(()));
            Box::new(rpc)
        });

    let list = CoordinatorServerList::new(test_config(5, LONG_TIMEOUT_NS), Arc::new(factory))
        .expect("list should build");
    let id = list.generate_unique_id();
    list.add(id, "tcp:mock".to_string(), storage_and_membership(), 0);

    list.sync().expect("sync should succeed");
    assert_eq!(list.get(id).unwrap().acknowledged_version, 1);
}

/// An RPC that completes late but within its deadline is not retried.
#[test]
fn test_slow_rpc_completes_within_deadline() {
    let (list, factory) = list_with_factory(test_config(5, LONG_TIMEOUT_NS));
    factory.script([FakeRpcOutcome::ReadyAfter(Duration::from_millis(50))]);

    let id = list.generate_unique_id();
    list.add(id, "tcp:a".to_string(), storage_and_membership(), 0);

    list.sync().expect("sync should succeed");
    assert_eq!(factory.begun_count(), 1);
    assert_eq!(list.get(id).unwrap().acknowledged_version, 1);
}

/// ServerNotUp is absorbed: the target's version is reverted and another
/// attempt follows.
#[test]
fn test_server_not_up_is_absorbed_and_retried() {
    let (list, factory) = list_with_factory(test_config(5, LONG_TIMEOUT_NS));
    factory.script([FakeRpcOutcome::ServerNotUp]);

    let id = list.generate_unique_id();
    list.add(id, "tcp:a".to_string(), storage_and_membership(), 0);

    list.sync().expect("sync should succeed");

    assert!(factory.begun_count() >= 2);
    assert_eq!(list.get(id).unwrap().acknowledged_version, 1);
}

/// Halt mid-flight: in-flight RPCs are cancelled and their targets'
/// acknowledged versions revert to what they were before dispatch.
#[test]
fn test_halt_reverts_in_flight_updates() {
    let (list, factory) = list_with_factory(test_config(5, LONG_TIMEOUT_NS));
    factory.script([FakeRpcOutcome::NeverReady, FakeRpcOutcome::NeverReady]);

    let a = list.generate_unique_id();
    list.add(a, "tcp:a".to_string(), storage_and_membership(), 0);
    let b = list.generate_unique_id();
    list.add(b, "tcp:b".to_string(), storage_and_membership(), 0);

    assert!(
        factory.wait_until(Duration::from_secs(5), |f| f.begun_count() >= 2),
        "both updates should be dispatched"
    );

    list.halt_updater();

    assert!(factory.cancelled_count() >= 2);
    for id in [a, b] {
        let entry = list.get(id).unwrap();
        assert_eq!(entry.acknowledged_version, 0);
        assert!(!entry.update_in_flight);
    }
}

/// At most `concurrent_rpcs` updates are outstanding at any instant, each
/// to a distinct server.
#[test]
fn test_dispatch_pool_bounds_concurrency() {
    let factory = Arc::new(FakeRpcFactory::default());
    factory.script(std::iter::repeat(FakeRpcOutcome::NeverReady).take(32));

    let list = CoordinatorServerList::new(test_config(5, LONG_TIMEOUT_NS), factory.clone())
        .expect("list should build");

    for i in 0..10 {
        let id = list.generate_unique_id();
        list.add(id, format!("tcp:{i}"), storage_and_membership(), 0);
    }

    assert!(
        factory.wait_until(Duration::from_secs(5), |f| f.begun_count() >= 5),
        "the pool should fill up"
    );
    assert!(factory.max_outstanding() <= 5);

    let begun = factory.begun();
    let mut targets: Vec<_> = begun.iter().map(|(target, _)| *target).collect();
    targets.sort_by_key(|t| t.as_u64());
    targets.dedup();
    assert_eq!(targets.len(), begun.len(), "each in-flight update targets a distinct server");

    list.halt_updater();
    assert!(factory.max_outstanding() <= 5);
}

/// A non-ServerNotUp RPC error kills the background worker; mutations keep
/// succeeding locally and a later sync respawns the worker.
#[test]
fn test_fatal_rpc_error_stops_worker_until_restarted() {
    let (list, factory) = list_with_factory(test_config(5, LONG_TIMEOUT_NS));
    factory.script([FakeRpcOutcome::Fail]);

    let a = list.generate_unique_id();
    list.add(a, "tcp:a".to_string(), storage_and_membership(), 0);

    assert!(
        factory.wait_until(Duration::from_secs(5), |f| f.begun_count() >= 1),
        "the poisoned update should be dispatched"
    );
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while list.updater_is_running() && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(1));
    }
    assert!(!list.updater_is_running());

    // Local mutations still succeed without a worker.
    let b = list.generate_unique_id();
    list.add(b, "tcp:b".to_string(), storage_and_membership(), 0);
    assert_eq!(list.committed_version(), 2);

    // sync restarts the worker; the drained script falls back to success.
    list.sync().expect("sync should succeed after restart");
    assert_eq!(list.get(a).unwrap().acknowledged_version, 2);
    assert_eq!(list.get(b).unwrap().acknowledged_version, 2);
    assert_eq!(list.history_len(), 0);
}

/// Servers without the membership service are never update targets and do
/// not hold up sync.
#[test]
fn test_non_membership_servers_are_not_updated() {
    let (list, factory) = list_with_factory(test_config(5, LONG_TIMEOUT_NS));

    let id = list.generate_unique_id();
    list.add(
        id,
        "tcp:a".to_string(),
        ServiceMask::empty().with(ServiceType::MasterService),
        0,
    );

    list.sync().expect("sync should succeed");
    assert_eq!(factory.begun_count(), 0);
    assert_eq!(list.get(id).unwrap().acknowledged_version, 0);
}

/// Crashing an update target mid-dissemination leaves the engine
/// consistent: the crashed entry stops being eligible and sync completes.
#[test]
fn test_crash_during_dissemination() {
    let (list, factory) = list_with_factory(test_config(5, LONG_TIMEOUT_NS));
    factory.script([FakeRpcOutcome::NeverReady]);

    let a = list.generate_unique_id();
    list.add(a, "tcp:a".to_string(), storage_and_membership(), 0);

    assert!(
        factory.wait_until(Duration::from_secs(5), |f| f.begun_count() >= 1),
        "the update should be dispatched"
    );

    list.crashed(a).expect("crashed should succeed");
    list.sync().expect("sync should succeed");
    assert_eq!(list.get(a).unwrap().status, crate::proto::ServerStatus::Crashed);
}

/// Restarting after a clean halt resumes dissemination from the retained
/// backlog.
#[test]
fn test_restart_after_halt_resumes() {
    let (list, factory) = list_with_factory(test_config(5, LONG_TIMEOUT_NS));

    list.halt_updater();
    let id = list.generate_unique_id();
    list.add(id, "tcp:a".to_string(), storage_and_membership(), 0);
    assert_eq!(factory.begun_count(), 0);

    list.sync().expect("sync should succeed");
    assert_eq!(list.get(id).unwrap().acknowledged_version, 1);
    assert_eq!(list.history_len(), 0);
}
