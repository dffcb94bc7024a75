//! Background dissemination engine.
//!
//! One long-lived worker drives a fixed pool of update slots: it scans the
//! server table for entries lagging behind the committed version, dispatches
//! bounded-concurrency update RPCs (full snapshots for servers that have
//! never acknowledged a version, incremental batches otherwise), enforces a
//! per-RPC deadline, and prunes the change log once no subscriber still
//! needs an old batch. The lock is held only for the short scanning and
//! bookkeeping sections; RPC dispatch and readiness checks run without it.

use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::list::coordinator_list::ListShared;
use crate::list::coordinator_list::ListState;
use crate::list::ServerId;
use crate::list::ServiceMask;
use crate::metrics::INFLIGHT_RPC_GAUGE;
use crate::network::UpdateRpc;
use crate::proto::ServerListPayload;
use crate::proto::ServerStatus;
use crate::NetworkError;

/// Cursor of the eligibility scan over the server table.
///
/// `min_version` accumulates the smallest non-zero acknowledged version
/// seen on the current sweep; every pass through index 0 prunes the change
/// log up to it and restarts the accumulation. `no_updates_found`
/// short-circuits repeat scans until a commit or a version revert
/// invalidates it.
#[derive(Debug, Default)]
pub(crate) struct ScanState {
    pub(crate) search_index: usize,
    pub(crate) min_version: u64,
    pub(crate) no_updates_found: bool,
}

/// One position of the dispatch pool.
struct UpdateSlot {
    server_id: ServerId,
    service_locator: String,
    /// The target's acknowledged version when the RPC was loaded; restored
    /// on timeout, cancellation or ServerNotUp so the next run retries.
    original_version: u64,
    payload: ServerListPayload,
    rpc: Option<Box<dyn UpdateRpc>>,
    started_at: Instant,
}

impl UpdateSlot {
    fn idle() -> Self {
        Self {
            server_id: ServerId::new(0, 0),
            service_locator: String::new(),
            original_version: 0,
            payload: ServerListPayload::default(),
            rpc: None,
            started_at: Instant::now(),
        }
    }
}

/// Main loop of the updater thread; exits when halted or on a fatal RPC
/// error. Cancels every in-flight RPC on the way out and reverts the
/// targets so the next run retries them.
pub(crate) fn update_loop(shared: Arc<ListShared>) {
    let rpc_timeout = Duration::from_nanos(shared.config.rpc_timeout_ns);
    let mut slots: Vec<UpdateSlot> = (0..shared.config.concurrent_rpcs)
        .map(|_| UpdateSlot::idle())
        .collect();

    debug!(
        "updater started: pool={} timeout={:?}",
        slots.len(),
        rpc_timeout
    );

    'main: loop {
        let mut no_active_rpcs = true;

        for slot in slots.iter_mut() {
            if shared.state.lock().stop_updater {
                break 'main;
            }
            match dispatch(&shared, slot, rpc_timeout) {
                Ok(true) => no_active_rpcs = false,
                Ok(false) => {}
                Err(e) => {
                    error!("Fatal error in coordinator server list updater: {e}");
                    break 'main;
                }
            }
        }

        // If there are no updates and no active rpcs, wait for more.
        if no_active_rpcs {
            let mut state = shared.state.lock();
            while !has_updates(&shared, &mut state) && !state.stop_updater {
                debug_assert!(state.is_cluster_up_to_date());
                shared.list_up_to_date.notify_all();
                shared.has_updates_or_stop.wait(&mut state);
            }
            if state.stop_updater {
                break 'main;
            }
        }
    }

    for slot in slots.iter_mut() {
        if let Some(mut rpc) = slot.rpc.take() {
            rpc.cancel();
            update_entry_version(&shared, slot.server_id, slot.original_version);
        }
    }

    debug!("updater stopped");
}

/// Follow up on the slot's RPC (completion, error, deadline) and start the
/// next one if there is work. Returns whether the slot now holds an active
/// RPC; a non-ServerNotUp RPC error is fatal and bubbles up.
fn dispatch(
    shared: &ListShared,
    slot: &mut UpdateSlot,
    rpc_timeout: Duration,
) -> std::result::Result<bool, NetworkError> {
    if slot.rpc.is_some() {
        let is_ready = slot.rpc.as_ref().is_some_and(|rpc| rpc.is_ready());

        if is_ready {
            let result = match slot.rpc.take() {
                Some(mut rpc) => rpc.wait(),
                None => Ok(()),
            };

            let new_version = match result {
                Ok(()) => slot.payload.version_number,
                Err(NetworkError::ServerNotUp(_)) => {
                    info!(
                        "async update to {} occurred during/after it was \
                         crashed/removed from the server list",
                        slot.server_id
                    );
                    slot.original_version
                }
                Err(e) => {
                    // Keep the bookkeeping consistent before the engine
                    // shuts down.
                    update_entry_version(shared, slot.server_id, slot.original_version);
                    return Err(e);
                }
            };
            update_entry_version(shared, slot.server_id, new_version);

            // Check timeout event
        } else if slot.started_at.elapsed() > rpc_timeout {
            warn!(
                "update rpc to {} exceeded {:?}; retrying",
                slot.server_id, rpc_timeout
            );
            if let Some(mut rpc) = slot.rpc.take() {
                rpc.cancel();
            }
            update_entry_version(shared, slot.server_id, slot.original_version);
        }
    }

    // Valid update still in progress
    if slot.rpc.is_some() {
        return Ok(true);
    }

    // Else load new rpc and start if applicable
    if !load_next_update(shared, slot) {
        return Ok(false);
    }

    slot.rpc = Some(shared.rpc_factory.begin_update(
        slot.server_id,
        &slot.service_locator,
        &slot.payload,
    ));
    slot.started_at = Instant::now();

    Ok(true)
}

/// Scan for an entry that is out of date and has no RPC attached yet.
///
/// Omits entries currently being updated, so false does not imply the
/// cluster is up to date. Found entries leave the cursor parked on them
/// for [`load_next_update`].
pub(crate) fn has_updates(
    shared: &ListShared,
    state: &mut ListState,
) -> bool {
    if state.last_scan.no_updates_found || state.table.is_empty() {
        return false;
    }

    let len = state.table.len();
    let committed = state.changelog.committed_version();
    let mut i = state.last_scan.search_index.min(len - 1);
    let start = i;

    loop {
        if i == 0 {
            let min_version = state.last_scan.min_version;
            if state.changelog.prune_updates(min_version) {
                shared.list_up_to_date.notify_all();
            }
            state.last_scan.min_version = 0;
        }

        if let Some(entry) = state.table.slot(i).and_then(|slot| slot.entry()) {
            if entry.offers_membership() && entry.status == ServerStatus::Up {
                let ack = entry.acknowledged_version;

                // Track the slowest acknowledged entry for pruning.
                if state.last_scan.min_version == 0 || (ack > 0 && ack < state.last_scan.min_version)
                {
                    state.last_scan.min_version = ack;
                }

                if ack != committed && !entry.update_in_flight {
                    state.last_scan.search_index = i;
                    state.last_scan.no_updates_found = false;
                    return true;
                }
            }
        }

        i = (i + 1) % len;
        if i == start {
            break;
        }
    }

    state.last_scan.no_updates_found = true;
    false
}

/// Load the next pending update into `slot`: mark the target in flight and
/// pick its payload: a full snapshot for a server that has never
/// acknowledged a version, otherwise the one committed batch it is missing
/// next. Whoever loads a slot must report back through
/// [`update_entry_version`] exactly once, whatever the RPC outcome.
fn load_next_update(
    shared: &ListShared,
    slot: &mut UpdateSlot,
) -> bool {
    let mut state = shared.state.lock();

    if !has_updates(shared, &mut state) {
        return false;
    }

    // The cursor was parked on the eligible entry by has_updates.
    let index = state.last_scan.search_index;
    state.last_scan.search_index = (index + 1) % state.table.len();

    let (id, locator, ack) = match state
        .table
        .slot_mut(index)
        .and_then(|table_slot| table_slot.entry_mut())
    {
        Some(entry) => {
            entry.update_in_flight = true;
            (entry.id, entry.service_locator.clone(), entry.acknowledged_version)
        }
        // has_updates just saw an occupied slot here; nothing can have
        // removed it while the lock was held.
        None => return false,
    };
    INFLIGHT_RPC_GAUGE.inc();

    slot.server_id = id;
    slot.service_locator = locator;
    slot.original_version = ack;

    if ack == 0 {
        slot.payload = state.serialize_filtered(ServiceMask::storage_services());
    } else {
        let wanted = ack + 1;
        slot.payload = match state.changelog.batch_at_version(wanted) {
            Some(batch) => batch.clone(),
            None => {
                // Possible when this server bootstrapped from a snapshot
                // older than the committed version while the scan, which
                // excludes unacknowledged entries from its minimum, pruned
                // past the versions it still misses. Resynchronize with a
                // fresh snapshot.
                warn!(
                    "update batch v{} for {} already pruned; sending full list",
                    wanted, id
                );
                state.serialize_filtered(ServiceMask::storage_services())
            }
        };
    }

    true
}

/// Record the outcome of an update RPC: set the target's acknowledged
/// version and clear its in-flight flag. Targets that left the cluster in
/// the meantime are ignored silently. A revert (version below the
/// committed one) re-arms the scan; once nothing lags any more, the change
/// log is pruned and `sync` callers wake up.
pub(crate) fn update_entry_version(
    shared: &ListShared,
    id: ServerId,
    version: u64,
) {
    let mut state = shared.state.lock();
    INFLIGHT_RPC_GAUGE.dec();

    let committed = state.changelog.committed_version();
    match state.table.get_mut(id) {
        Ok(entry) => {
            debug!(
                "server {} updated ({}->{})",
                id, entry.acknowledged_version, version
            );
            entry.acknowledged_version = version;
            entry.update_in_flight = false;

            if version < committed {
                state.last_scan.no_updates_found = false;
                shared.has_updates_or_stop.notify_one();
            }

            if state.is_cluster_up_to_date() && state.changelog.prune_updates(committed) {
                shared.list_up_to_date.notify_all();
            }
        }
        Err(_) => {
            // Don't care if the entry no longer exists.
        }
    }
}
