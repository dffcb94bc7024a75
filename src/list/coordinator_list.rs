//! The coordinator's authoritative server list.
//!
//! This module:
//! - Tracks every enlisted server (masters and backups) with a stable
//!   identity and a status
//! - Sequences membership transitions into versioned update batches
//! - Pushes membership-change notifications to registered trackers
//! - Owns the background updater that disseminates cluster-view updates
//!
//! All state lives behind one mutex; two condition variables coordinate the
//! caller threads with the background updater. Both are level-triggered, so
//! every wait re-checks its predicate. Tracker callbacks fire while the lock
//! is held and must not call back into the list.

use std::sync::Arc;
use std::thread;
use std::thread::JoinHandle;

use autometrics::autometrics;
use parking_lot::Condvar;
use parking_lot::Mutex;
use tracing::error;
use tracing::trace;

use crate::list::updater::update_loop;
use crate::list::ChangeLog;
use crate::list::LogEntryId;
use crate::list::ScanState;
use crate::list::ServerChangeEvent;
use crate::list::ServerEntry;
use crate::list::ServerId;
use crate::list::ServerTracker;
use crate::list::ServiceMask;
use crate::list::SlotState;
use crate::list::SlotTable;
use crate::network::UpdateRpcFactory;
use crate::proto::ServerListPayload;
use crate::proto::ServerListType;
use crate::proto::ServerStatus;
use crate::Error;
use crate::Result;
use crate::RosterConfig;
use crate::ServerListError;
use crate::UpdaterConfig;
use crate::API_SLO;

/// Everything the mutex guards.
pub(crate) struct ListState {
    pub(crate) table: SlotTable,
    /// Cached projection of UP entries offering the master service.
    pub(crate) num_masters: u32,
    /// Cached projection of UP entries offering the backup service.
    pub(crate) num_backups: u32,
    pub(crate) changelog: ChangeLog,
    pub(crate) last_scan: ScanState,
    pub(crate) trackers: Vec<Arc<dyn ServerTracker>>,
    pub(crate) stop_updater: bool,
}

impl ListState {
    /// True when every UP entry offering the membership service has
    /// acknowledged the committed version and has no RPC outstanding.
    pub(crate) fn is_cluster_up_to_date(&self) -> bool {
        let committed = self.changelog.committed_version();
        self.table.entries().all(|entry| {
            !(entry.offers_membership() && entry.status == ServerStatus::Up)
                || (entry.acknowledged_version == committed && !entry.update_in_flight)
        })
    }

    /// Full-list snapshot of every entry whose services intersect
    /// `services`, tagged with the committed version.
    pub(crate) fn serialize_filtered(
        &self,
        services: ServiceMask,
    ) -> ServerListPayload {
        let mut payload = ServerListPayload {
            version_number: self.changelog.committed_version(),
            ..Default::default()
        };
        payload.set_type(ServerListType::FullList);

        for entry in self.table.entries() {
            if entry.services.intersects(services) {
                payload.servers.push(entry.serialize());
            }
        }

        payload
    }

    fn notify_trackers(
        &self,
        entry: &ServerEntry,
        event: ServerChangeEvent,
    ) {
        for tracker in &self.trackers {
            tracker.enqueue_change(entry, event);
        }
        for tracker in &self.trackers {
            tracker.fire_callback();
        }
    }

    /// The cached counts must stay derivable from the table.
    fn debug_check_counts(&self) {
        #[cfg(debug_assertions)]
        {
            let masters = self
                .table
                .entries()
                .filter(|e| e.status == ServerStatus::Up && e.is_master())
                .count() as u32;
            let backups = self
                .table
                .entries()
                .filter(|e| e.status == ServerStatus::Up && e.is_backup())
                .count() as u32;
            debug_assert_eq!(self.num_masters, masters);
            debug_assert_eq!(self.num_backups, backups);
        }
    }
}

/// State plus the signalling shared between callers and the updater.
pub(crate) struct ListShared {
    pub(crate) state: Mutex<ListState>,
    /// Signalled by commit, lifecycle changes and version reverts.
    pub(crate) has_updates_or_stop: Condvar,
    /// Signalled when the update backlog empties and before the updater
    /// goes to sleep.
    pub(crate) list_up_to_date: Condvar,
    pub(crate) rpc_factory: Arc<dyn UpdateRpcFactory>,
    pub(crate) config: UpdaterConfig,
}

impl ListShared {
    /// Bump the version and enqueue the pending batch; no-op when nothing
    /// is pending so empty mutations never burn a version.
    pub(crate) fn commit_update(
        &self,
        state: &mut ListState,
    ) {
        if state.changelog.commit_update() {
            state.last_scan.no_updates_found = false;
            self.has_updates_or_stop.notify_one();
        }
    }
}

/// The coordinator-side authoritative server list.
///
/// Single source of truth for who is in the cluster and in what state;
/// every membership transition is assigned a version and asynchronously
/// disseminated to all members that subscribe to membership notifications.
pub struct CoordinatorServerList {
    shared: Arc<ListShared>,
    updater_thread: Mutex<Option<JoinHandle<()>>>,
}

impl CoordinatorServerList {
    /// Build the list and start its background updater.
    ///
    /// `rpc_factory` is the injected source of update RPCs; the list never
    /// installs itself into any registry the factory could read.
    pub fn new(
        config: RosterConfig,
        rpc_factory: Arc<dyn UpdateRpcFactory>,
    ) -> Result<Self> {
        config.validate()?;

        let shared = Arc::new(ListShared {
            state: Mutex::new(ListState {
                table: SlotTable::default(),
                num_masters: 0,
                num_backups: 0,
                changelog: ChangeLog::new(config.updater.history_high_water),
                last_scan: ScanState::default(),
                trackers: Vec::new(),
                stop_updater: true,
            }),
            has_updates_or_stop: Condvar::new(),
            list_up_to_date: Condvar::new(),
            rpc_factory,
            config: config.updater,
        });

        let list = Self {
            shared,
            updater_thread: Mutex::new(None),
        };
        list.start_updater()?;
        Ok(list)
    }

    /// Subscribe a tracker to membership changes. Both tracker calls run
    /// under the list lock, in registration order.
    pub fn register_tracker(
        &self,
        tracker: Arc<dyn ServerTracker>,
    ) {
        self.shared.state.lock().trackers.push(tracker);
    }

    /// Generate a new, unique [`ServerId`] that may later be assigned to a
    /// server using [`add`](Self::add). The slot is reserved until then.
    pub fn generate_unique_id(&self) -> ServerId {
        let mut state = self.shared.state.lock();

        let index = state.table.first_free_index();
        let slot = state.table.grow_for(index);
        let id = ServerId::new(index as u32, slot.next_generation);
        slot.next_generation += 1;
        slot.state = SlotState::Reserved { id };

        trace!("issued server id {}", id);
        id
    }

    /// Enlist a server under `id` and commit the addition as one version.
    ///
    /// `id` may come from [`generate_unique_id`](Self::generate_unique_id)
    /// (normal enlistment) or from replaying a prior leader's decisions
    /// (recovery); both paths yield identical state. Any `remove`/`crashed`
    /// for a prior incarnation of the slot must have been committed before
    /// the slot is reused, so subscribers observe departure before arrival.
    ///
    /// `read_speed` is recorded only when `services` includes the backup
    /// service.
    #[autometrics(objective = API_SLO)]
    pub fn add(
        &self,
        id: ServerId,
        service_locator: String,
        services: ServiceMask,
        read_speed: u32,
    ) {
        let mut state = self.shared.state.lock();
        self.add_locked(&mut state, id, service_locator, services, read_speed);
        self.shared.commit_update(&mut state);
    }

    /// Mark a server as crashed (its recovery resources must be retained).
    /// No-op if already crashed.
    #[autometrics(objective = API_SLO)]
    pub fn crashed(
        &self,
        id: ServerId,
    ) -> Result<()> {
        let mut state = self.shared.state.lock();
        self.crashed_locked(&mut state, id)?;
        self.shared.commit_update(&mut state);
        Ok(())
    }

    /// Remove a server for good: crash it first when still up, record the
    /// DOWN transition, destroy the entry and free its slot for reuse under
    /// a higher generation. Both change records land in one committed
    /// batch.
    #[autometrics(objective = API_SLO)]
    pub fn remove(
        &self,
        id: ServerId,
    ) -> Result<()> {
        let mut state = self.shared.state.lock();
        self.remove_locked(&mut state, id)?;
        self.shared.commit_update(&mut state);
        Ok(())
    }

    /// Raise the min open segment id of a server. Writes that would lower
    /// it are silently ignored.
    pub fn set_min_open_segment_id(
        &self,
        id: ServerId,
        segment_id: u64,
    ) -> Result<()> {
        let mut state = self.shared.state.lock();
        let entry = state.table.get_mut(id)?;
        if entry.min_open_segment_id < segment_id {
            entry.min_open_segment_id = segment_id;
        }
        Ok(())
    }

    pub fn set_replication_group_id(
        &self,
        id: ServerId,
        replication_group_id: u64,
    ) -> Result<()> {
        let mut state = self.shared.state.lock();
        state.table.get_mut(id)?.replication_group_id = replication_group_id;
        Ok(())
    }

    /// Record the persistent-log handle holding the server's initial
    /// enlistment information.
    pub fn set_initial_info_log_id(
        &self,
        id: ServerId,
        log_id: LogEntryId,
    ) -> Result<()> {
        let mut state = self.shared.state.lock();
        state.table.get_mut(id)?.initial_info_log_id = log_id;
        Ok(())
    }

    pub fn get_initial_info_log_id(
        &self,
        id: ServerId,
    ) -> Result<LogEntryId> {
        let state = self.shared.state.lock();
        Ok(state.table.get(id)?.initial_info_log_id)
    }

    /// Record the persistent-log handle holding the server's update
    /// records.
    pub fn set_updates_log_id(
        &self,
        id: ServerId,
        log_id: LogEntryId,
    ) -> Result<()> {
        let mut state = self.shared.state.lock();
        state.table.get_mut(id)?.updates_log_id = log_id;
        Ok(())
    }

    pub fn get_updates_log_id(
        &self,
        id: ServerId,
    ) -> Result<LogEntryId> {
        let state = self.shared.state.lock();
        Ok(state.table.get(id)?.updates_log_id)
    }

    /// A copy of the entry associated with `id`.
    pub fn get(
        &self,
        id: ServerId,
    ) -> Result<ServerEntry> {
        let state = self.shared.state.lock();
        Ok(state.table.get(id)?.clone())
    }

    /// A copy of the entry at `index`, or `None` when the position is
    /// unoccupied.
    pub fn get_at(
        &self,
        index: usize,
    ) -> Result<Option<ServerEntry>> {
        let state = self.shared.state.lock();
        if index >= state.table.len() {
            return Err(ServerListError::IndexOutOfRange {
                index,
                len: state.table.len(),
            }
            .into());
        }
        Ok(state.table.slot(index).and_then(|slot| slot.entry()).cloned())
    }

    /// Number of valid indexes in the list (not necessarily occupied).
    pub fn len(&self) -> usize {
        self.shared.state.lock().table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.state.lock().table.is_empty()
    }

    /// Number of UP servers offering the master service.
    pub fn master_count(&self) -> u32 {
        self.shared.state.lock().num_masters
    }

    /// Number of UP servers offering the backup service.
    pub fn backup_count(&self) -> u32 {
        self.shared.state.lock().num_backups
    }

    /// Position of the first master at or after `start_index`, if any.
    pub fn next_master_index(
        &self,
        start_index: usize,
    ) -> Option<usize> {
        let state = self.shared.state.lock();
        (start_index..state.table.len()).find(|&i| {
            state
                .table
                .slot(i)
                .and_then(|slot| slot.entry())
                .is_some_and(|entry| entry.is_master())
        })
    }

    /// Position of the first backup at or after `start_index`, if any.
    pub fn next_backup_index(
        &self,
        start_index: usize,
    ) -> Option<usize> {
        let state = self.shared.state.lock();
        (start_index..state.table.len()).find(|&i| {
            state
                .table
                .slot(i)
                .and_then(|slot| slot.entry())
                .is_some_and(|entry| entry.is_backup())
        })
    }

    /// Serialize the entries useful for disseminating cluster membership:
    /// those offering the master or backup service.
    pub fn serialize(&self) -> ServerListPayload {
        self.serialize_filtered(ServiceMask::storage_services())
    }

    /// Serialize the part of the list whose services intersect `services`.
    pub fn serialize_filtered(
        &self,
        services: ServiceMask,
    ) -> ServerListPayload {
        self.shared.state.lock().serialize_filtered(services)
    }

    /// Block until the whole cluster is up-to-date: every UP server
    /// offering the membership service has acknowledged the committed
    /// version and has no update RPC outstanding.
    #[autometrics(objective = API_SLO)]
    pub fn sync(&self) -> Result<()> {
        self.start_updater()?;
        let mut state = self.shared.state.lock();
        while !state.is_cluster_up_to_date() {
            self.shared.list_up_to_date.wait(&mut state);
        }
        Ok(())
    }

    /// Start the background updater if it is not running (also after a
    /// fatal updater error), and nudge it regardless. Idempotent.
    pub fn start_updater(&self) -> Result<()> {
        let mut thread_slot = self.updater_thread.lock();

        let needs_spawn = match thread_slot.as_ref() {
            None => true,
            Some(handle) => handle.is_finished(),
        };

        if needs_spawn {
            if let Some(handle) = thread_slot.take() {
                let _ = handle.join();
            }
            self.shared.state.lock().stop_updater = false;

            let shared = Arc::clone(&self.shared);
            let handle = thread::Builder::new()
                .name("roster-updater".into())
                .spawn(move || update_loop(shared))
                .map_err(|e| Error::Fatal(format!("failed to spawn updater thread: {e}")))?;
            *thread_slot = Some(handle);
        }

        // Tell it to start work regardless
        self.shared.has_updates_or_stop.notify_one();
        Ok(())
    }

    /// Stop the background updater: cancels all in-flight update RPCs and
    /// leaves the cluster out-of-date. For a synchronization point before
    /// halting, call [`sync`](Self::sync) first. Idempotent.
    pub fn halt_updater(&self) {
        {
            let mut state = self.shared.state.lock();
            state.stop_updater = true;
            self.shared.has_updates_or_stop.notify_one();
        }

        if let Some(handle) = self.updater_thread.lock().take() {
            if handle.join().is_err() {
                error!("updater thread panicked during halt");
            }
        }
    }

    // See docs on the public version. Mutates without committing; used by
    // the public path and usable for replaying several decisions into one
    // batch.
    fn add_locked(
        &self,
        state: &mut ListState,
        id: ServerId,
        service_locator: String,
        services: ServiceMask,
        read_speed: u32,
    ) {
        let index = id.slot_index() as usize;

        // During coordinator recovery `add` replays decisions without a
        // preceding generate_unique_id, so the table may not cover the
        // index yet.
        let slot = state.table.grow_for(index);
        debug_assert!(
            slot.entry().is_none(),
            "slot {} reused before its previous occupant departed",
            index
        );

        slot.next_generation = slot.next_generation.max(id.generation() + 1);

        let mut entry = ServerEntry::new(id, service_locator, services);
        if entry.is_backup() {
            entry.expected_read_mb_per_sec = read_speed;
        }

        if entry.is_master() {
            state.num_masters += 1;
        }
        if entry.is_backup() {
            state.num_backups += 1;
        }

        state.changelog.append_pending(entry.serialize());
        let snapshot = entry.clone();
        state.table.grow_for(index).state = SlotState::Occupied { entry };

        state.notify_trackers(&snapshot, ServerChangeEvent::ServerAdded);
        state.debug_check_counts();
    }

    fn crashed_locked(
        &self,
        state: &mut ListState,
        id: ServerId,
    ) -> Result<()> {
        let (record, snapshot, was_master, was_backup) = {
            let entry = state.table.get_mut(id)?;
            if entry.status == ServerStatus::Crashed {
                return Ok(());
            }
            if entry.status == ServerStatus::Down {
                return Err(ServerListError::IllegalTransition(id).into());
            }

            let was_master = entry.is_master();
            let was_backup = entry.is_backup();
            entry.status = ServerStatus::Crashed;
            (entry.serialize(), entry.clone(), was_master, was_backup)
        };

        if was_master {
            state.num_masters -= 1;
        }
        if was_backup {
            state.num_backups -= 1;
        }

        state.changelog.append_pending(record);
        state.notify_trackers(&snapshot, ServerChangeEvent::ServerCrashed);
        state.debug_check_counts();
        Ok(())
    }

    fn remove_locked(
        &self,
        state: &mut ListState,
        id: ServerId,
    ) -> Result<()> {
        let status = state.table.get(id)?.status;
        if status == ServerStatus::Down {
            return Err(ServerListError::IllegalTransition(id).into());
        }
        if status != ServerStatus::Crashed {
            self.crashed_locked(state, id)?;
        }

        // The entry is destroyed right away; setting DOWN first gets the
        // serialized change record's status field correct.
        let mut entry = state.table.take_entry(id)?;
        entry.status = ServerStatus::Down;
        state.changelog.append_pending(entry.serialize());

        state.notify_trackers(&entry, ServerChangeEvent::ServerRemoved);
        state.debug_check_counts();
        Ok(())
    }
}

impl Drop for CoordinatorServerList {
    fn drop(&mut self) {
        self.halt_updater();
    }
}

#[cfg(test)]
impl CoordinatorServerList {
    pub(crate) fn committed_version(&self) -> u64 {
        self.shared.state.lock().changelog.committed_version()
    }

    pub(crate) fn history_len(&self) -> usize {
        self.shared.state.lock().changelog.history_len()
    }

    pub(crate) fn updater_is_running(&self) -> bool {
        self.updater_thread
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}
