//! Versioned membership log: pending-batch accumulator plus the ordered
//! history of committed update batches.

use std::collections::VecDeque;

use tracing::debug;
use tracing::warn;

use crate::metrics::CHANGELOG_HIGH_WATER_GAUGE;
use crate::metrics::CHANGELOG_LEN_GAUGE;
use crate::proto::ServerListEntry;
use crate::proto::ServerListPayload;
use crate::proto::ServerListType;

/// In-memory change log keyed by a monotonically increasing version number.
///
/// Mutations accumulate in `pending`; `commit_update` bumps the version and
/// moves the batch into `history` as one atomic unit. `history` stays
/// front-prunable: a batch is dropped once no live subscriber still needs
/// it, and never before.
#[derive(Debug)]
pub(crate) struct ChangeLog {
    /// Last version broadcast; starts at 0.
    committed_version: u64,
    /// Accumulator of per-entry change records awaiting commit.
    pending: ServerListPayload,
    /// Committed batches, tagged with their version, in increasing order.
    history: VecDeque<ServerListPayload>,
    /// Alarm threshold for `history` growth.
    high_water: usize,
    /// Largest backlog seen so far; drives the high-water gauge.
    peak_len: usize,
}

impl ChangeLog {
    pub(crate) fn new(high_water: usize) -> Self {
        Self {
            committed_version: 0,
            pending: ServerListPayload::default(),
            history: VecDeque::new(),
            high_water,
            peak_len: 0,
        }
    }

    pub(crate) fn committed_version(&self) -> u64 {
        self.committed_version
    }

    /// Append one change record to the pending batch.
    pub(crate) fn append_pending(
        &mut self,
        record: ServerListEntry,
    ) {
        self.pending.servers.push(record);
    }

    /// Commit the pending batch under the next version number.
    ///
    /// Returns false (and changes nothing) when the pending batch is empty,
    /// so mutation paths that produced no records never burn a version.
    pub(crate) fn commit_update(&mut self) -> bool {
        if self.pending.servers.is_empty() {
            return false;
        }

        self.committed_version += 1;
        self.pending.version_number = self.committed_version;
        self.pending.set_type(ServerListType::Update);
        self.history.push_back(std::mem::take(&mut self.pending));

        self.observe_len();
        true
    }

    /// Drop committed batches with version <= `version`.
    ///
    /// Returns true when `history` became (or already was) empty, meaning
    /// no subscriber is owed an incremental update any more.
    pub(crate) fn prune_updates(
        &mut self,
        version: u64,
    ) -> bool {
        debug_assert!(version <= self.committed_version);

        while self
            .history
            .front()
            .is_some_and(|batch| batch.version_number <= version)
        {
            let batch = self.history.pop_front();
            debug!(
                "pruned update batch v{}",
                batch.map(|b| b.version_number).unwrap_or_default()
            );
        }

        CHANGELOG_LEN_GAUGE.set(self.history.len() as i64);
        self.history.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn history_len(&self) -> usize {
        self.history.len()
    }

    pub(crate) fn front_version(&self) -> Option<u64> {
        self.history.front().map(|batch| batch.version_number)
    }

    #[cfg(test)]
    pub(crate) fn back_version(&self) -> Option<u64> {
        self.history.back().map(|batch| batch.version_number)
    }

    /// The committed batch carrying exactly `version`.
    pub(crate) fn batch_at_version(
        &self,
        version: u64,
    ) -> Option<&ServerListPayload> {
        let head = self.front_version()?;
        if version < head {
            return None;
        }
        self.history.get((version - head) as usize)
    }

    fn observe_len(&mut self) {
        let len = self.history.len();
        CHANGELOG_LEN_GAUGE.set(len as i64);
        if len > self.peak_len {
            self.peak_len = len;
            CHANGELOG_HIGH_WATER_GAUGE.set(len as i64);
        }
        if len == self.high_water {
            warn!(
                "update backlog reached {} batches; a subscriber is not \
                 acknowledging updates",
                len
            );
        }
    }
}
