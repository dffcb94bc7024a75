//! The coordinator's record of one enlisted server.

use crate::list::ServerId;
use crate::list::ServiceMask;
use crate::proto::ServerListEntry;
use crate::proto::ServerStatus;
use crate::proto::ServiceType;

/// Opaque handle into the external persistent log that records membership
/// decisions.
pub type LogEntryId = u64;

/// Per-slot record kept for every enlisted server.
///
/// Status follows `UP -> CRASHED -> DOWN`; a DOWN entry is destroyed
/// immediately, freeing its slot for reuse under a higher generation.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerEntry {
    /// Identifier issued to this incarnation.
    pub id: ServerId,
    /// Opaque string addressing the server.
    pub service_locator: String,
    /// Which services this server offers.
    pub services: ServiceMask,
    pub status: ServerStatus,
    /// Storage read speed; meaningful only when the server offers the
    /// backup service.
    pub expected_read_mb_per_sec: u32,
    /// Monotonically non-decreasing; writes that would lower it are
    /// silently ignored.
    pub min_open_segment_id: u64,
    pub replication_group_id: u64,
    /// Highest cluster-list version this server has confirmed receiving.
    /// 0 means it has never received any update and needs a full snapshot.
    pub acknowledged_version: u64,
    /// Set while an update RPC to this server is outstanding.
    pub update_in_flight: bool,
    /// Handle into the external persistent log for the server's initial
    /// enlistment record.
    pub initial_info_log_id: LogEntryId,
    /// Handle into the external persistent log for the server's update
    /// records.
    pub updates_log_id: LogEntryId,
}

impl ServerEntry {
    pub fn new(
        id: ServerId,
        service_locator: String,
        services: ServiceMask,
    ) -> Self {
        Self {
            id,
            service_locator,
            services,
            status: ServerStatus::Up,
            expected_read_mb_per_sec: 0,
            min_open_segment_id: 0,
            replication_group_id: 0,
            acknowledged_version: 0,
            update_in_flight: false,
            initial_info_log_id: 0,
            updates_log_id: 0,
        }
    }

    pub fn is_master(&self) -> bool {
        self.services.has(ServiceType::MasterService)
    }

    pub fn is_backup(&self) -> bool {
        self.services.has(ServiceType::BackupService)
    }

    pub fn offers_membership(&self) -> bool {
        self.services.has(ServiceType::MembershipService)
    }

    /// Serialize this entry into its wire form.
    pub fn serialize(&self) -> ServerListEntry {
        ServerListEntry {
            server_id: self.id.as_u64(),
            service_locator: self.service_locator.clone(),
            services: self.services.serialize(),
            status: self.status as i32,
            // Always present on the wire; 0 for non-backups.
            expected_read_mb_per_sec: if self.is_backup() {
                self.expected_read_mb_per_sec
            } else {
                0
            },
        }
    }
}
