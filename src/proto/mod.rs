//! Wire format of cluster-view updates.
//!
//! The message shapes below are what `tonic-build` would emit for the
//! membership service's protobuf definitions; they are written out as prost
//! derives so the crate builds without a protoc toolchain. Field numbers are
//! part of the wire contract and must not be reordered.

/// One serialized server record inside a [`ServerListPayload`].
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ServerListEntry {
    /// Composite server id: generation in the high 32 bits, slot index in
    /// the low 32 bits.
    #[prost(fixed64, tag = "1")]
    pub server_id: u64,

    /// Opaque string addressing the server.
    #[prost(string, tag = "2")]
    pub service_locator: ::prost::alloc::string::String,

    /// Bitmask over [`ServiceType`].
    #[prost(uint32, tag = "3")]
    pub services: u32,

    #[prost(enumeration = "ServerStatus", tag = "4")]
    pub status: i32,

    /// Set to the recorded value for backups and to 0 for non-backups;
    /// always present on the wire.
    #[prost(uint32, tag = "5")]
    pub expected_read_mb_per_sec: u32,
}

/// A full-list snapshot or one incremental update batch.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ServerListPayload {
    #[prost(uint64, tag = "1")]
    pub version_number: u64,

    #[prost(enumeration = "ServerListType", tag = "2")]
    pub r#type: i32,

    #[prost(message, repeated, tag = "3")]
    pub servers: ::prost::alloc::vec::Vec<ServerListEntry>,
}

/// Reply to an UpdateServerList RPC.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UpdateServerListResponse {
    /// The cluster-list version the target now holds.
    #[prost(uint64, tag = "1")]
    pub current_version: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ServerStatus {
    /// The server is believed to be available.
    Up = 0,
    /// The server has failed; its resources are retained for recovery.
    Crashed = 1,
    /// The server is gone for good.
    Down = 2,
}

impl ServerStatus {
    pub fn as_str_name(&self) -> &'static str {
        match self {
            ServerStatus::Up => "UP",
            ServerStatus::Crashed => "CRASHED",
            ServerStatus::Down => "DOWN",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ServerListType {
    /// Payload carries every visible entry; bootstraps a server that has
    /// never acknowledged a version.
    FullList = 0,
    /// Payload carries exactly one committed batch.
    Update = 1,
}

/// The fixed universe of services a server can offer. Values are bit
/// positions inside [`ServerListEntry::services`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ServiceType {
    MasterService = 0,
    BackupService = 1,
    MembershipService = 2,
    PingService = 3,
}
