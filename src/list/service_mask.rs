use std::fmt;

use crate::proto::ServiceType;

/// A set over the fixed universe of [`ServiceType`]s a server can offer.
///
/// Stored as the same bitmask that goes out on the wire in
/// [`crate::proto::ServerListEntry::services`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServiceMask {
    mask: u32,
}

impl ServiceMask {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn has(
        &self,
        service: ServiceType,
    ) -> bool {
        self.mask & (1 << service as u32) != 0
    }

    pub fn with(
        mut self,
        service: ServiceType,
    ) -> Self {
        self.mask |= 1 << service as u32;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.mask == 0
    }

    /// True if any service in `other` is also in `self`.
    pub fn intersects(
        &self,
        other: ServiceMask,
    ) -> bool {
        self.mask & other.mask != 0
    }

    /// The wire bitmask.
    pub fn serialize(&self) -> u32 {
        self.mask
    }

    pub fn deserialize(mask: u32) -> Self {
        Self { mask }
    }

    /// The services whose holders appear in a full-list snapshot.
    pub fn storage_services() -> Self {
        Self::empty()
            .with(ServiceType::MasterService)
            .with(ServiceType::BackupService)
    }
}

impl From<&[ServiceType]> for ServiceMask {
    fn from(services: &[ServiceType]) -> Self {
        services.iter().fold(Self::empty(), |mask, s| mask.with(*s))
    }
}

impl fmt::Display for ServiceMask {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let mut first = true;
        for service in [
            ServiceType::MasterService,
            ServiceType::BackupService,
            ServiceType::MembershipService,
            ServiceType::PingService,
        ] {
            if self.has(service) {
                if !first {
                    write!(f, "|")?;
                }
                write!(f, "{:?}", service)?;
                first = false;
            }
        }
        if first {
            write!(f, "NONE")?;
        }
        Ok(())
    }
}
