//! Status helper enums mapping to SMALLINT lookup tables.
//!
//! Each enum variant's discriminant matches the seed data in the
//! corresponding `*_statuses` table.

use dq_core::incident::IncidentStatus as DomainIncidentStatus;

/// Status ID type matching SMALLINT/SMALLSERIAL in the database.
pub type StatusId = i16;

macro_rules! define_status_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $val:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[repr(i16)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum $name {
            $( $(#[$vmeta])* $variant = $val ),+
        }

        impl $name {
            /// Return the database status ID.
            pub fn id(self) -> StatusId {
                self as StatusId
            }

            /// Map a database status ID back to the enum.
            pub fn from_id(id: StatusId) -> Option<Self> {
                match id {
                    $( $val => Some($name::$variant), )+
                    _ => None,
                }
            }
        }

        impl From<$name> for StatusId {
            fn from(value: $name) -> Self {
                value as StatusId
            }
        }
    };
}

define_status_enum! {
    /// Check job execution status.
    JobStatus {
        Pending = 1,
        Running = 2,
        Completed = 3,
        Failed = 4,
        Cancelled = 5,
    }
}

define_status_enum! {
    /// Incident lifecycle status.
    IncidentStatusId {
        Open = 1,
        Acknowledged = 2,
        Resolved = 3,
        Muted = 4,
    }
}

/// Live statuses covered by the one-live-incident-per-check unique index.
pub const LIVE_INCIDENT_STATUSES: [StatusId; 3] = [
    IncidentStatusId::Open as StatusId,
    IncidentStatusId::Acknowledged as StatusId,
    IncidentStatusId::Muted as StatusId,
];

impl From<DomainIncidentStatus> for IncidentStatusId {
    fn from(status: DomainIncidentStatus) -> Self {
        match status {
            DomainIncidentStatus::Open => IncidentStatusId::Open,
            DomainIncidentStatus::Acknowledged => IncidentStatusId::Acknowledged,
            DomainIncidentStatus::Resolved => IncidentStatusId::Resolved,
            DomainIncidentStatus::Muted => IncidentStatusId::Muted,
        }
    }
}

impl From<IncidentStatusId> for DomainIncidentStatus {
    fn from(status: IncidentStatusId) -> Self {
        match status {
            IncidentStatusId::Open => DomainIncidentStatus::Open,
            IncidentStatusId::Acknowledged => DomainIncidentStatus::Acknowledged,
            IncidentStatusId::Resolved => DomainIncidentStatus::Resolved,
            IncidentStatusId::Muted => DomainIncidentStatus::Muted,
        }
    }
}
