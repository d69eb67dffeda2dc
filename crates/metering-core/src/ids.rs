//! Identifier types for the metering engine.
//!
//! Externally owned entities (users, organizations, workspaces, projects) are
//! identified by UUIDs. Records created by this engine (events, aggregations,
//! alerts) use ULIDs so that keys sort by creation time.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Defines a UUID-based identifier newtype with string serialization,
/// parsing, display and byte access.
macro_rules! uuid_id_type {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(uuid::Uuid);

        impl $name {
            /// Create a new identifier from a UUID.
            #[must_use]
            pub const fn from_uuid(uuid: uuid::Uuid) -> Self {
                Self(uuid)
            }

            /// Generate a new random identifier (primarily for testing).
            #[must_use]
            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4())
            }

            /// Return the underlying UUID.
            #[must_use]
            pub const fn as_uuid(&self) -> &uuid::Uuid {
                &self.0
            }

            /// Return the bytes of the UUID (16 bytes).
            #[must_use]
            pub fn as_bytes(&self) -> &[u8; 16] {
                self.0.as_bytes()
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let uuid = uuid::Uuid::parse_str(s).map_err(|_| IdError::InvalidUuid)?;
                Ok(Self(uuid))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0.to_string()
            }
        }
    };
}

/// Defines a ULID-based identifier newtype for records this engine creates.
macro_rules! ulid_id_type {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(Ulid);

        impl $name {
            /// Generate a new identifier with the current timestamp.
            #[must_use]
            pub fn generate() -> Self {
                Self(Ulid::new())
            }

            /// Return the underlying ULID.
            #[must_use]
            pub const fn as_ulid(&self) -> &Ulid {
                &self.0
            }

            /// Return the bytes of the ULID (16 bytes).
            #[must_use]
            pub fn to_bytes(&self) -> [u8; 16] {
                self.0.to_bytes()
            }

            /// Rebuild an identifier from its 16 key bytes.
            #[must_use]
            pub fn from_bytes(bytes: [u8; 16]) -> Self {
                Self(Ulid::from_bytes(bytes))
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let ulid = Ulid::from_string(s).map_err(|_| IdError::InvalidUlid)?;
                Ok(Self(ulid))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0.to_string()
            }
        }
    };
}

uuid_id_type!(UserId, "A user account identifier.");
uuid_id_type!(OrganizationId, "An organization identifier.");
uuid_id_type!(WorkspaceId, "A workspace identifier. Every usage event belongs to one workspace.");
uuid_id_type!(ProjectId, "A project identifier inside a workspace.");
uuid_id_type!(
    BillingEntityId,
    "The identifier of whoever pays: either a user id or an organization id."
);

ulid_id_type!(EventId, "A usage event identifier (time-ordered).");
ulid_id_type!(AggregationId, "A usage aggregation identifier, referenced by invoices as the snapshot id.");
ulid_id_type!(AlertId, "An alert definition identifier.");

impl From<UserId> for BillingEntityId {
    fn from(id: UserId) -> Self {
        Self(id.0)
    }
}

impl From<OrganizationId> for BillingEntityId {
    fn from(id: OrganizationId) -> Self {
        Self(id.0)
    }
}

/// Prefix of every invoice identifier.
const INVOICE_PREFIX: &str = "INV";

/// A human-readable invoice identifier: `INV-YYYYMM-XXXXXXXX`.
///
/// The suffix is the random tail of a fresh ULID, so two invoices for the
/// same period never collide in practice.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InvoiceId(String);

impl InvoiceId {
    /// Generate a new invoice id for the given period.
    #[must_use]
    pub fn generate(period: &crate::BillingPeriod) -> Self {
        let ulid = Ulid::new().to_string();
        let suffix = &ulid[ulid.len() - 8..];
        Self(format!(
            "{INVOICE_PREFIX}-{:04}{:02}-{suffix}",
            period.year(),
            period.month()
        ))
    }

    /// Return the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for InvoiceId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('-');
        let valid = parts.next() == Some(INVOICE_PREFIX)
            && parts
                .next()
                .is_some_and(|p| p.len() == 6 && p.bytes().all(|b| b.is_ascii_digit()))
            && parts
                .next()
                .is_some_and(|p| p.len() == 8 && p.bytes().all(|b| b.is_ascii_alphanumeric()))
            && parts.next().is_none();

        if valid {
            Ok(Self(s.to_string()))
        } else {
            Err(IdError::InvalidInvoiceId)
        }
    }
}

impl fmt::Debug for InvoiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InvoiceId({})", self.0)
    }
}

impl fmt::Display for InvoiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for InvoiceId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<InvoiceId> for String {
    fn from(id: InvoiceId) -> Self {
        id.0
    }
}

/// Errors that can occur when parsing identifiers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The input is not a valid UUID.
    #[error("invalid UUID format")]
    InvalidUuid,

    /// The input is not a valid ULID.
    #[error("invalid ULID format")]
    InvalidUlid,

    /// The input is not a valid invoice id.
    #[error("invalid invoice id format")]
    InvalidInvoiceId,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BillingPeriod;

    #[test]
    fn workspace_id_serde_json() {
        let id = WorkspaceId::generate();
        let json = serde_json::to_string(&id).unwrap();
        let parsed: WorkspaceId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn user_and_org_ids_become_billing_entities() {
        let user = UserId::generate();
        let org = OrganizationId::generate();
        assert_eq!(BillingEntityId::from(user).as_uuid(), user.as_uuid());
        assert_eq!(BillingEntityId::from(org).as_uuid(), org.as_uuid());
    }

    #[test]
    fn event_ids_are_time_ordered() {
        let first = EventId::generate();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = EventId::generate();
        assert!(first < second);
        assert_eq!(EventId::from_bytes(first.to_bytes()), first);
    }

    #[test]
    fn invoice_id_format() {
        let period: BillingPeriod = "2024-03".parse().unwrap();
        let id = InvoiceId::generate(&period);
        assert!(id.as_str().starts_with("INV-202403-"));
        assert_eq!(id.as_str().len(), "INV-202403-".len() + 8);

        let reparsed: InvoiceId = id.to_string().parse().unwrap();
        assert_eq!(reparsed, id);
    }

    #[test]
    fn invoice_id_rejects_garbage() {
        assert_eq!(
            "INV-2024-ABC".parse::<InvoiceId>(),
            Err(IdError::InvalidInvoiceId)
        );
        assert!("not-an-invoice".parse::<InvoiceId>().is_err());
    }
}
