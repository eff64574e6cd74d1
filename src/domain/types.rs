//! Shared identifier and status types

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Monetary amounts in minor currency units
pub type Cents = i64;

/// Generate a new UUIDv7 (time-sortable)
pub fn new_uuid_v7() -> Uuid {
    Uuid::now_v7()
}

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        #[repr(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Fresh time-sortable identifier
            pub fn new() -> Self {
                Self(new_uuid_v7())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

id_type!(
    /// Marketplace user (renter or car owner)
    UserId
);
id_type!(
    /// Listed vehicle
    CarId
);
id_type!(BookingId);
id_type!(
    /// One physical handover event (pickup or return)
    SessionId
);
id_type!(PromoCodeId);
id_type!(UsageId);

/// Booking status as persisted by the approval and cancellation flows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
    Expired,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Expired => "expired",
        }
    }

    /// No further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, BookingStatus::Completed | BookingStatus::Cancelled | BookingStatus::Expired)
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which vehicle exchange a handover session records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandoverType {
    Pickup,
    Return,
}

impl HandoverType {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandoverType::Pickup => "pickup",
            HandoverType::Return => "return",
        }
    }
}

impl std::fmt::Display for HandoverType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for HandoverType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pickup" => Ok(HandoverType::Pickup),
            "return" => Ok(HandoverType::Return),
            other => Err(format!("unknown handover type: {other}")),
        }
    }
}

/// Viewer's relation to a booking, derived by comparing ids
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewerRole {
    Renter,
    Owner,
    Observer,
}

impl ViewerRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViewerRole::Renter => "renter",
            ViewerRole::Owner => "owner",
            ViewerRole::Observer => "observer",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(BookingStatus::Completed.is_terminal());
        assert!(BookingStatus::Cancelled.is_terminal());
        assert!(!BookingStatus::Confirmed.is_terminal());
        assert!(!BookingStatus::Pending.is_terminal());
        assert!(BookingStatus::Expired.is_terminal());
    }

    #[test]
    fn test_ids_are_unique_and_parse_back() {
        let a = BookingId::new();
        let b = BookingId::new();
        assert_ne!(a, b);
        assert_eq!(a.to_string().parse::<BookingId>().unwrap(), a);
        assert!("not-a-uuid".parse::<BookingId>().is_err());
    }

    #[test]
    fn test_handover_type_serde() {
        let json = serde_json::to_string(&HandoverType::Return).unwrap();
        assert_eq!(json, "\"return\"");
        let parsed: HandoverType = serde_json::from_str("\"pickup\"").unwrap();
        assert_eq!(parsed, HandoverType::Pickup);
    }
}
