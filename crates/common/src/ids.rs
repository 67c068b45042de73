//! Newtype identifiers for the multi-tenant data model.
//!
//! Every id is a 128-bit opaque value serialized as a UUID string. The
//! newtypes keep tenant-scoped lookups honest: a `TenantId` cannot be passed
//! where a `SessionId` is expected.

use {
    serde::{Deserialize, Serialize},
    uuid::Uuid,
};

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[must_use]
            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            #[must_use]
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

id_type!(
    /// Unit of isolation. Owns credentials, tools, sessions, and tasks.
    TenantId
);
id_type!(
    /// A single WebSocket session.
    SessionId
);
id_type!(
    /// An agent registered within a session; lifetime bounded by the session.
    AgentId
);
id_type!(
    /// A work unit routed to agents.
    TaskId
);
id_type!(
    /// An inbound webhook event.
    EventId
);
id_type!(
    /// A tenant-scoped organization tool instance.
    ToolId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_round_trip_through_strings() {
        let id = TenantId::new();
        let parsed: TenantId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn ids_serialize_as_plain_uuid_strings() {
        let id = TaskId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
    }

    #[test]
    fn bad_uuid_fails_to_parse() {
        assert!("not-a-uuid".parse::<SessionId>().is_err());
    }
}
