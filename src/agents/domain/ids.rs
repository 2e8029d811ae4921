//! Opaque identifiers

use serde::{Deserialize, Serialize};

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

opaque_id!(
    /// Identifier of an agent record held by the hosting service
    AgentId
);
opaque_id!(
    /// Identifier of a document index
    IndexId
);
opaque_id!(
    /// Identifier of an uploaded file
    FileId
);
opaque_id!(
    /// Remote conversation context backing a thread
    ThreadRef
);
opaque_id!(
    /// Local identifier of a thread
    ThreadId
);

impl ThreadId {
    /// Generate a fresh thread id
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}
