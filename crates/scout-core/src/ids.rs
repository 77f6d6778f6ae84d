use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! branded_id {
    ($name:ident, $prefix:expr) => {
        #[derive(Clone, Debug, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new() -> Self {
                Self(format!("{}_{}", $prefix, Uuid::now_v7()))
            }

            pub fn from_raw(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::convert::Infallible;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_owned()))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

branded_id!(WorkspaceId, "ws");
branded_id!(SessionId, "sess");
branded_id!(DomainId, "dom");
branded_id!(DocumentId, "doc");

impl SessionId {
    /// A session is keyed by the workspace it orchestrates.
    pub fn for_workspace(workspace_id: &WorkspaceId) -> Self {
        Self(workspace_id.as_str().to_owned())
    }

    pub fn workspace_id(&self) -> WorkspaceId {
        WorkspaceId::from_raw(self.0.clone())
    }
}

impl From<&WorkspaceId> for SessionId {
    fn from(id: &WorkspaceId) -> Self {
        Self::for_workspace(id)
    }
}
