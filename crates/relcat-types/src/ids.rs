//! Strongly-typed identifiers for catalog entities
//!
//! The catalog hands out integer ids. Each kind is wrapped in its own newtype
//! so a component id can never be passed where an application id is expected.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! catalog_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            pub const fn new(id: i64) -> Self {
                Self(id)
            }

            pub const fn value(&self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, ":{}"), self.0)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }
    };
}

catalog_id!(
    /// Identifier of a component or component version
    ComponentId,
    "comp"
);

catalog_id!(
    /// Identifier of an application or application version
    ApplicationId,
    "app"
);

catalog_id!(
    /// Identifier of a running or finished deployment
    DeploymentId,
    "deploy"
);

catalog_id!(
    /// Identifier of a file item inside a component
    ItemId,
    "item"
);

catalog_id!(DomainId, "domain");

catalog_id!(TaskId, "task");
