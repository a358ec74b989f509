//! Container settings.
//!
//! [`ContainerSettings`] can be set piecewise on the
//! [`ContainerBuilder`](crate::container::ContainerBuilder) or deserialized
//! from any serde source and handed over whole. Missing fields take their
//! defaults.
//!
//! ```
//! use trellis_container::settings::ContainerSettings;
//!
//! let settings = ContainerSettings::default();
//! assert!(settings.allow_bean_definition_overriding);
//! assert!(settings.allow_circular_references);
//! ```

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerSettings {
    /// Re-registering a bean name replaces the previous definition.
    pub allow_bean_definition_overriding: bool,

    /// Singletons in a reference cycle receive early references to each other.
    pub allow_circular_references: bool,

    /// Re-pointing an existing alias at another bean is allowed.
    pub allow_alias_overriding: bool,

    /// How many "did you mean" names a not-found error lists.
    pub suggestion_limit: usize,
}

impl Default for ContainerSettings {
    fn default() -> Self {
        Self {
            allow_bean_definition_overriding: true,
            allow_circular_references: true,
            allow_alias_overriding: true,
            suggestion_limit: 3,
        }
    }
}
