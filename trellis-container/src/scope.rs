//! Bean scopes.
//!
//! Scopes determine how long a created bean lives:
//! - [`Scope::Singleton`]: one instance per bean name for the container's lifetime
//! - [`Scope::Prototype`]: a new instance on every lookup
//! - [`Scope::Custom`]: delegated to a [`ScopeHandler`] registered under that name
use std::fmt;
use std::sync::Arc;

use crate::bean::BeanRef;
use crate::error::Result;

/// Defines the lifetime of a bean within the container.
///
/// # Examples
/// ```
/// use trellis_container::scope::Scope;
///
/// assert_eq!(Scope::default(), Scope::Singleton);
/// assert_eq!(Scope::from("prototype"), Scope::Prototype);
/// assert_eq!(Scope::from("request").to_string(), "request");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Scope {
    /// One shared instance, created on first lookup (or on refresh when not lazy).
    ///
    /// The only scope that takes part in early-reference sharing.
    #[default]
    Singleton,

    /// A fresh instance for every lookup. Never cached.
    Prototype,

    /// Any other scope, resolved through the [`ScopeHandler`] registered
    /// under this name on the container builder.
    Custom(Arc<str>),
}

impl Scope {
    /// Returns `true` for [`Scope::Singleton`].
    #[inline]
    pub fn is_singleton(&self) -> bool {
        matches!(self, Scope::Singleton)
    }

    /// Returns `true` for [`Scope::Prototype`].
    #[inline]
    pub fn is_prototype(&self) -> bool {
        matches!(self, Scope::Prototype)
    }

    /// Returns the scope name as used in definitions.
    pub fn name(&self) -> &str {
        match self {
            Scope::Singleton => "singleton",
            Scope::Prototype => "prototype",
            Scope::Custom(name) => name,
        }
    }
}

impl From<&str> for Scope {
    fn from(name: &str) -> Self {
        match name {
            "" | "singleton" => Scope::Singleton,
            "prototype" => Scope::Prototype,
            other => Scope::Custom(Arc::from(other)),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Backing store for a custom scope.
///
/// The container asks the handler for the current object of a bean name;
/// the handler either returns the object it already holds for its current
/// context (a request, a session, a thread) or calls `create` and keeps
/// the result.
pub trait ScopeHandler: Send + Sync {
    /// Returns the object for `name`, creating it through `create` if absent.
    fn get(&self, name: &str, create: &mut dyn FnMut() -> Result<BeanRef>) -> Result<BeanRef>;

    /// Drops the object for `name` from the current context, if any.
    fn remove(&self, name: &str) -> Option<BeanRef>;
}
