//! Error types for container operations.
//!
//! Every error names the bean it concerns and, where it helps, carries a
//! hint about the usual fix. Errors are `Clone` so that a failed singleton
//! can hand the same failure to every later caller.

use std::fmt;
use std::sync::Arc;

use trellis_support::rendering::{render_chain, render_names};

/// Main error type for all container operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ContainerError {
    /// Definition is structurally unusable; rejected at registration.
    #[error("Invalid bean definition '{name}': {reason}")]
    InvalidDefinition { name: String, reason: String },

    /// Name collision while overriding is not allowed.
    #[error("{}", .0)]
    DefinitionOverride(DefinitionOverrideError),

    /// Lookup of an unregistered bean, parent or dependency name.
    #[error("{}", .0)]
    NotFound(NotFoundError),

    /// A parent-definition chain revisits itself.
    #[error("Cyclic parent definitions: {}", render_chain(.chain))]
    CyclicParent { chain: Vec<String> },

    /// Dependency cycle that early references could not break.
    #[error("{}", .0)]
    CircularReference(CircularReferenceError),

    /// No constructor of the bean could be satisfied.
    #[error("No resolvable constructor for bean '{bean}': {reason}")]
    NoResolvableConstructor { bean: String, reason: String },

    /// Several constructors are equally satisfiable.
    #[error("Ambiguous constructors for bean '{bean}': {}", render_names(.candidates))]
    AmbiguousConstructor { bean: String, candidates: Vec<String> },

    /// A required constructor parameter or property has no value.
    #[error("Unsatisfied dependency of bean '{bean}' through {dependency}: {reason}")]
    UnsatisfiedDependency {
        bean: String,
        dependency: String,
        reason: String,
    },

    /// Type-based lookup found nothing.
    #[error("No bean of type {type_name} is defined")]
    NoSuchBean { type_name: &'static str },

    /// Type-based lookup found several beans and none is primary.
    #[error(
        "Expected a single bean of type {type_name} but found {}: {}",
        .candidates.len(),
        render_names(.candidates)
    )]
    AmbiguousBean {
        type_name: &'static str,
        candidates: Vec<String>,
    },

    /// Alias registration clashes with a bean name or another alias.
    #[error("Cannot register alias '{alias}': {reason}")]
    AliasConflict { alias: String, reason: String },

    /// Abstract definitions only serve as parents.
    #[error("Bean '{name}' is abstract and cannot be instantiated")]
    AbstractBean { name: String },

    /// The definition names a scope that has no registered handler.
    #[error("No scope handler registered for scope '{scope}' of bean '{bean}'")]
    UnknownScope { bean: String, scope: String },

    /// An early reference was dereferenced before its bean finished.
    #[error("Bean '{name}' is currently in creation and not yet available")]
    BeanNotReady { name: String },

    /// A bean or value did not have the expected type.
    #[error("Bean '{name}' is not of the expected type {expected}")]
    TypeMismatch { name: String, expected: &'static str },

    /// A constructor, factory method, setter or callback failed.
    #[error("Failed to construct bean '{bean}': {source}")]
    Construction {
        bean: String,
        #[source]
        source: Arc<dyn std::error::Error + Send + Sync>,
    },

    /// `refresh()` may only run once per container.
    #[error("Container does not support multiple refresh attempts: just call refresh() once")]
    AlreadyRefreshed,
}

impl ContainerError {
    /// Wraps an arbitrary failure raised while building `bean`.
    ///
    /// Use this inside constructors and callbacks to report your own errors.
    pub fn construction(
        bean: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        ContainerError::Construction {
            bean: bean.into(),
            source: Arc::from(source.into()),
        }
    }

    pub(crate) fn invalid(name: impl Into<String>, reason: impl Into<String>) -> Self {
        ContainerError::InvalidDefinition {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn not_found(name: impl Into<String>) -> Self {
        ContainerError::NotFound(NotFoundError {
            name: name.into(),
            required_by: None,
            suggestions: vec![],
        })
    }

    pub(crate) fn circular(chain: Vec<String>) -> Self {
        ContainerError::CircularReference(CircularReferenceError { chain })
    }

    /// Returns `true` for [`ContainerError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, ContainerError::NotFound(_))
    }

    /// Returns `true` for [`ContainerError::CircularReference`].
    pub fn is_circular_reference(&self) -> bool {
        matches!(self, ContainerError::CircularReference(_))
    }
}

/// A bean, parent or dependency name that is not registered.
///
/// Includes the requesting bean and similarly named beans.
#[derive(Debug, Clone)]
pub struct NotFoundError {
    /// The name that was requested
    pub name: String,
    /// The bean whose definition referenced it (if known)
    pub required_by: Option<String>,
    /// Registered names that look similar
    pub suggestions: Vec<String>,
}

impl fmt::Display for NotFoundError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "No bean named '{}' is defined", self.name)?;

        if let Some(ref parent) = self.required_by {
            write!(f, "\n  Required by: '{parent}'")?;
        }

        if !self.suggestions.is_empty() {
            write!(f, "\n  Did you mean one of:")?;
            for suggestion in &self.suggestions {
                write!(f, "\n    - {suggestion}")?;
            }
        }

        Ok(())
    }
}

/// A dependency cycle between beans.
///
/// Shows the full chain so you can see where the cycle closes.
#[derive(Debug, Clone)]
pub struct CircularReferenceError {
    /// Bean names forming the cycle, first and last entries equal.
    /// Example: ["a", "b", "a"]
    pub chain: Vec<String>,
}

impl fmt::Display for CircularReferenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Circular reference detected:\n  {}", render_chain(&self.chain))?;
        write!(
            f,
            "\n  Hint: Enable allow_circular_references for singletons, or break the cycle with a lazily resolved property"
        )
    }
}

/// Re-registration of an existing bean name while overriding is disabled.
#[derive(Debug, Clone)]
pub struct DefinitionOverrideError {
    pub name: String,
}

impl fmt::Display for DefinitionOverrideError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Cannot register bean definition '{}': a definition is already bound to that name",
            self.name,
        )?;
        write!(
            f,
            "\n  Hint: Rename the bean or enable allow_bean_definition_overriding"
        )
    }
}

/// Convenient Result type for container operations.
pub type Result<T> = std::result::Result<T, ContainerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_error_display() {
        let err = ContainerError::NotFound(NotFoundError {
            name: "dataSource".into(),
            required_by: Some("userRepository".into()),
            suggestions: vec!["dataSourceProxy".into()],
        });

        let msg = format!("{err}");
        assert!(msg.contains("No bean named 'dataSource'"));
        assert!(msg.contains("Required by: 'userRepository'"));
        assert!(msg.contains("dataSourceProxy"));
    }

    #[test]
    fn circular_reference_error_display() {
        let err = ContainerError::circular(vec!["a".into(), "b".into(), "a".into()]);

        let msg = format!("{err}");
        assert!(msg.contains("Circular"));
        assert!(msg.contains("a → b → a"));
        assert!(err.is_circular_reference());
    }

    #[test]
    fn override_error_display() {
        let err = ContainerError::DefinitionOverride(DefinitionOverrideError { name: "x".into() });
        let msg = format!("{err}");
        assert!(msg.contains("'x'"));
        assert!(msg.contains("allow_bean_definition_overriding"));
    }

    #[test]
    fn construction_error_keeps_source() {
        use std::error::Error as _;

        let err = ContainerError::construction("pool", "connection refused");
        assert!(format!("{err}").contains("connection refused"));
        assert!(err.source().is_some());

        // clones share the source
        let again = err.clone();
        assert_eq!(format!("{again}"), format!("{err}"));
    }

    #[test]
    fn ambiguous_bean_lists_candidates() {
        let err = ContainerError::AmbiguousBean {
            type_name: "Db",
            candidates: vec!["primary".into(), "replica".into()],
        };
        assert!(format!("{err}").contains("found 2: 'primary', 'replica'"));
    }
}
