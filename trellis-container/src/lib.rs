//! Core container implementation for Trellis.
//!
//! Bean definitions are registered by name, merged along their parent
//! chains, and instantiated on demand with constructor and property
//! injection. Singletons are created once and cached; circular references
//! between singletons are resolved through early references.

mod autowire;
mod factory;
mod graph;
mod registry;
mod singleton;

pub mod bean;
pub mod class;
pub mod container;
pub mod definition;
pub mod error;
pub mod key;
pub mod merge;
pub mod processor;
pub mod provider;
pub mod scope;
pub mod settings;

pub use bean::{Bean, BeanRef, Injected};
pub use class::{BeanClass, Dependency};
pub use container::{Container, ContainerBuilder, prelude};
pub use definition::{BeanDefinition, BeanKind, ValueSpec};
pub use error::{ContainerError, Result};
pub use key::TypeKey;
pub use scope::Scope;
pub use settings::ContainerSettings;
