//! # The Container
//!
//! Holds bean definitions and turns them into wired object graphs on
//! demand.
//!
//! # Architecture
//! ```text
//! ContainerBuilder ──build()──> Container
//!                                  │
//!          register / alias ───────┤  DefinitionStore
//!                                  │
//!          get_bean(name) ─────────┤  DefinitionMerger ──> post-processors
//!                                  │  SingletonRegistry (claim / wait / early refs)
//!                                  │  constructor selection, autowiring
//!                                  ▼
//!                               BeanRef
//! ```
//!
//! # Examples
//! ```rust
//! use trellis_container::prelude::*;
//!
//! #[derive(Default)]
//! struct Pool {
//!     size: u32,
//! }
//!
//! struct Repository {
//!     pool: Bean<Pool>,
//! }
//!
//! let container = Container::builder()
//!     .definition(
//!         "pool",
//!         BeanDefinition::of_class(
//!             BeanClass::builder::<Pool>()
//!                 .with_default()
//!                 .property("size", Dependency::on::<u32>(), |pool, value| {
//!                     pool.size = value.into_value()?;
//!                     Ok(())
//!                 })
//!                 .build(),
//!         )
//!         .with_property("size", ValueSpec::value(8u32)),
//!     )
//!     .definition(
//!         "repository",
//!         BeanDefinition::of_class(
//!             BeanClass::builder::<Repository>()
//!                 .constructor("new", [Dependency::on::<Pool>()], |args| {
//!                     Ok(Repository { pool: args.bean(0)? })
//!                 })
//!                 .build(),
//!         ),
//!     )
//!     .build()
//!     .expect("valid definitions");
//!
//! let repository = container.get_bean_of_type::<Repository>().unwrap();
//! assert_eq!(repository.pool.get().unwrap().size, 8);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info, instrument, trace, warn};

use crate::bean::{BeanRef, instance_type_id};
use crate::class::BeanClass;
use crate::definition::BeanDefinition;
use crate::error::{ContainerError, Result};
use crate::graph::DependencyGraph;
use crate::key::TypeKey;
use crate::merge::{DefinitionMerger, MergedDefinition};
use crate::processor::{BeanPostProcessor, Pipeline};
use crate::provider::{AliasRegistry, BeanDefinitionRegistry, DefinitionProvider};
use crate::registry::DefinitionStore;
use crate::scope::{Scope, ScopeHandler};
use crate::settings::ContainerSettings;
use crate::singleton::SingletonRegistry;

pub(crate) type OverridePredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

// ============================================================
// ContainerBuilder
// ============================================================

/// Configures and builds a [`Container`].
///
/// # Examples
/// ```rust,ignore
/// let container = Container::builder()
///     .allow_circular_references(false)
///     .post_processor(Audit)
///     .scope("request", RequestScope::default())
///     .provider(PersistenceProvider)
///     .build()?;
/// container.refresh()?;
/// ```
pub struct ContainerBuilder {
    settings: ContainerSettings,
    overridable_if: Option<OverridePredicate>,
    processors: Vec<Arc<dyn BeanPostProcessor>>,
    scopes: HashMap<String, Arc<dyn ScopeHandler>>,
    providers: Vec<Box<dyn DefinitionProvider>>,
    definitions: Vec<(String, BeanDefinition)>,
}

impl ContainerBuilder {
    fn new() -> Self {
        Self {
            settings: ContainerSettings::default(),
            overridable_if: None,
            processors: Vec::new(),
            scopes: HashMap::new(),
            providers: Vec::new(),
            definitions: Vec::new(),
        }
    }

    /// Replaces all settings at once, e.g. with ones loaded from a file.
    pub fn settings(mut self, settings: ContainerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn allow_bean_definition_overriding(mut self, allow: bool) -> Self {
        self.settings.allow_bean_definition_overriding = allow;
        self
    }

    pub fn allow_circular_references(mut self, allow: bool) -> Self {
        self.settings.allow_circular_references = allow;
        self
    }

    pub fn allow_alias_overriding(mut self, allow: bool) -> Self {
        self.settings.allow_alias_overriding = allow;
        self
    }

    /// Restricts overriding to the names `predicate` accepts.
    ///
    /// Only consulted while overriding is allowed at all.
    pub fn overridable_if(mut self, predicate: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        self.overridable_if = Some(Arc::new(predicate));
        self
    }

    /// Adds a [`BeanPostProcessor`].
    pub fn post_processor(mut self, processor: impl BeanPostProcessor + 'static) -> Self {
        self.processors.push(Arc::new(processor));
        self
    }

    /// Registers the handler backing the custom scope `name`.
    pub fn scope(mut self, name: impl Into<String>, handler: impl ScopeHandler + 'static) -> Self {
        self.scopes.insert(name.into(), Arc::new(handler));
        self
    }

    /// Adds a [`DefinitionProvider`] module.
    pub fn provider(mut self, provider: impl DefinitionProvider + 'static) -> Self {
        self.providers.push(Box::new(provider));
        self
    }

    /// Registers a definition once the container is built.
    pub fn definition(mut self, name: impl Into<String>, definition: BeanDefinition) -> Self {
        self.definitions.push((name.into(), definition));
        self
    }

    /// Builds the container and registers every provider's and every
    /// explicitly added definition.
    ///
    /// No bean is created here; call [`Container::refresh`] to
    /// pre-instantiate singletons.
    #[instrument(skip(self), name = "container_build")]
    pub fn build(self) -> Result<Container> {
        info!(
            providers = self.providers.len(),
            definitions = self.definitions.len(),
            post_processors = self.processors.len(),
            "Building container"
        );

        if let Some(reserved) = self
            .scopes
            .keys()
            .find(|name| !matches!(Scope::from(name.as_str()), Scope::Custom(_)))
        {
            return Err(ContainerError::invalid(
                reserved.as_str(),
                "the built-in singleton and prototype scopes cannot be replaced",
            ));
        }

        let container = Container {
            store: DefinitionStore::new(self.settings.suggestion_limit),
            settings: self.settings,
            overridable_if: self.overridable_if,
            merger: DefinitionMerger::new(),
            singletons: SingletonRegistry::new(),
            graph: DependencyGraph::new(),
            pipeline: Pipeline::new(self.processors),
            scopes: self.scopes,
            refreshed: AtomicBool::new(false),
        };

        for provider in &self.providers {
            debug!(provider = provider.name(), "Applying definition provider");
            provider.register(&container)?;
        }
        for (name, definition) in self.definitions {
            container.register_bean_definition(&name, definition)?;
        }

        info!(definitions = container.store.count(), "Container built successfully");
        Ok(container)
    }
}

// ═══════════════════════════════════════════
// Container
// ═══════════════════════════════════════════

/// Thread-safe bean container.
///
/// Created by [`ContainerBuilder::build()`]. Definitions can still be
/// registered, overridden and removed afterwards through
/// [`BeanDefinitionRegistry`].
pub struct Container {
    pub(crate) settings: ContainerSettings,
    pub(crate) overridable_if: Option<OverridePredicate>,
    pub(crate) store: DefinitionStore,
    pub(crate) merger: DefinitionMerger,
    pub(crate) singletons: SingletonRegistry,
    pub(crate) graph: DependencyGraph,
    pub(crate) pipeline: Pipeline,
    pub(crate) scopes: HashMap<String, Arc<dyn ScopeHandler>>,
    refreshed: AtomicBool,
}

impl Container {
    /// Create a new builder.
    pub fn builder() -> ContainerBuilder {
        ContainerBuilder::new()
    }

    pub fn settings(&self) -> &ContainerSettings {
        &self.settings
    }

    /// Returns the bean registered under `name` (or an alias of it),
    /// creating it if needed.
    ///
    /// # Errors
    /// [`ContainerError::NotFound`] if nothing is registered under `name`;
    /// any error raised while creating the bean or its dependencies.
    pub fn get_bean(&self, name: &str) -> Result<BeanRef> {
        trace!(bean = %name, "Getting bean");
        self.do_get_bean(name, None)
    }

    /// Returns the bean `name` as a `T`.
    ///
    /// ```rust,ignore
    /// let pool: Arc<Pool> = container.get_bean_as("pool")?;
    /// ```
    pub fn get_bean_as<T: Send + Sync + 'static>(&self, name: &str) -> Result<Arc<T>> {
        self.get_bean(name)?.get::<T>()
    }

    /// Returns the unique bean of type `T`.
    ///
    /// # Errors
    /// - [`ContainerError::NoSuchBean`] if no bean has type `T`
    /// - [`ContainerError::AmbiguousBean`] if several do and not exactly one
    ///   of them is primary
    pub fn get_bean_of_type<T: Send + Sync + 'static>(&self) -> Result<Arc<T>> {
        let name = self.unique_name_for_type(TypeKey::of::<T>())?;
        self.get_bean_as::<T>(&name)
    }

    /// Names of all beans of type `T`, in registration order.
    pub fn bean_names_for_type<T: ?Sized + 'static>(&self) -> Vec<String> {
        self.names_for_type(TypeKey::of::<T>(), false)
    }

    /// The type of the bean `name`, without creating it.
    ///
    /// Returns `None` if the type cannot be determined, e.g. because a
    /// post-processor replaced the instance.
    pub fn get_type(&self, name: &str) -> Result<Option<TypeKey>> {
        let name = self.store.canonical_name(name);
        if let Some(key) = self.singletons.manual_type(&name) {
            return Ok(Some(key));
        }
        let merged = self.merged(&name)?;
        let predicted = self.predict_type(&merged);
        match self.singletons.instance_of(&name) {
            Some(instance) if predicted.is_some_and(|k| k.type_id() != instance_type_id(&instance)) => {
                Ok(None)
            }
            _ => Ok(predicted),
        }
    }

    /// Returns `true` if `name` is a bean name, an alias, or a registered singleton.
    pub fn contains_bean(&self, name: &str) -> bool {
        let name = self.store.canonical_name(name);
        self.store.contains(&name) || self.singletons.contains(&name)
    }

    pub fn is_singleton(&self, name: &str) -> Result<bool> {
        Ok(self.scope_of(name)?.is_singleton())
    }

    pub fn is_prototype(&self, name: &str) -> Result<bool> {
        Ok(self.scope_of(name)?.is_prototype())
    }

    /// Beans that `name` was wired with, sorted.
    pub fn dependencies_of(&self, name: &str) -> Vec<String> {
        self.graph.dependencies_of(&self.store.canonical_name(name))
    }

    /// Beans wired with `name`, sorted. They are destroyed before it.
    pub fn dependents_of(&self, name: &str) -> Vec<String> {
        self.graph.dependents_of(&self.store.canonical_name(name))
    }

    /// Registers an already built object as a singleton with no definition.
    ///
    /// # Errors
    /// [`ContainerError::InvalidDefinition`] if `name` is taken by a
    /// definition, an alias, or another singleton.
    pub fn register_singleton<T: Send + Sync + 'static>(&self, name: &str, value: T) -> Result<()> {
        let taken = || {
            ContainerError::invalid(
                name,
                "a bean definition or alias is already registered under that name",
            )
        };
        if self.store.is_name_in_use(name) {
            return Err(taken());
        }
        self.singletons.register_manual(name, TypeKey::of::<T>(), Arc::new(value))?;

        // a definition registered concurrently wins the name
        if self.store.is_name_in_use(name) {
            self.singletons.discard(name);
            return Err(taken());
        }
        Ok(())
    }

    /// Registers a definition for `class` under the class's full type name.
    ///
    /// `customize` can adjust the definition before it is registered.
    /// Returns the bean name.
    ///
    /// ```rust,ignore
    /// let name = container.register_bean(mailer_class, |d| d.with_lazy_init(true))?;
    /// ```
    pub fn register_bean(
        &self,
        class: Arc<BeanClass>,
        customize: impl FnOnce(BeanDefinition) -> BeanDefinition,
    ) -> Result<String> {
        let name = class.key().type_name().to_string();
        self.register_bean_definition(&name, customize(BeanDefinition::of_class(class)))?;
        Ok(name)
    }

    /// Pre-instantiates every non-abstract, non-lazy singleton.
    ///
    /// May only run once. If any bean fails, the singletons created so far
    /// are destroyed and the error is returned.
    ///
    /// # Errors
    /// [`ContainerError::AlreadyRefreshed`] on a second call.
    #[instrument(skip(self), name = "container_refresh")]
    pub fn refresh(&self) -> Result<()> {
        if self.refreshed.swap(true, Ordering::SeqCst) {
            return Err(ContainerError::AlreadyRefreshed);
        }

        let names = self.store.names();
        info!(definitions = names.len(), "Pre-instantiating singletons");

        for name in &names {
            let eager = match self.merged(name) {
                Ok(merged) => {
                    !merged.is_abstract() && merged.scope().is_singleton() && !merged.lazy_init()
                }
                Err(err) => {
                    warn!(bean = %name, error = %err, "Refresh aborted");
                    self.destroy_singletons();
                    return Err(err);
                }
            };
            if eager {
                if let Err(err) = self.get_bean(name) {
                    warn!(bean = %name, error = %err, "Refresh aborted, destroying created singletons");
                    self.destroy_singletons();
                    return Err(err);
                }
            }
        }

        info!(
            singletons = self.singletons.created_names_in_order().len(),
            "Container refreshed"
        );
        Ok(())
    }

    pub fn is_refreshed(&self) -> bool {
        self.refreshed.load(Ordering::SeqCst)
    }

    /// Destroys every singleton, dependents before their dependencies and
    /// otherwise in reverse creation order.
    ///
    /// Definitions stay registered; beans are created again on demand.
    #[instrument(skip(self), name = "destroy_singletons")]
    pub fn destroy_singletons(&self) {
        let names = self.singletons.created_names_in_order();
        info!(count = names.len(), "Destroying singletons");

        for name in names.iter().rev() {
            self.destroy_singleton(name);
        }
        self.singletons.clear_failed();
        self.graph.clear();
    }

    /// Merged definition of `name`, from cache when current.
    pub fn merged_definition(&self, name: &str) -> Result<Arc<MergedDefinition>> {
        self.merged(&self.store.canonical_name(name))
    }

    pub(crate) fn merged(&self, name: &str) -> Result<Arc<MergedDefinition>> {
        self.merger.resolve(name, &self.store, &self.pipeline)
    }

    fn scope_of(&self, name: &str) -> Result<Scope> {
        let name = self.store.canonical_name(name);
        if self.singletons.manual_type(&name).is_some() {
            return Ok(Scope::Singleton);
        }
        Ok(self.merged(&name)?.scope().clone())
    }

    /// Drops every cached form of `name` after its definition changed.
    fn reset_definition(&self, name: &str) {
        let derived = self.merger.invalidate(name);
        self.destroy_singleton(name);
        for child in derived {
            self.destroy_singleton(&child);
        }
    }
}

impl AliasRegistry for Container {
    fn register_alias(&self, name: &str, alias: &str) -> Result<()> {
        if self.singletons.manual_type(alias).is_some() {
            return Err(ContainerError::AliasConflict {
                alias: alias.to_string(),
                reason: "a singleton is registered under that name".into(),
            });
        }
        self.store
            .register_alias(name, alias, self.settings.allow_alias_overriding)
    }

    fn remove_alias(&self, alias: &str) -> Result<()> {
        self.store.remove_alias(alias)
    }

    fn is_alias(&self, name: &str) -> bool {
        self.store.is_alias(name)
    }

    fn aliases(&self, name: &str) -> Vec<String> {
        self.store.aliases(name)
    }
}

impl BeanDefinitionRegistry for Container {
    fn register_bean_definition(&self, name: &str, definition: BeanDefinition) -> Result<()> {
        let overridable = self.is_bean_definition_overridable(name);

        if self.singletons.manual_type(name).is_some() {
            if !overridable {
                return Err(ContainerError::DefinitionOverride(
                    crate::error::DefinitionOverrideError { name: name.to_string() },
                ));
            }
            debug!(bean = %name, "Definition replaces registered singleton object");
        }

        let previous = self.store.register(
            name,
            definition,
            overridable,
            self.settings.allow_alias_overriding,
        )?;
        if previous.is_some() {
            info!(bean = %name, "Overriding bean definition");
        }

        self.reset_definition(name);
        Ok(())
    }

    fn remove_bean_definition(&self, name: &str) -> Result<()> {
        self.store.remove(name)?;
        self.reset_definition(name);
        Ok(())
    }

    fn get_bean_definition(&self, name: &str) -> Result<Arc<BeanDefinition>> {
        let canonical = self.store.canonical_name(name);
        self.store
            .get(&canonical)
            .ok_or_else(|| self.store.not_found(name, None))
    }

    fn contains_bean_definition(&self, name: &str) -> bool {
        self.store.contains(name)
    }

    fn bean_definition_names(&self) -> Vec<String> {
        self.store.names()
    }

    fn bean_definition_count(&self) -> usize {
        self.store.count()
    }

    fn is_bean_definition_overridable(&self, name: &str) -> bool {
        self.settings.allow_bean_definition_overriding
            && self.overridable_if.as_ref().is_none_or(|predicate| predicate(name))
    }

    fn is_bean_name_in_use(&self, name: &str) -> bool {
        self.store.is_name_in_use(name)
            || self.singletons.manual_type(name).is_some()
            || !self.graph.dependents_of(name).is_empty()
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut scopes: Vec<&String> = self.scopes.keys().collect();
        scopes.sort();
        f.debug_struct("Container")
            .field("definitions", &self.store.count())
            .field("singletons", &self.singletons.created_names_in_order().len())
            .field("post_processors", &self.pipeline.len())
            .field("scopes", &scopes)
            .field("refreshed", &self.is_refreshed())
            .finish()
    }
}

/// Convenient re-exports for building and using a container.
pub mod prelude {
    pub use crate::bean::{Bean, BeanRef, Injected};
    pub use crate::class::{Args, BeanClass, Dependency};
    pub use crate::container::{Container, ContainerBuilder};
    pub use crate::definition::{BeanDefinition, BeanKind, Resolver, Role, ValueSpec};
    pub use crate::error::{ContainerError, Result};
    pub use crate::key::TypeKey;
    pub use crate::merge::MergedDefinition;
    pub use crate::processor::{BeanPostProcessor, Flow, Step};
    pub use crate::provider::{AliasRegistry, BeanDefinitionRegistry, DefinitionProvider};
    pub use crate::scope::{Scope, ScopeHandler};
    pub use crate::settings::ContainerSettings;
}
