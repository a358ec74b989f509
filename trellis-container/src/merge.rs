//! Definition merging.
//!
//! A child definition only states what differs from its parent. Before a
//! bean can be built its parent chain is flattened into one
//! [`MergedDefinition`]:
//!
//! ```text
//!   base (abstract)        scope = prototype, property url = "db://"
//!     └── pooled           property size = 8
//!           └── reporting  property url = "db://replica"
//!
//!   merged(reporting)      scope = prototype, url = "db://replica", size = 8
//! ```
//!
//! Merged definitions are cached. Each cache entry remembers the generation
//! stamp of every raw definition in its chain and is recomputed as soon as
//! one of them is re-registered or removed.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, trace};

use crate::definition::{BeanDefinition, BeanKind, Role, ValueSpec, validate_kind};
use crate::error::{ContainerError, Result};
use crate::processor::Pipeline;
use crate::registry::DefinitionStore;
use crate::scope::Scope;

/// A fully resolved bean definition, parent chain flattened.
///
/// Post-processors may adjust it through the setters while it is being
/// merged; once cached it is never changed.
#[derive(Clone, Debug, PartialEq)]
pub struct MergedDefinition {
    name: String,
    kind: Option<BeanKind>,
    constructor: Option<String>,
    constructor_args: BTreeMap<usize, ValueSpec>,
    properties: BTreeMap<String, ValueSpec>,
    scope: Scope,
    lazy_init: bool,
    primary: bool,
    autowire_candidate: bool,
    depends_on: Vec<String>,
    is_abstract: bool,
    role: Role,
    description: Option<String>,
    source: Option<String>,
    chain: Vec<String>,
}

impl MergedDefinition {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: None,
            constructor: None,
            constructor_args: BTreeMap::new(),
            properties: BTreeMap::new(),
            scope: Scope::Singleton,
            lazy_init: false,
            primary: false,
            autowire_candidate: true,
            depends_on: Vec::new(),
            is_abstract: false,
            role: Role::Application,
            description: None,
            source: None,
            chain: Vec::new(),
        }
    }

    /// Applies one raw definition on top of what has been merged so far.
    fn apply(&mut self, definition: &BeanDefinition) {
        if let Some(kind) = definition.kind() {
            self.kind = Some(kind.clone());
        }
        if let Some(constructor) = definition.constructor() {
            self.constructor = Some(constructor.to_string());
        }
        for (index, value) in definition.constructor_args() {
            self.constructor_args.insert(*index, value.clone());
        }
        for (name, value) in definition.properties() {
            self.properties.insert(name.clone(), value.clone());
        }
        if let Some(scope) = definition.scope() {
            self.scope = scope.clone();
        }
        if let Some(lazy) = definition.lazy_init() {
            self.lazy_init = lazy;
        }
        if let Some(primary) = definition.primary() {
            self.primary = primary;
        }
        if let Some(candidate) = definition.autowire_candidate() {
            self.autowire_candidate = candidate;
        }
        for name in definition.depends_on() {
            if !self.depends_on.contains(name) {
                self.depends_on.push(name.clone());
            }
        }
        if let Some(role) = definition.role() {
            self.role = role;
        }
        if let Some(description) = definition.description() {
            self.description = Some(description.to_string());
        }
        if let Some(source) = definition.source() {
            self.source = Some(source.to_string());
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> Option<&BeanKind> {
        self.kind.as_ref()
    }

    pub fn constructor(&self) -> Option<&str> {
        self.constructor.as_deref()
    }

    pub fn constructor_args(&self) -> &BTreeMap<usize, ValueSpec> {
        &self.constructor_args
    }

    pub fn properties(&self) -> &BTreeMap<String, ValueSpec> {
        &self.properties
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn lazy_init(&self) -> bool {
        self.lazy_init
    }

    pub fn primary(&self) -> bool {
        self.primary
    }

    pub fn autowire_candidate(&self) -> bool {
        self.autowire_candidate
    }

    pub fn depends_on(&self) -> &[String] {
        &self.depends_on
    }

    pub fn is_abstract(&self) -> bool {
        self.is_abstract
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    /// The bean name followed by its ancestors, nearest first.
    pub fn chain(&self) -> &[String] {
        &self.chain
    }

    // ── Adjustments for definition post-processors ──

    pub fn set_property(&mut self, name: impl Into<String>, value: ValueSpec) {
        self.properties.insert(name.into(), value);
    }

    pub fn remove_property(&mut self, name: &str) -> Option<ValueSpec> {
        self.properties.remove(name)
    }

    pub fn set_arg(&mut self, index: usize, value: ValueSpec) {
        self.constructor_args.insert(index, value);
    }

    pub fn set_scope(&mut self, scope: impl Into<Scope>) {
        self.scope = scope.into();
    }

    pub fn set_lazy_init(&mut self, lazy: bool) {
        self.lazy_init = lazy;
    }

    pub fn set_primary(&mut self, primary: bool) {
        self.primary = primary;
    }

    pub fn set_autowire_candidate(&mut self, candidate: bool) {
        self.autowire_candidate = candidate;
    }

    pub fn add_depends_on(&mut self, name: impl Into<String>) {
        let name = name.into();
        if !self.depends_on.contains(&name) {
            self.depends_on.push(name);
        }
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = Some(description.into());
    }
}

#[derive(Debug)]
struct CachedMerge {
    merged: Arc<MergedDefinition>,
    /// (definition name, generation) for every link of the chain
    stamps: Vec<(String, u64)>,
    alias_generation: Option<u64>,
}

/// Resolves and caches merged definitions.
#[derive(Debug, Default)]
pub(crate) struct DefinitionMerger {
    cache: DashMap<String, CachedMerge>,
}

impl DefinitionMerger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the merged definition of `name`, computing it if the cached
    /// one is missing or stale.
    ///
    /// # Errors
    /// - [`ContainerError::NotFound`] for an unknown name or missing parent
    /// - [`ContainerError::CyclicParent`] if the parent chain loops
    /// - [`ContainerError::InvalidDefinition`] if the merged result is unusable
    pub fn resolve(
        &self,
        name: &str,
        store: &DefinitionStore,
        pipeline: &Pipeline,
    ) -> Result<Arc<MergedDefinition>> {
        if let Some(cached) = self.cache.get(name) {
            if is_current(&cached, store) {
                return Ok(cached.merged.clone());
            }
        }

        let (mut merged, stamps, followed_alias) = self.merge(name, store)?;
        pipeline.process_definition(name, &mut merged)?;

        if !merged.is_abstract {
            match &merged.kind {
                Some(kind) => validate_kind(
                    name,
                    kind,
                    merged.constructor.as_deref(),
                    &merged.properties,
                )?,
                None => {
                    return Err(ContainerError::invalid(
                        name,
                        format!(
                            "no bean class, factory method or supplier anywhere in the parent chain {:?}",
                            merged.chain
                        ),
                    ));
                }
            }
        }

        let merged = Arc::new(merged);
        debug!(bean = %name, depth = stamps.len(), "Merged bean definition");
        self.cache.insert(
            name.to_string(),
            CachedMerge {
                merged: merged.clone(),
                stamps,
                alias_generation: followed_alias.then(|| store.alias_generation()),
            },
        );
        Ok(merged)
    }

    fn merge(
        &self,
        name: &str,
        store: &DefinitionStore,
    ) -> Result<(MergedDefinition, Vec<(String, u64)>, bool)> {
        let mut links: Vec<(String, Arc<BeanDefinition>, u64)> = Vec::new();
        let mut seen = HashSet::new();
        let mut followed_alias = false;
        let mut current = name.to_string();
        let mut required_by: Option<String> = None;

        loop {
            if !seen.insert(current.clone()) {
                let mut chain: Vec<String> = links.iter().map(|(n, _, _)| n.clone()).collect();
                chain.push(current);
                return Err(ContainerError::CyclicParent { chain });
            }

            let (definition, generation) = store
                .get_with_generation(&current)
                .ok_or_else(|| store.not_found(&current, required_by.as_deref()))?;

            let parent = definition.parent().map(str::to_string);
            links.push((current.clone(), definition, generation));

            match parent {
                Some(parent) => {
                    let canonical = store.canonical_name(&parent);
                    followed_alias |= canonical != parent;
                    trace!(bean = %current, parent = %canonical, "Following parent definition");
                    required_by = Some(current);
                    current = canonical;
                }
                None => break,
            }
        }

        let mut merged = MergedDefinition::new(name);
        for (_, definition, _) in links.iter().rev() {
            merged.apply(definition);
        }
        // the abstract flag belongs to the bean itself
        merged.is_abstract = links[0].1.is_abstract();
        merged.chain = links.iter().map(|(n, _, _)| n.clone()).collect();

        let stamps = links.into_iter().map(|(n, _, g)| (n, g)).collect();
        Ok((merged, stamps, followed_alias))
    }

    /// Whether `merged` is still the cached merge of its bean and every raw
    /// definition in its chain is unchanged since.
    pub fn is_current(&self, merged: &MergedDefinition, store: &DefinitionStore) -> bool {
        self.cache.get(merged.name()).is_some_and(|cached| {
            std::ptr::eq(Arc::as_ptr(&cached.merged), merged) && is_current(&cached, store)
        })
    }

    /// Drops the cached merge of `name` and of every definition derived
    /// from it. Returns the names of the derived definitions.
    pub fn invalidate(&self, name: &str) -> Vec<String> {
        let derived: Vec<String> = self
            .cache
            .iter()
            .filter(|entry| {
                entry.key() != name && entry.value().stamps.iter().any(|(n, _)| n == name)
            })
            .map(|entry| entry.key().clone())
            .collect();

        self.cache.remove(name);
        for child in &derived {
            self.cache.remove(child);
        }

        if !derived.is_empty() {
            debug!(bean = %name, derived = ?derived, "Invalidated derived merged definitions");
        }
        derived
    }
}

fn is_current(cached: &CachedMerge, store: &DefinitionStore) -> bool {
    if let Some(generation) = cached.alias_generation {
        if generation != store.alias_generation() {
            return false;
        }
    }
    cached
        .stamps
        .iter()
        .all(|(name, generation)| store.generation(name) == Some(*generation))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bean::Literal;
    use crate::class::{BeanClass, Dependency};

    #[derive(Default)]
    struct Pool {
        url: String,
        size: u32,
    }

    fn pool_class() -> Arc<BeanClass> {
        BeanClass::builder::<Pool>()
            .with_default()
            .property("url", Dependency::on::<String>(), |p, v| {
                p.url = v.into_value()?;
                Ok(())
            })
            .property("size", Dependency::on::<u32>(), |p, v| {
                p.size = v.into_value()?;
                Ok(())
            })
            .build()
    }

    fn register(store: &DefinitionStore, name: &str, definition: BeanDefinition) {
        store.register(name, definition, true, true).unwrap();
    }

    fn literal<T: 'static>(spec: Option<&ValueSpec>) -> Option<&T> {
        match spec {
            Some(ValueSpec::Literal(literal)) => literal.downcast_ref::<T>(),
            _ => None,
        }
    }

    #[test]
    fn three_level_merge() {
        let store = DefinitionStore::new(3);
        let pipeline = Pipeline::default();
        let merger = DefinitionMerger::new();

        register(
            &store,
            "base",
            BeanDefinition::of_class(pool_class())
                .with_abstract(true)
                .with_scope(Scope::Prototype)
                .with_property("url", ValueSpec::value(String::from("db://")))
                .with_depends_on("metrics"),
        );
        register(
            &store,
            "pooled",
            BeanDefinition::child_of("base")
                .with_property("size", ValueSpec::value(8u32))
                .with_depends_on("logging"),
        );
        register(
            &store,
            "reporting",
            BeanDefinition::child_of("pooled")
                .with_property("url", ValueSpec::value(String::from("db://replica")))
                .with_lazy_init(true)
                .with_depends_on("metrics"),
        );

        let merged = merger.resolve("reporting", &store, &pipeline).unwrap();

        assert_eq!(merged.scope(), &Scope::Prototype);
        assert!(merged.lazy_init());
        assert!(!merged.is_abstract());
        assert_eq!(
            literal::<String>(merged.properties().get("url")).map(String::as_str),
            Some("db://replica")
        );
        assert_eq!(literal::<u32>(merged.properties().get("size")), Some(&8));
        assert_eq!(merged.depends_on(), ["metrics", "logging"]);
        assert_eq!(merged.chain(), ["reporting", "pooled", "base"]);
        assert!(matches!(merged.kind(), Some(BeanKind::Class(_))));

        // the abstract flag is not inherited, but the base itself stays abstract
        assert!(merger.resolve("base", &store, &pipeline).unwrap().is_abstract());
    }

    #[test]
    fn constructor_args_combine_by_index() {
        let store = DefinitionStore::new(3);
        let merger = DefinitionMerger::new();
        let first = Literal::new(1u32);

        register(
            &store,
            "parent",
            BeanDefinition::of_class(pool_class())
                .with_arg(0, ValueSpec::Literal(first.clone()))
                .with_arg(1, ValueSpec::value(2u32)),
        );
        register(
            &store,
            "child",
            BeanDefinition::child_of("parent").with_arg(1, ValueSpec::reference("other")),
        );

        let merged = merger.resolve("child", &store, &Pipeline::default()).unwrap();
        assert_eq!(merged.constructor_args().get(&0), Some(&ValueSpec::Literal(first)));
        assert_eq!(
            merged.constructor_args().get(&1),
            Some(&ValueSpec::Ref("other".into()))
        );
    }

    #[test]
    fn cyclic_parents_are_rejected() {
        let store = DefinitionStore::new(3);
        register(&store, "a", BeanDefinition::child_of("b"));
        register(&store, "b", BeanDefinition::child_of("c"));
        register(&store, "c", BeanDefinition::child_of("a"));

        let err = DefinitionMerger::new()
            .resolve("a", &store, &Pipeline::default())
            .unwrap_err();
        match err {
            ContainerError::CyclicParent { chain } => assert_eq!(chain, ["a", "b", "c", "a"]),
            other => panic!("Expected CyclicParent, got: {other:?}"),
        }
    }

    #[test]
    fn missing_parent_names_the_child() {
        let store = DefinitionStore::new(3);
        register(&store, "child", BeanDefinition::child_of("ghost"));

        match DefinitionMerger::new().resolve("child", &store, &Pipeline::default()) {
            Err(ContainerError::NotFound(err)) => {
                assert_eq!(err.name, "ghost");
                assert_eq!(err.required_by.as_deref(), Some("child"));
            }
            other => panic!("Expected NotFound, got: {other:?}"),
        }
    }

    #[test]
    fn parent_may_be_an_alias() {
        let store = DefinitionStore::new(3);
        register(&store, "base", BeanDefinition::of_class(pool_class()).with_primary(true));
        store.register_alias("base", "template", true).unwrap();
        register(&store, "child", BeanDefinition::child_of("template"));

        let merged = DefinitionMerger::new()
            .resolve("child", &store, &Pipeline::default())
            .unwrap();
        assert!(merged.primary());
        assert_eq!(merged.chain(), ["child", "base"]);
    }

    #[test]
    fn cache_is_refreshed_when_a_parent_changes() {
        let store = DefinitionStore::new(3);
        let pipeline = Pipeline::default();
        let merger = DefinitionMerger::new();

        register(&store, "base", BeanDefinition::of_class(pool_class()));
        register(&store, "child", BeanDefinition::child_of("base"));

        let first = merger.resolve("child", &store, &pipeline).unwrap();
        let again = merger.resolve("child", &store, &pipeline).unwrap();
        assert!(Arc::ptr_eq(&first, &again));

        register(&store, "base", BeanDefinition::of_class(pool_class()).with_lazy_init(true));
        let refreshed = merger.resolve("child", &store, &pipeline).unwrap();
        assert!(!Arc::ptr_eq(&first, &refreshed));
        assert!(refreshed.lazy_init());
    }

    #[test]
    fn merge_goes_stale_when_its_definition_is_replaced() {
        let store = DefinitionStore::new(3);
        let pipeline = Pipeline::default();
        let merger = DefinitionMerger::new();

        register(&store, "pool", BeanDefinition::of_class(pool_class()));
        let merged = merger.resolve("pool", &store, &pipeline).unwrap();
        assert!(merger.is_current(&merged, &store));

        register(&store, "pool", BeanDefinition::of_class(pool_class()).with_primary(true));
        assert!(!merger.is_current(&merged, &store));

        let refreshed = merger.resolve("pool", &store, &pipeline).unwrap();
        assert!(merger.is_current(&refreshed, &store));
    }

    #[test]
    fn invalidate_reports_derived_definitions() {
        let store = DefinitionStore::new(3);
        let pipeline = Pipeline::default();
        let merger = DefinitionMerger::new();

        register(&store, "base", BeanDefinition::of_class(pool_class()));
        register(&store, "child", BeanDefinition::child_of("base"));
        register(&store, "other", BeanDefinition::of_class(pool_class()));
        for name in ["base", "child", "other"] {
            merger.resolve(name, &store, &pipeline).unwrap();
        }

        assert_eq!(merger.invalidate("base"), vec!["child".to_string()]);
        assert!(merger.invalidate("other").is_empty());
    }

    #[test]
    fn child_without_kind_anywhere_is_invalid() {
        let store = DefinitionStore::new(3);
        register(&store, "base", BeanDefinition::new().with_abstract(true));
        register(&store, "child", BeanDefinition::child_of("base"));

        let err = DefinitionMerger::new()
            .resolve("child", &store, &Pipeline::default())
            .unwrap_err();
        assert!(matches!(err, ContainerError::InvalidDefinition { .. }));
    }
}
