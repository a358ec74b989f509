//! Definition store: every registered bean definition and alias.
//!
//! The store maps bean names to [`BeanDefinition`]s and keeps a separate
//! alias table. Each registration is stamped with a fresh generation number
//! so that merged definitions derived from it can tell when they are stale.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::{debug, trace};
use trellis_support::rendering::suggest_similar;

use crate::definition::BeanDefinition;
use crate::error::{ContainerError, DefinitionOverrideError, NotFoundError, Result};

/// A registered definition with the generation it was registered at.
#[derive(Debug, Clone)]
struct Stored {
    definition: Arc<BeanDefinition>,
    generation: u64,
}

#[derive(Debug, Default)]
struct StoreState {
    definitions: HashMap<String, Stored>,
    /// Bean names in registration order.
    order: Vec<String>,
    /// alias -> name (which may itself be an alias)
    aliases: HashMap<String, String>,
}

impl StoreState {
    fn resolve_alias(&self, name: &str) -> String {
        let mut current = name;
        let mut seen = HashSet::new();
        while let Some(target) = self.aliases.get(current) {
            if !seen.insert(current) {
                break;
            }
            current = target.as_str();
        }
        current.to_string()
    }

    /// Returns `true` if `name` resolves to `alias` through the alias table.
    fn has_alias(&self, name: &str, alias: &str) -> bool {
        self.aliases.iter().any(|(registered, target)| {
            target == name && (registered == alias || self.has_alias(registered, alias))
        })
    }

    fn collect_aliases(&self, name: &str, into: &mut Vec<String>) {
        for (alias, target) in &self.aliases {
            if target == name && !into.contains(alias) {
                into.push(alias.clone());
                self.collect_aliases(alias, into);
            }
        }
    }
}

/// Thread-safe bean definition and alias storage.
///
/// Readers never observe a half-applied registration: every mutation
/// happens under one write lock.
#[derive(Debug)]
pub(crate) struct DefinitionStore {
    state: RwLock<StoreState>,
    generation: AtomicU64,
    alias_generation: AtomicU64,
    suggestion_limit: usize,
}

impl DefinitionStore {
    pub fn new(suggestion_limit: usize) -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            generation: AtomicU64::new(0),
            alias_generation: AtomicU64::new(0),
            suggestion_limit,
        }
    }

    /// Registers `definition` under `name`.
    ///
    /// Returns the definition it replaced, if any.
    ///
    /// # Errors
    /// - [`ContainerError::InvalidDefinition`] if the definition fails validation
    /// - [`ContainerError::DefinitionOverride`] if `name` is taken and not overridable
    pub fn register(
        &self,
        name: &str,
        definition: BeanDefinition,
        overridable: bool,
        alias_overridable: bool,
    ) -> Result<Option<Arc<BeanDefinition>>> {
        definition.validate(name)?;

        let mut state = self.state.write();

        if state.definitions.contains_key(name) && !overridable {
            return Err(ContainerError::DefinitionOverride(DefinitionOverrideError {
                name: name.to_string(),
            }));
        }

        if state.aliases.contains_key(name) {
            if !alias_overridable {
                return Err(ContainerError::DefinitionOverride(DefinitionOverrideError {
                    name: name.to_string(),
                }));
            }
            debug!(bean = %name, "Removing alias shadowed by a bean definition");
            state.aliases.remove(name);
            self.alias_generation.fetch_add(1, Ordering::SeqCst);
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let previous = state.definitions.insert(
            name.to_string(),
            Stored {
                definition: Arc::new(definition),
                generation,
            },
        );

        match &previous {
            Some(_) => debug!(bean = %name, generation, "Overriding bean definition"),
            None => {
                state.order.push(name.to_string());
                debug!(bean = %name, generation, "Registered bean definition");
            }
        }

        Ok(previous.map(|stored| stored.definition))
    }

    /// Removes the definition registered under `name`.
    ///
    /// Aliases pointing at it are kept; resolving them fails until the
    /// name is registered again.
    pub fn remove(&self, name: &str) -> Result<Arc<BeanDefinition>> {
        let mut state = self.state.write();
        let removed = state.definitions.remove(name);
        match removed {
            Some(stored) => {
                state.order.retain(|n| n != name);
                debug!(bean = %name, "Removed bean definition");
                Ok(stored.definition)
            }
            None => {
                drop(state);
                Err(self.not_found(name, None))
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<BeanDefinition>> {
        self.state
            .read()
            .definitions
            .get(name)
            .map(|stored| stored.definition.clone())
    }

    /// Returns the definition together with its generation stamp.
    pub fn get_with_generation(&self, name: &str) -> Option<(Arc<BeanDefinition>, u64)> {
        self.state
            .read()
            .definitions
            .get(name)
            .map(|stored| (stored.definition.clone(), stored.generation))
    }

    pub fn generation(&self, name: &str) -> Option<u64> {
        self.state.read().definitions.get(name).map(|stored| stored.generation)
    }

    /// Bumped on every alias change.
    pub fn alias_generation(&self) -> u64 {
        self.alias_generation.load(Ordering::SeqCst)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.state.read().definitions.contains_key(name)
    }

    /// Bean names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.state.read().order.clone()
    }

    pub fn count(&self) -> usize {
        self.state.read().definitions.len()
    }

    /// Returns `true` if `name` is a bean name or an alias.
    pub fn is_name_in_use(&self, name: &str) -> bool {
        let state = self.state.read();
        state.definitions.contains_key(name) || state.aliases.contains_key(name)
    }

    /// Follows aliases until reaching a name that is not an alias.
    pub fn canonical_name(&self, name: &str) -> String {
        let state = self.state.read();
        if state.aliases.is_empty() {
            return name.to_string();
        }
        let canonical = state.resolve_alias(name);
        if canonical != name {
            trace!(alias = %name, bean = %canonical, "Resolved alias");
        }
        canonical
    }

    // ── Aliases ──

    /// Registers `alias` for `name`.
    ///
    /// # Errors
    /// [`ContainerError::AliasConflict`] if `alias` is a bean name, already
    /// points elsewhere (and overriding is off), or would close an alias cycle.
    pub fn register_alias(&self, name: &str, alias: &str, allow_override: bool) -> Result<()> {
        if name.is_empty() || alias.is_empty() {
            return Err(ContainerError::AliasConflict {
                alias: alias.to_string(),
                reason: "alias and bean name must not be empty".into(),
            });
        }

        let mut state = self.state.write();

        if alias == name {
            if state.aliases.remove(alias).is_some() {
                self.alias_generation.fetch_add(1, Ordering::SeqCst);
                debug!(alias = %alias, "Alias equals bean name, removed it");
            }
            return Ok(());
        }

        if state.definitions.contains_key(alias) {
            return Err(ContainerError::AliasConflict {
                alias: alias.to_string(),
                reason: "a bean definition is registered under that name".into(),
            });
        }

        if let Some(existing) = state.aliases.get(alias) {
            if existing == name {
                return Ok(());
            }
            if !allow_override {
                return Err(ContainerError::AliasConflict {
                    alias: alias.to_string(),
                    reason: format!("it is already registered for bean '{existing}'"),
                });
            }
            debug!(alias = %alias, old = %existing, new = %name, "Overriding alias");
        }

        if state.has_alias(alias, name) {
            return Err(ContainerError::AliasConflict {
                alias: alias.to_string(),
                reason: format!("'{name}' is already an alias of '{alias}', this would form a cycle"),
            });
        }

        state.aliases.insert(alias.to_string(), name.to_string());
        self.alias_generation.fetch_add(1, Ordering::SeqCst);
        debug!(alias = %alias, bean = %name, "Registered alias");
        Ok(())
    }

    pub fn remove_alias(&self, alias: &str) -> Result<()> {
        match self.state.write().aliases.remove(alias) {
            Some(_) => {
                self.alias_generation.fetch_add(1, Ordering::SeqCst);
                debug!(alias = %alias, "Removed alias");
                Ok(())
            }
            None => Err(ContainerError::not_found(alias)),
        }
    }

    pub fn is_alias(&self, name: &str) -> bool {
        self.state.read().aliases.contains_key(name)
    }

    /// All aliases of `name`, including aliases of aliases, sorted.
    pub fn aliases(&self, name: &str) -> Vec<String> {
        let state = self.state.read();
        let mut aliases = Vec::new();
        state.collect_aliases(name, &mut aliases);
        aliases.sort();
        aliases
    }

    /// Builds a not-found error with similarly named beans as suggestions.
    pub fn not_found(&self, name: &str, required_by: Option<&str>) -> ContainerError {
        let state = self.state.read();
        let available: Vec<&str> = state
            .order
            .iter()
            .chain(state.aliases.keys())
            .map(String::as_str)
            .collect();

        ContainerError::NotFound(NotFoundError {
            name: name.to_string(),
            required_by: required_by.map(str::to_string),
            suggestions: suggest_similar(name, &available, self.suggestion_limit),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::BeanClass;

    #[derive(Default)]
    struct Database;

    fn definition() -> BeanDefinition {
        BeanDefinition::of_class(BeanClass::builder::<Database>().with_default().build())
    }

    fn store() -> DefinitionStore {
        DefinitionStore::new(3)
    }

    #[test]
    fn register_and_get() {
        let store = store();
        assert!(store.register("db", definition(), true, true).unwrap().is_none());

        assert!(store.contains("db"));
        assert_eq!(store.count(), 1);
        assert!(store.get("db").is_some());
        assert!(store.get("other").is_none());
    }

    #[test]
    fn invalid_definition_is_rejected() {
        let store = store();
        let err = store.register("db", BeanDefinition::new(), true, true).unwrap_err();
        assert!(matches!(err, ContainerError::InvalidDefinition { .. }));
        assert_eq!(store.count(), 0);
    }

    #[test]
    fn override_disallowed() {
        let store = store();
        store.register("db", definition(), false, true).unwrap();

        let result = store.register("db", definition(), false, true);
        assert!(matches!(result, Err(ContainerError::DefinitionOverride(_))));
    }

    #[test]
    fn override_replaces_and_bumps_generation() {
        let store = store();
        store.register("db", definition(), true, true).unwrap();
        let first = store.generation("db").unwrap();

        let previous = store.register("db", definition(), true, true).unwrap();
        assert!(previous.is_some());
        assert!(store.generation("db").unwrap() > first);
        // order keeps the original position
        assert_eq!(store.names(), vec!["db".to_string()]);
    }

    #[test]
    fn names_in_registration_order() {
        let store = store();
        for name in ["c", "a", "b"] {
            store.register(name, definition(), true, true).unwrap();
        }
        assert_eq!(store.names(), vec!["c", "a", "b"]);

        store.remove("a").unwrap();
        assert_eq!(store.names(), vec!["c", "b"]);
    }

    #[test]
    fn remove_missing_is_not_found_with_suggestions() {
        let store = store();
        store.register("dataSource", definition(), true, true).unwrap();

        match store.remove("dataSourc").unwrap_err() {
            ContainerError::NotFound(err) => {
                assert_eq!(err.name, "dataSourc");
                assert!(err.suggestions.contains(&"dataSource".to_string()));
            }
            other => panic!("Expected NotFound, got: {other:?}"),
        }
    }

    #[test]
    fn alias_resolution_is_a_chain() {
        let store = store();
        store.register("db", definition(), true, true).unwrap();
        store.register_alias("db", "database", true).unwrap();
        store.register_alias("database", "primary", true).unwrap();

        assert_eq!(store.canonical_name("primary"), "db");
        assert_eq!(store.canonical_name("db"), "db");
        assert_eq!(store.aliases("db"), vec!["database", "primary"]);
        assert!(store.is_name_in_use("primary"));
    }

    #[test]
    fn alias_conflicts() {
        let store = store();
        store.register("a", definition(), true, true).unwrap();
        store.register("b", definition(), true, true).unwrap();

        // alias cannot also be a bean name
        assert!(matches!(
            store.register_alias("a", "b", true),
            Err(ContainerError::AliasConflict { .. })
        ));

        store.register_alias("a", "x", false).unwrap();
        // same mapping again is fine
        store.register_alias("a", "x", false).unwrap();
        // re-pointing requires overriding
        assert!(store.register_alias("b", "x", false).is_err());
        store.register_alias("b", "x", true).unwrap();
        assert_eq!(store.canonical_name("x"), "b");
    }

    #[test]
    fn alias_cycle_is_rejected() {
        let store = store();
        store.register_alias("a", "b", true).unwrap();
        let err = store.register_alias("b", "a", true).unwrap_err();
        assert!(format!("{err}").contains("cycle"));
    }

    #[test]
    fn definition_replaces_alias_when_allowed() {
        let store = store();
        store.register("db", definition(), true, true).unwrap();
        store.register_alias("db", "main", true).unwrap();

        assert!(store.register("main", definition(), true, false).is_err());
        store.register("main", definition(), true, true).unwrap();
        assert!(!store.is_alias("main"));
        assert_eq!(store.canonical_name("main"), "main");
    }

    #[test]
    fn alias_equal_to_name_removes_alias() {
        let store = store();
        store.register_alias("db", "main", true).unwrap();
        store.register_alias("main", "main", true).unwrap();
        assert!(!store.is_alias("main"));
    }
}
