//! Constructor selection and dependency resolution.
//!
//! # Candidate selection
//! For an injection point of type `T`:
//! 1. a qualifier names the bean directly
//! 2. for properties, a bean whose name equals the property name wins
//! 3. otherwise every autowire candidate of type `T` is considered; a
//!    single candidate wins, then a single primary one, then one whose
//!    name or alias matches the injection point's name
//!
//! # Constructor selection
//! A pinned constructor is used as is. Otherwise the constructor with the
//! most parameters whose every parameter can be satisfied wins; two such
//! constructors with the same parameter count are ambiguous.

use std::sync::Arc;

use tracing::{debug, trace};
use trellis_support::rendering::render_names;

use crate::bean::{Injected, instance_type_id};
use crate::class::{BeanClass, Constructor, Dependency, FactoryMethod};
use crate::container::Container;
use crate::definition::{BeanKind, ValueSpec};
use crate::error::{ContainerError, Result};
use crate::factory::Frame;
use crate::key::TypeKey;
use crate::merge::MergedDefinition;

/// Outcome of looking for the bean to inject.
#[derive(Debug, PartialEq)]
pub(crate) enum Resolution {
    Found(String),
    Missing(String),
    Ambiguous(String),
}

impl Container {
    /// Picks the constructor for `name` and resolves its arguments.
    ///
    /// # Errors
    /// - [`ContainerError::NoResolvableConstructor`] if no constructor can be satisfied
    /// - [`ContainerError::AmbiguousConstructor`] on a tie for the most parameters
    pub(crate) fn select_constructor<'c>(
        &self,
        name: &str,
        merged: &MergedDefinition,
        class: &'c BeanClass,
        frame: &Frame<'_>,
    ) -> Result<(&'c Constructor, Vec<Injected>)> {
        if let Some(pinned) = merged.constructor() {
            let constructor = class.constructor(pinned).ok_or_else(|| {
                ContainerError::invalid(
                    name,
                    format!("class {} declares no constructor '{pinned}'", class.key().short_name()),
                )
            })?;
            let values = self.resolve_arguments(name, merged, constructor.params(), frame)?;
            return Ok((constructor, values));
        }

        if class.constructors().is_empty() {
            return Err(ContainerError::NoResolvableConstructor {
                bean: name.to_string(),
                reason: "the class declares no constructors".into(),
            });
        }

        let required = merged.constructor_args().keys().next_back().map_or(0, |index| index + 1);
        let mut reasons = Vec::new();
        let mut satisfiable: Vec<&Constructor> = Vec::new();

        for constructor in class.constructors() {
            if constructor.params().len() < required {
                reasons.push(format!(
                    "{} takes fewer than {required} arguments",
                    constructor.signature()
                ));
                continue;
            }
            match self.check_satisfiable(name, merged, constructor) {
                Ok(()) => satisfiable.push(constructor),
                Err(reason) => reasons.push(format!("{}: {reason}", constructor.signature())),
            }
        }

        // greedy: most parameters first
        satisfiable.sort_by_key(|constructor| std::cmp::Reverse(constructor.params().len()));
        let Some(&best) = satisfiable.first() else {
            return Err(ContainerError::NoResolvableConstructor {
                bean: name.to_string(),
                reason: reasons.join("; "),
            });
        };

        let tied: Vec<String> = satisfiable
            .iter()
            .filter(|constructor| constructor.params().len() == best.params().len())
            .map(|constructor| constructor.signature())
            .collect();
        if tied.len() > 1 {
            return Err(ContainerError::AmbiguousConstructor {
                bean: name.to_string(),
                candidates: tied,
            });
        }

        debug!(bean = %name, constructor = %best.signature(), "Selected constructor");
        let values = self.resolve_arguments(name, merged, best.params(), frame)?;
        Ok((best, values))
    }

    /// Checks, without creating anything, that every parameter of
    /// `constructor` has a value.
    fn check_satisfiable(
        &self,
        name: &str,
        merged: &MergedDefinition,
        constructor: &Constructor,
    ) -> std::result::Result<(), String> {
        for (index, param) in constructor.params().iter().enumerate() {
            let key = param.key();
            match merged.constructor_args().get(&index) {
                Some(ValueSpec::Literal(literal)) => {
                    if !literal.is_of(&key) {
                        return Err(format!("argument #{index} is not a {}", key.short_name()));
                    }
                }
                Some(ValueSpec::Ref(target)) => {
                    let target = self.store.canonical_name(target);
                    if !self.contains_bean(&target) {
                        return Err(format!("argument #{index} references unknown bean '{target}'"));
                    }
                    if self.known_type(&target).is_some_and(|actual| actual != key) {
                        return Err(format!(
                            "argument #{index} references bean '{target}', which is not a {}",
                            key.short_name()
                        ));
                    }
                }
                Some(ValueSpec::Autowire) | None => match self.determine_candidate(name, param, false) {
                    Resolution::Found(_) => {}
                    Resolution::Missing(_) if !param.is_required() => {}
                    Resolution::Missing(reason) | Resolution::Ambiguous(reason) => {
                        return Err(format!("argument #{index}: {reason}"));
                    }
                },
            }
        }
        Ok(())
    }

    /// Resolves one value per parameter, from explicit arguments where the
    /// definition has them and by autowiring otherwise.
    pub(crate) fn resolve_arguments(
        &self,
        bean: &str,
        merged: &MergedDefinition,
        params: &[Dependency],
        frame: &Frame<'_>,
    ) -> Result<Vec<Injected>> {
        if let Some(index) = merged.constructor_args().keys().find(|&&index| index >= params.len()) {
            return Err(ContainerError::invalid(
                bean,
                format!("argument #{index} is out of range for {} parameters", params.len()),
            ));
        }

        params
            .iter()
            .enumerate()
            .map(|(index, param)| {
                let point = format!("argument #{index}");
                match merged.constructor_args().get(&index) {
                    Some(spec) => self.resolve_value(bean, &point, param, spec, frame),
                    None => self.resolve_dependency(bean, &point, param, false, frame),
                }
            })
            .collect()
    }

    /// Resolves an explicit value from a definition.
    pub(crate) fn resolve_value(
        &self,
        bean: &str,
        point: &str,
        dependency: &Dependency,
        spec: &ValueSpec,
        frame: &Frame<'_>,
    ) -> Result<Injected> {
        match spec {
            ValueSpec::Literal(literal) => {
                if literal.is_of(&dependency.key()) {
                    Ok(Injected::Value(literal.clone()))
                } else {
                    Err(ContainerError::UnsatisfiedDependency {
                        bean: bean.to_string(),
                        dependency: point.to_string(),
                        reason: format!("expected a value of type {}", dependency.key().short_name()),
                    })
                }
            }
            ValueSpec::Ref(target) => self.inject_bean(bean, target, frame).map(Injected::Bean),
            ValueSpec::Autowire => self.resolve_dependency(bean, point, dependency, true, frame),
        }
    }

    /// Finds and resolves the bean to inject at `point`.
    ///
    /// # Errors
    /// [`ContainerError::UnsatisfiedDependency`] if a required dependency
    /// has no candidate, or several candidates cannot be told apart.
    pub(crate) fn resolve_dependency(
        &self,
        bean: &str,
        point: &str,
        dependency: &Dependency,
        by_name_first: bool,
        frame: &Frame<'_>,
    ) -> Result<Injected> {
        match self.determine_candidate(bean, dependency, by_name_first) {
            Resolution::Found(candidate) => {
                trace!(bean = %bean, point, candidate = %candidate, "Autowiring");
                self.inject_bean(bean, &candidate, frame).map(Injected::Bean)
            }
            Resolution::Missing(_) if !dependency.is_required() => Ok(Injected::Absent),
            Resolution::Missing(reason) | Resolution::Ambiguous(reason) => {
                Err(ContainerError::UnsatisfiedDependency {
                    bean: bean.to_string(),
                    dependency: point.to_string(),
                    reason,
                })
            }
        }
    }

    pub(crate) fn determine_candidate(
        &self,
        bean: &str,
        dependency: &Dependency,
        by_name_first: bool,
    ) -> Resolution {
        let key = dependency.key();
        let allowed = |candidate: &str| candidate != bean || dependency.allows_self_reference();

        if let Some(qualifier) = dependency.qualifier_name() {
            let target = self.store.canonical_name(qualifier);
            return if self.contains_bean(&target) && self.matches_type(&target, key) {
                Resolution::Found(target)
            } else {
                Resolution::Missing(format!(
                    "no bean named '{qualifier}' of type {} is available",
                    key.short_name()
                ))
            };
        }

        if by_name_first {
            if let Some(wanted) = dependency.name() {
                let target = self.store.canonical_name(wanted);
                if allowed(&target) && self.contains_bean(&target) && self.matches_type(&target, key) {
                    return Resolution::Found(target);
                }
            }
        }

        let candidates: Vec<String> = self
            .names_for_type(key, true)
            .into_iter()
            .filter(|candidate| allowed(candidate))
            .collect();

        match candidates.as_slice() {
            [] => {
                return Resolution::Missing(format!(
                    "no bean of type {} is available",
                    key.short_name()
                ));
            }
            [only] => return Resolution::Found(only.clone()),
            _ => {}
        }

        match self.primary_candidates(&candidates).as_slice() {
            [] => {}
            [only] => return Resolution::Found(only.clone()),
            several => {
                return Resolution::Ambiguous(format!(
                    "more than one primary bean found among {}",
                    render_names(several)
                ));
            }
        }

        if let Some(wanted) = dependency.name() {
            let by_name = candidates.iter().find(|candidate| {
                candidate.as_str() == wanted || self.store.aliases(candidate).iter().any(|a| a == wanted)
            });
            if let Some(candidate) = by_name {
                return Resolution::Found(candidate.clone());
            }
        }

        Resolution::Ambiguous(format!(
            "expected a single matching bean but found {}: {}",
            candidates.len(),
            render_names(&candidates)
        ))
    }

    /// Name of the unique bean of type `key`, preferring autowire
    /// candidates and then a single primary bean.
    pub(crate) fn unique_name_for_type(&self, key: TypeKey) -> Result<String> {
        let mut candidates = self.names_for_type(key, false);
        if candidates.len() > 1 {
            let autowirable = self.names_for_type(key, true);
            if !autowirable.is_empty() {
                candidates = autowirable;
            }
        }

        if candidates.is_empty() {
            return Err(ContainerError::NoSuchBean {
                type_name: key.type_name(),
            });
        }
        if candidates.len() == 1 {
            return Ok(candidates.remove(0));
        }
        if let [only] = self.primary_candidates(&candidates).as_slice() {
            return Ok(only.clone());
        }
        Err(ContainerError::AmbiguousBean {
            type_name: key.type_name(),
            candidates,
        })
    }

    /// Names of beans of type `key`: definitions in registration order,
    /// then directly registered singletons.
    pub(crate) fn names_for_type(&self, key: TypeKey, autowire_only: bool) -> Vec<String> {
        let mut names = Vec::new();

        for name in self.store.names() {
            let merged = match self.merged(&name) {
                Ok(merged) => merged,
                Err(err) => {
                    trace!(bean = %name, error = %err, "Skipping unresolvable definition in type lookup");
                    continue;
                }
            };
            if merged.is_abstract() || (autowire_only && !merged.autowire_candidate()) {
                continue;
            }
            if self.merged_matches_type(&name, &merged, key) {
                names.push(name);
            }
        }

        for name in self.singletons.manual_names() {
            if self.singletons.manual_type(&name) == Some(key) && !names.contains(&name) {
                names.push(name);
            }
        }

        names
    }

    fn primary_candidates(&self, candidates: &[String]) -> Vec<String> {
        candidates
            .iter()
            .filter(|name| self.merged(name).is_ok_and(|merged| merged.primary()))
            .cloned()
            .collect()
    }

    pub(crate) fn matches_type(&self, name: &str, key: TypeKey) -> bool {
        if let Some(manual) = self.singletons.manual_type(name) {
            return manual == key;
        }
        self.merged(name)
            .is_ok_and(|merged| self.merged_matches_type(name, &merged, key))
    }

    fn merged_matches_type(&self, name: &str, merged: &MergedDefinition, key: TypeKey) -> bool {
        match self.singletons.instance_of(name) {
            Some(instance) => instance_type_id(&instance) == key.type_id(),
            None => self.predict_type(merged) == Some(key),
        }
    }

    /// Type of `name` if it can be told without creating the bean.
    fn known_type(&self, name: &str) -> Option<TypeKey> {
        if let Some(manual) = self.singletons.manual_type(name) {
            return Some(manual);
        }
        let merged = self.merged(name).ok()?;
        self.predict_type(&merged)
    }

    /// The type a definition will produce, before any post-processing.
    pub(crate) fn predict_type(&self, merged: &MergedDefinition) -> Option<TypeKey> {
        match merged.kind()? {
            BeanKind::Class(class) => Some(class.key()),
            BeanKind::StaticFactory { class, method } => {
                class.factory_method(method).map(FactoryMethod::produces)
            }
            BeanKind::FactoryBean { factory_bean, method } => {
                let factory = self.store.canonical_name(factory_bean);
                let class = self.class_of(&factory).ok()?;
                class.factory_method(method).map(FactoryMethod::produces)
            }
            BeanKind::Supplier(supplier) => Some(supplier.produces()),
        }
    }

    /// The class behind a class-backed bean.
    pub(crate) fn class_of(&self, name: &str) -> Result<Arc<BeanClass>> {
        let merged = self.merged(name)?;
        merged
            .kind()
            .and_then(BeanKind::bean_class)
            .cloned()
            .ok_or_else(|| ContainerError::invalid(name, "the bean is not defined by a bean class"))
    }
}
