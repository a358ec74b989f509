//! Bean creation: scope dispatch, instantiation, population and the
//! lifecycle callbacks around them.

use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::bean::{BeanRef, Injected, RawBean};
use crate::class::{Args, BeanClass, Dependency, FactoryInvoke};
use crate::container::Container;
use crate::definition::{BeanKind, Resolver};
use crate::error::{ContainerError, Result};
use crate::merge::MergedDefinition;
use crate::scope::Scope;
use crate::singleton::Claim;

/// One bean on the current resolution path, linked to the bean that
/// requested it.
#[derive(Clone, Copy)]
pub(crate) struct Frame<'a> {
    pub name: &'a str,
    pub parent: Option<&'a Frame<'a>>,
}

impl Frame<'_> {
    /// Names from the outermost request down to this frame.
    fn names(&self) -> Vec<String> {
        let mut names = Vec::new();
        let mut current = Some(self);
        while let Some(frame) = current {
            names.push(frame.name.to_string());
            current = frame.parent;
        }
        names.reverse();
        names
    }

    fn contains(&self, name: &str) -> bool {
        let mut current = Some(self);
        while let Some(frame) = current {
            if frame.name == name {
                return true;
            }
            current = frame.parent;
        }
        false
    }
}

/// The part of `path` that starts at `name`, closed with `name` again.
pub(crate) fn cycle_chain(path: Option<&Frame<'_>>, name: &str) -> Vec<String> {
    let mut chain = path.map(Frame::names).unwrap_or_default();
    if let Some(start) = chain.iter().position(|n| n == name) {
        chain.drain(..start);
    }
    chain.push(name.to_string());
    chain
}

fn on_path(path: Option<&Frame<'_>>, name: &str) -> bool {
    path.is_some_and(|frame| frame.contains(name))
}

/// Names the requesting bean on a `NotFound` that does not carry one yet.
fn required_by(err: ContainerError, path: Option<&Frame<'_>>) -> ContainerError {
    match (err, path) {
        (ContainerError::NotFound(mut not_found), Some(frame)) if not_found.required_by.is_none() => {
            not_found.required_by = Some(frame.name.to_string());
            ContainerError::NotFound(not_found)
        }
        (err, _) => err,
    }
}

impl Container {
    pub(crate) fn do_get_bean(&self, name: &str, path: Option<&Frame<'_>>) -> Result<BeanRef> {
        let name = self.store.canonical_name(name);

        if let Some(bean) = self.singletons.created(&name) {
            trace!(bean = %name, "Returning cached singleton");
            return Ok(bean);
        }

        let merged = self.merged(&name).map_err(|err| required_by(err, path))?;
        if merged.is_abstract() {
            return Err(ContainerError::AbstractBean { name });
        }

        match merged.scope() {
            Scope::Singleton => self.get_singleton(&name, &merged, path),
            Scope::Prototype => {
                if on_path(path, &name) {
                    return Err(ContainerError::circular(cycle_chain(path, &name)));
                }
                let frame = Frame { name: &name, parent: path };
                let raw = self.create_bean(&name, &merged, &frame)?;
                Ok(BeanRef::ready(name.as_str(), Arc::from(raw)))
            }
            Scope::Custom(_) => {
                let scope = merged.scope().name();
                let handler = self.scopes.get(scope).ok_or_else(|| ContainerError::UnknownScope {
                    bean: name.clone(),
                    scope: scope.to_string(),
                })?;
                if on_path(path, &name) {
                    return Err(ContainerError::circular(cycle_chain(path, &name)));
                }
                let frame = Frame { name: &name, parent: path };
                handler.get(&name, &mut || {
                    trace!(bean = %name, scope, "Creating scoped bean");
                    let raw = self.create_bean(&name, &merged, &frame)?;
                    Ok(BeanRef::ready(name.as_str(), Arc::from(raw)))
                })
            }
        }
    }

    fn get_singleton(
        &self,
        name: &str,
        merged: &MergedDefinition,
        path: Option<&Frame<'_>>,
    ) -> Result<BeanRef> {
        match self.singletons.claim(name)? {
            Claim::Ready(bean) => Ok(bean),
            Claim::InCreation(early) => {
                if self.settings.allow_circular_references {
                    debug!(bean = %name, "Returning early reference to singleton in creation");
                    Ok(early)
                } else {
                    let chain = cycle_chain(path, name);
                    warn!(bean = %name, chain = ?chain, "Circular reference while circular references are disabled");
                    Err(ContainerError::circular(chain))
                }
            }
            Claim::Create(guard) => {
                if !self.merger.is_current(merged, &self.store) {
                    debug!(bean = %name, "Definition changed before creation started, merging again");
                    guard.release();
                    return self.do_get_bean(name, path);
                }
                let frame = Frame { name, parent: path };
                match self.create_bean(name, merged, &frame) {
                    Ok(raw) => {
                        let destroy = merged
                            .kind()
                            .and_then(BeanKind::bean_class)
                            .and_then(|class| class.destroy_fn());
                        Ok(guard.complete(Arc::from(raw), destroy))
                    }
                    Err(err) => {
                        guard.fail(err.clone());
                        Err(err)
                    }
                }
            }
        }
    }

    /// Builds one instance of `name` from its merged definition.
    pub(crate) fn create_bean(
        &self,
        name: &str,
        merged: &MergedDefinition,
        frame: &Frame<'_>,
    ) -> Result<RawBean> {
        debug!(bean = %name, scope = %merged.scope(), "Creating bean");

        for dependency in merged.depends_on() {
            let dependency = self.store.canonical_name(dependency);
            if let Some(path) = self.graph.dependency_path(&dependency, name) {
                let mut chain = vec![name.to_string()];
                chain.extend(path);
                return Err(ContainerError::circular(chain));
            }
            self.graph.register(name, &dependency);
            self.do_get_bean(&dependency, Some(frame))?;
        }

        let raw = self.instantiate(name, merged, frame)?;
        let mut raw = self.pipeline.after_construction(name, raw)?;

        self.pipeline.before_population(name, &mut raw)?;
        let class = merged.kind().and_then(BeanKind::bean_class);
        if let Some(class) = class {
            if is_instance_of(&raw, class) {
                self.populate(name, merged, class, &mut raw, frame)?;
            } else {
                warn!(bean = %name, "Skipping property injection: instance was replaced by a post-processor");
            }
        }
        self.pipeline.after_population(name, &mut raw)?;

        let mut raw = self.pipeline.before_initialization(name, raw)?;
        if let Some(class) = class.filter(|class| class.has_init()) {
            if is_instance_of(&raw, class) {
                trace!(bean = %name, "Running init callback");
                class.run_init(name, &mut *raw)?;
            } else {
                warn!(bean = %name, "Skipping init callback: instance was replaced by a post-processor");
            }
        }
        self.pipeline.after_initialization(name, raw)
    }

    fn instantiate(&self, name: &str, merged: &MergedDefinition, frame: &Frame<'_>) -> Result<RawBean> {
        let kind = merged.kind().ok_or_else(|| {
            ContainerError::invalid(name, "no bean class or factory in the parent chain")
        })?;

        match kind {
            BeanKind::Class(class) => {
                let (constructor, values) = self.select_constructor(name, merged, class, frame)?;
                trace!(bean = %name, constructor = constructor.name(), "Invoking constructor");
                constructor.invoke(&mut Args::new(name, values))
            }
            BeanKind::StaticFactory { class, method } => {
                let method = class.factory_method(method).ok_or_else(|| {
                    ContainerError::invalid(
                        name,
                        format!("class {} declares no factory method '{method}'", class.key().short_name()),
                    )
                })?;
                let values = self.resolve_arguments(name, merged, method.params(), frame)?;
                match method.invoke() {
                    FactoryInvoke::Static(invoke) => invoke(&mut Args::new(name, values)),
                    FactoryInvoke::Instance(_) => Err(ContainerError::invalid(
                        name,
                        format!("factory method '{}' is not static", method.name()),
                    )),
                }
            }
            BeanKind::FactoryBean { factory_bean, method } => {
                let factory_name = self.store.canonical_name(factory_bean);
                if factory_name == name {
                    return Err(ContainerError::invalid(name, "a bean cannot be its own factory bean"));
                }

                self.graph.register(name, &factory_name);
                let factory = self.do_get_bean(&factory_name, Some(frame))?;
                let factory_class = self.class_of(&factory_name)?;
                let method = factory_class.factory_method(method).ok_or_else(|| {
                    ContainerError::invalid(
                        name,
                        format!("factory bean '{factory_name}' declares no factory method '{method}'"),
                    )
                })?;
                let receiver = factory
                    .instance()
                    .map_err(|_| ContainerError::circular(cycle_chain(Some(frame), &factory_name)))?;

                let values = self.resolve_arguments(name, merged, method.params(), frame)?;
                let mut args = Args::new(name, values);
                match method.invoke() {
                    FactoryInvoke::Instance(invoke) => invoke(&receiver, &mut args),
                    FactoryInvoke::Static(invoke) => invoke(&mut args),
                }
            }
            BeanKind::Supplier(supplier) => supplier.supply(&Collaborators {
                container: self,
                bean: name,
                frame,
            }),
        }
    }

    fn populate(
        &self,
        name: &str,
        merged: &MergedDefinition,
        class: &BeanClass,
        raw: &mut RawBean,
        frame: &Frame<'_>,
    ) -> Result<()> {
        for property in class.properties() {
            let point = format!("property '{}'", property.name());
            let value = match merged.properties().get(property.name()) {
                Some(spec) => self.resolve_value(name, &point, property.dependency(), spec, frame)?,
                None if property.is_autowired() => {
                    self.resolve_dependency(name, &point, property.dependency(), true, frame)?
                }
                None => continue,
            };
            if value.is_absent() {
                trace!(bean = %name, property = property.name(), "Optional property left unset");
                continue;
            }
            property.set(name, &mut **raw, value)?;
        }
        Ok(())
    }

    /// Resolves a reference to `target` held by `bean`.
    pub(crate) fn inject_bean(&self, bean: &str, target: &str, frame: &Frame<'_>) -> Result<BeanRef> {
        let target = self.store.canonical_name(target);
        self.graph.register(bean, &target);
        self.do_get_bean(&target, Some(frame))
    }

    /// Destroys the singleton `name` after everything that depends on it.
    pub(crate) fn destroy_singleton(&self, name: &str) {
        for dependent in self.graph.remove(name) {
            trace!(bean = %name, dependent = %dependent, "Destroying dependent bean first");
            self.destroy_singleton(&dependent);
        }

        if let Some((instance, destroy)) = self.singletons.discard(name) {
            if let Some(destroy) = destroy {
                debug!(bean = %name, "Running destroy callback");
                destroy(&instance);
            }
        }

        for handler in self.scopes.values() {
            handler.remove(name);
        }
    }
}

fn is_instance_of(raw: &RawBean, class: &BeanClass) -> bool {
    (**raw).type_id() == class.key().type_id()
}

/// Lookups available to an instance supplier while its bean is created.
struct Collaborators<'a> {
    container: &'a Container,
    bean: &'a str,
    frame: &'a Frame<'a>,
}

impl Resolver for Collaborators<'_> {
    fn bean(&self, name: &str) -> Result<BeanRef> {
        self.container.inject_bean(self.bean, name, self.frame)
    }

    fn dependency(&self, dependency: &Dependency) -> Result<Injected> {
        self.container
            .resolve_dependency(self.bean, "supplier", dependency, false, self.frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_chain_starts_at_first_occurrence() {
        let root = Frame { name: "app", parent: None };
        let a = Frame { name: "a", parent: Some(&root) };
        let b = Frame { name: "b", parent: Some(&a) };

        assert_eq!(cycle_chain(Some(&b), "a"), vec!["a", "b", "a"]);
        assert_eq!(cycle_chain(Some(&b), "x"), vec!["app", "a", "b", "x"]);
        assert_eq!(cycle_chain(None, "a"), vec!["a"]);
    }

    #[test]
    fn required_by_fills_missing_requester() {
        let frame = Frame { name: "service", parent: None };
        let err = required_by(ContainerError::not_found("repo"), Some(&frame));
        match err {
            ContainerError::NotFound(e) => assert_eq!(e.required_by.as_deref(), Some("service")),
            other => panic!("unexpected error: {other}"),
        }
    }
}
