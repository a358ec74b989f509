//! Bean definitions.
//!
//! A [`BeanDefinition`] is a recipe: which [`BeanKind`] builds the object,
//! which constructor arguments and property values to inject, and how the
//! result is scoped. Every field is optional so that a child definition can
//! leave anything unset and inherit it from its parent; see
//! [`crate::merge`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::bean::{Bean, BeanRef, Injected, Literal, RawBean};
use crate::class::{BeanClass, Dependency};
use crate::error::{ContainerError, Result};
use crate::key::TypeKey;
use crate::scope::Scope;

/// Resolves collaborators from inside an instance supplier.
pub trait Resolver {
    /// Looks up a bean by name.
    fn bean(&self, name: &str) -> Result<BeanRef>;

    /// Resolves an injection point by qualifier, type and name.
    fn dependency(&self, dependency: &Dependency) -> Result<Injected>;
}

impl dyn Resolver + '_ {
    /// Resolves the unique bean of type `T`.
    pub fn get<T: Send + Sync + 'static>(&self) -> Result<Bean<T>> {
        self.dependency(&Dependency::on::<T>())?.into_bean()
    }

    /// Looks up the bean `name` as a `T`.
    pub fn get_named<T: Send + Sync + 'static>(&self, name: &str) -> Result<Bean<T>> {
        Ok(self.bean(name)?.typed())
    }
}

pub(crate) type SupplyFn = Arc<dyn Fn(&dyn Resolver) -> Result<RawBean> + Send + Sync>;

/// A closure that produces the bean.
#[derive(Clone)]
pub struct InstanceSupplier {
    key: TypeKey,
    supply: SupplyFn,
}

impl InstanceSupplier {
    pub fn new<T: Send + Sync + 'static>(
        supply: impl Fn(&dyn Resolver) -> Result<T> + Send + Sync + 'static,
    ) -> Self {
        Self {
            key: TypeKey::of::<T>(),
            supply: Arc::new(move |resolver: &dyn Resolver| {
                Ok(Box::new(supply(resolver)?) as RawBean)
            }),
        }
    }

    /// Type of the objects this supplier produces.
    pub fn produces(&self) -> TypeKey {
        self.key
    }

    pub(crate) fn supply(&self, resolver: &dyn Resolver) -> Result<RawBean> {
        (self.supply)(resolver)
    }
}

/// How a bean is brought into existence.
#[derive(Clone)]
pub enum BeanKind {
    /// Through one of the class's constructors.
    Class(Arc<BeanClass>),
    /// Through a static factory method declared on `class`.
    StaticFactory { class: Arc<BeanClass>, method: String },
    /// Through an instance factory method called on another bean.
    FactoryBean { factory_bean: String, method: String },
    /// Through a closure.
    Supplier(InstanceSupplier),
}

impl BeanKind {
    /// The class whose properties and callbacks apply to the bean, if any.
    pub fn bean_class(&self) -> Option<&Arc<BeanClass>> {
        match self {
            BeanKind::Class(class) => Some(class),
            _ => None,
        }
    }
}

impl PartialEq for BeanKind {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (BeanKind::Class(a), BeanKind::Class(b)) => Arc::ptr_eq(a, b),
            (
                BeanKind::StaticFactory { class: a, method: m },
                BeanKind::StaticFactory { class: b, method: n },
            ) => Arc::ptr_eq(a, b) && m == n,
            (
                BeanKind::FactoryBean { factory_bean: a, method: m },
                BeanKind::FactoryBean { factory_bean: b, method: n },
            ) => a == b && m == n,
            (BeanKind::Supplier(a), BeanKind::Supplier(b)) => Arc::ptr_eq(&a.supply, &b.supply),
            _ => false,
        }
    }
}

impl fmt::Debug for BeanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BeanKind::Class(class) => write!(f, "Class({})", class.key()),
            BeanKind::StaticFactory { class, method } => {
                write!(f, "StaticFactory({}::{method})", class.key())
            }
            BeanKind::FactoryBean { factory_bean, method } => {
                write!(f, "FactoryBean({factory_bean}.{method})")
            }
            BeanKind::Supplier(s) => write!(f, "Supplier({})", s.key),
        }
    }
}

/// One constructor argument or property value in a definition.
#[derive(Clone, Debug, PartialEq)]
pub enum ValueSpec {
    /// A literal value, injected as is.
    Literal(Literal),
    /// A reference to another bean by name.
    Ref(String),
    /// Resolved by type from the registry.
    Autowire,
}

impl ValueSpec {
    pub fn value<T: Send + Sync + 'static>(value: T) -> Self {
        ValueSpec::Literal(Literal::new(value))
    }

    pub fn reference(name: impl Into<String>) -> Self {
        ValueSpec::Ref(name.into())
    }
}

/// What part an application plays for a bean.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Role {
    /// A major part of the application, typically user-defined.
    #[default]
    Application,
    /// Supporting part of a larger configuration.
    Support,
    /// Entirely internal background infrastructure.
    Infrastructure,
}

/// A recipe for constructing one bean.
///
/// # Examples
/// ```
/// use trellis_container::class::BeanClass;
/// use trellis_container::definition::{BeanDefinition, ValueSpec};
/// use trellis_container::scope::Scope;
///
/// #[derive(Default)]
/// struct Mailer;
///
/// let class = BeanClass::builder::<Mailer>().with_default().build();
/// let definition = BeanDefinition::of_class(class)
///     .with_scope(Scope::Prototype)
///     .with_lazy_init(true);
///
/// assert_eq!(definition.scope(), Some(&Scope::Prototype));
/// assert!(definition.validate("mailer").is_ok());
/// ```
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BeanDefinition {
    parent: Option<String>,
    kind: Option<BeanKind>,
    constructor: Option<String>,
    constructor_args: BTreeMap<usize, ValueSpec>,
    properties: BTreeMap<String, ValueSpec>,
    scope: Option<Scope>,
    lazy_init: Option<bool>,
    primary: Option<bool>,
    autowire_candidate: Option<bool>,
    depends_on: Vec<String>,
    is_abstract: bool,
    role: Option<Role>,
    description: Option<String>,
    source: Option<String>,
}

impl BeanDefinition {
    /// An empty definition; set a kind or a parent before registering it.
    pub fn new() -> Self {
        Self::default()
    }

    /// A bean built through one of `class`'s constructors.
    pub fn of_class(class: Arc<BeanClass>) -> Self {
        Self::new().with_kind(BeanKind::Class(class))
    }

    /// A child definition that inherits everything it leaves unset from `parent`.
    pub fn child_of(parent: impl Into<String>) -> Self {
        Self::new().with_parent(parent)
    }

    /// A bean produced by the static factory method `method` of `class`.
    pub fn static_factory(class: Arc<BeanClass>, method: impl Into<String>) -> Self {
        Self::new().with_kind(BeanKind::StaticFactory {
            class,
            method: method.into(),
        })
    }

    /// A bean produced by calling `method` on the bean named `factory_bean`.
    pub fn factory_method(factory_bean: impl Into<String>, method: impl Into<String>) -> Self {
        Self::new().with_kind(BeanKind::FactoryBean {
            factory_bean: factory_bean.into(),
            method: method.into(),
        })
    }

    /// A bean produced by a closure.
    pub fn supplier<T: Send + Sync + 'static>(
        supply: impl Fn(&dyn Resolver) -> Result<T> + Send + Sync + 'static,
    ) -> Self {
        Self::new().with_kind(BeanKind::Supplier(InstanceSupplier::new(supply)))
    }

    // ── Builder ──

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn with_kind(mut self, kind: BeanKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Pins the constructor to use instead of letting the container choose.
    pub fn with_constructor(mut self, name: impl Into<String>) -> Self {
        self.constructor = Some(name.into());
        self
    }

    /// Sets the constructor argument at `index`.
    pub fn with_arg(mut self, index: usize, value: ValueSpec) -> Self {
        self.constructor_args.insert(index, value);
        self
    }

    /// Sets the value for property `name`.
    pub fn with_property(mut self, name: impl Into<String>, value: ValueSpec) -> Self {
        self.properties.insert(name.into(), value);
        self
    }

    pub fn with_scope(mut self, scope: impl Into<Scope>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn with_lazy_init(mut self, lazy: bool) -> Self {
        self.lazy_init = Some(lazy);
        self
    }

    pub fn with_primary(mut self, primary: bool) -> Self {
        self.primary = Some(primary);
        self
    }

    pub fn with_autowire_candidate(mut self, candidate: bool) -> Self {
        self.autowire_candidate = Some(candidate);
        self
    }

    /// Adds a bean that must be created before this one.
    pub fn with_depends_on(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !self.depends_on.contains(&name) {
            self.depends_on.push(name);
        }
        self
    }

    /// Marks the definition as a template that can only act as a parent.
    pub fn with_abstract(mut self, is_abstract: bool) -> Self {
        self.is_abstract = is_abstract;
        self
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = Some(role);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Records where the definition came from, for diagnostics.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    // ── Accessors ──

    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
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

    pub fn scope(&self) -> Option<&Scope> {
        self.scope.as_ref()
    }

    pub fn lazy_init(&self) -> Option<bool> {
        self.lazy_init
    }

    pub fn primary(&self) -> Option<bool> {
        self.primary
    }

    pub fn autowire_candidate(&self) -> Option<bool> {
        self.autowire_candidate
    }

    pub fn depends_on(&self) -> &[String] {
        &self.depends_on
    }

    pub fn is_abstract(&self) -> bool {
        self.is_abstract
    }

    pub fn role(&self) -> Option<Role> {
        self.role
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    /// Checks the definition on its own, without looking at its parent.
    ///
    /// # Errors
    /// [`ContainerError::InvalidDefinition`] describing the first problem found.
    pub fn validate(&self, name: &str) -> Result<()> {
        if name.trim().is_empty() {
            return Err(ContainerError::invalid(name, "bean name must not be empty"));
        }

        if self.parent.as_deref() == Some(name) {
            return Err(ContainerError::invalid(name, "a definition cannot be its own parent"));
        }

        match &self.kind {
            None if self.parent.is_none() && !self.is_abstract => {
                return Err(ContainerError::invalid(
                    name,
                    "no bean class, factory method or supplier given and no parent to inherit one from",
                ));
            }
            None => {}
            Some(kind) => validate_kind(name, kind, self.constructor.as_deref(), &self.properties)?,
        }

        if self.depends_on.iter().any(|d| d == name) {
            return Err(ContainerError::invalid(name, "a bean cannot depend on itself"));
        }

        Ok(())
    }
}

/// Checks that a kind supports the constructor pin and property values given.
pub(crate) fn validate_kind(
    name: &str,
    kind: &BeanKind,
    constructor: Option<&str>,
    properties: &BTreeMap<String, ValueSpec>,
) -> Result<()> {
    match kind {
        BeanKind::Class(class) => {
            if let Some(ctor) = constructor {
                if class.constructor(ctor).is_none() {
                    return Err(ContainerError::invalid(
                        name,
                        format!("{} declares no constructor named '{ctor}'", class.key().short_name()),
                    ));
                }
            }
            if let Some(unknown) = properties.keys().find(|p| class.property(p).is_none()) {
                return Err(ContainerError::invalid(
                    name,
                    format!("{} has no writable property '{unknown}'", class.key().short_name()),
                ));
            }
        }
        BeanKind::StaticFactory { class, method } => {
            match class.factory_method(method) {
                Some(m) if m.is_static() => {}
                Some(_) => {
                    return Err(ContainerError::invalid(
                        name,
                        format!("factory method '{method}' is not static"),
                    ));
                }
                None => {
                    return Err(ContainerError::invalid(
                        name,
                        format!("{} declares no factory method '{method}'", class.key().short_name()),
                    ));
                }
            }
            no_class_only_settings(name, constructor, properties)?;
        }
        BeanKind::FactoryBean { factory_bean, method } => {
            if factory_bean.is_empty() || method.is_empty() {
                return Err(ContainerError::invalid(
                    name,
                    "factory bean and factory method names must not be empty",
                ));
            }
            no_class_only_settings(name, constructor, properties)?;
        }
        BeanKind::Supplier(_) => no_class_only_settings(name, constructor, properties)?,
    }
    Ok(())
}

fn no_class_only_settings(
    name: &str,
    constructor: Option<&str>,
    properties: &BTreeMap<String, ValueSpec>,
) -> Result<()> {
    if constructor.is_some() {
        return Err(ContainerError::invalid(
            name,
            "a constructor can only be pinned on class-backed beans",
        ));
    }
    if !properties.is_empty() {
        return Err(ContainerError::invalid(
            name,
            "property values require a class-backed bean",
        ));
    }
    Ok(())
}
