//! Bean class metadata.
//!
//! Rust has no runtime reflection, so a [`BeanClass`] spells out what the
//! container needs to know about a type: its constructors and their
//! parameters, its factory methods, its injectable properties, and its
//! lifecycle callbacks. Classes are built once with [`BeanClass::builder`]
//! and shared by every definition that uses them.
//!
//! # Examples
//! ```
//! use trellis_container::bean::Bean;
//! use trellis_container::class::{BeanClass, Dependency};
//!
//! struct Pool { size: u32 }
//! struct Repository { pool: Bean<Pool>, cache_size: u32 }
//!
//! let repository = BeanClass::builder::<Repository>()
//!     .constructor("new", [Dependency::on::<Pool>()], |args| {
//!         Ok(Repository { pool: args.bean(0)?, cache_size: 16 })
//!     })
//!     .property("cache_size", Dependency::on::<u32>(), |repo, value| {
//!         repo.cache_size = value.into_value()?;
//!         Ok(())
//!     })
//!     .build();
//!
//! assert_eq!(repository.constructors().len(), 1);
//! assert!(repository.property("cache_size").is_some());
//! ```

use std::any::{Any, type_name};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use tracing::warn;

use crate::bean::{Bean, Injected, Instance, RawBean};
use crate::error::{ContainerError, Result};
use crate::key::TypeKey;

pub(crate) type ConstructFn = Arc<dyn Fn(&mut Args) -> Result<RawBean> + Send + Sync>;
pub(crate) type InstanceFactoryFn =
    Arc<dyn Fn(&Instance, &mut Args) -> Result<RawBean> + Send + Sync>;
pub(crate) type SetterFn =
    Arc<dyn Fn(&str, &mut (dyn Any + Send + Sync), Injected) -> Result<()> + Send + Sync>;
pub(crate) type InitFn = Arc<dyn Fn(&str, &mut (dyn Any + Send + Sync)) -> Result<()> + Send + Sync>;

/// Destroy callback, run with the finished instance when a singleton is discarded.
pub type DestroyFn = Arc<dyn Fn(&Instance) + Send + Sync>;

/// Describes one injection point: a constructor parameter, a factory
/// method parameter, or a property.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Dependency {
    key: TypeKey,
    name: Option<Arc<str>>,
    qualifier: Option<Arc<str>>,
    required: bool,
    allow_self: bool,
}

impl Dependency {
    /// A required dependency on a bean of type `T`.
    pub fn on<T: ?Sized + 'static>() -> Self {
        Self {
            key: TypeKey::of::<T>(),
            name: None,
            qualifier: None,
            required: true,
            allow_self: false,
        }
    }

    /// Names the injection point. When several candidates match by type,
    /// the one whose bean name or alias equals this name wins.
    pub fn named(mut self, name: impl Into<Arc<str>>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Restricts candidates to the bean registered under `bean_name`.
    pub fn qualifier(mut self, bean_name: impl Into<Arc<str>>) -> Self {
        self.qualifier = Some(bean_name.into());
        self
    }

    /// Injects [`Injected::Absent`] instead of failing when nothing matches.
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Lets a bean be injected into itself.
    pub fn allow_self_reference(mut self) -> Self {
        self.allow_self = true;
        self
    }

    pub fn key(&self) -> TypeKey {
        self.key
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn qualifier_name(&self) -> Option<&str> {
        self.qualifier.as_deref()
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn allows_self_reference(&self) -> bool {
        self.allow_self
    }
}

/// Arguments handed to a constructor or factory method.
///
/// Each argument can be taken once, by index.
pub struct Args {
    bean: String,
    values: Vec<Option<Injected>>,
}

impl Args {
    pub(crate) fn new(bean: impl Into<String>, values: Vec<Injected>) -> Self {
        Self {
            bean: bean.into(),
            values: values.into_iter().map(Some).collect(),
        }
    }

    /// Name of the bean being constructed.
    pub fn bean_name(&self) -> &str {
        &self.bean
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Takes the argument at `index`.
    ///
    /// # Errors
    /// [`ContainerError::UnsatisfiedDependency`] if there is no such
    /// argument or it was already taken.
    pub fn take(&mut self, index: usize) -> Result<Injected> {
        self.values
            .get_mut(index)
            .and_then(Option::take)
            .ok_or_else(|| ContainerError::UnsatisfiedDependency {
                bean: self.bean.clone(),
                dependency: format!("argument #{index}"),
                reason: "no such argument, or it was already taken".into(),
            })
    }

    /// Takes the argument at `index` as a typed bean handle.
    pub fn bean<T: Send + Sync + 'static>(&mut self, index: usize) -> Result<Bean<T>> {
        self.take(index)?.into_bean()
    }

    /// Takes the argument at `index` as a shared value. The referenced
    /// bean must be finished.
    pub fn shared<T: Send + Sync + 'static>(&mut self, index: usize) -> Result<Arc<T>> {
        self.take(index)?.into_shared()
    }

    /// Takes the argument at `index` as a cloned value.
    pub fn value<T: Clone + Send + Sync + 'static>(&mut self, index: usize) -> Result<T> {
        self.take(index)?.into_value()
    }

    /// Takes an optional argument.
    pub fn optional<T: Send + Sync + 'static>(&mut self, index: usize) -> Result<Option<Bean<T>>> {
        Ok(self.take(index)?.into_optional())
    }
}

/// A named way to build an instance from resolved arguments.
#[derive(Clone)]
pub struct Constructor {
    name: Arc<str>,
    params: Vec<Dependency>,
    invoke: ConstructFn,
}

impl Constructor {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[Dependency] {
        &self.params
    }

    pub(crate) fn invoke(&self, args: &mut Args) -> Result<RawBean> {
        (self.invoke)(args)
    }

    pub(crate) fn signature(&self) -> String {
        let params: Vec<String> = self.params.iter().map(|p| p.key().short_name()).collect();
        format!("{}({})", self.name, params.join(", "))
    }
}

impl fmt::Debug for Constructor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.signature())
    }
}

#[derive(Clone)]
pub(crate) enum FactoryInvoke {
    Static(ConstructFn),
    Instance(InstanceFactoryFn),
}

/// A named factory method declared on a class.
///
/// Static factory methods are called without a receiver; instance factory
/// methods are called on a bean of the declaring class.
#[derive(Clone)]
pub struct FactoryMethod {
    name: Arc<str>,
    params: Vec<Dependency>,
    produces: TypeKey,
    invoke: FactoryInvoke,
}

impl FactoryMethod {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[Dependency] {
        &self.params
    }

    /// Type of the objects this method produces.
    pub fn produces(&self) -> TypeKey {
        self.produces
    }

    pub fn is_static(&self) -> bool {
        matches!(self.invoke, FactoryInvoke::Static(_))
    }

    pub(crate) fn invoke(&self) -> &FactoryInvoke {
        &self.invoke
    }
}

impl fmt::Debug for FactoryMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FactoryMethod")
            .field("name", &self.name)
            .field("produces", &self.produces)
            .field("static", &self.is_static())
            .finish()
    }
}

/// A writable property.
#[derive(Clone)]
pub struct Property {
    name: Arc<str>,
    dependency: Dependency,
    autowired: bool,
    setter: SetterFn,
}

impl Property {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dependency(&self) -> &Dependency {
        &self.dependency
    }

    /// Autowired properties are injected even when the definition sets no value.
    pub fn is_autowired(&self) -> bool {
        self.autowired
    }

    pub(crate) fn set(
        &self,
        bean: &str,
        target: &mut (dyn Any + Send + Sync),
        value: Injected,
    ) -> Result<()> {
        (self.setter)(bean, target, value)
    }
}

impl fmt::Debug for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Property")
            .field("name", &self.name)
            .field("type", &self.dependency.key())
            .field("autowired", &self.autowired)
            .finish()
    }
}

/// Everything the container knows about a bean type.
pub struct BeanClass {
    key: TypeKey,
    constructors: Vec<Constructor>,
    factory_methods: Vec<FactoryMethod>,
    properties: Vec<Property>,
    init: Option<InitFn>,
    destroy: Option<DestroyFn>,
}

impl BeanClass {
    /// Starts describing type `T`.
    pub fn builder<T: Send + Sync + 'static>() -> ClassBuilder<T> {
        ClassBuilder {
            class: BeanClass {
                key: TypeKey::of::<T>(),
                constructors: Vec::new(),
                factory_methods: Vec::new(),
                properties: Vec::new(),
                init: None,
                destroy: None,
            },
            _marker: PhantomData,
        }
    }

    /// The type this class describes.
    pub fn key(&self) -> TypeKey {
        self.key
    }

    pub fn constructors(&self) -> &[Constructor] {
        &self.constructors
    }

    pub fn constructor(&self, name: &str) -> Option<&Constructor> {
        self.constructors.iter().find(|c| &*c.name == name)
    }

    pub fn factory_method(&self, name: &str) -> Option<&FactoryMethod> {
        self.factory_methods.iter().find(|m| &*m.name == name)
    }

    pub fn properties(&self) -> &[Property] {
        &self.properties
    }

    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| &*p.name == name)
    }

    pub fn has_init(&self) -> bool {
        self.init.is_some()
    }

    pub(crate) fn run_init(&self, bean: &str, target: &mut (dyn Any + Send + Sync)) -> Result<()> {
        match &self.init {
            Some(init) => init(bean, target),
            None => Ok(()),
        }
    }

    pub(crate) fn destroy_fn(&self) -> Option<DestroyFn> {
        self.destroy.clone()
    }
}

impl fmt::Debug for BeanClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BeanClass")
            .field("type", &self.key)
            .field("constructors", &self.constructors)
            .field("factory_methods", &self.factory_methods)
            .field("properties", &self.properties)
            .finish()
    }
}

/// Builder for [`BeanClass`], typed on the described type.
pub struct ClassBuilder<T> {
    class: BeanClass,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> ClassBuilder<T> {
    /// Declares a constructor.
    pub fn constructor(
        mut self,
        name: impl Into<Arc<str>>,
        params: impl IntoIterator<Item = Dependency>,
        construct: impl Fn(&mut Args) -> Result<T> + Send + Sync + 'static,
    ) -> Self {
        self.class.constructors.push(Constructor {
            name: name.into(),
            params: params.into_iter().collect(),
            invoke: Arc::new(move |args: &mut Args| Ok(Box::new(construct(args)?) as RawBean)),
        });
        self
    }

    /// Declares a no-argument constructor named `default` using [`Default`].
    pub fn with_default(self) -> Self
    where
        T: Default,
    {
        self.constructor("default", [], |_| Ok(T::default()))
    }

    /// Declares a property that is injected when a definition sets a value for it.
    pub fn property(
        self,
        name: impl Into<Arc<str>>,
        dependency: Dependency,
        set: impl Fn(&mut T, Injected) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.push_property(name.into(), dependency, false, set)
    }

    /// Declares a property that is always injected, by name first and then by type.
    pub fn autowired(
        self,
        name: impl Into<Arc<str>>,
        dependency: Dependency,
        set: impl Fn(&mut T, Injected) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.push_property(name.into(), dependency, true, set)
    }

    /// Declares a static factory method producing `P`.
    pub fn static_factory<P: Send + Sync + 'static>(
        mut self,
        name: impl Into<Arc<str>>,
        params: impl IntoIterator<Item = Dependency>,
        produce: impl Fn(&mut Args) -> Result<P> + Send + Sync + 'static,
    ) -> Self {
        self.class.factory_methods.push(FactoryMethod {
            name: name.into(),
            params: params.into_iter().collect(),
            produces: TypeKey::of::<P>(),
            invoke: FactoryInvoke::Static(Arc::new(move |args: &mut Args| {
                Ok(Box::new(produce(args)?) as RawBean)
            })),
        });
        self
    }

    /// Declares an instance factory method producing `P`, called on a bean of type `T`.
    pub fn factory_method<P: Send + Sync + 'static>(
        mut self,
        name: impl Into<Arc<str>>,
        params: impl IntoIterator<Item = Dependency>,
        produce: impl Fn(&T, &mut Args) -> Result<P> + Send + Sync + 'static,
    ) -> Self {
        self.class.factory_methods.push(FactoryMethod {
            name: name.into(),
            params: params.into_iter().collect(),
            produces: TypeKey::of::<P>(),
            invoke: FactoryInvoke::Instance(Arc::new(move |factory: &Instance, args: &mut Args| {
                let receiver = factory.downcast_ref::<T>().ok_or_else(|| {
                    ContainerError::TypeMismatch {
                        name: args.bean_name().to_string(),
                        expected: type_name::<T>(),
                    }
                })?;
                Ok(Box::new(produce(receiver, args)?) as RawBean)
            })),
        });
        self
    }

    /// Sets the initialization callback, run after property injection.
    pub fn init(mut self, init: impl Fn(&mut T) -> Result<()> + Send + Sync + 'static) -> Self {
        self.class.init = Some(Arc::new(move |bean: &str, target: &mut (dyn Any + Send + Sync)| {
            let target = target.downcast_mut::<T>().ok_or_else(|| ContainerError::TypeMismatch {
                name: bean.to_string(),
                expected: type_name::<T>(),
            })?;
            init(target)
        }));
        self
    }

    /// Sets the destroy callback, run when the singleton is discarded.
    pub fn destroy(mut self, destroy: impl Fn(&T) + Send + Sync + 'static) -> Self {
        self.class.destroy = Some(Arc::new(move |instance: &Instance| {
            match instance.downcast_ref::<T>() {
                Some(target) => destroy(target),
                None => warn!(
                    expected = type_name::<T>(),
                    "Skipping destroy callback: instance was replaced by a post-processor"
                ),
            }
        }));
        self
    }

    pub fn build(self) -> Arc<BeanClass> {
        Arc::new(self.class)
    }

    fn push_property(
        mut self,
        name: Arc<str>,
        dependency: Dependency,
        autowired: bool,
        set: impl Fn(&mut T, Injected) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        let dependency = match dependency.name {
            Some(_) => dependency,
            None => dependency.named(name.clone()),
        };
        self.class.properties.push(Property {
            name,
            dependency,
            autowired,
            setter: Arc::new(
                move |bean: &str, target: &mut (dyn Any + Send + Sync), value: Injected| {
                    let target =
                        target.downcast_mut::<T>().ok_or_else(|| ContainerError::TypeMismatch {
                            name: bean.to_string(),
                            expected: type_name::<T>(),
                        })?;
                    set(target, value)
                },
            ),
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bean::Literal;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct Counter {
        start: u32,
        label: String,
    }

    fn counter_class() -> Arc<BeanClass> {
        BeanClass::builder::<Counter>()
            .with_default()
            .constructor("starting_at", [Dependency::on::<u32>()], |args| {
                Ok(Counter {
                    start: args.value(0)?,
                    label: String::new(),
                })
            })
            .property("label", Dependency::on::<String>(), |c, v| {
                c.label = v.into_value()?;
                Ok(())
            })
            .init(|c| {
                c.start += 1;
                Ok(())
            })
            .build()
    }

    #[test]
    fn constructors_by_name() {
        let class = counter_class();
        assert_eq!(class.constructors().len(), 2);
        assert!(class.constructor("starting_at").is_some());
        assert!(class.constructor("missing").is_none());
        assert_eq!(class.constructor("starting_at").unwrap().signature(), "starting_at(u32)");
    }

    #[test]
    fn constructor_invocation_and_init() {
        let class = counter_class();
        let ctor = class.constructor("starting_at").unwrap();
        let mut args = Args::new("counter", vec![Injected::Value(Literal::new(41u32))]);
        let mut raw = ctor.invoke(&mut args).unwrap();

        class
            .property("label")
            .unwrap()
            .set("counter", raw.as_mut(), Injected::Value(Literal::new(String::from("hits"))))
            .unwrap();
        class.run_init("counter", raw.as_mut()).unwrap();

        let counter = raw.downcast_ref::<Counter>().unwrap();
        assert_eq!(counter.start, 42);
        assert_eq!(counter.label, "hits");
    }

    #[test]
    fn args_can_be_taken_once() {
        let mut args = Args::new("x", vec![Injected::Absent]);
        assert_eq!(args.len(), 1);
        assert!(args.take(0).unwrap().is_absent());
        assert!(matches!(
            args.take(0),
            Err(ContainerError::UnsatisfiedDependency { .. })
        ));
        assert!(args.take(5).is_err());
    }

    #[test]
    fn property_dependency_takes_property_name() {
        let class = counter_class();
        let label = class.property("label").unwrap();
        assert_eq!(label.dependency().name(), Some("label"));
        assert!(!label.is_autowired());
    }

    #[test]
    fn factory_methods() {
        struct Factory {
            base: u32,
        }

        let class = BeanClass::builder::<Factory>()
            .static_factory("create", [], |_| Ok(Factory { base: 3 }))
            .factory_method("product", [], |f: &Factory, _| Ok(f.base * 2))
            .build();

        let create = class.factory_method("create").unwrap();
        assert!(create.is_static());
        let product = class.factory_method("product").unwrap();
        assert!(!product.is_static());
        assert!(product.produces().is::<u32>());

        let factory: Instance = Arc::new(Factory { base: 5 });
        let FactoryInvoke::Instance(invoke) = product.invoke() else {
            panic!("expected instance factory method");
        };
        let raw = invoke(&factory, &mut Args::new("p", vec![])).unwrap();
        assert_eq!(raw.downcast_ref::<u32>(), Some(&10));
    }

    #[test]
    fn destroy_callback_runs_on_matching_instance() {
        let destroyed = Arc::new(AtomicU32::new(0));
        let class = BeanClass::builder::<Counter>()
            .with_default()
            .destroy({
                let destroyed = destroyed.clone();
                move |_| {
                    destroyed.fetch_add(1, Ordering::SeqCst);
                }
            })
            .build();

        let destroy = class.destroy_fn().unwrap();
        destroy(&(Arc::new(Counter::default()) as Instance));
        // wrong type is skipped
        destroy(&(Arc::new(1u8) as Instance));
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dependency_builder() {
        let dep = Dependency::on::<String>()
            .named("url")
            .qualifier("primaryUrl")
            .optional()
            .allow_self_reference();
        assert_eq!(dep.name(), Some("url"));
        assert_eq!(dep.qualifier_name(), Some("primaryUrl"));
        assert!(!dep.is_required());
        assert!(dep.allows_self_reference());
        assert!(dep.key().is::<String>());
    }
}
