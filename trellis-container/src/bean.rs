//! Bean handles.
//!
//! A bean under construction is a [`RawBean`], an owned box the engine can
//! still mutate (property injection, init callbacks). Once finished it
//! becomes an [`Instance`], shared and immutable.
//!
//! [`BeanRef`] is the handle callers and dependents hold. It points at a
//! slot that is filled exactly once. While a singleton is in creation its
//! slot is empty; a `BeanRef` handed out in that phase is an *early
//! reference*. When the bean finishes, the slot is filled in place and
//! every holder, early or not, observes the same final object.

use std::any::{Any, type_name};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::error::{ContainerError, Result};
use crate::key::TypeKey;

/// A finished, shared bean object.
pub type Instance = Arc<dyn Any + Send + Sync>;

/// A bean object that is still being built.
pub type RawBean = Box<dyn Any + Send + Sync>;

/// Returns the concrete type id of a shared instance.
pub(crate) fn instance_type_id(instance: &Instance) -> std::any::TypeId {
    (**instance).type_id()
}

/// The single-assignment slot behind a [`BeanRef`].
#[derive(Default)]
pub(crate) struct BeanSlot {
    instance: OnceCell<Instance>,
}

impl BeanSlot {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn filled(instance: Instance) -> Arc<Self> {
        let slot = Self::default();
        let _ = slot.instance.set(instance);
        Arc::new(slot)
    }

    /// Fills the slot. Returns `false` if it was already filled.
    pub(crate) fn fill(&self, instance: Instance) -> bool {
        self.instance.set(instance).is_ok()
    }

    pub(crate) fn get(&self) -> Option<&Instance> {
        self.instance.get()
    }
}

/// Handle to a bean, possibly still in creation.
///
/// Cloning is cheap. Two handles to the same singleton compare equal with
/// [`BeanRef::same_bean`].
///
/// A handle handed out to break a circular reference stays empty until its
/// bean has run every lifecycle step, init callback included. Constructors,
/// property setters and init callbacks inside the cycle can keep the handle
/// but get [`ContainerError::BeanNotReady`] from [`BeanRef::get`] until the
/// outermost lookup returns.
#[derive(Clone)]
pub struct BeanRef {
    name: Arc<str>,
    slot: Arc<BeanSlot>,
}

impl BeanRef {
    pub(crate) fn new(name: impl Into<Arc<str>>, slot: Arc<BeanSlot>) -> Self {
        Self { name: name.into(), slot }
    }

    /// Wraps an already finished object.
    pub fn ready(name: impl Into<Arc<str>>, instance: Instance) -> Self {
        Self::new(name, BeanSlot::filled(instance))
    }

    /// The bean name this handle was resolved under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns `true` once the bean has finished initialization.
    pub fn is_ready(&self) -> bool {
        self.slot.get().is_some()
    }

    /// Returns the finished object.
    ///
    /// # Errors
    /// [`ContainerError::BeanNotReady`] while the bean is still in creation,
    /// or if its creation failed.
    pub fn instance(&self) -> Result<Instance> {
        self.slot.get().cloned().ok_or_else(|| ContainerError::BeanNotReady {
            name: self.name.to_string(),
        })
    }

    /// Returns the finished object as `Arc<T>`.
    pub fn get<T: Send + Sync + 'static>(&self) -> Result<Arc<T>> {
        self.instance()?
            .downcast::<T>()
            .map_err(|_| ContainerError::TypeMismatch {
                name: self.name.to_string(),
                expected: type_name::<T>(),
            })
    }

    /// Converts into a typed handle. The type is checked on access.
    pub fn typed<T: Send + Sync + 'static>(self) -> Bean<T> {
        Bean {
            inner: self,
            _marker: PhantomData,
        }
    }

    /// Returns `true` if both handles point at the same slot.
    pub fn same_bean(&self, other: &BeanRef) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }
}

impl fmt::Debug for BeanRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BeanRef")
            .field("name", &self.name)
            .field("ready", &self.is_ready())
            .finish()
    }
}

/// Typed view over a [`BeanRef`].
///
/// This is what beans usually store for their collaborators: it can be
/// captured while the collaborator is still in creation and dereferenced
/// once construction of the graph has finished.
pub struct Bean<T> {
    inner: BeanRef,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> Bean<T> {
    /// Returns the finished object.
    ///
    /// # Errors
    /// [`ContainerError::BeanNotReady`] if called from inside a circular
    /// reference before the collaborator finished, see [`BeanRef`].
    pub fn get(&self) -> Result<Arc<T>> {
        self.inner.get::<T>()
    }

    /// The bean name this handle was resolved under.
    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// Returns `true` once the bean has finished initialization.
    pub fn is_ready(&self) -> bool {
        self.inner.is_ready()
    }

    /// The untyped handle.
    pub fn handle(&self) -> &BeanRef {
        &self.inner
    }
}

impl<T> Clone for Bean<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Bean<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Bean").field(&self.inner).finish()
    }
}

/// A resolved constructor argument or property value.
#[derive(Clone, Debug)]
pub enum Injected {
    /// A reference to another bean, possibly an early one.
    Bean(BeanRef),
    /// An explicit literal from the definition.
    Value(Literal),
    /// An optional dependency with no candidate.
    Absent,
}

impl Injected {
    /// Returns the bean handle, wrapping literals in a ready handle.
    ///
    /// # Errors
    /// [`ContainerError::BeanNotReady`] for [`Injected::Absent`].
    pub fn into_bean_ref(self) -> Result<BeanRef> {
        match self {
            Injected::Bean(bean) => Ok(bean),
            Injected::Value(literal) => Ok(BeanRef::ready("<literal>", literal.0)),
            Injected::Absent => Err(ContainerError::BeanNotReady {
                name: "<absent>".into(),
            }),
        }
    }

    /// Returns a typed bean handle.
    pub fn into_bean<T: Send + Sync + 'static>(self) -> Result<Bean<T>> {
        Ok(self.into_bean_ref()?.typed())
    }

    /// Returns the value as `Arc<T>`, for literals and finished beans.
    pub fn into_shared<T: Send + Sync + 'static>(self) -> Result<Arc<T>> {
        self.into_bean_ref()?.get::<T>()
    }

    /// Returns a clone of the value, for literals and finished beans.
    pub fn into_value<T: Clone + Send + Sync + 'static>(self) -> Result<T> {
        Ok(self.into_shared::<T>()?.as_ref().clone())
    }

    /// Returns `None` for [`Injected::Absent`], otherwise a typed handle.
    pub fn into_optional<T: Send + Sync + 'static>(self) -> Option<Bean<T>> {
        match self {
            Injected::Absent => None,
            other => other.into_bean().ok(),
        }
    }

    /// Returns `true` for [`Injected::Absent`].
    pub fn is_absent(&self) -> bool {
        matches!(self, Injected::Absent)
    }
}

/// A literal value carried by a definition.
///
/// Compared by identity: two literals are equal only if they share the
/// same allocation.
#[derive(Clone)]
pub struct Literal(pub(crate) Instance);

impl Literal {
    /// Wraps a value.
    pub fn new<T: Send + Sync + 'static>(value: T) -> Self {
        Literal(Arc::new(value))
    }

    /// The type of the wrapped value.
    pub fn value_type_id(&self) -> std::any::TypeId {
        instance_type_id(&self.0)
    }

    /// Returns `true` if the value is of type `key`.
    pub fn is_of(&self, key: &TypeKey) -> bool {
        self.value_type_id() == key.type_id()
    }

    /// Returns the value if it is a `T`.
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }
}

impl PartialEq for Literal {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Literal(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn early_handle_converges_on_fill() {
        let slot = BeanSlot::new();
        let early = BeanRef::new("a", slot.clone());
        let late = early.clone();

        assert!(!early.is_ready());
        assert!(matches!(early.instance(), Err(ContainerError::BeanNotReady { .. })));

        assert!(slot.fill(Arc::new(7u32)));
        assert!(!slot.fill(Arc::new(8u32)));

        assert_eq!(*early.get::<u32>().unwrap(), 7);
        assert!(Arc::ptr_eq(&early.instance().unwrap(), &late.instance().unwrap()));
        assert!(early.same_bean(&late));
    }

    #[test]
    fn typed_get_checks_type() {
        let bean = BeanRef::ready("n", Arc::new(String::from("x")));
        assert!(matches!(bean.get::<u32>(), Err(ContainerError::TypeMismatch { .. })));
        assert_eq!(bean.typed::<String>().get().unwrap().as_str(), "x");
    }

    #[test]
    fn injected_conversions() {
        let literal = Injected::Value(Literal::new(5i64));
        assert_eq!(literal.into_value::<i64>().unwrap(), 5);

        let absent = Injected::Absent;
        assert!(absent.is_absent());
        assert!(absent.clone().into_optional::<i64>().is_none());
        assert!(absent.into_bean_ref().is_err());
    }

    #[test]
    fn literal_identity_equality() {
        let a = Literal::new(1u8);
        let b = a.clone();
        let c = Literal::new(1u8);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.is_of(&TypeKey::of::<u8>()));
        assert_eq!(a.downcast_ref::<u8>(), Some(&1));
    }
}
