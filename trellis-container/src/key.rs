//! Bean type identification.
//!
//! [`TypeKey`] identifies the Rust type a bean produces. Type-based
//! lookup and autowiring compare keys, never names.

use std::any::{TypeId, type_name};
use std::fmt;
use std::hash::{Hash, Hasher};

use trellis_support::rendering::shorten_type_name;

/// Identifies the concrete type of a bean or a dependency.
///
/// # Examples
/// ```
/// use trellis_container::key::TypeKey;
///
/// let key = TypeKey::of::<String>();
/// assert_eq!(key.type_name(), "alloc::string::String");
/// assert_eq!(key.short_name(), "String");
/// ```
#[derive(Clone, Copy)]
pub struct TypeKey {
    type_id: TypeId,
    type_name: &'static str,
}

impl TypeKey {
    /// Creates a key for type `T`.
    #[inline]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
        }
    }

    /// Returns the [`TypeId`] of this type.
    #[inline]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Returns the fully qualified type name.
    #[inline]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Returns the type name without module paths, for messages.
    pub fn short_name(&self) -> String {
        shorten_type_name(self.type_name)
    }

    /// Returns `true` if this key identifies `T`.
    #[inline]
    pub fn is<T: ?Sized + 'static>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for TypeKey {}

impl Hash for TypeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeKey({})", self.type_name)
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.type_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DataSource;

    #[test]
    fn key_of_type() {
        let key = TypeKey::of::<DataSource>();
        assert!(key.type_name().contains("DataSource"));
        assert_eq!(key.short_name(), "DataSource");
        assert!(key.is::<DataSource>());
        assert!(!key.is::<String>());
    }

    #[test]
    fn key_equality_same_type() {
        assert_eq!(TypeKey::of::<String>(), TypeKey::of::<String>());
    }

    #[test]
    fn key_inequality_different_types() {
        assert_ne!(TypeKey::of::<String>(), TypeKey::of::<i32>());
    }

    #[test]
    fn key_in_hashmap() {
        use std::collections::HashMap;
        let mut map = HashMap::new();
        map.insert(TypeKey::of::<String>(), "string");
        map.insert(TypeKey::of::<i32>(), "i32");
        assert_eq!(map.get(&TypeKey::of::<String>()), Some(&"string"));
        assert_eq!(map.get(&TypeKey::of::<bool>()), None);
    }

    #[test]
    fn display_uses_full_path() {
        let key = TypeKey::of::<DataSource>();
        assert!(format!("{key}").ends_with("DataSource"));
        assert!(format!("{key:?}").starts_with("TypeKey("));
    }
}
