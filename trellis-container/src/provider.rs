//! Registry traits and definition providers.
//!
//! [`BeanDefinitionRegistry`] is the write surface of the container: the
//! part that readers of configuration formats and [`DefinitionProvider`]s
//! talk to. Providers group related definitions together so that an
//! application can be assembled from modules:
//!
//! ```rust
//! use trellis_container::class::BeanClass;
//! use trellis_container::definition::BeanDefinition;
//! use trellis_container::error::Result;
//! use trellis_container::provider::{BeanDefinitionRegistry, DefinitionProvider};
//!
//! #[derive(Default)]
//! struct Mailer;
//!
//! struct MailProvider;
//!
//! impl DefinitionProvider for MailProvider {
//!     fn register(&self, registry: &dyn BeanDefinitionRegistry) -> Result<()> {
//!         let class = BeanClass::builder::<Mailer>().with_default().build();
//!         registry.register_bean_definition("mailer", BeanDefinition::of_class(class))?;
//!         registry.register_alias("mailer", "smtp")
//!     }
//! }
//! ```

use std::sync::Arc;

use crate::definition::BeanDefinition;
use crate::error::Result;

/// Name-to-name aliases.
pub trait AliasRegistry {
    /// Registers `alias` as another name for `name`.
    fn register_alias(&self, name: &str, alias: &str) -> Result<()>;

    fn remove_alias(&self, alias: &str) -> Result<()>;

    fn is_alias(&self, name: &str) -> bool;

    /// All aliases of `name`, transitively.
    fn aliases(&self, name: &str) -> Vec<String>;
}

/// Registration surface for bean definitions.
pub trait BeanDefinitionRegistry: AliasRegistry {
    /// Registers `definition` under `name`, replacing any previous one if
    /// overriding is allowed for that name.
    fn register_bean_definition(&self, name: &str, definition: BeanDefinition) -> Result<()>;

    fn remove_bean_definition(&self, name: &str) -> Result<()>;

    fn get_bean_definition(&self, name: &str) -> Result<Arc<BeanDefinition>>;

    fn contains_bean_definition(&self, name: &str) -> bool;

    /// Bean names in registration order.
    fn bean_definition_names(&self) -> Vec<String>;

    fn bean_definition_count(&self) -> usize;

    fn is_bean_definition_overridable(&self, name: &str) -> bool;

    /// Returns `true` if `name` is taken by a bean or an alias.
    fn is_bean_name_in_use(&self, name: &str) -> bool;
}

/// A module of related bean definitions.
pub trait DefinitionProvider: Send + Sync {
    /// Registers this module's definitions.
    ///
    /// Called once, when the container is built.
    fn register(&self, registry: &dyn BeanDefinitionRegistry) -> Result<()>;

    /// Human-readable name for logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::BeanClass;
    use crate::error::ContainerError;
    use parking_lot::Mutex;

    // Mock registry for testing providers
    #[derive(Default)]
    struct MockRegistry {
        definitions: Mutex<Vec<String>>,
        aliases: Mutex<Vec<(String, String)>>,
    }

    impl AliasRegistry for MockRegistry {
        fn register_alias(&self, name: &str, alias: &str) -> Result<()> {
            self.aliases.lock().push((name.into(), alias.into()));
            Ok(())
        }

        fn remove_alias(&self, alias: &str) -> Result<()> {
            self.aliases.lock().retain(|(_, a)| a != alias);
            Ok(())
        }

        fn is_alias(&self, name: &str) -> bool {
            self.aliases.lock().iter().any(|(_, a)| a == name)
        }

        fn aliases(&self, name: &str) -> Vec<String> {
            self.aliases
                .lock()
                .iter()
                .filter(|(n, _)| n == name)
                .map(|(_, a)| a.clone())
                .collect()
        }
    }

    impl BeanDefinitionRegistry for MockRegistry {
        fn register_bean_definition(&self, name: &str, _definition: BeanDefinition) -> Result<()> {
            self.definitions.lock().push(name.into());
            Ok(())
        }

        fn remove_bean_definition(&self, name: &str) -> Result<()> {
            self.definitions.lock().retain(|n| n != name);
            Ok(())
        }

        fn get_bean_definition(&self, name: &str) -> Result<Arc<BeanDefinition>> {
            Err(ContainerError::not_found(name))
        }

        fn contains_bean_definition(&self, name: &str) -> bool {
            self.definitions.lock().iter().any(|n| n == name)
        }

        fn bean_definition_names(&self) -> Vec<String> {
            self.definitions.lock().clone()
        }

        fn bean_definition_count(&self) -> usize {
            self.definitions.lock().len()
        }

        fn is_bean_definition_overridable(&self, _name: &str) -> bool {
            true
        }

        fn is_bean_name_in_use(&self, name: &str) -> bool {
            self.contains_bean_definition(name) || self.is_alias(name)
        }
    }

    #[derive(Default)]
    struct Clock;

    struct TestProvider;

    impl DefinitionProvider for TestProvider {
        fn register(&self, registry: &dyn BeanDefinitionRegistry) -> Result<()> {
            let class = BeanClass::builder::<Clock>().with_default().build();
            registry.register_bean_definition("clock", BeanDefinition::of_class(class.clone()))?;
            registry.register_bean_definition("backupClock", BeanDefinition::of_class(class))?;
            registry.register_alias("clock", "time")
        }
    }

    #[test]
    fn provider_registers_definitions() {
        let registry = MockRegistry::default();
        TestProvider.register(&registry).unwrap();

        assert_eq!(registry.bean_definition_count(), 2);
        assert_eq!(registry.bean_definition_names(), vec!["clock", "backupClock"]);
        assert!(registry.is_bean_name_in_use("time"));
        assert_eq!(registry.aliases("clock"), vec!["time"]);
    }

    #[test]
    fn provider_has_name() {
        assert!(TestProvider.name().contains("TestProvider"));
    }
}
