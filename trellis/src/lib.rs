//! # Trellis: a bean-definition IoC container for Rust
//!
//! Describe your types once as [`BeanClass`]es, register named
//! [`BeanDefinition`]s for them (with parents, scopes, explicit arguments
//! and property values), and let the [`Container`] build and wire the
//! object graph on demand.
//!
//! ```rust
//! use trellis::prelude::*;
//!
//! #[derive(Default)]
//! struct Clock;
//!
//! let container = Container::builder()
//!     .definition(
//!         "clock",
//!         BeanDefinition::of_class(BeanClass::builder::<Clock>().with_default().build()),
//!     )
//!     .build()
//!     .unwrap();
//!
//! container.refresh().unwrap();
//! assert!(container.get_bean_as::<Clock>("clock").is_ok());
//! ```

pub use trellis_container::*;
pub use trellis_support::*;
