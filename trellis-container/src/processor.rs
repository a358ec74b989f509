//! Post-processor pipeline.
//!
//! A [`BeanPostProcessor`] hooks into the lifecycle of every bean the
//! container builds:
//!
//! ```text
//!   merge ──> post_process_definition
//!   construct ──> after_construction
//!             ──> before_population ──> properties ──> after_population
//!             ──> before_initialization ──> init callback ──> after_initialization
//! ```
//!
//! Processors run in ascending [`order`](BeanPostProcessor::order), ties in
//! registration order. Every hook defaults to pass-through. Returning
//! [`Flow::Halt`] (or [`Step::Halt`]) skips the remaining processors for
//! that hook only.

use std::sync::Arc;

use tracing::trace;

use crate::bean::RawBean;
use crate::error::Result;
use crate::merge::MergedDefinition;

/// Whether later processors run for the current hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Flow {
    #[default]
    Continue,
    Halt,
}

/// Result of a hook that may wrap or replace the bean.
pub enum Step {
    /// Hand this bean to the next processor.
    Continue(RawBean),
    /// Use this bean and skip the remaining processors.
    Halt(RawBean),
}

/// Extension point invoked for every bean the container creates.
///
/// # Examples
/// ```
/// use trellis_container::bean::RawBean;
/// use trellis_container::error::Result;
/// use trellis_container::processor::{BeanPostProcessor, Step};
///
/// struct Audit;
///
/// impl BeanPostProcessor for Audit {
///     fn after_initialization(&self, name: &str, bean: RawBean) -> Result<Step> {
///         println!("ready: {name}");
///         Ok(Step::Continue(bean))
///     }
/// }
/// ```
pub trait BeanPostProcessor: Send + Sync {
    /// Human-readable name for logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Lower runs first.
    fn order(&self) -> i32 {
        0
    }

    /// Adjusts a merged definition before it is cached.
    fn post_process_definition(&self, _name: &str, _definition: &mut MergedDefinition) -> Result<Flow> {
        Ok(Flow::Continue)
    }

    /// Called right after the constructor or factory returned.
    fn after_construction(&self, _name: &str, bean: RawBean) -> Result<Step> {
        Ok(Step::Continue(bean))
    }

    fn before_population(&self, _name: &str, _bean: &mut RawBean) -> Result<Flow> {
        Ok(Flow::Continue)
    }

    fn after_population(&self, _name: &str, _bean: &mut RawBean) -> Result<Flow> {
        Ok(Flow::Continue)
    }

    fn before_initialization(&self, _name: &str, bean: RawBean) -> Result<Step> {
        Ok(Step::Continue(bean))
    }

    fn after_initialization(&self, _name: &str, bean: RawBean) -> Result<Step> {
        Ok(Step::Continue(bean))
    }
}

/// Ordered post-processors.
#[derive(Clone, Default)]
pub(crate) struct Pipeline {
    processors: Vec<Arc<dyn BeanPostProcessor>>,
}

impl Pipeline {
    pub fn new(mut processors: Vec<Arc<dyn BeanPostProcessor>>) -> Self {
        // stable: registration order on ties
        processors.sort_by_key(|p| p.order());
        Self { processors }
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn process_definition(&self, name: &str, definition: &mut MergedDefinition) -> Result<()> {
        for processor in &self.processors {
            if processor.post_process_definition(name, definition)? == Flow::Halt {
                trace!(bean = %name, processor = processor.name(), "Definition processing halted");
                break;
            }
        }
        Ok(())
    }

    pub fn after_construction(&self, name: &str, bean: RawBean) -> Result<RawBean> {
        self.chain(name, bean, "after_construction", |p, bean| p.after_construction(name, bean))
    }

    pub fn before_population(&self, name: &str, bean: &mut RawBean) -> Result<()> {
        self.visit(name, "before_population", |p| p.before_population(name, bean))
    }

    pub fn after_population(&self, name: &str, bean: &mut RawBean) -> Result<()> {
        self.visit(name, "after_population", |p| p.after_population(name, bean))
    }

    pub fn before_initialization(&self, name: &str, bean: RawBean) -> Result<RawBean> {
        self.chain(name, bean, "before_initialization", |p, bean| {
            p.before_initialization(name, bean)
        })
    }

    pub fn after_initialization(&self, name: &str, bean: RawBean) -> Result<RawBean> {
        self.chain(name, bean, "after_initialization", |p, bean| {
            p.after_initialization(name, bean)
        })
    }

    fn chain(
        &self,
        name: &str,
        mut bean: RawBean,
        hook: &'static str,
        mut call: impl FnMut(&dyn BeanPostProcessor, RawBean) -> Result<Step>,
    ) -> Result<RawBean> {
        for processor in &self.processors {
            match call(processor.as_ref(), bean)? {
                Step::Continue(next) => bean = next,
                Step::Halt(last) => {
                    trace!(bean = %name, processor = processor.name(), hook, "Processing halted");
                    return Ok(last);
                }
            }
        }
        Ok(bean)
    }

    fn visit(
        &self,
        name: &str,
        hook: &'static str,
        mut call: impl FnMut(&dyn BeanPostProcessor) -> Result<Flow>,
    ) -> Result<()> {
        for processor in &self.processors {
            if call(processor.as_ref())? == Flow::Halt {
                trace!(bean = %name, processor = processor.name(), hook, "Processing halted");
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Recorder {
        label: &'static str,
        order: i32,
        halt: bool,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl BeanPostProcessor for Recorder {
        fn order(&self) -> i32 {
            self.order
        }

        fn before_population(&self, _name: &str, _bean: &mut RawBean) -> Result<Flow> {
            self.log.lock().push(self.label);
            Ok(if self.halt { Flow::Halt } else { Flow::Continue })
        }

        fn after_initialization(&self, _name: &str, bean: RawBean) -> Result<Step> {
            let value = *bean.downcast_ref::<u32>().unwrap_or(&0);
            Ok(Step::Continue(Box::new(value + self.order as u32)))
        }
    }

    fn recorder(label: &'static str, order: i32, halt: bool, log: &Arc<Mutex<Vec<&'static str>>>) -> Arc<dyn BeanPostProcessor> {
        Arc::new(Recorder { label, order, halt, log: log.clone() })
    }

    #[test]
    fn processors_run_in_order_with_stable_ties() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new(vec![
            recorder("late", 10, false, &log),
            recorder("first-tie", 1, false, &log),
            recorder("second-tie", 1, false, &log),
        ]);

        let mut bean: RawBean = Box::new(0u32);
        pipeline.before_population("x", &mut bean).unwrap();
        assert_eq!(*log.lock(), vec!["first-tie", "second-tie", "late"]);
    }

    #[test]
    fn halt_skips_remaining_processors_of_that_hook() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new(vec![
            recorder("a", 1, true, &log),
            recorder("b", 2, false, &log),
        ]);

        let mut bean: RawBean = Box::new(0u32);
        pipeline.before_population("x", &mut bean).unwrap();
        assert_eq!(*log.lock(), vec!["a"]);

        // other hooks are unaffected
        let bean = pipeline.after_initialization("x", Box::new(0u32)).unwrap();
        assert_eq!(bean.downcast_ref::<u32>(), Some(&3));
    }

    #[test]
    fn step_halt_returns_replacement() {
        struct Replace;
        impl BeanPostProcessor for Replace {
            fn after_construction(&self, _name: &str, _bean: RawBean) -> Result<Step> {
                Ok(Step::Halt(Box::new(String::from("proxy"))))
            }
        }
        struct Never;
        impl BeanPostProcessor for Never {
            fn order(&self) -> i32 {
                5
            }
            fn after_construction(&self, _name: &str, _bean: RawBean) -> Result<Step> {
                panic!("must not run after a halt");
            }
        }

        let pipeline = Pipeline::new(vec![Arc::new(Never), Arc::new(Replace)]);
        let bean = pipeline.after_construction("x", Box::new(1u8)).unwrap();
        assert_eq!(bean.downcast_ref::<String>().map(String::as_str), Some("proxy"));
    }

    #[test]
    fn default_name_is_type_name() {
        struct Named;
        impl BeanPostProcessor for Named {}
        assert!(Named.name().ends_with("Named"));
    }
}
