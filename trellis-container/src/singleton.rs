//! Singleton cache and creation tracking.
//!
//! Every singleton name moves through
//!
//! ```text
//!   (no record) ──claim──> InCreation ──complete──> Created
//!                              │
//!                              └──fail / panic──> Failed
//! ```
//!
//! exactly once. The thread that claims a name builds the bean; other
//! threads asking for it block until the record leaves `InCreation`. A
//! request that would deadlock (the same thread asking again, or a thread
//! whose owner is transitively waiting on it) receives an early reference
//! instead.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace, warn};

use crate::bean::{BeanRef, BeanSlot, Instance};
use crate::class::DestroyFn;
use crate::error::{ContainerError, Result};
use crate::key::TypeKey;

#[derive(Debug)]
enum State {
    InCreation { owner: ThreadId },
    Created,
    Failed(ContainerError),
}

struct SingletonRecord {
    state: State,
    slot: Arc<BeanSlot>,
    /// Set when the definition was replaced while the bean was in creation.
    discarded: bool,
    destroy: Option<DestroyFn>,
    /// Type of objects registered directly, without a definition.
    manual: Option<TypeKey>,
}

#[derive(Default)]
struct Records {
    records: HashMap<String, SingletonRecord>,
    /// Names in the order they reached `Created`.
    creation_order: Vec<String>,
    /// thread -> bean name it is blocked on
    waiting: HashMap<ThreadId, String>,
}

impl Records {
    /// Returns `true` if `thread` is blocked, directly or through a chain of
    /// other blocked threads, on a bean that `target` is creating.
    fn waits_on(&self, mut thread: ThreadId, target: ThreadId) -> bool {
        let mut seen = HashSet::new();
        while let Some(name) = self.waiting.get(&thread) {
            match self.records.get(name).map(|r| &r.state) {
                Some(State::InCreation { owner }) => {
                    if *owner == target {
                        return true;
                    }
                    if !seen.insert(*owner) {
                        return false;
                    }
                    thread = *owner;
                }
                _ => return false,
            }
        }
        false
    }

    fn remove(&mut self, name: &str) -> Option<SingletonRecord> {
        let record = self.records.remove(name)?;
        self.creation_order.retain(|n| n != name);
        Some(record)
    }
}

/// Outcome of [`SingletonRegistry::claim`].
pub(crate) enum Claim<'a> {
    /// The singleton is finished.
    Ready(BeanRef),
    /// The singleton is being created further up this call chain (or by a
    /// thread that waits on this one); here is an early reference to it.
    InCreation(BeanRef),
    /// The caller now owns creation and must complete or fail the guard.
    Create(CreationGuard<'a>),
}

/// Registry of singleton records.
#[derive(Default)]
pub(crate) struct SingletonRegistry {
    inner: Mutex<Records>,
    changed: Condvar,
}

impl SingletonRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up `name`, blocking while another thread creates it.
    ///
    /// # Errors
    /// The stored error of a `Failed` record.
    pub fn claim(&self, name: &str) -> Result<Claim<'_>> {
        let me = thread::current().id();
        let mut records = self.inner.lock();

        loop {
            let owner = match records.records.get(name) {
                None => break,
                Some(record) => match &record.state {
                    State::Created => {
                        return Ok(Claim::Ready(BeanRef::new(name, record.slot.clone())));
                    }
                    State::Failed(err) => return Err(err.clone()),
                    State::InCreation { owner } if *owner == me => {
                        trace!(bean = %name, "Bean is in creation on this thread");
                        return Ok(Claim::InCreation(BeanRef::new(name, record.slot.clone())));
                    }
                    State::InCreation { owner } => *owner,
                },
            };

            if records.waits_on(owner, me) {
                debug!(bean = %name, "Cross-thread cycle detected, handing out early reference");
                let slot = records.records.get(name).map(|r| r.slot.clone());
                if let Some(slot) = slot {
                    return Ok(Claim::InCreation(BeanRef::new(name, slot)));
                }
                continue;
            }

            trace!(bean = %name, "Waiting for bean created by another thread");
            records.waiting.insert(me, name.to_string());
            self.changed.wait(&mut records);
            records.waiting.remove(&me);
        }

        let slot = BeanSlot::new();
        records.records.insert(
            name.to_string(),
            SingletonRecord {
                state: State::InCreation { owner: me },
                slot: slot.clone(),
                discarded: false,
                destroy: None,
                manual: None,
            },
        );
        trace!(bean = %name, "Claimed singleton creation");

        Ok(Claim::Create(CreationGuard {
            registry: self,
            name: name.to_string(),
            slot,
            finished: false,
        }))
    }

    /// Returns the finished singleton, without blocking.
    pub fn created(&self, name: &str) -> Option<BeanRef> {
        let records = self.inner.lock();
        match records.records.get(name) {
            Some(record) if matches!(record.state, State::Created) => {
                Some(BeanRef::new(name, record.slot.clone()))
            }
            _ => None,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.created(name).is_some()
    }

    pub fn instance_of(&self, name: &str) -> Option<Instance> {
        self.created(name).and_then(|bean| bean.instance().ok())
    }

    /// Type of an object registered through [`register_manual`](Self::register_manual).
    pub fn manual_type(&self, name: &str) -> Option<TypeKey> {
        self.inner.lock().records.get(name).and_then(|r| r.manual)
    }

    /// Registers an already built object as a finished singleton.
    ///
    /// # Errors
    /// [`ContainerError::InvalidDefinition`] if a singleton is already
    /// created or in creation under `name`.
    pub fn register_manual(&self, name: &str, key: TypeKey, instance: Instance) -> Result<BeanRef> {
        let mut records = self.inner.lock();
        if let Some(existing) = records.records.get(name) {
            if !matches!(existing.state, State::Failed(_)) {
                return Err(ContainerError::invalid(
                    name,
                    "an object is already bound to that singleton name",
                ));
            }
        }

        let slot = BeanSlot::filled(instance);
        records.records.insert(
            name.to_string(),
            SingletonRecord {
                state: State::Created,
                slot: slot.clone(),
                discarded: false,
                destroy: None,
                manual: Some(key),
            },
        );
        records.creation_order.push(name.to_string());
        debug!(bean = %name, type_name = key.type_name(), "Registered singleton object");
        Ok(BeanRef::new(name, slot))
    }

    /// Drops the record for `name`.
    ///
    /// A created singleton is returned with its destroy callback so the
    /// caller can run it outside the lock. A singleton still in creation is
    /// flagged and dropped once its creator finishes. A failed record is
    /// cleared so the next request tries again.
    pub fn discard(&self, name: &str) -> Option<(Instance, Option<DestroyFn>)> {
        let mut records = self.inner.lock();

        let in_creation = match records.records.get_mut(name) {
            None => return None,
            Some(record) => match record.state {
                State::InCreation { .. } => {
                    record.discarded = true;
                    true
                }
                _ => false,
            },
        };
        if in_creation {
            debug!(bean = %name, "Bean in creation will be discarded once finished");
            return None;
        }

        let record = records.remove(name)?;
        match record.state {
            State::Created => {
                debug!(bean = %name, "Discarded singleton");
                let instance = record.slot.get().cloned()?;
                Some((instance, record.destroy))
            }
            _ => {
                trace!(bean = %name, "Cleared failed singleton");
                None
            }
        }
    }

    /// Drops every failed record so the next request tries again.
    pub fn clear_failed(&self) {
        self.inner
            .lock()
            .records
            .retain(|_, record| !matches!(record.state, State::Failed(_)));
    }

    /// Names of finished singletons, oldest first.
    pub fn created_names_in_order(&self) -> Vec<String> {
        self.inner.lock().creation_order.clone()
    }

    /// Names of objects registered without a definition.
    pub fn manual_names(&self) -> Vec<String> {
        let records = self.inner.lock();
        records
            .creation_order
            .iter()
            .filter(|name| records.records.get(*name).is_some_and(|r| r.manual.is_some()))
            .cloned()
            .collect()
    }

    fn release(&self, name: &str) {
        self.inner.lock().remove(name);
        self.changed.notify_all();
    }

    fn finish(&self, name: &str, outcome: std::result::Result<Option<DestroyFn>, ContainerError>) {
        let mut guard = self.inner.lock();
        let records = &mut *guard;

        let discarded = records.records.get(name).is_none_or(|r| r.discarded);
        if discarded {
            records.remove(name);
            debug!(bean = %name, "Dropped singleton whose definition changed during creation");
        } else if let Some(record) = records.records.get_mut(name) {
            match outcome {
                Ok(destroy) => {
                    record.state = State::Created;
                    record.destroy = destroy;
                    records.creation_order.push(name.to_string());
                }
                Err(err) => record.state = State::Failed(err),
            }
        }

        drop(guard);
        self.changed.notify_all();
    }
}

/// Exclusive right to create one singleton.
///
/// Dropping the guard without calling [`complete`](Self::complete) or
/// [`fail`](Self::fail) marks the bean failed and wakes waiting threads.
pub(crate) struct CreationGuard<'a> {
    registry: &'a SingletonRegistry,
    name: String,
    slot: Arc<BeanSlot>,
    finished: bool,
}

impl CreationGuard<'_> {
    /// A handle that becomes usable once the bean completes.
    pub fn early_ref(&self) -> BeanRef {
        BeanRef::new(self.name.as_str(), self.slot.clone())
    }

    /// Publishes the finished bean. Early references converge on `instance`.
    pub fn complete(mut self, instance: Instance, destroy: Option<DestroyFn>) -> BeanRef {
        if !self.slot.fill(instance) {
            warn!(bean = %self.name, "Singleton slot was already filled");
        }
        self.registry.finish(&self.name, Ok(destroy));
        self.finished = true;
        debug!(bean = %self.name, "Singleton created");
        self.early_ref()
    }

    /// Gives up the claim without publishing anything. The record is
    /// dropped and waiting threads race for a fresh claim.
    pub fn release(mut self) {
        trace!(bean = %self.name, "Released singleton claim");
        self.registry.release(&self.name);
        self.finished = true;
    }

    /// Records the failure; later requests re-raise `err`.
    pub fn fail(mut self, err: ContainerError) {
        debug!(bean = %self.name, error = %err, "Singleton creation failed");
        self.registry.finish(&self.name, Err(err));
        self.finished = true;
    }
}

impl Drop for CreationGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            warn!(bean = %self.name, "Singleton creation aborted");
            self.registry.finish(
                &self.name,
                Err(ContainerError::construction(
                    self.name.as_str(),
                    "bean creation was aborted by a panic",
                )),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn create(registry: &SingletonRegistry, name: &str, value: u32) -> BeanRef {
        match registry.claim(name).unwrap() {
            Claim::Create(guard) => guard.complete(Arc::new(value), None),
            _ => panic!("expected to own creation of {name}"),
        }
    }

    #[test]
    fn claim_then_ready() {
        let registry = SingletonRegistry::new();
        let bean = create(&registry, "a", 1);

        assert_eq!(*bean.get::<u32>().unwrap(), 1);
        match registry.claim("a").unwrap() {
            Claim::Ready(again) => assert!(again.same_bean(&bean)),
            _ => panic!("expected Ready"),
        }
        assert_eq!(registry.created_names_in_order(), vec!["a"]);
    }

    #[test]
    fn same_thread_reentry_gets_early_reference() {
        let registry = SingletonRegistry::new();
        let Claim::Create(guard) = registry.claim("a").unwrap() else {
            panic!("expected Create");
        };

        let Claim::InCreation(early) = registry.claim("a").unwrap() else {
            panic!("expected InCreation");
        };
        assert!(!early.is_ready());

        guard.complete(Arc::new(5u32), None);
        assert_eq!(*early.get::<u32>().unwrap(), 5);
    }

    #[test]
    fn failure_is_stored_and_re_raised() {
        let registry = SingletonRegistry::new();
        let Claim::Create(guard) = registry.claim("a").unwrap() else {
            panic!("expected Create");
        };
        guard.fail(ContainerError::construction("a", "boom"));

        let first = registry.claim("a").err().unwrap();
        let second = registry.claim("a").err().unwrap();
        assert_eq!(first.to_string(), second.to_string());

        // clearing the failure allows another attempt
        assert!(registry.discard("a").is_none());
        assert!(matches!(registry.claim("a").unwrap(), Claim::Create(_)));
    }

    #[test]
    fn released_claim_leaves_no_record() {
        let registry = SingletonRegistry::new();
        let Claim::Create(guard) = registry.claim("a").unwrap() else {
            panic!("expected Create");
        };
        guard.release();

        assert!(registry.created("a").is_none());
        assert!(matches!(registry.claim("a").unwrap(), Claim::Create(_)));
    }

    #[test]
    fn dropped_guard_marks_failed() {
        let registry = SingletonRegistry::new();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = registry.claim("a").unwrap();
            panic!("constructor panicked");
        }));
        assert!(result.is_err());

        let err = registry.claim("a").err().unwrap();
        assert!(err.to_string().contains("panic"));
    }

    #[test]
    fn concurrent_claims_create_once() {
        let registry = SingletonRegistry::new();
        let barrier = Barrier::new(8);
        let creations = AtomicUsize::new(0);

        let beans: Vec<BeanRef> = thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        match registry.claim("shared").unwrap() {
                            Claim::Create(guard) => {
                                creations.fetch_add(1, Ordering::SeqCst);
                                thread::sleep(Duration::from_millis(20));
                                guard.complete(Arc::new(42u32), None)
                            }
                            Claim::Ready(bean) => bean,
                            Claim::InCreation(_) => panic!("no cycle here"),
                        }
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(creations.load(Ordering::SeqCst), 1);
        assert!(beans.iter().all(|b| b.same_bean(&beans[0])));
        assert!(beans.iter().all(|b| *b.get::<u32>().unwrap() == 42));
    }

    #[test]
    fn cross_thread_cycle_yields_early_reference() {
        let registry = SingletonRegistry::new();
        let both_claimed = Barrier::new(2);

        thread::scope(|s| {
            let first = s.spawn(|| {
                let Claim::Create(a) = registry.claim("a").unwrap() else {
                    panic!("expected Create");
                };
                both_claimed.wait();
                // blocks until the other thread finishes "b"
                let b = match registry.claim("b").unwrap() {
                    Claim::Ready(b) => b,
                    _ => panic!("expected Ready"),
                };
                a.complete(Arc::new(1u32), None);
                b
            });

            let second = s.spawn(|| {
                let Claim::Create(b) = registry.claim("b").unwrap() else {
                    panic!("expected Create");
                };
                both_claimed.wait();
                // give the first thread time to start waiting on "b"
                thread::sleep(Duration::from_millis(50));
                let early_a = match registry.claim("a").unwrap() {
                    Claim::InCreation(a) => a,
                    _ => panic!("expected an early reference"),
                };
                b.complete(Arc::new(2u32), None);
                early_a
            });

            let b = first.join().unwrap();
            let early_a = second.join().unwrap();
            assert_eq!(*b.get::<u32>().unwrap(), 2);
            assert_eq!(*early_a.get::<u32>().unwrap(), 1);
        });
    }

    #[test]
    fn discard_returns_created_instance_and_callback() {
        let registry = SingletonRegistry::new();
        let destroyed = Arc::new(AtomicUsize::new(0));
        let Claim::Create(guard) = registry.claim("a").unwrap() else {
            panic!("expected Create");
        };
        let counter = destroyed.clone();
        guard.complete(
            Arc::new(1u32),
            Some(Arc::new(move |_: &Instance| {
                counter.fetch_add(1, Ordering::SeqCst);
            })),
        );

        let (instance, destroy) = registry.discard("a").unwrap();
        destroy.unwrap()(&instance);
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
        assert!(!registry.contains("a"));
        assert!(registry.created_names_in_order().is_empty());
    }

    #[test]
    fn discard_during_creation_drops_on_completion() {
        let registry = SingletonRegistry::new();
        let Claim::Create(guard) = registry.claim("a").unwrap() else {
            panic!("expected Create");
        };
        assert!(registry.discard("a").is_none());

        let bean = guard.complete(Arc::new(1u32), None);
        assert!(bean.is_ready());
        assert!(!registry.contains("a"));
        assert!(matches!(registry.claim("a").unwrap(), Claim::Create(_)));
    }

    #[test]
    fn manual_singletons() {
        let registry = SingletonRegistry::new();
        registry
            .register_manual("config", TypeKey::of::<String>(), Arc::new(String::from("x")))
            .unwrap();

        assert!(registry.contains("config"));
        assert_eq!(registry.manual_names(), vec!["config"]);
        assert!(registry.manual_type("config").unwrap().is::<String>());
        assert!(
            registry
                .register_manual("config", TypeKey::of::<u8>(), Arc::new(1u8))
                .is_err()
        );
    }
}
