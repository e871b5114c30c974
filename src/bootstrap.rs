//! # Bootstrap Context
//!
//! A short-lived, type-keyed store that exists only during the early run
//! phases. Bootstrap initializers run before any container exists; they
//! register instances (or suppliers) here so that later phases can pick them
//! up, and they register close listeners that copy transient state into the
//! finished container.
//!
//! States: `OPEN -> CLOSED`. Registration is only possible while open; reads
//! keep working after close so that close listeners can still fetch
//! instances.
//!
//! ```rust
//! use liftoff::bootstrap::{BootstrapContext, InstanceSupplier};
//!
//! let bootstrap = BootstrapContext::new();
//! bootstrap.register(InstanceSupplier::of(42_u16)).unwrap();
//! assert_eq!(*bootstrap.get::<u16>().unwrap(), 42);
//! assert!(bootstrap.get::<String>().is_err());
//! ```

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::context::SharedContext;
use crate::error::{BootstrapError, BoxError};
use crate::plugin::Capability;

type AnyInstance = Arc<dyn Any + Send + Sync>;
type AnySupplier = Arc<dyn Fn(&BootstrapContext) -> Result<AnyInstance, BoxError> + Send + Sync>;
type CloseListener = Box<dyn FnOnce(&BootstrapContext, &SharedContext) -> Result<(), BoxError> + Send>;
type InstanceCloseCallback<T> = Box<dyn FnOnce(Arc<T>, &SharedContext) -> Result<(), BoxError> + Send>;

/// Lifetime of an instance produced by a supplier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scope {
    /// Created once, on first access, and cached.
    #[default]
    Singleton,
    /// Created on every access.
    Prototype,
}

/// Deferred source of a `T`, with an optional close callback.
pub struct InstanceSupplier<T> {
    factory: Arc<dyn Fn(&BootstrapContext) -> Result<Arc<T>, BoxError> + Send + Sync>,
    scope: Scope,
    on_close: Option<InstanceCloseCallback<T>>,
}

impl<T: Any + Send + Sync> InstanceSupplier<T> {
    /// Supplies an existing instance.
    pub fn of(value: T) -> Self {
        let instance = Arc::new(value);
        Self {
            factory: Arc::new(move |_| Ok(instance.clone())),
            scope: Scope::Singleton,
            on_close: None,
        }
    }

    /// Supplies an instance created on demand. The factory may read other
    /// entries from the context.
    pub fn from<F>(factory: F) -> Self
    where
        F: Fn(&BootstrapContext) -> Result<T, BoxError> + Send + Sync + 'static,
    {
        Self {
            factory: Arc::new(move |bootstrap| factory(bootstrap).map(Arc::new)),
            scope: Scope::Singleton,
            on_close: None,
        }
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    /// Callback invoked when the context closes, if the instance was created.
    pub fn on_close<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(Arc<T>, &SharedContext) -> Result<(), BoxError> + Send + 'static,
    {
        self.on_close = Some(Box::new(callback));
        self
    }
}

struct Entry {
    type_name: &'static str,
    supplier: AnySupplier,
    scope: Scope,
    instance: Option<AnyInstance>,
}

#[derive(Default)]
struct State {
    entries: HashMap<TypeId, Entry>,
    close_listeners: Vec<CloseListener>,
    closed: bool,
}

/// Type-keyed registry shared between bootstrap initializers and later phases.
#[derive(Default)]
pub struct BootstrapContext {
    state: Mutex<State>,
}

impl BootstrapContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a supplier for `T`. Fails if `T` is already registered or the
    /// context is closed.
    pub fn register<T: Any + Send + Sync>(
        &self,
        supplier: InstanceSupplier<T>,
    ) -> Result<(), BootstrapError> {
        self.insert(supplier, false).map(|_| ())
    }

    /// Registers a supplier for `T` unless one exists already. Returns whether
    /// the supplier was registered.
    pub fn register_if_absent<T: Any + Send + Sync>(
        &self,
        supplier: InstanceSupplier<T>,
    ) -> Result<bool, BootstrapError> {
        self.insert(supplier, true)
    }

    fn insert<T: Any + Send + Sync>(
        &self,
        supplier: InstanceSupplier<T>,
        if_absent: bool,
    ) -> Result<bool, BootstrapError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(BootstrapError::Closed);
        }
        let key = TypeId::of::<T>();
        if state.entries.contains_key(&key) {
            return if if_absent {
                Ok(false)
            } else {
                Err(BootstrapError::AlreadyRegistered(type_name::<T>()))
            };
        }

        let InstanceSupplier {
            factory,
            scope,
            on_close,
        } = supplier;
        let supplier: AnySupplier =
            Arc::new(move |bootstrap| factory(bootstrap).map(|instance| instance as AnyInstance));
        state.entries.insert(
            key,
            Entry {
                type_name: type_name::<T>(),
                supplier,
                scope,
                instance: None,
            },
        );
        if let Some(callback) = on_close {
            state.close_listeners.push(Box::new(move |bootstrap, context| {
                match bootstrap.created::<T>() {
                    Some(instance) => callback(instance, context),
                    None => Ok(()),
                }
            }));
        }
        debug!(type_name = type_name::<T>(), ?scope, "Bootstrap instance registered");
        Ok(true)
    }

    pub fn is_registered<T: Any>(&self) -> bool {
        self.state.lock().entries.contains_key(&TypeId::of::<T>())
    }

    /// Returns the instance for `T`, creating it if necessary.
    ///
    /// Fails with [`BootstrapError::NotRegistered`] if `T` was never
    /// registered, whatever the state of the context.
    pub fn get<T: Any + Send + Sync>(&self) -> Result<Arc<T>, BootstrapError> {
        let (supplier, scope) = {
            let state = self.state.lock();
            let entry = state
                .entries
                .get(&TypeId::of::<T>())
                .ok_or(BootstrapError::NotRegistered(type_name::<T>()))?;
            if let Some(instance) = &entry.instance {
                return downcast(instance.clone());
            }
            (entry.supplier.clone(), entry.scope)
        };

        // The lock is released while the supplier runs so it can read other entries.
        let created = supplier(self).map_err(|source| BootstrapError::Supplier {
            type_name: type_name::<T>(),
            source,
        })?;

        if scope == Scope::Singleton {
            let mut state = self.state.lock();
            if let Some(entry) = state.entries.get_mut(&TypeId::of::<T>()) {
                // A nested access may have created it first; keep that one.
                let instance = entry.instance.get_or_insert(created).clone();
                return downcast(instance);
            }
        }
        downcast(created)
    }

    /// Returns the instance for `T`, or `other` if `T` is not registered.
    pub fn get_or_else<T: Any + Send + Sync>(&self, other: T) -> Result<Arc<T>, BootstrapError> {
        match self.get::<T>() {
            Err(BootstrapError::NotRegistered(_)) => Ok(Arc::new(other)),
            result => result,
        }
    }

    fn created<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let state = self.state.lock();
        let instance = state.entries.get(&TypeId::of::<T>())?.instance.clone()?;
        downcast(instance).ok()
    }

    /// Adds a listener invoked once, with the finished container, when the
    /// context closes.
    pub fn add_close_listener<F>(&self, listener: F) -> Result<(), BootstrapError>
    where
        F: FnOnce(&BootstrapContext, &SharedContext) -> Result<(), BoxError> + Send + 'static,
    {
        let mut state = self.state.lock();
        if state.closed {
            return Err(BootstrapError::Closed);
        }
        state.close_listeners.push(Box::new(listener));
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Closes the context and runs every close listener in registration order.
    pub fn close(&self, context: &SharedContext) -> Result<(), BootstrapError> {
        let listeners = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(BootstrapError::Closed);
            }
            state.closed = true;
            std::mem::take(&mut state.close_listeners)
        };
        debug!(listeners = listeners.len(), "Closing bootstrap context");
        for listener in listeners {
            listener(self, context).map_err(|e| {
                warn!(error = %e, "Bootstrap close listener failed");
                BootstrapError::CloseListener(e)
            })?;
        }
        Ok(())
    }
}

fn downcast<T: Any + Send + Sync>(instance: AnyInstance) -> Result<Arc<T>, BootstrapError> {
    instance
        .downcast::<T>()
        .map_err(|_| BootstrapError::NotRegistered(type_name::<T>()))
}

/// Callback applied to every new [`BootstrapContext`] before it is used.
pub trait BootstrapRegistryInitializer: Send + Sync {
    fn initialize(&self, registry: &BootstrapContext) -> Result<(), BoxError>;
}

impl<F> BootstrapRegistryInitializer for F
where
    F: Fn(&BootstrapContext) -> Result<(), BoxError> + Send + Sync,
{
    fn initialize(&self, registry: &BootstrapContext) -> Result<(), BoxError> {
        self(registry)
    }
}

/// Catalog capability for [`BootstrapRegistryInitializer`]s.
pub struct BootstrapInitializers;

impl Capability for BootstrapInitializers {
    type Args = ();
    type Plugin = dyn BootstrapRegistryInitializer;
    const NAME: &'static str = "BootstrapRegistryInitializer";

    fn order_of(_: &dyn BootstrapRegistryInitializer) -> Option<i32> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ApplicationKind, GenericContext};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn container() -> SharedContext {
        Arc::new(GenericContext::new(ApplicationKind::Standalone))
    }

    #[test]
    fn get_before_register_is_not_found() {
        let bootstrap = BootstrapContext::new();
        assert!(matches!(
            bootstrap.get::<String>(),
            Err(BootstrapError::NotRegistered(_))
        ));
        bootstrap.close(&container()).unwrap();
        assert!(matches!(
            bootstrap.get::<String>(),
            Err(BootstrapError::NotRegistered(_))
        ));
    }

    #[test]
    fn duplicate_registration_fails_unless_if_absent() {
        let bootstrap = BootstrapContext::new();
        bootstrap.register(InstanceSupplier::of(1_u8)).unwrap();
        assert!(matches!(
            bootstrap.register(InstanceSupplier::of(2_u8)),
            Err(BootstrapError::AlreadyRegistered(_))
        ));
        assert!(!bootstrap.register_if_absent(InstanceSupplier::of(3_u8)).unwrap());
        assert_eq!(*bootstrap.get::<u8>().unwrap(), 1);
    }

    #[test]
    fn no_registration_after_close() {
        let bootstrap = BootstrapContext::new();
        bootstrap.close(&container()).unwrap();
        assert!(matches!(
            bootstrap.register(InstanceSupplier::of(1_u8)),
            Err(BootstrapError::Closed)
        ));
        assert!(matches!(
            bootstrap.register_if_absent(InstanceSupplier::of(1_u8)),
            Err(BootstrapError::Closed)
        ));
        assert!(bootstrap.add_close_listener(|_, _| Ok(())).is_err());
    }

    #[test]
    fn singleton_is_cached_and_prototype_is_not() {
        let calls = Arc::new(AtomicUsize::new(0));
        let bootstrap = BootstrapContext::new();

        let counter = calls.clone();
        bootstrap
            .register(InstanceSupplier::from(move |_| {
                Ok(counter.fetch_add(1, Ordering::SeqCst) as u32)
            }))
            .unwrap();
        let counter = calls.clone();
        bootstrap
            .register(
                InstanceSupplier::from(move |_| Ok(counter.fetch_add(1, Ordering::SeqCst) as u64))
                    .with_scope(Scope::Prototype),
            )
            .unwrap();

        let first = bootstrap.get::<u32>().unwrap();
        let second = bootstrap.get::<u32>().unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let a = bootstrap.get::<u64>().unwrap();
        let b = bootstrap.get::<u64>().unwrap();
        assert_ne!(*a, *b);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn suppliers_can_read_other_entries() {
        let bootstrap = BootstrapContext::new();
        bootstrap.register(InstanceSupplier::of(7_i32)).unwrap();
        bootstrap
            .register(InstanceSupplier::from(|b: &BootstrapContext| {
                Ok(format!("port={}", b.get::<i32>()?))
            }))
            .unwrap();
        assert_eq!(*bootstrap.get::<String>().unwrap(), "port=7");
    }

    #[test]
    fn close_listeners_run_once_with_the_container() {
        let bootstrap = BootstrapContext::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let seen = seen.clone();
            bootstrap
                .add_close_listener(move |_, context| {
                    seen.lock().push((i, context.id().to_string()));
                    Ok(())
                })
                .unwrap();
        }
        let context = container();
        bootstrap.close(&context).unwrap();
        assert!(bootstrap.close(&context).is_err());

        let seen = seen.lock();
        assert_eq!(seen.len(), 3);
        assert!(seen.iter().all(|(_, id)| id == context.id()));
        assert_eq!(seen.iter().map(|(i, _)| *i).collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[test]
    fn instance_close_callback_only_fires_when_created() {
        let bootstrap = BootstrapContext::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = fired.clone();
        bootstrap
            .register(InstanceSupplier::of(String::from("used")).on_close(move |value, context| {
                assert_eq!(value.as_str(), "used");
                context.register_singleton("copied", value)?;
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }))
            .unwrap();
        let counter = fired.clone();
        bootstrap
            .register(InstanceSupplier::of(5_u8).on_close(move |_, _| {
                counter.fetch_add(100, Ordering::SeqCst);
                Ok(())
            }))
            .unwrap();

        bootstrap.get::<String>().unwrap();
        let context = container();
        bootstrap.close(&context).unwrap();

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(
            context.bean::<String>("copied").as_deref().map(String::as_str),
            Some("used")
        );
    }
}
