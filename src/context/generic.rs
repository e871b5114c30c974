use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::{ApplicationContext, ApplicationKind, Bean, DefinitionRegistry};
use crate::environment::Environment;
use crate::error::{BoxError, ContextError};
use crate::events::{ApplicationEvent, ApplicationListener};
use crate::exit::{ExitCodeExceptionMapper, ExitCodeGenerator};
use crate::runner::Runner;
use crate::startup::{ApplicationStartup, DefaultStartup};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Created,
    Active,
    Closed,
}

struct State {
    phase: Phase,
    environment: Option<Environment>,
    startup: Arc<dyn ApplicationStartup>,
    beans: Vec<(String, Bean)>,
    allow_overriding: bool,
    lazy: bool,
    listeners: Vec<Arc<dyn ApplicationListener>>,
    sources: Vec<String>,
    close_callbacks: Vec<Box<dyn FnOnce() + Send>>,
}

/// In-memory container: named beans in registration order, plus the
/// created/active/closed lifecycle.
pub struct GenericContext {
    id: String,
    kind: ApplicationKind,
    state: Mutex<State>,
}

impl GenericContext {
    pub fn new(kind: ApplicationKind) -> Self {
        Self::with_id(format!("application-{}", NEXT_ID.fetch_add(1, Ordering::Relaxed)), kind)
    }

    pub fn with_id(id: impl Into<String>, kind: ApplicationKind) -> Self {
        Self {
            id: id.into(),
            kind,
            state: Mutex::new(State {
                phase: Phase::Created,
                environment: None,
                startup: Arc::new(DefaultStartup),
                beans: Vec::new(),
                allow_overriding: true,
                lazy: false,
                listeners: Vec::new(),
                sources: Vec::new(),
                close_callbacks: Vec::new(),
            }),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().phase == Phase::Closed
    }

    pub fn allows_definition_overriding(&self) -> bool {
        self.state.lock().allow_overriding
    }

    pub fn is_lazy_initialization(&self) -> bool {
        self.state.lock().lazy
    }

    /// Names of the sources loaded so far, in load order.
    pub fn loaded_sources(&self) -> Vec<String> {
        self.state.lock().sources.clone()
    }

    fn listeners(&self) -> Vec<Arc<dyn ApplicationListener>> {
        self.state.lock().listeners.clone()
    }

    fn beans(&self) -> Vec<Bean> {
        self.state
            .lock()
            .beans
            .iter()
            .map(|(_, bean)| bean.clone())
            .collect()
    }
}

impl DefinitionRegistry for GenericContext {
    fn register_bean(&self, name: &str, bean: Bean) -> Result<(), ContextError> {
        let mut state = self.state.lock();
        if state.phase == Phase::Closed {
            return Err(ContextError::Closed);
        }
        match state.beans.iter().position(|(existing, _)| existing == name) {
            Some(_) if !state.allow_overriding => {
                return Err(ContextError::DuplicateBean(name.to_string()))
            }
            Some(index) => {
                debug!(context = %self.id, bean = name, "Overriding bean definition");
                state.beans[index].1 = bean;
            }
            None => state.beans.push((name.to_string(), bean)),
        }
        Ok(())
    }

    fn register_source(&self, name: &str) {
        self.state.lock().sources.push(name.to_string());
    }

    fn contains_bean(&self, name: &str) -> bool {
        self.state.lock().beans.iter().any(|(existing, _)| existing == name)
    }

    fn bean_names(&self) -> Vec<String> {
        self.state
            .lock()
            .beans
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }
}

impl ApplicationContext for GenericContext {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> ApplicationKind {
        self.kind
    }

    fn set_environment(&self, environment: Environment) {
        self.state.lock().environment = Some(environment);
    }

    fn environment(&self) -> Option<Environment> {
        self.state.lock().environment.clone()
    }

    fn set_application_startup(&self, startup: Arc<dyn ApplicationStartup>) {
        self.state.lock().startup = startup;
    }

    fn register_singleton(
        &self,
        name: &str,
        value: Arc<dyn Any + Send + Sync>,
    ) -> Result<(), ContextError> {
        self.register_bean(name, Bean::Value(value))
    }

    fn singleton(&self, name: &str) -> Option<Arc<dyn Any + Send + Sync>> {
        let state = self.state.lock();
        state.beans.iter().find_map(|(existing, bean)| match bean {
            Bean::Value(value) if existing == name => Some(value.clone()),
            _ => None,
        })
    }

    fn set_allow_definition_overriding(&self, allow: bool) {
        self.state.lock().allow_overriding = allow;
    }

    fn set_lazy_initialization(&self, lazy: bool) {
        self.state.lock().lazy = lazy;
    }

    fn definition_registry(&self) -> Option<&dyn DefinitionRegistry> {
        Some(self)
    }

    fn add_application_listener(&self, listener: Arc<dyn ApplicationListener>) {
        self.state.lock().listeners.push(listener);
    }

    fn publish_event(&self, event: &ApplicationEvent) -> Result<(), BoxError> {
        // Listeners run outside the lock so they can call back into the context.
        for listener in self.listeners() {
            listener.on_event(event)?;
        }
        Ok(())
    }

    fn refresh(&self) -> Result<(), BoxError> {
        let startup = {
            let state = self.state.lock();
            match state.phase {
                Phase::Created => state.startup.clone(),
                Phase::Active => return Err(ContextError::AlreadyRefreshed.into()),
                Phase::Closed => return Err(ContextError::Closed.into()),
            }
        };
        let mut step = startup.start("liftoff.context.refresh");
        step.tag("context", &self.id);
        {
            let mut state = self.state.lock();
            state.phase = Phase::Active;
            info!(
                context = %self.id,
                kind = %self.kind,
                beans = state.beans.len(),
                lazy = state.lazy,
                "Context refreshed"
            );
        }
        step.end();
        self.publish_event(&ApplicationEvent::ContextRefreshed {
            context_id: self.id.clone(),
        })
    }

    fn is_active(&self) -> bool {
        self.state.lock().phase == Phase::Active
    }

    fn close(&self) -> Result<(), BoxError> {
        let (was_active, callbacks) = {
            let mut state = self.state.lock();
            if state.phase == Phase::Closed {
                return Ok(());
            }
            let was_active = state.phase == Phase::Active;
            state.phase = Phase::Closed;
            (was_active, std::mem::take(&mut state.close_callbacks))
        };
        if was_active {
            let event = ApplicationEvent::ContextClosed {
                context_id: self.id.clone(),
            };
            if let Err(e) = self.publish_event(&event) {
                warn!(context = %self.id, error = %e, "Exception thrown from listener while closing");
            }
        }
        for callback in callbacks {
            callback();
        }
        info!(context = %self.id, "Context closed");
        Ok(())
    }

    fn on_close(&self, callback: Box<dyn FnOnce() + Send>) {
        let mut state = self.state.lock();
        if state.phase == Phase::Closed {
            drop(state);
            callback();
        } else {
            state.close_callbacks.push(callback);
        }
    }

    fn runners(&self) -> Vec<Runner> {
        self.beans().iter().filter_map(Bean::as_runner).collect()
    }

    fn exit_code_mappers(&self) -> Vec<Arc<dyn ExitCodeExceptionMapper>> {
        self.beans()
            .into_iter()
            .filter_map(|bean| match bean {
                Bean::ExitCodeMapper(mapper) => Some(mapper),
                _ => None,
            })
            .collect()
    }

    fn exit_code_generators(&self) -> Vec<Arc<dyn ExitCodeGenerator>> {
        self.beans()
            .into_iter()
            .filter_map(|bean| match bean {
                Bean::ExitCodeGenerator(generator) => Some(generator),
                _ => None,
            })
            .collect()
    }
}
