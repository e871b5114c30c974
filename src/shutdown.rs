//! # Shutdown Coordinator
//!
//! Tracks live containers and ad-hoc shutdown actions, and runs them exactly
//! once when the process shuts down.
//!
//! On [`ShutdownCoordinator::trigger`]:
//! 1. every registered container is closed (a failing close is logged and the
//!    next container is still closed),
//! 2. shutdown actions run in registration order,
//! 3. post-close actions run in registration order.
//!
//! The first caller runs the shutdown; concurrent callers block until it is
//! finished and then return `false`. Registration is refused once a shutdown
//! has started.
//!
//! Coordinators built with [`ShutdownCoordinator::with_signal_hook`] are
//! triggered on SIGINT/SIGTERM. One watcher thread serves the whole process.
//! It starts when the first hooked coordinator registers a container. On a
//! signal it triggers every live hooked coordinator, then exits the process
//! with `128 + signal`.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use once_cell::sync::{Lazy, OnceCell};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use crate::context::SharedContext;
use crate::error::ShutdownError;

static SHARED: Lazy<Arc<ShutdownCoordinator>> = Lazy::new(ShutdownCoordinator::with_signal_hook);

/// Coordinators the signal watcher triggers.
static HOOKED: Lazy<Mutex<Vec<Weak<ShutdownCoordinator>>>> = Lazy::new(|| Mutex::new(Vec::new()));

/// Set once the signal watcher thread is running.
static WATCHER: OnceCell<()> = OnceCell::new();

static WATCHERS_STARTED: AtomicUsize = AtomicUsize::new(0);

/// Handle to a registered shutdown action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActionId(u64);

type Action = Box<dyn FnOnce() + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Idle,
    InProgress,
    Done,
}

struct State {
    status: Status,
    contexts: Vec<(usize, SharedContext)>,
    actions: Vec<(ActionId, String, Action)>,
    post_close: Vec<(ActionId, String, Action)>,
}

impl State {
    fn accepting(&self) -> Result<(), ShutdownError> {
        match self.status {
            Status::Idle => Ok(()),
            Status::InProgress | Status::Done => Err(ShutdownError::InProgress),
        }
    }
}

pub struct ShutdownCoordinator {
    state: Mutex<State>,
    finished: Condvar,
    next_action: AtomicU64,
    signal_hook: bool,
}

fn key(context: &SharedContext) -> usize {
    Arc::as_ptr(context) as *const () as usize
}

impl ShutdownCoordinator {
    /// A coordinator that is only triggered explicitly.
    pub fn new() -> Self {
        Self::build(false)
    }

    /// A coordinator that also triggers on SIGINT/SIGTERM.
    pub fn with_signal_hook() -> Arc<Self> {
        Arc::new(Self::build(true))
    }

    /// The process-wide coordinator, with signal hook.
    pub fn shared() -> Arc<Self> {
        SHARED.clone()
    }

    fn build(signal_hook: bool) -> Self {
        Self {
            state: Mutex::new(State {
                status: Status::Idle,
                contexts: Vec::new(),
                actions: Vec::new(),
                post_close: Vec::new(),
            }),
            finished: Condvar::new(),
            next_action: AtomicU64::new(1),
            signal_hook,
        }
    }

    /// Registers a container to be closed on shutdown. Registering the same
    /// container twice has no effect. The container is deregistered
    /// automatically when it closes.
    pub fn register_context(self: &Arc<Self>, context: &SharedContext) -> Result<(), ShutdownError> {
        {
            let mut state = self.state.lock();
            state.accepting()?;
            let key = key(context);
            if state.contexts.iter().any(|(existing, _)| *existing == key) {
                return Ok(());
            }
            state.contexts.push((key, context.clone()));
        }
        debug!(context = context.id(), "Registered for shutdown");

        let coordinator: Weak<Self> = Arc::downgrade(self);
        let weak_context = Arc::downgrade(context);
        context.on_close(Box::new(move || {
            if let (Some(coordinator), Some(context)) = (coordinator.upgrade(), weak_context.upgrade()) {
                coordinator.deregister_context(&context);
            }
        }));

        if self.signal_hook {
            self.install_signal_hook();
        }
        Ok(())
    }

    /// Removes a container. Returns false if it was not registered.
    pub fn deregister_context(&self, context: &SharedContext) -> bool {
        let key = key(context);
        let mut state = self.state.lock();
        let before = state.contexts.len();
        state.contexts.retain(|(existing, _)| *existing != key);
        before != state.contexts.len()
    }

    pub fn is_registered(&self, context: &SharedContext) -> bool {
        let key = key(context);
        self.state.lock().contexts.iter().any(|(existing, _)| *existing == key)
    }

    /// Adds an action run after the containers are closed.
    pub fn add_action<F>(&self, name: impl Into<String>, action: F) -> Result<ActionId, ShutdownError>
    where
        F: FnOnce() + Send + 'static,
    {
        let id = ActionId(self.next_action.fetch_add(1, Ordering::Relaxed));
        let mut state = self.state.lock();
        state.accepting()?;
        state.actions.push((id, name.into(), Box::new(action)));
        Ok(id)
    }

    /// Adds an action run after every shutdown action.
    pub fn add_post_close_action<F>(
        &self,
        name: impl Into<String>,
        action: F,
    ) -> Result<ActionId, ShutdownError>
    where
        F: FnOnce() + Send + 'static,
    {
        let id = ActionId(self.next_action.fetch_add(1, Ordering::Relaxed));
        let mut state = self.state.lock();
        state.accepting()?;
        state.post_close.push((id, name.into(), Box::new(action)));
        Ok(id)
    }

    /// Removes an action. Returns false if it was already removed or has run.
    pub fn remove_action(&self, id: ActionId) -> bool {
        let mut state = self.state.lock();
        let before = state.actions.len() + state.post_close.len();
        state.actions.retain(|(existing, _, _)| *existing != id);
        state.post_close.retain(|(existing, _, _)| *existing != id);
        before != state.actions.len() + state.post_close.len()
    }

    pub fn is_triggered(&self) -> bool {
        self.state.lock().status != Status::Idle
    }

    /// Runs the shutdown. Returns true for the caller that ran it.
    pub fn trigger(&self) -> bool {
        let (contexts, actions, post_close) = {
            let mut state = self.state.lock();
            loop {
                match state.status {
                    Status::Idle => break,
                    Status::InProgress => self.finished.wait(&mut state),
                    Status::Done => return false,
                }
            }
            state.status = Status::InProgress;
            (
                std::mem::take(&mut state.contexts),
                std::mem::take(&mut state.actions),
                std::mem::take(&mut state.post_close),
            )
        };
        let _finish = Finish(self);
        info!(
            contexts = contexts.len(),
            actions = actions.len() + post_close.len(),
            "Shutting down"
        );

        for (_, context) in contexts {
            if let Err(e) = context.close() {
                warn!(context = context.id(), error = %e, "Failed to close context");
            }
        }
        for (_, name, action) in actions.into_iter().chain(post_close) {
            debug!(action = %name, "Running shutdown action");
            action();
        }
        true
    }

    /// Drops every registration without running it and re-arms the
    /// coordinator.
    pub fn teardown(&self) {
        let mut state = self.state.lock();
        while state.status == Status::InProgress {
            self.finished.wait(&mut state);
        }
        state.status = Status::Idle;
        state.contexts.clear();
        state.actions.clear();
        state.post_close.clear();
    }

    fn install_signal_hook(self: &Arc<Self>) {
        {
            let mut hooked = HOOKED.lock();
            hooked.retain(|existing| existing.strong_count() > 0);
            if !hooked.iter().any(|existing| std::ptr::eq(existing.as_ptr(), Arc::as_ptr(self))) {
                hooked.push(Arc::downgrade(self));
            }
        }
        WATCHER.get_or_init(|| {
            let spawned = std::thread::Builder::new()
                .name("liftoff-shutdown".into())
                .spawn(watch_signals);
            match spawned {
                Ok(_) => {
                    WATCHERS_STARTED.fetch_add(1, Ordering::Relaxed);
                    debug!("Shutdown signal hook installed");
                }
                Err(e) => warn!(error = %e, "Unable to install shutdown signal hook"),
            }
        });
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Marks the shutdown as finished, even if an action panicked.
struct Finish<'a>(&'a ShutdownCoordinator);

impl Drop for Finish<'_> {
    fn drop(&mut self) {
        self.0.state.lock().status = Status::Done;
        self.0.finished.notify_all();
    }
}

fn watch_signals() {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            warn!(error = %e, "Unable to start shutdown signal runtime");
            return;
        }
    };
    let signal = runtime.block_on(wait_for_signal());
    info!(signal, "Shutdown signal received");
    let hooked: Vec<_> = HOOKED.lock().iter().filter_map(Weak::upgrade).collect();
    for coordinator in hooked {
        coordinator.trigger();
    }
    std::process::exit(128 + signal);
}

async fn interrupt() -> i32 {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Unable to listen for interrupt");
        std::future::pending::<()>().await;
    }
    2
}

#[cfg(unix)]
async fn wait_for_signal() -> i32 {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => tokio::select! {
            code = interrupt() => code,
            _ = terminate.recv() => 15,
        },
        Err(e) => {
            warn!(error = %e, "Unable to listen for SIGTERM");
            interrupt().await
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> i32 {
    interrupt().await
}
