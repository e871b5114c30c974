//! # Exit Code Resolution
//!
//! Maps a terminal failure, or a normal shutdown, to a process exit code.
//!
//! Candidate codes from several generators are combined with one rule: `0`
//! means "no opinion"; if any candidate is positive the largest positive code
//! wins; otherwise the smallest negative code wins; otherwise the result is `0`.

use std::error::Error;
use std::sync::Arc;

use tracing::{debug, error};

use crate::context::SharedContext;
use crate::error::BoxError;
use crate::events::ApplicationEvent;

/// Source of an exit code.
pub trait ExitCodeGenerator: Send + Sync {
    fn exit_code(&self) -> i32;
}

impl ExitCodeGenerator for i32 {
    fn exit_code(&self) -> i32 {
        *self
    }
}

/// Maps a failure to an exit code. Returns `0` to leave the failure unclaimed.
pub trait ExitCodeExceptionMapper: Send + Sync {
    fn exit_code(&self, error: &(dyn Error + 'static)) -> i32;
}

impl<F> ExitCodeExceptionMapper for F
where
    F: Fn(&(dyn Error + 'static)) -> i32 + Send + Sync,
{
    fn exit_code(&self, error: &(dyn Error + 'static)) -> i32 {
        self(error)
    }
}

/// An error that carries its own exit code. Found anywhere in a failure's
/// cause chain, it decides the exit code when no mapper claims the failure.
///
/// The cause chain is only searched for this type. An application error that
/// implements [`ExitCodeGenerator`] must either be wrapped with
/// [`ExitStatusError::wrap`] or be claimed by an [`ExitCodeExceptionMapper`]
/// bean to influence the exit code.
#[derive(Debug, thiserror::Error)]
#[error("{message} (exit code {code})")]
pub struct ExitStatusError {
    pub code: i32,
    pub message: String,
    #[source]
    source: Option<BoxError>,
}

impl ExitStatusError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Takes the code from `error` and keeps it as the source.
    pub fn wrap<E>(error: E) -> Self
    where
        E: ExitCodeGenerator + Error + 'static,
    {
        Self {
            code: error.exit_code(),
            message: error.to_string(),
            source: Some(Box::new(error)),
        }
    }
}

impl ExitCodeGenerator for ExitStatusError {
    fn exit_code(&self) -> i32 {
        self.code
    }
}

/// Combines candidate codes: largest positive, else smallest negative, else 0.
pub fn resolve_candidates(candidates: impl IntoIterator<Item = i32>) -> i32 {
    let (mut positive, mut negative) = (None::<i32>, None::<i32>);
    for code in candidates {
        if code > 0 {
            positive = Some(positive.map_or(code, |p| p.max(code)));
        } else if code < 0 {
            negative = Some(negative.map_or(code, |n| n.min(code)));
        }
    }
    positive.or(negative).unwrap_or(0)
}

/// Ordered collection of generators.
#[derive(Default, Clone)]
pub struct ExitCodeGenerators {
    generators: Vec<Arc<dyn ExitCodeGenerator>>,
}

impl ExitCodeGenerators {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, generator: Arc<dyn ExitCodeGenerator>) {
        self.generators.push(generator);
    }

    pub fn add_all(&mut self, generators: impl IntoIterator<Item = Arc<dyn ExitCodeGenerator>>) {
        self.generators.extend(generators);
    }

    /// Adds one generator per mapper, each yielding the mapper's code for `error`.
    pub fn add_mapped(
        &mut self,
        error: &(dyn Error + 'static),
        mappers: &[Arc<dyn ExitCodeExceptionMapper>],
    ) {
        for mapper in mappers {
            self.generators.push(Arc::new(mapper.exit_code(error)));
        }
    }

    pub fn len(&self) -> usize {
        self.generators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.generators.is_empty()
    }

    pub fn exit_code(&self) -> i32 {
        resolve_candidates(self.generators.iter().map(|g| g.exit_code()))
    }
}

/// Resolves the exit code for a run failure.
///
/// Mappers registered in the container are consulted first, but only if the
/// container exists and is active. If none claims the failure, the cause
/// chain is searched for an [`ExitStatusError`], the outermost one winning.
/// Other error types are not inspected, even when they implement
/// [`ExitCodeGenerator`]. Returns 0 if nothing matches.
pub fn resolve_exit_code(context: Option<&SharedContext>, error: &(dyn Error + 'static)) -> i32 {
    let mapped = match context.filter(|c| c.is_active()) {
        Some(context) => {
            let mut generators = ExitCodeGenerators::new();
            generators.add_mapped(error, &context.exit_code_mappers());
            generators.exit_code()
        }
        None => 0,
    };
    if mapped != 0 {
        return mapped;
    }

    let mut current = Some(error);
    while let Some(e) = current {
        if let Some(status) = e.downcast_ref::<ExitStatusError>() {
            return status.code;
        }
        current = e.source();
    }
    0
}

/// Exit code for a graceful shutdown of `context`.
///
/// Combines `generators` with the generator beans of the container, publishes
/// an [`ApplicationEvent::ExitCode`] when the result is non-zero, then closes
/// the container. If publishing or closing fails the error is logged and the
/// result is at least 1.
pub fn exit(context: &SharedContext, generators: &[Arc<dyn ExitCodeGenerator>]) -> i32 {
    let mut all = ExitCodeGenerators::new();
    all.add_all(generators.iter().cloned());
    all.add_all(context.exit_code_generators());
    let code = all.exit_code();
    debug!(context = context.id(), code, "Resolved exit code");

    let published = if code != 0 {
        context.publish_event(&ApplicationEvent::ExitCode(code))
    } else {
        Ok(())
    };
    let closed = context.close();

    match published.and(closed) {
        Ok(()) => code,
        Err(e) => {
            error!(context = context.id(), error = %e, "Failed to exit cleanly");
            if code != 0 {
                code
            } else {
                1
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ApplicationContext, ApplicationKind, Bean, DefinitionRegistry, GenericContext};
    use crate::error::{BoxError, LaunchError};

    #[test]
    fn positive_codes_beat_negative_ones() {
        assert_eq!(resolve_candidates([3, -7, 12, 0, -1]), 12);
        assert_eq!(resolve_candidates([-3, -7, -1]), -7);
        assert_eq!(resolve_candidates([0, 0]), 0);
        assert_eq!(resolve_candidates(Vec::new()), 0);
    }

    #[test]
    fn cause_chain_is_searched_for_an_exit_status() {
        let err = LaunchError::Runner {
            runner: "CommandLineRunner",
            source: Box::new(ExitStatusError::new(42, "quit")),
        };
        assert_eq!(resolve_exit_code(None, &err), 42);

        let plain = LaunchError::NoSources;
        assert_eq!(resolve_exit_code(None, &plain), 0);
    }

    #[derive(Debug, thiserror::Error)]
    #[error("quota exceeded")]
    struct QuotaError;

    impl ExitCodeGenerator for QuotaError {
        fn exit_code(&self) -> i32 {
            9
        }
    }

    #[test]
    fn generator_errors_count_once_wrapped() {
        let bare = LaunchError::Runner {
            runner: "ApplicationRunner",
            source: Box::new(QuotaError),
        };
        assert_eq!(resolve_exit_code(None, &bare), 0);

        let wrapped = LaunchError::Runner {
            runner: "ApplicationRunner",
            source: Box::new(ExitStatusError::wrap(QuotaError)),
        };
        assert_eq!(resolve_exit_code(None, &wrapped), 9);

        let status = ExitStatusError::wrap(QuotaError);
        assert_eq!(status.to_string(), "quota exceeded (exit code 9)");
        let source = std::error::Error::source(&status).unwrap();
        assert!(source.downcast_ref::<QuotaError>().is_some());
    }

    #[test]
    fn mappers_only_apply_to_an_active_container() {
        let context = GenericContext::new(ApplicationKind::Standalone);
        context
            .register_bean("mapper", Bean::exit_code_mapper(|_: &(dyn Error + 'static)| 9))
            .unwrap();
        let context: SharedContext = Arc::new(context);
        let err = LaunchError::Runner {
            runner: "ApplicationRunner",
            source: Box::new(ExitStatusError::new(4, "inner")),
        };

        assert_eq!(resolve_exit_code(Some(&context), &err), 4);
        context.refresh().unwrap();
        assert_eq!(resolve_exit_code(Some(&context), &err), 9);
    }

    #[test]
    fn exit_combines_generators_and_closes() {
        let context = GenericContext::new(ApplicationKind::Standalone);
        context
            .register_bean("gen", Bean::exit_code_generator(5))
            .unwrap();
        let context: SharedContext = Arc::new(context);
        context.refresh().unwrap();

        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = seen.clone();
        context.add_application_listener(Arc::new(move |event: &ApplicationEvent| -> Result<(), BoxError> {
            sink.lock().push(event.clone());
            Ok(())
        }));

        let extra: [Arc<dyn ExitCodeGenerator>; 2] = [Arc::new(-2_i32), Arc::new(3_i32)];
        let code = exit(&context, &extra);
        assert_eq!(code, 5);
        assert!(!context.is_active());
        assert_eq!(seen.lock()[0], ApplicationEvent::ExitCode(5));
    }
}
