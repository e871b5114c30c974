//! Exception reporters: plugins that present a run failure to the user.
//!
//! Reporters run in precedence order after a failure; the first one that
//! claims the failure stops the chain and suppresses the default log output.

use std::any::type_name;
use std::error::Error;

use crate::context::SharedContext;
use crate::plugin::Capability;

pub trait ExceptionReporter: Send + Sync {
    fn order(&self) -> Option<i32> {
        None
    }

    fn name(&self) -> &'static str {
        type_name::<Self>()
    }

    /// Reports `failure`. Returns true if the failure was reported.
    fn report(&self, failure: &(dyn Error + 'static)) -> bool;
}

/// What every [`ExceptionReporter`] factory receives.
#[derive(Clone, Default)]
pub struct ReporterArgs {
    /// The container, if the failure happened after it was created.
    pub context: Option<SharedContext>,
}

/// Catalog capability for [`ExceptionReporter`]s.
pub struct ExceptionReporters;

impl Capability for ExceptionReporters {
    type Args = ReporterArgs;
    type Plugin = dyn ExceptionReporter;
    const NAME: &'static str = "ExceptionReporter";

    fn order_of(reporter: &dyn ExceptionReporter) -> Option<i32> {
        reporter.order()
    }
}
