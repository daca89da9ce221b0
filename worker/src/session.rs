//! Drive one worker session: collect, announce, run, shut down.

use anyhow::{Context, Result};
use tracing::warn;

use crate::coordinator::{RunSummary, SessionHooks};
use crate::core::errors::{is_channel_broken, is_terminated};
use crate::io::collect::Collector;
use crate::io::engine::TestEngine;

/// Run a full session against the master.
///
/// A `die` reply anywhere aborts immediately with [`MasterTerminated`] and
/// skips every remaining step. A [`TransportError`] does the same: the channel
/// is out of step, so nothing more is sent on it. Any other failure is reported
/// to the master as an internal error, followed by a best-effort shutdown,
/// before propagating.
///
/// [`MasterTerminated`]: crate::core::errors::MasterTerminated
/// [`TransportError`]: crate::core::errors::TransportError
pub fn run_session<H, C, E>(hooks: &mut H, collector: &C, engine: &mut E) -> Result<RunSummary>
where
    H: SessionHooks,
    C: Collector,
    E: TestEngine,
{
    let outcome = collect_and_run(hooks, collector, engine);
    let summary = match outcome {
        Ok(summary) => summary,
        Err(err) if is_terminated(&err) || is_channel_broken(&err) => return Err(err),
        Err(err) => {
            if let Err(report_err) = hooks.on_internal_error(&error_text(&err)) {
                if is_terminated(&report_err) {
                    return Err(report_err);
                }
                if is_channel_broken(&report_err) {
                    warn!(err = %format!("{report_err:#}"), "channel to master broke while reporting internal error");
                    return Err(err);
                }
                warn!(err = %format!("{report_err:#}"), "could not report internal error to master");
            }
            hooks.on_session_finish()?;
            return Err(err);
        }
    };
    hooks.on_session_finish()?;
    Ok(summary)
}

/// Full error chain, outermost context first, one cause per line.
fn error_text(err: &anyhow::Error) -> String {
    err.chain()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

fn collect_and_run<H, C, E>(hooks: &mut H, collector: &C, engine: &mut E) -> Result<RunSummary>
where
    H: SessionHooks,
    C: Collector,
    E: TestEngine,
{
    let items = collector.collect().context("collect tests")?;
    hooks.on_collection_finished(items)?;
    hooks.on_run_loop(engine)
}
