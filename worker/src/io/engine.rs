//! Test execution engine abstraction.
//!
//! The [`TestEngine`] trait decouples the coordinator from how a single test is
//! actually run. The engine reports lifecycle events through a [`RunReporter`];
//! tests use a recording engine that never spawns processes.

use std::process::Command;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tracing::{debug, instrument, warn};

use crate::context::{ENV_NEXT_NODEID, RunContext};
use crate::core::report::{LongRepr, Outcome, Phase, TestReport};
use crate::core::types::{Location, TestItem};
use crate::io::process::{CommandOutput, run_command_with_timeout};

pub const NODEID_PLACEHOLDER: &str = "{nodeid}";

/// Exit status used by pytest-style runners when nothing ran.
const EXIT_NO_TESTS: i32 = 5;
const FAILURE_TAIL_LINES: usize = 40;

/// Receives per-test lifecycle events from the engine.
pub trait RunReporter {
    fn on_run_start(&mut self, nodeid: &str, location: &Location) -> Result<()>;
    fn on_report(&mut self, report: &TestReport) -> Result<()>;
}

/// Runs one test. `next` is the test that will run afterwards, if known, so the
/// engine can keep shared fixtures alive across the two.
pub trait TestEngine {
    fn run_protocol(
        &mut self,
        item: &TestItem,
        next: Option<&TestItem>,
        reporter: &mut dyn RunReporter,
    ) -> Result<()>;
}

/// Engine that runs each test as an external command.
pub struct CommandEngine {
    pub command: Vec<String>,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
    pub ctx: RunContext,
}

impl CommandEngine {
    fn build_command(&self, item: &TestItem, next: Option<&TestItem>) -> Result<Command> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("run command is empty"))?;
        let mut cmd = Command::new(program);
        let mut substituted = false;
        for arg in args {
            if arg.contains(NODEID_PLACEHOLDER) {
                substituted = true;
                cmd.arg(arg.replace(NODEID_PLACEHOLDER, &item.nodeid));
            } else {
                cmd.arg(arg);
            }
        }
        if !substituted {
            cmd.arg(&item.nodeid);
        }
        self.ctx.apply_env(&mut cmd);
        match next {
            Some(next) => cmd.env(ENV_NEXT_NODEID, &next.nodeid),
            None => cmd.env_remove(ENV_NEXT_NODEID),
        };
        Ok(cmd)
    }
}

impl TestEngine for CommandEngine {
    #[instrument(skip_all, fields(nodeid = %item.nodeid, next = ?next.map(|n| &n.nodeid)))]
    fn run_protocol(
        &mut self,
        item: &TestItem,
        next: Option<&TestItem>,
        reporter: &mut dyn RunReporter,
    ) -> Result<()> {
        reporter.on_run_start(&item.nodeid, &item.location)?;

        let cmd = self.build_command(item, next)?;
        let report = match run_command_with_timeout(cmd, self.timeout, self.output_limit_bytes) {
            Ok(output) => report_from_output(item, &output, self.timeout),
            Err(err) => {
                warn!(err = %format!("{err:#}"), "test command could not run");
                let mut report =
                    TestReport::new(&item.nodeid, item.location.clone(), Phase::Call, Outcome::Failed);
                report.longrepr = Some(LongRepr::Text(format!("{err:#}")));
                report
            }
        };
        debug!(outcome = ?report.outcome, duration = report.duration, "test finished");
        reporter.on_report(&report)
    }
}

/// Classify a finished test command into a call-phase report.
pub fn report_from_output(item: &TestItem, output: &CommandOutput, timeout: Duration) -> TestReport {
    let outcome = if output.timed_out {
        Outcome::Failed
    } else if output.status.success() {
        Outcome::Passed
    } else if output.status.code() == Some(EXIT_NO_TESTS) {
        Outcome::Skipped
    } else {
        Outcome::Failed
    };

    let mut report = TestReport::new(&item.nodeid, item.location.clone(), Phase::Call, outcome);
    report.duration = output.elapsed.as_secs_f64();
    report.longrepr = match outcome {
        Outcome::Passed => None,
        _ if output.timed_out => Some(LongRepr::Text(format!(
            "test timed out after {}s",
            timeout.as_secs()
        ))),
        _ => Some(LongRepr::Text(output.tail(FAILURE_TAIL_LINES))),
    };
    if !output.stdout.is_empty() {
        report
            .sections
            .push(("Captured stdout call".to_string(), output.stdout_text()));
    }
    if !output.stderr.is_empty() {
        report
            .sections
            .push(("Captured stderr call".to_string(), output.stderr_text()));
    }
    report
}
