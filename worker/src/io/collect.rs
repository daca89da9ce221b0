//! Local test collection.

use std::process::Command;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tracing::{debug, info, instrument};

use crate::context::RunContext;
use crate::core::types::TestItem;
use crate::io::process::run_command_with_timeout;

const COLLECT_TIMEOUT: Duration = Duration::from_secs(30 * 60);
const COLLECT_OUTPUT_LIMIT_BYTES: usize = 16 * 1024 * 1024;

/// Produces the ordered list of locally runnable tests.
pub trait Collector {
    fn collect(&self) -> Result<Vec<TestItem>>;
}

/// Collector that runs an external command printing one node id per line.
pub struct CommandCollector {
    pub command: Vec<String>,
    pub ctx: RunContext,
}

impl Collector for CommandCollector {
    #[instrument(skip_all, fields(program = ?self.command.first()))]
    fn collect(&self) -> Result<Vec<TestItem>> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("collect command is empty"))?;
        let mut cmd = Command::new(program);
        cmd.args(args);
        self.ctx.apply_env(&mut cmd);

        let output = run_command_with_timeout(cmd, COLLECT_TIMEOUT, COLLECT_OUTPUT_LIMIT_BYTES)?;
        if output.timed_out {
            return Err(anyhow!("collection timed out after {:?}", COLLECT_TIMEOUT));
        }
        if !output.status.success() {
            return Err(anyhow!(
                "collection failed with status {:?}: {}",
                output.status.code(),
                output.tail(5)
            ));
        }
        if output.stdout_truncated > 0 {
            return Err(anyhow!(
                "collection output exceeded {} bytes",
                COLLECT_OUTPUT_LIMIT_BYTES
            ));
        }

        let items = parse_node_ids(&String::from_utf8_lossy(&output.stdout));
        info!(count = items.len(), "collected tests");
        Ok(items)
    }
}

/// Parse collector output: one node id per line.
///
/// Blank lines and summary lines (e.g. `12 tests collected in 0.3s`) are skipped.
pub fn parse_node_ids(stdout: &str) -> Vec<TestItem> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| {
            let summary = line.contains(" collected") || line.starts_with("no tests ran");
            if summary {
                debug!(line, "skipping collector summary line");
            }
            !summary
        })
        .map(TestItem::new)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_skips_blank_and_summary_lines() {
        let stdout = "tests/a.py::test_one\n\ntests/a.py::test_two\n\n2 tests collected in 0.01s\n";
        let ids: Vec<String> = parse_node_ids(stdout)
            .into_iter()
            .map(|item| item.nodeid)
            .collect();
        assert_eq!(ids, vec!["tests/a.py::test_one", "tests/a.py::test_two"]);
    }

    #[cfg(unix)]
    #[test]
    fn command_collector_runs_command() {
        let collector = CommandCollector {
            command: vec![
                "sh".to_string(),
                "-c".to_string(),
                "echo \"t.py::a-$PARALLELIZER_WORKER_ID\"; echo t.py::b".to_string(),
            ],
            ctx: RunContext::new("w1"),
        };
        let items = collector.collect().expect("collect");
        let ids: Vec<&str> = items.iter().map(|item| item.nodeid.as_str()).collect();
        assert_eq!(ids, vec!["t.py::a-w1", "t.py::b"]);
    }

    #[cfg(unix)]
    #[test]
    fn command_collector_fails_on_nonzero_exit() {
        let collector = CommandCollector {
            command: vec!["sh".to_string(), "-c".to_string(), "echo boom >&2; exit 2".to_string()],
            ctx: RunContext::new("w1"),
        };
        let err = collector.collect().unwrap_err();
        assert!(err.to_string().contains("boom"));
    }
}
