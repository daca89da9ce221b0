//! Process-wide run context, built once at startup and passed explicitly.

use std::process::Command;

pub const ENV_WORKER_ID: &str = "PARALLELIZER_WORKER_ID";
pub const ENV_BASE_URL: &str = "PARALLELIZER_BASE_URL";
pub const ENV_TS: &str = "PARALLELIZER_TS";
pub const ENV_NEXT_NODEID: &str = "PARALLELIZER_NEXT_NODEID";

/// Identity of this worker within the parallel session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    pub worker_id: String,
    /// URL of the system under test assigned to this worker, if any.
    pub base_url: Option<String>,
    /// Session timestamp shared by the master and all workers.
    pub ts: Option<String>,
}

impl RunContext {
    pub fn new(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            base_url: None,
            ts: None,
        }
    }

    /// Export the context to a child command's environment.
    pub fn apply_env(&self, cmd: &mut Command) {
        cmd.env(ENV_WORKER_ID, &self.worker_id);
        if let Some(base_url) = &self.base_url {
            cmd.env(ENV_BASE_URL, base_url);
        }
        if let Some(ts) = &self.ts {
            cmd.env(ENV_TS, ts);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsStr;

    #[test]
    fn apply_env_sets_only_known_values() {
        let ctx = RunContext {
            base_url: Some("https://appliance-1".to_string()),
            ..RunContext::new("w3")
        };
        let mut cmd = Command::new("true");
        ctx.apply_env(&mut cmd);

        let envs: Vec<(&OsStr, Option<&OsStr>)> = cmd.get_envs().collect();
        assert!(envs.contains(&(OsStr::new(ENV_WORKER_ID), Some(OsStr::new("w3")))));
        assert!(envs.contains(&(
            OsStr::new(ENV_BASE_URL),
            Some(OsStr::new("https://appliance-1"))
        )));
        assert!(!envs.iter().any(|(key, _)| *key == OsStr::new(ENV_TS)));
    }
}
