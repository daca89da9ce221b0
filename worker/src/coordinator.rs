//! Worker coordinator: the single point of contact between this worker and the master.
//!
//! The coordinator records the local collection, pulls node ids from the master
//! one batch at a time, runs them through a [`TestEngine`] as overlapping
//! `(current, next)` pairs, and relays lifecycle events back. It checks the quit
//! token before every test starts and never pre-empts a running one.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use anyhow::{Result, bail};
use serde_json::{Map, Value, json};
use tracing::{debug, error, info, warn};

use crate::context::RunContext;
use crate::core::errors::{UnknownNodeError, is_channel_broken, is_terminated};
use crate::core::pairing::WorkPairer;
use crate::core::report::TestReport;
use crate::core::types::{EventName, Location, NodeId, TestItem};
use crate::io::channel::Transport;
use crate::io::engine::{RunReporter, TestEngine};
use crate::io::signal::QuitToken;
use crate::link::MasterLink;

/// Lifecycle hooks the session driver calls, one per event.
pub trait SessionHooks {
    /// Record the local collection and announce it to the master.
    fn on_collection_finished(&mut self, items: Vec<TestItem>) -> Result<()>;
    fn on_run_start(&mut self, nodeid: &str, location: &Location) -> Result<()>;
    fn on_report(&mut self, report: &TestReport) -> Result<()>;
    /// Log the full error text and forward only its last line.
    fn on_internal_error(&mut self, text: &str) -> Result<()>;
    /// Pull and execute tests until the master runs dry or a quit is requested.
    fn on_run_loop(&mut self, engine: &mut dyn TestEngine) -> Result<RunSummary>;
    fn on_session_finish(&mut self) -> Result<()>;
}

/// Reason why the run loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStop {
    /// The master returned an empty batch.
    Exhausted,
    /// The quit token was set; the pending test (if any) never started.
    QuitRequested,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub executed: usize,
    pub stop: RunStop,
}

pub struct Coordinator<T: Transport> {
    link: MasterLink<T>,
    collection: HashMap<NodeId, TestItem>,
    collected: bool,
    quit: QuitToken,
    collect_only: bool,
    ctx: RunContext,
}

impl<T: Transport> Coordinator<T> {
    pub fn new(link: MasterLink<T>, ctx: RunContext, quit: QuitToken, collect_only: bool) -> Self {
        Self {
            link,
            collection: HashMap::new(),
            collected: false,
            quit,
            collect_only,
            ctx,
        }
    }

    pub fn link(&self) -> &MasterLink<T> {
        &self.link
    }

    pub fn quit_requested(&self) -> bool {
        self.quit.is_requested()
    }

    /// Send a console message to the master.
    pub fn message(&mut self, text: &str) -> Result<()> {
        self.link.message(text, Map::new())
    }

    /// Announce shutdown and set the quit flag.
    ///
    /// Best-effort: only `die` and a broken channel propagate.
    pub fn shutdown(&mut self) -> Result<()> {
        self.quit.request();
        let sent = self
            .link
            .message("shutting down", Map::new())
            .and_then(|()| self.link.send_event(EventName::Shutdown, Map::new()));
        match sent {
            Ok(_) => Ok(()),
            Err(err) if is_terminated(&err) || is_channel_broken(&err) => Err(err),
            Err(err) => {
                warn!(err = %format!("{err:#}"), "could not deliver shutdown to master");
                Ok(())
            }
        }
    }

    fn lookup(&self, nodeid: &str) -> Result<&TestItem> {
        self.collection.get(nodeid).ok_or_else(|| {
            UnknownNodeError {
                nodeid: nodeid.to_string(),
            }
            .into()
        })
    }

    fn execute(
        &mut self,
        engine: &mut dyn TestEngine,
        current: &str,
        next: Option<&str>,
    ) -> Result<()> {
        if self.collect_only {
            return self.link.message(current, Map::new());
        }
        let item = self.lookup(current)?.clone();
        let next_item = next.map(|id| self.lookup(id)).transpose()?.cloned();
        engine.run_protocol(&item, next_item.as_ref(), &mut self.link)
    }

    fn stop_for_quit(&mut self, executed: usize, pending: Option<&NodeId>) -> Result<RunSummary> {
        info!(executed, pending = ?pending, "quit requested, leaving run loop");
        self.message("shutting down after the current test due to quit signal")?;
        Ok(RunSummary {
            executed,
            stop: RunStop::QuitRequested,
        })
    }
}

impl<T: Transport> SessionHooks for Coordinator<T> {
    fn on_collection_finished(&mut self, items: Vec<TestItem>) -> Result<()> {
        debug!(count = items.len(), "collection finished");
        let mut node_ids = Vec::with_capacity(items.len());
        for item in items {
            match self.collection.entry(item.nodeid.clone()) {
                Entry::Occupied(_) => {
                    warn!(nodeid = %item.nodeid, "duplicate node id in collection, keeping first");
                }
                Entry::Vacant(slot) => {
                    node_ids.push(item.nodeid.clone());
                    slot.insert(item);
                }
            }
        }
        self.collected = true;

        let mut payload = Map::new();
        payload.insert("node_ids".to_string(), json!(node_ids));
        self.link.send_event(EventName::CollectionFinish, payload)?;
        Ok(())
    }

    fn on_run_start(&mut self, nodeid: &str, location: &Location) -> Result<()> {
        self.link.on_run_start(nodeid, location)
    }

    fn on_report(&mut self, report: &TestReport) -> Result<()> {
        self.link.on_report(report)
    }

    fn on_internal_error(&mut self, text: &str) -> Result<()> {
        error!("INTERNALERROR> {text}");
        let last_line = text.trim().lines().last().map(str::trim).unwrap_or_default();
        let mut payload = Map::new();
        payload.insert(
            "message".to_string(),
            Value::String(format!("INTERNALERROR> {last_line}")),
        );
        self.link.send_event(EventName::InternalError, payload)?;
        Ok(())
    }

    fn on_run_loop(&mut self, engine: &mut dyn TestEngine) -> Result<RunSummary> {
        if !self.collected {
            bail!("run loop started before collection finished");
        }
        info!(worker_id = %self.ctx.worker_id, "entering run loop");

        let mut pairer = WorkPairer::new();
        let mut executed = 0usize;
        loop {
            if self.quit.is_requested() {
                return self.stop_for_quit(executed, pairer.staged());
            }
            let batch = self.link.need_tests()?;
            if batch.is_empty() {
                break;
            }
            debug!(count = batch.len(), "received batch");
            for nodeid in batch {
                // Validate at pull time so an unknown id never reaches the engine.
                self.lookup(&nodeid)?;
                let Some((current, next)) = pairer.push(nodeid) else {
                    continue;
                };
                // The flag may have been set during the previous test or the last pull.
                if self.quit.is_requested() {
                    return self.stop_for_quit(executed, Some(&current));
                }
                self.execute(engine, &current, next.as_deref())?;
                executed += 1;
            }
        }

        if let Some((current, next)) = pairer.finish() {
            if self.quit.is_requested() {
                return self.stop_for_quit(executed, Some(&current));
            }
            self.execute(engine, &current, next.as_deref())?;
            executed += 1;
        }
        info!(executed, "run loop finished, master has no more tests");
        Ok(RunSummary {
            executed,
            stop: RunStop::Exhausted,
        })
    }

    fn on_session_finish(&mut self) -> Result<()> {
        self.shutdown()
    }
}
