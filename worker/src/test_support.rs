//! Test-only doubles for the master channel and the execution engine.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener};
use std::path::PathBuf;
use std::thread;

use anyhow::{Context, Result, anyhow};
use serde_json::Value;

use crate::context::RunContext;
use crate::coordinator::Coordinator;
use crate::core::errors::TransportError;
use crate::core::report::{Outcome, Phase, TestReport, serialize_report};
use crate::core::types::{EVENT_NAME_KEY, Location, TestItem};
use crate::io::channel::Transport;
use crate::io::config::{WorkerConfig, write_config};
use crate::io::engine::{RunReporter, TestEngine};
use crate::io::signal::QuitToken;
use crate::link::MasterLink;

/// Transport that replays scripted master replies and records every request.
///
/// Running out of replies is reported as a plain error, or as a dropped
/// connection when built with [`ScriptedTransport::disconnecting`].
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    replies: VecDeque<Value>,
    sent: Vec<Value>,
    disconnect_when_empty: bool,
}

impl ScriptedTransport {
    pub fn new(replies: Vec<Value>) -> Self {
        Self {
            replies: replies.into(),
            ..Self::default()
        }
    }

    /// Like [`ScriptedTransport::new`], but the master hangs up once the replies run out.
    pub fn disconnecting(replies: Vec<Value>) -> Self {
        Self {
            disconnect_when_empty: true,
            ..Self::new(replies)
        }
    }

    pub fn sent(&self) -> &[Value] {
        &self.sent
    }
}

impl Transport for ScriptedTransport {
    fn request(&mut self, payload: &Value) -> Result<Value> {
        self.sent.push(payload.clone());
        match self.replies.pop_front() {
            Some(reply) => Ok(reply),
            None if self.disconnect_when_empty => Err(TransportError::Disconnected.into()),
            None => Err(anyhow!("scripted master has no reply left")),
        }
    }
}

/// Event names of every request sent so far, in order.
pub fn events(transport: &ScriptedTransport) -> Vec<String> {
    transport
        .sent()
        .iter()
        .map(|req| req[EVENT_NAME_KEY].as_str().unwrap_or_default().to_string())
        .collect()
}

/// Build test items from bare node ids.
pub fn items(ids: &[&str]) -> Vec<TestItem> {
    ids.iter().map(|id| TestItem::new(*id)).collect()
}

/// Coordinator over a scripted transport, executing (not collect-only).
pub fn coordinator(replies: Vec<Value>) -> Coordinator<ScriptedTransport> {
    Coordinator::new(
        MasterLink::new(ScriptedTransport::new(replies)),
        RunContext::new("test-worker"),
        QuitToken::new(),
        false,
    )
}

type RunHook = Box<dyn FnMut(&str)>;

/// Engine that records `(current, next)` pairs instead of running anything.
#[derive(Default)]
pub struct RecordingEngine {
    pairs: Vec<(String, Option<String>)>,
    send_reports: bool,
    on_run: Option<RunHook>,
}

impl RecordingEngine {
    /// Also send `runtest_logstart` and a passed `runtest_logreport` per test.
    pub fn with_reports(mut self) -> Self {
        self.send_reports = true;
        self
    }

    /// Call `hook` with the node id of each test as it "runs".
    pub fn on_run(mut self, hook: impl FnMut(&str) + 'static) -> Self {
        self.on_run = Some(Box::new(hook));
        self
    }

    pub fn pairs(&self) -> Vec<(String, Option<String>)> {
        self.pairs.clone()
    }
}

impl TestEngine for RecordingEngine {
    fn run_protocol(
        &mut self,
        item: &TestItem,
        next: Option<&TestItem>,
        reporter: &mut dyn RunReporter,
    ) -> Result<()> {
        if self.send_reports {
            reporter.on_run_start(&item.nodeid, &item.location)?;
        }
        self.pairs
            .push((item.nodeid.clone(), next.map(|n| n.nodeid.clone())));
        if let Some(hook) = self.on_run.as_mut() {
            hook(&item.nodeid);
        }
        if self.send_reports {
            let report = TestReport::new(
                &item.nodeid,
                item.location.clone(),
                Phase::Call,
                Outcome::Passed,
            );
            reporter.on_report(&report)?;
        }
        Ok(())
    }
}

/// Reporter that keeps serialized reports in memory.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    pub started: Vec<String>,
    pub reports: Vec<Value>,
}

impl RunReporter for RecordingReporter {
    fn on_run_start(&mut self, nodeid: &str, _location: &Location) -> Result<()> {
        self.started.push(nodeid.to_string());
        Ok(())
    }

    fn on_report(&mut self, report: &TestReport) -> Result<()> {
        self.reports.push(serialize_report(report));
        Ok(())
    }
}

/// Temporary directory holding a written `worker.toml`.
pub struct TempConfig {
    pub dir: tempfile::TempDir,
    pub path: PathBuf,
}

/// Write `cfg` to `worker.toml` inside a fresh temp directory.
pub fn temp_config(cfg: &WorkerConfig) -> Result<TempConfig> {
    let dir = tempfile::tempdir().context("create temp dir")?;
    let path = dir.path().join("worker.toml");
    write_config(&path, cfg)?;
    Ok(TempConfig { dir, path })
}

/// Master on a real TCP socket serving one worker connection.
///
/// Replies `ack` to every event except `need_tests` (next scripted batch, then
/// `[]`) and one optional scripted event, answered with `die` or a non-JSON line.
pub struct FakeMaster {
    pub addr: SocketAddr,
    handle: thread::JoinHandle<Result<Vec<Value>>>,
}

/// Non-standard reply the fake master sends for one event name.
#[derive(Debug, Clone)]
enum Special {
    Die(String),
    Garble(String),
}

impl Special {
    fn reply_for(&self, event: &str) -> Option<String> {
        match self {
            Self::Die(name) if name == event => Some("\"die\"".to_string()),
            Self::Garble(name) if name == event => Some("this is not json".to_string()),
            _ => None,
        }
    }
}

impl FakeMaster {
    /// Serve `batches`; reply `die` to the `die_on` event, if given.
    pub fn spawn(batches: Vec<Value>, die_on: Option<&str>) -> Result<Self> {
        Self::start(batches, die_on.map(|name| Special::Die(name.to_string())))
    }

    /// Serve `batches`, but answer the `event` request with a line that is not JSON.
    pub fn spawn_garbling(batches: Vec<Value>, event: &str) -> Result<Self> {
        Self::start(batches, Some(Special::Garble(event.to_string())))
    }

    fn start(batches: Vec<Value>, special: Option<Special>) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").context("bind fake master")?;
        let addr = listener.local_addr().context("fake master addr")?;
        let handle = thread::spawn(move || serve_one(listener, batches.into(), special));
        Ok(Self { addr, handle })
    }

    /// Wait for the worker to disconnect and return every request received.
    pub fn join(self) -> Result<Vec<Value>> {
        self.handle
            .join()
            .map_err(|_| anyhow!("fake master thread panicked"))?
    }
}

fn serve_one(
    listener: TcpListener,
    mut batches: VecDeque<Value>,
    special: Option<Special>,
) -> Result<Vec<Value>> {
    let (stream, _) = listener.accept().context("accept worker")?;
    let mut reader = BufReader::new(stream.try_clone().context("clone stream")?);
    let mut writer = stream;
    let mut received = Vec::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).context("read request")? == 0 {
            return Ok(received);
        }
        let request: Value = serde_json::from_str(&line).context("parse request")?;
        let event = request[EVENT_NAME_KEY].as_str().unwrap_or_default().to_string();
        received.push(request);

        let special_reply = special.as_ref().and_then(|s| s.reply_for(&event));
        let mut out = match special_reply {
            Some(raw) => raw,
            None => {
                let reply = if event == "need_tests" {
                    batches.pop_front().unwrap_or_else(|| Value::Array(Vec::new()))
                } else {
                    Value::from("ack")
                };
                serde_json::to_string(&reply).context("serialize reply")?
            }
        };
        out.push('\n');
        writer.write_all(out.as_bytes()).context("write reply")?;
    }
}
