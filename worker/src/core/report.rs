//! Test reports and their transport-safe serialization.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::core::types::{Location, NodeId};

/// Phase of the test protocol a report describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Setup,
    Call,
    Teardown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Passed,
    Failed,
    Skipped,
}

/// Rendered failure with enough structure to print a terminal-style block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureRepr {
    pub summary: String,
    pub lines: Vec<String>,
}

impl fmt::Display for FailureRepr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.lines {
            writeln!(f, "{line}")?;
        }
        write!(f, "E   {}", self.summary)
    }
}

/// Long representation of a failure or skip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LongRepr {
    Text(String),
    Failure(FailureRepr),
}

/// Outcome of one test phase, as produced by the execution engine.
pub struct TestReport {
    pub nodeid: NodeId,
    pub location: Location,
    pub when: Phase,
    pub outcome: Outcome,
    pub longrepr: Option<LongRepr>,
    pub duration: f64,
    /// Captured output, e.g. `("Captured stdout call", "...")`.
    pub sections: Vec<(String, String)>,
    pub fspath: Option<PathBuf>,
    pub keywords: BTreeMap<String, Value>,
    pub user_properties: Vec<(String, Value)>,
    /// In-process result object; never leaves the worker.
    pub result: Option<Box<dyn Any + Send>>,
}

impl fmt::Debug for TestReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestReport")
            .field("nodeid", &self.nodeid)
            .field("when", &self.when)
            .field("outcome", &self.outcome)
            .field("duration", &self.duration)
            .field("has_result", &self.result.is_some())
            .finish_non_exhaustive()
    }
}

impl TestReport {
    pub fn new(nodeid: impl Into<NodeId>, location: Location, when: Phase, outcome: Outcome) -> Self {
        Self {
            nodeid: nodeid.into(),
            location,
            when,
            outcome,
            longrepr: None,
            duration: 0.0,
            sections: Vec::new(),
            fspath: None,
            keywords: BTreeMap::new(),
            user_properties: Vec::new(),
            result: None,
        }
    }
}

/// Convert a report into a JSON object the master can consume.
///
/// Rendered failures and paths become strings. The raw `result` object is
/// always sent as `null`.
pub fn serialize_report(report: &TestReport) -> Value {
    let longrepr = match &report.longrepr {
        None => Value::Null,
        Some(LongRepr::Text(text)) => Value::String(text.clone()),
        Some(LongRepr::Failure(failure)) => Value::String(failure.to_string()),
    };

    let mut map = Map::new();
    map.insert("nodeid".to_string(), json!(report.nodeid));
    map.insert("location".to_string(), json!(report.location));
    map.insert("when".to_string(), json!(report.when));
    map.insert("outcome".to_string(), json!(report.outcome));
    map.insert("longrepr".to_string(), longrepr);
    map.insert("duration".to_string(), json!(report.duration));
    map.insert("sections".to_string(), json!(report.sections));
    map.insert(
        "fspath".to_string(),
        report
            .fspath
            .as_ref()
            .map(|path| Value::String(path.display().to_string()))
            .unwrap_or(Value::Null),
    );
    map.insert("keywords".to_string(), json!(report.keywords));
    map.insert("user_properties".to_string(), json!(report.user_properties));
    map.insert("result".to_string(), Value::Null);
    Value::Object(map)
}
