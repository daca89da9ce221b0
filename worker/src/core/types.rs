//! Shared types for the worker/master protocol.
//!
//! These types define the stable contract between the coordinator and the
//! master. They carry no I/O and serialize deterministically.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opaque, globally unique name of one collected test.
pub type NodeId = String;

/// Key under which the event name travels in every request payload.
pub const EVENT_NAME_KEY: &str = "_event_name";

/// Literal reply meaning "received, nothing to return".
pub const ACK: &str = "ack";

/// Literal reply instructing the worker to exit immediately.
pub const DIE: &str = "die";

/// Events a worker sends to the master.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventName {
    #[serde(rename = "collectionfinish")]
    CollectionFinish,
    RuntestLogstart,
    RuntestLogreport,
    #[serde(rename = "internalerror")]
    InternalError,
    NeedTests,
    Message,
    Shutdown,
}

impl EventName {
    pub fn as_str(self) -> &'static str {
        match self {
            EventName::CollectionFinish => "collectionfinish",
            EventName::RuntestLogstart => "runtest_logstart",
            EventName::RuntestLogreport => "runtest_logreport",
            EventName::InternalError => "internalerror",
            EventName::NeedTests => "need_tests",
            EventName::Message => "message",
            EventName::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified master reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Ack,
    Die,
    /// Any other value, passed back to the caller unchanged.
    Value(Value),
}

impl Reply {
    pub fn classify(raw: Value) -> Self {
        match raw.as_str() {
            Some(ACK) => Reply::Ack,
            Some(DIE) => Reply::Die,
            _ => Reply::Value(raw),
        }
    }
}

/// Source location of a collected test: `(path, line, domain)`.
///
/// Serializes as a three-element array, matching what the master expects in
/// `runtest_logstart` and report payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location(pub String, pub Option<u32>, pub String);

impl Location {
    /// Derive a location from a node id of the form `path::Class::test`.
    ///
    /// The line number is unknown for ids produced by an external collector.
    pub fn from_nodeid(nodeid: &str) -> Self {
        match nodeid.split_once("::") {
            Some((path, rest)) => Location(path.to_string(), None, rest.replace("::", ".")),
            None => Location(nodeid.to_string(), None, nodeid.to_string()),
        }
    }

    pub fn path(&self) -> &str {
        &self.0
    }
}

/// One locally collected test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestItem {
    pub nodeid: NodeId,
    pub location: Location,
}

impl TestItem {
    pub fn new(nodeid: impl Into<NodeId>) -> Self {
        let nodeid = nodeid.into();
        let location = Location::from_nodeid(&nodeid);
        Self { nodeid, location }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_names_match_wire_names() {
        for name in [
            EventName::CollectionFinish,
            EventName::RuntestLogstart,
            EventName::RuntestLogreport,
            EventName::InternalError,
            EventName::NeedTests,
            EventName::Message,
            EventName::Shutdown,
        ] {
            let wire = serde_json::to_value(name).expect("serialize");
            assert_eq!(wire, json!(name.as_str()));
        }
    }

    #[test]
    fn classify_sentinels_and_values() {
        assert_eq!(Reply::classify(json!("ack")), Reply::Ack);
        assert_eq!(Reply::classify(json!("die")), Reply::Die);
        assert_eq!(
            Reply::classify(json!(["a", "b"])),
            Reply::Value(json!(["a", "b"]))
        );
        // Only the exact literal counts as a sentinel.
        assert_eq!(Reply::classify(json!("DIE")), Reply::Value(json!("DIE")));
    }

    #[test]
    fn location_from_nodeid_splits_path_and_domain() {
        let loc = Location::from_nodeid("tests/test_vm.py::TestPower::test_start");
        assert_eq!(loc.path(), "tests/test_vm.py");
        assert_eq!(loc.2, "TestPower.test_start");
        assert_eq!(
            serde_json::to_value(&loc).expect("serialize"),
            json!(["tests/test_vm.py", null, "TestPower.test_start"])
        );
    }
}
