//! Event-level protocol on top of a [`Transport`].
//!
//! [`MasterLink`] turns named events into request payloads and classifies the
//! master's replies: `die` becomes [`MasterTerminated`], `ack` becomes `None`,
//! anything else is handed back unchanged.

use anyhow::{Context, Result};
use serde_json::{Map, Value, json};
use tracing::{info, trace};

use crate::core::errors::{MasterTerminated, ProtocolError};
use crate::core::report::{TestReport, serialize_report};
use crate::core::types::{EVENT_NAME_KEY, EventName, Location, NodeId, Reply};
use crate::io::channel::Transport;
use crate::io::engine::RunReporter;

/// Sole owner of the worker's request/reply sequence.
pub struct MasterLink<T: Transport> {
    transport: T,
}

impl<T: Transport> MasterLink<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Send `{"_event_name": name, **payload}` and wait for exactly one reply.
    pub fn send_event(
        &mut self,
        name: EventName,
        mut payload: Map<String, Value>,
    ) -> Result<Option<Value>> {
        payload.insert(EVENT_NAME_KEY.to_string(), json!(name.as_str()));
        trace!(event = %name, payload = ?payload, "sending event");

        let raw = self
            .transport
            .request(&Value::Object(payload))
            .with_context(|| format!("send {name}"))?;

        match Reply::classify(raw) {
            Reply::Die => {
                info!(event = %name, "instructed to die by master; shutting down");
                Err(MasterTerminated.into())
            }
            Reply::Ack => {
                trace!(event = %name, "received ack");
                Ok(None)
            }
            Reply::Value(value) => {
                trace!(event = %name, reply = ?value, "received reply");
                Ok(Some(value))
            }
        }
    }

    /// Send a line of text for the master to print on its console.
    pub fn message(&mut self, text: &str, markup: Map<String, Value>) -> Result<()> {
        let mut payload = Map::new();
        payload.insert("message".to_string(), json!(text));
        payload.insert("markup".to_string(), Value::Object(markup));
        self.send_event(EventName::Message, payload)?;
        Ok(())
    }

    /// Ask for the next batch. An empty vector means the master has no more work.
    pub fn need_tests(&mut self) -> Result<Vec<NodeId>> {
        let reply = self.send_event(EventName::NeedTests, Map::new())?;
        parse_batch(reply)
    }
}

/// Interpret a `need_tests` reply. Falsy values end the pull loop.
pub fn parse_batch(reply: Option<Value>) -> Result<Vec<NodeId>> {
    let value = match reply {
        None => return Ok(Vec::new()),
        Some(value) if is_falsy(&value) => return Ok(Vec::new()),
        Some(value) => value,
    };
    let unexpected = |value: &Value| ProtocolError::UnexpectedReply {
        event: EventName::NeedTests.as_str(),
        reply: value.to_string(),
    };
    let Value::Array(entries) = &value else {
        return Err(unexpected(&value).into());
    };
    entries
        .iter()
        .map(|entry| {
            entry
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| anyhow::Error::from(unexpected(&value)))
        })
        .collect()
}

fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
    }
}

impl<T: Transport> RunReporter for MasterLink<T> {
    fn on_run_start(&mut self, nodeid: &str, location: &Location) -> Result<()> {
        let mut payload = Map::new();
        payload.insert("nodeid".to_string(), json!(nodeid));
        payload.insert("location".to_string(), json!(location));
        self.send_event(EventName::RuntestLogstart, payload)?;
        Ok(())
    }

    fn on_report(&mut self, report: &TestReport) -> Result<()> {
        let mut payload = Map::new();
        payload.insert("report".to_string(), serialize_report(report));
        self.send_event(EventName::RuntestLogreport, payload)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::is_terminated;
    use crate::test_support::ScriptedTransport;

    #[test]
    fn ack_returns_none_and_values_round_trip() {
        let mut link = MasterLink::new(ScriptedTransport::new(vec![
            json!("ack"),
            json!({"anything": [1, 2]}),
        ]));

        assert_eq!(link.send_event(EventName::Shutdown, Map::new()).expect("send"), None);
        assert_eq!(
            link.send_event(EventName::Message, Map::new()).expect("send"),
            Some(json!({"anything": [1, 2]}))
        );
    }

    #[test]
    fn die_raises_termination_and_stops_sending() {
        let mut link = MasterLink::new(ScriptedTransport::new(vec![json!("die"), json!("ack")]));

        let err = link.send_event(EventName::NeedTests, Map::new()).unwrap_err();
        assert!(is_terminated(&err));
        assert_eq!(link.transport().sent().len(), 1);
    }

    #[test]
    fn payload_carries_event_name() {
        let mut link = MasterLink::new(ScriptedTransport::new(vec![json!("ack")]));
        link.message("hello", Map::new()).expect("message");

        assert_eq!(
            link.transport().sent()[0],
            json!({"_event_name": "message", "message": "hello", "markup": {}})
        );
    }

    #[test]
    fn falsy_batches_are_empty() {
        for reply in [json!(null), json!(false), json!([]), json!(""), json!(0)] {
            assert!(parse_batch(Some(reply)).expect("parse").is_empty());
        }
        assert!(parse_batch(None).expect("parse").is_empty());
    }

    #[test]
    fn malformed_batch_is_a_protocol_error() {
        let err = parse_batch(Some(json!(["a", 3]))).unwrap_err();
        assert!(err.downcast_ref::<ProtocolError>().is_some());
        let err = parse_batch(Some(json!({"tests": ["a"]}))).unwrap_err();
        assert!(err.to_string().contains("need_tests"));
    }
}
