//! Request/reply channel to the master.
//!
//! The [`Transport`] trait decouples the coordinator from the wire. Tests use a
//! scripted transport that returns predetermined replies and records every
//! request.

use std::io::{BufRead, BufReader, BufWriter, Write};
use std::net::TcpStream;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::core::errors::TransportError;

/// Key carrying the worker's identity on every request.
pub const WORKER_ID_KEY: &str = "_worker_id";

/// Strict request/reply transport: one outstanding request at a time.
pub trait Transport {
    /// Send one request and block until its reply arrives.
    fn request(&mut self, payload: &Value) -> Result<Value>;
}

/// Newline-delimited JSON over a single TCP connection.
pub struct TcpTransport {
    worker_id: String,
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
}

impl TcpTransport {
    /// Connect once. There is no reconnection: a broken connection is fatal.
    #[instrument(skip_all, fields(endpoint = %endpoint, worker_id = %worker_id))]
    pub fn connect(endpoint: &str, worker_id: &str, read_timeout: Option<Duration>) -> Result<Self> {
        debug!("connecting to master");
        let stream =
            TcpStream::connect(endpoint).with_context(|| format!("connect to master {endpoint}"))?;
        stream.set_nodelay(true).context("set TCP_NODELAY")?;
        stream
            .set_read_timeout(read_timeout)
            .context("set read timeout")?;
        let reader = BufReader::new(stream.try_clone().context("clone master stream")?);
        let writer = BufWriter::new(stream);
        Ok(Self {
            worker_id: worker_id.to_string(),
            reader,
            writer,
        })
    }
}

impl Transport for TcpTransport {
    fn request(&mut self, payload: &Value) -> Result<Value> {
        let mut envelope = payload.clone();
        if let Some(map) = envelope.as_object_mut() {
            map.insert(
                WORKER_ID_KEY.to_string(),
                Value::String(self.worker_id.clone()),
            );
        }
        let mut line = serde_json::to_string(&envelope).context("serialize request")?;
        line.push('\n');
        self.writer
            .write_all(line.as_bytes())
            .and_then(|()| self.writer.flush())
            .map_err(|source| TransportError::Io {
                op: "write request",
                source,
            })?;

        let mut reply = String::new();
        let n = self
            .reader
            .read_line(&mut reply)
            .map_err(|source| TransportError::Io {
                op: "read reply",
                source,
            })?;
        if n == 0 {
            return Err(TransportError::Disconnected.into());
        }
        let value = serde_json::from_str(reply.trim_end())
            .map_err(|source| TransportError::MalformedReply { source })?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::is_channel_broken;
    use serde_json::json;
    use std::net::TcpListener;
    use std::thread;

    /// Verifies one request line goes out (with identity) and one reply line comes back.
    #[test]
    fn tcp_transport_round_trips_one_request() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        let master = thread::spawn(move || {
            let (stream, _) = listener.accept().expect("accept");
            let mut reader = BufReader::new(stream.try_clone().expect("clone"));
            let mut line = String::new();
            reader.read_line(&mut line).expect("read");
            let mut stream = stream;
            stream.write_all(b"[\"a\",\"b\"]\n").expect("write");
            serde_json::from_str::<Value>(&line).expect("parse")
        });

        let mut transport = TcpTransport::connect(&addr.to_string(), "w1", None).expect("connect");
        let reply = transport
            .request(&json!({"_event_name": "need_tests"}))
            .expect("request");
        assert_eq!(reply, json!(["a", "b"]));

        let seen = master.join().expect("master thread");
        assert_eq!(seen, json!({"_event_name": "need_tests", "_worker_id": "w1"}));
    }

    #[test]
    fn tcp_transport_reports_disconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        let master = thread::spawn(move || {
            let (stream, _) = listener.accept().expect("accept");
            drop(stream);
        });

        let mut transport = TcpTransport::connect(&addr.to_string(), "w1", None).expect("connect");
        master.join().expect("master thread");
        // Either a clean EOF or a reset, depending on timing; both are fatal.
        let err = transport
            .request(&json!({"_event_name": "shutdown"}))
            .unwrap_err();
        assert!(is_channel_broken(&err));
    }

    #[test]
    fn tcp_transport_rejects_malformed_reply() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        let master = thread::spawn(move || {
            let (stream, _) = listener.accept().expect("accept");
            let mut reader = BufReader::new(stream.try_clone().expect("clone"));
            let mut line = String::new();
            reader.read_line(&mut line).expect("read");
            let mut stream = stream;
            stream.write_all(b"this is not json\n").expect("write");
        });

        let mut transport = TcpTransport::connect(&addr.to_string(), "w1", None).expect("connect");
        let err = transport
            .request(&json!({"_event_name": "need_tests"}))
            .unwrap_err();
        master.join().expect("master thread");
        assert!(matches!(
            err.downcast_ref::<TransportError>(),
            Some(TransportError::MalformedReply { .. })
        ));
    }
}
