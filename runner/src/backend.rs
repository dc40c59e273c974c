//! External compute backend: JSON Lines over TCP.
//!
//! Request:  `{"predicate": "add", "args": [<term>, ...]}`
//! Response: `{"result": true, "value": <term>}` | `{"result": false}` | `{"error": "..."}`

use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use wasmpl::{Reply, Term};

#[derive(Serialize)]
struct ComputeRequest<'a> {
    predicate: &'a str,
    args: &'a [Term],
}

#[derive(Deserialize, Debug, PartialEq)]
pub struct ComputeResponse {
    pub result: Option<bool>,
    pub value: Option<Term>,
    pub error: Option<String>,
}

pub struct Backend {
    addr: Option<String>,
    conn: Option<BufReader<TcpStream>>,
}

impl Backend {
    pub fn new(addr: Option<String>) -> Self {
        Backend { addr, conn: None }
    }

    pub fn addr(&self) -> Option<&str> {
        self.addr.as_deref()
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Point at a new address; the next request connects to it.
    pub fn set_addr(&mut self, addr: &str) {
        self.conn = None;
        self.addr = Some(addr.to_string());
    }

    /// Lazily connect to the backend.
    fn connect(&mut self) -> Result<(), String> {
        if self.conn.is_some() {
            return Ok(());
        }
        let addr = self.addr.as_ref().ok_or("No compute backend configured")?;
        let stream =
            TcpStream::connect(addr).map_err(|e| format!("Backend connect to {}: {}", addr, e))?;
        stream
            .set_read_timeout(Some(Duration::from_secs(10)))
            .map_err(|e| format!("Set read timeout: {}", e))?;
        stream
            .set_write_timeout(Some(Duration::from_secs(5)))
            .map_err(|e| format!("Set write timeout: {}", e))?;
        stream
            .set_nodelay(true)
            .map_err(|e| format!("Set nodelay: {}", e))?;
        tracing::debug!(%addr, "connected to compute backend");
        self.conn = Some(BufReader::new(stream));
        Ok(())
    }

    /// Send one request. On a connection error the connection is dropped
    /// and the request retried once.
    pub fn dispatch(&mut self, predicate: &str, args: &[Term]) -> Result<ComputeResponse, String> {
        if self.addr.is_none() {
            return Err(format!("No compute backend for {}/{}", predicate, args.len()));
        }
        let request = ComputeRequest { predicate, args };
        let mut payload = serde_json::to_string(&request).map_err(|e| format!("Serialize: {}", e))?;
        payload.push('\n');

        match self.try_dispatch(&payload) {
            Ok(response) => Ok(response),
            Err(first) => {
                tracing::warn!(error = %first, "compute backend request failed, reconnecting");
                self.conn = None;
                self.try_dispatch(&payload)
            }
        }
    }

    fn try_dispatch(&mut self, payload: &str) -> Result<ComputeResponse, String> {
        self.connect()?;
        let reader = self.conn.as_mut().ok_or("No backend connection")?;

        reader
            .get_mut()
            .write_all(payload.as_bytes())
            .map_err(|e| format!("Backend write: {}", e))?;
        reader
            .get_mut()
            .flush()
            .map_err(|e| format!("Backend flush: {}", e))?;

        let mut line = String::new();
        let n = reader
            .read_line(&mut line)
            .map_err(|e| format!("Backend read: {}", e))?;
        if n == 0 {
            return Err("Backend closed the connection".into());
        }
        serde_json::from_str(&line).map_err(|e| format!("Backend response parse: {}", e))
    }
}

/// Turn a backend outcome into the reply for `goal`.
pub fn reply_for(goal: &Term, outcome: Result<ComputeResponse, String>) -> Reply {
    let response = match outcome {
        Ok(response) => response,
        Err(message) => return host_error(goal, message),
    };
    if let Some(message) = response.error {
        return host_error(goal, message);
    }
    match (response.result, response.value) {
        (Some(false), _) => Reply::Fail,
        (_, Some(value)) => Reply::Unify(value),
        (Some(true), None) => Reply::True,
        (None, None) => host_error(goal, "Backend returned neither result nor error".to_string()),
    }
}

/// `throw(error(host_error(Message), Name/Arity))`.
fn host_error(goal: &Term, message: String) -> Reply {
    let context = match (goal.name(), goal.arity()) {
        (Some(name), Some(arity)) => wasmpl::term::indicator(name, arity),
        _ => Term::var("_"),
    };
    Reply::Throw(Term::compound(
        "error",
        vec![Term::compound("host_error", vec![Term::string(message)]), context],
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    /// Start a mock TCP server that answers every request with `response`.
    /// Returns the address and the request lines it has seen.
    fn mock_server(response: &str) -> (String, std::sync::mpsc::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let resp = response.to_string();
        let (tx, rx) = std::sync::mpsc::channel();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let stream = stream.unwrap();
                let mut reader = BufReader::new(stream);
                let mut line = String::new();
                if reader.read_line(&mut line).is_ok() && !line.is_empty() {
                    let _ = tx.send(line.trim_end().to_string());
                    let mut resp_line = resp.clone();
                    resp_line.push('\n');
                    let _ = reader.get_mut().write_all(resp_line.as_bytes());
                    let _ = reader.get_mut().flush();
                }
            }
        });
        (addr, rx)
    }

    fn add_goal() -> Term {
        Term::compound("add", vec![Term::Integer(2), Term::Integer(3), Term::var("Z")])
    }

    #[test]
    fn test_request_shape() {
        let (addr, requests) = mock_server(r#"{"result": true}"#);
        let mut backend = Backend::new(Some(addr));
        backend.dispatch("add", add_goal().args()).unwrap();
        let line = requests.recv().unwrap();
        let json: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(json["predicate"], "add");
        assert_eq!(json["args"][0]["type"], "integer");
        assert_eq!(json["args"][0]["value"], 2);
        assert_eq!(json["args"][2]["type"], "variable");
    }

    #[test]
    fn test_value_becomes_unify() {
        let (addr, _requests) = mock_server(
            r#"{"result": true, "value": {"type": "compound", "value": {"functor": "add", "args": [{"type": "integer", "value": 2}, {"type": "integer", "value": 3}, {"type": "integer", "value": 5}]}}}"#,
        );
        let mut backend = Backend::new(Some(addr));
        let goal = add_goal();
        let reply = reply_for(&goal, backend.dispatch("add", goal.args()));
        assert_eq!(
            reply,
            Reply::Unify(Term::compound(
                "add",
                vec![Term::Integer(2), Term::Integer(3), Term::Integer(5)]
            ))
        );
    }

    #[test]
    fn test_result_false_fails() {
        let (addr, _requests) = mock_server(r#"{"result": false}"#);
        let mut backend = Backend::new(Some(addr));
        let goal = add_goal();
        assert_eq!(reply_for(&goal, backend.dispatch("add", goal.args())), Reply::Fail);
    }

    #[test]
    fn test_error_becomes_host_error() {
        let (addr, _requests) = mock_server(r#"{"error": "Unknown predicate: add"}"#);
        let mut backend = Backend::new(Some(addr));
        let goal = add_goal();
        let Reply::Throw(ball) = reply_for(&goal, backend.dispatch("add", goal.args())) else {
            panic!("expected a throw");
        };
        assert_eq!(
            ball.to_string(),
            r#"error(host_error("Unknown predicate: add"),/(add,3))"#
        );
    }

    #[test]
    fn test_backend_not_configured() {
        let mut backend = Backend::new(None);
        let result = backend.dispatch("add", &[]);
        assert!(result.unwrap_err().contains("No compute backend"));
    }

    #[test]
    fn test_empty_response_is_an_error() {
        let goal = add_goal();
        let response = ComputeResponse {
            result: None,
            value: None,
            error: None,
        };
        assert!(matches!(reply_for(&goal, Ok(response)), Reply::Throw(_)));
    }

    #[test]
    fn test_backend_reconnect_after_drop() {
        let (addr, _requests) = mock_server(r#"{"result": true}"#);
        let mut backend = Backend::new(Some(addr));

        // First call establishes the connection
        assert_eq!(backend.dispatch("test", &[]).unwrap().result, Some(true));
        assert!(backend.is_connected());

        // Simulate a dropped connection
        backend.conn = None;

        // Second call reconnects
        assert_eq!(backend.dispatch("test", &[]).unwrap().result, Some(true));
    }

    #[test]
    fn test_retry_once_on_stale_connection() {
        // The mock answers one request per connection and then hangs up, so
        // the second request on the old connection fails and is retried.
        let (addr, _requests) = mock_server(r#"{"result": true}"#);
        let mut backend = Backend::new(Some(addr));
        assert!(backend.dispatch("test", &[]).is_ok());
        assert!(backend.dispatch("test", &[]).is_ok());
    }

    #[test]
    fn test_set_addr_drops_connection() {
        let (addr, _requests) = mock_server(r#"{"result": true}"#);
        let mut backend = Backend::new(None);
        backend.set_addr(&addr);
        assert_eq!(backend.addr(), Some(addr.as_str()));
        backend.dispatch("test", &[]).unwrap();
        assert!(backend.is_connected());
        backend.set_addr(&addr);
        assert!(!backend.is_connected());
    }
}
