//! Wire format shared by every IPC surface.
//!
//! Requests are single lines, `COMMAND [param]`. The parameter is JSON
//! when it parses as an object or array; any other text is wrapped into
//! an object under the empty key, which keeps shell-friendly forms like
//! `set_values a=1` on the same code path as JSON clients.
//!
//! Replies start with a status line, `NNN MSG`. A period directly after
//! the code (`NNN. MSG`) announces a payload: one line of JSON followed
//! by a blank line.

use std::io::{self, Write};
use std::time::Duration;

use serde_json::{Map, Value};

use drover_state::Selector;

/// Reply timeout applied when a timed read names none.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(1);

/// One parsed request line.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub command: String,
    pub params: Params,
}

/// Splits a request line into the command word and its parameter.
pub fn parse_request(line: &str) -> Request {
    let line = line.trim_end_matches(['\r', '\n']);
    let (command, rest) = match line.split_once(char::is_whitespace) {
        Some((command, rest)) => (command, rest.trim()),
        None => (line, ""),
    };
    Request {
        command: command.to_string(),
        params: Params::parse(rest),
    }
}

/// Request parameter.
///
/// Holds JSON for object and array parameters, `{"": "<text>"}` for
/// bare text, and null when the request had no parameter at all.
#[derive(Debug, Clone, PartialEq)]
pub struct Params(Value);

impl Params {
    pub fn parse(text: &str) -> Params {
        let text = text.trim();
        if text.is_empty() {
            return Params(Value::Null);
        }
        match serde_json::from_str::<Value>(text) {
            Ok(value) if value.is_object() || value.is_array() => Params(value),
            _ => {
                let mut map = Map::new();
                map.insert(String::new(), Value::String(text.to_string()));
                Params(Value::Object(map))
            }
        }
    }

    pub fn from_value(value: Value) -> Params {
        Params(value)
    }

    /// True when the request carried no parameter.
    pub fn is_empty(&self) -> bool {
        self.0.is_null()
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Object field lookup; `None` for non-object parameters.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// The raw text of a non-JSON parameter.
    pub fn bare(&self) -> Option<&str> {
        self.get("").and_then(Value::as_str)
    }

    /// Key selection for the value-store commands.
    ///
    /// A bare parameter or a `"key"` field names the keys; a top-level
    /// array is taken as a key list; anything else selects everything.
    pub fn selector(&self) -> Selector {
        if self.0.is_array() {
            return Selector::from_value(Some(&self.0));
        }
        let key = self.get("").or_else(|| self.get("key"));
        Selector::from_value(key)
    }

    /// The `"timeout"` field in seconds, defaulting to
    /// [`DEFAULT_READ_TIMEOUT`]. Negative and unreadable values clamp
    /// to zero and the default respectively.
    pub fn timeout(&self) -> Duration {
        match self.get("timeout") {
            None | Some(Value::Null) => DEFAULT_READ_TIMEOUT,
            Some(value) => match value.as_f64() {
                Some(secs) if secs > 0.0 => Duration::from_secs_f64(secs),
                Some(_) => Duration::ZERO,
                None => DEFAULT_READ_TIMEOUT,
            },
        }
    }
}

/// Writes a plain status reply.
pub fn reply<W: Write + ?Sized>(out: &mut W, code: u16, message: &str) -> io::Result<()> {
    writeln!(out, "{} {}", code, message)?;
    out.flush()
}

/// Writes a status reply with a JSON payload and the closing blank
/// line.
pub fn reply_with_payload<W: Write + ?Sized>(
    out: &mut W,
    code: u16,
    message: &str,
    payload: &Value,
) -> io::Result<()> {
    writeln!(out, "{}. {}", code, message)?;
    writeln!(out, "{}", payload)?;
    writeln!(out)?;
    out.flush()
}

/// Client-side view of a reply status line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    raw: String,
}

impl StatusLine {
    pub fn parse(line: &str) -> StatusLine {
        StatusLine {
            raw: line.trim_end_matches(['\r', '\n']).to_string(),
        }
    }

    pub fn code(&self) -> u16 {
        self.raw
            .get(..3)
            .and_then(|digits| digits.parse().ok())
            .unwrap_or(0)
    }

    /// A period in the fourth column means a payload follows.
    pub fn has_payload(&self) -> bool {
        self.raw.as_bytes().get(3) == Some(&b'.')
    }

    pub fn is_ok(&self) -> bool {
        self.code() == 200
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

// ========================================================================
// Tests
// ========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_request_splits_command_and_param() {
        let req = parse_request("get_values {\"key\":\"a\"}\n");
        assert_eq!(req.command, "get_values");
        assert_eq!(req.params.get("key"), Some(&json!("a")));

        let req = parse_request("quit");
        assert_eq!(req.command, "quit");
        assert!(req.params.is_empty());
    }

    #[test]
    fn test_parse_request_keeps_spaces_inside_param() {
        let req = parse_request("set_values {\"a\": \"x y z\"}");
        assert_eq!(req.params.get("a"), Some(&json!("x y z")));
    }

    #[test]
    fn test_bare_param_lands_under_the_empty_key() {
        let req = parse_request("set_values a=1");
        assert_eq!(req.params.bare(), Some("a=1"));
    }

    #[test]
    fn test_scalar_json_is_treated_as_bare_text() {
        // Only objects and arrays count as structured parameters.
        let params = Params::parse("5");
        assert_eq!(params.bare(), Some("5"));

        let params = Params::parse("\"k\"");
        assert_eq!(params.bare(), Some("\"k\""));
    }

    #[test]
    fn test_selector_variants() {
        assert_eq!(Params::parse("").selector(), Selector::All);
        assert_eq!(Params::parse("{}").selector(), Selector::All);
        assert_eq!(
            Params::parse("{\"key\":null}").selector(),
            Selector::All
        );
        assert_eq!(
            Params::parse("abc").selector(),
            Selector::Key("abc".to_string())
        );
        assert_eq!(
            Params::parse("{\"key\":\"a\"}").selector(),
            Selector::Key("a".to_string())
        );
        assert_eq!(
            Params::parse("{\"key\":[\"a\",\"b\"]}").selector(),
            Selector::Keys(vec!["a".to_string(), "b".to_string()])
        );
        assert_eq!(
            Params::parse("[\"a\",\"b\"]").selector(),
            Selector::Keys(vec!["a".to_string(), "b".to_string()])
        );
    }

    #[test]
    fn test_timeout_parsing() {
        assert_eq!(Params::parse("").timeout(), Duration::from_secs(1));
        assert_eq!(
            Params::parse("{\"timeout\":null}").timeout(),
            Duration::from_secs(1)
        );
        assert_eq!(
            Params::parse("{\"timeout\":5}").timeout(),
            Duration::from_secs(5)
        );
        assert_eq!(
            Params::parse("{\"timeout\":0.5}").timeout(),
            Duration::from_millis(500)
        );
        assert_eq!(Params::parse("{\"timeout\":0}").timeout(), Duration::ZERO);
        assert_eq!(Params::parse("{\"timeout\":-3}").timeout(), Duration::ZERO);
        assert_eq!(
            Params::parse("{\"timeout\":\"x\"}").timeout(),
            Duration::from_secs(1)
        );
    }

    #[test]
    fn test_reply_formats() {
        let mut out = Vec::new();
        reply(&mut out, 200, "OK quit.").expect("write");
        assert_eq!(out, b"200 OK quit.\n");

        let mut out = Vec::new();
        reply_with_payload(&mut out, 200, "OK", &json!({"a": 1})).expect("write");
        assert_eq!(out, b"200. OK\n{\"a\":1}\n\n");
    }

    #[test]
    fn test_status_line() {
        let status = StatusLine::parse("200 OK quit.\n");
        assert_eq!(status.code(), 200);
        assert!(status.is_ok());
        assert!(!status.has_payload());

        let status = StatusLine::parse("200. OK");
        assert!(status.has_payload());
        assert_eq!(status.as_str(), "200. OK");

        let status = StatusLine::parse("501 Error Command not implemented.");
        assert_eq!(status.code(), 501);
        assert!(!status.is_ok());

        let status = StatusLine::parse("x");
        assert_eq!(status.code(), 0);
        assert!(!status.has_payload());
    }
}
