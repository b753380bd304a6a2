// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Response and event envelopes (spec §6).

use serde_json::{Map, Value};

#[derive(Clone, Debug, serde::Serialize)]
#[serde(tag = "status")]
#[serde(rename_all = "lowercase")]
pub enum Response {
    Ok {
        version: u32,
        #[serde(flatten)]
        fields: Map<String, Value>,
    },
    Error {
        version: u32,
        error: String,
    },
}

impl Response {
    pub fn ok(fields: Map<String, Value>) -> Self {
        Response::Ok { version: 1, fields }
    }

    pub fn empty_ok() -> Self {
        Response::ok(Map::new())
    }

    /// Builds an error response with a `<category>:<detail>` error string,
    /// or just `<category>` when `detail` is empty (spec §6).
    pub fn error(category: &str, detail: impl std::fmt::Display) -> Self {
        let detail = detail.to_string();
        let error = if detail.is_empty() {
            category.to_string()
        } else {
            format!("{category}:{detail}")
        };
        Response::Error { version: 1, error }
    }

    pub fn to_line(&self) -> String {
        serde_json::to_string(self).expect("Response always serializes")
    }
}

/// An event record broadcast on the event bus (spec §3, §4.7).
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Event {
    pub seq: u64,
    pub ts: f64,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    pub data: Value,
}

impl Event {
    pub fn to_line(&self) -> String {
        serde_json::to_string(self).expect("Event always serializes")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn error_without_detail_has_no_trailing_colon() {
        let r = Response::error("unsupported", "");
        assert_eq!(r.to_line(), r#"{"status":"error","version":1,"error":"unsupported"}"#);
    }

    #[test]
    fn error_with_detail_concatenates() {
        let r = Response::error("pid_locked", 7);
        assert_eq!(
            r.to_line(),
            r#"{"status":"error","version":1,"error":"pid_locked:7"}"#
        );
    }

    #[test]
    fn ok_flattens_fields() {
        let mut fields = Map::new();
        fields.insert("pid".into(), json!(3));
        let r = Response::ok(fields);
        assert_eq!(r.to_line(), r#"{"status":"ok","version":1,"pid":3}"#);
    }

    #[test]
    fn event_round_trips() {
        let e = Event { seq: 1, ts: 0.5, kind: "task_state".into(), pid: Some(2), data: json!({"prev":"ready"}) };
        let parsed: Event = serde_json::from_str(&e.to_line()).unwrap();
        assert_eq!(parsed.seq, 1);
        assert_eq!(parsed.kind, "task_state");
    }
}
