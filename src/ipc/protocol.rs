//! IPC protocol definitions
//!
//! Newline-delimited JSON exchanged with the host over a Unix domain socket.
//! Each request may carry an `id` that is echoed on its reply; unsolicited
//! `changed` notifications carry no `id`.

use serde::{Deserialize, Serialize};

use crate::provider::{ChangeNotification, Cursor, Projection, ProviderError, RootRow};

/// Protocol version for future compatibility
pub const PROTOCOL_VERSION: u32 = 1;

/// Request envelope
#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    /// Correlation id echoed on the reply
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(flatten)]
    pub command: Command,
}

/// Commands sent by the host
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Command {
    /// One root per configured account
    ListRoots,
    #[serde(rename_all = "camelCase")]
    QueryDocument {
        document_id: String,
        #[serde(default)]
        projection: Projection,
    },
    #[serde(rename_all = "camelCase")]
    QueryChildDocuments {
        parent_document_id: String,
        #[serde(default)]
        projection: Projection,
    },
    /// Download if needed and reply with the local path
    #[serde(rename_all = "camelCase")]
    OpenDocument {
        document_id: String,
        #[serde(default = "default_mode")]
        mode: String,
        /// Handle for a later `cancel`
        #[serde(default)]
        request_id: Option<String>,
    },
    /// Cancel the `openDocument` registered under `request_id`
    #[serde(rename_all = "camelCase")]
    Cancel { request_id: String },
    #[serde(rename_all = "camelCase")]
    IsChildDocument {
        parent_document_id: String,
        document_id: String,
    },
    #[serde(rename_all = "camelCase")]
    TestConnection { account: String },
    /// Get daemon status
    GetStatus,
}

fn default_mode() -> String {
    "r".to_string()
}

/// Reply envelope
#[derive(Debug, Clone, Serialize)]
pub struct Reply {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(flatten)]
    pub response: Response,
}

impl Reply {
    pub fn to(id: Option<u64>, response: Response) -> Self {
        Self { id, response }
    }

    /// Unsolicited notification
    pub fn changed(notification: ChangeNotification) -> Self {
        Self {
            id: None,
            response: Response::Changed(notification),
        }
    }
}

/// Responses sent to the host
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Response {
    #[serde(rename_all = "camelCase")]
    Roots { roots: Vec<RootRow> },
    Cursor(Cursor),
    /// Path of the cached copy; the host opens it read-only
    #[serde(rename_all = "camelCase")]
    Opened { path: String, size: u64 },
    #[serde(rename_all = "camelCase")]
    Bool { value: bool },
    /// Status response with daemon state
    #[serde(rename_all = "camelCase")]
    Status {
        version: u32,
        healthy: bool,
        /// Background refreshes and downloads still running
        in_flight: usize,
        directory_hits: u64,
        directory_misses: u64,
        directory_hit_rate: f64,
    },
    /// Error response
    #[serde(rename_all = "camelCase")]
    Error {
        /// Stable error code
        kind: String,
        error: String,
    },
    /// A listing the host subscribed to has changed
    Changed(ChangeNotification),
}

impl From<ProviderError> for Response {
    fn from(e: ProviderError) -> Self {
        Response::Error {
            kind: e.kind().to_string(),
            error: e.to_string(),
        }
    }
}

/// Parse a JSON request from bytes
pub fn parse_request(data: &[u8]) -> Result<Request, serde_json::Error> {
    serde_json::from_slice(data)
}

/// Serialize a reply to JSON bytes
pub fn serialize_reply(reply: &Reply) -> Result<Vec<u8>, serde_json::Error> {
    let mut json = serde_json::to_vec(reply)?;
    json.push(b'\n'); // Add newline delimiter
    Ok(json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::coordinator::AUTHORITY;
    use crate::provider::cursor::Column;

    #[test]
    fn test_parse_query_child_documents() {
        let json = r#"{"id":7,"type":"queryChildDocuments","parentDocumentId":"acct/docs/","projection":["_display_name","_size"]}"#;
        let request = parse_request(json.as_bytes()).unwrap();
        assert_eq!(request.id, Some(7));
        match request.command {
            Command::QueryChildDocuments {
                parent_document_id,
                projection,
            } => {
                assert_eq!(parent_document_id, "acct/docs/");
                assert_eq!(projection, Some(vec![Column::DisplayName, Column::Size]));
            }
            _ => panic!("Expected QueryChildDocuments command"),
        }
    }

    #[test]
    fn test_parse_open_document_defaults() {
        let json = r#"{"type":"openDocument","documentId":"acct/a.txt"}"#;
        let request = parse_request(json.as_bytes()).unwrap();
        assert_eq!(request.id, None);
        match request.command {
            Command::OpenDocument {
                document_id,
                mode,
                request_id,
            } => {
                assert_eq!(document_id, "acct/a.txt");
                assert_eq!(mode, "r");
                assert_eq!(request_id, None);
            }
            _ => panic!("Expected OpenDocument command"),
        }
    }

    #[test]
    fn test_parse_get_status_command() {
        let request = parse_request(br#"{"type":"getStatus"}"#).unwrap();
        assert!(matches!(request.command, Command::GetStatus));
    }

    #[test]
    fn test_parse_unknown_command() {
        assert!(parse_request(br#"{"type":"mount"}"#).is_err());
    }

    #[test]
    fn test_serialize_cursor_reply() {
        let cursor = Cursor::loading_placeholder(&None).with_notification("acct/docs/", true);
        let json = serialize_reply(&Reply::to(Some(3), Response::Cursor(cursor))).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&json).unwrap();
        assert_eq!(value["id"], 3);
        assert_eq!(value["type"], "cursor");
        assert_eq!(value["loading"], true);
        assert_eq!(value["notificationId"], "acct/docs/");
        assert_eq!(value["rows"].as_array().unwrap().len(), 0);
    }

    #[test]
    fn test_serialize_error_response() {
        let reply = Reply::to(
            Some(1),
            ProviderError::NotFound("acct/x".to_string()).into(),
        );
        let json = String::from_utf8(serialize_reply(&reply).unwrap()).unwrap();
        assert!(json.ends_with('\n'));
        assert!(json.contains(r#""type":"error""#));
        assert!(json.contains(r#""kind":"notFound""#));
    }

    #[test]
    fn test_serialize_changed_has_no_id() {
        let reply = Reply::changed(ChangeNotification {
            authority: AUTHORITY.to_string(),
            document_id: "acct/docs/".to_string(),
        });
        let value: serde_json::Value =
            serde_json::from_slice(&serialize_reply(&reply).unwrap()).unwrap();
        assert_eq!(value["type"], "changed");
        assert_eq!(value["documentId"], "acct/docs/");
        assert!(value.get("id").is_none());
    }
}
