//! Query results in the shape the host expects
//!
//! A `Cursor` is a table of the requested columns plus two extras: the
//! `loading` flag and the document id the caller should watch for a change
//! notification before querying again.

use serde::{Deserialize, Serialize};

use super::document::{Document, MIME_TYPE_DIR};
use super::document_id::DocumentId;
use crate::accounts::Account;

/// Document columns the host can request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Column {
    #[serde(rename = "_display_name")]
    DisplayName,
    #[serde(rename = "document_id")]
    DocumentId,
    #[serde(rename = "flags")]
    Flags,
    #[serde(rename = "last_modified")]
    LastModified,
    #[serde(rename = "mime_type")]
    MimeType,
    #[serde(rename = "_size")]
    Size,
}

impl Column {
    /// Every document column, in table order
    pub const ALL: [Column; 6] = [
        Column::DisplayName,
        Column::DocumentId,
        Column::Flags,
        Column::LastModified,
        Column::MimeType,
        Column::Size,
    ];

    /// Columns whose value can change on the remote and go stale
    pub fn is_volatile(self) -> bool {
        matches!(self, Column::LastModified | Column::Size)
    }
}

/// Columns requested by a query; `None` means all of them
pub type Projection = Option<Vec<Column>>;

/// Whether a projection asks for any volatile column
pub fn wants_volatile(projection: &Projection) -> bool {
    match projection {
        None => true,
        Some(columns) => columns.iter().any(|c| c.is_volatile()),
    }
}

/// A single cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Integer(i64),
    Text(String),
}

/// Tabular query result with host extras
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cursor {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    /// More data is on the way; re-query after the change notification
    pub loading: bool,
    /// Document id whose change notification this result subscribes to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification_id: Option<String>,
}

impl Cursor {
    fn empty_with(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
            loading: false,
            notification_id: None,
        }
    }

    /// Cursor over `documents` restricted to `projection`
    pub fn documents<'a>(
        projection: &Projection,
        documents: impl IntoIterator<Item = &'a Document>,
    ) -> Self {
        let columns = resolve(projection);
        let mut cursor = Self::empty_with(column_names(&columns));
        cursor.rows = documents
            .into_iter()
            .map(|doc| columns.iter().map(|c| document_cell(doc, *c)).collect())
            .collect();
        cursor
    }

    /// Empty placeholder telling the caller that a listing is being fetched
    pub fn loading_placeholder(projection: &Projection) -> Self {
        let mut cursor = Self::empty_with(column_names(&resolve(projection)));
        cursor.loading = true;
        cursor
    }

    /// Single row describing an account's root directory
    pub fn root_document(projection: &Projection, id: &DocumentId<'_>) -> Self {
        let columns = resolve(projection);
        let row = columns
            .iter()
            .map(|c| match c {
                Column::DisplayName => Value::Text(id.account_name().to_string()),
                Column::DocumentId => Value::Text(id.as_str().to_string()),
                Column::Flags => Value::Integer(0),
                Column::MimeType => Value::Text(MIME_TYPE_DIR.to_string()),
                Column::LastModified | Column::Size => Value::Null,
            })
            .collect();
        let mut cursor = Self::empty_with(column_names(&columns));
        cursor.rows.push(row);
        cursor
    }

    /// Mark the result as loading and subscribe it to `document_id` changes
    pub fn with_notification(mut self, document_id: &str, loading: bool) -> Self {
        self.loading = loading;
        self.notification_id = Some(document_id.to_string());
        self
    }
}

#[cfg(test)]
impl Cursor {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Cell at `row` in the column named `column`
    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let index = self.columns.iter().position(|c| c == column)?;
        self.rows.get(row)?.get(index)
    }
}

fn resolve(projection: &Projection) -> Vec<Column> {
    match projection {
        Some(columns) => columns.clone(),
        None => Column::ALL.to_vec(),
    }
}

fn column_names(columns: &[Column]) -> Vec<String> {
    columns.iter().map(|c| column_name(*c).to_string()).collect()
}

fn column_name(column: Column) -> &'static str {
    match column {
        Column::DisplayName => "_display_name",
        Column::DocumentId => "document_id",
        Column::Flags => "flags",
        Column::LastModified => "last_modified",
        Column::MimeType => "mime_type",
        Column::Size => "_size",
    }
}

fn document_cell(doc: &Document, column: Column) -> Value {
    match column {
        Column::DisplayName => Value::Text(doc.name.clone()),
        Column::DocumentId => Value::Text(doc.document_id.clone()),
        Column::Flags => Value::Integer(doc.flags),
        Column::LastModified => Value::Integer(doc.last_modified),
        Column::MimeType => Value::Text(doc.mime_type.clone()),
        Column::Size => Value::Integer(doc.size as i64),
    }
}

/// One row of the roots listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RootRow {
    pub root_id: String,
    pub document_id: String,
    pub title: String,
    pub summary: Option<String>,
    pub flags: i64,
    pub mime_types: Option<String>,
}

impl RootRow {
    pub fn for_account(account: &Account) -> Self {
        Self {
            root_id: account.name.clone(),
            document_id: super::document_id::root_id(&account.name),
            title: account.name.clone(),
            summary: account.summary(),
            flags: 0,
            mime_types: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc() -> Document {
        Document {
            name: "a.txt".to_string(),
            document_id: "acct/a.txt".to_string(),
            flags: 0,
            last_modified: 1_000,
            mime_type: "text/plain".to_string(),
            size: 3,
        }
    }

    #[test]
    fn test_wants_volatile() {
        assert!(wants_volatile(&None));
        assert!(wants_volatile(&Some(vec![Column::DisplayName, Column::Size])));
        assert!(wants_volatile(&Some(vec![Column::LastModified])));
        assert!(!wants_volatile(&Some(vec![Column::DisplayName, Column::MimeType])));
    }

    #[test]
    fn test_projection_restricts_columns() {
        let d = doc();
        let cursor = Cursor::documents(&Some(vec![Column::Size, Column::DisplayName]), [&d]);
        assert_eq!(cursor.columns, vec!["_size", "_display_name"]);
        assert_eq!(cursor.rows, vec![vec![Value::Integer(3), Value::Text("a.txt".into())]]);
        assert!(!cursor.loading);
    }

    #[test]
    fn test_default_projection() {
        let d = doc();
        let cursor = Cursor::documents(&None, [&d]);
        assert_eq!(cursor.columns.len(), 6);
        assert_eq!(cursor.get(0, "last_modified"), Some(&Value::Integer(1_000)));
        assert_eq!(cursor.get(0, "missing"), None);
    }

    #[test]
    fn test_root_document_nulls() {
        let id = DocumentId::parse("acct/").unwrap();
        let cursor = Cursor::root_document(&None, &id);
        assert_eq!(cursor.len(), 1);
        assert_eq!(cursor.get(0, "_display_name"), Some(&Value::Text("acct".into())));
        assert_eq!(cursor.get(0, "mime_type"), Some(&Value::Text(MIME_TYPE_DIR.into())));
        assert_eq!(cursor.get(0, "_size"), Some(&Value::Null));
        assert_eq!(cursor.get(0, "last_modified"), Some(&Value::Null));
    }

    #[test]
    fn test_placeholder_serialization() {
        let cursor = Cursor::loading_placeholder(&Some(vec![Column::DocumentId]))
            .with_notification("acct/docs/", true);
        let json = serde_json::to_string(&cursor).unwrap();
        assert!(json.contains(r#""loading":true"#));
        assert!(json.contains(r#""notificationId":"acct/docs/""#));
        assert!(json.contains(r#""columns":["document_id"]"#));
    }

    #[test]
    fn test_parse_projection() {
        let columns: Vec<Column> = serde_json::from_str(r#"["_display_name","_size"]"#).unwrap();
        assert_eq!(columns, vec![Column::DisplayName, Column::Size]);
    }

    #[test]
    fn test_root_row_summary() {
        let account = Account {
            name: "Home".to_string(),
            server: "nas".to_string(),
            username: Some("bob".to_string()),
            domain: None,
        };
        let row = RootRow::for_account(&account);
        assert_eq!(row.document_id, "Home/");
        assert_eq!(row.root_id, "Home");
        assert_eq!(row.summary.as_deref(), Some("bob@nas"));
    }
}
