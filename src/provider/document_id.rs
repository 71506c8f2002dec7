//! Document identifiers
//!
//! A document id has the form `<account>/<path>`. The first `/` separates the
//! account name from the remote path, a trailing `/` marks a directory, and an
//! id whose only `/` is its last character names an account's root.

use super::errors::{ProviderError, ProviderResult};

/// Separator between account name and path, and between path components
pub const SEPARATOR: char = '/';

/// A borrowed, validated document id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocumentId<'a> {
    raw: &'a str,
    /// Byte offset of the first separator
    split: usize,
}

impl<'a> DocumentId<'a> {
    /// Validate `raw` as a document id.
    ///
    /// Fails with `MalformedIdentifier` when there is no separator or the
    /// account name before it is empty.
    pub fn parse(raw: &'a str) -> ProviderResult<Self> {
        match raw.find(SEPARATOR) {
            Some(split) if split > 0 => Ok(Self { raw, split }),
            _ => Err(ProviderError::MalformedIdentifier(raw.to_string())),
        }
    }

    pub fn as_str(&self) -> &'a str {
        self.raw
    }

    /// Substring before the first separator
    pub fn account_name(&self) -> &'a str {
        &self.raw[..self.split]
    }

    /// Substring from the first separator (inclusive)
    pub fn path(&self) -> &'a str {
        &self.raw[self.split..]
    }

    /// Last path component, ignoring one trailing separator.
    ///
    /// For a root this is the account name.
    pub fn leaf_name(&self) -> &'a str {
        let end = if self.is_directory() {
            self.raw.len() - 1
        } else {
            self.raw.len()
        };
        let start = self.raw[..end]
            .rfind(SEPARATOR)
            .map(|i| i + 1)
            .unwrap_or(0);
        &self.raw[start..end]
    }

    pub fn is_directory(&self) -> bool {
        self.raw.ends_with(SEPARATOR)
    }

    pub fn is_root(&self) -> bool {
        self.split == self.raw.len() - 1
    }
}

/// Id of an account's root directory
pub fn root_id(account_name: &str) -> String {
    format!("{}{}", account_name, SEPARATOR)
}

/// Id of the entry `name` inside the directory `parent_id`
pub fn child_id(parent_id: &str, name: &str, is_directory: bool) -> String {
    let mut id = String::with_capacity(parent_id.len() + name.len() + 2);
    id.push_str(parent_id);
    if !id.ends_with(SEPARATOR) {
        id.push(SEPARATOR);
    }
    id.push_str(name);
    if is_directory {
        id.push(SEPARATOR);
    }
    id
}

/// Whether `document_id` lies strictly below `parent_id`
pub fn is_child_document(parent_id: &str, document_id: &str) -> bool {
    document_id.starts_with(parent_id) && document_id.len() != parent_id.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_id() {
        let id = DocumentId::parse("acct/").unwrap();
        assert_eq!(id.account_name(), "acct");
        assert_eq!(id.path(), "/");
        assert_eq!(id.leaf_name(), "acct");
        assert!(id.is_root());
        assert!(id.is_directory());
    }

    #[test]
    fn test_file_id() {
        let id = DocumentId::parse("acct/photos/cat.jpg").unwrap();
        assert_eq!(id.account_name(), "acct");
        assert_eq!(id.path(), "/photos/cat.jpg");
        assert_eq!(id.leaf_name(), "cat.jpg");
        assert!(!id.is_root());
        assert!(!id.is_directory());
    }

    #[test]
    fn test_directory_id() {
        let id = DocumentId::parse("acct/photos/2024/").unwrap();
        assert_eq!(id.path(), "/photos/2024/");
        assert_eq!(id.leaf_name(), "2024");
        assert!(id.is_directory());
        assert!(!id.is_root());
    }

    #[test]
    fn test_malformed_ids() {
        for raw in ["", "acct", "/photos/"] {
            match DocumentId::parse(raw) {
                Err(ProviderError::MalformedIdentifier(got)) => assert_eq!(got, raw),
                other => panic!("expected MalformedIdentifier for {:?}, got {:?}", raw, other),
            }
        }
    }

    #[test]
    fn test_child_id() {
        assert_eq!(child_id("acct/", "docs", true), "acct/docs/");
        assert_eq!(child_id("acct/docs/", "a.txt", false), "acct/docs/a.txt");
        assert_eq!(root_id("acct"), "acct/");
    }

    #[test]
    fn test_is_child_document() {
        assert!(is_child_document("acct/", "acct/docs/a.txt"));
        assert!(is_child_document("acct/docs/", "acct/docs/a.txt"));
        assert!(!is_child_document("acct/docs/", "acct/docs/"));
        assert!(!is_child_document("acct/docs/", "acct/other.txt"));
    }
}
