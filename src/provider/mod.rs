//! Document provider core
//!
//! Id codec, document metadata, query results and the coordinator that
//! answers host queries.

pub mod coordinator;
pub mod cursor;
pub mod document;
pub mod document_id;
pub mod errors;

pub use coordinator::{ChangeNotification, DocumentProvider};
pub use cursor::{Cursor, Projection, RootRow, Value};
pub use document::{ChildQueryResult, Document};
pub use errors::{ProviderError, ProviderResult};
