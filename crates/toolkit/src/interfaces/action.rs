//! Action results and form fields

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use trellis_core::types::{Record, Value};

/// Outcome of an action execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ActionResult {
    Success {
        message: String,
        /// Collections whose records were modified by the action
        invalidated: BTreeSet<String>,
        html: Option<String>,
    },
    Error {
        message: String,
        html: Option<String>,
    },
    Webhook {
        url: String,
        method: String,
        headers: Record,
        body: Value,
    },
    File {
        name: String,
        mime_type: String,
        content: Vec<u8>,
    },
    Redirect {
        path: String,
    },
}

impl ActionResult {
    pub fn success(message: impl Into<String>) -> Self {
        ActionResult::Success {
            message: message.into(),
            invalidated: BTreeSet::new(),
            html: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ActionResult::Error {
            message: message.into(),
            html: None,
        }
    }

    pub fn webhook(url: impl Into<String>, method: impl Into<String>, body: Value) -> Self {
        ActionResult::Webhook {
            url: url.into(),
            method: method.into(),
            headers: Record::new(),
            body,
        }
    }

    pub fn file(name: impl Into<String>, mime_type: impl Into<String>, content: Vec<u8>) -> Self {
        ActionResult::File {
            name: name.into(),
            mime_type: mime_type.into(),
            content,
        }
    }

    pub fn redirect(path: impl Into<String>) -> Self {
        ActionResult::Redirect { path: path.into() }
    }

    /// Mark collections as modified (only meaningful on a success)
    pub fn invalidating<I, S>(mut self, collections: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let ActionResult::Success { invalidated, .. } = &mut self {
            invalidated.extend(collections.into_iter().map(Into::into));
        }
        self
    }
}

impl Default for ActionResult {
    fn default() -> Self {
        ActionResult::success("Success")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionFieldType {
    Boolean,
    Collection,
    Date,
    Dateonly,
    Enum,
    EnumList,
    File,
    FileList,
    Json,
    Number,
    NumberList,
    String,
    StringList,
}

/// A rendered form field, as sent to the frontend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionField {
    pub label: String,
    pub field_type: ActionFieldType,
    pub description: Option<String>,
    pub is_required: bool,
    pub is_read_only: bool,
    pub value: Option<Value>,
    pub enum_values: Option<Vec<String>>,
    pub collection_name: Option<String>,
    /// The form must be refreshed when this field changes
    pub watch_changes: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_invalidating_only_touches_success() {
        let result = ActionResult::success("Done").invalidating(["books", "authors"]);
        match result {
            ActionResult::Success { invalidated, .. } => {
                assert_eq!(invalidated.into_iter().collect::<Vec<_>>(), vec!["authors", "books"]);
            }
            other => panic!("unexpected result {other:?}"),
        }

        assert_eq!(
            ActionResult::error("Nope").invalidating(["books"]),
            ActionResult::error("Nope")
        );
    }

    #[test]
    fn test_serialized_tag() {
        let json = serde_json::to_value(ActionResult::redirect("/books")).unwrap();
        assert_eq!(json, serde_json::json!({ "type": "Redirect", "path": "/books" }));
    }
}
