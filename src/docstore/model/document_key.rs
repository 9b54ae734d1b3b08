use std::fmt::{Display, Formatter};

use crate::docstore::error::{invalid_argument, DocstoreResult};
use crate::docstore::model::ResourcePath;

/// Canonical (collection path, document id) identity of a document.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentKey {
    path: ResourcePath,
}

impl DocumentKey {
    pub fn from_path(path: ResourcePath) -> DocstoreResult<Self> {
        if !path.is_document() {
            return Err(invalid_argument(format!(
                "'{path}' does not point to a document (even number of segments required)"
            )));
        }
        Ok(Self { path })
    }

    pub fn from_string(path: &str) -> DocstoreResult<Self> {
        Self::from_path(ResourcePath::parse(path)?)
    }

    /// Joins a collection path and an id, rejecting ids that would change the
    /// shape of the path.
    pub fn from_parts(collection: &ResourcePath, id: &str) -> DocstoreResult<Self> {
        if id.is_empty() {
            return Err(invalid_argument("Document id cannot be empty"));
        }
        if id.contains('/') {
            return Err(invalid_argument(format!(
                "Document id '{id}' cannot contain '/'"
            )));
        }
        if !collection.is_collection() {
            return Err(invalid_argument(format!(
                "'{collection}' does not point to a collection (odd number of segments required)"
            )));
        }
        Self::from_path(collection.child([id]))
    }

    pub fn collection_path(&self) -> ResourcePath {
        self.path.without_last()
    }

    pub fn path(&self) -> &ResourcePath {
        &self.path
    }

    pub fn id(&self) -> &str {
        // from_path guarantees at least two segments
        self.path.last_segment().unwrap_or_default()
    }
}

impl Display for DocumentKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_collection_and_id() {
        let key = DocumentKey::from_string("users/ada/posts/first").unwrap();
        assert_eq!(key.id(), "first");
        assert_eq!(key.collection_path().canonical_string(), "users/ada/posts");
    }

    #[test]
    fn rejects_collection_paths() {
        let err = DocumentKey::from_string("users").unwrap_err();
        assert_eq!(err.code_str(), "docstore/invalid-argument");
    }

    #[test]
    fn from_parts_validates_id() {
        let users = ResourcePath::parse("users").unwrap();
        assert_eq!(
            DocumentKey::from_parts(&users, "ada").unwrap().to_string(),
            "users/ada"
        );
        assert!(DocumentKey::from_parts(&users, "ada/posts").is_err());
        assert!(DocumentKey::from_parts(&users, "").is_err());
    }
}
