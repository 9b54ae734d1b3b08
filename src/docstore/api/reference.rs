use std::fmt::{Display, Formatter};

use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};

use crate::docstore::constants::AUTO_ID_LENGTH;
use crate::docstore::error::{invalid_argument, DocstoreResult};
use crate::docstore::model::{DocumentKey, ResourcePath};

/// Stable pointer to a collection.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Collection {
    path: ResourcePath,
}

impl Collection {
    pub fn new(path: &str) -> DocstoreResult<Self> {
        Self::from_path(ResourcePath::parse(path)?)
    }

    pub(crate) fn from_path(path: ResourcePath) -> DocstoreResult<Self> {
        if !path.is_collection() {
            return Err(invalid_argument(format!(
                "'{path}' does not point to a collection (odd number of segments required)"
            )));
        }
        Ok(Self { path })
    }

    /// The full resource path of the collection (e.g. `users/ada/posts`).
    pub fn path(&self) -> &ResourcePath {
        &self.path
    }

    /// The last segment of the collection path.
    pub fn id(&self) -> &str {
        self.path.last_segment().unwrap_or_default()
    }

    /// Returns a reference to the document identified by `id`.
    pub fn doc(&self, id: &str) -> DocstoreResult<DocRef> {
        Ok(DocRef {
            key: DocumentKey::from_parts(&self.path, id)?,
        })
    }

    /// Returns a reference with a freshly generated id.
    pub fn auto_doc(&self) -> DocstoreResult<DocRef> {
        self.doc(&generate_auto_id())
    }
}

impl Display for Collection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Collection({})", self.path)
    }
}

/// Stable pointer to a document: a (collection path, id) pair.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocRef {
    key: DocumentKey,
}

impl DocRef {
    pub fn new(collection: &str, id: &str) -> DocstoreResult<Self> {
        Collection::new(collection)?.doc(id)
    }

    pub fn from_key(key: DocumentKey) -> Self {
        Self { key }
    }

    pub fn parse(path: &str) -> DocstoreResult<Self> {
        Ok(Self {
            key: DocumentKey::from_string(path)?,
        })
    }

    pub fn id(&self) -> &str {
        self.key.id()
    }

    pub fn key(&self) -> &DocumentKey {
        &self.key
    }

    pub fn path(&self) -> &ResourcePath {
        self.key.path()
    }

    pub fn collection_path(&self) -> ResourcePath {
        self.key.collection_path()
    }

    pub fn parent(&self) -> Collection {
        Collection {
            path: self.key.collection_path(),
        }
    }

    /// Returns a subcollection rooted at this document.
    pub fn collection(&self, path: &str) -> DocstoreResult<Collection> {
        let relative = ResourcePath::parse(path)?;
        Collection::from_path(self.key.path().child(relative.iter().cloned()))
    }
}

impl Display for DocRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "DocRef({})", self.key)
    }
}

/// Either call shape accepted by read and write operations.
///
/// Resolved to a [`DocumentKey`] at the API boundary so the rest of the
/// crate only sees one canonical form.
#[derive(Clone, Debug)]
pub enum DocTarget {
    Ref(DocRef),
    Pair { collection: String, id: String },
}

impl DocTarget {
    pub fn into_key(self) -> DocstoreResult<DocumentKey> {
        match self {
            DocTarget::Ref(reference) => Ok(reference.key),
            DocTarget::Pair { collection, id } => {
                DocumentKey::from_parts(&ResourcePath::parse(&collection)?, &id)
            }
        }
    }
}

impl From<DocRef> for DocTarget {
    fn from(value: DocRef) -> Self {
        DocTarget::Ref(value)
    }
}

impl From<&DocRef> for DocTarget {
    fn from(value: &DocRef) -> Self {
        DocTarget::Ref(value.clone())
    }
}

impl From<(&str, &str)> for DocTarget {
    fn from((collection, id): (&str, &str)) -> Self {
        DocTarget::Pair {
            collection: collection.to_string(),
            id: id.to_string(),
        }
    }
}

impl From<(&Collection, &str)> for DocTarget {
    fn from((collection, id): (&Collection, &str)) -> Self {
        DocTarget::Pair {
            collection: collection.path().canonical_string(),
            id: id.to_string(),
        }
    }
}

fn generate_auto_id() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .map(char::from)
        .take(AUTO_ID_LENGTH)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collection_and_document_roundtrip() {
        let users = Collection::new("users").unwrap();
        let ada = users.doc("ada").unwrap();
        assert_eq!(ada.id(), "ada");
        assert_eq!(ada.parent(), users);
        let posts = ada.collection("posts").unwrap();
        assert_eq!(posts.path().canonical_string(), "users/ada/posts");
    }

    #[test]
    fn auto_ids_have_fixed_length() {
        let users = Collection::new("users").unwrap();
        let first = users.auto_doc().unwrap();
        let second = users.auto_doc().unwrap();
        assert_eq!(first.id().len(), AUTO_ID_LENGTH);
        assert_ne!(first, second);
    }

    #[test]
    fn call_shapes_normalize_to_the_same_key() {
        let by_ref: DocTarget = DocRef::new("users", "ada").unwrap().into();
        let by_pair: DocTarget = ("users", "ada").into();
        assert_eq!(by_ref.into_key().unwrap(), by_pair.into_key().unwrap());
    }

    #[test]
    fn rejects_document_path_as_collection() {
        assert!(Collection::new("users/ada").is_err());
        let bad: DocTarget = ("users/ada", "x").into();
        assert!(bad.into_key().is_err());
    }
}
