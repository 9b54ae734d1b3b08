use crate::docstore::constants::DEFAULT_DATABASE_ID;
use crate::docstore::error::{invalid_argument, DocstoreResult};
use crate::docstore::model::{DocumentKey, ResourcePath};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DatabaseId {
    project_id: String,
    database: String,
}

impl DatabaseId {
    pub fn new(project_id: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            database: database.into(),
        }
    }

    pub fn default(project_id: impl Into<String>) -> Self {
        Self::new(project_id, DEFAULT_DATABASE_ID)
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    fn documents_root(&self) -> String {
        format!(
            "projects/{}/databases/{}/documents",
            self.project_id, self.database
        )
    }

    /// Fully qualified resource name the backend uses as a document pointer.
    pub fn document_name(&self, key: &DocumentKey) -> String {
        format!("{}/{}", self.documents_root(), key.path().canonical_string())
    }

    /// Parses a fully qualified pointer back into a key of this database.
    pub fn parse_document_name(&self, name: &str) -> DocstoreResult<DocumentKey> {
        let root = self.documents_root();
        let relative = name
            .strip_prefix(&root)
            .and_then(|rest| rest.strip_prefix('/'))
            .ok_or_else(|| {
                invalid_argument(format!(
                    "Reference '{name}' does not belong to database '{root}'"
                ))
            })?;
        DocumentKey::from_path(ResourcePath::parse(relative)?)
    }
}
