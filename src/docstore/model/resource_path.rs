use std::fmt::{Display, Formatter};
use std::ops::Deref;

use crate::docstore::constants::RESOURCE_PATH_DELIMITER;
use crate::docstore::error::{invalid_argument, DocstoreResult};

/// Slash-separated location of a collection or document.
///
/// Paths with an odd number of segments address collections, paths with an
/// even (non-zero) number address documents.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourcePath {
    segments: Vec<String>,
}

impl ResourcePath {
    pub fn root() -> Self {
        Self {
            segments: Vec::new(),
        }
    }

    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: segments.into_iter().map(Into::into).collect(),
        }
    }

    pub fn parse(path: &str) -> DocstoreResult<Self> {
        let trimmed = path.trim_matches(RESOURCE_PATH_DELIMITER);
        if trimmed.trim().is_empty() {
            return Ok(Self::root());
        }
        let mut segments = Vec::new();
        for segment in trimmed.split(RESOURCE_PATH_DELIMITER) {
            if segment.is_empty() {
                return Err(invalid_argument(format!(
                    "Found empty segment in resource path '{path}'"
                )));
            }
            segments.push(segment.to_string());
        }
        Ok(Self { segments })
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn is_collection(&self) -> bool {
        self.len() % 2 == 1
    }

    pub fn is_document(&self) -> bool {
        !self.is_empty() && self.len() % 2 == 0
    }

    pub fn child<I, S>(&self, segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut next = self.segments.clone();
        next.extend(segments.into_iter().map(Into::into));
        Self { segments: next }
    }

    pub fn without_last(&self) -> Self {
        match self.segments.split_last() {
            Some((_, rest)) => Self {
                segments: rest.to_vec(),
            },
            None => Self::root(),
        }
    }

    pub fn last_segment(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    pub fn canonical_string(&self) -> String {
        self.segments.join(&RESOURCE_PATH_DELIMITER.to_string())
    }
}

impl Display for ResourcePath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.canonical_string())
    }
}

impl Deref for ResourcePath {
    type Target = [String];

    fn deref(&self) -> &Self::Target {
        &self.segments
    }
}
