use std::fmt::{Display, Formatter};

use crate::docstore::constants::FIELD_PATH_DELIMITER;
use crate::docstore::error::{invalid_argument, DocstoreResult};

/// Ordered list of segments addressing a (possibly nested) document field.
///
/// Segments travel to the backend joined by `.`, so a segment that is empty or
/// contains the delimiter is rejected instead of being silently re-split.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldPath {
    segments: Vec<String>,
}

impl FieldPath {
    pub fn new<S, I>(segments: I) -> DocstoreResult<Self>
    where
        S: IntoFieldSegment,
        I: IntoIterator<Item = S>,
    {
        let segments: Vec<String> = segments
            .into_iter()
            .map(IntoFieldSegment::into_field_segment)
            .collect();
        if segments.is_empty() {
            return Err(invalid_argument(
                "FieldPath must contain at least one segment",
            ));
        }
        for segment in &segments {
            validate_segment(segment)?;
        }
        Ok(Self { segments })
    }

    pub fn from_dot_separated(path: &str) -> DocstoreResult<Self> {
        if path.trim().is_empty() {
            return Err(invalid_argument("FieldPath string cannot be empty"));
        }
        FieldPath::new(path.split(FIELD_PATH_DELIMITER))
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn child(&self, segment: impl IntoFieldSegment) -> DocstoreResult<Self> {
        let segment = segment.into_field_segment();
        validate_segment(&segment)?;
        let mut segments = self.segments.clone();
        segments.push(segment);
        Ok(Self { segments })
    }

    pub fn canonical_string(&self) -> String {
        self.segments.join(&FIELD_PATH_DELIMITER.to_string())
    }

    /// Returns `true` when `self` addresses an ancestor of `other`.
    pub fn is_strict_prefix_of(&self, other: &FieldPath) -> bool {
        self.len() < other.len() && other.segments.starts_with(&self.segments)
    }
}

impl Display for FieldPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.canonical_string())
    }
}

fn validate_segment(segment: &str) -> DocstoreResult<()> {
    if segment.is_empty() {
        return Err(invalid_argument("Field path segments cannot be empty"));
    }
    if segment.contains(FIELD_PATH_DELIMITER) {
        return Err(invalid_argument(format!(
            "Field path segment '{segment}' contains the reserved '{FIELD_PATH_DELIMITER}' delimiter"
        )));
    }
    Ok(())
}

/// A single field path segment: either a field name or a numeric key.
pub trait IntoFieldSegment {
    fn into_field_segment(self) -> String;
}

impl IntoFieldSegment for String {
    fn into_field_segment(self) -> String {
        self
    }
}

impl IntoFieldSegment for &String {
    fn into_field_segment(self) -> String {
        self.clone()
    }
}

impl IntoFieldSegment for &str {
    fn into_field_segment(self) -> String {
        self.to_string()
    }
}

macro_rules! impl_numeric_segment {
    ($($ty:ty),* $(,)?) => {
        $(
            impl IntoFieldSegment for $ty {
                fn into_field_segment(self) -> String {
                    self.to_string()
                }
            }
        )*
    };
}

impl_numeric_segment!(u8, u16, u32, u64, usize, i32, i64);

/// Trait that converts common user inputs into a validated [`FieldPath`].
pub trait IntoFieldPath {
    fn into_field_path(self) -> DocstoreResult<FieldPath>;
}

impl IntoFieldPath for FieldPath {
    fn into_field_path(self) -> DocstoreResult<FieldPath> {
        Ok(self)
    }
}

impl IntoFieldPath for &FieldPath {
    fn into_field_path(self) -> DocstoreResult<FieldPath> {
        Ok(self.clone())
    }
}

impl IntoFieldPath for &str {
    fn into_field_path(self) -> DocstoreResult<FieldPath> {
        FieldPath::from_dot_separated(self)
    }
}

impl IntoFieldPath for String {
    fn into_field_path(self) -> DocstoreResult<FieldPath> {
        FieldPath::from_dot_separated(&self)
    }
}

impl<S: IntoFieldSegment, const N: usize> IntoFieldPath for [S; N] {
    fn into_field_path(self) -> DocstoreResult<FieldPath> {
        FieldPath::new(self)
    }
}

impl<S: IntoFieldSegment> IntoFieldPath for Vec<S> {
    fn into_field_path(self) -> DocstoreResult<FieldPath> {
        FieldPath::new(self)
    }
}
