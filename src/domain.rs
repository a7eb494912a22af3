use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::QueryError;

/// Separates a tag from the sample identifier it qualifies (`<tag>_<id>`).
///
/// Tags never contain the separator, so a tagged identifier is always split on
/// its first occurrence and a bare identifier never contains it.
pub const TAG_SEPARATOR: char = '_';

/// Separates the identifier from its tag in the display form (`<id>.<tag>`).
pub const DISPLAY_SEPARATOR: char = '.';

/// A sample identifier as requested by a caller or as stored in a context.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum SampleId {
    Bare(String),
    Tagged { tag: String, id: String },
}

impl SampleId {
    pub fn bare(id: impl Into<String>) -> Result<Self, QueryError> {
        let id = id.into();
        if id.is_empty() || id.contains(TAG_SEPARATOR) {
            return Err(QueryError::InvalidSampleId(id));
        }
        Ok(Self::Bare(id))
    }

    pub fn tagged(tag: impl Into<String>, id: impl Into<String>) -> Result<Self, QueryError> {
        let tag = tag.into();
        let id = id.into();
        if tag.is_empty() || id.is_empty() || tag.contains(TAG_SEPARATOR) {
            return Err(QueryError::InvalidSampleId(format!(
                "{tag}{TAG_SEPARATOR}{id}"
            )));
        }
        Ok(Self::Tagged { tag, id })
    }

    /// The identifier with any tag removed.
    pub fn id(&self) -> &str {
        match self {
            SampleId::Bare(id) => id,
            SampleId::Tagged { id, .. } => id,
        }
    }

    pub fn tag(&self) -> Option<&str> {
        match self {
            SampleId::Bare(_) => None,
            SampleId::Tagged { tag, .. } => Some(tag),
        }
    }

    pub fn is_tagged(&self) -> bool {
        matches!(self, SampleId::Tagged { .. })
    }

    /// Storage form, `<tag>_<id>` or the bare id.
    pub fn storage_key(&self) -> String {
        self.to_string()
    }

    /// Human facing form, `<id>.<tag>` or the bare id.
    pub fn display_form(&self) -> String {
        match self {
            SampleId::Bare(id) => id.clone(),
            SampleId::Tagged { tag, id } => format!("{id}{DISPLAY_SEPARATOR}{tag}"),
        }
    }

    /// The physical variant of `id` stored under `tag`; the empty tag denotes
    /// an untagged copy.
    pub fn variant(tag: &str, id: &str) -> Result<Self, QueryError> {
        if tag.is_empty() {
            Self::bare(id)
        } else {
            Self::tagged(tag, id)
        }
    }
}

impl fmt::Display for SampleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleId::Bare(id) => write!(f, "{id}"),
            SampleId::Tagged { tag, id } => write!(f, "{tag}{TAG_SEPARATOR}{id}"),
        }
    }
}

impl FromStr for SampleId {
    type Err = QueryError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        match trimmed.split_once(TAG_SEPARATOR) {
            Some((tag, id)) if !tag.is_empty() && !id.is_empty() => {
                Ok(Self::Tagged {
                    tag: tag.to_string(),
                    id: id.to_string(),
                })
            }
            Some(_) => Err(QueryError::InvalidSampleId(value.to_string())),
            None if trimmed.is_empty() => Err(QueryError::InvalidSampleId(value.to_string())),
            None => Ok(Self::Bare(trimmed.to_string())),
        }
    }
}

impl From<SampleId> for String {
    fn from(value: SampleId) -> Self {
        value.to_string()
    }
}

impl TryFrom<String> for SampleId {
    type Error = QueryError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Requested identifiers split by whether they carry a tag.
///
/// Both halves keep first-seen order and hold no duplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Partition {
    pub untagged: Vec<SampleId>,
    pub tagged: Vec<SampleId>,
}

impl Partition {
    /// All identifiers, untagged first.
    pub fn into_all(self) -> Vec<SampleId> {
        let mut all = self.untagged;
        all.extend(self.tagged);
        all
    }
}

pub fn partition_samples<I, T>(samples: I) -> Result<Partition, QueryError>
where
    I: IntoIterator<Item = T>,
    T: AsRef<str>,
{
    let mut seen = BTreeSet::new();
    let mut partition = Partition::default();
    for sample in samples {
        let sample: SampleId = sample.as_ref().parse()?;
        if !seen.insert(sample.clone()) {
            continue;
        }
        if sample.is_tagged() {
            partition.tagged.push(sample);
        } else {
            partition.untagged.push(sample);
        }
    }
    Ok(partition)
}

/// Rewrites a storage form identifier into its display form. Identifiers that
/// do not parse are returned unchanged.
pub fn to_display_form(storage_key: &str) -> String {
    storage_key
        .parse::<SampleId>()
        .map(|id| id.display_form())
        .unwrap_or_else(|_| storage_key.to_string())
}
