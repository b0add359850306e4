//! Typed view over the raw graph query result.
//!
//! A result row is one subject node plus the outgoing relationships collected
//! for it. Rows are decoded once here; projectors only read through
//! [`PropertyMap`] and never look at raw driver shapes.

use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

use crate::codec;
use crate::error::ProjectionError;

/// Node label marking a course target.
pub const COURSE: &str = "Course";
pub const DEGREE: &str = "Degree";
pub const STUDY_SESSION: &str = "StudySession";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationshipKind {
    Completed,
    EnrolledIn,
    Pursuing,
    SimilarLearningStyle,
    Attended,
    Other(String),
}

impl RelationshipKind {
    pub fn parse(label: &str) -> Self {
        match label {
            "COMPLETED" => Self::Completed,
            "ENROLLED_IN" => Self::EnrolledIn,
            "PURSUING" => Self::Pursuing,
            "SIMILAR_LEARNING_STYLE" => Self::SimilarLearningStyle,
            "ATTENDED" => Self::Attended,
            other => Self::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct PropertyMap(Map<String, Value>);

impl PropertyMap {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key).filter(|value| !value.is_null())
    }

    pub fn string(&self, key: &str) -> String {
        codec::decode_string(self.get(key))
    }

    pub fn number(&self, key: &str) -> f64 {
        codec::decode_number(self.get(key))
    }

    pub fn integer(&self, key: &str) -> i64 {
        codec::decode_integer(self.get(key))
    }

    pub fn strings(&self, key: &str) -> Vec<String> {
        codec::decode_string_list(self.get(key))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GraphNode {
    #[serde(default, deserialize_with = "null_as_default")]
    pub labels: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub properties: PropertyMap,
}

impl GraphNode {
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }
}

/// One `{relationship, properties, target}` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct RelationshipTriple {
    #[serde(rename = "relationship", alias = "relationshipType", default)]
    pub relationship_type: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub properties: PropertyMap,
    #[serde(default)]
    pub target: Option<GraphNode>,
}

impl RelationshipTriple {
    pub fn kind(&self) -> Option<RelationshipKind> {
        self.relationship_type.as_deref().map(RelationshipKind::parse)
    }

    /// Looks a key up on the relationship first, then on the target node.
    pub fn merged(&self, key: &str) -> Option<&Value> {
        self.properties
            .get(key)
            .or_else(|| self.target.as_ref().and_then(|t| t.properties.get(key)))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StudentRecord {
    #[serde(rename = "s", alias = "subject", default)]
    pub subject: Option<GraphNode>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub relationships: Vec<RelationshipTriple>,
}

impl StudentRecord {
    /// Decodes element 0 of a raw result array.
    pub fn from_rows(rows: &Value) -> Result<Self, ProjectionError> {
        let rows = rows.as_array().ok_or(ProjectionError::NotAnArray)?;
        let first = rows.first().ok_or(ProjectionError::Empty)?;
        Ok(Self::deserialize(first)?)
    }

    /// Relationships of the given kind whose target node is present.
    ///
    /// `OPTIONAL MATCH` produces a single all-null entry for students with no
    /// outgoing edges; those never match a kind.
    pub fn related<'a>(
        &'a self,
        kind: RelationshipKind,
    ) -> impl Iterator<Item = (&'a RelationshipTriple, &'a GraphNode)> + 'a {
        self.relationships.iter().filter_map(move |rel| {
            let target = rel.target.as_ref()?;
            (rel.kind()? == kind).then_some((rel, target))
        })
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
