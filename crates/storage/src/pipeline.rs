//! Pipeline model.
//!
//! A pipeline is an ordered list of stages. The engine treats stages as
//! opaque documents except for join (`$lookup`) stages, whose source
//! collection may be given either by name or as a live collection handle.
//! Resolution turns a `Vec<Stage>` into a `Vec<ResolvedStage>` that only
//! references collections by name, which is what executors receive.

use crate::collection::{CollectionName, CollectionRef};
use reagg_core::{Document, Value};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stage key of a join stage.
pub const LOOKUP_STAGE: &str = "$lookup";

/// Options passed through to the store for a query or aggregation.
///
/// The engine does not interpret these.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryOptions {
    /// Sort specification, `field => 1 | -1`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort: Option<Document>,
    /// Number of documents to skip.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip: Option<u64>,
    /// Maximum number of documents.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    /// Field projection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<Document>,
}

/// What to watch on a collection: a filter plus query options.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObserverSpec {
    /// Filter document; empty matches everything.
    pub query: Document,
    /// Query options.
    pub options: QueryOptions,
}

impl ObserverSpec {
    /// Creates a spec with the given filter and default options.
    pub fn with_query(query: Document) -> Self {
        Self {
            query,
            options: QueryOptions::default(),
        }
    }
}

/// Source collection of a join stage.
#[derive(Clone)]
pub enum JoinSource {
    /// Plain collection name. The joined collection is not watched.
    ByName(String),
    /// Live collection handle and what to watch on it.
    ByHandle(CollectionRef, ObserverSpec),
}

impl JoinSource {
    /// Joins a live collection, watching every document in it.
    pub fn handle(collection: CollectionRef) -> Self {
        JoinSource::ByHandle(collection, ObserverSpec::default())
    }

    /// Joins a live collection, watching only what `spec` selects.
    pub fn handle_with(collection: CollectionRef, spec: ObserverSpec) -> Self {
        JoinSource::ByHandle(collection, spec)
    }

    /// Joins a collection by name.
    pub fn name(name: impl Into<String>) -> Self {
        JoinSource::ByName(name.into())
    }

    /// Name of the joined collection.
    pub fn collection_name(&self) -> &str {
        match self {
            JoinSource::ByName(name) => name,
            JoinSource::ByHandle(collection, _) => collection.name(),
        }
    }
}

impl fmt::Debug for JoinSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinSource::ByName(name) => f.debug_tuple("ByName").field(name).finish(),
            JoinSource::ByHandle(collection, spec) => f
                .debug_tuple("ByHandle")
                .field(&CollectionName(collection))
                .field(spec)
                .finish(),
        }
    }
}

/// A join stage: `from` joined on `local_field == foreign_field`, matches
/// stored as an array under `as_field`.
#[derive(Clone, Debug)]
pub struct Lookup {
    pub from: JoinSource,
    pub local_field: String,
    pub foreign_field: String,
    pub as_field: String,
}

impl Lookup {
    /// Creates a join stage.
    pub fn new(
        from: JoinSource,
        local_field: impl Into<String>,
        foreign_field: impl Into<String>,
        as_field: impl Into<String>,
    ) -> Self {
        Self {
            from,
            local_field: local_field.into(),
            foreign_field: foreign_field.into(),
            as_field: as_field.into(),
        }
    }
}

/// A pipeline stage as supplied by the caller.
#[derive(Clone, Debug)]
pub enum Stage {
    /// Join stage.
    Lookup(Lookup),
    /// Any other stage, passed to the executor untouched.
    Raw(Document),
}

impl Stage {
    /// Wraps an arbitrary stage document.
    pub fn raw(stage: Document) -> Self {
        Stage::Raw(stage)
    }

    /// `{ "$match": filter }`.
    pub fn matching(filter: Document) -> Self {
        Stage::Raw(Document::new().with("$match", filter))
    }

    /// Join stage.
    pub fn lookup(
        from: JoinSource,
        local_field: impl Into<String>,
        foreign_field: impl Into<String>,
        as_field: impl Into<String>,
    ) -> Self {
        Stage::Lookup(Lookup::new(from, local_field, foreign_field, as_field))
    }
}

impl From<ResolvedStage> for Stage {
    fn from(stage: ResolvedStage) -> Self {
        match stage {
            ResolvedStage::Lookup(lookup) => Stage::Lookup(Lookup {
                from: JoinSource::ByName(lookup.from),
                local_field: lookup.local_field,
                foreign_field: lookup.foreign_field,
                as_field: lookup.as_field,
            }),
            ResolvedStage::Raw(doc) => Stage::Raw(doc),
        }
    }
}

/// A join stage that references its source collection by name only.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedLookup {
    pub from: String,
    pub local_field: String,
    pub foreign_field: String,
    pub as_field: String,
}

/// A pipeline stage in the form executors receive.
///
/// Serializes to the conventional document shape, e.g.
/// `{"$lookup": {"from": "orders", "localField": "_id", "foreignField": "user", "as": "orders"}}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "Document", try_from = "Document")]
pub enum ResolvedStage {
    Lookup(ResolvedLookup),
    Raw(Document),
}

impl ResolvedStage {
    /// Returns the stage's operator key (`$match`, `$lookup`, ...), if any.
    pub fn operator(&self) -> Option<&str> {
        match self {
            ResolvedStage::Lookup(_) => Some(LOOKUP_STAGE),
            ResolvedStage::Raw(doc) => doc.iter().next().map(|(key, _)| key.as_str()),
        }
    }
}

impl From<ResolvedStage> for Document {
    fn from(stage: ResolvedStage) -> Self {
        match stage {
            ResolvedStage::Lookup(lookup) => {
                let body = Document::new()
                    .with("from", lookup.from)
                    .with("localField", lookup.local_field)
                    .with("foreignField", lookup.foreign_field)
                    .with("as", lookup.as_field);
                Document::new().with(LOOKUP_STAGE, body)
            }
            ResolvedStage::Raw(doc) => doc,
        }
    }
}

impl TryFrom<Document> for ResolvedStage {
    type Error = String;

    fn try_from(doc: Document) -> core::result::Result<Self, Self::Error> {
        let body = match doc.get(LOOKUP_STAGE) {
            None => return Ok(ResolvedStage::Raw(doc)),
            Some(Value::Object(body)) => body,
            Some(other) => {
                return Err(format!("$lookup expects a document, got {}", other.type_name()));
            }
        };
        let field = |name: &str| -> core::result::Result<String, String> {
            body.get(name)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| format!("$lookup.{} must be a string", name))
        };
        Ok(ResolvedStage::Lookup(ResolvedLookup {
            from: field("from")?,
            local_field: field("localField")?,
            foreign_field: field("foreignField")?,
            as_field: field("as")?,
        }))
    }
}
