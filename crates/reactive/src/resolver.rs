//! Lookup resolution.
//!
//! Before a session starts, its pipeline is scanned once for join stages.
//! A join whose source is a live collection handle becomes an extra
//! dependency to watch, and the stage is rewritten to reference the
//! collection by name. Joins given by name are left alone and not watched.

use reagg_core::{Error, Result};
use reagg_store::{CollectionRef, JoinSource, ObserverSpec, ResolvedLookup, ResolvedStage, Stage};
use std::fmt;

/// A collection plus the filter/options the session's output depends on.
#[derive(Clone)]
pub struct Dependency {
    pub collection: CollectionRef,
    pub spec: ObserverSpec,
}

impl Dependency {
    /// Creates a dependency.
    pub fn new(collection: CollectionRef, spec: ObserverSpec) -> Self {
        Self { collection, spec }
    }

    /// Name of the watched collection.
    #[inline]
    pub fn collection_name(&self) -> &str {
        self.collection.name()
    }
}

impl fmt::Debug for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dependency")
            .field("collection", &self.collection.name())
            .field("spec", &self.spec)
            .finish()
    }
}

/// Output of [`resolve`].
#[derive(Debug)]
pub struct Resolution {
    /// Pipeline with every join source given by name.
    pub pipeline: Vec<ResolvedStage>,
    /// Dependencies extracted from join stages, in stage order.
    pub dependencies: Vec<Dependency>,
}

/// Rewrites `pipeline` into name-only form and collects join dependencies.
pub fn resolve(pipeline: &[Stage]) -> Result<Resolution> {
    let mut resolved = Vec::with_capacity(pipeline.len());
    let mut dependencies = Vec::new();

    for (index, stage) in pipeline.iter().enumerate() {
        match stage {
            Stage::Raw(doc) => resolved.push(ResolvedStage::Raw(doc.clone())),
            Stage::Lookup(lookup) => {
                let from = lookup.from.collection_name().to_string();
                if let JoinSource::ByHandle(collection, spec) = &lookup.from {
                    dependencies.push(Dependency::new(collection.clone(), spec.clone()));
                }
                if from.is_empty() {
                    return Err(Error::configuration(format!(
                        "stage {}: $lookup has an empty source collection name",
                        index
                    )));
                }
                if lookup.as_field.is_empty() {
                    return Err(Error::configuration(format!(
                        "stage {}: $lookup has an empty `as` field",
                        index
                    )));
                }
                resolved.push(ResolvedStage::Lookup(ResolvedLookup {
                    from,
                    local_field: lookup.local_field.clone(),
                    foreign_field: lookup.foreign_field.clone(),
                    as_field: lookup.as_field.clone(),
                }));
            }
        }
    }

    Ok(Resolution {
        pipeline: resolved,
        dependencies,
    })
}
