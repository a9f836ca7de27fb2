//! Running pipelines against the primary collection.

use crate::resolver::resolve;
use reagg_core::{Document, Error, Result};
use reagg_store::{CollectionRef, QueryOptions, ResolvedStage, Stage};
use std::sync::Arc;

/// Runs `pipeline` once on a blocking worker.
///
/// The future can be dropped at any point; the worker then finishes on its
/// own and its result is discarded.
pub(crate) async fn run_pipeline(
    collection: CollectionRef,
    pipeline: Arc<[ResolvedStage]>,
    options: QueryOptions,
) -> Result<Vec<Document>> {
    tokio::task::spawn_blocking(move || collection.execute(&pipeline, &options))
        .await
        .map_err(|e| Error::execution(format!("pipeline worker failed: {}", e)))?
}

/// Non-reactive mode: resolves join sources to names and runs the pipeline
/// once, without watching anything.
pub fn execute_once(collection: &CollectionRef, pipeline: &[Stage], options: &QueryOptions) -> Result<Vec<Document>> {
    let resolution = resolve(pipeline)?;
    tracing::debug!(
        collection = collection.name(),
        stages = resolution.pipeline.len(),
        "executing pipeline once"
    );
    collection.execute(&resolution.pipeline, options)
}
