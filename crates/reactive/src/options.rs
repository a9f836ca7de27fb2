//! Subscription options.
//!
//! `SubscribeOptions` carries everything a reactive session needs besides
//! the pipeline itself: what to watch on the primary collection, the
//! throttle delay, where to publish, how to read identities and the optional
//! document transforms.

use reagg_core::{Document, DocumentId, Error, Result, DEFAULT_ID_FIELD};
use reagg_store::{ObserverSpec, Stage};
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Default throttle delay between re-evaluations.
pub const DEFAULT_DELAY: Duration = Duration::from_millis(250);

/// Transform applied to an added or changed document before publishing.
pub type DocumentTransform = Arc<dyn Fn(Document) -> Document + Send + Sync>;

/// Hook invoked before a removal is published. Only the identity is known.
pub type RemoveHook = Arc<dyn Fn(&DocumentId) + Send + Sync>;

/// Produces the pipeline and primary observer spec for a new session.
pub type PipelineSource = Arc<dyn Fn() -> (Vec<Stage>, ObserverSpec) + Send + Sync>;

/// Optional per-event transforms. A missing transform publishes the
/// document unmodified.
///
/// Transforms receive their own copy of the document and must not touch
/// shared state.
#[derive(Clone, Default)]
pub struct Transforms {
    pub before_add: Option<DocumentTransform>,
    pub before_change: Option<DocumentTransform>,
    pub before_remove: Option<RemoveHook>,
}

impl Transforms {
    pub(crate) fn on_add(&self, doc: Document) -> Document {
        match &self.before_add {
            Some(f) => f(doc),
            None => doc,
        }
    }

    pub(crate) fn on_change(&self, doc: Document) -> Document {
        match &self.before_change {
            Some(f) => f(doc),
            None => doc,
        }
    }

    pub(crate) fn on_remove(&self, id: &DocumentId) {
        if let Some(f) = &self.before_remove {
            f(id);
        }
    }
}

impl fmt::Debug for Transforms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transforms")
            .field("before_add", &self.before_add.is_some())
            .field("before_change", &self.before_change.is_some())
            .field("before_remove", &self.before_remove.is_some())
            .finish()
    }
}

/// Options for a reactive subscription.
#[derive(Clone)]
pub struct SubscribeOptions {
    /// What to watch on the primary collection; its options are also passed
    /// to the executor.
    pub observer: ObserverSpec,
    /// Throttle delay.
    pub delay: Duration,
    /// Collection name events are published under. Defaults to the primary
    /// collection's name.
    pub destination: Option<String>,
    /// Identity field of result documents.
    pub id_field: String,
    /// Document transforms.
    pub transforms: Transforms,
    /// Called once at subscribe time; overrides the pipeline and `observer`.
    pub pipeline_source: Option<PipelineSource>,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self {
            observer: ObserverSpec::default(),
            delay: DEFAULT_DELAY,
            destination: None,
            id_field: DEFAULT_ID_FIELD.to_string(),
            transforms: Transforms::default(),
            pipeline_source: None,
        }
    }
}

impl fmt::Debug for SubscribeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscribeOptions")
            .field("observer", &self.observer)
            .field("delay", &self.delay)
            .field("destination", &self.destination)
            .field("id_field", &self.id_field)
            .field("transforms", &self.transforms)
            .field("pipeline_source", &self.pipeline_source.is_some())
            .finish()
    }
}

impl SubscribeOptions {
    /// Starts a builder from the defaults.
    pub fn builder() -> SubscribeOptionsBuilder {
        SubscribeOptionsBuilder {
            options: SubscribeOptions::default(),
        }
    }

    /// Checks option values that can be validated without a collection.
    pub fn validate(&self) -> Result<()> {
        if self.id_field.is_empty() {
            return Err(Error::configuration("id_field must not be empty"));
        }
        if Instant::now().checked_add(self.delay).is_none() {
            return Err(Error::configuration(format!(
                "delay {:?} is too large to schedule",
                self.delay
            )));
        }
        if let Some(destination) = &self.destination {
            if destination.is_empty() {
                return Err(Error::configuration("destination collection name must not be empty"));
            }
        }
        Ok(())
    }
}

/// Builder for [`SubscribeOptions`].
pub struct SubscribeOptionsBuilder {
    options: SubscribeOptions,
}

impl SubscribeOptionsBuilder {
    /// Sets the primary observer spec.
    pub fn observer(mut self, observer: ObserverSpec) -> Self {
        self.options.observer = observer;
        self
    }

    /// Sets the primary observer query, keeping the current options.
    pub fn observer_query(mut self, query: Document) -> Self {
        self.options.observer.query = query;
        self
    }

    /// Sets the throttle delay.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.options.delay = delay;
        self
    }

    /// Sets the destination collection name.
    pub fn destination(mut self, name: impl Into<String>) -> Self {
        self.options.destination = Some(name.into());
        self
    }

    /// Sets the identity field.
    pub fn id_field(mut self, field: impl Into<String>) -> Self {
        self.options.id_field = field.into();
        self
    }

    /// Transform applied to added documents.
    pub fn before_add<F>(mut self, f: F) -> Self
    where
        F: Fn(Document) -> Document + Send + Sync + 'static,
    {
        self.options.transforms.before_add = Some(Arc::new(f));
        self
    }

    /// Transform applied to changed documents.
    pub fn before_change<F>(mut self, f: F) -> Self
    where
        F: Fn(Document) -> Document + Send + Sync + 'static,
    {
        self.options.transforms.before_change = Some(Arc::new(f));
        self
    }

    /// Hook invoked before a removal is published.
    pub fn before_remove<F>(mut self, f: F) -> Self
    where
        F: Fn(&DocumentId) + Send + Sync + 'static,
    {
        self.options.transforms.before_remove = Some(Arc::new(f));
        self
    }

    /// Function producing the pipeline and observer at subscribe time.
    pub fn pipeline_source<F>(mut self, f: F) -> Self
    where
        F: Fn() -> (Vec<Stage>, ObserverSpec) + Send + Sync + 'static,
    {
        self.options.pipeline_source = Some(Arc::new(f));
        self
    }

    /// Validates and returns the options.
    pub fn build(self) -> Result<SubscribeOptions> {
        self.options.validate()?;
        Ok(self.options)
    }
}

/// Serializable subset of [`SubscribeOptions`], for loading subscriptions
/// from configuration files.
///
/// ```
/// use reagg_reactive::SubscribeConfig;
///
/// let config: SubscribeConfig =
///     serde_json::from_str(r#"{"delay_ms": 100, "destination": "report"}"#).unwrap();
/// let options = config.into_options().unwrap();
/// assert_eq!(options.delay.as_millis(), 100);
/// ```
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SubscribeConfig {
    pub observer: ObserverSpec,
    pub delay_ms: u64,
    pub destination: Option<String>,
    pub id_field: String,
}

impl Default for SubscribeConfig {
    fn default() -> Self {
        Self {
            observer: ObserverSpec::default(),
            delay_ms: DEFAULT_DELAY.as_millis() as u64,
            destination: None,
            id_field: DEFAULT_ID_FIELD.to_string(),
        }
    }
}

impl SubscribeConfig {
    /// Converts into validated options with no transforms.
    pub fn into_options(self) -> Result<SubscribeOptions> {
        let options = SubscribeOptions {
            observer: self.observer,
            delay: Duration::from_millis(self.delay_ms),
            destination: self.destination,
            id_field: self.id_field,
            ..SubscribeOptions::default()
        };
        options.validate()?;
        Ok(options)
    }
}
