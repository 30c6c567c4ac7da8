//! References: compact pointers to records awaiting indexing.
//!
//! A reference travels through the queue as a single string:
//!
//! ```text
//! <variant>|<collection_id>|<routing>|<arg>|<arg>...
//! ```
//!
//! The variant tag selects a [`ReferenceKind`] in the [`ReferenceRegistry`],
//! which rebuilds the concrete reference. Tags that are not registered
//! decode to `None` so that entries written by a newer producer are skipped
//! rather than failing the whole drain.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use tracing::debug;

use crate::collection::{CollectionCache, CollectionRecord, EmbeddingVersion};
use crate::document::{Document, Operation};
use crate::error::ReferenceError;

/// Separator between fields of a serialized reference.
pub const DELIMITER: char = '|';

/// State shared by every reference variant.
#[derive(Debug, Clone)]
pub struct ReferenceCore {
    pub collection_id: u64,
    pub routing: String,
    /// Variant-specific arguments, in wire order
    pub args: Vec<String>,
    /// Seconds since epoch when this instance was built
    pub ref_version: i64,
    collection: Option<Arc<CollectionRecord>>,
    documents: Option<Vec<Map<String, Value>>>,
}

impl ReferenceCore {
    pub fn new(collection_id: u64, routing: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            collection_id,
            routing: routing.into(),
            args,
            ref_version: Utc::now().timestamp(),
            collection: None,
            documents: None,
        }
    }

    pub fn with_collection(mut self, collection: Arc<CollectionRecord>) -> Self {
        self.collection = Some(collection);
        self
    }

    /// Attach documents up front; `as_indexed_jsons` is then never called.
    pub fn with_documents(mut self, documents: Vec<Map<String, Value>>) -> Self {
        self.documents = Some(documents);
        self
    }

    pub fn set_collection(&mut self, collection: Option<Arc<CollectionRecord>>) {
        self.collection = collection;
    }

    pub fn set_documents(&mut self, documents: Vec<Map<String, Value>>) {
        self.documents = Some(documents);
    }

    pub fn collection(&self) -> Option<&CollectionRecord> {
        self.collection.as_deref()
    }

    pub fn documents(&self) -> Option<&[Map<String, Value>]> {
        self.documents.as_deref()
    }

    /// Argument at `index`, or a `Malformed` error naming the variant.
    pub fn arg(&self, variant: &str, index: usize) -> Result<&str, ReferenceError> {
        self.args.get(index).map(String::as_str).ok_or_else(|| {
            ReferenceError::malformed(variant, format!("missing argument {}", index))
        })
    }
}

/// A pointer to a record that should be (re)indexed.
///
/// Implementors provide the variant tag, access to their [`ReferenceCore`]
/// and the record lookup; serialization and document assembly are shared.
#[async_trait]
pub trait Reference: Send + Sync + fmt::Debug {
    /// Tag written as the first wire field
    fn variant(&self) -> &'static str;

    fn core(&self) -> &ReferenceCore;

    fn core_mut(&mut self) -> &mut ReferenceCore;

    /// Stable identity of the referenced record
    fn identifier(&self) -> String;

    fn operation(&self) -> Operation {
        Operation::Upsert
    }

    /// Load the record(s) and render one JSON object per document.
    async fn as_indexed_jsons(&self) -> Result<Vec<Map<String, Value>>, ReferenceError>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;

    fn collection_id(&self) -> u64 {
        self.core().collection_id
    }

    fn routing(&self) -> &str {
        &self.core().routing
    }

    fn args(&self) -> &[String] {
        &self.core().args
    }

    fn ref_version(&self) -> i64 {
        self.core().ref_version
    }

    fn serialize(&self) -> Result<String, ReferenceError> {
        let core = self.core();
        serialize_fields(self.variant(), core.collection_id, &core.routing, &core.args)
    }

    fn unique_identifier(&self, index: usize) -> String {
        format!("{}:{}", self.identifier(), index)
    }

    /// Active embedding versions of the owning collection; empty when unknown.
    fn embedding_versions(&self) -> Vec<EmbeddingVersion> {
        self.core()
            .collection()
            .map(|c| c.embedding_versions.clone())
            .unwrap_or_default()
    }

    /// Assemble the documents to send to the backend.
    async fn jsons(&self) -> Result<Vec<Document>, ReferenceError> {
        let core = self.core();
        let collection = core
            .collection()
            .ok_or(ReferenceError::UnknownCollection(core.collection_id))?;

        let raw = match core.documents() {
            Some(documents) => documents.to_vec(),
            None => self.as_indexed_jsons().await?,
        };

        let identifier = self.identifier();
        let operation = self.operation();

        let documents = raw
            .into_iter()
            .enumerate()
            .map(|(index, fields)| {
                let mut source = collection.shared_attributes.clone();
                source.extend(fields);

                let unique_identifier = self.unique_identifier(index);
                source.insert(
                    "unique_identifier".to_string(),
                    Value::String(unique_identifier.clone()),
                );
                if collection.include_ref_fields {
                    source.insert("ref_id".to_string(), Value::String(identifier.clone()));
                    source.insert("ref_version".to_string(), Value::from(core.ref_version));
                }

                Document {
                    collection: collection.name.clone(),
                    unique_identifier,
                    routing: Some(core.routing.clone()),
                    operation,
                    source,
                }
            })
            .collect();

        Ok(documents)
    }
}

/// Join fields into the wire format, rejecting any that contain the delimiter.
pub fn serialize_fields(
    variant: &str,
    collection_id: u64,
    routing: &str,
    args: &[String],
) -> Result<String, ReferenceError> {
    let collection_id = collection_id.to_string();
    let fields = [variant, collection_id.as_str(), routing]
        .into_iter()
        .chain(args.iter().map(String::as_str));

    let mut out = String::new();
    for (i, field) in fields.enumerate() {
        if field.contains(DELIMITER) {
            return Err(ReferenceError::DelimiterInField(field.to_string()));
        }
        if i > 0 {
            out.push(DELIMITER);
        }
        out.push_str(field);
    }
    Ok(out)
}

/// Decoder and batch preloader for one reference variant.
#[async_trait]
pub trait ReferenceKind: Send + Sync {
    /// Tag this kind decodes
    fn variant(&self) -> &'static str;

    /// Build a reference from its decoded core, validating `core.args`.
    fn decode(&self, core: ReferenceCore) -> Result<Box<dyn Reference>, ReferenceError>;

    /// Prefetch whatever the group needs in one round trip.
    ///
    /// Called once per drain with every reference of this variant.
    async fn preload_refs(&self, _refs: &mut [Box<dyn Reference>]) -> Result<(), ReferenceError> {
        Ok(())
    }
}

/// Tag-to-kind lookup used when reading queue entries back.
pub struct ReferenceRegistry {
    kinds: HashMap<&'static str, Arc<dyn ReferenceKind>>,
    collections: Arc<CollectionCache>,
}

impl ReferenceRegistry {
    pub fn new(collections: Arc<CollectionCache>) -> Self {
        Self {
            kinds: HashMap::new(),
            collections,
        }
    }

    /// Register a kind. Each tag may be registered once.
    pub fn register(&mut self, kind: Arc<dyn ReferenceKind>) -> Result<(), ReferenceError> {
        let variant = kind.variant();
        if variant.contains(DELIMITER) {
            return Err(ReferenceError::DelimiterInField(variant.to_string()));
        }
        if self.kinds.contains_key(variant) {
            return Err(ReferenceError::DuplicateVariant(variant.to_string()));
        }
        self.kinds.insert(variant, kind);
        Ok(())
    }

    pub fn with_kind(mut self, kind: Arc<dyn ReferenceKind>) -> Result<Self, ReferenceError> {
        self.register(kind)?;
        Ok(self)
    }

    pub fn kind(&self, variant: &str) -> Option<&Arc<dyn ReferenceKind>> {
        self.kinds.get(variant)
    }

    pub fn variants(&self) -> Vec<&'static str> {
        let mut variants: Vec<_> = self.kinds.keys().copied().collect();
        variants.sort_unstable();
        variants
    }

    pub fn collections(&self) -> &Arc<CollectionCache> {
        &self.collections
    }

    /// Decode a wire string.
    ///
    /// Returns `Ok(None)` for unregistered tags and `Err(Malformed)` when a
    /// registered tag is followed by unusable fields.
    pub fn deserialize(&self, input: &str) -> Result<Option<Box<dyn Reference>>, ReferenceError> {
        let mut fields = input.split(DELIMITER);
        let variant = fields.next().unwrap_or_default();

        let Some(kind) = self.kinds.get(variant) else {
            debug!(variant = %variant, "Skipping reference with unknown variant");
            return Ok(None);
        };

        let collection_id = fields
            .next()
            .ok_or_else(|| ReferenceError::malformed(input, "missing collection id"))?
            .parse::<u64>()
            .map_err(|e| ReferenceError::malformed(input, format!("bad collection id: {}", e)))?;
        let routing = fields
            .next()
            .ok_or_else(|| ReferenceError::malformed(input, "missing routing"))?;
        let args = fields.map(str::to_string).collect();

        let mut core = ReferenceCore::new(collection_id, routing, args);
        core.set_collection(self.collections.fetch(collection_id));

        kind.decode(core)
            .map(Some)
            .map_err(|e| match e {
                ReferenceError::Malformed { reason, .. } => ReferenceError::malformed(input, reason),
                other => other,
            })
    }
}

impl fmt::Debug for ReferenceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReferenceRegistry")
            .field("variants", &self.variants())
            .field("collections", &self.collections.len())
            .finish()
    }
}
