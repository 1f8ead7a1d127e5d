//! Generic entity gateway
//!
//! A [`Model`] binds an [`Entity`] type to a live collection and runs every
//! operation through a fixed pipeline: pre-hook, filter sanitization (strict
//! mode), wire-document conversion, payload serialization, driver call,
//! result decoding, post-hook.

use std::marker::PhantomData;

use bson::oid::ObjectId;
use bson::{doc, Bson, DateTime, Document};
use mongodb::options::IndexOptions;
use mongodb::{Client, Collection, IndexModel};
use serde::Serialize;
use tracing::warn;

use crate::connection::Connection;
use crate::entity::{Entity, CREATED_AT_KEY, ID_KEY, UPDATED_AT_KEY};
use crate::hook::{parse_ops, run_hooks, Hook, HookFn, Op};
use crate::sanitize::sanitize_document;
use crate::type_cache::type_info;
use crate::{Error, Result};

/// Per-model behavior switches.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    /// Generate a fresh ObjectId on insert.
    pub id: bool,
    /// Stamp createdAt/updatedAt on mutations.
    pub timestamp: bool,
    /// Run the entity's validation seam before serialization.
    pub validation: bool,
    /// Reject denylisted operators in caller-supplied filters. Off by
    /// default for backward compatibility.
    pub strict_filter: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            id: true,
            timestamp: true,
            validation: true,
            strict_filter: false,
        }
    }
}

/// Generic gateway binding an entity type to a collection.
pub struct Model<E: Entity> {
    pub(crate) config: ModelConfig,
    pub(crate) client: Option<Client>,
    pub(crate) collection: Option<Collection<Document>>,
    pub(crate) pending: Vec<(String, Bson)>,
    pub(crate) pre_hooks: Vec<Hook>,
    pub(crate) post_hooks: Vec<Hook>,
    pub(crate) index: Option<IndexModel>,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> Default for Model<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Entity> Model<E> {
    /// Creates a detached model with default configuration. The model becomes
    /// usable after [`bind`](Model::bind).
    pub fn new() -> Self {
        Self::with_config(ModelConfig::default())
    }

    /// Creates a detached model with explicit configuration.
    pub fn with_config(config: ModelConfig) -> Self {
        Self {
            config,
            client: None,
            collection: None,
            pending: Vec::new(),
            pre_hooks: Vec::new(),
            post_hooks: Vec::new(),
            index: None,
            _entity: PhantomData,
        }
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Declares an index provisioned on bind.
    pub fn index(&mut self, keys: Document, unique: bool) {
        let options = IndexOptions::builder().unique(unique).build();
        self.index = Some(IndexModel::builder().keys(keys).options(options).build());
    }

    /// Binds the model to a connection, resolving the collection and
    /// provisioning a declared index. Index failures are logged, not fatal.
    pub async fn bind(&mut self, connection: &Connection) {
        let info = type_info::<E>();
        let collection = connection.collection(info.collection);

        if let Some(index) = self.index.clone() {
            if let Err(err) = collection.create_index(index).await {
                warn!(collection = info.collection, error = %err, "failed to create index");
            }
        }

        self.client = Some(connection.client().clone());
        self.collection = Some(collection);
    }

    /// Registers a synchronous pre-hook for the pipe-delimited operation
    /// names, e.g. `"find|count|findOne"`.
    pub fn pre(&mut self, names: &str, func: HookFn) {
        for op in parse_ops(names) {
            self.pre_hooks.push(Hook {
                op,
                func: func.clone(),
                detached: false,
            });
        }
    }

    /// Registers a fire-and-forget pre-hook: it is spawned without a join and
    /// its errors are dropped.
    pub fn pre_detached(&mut self, names: &str, func: HookFn) {
        for op in parse_ops(names) {
            self.pre_hooks.push(Hook {
                op,
                func: func.clone(),
                detached: true,
            });
        }
    }

    /// Registers a synchronous post-hook.
    pub fn post(&mut self, names: &str, func: HookFn) {
        for op in parse_ops(names) {
            self.post_hooks.push(Hook {
                op,
                func: func.clone(),
                detached: false,
            });
        }
    }

    /// Registers a fire-and-forget post-hook.
    pub fn post_detached(&mut self, names: &str, func: HookFn) {
        for op in parse_ops(names) {
            self.post_hooks.push(Hook {
                op,
                func: func.clone(),
                detached: true,
            });
        }
    }

    pub(crate) fn collection(&self) -> Result<&Collection<Document>> {
        self.collection
            .as_ref()
            .ok_or_else(|| Error::Internal("model is not bound to a connection".to_string()))
    }

    pub(crate) fn client(&self) -> Result<&Client> {
        self.client
            .as_ref()
            .ok_or_else(|| Error::Internal("model is not bound to a connection".to_string()))
    }

    pub(crate) async fn pre_hook(&self, op: Op, args: &[Bson]) -> Result<()> {
        run_hooks(&self.pre_hooks, op, args).await
    }

    pub(crate) async fn post_hook(&self, op: Op, args: &[Bson]) -> Result<()> {
        run_hooks(&self.post_hooks, op, args).await
    }

    /// Applies filter sanitization when strict mode is on.
    pub(crate) fn guard_filter(&self, filter: &Document) -> Result<()> {
        if self.config.strict_filter {
            sanitize_document(filter)?;
        }
        Ok(())
    }

    /// Builds a by-id filter. With id generation enabled the string must be
    /// a valid ObjectId hex and parse failures surface [`Error::InvalidId`]
    /// without a store round trip; otherwise the raw string is the key.
    pub(crate) fn id_filter(&self, id: &str) -> Result<Document> {
        if self.config.id {
            let object_id = ObjectId::parse_str(id)?;
            Ok(doc! { ID_KEY: object_id })
        } else {
            Ok(doc! { ID_KEY: id })
        }
    }

    /// Buffers field-level sets for a later [`save`](Model::save). Every
    /// non-null entry of the serialized partial whose key exists in the
    /// entity's storage-key map is appended to the pending document.
    pub fn set<T: Serialize>(&mut self, partial: &T) -> Result<()> {
        let doc = to_document(partial)?;
        let info = type_info::<E>();
        for (key, value) in doc {
            if value == Bson::Null {
                continue;
            }
            if info.by_key.contains_key(key.as_str()) {
                self.pending.push((key, value));
            }
        }
        Ok(())
    }

    /// Flushes the pending document: without an `_id` entry it inserts
    /// (stamping identity/timestamps per configuration), with one it updates
    /// that document (stamping updatedAt only). The buffer clears on success
    /// and stays intact on failure.
    pub async fn save(&mut self) -> Result<()> {
        let snapshot: Document = self.pending.iter().cloned().collect();
        self.pre_hook(Op::Save, &[Bson::Document(snapshot)]).await?;

        if self.pending.is_empty() {
            return Ok(());
        }

        let collection = self.collection()?;
        let id_position = self.pending.iter().position(|(key, _)| key == ID_KEY);

        match id_position {
            None => {
                let mut document: Document = self.pending.iter().cloned().collect();
                if self.config.id {
                    document.insert(ID_KEY, ObjectId::new());
                }
                if self.config.timestamp {
                    let now = DateTime::now();
                    document.insert(CREATED_AT_KEY, now);
                    document.insert(UPDATED_AT_KEY, now);
                }
                collection.insert_one(document).await?;
            }
            Some(position) => {
                let id = self.pending[position].1.clone();
                let mut update = Document::new();
                for (i, (key, value)) in self.pending.iter().enumerate() {
                    if i != position {
                        update.insert(key.clone(), value.clone());
                    }
                }
                if self.config.timestamp {
                    update.insert(UPDATED_AT_KEY, DateTime::now());
                }
                collection
                    .update_one(doc! { ID_KEY: id }, doc! { "$set": update })
                    .await?;
            }
        }

        self.post_hook(Op::Save, &[]).await?;
        self.pending.clear();
        Ok(())
    }
}

/// Converts a serializable value to a wire document. `None` and unit-like
/// inputs become the empty document; anything that does not serialize to a
/// document is an error.
pub fn to_document<T: Serialize>(value: &T) -> Result<Document> {
    match bson::to_bson(value)? {
        Bson::Document(doc) => Ok(doc),
        Bson::Null => Ok(Document::new()),
        other => Err(Error::Serialization(format!(
            "filter must serialize to a document, got {:?}",
            other
        ))),
    }
}
