//! Entity trait and schema declaration
//!
//! Entities describe their persisted shape through an explicitly registered
//! field-descriptor table ([`Entity::fields`]) instead of runtime struct
//! inspection. The table is compiled once per type into a
//! [`TypeInfo`](crate::type_cache::TypeInfo) by the type metadata registry.
//!
//! # Example
//!
//! ```ignore
//! use corral::{BaseSchema, Entity, FieldSpec};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Default, Serialize, Deserialize)]
//! struct User {
//!     #[serde(flatten)]
//!     base: BaseSchema,
//!     name: String,
//!     #[serde(skip_serializing_if = "Option::is_none")]
//!     author: Option<bson::Document>,
//! }
//!
//! impl Entity for User {
//!     fn collection_name() -> &'static str {
//!         "users"
//!     }
//!
//!     fn fields() -> Vec<FieldSpec> {
//!         vec![
//!             FieldSpec::base_schema("base"),
//!             FieldSpec::new("name", "name"),
//!             FieldSpec::new("author", "author").reference("author_id->users"),
//!         ]
//!     }
//!
//!     fn base_mut(&mut self) -> Option<&mut BaseSchema> {
//!         Some(&mut self.base)
//!     }
//! }
//! ```

use bson::oid::ObjectId;
use bson::DateTime;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Storage key of the identity field.
pub const ID_KEY: &str = "_id";
/// Storage key of the creation timestamp.
pub const CREATED_AT_KEY: &str = "createdAt";
/// Storage key of the last-update timestamp.
pub const UPDATED_AT_KEY: &str = "updatedAt";

/// Embeddable identity + timestamp block.
///
/// Embed with `#[serde(flatten)]` and expose it through
/// [`Entity::base_mut`] so the serializer can stamp inserts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BaseSchema {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    #[serde(rename = "createdAt", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime>,
    #[serde(rename = "updatedAt", skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime>,
}

/// Embeddable timestamp-only block for collections without a managed id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BaseTimestamp {
    #[serde(rename = "createdAt", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime>,
    #[serde(rename = "updatedAt", skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime>,
}

/// Shape of a single declared field.
#[derive(Debug, Clone)]
pub enum FieldKind {
    /// Plain value persisted under its storage key.
    Scalar,
    /// Embedded [`BaseSchema`] block; flattens to `_id`/`createdAt`/`updatedAt`.
    BaseSchema,
    /// Embedded [`BaseTimestamp`] block; flattens to `createdAt`/`updatedAt`.
    BaseTimestamp,
    /// Embedded struct whose fields are promoted into the flattened list.
    Embedded(Vec<FieldSpec>),
}

/// A single entry in an entity's field-descriptor table.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    /// Declared (Rust) field name.
    pub name: &'static str,
    /// Wire-level field name. Empty means the field has no storage key and is
    /// excluded from update extraction.
    pub key: &'static str,
    /// Excluded from update/replace mass-assignment when set.
    pub readonly: bool,
    /// Reference declaration in `"foreignKey->collection"` form.
    pub reference: Option<&'static str>,
    pub kind: FieldKind,
}

impl FieldSpec {
    /// Declares a scalar field persisted under `key`.
    pub fn new(name: &'static str, key: &'static str) -> Self {
        Self {
            name,
            key,
            readonly: false,
            reference: None,
            kind: FieldKind::Scalar,
        }
    }

    /// Declares an embedded [`BaseSchema`] block.
    pub fn base_schema(name: &'static str) -> Self {
        Self {
            name,
            key: "",
            readonly: false,
            reference: None,
            kind: FieldKind::BaseSchema,
        }
    }

    /// Declares an embedded [`BaseTimestamp`] block.
    pub fn base_timestamp(name: &'static str) -> Self {
        Self {
            name,
            key: "",
            readonly: false,
            reference: None,
            kind: FieldKind::BaseTimestamp,
        }
    }

    /// Declares an embedded struct whose fields are promoted into the
    /// flattened field list. On storage-key collisions the first declaration
    /// wins.
    pub fn embedded(name: &'static str, fields: Vec<FieldSpec>) -> Self {
        Self {
            name,
            key: "",
            readonly: false,
            reference: None,
            kind: FieldKind::Embedded(fields),
        }
    }

    /// Marks the field readonly: its caller-supplied value is honored on
    /// insert but never emitted on update or replace.
    pub fn readonly(mut self) -> Self {
        self.readonly = true;
        self
    }

    /// Attaches a reference declaration of the form
    /// `"foreignKeyField->targetCollection"`. Enables join-style population
    /// of this field; the storage key doubles as the `$lookup` output alias.
    /// Malformed declarations, or declarations on a field without a storage
    /// key, yield no reference path.
    pub fn reference(mut self, decl: &'static str) -> Self {
        self.reference = Some(decl);
        self
    }
}

/// A record type bound to a collection through a [`Model`](crate::Model).
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Collection name this entity persists into.
    ///
    /// The default derives the name from the type's own name; override to
    /// pick an explicit collection.
    fn collection_name() -> &'static str {
        let full = std::any::type_name::<Self>();
        full.rsplit("::").next().unwrap_or(full)
    }

    /// The field-descriptor table for this entity.
    fn fields() -> Vec<FieldSpec>;

    /// Access to the embedded [`BaseSchema`] block, if any. Entities embedding
    /// one override this so inserts can stamp identity and timestamps.
    fn base_mut(&mut self) -> Option<&mut BaseSchema> {
        None
    }

    /// Access to the embedded [`BaseTimestamp`] block, if any.
    fn timestamps_mut(&mut self) -> Option<&mut BaseTimestamp> {
        None
    }

    /// Validation seam invoked before insert/update/replace serialization
    /// when the model has validation enabled. Wire a field validator here;
    /// the default accepts everything.
    fn validate(&self) -> Result<()> {
        Ok(())
    }
}
