//! Type metadata registry
//!
//! Compiles an entity's field-descriptor table into a flattened, indexed
//! [`TypeInfo`] exactly once per type for the process lifetime. Lookups are
//! concurrency-safe; the write path uses double-checked locking so concurrent
//! first callers still observe a single shared instance.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use once_cell::sync::Lazy;

use crate::entity::{
    Entity, FieldKind, FieldSpec, CREATED_AT_KEY, ID_KEY, UPDATED_AT_KEY,
};

/// Metadata for a single flattened field.
#[derive(Debug, Clone)]
pub struct FieldInfo {
    /// Declared field name.
    pub name: &'static str,
    /// Storage key; empty for unkeyed fields.
    pub key: &'static str,
    /// Excluded from update/replace extraction.
    pub readonly: bool,
    /// Raw reference declaration, if any.
    pub reference: Option<&'static str>,
    /// True for embedded-container entries whose children are promoted.
    pub container: bool,
    /// Positional path through the (possibly nested) declaration tree.
    pub index_path: Vec<usize>,
}

/// A resolved reference path for join-style population.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefPath {
    /// Referenced collection.
    pub from: &'static str,
    /// Foreign-key field matched against the referenced collection's `_id`.
    pub foreign_key: &'static str,
    /// Output field the joined document is written into.
    pub as_alias: &'static str,
}

/// Compiled metadata for an entity type.
#[derive(Debug)]
pub struct TypeInfo {
    /// Collection name resolved from the entity.
    pub collection: &'static str,
    /// Flattened ordered field list, embedded declarations promoted.
    pub fields: Vec<FieldInfo>,
    /// Lookup by declared name; first declaration wins for promoted fields.
    pub by_name: HashMap<&'static str, usize>,
    /// Lookup by storage key; first declaration wins.
    pub by_key: HashMap<&'static str, usize>,
    /// Reference paths keyed by foreign-key field name.
    pub refs: HashMap<&'static str, RefPath>,
}

static CACHE: Lazy<RwLock<HashMap<TypeId, &'static TypeInfo>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Returns the compiled [`TypeInfo`] for `E`, computing it on first use.
///
/// Every caller for the same type receives the same `&'static` instance.
pub fn type_info<E: Entity>() -> &'static TypeInfo {
    let id = TypeId::of::<E>();

    // Fast path: probe under the read lock.
    {
        let cache = CACHE.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(info) = cache.get(&id) {
            return info;
        }
    }

    // Slow path: re-check under the write lock before computing.
    let mut cache = CACHE.write().unwrap_or_else(PoisonError::into_inner);
    if let Some(info) = cache.get(&id) {
        return info;
    }

    let info: &'static TypeInfo = Box::leak(Box::new(compute::<E>()));
    cache.insert(id, info);
    info
}

fn compute<E: Entity>() -> TypeInfo {
    let mut fields = Vec::new();
    collect_fields(&E::fields(), &mut fields, &[]);

    let mut by_name = HashMap::new();
    let mut by_key = HashMap::new();
    let mut refs = HashMap::new();

    for (i, field) in fields.iter().enumerate() {
        by_name.entry(field.name).or_insert(i);
        if !field.key.is_empty() {
            by_key.entry(field.key).or_insert(i);
        }
        if let Some(decl) = field.reference {
            if let Some(ref_path) = parse_ref_path(decl, field.key) {
                refs.entry(ref_path.foreign_key).or_insert(ref_path);
            }
        }
    }

    TypeInfo {
        collection: E::collection_name(),
        fields,
        by_name,
        by_key,
        refs,
    }
}

fn collect_fields(specs: &[FieldSpec], out: &mut Vec<FieldInfo>, path: &[usize]) {
    for (i, spec) in specs.iter().enumerate() {
        let mut index_path = path.to_vec();
        index_path.push(i);

        let container = !matches!(spec.kind, FieldKind::Scalar);
        out.push(FieldInfo {
            name: spec.name,
            key: spec.key,
            readonly: spec.readonly,
            reference: spec.reference,
            container,
            index_path: index_path.clone(),
        });

        match &spec.kind {
            FieldKind::Scalar => {}
            FieldKind::BaseSchema => {
                collect_fields(&base_schema_fields(), out, &index_path);
            }
            FieldKind::BaseTimestamp => {
                collect_fields(&base_timestamp_fields(), out, &index_path);
            }
            FieldKind::Embedded(children) => {
                collect_fields(children, out, &index_path);
            }
        }
    }
}

fn base_schema_fields() -> Vec<FieldSpec> {
    vec![
        FieldSpec::new("id", ID_KEY),
        FieldSpec::new("created_at", CREATED_AT_KEY),
        FieldSpec::new("updated_at", UPDATED_AT_KEY),
    ]
}

fn base_timestamp_fields() -> Vec<FieldSpec> {
    vec![
        FieldSpec::new("created_at", CREATED_AT_KEY),
        FieldSpec::new("updated_at", UPDATED_AT_KEY),
    ]
}

/// Parses a `"foreignKey->collection"` declaration. The declaring field must
/// carry a storage key, which becomes the `$lookup` output alias. Malformed
/// declarations yield `None` rather than an error.
fn parse_ref_path(decl: &'static str, key: &'static str) -> Option<RefPath> {
    if key.is_empty() {
        return None;
    }
    let (foreign_key, from) = decl.split_once("->")?;
    if foreign_key.is_empty() || from.is_empty() {
        return None;
    }
    Some(RefPath {
        from,
        foreign_key,
        as_alias: key,
    })
}
