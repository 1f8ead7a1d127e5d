//! Filter sanitization against NoSQL operator injection
//!
//! Walks a filter value and rejects any document key matching a fixed
//! denylist of query operators. The check is a denylist, not a sigil
//! blacklist: unknown `$`-prefixed keys pass.

use bson::{Bson, Document};

use crate::{Error, Result};

/// MongoDB query operators that could be exploited for NoSQL injection when
/// user input is passed directly to filters.
pub const DANGEROUS_OPERATORS: &[&str] = &[
    // Comparison operators
    "$gt", "$gte", "$lt", "$lte", "$ne", "$nin", "$in",
    // Logical operators
    "$not", "$nor", "$or", "$and",
    // Element operators
    "$exists", "$type",
    // Evaluation operators (most dangerous)
    "$where", "$expr", "$jsonSchema", "$text", "$mod", "$regex",
    // Server-side JavaScript execution (CVE-2025-10061)
    "$function", "$accumulator",
    // Array operators
    "$all", "$elemMatch", "$size",
];

/// Checks if a key starts with `$` and is in the dangerous operators list.
pub fn is_dangerous_operator(key: &str) -> bool {
    key.starts_with('$') && DANGEROUS_OPERATORS.contains(&key)
}

/// Recursively checks a filter value for dangerous MongoDB operators.
///
/// Returns [`Error::DangerousOperator`] naming the first offending key.
/// Call this before passing user-controlled input to query functions.
pub fn sanitize_filter(filter: &Bson) -> Result<()> {
    match filter {
        Bson::Document(doc) => sanitize_document(doc),
        Bson::Array(items) => {
            for item in items {
                sanitize_filter(item)?;
            }
            Ok(())
        }
        // Scalars are safe.
        _ => Ok(()),
    }
}

/// Document form of [`sanitize_filter`]: every key is checked against the
/// denylist and every value recursed.
pub fn sanitize_document(doc: &Document) -> Result<()> {
    for (key, value) in doc {
        if is_dangerous_operator(key) {
            return Err(Error::DangerousOperator(key.clone()));
        }
        sanitize_filter(value)?;
    }
    Ok(())
}
