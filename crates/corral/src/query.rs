//! Query pipeline: reads, population, counting, raw aggregation
//!
//! Reads are built as aggregation pipelines so reference population can be
//! expressed as `$lookup` + `$unwind` stages injected between the match and
//! the projection/sort/pagination stages.

use bson::{doc, Bson, Document};
use futures::TryStreamExt;
use serde::Serialize;
use tracing::warn;

use crate::entity::Entity;
use crate::hook::Op;
use crate::model::{to_document, Model};
use crate::type_cache::{type_info, TypeInfo};
use crate::Result;

/// Options for single-document reads.
#[derive(Debug, Clone, Default)]
pub struct FindOneOptions {
    pub sort: Option<Document>,
    pub projection: Option<Document>,
    /// Foreign-key field names to populate via their declared references.
    pub populate: Vec<String>,
}

/// Options for multi-document reads.
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    pub sort: Option<Document>,
    pub projection: Option<Document>,
    pub skip: Option<u64>,
    pub limit: Option<i64>,
    /// Foreign-key field names to populate via their declared references.
    pub populate: Vec<String>,
}

impl<E: Entity> Model<E> {
    /// Returns every document matching the filter, optionally populated,
    /// projected, sorted and paginated.
    pub async fn find<F: Serialize>(&self, filter: F, options: FindOptions) -> Result<Vec<E>> {
        let filter = to_document(&filter)?;
        self.pre_hook(Op::Find, &[Bson::Document(filter.clone())])
            .await?;
        self.guard_filter(&filter)?;

        let pipeline = build_pipeline(
            type_info::<E>(),
            filter,
            &options.populate,
            options.projection,
            options.sort,
            options.skip,
            options.limit,
        );

        let cursor = self.collection()?.aggregate(pipeline).await?;
        let documents: Vec<Document> = cursor.try_collect().await?;
        let mut results = Vec::with_capacity(documents.len());
        for document in documents {
            results.push(bson::from_document(document)?);
        }

        self.post_hook(Op::Find, &[]).await?;
        Ok(results)
    }

    /// Returns the first document matching the filter, or `None` when
    /// nothing matches.
    pub async fn find_one<F: Serialize>(
        &self,
        filter: F,
        options: FindOneOptions,
    ) -> Result<Option<E>> {
        let filter = to_document(&filter)?;
        self.pre_hook(Op::FindOne, &[Bson::Document(filter.clone())])
            .await?;
        self.guard_filter(&filter)?;

        let pipeline = build_pipeline(
            type_info::<E>(),
            filter,
            &options.populate,
            options.projection,
            options.sort,
            None,
            Some(1),
        );

        let cursor = self.collection()?.aggregate(pipeline).await?;
        let documents: Vec<Document> = cursor.try_collect().await?;
        let Some(document) = documents.into_iter().next() else {
            return Ok(None);
        };
        let entity: E = bson::from_document(document)?;

        self.post_hook(Op::FindOne, &[]).await?;
        Ok(Some(entity))
    }

    /// Looks up a document by id. A malformed id string fails with
    /// [`InvalidId`](crate::Error::InvalidId) before any store round trip.
    pub async fn find_by_id(&self, id: &str, options: FindOneOptions) -> Result<Option<E>> {
        let filter = self.id_filter(id)?;
        self.find_one(filter, options).await
    }

    /// Counts documents matching the filter.
    pub async fn count<F: Serialize>(&self, filter: F) -> Result<u64> {
        let filter = to_document(&filter)?;
        self.pre_hook(Op::Count, &[Bson::Document(filter.clone())])
            .await?;
        self.guard_filter(&filter)?;

        let count = self.collection()?.count_documents(filter).await?;

        self.post_hook(Op::Count, &[Bson::Int64(count as i64)])
            .await?;
        Ok(count)
    }

    /// Runs a raw aggregation pipeline against the bound collection.
    pub async fn aggregate(
        &self,
        pipeline: impl IntoIterator<Item = Document>,
    ) -> Result<Vec<Document>> {
        let cursor = self.collection()?.aggregate(pipeline).await?;
        Ok(cursor.try_collect().await?)
    }
}

/// Assembles the read pipeline: `$match`, one `$lookup` + `$unwind` pair per
/// populated reference, then `$project`/`$sort`/`$skip`/`$limit`. Populate
/// keys without a declared reference are skipped with a warning.
pub(crate) fn build_pipeline(
    info: &TypeInfo,
    filter: Document,
    populate: &[String],
    projection: Option<Document>,
    sort: Option<Document>,
    skip: Option<u64>,
    limit: Option<i64>,
) -> Vec<Document> {
    let mut pipeline = vec![doc! { "$match": filter }];

    for key in populate {
        let Some(ref_path) = info.refs.get(key.as_str()) else {
            warn!(
                collection = info.collection,
                foreign_key = key.as_str(),
                "no reference declared for populate key"
            );
            continue;
        };
        pipeline.push(doc! {
            "$lookup": {
                "from": ref_path.from,
                "localField": ref_path.foreign_key,
                "foreignField": "_id",
                "as": ref_path.as_alias,
            }
        });
        pipeline.push(doc! {
            "$unwind": { "path": format!("${}", ref_path.as_alias) }
        });
    }

    if let Some(projection) = projection {
        pipeline.push(doc! { "$project": projection });
    }
    if let Some(sort) = sort {
        pipeline.push(doc! { "$sort": sort });
    }
    if let Some(skip) = skip {
        pipeline.push(doc! { "$skip": skip as i64 });
    }
    if let Some(limit) = limit {
        pipeline.push(doc! { "$limit": limit });
    }

    pipeline
}
