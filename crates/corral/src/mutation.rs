//! Mutation pipeline: document serialization and write operations
//!
//! The serializer has two paths. Inserts stamp identity and timestamps in
//! place through the entity's capability accessors. Updates and replaces
//! extract an ordered key-value list from the serialized entity, honoring
//! readonly and zero-value-skip policy: callers signal "do not touch" by
//! leaving a field at its zero value.

use bson::oid::ObjectId;
use bson::{doc, Bson, DateTime, Document};
use mongodb::results::{DeleteResult, InsertManyResult, InsertOneResult, UpdateResult};
use serde::Serialize;

use crate::entity::{Entity, CREATED_AT_KEY, ID_KEY, UPDATED_AT_KEY};
use crate::hook::Op;
use crate::model::{to_document, Model};
use crate::type_cache::type_info;
use crate::Result;

const RESERVED_KEYS: &[&str] = &[ID_KEY, CREATED_AT_KEY, UPDATED_AT_KEY];

impl<E: Entity> Model<E> {
    /// Inserts a new document. The input is stamped in place: a fresh
    /// ObjectId when id generation is on, createdAt/updatedAt when
    /// timestamping is on.
    pub async fn create(&self, input: &mut E) -> Result<InsertOneResult> {
        self.pre_hook(Op::Create, &[]).await?;

        self.stamp_insert(input).await?;
        let document = bson::to_document(input)?;

        let result = self.collection()?.insert_one(document).await?;

        self.post_hook(Op::Create, &[result.inserted_id.clone()])
            .await?;
        Ok(result)
    }

    /// Inserts a batch of documents, stamping each input in place.
    pub async fn create_many(&self, inputs: &mut [E]) -> Result<InsertManyResult> {
        self.pre_hook(Op::CreateMany, &[]).await?;

        let mut documents = Vec::with_capacity(inputs.len());
        for input in inputs.iter_mut() {
            self.stamp_insert(input).await?;
            documents.push(bson::to_document(&*input)?);
        }

        let result = self.collection()?.insert_many(documents).await?;

        self.post_hook(Op::CreateMany, &[]).await?;
        Ok(result)
    }

    /// Updates the first document matching the filter with a `$set` of the
    /// input's non-zero, non-readonly fields.
    pub async fn update<F: Serialize>(&self, filter: F, data: &E) -> Result<UpdateResult> {
        let filter = to_document(&filter)?;
        self.pre_hook(Op::Update, &[Bson::Document(filter.clone())])
            .await?;
        self.guard_filter(&filter)?;

        let update = self.update_pairs(data, false).await?;
        let set: Document = update.into_iter().collect();

        let result = self
            .collection()?
            .update_one(filter, doc! { "$set": set })
            .await?;

        self.post_hook(Op::Update, &[]).await?;
        Ok(result)
    }

    /// Updates the document with the given id.
    pub async fn update_by_id(&self, id: &str, data: &E) -> Result<UpdateResult> {
        let filter = self.id_filter(id)?;
        self.update(filter, data).await
    }

    /// Updates every document matching the filter.
    pub async fn update_many<F: Serialize>(&self, filter: F, data: &E) -> Result<UpdateResult> {
        let filter = to_document(&filter)?;
        self.pre_hook(Op::UpdateMany, &[Bson::Document(filter.clone())])
            .await?;
        self.guard_filter(&filter)?;

        let update = self.update_pairs(data, false).await?;
        let set: Document = update.into_iter().collect();

        let result = self
            .collection()?
            .update_many(filter, doc! { "$set": set })
            .await?;

        self.post_hook(Op::UpdateMany, &[]).await?;
        Ok(result)
    }

    /// Deletes the first document matching the filter.
    pub async fn delete<F: Serialize>(&self, filter: F) -> Result<DeleteResult> {
        let filter = to_document(&filter)?;
        self.pre_hook(Op::Delete, &[Bson::Document(filter.clone())])
            .await?;
        self.guard_filter(&filter)?;

        let result = self.collection()?.delete_one(filter).await?;

        self.post_hook(Op::Delete, &[]).await?;
        Ok(result)
    }

    /// Deletes the document with the given id.
    pub async fn delete_by_id(&self, id: &str) -> Result<DeleteResult> {
        let filter = self.id_filter(id)?;
        self.delete(filter).await
    }

    /// Deletes every document matching the filter.
    pub async fn delete_many<F: Serialize>(&self, filter: F) -> Result<DeleteResult> {
        let filter = to_document(&filter)?;
        self.pre_hook(Op::DeleteMany, &[Bson::Document(filter.clone())])
            .await?;
        self.guard_filter(&filter)?;

        let result = self.collection()?.delete_many(filter).await?;

        self.post_hook(Op::DeleteMany, &[]).await?;
        Ok(result)
    }

    /// Atomically updates the first matching document and returns its
    /// pre-update state. No match is `Ok(None)`, not an error.
    pub async fn find_one_and_update<F: Serialize>(
        &self,
        filter: F,
        data: &E,
    ) -> Result<Option<E>> {
        let filter = to_document(&filter)?;
        self.pre_hook(Op::FindOneAndUpdate, &[Bson::Document(filter.clone())])
            .await?;
        self.guard_filter(&filter)?;

        let update = self.update_pairs(data, false).await?;
        let set: Document = update.into_iter().collect();

        let found = self
            .collection()?
            .find_one_and_update(filter, doc! { "$set": set })
            .await?;
        let entity = match found {
            Some(document) => Some(bson::from_document(document)?),
            None => None,
        };

        self.post_hook(Op::FindOneAndUpdate, &[]).await?;
        Ok(entity)
    }

    /// Atomically deletes the first matching document and returns it. No
    /// match is `Ok(None)`, not an error.
    pub async fn find_one_and_delete<F: Serialize>(&self, filter: F) -> Result<Option<E>> {
        let filter = to_document(&filter)?;
        self.pre_hook(Op::FindOneAndDelete, &[Bson::Document(filter.clone())])
            .await?;
        self.guard_filter(&filter)?;

        let found = self.collection()?.find_one_and_delete(filter).await?;
        let entity = match found {
            Some(document) => Some(bson::from_document(document)?),
            None => None,
        };

        self.post_hook(Op::FindOneAndDelete, &[]).await?;
        Ok(entity)
    }

    /// Atomically replaces the first matching document and returns its
    /// previous state. The replacement carries createdAt/updatedAt stamps
    /// when timestamping is on.
    pub async fn find_one_and_replace<F: Serialize>(
        &self,
        filter: F,
        data: &E,
    ) -> Result<Option<E>> {
        let filter = to_document(&filter)?;
        self.pre_hook(Op::FindOneAndReplace, &[Bson::Document(filter.clone())])
            .await?;
        self.guard_filter(&filter)?;

        let replacement: Document = self.update_pairs(data, true).await?.into_iter().collect();

        let found = self
            .collection()?
            .find_one_and_replace(filter, replacement)
            .await?;
        let entity = match found {
            Some(document) => Some(bson::from_document(document)?),
            None => None,
        };

        self.post_hook(Op::FindOneAndReplace, &[]).await?;
        Ok(entity)
    }

    async fn run_validation(&self, data: &E) -> Result<()> {
        if !self.config.validation {
            return Ok(());
        }
        self.pre_hook(Op::Validate, &[]).await?;
        data.validate()?;
        self.post_hook(Op::Validate, &[]).await?;
        Ok(())
    }

    /// Insert path of the serializer: validate, then stamp identity and
    /// timestamps in place through the entity's capability accessors.
    pub(crate) async fn stamp_insert(&self, data: &mut E) -> Result<()> {
        self.run_validation(data).await?;

        if let Some(base) = data.base_mut() {
            if self.config.id {
                base.id = Some(ObjectId::new());
            }
            if self.config.timestamp {
                let now = DateTime::now();
                base.created_at = Some(now);
                base.updated_at = Some(now);
            }
        }
        if self.config.timestamp {
            if let Some(timestamps) = data.timestamps_mut() {
                let now = DateTime::now();
                timestamps.created_at = Some(now);
                timestamps.updated_at = Some(now);
            }
        }
        Ok(())
    }

    /// Update/replace path of the serializer: validate, then build the
    /// ordered key-value list. Timestamps come first (createdAt only when
    /// replacing), then every keyed field in declared order, skipping
    /// identity/timestamp slots, readonly fields, and zero values.
    pub(crate) async fn update_pairs(&self, data: &E, replace: bool) -> Result<Vec<(String, Bson)>> {
        self.run_validation(data).await?;

        let mut pairs = Vec::new();
        if self.config.timestamp {
            let now = DateTime::now();
            if replace {
                pairs.push((CREATED_AT_KEY.to_string(), Bson::DateTime(now)));
            }
            pairs.push((UPDATED_AT_KEY.to_string(), Bson::DateTime(now)));
        }

        let document = bson::to_document(data)?;
        let info = type_info::<E>();
        for field in &info.fields {
            if field.container || field.key.is_empty() || field.readonly {
                continue;
            }
            if RESERVED_KEYS.contains(&field.key) {
                continue;
            }
            let Some(value) = document.get(field.key) else {
                continue;
            };
            if is_zero(value) {
                continue;
            }
            pairs.push((field.key.to_string(), value.clone()));
        }

        Ok(pairs)
    }
}

/// Zero-value test backing the partial-update-by-omission convention.
pub(crate) fn is_zero(value: &Bson) -> bool {
    match value {
        Bson::Null => true,
        Bson::String(s) => s.is_empty(),
        Bson::Int32(n) => *n == 0,
        Bson::Int64(n) => *n == 0,
        Bson::Double(n) => *n == 0.0,
        Bson::Boolean(b) => !b,
        Bson::Array(items) => items.is_empty(),
        Bson::Document(doc) => doc.is_empty(),
        Bson::ObjectId(oid) => oid.bytes() == [0u8; 12],
        Bson::DateTime(dt) => dt.timestamp_millis() == 0,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{BaseSchema, BaseTimestamp, FieldSpec};
    use crate::model::ModelConfig;
    use crate::{Error, Result};
    use serde::Deserialize;

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct Article {
        #[serde(flatten)]
        base: BaseSchema,
        title: String,
        status: String,
        views: i64,
        slug: String,
    }

    impl Entity for Article {
        fn collection_name() -> &'static str {
            "articles"
        }

        fn fields() -> Vec<FieldSpec> {
            vec![
                FieldSpec::base_schema("base"),
                FieldSpec::new("title", "title"),
                FieldSpec::new("status", "status"),
                FieldSpec::new("views", "views"),
                FieldSpec::new("slug", "slug").readonly(),
            ]
        }

        fn base_mut(&mut self) -> Option<&mut BaseSchema> {
            Some(&mut self.base)
        }
    }

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct AuditEvent {
        #[serde(flatten)]
        stamps: BaseTimestamp,
        action: String,
    }

    impl Entity for AuditEvent {
        fn fields() -> Vec<FieldSpec> {
            vec![
                FieldSpec::base_timestamp("stamps"),
                FieldSpec::new("action", "action"),
            ]
        }

        fn timestamps_mut(&mut self) -> Option<&mut BaseTimestamp> {
            Some(&mut self.stamps)
        }
    }

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct Strict {
        name: String,
    }

    impl Entity for Strict {
        fn fields() -> Vec<FieldSpec> {
            vec![FieldSpec::new("name", "name")]
        }

        fn validate(&self) -> Result<()> {
            if self.name.is_empty() {
                return Err(Error::Validation("name is required".to_string()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_stamp_insert_assigns_identity_and_timestamps() {
        let model = Model::<Article>::new();
        let before = DateTime::now();
        let mut article = Article {
            title: "hello".to_string(),
            ..Article::default()
        };

        model.stamp_insert(&mut article).await.unwrap();

        let id = article.base.id.expect("id stamped");
        assert_ne!(id.bytes(), [0u8; 12]);
        assert!(article.base.created_at.unwrap() >= before);
        assert!(article.base.updated_at.unwrap() >= before);
    }

    #[tokio::test]
    async fn test_stamp_insert_respects_disabled_switches() {
        let model = Model::<Article>::with_config(ModelConfig {
            id: false,
            timestamp: false,
            ..ModelConfig::default()
        });
        let mut article = Article::default();

        model.stamp_insert(&mut article).await.unwrap();

        assert!(article.base.id.is_none());
        assert!(article.base.created_at.is_none());
    }

    #[tokio::test]
    async fn test_stamp_insert_fills_timestamp_only_entities() {
        let model = Model::<AuditEvent>::new();
        let mut event = AuditEvent::default();

        model.stamp_insert(&mut event).await.unwrap();

        assert!(event.stamps.created_at.is_some());
        assert!(event.stamps.updated_at.is_some());
    }

    #[tokio::test]
    async fn test_update_pairs_skips_zero_values() {
        let model = Model::<Article>::new();
        let data = Article {
            status: "published".to_string(),
            ..Article::default()
        };

        let pairs = model.update_pairs(&data, false).await.unwrap();
        let keys: Vec<&str> = pairs.iter().map(|(k, _)| k.as_str()).collect();

        assert_eq!(keys, vec!["updatedAt", "status"]);
    }

    #[tokio::test]
    async fn test_update_pairs_with_all_zero_input_still_carries_timestamp() {
        let model = Model::<Article>::new();
        let pairs = model.update_pairs(&Article::default(), false).await.unwrap();
        let keys: Vec<&str> = pairs.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["updatedAt"]);
    }

    #[tokio::test]
    async fn test_update_pairs_without_timestamping_can_be_empty() {
        let model = Model::<Article>::with_config(ModelConfig {
            timestamp: false,
            ..ModelConfig::default()
        });
        let pairs = model.update_pairs(&Article::default(), false).await.unwrap();
        assert!(pairs.is_empty());
    }

    #[tokio::test]
    async fn test_replace_pairs_lead_with_both_timestamps() {
        let model = Model::<Article>::new();
        let data = Article {
            title: "replaced".to_string(),
            ..Article::default()
        };

        let pairs = model.update_pairs(&data, true).await.unwrap();
        let keys: Vec<&str> = pairs.iter().map(|(k, _)| k.as_str()).collect();

        assert_eq!(keys, vec!["createdAt", "updatedAt", "title"]);
    }

    #[tokio::test]
    async fn test_readonly_field_never_in_update_pairs() {
        let model = Model::<Article>::new();
        let data = Article {
            slug: "immutable-slug".to_string(),
            title: "t".to_string(),
            ..Article::default()
        };

        for replace in [false, true] {
            let pairs = model.update_pairs(&data, replace).await.unwrap();
            assert!(pairs.iter().all(|(k, _)| k != "slug"));
        }
    }

    #[tokio::test]
    async fn test_readonly_field_is_honored_on_insert() {
        let model = Model::<Article>::new();
        let mut article = Article {
            slug: "initial-slug".to_string(),
            ..Article::default()
        };

        model.stamp_insert(&mut article).await.unwrap();
        let document = bson::to_document(&article).unwrap();

        assert_eq!(document.get_str("slug").unwrap(), "initial-slug");
    }

    #[tokio::test]
    async fn test_identity_never_in_update_pairs() {
        let model = Model::<Article>::new();
        let mut data = Article::default();
        data.base.id = Some(ObjectId::new());

        let pairs = model.update_pairs(&data, false).await.unwrap();
        assert!(pairs.iter().all(|(k, _)| k != "_id"));
    }

    #[tokio::test]
    async fn test_validation_failure_aborts_before_extraction() {
        let model = Model::<Strict>::new();
        let err = model
            .update_pairs(&Strict::default(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_validation_can_be_disabled() {
        let model = Model::<Strict>::with_config(ModelConfig {
            validation: false,
            ..ModelConfig::default()
        });
        assert!(model.update_pairs(&Strict::default(), false).await.is_ok());
    }

    #[test]
    fn test_is_zero_table() {
        assert!(is_zero(&Bson::Null));
        assert!(is_zero(&Bson::String(String::new())));
        assert!(is_zero(&Bson::Int32(0)));
        assert!(is_zero(&Bson::Int64(0)));
        assert!(is_zero(&Bson::Double(0.0)));
        assert!(is_zero(&Bson::Boolean(false)));
        assert!(is_zero(&Bson::Array(vec![])));
        assert!(is_zero(&Bson::Document(Document::new())));
        assert!(is_zero(&Bson::ObjectId(ObjectId::from_bytes([0u8; 12]))));

        assert!(!is_zero(&Bson::String("x".to_string())));
        assert!(!is_zero(&Bson::Int64(-1)));
        assert!(!is_zero(&Bson::Boolean(true)));
        assert!(!is_zero(&Bson::ObjectId(ObjectId::new())));
        assert!(!is_zero(&Bson::DateTime(DateTime::now())));
    }
}
