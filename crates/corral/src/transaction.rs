//! Transactions and session-aware mutations
//!
//! [`Model::transaction`] wraps a caller-supplied closure in a single
//! session transaction: commit on success, abort on error. Operations inside
//! the closure must go through the session-aware variants so they join the
//! transaction.

use bson::{doc, Document};
use futures::future::BoxFuture;
use mongodb::results::{DeleteResult, InsertOneResult, UpdateResult};
use mongodb::ClientSession;
use serde::Serialize;
use tracing::warn;

use crate::entity::Entity;
use crate::hook::Op;
use crate::model::{to_document, Model};
use crate::Result;

impl<E: Entity> Model<E> {
    /// Runs `func` inside a transaction on a fresh session. Any error from
    /// the closure aborts the transaction and is returned to the caller.
    pub async fn transaction<F>(&self, func: F) -> Result<()>
    where
        F: for<'s> FnOnce(&'s mut ClientSession) -> BoxFuture<'s, Result<()>>,
    {
        let mut session = self.client()?.start_session().await?;
        session.start_transaction().await?;

        match func(&mut session).await {
            Ok(()) => {
                session.commit_transaction().await?;
                Ok(())
            }
            Err(err) => {
                if let Err(abort_err) = session.abort_transaction().await {
                    warn!(error = %abort_err, "failed to abort transaction");
                }
                Err(err)
            }
        }
    }

    /// [`create`](Model::create) routed through a session.
    pub async fn create_with_session(
        &self,
        input: &mut E,
        session: &mut ClientSession,
    ) -> Result<InsertOneResult> {
        self.pre_hook(Op::Create, &[]).await?;

        self.stamp_insert(input).await?;
        let document = bson::to_document(input)?;

        let result = self
            .collection()?
            .insert_one(document)
            .session(session)
            .await?;

        self.post_hook(Op::Create, &[result.inserted_id.clone()])
            .await?;
        Ok(result)
    }

    /// [`update`](Model::update) routed through a session.
    pub async fn update_with_session<F: Serialize>(
        &self,
        filter: F,
        data: &E,
        session: &mut ClientSession,
    ) -> Result<UpdateResult> {
        let filter = to_document(&filter)?;
        self.pre_hook(Op::Update, &[bson::Bson::Document(filter.clone())])
            .await?;
        self.guard_filter(&filter)?;

        let update = self.update_pairs(data, false).await?;
        let set: Document = update.into_iter().collect();

        let result = self
            .collection()?
            .update_one(filter, doc! { "$set": set })
            .session(session)
            .await?;

        self.post_hook(Op::Update, &[]).await?;
        Ok(result)
    }

    /// [`delete`](Model::delete) routed through a session.
    pub async fn delete_with_session<F: Serialize>(
        &self,
        filter: F,
        session: &mut ClientSession,
    ) -> Result<DeleteResult> {
        let filter = to_document(&filter)?;
        self.pre_hook(Op::Delete, &[bson::Bson::Document(filter.clone())])
            .await?;
        self.guard_filter(&filter)?;

        let result = self
            .collection()?
            .delete_one(filter)
            .session(session)
            .await?;

        self.post_hook(Op::Delete, &[]).await?;
        Ok(result)
    }
}
