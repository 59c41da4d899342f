// services/ledger.rs
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use futures::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId, Document};
use mongodb::options::ReturnDocument;
use mongodb::{Collection, Database};
use tokio::sync::RwLock;

use crate::errors::Result;
use crate::models::transaction::{
    NewTransaction, PaymentOutcome, Transaction, TransactionStatus,
};

/// Durable record of payment attempts: the single source of truth shared by
/// the initiation, callback, and polling timelines.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Inserts a new `pending` row for an accepted initiation.
    async fn create(&self, new: NewTransaction) -> Result<Transaction>;

    async fn find_by_id(&self, id: &ObjectId) -> Result<Option<Transaction>>;

    /// Most recently created `pending` row for the checkout id. The gateway
    /// may reuse checkout ids across retries; the newest match wins.
    async fn find_pending_by_checkout_id(
        &self,
        checkout_id: &str,
    ) -> Result<Option<Transaction>>;

    /// Conditional terminal transition: "apply outcome where status is still
    /// pending", against the newest matching row. Returns `None` when nothing
    /// matched, which covers both unknown checkout ids and replayed callbacks
    /// against an already-terminal row; neither is an error and neither
    /// overwrites a stored outcome.
    async fn apply_outcome(
        &self,
        checkout_id: &str,
        outcome: PaymentOutcome,
    ) -> Result<Option<Transaction>>;

    async fn list_recent(&self, limit: i64) -> Result<Vec<Transaction>>;
}

fn outcome_update(outcome: &PaymentOutcome) -> Document {
    // same wire format chrono's serde uses at insert time, so the field holds
    // one string shape collection-wide
    let now = Utc::now().to_rfc3339_opts(SecondsFormat::AutoSi, true);
    match outcome {
        PaymentOutcome::Success { receipt_number } => doc! {
            "$set": {
                "status": TransactionStatus::Success.as_str(),
                "receipt_number": receipt_number,
                "updated_at": now,
            }
        },
        PaymentOutcome::Failed { description } => doc! {
            "$set": {
                "status": TransactionStatus::Failed.as_str(),
                "result_description": description,
                "updated_at": now,
            }
        },
    }
}

#[derive(Clone)]
pub struct MongoTransactionStore {
    collection: Collection<Transaction>,
}

impl MongoTransactionStore {
    pub fn new(db: &Database) -> Self {
        MongoTransactionStore {
            collection: db.collection("transactions"),
        }
    }
}

#[async_trait]
impl TransactionStore for MongoTransactionStore {
    async fn create(&self, new: NewTransaction) -> Result<Transaction> {
        let now = Utc::now();
        let mut tx = Transaction {
            id: None,
            license_plate: new.license_plate,
            phone_number: new.phone_number,
            amount: new.amount,
            status: TransactionStatus::Pending,
            checkout_request_id: new.checkout_request_id,
            merchant_request_id: new.merchant_request_id,
            receipt_number: None,
            result_description: None,
            created_at: now,
            updated_at: now,
        };
        let inserted = self.collection.insert_one(&tx).await?;
        tx.id = inserted.inserted_id.as_object_id();
        Ok(tx)
    }

    async fn find_by_id(&self, id: &ObjectId) -> Result<Option<Transaction>> {
        Ok(self.collection.find_one(doc! { "_id": id }).await?)
    }

    async fn find_pending_by_checkout_id(
        &self,
        checkout_id: &str,
    ) -> Result<Option<Transaction>> {
        let filter = doc! {
            "checkout_request_id": checkout_id,
            "status": TransactionStatus::Pending.as_str(),
        };
        Ok(self
            .collection
            .find_one(filter)
            .sort(doc! { "created_at": -1 })
            .await?)
    }

    async fn apply_outcome(
        &self,
        checkout_id: &str,
        outcome: PaymentOutcome,
    ) -> Result<Option<Transaction>> {
        // Status guard in the filter makes the transition an atomic
        // compare-and-swap on the server; duplicate callbacks race for one
        // matching pending row and only one of them can win it.
        let filter = doc! {
            "checkout_request_id": checkout_id,
            "status": TransactionStatus::Pending.as_str(),
        };
        Ok(self
            .collection
            .find_one_and_update(filter, outcome_update(&outcome))
            .sort(doc! { "created_at": -1 })
            .return_document(ReturnDocument::After)
            .await?)
    }

    async fn list_recent(&self, limit: i64) -> Result<Vec<Transaction>> {
        let cursor = self
            .collection
            .find(doc! {})
            .sort(doc! { "created_at": -1 })
            .limit(limit)
            .await?;
        Ok(cursor.try_collect().await?)
    }
}

/// In-memory store with the same conditional-update discipline as the Mongo
/// implementation. Used by tests; no persistence.
#[derive(Default, Clone)]
pub struct InMemoryTransactionStore {
    rows: Arc<RwLock<Vec<Transaction>>>,
}

impl InMemoryTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransactionStore for InMemoryTransactionStore {
    async fn create(&self, new: NewTransaction) -> Result<Transaction> {
        let now = Utc::now();
        let tx = Transaction {
            id: Some(ObjectId::new()),
            license_plate: new.license_plate,
            phone_number: new.phone_number,
            amount: new.amount,
            status: TransactionStatus::Pending,
            checkout_request_id: new.checkout_request_id,
            merchant_request_id: new.merchant_request_id,
            receipt_number: None,
            result_description: None,
            created_at: now,
            updated_at: now,
        };
        self.rows.write().await.push(tx.clone());
        Ok(tx)
    }

    async fn find_by_id(&self, id: &ObjectId) -> Result<Option<Transaction>> {
        let rows = self.rows.read().await;
        Ok(rows.iter().find(|tx| tx.id.as_ref() == Some(id)).cloned())
    }

    async fn find_pending_by_checkout_id(
        &self,
        checkout_id: &str,
    ) -> Result<Option<Transaction>> {
        let rows = self.rows.read().await;
        Ok(rows
            .iter()
            .rev()
            .find(|tx| {
                tx.checkout_request_id == checkout_id
                    && tx.status == TransactionStatus::Pending
            })
            .cloned())
    }

    async fn apply_outcome(
        &self,
        checkout_id: &str,
        outcome: PaymentOutcome,
    ) -> Result<Option<Transaction>> {
        // Match and mutate under one write lock: the same read-modify-write
        // atomicity the Mongo filter gives us.
        let mut rows = self.rows.write().await;
        let matched = rows.iter_mut().rev().find(|tx| {
            tx.checkout_request_id == checkout_id && tx.status == TransactionStatus::Pending
        });
        let Some(tx) = matched else {
            return Ok(None);
        };

        match outcome {
            PaymentOutcome::Success { receipt_number } => {
                tx.status = TransactionStatus::Success;
                tx.receipt_number = Some(receipt_number);
            }
            PaymentOutcome::Failed { description } => {
                tx.status = TransactionStatus::Failed;
                tx.result_description = Some(description);
            }
        }
        tx.updated_at = Utc::now();
        Ok(Some(tx.clone()))
    }

    async fn list_recent(&self, limit: i64) -> Result<Vec<Transaction>> {
        let rows = self.rows.read().await;
        Ok(rows.iter().rev().take(limit as usize).cloned().collect())
    }
}
