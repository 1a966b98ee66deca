//! MongoDB Instance Store
//!
//! Records live in the `processInstances` collection, one document per
//! (processName, processInstanceNumber). Uniqueness is enforced by an index
//! so that two nodes racing through bootstrap cannot both insert.

use async_trait::async_trait;
use mongodb::bson::doc;
use mongodb::options::IndexOptions;
use mongodb::{Collection, Database, IndexModel};
use tracing::{debug, info};

use crate::error::StoreError;
use crate::record::{InstanceKey, KeepAlive, ProcessInstance};
use crate::store::{InsertOutcome, InstanceStore};

const KEY_INDEX_NAME: &str = "idx_process_instance_key";

pub struct MongoInstanceStore {
    collection: Collection<ProcessInstance>,
}

impl MongoInstanceStore {
    /// Store over the default `processInstances` collection
    pub fn new(db: &Database) -> Self {
        Self::with_collection(db, rc_common::PROCESS_INSTANCES_COLLECTION)
    }

    pub fn with_collection(db: &Database, collection_name: &str) -> Self {
        Self {
            collection: db.collection(collection_name),
        }
    }

    /// Create the unique key index. Safe to call on every startup.
    pub async fn ensure_indexes(&self) -> Result<(), StoreError> {
        let index = IndexModel::builder()
            .keys(doc! { "processName": 1, "processInstanceNumber": 1 })
            .options(
                IndexOptions::builder()
                    .name(KEY_INDEX_NAME.to_string())
                    .unique(true)
                    .build(),
            )
            .build();

        self.collection.create_index(index).await?;
        info!(
            collection = %self.collection.name(),
            index = KEY_INDEX_NAME,
            "Ensured process instance key index"
        );
        Ok(())
    }
}

#[async_trait]
impl InstanceStore for MongoInstanceStore {
    async fn find(&self, key: &InstanceKey) -> Result<Option<ProcessInstance>, StoreError> {
        Ok(self.collection.find_one(key.filter()).await?)
    }

    async fn insert(&self, record: &ProcessInstance) -> Result<InsertOutcome, StoreError> {
        match self.collection.insert_one(record).await {
            Ok(_) => Ok(InsertOutcome::Inserted),
            Err(e) if is_duplicate_key_error(&e) => {
                debug!(key = %record.key(), "Instance record already exists");
                Ok(InsertOutcome::AlreadyExists)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn update_keep_alive(&self, key: &InstanceKey, keep_alive: &KeepAlive) -> Result<(), StoreError> {
        let update = doc! {
            "$set": {
                "activeNodeName": &keep_alive.node_name,
                "activeNodeKeepAliveTimeTag": bson::DateTime::from_chrono(keep_alive.time_tag),
                "softwareVersion": &keep_alive.software_version,
            }
        };

        let result = self.collection.update_one(key.filter(), update).await?;
        if result.matched_count == 0 {
            return Err(StoreError::Missing(key.to_string()));
        }
        Ok(())
    }
}

/// Check if a MongoDB error is a duplicate key error (code 11000)
fn is_duplicate_key_error(error: &mongodb::error::Error) -> bool {
    if let mongodb::error::ErrorKind::Write(mongodb::error::WriteFailure::WriteError(write_error)) =
        error.kind.as_ref()
    {
        return write_error.code == 11000;
    }
    false
}
