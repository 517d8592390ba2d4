//! DynamoDB lock table
//!
//! One item per lock identifier, keyed by the `LockID` partition key.
//! Acquisition is a conditional put (`attribute_not_exists(LockID)`), so
//! mutual exclusion holds without a read-check-write race; release is a
//! delete conditional on the holder token.

use async_trait::async_trait;
use aws_sdk_dynamodb::Client;
use aws_sdk_dynamodb::types::{
    AttributeDefinition, AttributeValue, BillingMode, KeySchemaElement, KeyType,
    ScalarAttributeType,
};

use crate::backend::{BackendConfig, BackendError, BackendResult, LockTable};
use crate::lock::LockRecord;

const PARTITION_KEY: &str = "LockID";
const HOLDER_ATTR: &str = "HolderId";
const INFO_ATTR: &str = "Info";

/// DynamoDB-based lock table
pub struct DynamoLockTable {
    /// DynamoDB client
    client: Client,
    /// Table name
    table: String,
    /// Whether to auto-create the table if it doesn't exist (default: true)
    auto_create: bool,
}

impl DynamoLockTable {
    /// Create a new DynamoLockTable from configuration
    pub async fn from_config(config: &BackendConfig) -> BackendResult<Self> {
        let table = config
            .get_string("lock_table")
            .ok_or_else(|| BackendError::configuration("Missing required attribute: lock_table"))?
            .to_string();

        let region = config
            .get_string("region")
            .ok_or_else(|| BackendError::configuration("Missing required attribute: region"))?
            .to_string();

        let auto_create = config.get_bool_or("auto_create", true);

        let aws_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_sdk_dynamodb::config::Region::new(region))
            .load()
            .await;

        let client = Client::new(&aws_config);

        Ok(Self {
            client,
            table,
            auto_create,
        })
    }

    /// Get the table name
    pub fn table_name(&self) -> &str {
        &self.table
    }

    async fn table_exists(&self) -> BackendResult<bool> {
        let result = self
            .client
            .describe_table()
            .table_name(&self.table)
            .send()
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(err) => {
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_resource_not_found_exception())
                {
                    Ok(false)
                } else {
                    Err(BackendError::Aws(err.to_string()))
                }
            }
        }
    }

    async fn create_table(&self) -> BackendResult<()> {
        let key_attribute = AttributeDefinition::builder()
            .attribute_name(PARTITION_KEY)
            .attribute_type(ScalarAttributeType::S)
            .build()
            .map_err(|e| BackendError::TableCreationFailed(e.to_string()))?;

        let key_schema = KeySchemaElement::builder()
            .attribute_name(PARTITION_KEY)
            .key_type(KeyType::Hash)
            .build()
            .map_err(|e| BackendError::TableCreationFailed(e.to_string()))?;

        self.client
            .create_table()
            .table_name(&self.table)
            .attribute_definitions(key_attribute)
            .key_schema(key_schema)
            .billing_mode(BillingMode::PayPerRequest)
            .send()
            .await
            .map_err(|e| BackendError::TableCreationFailed(e.to_string()))?;

        Ok(())
    }
}

#[async_trait]
impl LockTable for DynamoLockTable {
    async fn acquire(&self, lock_id: &str, record: &LockRecord) -> BackendResult<()> {
        let info = serde_json::to_string(record)
            .map_err(|e| BackendError::Serialization(e.to_string()))?;

        let result = self
            .client
            .put_item()
            .table_name(&self.table)
            .item(PARTITION_KEY, AttributeValue::S(lock_id.to_string()))
            .item(HOLDER_ATTR, AttributeValue::S(record.id.clone()))
            .item(INFO_ATTR, AttributeValue::S(info))
            .condition_expression(format!("attribute_not_exists({})", PARTITION_KEY))
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) => {
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_conditional_check_failed_exception())
                {
                    match self.read_lock(lock_id).await? {
                        Some(existing) => Err(BackendError::locked(&existing)),
                        // The holder vanished between the put and the read;
                        // surface it as locked so the caller retries cleanly
                        None => Err(BackendError::Locked {
                            lock_id: lock_id.to_string(),
                            who: "unknown".to_string(),
                            operation: "unknown".to_string(),
                        }),
                    }
                } else {
                    Err(BackendError::Aws(err.to_string()))
                }
            }
        }
    }

    async fn release(&self, lock_id: &str, record: &LockRecord) -> BackendResult<()> {
        let result = self
            .client
            .delete_item()
            .table_name(&self.table)
            .key(PARTITION_KEY, AttributeValue::S(lock_id.to_string()))
            .condition_expression(format!("{} = :holder", HOLDER_ATTR))
            .expression_attribute_values(":holder", AttributeValue::S(record.id.clone()))
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) => {
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_conditional_check_failed_exception())
                {
                    match self.read_lock(lock_id).await? {
                        Some(existing) => Err(BackendError::LockMismatch {
                            expected: record.id.clone(),
                            actual: existing.id,
                        }),
                        None => Err(BackendError::LockNotFound(record.id.clone())),
                    }
                } else {
                    Err(BackendError::Aws(err.to_string()))
                }
            }
        }
    }

    async fn read_lock(&self, lock_id: &str) -> BackendResult<Option<LockRecord>> {
        let result = self
            .client
            .get_item()
            .table_name(&self.table)
            .key(PARTITION_KEY, AttributeValue::S(lock_id.to_string()))
            .consistent_read(true)
            .send()
            .await
            .map_err(|e| BackendError::Aws(e.to_string()))?;

        let Some(item) = result.item else {
            return Ok(None);
        };

        let info = item
            .get(INFO_ATTR)
            .and_then(|v| v.as_s().ok())
            .ok_or_else(|| {
                BackendError::InvalidSnapshot(format!("Lock item missing {} attribute", INFO_ATTR))
            })?;

        let record: LockRecord = serde_json::from_str(info)
            .map_err(|e| BackendError::Serialization(e.to_string()))?;

        Ok(Some(record))
    }

    async fn force_unlock(&self, lock_id: &str, holder_id: &str) -> BackendResult<()> {
        match self.read_lock(lock_id).await? {
            Some(existing) if existing.id != holder_id => Err(BackendError::LockMismatch {
                expected: holder_id.to_string(),
                actual: existing.id,
            }),
            Some(_) => {
                self.client
                    .delete_item()
                    .table_name(&self.table)
                    .key(PARTITION_KEY, AttributeValue::S(lock_id.to_string()))
                    .condition_expression(format!("{} = :holder", HOLDER_ATTR))
                    .expression_attribute_values(
                        ":holder",
                        AttributeValue::S(holder_id.to_string()),
                    )
                    .send()
                    .await
                    .map_err(|e| BackendError::Aws(e.to_string()))?;
                Ok(())
            }
            None => Err(BackendError::LockNotFound(holder_id.to_string())),
        }
    }

    async fn init(&self) -> BackendResult<()> {
        if !self.table_exists().await? {
            if self.auto_create {
                self.create_table().await?;
            } else {
                return Err(BackendError::configuration(format!(
                    "Lock table not found: {}",
                    self.table
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn condition_expressions() {
        // The expressions are built from the fixed attribute names; verify
        // the exact strings DynamoDB will evaluate
        assert_eq!(
            format!("attribute_not_exists({})", PARTITION_KEY),
            "attribute_not_exists(LockID)"
        );
        assert_eq!(format!("{} = :holder", HOLDER_ATTR), "HolderId = :holder");
    }
}
