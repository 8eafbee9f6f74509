// Copyright 2026 Weir Labs
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The table service consumed by window views, and its in-memory
//! implementation.
//!
//! The engine never assumes a storage engine; it only requires per-row
//! delete-by-predicate on the inner table.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::OwnedRwLockReadGuard;
use weir_common::array::{Block, Datum, ScalarImpl};
use weir_common::catalog::{Schema, TableId};

use crate::error::{StreamError, StreamResult};
use crate::expr::Expression;

/// Guard witnessing a shared table lock.
pub type TableReadGuard = OwnedRwLockReadGuard<()>;

#[async_trait]
pub trait Table: Send + Sync {
    fn id(&self) -> &TableId;

    fn schema(&self) -> &Schema;

    /// Fetch all rows (`SELECT *`).
    async fn read(&self) -> StreamResult<Vec<Block>>;

    /// Append a block; columns are matched to the table schema by name.
    async fn write(&self, block: Block) -> StreamResult<()>;

    /// Delete the rows matching the predicate; returns how many were
    /// removed.
    async fn delete_where(&self, predicate: &dyn Expression) -> StreamResult<usize>;

    async fn truncate(&self) -> StreamResult<()>;

    async fn lock_for_share(&self, timeout: Duration) -> StreamResult<TableReadGuard>;

    fn row_count(&self) -> usize;
}

#[async_trait]
pub trait TableService: Send + Sync {
    async fn create_table(&self, id: TableId, schema: Schema) -> StreamResult<Arc<dyn Table>>;

    fn get(&self, id: &TableId) -> StreamResult<Arc<dyn Table>>;

    async fn drop_table(&self, id: &TableId) -> StreamResult<()>;
}

/// In-memory table keeping rows in insertion order.
pub struct MemoryTable {
    id: TableId,
    schema: Schema,
    rows: RwLock<Vec<Vec<Datum>>>,
    share_lock: Arc<tokio::sync::RwLock<()>>,
}

impl MemoryTable {
    pub fn new(id: TableId, schema: Schema) -> Self {
        Self {
            id,
            schema,
            rows: RwLock::new(Vec::new()),
            share_lock: Arc::new(tokio::sync::RwLock::new(())),
        }
    }
}

#[async_trait]
impl Table for MemoryTable {
    fn id(&self) -> &TableId {
        &self.id
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    async fn read(&self) -> StreamResult<Vec<Block>> {
        let rows = self.rows.read();
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![Block::from_rows(self.schema.clone(), rows.clone())])
    }

    async fn write(&self, block: Block) -> StreamResult<()> {
        let block = block
            .project_by_name(&self.schema)
            .ok_or_else(|| {
                StreamError::Internal(anyhow::anyhow!(
                    "block schema {:?} does not cover table {} schema",
                    block.schema().names(),
                    self.id
                ))
            })?
            .materialize();
        self.rows.write().extend(block.rows());
        Ok(())
    }

    async fn delete_where(&self, predicate: &dyn Expression) -> StreamResult<usize> {
        let mut rows = self.rows.write();
        if rows.is_empty() {
            return Ok(0);
        }
        let block = Block::from_rows(self.schema.clone(), rows.clone());
        let result = predicate.eval(&block)?;
        let before = rows.len();
        let mut keep = result
            .iter()
            .map(|d| !matches!(d, Some(ScalarImpl::Bool(true))));
        rows.retain(|_| keep.next().unwrap_or(true));
        Ok(before - rows.len())
    }

    async fn truncate(&self) -> StreamResult<()> {
        self.rows.write().clear();
        Ok(())
    }

    async fn lock_for_share(&self, timeout: Duration) -> StreamResult<TableReadGuard> {
        tokio::time::timeout(timeout, self.share_lock.clone().read_owned())
            .await
            .map_err(|_| StreamError::LockTimeout {
                table: self.id.clone(),
                timeout_ms: timeout.as_millis() as u64,
            })
    }

    fn row_count(&self) -> usize {
        self.rows.read().len()
    }
}

/// Table service backed by [`MemoryTable`]s.
#[derive(Default)]
pub struct MemoryTableService {
    tables: RwLock<HashMap<TableId, Arc<dyn Table>>>,
}

impl MemoryTableService {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TableService for MemoryTableService {
    async fn create_table(&self, id: TableId, schema: Schema) -> StreamResult<Arc<dyn Table>> {
        let mut tables = self.tables.write();
        if tables.contains_key(&id) {
            return Err(StreamError::TableAlreadyExists(id));
        }
        let table: Arc<dyn Table> = Arc::new(MemoryTable::new(id.clone(), schema));
        tables.insert(id, table.clone());
        Ok(table)
    }

    fn get(&self, id: &TableId) -> StreamResult<Arc<dyn Table>> {
        self.tables
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| StreamError::TableNotFound(id.clone()))
    }

    async fn drop_table(&self, id: &TableId) -> StreamResult<()> {
        self.tables
            .write()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StreamError::TableNotFound(id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use weir_common::array::DataType;
    use weir_common::catalog::Field;

    use super::*;
    use crate::expr::{build_compare, CompareOp, InputRefExpression, LiteralExpression};

    fn schema() -> Schema {
        Schema::new(vec![Field::new("window_id", DataType::UInt32)])
    }

    fn block(ids: &[u32]) -> Block {
        Block::from_rows(
            schema(),
            ids.iter()
                .map(|id| vec![Some(ScalarImpl::UInt32(*id))])
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_write_read_delete() {
        let table = MemoryTable::new(TableId::new("t"), schema());
        table.write(block(&[5, 10, 15])).await.unwrap();
        assert_eq!(table.row_count(), 3);

        let predicate = build_compare(
            CompareOp::LessThan,
            InputRefExpression::new("window_id", DataType::UInt32).boxed(),
            LiteralExpression::new(DataType::UInt32, Some(ScalarImpl::UInt32(15))).boxed(),
        );
        assert_eq!(table.delete_where(&*predicate).await.unwrap(), 2);
        // Deleting again removes nothing.
        assert_eq!(table.delete_where(&*predicate).await.unwrap(), 0);

        let blocks = table.read().await.unwrap();
        assert_eq!(blocks[0].row_at(0), vec![Some(ScalarImpl::UInt32(15))]);
    }

    #[tokio::test]
    async fn test_share_lock_times_out_under_exclusive_writer() {
        let table = MemoryTable::new(TableId::new("t"), schema());
        let exclusive = table.share_lock.clone().write_owned().await;
        let result = table.lock_for_share(Duration::from_millis(10)).await;
        assert!(matches!(result, Err(StreamError::LockTimeout { .. })));
        drop(exclusive);
        assert!(table.lock_for_share(Duration::from_millis(10)).await.is_ok());
    }

    #[tokio::test]
    async fn test_service_create_get_drop() {
        let service = MemoryTableService::new();
        let id = TableId::new("t");
        service.create_table(id.clone(), schema()).await.unwrap();
        assert!(matches!(
            service.create_table(id.clone(), schema()).await,
            Err(StreamError::TableAlreadyExists(_))
        ));
        assert!(service.get(&id).is_ok());
        service.drop_table(&id).await.unwrap();
        assert!(matches!(service.get(&id), Err(StreamError::TableNotFound(_))));
    }
}
