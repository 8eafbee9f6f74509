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

//! The fire pipeline: finalize one window out of the inner table's partial
//! state.

use tracing::{error, trace};
use weir_common::array::{Block, DataType, ScalarImpl};
use weir_common::catalog::{Field, TableId};
use weir_common::time::add_time;

use super::WindowView;
use crate::error::StreamResult;
use crate::expr::{
    build_compare, build_in_set, CompareOp, InputRefExpression, LiteralExpression,
};
use crate::transform::{
    AddAggregatedInfoTransform, AddColumnTransform, ConvertByPositionTransform,
    DropColumnTransform, FilterTransform, MaterializingTransform, Pipeline, SquashingTransform,
};
use crate::window::TimeWindowKind;

impl WindowView {
    /// Finalize and emit the window ending at `watermark`. Best-effort:
    /// failures are logged and swallowed; a later lateness signal may re-run
    /// the same watermark.
    pub(super) async fn fire(&self, watermark: u32) {
        trace!(
            view = %self.id,
            watermark,
            watch_streams = self.watchers.live_count(),
            target = self.target_table_id.as_ref().map(|t| t.as_str()).unwrap_or("None"),
            "firing window",
        );
        if self.target_table_id.is_none() && !self.watchers.has_live() {
            return;
        }

        let blocks = {
            let _guard = self.fire_mutex.lock().await;
            match self.get_new_blocks(watermark).await {
                Ok(blocks) => blocks,
                Err(error) => {
                    error!(view = %self.id, watermark, %error, "window view fire failed");
                    return;
                }
            }
        };
        if blocks.is_empty() {
            return;
        }

        for block in &blocks {
            self.watchers.push_block(block, watermark);
        }

        if let Some(target_id) = self.target_table_id.clone() {
            if let Err(error) = self.write_into_target(&target_id, blocks).await {
                error!(view = %self.id, watermark, %error, "window view target insert failed");
            }
        }
    }

    /// Read the inner table back, select the slices of the window ending at
    /// `watermark`, and run the final plan over them.
    async fn get_new_blocks(&self, watermark: u32) -> StreamResult<Vec<Block>> {
        let spec = &self.spec;
        let w_start = add_time(watermark, spec.window_kind, -spec.window_n, spec.timezone)?;

        let inner = self.tables.get(&self.inner_table_id)?;
        let input = inner.read().await?;

        let window_id = InputRefExpression::new(spec.window_id_column.as_str(), DataType::UInt32);
        let selector = match spec.kind {
            TimeWindowKind::Tumble => build_compare(
                CompareOp::Equal,
                window_id.boxed(),
                LiteralExpression::new(DataType::UInt32, Some(ScalarImpl::UInt32(watermark)))
                    .boxed(),
            ),
            TimeWindowKind::Hop => build_in_set(
                window_id.boxed(),
                spec.window_slices(watermark)?
                    .into_iter()
                    .map(ScalarImpl::UInt32)
                    .collect(),
            ),
        };

        let mergeable = Pipeline::new()
            .add(FilterTransform::new(selector))
            .add(AddColumnTransform::new(
                Field::new(spec.window_column.clone(), DataType::Window),
                Some(ScalarImpl::Window(w_start, watermark)),
            ))
            .add(DropColumnTransform::new(spec.window_id_column.clone()))
            .add(AddAggregatedInfoTransform)
            .execute(input)?;

        let finalized = self.plans.final_plan.execute(mergeable)?;

        let output = Pipeline::new()
            .add(MaterializingTransform)
            .add(SquashingTransform::new(
                self.config.min_insert_block_size_rows,
                self.config.min_insert_block_size_bytes,
            ))
            .execute(finalized)?;
        Ok(output.into_iter().filter(|b| b.cardinality() > 0).collect())
    }

    /// Insert fired blocks into the target table, converting the column
    /// layout by position.
    async fn write_into_target(&self, target_id: &TableId, blocks: Vec<Block>) -> StreamResult<()> {
        let target = self.tables.get(target_id)?;
        let _lock = target
            .lock_for_share(self.config.lock_acquire_timeout())
            .await?;
        let converted = Pipeline::new()
            .add(ConvertByPositionTransform::new(target.schema().clone()))
            .execute(blocks)?;
        for block in converted {
            target.write(block).await?;
        }
        Ok(())
    }
}
