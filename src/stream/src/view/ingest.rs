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

//! The ingest path: one batch in, partial aggregation state out.

use weir_common::array::{Block, DataType, ScalarImpl};
use weir_common::catalog::Field;
use weir_common::time::add_time;

use super::{wall_clock_seconds, WindowView};
use crate::error::{StreamError, StreamResult};
use crate::expr::{build_compare, CompareOp, InputRefExpression, LiteralExpression};
use crate::transform::{
    AddColumnTransform, FilterTransform, Pipeline, SquashingTransform, WatermarkTransform,
};
use crate::window::{TimeMode, PROCTIME_TIMESTAMP_COLUMN};

impl WindowView {
    /// Route one batch into the inner table.
    ///
    /// Rows older than the lateness bound are dropped up front; the
    /// mergeable plan reduces the rest to partial state keyed by window id.
    /// In event time the watermark advances while the batch flows through,
    /// so the fire signals this write enqueues are processed strictly after
    /// it returns.
    pub async fn write(&self, block: Block) -> StreamResult<()> {
        let spec = &self.spec;
        let snapshot = self.clock.snapshot();

        // Filter outdated data.
        let lateness_bound: u32 = match spec.time_mode {
            TimeMode::Proctime => 0,
            TimeMode::EventTime => match spec.lateness {
                Some((lateness_kind, lateness_n)) if snapshot.max_timestamp != 0 => {
                    let mut bound = add_time(
                        snapshot.max_timestamp,
                        lateness_kind,
                        -lateness_n,
                        spec.timezone,
                    )?;
                    if spec.watermark.is_some_and(|p| p.is_bounded()) {
                        let watermark_lower_bound = add_time(
                            snapshot.max_watermark,
                            spec.slide_kind,
                            -spec.slide_n,
                            spec.timezone,
                        )?;
                        bound = bound.min(watermark_lower_bound);
                    }
                    bound
                }
                _ => snapshot.max_fired_watermark,
            },
        };

        // Track the largest raw timestamp before anything is filtered, so
        // the bounded watermark and the lateness bound see rows that were
        // dropped as late.
        if spec.time_mode == TimeMode::EventTime
            && (spec.watermark.is_some_and(|p| p.is_bounded()) || spec.lateness.is_some())
        {
            let ts_column = block
                .column_by_name(&spec.timestamp_column)
                .ok_or_else(|| StreamError::column_not_found(spec.timestamp_column.as_str()))?;
            let block_max = ts_column
                .iter()
                .flatten()
                .filter_map(|s| s.as_u32())
                .max()
                .unwrap_or(0);
            if block_max > 0 {
                self.clock.update_max_timestamp(block_max);
            }
        }

        let mut pre = Pipeline::new();
        if lateness_bound > 0 {
            pre = pre.add(FilterTransform::new(build_compare(
                CompareOp::GreaterThanOrEqual,
                InputRefExpression::new(spec.timestamp_column.as_str(), DataType::UInt32).boxed(),
                LiteralExpression::new(
                    DataType::UInt32,
                    Some(ScalarImpl::UInt32(lateness_bound)),
                )
                .boxed(),
            )));
        }

        // Held shared for the rest of the batch: concurrent writers may
        // proceed, the fire tasks may not.
        let _shared = self.ingest_barrier.read().await;

        if spec.is_time_column_now {
            pre = pre.add(AddColumnTransform::new(
                Field::new(PROCTIME_TIMESTAMP_COLUMN, DataType::UInt32),
                Some(ScalarImpl::UInt32(wall_clock_seconds())),
            ));
        }

        let filtered = pre.execute(vec![block])?;
        if filtered.is_empty() {
            return Ok(());
        }
        let partial = self.plans.mergeable.execute(filtered)?;

        let mut post = Pipeline::new().add(SquashingTransform::new(
            self.config.min_insert_block_size_rows,
            self.config.min_insert_block_size_bytes,
        ));
        if spec.time_mode == TimeMode::EventTime {
            let lateness_upper_bound = if spec.lateness.is_some() {
                snapshot.max_fired_watermark
            } else {
                0
            };
            post = post.add(WatermarkTransform::new(
                self.clock.clone(),
                spec.window_id_column.as_str(),
                lateness_upper_bound,
            ));
        }
        let output = post.execute(partial)?;

        let inner = self.tables.get(&self.inner_table_id)?;
        let _table_lock = inner
            .lock_for_share(self.config.lock_acquire_timeout())
            .await?;
        for block in output {
            if block.cardinality() > 0 {
                inner.write(block).await?;
            }
        }
        Ok(())
    }
}
