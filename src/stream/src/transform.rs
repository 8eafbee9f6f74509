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

//! Block transforms composed into linear pipelines by the ingest and fire
//! paths.

use std::collections::BTreeSet;
use std::sync::Arc;

use weir_common::array::{Block, ChunkInfo, Column, Datum, ScalarImpl};
use weir_common::catalog::{Field, Schema};

use crate::error::{StreamError, StreamResult};
use crate::expr::BoxedExpression;
use crate::watermark::WatermarkClock;

/// One stage of a pipeline. `transform` may withhold output (filtering,
/// buffering); `finish` flushes whatever is still buffered.
pub trait Transform: Send {
    fn name(&self) -> &'static str;

    fn transform(&mut self, block: Block) -> StreamResult<Option<Block>>;

    fn finish(&mut self) -> StreamResult<Option<Block>> {
        Ok(None)
    }
}

/// A linear chain of transforms.
#[derive(Default)]
pub struct Pipeline {
    transforms: Vec<Box<dyn Transform>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, transform: impl Transform + 'static) -> Self {
        self.transforms.push(Box::new(transform));
        self
    }

    /// Run all blocks through the chain, then flush every stage in order.
    pub fn execute(mut self, input: Vec<Block>) -> StreamResult<Vec<Block>> {
        let mut output = Vec::new();
        for block in input {
            if let Some(block) = self.feed(0, block)? {
                output.push(block);
            }
        }
        for i in 0..self.transforms.len() {
            if let Some(block) = self.transforms[i].finish()? {
                if let Some(block) = self.feed(i + 1, block)? {
                    output.push(block);
                }
            }
        }
        Ok(output)
    }

    fn feed(&mut self, start: usize, mut block: Block) -> StreamResult<Option<Block>> {
        for transform in &mut self.transforms[start..] {
            match transform.transform(block)? {
                Some(next) => block = next,
                None => return Ok(None),
            }
        }
        Ok(Some(block))
    }
}

/// Keeps the rows for which the predicate is true. Blocks left empty are
/// withheld.
pub struct FilterTransform {
    predicate: BoxedExpression,
}

impl FilterTransform {
    pub fn new(predicate: BoxedExpression) -> Self {
        Self { predicate }
    }
}

impl Transform for FilterTransform {
    fn name(&self) -> &'static str {
        "FilterTransform"
    }

    fn transform(&mut self, block: Block) -> StreamResult<Option<Block>> {
        let result = self.predicate.eval(&block)?;
        let mask: Vec<bool> = result
            .iter()
            .map(|d| d.as_ref().and_then(ScalarImpl::as_bool).unwrap_or(false))
            .collect();
        if mask.iter().all(|keep| *keep) {
            return Ok(Some(block));
        }
        let filtered = block.filter(&mask);
        Ok((filtered.cardinality() > 0).then_some(filtered))
    }
}

/// Appends a constant column; the squash or materialize stage downstream
/// expands it.
pub struct AddColumnTransform {
    field: Field,
    value: Datum,
}

impl AddColumnTransform {
    pub fn new(field: Field, value: Datum) -> Self {
        Self { field, value }
    }
}

impl Transform for AddColumnTransform {
    fn name(&self) -> &'static str {
        "AddColumnTransform"
    }

    fn transform(&mut self, block: Block) -> StreamResult<Option<Block>> {
        let len = block.cardinality();
        Ok(Some(block.with_column(
            self.field.clone(),
            Column::Const {
                value: self.value.clone(),
                len,
            },
        )))
    }
}

pub struct DropColumnTransform {
    column: String,
}

impl DropColumnTransform {
    pub fn new(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
        }
    }
}

impl Transform for DropColumnTransform {
    fn name(&self) -> &'static str {
        "DropColumnTransform"
    }

    fn transform(&mut self, block: Block) -> StreamResult<Option<Block>> {
        Ok(Some(block.drop_column(&self.column)))
    }
}

/// Relabels columns positionally to the target schema, converting a block's
/// layout for insertion into a differently-named but structurally identical
/// table.
pub struct ConvertByPositionTransform {
    target: Schema,
}

impl ConvertByPositionTransform {
    pub fn new(target: Schema) -> Self {
        Self { target }
    }
}

impl Transform for ConvertByPositionTransform {
    fn name(&self) -> &'static str {
        "ConvertByPositionTransform"
    }

    fn transform(&mut self, block: Block) -> StreamResult<Option<Block>> {
        if block.schema().len() != self.target.len() {
            return Err(StreamError::Internal(anyhow::anyhow!(
                "cannot convert block with {} columns to target with {}",
                block.schema().len(),
                self.target.len()
            )));
        }
        let info = block.info();
        let columns = (0..self.target.len())
            .map(|i| block.column(i).clone())
            .collect();
        Ok(Some(Block::new(self.target.clone(), columns).with_info(info)))
    }
}

/// Expands constant columns to full ones.
pub struct MaterializingTransform;

impl Transform for MaterializingTransform {
    fn name(&self) -> &'static str {
        "MaterializingTransform"
    }

    fn transform(&mut self, block: Block) -> StreamResult<Option<Block>> {
        Ok(Some(block.materialize()))
    }
}

/// Tags blocks as mergeable partial state for the final plan.
pub struct AddAggregatedInfoTransform;

impl Transform for AddAggregatedInfoTransform {
    fn name(&self) -> &'static str {
        "AddAggregatedInfoTransform"
    }

    fn transform(&mut self, block: Block) -> StreamResult<Option<Block>> {
        Ok(Some(block.with_info(ChunkInfo::AggregatedPartial)))
    }
}

/// Accumulates blocks until the configured row or byte threshold is reached.
/// Thresholds of zero pass blocks through unchanged.
pub struct SquashingTransform {
    min_rows: usize,
    min_bytes: usize,
    buffer: Option<Block>,
}

impl SquashingTransform {
    pub fn new(min_rows: usize, min_bytes: usize) -> Self {
        Self {
            min_rows,
            min_bytes,
            buffer: None,
        }
    }
}

impl Transform for SquashingTransform {
    fn name(&self) -> &'static str {
        "SquashingTransform"
    }

    fn transform(&mut self, block: Block) -> StreamResult<Option<Block>> {
        if self.min_rows == 0 && self.min_bytes == 0 {
            return Ok(Some(block));
        }
        let combined = match self.buffer.take() {
            None => block.materialize(),
            Some(buffered) => {
                let schema = buffered.schema().clone();
                let info = buffered.info();
                Block::concat(schema, [buffered, block.materialize()]).with_info(info)
            }
        };
        let full = (self.min_rows > 0 && combined.cardinality() >= self.min_rows)
            || (self.min_bytes > 0 && combined.estimated_size() >= self.min_bytes);
        if full {
            Ok(Some(combined))
        } else {
            self.buffer = Some(combined);
            Ok(None)
        }
    }

    fn finish(&mut self) -> StreamResult<Option<Block>> {
        Ok(self.buffer.take().filter(|b| b.cardinality() > 0))
    }
}

/// Event-time only: scans the window-id column of each chunk, advancing the
/// watermark clock with the chunk's largest window end. When lateness is
/// allowed, window ids below `lateness_upper_bound` re-fire their windows.
pub struct WatermarkTransform {
    clock: Arc<WatermarkClock>,
    window_id_column: String,
    lateness_upper_bound: u32,
}

impl WatermarkTransform {
    pub fn new(
        clock: Arc<WatermarkClock>,
        window_id_column: impl Into<String>,
        lateness_upper_bound: u32,
    ) -> Self {
        Self {
            clock,
            window_id_column: window_id_column.into(),
            lateness_upper_bound,
        }
    }
}

impl Transform for WatermarkTransform {
    fn name(&self) -> &'static str {
        "WatermarkTransform"
    }

    fn transform(&mut self, block: Block) -> StreamResult<Option<Block>> {
        let column = block
            .column_by_name(&self.window_id_column)
            .ok_or_else(|| StreamError::column_not_found(self.window_id_column.as_str()))?;

        let mut block_max = 0;
        let mut late_signals = BTreeSet::new();
        for datum in column.iter() {
            let Some(window_id) = datum.as_ref().and_then(ScalarImpl::as_u32) else {
                continue;
            };
            block_max = block_max.max(window_id);
            if self.lateness_upper_bound > 0 && window_id < self.lateness_upper_bound {
                late_signals.insert(window_id);
            }
        }

        if block_max > 0 {
            self.clock.update_max_watermark(block_max)?;
        }
        if !late_signals.is_empty() {
            self.clock.add_fire_signals(late_signals);
        }
        Ok(Some(block))
    }
}
