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

//! Compiled query plans consumed by the engine, and the reference planner
//! compiling group-by window aggregations.
//!
//! The engine never inspects a plan: ingest runs the mergeable plan to turn
//! raw rows into partial aggregation state keyed by window id, and fire runs
//! the final plan to merge partial state into finished rows. Both are opaque
//! behind [`QueryPlan`].

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::anyhow;
use weir_common::array::{datum_cmp, Block, ChunkInfo, Column, DataType, Datum, ScalarImpl};
use weir_common::catalog::{Field, Schema};

use crate::error::{StreamError, StreamResult};
use crate::window::WindowSpec;

pub trait QueryPlan: Send + Sync {
    fn output_schema(&self) -> &Schema;

    fn execute(&self, input: Vec<Block>) -> StreamResult<Vec<Block>>;
}

/// The plans the planner delivers for one view.
pub struct CompiledPlans {
    /// Runs on ingest: raw rows in, partial state rows (with the window-id
    /// column) out.
    pub mergeable: Arc<dyn QueryPlan>,
    /// Runs on fire: merges partial state rows into finished output rows.
    pub final_plan: Arc<dyn QueryPlan>,
    /// The materialized output header of the view.
    pub output_header: Schema,
}

/// The external query planner, seen by the engine only through this
/// interface.
pub trait Planner: Send + Sync {
    fn compile(&self, spec: &Arc<WindowSpec>, input_schema: &Schema) -> StreamResult<CompiledPlans>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AggKind {
    Count,
    Sum,
    Min,
    Max,
}

/// One aggregate of the view's SELECT list.
#[derive(Clone, Debug)]
pub struct AggCall {
    pub kind: AggKind,
    /// The argument column; `None` only for `count(*)`.
    pub arg: Option<String>,
    /// Name of the output (and of the partial state column).
    pub output: String,
}

impl AggCall {
    pub fn count(output: impl Into<String>) -> Self {
        Self {
            kind: AggKind::Count,
            arg: None,
            output: output.into(),
        }
    }

    pub fn sum(arg: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            kind: AggKind::Sum,
            arg: Some(arg.into()),
            output: output.into(),
        }
    }

    pub fn min(arg: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            kind: AggKind::Min,
            arg: Some(arg.into()),
            output: output.into(),
        }
    }

    pub fn max(arg: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            kind: AggKind::Max,
            arg: Some(arg.into()),
            output: output.into(),
        }
    }
}

/// Reference planner: `SELECT <window>, <group keys>, <aggregates> ... GROUP
/// BY <window>, <group keys>`.
#[derive(Clone, Debug)]
pub struct AggregatePlanner {
    pub group_by: Vec<String>,
    pub agg_calls: Vec<AggCall>,
}

impl AggregatePlanner {
    pub fn new(group_by: Vec<String>, agg_calls: Vec<AggCall>) -> Self {
        Self {
            group_by,
            agg_calls,
        }
    }
}

impl Planner for AggregatePlanner {
    fn compile(&self, spec: &Arc<WindowSpec>, input_schema: &Schema) -> StreamResult<CompiledPlans> {
        if !spec.is_time_column_now && input_schema.index_of(&spec.timestamp_column).is_none() {
            return Err(StreamError::column_not_found(spec.timestamp_column.as_str()));
        }

        let mut group_fields = Vec::with_capacity(self.group_by.len());
        for name in &self.group_by {
            let i = input_schema
                .index_of(name)
                .ok_or_else(|| StreamError::column_not_found(name.as_str()))?;
            group_fields.push(input_schema.fields[i].clone());
        }

        let mut state_fields = Vec::with_capacity(self.agg_calls.len());
        for call in &self.agg_calls {
            let data_type = match (&call.kind, &call.arg) {
                (AggKind::Count, _) => DataType::UInt64,
                (kind, Some(arg)) => {
                    let i = input_schema
                        .index_of(arg)
                        .ok_or_else(|| StreamError::column_not_found(arg.as_str()))?;
                    let data_type = input_schema.fields[i].data_type;
                    if *kind == AggKind::Sum
                        && !matches!(
                            data_type,
                            DataType::Int64 | DataType::UInt64 | DataType::Float64
                        )
                    {
                        return Err(StreamError::InvalidParam {
                            name: "agg",
                            reason: format!("sum over non-numeric column {arg}").into(),
                        });
                    }
                    data_type
                }
                (_, None) => {
                    return Err(StreamError::InvalidParam {
                        name: "agg",
                        reason: "aggregate requires an argument column".into(),
                    });
                }
            };
            state_fields.push(Field::new(call.output.clone(), data_type));
        }

        let mut mergeable_fields = vec![Field::new(spec.window_id_column.clone(), DataType::UInt32)];
        mergeable_fields.extend(group_fields.iter().cloned());
        mergeable_fields.extend(state_fields.iter().cloned());
        let mergeable_schema = Schema::new(mergeable_fields);

        let mut output_fields = vec![Field::new(spec.window_column.clone(), DataType::Window)];
        output_fields.extend(group_fields.iter().cloned());
        output_fields.extend(state_fields.iter().cloned());
        let output_header = Schema::new(output_fields);

        Ok(CompiledPlans {
            mergeable: Arc::new(MergeableAggPlan {
                spec: spec.clone(),
                group_by: self.group_by.clone(),
                agg_calls: self.agg_calls.clone(),
                schema: mergeable_schema,
            }),
            final_plan: Arc::new(FinalAggPlan {
                window_column: spec.window_column.clone(),
                group_by: self.group_by.clone(),
                agg_calls: self.agg_calls.clone(),
                schema: output_header.clone(),
            }),
            output_header,
        })
    }
}

/// Group key with a total order, so output rows come out sorted by window id
/// and group keys.
#[derive(Clone, Debug)]
struct OrderedRow(Vec<Datum>);

impl PartialEq for OrderedRow {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for OrderedRow {}

impl PartialOrd for OrderedRow {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedRow {
    fn cmp(&self, other: &Self) -> Ordering {
        debug_assert_eq!(self.0.len(), other.0.len());
        self.0
            .iter()
            .zip(&other.0)
            .map(|(a, b)| datum_cmp(a, b))
            .find(|o| *o != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    }
}

#[derive(Clone, Debug)]
enum AggState {
    Count(u64),
    Sum(Datum),
    Min(Datum),
    Max(Datum),
}

impl AggState {
    fn new(call: &AggCall) -> Self {
        match call.kind {
            AggKind::Count => Self::Count(0),
            AggKind::Sum => Self::Sum(None),
            AggKind::Min => Self::Min(None),
            AggKind::Max => Self::Max(None),
        }
    }

    /// Fold one raw input value. `arg` is `None` for `count(*)`.
    fn update(&mut self, arg: Option<Datum>) -> StreamResult<()> {
        match self {
            Self::Count(count) => {
                if !matches!(arg, Some(None)) {
                    *count += 1;
                }
            }
            Self::Sum(acc) => {
                if let Some(Some(value)) = arg {
                    *acc = Some(sum_add(acc.take(), value)?);
                }
            }
            Self::Min(acc) => {
                if let Some(Some(value)) = arg {
                    keep_extreme(acc, value, Ordering::Less);
                }
            }
            Self::Max(acc) => {
                if let Some(Some(value)) = arg {
                    keep_extreme(acc, value, Ordering::Greater);
                }
            }
        }
        Ok(())
    }

    /// Fold one partial state value produced by [`Self::into_datum`].
    fn merge(&mut self, state: Datum) -> StreamResult<()> {
        match self {
            Self::Count(count) => {
                if let Some(value) = state {
                    let n = value
                        .as_u64()
                        .ok_or_else(|| anyhow!("count state must be UInt64, got {value:?}"))?;
                    *count += n;
                }
            }
            Self::Sum(acc) => {
                if let Some(value) = state {
                    *acc = Some(sum_add(acc.take(), value)?);
                }
            }
            Self::Min(acc) => {
                if let Some(value) = state {
                    keep_extreme(acc, value, Ordering::Less);
                }
            }
            Self::Max(acc) => {
                if let Some(value) = state {
                    keep_extreme(acc, value, Ordering::Greater);
                }
            }
        }
        Ok(())
    }

    fn into_datum(self) -> Datum {
        match self {
            Self::Count(count) => Some(ScalarImpl::UInt64(count)),
            Self::Sum(acc) | Self::Min(acc) | Self::Max(acc) => acc,
        }
    }
}

fn keep_extreme(acc: &mut Datum, value: ScalarImpl, keep_if: Ordering) {
    let replace = match acc {
        None => true,
        Some(current) => value.default_cmp(current) == keep_if,
    };
    if replace {
        *acc = Some(value);
    }
}

fn sum_add(acc: Datum, value: ScalarImpl) -> StreamResult<ScalarImpl> {
    let Some(acc) = acc else { return Ok(value) };
    let result = match (&acc, &value) {
        (ScalarImpl::Int64(a), ScalarImpl::Int64(b)) => a
            .checked_add(*b)
            .map(ScalarImpl::Int64)
            .ok_or_else(|| anyhow!("numeric overflow in sum"))?,
        (ScalarImpl::UInt64(a), ScalarImpl::UInt64(b)) => a
            .checked_add(*b)
            .map(ScalarImpl::UInt64)
            .ok_or_else(|| anyhow!("numeric overflow in sum"))?,
        (ScalarImpl::Float64(a), ScalarImpl::Float64(b)) => ScalarImpl::Float64(a + b),
        _ => {
            return Err(
                anyhow!("mismatched types in sum: {acc:?} + {value:?}").into(),
            )
        }
    };
    Ok(result)
}

struct MergeableAggPlan {
    spec: Arc<WindowSpec>,
    group_by: Vec<String>,
    agg_calls: Vec<AggCall>,
    schema: Schema,
}

impl QueryPlan for MergeableAggPlan {
    fn output_schema(&self) -> &Schema {
        &self.schema
    }

    fn execute(&self, input: Vec<Block>) -> StreamResult<Vec<Block>> {
        let mut groups: BTreeMap<OrderedRow, Vec<AggState>> = BTreeMap::new();

        for block in &input {
            let ts_column = block
                .column_by_name(&self.spec.timestamp_column)
                .ok_or_else(|| {
                    StreamError::column_not_found(self.spec.timestamp_column.as_str())
                })?;
            let group_columns = columns_by_name(block, &self.group_by)?;
            let arg_columns = self
                .agg_calls
                .iter()
                .map(|call| match &call.arg {
                    None => Ok(None),
                    Some(arg) => block
                        .column_by_name(arg)
                        .map(Some)
                        .ok_or_else(|| StreamError::column_not_found(arg.as_str())),
                })
                .collect::<StreamResult<Vec<_>>>()?;

            for i in 0..block.cardinality() {
                // Rows with a null timestamp belong to no window.
                let Some(ts) = ts_column.get(i).and_then(|s| s.as_u32()) else {
                    continue;
                };
                let window_id = self.spec.window_id_of(ts)?;

                let mut key = Vec::with_capacity(1 + group_columns.len());
                key.push(Some(ScalarImpl::UInt32(window_id)));
                key.extend(group_columns.iter().map(|c| c.get(i)));

                let states = groups
                    .entry(OrderedRow(key))
                    .or_insert_with(|| self.agg_calls.iter().map(AggState::new).collect());
                for (state, arg_column) in states.iter_mut().zip(&arg_columns) {
                    state.update(arg_column.map(|c| c.get(i)))?;
                }
            }
        }

        if groups.is_empty() {
            return Ok(Vec::new());
        }
        let rows = groups
            .into_iter()
            .map(|(key, states)| {
                let mut row = key.0;
                row.extend(states.into_iter().map(AggState::into_datum));
                row
            })
            .collect();
        Ok(vec![Block::from_rows(self.schema.clone(), rows)])
    }
}

struct FinalAggPlan {
    window_column: String,
    group_by: Vec<String>,
    agg_calls: Vec<AggCall>,
    schema: Schema,
}

impl QueryPlan for FinalAggPlan {
    fn output_schema(&self) -> &Schema {
        &self.schema
    }

    fn execute(&self, input: Vec<Block>) -> StreamResult<Vec<Block>> {
        let mut groups: BTreeMap<OrderedRow, Vec<AggState>> = BTreeMap::new();

        for block in &input {
            if block.info() != ChunkInfo::AggregatedPartial {
                return Err(StreamError::Internal(anyhow!(
                    "final plan expects mergeable partial state input"
                )));
            }
            let window_column = block
                .column_by_name(&self.window_column)
                .ok_or_else(|| StreamError::column_not_found(self.window_column.as_str()))?;
            let group_columns = columns_by_name(block, &self.group_by)?;
            let state_columns = self
                .agg_calls
                .iter()
                .map(|call| {
                    block
                        .column_by_name(&call.output)
                        .ok_or_else(|| StreamError::column_not_found(call.output.as_str()))
                })
                .collect::<StreamResult<Vec<_>>>()?;

            for i in 0..block.cardinality() {
                let mut key = Vec::with_capacity(1 + group_columns.len());
                key.push(window_column.get(i));
                key.extend(group_columns.iter().map(|c| c.get(i)));

                let states = groups
                    .entry(OrderedRow(key))
                    .or_insert_with(|| self.agg_calls.iter().map(AggState::new).collect());
                for (state, column) in states.iter_mut().zip(&state_columns) {
                    state.merge(column.get(i))?;
                }
            }
        }

        if groups.is_empty() {
            return Ok(Vec::new());
        }
        let rows = groups
            .into_iter()
            .map(|(key, states)| {
                let mut row = key.0;
                row.extend(states.into_iter().map(AggState::into_datum));
                row
            })
            .collect();
        Ok(vec![Block::from_rows(self.schema.clone(), rows)])
    }
}

fn columns_by_name<'a>(block: &'a Block, names: &[String]) -> StreamResult<Vec<&'a Column>> {
    names
        .iter()
        .map(|name| {
            block
                .column_by_name(name)
                .ok_or_else(|| StreamError::column_not_found(name.as_str()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use weir_common::time::IntervalKind;

    use super::*;
    use crate::transform::{AddAggregatedInfoTransform, Pipeline};
    use crate::window::WindowSpec;

    fn input_schema() -> Schema {
        Schema::new(vec![
            Field::new("ts", DataType::UInt32),
            Field::new("v", DataType::Int64),
        ])
    }

    fn rows(data: &[(u32, i64)]) -> Block {
        Block::from_rows(
            input_schema(),
            data.iter()
                .map(|(ts, v)| vec![Some(ScalarImpl::UInt32(*ts)), Some(ScalarImpl::Int64(*v))])
                .collect(),
        )
    }

    fn compile(spec: WindowSpec) -> CompiledPlans {
        AggregatePlanner::new(vec![], vec![AggCall::count("cnt"), AggCall::sum("v", "total")])
            .compile(&Arc::new(spec), &input_schema())
            .unwrap()
    }

    fn tumble_plans() -> CompiledPlans {
        compile(
            WindowSpec::tumble(IntervalKind::Second, 5, "ts")
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn test_mergeable_groups_by_window_id() {
        let plans = tumble_plans();
        let partial = plans
            .mergeable
            .execute(vec![rows(&[(1, 10), (2, 20), (7, 30)])])
            .unwrap();
        assert_eq!(partial.len(), 1);
        let block = &partial[0];
        assert_eq!(block.schema().names(), vec!["window_id", "cnt", "total"]);
        assert_eq!(
            block.row_at(0),
            vec![
                Some(ScalarImpl::UInt32(5)),
                Some(ScalarImpl::UInt64(2)),
                Some(ScalarImpl::Int64(30)),
            ]
        );
        assert_eq!(
            block.row_at(1),
            vec![
                Some(ScalarImpl::UInt32(10)),
                Some(ScalarImpl::UInt64(1)),
                Some(ScalarImpl::Int64(30)),
            ]
        );
    }

    #[test]
    fn test_final_merges_partial_state() {
        let plans = tumble_plans();
        // Two ingest batches hitting the same window.
        let partial_a = plans.mergeable.execute(vec![rows(&[(1, 10)])]).unwrap();
        let partial_b = plans.mergeable.execute(vec![rows(&[(3, 5)])]).unwrap();

        let tag = |blocks: Vec<Block>| {
            blocks
                .into_iter()
                .map(|b| {
                    b.drop_column("window_id")
                        .with_column(
                            Field::new("window", DataType::Window),
                            Column::Const {
                                value: Some(ScalarImpl::Window(0, 5)),
                                len: 1,
                            },
                        )
                        .with_info(ChunkInfo::AggregatedPartial)
                })
                .collect::<Vec<_>>()
        };
        let mut mergeable = tag(partial_a);
        mergeable.extend(tag(partial_b));

        let finalized = plans.final_plan.execute(mergeable).unwrap();
        assert_eq!(finalized.len(), 1);
        assert_eq!(
            finalized[0].row_at(0),
            vec![
                Some(ScalarImpl::Window(0, 5)),
                Some(ScalarImpl::UInt64(2)),
                Some(ScalarImpl::Int64(15)),
            ]
        );
    }

    #[test]
    fn test_final_rejects_untagged_input() {
        let plans = tumble_plans();
        let partial = plans.mergeable.execute(vec![rows(&[(1, 10)])]).unwrap();
        let untagged = partial[0]
            .clone()
            .drop_column("window_id")
            .with_column(
                Field::new("window", DataType::Window),
                Column::Const {
                    value: Some(ScalarImpl::Window(0, 5)),
                    len: 1,
                },
            );
        assert!(plans.final_plan.execute(vec![untagged]).is_err());
    }

    #[test]
    fn test_hop_rows_land_in_one_slice_each() {
        let plans = compile(
            WindowSpec::hop(IntervalKind::Second, 2, 6, "ts")
                .build()
                .unwrap(),
        );
        let partial = plans
            .mergeable
            .execute(vec![rows(&[(0, 1), (3, 1), (7, 1)])])
            .unwrap();
        let block = &partial[0];
        // Slices (0,2], (2,4] and (6,8], one row each.
        assert_eq!(block.cardinality(), 3);
        let ids: Vec<_> = block
            .column_by_name("window_id")
            .unwrap()
            .iter()
            .map(|d| d.unwrap().as_u32().unwrap())
            .collect();
        assert_eq!(ids, vec![2, 4, 8]);
        let counts: Vec<_> = block
            .column_by_name("cnt")
            .unwrap()
            .iter()
            .map(|d| d.unwrap().as_u64().unwrap())
            .collect();
        assert_eq!(counts, vec![1, 1, 1]);
    }

    #[test]
    fn test_slice_merge_equals_direct_aggregation() {
        // Slice algebra: merging the window's slices must equal aggregating
        // the raw rows of (w - window, w] directly.
        let spec = WindowSpec::hop(IntervalKind::Second, 4, 6, "ts")
            .build()
            .unwrap();
        assert_eq!(spec.slice_n, 2);
        let plans = compile(spec.clone());

        let data: Vec<(u32, i64)> = (0..20).map(|t| (t, (t as i64) * 3 + 1)).collect();
        let partial = plans.mergeable.execute(vec![rows(&data)]).unwrap();

        let w = 12u32;
        let slices = spec.window_slices(w).unwrap();
        let mergeable = Pipeline::new()
            .add(crate::transform::FilterTransform::new(crate::expr::build_in_set(
                crate::expr::InputRefExpression::new("window_id", DataType::UInt32).boxed(),
                slices.iter().map(|s| ScalarImpl::UInt32(*s)).collect(),
            )))
            .add(crate::transform::AddColumnTransform::new(
                Field::new("window", DataType::Window),
                Some(ScalarImpl::Window(w - 6, w)),
            ))
            .add(crate::transform::DropColumnTransform::new("window_id"))
            .add(AddAggregatedInfoTransform)
            .execute(partial)
            .unwrap();
        let merged = plans.final_plan.execute(mergeable).unwrap();

        // Reference: aggregate the raw rows of [w - 6, w) directly.
        let direct: Vec<_> = data
            .iter()
            .filter(|(t, _)| *t >= w - 6 && *t < w)
            .collect();
        let expected_count = direct.len() as u64;
        let expected_sum: i64 = direct.iter().map(|(_, v)| v).sum();

        assert_eq!(
            merged[0].row_at(0),
            vec![
                Some(ScalarImpl::Window(w - 6, w)),
                Some(ScalarImpl::UInt64(expected_count)),
                Some(ScalarImpl::Int64(expected_sum)),
            ]
        );
    }

    #[test]
    fn test_compile_validates_columns() {
        let spec = Arc::new(
            WindowSpec::tumble(IntervalKind::Second, 5, "missing_ts")
                .build()
                .unwrap(),
        );
        let planner = AggregatePlanner::new(vec![], vec![AggCall::count("cnt")]);
        assert!(matches!(
            planner.compile(&spec, &input_schema()),
            Err(StreamError::ColumnNotFound(_))
        ));

        let spec = Arc::new(
            WindowSpec::tumble(IntervalKind::Second, 5, "ts").build().unwrap(),
        );
        let planner = AggregatePlanner::new(vec![], vec![AggCall::sum("nope", "s")]);
        assert!(planner.compile(&spec, &input_schema()).is_err());
    }
}
