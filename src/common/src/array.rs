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

use std::cmp::Ordering;

use crate::catalog::{Field, Schema};

/// Scalar types carried by blocks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DataType {
    Boolean,
    UInt32,
    UInt64,
    Int64,
    Float64,
    Varchar,
    /// A `(start, end)` pair of second-resolution timestamps describing a
    /// fired window.
    Window,
}

/// An owned scalar value.
#[derive(Clone, Debug, PartialEq)]
pub enum ScalarImpl {
    Bool(bool),
    UInt32(u32),
    UInt64(u64),
    Int64(i64),
    Float64(f64),
    Utf8(Box<str>),
    Window(u32, u32),
}

/// A nullable scalar.
pub type Datum = Option<ScalarImpl>;

impl ScalarImpl {
    pub fn data_type(&self) -> DataType {
        match self {
            Self::Bool(_) => DataType::Boolean,
            Self::UInt32(_) => DataType::UInt32,
            Self::UInt64(_) => DataType::UInt64,
            Self::Int64(_) => DataType::Int64,
            Self::Float64(_) => DataType::Float64,
            Self::Utf8(_) => DataType::Varchar,
            Self::Window(..) => DataType::Window,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Self::UInt32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::UInt64(v) => Some(*v),
            _ => None,
        }
    }

    /// A total order over scalars of the same type. `Float64` is ordered by
    /// `total_cmp`; mismatched types are ordered by their type tag so the
    /// order stays total.
    pub fn default_cmp(&self, other: &Self) -> Ordering {
        use ScalarImpl::*;
        match (self, other) {
            (Bool(a), Bool(b)) => a.cmp(b),
            (UInt32(a), UInt32(b)) => a.cmp(b),
            (UInt64(a), UInt64(b)) => a.cmp(b),
            (Int64(a), Int64(b)) => a.cmp(b),
            (Float64(a), Float64(b)) => a.total_cmp(b),
            (Utf8(a), Utf8(b)) => a.cmp(b),
            (Window(a1, a2), Window(b1, b2)) => (a1, a2).cmp(&(b1, b2)),
            _ => type_rank(self).cmp(&type_rank(other)),
        }
    }

    fn estimated_size(&self) -> usize {
        match self {
            Self::Bool(_) => 1,
            Self::UInt32(_) => 4,
            Self::UInt64(_) | Self::Int64(_) | Self::Float64(_) | Self::Window(..) => 8,
            Self::Utf8(s) => s.len(),
        }
    }
}

fn type_rank(s: &ScalarImpl) -> u8 {
    match s {
        ScalarImpl::Bool(_) => 0,
        ScalarImpl::UInt32(_) => 1,
        ScalarImpl::UInt64(_) => 2,
        ScalarImpl::Int64(_) => 3,
        ScalarImpl::Float64(_) => 4,
        ScalarImpl::Utf8(_) => 5,
        ScalarImpl::Window(..) => 6,
    }
}

/// Total order over nullable scalars, nulls first.
pub fn datum_cmp(a: &Datum, b: &Datum) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => a.default_cmp(b),
    }
}

/// A column of a block, either fully materialized or a constant repeated
/// `len` times. Constants are produced by projection stages and expanded by
/// the materializing stage before leaving the engine.
#[derive(Clone, Debug, PartialEq)]
pub enum Column {
    Full(Vec<Datum>),
    Const { value: Datum, len: usize },
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Self::Full(data) => data.len(),
            Self::Const { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_const(&self) -> bool {
        matches!(self, Self::Const { .. })
    }

    pub fn get(&self, i: usize) -> Datum {
        match self {
            Self::Full(data) => data[i].clone(),
            Self::Const { value, .. } => value.clone(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = Datum> + '_ {
        (0..self.len()).map(|i| self.get(i))
    }

    /// Expand to a fully materialized column.
    pub fn materialize(self) -> Column {
        match self {
            full @ Self::Full(_) => full,
            Self::Const { value, len } => Self::Full(vec![value; len]),
        }
    }

    fn filter(&self, mask: &[bool]) -> Column {
        match self {
            Self::Full(data) => Self::Full(
                data.iter()
                    .zip(mask)
                    .filter_map(|(d, keep)| keep.then(|| d.clone()))
                    .collect(),
            ),
            Self::Const { value, .. } => Self::Const {
                value: value.clone(),
                len: mask.iter().filter(|keep| **keep).count(),
            },
        }
    }

    fn estimated_size(&self) -> usize {
        match self {
            Self::Full(data) => data
                .iter()
                .map(|d| d.as_ref().map_or(1, ScalarImpl::estimated_size))
                .sum(),
            Self::Const { value, len } => {
                value.as_ref().map_or(1, ScalarImpl::estimated_size) * len
            }
        }
    }
}

impl FromIterator<Datum> for Column {
    fn from_iter<I: IntoIterator<Item = Datum>>(iter: I) -> Self {
        Self::Full(iter.into_iter().collect())
    }
}

/// Marker describing what a block's rows are.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ChunkInfo {
    /// Plain data rows.
    #[default]
    Plain,
    /// Mergeable partial aggregation state; the final plan merges such rows
    /// instead of aggregating them from scratch.
    AggregatedPartial,
}

/// A schema-carrying batch of rows in column-major layout.
#[derive(Clone, Debug, PartialEq)]
pub struct Block {
    schema: Schema,
    columns: Vec<Column>,
    info: ChunkInfo,
}

impl Block {
    /// All columns must have equal length.
    pub fn new(schema: Schema, columns: Vec<Column>) -> Self {
        assert_eq!(schema.len(), columns.len());
        if let Some(first) = columns.first() {
            assert!(columns.iter().all(|c| c.len() == first.len()));
        }
        Self {
            schema,
            columns,
            info: ChunkInfo::Plain,
        }
    }

    pub fn empty(schema: Schema) -> Self {
        let columns = schema.fields.iter().map(|_| Column::Full(vec![])).collect();
        Self::new(schema, columns)
    }

    /// Build a block from row-major data.
    pub fn from_rows(schema: Schema, rows: Vec<Vec<Datum>>) -> Self {
        let mut columns: Vec<Vec<Datum>> = vec![Vec::with_capacity(rows.len()); schema.len()];
        for row in rows {
            assert_eq!(row.len(), schema.len());
            for (column, datum) in columns.iter_mut().zip(row) {
                column.push(datum);
            }
        }
        Self::new(schema, columns.into_iter().map(Column::Full).collect())
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn info(&self) -> ChunkInfo {
        self.info
    }

    pub fn with_info(mut self, info: ChunkInfo) -> Self {
        self.info = info;
        self
    }

    /// Number of rows.
    pub fn cardinality(&self) -> usize {
        self.columns.first().map_or(0, Column::len)
    }

    pub fn column(&self, i: usize) -> &Column {
        &self.columns[i]
    }

    pub fn column_by_name(&self, name: &str) -> Option<&Column> {
        self.schema.index_of(name).map(|i| &self.columns[i])
    }

    pub fn row_at(&self, i: usize) -> Vec<Datum> {
        self.columns.iter().map(|c| c.get(i)).collect()
    }

    pub fn rows(&self) -> impl Iterator<Item = Vec<Datum>> + '_ {
        (0..self.cardinality()).map(|i| self.row_at(i))
    }

    /// Keep the rows whose mask bit is set. The chunk info is preserved.
    pub fn filter(&self, mask: &[bool]) -> Block {
        assert_eq!(mask.len(), self.cardinality());
        Block {
            schema: self.schema.clone(),
            columns: self.columns.iter().map(|c| c.filter(mask)).collect(),
            info: self.info,
        }
    }

    /// Append a column on the right.
    pub fn with_column(mut self, field: Field, column: Column) -> Block {
        assert_eq!(column.len(), self.cardinality());
        self.schema.fields.push(field);
        self.columns.push(column);
        self
    }

    /// Drop the column with the given name, if present.
    pub fn drop_column(mut self, name: &str) -> Block {
        if let Some(i) = self.schema.index_of(name) {
            self.schema.fields.remove(i);
            self.columns.remove(i);
        }
        self
    }

    /// Reorder columns to the target schema, matching by name. Returns `None`
    /// if a target column is missing.
    pub fn project_by_name(&self, target: &Schema) -> Option<Block> {
        let columns = target
            .fields
            .iter()
            .map(|f| self.column_by_name(&f.name).cloned())
            .collect::<Option<Vec<_>>>()?;
        Some(Block {
            schema: target.clone(),
            columns,
            info: self.info,
        })
    }

    /// Concatenate blocks of one schema into a single block.
    pub fn concat(schema: Schema, blocks: impl IntoIterator<Item = Block>) -> Block {
        let mut columns: Vec<Vec<Datum>> = vec![Vec::new(); schema.len()];
        for block in blocks {
            assert_eq!(block.schema.len(), schema.len());
            for (target, source) in columns.iter_mut().zip(&block.columns) {
                target.extend(source.iter());
            }
        }
        Block::new(schema, columns.into_iter().map(Column::Full).collect())
    }

    /// Expand all constant columns to full ones.
    pub fn materialize(self) -> Block {
        Block {
            schema: self.schema,
            columns: self.columns.into_iter().map(Column::materialize).collect(),
            info: self.info,
        }
    }

    /// Approximate payload size in bytes, used by the squashing stage.
    pub fn estimated_size(&self) -> usize {
        self.columns.iter().map(Column::estimated_size).sum()
    }
}
