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

//! A small expression kernel for the predicates the engine builds itself:
//! lateness filters, window selectors and cleanup bounds.

use std::cmp::Ordering;
use std::fmt::Debug;

use weir_common::array::{Block, DataType, Datum, ScalarImpl};

use crate::error::{StreamError, StreamResult};

pub trait Expression: Send + Sync + Debug {
    fn return_type(&self) -> DataType;

    /// Evaluate over every row of the block.
    fn eval(&self, input: &Block) -> StreamResult<Vec<Datum>>;
}

pub type BoxedExpression = Box<dyn Expression>;

/// Reads a column by name.
#[derive(Debug)]
pub struct InputRefExpression {
    column: String,
    data_type: DataType,
}

impl InputRefExpression {
    pub fn new(column: impl Into<String>, data_type: DataType) -> Self {
        Self {
            column: column.into(),
            data_type,
        }
    }

    pub fn boxed(self) -> BoxedExpression {
        Box::new(self)
    }
}

impl Expression for InputRefExpression {
    fn return_type(&self) -> DataType {
        self.data_type
    }

    fn eval(&self, input: &Block) -> StreamResult<Vec<Datum>> {
        let column = input
            .column_by_name(&self.column)
            .ok_or_else(|| StreamError::column_not_found(self.column.as_str()))?;
        Ok(column.iter().collect())
    }
}

#[derive(Debug)]
pub struct LiteralExpression {
    literal: Datum,
    data_type: DataType,
}

impl LiteralExpression {
    pub fn new(data_type: DataType, literal: Datum) -> Self {
        Self { literal, data_type }
    }

    pub fn boxed(self) -> BoxedExpression {
        Box::new(self)
    }
}

impl Expression for LiteralExpression {
    fn return_type(&self) -> DataType {
        self.data_type
    }

    fn eval(&self, input: &Block) -> StreamResult<Vec<Datum>> {
        Ok(vec![self.literal.clone(); input.cardinality()])
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareOp {
    Equal,
    LessThan,
    GreaterThanOrEqual,
}

impl CompareOp {
    fn matches(self, ordering: Ordering) -> bool {
        match self {
            Self::Equal => ordering == Ordering::Equal,
            Self::LessThan => ordering == Ordering::Less,
            Self::GreaterThanOrEqual => ordering != Ordering::Less,
        }
    }
}

/// Row-wise comparison of two expressions; a null operand yields null.
#[derive(Debug)]
struct CompareExpression {
    op: CompareOp,
    lhs: BoxedExpression,
    rhs: BoxedExpression,
}

impl Expression for CompareExpression {
    fn return_type(&self) -> DataType {
        DataType::Boolean
    }

    fn eval(&self, input: &Block) -> StreamResult<Vec<Datum>> {
        let lhs = self.lhs.eval(input)?;
        let rhs = self.rhs.eval(input)?;
        Ok(lhs
            .into_iter()
            .zip(rhs)
            .map(|(l, r)| match (l, r) {
                (Some(l), Some(r)) => {
                    Some(ScalarImpl::Bool(self.op.matches(l.default_cmp(&r))))
                }
                _ => None,
            })
            .collect())
    }
}

pub fn build_compare(op: CompareOp, lhs: BoxedExpression, rhs: BoxedExpression) -> BoxedExpression {
    Box::new(CompareExpression { op, lhs, rhs })
}

/// Set membership over a list of literals; a null input yields null.
#[derive(Debug)]
struct InSetExpression {
    input: BoxedExpression,
    set: Vec<ScalarImpl>,
}

impl Expression for InSetExpression {
    fn return_type(&self) -> DataType {
        DataType::Boolean
    }

    fn eval(&self, input: &Block) -> StreamResult<Vec<Datum>> {
        Ok(self
            .input
            .eval(input)?
            .into_iter()
            .map(|datum| {
                datum.map(|value| {
                    ScalarImpl::Bool(
                        self.set
                            .iter()
                            .any(|member| member.default_cmp(&value) == Ordering::Equal),
                    )
                })
            })
            .collect())
    }
}

pub fn build_in_set(input: BoxedExpression, set: Vec<ScalarImpl>) -> BoxedExpression {
    Box::new(InSetExpression { input, set })
}

#[cfg(test)]
mod tests {
    use weir_common::array::{Block, DataType, ScalarImpl};
    use weir_common::catalog::{Field, Schema};

    use super::*;

    fn block() -> Block {
        Block::from_rows(
            Schema::new(vec![Field::new("window_id", DataType::UInt32)]),
            vec![
                vec![Some(ScalarImpl::UInt32(5))],
                vec![Some(ScalarImpl::UInt32(10))],
                vec![None],
            ],
        )
    }

    #[test]
    fn test_compare_greater_or_equal() {
        let expr = build_compare(
            CompareOp::GreaterThanOrEqual,
            InputRefExpression::new("window_id", DataType::UInt32).boxed(),
            LiteralExpression::new(DataType::UInt32, Some(ScalarImpl::UInt32(10))).boxed(),
        );
        assert_eq!(
            expr.eval(&block()).unwrap(),
            vec![
                Some(ScalarImpl::Bool(false)),
                Some(ScalarImpl::Bool(true)),
                None
            ]
        );
    }

    #[test]
    fn test_in_set() {
        let expr = build_in_set(
            InputRefExpression::new("window_id", DataType::UInt32).boxed(),
            vec![ScalarImpl::UInt32(10), ScalarImpl::UInt32(12)],
        );
        assert_eq!(
            expr.eval(&block()).unwrap(),
            vec![
                Some(ScalarImpl::Bool(false)),
                Some(ScalarImpl::Bool(true)),
                None
            ]
        );
    }

    #[test]
    fn test_missing_column() {
        let expr = InputRefExpression::new("nope", DataType::UInt32).boxed();
        assert!(matches!(
            expr.eval(&block()),
            Err(StreamError::ColumnNotFound(_))
        ));
    }
}
