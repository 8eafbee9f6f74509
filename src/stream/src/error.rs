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

use thiserror::Error;
use weir_common::catalog::TableId;
use weir_common::time::IntervalError;

/// A specialized Result type for window view operations.
pub type StreamResult<T> = std::result::Result<T, StreamError>;

/// The error type for window view operations.
#[derive(Error, Debug)]
pub enum StreamError {
    #[error(
        "Experimental WINDOW VIEW feature is not enabled \
         (the setting 'allow_experimental_window_view')"
    )]
    ExperimentalDisabled,

    #[error("Incorrect query: {0}")]
    IncorrectQuery(Box<str>),

    #[error("Invalid parameter {name}: {reason}")]
    InvalidParam {
        name: &'static str,
        reason: Box<str>,
    },

    #[error("Table {0} not found")]
    TableNotFound(TableId),

    #[error("Table {0} already exists")]
    TableAlreadyExists(TableId),

    #[error("Table {0} has dependency {1}")]
    HasDependency(TableId, TableId),

    #[error("Column {0} not found")]
    ColumnNotFound(Box<str>),

    #[error("Failed to acquire lock on table {table} within {timeout_ms} ms")]
    LockTimeout { table: TableId, timeout_ms: u64 },

    #[error(transparent)]
    Interval(#[from] IntervalError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl StreamError {
    pub fn column_not_found(name: impl Into<Box<str>>) -> Self {
        Self::ColumnNotFound(name.into())
    }

    pub fn incorrect_query(reason: impl Into<Box<str>>) -> Self {
        Self::IncorrectQuery(reason.into())
    }
}
