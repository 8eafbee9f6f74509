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

use std::collections::{HashMap, HashSet};
use std::fmt;

use parking_lot::Mutex;

use crate::array::DataType;

/// A named, typed column in a [`Schema`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub data_type: DataType,
}

impl Field {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// The schema of a block or table.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Schema {
    pub fields: Vec<Field>,
}

impl Schema {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Position of the column with the given name, if any.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn data_types(&self) -> Vec<DataType> {
        self.fields.iter().map(|f| f.data_type).collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }
}

impl FromIterator<Field> for Schema {
    fn from_iter<I: IntoIterator<Item = Field>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

/// Identifier of a table known to the table service.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableId(String);

impl TableId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the hidden inner table holding partial aggregation state.
    pub fn inner_table(&self) -> TableId {
        TableId(format!(".inner.{}", self.0))
    }

    /// Name of the hidden target table owned by a view created without an
    /// explicit TO table.
    pub fn inner_target_table(&self) -> TableId {
        TableId(format!(".inner.target.{}", self.0))
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TableId {
    fn from(name: &str) -> Self {
        Self(name.to_owned())
    }
}

/// Tracks which tables depend on which. A window view registers itself as a
/// dependent of its source table at construction; dropping the source is
/// refused while dependents exist.
#[derive(Default)]
pub struct DependencyRegistry {
    deps: Mutex<HashMap<TableId, HashSet<TableId>>>,
}

impl DependencyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_dependency(&self, source: TableId, dependent: TableId) {
        self.deps.lock().entry(source).or_default().insert(dependent);
    }

    pub fn remove_dependency(&self, source: &TableId, dependent: &TableId) {
        let mut deps = self.deps.lock();
        if let Some(set) = deps.get_mut(source) {
            set.remove(dependent);
            if set.is_empty() {
                deps.remove(source);
            }
        }
    }

    /// All registered dependents of `source`, in no particular order.
    pub fn dependents(&self, source: &TableId) -> Vec<TableId> {
        self.deps
            .lock()
            .get(source)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }
}
