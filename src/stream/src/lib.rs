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

//! The weir streaming window view engine.
//!
//! A window view consumes an append-only stream of timestamped rows and
//! materializes per-window aggregates incrementally: ingested batches are
//! reduced to mergeable partial state kept in an inner table, a watermark
//! clock decides when windows complete, and completed windows are finalized
//! and emitted to a target table and live watch subscribers.

pub mod error;
pub mod expr;
pub mod plan;
pub mod table;
pub mod task;
pub mod transform;
pub mod view;
pub mod watch;
pub mod watermark;
pub mod window;

pub use error::{StreamError, StreamResult};
pub use view::{WindowView, WindowViewArgs};
pub use window::{TimeMode, TimeWindowKind, WatermarkPolicy, WindowSpec};
