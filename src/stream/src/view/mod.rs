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

//! The materialized window view: construction, lifecycle and the background
//! fire and cleanup tasks.

mod fire;
mod ingest;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tracing::{error, trace};
use weir_common::array::{Block, DataType, ScalarImpl};
use weir_common::catalog::{DependencyRegistry, Field, Schema, TableId};
use weir_common::config::WindowViewConfig;

use crate::error::{StreamError, StreamResult};
use crate::expr::{build_compare, CompareOp, InputRefExpression, LiteralExpression};
use crate::plan::{CompiledPlans, Planner};
use crate::table::TableService;
use crate::task::ScheduledTask;
use crate::watch::{WatcherRegistry, WatchStream};
use crate::watermark::{WatermarkClock, WatermarkSnapshot};
use crate::window::{TimeMode, WindowSpec, PROCTIME_TIMESTAMP_COLUMN};

/// Arguments for opening a window view.
pub struct WindowViewArgs {
    pub id: TableId,
    pub spec: WindowSpec,
    pub source_table: TableId,
    /// Explicit table receiving fired rows.
    pub to_table: Option<TableId>,
    /// Create a hidden `.inner.target.` table when no TO table is given.
    /// With neither, the view only serves watch subscribers.
    pub inner_target: bool,
    /// Attach an existing view: its tables must already exist and the
    /// experimental setting is not required.
    pub attach: bool,
    /// Override the wall-clock origin of the proctime fire schedule, for
    /// tests and deterministic replays.
    pub proctime_epoch: Option<u32>,
}

impl WindowViewArgs {
    pub fn new(id: TableId, spec: WindowSpec, source_table: TableId) -> Self {
        Self {
            id,
            spec,
            source_table,
            to_table: None,
            inner_target: false,
            attach: false,
            proctime_epoch: None,
        }
    }
}

pub struct WindowView {
    /// Back-reference handed to the background task closures, so tasks never
    /// keep the view alive on their own.
    weak_self: Weak<WindowView>,
    id: TableId,
    spec: Arc<WindowSpec>,
    config: Arc<WindowViewConfig>,
    tables: Arc<dyn TableService>,
    registry: Arc<DependencyRegistry>,
    source_table_id: TableId,
    inner_table_id: TableId,
    target_table_id: Option<TableId>,
    owns_target: bool,
    plans: CompiledPlans,
    clock: Arc<WatermarkClock>,
    watchers: WatcherRegistry,
    /// Guards the fire pipeline's use of the inner table.
    fire_mutex: tokio::sync::Mutex<()>,
    /// Writers hold this shared for the span of a batch; the fire tasks hold
    /// it exclusively while draining signals, so a signal enqueued during a
    /// write is fired strictly after that write completes.
    ingest_barrier: tokio::sync::RwLock<()>,
    shutdown_called: AtomicBool,
    fire_task: Mutex<Option<Arc<ScheduledTask>>>,
    clean_task: Mutex<Option<Arc<ScheduledTask>>>,
}

impl WindowView {
    pub async fn open(
        args: WindowViewArgs,
        planner: &dyn Planner,
        tables: Arc<dyn TableService>,
        registry: Arc<DependencyRegistry>,
        config: Arc<WindowViewConfig>,
    ) -> StreamResult<Arc<Self>> {
        if !args.attach && !config.allow_experimental_window_view {
            return Err(StreamError::ExperimentalDisabled);
        }
        if args.to_table.is_some() && args.inner_target {
            return Err(StreamError::InvalidParam {
                name: "to_table",
                reason: "an explicit TO table excludes an inner target table".into(),
            });
        }

        let spec = Arc::new(args.spec);
        let source = tables.get(&args.source_table)?;
        let mut input_schema = source.schema().clone();
        if spec.is_time_column_now {
            input_schema
                .fields
                .push(Field::new(PROCTIME_TIMESTAMP_COLUMN, DataType::UInt32));
        }
        let plans = planner.compile(&spec, &input_schema)?;

        let inner_table_id = args.id.inner_table();
        if args.attach {
            tables.get(&inner_table_id)?;
        } else {
            tables
                .create_table(inner_table_id.clone(), plans.mergeable.output_schema().clone())
                .await?;
        }

        let target_table_id = if let Some(to_table) = args.to_table {
            tables.get(&to_table)?;
            Some(to_table)
        } else if args.inner_target {
            let id = args.id.inner_target_table();
            if args.attach {
                tables.get(&id)?;
            } else {
                tables
                    .create_table(id.clone(), plans.output_header.clone())
                    .await?;
            }
            Some(id)
        } else {
            None
        };
        let owns_target = args.inner_target;

        registry.add_dependency(args.source_table.clone(), args.id.clone());

        let clock = Arc::new(WatermarkClock::new(spec.clone()));
        if spec.time_mode == TimeMode::Proctime {
            let now = args.proctime_epoch.unwrap_or_else(wall_clock_seconds);
            clock.init_next_fire_signal(spec.window_upper_bound(now)?);
        }

        Ok(Arc::new_cyclic(|weak_self| Self {
            weak_self: weak_self.clone(),
            id: args.id,
            spec,
            config,
            tables,
            registry,
            source_table_id: args.source_table,
            inner_table_id,
            target_table_id,
            owns_target,
            plans,
            clock,
            watchers: WatcherRegistry::new(),
            fire_mutex: tokio::sync::Mutex::new(()),
            ingest_barrier: tokio::sync::RwLock::new(()),
            shutdown_called: AtomicBool::new(false),
            fire_task: Mutex::new(None),
            clean_task: Mutex::new(None),
        }))
    }

    fn weak(&self) -> Weak<WindowView> {
        self.weak_self.clone()
    }

    pub fn id(&self) -> &TableId {
        &self.id
    }

    pub fn spec(&self) -> &WindowSpec {
        &self.spec
    }

    pub fn output_header(&self) -> &Schema {
        &self.plans.output_header
    }

    pub fn watermark_snapshot(&self) -> WatermarkSnapshot {
        self.clock.snapshot()
    }

    pub fn fire_queue(&self) -> Vec<u32> {
        self.clock.fire_queue_snapshot()
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown_called.load(Ordering::Acquire)
    }

    /// Activate the fire and cleanup tasks.
    pub fn startup(&self) {
        let weak = self.weak();
        let clean_task = Arc::new(ScheduledTask::new(move || {
            let weak = weak.clone();
            async move {
                if let Some(view) = weak.upgrade() {
                    view.cleanup_tick().await;
                }
            }
        }));
        clean_task.activate_and_schedule();
        *self.clean_task.lock() = Some(clean_task);

        let weak = self.weak();
        let fire_task = match self.spec.time_mode {
            TimeMode::Proctime => Arc::new(ScheduledTask::new(move || {
                let weak = weak.clone();
                async move {
                    if let Some(view) = weak.upgrade() {
                        view.proc_fire_tick().await;
                    }
                }
            })),
            TimeMode::EventTime => Arc::new(ScheduledTask::new(move || {
                let weak = weak.clone();
                async move {
                    if let Some(view) = weak.upgrade() {
                        view.event_fire_loop().await;
                    }
                }
            })),
        };
        fire_task.activate_and_schedule();
        *self.fire_task.lock() = Some(fire_task);
    }

    /// Stop both tasks, wake all waiters and unregister from the source
    /// table. Idempotent.
    pub fn shutdown(&self) {
        self.shutdown_called.store(true, Ordering::Release);
        self.clock.notify();
        drop(self.fire_task.lock().take());
        drop(self.clean_task.lock().take());
        self.watchers.close_all();
        self.registry.remove_dependency(&self.source_table_id, &self.id);
    }

    /// Drop the inner table, and the target table if the view owns it.
    /// Assumes `shutdown` was called.
    pub async fn drop_view(&self) {
        if let Err(error) = self.tables.drop_table(&self.inner_table_id).await {
            error!(view = %self.id, %error, "failed to drop inner table");
        }
        if self.owns_target {
            if let Some(target) = &self.target_table_id {
                if let Err(error) = self.tables.drop_table(target).await {
                    error!(view = %self.id, %error, "failed to drop inner target table");
                }
            }
        }
    }

    /// Refuse dropping the view's source while the view depends on it.
    pub fn check_can_be_dropped(&self, table: &TableId) -> StreamResult<()> {
        if let Some(dependent) = self.registry.dependents(table).first() {
            return Err(StreamError::HasDependency(table.clone(), dependent.clone()));
        }
        Ok(())
    }

    /// Register a live subscriber observing fired windows.
    pub fn watch(&self, limit: Option<u64>, events_only: bool) -> WatchStream {
        self.watchers.register(
            self.plans.output_header.clone(),
            self.config.heartbeat_interval(),
            limit,
            events_only,
        )
    }

    /// Serve a SELECT over the view by reading the target table.
    pub async fn read(&self) -> StreamResult<Vec<Block>> {
        let Some(target_id) = &self.target_table_id else {
            return Ok(Vec::new());
        };
        let target = self.tables.get(target_id)?;
        let _lock = target
            .lock_for_share(self.config.lock_acquire_timeout())
            .await?;
        let blocks = target.read().await?;
        blocks
            .into_iter()
            .map(|block| {
                if *block.schema() == self.plans.output_header {
                    Ok(block)
                } else {
                    block
                        .project_by_name(&self.plans.output_header)
                        .ok_or_else(|| {
                            StreamError::Internal(anyhow::anyhow!(
                                "target table layout does not cover the view output header"
                            ))
                        })
                }
            })
            .collect()
    }

    /// Drop all partial state.
    pub async fn truncate(&self) -> StreamResult<()> {
        self.tables.get(&self.inner_table_id)?.truncate().await
    }

    /// Delete inner rows that can no longer contribute to any fire, and
    /// prune expired watchers.
    pub async fn cleanup(&self) -> StreamResult<()> {
        let bound = self.clock.cleanup_bound()?;
        let inner = self.tables.get(&self.inner_table_id)?;
        let predicate = build_compare(
            CompareOp::LessThan,
            InputRefExpression::new(self.spec.window_id_column.as_str(), DataType::UInt32).boxed(),
            LiteralExpression::new(DataType::UInt32, Some(ScalarImpl::UInt32(bound))).boxed(),
        );
        let deleted = inner.delete_where(&*predicate).await?;
        if deleted > 0 {
            trace!(view = %self.id, bound, deleted, "cleaned up inner table");
        }
        self.watchers.prune_expired();
        Ok(())
    }

    async fn cleanup_tick(&self) {
        if self.is_shutdown() {
            return;
        }
        if let Err(error) = self.cleanup().await {
            error!(view = %self.id, %error, "window view cleanup failed");
        }
        if !self.is_shutdown() {
            if let Some(task) = self.clean_task.lock().as_ref() {
                task.schedule_after(self.config.clean_interval());
            }
        }
    }

    /// One proctime fire-task iteration: fire everything due, then re-arm at
    /// the next fire second.
    async fn proc_fire_tick(&self) {
        self.proc_tick(wall_clock_seconds()).await;
        if self.is_shutdown() {
            return;
        }
        let next = self.clock.next_fire_signal();
        let delay = Duration::from_millis(
            (next as u64 * 1000).saturating_sub(wall_clock_millis()),
        );
        if let Some(task) = self.fire_task.lock().as_ref() {
            task.schedule_after(delay);
        }
    }

    /// Fire every proctime window due at or before `now`.
    pub async fn proc_tick(&self, now: u32) {
        let _barrier = self.ingest_barrier.write().await;
        loop {
            let watermark = self.clock.next_fire_signal();
            if self.is_shutdown() || watermark == 0 || watermark > now {
                break;
            }
            self.fire(watermark).await;
            let step = match self.spec.slide_step_seconds() {
                Ok(step) => step.max(1),
                Err(error) => {
                    error!(view = %self.id, %error, "invalid proctime slide interval");
                    break;
                }
            };
            self.clock.proc_advance(watermark, step);
        }
    }

    async fn event_fire_loop(&self) {
        while !self.is_shutdown() {
            let signaled = self.clock.wait_for_signal(Duration::from_secs(5)).await;
            if self.is_shutdown() {
                break;
            }
            if !signaled {
                continue;
            }
            trace!(view = %self.id, pending = self.fire_queue().len(), "fire events");
            self.drain_fire_signals().await;
        }
    }

    /// Synchronously process all pending event-time fire signals. This is
    /// what the event fire task runs when woken; it is public so embedders
    /// and tests can drain deterministically.
    pub async fn drain_fire_signals(&self) {
        let _barrier = self.ingest_barrier.write().await;
        while let Some(watermark) = self.clock.pop_fire_signal() {
            self.fire(watermark).await;
        }
    }
}

fn wall_clock_seconds() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0) as u32
}

fn wall_clock_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
