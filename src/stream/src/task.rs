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

//! Self-rearming background tasks on the shared tokio runtime.
//!
//! A [`ScheduledTask`] runs its job once per `schedule_after` call; the job
//! re-arms the task at the end of each iteration. Deactivating stops future
//! runs; dropping the task aborts its worker.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;

type Job = Box<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

struct TaskInner {
    active: AtomicBool,
    deadline: Mutex<Option<Instant>>,
    notify: Notify,
}

pub struct ScheduledTask {
    inner: Arc<TaskInner>,
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    /// Spawn the worker for `job`. The task starts deactivated and
    /// unscheduled.
    pub fn new<F, Fut>(job: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let inner = Arc::new(TaskInner {
            active: AtomicBool::new(false),
            deadline: Mutex::new(None),
            notify: Notify::new(),
        });
        let job: Job = Box::new(move || job().boxed());
        let handle = tokio::spawn(Self::run(inner.clone(), job));
        Self { inner, handle }
    }

    pub fn activate_and_schedule(&self) {
        self.inner.active.store(true, Ordering::Release);
        self.schedule_after(Duration::ZERO);
    }

    /// Arm the task to run once after `delay`. Replaces any pending
    /// schedule. Ignored while deactivated.
    pub fn schedule_after(&self, delay: Duration) {
        if !self.inner.active.load(Ordering::Acquire) {
            return;
        }
        *self.inner.deadline.lock() = Some(Instant::now() + delay);
        self.inner.notify.notify_one();
    }

    /// Stop future runs. An iteration already in flight completes.
    pub fn deactivate(&self) {
        self.inner.active.store(false, Ordering::Release);
        *self.inner.deadline.lock() = None;
        self.inner.notify.notify_one();
    }

    async fn run(inner: Arc<TaskInner>, job: Job) {
        loop {
            let deadline = *inner.deadline.lock();
            match deadline {
                None => inner.notify.notified().await,
                Some(when) => {
                    if Instant::now() >= when {
                        *inner.deadline.lock() = None;
                        if inner.active.load(Ordering::Acquire) {
                            job().await;
                        }
                    } else {
                        tokio::select! {
                            _ = tokio::time::sleep_until(when) => {}
                            _ = inner.notify.notified() => {}
                        }
                    }
                }
            }
        }
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[tokio::test]
    async fn test_job_runs_once_per_schedule() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let task = ScheduledTask::new(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        task.activate_and_schedule();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        task.schedule_after(Duration::ZERO);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_deactivated_task_does_not_run() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let task = ScheduledTask::new(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        task.activate_and_schedule();
        tokio::time::sleep(Duration::from_millis(50)).await;
        task.deactivate();
        task.schedule_after(Duration::ZERO);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rearming_from_the_job() {
        let runs = Arc::new(AtomicUsize::new(0));
        let task: Arc<Mutex<Option<Arc<ScheduledTask>>>> = Arc::new(Mutex::new(None));

        let counter = runs.clone();
        let task_ref = task.clone();
        let scheduled = Arc::new(ScheduledTask::new(move || {
            let counter = counter.clone();
            let task_ref = task_ref.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    if let Some(task) = task_ref.lock().as_ref() {
                        task.schedule_after(Duration::from_millis(1));
                    }
                }
            }
        }));
        *task.lock() = Some(scheduled.clone());

        scheduled.activate_and_schedule();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }
}
