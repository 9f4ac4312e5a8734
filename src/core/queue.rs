use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use crate::config::QueueConfig;
use crate::drawings::version::VersionReconciler;
use super::errors::{QueueError, Result};
use super::task::UploadTask;
use super::traits::{MetadataStore, RemoteFileStore};
use super::types::{FileRef, QueueEvent, TaskId, TaskStatus, UploadOptions, UploadProgress};
use super::worker::QueueWorker;

/// 快照监听器，每次状态变更后同步调用
pub type Listener = Arc<dyn Fn(&QueueSnapshot) + Send + Sync>;

/// Owned copy of the queue state handed to the UI.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueSnapshot {
    pub queue: Vec<UploadTask>,
    pub is_processing: bool,
    pub current_upload: Option<UploadTask>,
    pub completed_count: usize,
    pub failed_count: usize,
    pub pending_count: usize,
    pub total_in_queue: usize,
}

#[derive(Default)]
pub(crate) struct QueueState {
    /// 按入队顺序排列
    pub(crate) tasks: Vec<UploadTask>,
    pub(crate) is_processing: bool,
    pub(crate) current: Option<TaskId>,
    pub(crate) completed_count: usize,
    pub(crate) failed_count: usize,
}

impl QueueState {
    fn snapshot(&self) -> QueueSnapshot {
        let current_upload = self
            .current
            .and_then(|id| self.tasks.iter().find(|task| task.id == id))
            .cloned();

        QueueSnapshot {
            queue: self.tasks.clone(),
            is_processing: self.is_processing,
            current_upload,
            completed_count: self.completed_count,
            failed_count: self.failed_count,
            pending_count: self.tasks.iter().filter(|task| task.status == TaskStatus::Queued).count(),
            total_in_queue: self.tasks.len(),
        }
    }

    pub(crate) fn task_mut(&mut self, id: TaskId) -> Option<&mut UploadTask> {
        self.tasks.iter_mut().find(|task| task.id == id)
    }

    /// Oldest task still waiting.
    pub(crate) fn next_queued(&mut self) -> Option<&mut UploadTask> {
        self.tasks.iter_mut().find(|task| task.status == TaskStatus::Queued)
    }
}

pub(crate) struct Shared {
    pub(crate) state: Mutex<QueueState>,
    listeners: Mutex<BTreeMap<u64, Listener>>,
    next_listener_id: AtomicU64,
    pub(crate) events: broadcast::Sender<QueueEvent>,
    pub(crate) files: Arc<dyn RemoteFileStore>,
    pub(crate) reconciler: VersionReconciler,
    pub(crate) config: QueueConfig,
}

impl Shared {
    /// Run `mutation` under the state lock. When it reports a change, listeners
    /// receive a snapshot after the lock is released.
    pub(crate) fn commit<R>(&self, mutation: impl FnOnce(&mut QueueState) -> (R, bool)) -> R {
        let (result, snapshot) = {
            let mut state = self.state.lock();
            let (result, changed) = mutation(&mut state);
            (result, changed.then(|| state.snapshot()))
        };

        if let Some(snapshot) = snapshot {
            self.notify(&snapshot);
        }
        result
    }

    fn notify(&self, snapshot: &QueueSnapshot) {
        let listeners: Vec<Listener> = self.listeners.lock().values().cloned().collect();
        for listener in listeners {
            listener(snapshot);
        }
    }

    pub(crate) fn emit(&self, event: QueueEvent) {
        let _ = self.events.send(event);
    }

    pub(crate) fn update_progress(&self, task_id: TaskId, progress: UploadProgress) {
        let updated = self.commit(|state| match state.task_mut(task_id) {
            Some(task) if task.status == TaskStatus::Uploading => {
                task.progress = progress;
                (true, true)
            }
            _ => (false, false),
        });

        if updated {
            self.emit(QueueEvent::Progress { task_id, progress });
        }
    }

    /// Drop a finished task once its linger window has passed.
    pub(crate) fn remove_finished(&self, task_id: TaskId) {
        let removed = self.commit(|state| {
            let before = state.tasks.len();
            state
                .tasks
                .retain(|task| !(task.id == task_id && task.status.is_terminal()));
            let removed = state.tasks.len() != before;
            (removed, removed)
        });

        if removed {
            tracing::debug!(task_id = %task_id, "removed finished task");
            self.emit(QueueEvent::Removed { task_id });
        }
    }
}

/// Detaches its listener on [`Subscription::unsubscribe`] or when dropped.
#[must_use = "dropping a Subscription detaches the listener"]
pub struct Subscription {
    id: u64,
    shared: Weak<Shared>,
}

impl Subscription {
    /// Idempotent.
    pub fn unsubscribe(&self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.listeners.lock().remove(&self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Serial FIFO upload queue.
///
/// Cheap to clone; all clones drive the same queue. Every method except
/// [`UploadQueueHandle::shutdown`] is synchronous and never waits on the
/// network.
#[derive(Clone)]
pub struct UploadQueue {
    shared: Arc<Shared>,
    wake_tx: mpsc::UnboundedSender<()>,
}

/// 上传队列句柄 - 包含队列和工作任务
pub struct UploadQueueHandle {
    pub queue: UploadQueue,
    pub worker_handle: JoinHandle<()>,
    shutdown: CancellationToken,
}

impl UploadQueueHandle {
    /// Stop the worker after the in-flight upload, if any, has finished.
    /// Tasks still queued are dropped.
    pub async fn shutdown(self) -> Result<()> {
        self.shutdown.cancel();
        drop(self.queue);
        self.worker_handle
            .await
            .map_err(|err| QueueError::internal_error(format!("Worker panic: {err}")))
    }
}

impl UploadQueue {
    /// Create the queue and spawn its worker on the current tokio runtime.
    pub fn new(
        files: Arc<dyn RemoteFileStore>,
        metadata: Arc<dyn MetadataStore>,
        config: QueueConfig,
    ) -> UploadQueueHandle {
        let (wake_tx, wake_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let reconciler = VersionReconciler::new(metadata, config.module_packages_discipline.clone());

        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState::default()),
            listeners: Mutex::new(BTreeMap::new()),
            next_listener_id: AtomicU64::new(0),
            events,
            files,
            reconciler,
            config,
        });

        let shutdown = CancellationToken::new();
        let worker = QueueWorker::new(shared.clone(), shutdown.clone());
        let worker_handle = tokio::spawn(worker.run(wake_rx));

        UploadQueueHandle {
            queue: Self { shared, wake_tx },
            worker_handle,
            shutdown,
        }
    }

    /// Append one task per file to the tail of the queue and return their ids.
    /// Nothing is queued once the worker has stopped.
    pub fn enqueue(&self, files: impl IntoIterator<Item = FileRef>, options: UploadOptions) -> Vec<TaskId> {
        let tasks: Vec<UploadTask> = files
            .into_iter()
            .map(|file| UploadTask::new(file, &options))
            .collect();
        if tasks.is_empty() {
            return Vec::new();
        }

        if self.wake_tx.is_closed() {
            tracing::warn!(count = tasks.len(), "upload worker has stopped, rejecting uploads");
            return Vec::new();
        }

        let ids: Vec<TaskId> = tasks.iter().map(|task| task.id).collect();
        let wake = self.shared.commit(|state| {
            state.tasks.extend(tasks);
            let wake = !state.is_processing;
            state.is_processing = true;
            (wake, true)
        });

        // 工作任务在检查之后才退出：撤回刚加入的任务
        if wake && self.wake_tx.send(()).is_err() {
            tracing::warn!(count = ids.len(), "upload worker has stopped, rejecting uploads");
            self.shared.commit(|state| {
                state.tasks.retain(|task| !ids.contains(&task.id));
                state.is_processing = false;
                ((), true)
            });
            return Vec::new();
        }

        for task_id in &ids {
            self.shared.emit(QueueEvent::TaskAdded { task_id: *task_id });
        }
        tracing::info!(count = ids.len(), "enqueued uploads");

        ids
    }

    /// Remove a task that has not started yet. In-flight and finished tasks
    /// are never cancelled.
    pub fn cancel(&self, task_id: TaskId) -> bool {
        let cancelled = self.shared.commit(|state| {
            let index = state
                .tasks
                .iter()
                .position(|task| task.id == task_id && task.status == TaskStatus::Queued);
            match index {
                Some(index) => {
                    state.tasks.remove(index);
                    (true, true)
                }
                None => (false, false),
            }
        });

        if cancelled {
            self.shared.emit(QueueEvent::Cancelled { task_id });
        }
        cancelled
    }

    /// Drop every queued task; the current upload keeps running.
    pub fn cancel_all_pending(&self) {
        let cancelled = self.shared.commit(|state| {
            let (queued, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut state.tasks)
                .into_iter()
                .partition(|task| task.status == TaskStatus::Queued);
            state.tasks = rest;
            let ids: Vec<TaskId> = queued.into_iter().map(|task| task.id).collect();
            let changed = !ids.is_empty();
            (ids, changed)
        });

        for task_id in cancelled {
            self.shared.emit(QueueEvent::Cancelled { task_id });
        }
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&QueueSnapshot) + Send + Sync + 'static,
    {
        let id = self.shared.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.shared.listeners.lock().insert(id, Arc::new(listener));

        Subscription {
            id,
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// 订阅事件
    ///
    /// 注意：
    /// - 如果接收速度跟不上发送速度，可能会丢失事件（lagged error）
    /// - 每个订阅者都会收到完整的事件副本
    pub fn subscribe_events(&self) -> broadcast::Receiver<QueueEvent> {
        self.shared.events.subscribe()
    }

    pub fn get_state(&self) -> QueueSnapshot {
        self.shared.state.lock().snapshot()
    }

    pub fn get_task(&self, task_id: TaskId) -> Option<UploadTask> {
        self.shared
            .state
            .lock()
            .tasks
            .iter()
            .find(|task| task.id == task_id)
            .cloned()
    }

    /// Reset the completed / failed counters; queue contents are untouched.
    pub fn clear_history(&self) {
        self.shared.commit(|state| {
            state.completed_count = 0;
            state.failed_count = 0;
            ((), true)
        });
    }
}
