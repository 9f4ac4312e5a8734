use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use super::errors::QueueError;
use super::queue::Shared;
use super::task::UploadTask;
use super::traits::ProgressCallback;
use super::types::{FailureKind, QueueEvent, StoredFile, TaskFailure, TaskId, TaskStatus, UploadProgress};

/// How one task's pipeline ended.
pub(crate) enum Outcome {
    Complete {
        file: StoredFile,
        version: String,
    },
    Failed {
        failure: TaskFailure,
        /// 已上传但未记录时保留远端引用
        remote_file: Option<StoredFile>,
    },
}

impl Outcome {
    fn failed(kind: FailureKind, message: impl Into<String>) -> Self {
        Self::Failed {
            failure: TaskFailure::new(kind, message),
            remote_file: None,
        }
    }
}

/// Owns the drain loop. Exactly one pipeline is in flight at a time.
pub(crate) struct QueueWorker {
    shared: Arc<Shared>,
    shutdown: CancellationToken,
}

impl QueueWorker {
    pub(crate) fn new(shared: Arc<Shared>, shutdown: CancellationToken) -> Self {
        Self { shared, shutdown }
    }

    pub(crate) async fn run(self, mut wake_rx: mpsc::UnboundedReceiver<()>) {
        // 主事件循环, 等待入队唤醒
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                wake = wake_rx.recv() => match wake {
                    Some(()) => self.drain().await,
                    None => break,
                },
            }
        }

        self.shared.commit(|state| {
            let changed = state.is_processing;
            state.is_processing = false;
            ((), changed)
        });
        tracing::debug!("upload worker stopped");
    }

    async fn drain(&self) {
        loop {
            let stopping = self.shutdown.is_cancelled();
            let next = self.shared.commit(|state| {
                let next = match stopping {
                    true => None,
                    false => state.next_queued().and_then(|task| task.mark_uploading().then(|| task.clone())),
                };
                match next {
                    Some(task) => {
                        state.current = Some(task.id);
                        (Some(task), true)
                    }
                    None => {
                        // 在同一把锁里清除标记，避免丢失唤醒
                        state.is_processing = false;
                        state.current = None;
                        (None, true)
                    }
                }
            });

            let Some(task) = next else {
                break;
            };

            self.shared.emit(QueueEvent::StateChanged {
                task_id: task.id,
                from: TaskStatus::Queued,
                to: TaskStatus::Uploading,
            });
            tracing::info!(task_id = %task.id, file = %task.file.name, "upload started");

            let task_id = task.id;
            let shared = self.shared.clone();
            let pipeline = tokio::spawn(async move { run_pipeline(&shared, task).await });
            let outcome = match pipeline.await {
                Ok(outcome) => outcome,
                Err(err) => Outcome::failed(FailureKind::Internal, format!("Upload pipeline panicked: {err}")),
            };

            self.finish(task_id, outcome);
        }
    }

    fn finish(&self, task_id: TaskId, outcome: Outcome) {
        let (event, to) = match &outcome {
            Outcome::Complete { file, version } => (
                QueueEvent::Completed {
                    task_id,
                    file: file.clone(),
                    version: version.clone(),
                },
                TaskStatus::Complete,
            ),
            Outcome::Failed { failure, .. } => (
                QueueEvent::Failed {
                    task_id,
                    failure: failure.clone(),
                },
                TaskStatus::Failed,
            ),
        };

        let finished = self.shared.commit(|state| {
            state.current = None;
            let Some(task) = state.task_mut(task_id) else {
                return (false, false);
            };
            let finished = match outcome {
                Outcome::Complete { file, version } => task.mark_complete(file, version),
                Outcome::Failed { failure, remote_file } => task.mark_failed(failure, remote_file),
            };
            if finished {
                match to {
                    TaskStatus::Complete => state.completed_count += 1,
                    _ => state.failed_count += 1,
                }
            }
            (finished, finished)
        });

        if !finished {
            return;
        }

        match &event {
            QueueEvent::Completed { version, .. } => {
                tracing::info!(task_id = %task_id, version = %version, "upload complete");
            }
            QueueEvent::Failed { failure, .. } => {
                tracing::error!(task_id = %task_id, kind = ?failure.kind, error = %failure.message, "upload failed");
            }
            _ => {}
        }
        self.shared.emit(QueueEvent::StateChanged {
            task_id,
            from: TaskStatus::Uploading,
            to,
        });
        self.shared.emit(event);

        let linger = match to {
            TaskStatus::Complete => self.shared.config.success_linger,
            _ => self.shared.config.failure_linger,
        };
        let shared = Arc::downgrade(&self.shared);
        tokio::spawn(async move {
            tokio::time::sleep(linger).await;
            if let Some(shared) = shared.upgrade() {
                shared.remove_finished(task_id);
            }
        });
    }
}

/// Folder resolution, upload, then metadata reconciliation for one task.
async fn run_pipeline(shared: &Arc<Shared>, task: UploadTask) -> Outcome {
    if !shared.files.is_available() {
        return Outcome::failed(FailureKind::StoreUnavailable, QueueError::StoreUnavailable.to_string());
    }

    let plan = match shared.reconciler.plan(&task).await {
        Ok(plan) => plan,
        Err(err @ QueueError::FolderResolution(_)) => {
            return Outcome::failed(FailureKind::FolderResolution, err.to_string());
        }
        Err(err) => return Outcome::failed(FailureKind::Metadata, err.to_string()),
    };

    if let Err(err) = shared.files.ensure_folder(&plan.folder).await {
        return Outcome::failed(FailureKind::FolderResolution, err.to_string());
    }

    let on_progress: ProgressCallback = {
        let shared = shared.clone();
        let task_id = task.id;
        Arc::new(move |progress: UploadProgress| shared.update_progress(task_id, progress))
    };

    let stored = match shared
        .files
        .upload_file(&task.file, &plan.folder, &plan.file_name, on_progress)
        .await
    {
        Ok(stored) => stored,
        Err(err) => return Outcome::failed(FailureKind::Transport, err.to_string()),
    };

    let backend = shared.files.backend();
    match shared.reconciler.record(&task, &plan, backend, &stored).await {
        Ok((drawing, version)) => {
            shared.reconciler.log_upload(&task, &plan, &drawing, &version).await;
            Outcome::Complete {
                file: stored,
                version: version.version,
            }
        }
        Err(err) => {
            // 不做补偿删除，远端文件保留，由任务携带其引用
            tracing::warn!(
                task_id = %task.id,
                storage_id = %stored.id,
                folder = %plan.folder,
                error = %err,
                "file uploaded but version was not recorded"
            );
            Outcome::Failed {
                failure: TaskFailure::new(
                    FailureKind::UploadedNotRecorded,
                    format!(
                        "Uploaded {}/{} ({}) but not recorded: {}",
                        plan.folder, plan.file_name, stored.id, err
                    ),
                ),
                remote_file: Some(stored),
            }
        }
    }
}
