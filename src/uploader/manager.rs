// 上传管理器
//
// 负责管理多个后台上传任务：
// - 每个任务一个 tokio 任务，任务之间互不影响
// - 进度跟踪（进度回调直接写入任务状态）
// - 取消/删除

use crate::uploader::{
    ProgressCallback, UploadCoordinator, UploadError, UploadTask, UploadTaskStatus,
    VideoMetadata,
};
use anyhow::Result;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// 上传任务信息
#[derive(Debug, Clone)]
pub struct UploadTaskInfo {
    /// 任务
    pub task: Arc<Mutex<UploadTask>>,
    /// 取消令牌
    pub cancel_token: CancellationToken,
}

/// 上传管理器
pub struct UploadManager {
    coordinator: Arc<UploadCoordinator>,
    /// 所有任务（task_id -> TaskInfo）
    tasks: Arc<DashMap<String, UploadTaskInfo>>,
}

impl UploadManager {
    pub fn new(coordinator: Arc<UploadCoordinator>) -> Self {
        Self {
            coordinator,
            tasks: Arc::new(DashMap::new()),
        }
    }

    pub fn coordinator(&self) -> &Arc<UploadCoordinator> {
        &self.coordinator
    }

    /// 创建并立即启动上传任务
    ///
    /// 本地校验在返回前完成，校验失败不会创建任务
    pub fn create_task(
        &self,
        file_path: PathBuf,
        metadata: VideoMetadata,
        thumbnail: Option<PathBuf>,
    ) -> Result<String, UploadError> {
        let target = self.coordinator.prepare(file_path, metadata, thumbnail)?;

        let task = UploadTask::new(&target);
        let task_id = task.id.clone();
        let info = UploadTaskInfo {
            task: Arc::new(Mutex::new(task)),
            cancel_token: CancellationToken::new(),
        };
        self.tasks.insert(task_id.clone(), info.clone());

        let coordinator = self.coordinator.clone();
        let id = task_id.clone();
        tokio::spawn(async move {
            info.task.lock().mark_uploading();

            let progress_task = info.task.clone();
            let progress: ProgressCallback = Arc::new(move |progress| {
                progress_task.lock().update_progress(progress);
            });

            let result = coordinator
                .upload(&target, Some(progress), info.cancel_token.clone())
                .await;

            let mut task = info.task.lock();
            match result {
                Ok(outcome) => {
                    info!("上传任务完成: {} -> {}", id, outcome.watch_url);
                    task.mark_completed(&outcome);
                }
                Err(e) => {
                    error!("上传任务失败: {}, 错误: {}", id, e);
                    task.mark_failed(&e);
                }
            }
        });

        info!("创建上传任务: {}", task_id);
        Ok(task_id)
    }

    /// 取消上传任务（在下一个分片边界生效）
    pub fn cancel_task(&self, task_id: &str) -> Result<()> {
        let task_info = self
            .tasks
            .get(task_id)
            .ok_or_else(|| anyhow::anyhow!("任务不存在: {}", task_id))?;

        if task_info.task.lock().is_terminal() {
            anyhow::bail!("任务已结束，无法取消: {}", task_id);
        }

        // 发送取消信号
        task_info.cancel_token.cancel();
        info!("取消上传任务: {}", task_id);
        Ok(())
    }

    /// 删除已结束的上传任务
    pub fn delete_task(&self, task_id: &str) -> Result<()> {
        let task_info = self
            .tasks
            .get(task_id)
            .ok_or_else(|| anyhow::anyhow!("任务不存在: {}", task_id))?;

        if !task_info.task.lock().is_terminal() {
            anyhow::bail!("任务仍在进行中，请先取消: {}", task_id);
        }
        drop(task_info);

        self.tasks.remove(task_id);
        info!("删除上传任务: {}", task_id);
        Ok(())
    }

    /// 获取任务状态
    pub fn get_task(&self, task_id: &str) -> Option<UploadTask> {
        let task_info = self.tasks.get(task_id)?;
        let task = task_info.task.lock().clone();
        Some(task)
    }

    /// 获取所有任务（按创建时间倒序）
    pub fn get_all_tasks(&self) -> Vec<UploadTask> {
        let mut tasks: Vec<UploadTask> = self
            .tasks
            .iter()
            .map(|entry| entry.task.lock().clone())
            .collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        tasks
    }

    /// 获取活跃任务数
    pub fn active_task_count(&self) -> usize {
        self.tasks
            .iter()
            .filter(|entry| {
                matches!(
                    entry.task.lock().status,
                    UploadTaskStatus::Pending | UploadTaskStatus::Uploading
                )
            })
            .count()
    }

    /// 取消全部进行中的任务（进程退出时调用）
    pub fn shutdown(&self) {
        for entry in self.tasks.iter() {
            entry.cancel_token.cancel();
        }
    }
}
