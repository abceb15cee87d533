// 上传任务定义
//
// 后台上传的可观察状态，供 HTTP 接口查询

use crate::uploader::{Progress, UploadError, UploadErrorKind, UploadOutcome, UploadTarget};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// 上传任务状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UploadTaskStatus {
    /// 等待中
    Pending,
    /// 上传中
    Uploading,
    /// 已完成
    Completed,
    /// 失败
    Failed,
    /// 已取消
    Cancelled,
}

/// 上传任务
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadTask {
    /// 任务ID
    pub id: String,
    /// 本地文件路径
    pub file_path: PathBuf,
    /// 视频标题
    pub title: String,
    /// 文件大小
    pub total_size: u64,
    /// 服务器已确认大小
    pub uploaded_size: u64,
    /// 任务状态
    pub status: UploadTaskStatus,
    /// 平均上传速度 (bytes/s)
    pub speed: u64,
    /// 已耗时 (秒)
    pub elapsed_secs: f64,
    /// 创建时间 (Unix timestamp)
    pub created_at: i64,
    /// 开始时间 (Unix timestamp)
    pub started_at: Option<i64>,
    /// 完成时间 (Unix timestamp)
    pub completed_at: Option<i64>,

    // === 结果 ===
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watch_url: Option<String>,
    /// 会话重建次数
    #[serde(default)]
    pub restarts: u32,
    #[serde(default)]
    pub warnings: Vec<String>,

    // === 错误 ===
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<UploadErrorKind>,
}

impl UploadTask {
    /// 创建新的上传任务
    pub fn new(target: &UploadTarget) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            file_path: target.file_path.clone(),
            title: target.metadata.title.trim().to_string(),
            total_size: target.total_bytes,
            uploaded_size: 0,
            status: UploadTaskStatus::Pending,
            speed: 0,
            elapsed_secs: 0.0,
            created_at: chrono::Utc::now().timestamp(),
            started_at: None,
            completed_at: None,
            resource_id: None,
            watch_url: None,
            restarts: 0,
            warnings: Vec::new(),
            error: None,
            error_kind: None,
        }
    }

    /// 计算进度百分比
    pub fn progress(&self) -> f64 {
        if self.total_size == 0 {
            return 0.0;
        }
        (self.uploaded_size as f64 / self.total_size as f64) * 100.0
    }

    /// 估算剩余时间 (秒)
    pub fn eta(&self) -> Option<u64> {
        if self.speed == 0 || self.uploaded_size >= self.total_size {
            return None;
        }
        let remaining = self.total_size - self.uploaded_size;
        Some(remaining / self.speed)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            UploadTaskStatus::Completed | UploadTaskStatus::Failed | UploadTaskStatus::Cancelled
        )
    }

    /// 标记为上传中
    pub fn mark_uploading(&mut self) {
        self.status = UploadTaskStatus::Uploading;
        if self.started_at.is_none() {
            self.started_at = Some(chrono::Utc::now().timestamp());
        }
    }

    /// 更新进度
    pub fn update_progress(&mut self, progress: Progress) {
        self.uploaded_size = progress.bytes_confirmed;
        self.speed = progress.bytes_per_sec();
        self.elapsed_secs = progress.elapsed.as_secs_f64();
    }

    /// 标记为已完成
    pub fn mark_completed(&mut self, outcome: &UploadOutcome) {
        self.status = UploadTaskStatus::Completed;
        self.completed_at = Some(chrono::Utc::now().timestamp());
        self.uploaded_size = self.total_size;
        self.elapsed_secs = outcome.elapsed.as_secs_f64();
        self.resource_id = Some(outcome.resource_id.clone());
        self.watch_url = Some(outcome.watch_url.clone());
        self.restarts = outcome.restarts;
        self.warnings = outcome.warnings.clone();
    }

    /// 标记为失败（取消单独记为 Cancelled）
    pub fn mark_failed(&mut self, error: &UploadError) {
        self.status = match error {
            UploadError::Cancelled { .. } => UploadTaskStatus::Cancelled,
            _ => UploadTaskStatus::Failed,
        };
        self.completed_at = Some(chrono::Utc::now().timestamp());
        self.error = Some(error.to_string());
        self.error_kind = Some(error.kind());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uploader::VideoMetadata;
    use std::time::Duration;

    fn task(total: u64) -> UploadTask {
        UploadTask::new(&UploadTarget {
            file_path: PathBuf::from("./clip.mp4"),
            total_bytes: total,
            media_type: "video/mp4".to_string(),
            metadata: VideoMetadata::new(" clip "),
            thumbnail: None,
        })
    }

    #[test]
    fn test_task_creation() {
        let task = task(1024 * 1024);
        assert_eq!(task.status, UploadTaskStatus::Pending);
        assert_eq!(task.uploaded_size, 0);
        assert_eq!(task.progress(), 0.0);
        assert_eq!(task.title, "clip");
    }

    #[test]
    fn test_progress_and_eta() {
        let mut task = task(1000);
        task.update_progress(Progress {
            bytes_confirmed: 200,
            total_bytes: 1000,
            elapsed: Duration::from_secs(2),
        });
        assert_eq!(task.progress(), 20.0);
        assert_eq!(task.speed, 100);
        assert_eq!(task.eta(), Some(8)); // (1000 - 200) / 100 = 8s

        task.speed = 0;
        assert_eq!(task.eta(), None); // 速度为0，无法估算
    }

    #[test]
    fn test_status_transitions() {
        let mut task = task(1000);

        task.mark_uploading();
        assert_eq!(task.status, UploadTaskStatus::Uploading);
        assert!(task.started_at.is_some());
        assert!(!task.is_terminal());

        task.mark_failed(&UploadError::Cancelled { offset: 10 });
        assert_eq!(task.status, UploadTaskStatus::Cancelled);
        assert_eq!(task.error_kind, Some(UploadErrorKind::Cancelled));
        assert!(task.is_terminal());

        task.mark_failed(&UploadError::input("bad"));
        assert_eq!(task.status, UploadTaskStatus::Failed);
    }

    #[test]
    fn test_mark_completed() {
        let mut task = task(1000);
        task.mark_completed(&UploadOutcome {
            resource_id: "vid".into(),
            watch_url: "https://www.youtube.com/watch?v=vid".into(),
            title: "clip".into(),
            total_bytes: 1000,
            restarts: 1,
            elapsed: Duration::from_secs(3),
            warnings: vec!["缩略图设置失败".into()],
        });
        assert_eq!(task.status, UploadTaskStatus::Completed);
        assert_eq!(task.uploaded_size, task.total_size);
        assert_eq!(task.resource_id.as_deref(), Some("vid"));
        assert_eq!(task.restarts, 1);
        assert_eq!(task.warnings.len(), 1);
    }
}
