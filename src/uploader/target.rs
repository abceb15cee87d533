// 上传目标
//
// 上传开始前完成全部本地校验，校验不通过时不会发起任何网络请求

use crate::uploader::{UploadError, VideoMetadata};
use chrono::Utc;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// 单个文件大小上限（256 GiB）
pub const DEFAULT_MAX_FILE_SIZE: u64 = 256 * 1024 * 1024 * 1024;

/// 缩略图大小上限（2 MiB）
pub const MAX_THUMBNAIL_SIZE: u64 = 2 * 1024 * 1024;

/// 视频扩展名 → 媒体类型
pub fn video_media_type(extension: &str) -> Option<&'static str> {
    match extension.to_ascii_lowercase().as_str() {
        "mp4" => Some("video/mp4"),
        "mov" => Some("video/quicktime"),
        "avi" => Some("video/x-msvideo"),
        "flv" => Some("video/x-flv"),
        "wmv" => Some("video/x-ms-wmv"),
        "webm" => Some("video/webm"),
        "mkv" => Some("video/x-matroska"),
        "mpeg" | "mpg" => Some("video/mpeg"),
        _ => None,
    }
}

/// 缩略图扩展名 → 媒体类型
pub fn image_media_type(extension: &str) -> Option<&'static str> {
    match extension.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

fn video_type_of(path: &Path) -> Result<&'static str, UploadError> {
    let extension = extension_of(path);
    video_media_type(&extension).ok_or_else(|| {
        UploadError::input(format!(
            "不支持的视频格式: {:?}（支持 mp4, mov, avi, flv, wmv, webm, mkv, mpeg, mpg）",
            extension
        ))
    })
}

fn check_video_size(path: &Path, total_bytes: u64, max_file_size: u64) -> Result<(), UploadError> {
    if total_bytes == 0 {
        return Err(UploadError::input(format!("视频文件为空: {:?}", path)));
    }
    if total_bytes > max_file_size {
        return Err(UploadError::input(format!(
            "文件大小 {:.2} GB 超过上限 {:.0} GB",
            total_bytes as f64 / (1024u64.pow(3)) as f64,
            max_file_size as f64 / (1024u64.pow(3)) as f64
        )));
    }
    Ok(())
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_string()
}

/// 检查路径是可读的普通文件，返回文件大小
fn regular_file_len(path: &Path, label: &str) -> Result<u64, UploadError> {
    let meta = std::fs::metadata(path).map_err(|e| {
        UploadError::input(format!("{}不存在或无法访问: {:?} ({})", label, path, e))
    })?;
    if !meta.is_file() {
        return Err(UploadError::input(format!("{}不是普通文件: {:?}", label, path)));
    }
    // 能打开才算可读
    std::fs::File::open(path)
        .map_err(|e| UploadError::input(format!("{}不可读: {:?} ({})", label, path, e)))?;
    Ok(meta.len())
}

/// 缩略图
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThumbnailAsset {
    pub path: PathBuf,
    pub media_type: String,
    pub size: u64,
}

impl ThumbnailAsset {
    pub fn from_path(path: impl Into<PathBuf>) -> Result<Self, UploadError> {
        let path = path.into();
        let extension = extension_of(&path);
        let media_type = image_media_type(&extension).ok_or_else(|| {
            UploadError::input(format!(
                "不支持的缩略图格式: {:?}（支持 jpg, jpeg, png, webp）",
                extension
            ))
        })?;

        let size = regular_file_len(&path, "缩略图")?;
        if size == 0 {
            return Err(UploadError::input("缩略图文件为空"));
        }
        if size > MAX_THUMBNAIL_SIZE {
            return Err(UploadError::input(format!(
                "缩略图大小 {} 字节超过 2 MiB 上限",
                size
            )));
        }

        Ok(Self {
            path,
            media_type: media_type.to_string(),
            size,
        })
    }

    pub async fn read(&self) -> Result<Vec<u8>, UploadError> {
        tokio::fs::read(&self.path)
            .await
            .map_err(|e| UploadError::input(format!("读取缩略图失败: {:?} ({})", self.path, e)))
    }
}

/// 一次上传的输入
#[derive(Debug, Clone)]
pub struct UploadTarget {
    pub file_path: PathBuf,
    pub total_bytes: u64,
    pub media_type: String,
    pub metadata: VideoMetadata,
    pub thumbnail: Option<ThumbnailAsset>,
}

impl UploadTarget {
    /// 校验文件、元数据和缩略图
    pub fn from_path(
        file_path: impl Into<PathBuf>,
        metadata: VideoMetadata,
        thumbnail: Option<PathBuf>,
        max_file_size: u64,
    ) -> Result<Self, UploadError> {
        let file_path = file_path.into();

        let media_type = video_type_of(&file_path)?;
        let total_bytes = regular_file_len(&file_path, "视频文件")?;
        check_video_size(&file_path, total_bytes, max_file_size)?;

        metadata.validate(Utc::now())?;

        let thumbnail = thumbnail.map(ThumbnailAsset::from_path).transpose()?;

        info!(
            "上传目标校验通过: {:?}, {} bytes, {}",
            file_path, total_bytes, media_type
        );
        Ok(Self {
            file_path,
            total_bytes,
            media_type: media_type.to_string(),
            metadata,
            thumbnail,
        })
    }

    /// 重新执行全部本地校验
    ///
    /// 字段均为公开字段，目标不一定经过 `from_path` 构造
    pub fn validate(&self, max_file_size: u64) -> Result<(), UploadError> {
        check_video_size(&self.file_path, self.total_bytes, max_file_size)?;

        let media_type = video_type_of(&self.file_path)?;
        if media_type != self.media_type {
            return Err(UploadError::input(format!(
                "媒体类型 {} 与文件扩展名不符（应为 {}）",
                self.media_type, media_type
            )));
        }

        self.metadata.validate(Utc::now())?;

        if let Some(thumbnail) = &self.thumbnail {
            let checked = ThumbnailAsset::from_path(thumbnail.path.clone())?;
            if checked.media_type != thumbnail.media_type {
                return Err(UploadError::input(format!(
                    "缩略图媒体类型 {} 与文件扩展名不符（应为 {}）",
                    thumbnail.media_type, checked.media_type
                )));
            }
        }

        self.check_unchanged()
    }

    /// 文件长度在校验后被修改时拒绝继续
    pub fn check_unchanged(&self) -> Result<(), UploadError> {
        let current = regular_file_len(&self.file_path, "视频文件")?;
        if current != self.total_bytes {
            warn!(
                "文件长度已变化: {:?}, {} -> {}",
                self.file_path, self.total_bytes, current
            );
            return Err(UploadError::input(format!(
                "文件长度在上传前发生变化: {} -> {}",
                self.total_bytes, current
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uploader::UploadErrorKind;
    use std::fs;

    fn write(dir: &Path, name: &str, len: usize) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, vec![7u8; len]).unwrap();
        path
    }

    #[test]
    fn test_media_type_mapping() {
        assert_eq!(video_media_type("MP4"), Some("video/mp4"));
        assert_eq!(video_media_type("mpg"), Some("video/mpeg"));
        assert_eq!(video_media_type("txt"), None);
        assert_eq!(image_media_type("jpeg"), Some("image/jpeg"));
        assert_eq!(image_media_type("gif"), None);
    }

    #[test]
    fn test_valid_target() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "clip.mov", 1024);

        let target =
            UploadTarget::from_path(&path, VideoMetadata::new("clip"), None, DEFAULT_MAX_FILE_SIZE)
                .unwrap();
        assert_eq!(target.total_bytes, 1024);
        assert_eq!(target.media_type, "video/quicktime");
        assert!(target.check_unchanged().is_ok());

        fs::write(&path, vec![1u8; 10]).unwrap();
        assert!(target.check_unchanged().is_err());
    }

    #[test]
    fn test_rejections() {
        let dir = tempfile::tempdir().unwrap();
        let meta = VideoMetadata::new("clip");

        let empty = write(dir.path(), "empty.mp4", 0);
        let err = UploadTarget::from_path(&empty, meta.clone(), None, DEFAULT_MAX_FILE_SIZE)
            .unwrap_err();
        assert_eq!(err.kind(), UploadErrorKind::InputValidation);

        let text = write(dir.path(), "notes.txt", 10);
        assert!(UploadTarget::from_path(&text, meta.clone(), None, DEFAULT_MAX_FILE_SIZE).is_err());

        let missing = dir.path().join("missing.mp4");
        assert!(
            UploadTarget::from_path(&missing, meta.clone(), None, DEFAULT_MAX_FILE_SIZE).is_err()
        );

        let big = write(dir.path(), "big.mp4", 100);
        assert!(UploadTarget::from_path(&big, meta.clone(), None, 99).is_err());

        // 目录
        let sub = dir.path().join("dir.mp4");
        fs::create_dir(&sub).unwrap();
        assert!(UploadTarget::from_path(&sub, meta, None, DEFAULT_MAX_FILE_SIZE).is_err());
    }

    #[test]
    fn test_thumbnail_validated_up_front() {
        let dir = tempfile::tempdir().unwrap();
        let video = write(dir.path(), "clip.mp4", 100);
        let meta = VideoMetadata::new("clip");

        let thumb = write(dir.path(), "cover.png", 100);
        let target = UploadTarget::from_path(
            &video,
            meta.clone(),
            Some(thumb),
            DEFAULT_MAX_FILE_SIZE,
        )
        .unwrap();
        assert_eq!(target.thumbnail.unwrap().media_type, "image/png");

        let huge = write(dir.path(), "cover.jpg", (MAX_THUMBNAIL_SIZE + 1) as usize);
        assert!(
            UploadTarget::from_path(&video, meta.clone(), Some(huge), DEFAULT_MAX_FILE_SIZE)
                .is_err()
        );

        let gif = write(dir.path(), "cover.gif", 10);
        assert!(UploadTarget::from_path(&video, meta, Some(gif), DEFAULT_MAX_FILE_SIZE).is_err());
    }

    #[test]
    fn test_validate_hand_built_target() {
        let dir = tempfile::tempdir().unwrap();
        let video = write(dir.path(), "clip.mp4", 100);
        let good = UploadTarget {
            file_path: video.clone(),
            total_bytes: 100,
            media_type: "video/mp4".to_string(),
            metadata: VideoMetadata::new("clip"),
            thumbnail: None,
        };
        assert!(good.validate(DEFAULT_MAX_FILE_SIZE).is_ok());

        let empty = write(dir.path(), "empty.txt", 0);
        let bogus = UploadTarget {
            file_path: empty,
            total_bytes: 0,
            media_type: "text/plain".to_string(),
            metadata: VideoMetadata::new(""),
            thumbnail: None,
        };
        let err = bogus.validate(DEFAULT_MAX_FILE_SIZE).unwrap_err();
        assert_eq!(err.kind(), UploadErrorKind::InputValidation);

        let wrong_type = UploadTarget {
            media_type: "video/webm".to_string(),
            ..good.clone()
        };
        assert!(wrong_type.validate(DEFAULT_MAX_FILE_SIZE).is_err());

        let untitled = UploadTarget {
            metadata: VideoMetadata::new("  "),
            ..good.clone()
        };
        assert!(untitled.validate(DEFAULT_MAX_FILE_SIZE).is_err());

        assert!(good.validate(99).is_err());

        // 声明的长度与磁盘不一致
        let stale = UploadTarget {
            total_bytes: 50,
            ..good
        };
        assert!(stale.validate(DEFAULT_MAX_FILE_SIZE).is_err());
    }
}
