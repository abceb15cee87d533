// 视频元数据
//
// 负责元数据校验，以及生成创建上传会话时的请求体和 part 参数

use crate::uploader::UploadError;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::info;

/// 标题最大字符数
pub const MAX_TITLE_CHARS: usize = 100;

/// 描述最大字节数
pub const MAX_DESCRIPTION_BYTES: usize = 5000;

/// 标签合计最大字符数
pub const MAX_TAGS_CHARS: usize = 500;

/// 默认分类（People & Blogs）
pub const DEFAULT_CATEGORY_ID: &str = "22";

/// 内置分类表（分类 ID → 名称）
pub const VIDEO_CATEGORIES: &[(&str, &str)] = &[
    ("1", "Film & Animation"),
    ("2", "Autos & Vehicles"),
    ("10", "Music"),
    ("15", "Pets & Animals"),
    ("17", "Sports"),
    ("18", "Short Movies"),
    ("19", "Travel & Events"),
    ("20", "Gaming"),
    ("21", "Videoblogging"),
    ("22", "People & Blogs"),
    ("23", "Comedy"),
    ("24", "Entertainment"),
    ("25", "News & Politics"),
    ("26", "Howto & Style"),
    ("27", "Education"),
    ("28", "Science & Technology"),
    ("29", "Nonprofits & Activism"),
    ("30", "Movies"),
    ("31", "Anime/Animation"),
    ("32", "Action/Adventure"),
    ("33", "Classics"),
    ("34", "Comedy"),
    ("35", "Documentary"),
    ("36", "Drama"),
    ("37", "Family"),
    ("38", "Foreign"),
    ("39", "Horror"),
    ("40", "Sci-Fi/Fantasy"),
    ("41", "Thriller"),
    ("42", "Shorts"),
    ("43", "Shows"),
    ("44", "Trailers"),
];

/// 查询分类时使用的地区
pub const DEFAULT_REGION_CODE: &str = "US";

/// 视频分类
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoCategory {
    pub id: String,
    pub title: String,
}

/// 内置分类表，实时查询失败时使用
pub fn builtin_categories() -> Vec<VideoCategory> {
    VIDEO_CATEGORIES
        .iter()
        .map(|&(id, title)| VideoCategory {
            id: id.to_string(),
            title: title.to_string(),
        })
        .collect()
}

/// 隐私状态
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PrivacyStatus {
    Public,
    Unlisted,
    #[default]
    Private,
}

impl PrivacyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrivacyStatus::Public => "public",
            PrivacyStatus::Unlisted => "unlisted",
            PrivacyStatus::Private => "private",
        }
    }
}

fn default_category() -> String {
    DEFAULT_CATEGORY_ID.to_string()
}

fn default_language() -> String {
    "English".to_string()
}

/// 视频元数据
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VideoMetadata {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_category")]
    pub category_id: String,
    #[serde(default)]
    pub privacy: PrivacyStatus,
    #[serde(default)]
    pub made_for_kids: bool,
    /// 语言显示名，如 "English"、"Thai"
    #[serde(default = "default_language")]
    pub video_language: String,
    #[serde(default)]
    pub recording_date: Option<NaiveDate>,
    /// 定时发布（仅 private 可用）
    #[serde(default)]
    pub publish_at: Option<DateTime<Utc>>,
    /// 以下两项上传接口无法设置，只记录日志
    #[serde(default)]
    pub altered_content: bool,
    #[serde(default)]
    pub paid_promotion: bool,
}

impl VideoMetadata {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            tags: Vec::new(),
            category_id: default_category(),
            privacy: PrivacyStatus::default(),
            made_for_kids: false,
            video_language: default_language(),
            recording_date: None,
            publish_at: None,
            altered_content: false,
            paid_promotion: false,
        }
    }

    /// 校验元数据
    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), UploadError> {
        let title = self.title.trim();
        if title.is_empty() {
            return Err(UploadError::input("标题不能为空"));
        }
        if title.chars().count() > MAX_TITLE_CHARS {
            return Err(UploadError::input(format!(
                "标题超过 {} 个字符",
                MAX_TITLE_CHARS
            )));
        }
        if title.contains('<') || title.contains('>') {
            return Err(UploadError::input("标题不能包含 '<' 或 '>'"));
        }

        if self.description.len() > MAX_DESCRIPTION_BYTES {
            return Err(UploadError::input(format!(
                "描述超过 {} 字节",
                MAX_DESCRIPTION_BYTES
            )));
        }

        let tags_chars: usize = self.tags.iter().map(|t| t.chars().count()).sum();
        if tags_chars > MAX_TAGS_CHARS {
            return Err(UploadError::input(format!(
                "标签合计 {} 个字符，超过上限 {}",
                tags_chars, MAX_TAGS_CHARS
            )));
        }

        if self.category_id.is_empty() || !self.category_id.chars().all(|c| c.is_ascii_digit()) {
            return Err(UploadError::input(format!(
                "分类 ID 必须是数字: {:?}",
                self.category_id
            )));
        }

        if let Some(publish_at) = self.publish_at {
            if self.privacy != PrivacyStatus::Private {
                return Err(UploadError::input("定时发布要求隐私状态为 private"));
            }
            if publish_at <= now {
                return Err(UploadError::input(format!(
                    "定时发布时间必须晚于当前时间: {}",
                    publish_at
                )));
            }
        }

        Ok(())
    }

    /// 生成创建会话的请求体，返回 (body, part)
    ///
    /// part 与请求体顶层字段一一对应
    pub fn to_request_body(&self) -> (Value, String) {
        if self.altered_content || self.paid_promotion {
            info!(
                "内容声明 (altered_content={}, paid_promotion={}) 需在发布后手动设置",
                self.altered_content, self.paid_promotion
            );
        }

        let tags: Vec<&str> = self
            .tags
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .collect();

        let mut status = Map::new();
        status.insert("privacyStatus".into(), json!(self.privacy.as_str()));
        status.insert("selfDeclaredMadeForKids".into(), json!(self.made_for_kids));
        if let Some(publish_at) = self.publish_at {
            status.insert("publishAt".into(), json!(publish_at.to_rfc3339()));
        }

        let mut body = Map::new();
        body.insert(
            "snippet".into(),
            json!({
                "title": self.title.trim(),
                "description": self.description,
                "tags": tags,
                "categoryId": self.category_id,
                "defaultAudioLanguage": language_code(&self.video_language),
            }),
        );
        body.insert("status".into(), Value::Object(status));
        if let Some(date) = self.recording_date {
            body.insert(
                "recordingDetails".into(),
                json!({ "recordingDate": format!("{}T00:00:00Z", date) }),
            );
        }

        let parts = body.keys().cloned().collect::<Vec<_>>().join(",");
        (Value::Object(body), parts)
    }
}

/// 语言显示名 → ISO 639-1，未知语言回落到 en
pub fn language_code(language: &str) -> &'static str {
    match language.trim().to_ascii_lowercase().as_str() {
        "english" => "en",
        "thai" => "th",
        "spanish" => "es",
        "french" => "fr",
        "german" => "de",
        "japanese" => "ja",
        "korean" => "ko",
        "chinese" => "zh",
        _ => "en",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_defaults_from_json() {
        let meta: VideoMetadata = serde_json::from_str(r#"{"title":"Hello"}"#).unwrap();
        assert_eq!(meta.category_id, "22");
        assert_eq!(meta.privacy, PrivacyStatus::Private);
        assert_eq!(meta.video_language, "English");
        assert!(meta.validate(now()).is_ok());
    }

    #[test]
    fn test_title_rules() {
        assert!(VideoMetadata::new("  ").validate(now()).is_err());
        assert!(VideoMetadata::new("a<b").validate(now()).is_err());
        assert!(VideoMetadata::new("x".repeat(101)).validate(now()).is_err());
        // 按字符计数而不是字节
        assert!(VideoMetadata::new("视".repeat(100)).validate(now()).is_ok());
    }

    #[test]
    fn test_description_and_tags_limits() {
        let mut meta = VideoMetadata::new("ok");
        meta.description = "d".repeat(5001);
        assert!(meta.validate(now()).is_err());

        let mut meta = VideoMetadata::new("ok");
        meta.tags = vec!["t".repeat(300), "t".repeat(201)];
        assert!(meta.validate(now()).is_err());
    }

    #[test]
    fn test_category_must_be_numeric() {
        let mut meta = VideoMetadata::new("ok");
        meta.category_id = "music".to_string();
        let err = meta.validate(now()).unwrap_err();
        assert_eq!(err.kind(), crate::uploader::UploadErrorKind::InputValidation);
    }

    #[test]
    fn test_publish_at_requires_private_and_future() {
        let mut meta = VideoMetadata::new("ok");
        meta.publish_at = Some(now() + chrono::Duration::hours(1));
        assert!(meta.validate(now()).is_ok());

        meta.privacy = PrivacyStatus::Public;
        assert!(meta.validate(now()).is_err());

        meta.privacy = PrivacyStatus::Private;
        meta.publish_at = Some(now() - chrono::Duration::hours(1));
        assert!(meta.validate(now()).is_err());
    }

    #[test]
    fn test_request_body_and_parts() {
        let mut meta = VideoMetadata::new(" My video ");
        meta.tags = vec!["rust".into(), " ".into()];
        meta.video_language = "Thai".into();

        let (body, parts) = meta.to_request_body();
        assert_eq!(parts, "snippet,status");
        assert_eq!(body["snippet"]["title"], "My video");
        assert_eq!(body["snippet"]["tags"], json!(["rust"]));
        assert_eq!(body["snippet"]["defaultAudioLanguage"], "th");
        assert_eq!(body["status"]["privacyStatus"], "private");
        assert!(body["status"].get("publishAt").is_none());

        meta.recording_date = NaiveDate::from_ymd_opt(2025, 6, 1);
        let (body, parts) = meta.to_request_body();
        assert_eq!(parts, "recordingDetails,snippet,status");
        assert_eq!(
            body["recordingDetails"]["recordingDate"],
            "2025-06-01T00:00:00Z"
        );
    }

    #[test]
    fn test_language_code_fallback() {
        assert_eq!(language_code("Japanese"), "ja");
        assert_eq!(language_code("chinese"), "zh");
        assert_eq!(language_code("Klingon"), "en");
    }
}
