// 可续传上传协议的 reqwest 实现
//
// 协议要点：
// 1. POST 创建会话，会话 URL 在 Location 响应头中
// 2. PUT 分片，Content-Range: bytes {start}-{end}/{total}
// 3. 308 + Range: bytes=0-{n} 表示已持久化 n+1 字节
// 4. 200/201 返回资源 JSON（含 id）
//
// 308 不能被当作重定向跟随，客户端必须禁用自动重定向。
//
// 频道信息和视频分类走数据接口（api_base_url），普通 GET + JSON。

use crate::config::UploadConfig;
use crate::uploader::{
    ByteRange, ChannelInfo, ChunkResponse, InitiateRequest, TransportError, UploadTransport,
    VideoCategory,
};
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, LOCATION, RANGE};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Google API 错误响应
#[derive(Debug, Deserialize)]
struct GoogleErrorBody {
    error: GoogleError,
}

#[derive(Debug, Deserialize)]
struct GoogleError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<GoogleErrorItem>,
}

#[derive(Debug, Deserialize)]
struct GoogleErrorItem {
    #[serde(default)]
    reason: Option<String>,
}

/// 上传完成后的资源响应（只关心 id）
#[derive(Debug, Deserialize)]
struct ResourceBody {
    id: String,
}

/// 列表接口响应
#[derive(Debug, Deserialize)]
struct ListBody<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct ChannelItem {
    id: String,
    snippet: ChannelSnippet,
    #[serde(default)]
    statistics: ChannelStatistics,
}

#[derive(Debug, Deserialize)]
struct ChannelSnippet {
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    thumbnails: ChannelThumbnails,
}

#[derive(Debug, Default, Deserialize)]
struct ChannelThumbnails {
    #[serde(rename = "default")]
    small: Option<ThumbnailRef>,
}

#[derive(Debug, Deserialize)]
struct ThumbnailRef {
    url: String,
}

/// 统计数字以字符串返回
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelStatistics {
    subscriber_count: Option<String>,
    video_count: Option<String>,
    view_count: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CategoryItem {
    id: String,
    snippet: CategorySnippet,
}

#[derive(Debug, Deserialize)]
struct CategorySnippet {
    title: String,
}

fn parse_count(value: Option<&str>) -> u64 {
    value.and_then(|v| v.parse().ok()).unwrap_or(0)
}

fn channel_from_list(body: ListBody<ChannelItem>) -> Option<ChannelInfo> {
    let item = body.items.into_iter().next()?;
    Some(ChannelInfo {
        channel_id: item.id,
        title: item.snippet.title,
        description: item.snippet.description,
        thumbnail_url: item.snippet.thumbnails.small.map(|t| t.url),
        subscriber_count: parse_count(item.statistics.subscriber_count.as_deref()),
        video_count: parse_count(item.statistics.video_count.as_deref()),
        view_count: parse_count(item.statistics.view_count.as_deref()),
    })
}

fn categories_from_list(body: ListBody<CategoryItem>) -> Vec<VideoCategory> {
    body.items
        .into_iter()
        .map(|item| VideoCategory {
            id: item.id,
            title: item.snippet.title,
        })
        .collect()
}

/// YouTube 上传传输层
#[derive(Debug, Clone)]
pub struct YouTubeTransport {
    client: Client,
    upload_base_url: String,
    api_base_url: String,
    request_timeout: Duration,
}

impl YouTubeTransport {
    pub fn new(config: &UploadConfig) -> Result<Self, TransportError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| TransportError::Network(format!("创建 HTTP 客户端失败: {}", e)))?;

        info!(
            "初始化上传传输层: base={}, connect_timeout={}s, request_timeout={}s",
            config.upload_base_url, config.connect_timeout_secs, config.request_timeout_secs
        );
        Ok(Self {
            client,
            upload_base_url: config.upload_base_url.trim_end_matches('/').to_string(),
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
        })
    }

    fn bearer(access_token: &str) -> String {
        format!("Bearer {}", access_token)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        access_token: &str,
        url: &str,
    ) -> Result<T, TransportError> {
        debug!("GET {}", url);
        let response = self
            .client
            .get(url)
            .timeout(self.request_timeout)
            .header(AUTHORIZATION, Self::bearer(access_token))
            .send()
            .await
            .map_err(map_send_error)?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }
        response
            .json()
            .await
            .map_err(|e| TransportError::Protocol(format!("解析响应失败: {}", e)))
    }
}

fn map_send_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(err.to_string())
    } else {
        TransportError::Network(err.to_string())
    }
}

/// 从错误响应体中提取 (reason, message)
fn parse_error_body(body: &str) -> (Option<String>, String) {
    match serde_json::from_str::<GoogleErrorBody>(body) {
        Ok(parsed) => {
            let reason = parsed.error.errors.into_iter().find_map(|e| e.reason);
            (reason, parsed.error.message)
        }
        Err(_) => (None, body.chars().take(500).collect()),
    }
}

async fn status_error(response: Response) -> TransportError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let (reason, message) = parse_error_body(&body);
    warn!("服务器返回错误: status={}, reason={:?}, {}", status, reason, message);
    TransportError::Status {
        status,
        reason,
        message,
    }
}

/// 解析 308 响应的 Range 头，返回已确认字节数
///
/// `bytes=0-{n}` → n+1；没有 Range 头表示尚未持久化任何字节
pub fn parse_range_header(value: Option<&str>) -> Result<u64, TransportError> {
    let value = match value {
        Some(v) => v.trim(),
        None => return Ok(0),
    };

    let spec = value
        .strip_prefix("bytes=")
        .ok_or_else(|| TransportError::Protocol(format!("无法识别的 Range 头: {}", value)))?;
    let (start, end) = spec
        .split_once('-')
        .ok_or_else(|| TransportError::Protocol(format!("无法识别的 Range 头: {}", value)))?;

    if start.trim() != "0" {
        return Err(TransportError::Protocol(format!(
            "Range 头必须从 0 开始: {}",
            value
        )));
    }
    let end: u64 = end
        .trim()
        .parse()
        .map_err(|_| TransportError::Protocol(format!("Range 头结束位置无效: {}", value)))?;
    Ok(end + 1)
}

#[async_trait]
impl UploadTransport for YouTubeTransport {
    async fn initiate(
        &self,
        access_token: &str,
        request: &InitiateRequest,
    ) -> Result<String, TransportError> {
        let url = format!(
            "{}/youtube/v3/videos?uploadType=resumable&part={}",
            self.upload_base_url,
            urlencoding::encode(&request.parts)
        );
        debug!("创建上传会话: {}", url);

        let response = self
            .client
            .post(&url)
            .timeout(self.request_timeout)
            .header(AUTHORIZATION, Self::bearer(access_token))
            .header("X-Upload-Content-Length", request.total_bytes)
            .header("X-Upload-Content-Type", &request.media_type)
            .json(&request.body)
            .send()
            .await
            .map_err(map_send_error)?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string())
            .ok_or_else(|| TransportError::Protocol("创建会话响应缺少 Location 头".to_string()))?;

        info!("上传会话已创建");
        Ok(location)
    }

    async fn put_chunk(
        &self,
        access_token: &str,
        session_url: &str,
        range: ByteRange,
        total: u64,
        body: Vec<u8>,
    ) -> Result<ChunkResponse, TransportError> {
        let content_range = range.content_range(total);
        debug!("发送分片: {}", content_range);

        let response = self
            .client
            .put(session_url)
            .timeout(self.request_timeout)
            .header(AUTHORIZATION, Self::bearer(access_token))
            .header(CONTENT_RANGE, &content_range)
            .header(CONTENT_LENGTH, body.len())
            .body(body)
            .send()
            .await
            .map_err(map_send_error)?;

        let status = response.status();
        if status == StatusCode::PERMANENT_REDIRECT {
            let confirmed = parse_range_header(
                response.headers().get(RANGE).and_then(|v| v.to_str().ok()),
            )?;
            debug!("服务器已确认 {} / {} 字节", confirmed, total);
            return Ok(ChunkResponse::Incomplete { confirmed });
        }

        if status == StatusCode::OK || status == StatusCode::CREATED {
            let resource: ResourceBody = response
                .json()
                .await
                .map_err(|e| TransportError::Protocol(format!("解析资源响应失败: {}", e)))?;
            return Ok(ChunkResponse::Complete {
                resource_id: resource.id,
            });
        }

        Err(status_error(response).await)
    }

    async fn attach_thumbnail(
        &self,
        access_token: &str,
        resource_id: &str,
        media_type: &str,
        body: Vec<u8>,
    ) -> Result<(), TransportError> {
        let url = format!(
            "{}/youtube/v3/thumbnails/set?videoId={}",
            self.upload_base_url,
            urlencoding::encode(resource_id)
        );

        let response = self
            .client
            .post(&url)
            .timeout(self.request_timeout)
            .header(AUTHORIZATION, Self::bearer(access_token))
            .header(CONTENT_TYPE, media_type)
            .header(CONTENT_LENGTH, body.len())
            .body(body)
            .send()
            .await
            .map_err(map_send_error)?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }
        info!("缩略图已设置: video_id={}", resource_id);
        Ok(())
    }

    async fn channel_info(&self, access_token: &str) -> Result<Option<ChannelInfo>, TransportError> {
        let url = format!(
            "{}/youtube/v3/channels?part=snippet,statistics&mine=true",
            self.api_base_url
        );
        let body: ListBody<ChannelItem> = self.get_json(access_token, &url).await?;
        Ok(channel_from_list(body))
    }

    async fn video_categories(
        &self,
        access_token: &str,
        region_code: &str,
    ) -> Result<Vec<VideoCategory>, TransportError> {
        let url = format!(
            "{}/youtube/v3/videoCategories?part=snippet&regionCode={}",
            self.api_base_url,
            urlencoding::encode(region_code)
        );
        let body: ListBody<CategoryItem> = self.get_json(access_token, &url).await?;
        Ok(categories_from_list(body))
    }
}
