// 上传引擎模块
//
// 可续传上传：
// - 按字节范围顺序分片（chunk）
// - 令牌桶限速（throttle）
// - 指数退避重试（retry）
// - 会话状态机（session），会话过期自动重建
// - 协调器（coordinator）负责校验、凭证和缩略图
// - 后台任务管理（manager/task）

pub mod chunk;
pub mod coordinator;
pub mod error;
pub mod http;
pub mod manager;
pub mod metadata;
pub mod retry;
pub mod session;
pub mod target;
pub mod task;
pub mod throttle;
pub mod transport;

pub use chunk::{ByteRange, ByteRangeChunker, CHUNK_GRANULARITY, DEFAULT_UPLOAD_CHUNK_SIZE};
pub use coordinator::{watch_url, UploadCoordinator, UploadOutcome};
pub use error::{FailureContext, UploadError, UploadErrorKind};
pub use http::YouTubeTransport;
pub use manager::{UploadManager, UploadTaskInfo};
pub use metadata::{
    builtin_categories, language_code, PrivacyStatus, VideoCategory, VideoMetadata,
    DEFAULT_REGION_CODE, VIDEO_CATEGORIES,
};
pub use retry::{ErrorClass, RetryDecision, RetryPolicy};
pub use session::{
    Progress, ProgressCallback, SessionCompletion, SessionContext, SessionStatus, UploadSession,
    UploadSessionState,
};
pub use target::{ThumbnailAsset, UploadTarget};
pub use task::{UploadTask, UploadTaskStatus};
pub use throttle::TokenBucketThrottle;
pub use transport::{
    ChannelInfo, ChunkResponse, InitiateRequest, TransportError, UploadTransport,
};
