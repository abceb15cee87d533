// 上传会话
//
// 状态机: Initiating → Uploading → Completing → Completed
//         任意非终态都可能进入 Failed / Cancelled
//
// - 分片严格按序发送，同一会话内不并发
// - 每个请求前重新获取 access_token，凭证中途刷新对会话透明
// - 308 返回的确认偏移决定下一个分片的起点
// - 404 表示会话失效，从 Initiating 重新开始（次数有上限）
// - 取消只在分片边界生效

use crate::auth::AccessTokenSource;
use crate::uploader::chunk::read_range;
use crate::uploader::{
    ByteRange, ByteRangeChunker, ChunkResponse, ErrorClass, FailureContext, InitiateRequest,
    RetryPolicy, TokenBucketThrottle, TransportError, UploadError, UploadTarget, UploadTransport,
};
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 会话状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Initiating,
    Uploading,
    Completing,
    Completed,
    Failed,
    Cancelled,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Failed | SessionStatus::Cancelled
        )
    }
}

/// 进度
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub bytes_confirmed: u64,
    pub total_bytes: u64,
    /// 自会话开始以来的耗时
    pub elapsed: Duration,
}

impl Progress {
    /// 平均速率 (bytes/s)
    pub fn bytes_per_sec(&self) -> u64 {
        let secs = self.elapsed.as_secs_f64();
        if secs <= 0.0 {
            return 0;
        }
        (self.bytes_confirmed as f64 / secs) as u64
    }
}

/// 进度回调
///
/// 在上传流程内同步调用，不会并发；回调 panic 不会中断上传
pub type ProgressCallback = Arc<dyn Fn(Progress) + Send + Sync>;

/// 会话运行时状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSessionState {
    pub session_url: Option<String>,
    /// 服务器已确认的字节数
    pub bytes_confirmed: u64,
    pub total_bytes: u64,
    /// 当前分片已失败次数
    pub attempts: u32,
    /// 会话重建次数
    pub restarts: u32,
    pub status: SessionStatus,
    pub last_status: Option<u16>,
}

impl UploadSessionState {
    fn new(total_bytes: u64) -> Self {
        Self {
            session_url: None,
            bytes_confirmed: 0,
            total_bytes,
            attempts: 0,
            restarts: 0,
            status: SessionStatus::Initiating,
            last_status: None,
        }
    }
}

/// 会话依赖与参数
///
/// 同一协调器创建的会话共享传输层和凭证来源，限速器每个会话独立
#[derive(Clone)]
pub struct SessionContext {
    pub transport: Arc<dyn UploadTransport>,
    pub tokens: Arc<dyn AccessTokenSource>,
    pub policy: RetryPolicy,
    pub chunk_size: u64,
    /// 带宽上限 (bytes/s)，0 表示不限速
    pub bandwidth_limit: u64,
    pub max_session_restarts: u32,
}

/// 会话成功结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCompletion {
    pub resource_id: String,
    pub total_bytes: u64,
    pub restarts: u32,
    pub elapsed: Duration,
}

/// 单个文件的可续传上传会话
pub struct UploadSession {
    ctx: SessionContext,
    file_path: PathBuf,
    request: InitiateRequest,
    throttle: TokenBucketThrottle,
    chunker: ByteRangeChunker,
    state: UploadSessionState,
    progress: Option<ProgressCallback>,
    cancel: CancellationToken,
    started: Instant,
}

impl UploadSession {
    pub fn new(ctx: SessionContext, target: &UploadTarget) -> Self {
        let (body, parts) = target.metadata.to_request_body();
        let request = InitiateRequest {
            body,
            parts,
            total_bytes: target.total_bytes,
            media_type: target.media_type.clone(),
        };
        let throttle = TokenBucketThrottle::new(ctx.bandwidth_limit, ctx.chunk_size);
        let chunker = ByteRangeChunker::new(target.total_bytes, ctx.chunk_size);

        Self {
            ctx,
            file_path: target.file_path.clone(),
            request,
            throttle,
            chunker,
            state: UploadSessionState::new(target.total_bytes),
            progress: None,
            cancel: CancellationToken::new(),
            started: Instant::now(),
        }
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn state(&self) -> &UploadSessionState {
        &self.state
    }

    /// 驱动会话直到终态
    pub async fn run(&mut self) -> Result<SessionCompletion, UploadError> {
        self.started = Instant::now();
        info!(
            "开始上传: {:?}, {} bytes, 分片 {} bytes",
            self.file_path, self.state.total_bytes, self.ctx.chunk_size
        );

        loop {
            match self.run_once().await {
                Ok(resource_id) => {
                    self.state.status = SessionStatus::Completed;
                    let elapsed = self.started.elapsed();
                    info!(
                        "上传完成: resource_id={}, 耗时 {:.1}s, 会话重建 {} 次",
                        resource_id,
                        elapsed.as_secs_f64(),
                        self.state.restarts
                    );
                    return Ok(SessionCompletion {
                        resource_id,
                        total_bytes: self.state.total_bytes,
                        restarts: self.state.restarts,
                        elapsed,
                    });
                }
                Err(UploadError::SessionExpired {
                    message, context, ..
                }) => {
                    if self.state.restarts >= self.ctx.max_session_restarts {
                        self.state.status = SessionStatus::Failed;
                        error!(
                            "上传会话连续过期，已达重建上限 {}: {}",
                            self.ctx.max_session_restarts, message
                        );
                        return Err(UploadError::failed(
                            format!(
                                "上传会话过期且已重建 {} 次: {}",
                                self.state.restarts, message
                            ),
                            context,
                        ));
                    }
                    self.state.restarts += 1;
                    warn!(
                        "上传会话已过期 (offset={})，重新创建会话 ({}/{})",
                        context.offset, self.state.restarts, self.ctx.max_session_restarts
                    );
                }
                Err(err) => {
                    self.state.status = match err {
                        UploadError::Cancelled { .. } => SessionStatus::Cancelled,
                        _ => SessionStatus::Failed,
                    };
                    error!("上传终止: {} (kind={})", err, err.kind());
                    return Err(err);
                }
            }
        }
    }

    /// 一次完整的会话尝试：创建会话并发送全部分片
    async fn run_once(&mut self) -> Result<String, UploadError> {
        self.state.status = SessionStatus::Initiating;
        self.state.session_url = None;
        self.state.bytes_confirmed = 0;
        self.state.attempts = 0;
        self.chunker.reset();

        self.check_cancel()?;
        let token = self.ctx.tokens.access_token().await?;
        let session_url = self
            .ctx
            .transport
            .initiate(&token, &self.request)
            .await
            .map_err(|e| self.initiation_error(e))?;
        self.state.session_url = Some(session_url.clone());
        self.state.status = SessionStatus::Uploading;

        let total = self.state.total_bytes;
        let mut range = self.next_range();

        loop {
            self.check_cancel()?;
            if range.is_final(total) {
                self.state.status = SessionStatus::Completing;
            }

            self.throttle.acquire(range.len).await;
            let body = if range.is_empty() {
                Vec::new()
            } else {
                read_range(&self.file_path, range).await.map_err(|e| {
                    UploadError::failed(format!("读取文件失败: {:#}", e), self.failure_context())
                })?
            };

            let token = self.ctx.tokens.access_token().await?;
            debug!(
                "发送 {} (第 {} 次尝试)",
                range.content_range(total),
                self.state.attempts + 1
            );
            let result = self
                .ctx
                .transport
                .put_chunk(&token, &session_url, range, total, body)
                .await;

            match result {
                Ok(ChunkResponse::Complete { resource_id }) => {
                    self.state.last_status = Some(200);
                    self.state.bytes_confirmed = total;
                    self.state.attempts = 0;
                    self.report_progress();
                    return Ok(resource_id);
                }
                Ok(ChunkResponse::Incomplete { confirmed }) => {
                    self.state.last_status = Some(308);
                    if confirmed < self.state.bytes_confirmed || confirmed > total {
                        return Err(UploadError::failed(
                            format!(
                                "服务器确认偏移异常: {} (此前已确认 {}, 总大小 {})",
                                confirmed, self.state.bytes_confirmed, total
                            ),
                            self.failure_context(),
                        ));
                    }

                    let advanced = confirmed > self.state.bytes_confirmed;
                    self.state.bytes_confirmed = confirmed;
                    self.report_progress();

                    if advanced {
                        self.state.attempts = 0;
                    } else {
                        // 没有任何进展，按临时错误计数，避免原地打转
                        self.handle_failure(
                            ErrorClass::Transient,
                            format!("服务器未确认新的字节 (offset={})", confirmed),
                        )
                        .await?;
                    }

                    if confirmed < range.end() && !range.is_empty() {
                        debug!("部分接收: 发送到 {}，确认到 {}", range.end(), confirmed);
                    }
                    self.chunker.seek(confirmed);
                    range = self.next_range();
                }
                Err(err) => {
                    self.state.last_status = err.status();
                    match err.status() {
                        Some(404) => {
                            return Err(UploadError::SessionExpired {
                                message: err.to_string(),
                                restarts: self.state.restarts,
                                context: self.failure_context(),
                            })
                        }
                        Some(401) => {
                            return Err(UploadError::AuthRequired(format!(
                                "访问令牌被拒绝: {}",
                                err
                            )))
                        }
                        _ => {}
                    }

                    // 没有确认任何新字节，原样重发同一范围
                    let class = RetryPolicy::classify(&err);
                    self.handle_failure(class, err.to_string()).await?;
                }
            }
        }
    }

    /// 下一个要发送的范围；全部字节已确认但未拿到资源时发送状态查询
    fn next_range(&mut self) -> ByteRange {
        let total = self.state.total_bytes;
        self.chunker
            .next()
            .unwrap_or_else(|| ByteRange::new(total, 0))
    }

    /// 记录一次失败并按策略等待；不再重试时返回终止错误
    async fn handle_failure(&mut self, class: ErrorClass, message: String) -> Result<(), UploadError> {
        self.state.attempts += 1;
        let decision = self.ctx.policy.decide(class, self.state.attempts);

        if !decision.retry {
            let context = self.failure_context();
            return Err(match class {
                ErrorClass::RateLimited => UploadError::RateLimited {
                    message: format!("{} ({})", message, decision.reason),
                    context,
                },
                _ => UploadError::failed(format!("{} ({})", message, decision.reason), context),
            });
        }

        warn!(
            "{}: {}，{:?} 后重试 (已失败 {}/{} 次)",
            decision.reason,
            message,
            decision.delay,
            self.state.attempts,
            self.ctx.policy.max_attempts
        );

        tokio::select! {
            _ = tokio::time::sleep(decision.delay) => Ok(()),
            _ = self.cancel.cancelled() => Err(UploadError::Cancelled {
                offset: self.state.bytes_confirmed,
            }),
        }
    }

    /// 创建会话失败：此时没有可续传的状态，直接终止
    fn initiation_error(&self, err: TransportError) -> UploadError {
        let context = FailureContext {
            attempts: 1,
            last_status: err.status(),
            offset: 0,
        };
        if err.status() == Some(401) {
            return UploadError::AuthRequired(format!("访问令牌被拒绝: {}", err));
        }
        let message = format!("创建上传会话失败: {}", err);
        match RetryPolicy::classify(&err) {
            ErrorClass::RateLimited => UploadError::RateLimited { message, context },
            // 临时错误在这里同样终止，不以可重试的类型返回
            ErrorClass::Transient | ErrorClass::Fatal => UploadError::failed(message, context),
        }
    }

    fn check_cancel(&self) -> Result<(), UploadError> {
        if self.cancel.is_cancelled() {
            info!("上传已取消: offset={}", self.state.bytes_confirmed);
            return Err(UploadError::Cancelled {
                offset: self.state.bytes_confirmed,
            });
        }
        Ok(())
    }

    fn failure_context(&self) -> FailureContext {
        FailureContext {
            attempts: self.state.attempts,
            last_status: self.state.last_status,
            offset: self.state.bytes_confirmed,
        }
    }

    fn report_progress(&self) {
        let Some(callback) = &self.progress else {
            return;
        };
        let progress = Progress {
            bytes_confirmed: self.state.bytes_confirmed,
            total_bytes: self.state.total_bytes,
            elapsed: self.started.elapsed(),
        };
        if std::panic::catch_unwind(AssertUnwindSafe(|| callback(progress))).is_err() {
            warn!("进度回调发生 panic，已忽略");
        }
    }
}
