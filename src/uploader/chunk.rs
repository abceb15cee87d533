// 上传分片管理
//
// 可续传上传协议的分片规则：
// - 分片按偏移顺序发送，不允许并发，也不允许跳跃
// - 除最后一个分片外，分片大小必须是 256KB 的整数倍
// - 服务器返回已确认偏移后，下一个分片必须从该偏移开始（seek）

use anyhow::{Context, Result};
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use tracing::debug;

/// 协议要求的分片粒度: 256KB
pub const CHUNK_GRANULARITY: u64 = 256 * 1024;

/// 默认上传分片大小: 20MB
pub const DEFAULT_UPLOAD_CHUNK_SIZE: u64 = 20 * 1024 * 1024;

/// 单个字节范围（半开区间 `[offset, offset + len)`）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    /// 起始偏移
    pub offset: u64,
    /// 长度
    pub len: u64,
}

impl ByteRange {
    pub fn new(offset: u64, len: u64) -> Self {
        Self { offset, len }
    }

    /// 结束偏移（不包含）
    pub fn end(&self) -> u64 {
        self.offset + self.len
    }

    /// 结束偏移（包含），空范围返回 None
    pub fn end_inclusive(&self) -> Option<u64> {
        if self.len == 0 {
            None
        } else {
            Some(self.end() - 1)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// 是否为文件的最后一段
    pub fn is_final(&self, total: u64) -> bool {
        self.end() >= total
    }

    /// 生成 `Content-Range` 请求头
    ///
    /// - 普通分片: `bytes {start}-{end}/{total}`（end 包含）
    /// - 空范围（状态查询）: `bytes */{total}`
    pub fn content_range(&self, total: u64) -> String {
        match self.end_inclusive() {
            Some(end) => format!("bytes {}-{}/{}", self.offset, end, total),
            None => format!("bytes */{}", total),
        }
    }
}

/// 字节范围分片器
///
/// 产生有序、不重叠、恰好覆盖 `[0, total)` 的范围序列。
/// `total == 0` 时只产生一个空范围。
#[derive(Debug, Clone)]
pub struct ByteRangeChunker {
    total: u64,
    chunk_size: u64,
    /// 下一个范围的起始偏移
    cursor: u64,
    /// 空文件的唯一空范围是否已产出
    empty_emitted: bool,
}

impl ByteRangeChunker {
    /// 创建分片器
    ///
    /// # 参数
    /// * `total` - 文件总大小
    /// * `chunk_size` - 分片大小（为 0 时按 1 处理）
    pub fn new(total: u64, chunk_size: u64) -> Self {
        Self {
            total,
            chunk_size: chunk_size.max(1),
            cursor: 0,
            empty_emitted: false,
        }
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// 下一个范围的起始偏移
    pub fn position(&self) -> u64 {
        self.cursor
    }

    /// 分片数量（空文件为 1）
    pub fn chunk_count(&self) -> u64 {
        if self.total == 0 {
            1
        } else {
            self.total.div_ceil(self.chunk_size)
        }
    }

    /// 重新定位：下一个产出的范围从 `confirmed` 开始
    ///
    /// 超过总大小时截断到总大小（后续不再产出范围）
    pub fn seek(&mut self, confirmed: u64) {
        let target = confirmed.min(self.total);
        debug!("分片器重新定位: {} -> {}", self.cursor, target);
        self.cursor = target;
    }

    /// 回到起点（会话重建时使用）
    pub fn reset(&mut self) {
        self.cursor = 0;
        self.empty_emitted = false;
    }

    /// 是否已产出全部范围
    pub fn is_exhausted(&self) -> bool {
        if self.total == 0 {
            self.empty_emitted
        } else {
            self.cursor >= self.total
        }
    }
}

impl Iterator for ByteRangeChunker {
    type Item = ByteRange;

    fn next(&mut self) -> Option<ByteRange> {
        if self.total == 0 {
            if self.empty_emitted {
                return None;
            }
            self.empty_emitted = true;
            return Some(ByteRange::new(0, 0));
        }

        if self.cursor >= self.total {
            return None;
        }

        let len = self.chunk_size.min(self.total - self.cursor);
        let range = ByteRange::new(self.cursor, len);
        self.cursor += len;
        Some(range)
    }
}

/// 读取一个字节范围的数据
///
/// 每次调用都独立打开只读句柄，读取在阻塞线程池中执行
pub async fn read_range(path: &Path, range: ByteRange) -> Result<Vec<u8>> {
    let path = path.to_path_buf();

    tokio::task::spawn_blocking(move || {
        let mut file =
            std::fs::File::open(&path).with_context(|| format!("无法打开文件: {:?}", path))?;
        file.seek(SeekFrom::Start(range.offset))
            .context("文件定位失败")?;

        let mut buffer = vec![0u8; range.len as usize];
        file.read_exact(&mut buffer)
            .context("读取分片数据失败")?;

        Ok(buffer)
    })
    .await?
}
