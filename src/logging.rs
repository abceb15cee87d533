//! 日志系统配置
//!
//! 控制台 + 文件双输出。文件按启动时间命名、按大小滚动，启动时清理过期日志。
//!
//! 文件名: `youtube-uploader.{YYYY-MM-DD-HHMMSS}.log`，滚动文件追加 `_N`

use crate::config::LogConfig;
use chrono::{Local, NaiveDate};
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, time::ChronoLocal},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// 日志文件名前缀
pub const LOG_FILE_PREFIX: &str = "youtube-uploader.";

const TIMER_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

fn log_file_name(start_timestamp: &str, index: u32) -> String {
    if index == 0 {
        format!("{}{}.log", LOG_FILE_PREFIX, start_timestamp)
    } else {
        format!("{}{}_{}.log", LOG_FILE_PREFIX, start_timestamp, index)
    }
}

/// 滚动写入状态
struct RollingFile {
    start_timestamp: String,
    log_dir: PathBuf,
    current_file: Option<File>,
    /// 0 为基础文件，之后每次滚动加 1
    current_index: u32,
    max_file_size: u64,
    current_size: u64,
}

impl RollingFile {
    fn open(log_dir: PathBuf, max_file_size: u64) -> io::Result<Self> {
        let mut rolling = Self {
            start_timestamp: Local::now().format("%Y-%m-%d-%H%M%S").to_string(),
            log_dir,
            current_file: None,
            current_index: 0,
            max_file_size: max_file_size.max(1),
            current_size: 0,
        };
        rolling.open_current()?;
        Ok(rolling)
    }

    fn current_path(&self) -> PathBuf {
        self.log_dir
            .join(log_file_name(&self.start_timestamp, self.current_index))
    }

    fn open_current(&mut self) -> io::Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.current_path())?;
        self.current_size = file.metadata().map(|m| m.len()).unwrap_or(0);
        self.current_file = Some(file);
        Ok(())
    }

    fn write_data(&mut self, buf: &[u8]) -> io::Result<usize> {
        // 空文件不滚动，避免单条超长日志导致无限滚动
        if self.current_size > 0 && self.current_size + buf.len() as u64 > self.max_file_size {
            if let Some(mut file) = self.current_file.take() {
                file.flush()?;
            }
            self.current_index += 1;
            self.open_current()?;
        }

        let file = self
            .current_file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "日志文件未打开"))?;
        let written = file.write(buf)?;
        self.current_size += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.current_file {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

/// 日志文件管理器
///
/// 实现了 Write，作为 tracing-appender 的输出目标
#[derive(Clone)]
pub struct LogFileManager {
    inner: Arc<Mutex<RollingFile>>,
}

impl LogFileManager {
    pub fn new(log_dir: PathBuf, max_file_size: u64) -> io::Result<Self> {
        Ok(Self {
            inner: Arc::new(Mutex::new(RollingFile::open(log_dir, max_file_size)?)),
        })
    }

    /// 当前写入的文件
    pub fn current_path(&self) -> PathBuf {
        self.inner.lock().current_path()
    }
}

impl Write for LogFileManager {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.lock().write_data(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.lock().flush()
    }
}

/// 日志系统守卫
/// 必须保持存活，否则日志写入线程会终止
pub struct LogGuard {
    _file_guard: Option<WorkerGuard>,
}

/// 初始化日志系统
///
/// `RUST_LOG` 优先于配置中的级别。日志目录不可用时回退到仅控制台输出。
pub fn init_logging(config: &LogConfig) -> LogGuard {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_level(true)
        .with_timer(ChronoLocal::new(TIMER_FORMAT.to_string()))
        .with_ansi(true);

    let file_manager = if config.enabled {
        fs::create_dir_all(&config.log_dir)
            .and_then(|_| LogFileManager::new(config.log_dir.clone(), config.max_file_size))
            .map_err(|e| {
                eprintln!(
                    "初始化日志文件失败: {:?}, 错误: {}，回退到仅控制台输出",
                    config.log_dir, e
                )
            })
            .ok()
    } else {
        None
    };

    let Some(file_manager) = file_manager else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .init();
        info!("日志系统初始化完成（仅控制台输出）");
        return LogGuard { _file_guard: None };
    };

    let (non_blocking, file_guard) = tracing_appender::non_blocking(file_manager);
    let file_layer = fmt::layer()
        .with_target(true)
        .with_level(true)
        .with_timer(ChronoLocal::new(TIMER_FORMAT.to_string()))
        .with_ansi(false)
        .with_writer(non_blocking);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    info!(
        "日志系统初始化完成: 目录={:?}, 保留天数={}, 级别={}, 单文件最大={:.1}MB",
        config.log_dir,
        config.retention_days,
        config.level,
        config.max_file_size as f64 / 1024.0 / 1024.0
    );

    let deleted = cleanup_old_logs(&config.log_dir, config.retention_days, Local::now().date_naive());
    if deleted > 0 {
        info!("已清理 {} 个过期日志文件", deleted);
    }

    LogGuard {
        _file_guard: Some(file_guard),
    }
}

/// 删除超过保留天数的日志文件，返回删除数量
fn cleanup_old_logs(log_dir: &Path, retention_days: u32, today: NaiveDate) -> usize {
    let entries = match fs::read_dir(log_dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("读取日志目录失败: {:?}, 错误: {}", log_dir, e);
            return 0;
        }
    };

    let retention = chrono::Duration::days(retention_days as i64);
    let mut deleted = 0;

    for entry in entries.flatten() {
        let path = entry.path();
        let Some(filename) = path.file_name().and_then(|s| s.to_str()) else {
            continue;
        };
        if !path.is_file() || !filename.starts_with(LOG_FILE_PREFIX) || !filename.ends_with(".log")
        {
            continue;
        }

        // 文件名中没有日期时不删除
        let Some(file_date) = date_from_filename(filename) else {
            continue;
        };
        if today.signed_duration_since(file_date) <= retention {
            continue;
        }

        match fs::remove_file(&path) {
            Ok(()) => {
                deleted += 1;
                tracing::debug!("已删除过期日志文件: {:?}", path);
            }
            Err(e) => tracing::warn!("删除过期日志文件失败: {:?}, 错误: {}", path, e),
        }
    }
    deleted
}

/// `youtube-uploader.YYYY-MM-DD-HHMMSS[_N].log` → YYYY-MM-DD
fn date_from_filename(filename: &str) -> Option<NaiveDate> {
    let name = filename
        .strip_prefix(LOG_FILE_PREFIX)?
        .strip_suffix(".log")?;
    let date = name.get(..10)?;
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_log_config() {
        let config = LogConfig::default();
        assert!(config.enabled);
        assert_eq!(config.log_dir, PathBuf::from("logs"));
        assert_eq!(config.retention_days, 7);
        assert_eq!(config.level, "info");
    }

    #[test]
    fn test_file_names() {
        assert_eq!(
            log_file_name("2026-01-02-030405", 0),
            "youtube-uploader.2026-01-02-030405.log"
        );
        assert_eq!(
            log_file_name("2026-01-02-030405", 3),
            "youtube-uploader.2026-01-02-030405_3.log"
        );
        assert_eq!(
            date_from_filename("youtube-uploader.2026-01-02-030405_3.log"),
            NaiveDate::from_ymd_opt(2026, 1, 2)
        );
        assert_eq!(date_from_filename("other.2026-01-02.log"), None);
    }

    #[test]
    fn test_rotation_by_size() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = LogFileManager::new(dir.path().to_path_buf(), 16).unwrap();
        let first = manager.current_path();

        manager.write_all(b"0123456789").unwrap();
        manager.write_all(b"0123456789").unwrap();
        manager.flush().unwrap();

        let second = manager.current_path();
        assert_ne!(first, second);
        assert!(second.to_string_lossy().ends_with("_1.log"));
        assert_eq!(fs::read(&first).unwrap().len(), 10);
    }

    #[test]
    fn test_cleanup_old_logs() {
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join("youtube-uploader.2026-01-01-000000.log");
        let recent = dir.path().join("youtube-uploader.2026-01-09-000000_1.log");
        let foreign = dir.path().join("notes.2020-01-01.log");
        for path in [&old, &recent, &foreign] {
            fs::write(path, b"x").unwrap();
        }

        let today = NaiveDate::from_ymd_opt(2026, 1, 10).unwrap();
        assert_eq!(cleanup_old_logs(dir.path(), 7, today), 1);
        assert!(!old.exists());
        assert!(recent.exists());
        assert!(foreign.exists());
    }
}
