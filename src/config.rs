//! 引擎配置模块
//!
//! ## 职责
//! - 定义 `EngineConfig`（保留天数、数据库上限、视图缓存容量、自写抑制窗口、捕获开关）
//! - 从 JSON 文件加载 / 保存配置
//! - 解析数据库文件路径（自定义目录或用户数据目录）
//!
//! ## 错误语义
//! - 配置文件缺失或损坏时回退默认值，只记录警告，不阻止引擎启动
//! - 文件系统读写与目录创建失败映射为 `AppError::Io`，序列化失败映射为 `AppError::Config`

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::db::ContentType;
use crate::error::AppError;

pub const DEFAULT_RETENTION_DAYS: u32 = 30;
pub const DEFAULT_MAX_ITEMS_IN_DATABASE: usize = 10_000;
pub const DEFAULT_MAX_CACHE_SIZE: usize = 1_000;
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 3_600;

const SUPPRESSION_WINDOW_DEFAULT_MS: u64 = 1_000;
const SUPPRESSION_WINDOW_MIN_MS: u64 = 50;
const SUPPRESSION_WINDOW_MAX_MS: u64 = 10_000;
const SWEEP_INTERVAL_MIN_SECS: u64 = 60;

const DB_FILE_NAME: &str = "clipboard.db";
const APP_DIR_NAME: &str = "clipboard-history";

/// 各内容类型的捕获开关
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CaptureSettings {
    pub text: bool,
    pub code: bool,
    pub links: bool,
    pub colors: bool,
    pub images: bool,
    pub files: bool,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            text: true,
            code: true,
            links: true,
            colors: true,
            images: true,
            files: true,
        }
    }
}

impl CaptureSettings {
    /// 判断该类型的内容是否需要写入历史
    pub fn allows(&self, content_type: ContentType) -> bool {
        match content_type {
            ContentType::Text | ContentType::Other => self.text,
            ContentType::Code => self.code,
            ContentType::Link => self.links,
            ContentType::Color => self.colors,
            ContentType::Image => self.images,
            ContentType::Files => self.files,
        }
    }
}

/// 引擎配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// 数据库目录；为空时使用用户数据目录
    pub db_dir: Option<String>,
    /// 历史保留天数，0 表示不清理
    pub retention_days: u32,
    /// 数据库记录上限，0 表示不限制
    pub max_items_in_database: usize,
    /// 视图缓存容量
    pub max_cache_size: usize,
    /// 自写抑制标志的过期时间（毫秒）
    pub suppression_window_ms: u64,
    /// 保留清理的执行间隔（秒）
    pub sweep_interval_secs: u64,
    pub capture: CaptureSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_dir: None,
            retention_days: DEFAULT_RETENTION_DAYS,
            max_items_in_database: DEFAULT_MAX_ITEMS_IN_DATABASE,
            max_cache_size: DEFAULT_MAX_CACHE_SIZE,
            suppression_window_ms: SUPPRESSION_WINDOW_DEFAULT_MS,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            capture: CaptureSettings::default(),
        }
    }
}

impl EngineConfig {
    /// 从文件加载配置；文件不存在或解析失败时回退默认值
    pub fn load_from_path(path: &Path) -> Self {
        if !path.exists() {
            log::info!("配置文件不存在，使用默认配置: {}", path.display());
            return Self::default();
        }

        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                log::warn!("读取配置文件失败，使用默认配置: {}", e);
                return Self::default();
            }
        };

        match serde_json::from_str::<Self>(&content) {
            Ok(config) => config.normalized(),
            Err(e) => {
                log::warn!("解析配置文件失败，使用默认配置: {}", e);
                Self::default()
            }
        }
    }

    /// 将配置以格式化 JSON 写入文件
    pub fn save_to_path(&self, path: &Path) -> Result<(), AppError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| AppError::Config(format!("序列化配置失败: {}", e)))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// 将数值字段夹到合法区间
    pub fn normalized(mut self) -> Self {
        self.max_cache_size = self.max_cache_size.max(1);
        self.suppression_window_ms = self
            .suppression_window_ms
            .clamp(SUPPRESSION_WINDOW_MIN_MS, SUPPRESSION_WINDOW_MAX_MS);
        self.sweep_interval_secs = self.sweep_interval_secs.max(SWEEP_INTERVAL_MIN_SECS);
        self
    }

    /// 保留期；`retention_days == 0` 时返回 `None`
    pub fn retention(&self) -> Option<chrono::Duration> {
        if self.retention_days == 0 {
            None
        } else {
            Some(chrono::Duration::days(i64::from(self.retention_days)))
        }
    }

    /// 解析数据库文件路径，并确保目录存在
    pub fn resolve_db_path(&self) -> Result<PathBuf, AppError> {
        let dir = match self.db_dir.as_deref() {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => default_data_dir()?,
        };
        if let Err(e) = fs::create_dir_all(&dir) {
            log::error!("创建数据库目录 '{}' 失败: {}", dir.display(), e);
            return Err(e.into());
        }
        Ok(dir.join(DB_FILE_NAME))
    }
}

/// 用户数据目录下的应用子目录
pub fn default_data_dir() -> Result<PathBuf, AppError> {
    dirs::data_dir()
        .map(|dir| dir.join(APP_DIR_NAME))
        .ok_or_else(|| AppError::Config("无法获取用户数据目录".to_string()))
}

/// 默认配置文件路径
pub fn default_config_path() -> Result<PathBuf, AppError> {
    Ok(default_data_dir()?.join("config.json"))
}
