//! 内容分类模块
//!
//! # 设计思路
//!
//! 将一次剪贴板读取得到的原始负载（文本 / 图片 / 文件列表）归类为
//! `ContentType`，并生成预览文本、格式标签和字节大小。分类是纯函数，
//! 不访问剪贴板也不访问数据库，便于单独测试。
//!
//! # 实现思路
//!
//! 判定顺序固定，先命中者胜出：
//!
//! 1. 图片（有非空图片数据）
//! 2. 文件列表（有非空路径列表）
//! 3. 文本去除首尾空白后依次尝试：颜色 → 代码 → 链接 → 普通文本
//!
//! 空文本或纯空白文本不产生分类结果，由调用方丢弃。

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

use super::code_detection::is_likely_code;
use crate::db::{ContentType, RecordData};

/// 预览文本的最大字符数，超出部分以省略号代替
pub const PREVIEW_MAX_CHARS: usize = 100;

const SIZE_UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// 剪贴板图片数据（已编码，通常为 PNG）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    pub width: u32,
    pub height: u32,
    pub bytes: Vec<u8>,
}

/// 一次剪贴板读取的原始负载
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawPayload {
    pub text: Option<String>,
    pub image: Option<ImagePayload>,
    pub files: Option<Vec<PathBuf>>,
}

impl RawPayload {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn image(bytes: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            image: Some(ImagePayload { width, height, bytes }),
            ..Self::default()
        }
    }

    pub fn files(paths: Vec<PathBuf>) -> Self {
        Self {
            files: Some(paths),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        classify(self).is_none()
    }
}

/// 分类结果，即待写入历史的一条记录（尚无 id 与时间）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedContent {
    pub content_type: ContentType,
    pub data: RecordData,
    pub preview: String,
    pub format: String,
    pub size_bytes: i64,
}

impl ClassifiedContent {
    fn new(content_type: ContentType, data: RecordData, preview: String, format: impl Into<String>) -> Self {
        let size_bytes = data.size_bytes();
        Self {
            content_type,
            data,
            preview,
            format: format.into(),
            size_bytes,
        }
    }
}

// ============================================================================
// 颜色识别
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorKind {
    Hex,
    Rgb,
    Rgba,
    Hsl,
    Hsla,
}

impl ColorKind {
    pub fn label(self) -> &'static str {
        match self {
            ColorKind::Hex => "HEX",
            ColorKind::Rgb => "RGB",
            ColorKind::Rgba => "RGBA",
            ColorKind::Hsl => "HSL",
            ColorKind::Hsla => "HSLA",
        }
    }

    fn format(self) -> &'static str {
        match self {
            ColorKind::Hex => "color/hex",
            ColorKind::Rgb => "color/rgb",
            ColorKind::Rgba => "color/rgba",
            ColorKind::Hsl => "color/hsl",
            ColorKind::Hsla => "color/hsla",
        }
    }
}

static COLOR_PATTERNS: Lazy<Vec<(ColorKind, Regex)>> = Lazy::new(|| {
    [
        (ColorKind::Hex, r"(?i)^#?([a-f0-9]{6}|[a-f0-9]{3})$"),
        (
            ColorKind::Rgb,
            r"(?i)^rgb\s*\(\s*(\d{1,3})\s*,\s*(\d{1,3})\s*,\s*(\d{1,3})\s*\)$",
        ),
        (
            ColorKind::Rgba,
            r"(?i)^rgba\s*\(\s*(\d{1,3})\s*,\s*(\d{1,3})\s*,\s*(\d{1,3})\s*,\s*([01]?\.?\d*)\s*\)$",
        ),
        (
            ColorKind::Hsl,
            r"(?i)^hsl\s*\(\s*(\d{1,3})\s*,\s*(\d{1,3})%\s*,\s*(\d{1,3})%\s*\)$",
        ),
        (
            ColorKind::Hsla,
            r"(?i)^hsla\s*\(\s*(\d{1,3})\s*,\s*(\d{1,3})%\s*,\s*(\d{1,3})%\s*,\s*([01]?\.?\d*)\s*\)$",
        ),
    ]
    .into_iter()
    .filter_map(|(kind, pattern)| match Regex::new(pattern) {
        Ok(regex) => Some((kind, regex)),
        Err(e) => {
            log::error!("编译颜色正则失败 ({}): {}", kind.label(), e);
            None
        }
    })
    .collect()
});

/// 识别颜色字面量，输入应已去除首尾空白
pub fn detect_color(text: &str) -> Option<ColorKind> {
    COLOR_PATTERNS
        .iter()
        .find(|(_, regex)| regex.is_match(text))
        .map(|(kind, _)| *kind)
}

/// 仅接受 http / https 的绝对 URL
pub fn is_link(text: &str) -> bool {
    if text.is_empty() || text.chars().any(char::is_whitespace) {
        return false;
    }
    match url::Url::parse(text) {
        Ok(url) => matches!(url.scheme(), "http" | "https") && url.host().is_some(),
        Err(_) => false,
    }
}

// ============================================================================
// 预览与大小
// ============================================================================

/// 超过 100 个字符时截断并追加省略号
pub fn truncate_preview(text: &str) -> String {
    let text = text.trim();
    if text.chars().count() <= PREVIEW_MAX_CHARS {
        return text.to_string();
    }
    let mut preview: String = text.chars().take(PREVIEW_MAX_CHARS).collect();
    preview.push('…');
    preview
}

/// 人类可读的字节大小，如 `0 B`、`512 B`、`12.4 KB`
pub fn format_size(bytes: u64) -> String {
    if bytes == 0 {
        return "0 B".to_string();
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < SIZE_UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    let formatted = format!("{value:.2}");
    let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
    format!("{} {}", trimmed, SIZE_UNITS[unit])
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

// ============================================================================
// 分类入口
// ============================================================================

/// 对原始负载分类；空负载返回 `None`
pub fn classify(payload: &RawPayload) -> Option<ClassifiedContent> {
    if let Some(image) = payload.image.as_ref().filter(|image| !image.bytes.is_empty()) {
        return Some(classify_image(image));
    }

    if let Some(files) = payload.files.as_ref().filter(|files| !files.is_empty()) {
        return Some(classify_files(files));
    }

    payload.text.as_deref().and_then(classify_text)
}

/// 文本分类：颜色 → 代码 → 链接 → 普通文本
pub fn classify_text(text: &str) -> Option<ClassifiedContent> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Some(kind) = detect_color(trimmed) {
        return Some(ClassifiedContent::new(
            ContentType::Color,
            RecordData::Text(trimmed.to_string()),
            format!("{} Color: {}", kind.label(), trimmed),
            kind.format(),
        ));
    }

    if is_likely_code(text) {
        return Some(ClassifiedContent::new(
            ContentType::Code,
            RecordData::Text(text.to_string()),
            truncate_preview(trimmed),
            "text/code",
        ));
    }

    if is_link(trimmed) {
        return Some(ClassifiedContent::new(
            ContentType::Link,
            RecordData::Text(trimmed.to_string()),
            truncate_preview(&format!("Link: {trimmed}")),
            "text/link",
        ));
    }

    Some(ClassifiedContent::new(
        ContentType::Text,
        RecordData::Text(text.to_string()),
        truncate_preview(trimmed),
        "text/plain",
    ))
}

fn classify_image(image: &ImagePayload) -> ClassifiedContent {
    let size = format_size(image.bytes.len() as u64);
    match infer::get(&image.bytes) {
        Some(kind) if kind.matcher_type() == infer::MatcherType::Image => ClassifiedContent::new(
            ContentType::Image,
            RecordData::Binary(image.bytes.clone()),
            format!("Image ({size})"),
            kind.mime_type(),
        ),
        other => {
            let mime = other.map_or("application/octet-stream", |kind| kind.mime_type());
            log::debug!("无法识别的二进制剪贴板数据: {}", mime);
            ClassifiedContent::new(
                ContentType::Other,
                RecordData::Binary(image.bytes.clone()),
                format!("Data ({size})"),
                mime,
            )
        }
    }
}

fn classify_files(files: &[PathBuf]) -> ClassifiedContent {
    let joined = files
        .iter()
        .map(|path| path.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("\n");
    let names = files.iter().map(|path| file_name_of(path)).collect::<Vec<_>>().join(", ");

    ClassifiedContent::new(
        ContentType::Files,
        RecordData::Text(joined),
        truncate_preview(&format!("Files ({}): {}", files.len(), names)),
        "files",
    )
}
