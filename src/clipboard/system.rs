//! 系统剪贴板适配
//!
//! # 设计思路
//!
//! 通过 `arboard` 读写系统剪贴板，Windows 下额外读取 CF_HDROP 文件列表。
//! 一次 `read()` 产出完整的 `RawPayload`（文件列表 / PNG 图片 / 文本），
//! 由分类器决定最终类型。
//!
//! # 实现思路
//!
//! - 每次调用新建 `arboard::Clipboard`，不跨线程持有句柄。
//! - `ClipboardOccupied` 映射为 `TransientClipboardAccess`，其余错误映射为 `Clipboard`。
//! - 图片以 RGBA 读出后用 `image` crate 编码为 PNG 存储。
//! - 浏览器复制代码时常附带一张预览图：文本像代码时丢弃图片，只保留文本。

use std::borrow::Cow;
use std::io::Cursor;
use std::path::PathBuf;

use image::ImageFormat;

use super::code_detection::is_likely_code;
use super::{ClipboardAccess, DecodedImage, ImagePayload, RawPayload};
use crate::error::AppError;

fn map_arboard_error(err: arboard::Error) -> AppError {
    match err {
        arboard::Error::ClipboardOccupied => {
            AppError::TransientClipboardAccess("剪贴板被其他程序占用".to_string())
        }
        other => AppError::Clipboard(other.to_string()),
    }
}

/// 少于该字节数且无换行的文本不参与代码判定
const CODE_TEXT_MIN_LEN: usize = 5;

fn should_skip_image_by_text(text: &str) -> bool {
    let too_short = text.len() < CODE_TEXT_MIN_LEN && !text.contains('\n');
    if !too_short && is_likely_code(text) {
        log::debug!("🚫 检测到代码内容，忽略剪贴板中附带的图片");
        return true;
    }
    if text.contains('\n') && text.len() > 500 {
        log::debug!("🚫 多行长文本（{} 字节）带图片，可能是网页复制，忽略图片", text.len());
        return true;
    }
    false
}

fn encode_png(image_data: arboard::ImageData<'_>) -> Result<ImagePayload, AppError> {
    let width = u32::try_from(image_data.width)
        .map_err(|_| AppError::Clipboard("图片宽度超出范围".to_string()))?;
    let height = u32::try_from(image_data.height)
        .map_err(|_| AppError::Clipboard("图片高度超出范围".to_string()))?;
    let image = image::RgbaImage::from_raw(width, height, image_data.bytes.into_owned())
        .ok_or_else(|| AppError::Clipboard("创建图像缓冲区失败".to_string()))?;

    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .map_err(|e| AppError::Clipboard(format!("编码 PNG 失败: {}", e)))?;

    Ok(ImagePayload { width, height, bytes })
}

#[cfg(target_os = "windows")]
fn read_clipboard_files_sync() -> Result<Option<Vec<PathBuf>>, AppError> {
    use std::ffi::OsString;
    use std::os::windows::ffi::OsStringExt;
    use windows::Win32::System::DataExchange::{CloseClipboard, GetClipboardData, OpenClipboard};
    use windows::Win32::System::Ole::CF_HDROP;
    use windows::Win32::UI::Shell::{DragQueryFileW, HDROP};

    unsafe {
        if OpenClipboard(None).is_err() {
            return Err(AppError::TransientClipboardAccess("无法打开剪贴板".to_string()));
        }

        let result = (|| -> Result<Option<Vec<PathBuf>>, AppError> {
            let handle = match GetClipboardData(u32::from(CF_HDROP.0)) {
                Ok(h) => h,
                Err(_) => return Ok(None),
            };

            let hdrop = HDROP(handle.0);
            let count = DragQueryFileW(hdrop, 0xFFFFFFFF, None);
            if count == 0 {
                return Ok(None);
            }

            let mut files = Vec::with_capacity(count as usize);
            for i in 0..count {
                let len = DragQueryFileW(hdrop, i, None);
                if len == 0 {
                    continue;
                }

                let mut buf = vec![0u16; (len + 1) as usize];
                DragQueryFileW(hdrop, i, Some(&mut buf));

                if let Some(pos) = buf.iter().position(|&c| c == 0) {
                    buf.truncate(pos);
                }

                files.push(PathBuf::from(OsString::from_wide(&buf)));
            }

            if files.is_empty() {
                Ok(None)
            } else {
                log::debug!("📁 从剪贴板读取到 {} 个文件", files.len());
                Ok(Some(files))
            }
        })();

        let _ = CloseClipboard();
        result
    }
}

#[cfg(not(target_os = "windows"))]
fn read_clipboard_files_sync() -> Result<Option<Vec<PathBuf>>, AppError> {
    Ok(None)
}

/// 基于 `arboard` 的系统剪贴板
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClipboard;

impl SystemClipboard {
    pub fn new() -> Self {
        Self
    }

    fn open() -> Result<arboard::Clipboard, AppError> {
        arboard::Clipboard::new().map_err(map_arboard_error)
    }
}

impl ClipboardAccess for SystemClipboard {
    fn read(&self) -> Result<RawPayload, AppError> {
        if let Some(files) = read_clipboard_files_sync()? {
            return Ok(RawPayload::files(files));
        }

        let mut clipboard = Self::open()?;

        let text = match clipboard.get_text() {
            Ok(text) => Some(text),
            Err(arboard::Error::ContentNotAvailable) => None,
            Err(e) => return Err(map_arboard_error(e)),
        };

        let skip_image = text.as_deref().is_some_and(should_skip_image_by_text);
        let image = if skip_image {
            None
        } else {
            match clipboard.get_image() {
                Ok(image_data) => Some(encode_png(image_data)?),
                Err(arboard::Error::ContentNotAvailable) => None,
                Err(arboard::Error::ClipboardOccupied) => {
                    return Err(map_arboard_error(arboard::Error::ClipboardOccupied));
                }
                Err(e) => {
                    log::warn!("读取剪贴板图片失败，按无图片处理: {}", e);
                    None
                }
            }
        };

        Ok(RawPayload { text, image, files: None })
    }

    fn write_text(&self, text: &str) -> Result<(), AppError> {
        Self::open()?
            .set_text(text.to_string())
            .map_err(map_arboard_error)
    }

    fn write_image(&self, image: &DecodedImage) -> Result<(), AppError> {
        let image_data = arboard::ImageData {
            width: image.width as usize,
            height: image.height as usize,
            bytes: Cow::Borrowed(image.rgba.as_slice()),
        };

        Self::open()?
            .set_image(image_data)
            .map_err(map_arboard_error)
    }
}
