//! 类别与搜索过滤
//!
//! 类别标签同时接受英文与西班牙文（界面历史遗留的 "Todos"、"Código" 等），
//! 未知标签视为全部。搜索规则与存储层 `text_matches` 完全一致。

use serde::{Deserialize, Serialize};

use super::ViewProjection;
use crate::db::{text_matches, ContentType};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Category {
    #[default]
    All,
    Text,
    Code,
    Links,
    Colors,
    Images,
    Files,
    Other,
}

impl Category {
    pub const ALL: [Category; 8] = [
        Category::All,
        Category::Text,
        Category::Code,
        Category::Links,
        Category::Colors,
        Category::Images,
        Category::Files,
        Category::Other,
    ];

    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "" | "all" | "todos" => Category::All,
            "text" | "texto" => Category::Text,
            "code" | "código" | "codigo" => Category::Code,
            "links" | "link" | "enlaces" => Category::Links,
            "colors" | "color" | "colores" => Category::Colors,
            "images" | "image" | "imágenes" | "imagenes" => Category::Images,
            "files" | "archivos" => Category::Files,
            "other" | "others" | "otros" => Category::Other,
            other => {
                log::debug!("未知类别标签 '{}'，按全部处理", other);
                Category::All
            }
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Category::All => "All",
            Category::Text => "Text",
            Category::Code => "Code",
            Category::Links => "Links",
            Category::Colors => "Colors",
            Category::Images => "Images",
            Category::Files => "Files",
            Category::Other => "Other",
        }
    }

    /// `All` 不限制类型
    pub fn content_type(self) -> Option<ContentType> {
        match self {
            Category::All => None,
            Category::Text => Some(ContentType::Text),
            Category::Code => Some(ContentType::Code),
            Category::Links => Some(ContentType::Link),
            Category::Colors => Some(ContentType::Color),
            Category::Images => Some(ContentType::Image),
            Category::Files => Some(ContentType::Files),
            Category::Other => Some(ContentType::Other),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryFilter {
    pub category: Category,
    pub search: String,
}

impl HistoryFilter {
    pub fn matches(&self, projection: &ViewProjection) -> bool {
        if let Some(content_type) = self.category.content_type() {
            if projection.content_type != content_type {
                return false;
            }
        }
        text_matches(&self.search, projection.text.as_deref(), &projection.preview)
    }
}
