//! 代码特征检测模块
//!
//! # 设计思路
//!
//! 分类器在判定颜色之后、链接之前调用本模块，识别看起来像源代码的文本。
//! 命中任一模式即视为代码。
//!
//! # 实现思路
//!
//! - 使用 `RegexSet` 一次完成多模式匹配。
//! - 通过 `once_cell::sync::Lazy` 在首次调用时编译正则。
//! - 所有模式不区分大小写，不设长度门槛。

use once_cell::sync::Lazy;
use regex::{RegexSet, RegexSetBuilder};

/// 预编译的正则表达式集合：用于代码特征检测
///
/// 1. JS/TS 关键字（function, class, interface, import, export, const, let, var）
/// 2. C#/Java 访问修饰符与声明（public, private, protected, class, interface, namespace）
/// 3. 成对的 HTML/XML 标签
/// 4. Python 关键字（def, import, class, `if __name__`）
/// 5. 花括号块
static CODE_PATTERNS: Lazy<Option<RegexSet>> = Lazy::new(|| {
    let built = RegexSetBuilder::new([
        r"\b(function|class|interface|import|export|const|let|var)\b",
        r"\b(public|private|protected|class|interface|namespace)\b",
        r"(?s)<\w+[^>]*>.*</\w+>",
        r"\b(def|import|class)\b|\bif __name__\b",
        r"\{[^}]*\}",
    ])
    .case_insensitive(true)
    .build();
    match built {
        Ok(set) => Some(set),
        Err(e) => {
            log::error!("编译代码检测正则失败: {}", e);
            None
        }
    }
});

/// 判断文本是否可能包含代码
pub fn is_likely_code(text: &str) -> bool {
    CODE_PATTERNS
        .as_ref()
        .is_some_and(|patterns| patterns.is_match(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_js_function_detected() {
        assert!(is_likely_code("function foo() {}"));
    }

    #[test]
    fn test_csharp_declaration_detected() {
        assert!(is_likely_code("public sealed record Point"));
    }

    #[test]
    fn test_html_pair_detected() {
        assert!(is_likely_code("<div class=\"a\">\n  hi\n</div>"));
    }

    #[test]
    fn test_python_detected() {
        assert!(is_likely_code("def main():\n    pass"));
        assert!(is_likely_code("if __name__ == '__main__':"));
    }

    #[test]
    fn test_brace_block_detected() {
        assert!(is_likely_code("{ \"a\": 1 }"));
    }

    #[test]
    fn test_plain_text_not_detected() {
        assert!(!is_likely_code("hello world"));
        assert!(!is_likely_code("see you tomorrow"));
    }

    #[test]
    fn test_keywords_match_any_case() {
        assert!(is_likely_code("CLASS notes"));
        assert!(is_likely_code("Import data"));
        assert!(is_likely_code("Let me know when you are free"));
    }

    #[test]
    fn test_short_snippets_detected() {
        assert!(is_likely_code("{a}"));
        assert!(is_likely_code("var"));
        assert!(!is_likely_code("ab"));
    }
}
