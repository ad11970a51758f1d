//! 检索分词
//!
//! 历史会话检索与 tool hint 匹配共用：中文走 jieba-rs（搜索引擎模式），其余按非字母数字字符切分；
//! 统一小写，丢弃单字符英文词。结果确定、与输入顺序无关。

use std::collections::BTreeSet;
use std::sync::OnceLock;

use jieba_rs::Jieba;

static JIEBA: OnceLock<Jieba> = OnceLock::new();

fn jieba() -> &'static Jieba {
    JIEBA.get_or_init(Jieba::new)
}

fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{4E00}'..='\u{9FFF}' |
        '\u{3400}'..='\u{4DBF}' |
        '\u{F900}'..='\u{FAFF}' |
        '\u{3040}'..='\u{309F}' |
        '\u{30A0}'..='\u{30FF}'
    )
}

pub fn contains_cjk(text: &str) -> bool {
    text.chars().any(is_cjk)
}

fn keep(token: &str) -> bool {
    let mut chars = token.chars();
    match (chars.next(), chars.next()) {
        (None, _) => false,
        (Some(c), None) => is_cjk(c),
        _ => token.chars().any(|c| c.is_alphanumeric()),
    }
}

/// 文本 -> 有序去重的词集合
pub fn terms(text: &str) -> BTreeSet<String> {
    let text = text.trim();
    if text.is_empty() {
        return BTreeSet::new();
    }

    let raw: Vec<String> = if contains_cjk(text) {
        jieba()
            .cut_for_search(text, true)
            .into_iter()
            .flat_map(|w| {
                w.split(|c: char| !(c.is_alphanumeric() || is_cjk(c)))
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .collect()
    } else {
        text.split(|c: char| !c.is_alphanumeric())
            .map(str::to_string)
            .collect()
    };

    raw.into_iter()
        .map(|t| t.to_lowercase())
        .filter(|t| keep(t))
        .collect()
}

/// 两个词集合的交集大小（检索相似度，随共享词单调不减）
pub fn shared_terms(a: &BTreeSet<String>, b: &BTreeSet<String>) -> usize {
    a.intersection(b).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terms_english_strips_punctuation() {
        let t = terms("Search renewable-energy policy, and SUMMARIZE!");
        assert!(t.contains("renewable"));
        assert!(t.contains("energy"));
        assert!(t.contains("summarize"));
        assert!(!t.iter().any(|w| w.contains(',')));
    }

    #[test]
    fn test_terms_numbers_kept() {
        let t = terms("square root of 144");
        assert!(t.contains("144"));
        assert!(t.contains("square"));
    }

    #[test]
    fn test_terms_chinese() {
        let t = terms("我喜欢编程和人工智能");
        assert!(t.iter().any(|w| w.contains("编程") || w.contains("智能")));
    }

    #[test]
    fn test_empty() {
        assert!(terms("   ").is_empty());
        assert!(terms("").is_empty());
    }

    #[test]
    fn test_shared_terms() {
        let a = terms("factorial of 3");
        let b = terms("factorial of 5");
        assert_eq!(shared_terms(&a, &b), 2);
    }
}
