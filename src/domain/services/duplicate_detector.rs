// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use sha2::{Digest, Sha256};
use std::collections::HashSet;

use crate::domain::services::url_normalizer;

/// 相似作业判定的最大编辑距离
pub const MAX_PATTERN_DISTANCE: usize = 2;

/// 基于规范化URL生成去重哈希
///
/// 大小写、参数顺序不影响结果；同一文件出现在不同URL算不同文件
pub fn file_hash(url: &str) -> Result<String, url_normalizer::InvalidUrl> {
    let normalized = url_normalizer::normalize(url)?;
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}

/// 去重URL列表（保留首次出现，顺序不变）
///
/// 无法解析的URL直接丢弃
pub fn dedupe_urls(urls: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut unique = Vec::new();

    for url in urls {
        if let Ok(hash) = file_hash(url) {
            if seen.insert(hash) {
                unique.push(url.clone());
            }
        }
    }

    unique
}

/// 判断两个URL模式是否相似
///
/// 精确相等、Levenshtein编辑距离 ≤ 2，或去掉查询串后
/// 基址相同（同一路径带不同参数集也算相似作业）
pub fn patterns_match(left: &str, right: &str) -> bool {
    if left == right {
        return true;
    }
    if strsim::levenshtein(left, right) <= MAX_PATTERN_DISTANCE {
        return true;
    }

    let base = |p: &str| p.split('?').next().unwrap_or(p).to_string();
    base(left) == base(right)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_hash_ignores_case_and_param_order() {
        let a = file_hash("https://Example.com/file.pdf?b=2&a=1").unwrap();
        let b = file_hash("https://example.com/file.pdf?a=1&b=2").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_file_hash_distinguishes_params() {
        let a = file_hash("https://example.com/file.pdf").unwrap();
        let b = file_hash("https://example.com/file.pdf?v=1").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_dedupe_keeps_first_occurrence() {
        let urls = vec![
            "https://example.com/file.pdf".to_string(),
            "https://example.com/file.pdf?v=1".to_string(),
            "https://EXAMPLE.com/file.pdf".to_string(),
        ];
        let unique = dedupe_urls(&urls);
        assert_eq!(
            unique,
            vec![
                "https://example.com/file.pdf".to_string(),
                "https://example.com/file.pdf?v=1".to_string(),
            ]
        );
    }

    #[test]
    fn test_dedupe_drops_invalid_urls() {
        let urls = vec![
            "https://example.com/a".to_string(),
            "http://localhost/a".to_string(),
        ];
        assert_eq!(dedupe_urls(&urls).len(), 1);
    }

    #[test]
    fn test_patterns_match_exact_and_fuzzy() {
        assert!(patterns_match(
            "https://example.com/docs?x=*",
            "https://example.com/docs?x=*"
        ));
        // 距离2以内
        assert!(patterns_match(
            "https://example.com/docs",
            "https://example.com/doc"
        ));
        assert!(!patterns_match(
            "https://example.com/docs",
            "https://other.org/completely/else"
        ));
    }

    #[test]
    fn test_patterns_match_same_base_with_query() {
        // 同一路径，一边带参数通配
        assert!(patterns_match(
            "https://example.com/docs",
            "https://example.com/docs?ref=*"
        ));
        assert!(!patterns_match(
            "https://example.com/docs",
            "https://example.com/downloads?ref=*"
        ));
    }
}
