// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use anyhow::Result;
use reqwest::Client;
use robotstxt::DefaultMatcher;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use url::Url;

use async_trait::async_trait;

/// Robots.txt检查器接口
#[async_trait]
pub trait RobotsCheckerTrait: Send + Sync {
    /// 检查URL是否被允许访问
    async fn is_allowed(&self, url_str: &str, user_agent: &str) -> Result<bool>;
    /// 获取爬取延迟
    async fn get_crawl_delay(&self, url_str: &str, user_agent: &str) -> Result<Option<Duration>>;
}

/// 缓存的Robots.txt内容
///
/// 每个host在一次执行内只抓取一次robots.txt
#[derive(Clone)]
struct CachedRobots {
    content: String,
    expires_at: Instant,
}

/// Robots.txt检查器
#[derive(Clone)]
pub struct RobotsChecker {
    client: Client,
    memory_cache: Arc<Mutex<HashMap<String, CachedRobots>>>,
}

#[async_trait]
impl RobotsCheckerTrait for RobotsChecker {
    async fn is_allowed(&self, url_str: &str, user_agent: &str) -> Result<bool> {
        let content = self.get_robots_content(url_str).await?;
        let url = Url::parse(url_str)?;
        let mut matcher = DefaultMatcher::default();
        Ok(matcher.one_agent_allowed_by_robots(user_agent, url.path(), &content))
    }

    async fn get_crawl_delay(&self, url_str: &str, user_agent: &str) -> Result<Option<Duration>> {
        let content = self.get_robots_content(url_str).await?;
        Ok(self.parse_crawl_delay(&content, user_agent))
    }
}

impl Default for RobotsChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl RobotsChecker {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            memory_cache: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// 获取Robots.txt内容（带缓存）
    async fn get_robots_content(&self, url_str: &str) -> Result<String> {
        let url = Url::parse(url_str)?;
        let host = url
            .host_str()
            .ok_or_else(|| anyhow::anyhow!("Invalid URL"))?;
        let scheme = url.scheme();

        let robots_url = format!("{}://{}/robots.txt", scheme, host);

        {
            let mut cache = self.memory_cache.lock().unwrap();
            if let Some(cached) = cache.get(&robots_url) {
                if cached.expires_at > Instant::now() {
                    return Ok(cached.content.clone());
                } else {
                    cache.remove(&robots_url);
                }
            }
        }

        let response = self
            .client
            .get(&robots_url)
            .header("User-Agent", "ingestrs-bot/1.0")
            .timeout(Duration::from_secs(5))
            .send()
            .await;

        let content = match response {
            Ok(resp) if resp.status().is_success() => resp.text().await.unwrap_or_default(),
            // 404 is a valid response, meaning no robots.txt
            Ok(_) => String::new(),
            Err(e) => {
                tracing::warn!("Failed to fetch robots.txt from {}: {}", robots_url, e);
                String::new()
            }
        };

        {
            let mut cache = self.memory_cache.lock().unwrap();
            cache.insert(
                robots_url,
                CachedRobots {
                    content: content.clone(),
                    expires_at: Instant::now() + Duration::from_secs(3600),
                },
            );
        }

        Ok(content)
    }

    /// 解析Crawl-delay指令
    ///
    /// 简化实现：找到匹配的 User-agent 块，在块内查找 Crawl-delay
    fn parse_crawl_delay(&self, content: &str, user_agent: &str) -> Option<Duration> {
        let mut current_agent_matched = false;
        let mut delay: Option<f64> = None;
        let mut specific_agent_found = false;

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let lower_line = line.to_lowercase();
            if lower_line.starts_with("user-agent:") {
                let agent = line[11..].trim();
                if agent == "*" {
                    current_agent_matched = !specific_agent_found;
                } else if user_agent.to_lowercase().contains(&agent.to_lowercase()) {
                    current_agent_matched = true;
                    specific_agent_found = true;
                    delay = None;
                } else {
                    current_agent_matched = false;
                }
            } else if lower_line.starts_with("crawl-delay:") && current_agent_matched {
                if let Ok(d) = line[12..].trim().parse::<f64>() {
                    delay = Some(d);
                }
            }
        }

        delay.map(Duration::from_secs_f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_crawl_delay_wildcard_agent() {
        let checker = RobotsChecker::new();
        let content = "User-agent: *\nCrawl-delay: 2\n";
        assert_eq!(
            checker.parse_crawl_delay(content, "ingestrs-bot"),
            Some(Duration::from_secs(2))
        );
    }

    #[test]
    fn test_parse_crawl_delay_specific_agent_wins() {
        let checker = RobotsChecker::new();
        let content = "User-agent: *\nCrawl-delay: 10\nUser-agent: ingestrs-bot\nCrawl-delay: 1\n";
        assert_eq!(
            checker.parse_crawl_delay(content, "ingestrs-bot/1.0"),
            Some(Duration::from_secs(1))
        );
    }

    #[test]
    fn test_parse_crawl_delay_absent() {
        let checker = RobotsChecker::new();
        assert_eq!(
            checker.parse_crawl_delay("User-agent: *\nDisallow: /private\n", "bot"),
            None
        );
    }
}
