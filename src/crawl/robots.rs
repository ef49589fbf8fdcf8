//! robots.txt loading, parsing and enforcement
//!
//! A policy is scoped to one base host per crawl. Loading fails open: if
//! robots.txt is unreachable or returns non-200 after bounded retries, the
//! site is treated as fully allowed rather than blocking the crawl.

use super::normalize_url;
use crate::error::Result;
use reqwest::Client;
use robotstxt::DefaultMatcher;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use url::Url;

const LOAD_ATTEMPTS: u32 = 3;
const RETRY_BACKOFF_MS: u64 = 250;

/// Parsed robots.txt directives for one host
#[derive(Debug, Clone)]
pub struct RobotsRules {
    content: String,
}

impl RobotsRules {
    pub fn parse(content: &str) -> Self {
        Self {
            content: content.to_string(),
        }
    }

    /// Rules that allow everything (missing or unreadable robots.txt)
    pub fn allow_all() -> Self {
        Self {
            content: String::new(),
        }
    }

    /// Check whether a path is allowed for a user agent. A group matching the
    /// supplied agent takes precedence over a wildcard group.
    pub fn is_allowed(&self, path: &str, user_agent: &str) -> bool {
        if self.content.is_empty() {
            return true;
        }
        let mut matcher = DefaultMatcher::default();
        let allowed = matcher.one_agent_allowed_by_robots(&self.content, user_agent, path);
        if !allowed {
            debug!("robots.txt disallows {} for {}", path, user_agent);
        }
        allowed
    }

    /// Crawl-delay in milliseconds, preferring a matching user-agent group
    /// over the wildcard group
    pub fn crawl_delay_ms(&self, user_agent: &str) -> Option<u64> {
        let ua_lower = user_agent.to_lowercase();
        let mut current_agent: Option<String> = None;
        let mut default_delay: Option<f64> = None;
        let mut specific_delay: Option<f64> = None;

        for line in self.content.lines() {
            let line = line.trim();
            if let Some(agent) = strip_directive(line, "User-agent") {
                current_agent = Some(agent.to_lowercase());
            }
            if let Some(delay_str) = strip_directive(line, "Crawl-delay") {
                if let (Some(agent), Ok(delay)) = (&current_agent, delay_str.parse::<f64>()) {
                    if agent == "*" {
                        default_delay = Some(delay);
                    } else if ua_lower.contains(agent.as_str()) {
                        specific_delay = Some(delay);
                    }
                }
            }
        }

        specific_delay
            .or(default_delay)
            .map(|secs| (secs * 1000.0) as u64)
    }

    /// Sitemap URLs declared anywhere in the file
    pub fn sitemap_urls(&self) -> Vec<String> {
        self.content
            .lines()
            .filter_map(|line| strip_directive(line.trim(), "Sitemap"))
            .filter(|loc| Url::parse(loc).is_ok())
            .collect()
    }
}

/// Case-insensitive `Directive: value` line parser
fn strip_directive(line: &str, directive: &str) -> Option<String> {
    let (name, value) = line.split_once(':')?;
    if name.trim().eq_ignore_ascii_case(directive) {
        // Strip trailing comments
        let value = value.split('#').next().unwrap_or("").trim();
        if value.is_empty() {
            None
        } else {
            Some(value.to_string())
        }
    } else {
        None
    }
}

struct LoadedPolicy {
    rules: RobotsRules,
    user_agent: String,
    origin: String,
}

/// Per-crawl robots policy with a memoized decision cache
pub struct RobotsPolicy {
    client: Client,
    loaded: RwLock<Option<LoadedPolicy>>,
    decisions: RwLock<HashMap<String, bool>>,
}

impl RobotsPolicy {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            loaded: RwLock::new(None),
            decisions: RwLock::new(HashMap::new()),
        }
    }

    /// Fetch and parse `{origin}/robots.txt` with bounded retry. Any failure
    /// or non-200 response loads an allow-all ruleset; this never returns an
    /// error for network conditions.
    pub async fn load(&self, base_url: &Url, user_agent: &str) -> Result<()> {
        let origin = base_url.origin().ascii_serialization();
        let robots_url = format!("{}/robots.txt", origin);
        debug!("Fetching robots.txt from {}", robots_url);

        let mut rules = None;
        for attempt in 1..=LOAD_ATTEMPTS {
            match self.client.get(&robots_url).send().await {
                Ok(response) if response.status().is_success() => {
                    let text = response.text().await.unwrap_or_default();
                    rules = Some(RobotsRules::parse(&text));
                    break;
                }
                Ok(response) => {
                    // A served non-200 is authoritative enough: allow all
                    debug!(
                        "robots.txt returned HTTP {} for {}, allowing all",
                        response.status(),
                        robots_url
                    );
                    rules = Some(RobotsRules::allow_all());
                    break;
                }
                Err(e) if attempt < LOAD_ATTEMPTS => {
                    debug!(
                        "robots.txt fetch attempt {}/{} failed: {}",
                        attempt, LOAD_ATTEMPTS, e
                    );
                    tokio::time::sleep(Duration::from_millis(RETRY_BACKOFF_MS * attempt as u64))
                        .await;
                }
                Err(e) => {
                    warn!("robots.txt unreachable at {} ({}), allowing all", robots_url, e);
                }
            }
        }

        let rules = rules.unwrap_or_else(RobotsRules::allow_all);
        *self.loaded.write().await = Some(LoadedPolicy {
            rules,
            user_agent: user_agent.to_string(),
            origin,
        });
        self.decisions.write().await.clear();
        Ok(())
    }

    /// Whether a URL may be fetched. True when no policy is loaded.
    /// Decisions are memoized per normalized URL for the life of the policy.
    pub async fn is_allowed(&self, url: &str) -> bool {
        let key = normalize_url(url);
        if let Some(decision) = self.decisions.read().await.get(&key) {
            return *decision;
        }

        let decision = {
            let loaded = self.loaded.read().await;
            match loaded.as_ref() {
                Some(policy) => {
                    let path = Url::parse(url)
                        .map(|u| u.path().to_string())
                        .unwrap_or_else(|_| "/".to_string());
                    policy.rules.is_allowed(&path, &policy.user_agent)
                }
                None => true,
            }
        };

        self.decisions.write().await.insert(key, decision);
        decision
    }

    /// Crawl-delay for the loaded host, in milliseconds
    pub async fn crawl_delay_ms(&self) -> Option<u64> {
        let loaded = self.loaded.read().await;
        loaded
            .as_ref()
            .and_then(|p| p.rules.crawl_delay_ms(&p.user_agent))
    }

    /// Sitemap URLs discovered in the loaded robots.txt
    pub async fn sitemap_urls(&self) -> Vec<String> {
        let loaded = self.loaded.read().await;
        loaded
            .as_ref()
            .map(|p| p.rules.sitemap_urls())
            .unwrap_or_default()
    }

    /// Origin the policy was loaded for, if any
    pub async fn origin(&self) -> Option<String> {
        let loaded = self.loaded.read().await;
        loaded.as_ref().map(|p| p.origin.clone())
    }

    /// Clear all loaded state, for reuse between independent crawls
    pub async fn reset(&self) {
        *self.loaded.write().await = None;
        self.decisions.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_allow_all() {
        let rules = RobotsRules::allow_all();
        assert!(rules.is_allowed("/any/path", "doccrawl"));
    }

    #[test]
    fn test_group_scoped_rules() {
        let content = r#"
User-agent: *
Disallow: /admin/
Disallow: /private/

User-agent: BadBot
Disallow: /
"#;
        let rules = RobotsRules::parse(content);
        assert!(rules.is_allowed("/docs/page", "GoodBot"));
        assert!(!rules.is_allowed("/admin/secret", "GoodBot"));
        assert!(!rules.is_allowed("/anything", "BadBot"));
    }

    #[test]
    fn test_crawl_delay_precedence() {
        let content = r#"
User-agent: *
Crawl-delay: 2.5

User-agent: SpecialBot
Crawl-delay: 1
"#;
        let rules = RobotsRules::parse(content);
        assert_eq!(rules.crawl_delay_ms("SpecialBot/1.0"), Some(1000));
        assert_eq!(rules.crawl_delay_ms("RandomBot"), Some(2500));
    }

    #[test]
    fn test_sitemap_urls() {
        let content = r#"
User-agent: *
Disallow:

Sitemap: https://example.com/sitemap.xml
Sitemap: https://example.com/sitemap-docs.xml
sitemap: not a url
"#;
        let rules = RobotsRules::parse(content);
        assert_eq!(
            rules.sitemap_urls(),
            vec![
                "https://example.com/sitemap.xml".to_string(),
                "https://example.com/sitemap-docs.xml".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_load_and_enforce() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("User-agent: *\nDisallow: /private/\n"),
            )
            .mount(&server)
            .await;

        let policy = RobotsPolicy::new(Client::new());
        let base = Url::parse(&server.uri()).unwrap();
        policy.load(&base, "doccrawl").await.unwrap();

        assert!(policy.is_allowed(&format!("{}/docs", server.uri())).await);
        assert!(
            !policy
                .is_allowed(&format!("{}/private/key", server.uri()))
                .await
        );
        // Memoized: second query hits the cache and agrees
        assert!(
            !policy
                .is_allowed(&format!("{}/private/key", server.uri()))
                .await
        );
    }

    #[tokio::test]
    async fn test_fail_open_on_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let policy = RobotsPolicy::new(Client::new());
        let base = Url::parse(&server.uri()).unwrap();
        policy.load(&base, "doccrawl").await.unwrap();

        assert!(policy.is_allowed(&format!("{}/anything", server.uri())).await);
        assert_eq!(policy.crawl_delay_ms().await, None);
    }

    #[tokio::test]
    async fn test_unloaded_policy_allows() {
        let policy = RobotsPolicy::new(Client::new());
        assert!(policy.is_allowed("https://example.com/a").await);
    }

    #[tokio::test]
    async fn test_reset_clears_state() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /\n"),
            )
            .mount(&server)
            .await;

        let policy = RobotsPolicy::new(Client::new());
        let base = Url::parse(&server.uri()).unwrap();
        policy.load(&base, "doccrawl").await.unwrap();
        assert!(!policy.is_allowed(&format!("{}/page", server.uri())).await);

        policy.reset().await;
        assert!(policy.is_allowed(&format!("{}/page", server.uri())).await);
        assert!(policy.origin().await.is_none());
    }
}
