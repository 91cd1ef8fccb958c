//! robots.txt handling: fetched once before the frontier starts draining,
//! then consulted as a pure lookup for every candidate URL.

use std::time::Duration;

use texting_robots::Robot;
use url::Url;

use crate::service::fetcher::PageFetcher;

pub struct RobotsPolicy {
    robot: Option<Robot>,
}

impl RobotsPolicy {
    /// Fetch and parse `/robots.txt` for the seed's origin. A missing or
    /// unparsable robots.txt simply allows everything; this never fails the
    /// crawl.
    pub async fn load(fetcher: &dyn PageFetcher, seed: &Url, user_agent: &str) -> Self {
        let robots_url = match seed.join("/robots.txt") {
            Ok(u) => u,
            Err(_) => return Self { robot: None },
        };

        let robot = match fetcher.fetch(&robots_url).await {
            Ok(page) if page.status == 200 => {
                match Robot::new(user_agent, page.body.as_bytes()) {
                    Ok(robot) => {
                        log::debug!("[ROBOTS] Loaded robots.txt from {robots_url}");
                        Some(robot)
                    }
                    Err(e) => {
                        log::warn!("[ROBOTS] Failed to parse robots.txt: {e}");
                        None
                    }
                }
            }
            Ok(page) => {
                log::debug!("[ROBOTS] No robots.txt ({}), allowing all", page.status);
                None
            }
            Err(e) => {
                log::debug!("[ROBOTS] robots.txt unreachable ({e:#}), allowing all");
                None
            }
        };

        Self { robot }
    }

    pub fn allow_all() -> Self {
        Self { robot: None }
    }

    pub fn allowed(&self, url: &Url) -> bool {
        self.robot
            .as_ref()
            .map(|r| r.allowed(url.as_str()))
            .unwrap_or(true)
    }

    /// Crawl-delay directive, when present.
    pub fn crawl_delay(&self) -> Option<Duration> {
        self.robot
            .as_ref()
            .and_then(|r| r.delay)
            .map(|secs| Duration::from_secs_f32(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::fetcher::HttpFetcher;

    #[tokio::test]
    async fn test_disallow_honored() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/robots.txt")
            .with_status(200)
            .with_body("User-agent: *\nDisallow: /private/\nCrawl-delay: 2\n")
            .create_async()
            .await;

        let fetcher = HttpFetcher::new(Duration::from_secs(5), None).unwrap();
        let seed = Url::parse(&server.url()).unwrap();
        let policy = RobotsPolicy::load(&fetcher, &seed, "siteaudit").await;

        assert!(policy.allowed(&seed.join("/public").unwrap()));
        assert!(!policy.allowed(&seed.join("/private/page").unwrap()));
        assert_eq!(policy.crawl_delay(), Some(Duration::from_secs(2)));
    }

    #[tokio::test]
    async fn test_missing_robots_allows_all() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/robots.txt")
            .with_status(404)
            .create_async()
            .await;

        let fetcher = HttpFetcher::new(Duration::from_secs(5), None).unwrap();
        let seed = Url::parse(&server.url()).unwrap();
        let policy = RobotsPolicy::load(&fetcher, &seed, "siteaudit").await;

        assert!(policy.allowed(&seed.join("/anything").unwrap()));
        assert_eq!(policy.crawl_delay(), None);
    }
}
