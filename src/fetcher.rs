//! HTTP fetch capability: cookie/UA-aware, proxy-rotating, charset-tolerant.
//!
//! Grounded in `collect/collect.go`'s `Fetcher` interface and `proxy/proxy.go`'s
//! round-robin proxy switcher; decoding follows the source's "peek first
//! 1024 bytes, detect charset, fall back to UTF-8" policy.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use encoding_rs::Encoding;

use crate::error::FetchError;
use crate::request::Request;

/// Contract every fetch backend must satisfy.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn get(&self, req: &Request) -> Result<String, FetchError>;
}

/// Round-robin proxy selector, grounded in `proxy.RoundRobinProxySwitcher`.
///
/// Each proxy gets its own pre-built client (reqwest fixes a client's proxy
/// at construction time), and calls atomically cycle through them.
struct ProxyPool {
    clients: Vec<reqwest::Client>,
    next: AtomicUsize,
}

impl ProxyPool {
    fn new(urls: &[String], user_agent: &str, timeout: Duration) -> Result<Self, FetchError> {
        if urls.is_empty() {
            return Err(FetchError::EmptyProxyList);
        }
        let clients = urls
            .iter()
            .map(|u| {
                let proxy =
                    reqwest::Proxy::all(u).map_err(|_| FetchError::InvalidProxy(u.clone()))?;
                reqwest::Client::builder()
                    .timeout(timeout)
                    .user_agent(user_agent)
                    .proxy(proxy)
                    .build()
                    .map_err(FetchError::Request)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            clients,
            next: AtomicUsize::new(0),
        })
    }

    fn next(&self) -> &reqwest::Client {
        let index = self.next.fetch_add(1, Ordering::Relaxed);
        &self.clients[index % self.clients.len()]
    }
}

/// Default `reqwest`-backed fetcher.
pub struct ReqwestFetcher {
    client: reqwest::Client,
    user_agent: String,
    timeout: Duration,
    proxies: Option<ProxyPool>,
}

const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (compatible; rulecrawl/0.1; +https://example.invalid/bot)";

impl ReqwestFetcher {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        Self::with_proxies(timeout, &[])
    }

    /// Build a fetcher that round-robins across `proxy_urls`. An empty slice
    /// means "no proxy" (direct connections), matching the source only when
    /// the caller explicitly opts into proxying — `proxy_urls` being empty
    /// here is *not* the same failure as configuring an empty proxy pool via
    /// [`Self::with_required_proxies`].
    pub fn with_proxies(timeout: Duration, proxy_urls: &[String]) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(DEFAULT_USER_AGENT)
            .build()?;
        let proxies = if proxy_urls.is_empty() {
            None
        } else {
            Some(ProxyPool::new(proxy_urls, DEFAULT_USER_AGENT, timeout)?)
        };
        Ok(Self {
            client,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout,
            proxies,
        })
    }

    /// Like [`Self::with_proxies`] but treats an empty list as a construction
    /// error, for callers who explicitly intend to crawl only through proxies.
    pub fn with_required_proxies(timeout: Duration, proxy_urls: &[String]) -> Result<Self, FetchError> {
        if proxy_urls.is_empty() {
            return Err(FetchError::EmptyProxyList);
        }
        Self::with_proxies(timeout, proxy_urls)
    }

    fn decode(bytes: &[u8]) -> Result<String, FetchError> {
        if let Ok(s) = std::str::from_utf8(bytes) {
            return Ok(s.to_string());
        }
        let sniff_window = &bytes[..bytes.len().min(1024)];
        let (encoding, _) = Encoding::for_bom(sniff_window).unwrap_or((encoding_rs::UTF_8, 0));
        let (decoded, _, had_errors) = encoding.decode(bytes);
        if had_errors && encoding != encoding_rs::UTF_8 {
            let (decoded, _, _) = encoding_rs::UTF_8.decode(bytes);
            return Ok(decoded.into_owned());
        }
        Ok(decoded.into_owned())
    }
}

#[async_trait]
impl Fetcher for ReqwestFetcher {
    async fn get(&self, req: &Request) -> Result<String, FetchError> {
        let client = match &self.proxies {
            Some(pool) => pool.next(),
            None => &self.client,
        };
        let method = req.method.parse().unwrap_or(reqwest::Method::GET);
        let mut builder = client
            .request(method, &req.url)
            .timeout(self.timeout)
            .header(reqwest::header::USER_AGENT, &self.user_agent);
        if !req.cookie.is_empty() {
            builder = builder.header(reqwest::header::COOKIE, &req.cookie);
        }

        let response = builder.send().await?;
        let bytes = response.bytes().await?;
        Self::decode(&bytes)
    }
}
