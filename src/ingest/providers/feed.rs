// src/ingest/providers/feed.rs
//! Podcast RSS 2.0 + iTunes feed adapter.
use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::histogram;
use quick_xml::de::from_str;
use serde::Deserialize;

use crate::ingest::types::{PlatformAdapter, PodcastEpisode, RawItem, SourceRef};
use crate::model::{Platform, SourceDetails};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub user_agent: String,
    pub timeout_secs: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("timeline-consolidator/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout_secs: 20,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    title: Option<String>,
    #[serde(rename = "itunes:author")]
    author: Option<String>,
    image: Option<ChannelImage>,
    #[serde(rename = "itunes:image")]
    itunes_image: Option<Href>,
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct ChannelImage {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Href {
    #[serde(rename = "@href")]
    href: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Text {
    #[serde(rename = "$text")]
    value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Enclosure {
    #[serde(rename = "@url")]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Item {
    guid: Option<Text>,
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
    enclosure: Option<Enclosure>,
    #[serde(rename = "itunes:duration")]
    duration: Option<String>,
    #[serde(rename = "itunes:image")]
    image: Option<Href>,
}

/// Reads one feed per source; the feed URL is the source's locator, or its
/// external id when no locator is stored.
pub struct FeedAdapter {
    mode: Mode,
}

enum Mode {
    /// Canned documents keyed by feed URL.
    Fixture(HashMap<String, String>),
    Http { client: reqwest::Client },
}

impl FeedAdapter {
    pub fn from_fixture(url: &str, xml: &str) -> Self {
        Self {
            mode: Mode::Fixture(HashMap::from([(url.to_string(), xml.to_string())])),
        }
    }

    /// Add another canned feed (fixture mode only).
    pub fn with_fixture(mut self, url: &str, xml: &str) -> Self {
        if let Mode::Fixture(map) = &mut self.mode {
            map.insert(url.to_string(), xml.to_string());
        }
        self
    }

    pub fn http(cfg: &FeedConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(cfg.user_agent.clone())
            .timeout(Duration::from_secs(cfg.timeout_secs.max(1)))
            .build()
            .context("building feed http client")?;
        Ok(Self {
            mode: Mode::Http { client },
        })
    }

    async fn fetch_body(&self, url: &str) -> Result<String> {
        match &self.mode {
            Mode::Fixture(map) => map
                .get(url)
                .cloned()
                .ok_or_else(|| anyhow!("no fixture for feed {url}")),
            Mode::Http { client } => {
                let resp = client
                    .get(url)
                    .send()
                    .await
                    .with_context(|| format!("feed http get {url}"))?;
                let resp = resp
                    .error_for_status()
                    .with_context(|| format!("feed http status {url}"))?;
                resp.text().await.context("feed http .text()")
            }
        }
    }

    fn parse(xml: &str) -> Result<Channel> {
        let t0 = std::time::Instant::now();
        let xml_clean = scrub_html_entities_for_xml(xml);
        let rss: Rss = from_str(&xml_clean).context("parsing podcast rss xml")?;
        histogram!("feed_parse_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        Ok(rss.channel)
    }
}

fn feed_url(source: &SourceRef) -> &str {
    source.locator.as_deref().unwrap_or(&source.external_id)
}

fn to_raw(it: Item) -> RawItem {
    RawItem::Podcast(PodcastEpisode {
        guid: it.guid.and_then(|g| g.value),
        title: it.title,
        description: it.description,
        pub_date: it.pub_date,
        link: it.link,
        enclosure_url: it.enclosure.and_then(|e| e.url),
        image_url: it.image.and_then(|i| i.href),
        duration: it.duration,
    })
}

#[async_trait]
impl PlatformAdapter for FeedAdapter {
    fn platform(&self) -> Platform {
        Platform::Podcast
    }

    /// Feeds are not windowed upstream: every item is returned and the
    /// caller drops what is older than `since`.
    async fn list_items_since(&self, source: &SourceRef, _since: DateTime<Utc>) -> Result<Vec<RawItem>> {
        let body = self.fetch_body(feed_url(source)).await?;
        let channel = Self::parse(&body)?;
        Ok(channel.item.into_iter().map(to_raw).collect())
    }

    async fn lookup_source(&self, external_id: &str) -> Result<Option<SourceDetails>> {
        let body = self.fetch_body(external_id).await?;
        let channel = Self::parse(&body)?;
        let thumbnail = channel
            .itunes_image
            .and_then(|i| i.href)
            .or_else(|| channel.image.and_then(|i| i.url));
        Ok(Some(SourceDetails {
            platform: Platform::Podcast,
            external_id: external_id.to_string(),
            handle: channel.author,
            display_name: channel.title.map(|t| crate::ingest::normalize_text(&t)),
            thumbnail_url: thumbnail,
            uploads_locator: Some(external_id.to_string()),
        }))
    }

    fn name(&self) -> &'static str {
        "podcast-feed"
    }
}

/// HTML entities are not defined in XML; feeds still ship them.
fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&hellip;", "...")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
}

#[cfg(test)]
mod tests {
    use super::*;

    const XML: &str = r#"<?xml version="1.0"?>
<rss version="2.0" xmlns:itunes="http://www.itunes.com/dtds/podcast-1.0.dtd">
  <channel>
    <title>Night Shift &amp; Friends</title>
    <itunes:author>Nightly</itunes:author>
    <itunes:image href="https://cdn.example/cover.jpg"/>
    <item>
      <guid isPermaLink="false">ep-2</guid>
      <title>Episode 2&nbsp;&mdash; Return</title>
      <pubDate>Tue, 10 Jun 2025 04:00:00 GMT</pubDate>
      <enclosure url="https://cdn.example/ep2.mp3" type="audio/mpeg" length="1"/>
      <itunes:duration>1:02:03</itunes:duration>
    </item>
    <item>
      <title>Episode 1</title>
      <link>https://pod.example/ep1</link>
      <pubDate>Tue, 03 Jun 2025 04:00:00 GMT</pubDate>
      <itunes:duration>2700</itunes:duration>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn parses_items_and_itunes_tags() {
        let ch = FeedAdapter::parse(XML).unwrap();
        assert_eq!(ch.title.as_deref(), Some("Night Shift & Friends"));
        assert_eq!(ch.item.len(), 2);
        let raw: Vec<RawItem> = ch.item.into_iter().map(to_raw).collect();
        match &raw[0] {
            RawItem::Podcast(ep) => {
                assert_eq!(ep.guid.as_deref(), Some("ep-2"));
                assert_eq!(ep.enclosure_url.as_deref(), Some("https://cdn.example/ep2.mp3"));
                assert_eq!(ep.duration.as_deref(), Some("1:02:03"));
            }
            other => panic!("unexpected {other:?}"),
        }
        match &raw[1] {
            RawItem::Podcast(ep) => {
                assert_eq!(ep.guid, None);
                assert_eq!(ep.link.as_deref(), Some("https://pod.example/ep1"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn lookup_reads_channel_metadata() {
        let a = FeedAdapter::from_fixture("https://pod.example/feed.xml", XML);
        let d = a
            .lookup_source("https://pod.example/feed.xml")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(d.display_name.as_deref(), Some("Night Shift & Friends"));
        assert_eq!(d.thumbnail_url.as_deref(), Some("https://cdn.example/cover.jpg"));
        assert_eq!(d.uploads_locator.as_deref(), Some("https://pod.example/feed.xml"));
    }

    #[tokio::test]
    async fn unknown_fixture_is_an_error() {
        let a = FeedAdapter::from_fixture("https://a", XML);
        let src = SourceRef {
            source_id: 1,
            platform: Platform::Podcast,
            external_id: "https://b".into(),
            locator: None,
        };
        assert!(a.list_items_since(&src, Utc::now()).await.is_err());
    }
}
