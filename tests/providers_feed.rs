// tests/providers_feed.rs
mod common;

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use tokio_util::sync::CancellationToken;

use common::*;
use timeline_consolidator::cache::{CacheConfig, TtlCache};
use timeline_consolidator::enrich::SourceEnricher;
use timeline_consolidator::ingest::normalize::derive_item_id;
use timeline_consolidator::ingest::providers::FeedAdapter;
use timeline_consolidator::ingest::types::AdapterSet;
use timeline_consolidator::ingest::Orchestrator;
use timeline_consolidator::model::{EventKind, Platform, PriorityTier};

const FEED_URL: &str = "https://harbor.example/feed.xml";

const FEED_XML: &str = include_str!("fixtures/podcast_feed.xml");

#[tokio::test]
async fn registered_feed_ingests_recent_episodes() {
    let store = store();
    let clock = clock_at(Utc.with_ymd_and_hms(2025, 6, 12, 0, 0, 0).unwrap());
    let adapters = AdapterSet::new().with(Arc::new(FeedAdapter::from_fixture(FEED_URL, FEED_XML)));

    let cache = Arc::new(TtlCache::new(CacheConfig::default(), clock.clone()));
    let enricher = SourceEnricher::new(store.clone(), adapters.clone(), cache, clock.clone());
    let found = enricher
        .lookup(Platform::Podcast, FEED_URL, PriorityTier::Low)
        .await
        .unwrap();
    let details = found.details.unwrap();
    assert_eq!(details.display_name.as_deref(), Some("Harbor Notes"));
    assert_eq!(details.handle.as_deref(), Some("Harbor Radio Collective"));
    assert_eq!(details.thumbnail_url.as_deref(), Some("https://harbor.example/logo.png"));

    let source = store.find_source(Platform::Podcast, FEED_URL).unwrap().unwrap();
    assert_eq!(source.uploads_locator.as_deref(), Some(FEED_URL));

    let orch = Arc::new(Orchestrator::new(store.clone(), adapters, clock));
    let res = orch.run_batch(vec![source], CancellationToken::new()).await.unwrap();

    // ep-1 is older than the 90 day backfill, one pubDate is garbage
    assert_eq!(res.succeeded, 1);
    assert_eq!(res.events_upserted, 2);
    assert_eq!(res.items_rejected, 1);
    assert!(store.get_event(Platform::Podcast, "harbor-ep-1").unwrap().is_none());

    let ep42 = store.get_event(Platform::Podcast, "harbor-ep-42").unwrap().unwrap().event;
    assert_eq!(ep42.kind, EventKind::Episode);
    assert_eq!(ep42.title, "Ep. 42: Tides & Timetables");
    assert_eq!(
        ep42.description.as_deref(),
        Some("Charts, tides and \"slack water\". Part two")
    );
    assert_eq!(ep42.url, "https://harbor.example/42");
    assert_eq!(ep42.image_url.as_deref(), Some("https://cdn.harbor.example/42.jpg"));
    assert_eq!(ep42.duration.map(|d| d.as_secs()), Some(3723));
    assert_eq!(
        ep42.published_at,
        Some(Utc.with_ymd_and_hms(2025, 6, 10, 6, 30, 0).unwrap())
    );

    // no guid and no link: id derived, enclosure is the url
    let derived = derive_item_id(&["", "https://cdn.harbor.example/41.mp3", "Ep. 41: Fog Signals"]);
    let ep41 = store.get_event(Platform::Podcast, &derived).unwrap().unwrap().event;
    assert_eq!(ep41.url, "https://cdn.harbor.example/41.mp3");
    assert_eq!(ep41.duration.map(|d| d.to_string()).as_deref(), Some("45:00"));
}

#[tokio::test]
async fn unreachable_feed_fails_only_its_source() {
    let store = store();
    let clock = clock_at(Utc.with_ymd_and_hms(2025, 6, 12, 0, 0, 0).unwrap());
    let good = register(&store, Platform::Podcast, FEED_URL);
    let bad = register(&store, Platform::Podcast, "https://gone.example/feed.xml");

    let adapters = AdapterSet::new().with(Arc::new(FeedAdapter::from_fixture(FEED_URL, FEED_XML)));
    let orch = Arc::new(Orchestrator::new(store.clone(), adapters, clock));
    let res = orch
        .run_batch(vec![good, bad.clone()], CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(res.succeeded, 1);
    assert_eq!(res.failed, 1);
    assert_eq!(store.get_source(bad.id).unwrap().unwrap().last_fetched_at, None);
}
