// tests/timeline_pagination.rs
mod common;

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use common::*;
use timeline_consolidator::error::Error;
use timeline_consolidator::model::{Event, EventKind, Platform, SourceId};
use timeline_consolidator::store::Store;
use timeline_consolidator::timeline::{TimelineConfig, TimelineQuery};

fn event(platform: Platform, source_id: SourceId, id: &str, kind: EventKind, at: DateTime<Utc>) -> Event {
    Event {
        platform,
        source_id,
        external_id: id.to_string(),
        kind,
        title: format!("item {id}"),
        description: None,
        start_at: matches!(kind, EventKind::Live | EventKind::Radio).then_some(at),
        end_at: None,
        published_at: Some(at),
        url: format!("https://example.test/{id}"),
        image_url: None,
        duration: None,
        metrics: None,
    }
}

fn query(store: &Arc<Store>, clock: &Arc<timeline_consolidator::clock::ManualClock>) -> TimelineQuery {
    TimelineQuery::new(store.clone(), store.clone(), clock.clone())
}

#[test]
fn pages_cover_every_item_exactly_once_in_order() {
    let store = store();
    let clock = clock_at(t0());
    let a = register(&store, Platform::YouTube, "UC_a");
    let b = register(&store, Platform::Twitch, "tw_b");
    store.subscribe("u1", a.id, true, t0()).unwrap();
    store.subscribe("u1", b.id, true, t0()).unwrap();

    // coarse timestamps so many items tie on the ordering key; scheduled and
    // live rows carry a publish time that disagrees with their start
    let mut rng = StdRng::seed_from_u64(7);
    let mut evs: Vec<Event> = (0..137)
        .map(|i| {
            let at = t0() - Duration::minutes(rng.random_range(0..40));
            match i % 5 {
                1 => {
                    // announced long ago, airs later
                    let mut ev = event(Platform::YouTube, a.id, &format!("s{i}"), EventKind::Scheduled, at);
                    ev.start_at = Some(at + Duration::minutes(rng.random_range(0..30)));
                    ev.published_at = Some(at - Duration::hours(rng.random_range(1..48)));
                    ev
                }
                2 => {
                    // went live earlier than the row was published
                    let mut ev = event(Platform::Twitch, b.id, &format!("l{i}"), EventKind::Live, at);
                    ev.start_at = Some(at - Duration::minutes(rng.random_range(0..60)));
                    ev.published_at = Some(at + Duration::minutes(rng.random_range(1..20)));
                    ev
                }
                3 => event(Platform::Twitch, b.id, &format!("t{i}"), EventKind::Video, at),
                _ => event(Platform::YouTube, a.id, &format!("y{i}"), EventKind::Video, at),
            }
        })
        .collect();
    evs.shuffle(&mut rng);
    for ev in &evs {
        store.upsert_event(ev, t0()).unwrap();
    }

    let q = query(&store, &clock);
    let mut seen = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let page = q.list_timeline("u1", cursor.as_deref(), 10, None).unwrap();
        assert!(page.items.len() <= 10);
        seen.extend(page.items.into_iter().map(|i| i.event));
        if !page.has_more {
            assert!(page.next_cursor.is_none());
            break;
        }
        cursor = page.next_cursor;
        assert!(cursor.is_some());
    }

    assert_eq!(seen.len(), 137);
    let ids: HashSet<_> = seen.iter().map(|e| e.id).collect();
    assert_eq!(ids.len(), 137);
    for pair in seen.windows(2) {
        let (k0, k1) = (
            pair[0].event.ordering_key().unwrap(),
            pair[1].event.ordering_key().unwrap(),
        );
        assert!(k0 > k1 || (k0 == k1 && pair[0].id < pair[1].id));
    }
    // the data really mixes orders: publish time alone would sort differently
    assert!(seen.windows(2).any(|p| {
        p[0].event.published_at.unwrap() < p[1].event.published_at.unwrap()
    }));
}

#[test]
fn scope_is_enabled_subscriptions_only() {
    let store = store();
    let clock = clock_at(t0());
    let on = register(&store, Platform::YouTube, "UC_on");
    let off = register(&store, Platform::YouTube, "UC_off");
    let other = register(&store, Platform::YouTube, "UC_other");
    store.subscribe("u1", on.id, true, t0()).unwrap();
    store.subscribe("u1", off.id, false, t0()).unwrap();
    store.subscribe("u2", other.id, true, t0()).unwrap();

    for (src, id) in [(&on, "e-on"), (&off, "e-off"), (&other, "e-other")] {
        store
            .upsert_event(
                &event(Platform::YouTube, src.id, id, EventKind::Video, t0()),
                t0(),
            )
            .unwrap();
    }

    let page = query(&store, &clock).list_timeline("u1", None, 0, None).unwrap();
    let ids: Vec<_> = page.items.iter().map(|i| i.event.event.external_id.as_str()).collect();
    assert_eq!(ids, vec!["e-on"]);
    assert_eq!(page.items[0].source_name.as_deref(), Some("UC_on channel"));
    assert_eq!(
        page.items[0].source_thumbnail_url.as_deref(),
        Some("https://img.example/UC_on.png")
    );
}

#[test]
fn user_without_subscriptions_gets_an_empty_page() {
    let store = store();
    let clock = clock_at(t0());
    let page = query(&store, &clock).list_timeline("nobody", None, 20, None).unwrap();
    assert!(page.items.is_empty());
    assert!(!page.has_more);
    assert!(page.next_cursor.is_none());
}

#[test]
fn platform_filter_narrows_the_page() {
    let store = store();
    let clock = clock_at(t0());
    let yt = register(&store, Platform::YouTube, "UC_mix");
    let tw = register(&store, Platform::Twitch, "tw_mix");
    store.subscribe("u1", yt.id, true, t0()).unwrap();
    store.subscribe("u1", tw.id, true, t0()).unwrap();
    for i in 0..4 {
        let at = t0() - Duration::hours(i);
        store
            .upsert_event(&event(Platform::YouTube, yt.id, &format!("y{i}"), EventKind::Video, at), t0())
            .unwrap();
        store
            .upsert_event(&event(Platform::Twitch, tw.id, &format!("t{i}"), EventKind::Video, at), t0())
            .unwrap();
    }

    let page = query(&store, &clock)
        .list_timeline("u1", None, 50, Some(Platform::Twitch))
        .unwrap();
    assert_eq!(page.items.len(), 4);
    assert!(page
        .items
        .iter()
        .all(|i| i.event.event.platform == Platform::Twitch));
}

#[test]
fn limits_are_clamped() {
    let store = store();
    let clock = clock_at(t0());
    let src = register(&store, Platform::YouTube, "UC_many");
    store.subscribe("u1", src.id, true, t0()).unwrap();
    for i in 0..30 {
        store
            .upsert_event(
                &event(Platform::YouTube, src.id, &format!("v{i}"), EventKind::Video, t0() - Duration::minutes(i)),
                t0(),
            )
            .unwrap();
    }

    let q = query(&store, &clock).with_config(TimelineConfig {
        default_limit: 5,
        max_limit: 12,
    });
    assert_eq!(q.list_timeline("u1", None, 0, None).unwrap().items.len(), 5);
    assert_eq!(q.list_timeline("u1", None, -3, None).unwrap().items.len(), 5);
    let capped = q.list_timeline("u1", None, 1_000, None).unwrap();
    assert_eq!(capped.items.len(), 12);
    assert!(capped.has_more);
}

#[test]
fn bare_timestamp_cursor_means_strictly_older() {
    let store = store();
    let clock = clock_at(t0());
    let src = register(&store, Platform::YouTube, "UC_ts");
    store.subscribe("u1", src.id, true, t0()).unwrap();
    for i in 0..3 {
        store
            .upsert_event(
                &event(Platform::YouTube, src.id, &format!("v{i}"), EventKind::Video, t0() - Duration::hours(i)),
                t0(),
            )
            .unwrap();
    }

    let cursor = (t0() - Duration::hours(1)).to_rfc3339();
    let page = query(&store, &clock)
        .list_timeline("u1", Some(&cursor), 10, None)
        .unwrap();
    let ids: Vec<_> = page.items.iter().map(|i| i.event.event.external_id.as_str()).collect();
    assert_eq!(ids, vec!["v2"]);
}

#[test]
fn malformed_cursor_is_rejected() {
    let store = store();
    let clock = clock_at(t0());
    let src = register(&store, Platform::YouTube, "UC_bad");
    store.subscribe("u1", src.id, true, t0()).unwrap();
    let err = query(&store, &clock)
        .list_timeline("u1", Some("not-a-cursor"), 10, None)
        .unwrap_err();
    assert!(matches!(err, Error::Cursor(_)));
}

#[test]
fn live_flag_follows_the_clock() {
    let store = store();
    let clock = clock_at(t0());
    let src = register(&store, Platform::Twitch, "tw_live");
    store.subscribe("u1", src.id, true, t0()).unwrap();

    let mut live = event(Platform::Twitch, src.id, "now-live", EventKind::Live, t0() - Duration::minutes(30));
    live.end_at = Some(t0() + Duration::hours(1));
    store.upsert_event(&live, t0()).unwrap();

    let q = query(&store, &clock);
    let page = q.list_timeline("u1", None, 10, None).unwrap();
    assert!(page.items[0].is_live);

    clock.advance(Duration::hours(2));
    let page = q.list_timeline("u1", None, 10, None).unwrap();
    assert!(!page.items[0].is_live);
}
