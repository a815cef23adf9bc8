// tests/common/mod.rs
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;

use timeline_consolidator::clock::ManualClock;
use timeline_consolidator::ingest::types::{
    LiveRef, PlatformAdapter, QuotaCharge, RadioProgram, RawItem, SourceRef, TwitchStream,
    TwitchVideo, YouTubeVideo,
};
use timeline_consolidator::model::{Platform, Source, SourceDetails};
use timeline_consolidator::store::Store;

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
}

pub fn clock_at(t: DateTime<Utc>) -> Arc<ManualClock> {
    Arc::new(ManualClock::new(t))
}

pub fn store() -> Arc<Store> {
    Arc::new(Store::open_in_memory().unwrap())
}

pub fn register(store: &Store, platform: Platform, external_id: &str) -> Source {
    store
        .upsert_source(
            &SourceDetails {
                platform,
                external_id: external_id.to_string(),
                handle: Some(external_id.to_lowercase()),
                display_name: Some(format!("{external_id} channel")),
                thumbnail_url: Some(format!("https://img.example/{external_id}.png")),
                uploads_locator: None,
            },
            t0(),
        )
        .unwrap()
}

pub fn rfc3339(t: DateTime<Utc>) -> String {
    t.to_rfc3339()
}

pub fn yt_video(id: &str, published: DateTime<Utc>) -> RawItem {
    RawItem::YouTube(YouTubeVideo {
        video_id: id.to_string(),
        title: Some(format!("Video {id}")),
        published_at: Some(rfc3339(published)),
        live_broadcast_content: Some("none".into()),
        duration: Some("PT12M34S".into()),
        view_count: Some(10),
        ..Default::default()
    })
}

pub fn twitch_stream(id: &str, login: &str, started: DateTime<Utc>) -> RawItem {
    RawItem::TwitchStream(TwitchStream {
        id: id.to_string(),
        user_login: Some(login.to_string()),
        title: Some(format!("Stream {id}")),
        game_name: Some("Chess".into()),
        started_at: Some(rfc3339(started)),
        thumbnail_url: Some("https://static.example/{width}x{height}.jpg".into()),
        viewer_count: Some(99),
    })
}

pub fn twitch_vod(id: &str, created: DateTime<Utc>) -> RawItem {
    RawItem::TwitchVideo(TwitchVideo {
        id: id.to_string(),
        title: Some(format!("VOD {id}")),
        created_at: Some(rfc3339(created)),
        duration: Some("1h2m3s".into()),
        view_count: Some(5),
        ..Default::default()
    })
}

pub fn radio_program(id: &str, start: DateTime<Utc>) -> RawItem {
    RawItem::Radio(RadioProgram {
        id: id.to_string(),
        title: Some(format!("Program {id}")),
        start_time: Some(rfc3339(start)),
        end_time: Some(rfc3339(start + chrono::Duration::hours(1))),
        url: Some(format!("https://radio.example/{id}")),
        ..Default::default()
    })
}

/// Adapter whose answers are set per account by the test.
pub struct ScriptedAdapter {
    platform: Platform,
    items: Mutex<HashMap<String, Vec<RawItem>>>,
    failing: Mutex<HashSet<String>>,
    panicking: Mutex<HashSet<String>>,
    live: Mutex<HashMap<String, Vec<LiveRef>>>,
    live_failing: Mutex<HashSet<String>>,
    details: Mutex<HashMap<String, SourceDetails>>,
    liveness: bool,
    charge: Option<QuotaCharge>,
    delay: Option<std::time::Duration>,
    pub list_calls: AtomicUsize,
    pub live_calls: AtomicUsize,
    pub lookup_calls: AtomicUsize,
}

impl ScriptedAdapter {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            items: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            panicking: Mutex::new(HashSet::new()),
            live: Mutex::new(HashMap::new()),
            live_failing: Mutex::new(HashSet::new()),
            details: Mutex::new(HashMap::new()),
            liveness: false,
            charge: None,
            delay: None,
            list_calls: AtomicUsize::new(0),
            live_calls: AtomicUsize::new(0),
            lookup_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_liveness(mut self) -> Self {
        self.liveness = true;
        self
    }

    pub fn with_charge(mut self, endpoint: &'static str, cost: u32) -> Self {
        self.charge = Some(QuotaCharge { endpoint, cost });
        self
    }

    pub fn with_delay(mut self, d: std::time::Duration) -> Self {
        self.delay = Some(d);
        self
    }

    pub fn set_items(&self, account: &str, items: Vec<RawItem>) {
        self.items.lock().insert(account.to_string(), items);
    }

    pub fn fail(&self, account: &str) {
        self.failing.lock().insert(account.to_string());
    }

    pub fn panic_on(&self, account: &str) {
        self.panicking.lock().insert(account.to_string());
    }

    pub fn heal(&self, account: &str) {
        self.failing.lock().remove(account);
    }

    pub fn set_live(&self, account: &str, ids: &[&str]) {
        self.live
            .lock()
            .insert(account.to_string(), ids.iter().map(|s| s.to_string()).collect());
    }

    pub fn fail_live(&self, account: &str) {
        self.live_failing.lock().insert(account.to_string());
    }

    pub fn set_details(&self, d: SourceDetails) {
        self.details.lock().insert(d.external_id.clone(), d);
    }
}

#[async_trait]
impl PlatformAdapter for ScriptedAdapter {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn list_items_since(&self, source: &SourceRef, _since: DateTime<Utc>) -> Result<Vec<RawItem>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        let boom = self.panicking.lock().contains(&source.external_id);
        if boom {
            panic!("adapter bug while listing {}", source.external_id);
        }
        if self.failing.lock().contains(&source.external_id) {
            bail!("upstream 503 for {}", source.external_id);
        }
        Ok(self
            .items
            .lock()
            .get(&source.external_id)
            .cloned()
            .unwrap_or_default())
    }

    fn supports_liveness(&self) -> bool {
        self.liveness
    }

    async fn current_live_state(&self, account: &SourceRef) -> Result<Vec<LiveRef>> {
        self.live_calls.fetch_add(1, Ordering::SeqCst);
        if self.live_failing.lock().contains(&account.external_id) {
            bail!("liveness query failed for {}", account.external_id);
        }
        Ok(self
            .live
            .lock()
            .get(&account.external_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn lookup_source(&self, external_id: &str) -> Result<Option<SourceDetails>> {
        self.lookup_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.details.lock().get(external_id).cloned())
    }

    fn list_charge(&self) -> Option<QuotaCharge> {
        self.charge
    }

    fn liveness_charge(&self) -> Option<QuotaCharge> {
        self.charge
    }

    fn lookup_charge(&self) -> Option<QuotaCharge> {
        self.charge
    }
}
