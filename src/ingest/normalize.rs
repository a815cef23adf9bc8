// src/ingest/normalize.rs
//! Raw platform items → canonical [`Event`].
//!
//! Pure functions only. Absent optional fields stay `None`; a missing
//! identity, title or timestamp rejects the single item with a
//! [`NormalizeError`] and never affects its siblings.

use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use regex::Regex;
use sha2::{Digest, Sha256};
use time::{format_description::well_known::Rfc2822, OffsetDateTime};

use crate::error::NormalizeError;
use crate::ingest::types::{
    PodcastEpisode, RadioProgram, RawItem, SourceRef, TwitchStream, TwitchVideo, YouTubeVideo,
};
use crate::model::{
    Event, EventKind, EventMetrics, MediaDuration, Platform, TwitchMetrics, YouTubeMetrics,
};

const THUMB_WIDTH: &str = "640";
const THUMB_HEIGHT: &str = "360";
const TEXT_CAP: usize = 5_000;

/// Map one raw item owned by `source` into an event.
pub fn normalize(source: &SourceRef, item: RawItem) -> Result<Event, NormalizeError> {
    let ev = match item {
        RawItem::YouTube(v) => youtube_video(source, v)?,
        RawItem::TwitchStream(s) => twitch_stream(source, s)?,
        RawItem::TwitchVideo(v) => twitch_video(source, v)?,
        RawItem::Podcast(e) => podcast_episode(source, e)?,
        RawItem::Radio(p) => radio_program(source, p)?,
    };
    ev.validate()?;
    Ok(ev)
}

fn youtube_video(source: &SourceRef, v: YouTubeVideo) -> Result<Event, NormalizeError> {
    let id = required_id(&v.video_id, "video_id")?;
    let title = clean_opt(v.title.as_deref()).ok_or(NormalizeError::MissingField("title"))?;

    let kind = match v.live_broadcast_content.as_deref().map(str::trim) {
        Some("live") => EventKind::Live,
        Some("upcoming") => EventKind::Scheduled,
        _ => EventKind::Video,
    };
    let start_at = match kind {
        EventKind::Scheduled => lenient_ts("scheduled_start_time", v.scheduled_start_time.as_deref()),
        _ => lenient_ts("actual_start_time", v.actual_start_time.as_deref()),
    };
    // only a finished broadcast carries an end
    let end_at = match kind {
        EventKind::Video => lenient_ts("actual_end_time", v.actual_end_time.as_deref())
            .filter(|end| start_at.map_or(true, |s| *end >= s)),
        _ => None,
    };

    let metrics = EventMetrics::YouTube(YouTubeMetrics {
        views: v.view_count,
        likes: v.like_count,
        comments: v.comment_count,
    });

    Ok(Event {
        platform: Platform::YouTube,
        source_id: source.source_id,
        url: format!("https://www.youtube.com/watch?v={id}"),
        external_id: id,
        kind,
        title,
        description: clean_opt(v.description.as_deref()),
        start_at,
        end_at,
        published_at: opt_ts("published_at", v.published_at.as_deref())?,
        image_url: non_empty(v.thumbnail_url),
        duration: v.duration.as_deref().and_then(parse_iso8601_duration),
        metrics: (!metrics.is_empty()).then_some(metrics),
    })
}

fn twitch_stream(source: &SourceRef, s: TwitchStream) -> Result<Event, NormalizeError> {
    let id = required_id(&s.id, "id")?;
    let title = clean_opt(s.title.as_deref()).ok_or(NormalizeError::MissingField("title"))?;
    let login = non_empty(s.user_login).ok_or(NormalizeError::MissingField("user_login"))?;
    let started = opt_ts("started_at", s.started_at.as_deref())?;

    Ok(Event {
        platform: Platform::Twitch,
        source_id: source.source_id,
        external_id: id,
        kind: EventKind::Live,
        title,
        description: clean_opt(s.game_name.as_deref()),
        start_at: started,
        end_at: None,
        published_at: started,
        url: format!("https://www.twitch.tv/{login}"),
        image_url: non_empty(s.thumbnail_url).map(|u| fill_thumbnail_template(&u)),
        duration: None,
        metrics: s.viewer_count.map(|n| {
            EventMetrics::Twitch(TwitchMetrics {
                views: None,
                viewers: Some(n),
            })
        }),
    })
}

fn twitch_video(source: &SourceRef, v: TwitchVideo) -> Result<Event, NormalizeError> {
    let id = required_id(&v.id, "id")?;
    let title = clean_opt(v.title.as_deref()).ok_or(NormalizeError::MissingField("title"))?;

    Ok(Event {
        platform: Platform::Twitch,
        source_id: source.source_id,
        url: non_empty(v.url).unwrap_or_else(|| format!("https://www.twitch.tv/videos/{id}")),
        external_id: id,
        kind: EventKind::Video,
        title,
        description: clean_opt(v.description.as_deref()),
        start_at: None,
        end_at: None,
        published_at: opt_ts("created_at", v.created_at.as_deref())?,
        image_url: non_empty(v.thumbnail_url).map(|u| fill_thumbnail_template(&u)),
        duration: v.duration.as_deref().and_then(parse_twitch_duration),
        metrics: v.view_count.map(|n| {
            EventMetrics::Twitch(TwitchMetrics {
                views: Some(n),
                viewers: None,
            })
        }),
    })
}

fn podcast_episode(source: &SourceRef, e: PodcastEpisode) -> Result<Event, NormalizeError> {
    let title = clean_opt(e.title.as_deref()).ok_or(NormalizeError::MissingField("title"))?;
    let link = non_empty(e.link);
    let enclosure = non_empty(e.enclosure_url);

    let id = match non_empty(e.guid) {
        Some(g) => g,
        None => derive_item_id(&[
            link.as_deref().unwrap_or_default(),
            enclosure.as_deref().unwrap_or_default(),
            &title,
        ]),
    };
    let url = link
        .or(enclosure)
        .or_else(|| source.locator.clone())
        .ok_or(NormalizeError::MissingField("link"))?;

    Ok(Event {
        platform: Platform::Podcast,
        source_id: source.source_id,
        external_id: id,
        kind: EventKind::Episode,
        title,
        description: clean_opt(e.description.as_deref()),
        start_at: None,
        end_at: None,
        published_at: opt_ts("pub_date", e.pub_date.as_deref())?,
        url,
        image_url: non_empty(e.image_url),
        duration: e.duration.as_deref().and_then(parse_clock_duration),
        metrics: None,
    })
}

fn radio_program(source: &SourceRef, p: RadioProgram) -> Result<Event, NormalizeError> {
    let id = required_id(&p.id, "id")?;
    let title = clean_opt(p.title.as_deref()).ok_or(NormalizeError::MissingField("title"))?;
    let start = opt_ts("start_time", p.start_time.as_deref())?;
    let end = lenient_ts("end_time", p.end_time.as_deref());

    let slot_secs = match (start, end) {
        (Some(s), Some(e)) if e > s => u64::try_from((e - s).num_seconds()).ok(),
        _ => None,
    };
    let duration = p
        .duration_secs
        .or(slot_secs)
        .filter(|s| *s > 0)
        .map(MediaDuration::from_secs);

    let url = non_empty(p.url)
        .or_else(|| source.locator.clone())
        .ok_or(NormalizeError::MissingField("url"))?;

    Ok(Event {
        platform: Platform::Radio,
        source_id: source.source_id,
        external_id: id,
        kind: EventKind::Radio,
        title,
        description: clean_opt(p.description.as_deref()),
        start_at: start,
        end_at: end,
        published_at: start,
        url,
        image_url: non_empty(p.image_url),
        duration,
        metrics: None,
    })
}

// ---------------------------------------------------------------------------
// Text
// ---------------------------------------------------------------------------

/// Decode entities, strip tags, ASCII-fold typographic quotes, collapse
/// whitespace. Long text is capped.
pub fn normalize_text(s: &str) -> String {
    let mut out = html_escape::decode_html_entities(s).to_string();

    static RE_TAGS: OnceCell<Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| Regex::new(r"(?is)<br\s*/?>|</p>|</?[^>]+>").unwrap());
    out = re_tags
        .replace_all(&out, |caps: &regex::Captures| {
            let tag = caps[0].to_ascii_lowercase();
            if tag.starts_with("<br") || tag == "</p>" {
                " "
            } else {
                ""
            }
        })
        .to_string();

    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    static RE_WS: OnceCell<Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").trim().to_string();

    if out.chars().count() > TEXT_CAP {
        out = out.chars().take(TEXT_CAP).collect();
    }
    out
}

fn clean_opt(s: Option<&str>) -> Option<String> {
    s.map(normalize_text).filter(|t| !t.is_empty())
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn required_id(id: &str, field: &'static str) -> Result<String, NormalizeError> {
    let id = id.trim();
    if id.is_empty() {
        Err(NormalizeError::MissingField(field))
    } else {
        Ok(id.to_string())
    }
}

/// Stable id for feed items that carry no GUID.
pub fn derive_item_id(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for p in parts {
        hasher.update(p.trim().as_bytes());
        hasher.update([0x1f]);
    }
    let digest = hasher.finalize();
    let mut out = String::with_capacity(7 + 32);
    out.push_str("sha256:");
    for b in digest.iter().take(16) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// Fill `{width}`/`{height}` and `%{width}`/`%{height}` placeholders.
pub fn fill_thumbnail_template(url: &str) -> String {
    url.replace("%{width}", THUMB_WIDTH)
        .replace("%{height}", THUMB_HEIGHT)
        .replace("{width}", THUMB_WIDTH)
        .replace("{height}", THUMB_HEIGHT)
}

// ---------------------------------------------------------------------------
// Timestamps
// ---------------------------------------------------------------------------

/// RFC3339 first, then RFC2822 (RSS `pubDate`).
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let v = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(v) {
        return Some(dt.with_timezone(&Utc));
    }
    // obsolete zone names are common in feeds
    let v = match v.strip_suffix(" GMT").or_else(|| v.strip_suffix(" UT")) {
        Some(head) => format!("{head} +0000"),
        None => v.to_string(),
    };
    OffsetDateTime::parse(&v, &Rfc2822)
        .ok()
        .and_then(|dt| DateTime::<Utc>::from_timestamp(dt.unix_timestamp(), dt.nanosecond()))
}

fn opt_ts(field: &'static str, value: Option<&str>) -> Result<Option<DateTime<Utc>>, NormalizeError> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(v) => parse_timestamp(v)
            .map(Some)
            .ok_or_else(|| NormalizeError::InvalidTimestamp {
                field,
                value: v.to_string(),
            }),
    }
}

/// Secondary timestamps: unparseable values degrade to unset.
fn lenient_ts(field: &'static str, value: Option<&str>) -> Option<DateTime<Utc>> {
    match opt_ts(field, value) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!(target: "ingest", error = %e, "ignoring secondary timestamp");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Durations
// ---------------------------------------------------------------------------

/// ISO-8601 duration (`PT1H2M3S`, `P1DT2H`, `PT45S`). Zero-length → `None`.
pub fn parse_iso8601_duration(s: &str) -> Option<MediaDuration> {
    static RE: OnceCell<Regex> = OnceCell::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"^P(?:(\d+)D)?(?:T(?:(\d+)H)?(?:(\d+)M)?(?:(\d+)S)?)?$").unwrap()
    });
    let s = s.trim();
    if s == "P" || s.ends_with('T') {
        return None;
    }
    let caps = re.captures(s)?;
    let n = |i: usize| -> u64 {
        caps.get(i)
            .and_then(|m| m.as_str().parse::<u64>().ok())
            .unwrap_or(0)
    };
    let secs = weighted_secs(&[(n(1), 86_400), (n(2), 3600), (n(3), 60), (n(4), 1)])?;
    (secs > 0).then(|| MediaDuration::from_secs(secs))
}

/// Twitch VOD duration (`3h8m33s`, `45m`, `12s`).
pub fn parse_twitch_duration(s: &str) -> Option<MediaDuration> {
    static RE: OnceCell<Regex> = OnceCell::new();
    let re = RE.get_or_init(|| Regex::new(r"^(?:(\d+)h)?(?:(\d+)m)?(?:(\d+)s)?$").unwrap());
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    let caps = re.captures(s)?;
    let n = |i: usize| -> u64 {
        caps.get(i)
            .and_then(|m| m.as_str().parse::<u64>().ok())
            .unwrap_or(0)
    };
    let secs = weighted_secs(&[(n(1), 3600), (n(2), 60), (n(3), 1)])?;
    (secs > 0).then(|| MediaDuration::from_secs(secs))
}

/// `itunes:duration` style: plain seconds, `MM:SS` or `HH:MM:SS`.
pub fn parse_clock_duration(s: &str) -> Option<MediaDuration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    let parts: Vec<&str> = s.split(':').collect();
    let mut nums = Vec::with_capacity(parts.len());
    for p in &parts {
        nums.push(p.trim().parse::<u64>().ok()?);
    }
    let secs = match nums.as_slice() {
        [s] => *s,
        [m, s] => weighted_secs(&[(*m, 60), (*s, 1)])?,
        [h, m, s] => weighted_secs(&[(*h, 3600), (*m, 60), (*s, 1)])?,
        _ => return None,
    };
    (secs > 0).then(|| MediaDuration::from_secs(secs))
}

/// Sum of `count * unit` terms; `None` on overflow.
fn weighted_secs(terms: &[(u64, u64)]) -> Option<u64> {
    terms.iter().try_fold(0u64, |acc, &(count, unit)| {
        count.checked_mul(unit).and_then(|v| acc.checked_add(v))
    })
}
