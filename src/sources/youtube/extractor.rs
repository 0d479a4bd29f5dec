use std::time::Duration;

use serde_json::Value;

use crate::player::TrackData;

/// Audio itags in preference order.
/// 251 = Opus/WebM ~160 kbps, 250 = Opus/WebM ~70 kbps, 140 = AAC/m4a 128 kbps
pub const AUDIO_ITAG_PRIORITY: &[i64] = &[251, 250, 140];

/// 360p muxed mp4, carries audio on nearly every video.
pub const ITAG_FALLBACK: i64 = 18;

pub fn track_data(
    video_id: &str,
    title: String,
    duration: Duration,
    thumbnail: Option<String>,
) -> TrackData {
    TrackData {
        name: title,
        url: format!("https://youtu.be/{}", video_id),
        play_query: format!("youtube:{}", video_id),
        thumbnail: thumbnail.unwrap_or_else(|| default_thumbnail(video_id)),
        duration,
    }
}

pub fn default_thumbnail(video_id: &str) -> String {
    format!("https://i.ytimg.com/vi/{}/hqdefault.jpg", video_id)
}

/// Reads `videoDetails` from a `/player` response.
pub fn extract_from_player(body: &Value) -> Option<TrackData> {
    let details = body.get("videoDetails")?;
    let video_id = details.get("videoId")?.as_str()?;
    let title = details.get("title")?.as_str()?.to_string();

    let is_live = details
        .get("isLiveContent")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let length_seconds = details
        .get("lengthSeconds")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(0);

    let thumbnail = details
        .get("thumbnail")
        .and_then(|t| t.get("thumbnails"))
        .and_then(|arr| arr.as_array())
        .and_then(|arr| arr.last())
        .and_then(|thumb| thumb.get("url"))
        .and_then(|url| url.as_str())
        .map(|s| s.to_string());

    let duration = if is_live {
        Duration::ZERO
    } else {
        Duration::from_secs(length_seconds)
    };

    Some(track_data(video_id, title, duration, thumbnail))
}

/// `playabilityStatus.status` of a `/player` response.
pub fn playability(body: &Value) -> (&str, Option<&str>) {
    let status = body.get("playabilityStatus");
    (
        status
            .and_then(|p| p.get("status"))
            .and_then(|s| s.as_str())
            .unwrap_or("UNKNOWN"),
        status
            .and_then(|p| p.get("reason"))
            .and_then(|s| s.as_str()),
    )
}

/// Entries of a playlist `/browse` response. Unparseable entries are skipped.
pub fn extract_from_browse(body: &Value) -> Vec<TrackData> {
    let mut tracks = Vec::new();
    let Some(contents) = find_section_list(body)
        .and_then(|list| list.get("contents"))
        .and_then(|c| c.as_array())
    else {
        return tracks;
    };

    for section in contents {
        if let Some(list) = section
            .get("itemSectionRenderer")
            .and_then(|i| i.get("contents"))
            .and_then(|c| c.as_array())
            .and_then(|arr| arr.first())
            .and_then(|first| first.get("playlistVideoListRenderer"))
            .and_then(|p| p.get("contents"))
            .and_then(|c| c.as_array())
        {
            tracks.extend(list.iter().filter_map(extract_track));
        }
        if let Some(list) = section
            .get("musicShelfRenderer")
            .and_then(|s| s.get("contents"))
            .and_then(|c| c.as_array())
        {
            tracks.extend(list.iter().filter_map(extract_track));
        }
    }

    tracks
}

/// Video results of a `/search` response, in ranking order.
pub fn extract_from_search(body: &Value) -> Vec<TrackData> {
    let mut tracks = Vec::new();
    let Some(sections) = find_section_list(body)
        .and_then(|list| list.get("contents"))
        .and_then(|c| c.as_array())
    else {
        return tracks;
    };

    for section in sections {
        if let Some(items) = section
            .get("itemSectionRenderer")
            .and_then(|i| i.get("contents"))
            .and_then(|c| c.as_array())
        {
            tracks.extend(items.iter().filter_map(extract_track));
        }
    }

    tracks
}

pub fn find_section_list(value: &Value) -> Option<&Value> {
    if let Some(list) = value.get("sectionListRenderer") {
        return Some(list);
    }
    if let Some(contents) = value.get("contents") {
        if let Some(list) = find_section_list(contents) {
            return Some(list);
        }
    }
    if let Some(arr) = value.as_array() {
        if let Some(list) = arr.iter().find_map(find_section_list) {
            return Some(list);
        }
    }
    if let Some(list) = value
        .get("twoColumnBrowseResultsRenderer")
        .or_else(|| value.get("singleColumnBrowseResultsRenderer"))
        .and_then(find_section_list)
    {
        return Some(list);
    }
    if let Some(tabs) = value.get("tabs").and_then(|t| t.as_array()) {
        for tab in tabs {
            if let Some(content) = tab.get("tabRenderer").and_then(|tr| tr.get("content")) {
                if let Some(list) = find_section_list(content) {
                    return Some(list);
                }
            }
        }
    }
    value
        .get("twoColumnSearchResultsRenderer")
        .and_then(|t| t.get("primaryContents"))
        .and_then(find_section_list)
}

pub fn extract_track(item: &Value) -> Option<TrackData> {
    let renderer = item
        .get("videoRenderer")
        .or_else(|| item.get("compactVideoRenderer"))
        .or_else(|| item.get("playlistVideoRenderer"))
        .or_else(|| item.get("musicResponsiveListItemRenderer"))?;

    let video_id = renderer
        .get("videoId")
        .and_then(|v| v.as_str())
        .or_else(|| {
            renderer
                .get("playlistItemData")
                .and_then(|d| d.get("videoId"))
                .and_then(|v| v.as_str())
        })?;

    let title = get_text(renderer.get("title").or_else(|| {
        renderer
            .get("flexColumns")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("musicResponsiveListItemFlexColumnRenderer"))
            .and_then(|r| r.get("text"))
    })?)?;

    let duration = if is_live(renderer) {
        Duration::ZERO
    } else {
        renderer
            .get("lengthText")
            .and_then(get_text)
            .map(|s| parse_duration(&s))
            .or_else(|| {
                renderer
                    .get("lengthSeconds")
                    .and_then(|v| v.as_str())
                    .and_then(|s| s.parse().ok())
                    .map(Duration::from_secs)
            })
            .unwrap_or_default()
    };

    Some(track_data(video_id, title, duration, get_thumbnail(renderer)))
}

fn is_live(renderer: &Value) -> bool {
    renderer
        .get("isLive")
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
        || renderer
            .get("badges")
            .and_then(|b| b.as_array())
            .map(|arr| {
                arr.iter().any(|badge| {
                    badge
                        .get("metadataBadgeRenderer")
                        .and_then(|mbr| mbr.get("label"))
                        .and_then(|l| l.as_str())
                        == Some("LIVE")
                })
            })
            .unwrap_or(false)
}

fn get_text(obj: &Value) -> Option<String> {
    if let Some(s) = obj.as_str() {
        return Some(s.to_string());
    }
    if let Some(simple_text) = obj.get("simpleText").and_then(|v| v.as_str()) {
        return Some(simple_text.to_string());
    }
    obj.get("runs").and_then(|v| v.as_array()).map(|runs| {
        runs.iter()
            .filter_map(|run| run.get("text").and_then(|v| v.as_str()))
            .collect()
    })
}

/// `"1:02:03"` style length text.
pub fn parse_duration(s: &str) -> Duration {
    let seconds = s
        .split(':')
        .fold(0u64, |acc, part| acc * 60 + part.trim().parse::<u64>().unwrap_or(0));
    Duration::from_secs(seconds)
}

fn get_thumbnail(renderer: &Value) -> Option<String> {
    renderer
        .get("thumbnail")
        .and_then(|t| t.get("thumbnails"))
        .and_then(|arr| arr.as_array())
        .and_then(|arr| arr.last())
        .and_then(|thumb| thumb.get("url"))
        .and_then(|url| url.as_str())
        .map(|s| s.split('?').next().unwrap_or(s).to_string())
}

/// Picks the audio format to stream from a `/player` response's
/// `streamingData`.
pub fn select_best_audio_format(streaming_data: &Value) -> Option<&Value> {
    let all: Vec<&Value> = ["adaptiveFormats", "formats"]
        .iter()
        .filter_map(|key| streaming_data.get(*key).and_then(|v| v.as_array()))
        .flatten()
        .collect();

    for &target in AUDIO_ITAG_PRIORITY {
        if let Some(f) = all
            .iter()
            .copied()
            .find(|f| itag(f) == target && is_audio(f))
        {
            return Some(f);
        }
    }

    if let Some(f) = all.iter().copied().find(|f| itag(f) == ITAG_FALLBACK) {
        return Some(f);
    }

    all.into_iter()
        .filter(|f| is_audio(f))
        .max_by_key(|f| f.get("bitrate").and_then(|v| v.as_i64()).unwrap_or(0))
}

fn itag(format: &Value) -> i64 {
    format.get("itag").and_then(|v| v.as_i64()).unwrap_or(-1)
}

fn is_audio(format: &Value) -> bool {
    format
        .get("mimeType")
        .and_then(|v| v.as_str())
        .is_some_and(|m| m.starts_with("audio/"))
}
