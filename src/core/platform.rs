use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use url::Url;

pub const PLATFORM_MAPS_DIR: &str = ".state/platform_maps";

const RECENT_EVENT_CAP: usize = 300;
const SESSION_CAP: usize = 100;
const SELECTOR_CAP: usize = 200;
const ACTION_CAP: usize = 100;
const PATH_CAP: usize = 200;

/// Persistent per-platform memory: URL/selector/action frequencies plus the
/// skills and capture sessions that produced them. Feeds skill synthesis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformMap {
    pub platform_id: String,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default)]
    pub base_urls: Vec<String>,
    #[serde(default)]
    pub signals: Signals,
    #[serde(default)]
    pub recent_events: Vec<RecordedEvent>,
    #[serde(default)]
    pub skills: Vec<KnownSkill>,
    #[serde(default)]
    pub mimic_sessions: Vec<CaptureSession>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Signals {
    #[serde(default)]
    pub selectors: HashMap<String, u64>,
    #[serde(default)]
    pub actions: HashMap<String, u64>,
    #[serde(default)]
    pub paths: HashMap<String, u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordedEvent {
    #[serde(rename = "type", default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub ts: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnownSkill {
    pub id: String,
    pub source: String,
    pub captured_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureSession {
    pub captured_at: String,
    pub event_count: usize,
    pub skill_id: String,
    pub source: String,
}

fn safe_slug(value: &str) -> String {
    let mut slug = String::new();
    for ch in value.trim().chars() {
        if ch.is_alphanumeric() {
            slug.extend(ch.to_lowercase());
        } else {
            slug.push('_');
        }
    }
    while slug.contains("__") {
        slug = slug.replace("__", "_");
    }
    let slug = slug.trim_matches('_').to_string();
    if slug.is_empty() { "default".to_string() } else { slug }
}

fn map_path(platform_id: &str) -> PathBuf {
    PathBuf::from(PLATFORM_MAPS_DIR).join(format!("{}.json", safe_slug(platform_id)))
}

pub fn load_platform_map(platform_id: &str) -> PlatformMap {
    let path = map_path(platform_id);
    if let Ok(raw) = std::fs::read_to_string(&path)
        && let Ok(mut map) = serde_json::from_str::<PlatformMap>(&raw)
    {
        map.platform_id = platform_id.to_string();
        return map;
    }
    let now = Utc::now().to_rfc3339();
    PlatformMap {
        platform_id: platform_id.to_string(),
        created_at: now.clone(),
        updated_at: now,
        base_urls: Vec::new(),
        signals: Signals::default(),
        recent_events: Vec::new(),
        skills: Vec::new(),
        mimic_sessions: Vec::new(),
    }
}

pub fn save_platform_map(platform_id: &str, map: &mut PlatformMap) -> Result<PathBuf> {
    std::fs::create_dir_all(PLATFORM_MAPS_DIR)?;
    map.platform_id = platform_id.to_string();
    map.updated_at = Utc::now().to_rfc3339();
    let path = map_path(platform_id);
    std::fs::write(&path, serde_json::to_string_pretty(map)?)
        .with_context(|| format!("failed to write platform map {}", path.display()))?;
    Ok(path)
}

fn keep_top(counter: &mut HashMap<String, u64>, cap: usize) {
    if counter.len() <= cap {
        return;
    }
    let mut entries: Vec<(String, u64)> = counter.drain().collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    entries.truncate(cap);
    counter.extend(entries);
}

/// Fold a batch of interaction events into the map's frequency counters and
/// session history. Counters are capped so the map file stays bounded.
pub fn merge_platform_signals(
    map: &mut PlatformMap,
    base_url: &str,
    interaction_events: &[RecordedEvent],
    skill_id: &str,
    source: &str,
) {
    if !base_url.is_empty() && !map.base_urls.iter().any(|u| u == base_url) {
        map.base_urls.push(base_url.to_string());
    }

    for event in interaction_events {
        if let Some(event_type) = event.event_type.as_deref().map(str::trim)
            && !event_type.is_empty()
        {
            *map.signals.actions.entry(event_type.to_string()).or_insert(0) += 1;
        }
        if let Some(selector) = event.selector.as_deref().map(str::trim)
            && !selector.is_empty()
        {
            *map.signals.selectors.entry(selector.to_string()).or_insert(0) += 1;
        }
        if let Some(url) = event.url.as_deref().map(str::trim)
            && !url.is_empty()
            && let Ok(parsed) = Url::parse(url)
        {
            let mut path = parsed.path().to_string();
            if path.is_empty() {
                path = "/".to_string();
            }
            if let Some(query) = parsed.query() {
                path = format!("{}?{}", path, query);
            }
            *map.signals.paths.entry(path).or_insert(0) += 1;
        }
    }

    keep_top(&mut map.signals.selectors, SELECTOR_CAP);
    keep_top(&mut map.signals.actions, ACTION_CAP);
    keep_top(&mut map.signals.paths, PATH_CAP);

    if !skill_id.is_empty() && !map.skills.iter().any(|s| s.id == skill_id) {
        map.skills.push(KnownSkill {
            id: skill_id.to_string(),
            source: source.to_string(),
            captured_at: Utc::now().to_rfc3339(),
        });
    }

    map.recent_events.extend_from_slice(interaction_events);
    if map.recent_events.len() > RECENT_EVENT_CAP {
        let overflow = map.recent_events.len() - RECENT_EVENT_CAP;
        map.recent_events.drain(..overflow);
    }

    map.mimic_sessions.push(CaptureSession {
        captured_at: Utc::now().to_rfc3339(),
        event_count: interaction_events.len(),
        skill_id: skill_id.to_string(),
        source: source.to_string(),
    });
    if map.mimic_sessions.len() > SESSION_CAP {
        let overflow = map.mimic_sessions.len() - SESSION_CAP;
        map.mimic_sessions.drain(..overflow);
    }
}

fn top_n(counter: &HashMap<String, u64>, n: usize) -> Vec<(String, u64)> {
    let mut entries: Vec<(String, u64)> = counter
        .iter()
        .map(|(k, v)| (k.clone(), *v))
        .collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    entries.truncate(n);
    entries
}

/// Compact summary handed to the synthesis roles: the highest-signal URLs,
/// selectors, and actions plus the known skill ids.
pub fn platform_map_digest(map: &PlatformMap, top: usize) -> Value {
    let to_object = |entries: Vec<(String, u64)>| -> Value {
        let mut object = serde_json::Map::new();
        for (key, count) in entries {
            object.insert(key, json!(count));
        }
        Value::Object(object)
    };

    json!({
        "platform_id": map.platform_id,
        "base_urls": map.base_urls.iter().take(5).collect::<Vec<_>>(),
        "top_actions": to_object(top_n(&map.signals.actions, top)),
        "top_selectors": to_object(top_n(&map.signals.selectors, top)),
        "top_paths": to_object(top_n(&map.signals.paths, top)),
        "known_skills": map.skills.iter().map(|s| s.id.clone()).collect::<Vec<_>>(),
        "recent_event_count": map.recent_events.len(),
    })
}

/// Selectors ordered by observed frequency, highest first.
pub fn sorted_selectors(map: &PlatformMap) -> Vec<String> {
    top_n(&map.signals.selectors, usize::MAX)
        .into_iter()
        .map(|(selector, _)| selector)
        .collect()
}

/// Paths in no particular order; callers match on substrings.
pub fn known_paths(map: &PlatformMap) -> Vec<String> {
    map.signals.paths.keys().cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(event_type: &str, selector: &str, url: &str) -> RecordedEvent {
        RecordedEvent {
            event_type: Some(event_type.to_string()),
            selector: if selector.is_empty() {
                None
            } else {
                Some(selector.to_string())
            },
            url: if url.is_empty() {
                None
            } else {
                Some(url.to_string())
            },
            ..RecordedEvent::default()
        }
    }

    #[test]
    fn merge_counts_selectors_actions_and_paths() {
        let mut map = load_platform_map("test-platform-nonexistent");
        let events = vec![
            event("click", "#save", "https://x.example/desktop/sale/add?draft=1"),
            event("click", "#save", ""),
            event("fill", "#amount", ""),
        ];
        merge_platform_signals(&mut map, "https://x.example", &events, "skill.a", "test");

        assert_eq!(map.signals.selectors["#save"], 2);
        assert_eq!(map.signals.actions["click"], 2);
        assert_eq!(map.signals.actions["fill"], 1);
        assert_eq!(map.signals.paths["/desktop/sale/add?draft=1"], 1);
        assert_eq!(map.base_urls, vec!["https://x.example"]);
        assert_eq!(map.skills.len(), 1);
        assert_eq!(map.mimic_sessions.len(), 1);
    }

    #[test]
    fn merge_caps_recent_events() {
        let mut map = load_platform_map("test-platform-cap");
        let events: Vec<RecordedEvent> =
            (0..350).map(|i| event("click", &format!("#b{}", i), "")).collect();
        merge_platform_signals(&mut map, "", &events, "", "test");
        assert_eq!(map.recent_events.len(), 300);
    }

    #[test]
    fn digest_orders_by_frequency() {
        let mut map = load_platform_map("test-platform-digest");
        let mut events = vec![event("click", "#rare", "")];
        for _ in 0..5 {
            events.push(event("click", "#common", ""));
        }
        merge_platform_signals(&mut map, "", &events, "", "test");

        let digest = platform_map_digest(&map, 1);
        let selectors = digest["top_selectors"].as_object().unwrap();
        assert_eq!(selectors.len(), 1);
        assert!(selectors.contains_key("#common"));
        assert_eq!(sorted_selectors(&map)[0], "#common");
    }

    #[test]
    fn slug_is_filesystem_safe() {
        assert_eq!(safe_slug("My Platform / EU!"), "my_platform_eu");
        assert_eq!(safe_slug("***"), "default");
    }
}
