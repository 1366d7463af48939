//! Achievement status parsers
//!
//! Both parsers are total: empty, truncated, or garbage input yields an empty
//! (or partial) map, never an error.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

use crate::classify::StatusFormat;
use crate::models::{UnlockStatus, UnlockStatusMap};

const KEY_ACHIEVED: &str = "HaveAchieved";
const KEY_ACHIEVED_TIME: &str = "HaveAchievedTime";

fn header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*\[([^\[\]]+)\]\s*$").expect("valid header regex"))
}

fn entry_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*([A-Za-z_][A-Za-z0-9_]*)\s*=\s*(.*?)\s*$").expect("valid entry regex"))
}

/// Parse file content of a known format
pub fn parse(format: StatusFormat, content: &str) -> UnlockStatusMap {
    match format {
        StatusFormat::Structured => parse_structured(content),
        StatusFormat::KeyValueBlock => parse_key_value_blocks(content),
    }
}

/// Parse `{"apiName": {"earned": bool, "earned_time": int}, ...}`
pub fn parse_structured(content: &str) -> UnlockStatusMap {
    let mut map = UnlockStatusMap::new();
    let content = content.trim_start_matches('\u{feff}');

    let root: Value = match serde_json::from_str(content) {
        Ok(v) => v,
        Err(_) => return map,
    };
    let Some(entries) = root.as_object() else {
        return map;
    };

    for (api_name, entry) in entries {
        let Some(unlocked) = entry.get("earned").and_then(as_flag) else {
            continue;
        };
        let unlock_time = entry.get("earned_time").and_then(as_epoch).unwrap_or(0);
        map.insert(api_name.clone(), UnlockStatus { unlocked, unlock_time });
    }

    map
}

fn as_flag(v: &Value) -> Option<bool> {
    match v {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|n| n != 0),
        _ => None,
    }
}

fn as_epoch(v: &Value) -> Option<i64> {
    v.as_i64()
        .or_else(|| v.as_f64().map(|f| f as i64))
        .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
}

/// Parse repeated `[apiName]` blocks. Each block is validated on its own;
/// a malformed block is dropped without affecting its neighbours.
pub fn parse_key_value_blocks(content: &str) -> UnlockStatusMap {
    let mut map = UnlockStatusMap::new();
    let content = content.trim_start_matches('\u{feff}');

    let mut current: Option<(&str, Vec<&str>)> = None;
    for line in content.lines() {
        if let Some(caps) = header_re().captures(line) {
            if let Some((name, body)) = current.take() {
                insert_block(&mut map, name, &body);
            }
            let name = caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
            current = Some((name, Vec::new()));
        } else if let Some((_, body)) = current.as_mut() {
            body.push(line);
        }
    }
    if let Some((name, body)) = current.take() {
        insert_block(&mut map, name, &body);
    }

    map
}

fn insert_block(map: &mut UnlockStatusMap, name: &str, body: &[&str]) {
    if name.is_empty() {
        return;
    }
    if let Some(status) = parse_block(body) {
        map.insert(name.to_string(), status);
    }
}

/// Validate one block body: it must hold `HaveAchieved=<0|1>` and
/// `HaveAchievedTime=<int>` in any order. Other keys are ignored.
pub fn parse_block(lines: &[&str]) -> Option<UnlockStatus> {
    let mut unlocked = None;
    let mut unlock_time = None;

    for line in lines {
        let Some(caps) = entry_re().captures(line) else {
            continue;
        };
        let value = &caps[2];
        match &caps[1] {
            KEY_ACHIEVED => {
                unlocked = match value {
                    "0" => Some(false),
                    "1" => Some(true),
                    _ => return None,
                };
            }
            KEY_ACHIEVED_TIME => {
                unlock_time = Some(value.parse::<i64>().ok()?);
            }
            _ => {}
        }
    }

    Some(UnlockStatus {
        unlocked: unlocked?,
        unlock_time: unlock_time?,
    })
}
