//! Achievement file classification
//!
//! Decides from a path alone whether a file carries achievement status, which
//! parser reads it, and which appId it belongs to when nothing else says so.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// File names (suffixes) that mark a file as achievement status
pub const ACHIEVEMENT_FILE_SUFFIXES: [&str; 3] = ["achievements.json", "achievements.ini", "stats.bin"];

/// On-disk layout of an achievement status file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusFormat {
    /// JSON object of `apiName -> { earned, earned_time }`
    Structured,
    /// Repeated `[apiName]` blocks with `HaveAchieved` / `HaveAchievedTime`
    KeyValueBlock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub format: StatusFormat,
    /// Parsed from the parent directory name, if it is numeric
    pub app_id: Option<u64>,
}

/// Whether a file name matches one of the recognised achievement files
pub fn is_achievement_file_name(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    ACHIEVEMENT_FILE_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
}

/// Format from the file extension; `None` for unsupported files
pub fn format_for(path: &Path) -> Option<StatusFormat> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "json" => Some(StatusFormat::Structured),
        "ini" | "txt" => Some(StatusFormat::KeyValueBlock),
        _ => None,
    }
}

/// AppId from the immediate parent directory name
pub fn app_id_from_parent(path: &Path) -> Option<u64> {
    path.parent()?.file_name()?.to_str()?.trim().parse().ok()
}

/// Classify a path. Returns `None` when the format is unsupported.
pub fn classify(path: &Path) -> Option<Classification> {
    let format = format_for(path)?;
    Some(Classification {
        format,
        app_id: app_id_from_parent(path),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn recognises_known_names_case_insensitively() {
        assert!(is_achievement_file_name("achievements.json"));
        assert!(is_achievement_file_name("Achievements.INI"));
        assert!(is_achievement_file_name("stats.bin"));
        assert!(is_achievement_file_name("user_achievements.json"));
        assert!(!is_achievement_file_name("settings.json"));
        assert!(!is_achievement_file_name("achievements.json.bak"));
    }

    #[test]
    fn classifies_by_extension_and_parent() {
        let c = classify(Path::new("/saves/480/achievements.json")).unwrap();
        assert_eq!(c.format, StatusFormat::Structured);
        assert_eq!(c.app_id, Some(480));

        let c = classify(Path::new("/saves/730/achievements.ini")).unwrap();
        assert_eq!(c.format, StatusFormat::KeyValueBlock);
        assert_eq!(c.app_id, Some(730));

        let c = classify(Path::new("/saves/730/notes.TXT")).unwrap();
        assert_eq!(c.format, StatusFormat::KeyValueBlock);
    }

    #[test]
    fn binary_files_are_unsupported() {
        assert!(classify(Path::new("/saves/480/stats.bin")).is_none());
        assert!(classify(Path::new("/saves/480/achievements")).is_none());
    }

    #[test]
    fn non_numeric_parent_has_no_app_id() {
        let c = classify(Path::new("/saves/Spacewar/achievements.json")).unwrap();
        assert_eq!(c.app_id, None);
        assert!(classify(Path::new("achievements.json")).unwrap().app_id.is_none());
    }

    #[test]
    fn classification_is_deterministic() {
        let path = PathBuf::from("/games/steam_settings/1245620/achievements.json");
        let first = classify(&path);
        for _ in 0..5 {
            assert_eq!(classify(&path), first);
        }
    }
}
