//! Merging fresh unlock state into a known game
//!
//! Both entry points return exactly the achievements that went from locked to
//! unlocked during the call. Unlock is never reverted, so repeating a call
//! with the same (or a superset) input reports nothing the second time.

use std::collections::HashMap;

use crate::models::{Achievement, Game, UnlockStatusMap};

/// Identity of an achievement inside its game
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AchievementKey {
    /// Stable platform identifier
    Api(String),
    /// Display name for sources without an `apiName`. `occurrence` counts
    /// earlier achievements with the same name so duplicates stay distinct.
    Name { name: String, occurrence: usize },
}

/// Identity keys for a list, in list order
pub fn identity_keys(achievements: &[Achievement]) -> Vec<AchievementKey> {
    let mut seen_names: HashMap<&str, usize> = HashMap::new();
    achievements
        .iter()
        .map(|ach| {
            if !ach.api_name.is_empty() {
                return AchievementKey::Api(ach.api_name.clone());
            }
            let count = seen_names.entry(ach.name.as_str()).or_insert(0);
            let key = AchievementKey::Name { name: ach.name.clone(), occurrence: *count };
            *count += 1;
            key
        })
        .collect()
}

/// Apply a parsed status map. Only achievements already on the game are
/// touched; map entries without a matching `apiName` are ignored.
pub fn merge_status(game: &mut Game, status: &UnlockStatusMap) -> Vec<Achievement> {
    let mut newly_unlocked = Vec::new();

    // Scraped achievements may have no apiName; status files cannot name them
    for ach in game.achievements.iter_mut().filter(|a| !a.api_name.is_empty()) {
        let Some(entry) = status.get(&ach.api_name) else {
            continue;
        };
        if entry.unlocked && !ach.unlocked {
            ach.unlock(entry.unlock_time);
            newly_unlocked.push(ach.clone());
        }
    }

    newly_unlocked
}

/// Apply a freshly fetched achievement list. Unknown achievements are
/// appended as-is and not reported; known ones that flip to unlocked are.
pub fn merge_fetched_list(game: &mut Game, fetched: &[Achievement]) -> Vec<Achievement> {
    let mut index: HashMap<AchievementKey, usize> = HashMap::new();
    for (i, key) in identity_keys(&game.achievements).into_iter().enumerate() {
        index.entry(key).or_insert(i);
    }

    let mut newly_unlocked = Vec::new();

    for (key, incoming) in identity_keys(fetched).into_iter().zip(fetched) {
        match index.get(&key).copied() {
            Some(i) => {
                let existing = &mut game.achievements[i];
                if incoming.progress.is_some() && !existing.unlocked {
                    existing.progress = incoming.progress;
                }
                if incoming.unlocked && !existing.unlocked {
                    existing.unlocked = true;
                    existing.unlock_time = incoming.unlock_time;
                    if let Some(progress) = existing.progress.as_mut() {
                        progress.current = progress.max;
                    }
                    newly_unlocked.push(existing.clone());
                }
            }
            None => {
                let mut added = incoming.clone();
                if !added.unlocked {
                    added.unlock_time = None;
                }
                added.derive_difficulty();
                index.insert(key, game.achievements.len());
                game.achievements.push(added);
            }
        }
    }

    newly_unlocked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Platform, UnlockStatus};

    fn game_with(achievements: Vec<Achievement>) -> Game {
        let mut game = Game::new(480, Platform::Steam, "Spacewar");
        game.achievements = achievements;
        game
    }

    fn unlocked(mut ach: Achievement, ts: i64) -> Achievement {
        ach.unlock(ts);
        ach
    }

    #[test]
    fn status_merge_skips_achievements_without_api_name() {
        let mut game = game_with(vec![Achievement::new(1, "", "Scraped"), Achievement::new(2, "ach_b", "B")]);
        let status = crate::status::parse_structured(
            r#"{"": {"earned": true, "earned_time": 1000}, "ach_b": {"earned": true, "earned_time": 2000}}"#,
        );

        let unlocked = merge_status(&mut game, &status);
        assert_eq!(unlocked.len(), 1);
        assert_eq!(unlocked[0].api_name, "ach_b");
        assert!(!game.achievements[0].unlocked);
    }

    #[test]
    fn status_merge_reports_once() {
        let mut game = game_with(vec![Achievement::new(1, "ach_a", "A")]);
        let status = crate::status::parse_structured(r#"{"ach_a": {"earned": true, "earned_time": 1000}}"#);

        let first = merge_status(&mut game, &status);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].api_name, "ach_a");
        assert_eq!(first[0].unlock_time.map(|t| t.timestamp()), Some(1000));

        let second = merge_status(&mut game, &status);
        assert!(second.is_empty());
        assert!(game.achievements[0].unlocked);
    }

    #[test]
    fn status_merge_never_relocks() {
        let mut game = game_with(vec![unlocked(Achievement::new(1, "ach_a", "A"), 10)]);
        let mut status = UnlockStatusMap::new();
        status.insert("ach_a".into(), UnlockStatus { unlocked: false, unlock_time: 0 });

        assert!(merge_status(&mut game, &status).is_empty());
        assert!(game.achievements[0].unlocked);
        assert_eq!(game.achievements[0].unlock_time.map(|t| t.timestamp()), Some(10));
    }

    #[test]
    fn status_merge_ignores_unknown_and_absent_keys() {
        let mut game = game_with(vec![
            Achievement::new(1, "ach_a", "A"),
            unlocked(Achievement::new(2, "ach_b", "B"), 5),
        ]);
        let mut status = UnlockStatusMap::new();
        status.insert("not_on_game".into(), UnlockStatus { unlocked: true, unlock_time: 1 });

        assert!(merge_status(&mut game, &status).is_empty());
        assert_eq!(game.achievements.len(), 2);
        assert!(!game.achievements[0].unlocked);
        assert!(game.achievements[1].unlocked);
    }

    #[test]
    fn growing_inputs_report_each_unlock_once() {
        let mut game = game_with(vec![
            Achievement::new(1, "a", "A"),
            Achievement::new(2, "b", "B"),
            Achievement::new(3, "c", "C"),
        ]);
        let mut status = UnlockStatusMap::new();
        let mut reported = Vec::new();

        for (name, ts) in [("a", 1), ("b", 2), ("c", 3)] {
            status.insert(name.into(), UnlockStatus { unlocked: true, unlock_time: ts });
            reported.extend(merge_status(&mut game, &status).into_iter().map(|a| a.api_name));
            reported.extend(merge_status(&mut game, &status).into_iter().map(|a| a.api_name));
        }

        assert_eq!(reported, vec!["a", "b", "c"]);
        assert_eq!(game.unlocked_count(), 3);
    }

    #[test]
    fn fetched_list_appends_new_without_reporting() {
        let mut game = game_with(vec![Achievement::new(1, "a", "A")]);
        let fetched = vec![
            Achievement::new(1, "a", "A"),
            unlocked(Achievement::new(2, "b", "B"), 50),
        ];

        let delta = merge_fetched_list(&mut game, &fetched);
        assert!(delta.is_empty());
        assert_eq!(game.achievements.len(), 2);
        assert!(game.achievements[1].unlocked);
    }

    #[test]
    fn fetched_list_reports_flip_once() {
        let mut game = game_with(vec![Achievement::new(1, "a", "A")]);
        let fetched = vec![unlocked(Achievement::new(1, "a", "A"), 77)];

        let delta = merge_fetched_list(&mut game, &fetched);
        assert_eq!(delta.len(), 1);
        assert_eq!(delta[0].unlock_time.map(|t| t.timestamp()), Some(77));
        assert!(merge_fetched_list(&mut game, &fetched).is_empty());

        let relocked = vec![Achievement::new(1, "a", "A")];
        assert!(merge_fetched_list(&mut game, &relocked).is_empty());
        assert!(game.achievements[0].unlocked);
    }

    #[test]
    fn fetched_list_falls_back_to_name_identity() {
        let mut game = game_with(vec![Achievement::new(1, "", "First Blood"), Achievement::new(2, "", "Survivor")]);
        let fetched = vec![
            Achievement::new(1, "", "First Blood"),
            unlocked(Achievement::new(2, "", "Survivor"), 9),
        ];

        let delta = merge_fetched_list(&mut game, &fetched);
        assert_eq!(delta.len(), 1);
        assert_eq!(delta[0].name, "Survivor");
        assert_eq!(game.achievements.len(), 2);
    }

    #[test]
    fn duplicate_names_stay_distinct() {
        let mut game = game_with(vec![Achievement::new(1, "", "Secret"), Achievement::new(2, "", "Secret")]);
        let fetched = vec![
            Achievement::new(1, "", "Secret"),
            unlocked(Achievement::new(2, "", "Secret"), 3),
        ];

        let delta = merge_fetched_list(&mut game, &fetched);
        assert_eq!(delta.len(), 1);
        assert_eq!(delta[0].id, 2);
        assert!(!game.achievements[0].unlocked);
        assert!(game.achievements[1].unlocked);
        assert_eq!(game.achievements.len(), 2);
    }

    #[test]
    fn identity_keys_count_name_occurrences() {
        let keys = identity_keys(&[
            Achievement::new(1, "api", "Same"),
            Achievement::new(2, "", "Same"),
            Achievement::new(3, "", "Same"),
        ]);
        assert_eq!(keys[0], AchievementKey::Api("api".into()));
        assert_eq!(keys[1], AchievementKey::Name { name: "Same".into(), occurrence: 0 });
        assert_eq!(keys[2], AchievementKey::Name { name: "Same".into(), occurrence: 1 });
    }
}
