//! Property-based testing for savesync
//!
//! Uses proptest to verify the naming and similarity invariants that
//! identity matching and save pairing rely on.

use ::savesync::naming;
use ::savesync::planner;
use ::savesync::{LocalRomFile, LocalSave, RemoteSave, SyncAction};
use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use std::path::PathBuf;

/// Plausible ROM titles: words, digits, punctuation and region tags
fn title_strategy() -> impl Strategy<Value = String> {
    (
        prop::collection::vec("[A-Za-z0-9]{1,8}", 1..5),
        prop::option::of(prop_oneof![
            Just(" (USA)".to_string()),
            Just(" (Europe) (Rev 1)".to_string()),
            Just(" [!]".to_string()),
        ]),
        prop::option::of(prop_oneof![
            Just(".gba".to_string()),
            Just(".nes".to_string()),
            Just(".sfc".to_string()),
        ]),
    )
        .prop_map(|(words, tag, ext)| {
            format!(
                "{}{}{}",
                words.join(" "),
                tag.unwrap_or_default(),
                ext.unwrap_or_default()
            )
        })
}

fn timestamp_strategy() -> impl Strategy<Value = i64> {
    // 2000-01-01 .. 2038-01-01
    946_684_800i64..2_145_916_800i64
}

fn rom_with(local_secs: Option<i64>, remote_secs: Option<i64>) -> LocalRomFile {
    let mut rom = LocalRomFile::new("gba", PathBuf::from("/roms/gba/game.gba"));
    rom.resolved_remote_id = Some(1);
    rom.local_save = local_secs.map(|secs| LocalSave {
        platform_key: "gba".to_string(),
        path: PathBuf::from("/saves/mGBA/game.sav"),
        last_modified: Utc.timestamp_opt(secs, 0).unwrap(),
    });
    rom.remote_saves = remote_secs
        .map(|secs| RemoteSave {
            id: 1,
            remote_rom_id: 1,
            file_name: "game.sav".to_string(),
            file_extension: "sav".to_string(),
            download_path: "/saves/1".to_string(),
            updated_at: Utc.timestamp_opt(secs, 0).unwrap(),
            emulator_tag: None,
        })
        .into_iter()
        .collect();
    rom
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_similarity_in_unit_range(a in ".{0,24}", b in ".{0,24}") {
        let score = naming::similarity(&a, &b);
        prop_assert!((0.0..=1.0).contains(&score));
    }

    #[test]
    fn prop_similarity_symmetric(a in title_strategy(), b in title_strategy()) {
        let left = naming::normalize_for_comparison(&a);
        let right = naming::normalize_for_comparison(&b);
        prop_assert_eq!(naming::similarity(&left, &right), naming::similarity(&right, &left));
    }

    #[test]
    fn prop_identical_names_fully_similar(a in title_strategy()) {
        let norm = naming::normalize_for_comparison(&a);
        prop_assert_eq!(naming::similarity(&norm, &norm), 1.0);
    }

    #[test]
    fn prop_normalization_idempotent(a in title_strategy()) {
        let once = naming::normalize_for_comparison(&a);
        let twice = naming::normalize_for_comparison(&once);
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn prop_timestamp_suffix_strips_to_base(
        base in "[A-Za-z][A-Za-z0-9 ]{0,20}[A-Za-z0-9]",
        secs in timestamp_strategy(),
        millis in 0u32..1000,
    ) {
        let time = Utc.timestamp_opt(secs, millis * 1_000_000).unwrap();
        let uploaded = format!("{} {}.sav", base, naming::upload_timestamp(&time));
        let stem = naming::strip_extension(&uploaded);
        prop_assert_eq!(naming::strip_timestamp_suffix(stem), base.as_str());
    }

    #[test]
    fn prop_sync_direction_follows_newer_side(
        local in timestamp_strategy(),
        remote in timestamp_strategy(),
    ) {
        let action = planner::sync_action(&rom_with(Some(local), Some(remote)));
        let expected = match local.cmp(&remote) {
            std::cmp::Ordering::Greater => SyncAction::Upload,
            std::cmp::Ordering::Less => SyncAction::Download,
            std::cmp::Ordering::Equal => SyncAction::Skip,
        };
        prop_assert_eq!(action, expected);
    }

    #[test]
    fn prop_one_sided_saves_always_transfer(secs in timestamp_strategy()) {
        prop_assert_eq!(planner::sync_action(&rom_with(Some(secs), None)), SyncAction::Upload);
        prop_assert_eq!(planner::sync_action(&rom_with(None, Some(secs))), SyncAction::Download);
    }
}
