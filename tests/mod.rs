//! Main test module for savesync
//!
//! This module includes all test suites:
//! - Integration tests driving full reconciliation passes
//! - Property-based tests for naming and similarity invariants
//! - Edge cases around unusual device layouts

pub mod integration;
pub mod property;

#[cfg(test)]
mod edge_cases {
    use super::integration::{MockCatalog, SyncHarness};
    use ::savesync::*;
    use std::fs;

    #[test]
    fn test_empty_device() {
        let harness = SyncHarness::new(MockCatalog::with_platforms(&[(1, "gba")]));

        let report = harness.reconciler.run_pass().unwrap();
        assert!(report.is_up_to_date());
        assert!(report.results.is_empty());
        assert!(report.scan_errors.is_empty());
    }

    #[test]
    fn test_hidden_and_backup_files_are_ignored() {
        let harness = SyncHarness::new(MockCatalog::with_platforms(&[(1, "gba")]));
        harness.write_rom("gba", "zelda.gba", b"rom");
        harness.write_rom("gba", ".zelda.gba", b"resource fork");
        harness.write_save("mGBA", ".zelda.sav", b"hidden");
        harness.write_save("mGBA/.backup", "zelda [2024-01-01 00-00-00].sav", b"old");
        harness.cache_identity("gba", "zelda.gba", 42, "Zelda");

        let plan = harness.reconciler.plan().unwrap();
        // No visible save, no remote save: nothing to do
        assert!(plan.syncs.is_empty());
        assert!(plan.unmatched.is_empty());
    }

    #[test]
    fn test_unicode_rom_names() {
        let catalog = MockCatalog::with_platforms(&[(1, "gba")]);
        let harness = SyncHarness::new(catalog);
        let names = ["ポケモン.gba", "Pokémon Émeraude.gba"];

        let mut created = Vec::new();
        for name in names {
            let path = harness.rom_path("gba", name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            if fs::write(&path, b"rom").is_ok() {
                let save = naming::strip_extension(name).to_string() + ".sav";
                harness.write_save("mGBA", &save, b"save");
                harness.cache_identity("gba", name, created.len() as u64 + 1, name);
                created.push(name);
            }
        }
        if created.is_empty() {
            return;
        }

        let report = harness.reconciler.run_pass().unwrap();
        assert_eq!(report.uploaded(), created.len());
    }

    #[test]
    fn test_unreachable_platform_list() {
        let catalog = MockCatalog::with_platforms(&[]);
        let harness = SyncHarness::new(catalog);
        harness.write_rom("gba", "zelda.gba", b"rom");

        let err = harness.reconciler.run_pass().unwrap_err();
        assert!(matches!(err, SyncError::NoPlatforms(_)));
        assert_eq!(harness.reconciler.current_phase(), PassPhase::Idle);
    }
}

// Re-export test utilities for use in other suites
pub use integration::{MockCatalog, SyncHarness};
