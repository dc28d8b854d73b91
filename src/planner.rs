//! Per-game sync decisions
//!
//! Given a resolved ROM with its local save and remote saves, decide whether
//! to upload, download or leave it alone, and assemble the deduplicated list
//! of [`SaveSync`] plans for a pass.
//!
//! Timestamps are compared at whole-second precision: filesystems and the
//! remote library disagree on sub-second resolution, and treating those
//! differences as changes would bounce saves back and forth forever.

use crate::types::{LocalRomFile, RemoteSave, SaveSync, SyncAction};
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::{debug, trace};

/// Most recently updated remote save whose base name matches
pub fn latest_remote_for_base<'a>(remote_saves: &'a [RemoteSave], base_name: &str) -> Option<&'a RemoteSave> {
    remote_saves
        .iter()
        .filter(|s| s.base_name() == base_name)
        .max_by_key(|s| s.updated_at)
}

/// Decide the action for one ROM
///
/// | local | remote | action |
/// |-------|--------|--------|
/// | none | none | skip |
/// | none | some | download |
/// | some | none | upload |
/// | newer | older | upload |
/// | older | newer | download |
/// | same second | same second | skip |
pub fn sync_action(rom: &LocalRomFile) -> SyncAction {
    let remote = latest_remote_for_base(&rom.remote_saves, rom.base_name());

    match (rom.local_save.as_ref(), remote) {
        (None, None) => SyncAction::Skip,
        (None, Some(_)) => SyncAction::Download,
        (Some(_), None) => SyncAction::Upload,
        (Some(local), Some(remote)) => {
            let local_secs = local.last_modified.timestamp();
            let remote_secs = remote.updated_at.timestamp();
            if local_secs > remote_secs {
                SyncAction::Upload
            } else if remote_secs > local_secs {
                SyncAction::Download
            } else {
                SyncAction::Skip
            }
        }
    }
}

/// Identity used to drop duplicate plans within a pass
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum PlanKey {
    LocalSave(PathBuf),
    Download { remote_rom_id: u64, base_name: String },
}

/// Accumulates deduplicated sync plans
#[derive(Debug, Default)]
pub struct SyncPlanner {
    plans: Vec<SaveSync>,
    seen: HashSet<PlanKey>,
}

impl SyncPlanner {
    /// Create an empty planner
    pub fn new() -> Self {
        Self::default()
    }

    /// Plan one ROM; returns whether a new plan was added
    ///
    /// ROMs that are unresolved, awaiting fuzzy confirmation, already in
    /// sync, or duplicates of an earlier plan add nothing.
    pub fn add(&mut self, rom: &LocalRomFile) -> bool {
        if rom.pending_fuzzy_match {
            trace!("{} awaits fuzzy confirmation", rom.file_name);
            return false;
        }
        let Some(remote_rom_id) = rom.resolved_remote_id else {
            return false;
        };

        let action = sync_action(rom);
        if action == SyncAction::Skip {
            trace!("{} is up to date", rom.file_name);
            return false;
        }

        let base_name = rom.base_name().to_string();
        let key = match rom.local_save.as_ref() {
            Some(local) => PlanKey::LocalSave(local.path.clone()),
            None => PlanKey::Download {
                remote_rom_id,
                base_name: base_name.clone(),
            },
        };
        if !self.seen.insert(key) {
            debug!("Dropping duplicate plan for {}", rom.file_name);
            return false;
        }

        let remote = latest_remote_for_base(&rom.remote_saves, &base_name).cloned();
        debug!("Planned {} for {}", action, rom.file_name);

        self.plans.push(SaveSync {
            remote_rom_id,
            remote_rom_name: rom.resolved_remote_name.clone().unwrap_or_default(),
            platform_key: rom.platform_key.clone(),
            game_base_name: base_name,
            local: rom.local_save.clone(),
            remote,
            action,
            selected_emulator_dir: None,
        });
        true
    }

    /// Number of plans so far
    pub fn len(&self) -> usize {
        self.plans.len()
    }

    /// Whether no plans were added
    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }

    /// Finish planning
    pub fn into_plans(self) -> Vec<SaveSync> {
        self.plans
    }
}

/// Plan every ROM in iteration order
pub fn plan_syncs<'a>(roms: impl IntoIterator<Item = &'a LocalRomFile>) -> Vec<SaveSync> {
    let mut planner = SyncPlanner::new();
    for rom in roms {
        planner.add(rom);
    }
    planner.into_plans()
}
