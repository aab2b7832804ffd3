//! Working-tree status: diff the working directory against a snapshot
//!
//! Thin orchestrator over the directory walk, the ignore matcher and
//! per-file modification detection. All emitted paths are forward-slash
//! relative paths.

use ahash::AHashMap;
use anyhow::Result;
use rayon::prelude::*;
use snow_core::path::normalize;
use snow_core::{IgnoreMatcher, TreeFile};
use std::path::Path;

bitflags::bitflags! {
    /// Classification of one status entry
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StatusFlags: u32 {
        /// Present in the working tree, absent from the snapshot
        const WT_NEW = 1 << 0;
        /// Content differs from the snapshot
        const WT_MODIFIED = 1 << 1;
        /// Present in the snapshot, absent from the working tree
        const WT_DELETED = 1 << 2;
        const UNMODIFIED = 1 << 3;
        const IGNORED = 1 << 4;
    }
}

bitflags::bitflags! {
    /// What the status walk reports
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FilterFlags: u32 {
        /// Emit directory entries (never with modification status)
        const INCLUDE_DIRECTORIES = 1 << 0;
        /// Report untracked files as WT_NEW
        const INCLUDE_UNTRACKED = 1 << 1;
        /// Report clean tracked files as UNMODIFIED
        const INCLUDE_UNMODIFIED = 1 << 2;
        /// Walk hidden entries and flag ignore matches as IGNORED
        const INCLUDE_IGNORED = 1 << 3;

        const DEFAULT = Self::INCLUDE_UNTRACKED.bits();
    }
}

/// One line of status output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    pub path: String,
    pub status: StatusFlags,
    pub is_dir: bool,
}

/// Diff the working tree at `workdir` against the snapshot's file map
pub(crate) fn compute_status(
    workdir: &Path,
    ignore: &IgnoreMatcher,
    old_files: &AHashMap<String, TreeFile>,
    filter: FilterFlags,
) -> Result<Vec<StatusEntry>> {
    let include_ignored = filter.contains(FilterFlags::INCLUDE_IGNORED);
    let mut entries = Vec::new();
    let mut tracked_present: Vec<&TreeFile> = Vec::new();

    let walker = walkdir::WalkDir::new(workdir)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| {
            let name = e.file_name().to_string_lossy();
            if name == ".snow" {
                return false;
            }
            include_ignored || !name.starts_with('.')
        });

    for entry in walker {
        let entry = entry.map_err(|e| anyhow::anyhow!("walk failed under {}: {}", workdir.display(), e))?;
        let rel = match entry.path().strip_prefix(workdir) {
            Ok(rel) => normalize(&rel.to_string_lossy()),
            Err(_) => continue,
        };

        if entry.file_type().is_dir() {
            if !filter.contains(FilterFlags::INCLUDE_DIRECTORIES) {
                continue;
            }
            if ignore.ignored(&rel) {
                if include_ignored {
                    entries.push(StatusEntry {
                        path: rel,
                        status: StatusFlags::IGNORED,
                        is_dir: true,
                    });
                }
                continue;
            }
            entries.push(StatusEntry {
                path: rel,
                status: StatusFlags::empty(),
                is_dir: true,
            });
            continue;
        }

        if !entry.file_type().is_file() {
            continue;
        }

        if ignore.ignored(&rel) {
            if include_ignored {
                entries.push(StatusEntry {
                    path: rel,
                    status: StatusFlags::IGNORED,
                    is_dir: false,
                });
            }
            continue;
        }

        match old_files.get(&rel) {
            Some(tree_file) => tracked_present.push(tree_file),
            None => {
                if filter.contains(FilterFlags::INCLUDE_UNTRACKED) {
                    entries.push(StatusEntry {
                        path: rel,
                        status: StatusFlags::WT_NEW,
                        is_dir: false,
                    });
                }
            }
        }
    }

    // Tracked files present in the walk: classify in parallel, the hash
    // fallback is the expensive part
    let classified: Vec<(String, bool)> = tracked_present
        .par_iter()
        .map(|tree_file| {
            let modified = tree_file.is_file_modified(workdir)?;
            Ok((tree_file.path.clone(), modified))
        })
        .collect::<Result<_>>()?;

    for (path, modified) in classified {
        if modified {
            entries.push(StatusEntry {
                path,
                status: StatusFlags::WT_MODIFIED,
                is_dir: false,
            });
        } else if filter.contains(FilterFlags::INCLUDE_UNMODIFIED) {
            entries.push(StatusEntry {
                path,
                status: StatusFlags::UNMODIFIED,
                is_dir: false,
            });
        }
    }

    // Snapshot files gone from disk are always reported, unless ignored.
    // The stat (rather than the walk) decides, so a tracked file skipped
    // by the hidden-entry filter is not misreported as deleted.
    for rel in old_files.keys() {
        if ignore.ignored(rel) {
            continue;
        }
        if !workdir.join(rel).exists() {
            entries.push(StatusEntry {
                path: rel.clone(),
                status: StatusFlags::WT_DELETED,
                is_dir: false,
            });
        }
    }

    entries.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(entries)
}
