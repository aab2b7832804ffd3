//! Repository: commit graph, references, HEAD, checkout and status
//!
//! The repository owns the loaded commit graph and reference list; commits
//! are addressed by hash everywhere (references and HEAD store a hash, not
//! a pointer), so the graph stays cycle-free. Mutating operations persist
//! in a fixed order (commit record, HEAD, advanced reference, log) so a
//! crash can lose an in-memory mutation but never tear the on-disk state.

use crate::commit::Commit;
use crate::index::Index;
use crate::odb::{FsObjectStore, ObjectStore};
use crate::oplog::OpLog;
use crate::reference::{Head, RefType, Reference};
use crate::status::{compute_status, FilterFlags, StatusEntry};
use ahash::AHashMap;
use anyhow::{Context, Result};
use rayon::prelude::*;
use snow_core::path::{normalize, resolve};
use snow_core::util::current_timestamp_ms;
use snow_core::{IgnoreMatcher, Sha256Hash, SnowError, TreeDir, TreeFile};
use snow_io::{put_to_trash, IoContext};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

bitflags::bitflags! {
    /// How checkout reconciles the working tree with the target snapshot
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Reset: u32 {
        /// Rewrite tracked files whose content differs from the snapshot
        const DELETE_MODIFIED_FILES = 1 << 0;
        /// Move files unknown to the snapshot to the trash
        const DELETE_NEW_FILES = 1 << 1;
        /// Re-materialize snapshot files missing from the working tree
        const RESTORE_DELETED_FILES = 1 << 2;
        /// Leave HEAD detached even when the target names a reference
        const DETACH = 1 << 3;

        const DEFAULT = Self::DELETE_MODIFIED_FILES.bits()
            | Self::DELETE_NEW_FILES.bits()
            | Self::RESTORE_DELETED_FILES.bits();
    }
}

/// Options for [`Repository::create_commit`]
#[derive(Debug, Clone, Copy, Default)]
pub struct CommitOptions {
    /// Permit a commit with no staged changes
    pub allow_empty: bool,
}

/// Options for [`Repository::init_ext`]
#[derive(Debug, Clone, Default)]
pub struct RepositoryInitOptions {
    /// Repository metadata directory; defaults to `<workdir>/.snow`.
    /// When set it must lie outside the working directory.
    pub commondir: Option<PathBuf>,
}

/// A checkout / lookup target
#[derive(Debug, Clone)]
pub enum Target {
    /// A reference name or a raw commit hash; names win on ambiguity
    Auto(String),
    /// A known commit
    Commit(Sha256Hash),
    /// A reference by name
    Reference(String),
}

impl From<&str> for Target {
    fn from(value: &str) -> Self {
        Target::Auto(value.to_string())
    }
}

impl From<&Commit> for Target {
    fn from(value: &Commit) -> Self {
        Target::Commit(value.hash)
    }
}

impl From<&Reference> for Target {
    fn from(value: &Reference) -> Self {
        Target::Reference(value.name.clone())
    }
}

/// The repository state machine
#[derive(Debug)]
pub struct Repository {
    workdir: PathBuf,
    commondir: PathBuf,
    store: Box<dyn ObjectStore>,
    ioctx: IoContext,
    ignore: IgnoreMatcher,
    oplog: OpLog,
    /// Commit hashes in creation order
    commits: Vec<Sha256Hash>,
    commit_map: AHashMap<Sha256Hash, Commit>,
    refs: Vec<Reference>,
    head: Head,
    indexes: Vec<Index>,
}

impl Repository {
    /// Initialize a repository with the default commondir (`<workdir>/.snow`)
    pub fn init(workdir: &Path) -> Result<Self> {
        Self::init_ext(workdir, RepositoryInitOptions::default())
    }

    /// Initialize a repository.
    ///
    /// Creates the working directory and commondir, the object store, the
    /// operations log, and a first empty commit with message
    /// `"Created Project"` (which also creates the `Main` reference and
    /// attaches HEAD to it).
    pub fn init_ext(workdir: &Path, opts: RepositoryInitOptions) -> Result<Self> {
        let workdir_abs = resolve(&workdir.to_string_lossy());

        let commondir = match &opts.commondir {
            Some(external) => {
                let external_abs = resolve(&external.to_string_lossy());
                // An externalized commondir must live outside the project
                // (and the project outside it)
                if external_abs == workdir_abs
                    || external_abs.starts_with(&format!("{}/", workdir_abs))
                    || workdir_abs.starts_with(&format!("{}/", external_abs))
                {
                    return Err(SnowError::InvalidCommondir(format!(
                        "commondir {} overlaps workdir {}",
                        external_abs, workdir_abs
                    ))
                    .into());
                }
                PathBuf::from(external_abs)
            }
            None => workdir.join(".snow"),
        };

        std::fs::create_dir_all(workdir)
            .map_err(|e| SnowError::io(workdir.to_string_lossy(), e))?;
        if opts.commondir.is_some() {
            // The .snow entry becomes a plain file pointing at the commondir
            std::fs::write(workdir.join(".snow"), commondir.to_string_lossy().as_bytes())
                .map_err(|e| SnowError::io(workdir.to_string_lossy(), e))?;
        }

        let store = FsObjectStore::create(&commondir)?;
        let oplog = OpLog::init(&commondir)?;
        let ioctx = IoContext::init()?;
        let ignore = load_ignore(workdir)?;

        let mut repo = Repository {
            workdir: workdir.to_path_buf(),
            commondir,
            store: Box::new(store),
            ioctx,
            ignore,
            oplog,
            commits: Vec::new(),
            commit_map: AHashMap::new(),
            refs: Vec::new(),
            head: Head::unborn(),
            indexes: Vec::new(),
        };

        let mut index = Index::main(repo.commondir());
        repo.create_commit(
            &mut index,
            "Created Project",
            CommitOptions { allow_empty: true },
            None,
            None,
        )?;
        tracing::info!(workdir = %repo.workdir.display(), "repository initialized");
        Ok(repo)
    }

    /// Open the repository containing `workdir`.
    ///
    /// Walks ancestors until a `.snow` entry is found; a `.snow` file is
    /// read as a redirect to an external commondir.
    pub fn open(workdir: &Path) -> Result<Self> {
        let mut dir = PathBuf::from(resolve(&workdir.to_string_lossy()));
        let workdir = loop {
            if dir.join(".snow").exists() {
                break dir;
            }
            match dir.parent() {
                Some(parent) => dir = parent.to_path_buf(),
                None => return Err(SnowError::NotARepository(workdir.to_path_buf()).into()),
            }
        };

        let snow_entry = workdir.join(".snow");
        let commondir = if snow_entry.is_file() {
            let content = std::fs::read_to_string(&snow_entry)
                .map_err(|e| SnowError::io(snow_entry.to_string_lossy(), e))?;
            PathBuf::from(content.trim())
        } else {
            snow_entry
        };
        if !commondir.is_dir() {
            return Err(SnowError::InvalidCommondir(format!(
                "{} does not exist or is not a directory",
                commondir.display()
            ))
            .into());
        }

        let store = FsObjectStore::open(&commondir)?;

        // Commits come back in directory order; creation order is by date
        let mut loaded = store.read_commits()?;
        loaded.sort_by(|a, b| a.date_ms.cmp(&b.date_ms).then_with(|| a.hash.cmp(&b.hash)));
        let commits: Vec<Sha256Hash> = loaded.iter().map(|c| c.hash).collect();
        let commit_map: AHashMap<Sha256Hash, Commit> =
            loaded.into_iter().map(|c| (c.hash, c)).collect();

        let refs = store.read_references()?;

        let head = match store.read_head_reference()? {
            Some(value) => {
                if let Some(reference) = refs.iter().find(|r| r.name == value) {
                    Head {
                        name: reference.name.clone(),
                        hash: reference.hash,
                    }
                } else if let Ok(hash) = Sha256Hash::from_hex(&value) {
                    Head {
                        name: Head::DETACHED.to_string(),
                        hash: Some(hash),
                    }
                } else if let Some(first) = refs.first() {
                    tracing::warn!(value = %value, "HEAD names nothing known, attaching to first reference");
                    Head {
                        name: first.name.clone(),
                        hash: first.hash,
                    }
                } else {
                    return Err(SnowError::NoHead.into());
                }
            }
            None => match refs.first() {
                Some(first) => Head {
                    name: first.name.clone(),
                    hash: first.hash,
                },
                None => return Err(SnowError::NoHead.into()),
            },
        };

        if let Some(hash) = &head.hash {
            if !commit_map.contains_key(hash) {
                return Err(SnowError::NoHead.into());
            }
        }

        let indexes = Index::load_all(&commondir)?;
        let oplog = OpLog::open(&commondir);
        let ignore = load_ignore(&workdir)?;
        let ioctx = IoContext::init()?;

        Ok(Repository {
            workdir,
            commondir,
            store: Box::new(store),
            ioctx,
            ignore,
            oplog,
            commits,
            commit_map,
            refs,
            head,
            indexes,
        })
    }

    // ------------------------------------------------------------------
    // Accessors

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn commondir(&self) -> &Path {
        &self.commondir
    }

    pub fn store(&self) -> &dyn ObjectStore {
        self.store.as_ref()
    }

    pub fn ioctx(&self) -> &IoContext {
        &self.ioctx
    }

    pub fn head(&self) -> &Head {
        &self.head
    }

    /// Commits in creation order
    pub fn commits(&self) -> Vec<&Commit> {
        self.commits
            .iter()
            .filter_map(|h| self.commit_map.get(h))
            .collect()
    }

    pub fn references(&self) -> &[Reference] {
        &self.refs
    }

    pub fn get_reference(&self, name: &str) -> Option<&Reference> {
        self.refs.iter().find(|r| r.name == name)
    }

    /// The commit HEAD currently points at
    pub fn head_commit(&self) -> Option<&Commit> {
        self.head.hash.as_ref().and_then(|h| self.commit_map.get(h))
    }

    // ------------------------------------------------------------------
    // Indexes

    /// The main index, loaded from disk or auto-created on demand
    pub fn main_index(&mut self) -> Result<Index> {
        if let Some(pos) = self.indexes.iter().position(|i| i.is_main()) {
            return Ok(self.indexes.remove(pos));
        }
        // Not loaded this session; a persisted record still wins
        if let Some(on_disk) = Index::load_all(&self.commondir)?
            .into_iter()
            .find(|i| i.is_main())
        {
            return Ok(on_disk);
        }
        Ok(Index::main(&self.commondir))
    }

    /// A fresh secondary index
    pub fn create_index(&self) -> Index {
        Index::with_random_id(&self.commondir)
    }

    /// Indexes loaded from disk and not yet taken by a caller
    pub fn indexes(&self) -> &[Index] {
        &self.indexes
    }

    /// Ingest an index's staged files through this repository's store
    pub fn write_index_files(&self, index: &mut Index) -> Result<()> {
        index.write_files(self.store.as_ref(), &self.workdir, &self.ioctx)
    }

    // ------------------------------------------------------------------
    // Commits

    /// Bundle an index's intents into a new commit.
    ///
    /// Unchanged files of the HEAD snapshot carry over; staged deletions
    /// drop out; the index is invalidated. The very first commit creates
    /// the `Main` reference and attaches HEAD to it.
    pub fn create_commit(
        &mut self,
        index: &mut Index,
        message: &str,
        opts: CommitOptions,
        tags: Option<BTreeSet<String>>,
        user_data: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<Sha256Hash> {
        if !opts.allow_empty
            && index.add_rel_paths().is_empty()
            && index.delete_rel_paths().is_empty()
        {
            return Err(SnowError::NothingToCommit.into());
        }

        // Staged files win; everything else keeps its committed identity
        let mut processed = index.processed().clone();
        if let Some(head_commit) = self.head_commit() {
            for (path, tree_file) in head_commit.root.files() {
                processed.entry(path).or_insert_with(|| file_info_of(&tree_file));
            }
        }

        let mut root = TreeDir::from_file_map(&processed);
        for deleted in index.delete_rel_paths() {
            root.remove(deleted);
        }

        index.invalidate()?;
        self.indexes.retain(|i| i.id() != index.id());

        let parents: Vec<Sha256Hash> = self.head.hash.into_iter().collect();
        let mut commit = Commit::new(message.to_string(), current_timestamp_ms(), root, parents);
        if let Some(tags) = tags {
            commit.tags = tags;
        }
        if let Some(user_data) = user_data {
            commit.user_data = user_data;
        }
        let hash = commit.hash;

        // In-memory mutation first; a crash before persistence loses the
        // commit but never tears the on-disk state
        self.commits.push(hash);
        self.commit_map.insert(hash, commit);

        let advanced: Option<Reference> = if self.commit_map.len() == 1 {
            let main = Reference::new(RefType::Branch, "Main".to_string(), hash);
            self.head.name = main.name.clone();
            self.refs.push(main.clone());
            Some(main)
        } else if !self.head.is_detached() {
            let name = self.head.name.clone();
            self.refs.iter_mut().find(|r| r.name == name).map(|r| {
                r.hash = Some(hash);
                r.clone()
            })
        } else {
            None
        };
        self.head.hash = Some(hash);

        // Persistence order: commit record, HEAD, reference, log
        let commit_ref = &self.commit_map[&hash];
        self.store.write_commit(commit_ref)?;
        self.store.write_head_reference(&self.head)?;
        if let Some(reference) = &advanced {
            self.store.write_reference(reference)?;
        }
        self.oplog.append("commit", &format!("{} {}", hash, message))?;

        tracing::info!(%hash, message, "commit created");
        Ok(hash)
    }

    /// Resolve a literal hash or a `HEAD~N~M...` ancestor expression
    pub fn find_commit_by_hash(&self, expr: &str) -> Result<&Commit> {
        let mut segments = expr.split('~');
        let base = segments.next().unwrap_or_default();

        let mut current = if base == "HEAD" {
            let hash = self.head.hash.ok_or(SnowError::NoHead)?;
            self.commit_map
                .get(&hash)
                .ok_or_else(|| SnowError::UnknownTarget(expr.to_string()))?
        } else {
            let hash = Sha256Hash::from_hex(base)
                .map_err(|_| SnowError::InvalidHashSyntax(expr.to_string()))?;
            self.commit_map
                .get(&hash)
                .ok_or_else(|| SnowError::UnknownTarget(expr.to_string()))?
        };

        for segment in segments {
            let steps: u64 = segment
                .parse()
                .map_err(|_| SnowError::InvalidHashSyntax(expr.to_string()))?;
            for _ in 0..steps {
                let parent = current
                    .first_parent()
                    .ok_or_else(|| SnowError::OutOfHistory(expr.to_string()))?;
                current = self
                    .commit_map
                    .get(parent)
                    .ok_or_else(|| SnowError::OutOfHistory(expr.to_string()))?;
            }
        }
        Ok(current)
    }

    /// Commit a reference currently points at
    pub fn find_commit_by_reference_name(
        &self,
        _ref_type: RefType,
        name: &str,
    ) -> Result<&Commit> {
        let reference = self
            .get_reference(name)
            .ok_or_else(|| SnowError::RefNotFound(name.to_string()))?;
        let hash = reference
            .hash
            .ok_or_else(|| SnowError::UnknownTarget(name.to_string()))?;
        self.commit_map
            .get(&hash)
            .ok_or_else(|| SnowError::UnknownTarget(name.to_string()).into())
    }

    // ------------------------------------------------------------------
    // References and HEAD

    /// Create a reference at a known commit
    pub fn create_new_reference(
        &mut self,
        ref_type: RefType,
        name: &str,
        start_point: &Sha256Hash,
        user_data: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<&Reference> {
        if name == Head::DETACHED || self.get_reference(name).is_some() {
            return Err(SnowError::RefExists(name.to_string()).into());
        }
        if !self.commit_map.contains_key(start_point) {
            return Err(SnowError::InvalidStartPoint(start_point.to_hex()).into());
        }

        let mut reference = Reference::new(ref_type, name.to_string(), *start_point);
        if let Some(user_data) = user_data {
            reference.user_data = user_data;
        }
        self.store.write_reference(&reference)?;
        self.refs.push(reference);
        Ok(self.refs.last().expect("reference just pushed"))
    }

    /// Delete a reference; the one HEAD is attached to is protected
    pub fn delete_reference(&mut self, name: &str) -> Result<()> {
        if !self.head.is_detached() && self.head.name == name {
            return Err(SnowError::CannotDeleteCheckedOutRef(name.to_string()).into());
        }
        let pos = self
            .refs
            .iter()
            .position(|r| r.name == name)
            .ok_or_else(|| SnowError::RefNotFound(name.to_string()))?;
        let reference = self.refs.remove(pos);
        self.store.delete_reference(&reference)?;
        Ok(())
    }

    /// Attach HEAD to a reference
    pub fn set_head(&mut self, name: &str) -> Result<()> {
        let reference = self
            .get_reference(name)
            .ok_or_else(|| SnowError::RefNotFound(name.to_string()))?;
        self.head = Head {
            name: reference.name.clone(),
            hash: reference.hash,
        };
        self.store.write_head_reference(&self.head)
    }

    /// Detach HEAD onto a known commit
    pub fn set_head_detached(&mut self, hash: &Sha256Hash) -> Result<()> {
        if !self.commit_map.contains_key(hash) {
            return Err(SnowError::UnknownTarget(hash.to_hex()).into());
        }
        self.head = Head {
            name: Head::DETACHED.to_string(),
            hash: Some(*hash),
        };
        self.store.write_head_reference(&self.head)
    }

    // ------------------------------------------------------------------
    // Checkout and status

    /// Reconcile the working tree with a target snapshot.
    ///
    /// HEAD is moved and persisted before any file mutation, so a failure
    /// mid-checkout leaves a recoverable pointer, not a lost one.
    pub fn checkout<T: Into<Target>>(&mut self, target: T, reset: Reset) -> Result<()> {
        let (hash, target_ref) = self.resolve_target(&target.into())?;
        let old_files = self
            .commit_map
            .get(&hash)
            .ok_or_else(|| SnowError::UnknownTarget(hash.to_hex()))?
            .root
            .files();
        let current_files = self.working_files()?;

        self.head = Head {
            name: match target_ref {
                Some(name) if !reset.contains(Reset::DETACH) => name,
                _ => Head::DETACHED.to_string(),
            },
            hash: Some(hash),
        };
        self.store.write_head_reference(&self.head)?;

        if reset.contains(Reset::DELETE_NEW_FILES) {
            for rel in current_files.iter().filter(|p| !old_files.contains_key(*p)) {
                self.trash_working_file(rel)?;
            }
        }

        let this: &Repository = self;

        // The stat (rather than the ignore-filtered walk) decides which
        // snapshot files are missing, so a tracked hidden or
        // ignore-matching file is not misread as deleted and rewritten
        let (present, missing): (Vec<&TreeFile>, Vec<&TreeFile>) = old_files
            .values()
            .partition(|f| this.workdir.join(&f.path).exists());

        if reset.contains(Reset::RESTORE_DELETED_FILES) {
            missing
                .par_iter()
                .try_for_each(|f| this.materialize_file(f))?;
        }

        if reset.contains(Reset::DELETE_MODIFIED_FILES) {
            present.par_iter().try_for_each(|f| {
                if f.is_file_modified(&this.workdir)? {
                    this.materialize_file(f)
                } else {
                    Ok(())
                }
            })?;
        }

        self.oplog
            .append("checkout", &format!("{} {}", hash, self.head.name))?;
        tracing::info!(%hash, head = %self.head.name, "checkout complete");
        Ok(())
    }

    /// Working tree vs snapshot, reported instead of reconciled
    pub fn get_status(
        &self,
        filter: FilterFlags,
        commit: Option<&Commit>,
    ) -> Result<Vec<StatusEntry>> {
        let old_files = match commit.or_else(|| self.head_commit()) {
            Some(c) => c.root.files(),
            None => AHashMap::new(),
        };
        compute_status(&self.workdir, &self.ignore, &old_files, filter)
    }

    // ------------------------------------------------------------------
    // Internals

    fn resolve_target(&self, target: &Target) -> Result<(Sha256Hash, Option<String>)> {
        match target {
            Target::Reference(name) => {
                let reference = self
                    .get_reference(name)
                    .ok_or_else(|| SnowError::UnknownTarget(name.clone()))?;
                let hash = reference
                    .hash
                    .ok_or_else(|| SnowError::UnknownTarget(name.clone()))?;
                Ok((hash, Some(reference.name.clone())))
            }
            Target::Commit(hash) => {
                if !self.commit_map.contains_key(hash) {
                    return Err(SnowError::UnknownTarget(hash.to_hex()).into());
                }
                Ok((*hash, self.sole_reference_for(hash)))
            }
            Target::Auto(value) => {
                if let Some(reference) = self.get_reference(value) {
                    let hash = reference
                        .hash
                        .ok_or_else(|| SnowError::UnknownTarget(value.clone()))?;
                    return Ok((hash, Some(reference.name.clone())));
                }
                if let Ok(hash) = Sha256Hash::from_hex(value) {
                    if self.commit_map.contains_key(&hash) {
                        return Ok((hash, self.sole_reference_for(&hash)));
                    }
                }
                Err(SnowError::UnknownTarget(value.clone()).into())
            }
        }
    }

    /// The single reference pointing at a commit; ambiguity detaches
    fn sole_reference_for(&self, hash: &Sha256Hash) -> Option<String> {
        let mut matching = self.refs.iter().filter(|r| r.hash.as_ref() == Some(hash));
        match (matching.next(), matching.next()) {
            (Some(reference), None) => Some(reference.name.clone()),
            _ => None,
        }
    }

    /// Relative paths of all non-ignored files in the working tree
    fn working_files(&self) -> Result<Vec<String>> {
        let mut files = Vec::new();
        let walker = walkdir::WalkDir::new(&self.workdir)
            .min_depth(1)
            .into_iter()
            .filter_entry(|e| {
                let name = e.file_name().to_string_lossy();
                name != ".snow" && !name.starts_with('.')
            });
        for entry in walker {
            let entry = entry
                .map_err(|e| anyhow::anyhow!("walk failed under {}: {}", self.workdir.display(), e))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(rel) = entry.path().strip_prefix(&self.workdir) else {
                continue;
            };
            let rel = normalize(&rel.to_string_lossy());
            if !self.ignore.ignored(&rel) {
                files.push(rel);
            }
        }
        Ok(files)
    }

    /// Materialize a snapshot file into the working tree and re-apply its
    /// committed mtime
    fn materialize_file(&self, tree_file: &TreeFile) -> Result<()> {
        let dst = self.workdir.join(&tree_file.path);
        self.store
            .read(&tree_file.hash, &dst, &self.ioctx)
            .with_context(|| format!("failed to materialize {}", tree_file.path))?;
        let mtime = filetime::FileTime::from_unix_time(
            tree_file.mtime_ms.div_euclid(1000),
            (tree_file.mtime_ms.rem_euclid(1000) * 1_000_000) as u32,
        );
        filetime::set_file_mtime(&dst, mtime)
            .map_err(|e| SnowError::io(tree_file.path.clone(), e))?;
        Ok(())
    }

    /// Trash a working file, degrading to plain deletion when no usable
    /// trash helper exists on this system
    fn trash_working_file(&self, rel: &str) -> Result<()> {
        let abs = self.workdir.join(rel);
        match put_to_trash(&abs) {
            Ok(()) => Ok(()),
            Err(e)
                if matches!(
                    e.downcast_ref::<SnowError>(),
                    Some(SnowError::HelperNotFound(_) | SnowError::HelperExitNonZero { .. })
                ) =>
            {
                tracing::warn!(path = rel, error = %e, "trash helper unusable, deleting instead");
                std::fs::remove_file(&abs).map_err(|e| SnowError::io(rel.to_string(), e))?;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

fn file_info_of(tree_file: &TreeFile) -> snow_core::FileInfo {
    snow_core::FileInfo {
        hash: tree_file.hash,
        blocks: tree_file.blocks.clone(),
        size: tree_file.size,
        atime_ms: 0,
        mtime_ms: tree_file.mtime_ms,
        ctime_ms: tree_file.ctime_ms,
    }
}

fn load_ignore(workdir: &Path) -> Result<IgnoreMatcher> {
    let mut ignore = IgnoreMatcher::new();
    let user_file = workdir.join(".snowignore");
    if user_file.is_file() {
        ignore.load_file(&user_file)?;
    }
    Ok(ignore)
}
