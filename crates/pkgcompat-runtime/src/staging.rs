use crate::layout::{ACTIVE_MARKER, STAGED_MARKER};
use crate::RuntimeError;
use pkgcompat_schema::DistroId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// Current integrity marker format. Roots with another version are rebuilt.
pub const MARKER_FORMAT_VERSION: u32 = 1;

/// Directories every isolation root gets, whether or not the foreign tool uses them.
const SKELETON_DIRS: &[&str] = &["bin", "lib", "etc", "tmp", "var/cache", "var/lib"];

/// What to copy into an isolation root for one distro.
///
/// Sources live under `source_dir` (`<compat_root>/<distro>`): the statically
/// linked tools in `bin/`, and whatever runtime libraries they need in `lib/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingPlan {
    pub distro: DistroId,
    pub source_dir: PathBuf,
    /// Tool names under `bin/`. The first one is the primary binary.
    pub binaries: Vec<String>,
}

impl StagingPlan {
    pub fn new(distro: DistroId, source_dir: impl Into<PathBuf>, binaries: &[&str]) -> Self {
        Self {
            distro,
            source_dir: source_dir.into(),
            binaries: binaries.iter().map(|b| (*b).to_owned()).collect(),
        }
    }

    pub fn primary_binary(&self) -> &str {
        self.binaries.first().map_or("", String::as_str)
    }

    /// Host path of the staged primary binary inside `root`.
    pub fn staged_binary_path(&self, root: &Path) -> PathBuf {
        root.join("bin").join(self.primary_binary())
    }

    /// Path of a staged tool as seen from inside the isolated root.
    pub fn in_root_path(tool: &str) -> String {
        format!("/bin/{tool}")
    }
}

/// Integrity marker written after a root is fully staged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StagingMarker {
    pub format_version: u32,
    pub distro: DistroId,
    pub staged_at: String,
    /// Root-relative path -> blake3 digest of every staged file.
    pub files: BTreeMap<String, String>,
}

fn file_digest(path: &Path) -> Result<String, std::io::Error> {
    let data = fs::read(path)?;
    Ok(blake3::hash(&data).to_hex().to_string())
}

fn collect_files(base: &Path, dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), std::io::Error> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_files(base, &path, out)?;
        } else if path.is_file() {
            if let Ok(rel) = path.strip_prefix(base) {
                out.push(rel.to_path_buf());
            }
        }
    }
    Ok(())
}

fn copy_staged(src: &Path, dest: &Path) -> Result<(), RuntimeError> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(src, dest).map_err(|e| {
        RuntimeError::StagingFailed(format!("cannot copy {}: {e}", src.display()))
    })?;
    Ok(())
}

/// Stage a fresh root: copy binaries and libraries, then write the marker.
///
/// `root` is expected not to exist; callers remove stale roots first.
pub fn stage_root(plan: &StagingPlan, root: &Path) -> Result<StagingMarker, RuntimeError> {
    if plan.binaries.is_empty() {
        return Err(RuntimeError::StagingFailed(format!(
            "no foreign binaries configured for {}",
            plan.distro
        )));
    }

    let mut staged: Vec<String> = Vec::new();
    for tool in &plan.binaries {
        let src = plan.source_dir.join("bin").join(tool);
        if !src.is_file() {
            return Err(RuntimeError::StagingFailed(format!(
                "foreign binary missing: {}",
                src.display()
            )));
        }
        copy_staged(&src, &root.join("bin").join(tool))?;
        staged.push(format!("bin/{tool}"));
    }

    let lib_src = plan.source_dir.join("lib");
    if lib_src.is_dir() {
        let mut libs = Vec::new();
        collect_files(&lib_src, &lib_src, &mut libs).map_err(|e| {
            RuntimeError::StagingFailed(format!("cannot read {}: {e}", lib_src.display()))
        })?;
        for rel in libs {
            copy_staged(&lib_src.join(&rel), &root.join("lib").join(&rel))?;
            staged.push(format!("lib/{}", rel.to_string_lossy()));
        }
    }

    for dir in SKELETON_DIRS {
        fs::create_dir_all(root.join(dir))?;
    }

    let mut files = BTreeMap::new();
    for rel in staged {
        let digest = file_digest(&root.join(&rel))?;
        files.insert(rel, digest);
    }

    let marker = StagingMarker {
        format_version: MARKER_FORMAT_VERSION,
        distro: plan.distro.clone(),
        staged_at: chrono::Utc::now().to_rfc3339(),
        files,
    };
    write_marker(root, &marker)?;
    debug!(
        "staged {} files into {} for {}",
        marker.files.len(),
        root.display(),
        plan.distro
    );
    Ok(marker)
}

fn write_marker(root: &Path, marker: &StagingMarker) -> Result<(), RuntimeError> {
    let content = serde_json::to_string_pretty(marker)?;
    let mut tmp = NamedTempFile::new_in(root)?;
    tmp.write_all(content.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(root.join(STAGED_MARKER))
        .map_err(|e| RuntimeError::Io(e.error))?;
    fs::File::open(root)?.sync_all()?;
    Ok(())
}

/// Check a staged root against its marker. Any disagreement is `RootCorrupted`.
pub fn verify_root(plan: &StagingPlan, root: &Path) -> Result<StagingMarker, RuntimeError> {
    if root.join(ACTIVE_MARKER).exists() {
        return Err(RuntimeError::RootCorrupted(format!(
            "{}: a previous operation never released the root",
            root.display()
        )));
    }

    let marker_path = root.join(STAGED_MARKER);
    let content = fs::read_to_string(&marker_path).map_err(|e| {
        RuntimeError::RootCorrupted(format!("integrity marker unreadable: {e}"))
    })?;
    let marker: StagingMarker = serde_json::from_str(&content)
        .map_err(|e| RuntimeError::RootCorrupted(format!("integrity marker invalid: {e}")))?;

    if marker.format_version != MARKER_FORMAT_VERSION {
        return Err(RuntimeError::RootCorrupted(format!(
            "marker format {} (expected {MARKER_FORMAT_VERSION})",
            marker.format_version
        )));
    }
    if marker.distro != plan.distro {
        return Err(RuntimeError::RootCorrupted(format!(
            "root staged for '{}', expected '{}'",
            marker.distro, plan.distro
        )));
    }
    for tool in &plan.binaries {
        if !marker.files.contains_key(&format!("bin/{tool}")) {
            return Err(RuntimeError::RootCorrupted(format!(
                "binary '{tool}' was never staged"
            )));
        }
    }

    for (rel, expected) in &marker.files {
        let actual = file_digest(&root.join(rel)).map_err(|e| {
            RuntimeError::RootCorrupted(format!("staged file {rel} unreadable: {e}"))
        })?;
        if actual != *expected {
            return Err(RuntimeError::RootCorrupted(format!(
                "staged file {rel} changed: expected {expected}, got {actual}"
            )));
        }
    }

    Ok(marker)
}

pub fn remove_root(root: &Path) -> Result<(), RuntimeError> {
    match fs::remove_dir_all(root) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(RuntimeError::Io(e)),
    }
}
