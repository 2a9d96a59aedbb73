//! Repository provenance stamped onto assembled indexes

use crate::error::{AssembleError, Result};
use crate::index::types::RepoProvenance;
use std::path::Path;
use std::process::Command;

/// Resolves source-control facts for a repository root
pub trait ProvenanceProvider: Send + Sync {
    fn resolve(&self, root: &Path) -> Result<Option<RepoProvenance>>;
}

/// Provider for repositories without source control
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProvenance;

impl ProvenanceProvider for NoProvenance {
    fn resolve(&self, _root: &Path) -> Result<Option<RepoProvenance>> {
        Ok(None)
    }
}

/// Provider backed by the `git` command line
#[derive(Debug, Clone, Copy, Default)]
pub struct GitProvenance;

impl GitProvenance {
    fn git(root: &Path, args: &[&str]) -> Result<Option<String>> {
        let output = Command::new("git")
            .args(args)
            .current_dir(root)
            .output()
            .map_err(|e| AssembleError::io(root, e))?;
        if !output.status.success() {
            return Ok(None);
        }
        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok((!text.is_empty()).then_some(text))
    }
}

impl ProvenanceProvider for GitProvenance {
    fn resolve(&self, root: &Path) -> Result<Option<RepoProvenance>> {
        let Some(commit) = Self::git(root, &["rev-parse", "HEAD"])? else {
            return Ok(None);
        };
        // Detached heads report "HEAD"
        let branch = Self::git(root, &["rev-parse", "--abbrev-ref", "HEAD"])?.filter(|b| b != "HEAD");
        let dirty = Self::git(root, &["status", "--porcelain"])?.is_some();

        Ok(Some(RepoProvenance {
            provider: "git".to_string(),
            root: root.to_string_lossy().into_owned(),
            commit: Some(commit),
            branch,
            dirty: Some(dirty),
        }))
    }
}

/// Resolve provenance, degrading any failure to `None`
pub fn resolve_or_warn(provider: &dyn ProvenanceProvider, root: &Path) -> Option<RepoProvenance> {
    match provider.resolve(root) {
        Ok(provenance) => provenance,
        Err(e) => {
            tracing::warn!("Failed to resolve repository provenance for {}: {}", root.display(), e);
            None
        }
    }
}
