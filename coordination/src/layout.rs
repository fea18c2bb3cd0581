//! Change Layout / Artifacts: allocates the per-change directory and commits
//! generated artifacts atomically (write-to-temp + rename), recording their
//! hashes for the checkpoint manifest.

use crate::error::{EngineError, EngineResult};
use crate::model::ArtifactManifestEntry;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

pub struct ChangeLayout {
    root: PathBuf,
}

impl ChangeLayout {
    pub fn new(change_id: &str) -> Self {
        Self {
            root: PathBuf::from("openspec/changes").join(change_id),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ensure(&self) -> EngineResult<()> {
        std::fs::create_dir_all(&self.root)?;
        Ok(())
    }

    /// Write `contents` to `relative_path` under the change root, atomically:
    /// write to a sibling `.tmp` file, then rename over the target. Returns
    /// the manifest entry (sha256 + size) for the checkpoint.
    pub fn put_artifact(
        &self,
        relative_path: &str,
        contents: &[u8],
    ) -> EngineResult<ArtifactManifestEntry> {
        let target = self.root.join(relative_path);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = target.with_extension(format!(
            "{}.tmp",
            target.extension().and_then(|e| e.to_str()).unwrap_or("")
        ));
        std::fs::write(&tmp, contents)?;
        std::fs::rename(&tmp, &target)?;

        let mut hasher = Sha256::new();
        hasher.update(contents);
        Ok(ArtifactManifestEntry {
            path: relative_path.to_string(),
            sha256: format!("{:x}", hasher.finalize()),
            size: contents.len() as u64,
        })
    }

    pub fn read_artifact(&self, relative_path: &str) -> EngineResult<Vec<u8>> {
        Ok(std::fs::read(self.root.join(relative_path))?)
    }

    /// Verify the on-disk content of every manifest entry still matches its
    /// recorded hash. A drift means a later stage mutated an earlier stage's
    /// artifact, which the engine surfaces as `ArtifactConflict`.
    pub fn verify_manifest(
        &self,
        manifest: &[ArtifactManifestEntry],
        stage_index: usize,
    ) -> EngineResult<()> {
        for entry in manifest {
            let contents = self.read_artifact(&entry.path)?;
            let mut hasher = Sha256::new();
            hasher.update(&contents);
            let actual = format!("{:x}", hasher.finalize());
            if actual != entry.sha256 {
                return Err(EngineError::ArtifactConflict {
                    stage_index,
                    path: entry.path.clone(),
                });
            }
        }
        Ok(())
    }
}
