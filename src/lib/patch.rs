use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::lib::error::{ManifestError, RecommenderError, Result};
use crate::lib::manifest::{
    ManifestUpdater, declared_resources, document_contains, find_manifest_files,
};
use crate::lib::model::{ResourceKind, WorkloadKind, WorkloadTarget};
use crate::lib::recommender::{Recommendation, RecommendationId};

/// Recommendations the user accepted. Only `Ok` recommendations can be selected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    ids: BTreeSet<RecommendationId>,
}

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `Ok` recommendation
    pub fn apply_all(recommendations: &[Recommendation]) -> Self {
        Self {
            ids: recommendations
                .iter()
                .filter(|r| r.is_ok())
                .map(Recommendation::id)
                .collect(),
        }
    }

    /// Flip one recommendation. Returns whether it is selected afterwards.
    pub fn toggle(&mut self, recommendation: &Recommendation) -> bool {
        if !recommendation.is_ok() {
            return false;
        }
        let id = recommendation.id();
        if !self.ids.remove(&id) {
            self.ids.insert(id);
            return true;
        }
        false
    }

    pub fn contains(&self, recommendation: &Recommendation) -> bool {
        self.ids.contains(&recommendation.id())
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Selected recommendations, in list order
    pub fn selected<'a>(&self, recommendations: &'a [Recommendation]) -> Vec<&'a Recommendation> {
        recommendations
            .iter()
            .filter(|r| r.is_ok() && self.contains(r))
            .collect()
    }
}

/// New request and limit for one container field, in base units
#[derive(Debug, Clone, PartialEq)]
pub struct FieldEdit {
    pub target: WorkloadTarget,
    pub workload_kind: WorkloadKind,
    pub resource: ResourceKind,
    pub request: f64,
    pub limit: f64,
}

impl FieldEdit {
    pub fn from_recommendation(recommendation: &Recommendation) -> Option<Self> {
        Some(Self {
            target: recommendation.target.clone(),
            workload_kind: recommendation.workload_kind,
            resource: recommendation.resource,
            request: recommendation.final_request?,
            limit: recommendation.final_limit?,
        })
    }
}

/// A selected recommendation with no manifest to apply it to
#[derive(Debug, Clone, PartialEq)]
pub struct Unlocated {
    pub id: RecommendationId,
    pub error: ManifestError,
}

/// Outcome of writing a patch set
#[derive(Debug, Clone, Default)]
pub struct Applied {
    /// Files whose content changed
    pub changed_files: Vec<PathBuf>,
    /// Changes dropped because their file could not be edited
    pub skipped: Vec<Unlocated>,
}

/// Edits grouped by manifest file (paths relative to the manifest root)
#[derive(Debug, Clone, Default)]
pub struct PatchSet {
    files: BTreeMap<PathBuf, Vec<FieldEdit>>,
    changes: Vec<Recommendation>,
}

impl PatchSet {
    /// Map each selected recommendation onto the first manifest declaring its target.
    ///
    /// Recommendations outside `selection` are never included. Values are re-capped
    /// against the request and limit the manifest itself declares.
    pub fn locate(
        recommendations: &[Recommendation],
        selection: &Selection,
        manifests: &[(PathBuf, String)],
    ) -> (Self, Vec<Unlocated>) {
        let mut patch_set = Self::default();
        let mut unlocated = Vec::new();

        for recommendation in selection.selected(recommendations) {
            let target = &recommendation.target;
            let workload_kind = recommendation.workload_kind;

            let found = manifests.iter().find(|(path, text)| {
                match document_contains(text, target, workload_kind) {
                    Ok(found) => found,
                    Err(e) => {
                        warn!("Skipping unparseable manifest {}: {}", path.display(), e);
                        false
                    }
                }
            });

            let Some((path, text)) = found else {
                unlocated.push(Unlocated {
                    id: recommendation.id(),
                    error: ManifestError::TargetNotFound(format!(
                        "{} ({})",
                        target,
                        workload_kind.as_str()
                    )),
                });
                continue;
            };

            let change = match declared_resources(
                text,
                target,
                workload_kind,
                recommendation.resource,
            ) {
                Ok(Some(declared)) if declared != recommendation.current => {
                    debug!(
                        "{} {} in {} differs from the cluster, re-capping",
                        target,
                        recommendation.resource,
                        path.display()
                    );
                    recommendation.against_manifest(declared)
                }
                _ => recommendation.clone(),
            };
            let Some(edit) = FieldEdit::from_recommendation(&change) else {
                continue;
            };

            debug!("{} -> {}", target, path.display());
            patch_set.files.entry(path.clone()).or_default().push(edit);
            patch_set.changes.push(change);
        }

        info!(
            "Located {} changes in {} files, {} unlocated",
            patch_set.changes.len(),
            patch_set.files.len(),
            unlocated.len()
        );
        (patch_set, unlocated)
    }

    /// Read every manifest below `root`, keyed by path relative to it
    pub fn load_manifests(root: &Path) -> Result<Vec<(PathBuf, String)>> {
        find_manifest_files(root)?
            .into_iter()
            .map(|path| {
                let text = fs::read_to_string(&path)?;
                let relative = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
                Ok((relative, text))
            })
            .collect()
    }

    /// Write the edits below `root`.
    ///
    /// A file that no longer parses or no longer holds its targets is left untouched
    /// and its changes are dropped from the set. The other files are still written.
    /// I/O errors abort.
    pub fn apply_to(&mut self, root: &Path) -> Result<Applied> {
        let mut applied = Applied::default();
        let mut failed = Vec::new();

        for (path, edits) in &self.files {
            match ManifestUpdater::apply_file(&root.join(path), edits) {
                Ok(true) => applied.changed_files.push(path.clone()),
                Ok(false) => {}
                Err(RecommenderError::Manifest(error)) => {
                    warn!("Leaving {} unchanged: {}", path.display(), error);
                    applied.skipped.extend(edits.iter().map(|edit| Unlocated {
                        id: RecommendationId {
                            target: edit.target.clone(),
                            resource: edit.resource,
                        },
                        error: error.clone(),
                    }));
                    failed.push(path.clone());
                }
                Err(e) => return Err(e),
            }
        }

        for path in failed {
            self.files.remove(&path);
        }
        self.changes
            .retain(|change| !applied.skipped.iter().any(|s| s.id == change.id()));
        Ok(applied)
    }

    pub fn files(&self) -> impl Iterator<Item = (&PathBuf, &Vec<FieldEdit>)> {
        self.files.iter()
    }

    /// The recommendations behind the edits
    pub fn changes(&self) -> &[Recommendation] {
        &self.changes
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}
