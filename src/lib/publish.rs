//! Publishing accepted recommendations.
//!
//! Pull request mode clones the base branch into a temporary directory, edits the
//! manifests there, commits the changed files as one commit, pushes a new branch
//! (never forced) and opens a pull request through the hosting provider's REST API.
//! Local mode edits a manifest directory in place.

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use git2::{Cred, FetchOptions, PushOptions, RemoteCallbacks, Repository, Signature};
use log::{debug, info, warn};
use serde_json::json;
use tempfile::TempDir;
use url::Url;

use crate::lib::config::{ApplyConfig, GitConnectionType, GitProvider, RepositoryConfig};
use crate::lib::error::{ConfigError, PublishError, Result};
use crate::lib::patch::{PatchSet, Selection, Unlocated};
use crate::lib::quantity::display_quantity;
use crate::lib::recommender::Recommendation;
use crate::lib::review::{ApplyMode, PublishStep};

const NO_PULL_REQUEST_API: &str = "no pull request API for this repository host, open it manually";

/// Everything needed to describe one publish attempt
#[derive(Debug, Clone, PartialEq)]
pub struct PullRequestSpec {
    pub repository: Url,
    pub base_branch: String,
    pub branch: String,
    pub commit_message: String,
    pub changed_files: Vec<PathBuf>,
    pub title: String,
    pub body: String,
}

impl PullRequestSpec {
    pub fn new(repo: &RepositoryConfig, patch_set: &PatchSet, changed_files: Vec<PathBuf>) -> Self {
        let changes = patch_set.changes();
        let title = format!(
            "chore: apply resource recommendations ({})",
            Utc::now().format("%Y-%m-%d")
        );

        let mut commit_message = format!(
            "chore: apply resource recommendations\n\nUpdated requests and limits for {} container resource(s):\n",
            changes.len()
        );
        for change in changes {
            commit_message.push_str(&format!("  - {} {}\n", change.target, change.resource));
        }

        Self {
            repository: repo.url.clone(),
            base_branch: repo.base_branch.clone(),
            branch: repo.branch.clone(),
            commit_message,
            body: pull_request_body(changes, &changed_files),
            changed_files,
            title,
        }
    }
}

/// Markdown summary of old and new values per target
pub fn pull_request_body(changes: &[Recommendation], changed_files: &[PathBuf]) -> String {
    let mut body = format!(
        "## Resource recommendations\n\n\
         Updates requests and limits for {} container resource(s) in {} file(s).\n\n\
         | Target | Resource | Request | Limit | Note |\n\
         |---|---|---|---|---|\n",
        changes.len(),
        changed_files.len()
    );

    for change in changes {
        let kind = change.resource;
        let note = match (change.capped, change.caution) {
            (true, true) => "capped at current limit, few samples",
            (true, false) => "capped at current limit",
            (false, true) => "few samples",
            (false, false) => "",
        };
        body.push_str(&format!(
            "| `{}` | {} | {} → {} | {} → {} | {} |\n",
            change.target,
            kind,
            display_quantity(kind, change.current.request),
            display_quantity(kind, change.final_request),
            display_quantity(kind, change.current.limit),
            display_quantity(kind, change.final_limit),
            note
        ));
    }

    body.push_str("\n### Files\n\n");
    for file in changed_files {
        body.push_str(&format!("- `{}`\n", file.display()));
    }
    body.push_str(
        "\nValues are the observed p95 plus a safety buffer. Review them before merging.\n",
    );
    body
}

/// Result of a successful pull request publish
#[derive(Debug, Clone)]
pub struct PublishOutcome {
    pub branch: String,
    pub commit: String,
    pub pull_request_url: String,
    pub changed_files: Vec<PathBuf>,
    pub unlocated: Vec<Unlocated>,
}

/// Result of a local apply
#[derive(Debug, Clone)]
pub struct LocalOutcome {
    pub changed_files: Vec<PathBuf>,
    pub unlocated: Vec<Unlocated>,
}

/// Branch pushed, pull request not opened yet
struct PushedBranch {
    spec: PullRequestSpec,
    commit: String,
    unlocated: Vec<Unlocated>,
}

/// Held for the duration of one publish
struct PublishGuard(Arc<AtomicBool>);

impl Drop for PublishGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Runs publishes one at a time
#[derive(Clone)]
pub struct PublishPipeline {
    http: reqwest::Client,
    in_progress: Arc<AtomicBool>,
    api_base: Option<String>,
}

impl Default for PublishPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl PublishPipeline {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
            in_progress: Arc::new(AtomicBool::new(false)),
            api_base: None,
        }
    }

    /// Use a fixed REST API root instead of the one derived from the repository host
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = Some(api_base.into());
        self
    }

    pub fn is_publishing(&self) -> bool {
        self.in_progress.load(Ordering::SeqCst)
    }

    fn acquire(&self) -> std::result::Result<PublishGuard, PublishError> {
        self.in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| PublishError::InProgress)?;
        Ok(PublishGuard(self.in_progress.clone()))
    }

    /// Send the selection where `apply` points for `mode`. Returns a one-line summary.
    pub async fn apply_selection(
        &self,
        recommendations: &[Recommendation],
        selection: &Selection,
        apply: &ApplyConfig,
        mode: ApplyMode,
        mut on_step: impl FnMut(PublishStep) + Send,
    ) -> Result<String> {
        match mode {
            ApplyMode::Local => {
                let dir = apply.manifest_dir.as_deref().ok_or_else(|| {
                    ConfigError::MissingRequired("--manifest-dir is required for local apply".into())
                })?;
                on_step(PublishStep::Editing);
                let outcome = self.write_local(recommendations, selection, dir)?;
                Ok(format!(
                    "Updated {} manifest file(s) under {}{}",
                    outcome.changed_files.len(),
                    dir.display(),
                    skipped_note(&outcome.unlocated)
                ))
            }
            ApplyMode::PullRequest => {
                let repo = apply.repository.as_ref().ok_or_else(|| {
                    ConfigError::MissingRequired(
                        "--manifest-url is required to publish a pull request".into(),
                    )
                })?;
                let outcome = self
                    .publish(recommendations, selection, repo, on_step)
                    .await?;
                Ok(format!(
                    "Pull request opened: {} ({} file(s) changed on {}){}",
                    outcome.pull_request_url,
                    outcome.changed_files.len(),
                    outcome.branch,
                    skipped_note(&outcome.unlocated)
                ))
            }
        }
    }

    /// Push a branch with the selected changes and open a pull request for it.
    ///
    /// Missing credentials fail before anything is cloned. Once the branch is pushed a
    /// pull request failure is reported as [`PublishError::PullRequest`] and the branch
    /// stays on the remote.
    pub async fn publish(
        &self,
        recommendations: &[Recommendation],
        selection: &Selection,
        repo: &RepositoryConfig,
        mut on_step: impl FnMut(PublishStep) + Send,
    ) -> Result<PublishOutcome> {
        let _guard = self.acquire()?;

        if selection.is_empty() {
            return Err(PublishError::EmptyPatch("no recommendations selected".into()).into());
        }
        check_credentials(repo)?;

        on_step(PublishStep::Cloning);
        let workdir = TempDir::new()?;
        debug!("Working copy at {}", workdir.path().display());

        // git2 blocks, so the clone/commit/push runs off the async workers
        let (step_tx, mut step_rx) = tokio::sync::mpsc::unbounded_channel();
        let worker = {
            let recommendations = recommendations.to_vec();
            let selection = selection.clone();
            let repo = repo.clone();
            let path = workdir.path().to_path_buf();
            tokio::task::spawn_blocking(move || {
                push_branch(&recommendations, &selection, &repo, &path, &mut |step| {
                    let _ = step_tx.send(step);
                })
            })
        };
        while let Some(step) = step_rx.recv().await {
            on_step(step);
        }
        let pushed = worker
            .await
            .map_err(|e| PublishError::Repository(format!("git worker failed: {}", e)))??;

        on_step(PublishStep::OpeningPullRequest);
        let pull_request_url = self
            .create_pull_request(repo, &pushed.spec)
            .await
            .map_err(|reason| {
                warn!(
                    "Branch {} pushed but the pull request failed: {}",
                    repo.branch, reason
                );
                PublishError::PullRequest {
                    branch: repo.branch.clone(),
                    reason,
                }
            })?;

        info!("Pull request created: {}", pull_request_url);
        Ok(PublishOutcome {
            branch: repo.branch.clone(),
            commit: pushed.commit,
            pull_request_url,
            changed_files: pushed.spec.changed_files,
            unlocated: pushed.unlocated,
        })
    }

    /// Apply the selected changes to manifests below `root`
    pub fn write_local(
        &self,
        recommendations: &[Recommendation],
        selection: &Selection,
        root: &Path,
    ) -> Result<LocalOutcome> {
        let _guard = self.acquire()?;

        if selection.is_empty() {
            return Err(PublishError::EmptyPatch("no recommendations selected".into()).into());
        }

        let manifests = PatchSet::load_manifests(root)?;
        let (mut patch_set, mut unlocated) =
            PatchSet::locate(recommendations, selection, &manifests);
        report_unlocated(&unlocated);
        if patch_set.is_empty() {
            return Err(PublishError::EmptyPatch(format!(
                "none of the {} selected targets were found under {}",
                selection.len(),
                root.display()
            ))
            .into());
        }

        let applied = patch_set.apply_to(root)?;
        let changed_files = applied.changed_files;
        unlocated.extend(applied.skipped);
        info!("Updated {} manifest files", changed_files.len());
        Ok(LocalOutcome {
            changed_files,
            unlocated,
        })
    }

    async fn create_pull_request(
        &self,
        repo: &RepositoryConfig,
        spec: &PullRequestSpec,
    ) -> std::result::Result<String, String> {
        if repo.provider == GitProvider::Generic {
            return Err(NO_PULL_REQUEST_API.into());
        }

        let api_base = self
            .api_base
            .clone()
            .or_else(|| repo.provider.api_base_url(&repo.url))
            .ok_or_else(|| "could not determine API base URL".to_string())?;
        let token = repo
            .auth_token
            .as_deref()
            .ok_or_else(|| "authentication token required for pull requests".to_string())?;
        let (owner, name) = parse_repo_owner_name(&repo.url)?;

        let (api_url, request, auth_header, url_pointer) = match repo.provider {
            GitProvider::GitHub | GitProvider::Gitea => (
                format!("{}/repos/{}/{}/pulls", api_base, owner, name),
                json!({
                    "title": spec.title,
                    "head": spec.branch,
                    "base": spec.base_branch,
                    "body": spec.body,
                }),
                ("Authorization", format!("token {}", token)),
                "/html_url",
            ),
            GitProvider::GitLab => {
                let project = format!("{}/{}", owner, name);
                (
                    format!(
                        "{}/projects/{}/merge_requests",
                        api_base,
                        urlencoding::encode(&project)
                    ),
                    json!({
                        "source_branch": spec.branch,
                        "target_branch": spec.base_branch,
                        "title": spec.title,
                        "description": spec.body,
                    }),
                    ("PRIVATE-TOKEN", token.to_string()),
                    "/web_url",
                )
            }
            GitProvider::Bitbucket => (
                format!("{}/repositories/{}/{}/pullrequests", api_base, owner, name),
                json!({
                    "title": spec.title,
                    "source": { "branch": { "name": spec.branch } },
                    "destination": { "branch": { "name": spec.base_branch } },
                    "description": spec.body,
                }),
                ("Authorization", format!("Bearer {}", token)),
                "/links/html/href",
            ),
            GitProvider::Generic => return Err(NO_PULL_REQUEST_API.into()),
        };

        debug!("POST {}", api_url);
        let response = self
            .http
            .post(&api_url)
            .header(auth_header.0, auth_header.1)
            .header("User-Agent", "rightsizer")
            .header("Accept", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| format!("failed to send pull request: {}", e))?;

        handle_api_response(response, url_pointer).await
    }
}

fn skipped_note(unlocated: &[Unlocated]) -> String {
    match unlocated.len() {
        0 => String::new(),
        n => format!(", {} selected target(s) not found in manifests", n),
    }
}

fn report_unlocated(unlocated: &[Unlocated]) {
    for item in unlocated {
        warn!(
            "Skipping {} {}: {}",
            item.id.target, item.id.resource, item.error
        );
    }
}

/// Providers with a pull request API need a token; fail before touching the remote
fn check_credentials(repo: &RepositoryConfig) -> std::result::Result<(), PublishError> {
    if repo.provider != GitProvider::Generic && repo.auth_token.is_none() {
        return Err(PublishError::Auth(format!(
            "a token is required to publish to {:?} (set --git-token)",
            repo.provider
        )));
    }
    Ok(())
}

fn auth_rejected() -> git2::Error {
    git2::Error::new(
        git2::ErrorCode::Auth,
        git2::ErrorClass::Http,
        "credentials rejected by remote",
    )
}

fn remote_callbacks<'a>(repo: &RepositoryConfig) -> RemoteCallbacks<'a> {
    let mut callbacks = RemoteCallbacks::new();
    let mut attempts = 0;

    match repo.connection_type {
        GitConnectionType::Ssh => {
            callbacks.credentials(move |_url, username_from_url, _allowed_types| {
                attempts += 1;
                if attempts > 1 {
                    return Err(auth_rejected());
                }
                Cred::ssh_key_from_agent(username_from_url.unwrap_or("git"))
            });
        }
        GitConnectionType::Https => {
            let token = repo.auth_token.clone();
            let username = repo.auth_username.clone();
            callbacks.credentials(move |_url, username_from_url, _allowed_types| {
                attempts += 1;
                if attempts > 1 {
                    return Err(auth_rejected());
                }
                match &token {
                    Some(token) => {
                        let user = username
                            .as_deref()
                            .or(username_from_url)
                            .unwrap_or("git");
                        Cred::userpass_plaintext(user, token)
                    }
                    None => Cred::default(),
                }
            });
        }
        GitConnectionType::Local => {}
    }

    callbacks
}

/// Clone, edit, commit and push. No remote state changes before the final push.
fn push_branch(
    recommendations: &[Recommendation],
    selection: &Selection,
    repo: &RepositoryConfig,
    workdir: &Path,
    on_step: &mut impl FnMut(PublishStep),
) -> Result<PushedBranch> {
    info!("Cloning {} ({})", repo.url, repo.base_branch);
    let mut fetch_options = FetchOptions::new();
    fetch_options.remote_callbacks(remote_callbacks(repo));
    let git = git2::build::RepoBuilder::new()
        .fetch_options(fetch_options)
        .branch(&repo.base_branch)
        .clone(repo.url.as_str(), workdir)?;
    let base = git.head()?.peel_to_commit()?;

    if let Ok(existing) = git.find_reference(&format!("refs/remotes/origin/{}", repo.branch)) {
        if existing.target() != Some(base.id()) {
            return Err(PublishError::Conflict(format!(
                "branch '{}' already exists on the remote with a different head",
                repo.branch
            ))
            .into());
        }
    }

    on_step(PublishStep::Editing);
    let manifests = PatchSet::load_manifests(workdir)?;
    let (mut patch_set, mut unlocated) = PatchSet::locate(recommendations, selection, &manifests);
    report_unlocated(&unlocated);
    if patch_set.is_empty() {
        return Err(PublishError::EmptyPatch(format!(
            "none of the {} selected targets were found in {}",
            selection.len(),
            repo.url
        ))
        .into());
    }

    git.branch(&repo.branch, &base, false)?;
    git.set_head(&format!("refs/heads/{}", repo.branch))?;
    let applied = patch_set.apply_to(workdir)?;
    let changed_files = applied.changed_files;
    unlocated.extend(applied.skipped);
    if changed_files.is_empty() {
        return Err(PublishError::EmptyPatch(
            "manifests already carry the recommended values".into(),
        )
        .into());
    }

    on_step(PublishStep::Committing);
    let mut index = git.index()?;
    for path in &changed_files {
        index.add_path(path)?;
    }
    index.write()?;
    let tree = git.find_tree(index.write_tree()?)?;
    let signature = Signature::now(&repo.author_name, &repo.author_email)?;
    let spec = PullRequestSpec::new(repo, &patch_set, changed_files);
    let commit = git.commit(
        Some("HEAD"),
        &signature,
        &signature,
        &spec.commit_message,
        &tree,
        &[&base],
    )?;
    info!("Created commit {}", commit);

    on_step(PublishStep::Pushing);
    push(&git, repo)?;
    info!("Pushed branch {}", repo.branch);

    Ok(PushedBranch {
        spec,
        commit: commit.to_string(),
        unlocated,
    })
}

/// Fast-forward only; a rejected ref update is a conflict
fn push(git: &Repository, repo: &RepositoryConfig) -> std::result::Result<(), PublishError> {
    let rejected: RefCell<Option<String>> = RefCell::new(None);
    let mut callbacks = remote_callbacks(repo);
    callbacks.push_update_reference(|refname, status| {
        if let Some(message) = status {
            *rejected.borrow_mut() = Some(format!("{}: {}", refname, message));
        }
        Ok(())
    });

    let mut push_options = PushOptions::new();
    push_options.remote_callbacks(callbacks);

    let refspec = format!("refs/heads/{0}:refs/heads/{0}", repo.branch);
    git.find_remote("origin")?
        .push(&[refspec.as_str()], Some(&mut push_options))?;

    match rejected.take() {
        Some(reason) => Err(PublishError::Conflict(reason)),
        None => Ok(()),
    }
}

async fn handle_api_response(
    response: reqwest::Response,
    url_pointer: &str,
) -> std::result::Result<String, String> {
    let status = response.status();
    if !status.is_success() {
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        return Err(format!("API error ({}): {}", status, error_text));
    }

    let body: serde_json::Value = response
        .json()
        .await
        .map_err(|e| format!("failed to parse API response: {}", e))?;

    body.pointer(url_pointer)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| "no URL in API response".to_string())
}

/// Owner (or group path) and repository name from the repository URL
fn parse_repo_owner_name(url: &Url) -> std::result::Result<(String, String), String> {
    let path = url.path().trim_matches('/').trim_end_matches(".git");
    match path.rsplit_once('/') {
        Some((owner, name)) if !owner.is_empty() && !name.is_empty() => {
            Ok((owner.to_string(), name.to_string()))
        }
        _ => Err(format!("could not parse owner/repo from URL: {}", url)),
    }
}
