use std::{cell::OnceCell, fmt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RepoHandle(pub usize);

#[derive(Debug, Clone)]
pub struct Repository {
    pub id: String,
    pub title: String,
    pub contact: Option<String>,
    pub servers: Vec<String>,
    pub patches: Vec<Patch>,
    handle: RepoHandle,
}

impl Repository {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        handle: RepoHandle,
        patches: impl IntoIterator<Item = (String, String)>,
    ) -> Self {
        let id = id.into();
        let patches = patches
            .into_iter()
            .map(|(patch_id, title)| Patch::new(&id, patch_id, title))
            .collect();
        Self {
            id,
            title: title.into(),
            contact: None,
            servers: Vec::new(),
            patches,
            handle,
        }
    }

    pub fn handle(&self) -> RepoHandle {
        self.handle
    }

    pub fn patch(&self, patch_id: &str) -> Option<&Patch> {
        self.patches.iter().find(|patch| patch.id == patch_id)
    }
}

#[derive(Debug, Clone)]
pub struct Patch {
    pub id: String,
    pub title: String,
    repo_id: String,
    archive: OnceCell<String>,
}

impl Patch {
    fn new(repo_id: &str, id: String, title: String) -> Self {
        Self {
            id,
            title,
            repo_id: repo_id.to_string(),
            archive: OnceCell::new(),
        }
    }

    pub fn repo_id(&self) -> &str {
        &self.repo_id
    }

    pub fn key(&self) -> PatchKey {
        PatchKey {
            repo_id: self.repo_id.clone(),
            patch_id: self.id.clone(),
        }
    }

    pub fn desc(&self) -> PatchDesc {
        PatchDesc::qualified(&self.repo_id, &self.id)
    }

    pub fn archive(&self) -> Option<&str> {
        self.archive.get().map(String::as_str)
    }

    pub fn set_archive(&self, archive: String) -> &str {
        self.archive.get_or_init(|| archive)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PatchKey {
    pub repo_id: String,
    pub patch_id: String,
}

impl fmt::Display for PatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.repo_id, self.patch_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PatchDesc {
    pub repo_id: Option<String>,
    pub patch_id: String,
}

impl PatchDesc {
    pub fn qualified(repo_id: &str, patch_id: &str) -> Self {
        Self {
            repo_id: Some(repo_id.to_string()),
            patch_id: patch_id.to_string(),
        }
    }

    pub fn relative(patch_id: &str) -> Self {
        Self {
            repo_id: None,
            patch_id: patch_id.to_string(),
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        match value.split_once('/') {
            Some((repo, patch)) => {
                let repo = repo.trim();
                let patch = patch.trim();
                if repo.is_empty() || patch.is_empty() || patch.contains('/') {
                    return None;
                }
                Some(Self::qualified(repo, patch))
            }
            None if !value.is_empty() => Some(Self::relative(value)),
            None => None,
        }
    }
}

impl fmt::Display for PatchDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repo_id {
            Some(repo_id) => write!(f, "{repo_id}/{}", self.patch_id),
            None => f.write_str(&self.patch_id),
        }
    }
}

pub fn find_repo<'a>(repos: &'a [Repository], repo_id: &str) -> Option<&'a Repository> {
    repos.iter().find(|repo| repo.id == repo_id)
}

/// Resolves a dependency reference against the discovered repositories.
///
/// A qualified reference only ever matches inside its named repository. A
/// relative one is tried in `from_repo` first, then in every repository in
/// list order.
pub fn find_patch<'a>(
    repos: &'a [Repository],
    from_repo: Option<&'a Repository>,
    desc: &PatchDesc,
) -> Option<&'a Patch> {
    if let Some(repo_id) = &desc.repo_id {
        return find_repo(repos, repo_id)?.patch(&desc.patch_id);
    }

    if let Some(patch) = from_repo.and_then(|repo| repo.patch(&desc.patch_id)) {
        return Some(patch);
    }

    repos.iter().find_map(|repo| repo.patch(&desc.patch_id))
}

#[cfg(test)]
pub(crate) fn repo(id: &str, handle: usize, patches: &[&str]) -> Repository {
    Repository::new(
        id,
        format!("{id} title"),
        RepoHandle(handle),
        patches
            .iter()
            .map(|patch| (patch.to_string(), format!("{patch} title"))),
    )
}
