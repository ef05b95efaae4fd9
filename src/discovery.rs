use crate::{error::EngineError, local::RepoJs};
use log::{debug, info, warn};
use std::{
    collections::{HashSet, VecDeque},
    fs,
    path::Path,
    time::Duration,
};

const USER_AGENT: &str = concat!("thcrap-setup/", env!("CARGO_PKG_VERSION"));

pub trait Fetch {
    fn get_text(&self, url: &str) -> Result<String, EngineError>;
}

pub struct HttpFetch {
    agent: ureq::Agent,
}

impl HttpFetch {
    pub fn new() -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(5))
            .timeout_read(Duration::from_secs(20))
            .timeout_write(Duration::from_secs(10))
            .user_agent(USER_AGENT)
            .build();
        Self { agent }
    }
}

impl Default for HttpFetch {
    fn default() -> Self {
        Self::new()
    }
}

impl Fetch for HttpFetch {
    fn get_text(&self, url: &str) -> Result<String, EngineError> {
        debug!("GET {url}");
        let response = self.agent.get(url).call().map_err(|err| EngineError::Http {
            url: url.to_string(),
            source: Box::new(err),
        })?;
        response.into_string().map_err(|source| EngineError::Read {
            url: url.to_string(),
            source,
        })
    }
}

pub fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path)
}

/// Mirrors `repo.js` of the start repository and, breadth-first, of every
/// neighbor it links to into `repos_dir/<id>/repo.js`.
///
/// Only a failure at the start URL is an error. Returns the mirrored ids in
/// visit order.
pub fn mirror_repositories<F: Fetch + ?Sized>(
    fetch: &F,
    start_url: &str,
    repos_dir: &Path,
) -> Result<Vec<String>, EngineError> {
    let mut queue = VecDeque::from([start_url.trim_end_matches('/').to_string()]);
    let mut visited = HashSet::new();
    let mut mirrored = Vec::new();

    while let Some(url) = queue.pop_front() {
        if !visited.insert(url.clone()) {
            continue;
        }

        let (repo, raw) = match fetch_repo(fetch, &url) {
            Ok(fetched) => fetched,
            Err(err) if url == start_url.trim_end_matches('/') => {
                return Err(EngineError::Discovery {
                    url,
                    reason: err.to_string(),
                });
            }
            Err(err) => {
                warn!("skipping neighbor {url}: {err}");
                continue;
            }
        };

        if mirrored.contains(&repo.id) {
            continue;
        }
        write_repo(repos_dir, &repo.id, &raw)?;
        info!("discovered repository {} at {url}", repo.id);

        for neighbor in &repo.neighbors {
            let neighbor = neighbor.trim_end_matches('/').to_string();
            if !visited.contains(&neighbor) {
                queue.push_back(neighbor);
            }
        }
        mirrored.push(repo.id);
    }

    Ok(mirrored)
}

fn fetch_repo<F: Fetch + ?Sized>(fetch: &F, url: &str) -> Result<(RepoJs, String), EngineError> {
    let repo_url = join_url(url, "repo.js");
    let raw = fetch.get_text(&repo_url)?;
    let repo: RepoJs = serde_json::from_str(&raw).map_err(|err| EngineError::Discovery {
        url: repo_url.clone(),
        reason: err.to_string(),
    })?;
    if repo.id.trim().is_empty() || repo.id.contains(['/', '\\']) || repo.id.contains("..") {
        return Err(EngineError::Discovery {
            url: repo_url,
            reason: format!("invalid repository id '{}'", repo.id),
        });
    }
    Ok((repo, raw))
}

fn write_repo(repos_dir: &Path, repo_id: &str, raw: &str) -> Result<(), EngineError> {
    let dir = repos_dir.join(repo_id);
    fs::create_dir_all(&dir).map_err(|err| EngineError::io("create repo dir", &dir, err))?;
    let path = dir.join("repo.js");
    fs::write(&path, raw).map_err(|err| EngineError::io("write repo.js", &path, err))
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::{cell::RefCell, collections::HashMap};

    #[derive(Default)]
    pub struct FakeFetch {
        pub pages: HashMap<String, String>,
        pub requests: RefCell<Vec<String>>,
    }

    impl FakeFetch {
        pub fn page(mut self, url: &str, body: &str) -> Self {
            self.pages.insert(url.to_string(), body.to_string());
            self
        }
    }

    impl Fetch for FakeFetch {
        fn get_text(&self, url: &str) -> Result<String, EngineError> {
            self.requests.borrow_mut().push(url.to_string());
            self.pages
                .get(url)
                .cloned()
                .ok_or_else(|| EngineError::Discovery {
                    url: url.to_string(),
                    reason: "404".to_string(),
                })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{fake::FakeFetch, *};

    fn repo_js(id: &str, neighbors: &[&str]) -> String {
        serde_json::json!({
            "id": id,
            "title": format!("{id} repository"),
            "servers": [format!("https://{id}.example/")],
            "neighbors": neighbors,
            "patches": { "base": "Base patch" },
        })
        .to_string()
    }

    #[test]
    fn follows_neighbors_breadth_first_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fetch = FakeFetch::default()
            .page(
                "https://start.example/repo.js",
                &repo_js("start", &["https://a.example/", "https://b.example"]),
            )
            .page(
                "https://a.example/repo.js",
                &repo_js("a", &["https://start.example", "https://b.example/"]),
            )
            .page("https://b.example/repo.js", &repo_js("b", &[]));

        let ids = mirror_repositories(&fetch, "https://start.example/", dir.path()).expect("mirror");

        assert_eq!(ids, vec!["start", "a", "b"]);
        assert_eq!(fetch.requests.borrow().len(), 3);
        assert!(dir.path().join("b").join("repo.js").is_file());
    }

    #[test]
    fn mirrored_repo_js_is_stored_verbatim() {
        let dir = tempfile::tempdir().expect("tempdir");
        let body = r#"{"id":"start","patches":{"lang_en":"English","aaa":null},"extra":{"keep":1}}"#;
        let fetch = FakeFetch::default().page("https://start.example/repo.js", body);

        mirror_repositories(&fetch, "https://start.example", dir.path()).expect("mirror");

        let stored = fs::read_to_string(dir.path().join("start").join("repo.js")).expect("read");
        assert_eq!(stored, body);
    }

    #[test]
    fn unreachable_neighbor_is_skipped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fetch = FakeFetch::default().page(
            "https://start.example/repo.js",
            &repo_js("start", &["https://gone.example"]),
        );

        let ids = mirror_repositories(&fetch, "https://start.example", dir.path()).expect("mirror");
        assert_eq!(ids, vec!["start"]);
    }

    #[test]
    fn unreachable_start_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fetch = FakeFetch::default();
        let err = mirror_repositories(&fetch, "https://start.example", dir.path()).unwrap_err();
        assert!(matches!(err, EngineError::Discovery { .. }));
    }

    #[test]
    fn rejects_path_like_repo_ids() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fetch =
            FakeFetch::default().page("https://start.example/repo.js", &repo_js("../evil", &[]));
        assert!(mirror_repositories(&fetch, "https://start.example", dir.path()).is_err());
    }
}
