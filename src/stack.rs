use crate::{
    engine::{Engine, LoadedPatch},
    error::EngineError,
    repo::{find_patch, find_repo, Patch, PatchDesc, PatchKey, Repository},
};
use anyhow::{bail, Result};
use log::{debug, error, info, warn};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingDependency {
    pub patch: PatchKey,
    pub dependency: PatchDesc,
}

#[derive(Debug, Clone)]
pub struct StackReport {
    pub archives: Vec<String>,
    pub registered: usize,
    pub missing: Vec<MissingDependency>,
}

/// Resolves the dependency closure of selected patches into the engine stack.
///
/// One builder covers one setup run: every patch is bootstrapped and
/// registered at most once, even when several selections share
/// dependencies or dependencies form a cycle.
pub struct StackBuilder<'r> {
    repos: &'r [Repository],
    known: HashSet<PatchKey>,
    missing: Vec<MissingDependency>,
}

impl<'r> StackBuilder<'r> {
    pub fn new(repos: &'r [Repository]) -> Self {
        Self {
            repos,
            known: HashSet::new(),
            missing: Vec::new(),
        }
    }

    pub fn registered(&self) -> usize {
        self.known.len()
    }

    pub fn add_to_stack<E: Engine + ?Sized>(
        &mut self,
        engine: &mut E,
        patch: &'r Patch,
    ) -> Result<(), EngineError> {
        // Marked before recursing so cycles terminate.
        if !self.known.insert(patch.key()) {
            return Ok(());
        }

        let repo = find_repo(self.repos, patch.repo_id()).ok_or_else(|| {
            EngineError::Bootstrap {
                repo_id: patch.repo_id().to_string(),
                patch_id: patch.id.clone(),
                reason: "repository was not discovered".to_string(),
            }
        })?;

        let archive = engine.bootstrap(repo, &patch.desc())?;
        let archive = patch.set_archive(archive);
        let loaded = engine.parse_archive(archive)?;

        for dependency in &loaded.dependencies {
            match find_patch(self.repos, Some(repo), dependency) {
                Some(resolved) => self.add_to_stack(engine, resolved)?,
                None => {
                    warn!(
                        "dependency '{dependency}' of patch '{}' not met",
                        patch.key()
                    );
                    self.missing.push(MissingDependency {
                        patch: patch.key(),
                        dependency: dependency.clone(),
                    });
                }
            }
        }

        register(engine, loaded);
        Ok(())
    }

    pub fn finish<E: Engine + ?Sized>(self, engine: &E) -> StackReport {
        StackReport {
            archives: stack_archives(engine),
            registered: self.registered(),
            missing: self.missing,
        }
    }
}

fn register<E: Engine + ?Sized>(engine: &mut E, patch: LoadedPatch) {
    debug!("stacking {} ({})", patch.id, patch.archive);
    engine.stack_append(patch);
}

pub fn stack_archives<E: Engine + ?Sized>(engine: &E) -> Vec<String> {
    engine
        .stack()
        .iter()
        .map(|entry| entry.archive.clone())
        .collect()
}

/// Rebuilds the engine stack for `selection`, in selection order.
///
/// On an engine failure the partially built stack is cleared before the
/// error is returned, so nothing half-resolved can be persisted.
pub fn prepare_stack<'r, E: Engine + ?Sized>(
    engine: &mut E,
    repos: &'r [Repository],
    selection: &[&'r Patch],
) -> Result<StackReport, EngineError> {
    engine.stack_clear();
    let mut builder = StackBuilder::new(repos);
    for &patch in selection {
        if let Err(err) = builder.add_to_stack(engine, patch) {
            error!("resolving {} failed: {err}", patch.key());
            engine.stack_clear();
            return Err(err);
        }
    }
    let report = builder.finish(engine);
    info!(
        "stack ready: {} patch(es), {} unmet dependencies",
        report.archives.len(),
        report.missing.len()
    );
    Ok(report)
}

pub fn resolve_selection<'r>(
    repos: &'r [Repository],
    selection: &[PatchDesc],
) -> Result<Vec<&'r Patch>> {
    let mut patches = Vec::with_capacity(selection.len());
    for desc in selection {
        let Some(patch) = find_patch(repos, None, desc) else {
            bail!("patch '{desc}' not found in any discovered repository");
        };
        patches.push(patch);
    }
    Ok(patches)
}
