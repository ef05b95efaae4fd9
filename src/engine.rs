use crate::{
    error::EngineError,
    repo::{PatchDesc, Repository},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedPatch {
    pub id: String,
    pub title: Option<String>,
    pub archive: String,
    pub dependencies: Vec<PatchDesc>,
}

pub trait Engine {
    fn discover(&mut self, start_url: Option<&str>) -> Result<Vec<Repository>, EngineError>;

    fn bootstrap(&mut self, repo: &Repository, desc: &PatchDesc) -> Result<String, EngineError>;

    fn parse_archive(&mut self, archive: &str) -> Result<LoadedPatch, EngineError>;

    fn stack_append(&mut self, patch: LoadedPatch);

    fn stack_clear(&mut self);

    fn stack(&self) -> &[LoadedPatch];
}

pub trait ConfigStore {
    fn get_bool(&mut self, key: &str, default: bool) -> bool;
    fn get_int(&mut self, key: &str, default: i64) -> i64;
    fn set_bool(&mut self, key: &str, value: bool) -> Result<(), EngineError>;
    fn set_int(&mut self, key: &str, value: i64) -> Result<(), EngineError>;
}
