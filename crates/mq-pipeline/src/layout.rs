//! Project directory conventions

use std::path::{Path, PathBuf};

/// Renderer locations tried in order, relative to the project root
pub const RENDERER_CANDIDATES: [&str; 2] = ["build/test/faust_render", "build/faust_render"];

/// Where modules, configs and the renderer live inside a project
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectLayout {
    root: PathBuf,
}

impl ProjectLayout {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `src/modules/<module>`
    pub fn module_dir(&self, module: &str) -> PathBuf {
        self.root.join("src").join("modules").join(module)
    }

    /// `src/modules/<module>/test_config.json`
    pub fn config_path(&self, module: &str) -> PathBuf {
        self.module_dir(module).join("test_config.json")
    }

    pub fn renderer_candidates(&self) -> Vec<PathBuf> {
        RENDERER_CANDIDATES.iter().map(|rel| self.root.join(rel)).collect()
    }

    /// First renderer candidate that exists on disk
    pub fn find_renderer(&self) -> Option<PathBuf> {
        self.renderer_candidates().into_iter().find(|p| p.is_file())
    }

    /// Module directory names under `src/modules`, sorted
    pub fn module_names(&self) -> std::io::Result<Vec<String>> {
        let modules_dir = self.root.join("src").join("modules");
        let mut names = Vec::new();
        for entry in std::fs::read_dir(modules_dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }
}

impl Default for ProjectLayout {
    fn default() -> Self {
        Self::new(".")
    }
}
