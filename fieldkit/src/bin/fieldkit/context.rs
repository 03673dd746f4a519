use anyhow::{Context, Result};
use fieldkit::EngineSettings;
use std::path::{Path, PathBuf};

/// Environment variable pointing at an explicit config file
pub const CONFIG_ENV: &str = "FIELDKIT_CONFIG";

/// Project context for fieldkit operations
pub struct ProjectContext {
    /// Directory holding `.fieldkit/`, if one was found
    pub project_root: Option<PathBuf>,
    /// Config file the settings were loaded from
    pub config_path: Option<PathBuf>,
    /// Loaded (or default) engine settings
    pub settings: EngineSettings,
}

impl ProjectContext {
    /// Load context from `FIELDKIT_CONFIG`, or from the current directory and its ancestors
    pub fn find() -> Result<Self> {
        if let Ok(path) = std::env::var(CONFIG_ENV)
            && !path.trim().is_empty()
        {
            return Self::from_config_path(PathBuf::from(path));
        }
        let current_dir = std::env::current_dir().context("Failed to get current directory")?;
        Self::find_from(&current_dir)
    }

    /// Find project context starting from the given directory. Falls back to defaults when no
    /// `.fieldkit/config.toml` exists in any ancestor.
    pub fn find_from(start: &Path) -> Result<Self> {
        match Self::find_project_root(start) {
            Some(root) => {
                let config_path = root.join(".fieldkit").join("config.toml");
                let mut ctx = Self::from_config_path(config_path)?;
                ctx.project_root = Some(root);
                Ok(ctx)
            }
            None => Ok(Self {
                project_root: None,
                config_path: None,
                settings: EngineSettings::default(),
            }),
        }
    }

    /// Load settings from an explicit file
    pub fn from_config_path(config_path: PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;
        let settings = EngineSettings::from_toml_str(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;
        Ok(Self {
            project_root: None,
            config_path: Some(config_path),
            settings,
        })
    }

    /// Nearest ancestor containing `.fieldkit/config.toml`
    fn find_project_root(start: &Path) -> Option<PathBuf> {
        let mut current = start.to_path_buf();
        loop {
            if current.join(".fieldkit").join("config.toml").is_file() {
                return Some(current);
            }
            if !current.pop() {
                return None;
            }
        }
    }

    pub fn describe(&self) -> String {
        match (&self.project_root, &self.config_path) {
            (Some(root), _) => format!("project settings in {}", root.display()),
            (None, Some(path)) => format!("settings from {}", path.display()),
            (None, None) => "default settings".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_config() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ProjectContext::find_from(dir.path()).unwrap();
        assert!(ctx.config_path.is_none());
        assert_eq!(ctx.settings, EngineSettings::default());
    }

    #[test]
    fn test_config_found_in_ancestor() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".fieldkit")).unwrap();
        std::fs::write(
            dir.path().join(".fieldkit/config.toml"),
            "[search]\ndefault_page_size = 10\n",
        )
        .unwrap();
        let nested = dir.path().join("a/b");
        std::fs::create_dir_all(&nested).unwrap();

        let ctx = ProjectContext::find_from(&nested).unwrap();
        assert_eq!(ctx.project_root.as_deref(), Some(dir.path()));
        assert_eq!(ctx.settings.search.default_page_size, 10);
        assert_eq!(ctx.settings.search.max_page_size, 100);
    }

    #[test]
    fn test_invalid_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[search\n").unwrap();
        assert!(ProjectContext::from_config_path(path).is_err());
    }
}
