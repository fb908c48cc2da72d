use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{IoResultExt, Result};
use crate::filter::Filters;
use crate::placer::PlacerChoice;
use crate::warehouse::SiloUri;
use crate::workspace::Workspace;

/// settings stored in a toml file
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// root of the local workspace (arena cache, temp and cow layers)
    pub workspace: PathBuf,
    /// how arenas are placed into an assembled root
    #[serde(default)]
    pub placer: PlacerChoice,
    /// filter specs applied when scanning, e.g. `"mtime"` or `"uid 0"`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scan_filters: Vec<String>,
    /// filter specs applied to materialized arenas
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub materialize_filters: Vec<String>,
    /// warehouses tried in order when none are given explicitly
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warehouses: Vec<String>,
}

impl Config {
    /// create a config using `workspace` and defaults for everything else
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
            ..Self::default()
        }
    }

    /// load config from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).with_path(path)?;
        let config: Config = toml::from_str(&content)?;
        // surface bad specs at load time rather than at first use
        config.scan_filters()?;
        config.materialize_filters()?;
        config.warehouses()?;
        Ok(config)
    }

    /// save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).with_path(path)?;
        Ok(())
    }

    pub fn scan_filters(&self) -> Result<Filters> {
        Filters::parse(&self.scan_filters)
    }

    pub fn materialize_filters(&self) -> Result<Filters> {
        Filters::parse(&self.materialize_filters)
    }

    /// configured warehouses, parsed
    pub fn warehouses(&self) -> Result<Vec<SiloUri>> {
        self.warehouses.iter().map(|u| SiloUri::parse(u)).collect()
    }

    /// open (creating if needed) the configured workspace
    pub fn open_workspace(&self) -> Result<Workspace> {
        Workspace::open(&self.workspace)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace: PathBuf::from("/var/lib/transmat"),
            placer: PlacerChoice::Auto,
            scan_filters: vec![],
            materialize_filters: vec![],
            warehouses: vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::filter::Filter;
    use tempfile::tempdir;

    #[test]
    fn test_config_toml_roundtrip() {
        let config = Config {
            workspace: PathBuf::from("/srv/transmat"),
            placer: PlacerChoice::Overlay,
            scan_filters: vec!["uid 0".into(), "gid 0".into(), "mtime".into()],
            materialize_filters: vec!["mtime keep".into()],
            warehouses: vec![
                "file+ca:///srv/wares".into(),
                "https+ca://mirror.example.com/wares".into(),
            ],
        };

        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn test_config_minimal_toml() {
        let toml_str = r#"
workspace = "/tmp/ws"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.placer, PlacerChoice::Auto);
        assert!(config.warehouses().unwrap().is_empty());
        assert!(config.scan_filters().unwrap().is_keep_all());
    }

    #[test]
    fn test_config_filters() {
        let mut config = Config::new("/tmp/ws");
        config.scan_filters = vec!["uid 0".into(), "mtime @1000".into()];
        let filters = config.scan_filters().unwrap();
        assert_eq!(filters.uid, Filter::Flatten(0));
        assert_eq!(filters.gid, Filter::Keep);
        assert_eq!(filters.mtime, Filter::Flatten(1000));
    }

    #[test]
    fn test_config_save_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("transmat.toml");
        let mut config = Config::new(dir.path().join("ws"));
        config.warehouses = vec![format!("file+ca://{}", dir.path().join("wares").display())];
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded, config);
        let ws = loaded.open_workspace().unwrap();
        assert!(ws.committed_path().is_dir());
    }

    #[test]
    fn test_config_load_rejects_bad_values() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.toml");

        std::fs::write(&path, "workspace = \"/ws\"\nplacer = \"rsync\"\n").unwrap();
        assert_eq!(Config::load(&path).unwrap_err().kind(), ErrorKind::Config);

        std::fs::write(&path, "workspace = \"/ws\"\nscan_filters = [\"owner 0\"]\n").unwrap();
        assert_eq!(Config::load(&path).unwrap_err().kind(), ErrorKind::Config);

        std::fs::write(&path, "workspace = \"/ws\"\nwarehouses = [\"ftp://x\"]\n").unwrap();
        assert_eq!(Config::load(&path).unwrap_err().kind(), ErrorKind::Config);
    }
}
