//! On-disk layout for connection profiles, user lists, and stand specs
//! (SPEC_FULL.md §6), one YAML file per named entity — grounded on
//! `original_source/modules/connections.py` and `modules/groups.py`'s use
//! of a `config/`-like directory of individually named files, and on the
//! teacher's `mvirt-cli` already depending on `dirs` for locating a
//! home/config directory.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use pve_client::ConnectionProfile;
use serde::{Deserialize, Serialize};
use stand_core::model::{Stand, UserList};

#[derive(Debug, Clone)]
pub struct Paths {
    pub config_dir: PathBuf,
    pub data_dir: PathBuf,
}

impl Paths {
    pub fn resolve(config_dir: Option<PathBuf>, data_dir: Option<PathBuf>) -> Self {
        let config_dir = config_dir.unwrap_or_else(|| {
            dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("stand")
        });
        let data_dir = data_dir.unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("stand")
        });
        Self { config_dir, data_dir }
    }

    pub fn connections_file(&self) -> PathBuf {
        self.config_dir.join("connections.yaml")
    }

    pub fn user_lists_dir(&self) -> PathBuf {
        self.config_dir.join("user_lists")
    }

    pub fn stands_dir(&self) -> PathBuf {
        self.config_dir.join("stands")
    }

    pub fn registry_db(&self) -> PathBuf {
        self.data_dir.join("registry.redb")
    }

    pub fn audit_db(&self) -> PathBuf {
        self.data_dir.join("audit.redb")
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ConnectionCatalog {
    pub default: Option<String>,
    #[serde(default)]
    pub connections: Vec<ConnectionProfile>,
}

impl ConnectionCatalog {
    pub fn load(paths: &Paths) -> Result<Self> {
        load_yaml_or_default(&paths.connections_file())
    }

    pub fn save(&self, paths: &Paths) -> Result<()> {
        save_yaml(&paths.connections_file(), self)
    }

    pub fn find(&self, name: &str) -> Option<&ConnectionProfile> {
        self.connections.iter().find(|c| c.name == name)
    }

    pub fn resolve_active<'a>(&'a self, requested: Option<&str>) -> Result<&'a ConnectionProfile> {
        let name = requested
            .map(str::to_string)
            .or_else(|| self.default.clone())
            .context("no connection specified and no default connection set")?;
        self.find(&name)
            .with_context(|| format!("no such connection: {name}"))
    }
}

pub fn load_user_list(paths: &Paths, name: &str) -> Result<UserList> {
    let path = paths.user_lists_dir().join(format!("{name}.yaml"));
    load_yaml(&path)
}

pub fn save_user_list(paths: &Paths, list: &UserList) -> Result<()> {
    let path = paths.user_lists_dir().join(format!("{}.yaml", list.name));
    save_yaml(&path, list)
}

pub fn remove_user_list(paths: &Paths, name: &str) -> Result<()> {
    let path = paths.user_lists_dir().join(format!("{name}.yaml"));
    fs::remove_file(&path).with_context(|| format!("removing {}", path.display()))
}

pub fn list_user_lists(paths: &Paths) -> Result<Vec<String>> {
    list_yaml_stems(&paths.user_lists_dir())
}

pub fn load_stand(paths: &Paths, name: &str) -> Result<Stand> {
    let path = paths.stands_dir().join(format!("{name}.yaml"));
    load_yaml(&path)
}

pub fn save_stand(paths: &Paths, name: &str, stand: &Stand) -> Result<()> {
    let path = paths.stands_dir().join(format!("{name}.yaml"));
    save_yaml(&path, stand)
}

pub fn remove_stand(paths: &Paths, name: &str) -> Result<()> {
    let path = paths.stands_dir().join(format!("{name}.yaml"));
    fs::remove_file(&path).with_context(|| format!("removing {}", path.display()))
}

pub fn list_stands(paths: &Paths) -> Result<Vec<String>> {
    list_yaml_stems(&paths.stands_dir())
}

fn list_yaml_stems(dir: &Path) -> Result<Vec<String>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if let Some(stem) = entry.path().file_stem().and_then(|s| s.to_str()) {
            out.push(stem.to_string());
        }
    }
    out.sort();
    Ok(out)
}

fn load_yaml<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let raw = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_yaml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

fn load_yaml_or_default<T: for<'de> Deserialize<'de> + Default>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Ok(T::default());
    }
    load_yaml(path)
}

fn save_yaml<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    let raw = serde_yaml::to_string(value)?;
    fs::write(path, raw).with_context(|| format!("writing {}", path.display()))
}
