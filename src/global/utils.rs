use std::path::PathBuf;
use anyhow::{anyhow, Result};
use directories::ProjectDirs;

pub fn get_global_config_dir() -> Result<PathBuf> {
    let (config_dir, _) = get_global_dirs()?;
    Ok(config_dir)
}

pub fn get_global_data_dir() -> Result<PathBuf> {
    let (_, data_dir) = get_global_dirs()?;
    Ok(data_dir)
}

/// Where binaries go when `settings.binary_dir` is not set.
pub fn get_default_binary_dir() -> Result<PathBuf> {
    Ok(get_global_data_dir()?.join("bin"))
}

/// Fallback config file, read when the requested one does not exist.
pub fn get_global_config_file() -> Result<PathBuf> {
    Ok(get_global_config_dir()?.join("nodefetch.toml"))
}

pub fn get_global_dirs() -> Result<(PathBuf, PathBuf)> {
    let proj_dirs = ProjectDirs::from("org", "nodefetch", "nodefetch")
        .ok_or_else(|| anyhow!("Could not get project directories"))?;

    let config_dir = proj_dirs.config_dir().to_path_buf();
    let data_dir = proj_dirs.data_dir().to_path_buf();

    Ok((config_dir, data_dir))
}
