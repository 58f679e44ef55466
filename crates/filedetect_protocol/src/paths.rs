use std::path::PathBuf;

/// Resolve the filedetect home directory.
///
/// Priority:
/// 1) FILEDETECT_HOME
/// 2) HOME/USERPROFILE
/// 3) ./.filedetect
pub fn filedetect_home() -> PathBuf {
    if let Ok(override_path) = std::env::var("FILEDETECT_HOME") {
        return PathBuf::from(override_path);
    }
    if let Ok(home) = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")) {
        return PathBuf::from(home).join(".filedetect");
    }
    PathBuf::from(".").join(".filedetect")
}

/// Default logs directory: ~/.filedetect/logs
pub fn default_logs_dir() -> PathBuf {
    filedetect_home().join("logs")
}

/// Default config file: ~/.filedetect/config.toml
pub fn default_config_path() -> PathBuf {
    filedetect_home().join("config.toml")
}
