use std::path::PathBuf;

use crate::models::Settings;

const ENV_API_TOKEN: &str = "BROWSERSEC_API_TOKEN";
const ENV_DATA_DIR: &str = "BROWSERSEC_DATA_DIR";
const APP_DIR_NAME: &str = "browsersec";

pub fn load_dotenv() {
    let _ = dotenvy::dotenv();
}

pub fn api_token_from_env() -> Option<String> {
    std::env::var(ENV_API_TOKEN)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Fill an empty stored token from the environment. Only ever applied to
/// the in-memory copy; the env token is never persisted.
pub fn apply_env_defaults(settings: &mut Settings) {
    if !settings.has_api_token() {
        settings.api_token = api_token_from_env().unwrap_or_default();
    }
}

/// Data directory: explicit flag, then `BROWSERSEC_DATA_DIR`, then the
/// platform data dir.
pub fn resolve_data_dir(explicit: Option<PathBuf>) -> PathBuf {
    if let Some(dir) = explicit {
        return dir;
    }
    if let Some(dir) = std::env::var_os(ENV_DATA_DIR).filter(|v| !v.is_empty()) {
        return PathBuf::from(dir);
    }
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}

#[derive(Debug, Clone)]
pub struct Paths {
    pub data_dir: PathBuf,
}

impl Paths {
    pub fn new(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    pub fn settings_file(&self) -> PathBuf {
        self.data_dir.join("config").join("settings.json")
    }

    pub fn database_file(&self) -> PathBuf {
        self.data_dir.join("browsersec.db")
    }

    pub fn export_dir(&self) -> PathBuf {
        self.data_dir.join("exports")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_data_dir_wins() {
        let dir = resolve_data_dir(Some(PathBuf::from("/tmp/bsec")));
        assert_eq!(dir, PathBuf::from("/tmp/bsec"));

        let paths = Paths::new(dir);
        assert_eq!(paths.settings_file(), PathBuf::from("/tmp/bsec/config/settings.json"));
        assert_eq!(paths.database_file(), PathBuf::from("/tmp/bsec/browsersec.db"));
    }
}
