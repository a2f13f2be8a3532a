/// Platform-specific default locations
///
/// XDG Base Directory rules on Linux/Unix, the usual per-user folders on macOS and Windows.
use std::path::PathBuf;

const APP_DIR: &str = "symbol-rag";

/// Which base directory to resolve
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BaseDir {
    Data,
    Cache,
    Config,
}

impl BaseDir {
    fn windows_var(self) -> &'static str {
        match self {
            BaseDir::Config => "APPDATA",
            BaseDir::Data | BaseDir::Cache => "LOCALAPPDATA",
        }
    }

    fn macos_suffix(self) -> &'static str {
        match self {
            BaseDir::Cache => "Library/Caches",
            BaseDir::Data | BaseDir::Config => "Library/Application Support",
        }
    }

    fn xdg_var(self) -> &'static str {
        match self {
            BaseDir::Data => "XDG_DATA_HOME",
            BaseDir::Cache => "XDG_CACHE_HOME",
            BaseDir::Config => "XDG_CONFIG_HOME",
        }
    }

    fn xdg_fallback(self) -> &'static str {
        match self {
            BaseDir::Data => ".local/share",
            BaseDir::Cache => ".cache",
            BaseDir::Config => ".config",
        }
    }

    /// Resolve with `var` as the environment lookup; falls back to `.`
    fn resolve(self, var: impl Fn(&str) -> Option<String>) -> PathBuf {
        let home = |suffix: &str| var("HOME").map(|home| PathBuf::from(home).join(suffix));
        let resolved = if cfg!(target_os = "windows") {
            var(self.windows_var()).map(PathBuf::from)
        } else if cfg!(target_os = "macos") {
            home(self.macos_suffix())
        } else {
            var(self.xdg_var())
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
                .or_else(|| home(self.xdg_fallback()))
        };
        resolved.unwrap_or_else(|| PathBuf::from("."))
    }

    fn from_env(self) -> PathBuf {
        self.resolve(|name| std::env::var(name).ok())
    }
}

/// Platform-agnostic path utilities
pub struct PlatformPaths;

impl PlatformPaths {
    pub fn data_dir() -> PathBuf {
        BaseDir::Data.from_env()
    }

    pub fn cache_dir() -> PathBuf {
        BaseDir::Cache.from_env()
    }

    pub fn config_dir() -> PathBuf {
        BaseDir::Config.from_env()
    }

    /// `{data_dir}/symbol-rag`
    pub fn project_data_dir() -> PathBuf {
        Self::data_dir().join(APP_DIR)
    }

    /// `{cache_dir}/symbol-rag`
    pub fn project_cache_dir() -> PathBuf {
        Self::cache_dir().join(APP_DIR)
    }

    /// `{config_dir}/symbol-rag`
    pub fn project_config_dir() -> PathBuf {
        Self::config_dir().join(APP_DIR)
    }

    /// `{data_dir}/symbol-rag/lancedb`
    pub fn default_db_path() -> PathBuf {
        Self::project_data_dir().join("lancedb")
    }

    /// `{cache_dir}/symbol-rag/index`
    pub fn default_index_dir() -> PathBuf {
        Self::project_cache_dir().join("index")
    }

    /// `{cache_dir}/symbol-rag/vectors`
    pub fn default_vector_cache_dir() -> PathBuf {
        Self::project_cache_dir().join("vectors")
    }

    /// `{config_dir}/symbol-rag/config.toml`
    pub fn default_config_path() -> PathBuf {
        Self::project_config_dir().join("config.toml")
    }
}
