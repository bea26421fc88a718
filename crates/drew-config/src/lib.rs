pub mod error;

pub use error::*;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// 設定ファイルのパスを直接指定する環境変数
pub const CONFIG_PATH_ENV: &str = "DREW_CONFIG_PATH";
pub const PROJECT_MOUNT_ENV: &str = "DREW_PROJECT_MOUNT";
pub const DOCKER_SOCKET_ENV: &str = "DREW_DOCKER_SOCKET";
pub const DOCKER_HOST_ENV: &str = "DOCKER_HOST";

/// ステージ実行器の設定
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExecutorConfig {
    /// プロジェクトディレクトリのコンテナ内マウント先
    pub project_mount: PathBuf,
    /// ホストのDockerソケット
    pub docker_socket: PathBuf,
    /// Dockerデーモンのアドレス（未指定ならローカルのデフォルト）
    pub docker_host: Option<String>,
    /// Docker API のタイムアウト（秒）
    pub timeout_secs: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            project_mount: PathBuf::from("/project"),
            docker_socket: PathBuf::from("/var/run/docker.sock"),
            docker_host: None,
            timeout_secs: 120,
        }
    }
}

impl ExecutorConfig {
    /// 設定を読み込む
    ///
    /// 設定ファイル（見つかれば）を読み、環境変数で上書きする。
    pub fn load() -> Result<Self> {
        let mut config = match find_config_file() {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// YAMLファイルから読み込む（省略したキーはデフォルト値）
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        // 空ファイルはデフォルト扱い
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// 環境変数による上書き（空文字列は無視）
    pub fn apply_env(&mut self) {
        if let Some(mount) = non_empty_env(PROJECT_MOUNT_ENV) {
            self.project_mount = PathBuf::from(mount);
        }
        if let Some(socket) = non_empty_env(DOCKER_SOCKET_ENV) {
            self.docker_socket = PathBuf::from(socket);
        }
        if let Some(host) = non_empty_env(DOCKER_HOST_ENV) {
            self.docker_host = Some(host);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.project_mount.is_absolute() {
            return Err(ConfigError::InvalidValue {
                field: "project_mount",
                message: format!(
                    "コンテナ内の絶対パスを指定してください: {}",
                    self.project_mount.display()
                ),
            });
        }
        if !self.docker_socket.is_absolute() {
            return Err(ConfigError::InvalidValue {
                field: "docker_socket",
                message: format!(
                    "ホスト上の絶対パスを指定してください: {}",
                    self.docker_socket.display()
                ),
            });
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "timeout_secs",
                message: "1以上を指定してください".to_string(),
            });
        }
        Ok(())
    }
}

/// 設定ファイルを探す
///
/// 以下の優先順位で検索:
/// 1. 環境変数 DREW_CONFIG_PATH (直接パス指定)
/// 2. ~/.config/drew/executor.yaml
pub fn find_config_file() -> Option<PathBuf> {
    if let Some(config_path) = non_empty_env(CONFIG_PATH_ENV) {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Some(path);
        }
    }

    let global = config_dir()?.join("executor.yaml");
    global.exists().then_some(global)
}

/// Drewの設定ディレクトリ
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("drew"))
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}
