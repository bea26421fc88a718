use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("設定ファイルを読み込めません: {path}\n理由: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "設定ファイルのパースエラー: {path}\n理由: {source}\n\nヒント:\n  • project_mount, docker_socket, docker_host, timeout_secs のみ指定できます"
    )]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("設定値 '{field}' が不正です: {message}")]
    InvalidValue { field: &'static str, message: String },
}

pub type Result<T> = std::result::Result<T, ConfigError>;
