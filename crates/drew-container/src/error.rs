use drew_core::{ExtractError, StageIssue};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StageError {
    #[error(
        "Dockerに接続できません: {0}\n\nヒント:\n  • Dockerが起動しているか確認してください\n  • DOCKER_HOST の設定を確認してください"
    )]
    DockerConnectionFailed(String),

    #[error(
        "イメージ '{image}' の取得に失敗しました: {message}\n\nヒント:\n  • イメージ名とタグを確認してください\n  • プライベートレジストリの場合は docker login を実行してください"
    )]
    ImagePull { image: String, message: String },

    #[error("コンテナを起動できません: {0}")]
    ContainerLaunch(String),

    #[error("ステージ定義が不正です: {}", format_issues(.0))]
    InvalidStage(Vec<StageIssue>),

    #[error("コンテナ出力の転送に失敗しました: {0}")]
    StreamAttach(String),

    #[error(transparent)]
    VariableResolution(anyhow::Error),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(
        "端末モードを復元できません: {0}\n\nヒント:\n  • `reset` または `stty sane` で端末を復旧してください"
    )]
    TerminalState(#[source] std::io::Error),

    #[error("対話セッションが中断されました")]
    Interrupted,
}

/// ステージ実行のフェーズ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagePhase {
    Resolve,
    Pull,
    Launch,
    Attach,
    Extract,
    Terminal,
}

impl fmt::Display for StagePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StagePhase::Resolve => "resolve",
            StagePhase::Pull => "pull",
            StagePhase::Launch => "launch",
            StagePhase::Attach => "attach",
            StagePhase::Extract => "extract",
            StagePhase::Terminal => "terminal",
        };
        f.write_str(name)
    }
}

impl StageError {
    /// エラーが発生したフェーズ
    pub fn phase(&self) -> StagePhase {
        match self {
            StageError::VariableResolution(_) => StagePhase::Resolve,
            StageError::ImagePull { .. } => StagePhase::Pull,
            StageError::DockerConnectionFailed(_)
            | StageError::ContainerLaunch(_)
            | StageError::InvalidStage(_) => StagePhase::Launch,
            StageError::StreamAttach(_) | StageError::Interrupted => StagePhase::Attach,
            StageError::Extract(_) => StagePhase::Extract,
            StageError::TerminalState(_) => StagePhase::Terminal,
        }
    }

    pub(crate) fn launch(err: impl fmt::Display) -> Self {
        StageError::ContainerLaunch(err.to_string())
    }

    pub(crate) fn attach(err: impl fmt::Display) -> Self {
        StageError::StreamAttach(err.to_string())
    }
}

fn format_issues(issues: &[StageIssue]) -> String {
    issues
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Docker デーモンに到達できなかったことを示すエラーか
pub(crate) fn is_connection_error(err: &bollard::errors::Error) -> bool {
    use bollard::errors::Error;

    match err {
        Error::IOError { .. } | Error::SocketNotFoundError(_) | Error::RequestTimeoutError => true,
        Error::DockerResponseServerError { .. } => false,
        other => {
            let message = other.to_string();
            message.contains("Connection refused")
                || message.contains("No such file or directory")
                || message.contains("error trying to connect")
                || message.contains("client error (Connect)")
        }
    }
}

pub type Result<T> = std::result::Result<T, StageError>;

#[cfg(test)]
mod tests {
    use super::*;
    use drew_core::ExtractionFailure;

    #[test]
    fn test_phase_mapping() {
        assert_eq!(
            StageError::VariableResolution(anyhow::anyhow!("boom")).phase(),
            StagePhase::Resolve
        );
        assert_eq!(
            StageError::ImagePull {
                image: "x".into(),
                message: "denied".into()
            }
            .phase(),
            StagePhase::Pull
        );
        assert_eq!(StageError::attach("eof").phase(), StagePhase::Attach);
        assert_eq!(
            StageError::TerminalState(std::io::Error::other("tty")).phase(),
            StagePhase::Terminal
        );
    }

    #[test]
    fn test_variable_resolution_is_transparent() {
        let err = StageError::VariableResolution(anyhow::anyhow!("undefined variable `token`"));
        assert_eq!(err.to_string(), "undefined variable `token`");
    }

    #[test]
    fn test_extract_error_names_output_and_case() {
        let err: StageError = ExtractError::Failed {
            output_id: "build_id".into(),
            failure: ExtractionFailure::NoMatch {
                pattern: "ID=(?<v>.+)".into(),
            },
        }
        .into();

        assert_eq!(err.phase(), StagePhase::Extract);
        let message = err.to_string();
        assert!(message.contains("build_id"));
        assert!(message.contains("ID=(?<v>.+)"));
    }

    #[test]
    fn test_connection_errors_are_recognized() {
        let refused = bollard::errors::Error::IOError {
            err: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "Connection refused"),
        };
        assert!(is_connection_error(&refused));
        assert!(is_connection_error(
            &bollard::errors::Error::SocketNotFoundError("/var/run/docker.sock".into())
        ));
        assert!(is_connection_error(
            &bollard::errors::Error::RequestTimeoutError
        ));

        let server = bollard::errors::Error::DockerResponseServerError {
            status_code: 500,
            message: "No such file or directory".into(),
        };
        assert!(!is_connection_error(&server));
    }

    #[test]
    fn test_invalid_stage_lists_issues() {
        let err = StageError::InvalidStage(vec![StageIssue::DuplicateOutput("a".into())]);
        assert!(err.to_string().contains("'a'"));
    }
}
