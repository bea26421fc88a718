//! StageInstruction から Docker API パラメータへの変換

// Bollard 0.19 の非推奨APIを一時的に使用
#![allow(deprecated)]

use crate::error::{Result, StageError};
use crate::runtime::LaunchSpec;
use bollard::container::Config;
use bollard::models::HostConfig;
use drew_core::{StageInstruction, StateStorage};
use std::path::{Component, Path, PathBuf};
use tracing::warn;

/// コンテナへ注入する作業ディレクトリの環境変数名
pub const WORKDIR_ENV: &str = "DREW_WORKDIR";

/// マウントの方針
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountPolicy {
    /// プロジェクトディレクトリのマウント先（読み取り専用）
    pub project_mount: PathBuf,
    /// ホストのDockerソケット（dind時に読み書き可能でマウント）
    pub docker_socket: PathBuf,
}

impl Default for MountPolicy {
    fn default() -> Self {
        Self {
            project_mount: PathBuf::from("/project"),
            docker_socket: PathBuf::from("/var/run/docker.sock"),
        }
    }
}

/// 実行モード
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    Headless,
    Interactive,
}

/// ステージの起動パラメータを組み立てる
///
/// コマンド引数・環境変数・作業ディレクトリはここで変数解決する。
pub fn launch_spec(
    stage: &StageInstruction,
    project_dir: &Path,
    mounts: &MountPolicy,
    state: &dyn StateStorage,
    mode: LaunchMode,
) -> Result<LaunchSpec> {
    let cmd = stage
        .cmd
        .iter()
        .map(|arg| state.to_value(arg))
        .collect::<anyhow::Result<Vec<_>>>()
        .map_err(StageError::VariableResolution)?;

    let mut env = Vec::with_capacity(stage.envs.len() + 1);
    for (name, template) in &stage.envs {
        let value = state
            .to_value(template)
            .map_err(StageError::VariableResolution)?;
        env.push(format!("{}={}", name, value));
    }
    let workdir = state
        .to_value(&stage.workdir)
        .map_err(StageError::VariableResolution)?;
    env.push(format!("{}={}", WORKDIR_ENV, workdir));

    let interactive = mode == LaunchMode::Interactive;
    if interactive && stage.dind {
        warn!(image = %stage.image, "dind is ignored for interactive stages");
    }

    Ok(LaunchSpec {
        image: stage.image.clone(),
        cmd,
        env,
        binds: binds(project_dir, mounts, stage.dind && !interactive),
        tty: interactive,
        open_stdin: interactive,
        auto_remove: true,
    })
}

/// バインドマウントを生成
///
/// プロジェクトディレクトリは常に読み取り専用、Dockerソケットは dind の場合のみ追加する。
pub fn binds(project_dir: &Path, mounts: &MountPolicy, dind: bool) -> Vec<String> {
    let mut binds = vec![format!(
        "{}:{}:ro",
        normalize_path(project_dir).display(),
        mounts.project_mount.display()
    )];

    if dind {
        binds.push(format!(
            "{}:{}:rw",
            mounts.docker_socket.display(),
            mounts.docker_socket.display()
        ));
    }

    binds
}

/// パスを字句的に正規化（`.` と `..` を畳み込む。シンボリックリンクは解決しない）
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let last = normalized.components().next_back();
                let pops = matches!(last, Some(Component::Normal(_)));
                // ルートより上には上がらない
                let at_root = matches!(last, Some(Component::RootDir | Component::Prefix(_)));

                if pops {
                    normalized.pop();
                } else if !at_root {
                    normalized.push("..");
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }

    if normalized.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        normalized
    }
}

/// 起動パラメータをDockerのコンテナ設定に変換
pub fn to_container_config(spec: &LaunchSpec) -> Config<String> {
    let host_config = HostConfig {
        binds: Some(spec.binds.clone()),
        auto_remove: Some(spec.auto_remove),
        ..Default::default()
    };

    Config {
        image: Some(spec.image.clone()),
        cmd: if spec.cmd.is_empty() {
            None
        } else {
            Some(spec.cmd.clone())
        },
        env: Some(spec.env.clone()),
        attach_stdin: Some(spec.open_stdin),
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        tty: Some(spec.tty),
        open_stdin: Some(spec.open_stdin),
        stdin_once: Some(false),
        host_config: Some(host_config),
        ..Default::default()
    }
}
