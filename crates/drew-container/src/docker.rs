//! Docker (bollard) によるランタイム実装

use crate::capture::{CaptureTarget, HostStreams};
use crate::converter::to_container_config;
use crate::error::{Result, StageError, is_connection_error};
use crate::runtime::{AttachedSession, ContainerRuntime, LaunchSpec, TtySize};
use bollard::Docker;
use bollard::auth::DockerCredentials;
use bollard::models::CreateImageInfo;
use colored::Colorize;
use futures_util::stream::StreamExt;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Docker接続
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    /// Dockerへ接続して疎通を確認する
    ///
    /// `host` が未指定ならローカルのデフォルト（DOCKER_HOST を含む）を使う。
    pub async fn connect(host: Option<&str>, timeout_secs: u64) -> Result<Self> {
        let docker = match host {
            Some(host) if host.starts_with("tcp://") || host.starts_with("http://") => {
                Docker::connect_with_http(host, timeout_secs, bollard::API_DEFAULT_VERSION)
            }
            Some(host) => {
                Docker::connect_with_socket(host, timeout_secs, bollard::API_DEFAULT_VERSION)
            }
            None => Docker::connect_with_local_defaults()
                .map(|d| d.with_timeout(Duration::from_secs(timeout_secs))),
        }
        .map_err(|e| StageError::DockerConnectionFailed(e.to_string()))?;

        // 接続テスト
        docker
            .ping()
            .await
            .map_err(|e| StageError::DockerConnectionFailed(e.to_string()))?;

        Ok(Self { docker })
    }

    pub fn docker(&self) -> &Docker {
        &self.docker
    }

    async fn pull_image(&self, image: &str, host: &HostStreams) -> Result<()> {
        let (image_name, tag) = parse_image_tag(image);
        let pull_failed = |message: String| StageError::ImagePull {
            image: image.to_string(),
            message,
        };
        let progress = |line: String| {
            host.write(CaptureTarget::Stdout, line.as_bytes())
                .map_err(|e| pull_failed(e.to_string()))
        };

        progress(format!("  ℹ イメージが見つかりません: {}\n", image.cyan()))?;
        progress("  ↓ イメージをダウンロード中...\n".to_string())?;

        // レジストリから認証情報を取得（あれば）
        let credentials = extract_registry(image).and_then(get_docker_credentials);

        #[allow(deprecated)]
        let options = bollard::image::CreateImageOptions {
            from_image: image_name,
            tag,
            ..Default::default()
        };

        #[allow(deprecated)]
        let mut stream = self.docker.create_image(Some(options), None, credentials);

        while let Some(info) = stream.next().await {
            match info {
                Ok(CreateImageInfo {
                    status: Some(status),
                    progress: Some(detail),
                    ..
                }) => {
                    // 進捗を表示（同じ行に上書き）
                    progress(format!("\r  ↓ {}: {}", status, detail))?;
                }
                Ok(CreateImageInfo {
                    status: Some(status),
                    ..
                }) => {
                    progress(format!("\r  ↓ {}                    ", status))?;
                }
                Err(e) => {
                    progress("\n".to_string())?;
                    return Err(pull_failed(e.to_string()));
                }
                _ => {}
            }
        }

        progress(format!("\n  {} イメージのダウンロード完了\n", "✓".green()))?;
        info!(image = %image, "Pulled image");

        Ok(())
    }
}

/// イメージ確認の失敗を分類する（デーモンに届かない場合は接続エラー）
fn inspect_failure(image: &str, err: bollard::errors::Error) -> StageError {
    if is_connection_error(&err) {
        StageError::DockerConnectionFailed(err.to_string())
    } else {
        StageError::ImagePull {
            image: image.to_string(),
            message: err.to_string(),
        }
    }
}

impl ContainerRuntime for DockerRuntime {
    #[instrument(skip(self, host))]
    async fn ensure_image(&self, image: &str, host: &HostStreams) -> Result<()> {
        match self.docker.inspect_image(image).await {
            Ok(_) => {
                debug!("Image already present");
                Ok(())
            }
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404,
                ..
            }) => self.pull_image(image, host).await,
            Err(e) => Err(inspect_failure(image, e)),
        }
    }

    async fn create_container(&self, spec: &LaunchSpec) -> Result<String> {
        let config = to_container_config(spec);
        let response = self
            .docker
            .create_container(None::<bollard::query_parameters::CreateContainerOptions>, config)
            .await
            .map_err(StageError::launch)?;

        for warning in &response.warnings {
            warn!(container = %response.id, "{}", warning);
        }
        debug!(container = %response.id, image = %spec.image, "Created container");

        Ok(response.id)
    }

    async fn attach_container(&self, id: &str, stdin: bool) -> Result<AttachedSession> {
        let options = bollard::query_parameters::AttachContainerOptions {
            stream: true,
            stdin,
            stdout: true,
            stderr: true,
            ..Default::default()
        };

        let results = self
            .docker
            .attach_container(id, Some(options))
            .await
            .map_err(StageError::attach)?;

        Ok(AttachedSession {
            output: Box::pin(results.output.map(|r| r.map_err(StageError::attach))),
            input: results.input,
        })
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        self.docker
            .start_container(id, None::<bollard::query_parameters::StartContainerOptions>)
            .await
            .map_err(StageError::launch)
    }

    async fn wait_container(&self, id: &str) -> Result<Option<i64>> {
        let mut stream = self
            .docker
            .wait_container(id, None::<bollard::query_parameters::WaitContainerOptions>);

        match stream.next().await {
            Some(Ok(response)) => Ok(Some(response.status_code)),
            // bollard は0以外の終了コードをエラーとして返す
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => {
                Ok(Some(code))
            }
            // 自動削除で既に消えている
            Some(Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404,
                ..
            }))
            | None => Ok(None),
            Some(Err(e)) => Err(StageError::attach(e)),
        }
    }

    async fn resize_container(&self, id: &str, size: TtySize) -> Result<()> {
        let options = bollard::query_parameters::ResizeContainerTTYOptions {
            h: i32::from(size.rows),
            w: i32::from(size.cols),
        };

        self.docker
            .resize_container_tty(id, options)
            .await
            .map_err(StageError::attach)
    }

    async fn remove_container(&self, id: &str) -> Result<()> {
        match self
            .docker
            .remove_container(
                id,
                Some(bollard::query_parameters::RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
        {
            Ok(_) => Ok(()),
            // 既に削除済み・削除中
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404 | 409,
                ..
            }) => Ok(()),
            Err(e) => Err(StageError::launch(e)),
        }
    }
}

/// Docker config.json からレジストリの認証情報を取得
pub fn get_docker_credentials(registry: &str) -> Option<DockerCredentials> {
    let config_path = dirs::home_dir()?.join(".docker").join("config.json");
    let config_content = std::fs::read_to_string(&config_path).ok()?;
    credentials_from_config(&config_content, registry)
}

fn credentials_from_config(config_content: &str, registry: &str) -> Option<DockerCredentials> {
    let config: serde_json::Value = serde_json::from_str(config_content).ok()?;

    // auths セクションからレジストリの認証情報を取得
    let auths = config.get("auths")?.as_object()?;
    let auth_entry = auths.get(registry)?;
    let auth_b64 = auth_entry.get("auth")?.as_str()?;

    // Base64 デコード (username:password 形式)
    use base64::Engine;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(auth_b64)
        .ok()?;
    let auth_str = String::from_utf8(decoded).ok()?;
    let (username, password) = auth_str.split_once(':')?;

    Some(DockerCredentials {
        username: Some(username.to_string()),
        password: Some(password.to_string()),
        serveraddress: Some(registry.to_string()),
        ..Default::default()
    })
}

/// イメージ名からレジストリを抽出
///
/// 最初の `/` より前が `.` か `:` を含む場合のみレジストリとみなす（例: ghcr.io, localhost:5000）
pub fn extract_registry(image: &str) -> Option<&str> {
    let (first, _) = image.split_once('/')?;
    if first.contains('.') || first.contains(':') {
        Some(first)
    } else {
        None
    }
}

/// イメージ名とタグを分離
///
/// 例: "redis:7-alpine" -> ("redis", "7-alpine")
///     "localhost:5000/app" -> ("localhost:5000/app", "latest")
///     "alpine@sha256:..." -> ("alpine@sha256:...", "")
pub fn parse_image_tag(image: &str) -> (&str, &str) {
    if image.contains('@') {
        return (image, "");
    }

    // レジストリのポート番号と区別するため、最後の / より後ろの : だけをタグとみなす
    let name_start = image.rfind('/').map(|i| i + 1).unwrap_or(0);
    match image[name_start..].rfind(':') {
        Some(i) => (&image[..name_start + i], &image[name_start + i + 1..]),
        None => (image, "latest"),
    }
}
