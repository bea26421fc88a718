use crate::capture::HostStreams;
use crate::error::Result;
use bollard::container::LogOutput;
use futures_util::Stream;
use std::pin::Pin;
use tokio::io::AsyncWrite;

/// コンテナランタイムのトレイト
///
/// ステージ実行に必要な操作だけを抽象化する。実装は `DockerRuntime`。
#[allow(async_fn_in_trait)]
pub trait ContainerRuntime {
    /// イメージがローカルになければpullする（進捗は端末へ表示）
    async fn ensure_image(&self, image: &str, host: &HostStreams) -> Result<()>;
    /// コンテナを作成（起動はしない）してIDを返す
    async fn create_container(&self, spec: &LaunchSpec) -> Result<String>;
    /// コンテナにアタッチする
    async fn attach_container(&self, id: &str, stdin: bool) -> Result<AttachedSession>;
    async fn start_container(&self, id: &str) -> Result<()>;
    /// 終了を待つ。自動削除済みで終了コードが分からない場合は `None`
    async fn wait_container(&self, id: &str) -> Result<Option<i64>>;
    async fn resize_container(&self, id: &str, size: TtySize) -> Result<()>;
    /// コンテナを強制削除する（既に存在しない場合も成功）
    async fn remove_container(&self, id: &str) -> Result<()>;
}

/// コンテナ出力のストリーム
pub type OutputStream = Pin<Box<dyn Stream<Item = Result<LogOutput>> + Send>>;

/// アタッチしたセッション
pub struct AttachedSession {
    pub output: OutputStream,
    pub input: Pin<Box<dyn AsyncWrite + Send>>,
}

/// コンテナ起動パラメータ
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchSpec {
    pub image: String,
    pub cmd: Vec<String>,
    /// `KEY=VALUE` 形式
    pub env: Vec<String>,
    /// `host:container:mode` 形式
    pub binds: Vec<String>,
    pub tty: bool,
    pub open_stdin: bool,
    pub auto_remove: bool,
}

/// 疑似端末のサイズ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtySize {
    pub rows: u16,
    pub cols: u16,
}

impl TtySize {
    /// どちらかが0の場合はまだサイズが確定していない
    pub fn is_known(&self) -> bool {
        self.rows != 0 && self.cols != 0
    }
}

/// ログ出力のペイロード
pub fn payload(output: &LogOutput) -> &[u8] {
    match output {
        LogOutput::StdOut { message }
        | LogOutput::StdErr { message }
        | LogOutput::StdIn { message }
        | LogOutput::Console { message } => &message[..],
    }
}
