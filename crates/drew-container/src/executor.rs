//! ステージ実行
//!
//! イメージを用意してから、`interactive` に応じてヘッドレス実行か対話実行へ振り分ける。

use crate::capture::HostStreams;
use crate::converter::{MountPolicy, normalize_path};
use crate::error::{Result, StageError};
use crate::runtime::ContainerRuntime;
use crate::terminal::{CrosstermTerminal, HostTerminal};
use drew_core::{StageInstruction, StageIssue, StageOutput, StateStorage};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// フォーミュラ名からホスト上のディレクトリを解決する
pub trait FormulaPaths: Send + Sync {
    fn formula_path(&self, name: &str) -> PathBuf;
}

impl<F> FormulaPaths for F
where
    F: Fn(&str) -> PathBuf + Send + Sync,
{
    fn formula_path(&self, name: &str) -> PathBuf {
        self(name)
    }
}

/// ステージ実行器
///
/// ランタイム・変数解決・フォーミュラパス解決は生成時に受け取り、ステージ間で再利用する。
/// それ以外の状態（キャプチャバッファなど）はステージごとに作って捨てる。
pub struct StageExecutor<R> {
    pub(crate) runtime: R,
    pub(crate) state: Arc<dyn StateStorage>,
    pub(crate) formulas: Arc<dyn FormulaPaths>,
    pub(crate) mounts: MountPolicy,
    pub(crate) host: HostStreams,
    pub(crate) terminal: Arc<dyn HostTerminal>,
}

impl<R: ContainerRuntime> StageExecutor<R> {
    pub fn new(
        runtime: R,
        state: Arc<dyn StateStorage>,
        formulas: Arc<dyn FormulaPaths>,
    ) -> Self {
        Self {
            runtime,
            state,
            formulas,
            mounts: MountPolicy::default(),
            host: HostStreams::process(),
            terminal: Arc::new(CrosstermTerminal),
        }
    }

    pub fn with_mounts(mut self, mounts: MountPolicy) -> Self {
        self.mounts = mounts;
        self
    }

    /// 出力の転送先を差し替える
    pub fn with_host(mut self, host: HostStreams) -> Self {
        self.host = host;
        self
    }

    pub fn with_terminal(mut self, terminal: Arc<dyn HostTerminal>) -> Self {
        self.terminal = terminal;
        self
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    /// ステージを実行して出力を返す
    ///
    /// 抽出ルールを持つ出力が宣言順に並ぶ。失敗時は部分的な結果を返さない。
    /// コンテナの終了コードはここでは判定しない。
    #[instrument(skip(self, stage), fields(image = %stage.image, interactive = stage.interactive))]
    pub async fn run_stage(
        &self,
        formula: &str,
        stage: &StageInstruction,
    ) -> Result<Vec<StageOutput>> {
        let fatal: Vec<StageIssue> = stage
            .validate()
            .into_iter()
            .filter(StageIssue::is_fatal)
            .collect();
        if !fatal.is_empty() {
            return Err(StageError::InvalidStage(fatal));
        }

        let project_dir = normalize_path(&self.formulas.formula_path(formula));
        info!(project_dir = %project_dir.display(), "Running stage");

        self.runtime.ensure_image(&stage.image, &self.host).await?;

        let outputs = if stage.interactive {
            self.run_interactive(&project_dir, stage).await?
        } else {
            self.run_headless(&project_dir, stage).await?
        };

        info!(outputs = outputs.len(), "Stage completed");
        Ok(outputs)
    }

    /// 失敗時はコンテナの削除を試みる
    ///
    /// 終了済みのコンテナは自動削除されるが、作成直後や実行中のものは残るため強制削除する。
    pub(crate) async fn teardown_on_error<T>(&self, id: &str, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            warn!(container = %id, error = %e, "Stage failed, removing container");
            if let Err(remove_err) = self.runtime.remove_container(id).await {
                warn!(container = %id, error = %remove_err, "Failed to remove container");
            }
        }
        result
    }
}
