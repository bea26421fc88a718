//! ヘッドレス実行
//!
//! 入力をアタッチせずにコンテナを最後まで実行し、stdout/stderr を別々にキャプチャする。

use crate::capture::{self, CaptureSink, CaptureTarget};
use crate::converter::{LaunchMode, launch_spec};
use crate::error::{Result, StageError};
use crate::executor::StageExecutor;
use crate::runtime::{AttachedSession, ContainerRuntime, payload};
use bollard::container::LogOutput;
use drew_core::{StageInstruction, StageOutput, collect_outputs};
use futures_util::StreamExt;
use std::path::Path;
use tracing::{debug, info};

impl<R: ContainerRuntime> StageExecutor<R> {
    pub(crate) async fn run_headless(
        &self,
        project_dir: &Path,
        stage: &StageInstruction,
    ) -> Result<Vec<StageOutput>> {
        let spec = launch_spec(
            stage,
            project_dir,
            &self.mounts,
            self.state.as_ref(),
            LaunchMode::Headless,
        )?;

        let (mut stdout, stdout_buf) = capture::open(CaptureTarget::Stdout, &self.host);
        let (mut stderr, stderr_buf) = capture::open(CaptureTarget::Stderr, &self.host);

        let id = self.runtime.create_container(&spec).await?;
        let result = self.pump_headless(&id, &mut stdout, &mut stderr).await;
        let exit_code = self.teardown_on_error(&id, result).await?;
        info!(container = %id, exit_code = ?exit_code, "Container exited");

        if !stage.expects_outputs() {
            return Ok(Vec::new());
        }

        let outputs = collect_outputs(&stdout_buf.to_text(), &stderr_buf.to_text(), &stage.outputs)?;
        Ok(outputs)
    }

    async fn pump_headless(
        &self,
        id: &str,
        stdout: &mut CaptureSink,
        stderr: &mut CaptureSink,
    ) -> Result<Option<i64>> {
        // 入力側は使わないが、セッション終了まで保持する
        let AttachedSession {
            mut output,
            input: _input,
        } = self.runtime.attach_container(id, false).await?;

        self.runtime.start_container(id).await?;
        debug!(container = %id, "Started container");

        while let Some(chunk) = output.next().await {
            let chunk = chunk?;
            let written = match &chunk {
                LogOutput::StdErr { .. } => stderr.write_chunk(payload(&chunk)),
                LogOutput::StdIn { .. } => Ok(()),
                LogOutput::StdOut { .. } | LogOutput::Console { .. } => {
                    stdout.write_chunk(payload(&chunk))
                }
            };
            written.map_err(StageError::attach)?;
        }

        self.runtime.wait_container(id).await
    }
}
