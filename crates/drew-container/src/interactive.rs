//! 対話実行
//!
//! TTY付きでコンテナを起動し、ホストのキーボードと端末サイズをつなぐ。
//! TTYでは stdout/stderr が1本にまとまるため、抽出は同じテキストを両方の入力として扱う。

use crate::capture::{self, CaptureSink, CaptureTarget};
use crate::converter::{LaunchMode, launch_spec};
use crate::error::{Result, StageError};
use crate::executor::StageExecutor;
use crate::runtime::{AttachedSession, ContainerRuntime, OutputStream, payload};
use crate::terminal::{InterruptEvents, ResizeEvents, with_raw_mode};
use drew_core::{StageInstruction, StageOutput, collect_outputs};
use futures_util::{FutureExt, StreamExt};
use std::path::Path;
use tracing::{debug, info, warn};

impl<R: ContainerRuntime> StageExecutor<R> {
    pub(crate) async fn run_interactive(
        &self,
        project_dir: &Path,
        stage: &StageInstruction,
    ) -> Result<Vec<StageOutput>> {
        let spec = launch_spec(
            stage,
            project_dir,
            &self.mounts,
            self.state.as_ref(),
            LaunchMode::Interactive,
        )?;

        let (mut console, console_buf) = capture::open(CaptureTarget::Stdout, &self.host);

        let id = self.runtime.create_container(&spec).await?;
        let result = self.drive_session(&id, &mut console).await;
        let exit_code = self.teardown_on_error(&id, result).await?;
        info!(container = %id, exit_code = ?exit_code, "Interactive container exited");

        if !stage.expects_outputs() {
            return Ok(Vec::new());
        }

        let text = console_buf.to_text();
        Ok(collect_outputs(&text, &text, &stage.outputs)?)
    }

    async fn drive_session(&self, id: &str, console: &mut CaptureSink) -> Result<Option<i64>> {
        // アタッチやrawモード切り替えの最中に届いた中断も取りこぼさない
        let interrupts: InterruptEvents = match self.terminal.interrupts() {
            Ok(events) => events,
            Err(e) => {
                warn!(error = %e, "Failed to listen for interrupts");
                Box::pin(futures_util::stream::pending())
            }
        };

        let session = self.runtime.attach_container(id, true).await?;
        with_raw_mode(
            &self.terminal,
            self.session_loop(id, session, interrupts, console),
        )
        .await
    }

    async fn session_loop(
        &self,
        id: &str,
        session: AttachedSession,
        interrupts: InterruptEvents,
        console: &mut CaptureSink,
    ) -> Result<Option<i64>> {
        let AttachedSession {
            mut output,
            mut input,
        } = session;

        let mut keyboard = self.terminal.input();
        let forward = tokio::spawn(async move {
            match tokio::io::copy(&mut keyboard, &mut input).await {
                Ok(bytes) => debug!(bytes, "Stdin forwarding finished"),
                Err(e) => debug!(error = %e, "Stdin forwarding stopped"),
            }
        });

        let result = self
            .pump_session(id, &mut output, interrupts, console)
            .await;
        forward.abort();
        result
    }

    async fn pump_session(
        &self,
        id: &str,
        output: &mut OutputStream,
        mut interrupts: InterruptEvents,
        console: &mut CaptureSink,
    ) -> Result<Option<i64>> {
        let mut resizes: ResizeEvents = match self.terminal.resize_events() {
            Ok(events) => events,
            Err(e) => {
                warn!(error = %e, "Terminal resize events unavailable");
                Box::pin(futures_util::stream::pending())
            }
        };

        if let Some(Some(())) = interrupts.next().now_or_never() {
            info!(container = %id, "Interrupted before start");
            return Err(StageError::Interrupted);
        }

        self.runtime.start_container(id).await?;
        debug!(container = %id, "Started interactive container");
        self.propagate_size(id).await;

        loop {
            tokio::select! {
                chunk = output.next() => match chunk {
                    Some(chunk) => {
                        let chunk = chunk?;
                        console
                            .write_chunk(payload(&chunk))
                            .map_err(StageError::attach)?;
                    }
                    None => break,
                },
                Some(()) = resizes.next() => self.propagate_size(id).await,
                Some(()) = interrupts.next() => {
                    info!(container = %id, "Interrupted by user");
                    return Err(StageError::Interrupted);
                }
            }
        }

        self.runtime.wait_container(id).await
    }

    /// ホスト端末のサイズをコンテナのTTYへ反映する
    ///
    /// サイズが取れない・0を含む場合は何もしない。失敗してもセッションは続ける。
    pub(crate) async fn propagate_size(&self, id: &str) {
        let size = match self.terminal.size() {
            Ok(size) if size.is_known() => size,
            Ok(_) => return,
            Err(e) => {
                debug!(error = %e, "Terminal size unavailable");
                return;
            }
        };

        if let Err(e) = self.runtime.resize_container(id, size).await {
            warn!(container = %id, error = %e, "Failed to resize container TTY");
        }
    }
}
