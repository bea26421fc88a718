use bollard::container::LogOutput;
use bytes::Bytes;
use futures_util::StreamExt;
use drew_container::{
    AttachedSession, ContainerRuntime, HostStreams, HostTerminal, InterruptEvents, LaunchSpec,
    OutputStream, ResizeEvents, StageError, StageExecutor, TtySize,
};
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncRead;

pub const CONTAINER_ID: &str = "c0ffee";

/// 失敗させる操作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(dead_code)]
pub enum FailAt {
    Nothing,
    Pull,
    Create,
    Attach,
    Start,
    Stream,
    Wait,
}

/// 台本の出力を流し終えた後の振る舞い
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(dead_code)]
pub enum Hold {
    /// すぐに終わる
    No,
    /// 閉じない
    Forever,
    /// リサイズが指定回数届くまで閉じない
    UntilResizes(usize),
}

/// 呼び出しを記録し、台本どおりに出力を返すランタイム
pub struct FakeRuntime {
    pub chunks: Vec<LogOutput>,
    pub exit_code: Option<i64>,
    pub fail_at: FailAt,
    pub hold: Hold,
    pub calls: Mutex<Vec<String>>,
    pub launched: Mutex<Option<LaunchSpec>>,
    pub resizes: Arc<Mutex<Vec<TtySize>>>,
}

#[allow(dead_code)]
impl FakeRuntime {
    pub fn new(chunks: Vec<LogOutput>) -> Self {
        Self {
            chunks,
            exit_code: Some(0),
            fail_at: FailAt::Nothing,
            hold: Hold::No,
            calls: Mutex::new(Vec::new()),
            launched: Mutex::new(None),
            resizes: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn holding(mut self, hold: Hold) -> Self {
        self.hold = hold;
        self
    }

    pub fn failing_at(mut self, fail_at: FailAt) -> Self {
        self.fail_at = fail_at;
        self
    }

    pub fn exiting_with(mut self, code: Option<i64>) -> Self {
        self.exit_code = code;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn called(&self, name: &str) -> bool {
        self.calls().iter().any(|c| c == name)
    }

    pub fn launched(&self) -> LaunchSpec {
        self.launched.lock().unwrap().clone().expect("no container created")
    }

    pub fn resizes(&self) -> Vec<TtySize> {
        self.resizes.lock().unwrap().clone()
    }

    fn record(&self, name: &str) {
        self.calls.lock().unwrap().push(name.to_string());
    }

    fn check(&self, at: FailAt, name: &str) -> drew_container::Result<()> {
        self.record(name);
        if self.fail_at == at {
            return Err(match at {
                FailAt::Pull => StageError::ImagePull {
                    image: "alpine".into(),
                    message: "manifest unknown".into(),
                },
                FailAt::Attach | FailAt::Stream | FailAt::Wait => {
                    StageError::StreamAttach(format!("{} failed", name))
                }
                _ => StageError::ContainerLaunch(format!("{} failed", name)),
            });
        }
        Ok(())
    }
}

impl ContainerRuntime for FakeRuntime {
    async fn ensure_image(&self, _image: &str, _host: &HostStreams) -> drew_container::Result<()> {
        self.check(FailAt::Pull, "ensure_image")
    }

    async fn create_container(&self, spec: &LaunchSpec) -> drew_container::Result<String> {
        self.check(FailAt::Create, "create_container")?;
        *self.launched.lock().unwrap() = Some(spec.clone());
        Ok(CONTAINER_ID.to_string())
    }

    async fn attach_container(
        &self,
        _id: &str,
        _stdin: bool,
    ) -> drew_container::Result<AttachedSession> {
        self.check(FailAt::Attach, "attach_container")?;

        let mut items: Vec<drew_container::Result<LogOutput>> =
            self.chunks.iter().cloned().map(Ok).collect();
        if self.fail_at == FailAt::Stream {
            items.push(Err(StageError::StreamAttach("connection reset".into())));
        }

        let scripted = futures_util::stream::iter(items);
        let output: OutputStream = match self.hold {
            Hold::No => Box::pin(scripted),
            Hold::Forever => Box::pin(scripted.chain(futures_util::stream::pending())),
            Hold::UntilResizes(count) => {
                let resizes = self.resizes.clone();
                let closed = futures_util::stream::once(async move {
                    loop {
                        let delivered = resizes.lock().unwrap().len();
                        if delivered >= count {
                            break;
                        }
                        tokio::time::sleep(Duration::from_millis(5)).await;
                    }
                })
                .filter_map(|()| async { None::<drew_container::Result<LogOutput>> });
                Box::pin(scripted.chain(closed))
            }
        };

        Ok(AttachedSession {
            output,
            input: Box::pin(tokio::io::sink()),
        })
    }

    async fn start_container(&self, _id: &str) -> drew_container::Result<()> {
        self.check(FailAt::Start, "start_container")
    }

    async fn wait_container(&self, _id: &str) -> drew_container::Result<Option<i64>> {
        self.check(FailAt::Wait, "wait_container")?;
        Ok(self.exit_code)
    }

    async fn resize_container(&self, _id: &str, size: TtySize) -> drew_container::Result<()> {
        self.record("resize_container");
        self.resizes.lock().unwrap().push(size);
        Ok(())
    }

    async fn remove_container(&self, _id: &str) -> drew_container::Result<()> {
        self.record("remove_container");
        Ok(())
    }
}

/// 中断の届き方
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(dead_code)]
pub enum Interrupt {
    Never,
    /// セッション開始前に届いている
    BeforeStart,
    /// 指定時間後に届く
    After(Duration),
}

/// 端末状態をメモリ上で再現する
pub struct FakeTerminal {
    pub raw: AtomicBool,
    pub transitions: AtomicUsize,
    pub size: TtySize,
    pub resize_events: usize,
    pub interrupt: Interrupt,
    pub interrupt_listeners: AtomicUsize,
}

#[allow(dead_code)]
impl FakeTerminal {
    pub fn new(raw: bool) -> Self {
        Self {
            raw: AtomicBool::new(raw),
            transitions: AtomicUsize::new(0),
            size: TtySize { rows: 40, cols: 120 },
            resize_events: 0,
            interrupt: Interrupt::Never,
            interrupt_listeners: AtomicUsize::new(0),
        }
    }

    pub fn is_raw(&self) -> bool {
        self.raw.load(Ordering::SeqCst)
    }

    pub fn transitions(&self) -> usize {
        self.transitions.load(Ordering::SeqCst)
    }
}

impl HostTerminal for FakeTerminal {
    fn is_raw_mode(&self) -> io::Result<bool> {
        Ok(self.is_raw())
    }

    fn set_raw_mode(&self, enabled: bool) -> io::Result<()> {
        self.transitions.fetch_add(1, Ordering::SeqCst);
        self.raw.store(enabled, Ordering::SeqCst);
        Ok(())
    }

    fn size(&self) -> io::Result<TtySize> {
        Ok(self.size)
    }

    fn input(&self) -> Pin<Box<dyn AsyncRead + Send>> {
        Box::pin(tokio::io::empty())
    }

    fn resize_events(&self) -> io::Result<ResizeEvents> {
        Ok(Box::pin(futures_util::stream::iter(vec![
            ();
            self.resize_events
        ])))
    }

    fn interrupts(&self) -> io::Result<InterruptEvents> {
        self.interrupt_listeners.fetch_add(1, Ordering::SeqCst);
        Ok(match self.interrupt {
            Interrupt::Never => Box::pin(futures_util::stream::pending()),
            Interrupt::BeforeStart => Box::pin(futures_util::stream::iter([()])),
            Interrupt::After(delay) => {
                Box::pin(futures_util::stream::once(tokio::time::sleep(delay)))
            }
        })
    }
}

/// 書き込まれた内容を保持するホストストリーム
#[derive(Clone, Default)]
pub struct RecordedHost {
    pub stdout: Arc<Mutex<Vec<u8>>>,
    pub stderr: Arc<Mutex<Vec<u8>>>,
}

#[allow(dead_code)]
impl RecordedHost {
    pub fn streams(&self) -> HostStreams {
        HostStreams::new(self.stdout.clone(), self.stderr.clone())
    }

    pub fn stdout(&self) -> String {
        String::from_utf8_lossy(&self.stdout.lock().unwrap()).into_owned()
    }

    pub fn stderr(&self) -> String {
        String::from_utf8_lossy(&self.stderr.lock().unwrap()).into_owned()
    }
}

#[allow(dead_code)]
pub fn stdout(text: &str) -> LogOutput {
    LogOutput::StdOut {
        message: Bytes::from(text.to_string()),
    }
}

#[allow(dead_code)]
pub fn stderr(text: &str) -> LogOutput {
    LogOutput::StdErr {
        message: Bytes::from(text.to_string()),
    }
}

#[allow(dead_code)]
pub fn console(text: &str) -> LogOutput {
    LogOutput::Console {
        message: Bytes::from(text.to_string()),
    }
}

/// テンプレートをそのまま返すリゾルバ
pub fn verbatim(template: &str) -> anyhow::Result<String> {
    Ok(template.to_string())
}

/// フォーミュラ名を `/formulas/<name>` に解決する
pub fn formula_dir(name: &str) -> PathBuf {
    PathBuf::from("/formulas").join(name)
}

/// テスト用の実行器を組み立てる
pub fn executor(
    runtime: FakeRuntime,
    terminal: Arc<FakeTerminal>,
    host: &RecordedHost,
) -> StageExecutor<FakeRuntime> {
    StageExecutor::new(runtime, Arc::new(verbatim), Arc::new(formula_dir))
        .with_host(host.streams())
        .with_terminal(terminal)
}
