//! ホスト端末の制御
//!
//! rawモードはプロセス全体で共有される状態なので、必ず `RawModeGuard` を通して変更し、
//! どの終了経路でも元のモードへ戻す。SIGINT の処理も同じく共有状態で、
//! `interrupts()` のストリームが生きている間だけ引き受ける。

use crate::error::{Result, StageError};
use crate::runtime::TtySize;
use futures_util::Stream;
use std::future::Future;
use std::io::{self, Read};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// 端末リサイズ通知
pub type ResizeEvents = Pin<Box<dyn Stream<Item = ()> + Send>>;

/// 中断 (SIGINT) 通知
pub type InterruptEvents = Pin<Box<dyn Stream<Item = ()> + Send>>;

/// ホスト端末のインターフェース
pub trait HostTerminal: Send + Sync {
    fn is_raw_mode(&self) -> io::Result<bool>;
    fn set_raw_mode(&self, enabled: bool) -> io::Result<()>;
    fn size(&self) -> io::Result<TtySize>;
    /// キーボード入力
    fn input(&self) -> Pin<Box<dyn AsyncRead + Send>>;
    fn resize_events(&self) -> io::Result<ResizeEvents>;
    /// 中断通知
    ///
    /// 返したストリームが生きている間はSIGINTでプロセスを終了させず、通知として届ける。
    /// ストリームを破棄すると、取得前のSIGINTの処理に戻る。
    fn interrupts(&self) -> io::Result<InterruptEvents>;
}

/// crossterm と tokio のシグナルを使った実装
#[derive(Debug, Clone, Copy, Default)]
pub struct CrosstermTerminal;

impl HostTerminal for CrosstermTerminal {
    fn is_raw_mode(&self) -> io::Result<bool> {
        crossterm::terminal::is_raw_mode_enabled()
    }

    fn set_raw_mode(&self, enabled: bool) -> io::Result<()> {
        if enabled {
            crossterm::terminal::enable_raw_mode()
        } else {
            crossterm::terminal::disable_raw_mode()
        }
    }

    fn size(&self) -> io::Result<TtySize> {
        let (cols, rows) = crossterm::terminal::size()?;
        Ok(TtySize { rows, cols })
    }

    fn input(&self) -> Pin<Box<dyn AsyncRead + Send>> {
        match KeyboardInput::spawn() {
            Ok(keyboard) => Box::pin(keyboard),
            Err(e) => {
                warn!(error = %e, "Keyboard input unavailable");
                Box::pin(tokio::io::empty())
            }
        }
    }

    #[cfg(unix)]
    fn resize_events(&self) -> io::Result<ResizeEvents> {
        use tokio::signal::unix::{SignalKind, signal};

        let winch = signal(SignalKind::window_change())?;
        Ok(Box::pin(futures_util::stream::unfold(
            winch,
            |mut winch| async move { winch.recv().await.map(|_| ((), winch)) },
        )))
    }

    #[cfg(not(unix))]
    fn resize_events(&self) -> io::Result<ResizeEvents> {
        Ok(Box::pin(futures_util::stream::pending()))
    }

    #[cfg(unix)]
    fn interrupts(&self) -> io::Result<InterruptEvents> {
        let scope = sigint::SigintScope::acquire()?;
        Ok(Box::pin(futures_util::stream::unfold(
            scope,
            |mut scope| async move { scope.recv().await.map(|_| ((), scope)) },
        )))
    }

    #[cfg(not(unix))]
    fn interrupts(&self) -> io::Result<InterruptEvents> {
        Ok(Box::pin(futures_util::stream::pending()))
    }
}

/// SIGINT の引き受けと返却
///
/// tokio のシグナルハンドラは一度登録すると外れないため、スコープの終わりで
/// 元の処理を書き戻し、tokio のハンドラは次のスコープのために退避しておく。
#[cfg(unix)]
mod sigint {
    use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};
    use std::io;
    use std::sync::{Mutex, PoisonError};
    use tokio::signal::unix::{SignalKind, signal};
    use tracing::{debug, error};

    struct Disposition {
        /// スコープ取得前の処理
        original: Option<SigAction>,
        /// 退避中の tokio のハンドラ
        parked: Option<SigAction>,
        active: usize,
    }

    static DISPOSITION: Mutex<Disposition> = Mutex::new(Disposition {
        original: None,
        parked: None,
        active: 0,
    });

    /// 現在の SIGINT の処理を読み出す
    pub(super) fn current() -> io::Result<SigAction> {
        let ignore = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
        // SAFETY: 読み出した処理をそのまま書き戻す
        let previous = unsafe { sigaction(Signal::SIGINT, &ignore) }?;
        unsafe { sigaction(Signal::SIGINT, &previous) }?;
        Ok(previous)
    }

    pub(super) struct SigintScope {
        listener: tokio::signal::unix::Signal,
    }

    impl SigintScope {
        pub(super) fn acquire() -> io::Result<Self> {
            let mut state = DISPOSITION.lock().unwrap_or_else(PoisonError::into_inner);

            if state.active == 0 {
                state.original = Some(current()?);
            }
            let listener = signal(SignalKind::interrupt())?;
            if state.active == 0
                && let Some(parked) = state.parked.take()
            {
                // SAFETY: 以前 tokio が登録したハンドラを戻すだけ
                unsafe { sigaction(Signal::SIGINT, &parked) }?;
            }
            state.active += 1;
            debug!(active = state.active, "Took over SIGINT");

            Ok(Self { listener })
        }

        pub(super) async fn recv(&mut self) -> Option<()> {
            self.listener.recv().await
        }
    }

    impl Drop for SigintScope {
        fn drop(&mut self) {
            let mut state = DISPOSITION.lock().unwrap_or_else(PoisonError::into_inner);
            state.active = state.active.saturating_sub(1);
            if state.active > 0 {
                return;
            }

            if let Some(original) = state.original.take() {
                // SAFETY: スコープ取得前の処理を書き戻す
                match unsafe { sigaction(Signal::SIGINT, &original) } {
                    Ok(tokio_handler) => {
                        state.parked = Some(tokio_handler);
                        debug!("Released SIGINT");
                    }
                    Err(e) => error!(error = %e, "Failed to restore SIGINT disposition"),
                }
            }
        }
    }
}

/// 標準入力を専用スレッドで読み、チャンネル経由で渡すリーダー
///
/// `tokio::io::stdin` はブロッキング読み込みがランタイム終了を止めてしまうため、
/// 専用スレッドで読む。破棄すると停止フラグが立ち、スレッドは次の入力を読まずに終わる。
struct KeyboardInput {
    rx: mpsc::Receiver<io::Result<Vec<u8>>>,
    pending: Vec<u8>,
    offset: usize,
    stop: Arc<AtomicBool>,
}

/// 停止フラグを確認する間隔
#[cfg(unix)]
const POLL_INTERVAL_MS: u16 = 100;

impl KeyboardInput {
    #[cfg(unix)]
    fn spawn() -> io::Result<Self> {
        use std::os::fd::AsFd;

        let fd = io::stdin().as_fd().try_clone_to_owned()?;
        Ok(Self::from_fd(fd))
    }

    #[cfg(not(unix))]
    fn spawn() -> io::Result<Self> {
        Ok(Self::reading(|stop, tx| {
            let mut stdin = io::stdin().lock();
            let mut buf = [0u8; 1024];
            while !stop.load(Ordering::SeqCst) {
                let chunk = match stdin.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => Ok(buf[..n].to_vec()),
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => Err(e),
                };
                let failed = chunk.is_err();
                if tx.blocking_send(chunk).is_err() || failed {
                    break;
                }
            }
        }))
    }

    /// 任意のファイルディスクリプタから読む
    #[cfg(unix)]
    fn from_fd(fd: std::os::fd::OwnedFd) -> Self {
        let file = std::fs::File::from(fd);
        Self::reading(move |stop, tx| read_until_stopped(file, &stop, &tx))
    }

    fn reading<F>(body: F) -> Self
    where
        F: FnOnce(Arc<AtomicBool>, mpsc::Sender<io::Result<Vec<u8>>>) + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(16);
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        std::thread::spawn(move || body(flag, tx));

        Self {
            rx,
            pending: Vec::new(),
            offset: 0,
            stop,
        }
    }
}

impl Drop for KeyboardInput {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

/// 読める状態になるまで短い間隔で待ち、停止フラグが立ったら読まずに抜ける
#[cfg(unix)]
fn read_until_stopped(
    mut file: std::fs::File,
    stop: &AtomicBool,
    tx: &mpsc::Sender<io::Result<Vec<u8>>>,
) {
    use nix::errno::Errno;
    use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
    use std::os::fd::AsFd;

    let mut buf = [0u8; 1024];
    while !stop.load(Ordering::SeqCst) {
        let ready = {
            let mut fds = [PollFd::new(file.as_fd(), PollFlags::POLLIN)];
            poll(&mut fds, PollTimeout::from(POLL_INTERVAL_MS))
        };
        match ready {
            Ok(0) | Err(Errno::EINTR) => continue,
            Ok(_) => {}
            Err(e) => {
                let _ = tx.blocking_send(Err(e.into()));
                return;
            }
        }

        // セッション終了後の入力は次の利用者に残す
        if stop.load(Ordering::SeqCst) {
            return;
        }

        let chunk = match file.read(&mut buf) {
            Ok(0) => return,
            Ok(n) => Ok(buf[..n].to_vec()),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => Err(e),
        };
        let failed = chunk.is_err();
        if tx.blocking_send(chunk).is_err() || failed {
            return;
        }
    }
    debug!("Keyboard reader stopped");
}

impl AsyncRead for KeyboardInput {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;

        if this.offset >= this.pending.len() {
            match this.rx.poll_recv(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    this.pending = chunk;
                    this.offset = 0;
                }
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Err(e)),
                // EOF
                Poll::Ready(None) => return Poll::Ready(Ok(())),
                Poll::Pending => return Poll::Pending,
            }
        }

        let remaining = &this.pending[this.offset..];
        let n = remaining.len().min(buf.remaining());
        buf.put_slice(&remaining[..n]);
        this.offset += n;
        Poll::Ready(Ok(()))
    }
}

/// rawモードのスコープ
///
/// 取得時に元のモードを保存してrawモードにし、`restore` かドロップで元に戻す。
pub struct RawModeGuard {
    terminal: Arc<dyn HostTerminal>,
    was_raw: bool,
    restored: bool,
}

impl RawModeGuard {
    pub fn acquire(terminal: Arc<dyn HostTerminal>) -> Result<Self> {
        let was_raw = terminal.is_raw_mode().map_err(StageError::TerminalState)?;
        if !was_raw {
            terminal
                .set_raw_mode(true)
                .map_err(StageError::TerminalState)?;
        }
        debug!(was_raw, "Entered raw mode");

        Ok(Self {
            terminal,
            was_raw,
            restored: false,
        })
    }

    /// 取得前にrawモードだったか
    pub fn was_raw(&self) -> bool {
        self.was_raw
    }

    /// 元のモードへ戻す
    pub fn restore(mut self) -> Result<()> {
        self.restored = true;
        self.apply().map_err(StageError::TerminalState)
    }

    fn apply(&self) -> io::Result<()> {
        if self.was_raw {
            return Ok(());
        }
        self.terminal.set_raw_mode(false)?;
        debug!("Restored cooked mode");
        Ok(())
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        // restore() を経ずに破棄された（パニックやキャンセル）場合
        if !self.restored
            && let Err(e) = self.apply()
        {
            error!(error = %e, "Failed to restore terminal mode");
        }
    }
}

/// rawモードで `body` を実行し、結果にかかわらず元のモードへ戻す
///
/// 本体と復元の両方が失敗した場合は本体のエラーを返し、復元の失敗はログに出す。
pub async fn with_raw_mode<T, F>(terminal: &Arc<dyn HostTerminal>, body: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let guard = RawModeGuard::acquire(terminal.clone())?;
    let outcome = body.await;
    let restored = guard.restore();

    match (outcome, restored) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(restore_err)) => {
            error!(error = %restore_err, "Failed to restore terminal mode after stage failure");
            Err(e)
        }
    }
}
