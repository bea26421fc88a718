//! キャプチャストリーム
//!
//! コンテナ出力を端末へそのまま転送しつつ、抽出用にメモリへ全量を保持する。

use std::fmt;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// 共有の書き込み先
pub type SharedWriter = Arc<Mutex<dyn Write + Send>>;

/// 転送先のホスト側ストリーム
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureTarget {
    Stdout,
    Stderr,
}

/// ホストの標準出力・標準エラー出力
///
/// テストではメモリ上のバッファに差し替える。
#[derive(Clone)]
pub struct HostStreams {
    stdout: SharedWriter,
    stderr: SharedWriter,
}

impl HostStreams {
    pub fn new(stdout: SharedWriter, stderr: SharedWriter) -> Self {
        Self { stdout, stderr }
    }

    /// プロセスの標準出力・標準エラー出力
    pub fn process() -> Self {
        Self::new(
            Arc::new(Mutex::new(io::stdout())),
            Arc::new(Mutex::new(io::stderr())),
        )
    }

    /// 指定ストリームへ書き込んでフラッシュする
    pub fn write(&self, target: CaptureTarget, bytes: &[u8]) -> io::Result<()> {
        let writer = match target {
            CaptureTarget::Stdout => &self.stdout,
            CaptureTarget::Stderr => &self.stderr,
        };
        let mut writer = writer.lock().unwrap_or_else(PoisonError::into_inner);
        writer.write_all(bytes)?;
        writer.flush()
    }
}

impl Default for HostStreams {
    fn default() -> Self {
        Self::process()
    }
}

impl fmt::Debug for HostStreams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostStreams").finish_non_exhaustive()
    }
}

/// キャプチャした出力
///
/// 追記のみ。コンテナの終了後に読み出す（途中で読むと、その時点までの内容になる）。
#[derive(Debug, Clone, Default)]
pub struct CaptureBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl CaptureBuffer {
    fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn append(&self, chunk: &[u8]) {
        self.lock().extend_from_slice(chunk);
    }

    /// 生のバイト列
    pub fn bytes(&self) -> Vec<u8> {
        self.lock().clone()
    }

    /// UTF-8としてデコードしたテキスト（不正なバイト列は置換文字になる）
    pub fn to_text(&self) -> String {
        String::from_utf8_lossy(&self.lock()).into_owned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// 端末転送とキャプチャを同時に行う書き込み口
#[derive(Debug)]
pub struct CaptureSink {
    target: CaptureTarget,
    host: HostStreams,
    buffer: CaptureBuffer,
}

impl CaptureSink {
    /// チャンクを端末へ転送し、バッファへ追記する
    pub fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        if chunk.is_empty() {
            return Ok(());
        }
        self.host.write(self.target, chunk)?;
        self.buffer.append(chunk);
        Ok(())
    }
}

impl Write for CaptureSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_chunk(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// キャプチャストリームを開く
pub fn open(target: CaptureTarget, host: &HostStreams) -> (CaptureSink, CaptureBuffer) {
    let buffer = CaptureBuffer::default();
    let sink = CaptureSink {
        target,
        host: host.clone(),
        buffer: buffer.clone(),
    };
    (sink, buffer)
}
