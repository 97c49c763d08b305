use std::path::PathBuf;

/// User-facing error notifications.
pub trait Notifier: Send + Sync {
    fn error(&self, message: &str);
}

/// Emits notifications through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn error(&self, message: &str) {
        tracing::error!(target: "pagestamp::notify", "{message}");
    }
}

/// Receives the finished document. Delivery is fire-and-forget: a sink logs
/// its own failures and never reports them to the composer.
pub trait DownloadSink: Send + Sync {
    fn deliver(&self, bytes: &[u8], filename: &str, mime: &str);
}

/// Writes deliveries into a directory, creating it when missing.
#[derive(Debug, Clone)]
pub struct FileDownload {
    dir: PathBuf,
}

impl FileDownload {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &std::path::Path {
        &self.dir
    }

    /// Only the final path component of `filename` is honored.
    pub fn target_path(&self, filename: &str) -> PathBuf {
        let name = std::path::Path::new(filename)
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_else(|| "document.pdf".into());
        self.dir.join(name)
    }
}

impl DownloadSink for FileDownload {
    fn deliver(&self, bytes: &[u8], filename: &str, mime: &str) {
        let target = self.target_path(filename);
        let result = std::fs::create_dir_all(&self.dir).and_then(|_| std::fs::write(&target, bytes));
        match result {
            Ok(()) => tracing::debug!(path = %target.display(), mime, bytes = bytes.len(), "download written"),
            Err(err) => tracing::error!(path = %target.display(), error = %err, "download failed"),
        }
    }
}
