mod assets;
mod canvas;
mod embed;
mod error;
mod font;
mod fragment;
mod loader;
mod metrics;
mod notify;
mod object;
mod page;
mod path;
mod session;
mod types;

pub use assets::{AssetCache, FontSource};
pub use canvas::{Command, DrawOperation, PageCanvas, PendingResource, ResourceKind, render_content};
pub use embed::{AlphaMask, ImageFormatHint, ImageResource, decode_image};
pub use error::{ComposeError, ComposeResult};
pub use font::{BaselineCorrection, BuiltinFont, EmbeddedFont, FontMetrics, FontProgram, ResolvedFont};
pub use fragment::{FragmentRequest, PdfFragmentBuilder, TextFragment, TextFragmentBuilder};
pub use loader::{BinaryLoader, BinarySource, FsLoader, PDF_MIME, decode_data_uri, encode_data_uri};
pub use metrics::{ComposeReport, PageReport};
pub use notify::{DownloadSink, FileDownload, LogNotifier, Notifier};
pub use object::{
    AnnotationObject, DrawingSpec, ImageSpec, ObjectKind, ObjectKindTag, PageJob, TextSpec,
    partition_by_page,
};
pub use page::{
    ComposeOptions, FailurePolicies, FailurePolicy, ObjectPreparer, PageComposer, PageOutcome,
    PdfPreparer,
};
pub use path::PathData;
pub use session::{DocumentSession, PageHandle};
pub use types::{Rect, Size};

use rayon::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

const LOAD_FAILED: &str = "Failed to load PDF while saving, please try again.";
const SAVE_FAILED: &str = "Failed to save PDF.";

/// Result of a successful save.
#[derive(Debug, Clone)]
pub struct SaveOutput {
    pub bytes: Vec<u8>,
    /// `data:application/pdf;base64,...` of `bytes`.
    pub preview: String,
    pub report: ComposeReport,
}

/// Composes annotation objects onto the pages of existing documents.
///
/// A composer owns its font cache, so fonts are loaded at most once for its
/// lifetime. Each `save` call decodes its own document session.
pub struct Composer {
    assets: AssetCache,
    loader: Arc<dyn BinaryLoader>,
    fragments: Arc<dyn TextFragmentBuilder>,
    notifier: Arc<dyn Notifier>,
    download: Arc<dyn DownloadSink>,
    options: ComposeOptions,
    pool: Option<rayon::ThreadPool>,
}

pub struct ComposerBuilder {
    assets: AssetCache,
    loader: Arc<dyn BinaryLoader>,
    fragments: Arc<dyn TextFragmentBuilder>,
    notifier: Arc<dyn Notifier>,
    download: Arc<dyn DownloadSink>,
    options: ComposeOptions,
    threads: Option<usize>,
}

impl Composer {
    pub fn builder() -> ComposerBuilder {
        ComposerBuilder::new()
    }

    pub fn assets(&self) -> &AssetCache {
        &self.assets
    }

    pub fn options(&self) -> &ComposeOptions {
        &self.options
    }

    /// Draws `objects` onto `source`, hands the result to the download sink
    /// and returns it together with a data URI preview.
    #[tracing::instrument(skip_all, fields(output = %output_name, objects = objects.len()))]
    pub fn save(
        &self,
        source: &[u8],
        objects: &[AnnotationObject],
        output_name: &str,
    ) -> ComposeResult<SaveOutput> {
        let preparer = self.preparer();
        self.run(source, objects, output_name, &preparer, DocumentSession::finalize)
    }

    /// Like [`Composer::save`], reading the document through the loader first.
    pub fn save_from(
        &self,
        source: &BinarySource,
        objects: &[AnnotationObject],
        output_name: &str,
    ) -> ComposeResult<SaveOutput> {
        let bytes = match self.loader.load(source) {
            Ok(bytes) => bytes,
            Err(err) => {
                self.notifier.error(LOAD_FAILED);
                return Err(ComposeError::decode(err.to_string()));
            }
        };
        self.save(&bytes, objects, output_name)
    }

    fn preparer(&self) -> PdfPreparer<'_> {
        PdfPreparer {
            loader: self.loader.as_ref(),
            assets: &self.assets,
            fragments: self.fragments.as_ref(),
            options: &self.options,
        }
    }

    pub(crate) fn run<F>(
        &self,
        source: &[u8],
        objects: &[AnnotationObject],
        output_name: &str,
        preparer: &dyn ObjectPreparer,
        finalize: F,
    ) -> ComposeResult<SaveOutput>
    where
        F: FnOnce(DocumentSession) -> ComposeResult<Vec<u8>> + Send,
    {
        match &self.pool {
            Some(pool) => {
                pool.install(|| self.compose(source, objects, output_name, preparer, finalize))
            }
            None => self.compose(source, objects, output_name, preparer, finalize),
        }
    }

    fn compose<F>(
        &self,
        source: &[u8],
        objects: &[AnnotationObject],
        output_name: &str,
        preparer: &dyn ObjectPreparer,
        finalize: F,
    ) -> ComposeResult<SaveOutput>
    where
        F: FnOnce(DocumentSession) -> ComposeResult<Vec<u8>>,
    {
        let started = Instant::now();
        let mut session = match DocumentSession::load(source) {
            Ok(session) => session,
            Err(err) => {
                tracing::debug!(error = %err, "source document rejected");
                self.notifier.error(LOAD_FAILED);
                return Err(err);
            }
        };

        let jobs = partition_by_page(objects, session.page_count());
        let page_composer = PageComposer {
            preparer,
            policies: self.options.policies,
            notifier: self.notifier.as_ref(),
        };
        let outcomes: Vec<PageOutcome> = session
            .pages()
            .par_iter()
            .zip(jobs.par_iter())
            .map(|(page, job)| page_composer.compose(page, job))
            .collect();

        let mut report = ComposeReport::default();
        let mut abort = None;
        let mut canvases = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            report.pages.push(outcome.report);
            if abort.is_none() {
                abort = outcome.abort;
            }
            canvases.push(outcome.canvas);
        }
        if let Some(err) = abort {
            let kind = match &err {
                ComposeError::Object { kind, .. } => *kind,
                _ => ObjectKindTag::Unsupported,
            };
            self.notifier.error(page::failure_message(kind));
            return Err(err);
        }

        for (index, canvas) in canvases.into_iter().enumerate() {
            if let Err(err) = session.commit(index, canvas) {
                self.notifier.error(SAVE_FAILED);
                return Err(ComposeError::finalize(err.to_string()));
            }
        }
        let bytes = match finalize(session) {
            Ok(bytes) => bytes,
            Err(err) => {
                self.notifier.error(SAVE_FAILED);
                return Err(match err {
                    ComposeError::Finalize(_) => err,
                    other => ComposeError::finalize(other.to_string()),
                });
            }
        };

        self.download.deliver(&bytes, output_name, PDF_MIME);
        let preview = encode_data_uri(PDF_MIME, &bytes);
        report.output_bytes = bytes.len();
        report.total_ms = started.elapsed().as_secs_f64() * 1000.0;
        tracing::debug!(
            pages = report.pages.len(),
            drawn = report.drawn(),
            failed = report.failed(),
            bytes = report.output_bytes,
            "document saved"
        );
        Ok(SaveOutput {
            bytes,
            preview,
            report,
        })
    }
}

impl ComposerBuilder {
    pub fn new() -> Self {
        Self {
            assets: AssetCache::with_builtins(),
            loader: Arc::new(FsLoader::new()),
            fragments: Arc::new(PdfFragmentBuilder),
            notifier: Arc::new(LogNotifier),
            download: Arc::new(FileDownload::new(".")),
            options: ComposeOptions::default(),
            threads: None,
        }
    }

    pub fn image_opacity(mut self, opacity: f32) -> Self {
        self.options.image_opacity = opacity;
        self
    }

    pub fn drawing_border_width(mut self, width: f32) -> Self {
        self.options.drawing_border_width = width;
        self
    }

    pub fn failure_policy(mut self, kind: ObjectKindTag, policy: FailurePolicy) -> Self {
        self.options.policies.set(kind, policy);
        self
    }

    pub fn register_font_file(mut self, family: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.assets.register_font_file(family, path);
        self
    }

    pub fn register_font_bytes(mut self, family: impl Into<String>, data: impl Into<Arc<[u8]>>) -> Self {
        self.assets.register_font_bytes(family, data);
        self
    }

    /// Runs composition in a dedicated pool of `count` threads instead of the
    /// global rayon pool.
    pub fn threads(mut self, count: usize) -> Self {
        self.threads = Some(count);
        self
    }

    pub fn loader(mut self, loader: impl BinaryLoader + 'static) -> Self {
        self.loader = Arc::new(loader);
        self
    }

    pub fn fragment_builder(mut self, builder: impl TextFragmentBuilder + 'static) -> Self {
        self.fragments = Arc::new(builder);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn download(mut self, download: Arc<dyn DownloadSink>) -> Self {
        self.download = download;
        self
    }

    pub fn build(self) -> ComposeResult<Composer> {
        let opacity = self.options.image_opacity;
        if !(0.0..=1.0).contains(&opacity) {
            return Err(ComposeError::InvalidConfiguration(format!(
                "image opacity must be within 0..=1, got {opacity}"
            )));
        }
        let width = self.options.drawing_border_width;
        if !width.is_finite() || width < 0.0 {
            return Err(ComposeError::InvalidConfiguration(format!(
                "drawing border width must be a non-negative number, got {width}"
            )));
        }
        let pool = match self.threads {
            Some(0) => {
                return Err(ComposeError::InvalidConfiguration(
                    "thread count must be at least 1".to_string(),
                ));
            }
            Some(count) => Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(count)
                    .thread_name(|idx| format!("pagestamp-{idx}"))
                    .build()
                    .map_err(|err| ComposeError::InvalidConfiguration(err.to_string()))?,
            ),
            None => None,
        };
        Ok(Composer {
            assets: self.assets,
            loader: self.loader,
            fragments: self.fragments,
            notifier: self.notifier,
            download: self.download,
            options: self.options,
            pool,
        })
    }
}

impl Default for ComposerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
