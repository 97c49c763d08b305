use crate::assets::AssetCache;
use crate::canvas::{DrawOperation, PageCanvas};
use crate::embed::{ImageFormatHint, decode_image};
use crate::error::{ComposeError, ComposeResult};
use crate::fragment::{FragmentRequest, TextFragmentBuilder};
use crate::loader::BinaryLoader;
use crate::metrics::PageReport;
use crate::notify::Notifier;
use crate::object::{AnnotationObject, DrawingSpec, ImageSpec, ObjectKind, ObjectKindTag, PageJob, TextSpec};
use crate::path::PathData;
use crate::session::PageHandle;
use crate::types::Rect;
use rayon::prelude::*;
use std::time::Instant;

/// What happens when preparing an object of a given kind fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Notify, skip the object and keep going.
    #[default]
    Isolate,
    /// Fail the whole save once every page has finished.
    Abort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FailurePolicies {
    pub image: FailurePolicy,
    pub text: FailurePolicy,
    pub drawing: FailurePolicy,
}

impl FailurePolicies {
    pub fn set(&mut self, kind: ObjectKindTag, policy: FailurePolicy) {
        match kind {
            ObjectKindTag::Image => self.image = policy,
            ObjectKindTag::Text => self.text = policy,
            ObjectKindTag::Drawing => self.drawing = policy,
            ObjectKindTag::Unsupported => {}
        }
    }

    pub fn get(&self, kind: ObjectKindTag) -> FailurePolicy {
        match kind {
            ObjectKindTag::Image => self.image,
            ObjectKindTag::Text => self.text,
            ObjectKindTag::Drawing => self.drawing,
            ObjectKindTag::Unsupported => FailurePolicy::Isolate,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComposeOptions {
    pub image_opacity: f32,
    pub drawing_border_width: f32,
    pub policies: FailurePolicies,
}

impl Default for ComposeOptions {
    fn default() -> Self {
        Self {
            image_opacity: 0.6,
            drawing_border_width: 5.0,
            policies: FailurePolicies::default(),
        }
    }
}

/// Turns one object into a draw operation without touching the document.
pub trait ObjectPreparer: Send + Sync {
    fn prepare(&self, page: &PageHandle, object: &AnnotationObject) -> ComposeResult<DrawOperation>;
}

pub struct PdfPreparer<'a> {
    pub loader: &'a dyn BinaryLoader,
    pub assets: &'a AssetCache,
    pub fragments: &'a dyn TextFragmentBuilder,
    pub options: &'a ComposeOptions,
}

impl ObjectPreparer for PdfPreparer<'_> {
    fn prepare(&self, page: &PageHandle, object: &AnnotationObject) -> ComposeResult<DrawOperation> {
        match &object.kind {
            ObjectKind::Image(spec) => self.prepare_image(page, object, spec),
            ObjectKind::Text(spec) => self.prepare_text(page, object, spec),
            ObjectKind::Drawing(spec) => self.prepare_drawing(page, object, spec),
            ObjectKind::Unsupported => {
                tracing::warn!(page = page.index, "skipping object of unsupported type");
                Ok(DrawOperation::Noop)
            }
        }
    }
}

impl PdfPreparer<'_> {
    fn prepare_image(
        &self,
        page: &PageHandle,
        object: &AnnotationObject,
        spec: &ImageSpec,
    ) -> ComposeResult<DrawOperation> {
        let data = self.loader.load(&spec.source)?;
        let mime = spec
            .mime_type
            .clone()
            .or_else(|| spec.source.embedded_mime());
        let image = decode_image(&data, ImageFormatHint::from_mime(mime.as_deref(), &data))?;
        Ok(DrawOperation::Image {
            image,
            rect: Rect::from_top_left(page.height(), object.x, object.y, spec.width, spec.height),
            opacity: self.options.image_opacity,
        })
    }

    fn prepare_text(
        &self,
        page: &PageHandle,
        object: &AnnotationObject,
        spec: &TextSpec,
    ) -> ComposeResult<DrawOperation> {
        let font = self.assets.resolve(&spec.font_family)?;
        let height = spec.block_height();
        let fragment = self.fragments.build(&FragmentRequest {
            lines: &spec.lines,
            font_size: spec.size,
            line_height: spec.line_height,
            width: spec.width,
            height,
            font: &font,
            dy: font.dy(spec.size, spec.line_height),
        })?;
        Ok(DrawOperation::Fragment {
            fragment,
            rect: Rect::from_top_left(page.height(), object.x, object.y, spec.width, height),
        })
    }

    fn prepare_drawing(
        &self,
        page: &PageHandle,
        object: &AnnotationObject,
        spec: &DrawingSpec,
    ) -> ComposeResult<DrawOperation> {
        Ok(DrawOperation::Path {
            path: PathData::parse(&spec.path)?,
            x: object.x,
            y: page.height() - object.y,
            scale: spec.scale,
            border_width: self.options.drawing_border_width,
        })
    }
}

pub(crate) fn failure_message(kind: ObjectKindTag) -> &'static str {
    match kind {
        ObjectKindTag::Image => "Failed to embed image.",
        ObjectKindTag::Text => "Failed to embed text.",
        ObjectKindTag::Drawing => "Failed to draw path.",
        ObjectKindTag::Unsupported => "Failed to embed object.",
    }
}

#[derive(Debug)]
pub struct PageOutcome {
    pub canvas: PageCanvas,
    pub report: PageReport,
    /// First object failure under an `Abort` policy.
    pub abort: Option<ComposeError>,
}

/// Prepares a page's objects concurrently and applies them in index order.
pub struct PageComposer<'a> {
    pub preparer: &'a dyn ObjectPreparer,
    pub policies: FailurePolicies,
    pub notifier: &'a dyn Notifier,
}

impl PageComposer<'_> {
    pub fn compose(&self, page: &PageHandle, job: &PageJob<'_>) -> PageOutcome {
        let mut report = PageReport {
            page_index: page.index,
            objects: job.objects.len(),
            ..PageReport::default()
        };
        let mut canvas = page.canvas();
        let mut abort = None;
        if job.objects.is_empty() {
            return PageOutcome {
                canvas,
                report,
                abort,
            };
        }

        let started = Instant::now();
        let prepared: Vec<ComposeResult<DrawOperation>> = job
            .objects
            .par_iter()
            .map(|object| self.preparer.prepare(page, object))
            .collect();
        report.prepare_ms = started.elapsed().as_secs_f64() * 1000.0;

        let started = Instant::now();
        for (index, (object, result)) in job.objects.iter().zip(prepared).enumerate() {
            let kind = object.kind.tag();
            match result {
                Ok(op) => {
                    if op.is_noop() {
                        report.skipped += 1;
                    } else {
                        report.drawn += 1;
                    }
                    canvas.apply(op);
                }
                Err(err) => {
                    report.failed += 1;
                    match self.policies.get(kind) {
                        FailurePolicy::Isolate => {
                            tracing::warn!(page = page.index, index, %kind, error = %err, "object skipped");
                            self.notifier.error(failure_message(kind));
                            canvas.apply(DrawOperation::Noop);
                        }
                        FailurePolicy::Abort => {
                            tracing::debug!(page = page.index, index, %kind, error = %err, "object aborts save");
                            if abort.is_none() {
                                abort = Some(ComposeError::Object {
                                    page: page.index,
                                    index,
                                    kind,
                                    message: err.to_string(),
                                });
                            }
                        }
                    }
                }
            }
        }
        report.apply_ms = started.elapsed().as_secs_f64() * 1000.0;
        report.command_count = canvas.commands().len();
        tracing::debug!(
            page = page.index,
            objects = report.objects,
            drawn = report.drawn,
            failed = report.failed,
            "page composed"
        );

        PageOutcome {
            canvas,
            report,
            abort,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::AssetCache;
    use crate::canvas::Command;
    use crate::fragment::PdfFragmentBuilder;
    use crate::loader::{BinarySource, FsLoader, encode_data_uri};
    use crate::notify::tests::RecordingNotifier;
    use crate::object::partition_by_page;
    use crate::session::DocumentSession;
    use crate::session::tests::make_pdf_bytes;

    fn handle() -> PageHandle {
        let session = DocumentSession::load(&make_pdf_bytes(1)).expect("load");
        session.pages()[0].clone()
    }

    fn png_object(x: f32, y: f32) -> AnnotationObject {
        let png = crate::embed::tests::png_bytes(4, 4, [255, 0, 0, 255]);
        AnnotationObject::image(
            0,
            x,
            y,
            ImageSpec {
                source: BinarySource::DataUri(encode_data_uri("image/png", &png)),
                mime_type: None,
                width: 20.0,
                height: 10.0,
            },
        )
    }

    fn broken_image() -> AnnotationObject {
        AnnotationObject::image(
            0,
            0.0,
            0.0,
            ImageSpec {
                source: BinarySource::bytes(b"not an image".to_vec()),
                mime_type: Some("image/png".to_string()),
                width: 1.0,
                height: 1.0,
            },
        )
    }

    fn with_preparer<R>(f: impl FnOnce(&PdfPreparer<'_>) -> R) -> R {
        let loader = FsLoader::new();
        let assets = AssetCache::with_builtins();
        let options = ComposeOptions::default();
        let preparer = PdfPreparer {
            loader: &loader,
            assets: &assets,
            fragments: &PdfFragmentBuilder,
            options: &options,
        };
        f(&preparer)
    }

    #[test]
    fn image_is_placed_from_the_top_left() {
        let page = handle();
        let op = with_preparer(|p| p.prepare(&page, &png_object(10.0, 30.0))).expect("image");
        match op {
            DrawOperation::Image { rect, opacity, .. } => {
                assert_eq!(rect, Rect::new(10.0, 752.0, 20.0, 10.0));
                assert_eq!(opacity, 0.6);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn text_block_height_follows_line_count() {
        let page = handle();
        let object = AnnotationObject::text(
            0,
            5.0,
            100.0,
            TextSpec {
                lines: vec!["a".to_string(), "b".to_string(), "c".to_string()],
                line_height: 1.5,
                size: 10.0,
                font_family: "Times-Roman".to_string(),
                width: 60.0,
            },
        );
        let op = with_preparer(|p| p.prepare(&page, &object)).expect("text");
        match op {
            DrawOperation::Fragment { fragment, rect } => {
                assert_eq!(rect, Rect::new(5.0, 647.0, 60.0, 45.0));
                assert_eq!((fragment.width, fragment.height), (60.0, 45.0));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_font_family_fails_preparation() {
        let page = handle();
        let object = AnnotationObject::text(
            0,
            0.0,
            0.0,
            TextSpec {
                lines: vec!["x".to_string()],
                line_height: 1.0,
                size: 10.0,
                font_family: "Nope".to_string(),
                width: 10.0,
            },
        );
        assert!(with_preparer(|p| p.prepare(&page, &object)).is_err());
    }

    #[test]
    fn drawing_origin_is_flipped_to_page_space() {
        let page = handle();
        let object = AnnotationObject::drawing(0, 40.0, 100.0, "M0 0 L1 1", 0.5);
        match with_preparer(|p| p.prepare(&page, &object)).expect("drawing") {
            DrawOperation::Path {
                x,
                y,
                scale,
                border_width,
                ..
            } => {
                assert_eq!((x, y, scale, border_width), (40.0, 692.0, 0.5, 5.0));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unsupported_objects_become_noops() {
        let page = handle();
        let object = AnnotationObject {
            page: 0,
            x: 0.0,
            y: 0.0,
            kind: ObjectKind::Unsupported,
        };
        let op = with_preparer(|p| p.prepare(&page, &object)).expect("noop");
        assert!(op.is_noop());
    }

    #[test]
    fn isolated_failure_notifies_and_keeps_the_rest() {
        let page = handle();
        let objects = vec![png_object(0.0, 0.0), broken_image(), png_object(5.0, 5.0)];
        let jobs = partition_by_page(&objects, 1);
        let notifier = RecordingNotifier::default();
        let outcome = with_preparer(|p| {
            PageComposer {
                preparer: p,
                policies: FailurePolicies::default(),
                notifier: &notifier,
            }
            .compose(&page, &jobs[0])
        });
        assert!(outcome.abort.is_none());
        assert_eq!(outcome.report.drawn, 2);
        assert_eq!(outcome.report.failed, 1);
        assert_eq!(notifier.messages(), vec!["Failed to embed image.".to_string()]);
        let draws = outcome
            .canvas
            .commands()
            .iter()
            .filter(|cmd| matches!(cmd, Command::DrawXObject(_)))
            .count();
        assert_eq!(draws, 2);
        assert_eq!(outcome.canvas.applied(), 3);
    }

    #[test]
    fn abort_policy_reports_the_first_failure() {
        let page = handle();
        let objects = vec![png_object(0.0, 0.0), broken_image(), broken_image()];
        let jobs = partition_by_page(&objects, 1);
        let notifier = RecordingNotifier::default();
        let mut policies = FailurePolicies::default();
        policies.set(ObjectKindTag::Image, FailurePolicy::Abort);
        let outcome = with_preparer(|p| {
            PageComposer {
                preparer: p,
                policies,
                notifier: &notifier,
            }
            .compose(&page, &jobs[0])
        });
        match outcome.abort {
            Some(ComposeError::Object { page, index, kind, .. }) => {
                assert_eq!((page, index, kind), (0, 1, ObjectKindTag::Image));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(notifier.messages().is_empty());
        assert_eq!(outcome.report.failed, 2);
    }

    #[test]
    fn empty_job_prepares_nothing() {
        let page = handle();
        let jobs = partition_by_page(&[], 1);
        let notifier = RecordingNotifier::default();
        let outcome = with_preparer(|p| {
            PageComposer {
                preparer: p,
                policies: FailurePolicies::default(),
                notifier: &notifier,
            }
            .compose(&page, &jobs[0])
        });
        assert!(outcome.canvas.is_empty());
        assert_eq!(outcome.report, PageReport::default());
    }

    #[test]
    fn policies_default_to_isolate() {
        let mut policies = FailurePolicies::default();
        assert_eq!(policies.get(ObjectKindTag::Text), FailurePolicy::Isolate);
        policies.set(ObjectKindTag::Drawing, FailurePolicy::Abort);
        assert_eq!(policies.get(ObjectKindTag::Drawing), FailurePolicy::Abort);
        policies.set(ObjectKindTag::Unsupported, FailurePolicy::Abort);
        assert_eq!(policies.get(ObjectKindTag::Unsupported), FailurePolicy::Isolate);
    }
}
