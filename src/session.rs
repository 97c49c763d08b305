use crate::canvas::{PageCanvas, PendingResource, ResourceKind, render_content};
use crate::embed::ImageResource;
use crate::error::{ComposeError, ComposeResult, lopdf_err};
use crate::fragment::TextFragment;
use crate::types::Size;
use lopdf::{
    Document as LoDocument, Object as LoObject, ObjectId as LoObjectId, Stream as LoStream,
    dictionary,
};
use std::collections::BTreeSet;

const MAX_TREE_DEPTH: usize = 64;

/// One page of the loaded document, as seen by the composers.
#[derive(Debug, Clone)]
pub struct PageHandle {
    pub index: usize,
    pub id: LoObjectId,
    pub size: Size,
    reserved: BTreeSet<String>,
}

impl PageHandle {
    pub fn height(&self) -> f32 {
        self.size.height
    }

    /// An empty canvas whose resource names cannot clash with the page's own.
    pub fn canvas(&self) -> PageCanvas {
        PageCanvas::with_reserved_names(self.reserved.clone())
    }
}

/// A decoded source document. Pages are mutated only through
/// [`DocumentSession::commit`].
#[derive(Debug)]
pub struct DocumentSession {
    doc: LoDocument,
    pages: Vec<PageHandle>,
}

impl DocumentSession {
    pub fn load(bytes: &[u8]) -> ComposeResult<Self> {
        let doc = LoDocument::load_mem(bytes).map_err(|err| ComposeError::decode(err.to_string()))?;
        Self::from_document(doc)
    }

    pub fn from_document(doc: LoDocument) -> ComposeResult<Self> {
        if doc.is_encrypted() {
            return Err(ComposeError::decode("encrypted documents are not supported"));
        }
        let pages: Vec<PageHandle> = doc
            .get_pages()
            .values()
            .enumerate()
            .map(|(index, id)| {
                let [llx, lly, urx, ury] = page_box(&doc, *id);
                PageHandle {
                    index,
                    id: *id,
                    size: Size::new(urx - llx, ury - lly),
                    reserved: reserved_names(&doc, *id),
                }
            })
            .collect();
        if pages.is_empty() {
            return Err(ComposeError::decode("document has no pages"));
        }
        tracing::debug!(pages = pages.len(), version = %doc.version, "document loaded");
        Ok(Self { doc, pages })
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn pages(&self) -> &[PageHandle] {
        &self.pages
    }

    pub fn page(&self, index: usize) -> Option<&PageHandle> {
        self.pages.get(index)
    }

    /// Installs a canvas's resources on its page and appends its content.
    /// Existing page content is wrapped in a save/restore pair first so its
    /// graphics state cannot leak into the annotations.
    pub fn commit(&mut self, page_index: usize, canvas: PageCanvas) -> ComposeResult<()> {
        let Some(page_id) = self.pages.get(page_index).map(|page| page.id) else {
            return Err(ComposeError::Pdf(format!("page {page_index} does not exist")));
        };
        if canvas.is_empty() {
            return Ok(());
        }
        let (commands, pending) = canvas.into_parts();

        let mut resources = match resolved_page_attribute(&self.doc, page_id, b"Resources") {
            Some(LoObject::Dictionary(dict)) => dict,
            _ => lopdf::Dictionary::new(),
        };
        for resource in pending {
            let category = resource.kind.category();
            let mut entries = resource_subdict(&self.doc, &resources, category);
            let PendingResource { name, kind } = resource;
            let id = self.install(kind)?;
            entries.set(name.into_bytes(), LoObject::Reference(id));
            resources.set(category, LoObject::Dictionary(entries));
        }

        let content_id = self
            .doc
            .add_object(LoStream::new(dictionary! {}, render_content(&commands)));
        let mut contents = self.existing_contents(page_id);
        if !contents.is_empty() {
            let open = self.doc.add_object(LoStream::new(dictionary! {}, b"q\n".to_vec()));
            let close = self.doc.add_object(LoStream::new(dictionary! {}, b"\nQ\n".to_vec()));
            contents.insert(0, LoObject::Reference(open));
            contents.push(LoObject::Reference(close));
        }
        contents.push(LoObject::Reference(content_id));

        let page = self
            .doc
            .get_object_mut(page_id)
            .and_then(LoObject::as_dict_mut)
            .map_err(lopdf_err)?;
        page.set("Resources", LoObject::Dictionary(resources));
        page.set("Contents", LoObject::Array(contents));
        Ok(())
    }

    /// Serializes the document. Consumes the session.
    pub fn finalize(mut self) -> ComposeResult<Vec<u8>> {
        self.doc.compress();
        let mut out = Vec::new();
        self.doc
            .save_to(&mut out)
            .map_err(|err| ComposeError::finalize(err.to_string()))?;
        Ok(out)
    }

    fn install(&mut self, kind: ResourceKind) -> ComposeResult<LoObjectId> {
        match kind {
            ResourceKind::Image(image) => Ok(self.install_image(image)),
            ResourceKind::Form(fragment) => self.import_fragment(fragment),
            ResourceKind::GraphicsState { alpha } => Ok(self.doc.add_object(dictionary! {
                "Type" => "ExtGState",
                "ca" => LoObject::Real(alpha),
                "CA" => LoObject::Real(alpha),
            })),
        }
    }

    fn install_image(&mut self, image: ImageResource) -> LoObjectId {
        let mut dict = dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => image.width as i64,
            "Height" => image.height as i64,
            "ColorSpace" => image.color_space,
            "BitsPerComponent" => image.bits_per_component as i64,
            "Filter" => image.filter,
        };
        if let Some(alpha) = image.alpha {
            let smask = LoStream::new(
                dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Image",
                    "Width" => alpha.width as i64,
                    "Height" => alpha.height as i64,
                    "ColorSpace" => "DeviceGray",
                    "BitsPerComponent" => 8,
                    "Filter" => "FlateDecode",
                },
                alpha.data,
            )
            .with_compression(false);
            let smask_id = self.doc.add_object(smask);
            dict.set("SMask", LoObject::Reference(smask_id));
        }
        self.doc
            .add_object(LoStream::new(dict, image.data).with_compression(false))
    }

    fn import_fragment(&mut self, fragment: TextFragment) -> ComposeResult<LoObjectId> {
        let mut src = fragment.doc;
        src.renumber_objects_with(self.doc.max_id + 1);
        let form_id = src
            .trailer
            .get(b"Root")
            .and_then(LoObject::as_reference)
            .map_err(lopdf_err)?;
        if src.max_id > self.doc.max_id {
            self.doc.max_id = src.max_id;
        }
        self.doc.objects.extend(src.objects);
        Ok(form_id)
    }

    fn existing_contents(&self, page_id: LoObjectId) -> Vec<LoObject> {
        let Ok(page) = self.doc.get_object(page_id).and_then(LoObject::as_dict) else {
            return Vec::new();
        };
        match page.get(b"Contents") {
            Ok(LoObject::Reference(id)) => match self.doc.get_object(*id) {
                Ok(LoObject::Array(items)) => items.clone(),
                Ok(_) => vec![LoObject::Reference(*id)],
                Err(_) => Vec::new(),
            },
            Ok(LoObject::Array(items)) => items.clone(),
            _ => Vec::new(),
        }
    }
}

fn deref<'a>(doc: &'a LoDocument, obj: &'a LoObject) -> Option<&'a LoObject> {
    match obj {
        LoObject::Reference(id) => doc.get_object(*id).ok(),
        other => Some(other),
    }
}

/// Looks `key` up on the page and then its ancestors, following references.
pub(crate) fn resolved_page_attribute(
    doc: &LoDocument,
    page_id: LoObjectId,
    key: &[u8],
) -> Option<LoObject> {
    let mut node = doc.get_object(page_id).and_then(LoObject::as_dict).ok()?;
    for _ in 0..MAX_TREE_DEPTH {
        if let Ok(value) = node.get(key) {
            return deref(doc, value).cloned();
        }
        let parent = node.get(b"Parent").and_then(LoObject::as_reference).ok()?;
        node = doc.get_object(parent).and_then(LoObject::as_dict).ok()?;
    }
    None
}

/// `[llx, lly, urx, ury]` of the page's media box, US Letter when absent.
pub(crate) fn page_box(doc: &LoDocument, page_id: LoObjectId) -> [f32; 4] {
    let fallback = [0.0, 0.0, 612.0, 792.0];
    let Some(LoObject::Array(items)) = resolved_page_attribute(doc, page_id, b"MediaBox") else {
        return fallback;
    };
    if items.len() != 4 {
        return fallback;
    }
    let mut out = [0.0f32; 4];
    for (slot, item) in out.iter_mut().zip(&items) {
        match deref(doc, item).and_then(number) {
            Some(value) => *slot = value,
            None => return fallback,
        }
    }
    out
}

fn number(obj: &LoObject) -> Option<f32> {
    match obj {
        LoObject::Integer(value) => Some(*value as f32),
        LoObject::Real(value) => Some(*value),
        _ => None,
    }
}

fn resource_subdict(
    doc: &LoDocument,
    resources: &lopdf::Dictionary,
    category: &str,
) -> lopdf::Dictionary {
    match resources.get(category.as_bytes()) {
        Ok(value) => deref(doc, value)
            .and_then(|obj| obj.as_dict().ok())
            .cloned()
            .unwrap_or_default(),
        Err(_) => lopdf::Dictionary::new(),
    }
}

fn reserved_names(doc: &LoDocument, page_id: LoObjectId) -> BTreeSet<String> {
    let Some(LoObject::Dictionary(resources)) =
        resolved_page_attribute(doc, page_id, b"Resources")
    else {
        return BTreeSet::new();
    };
    ["XObject", "ExtGState"]
        .iter()
        .flat_map(|category| {
            resource_subdict(doc, &resources, category)
                .iter()
                .map(|(name, _)| String::from_utf8_lossy(name).into_owned())
                .collect::<Vec<_>>()
        })
        .collect()
}
