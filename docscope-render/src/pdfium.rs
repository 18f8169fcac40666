use std::convert::TryFrom;
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use docscope_core::{
    DocumentBackend, DocumentProvider, NormalizedRect, RenderImage, RenderRequest, TextRun,
};
use parking_lot::Mutex;
use pdfium_render::prelude::*;
use tracing::{debug, instrument, warn};

pub const PDFIUM_LIBRARY_ENV: &str = "DOCSCOPE_PDFIUM_LIBRARY_PATH";

/// Opens uploaded bytes with pdfium.
pub struct PdfiumProvider {
    pdfium: Arc<Pdfium>,
}

impl PdfiumProvider {
    /// Binds pdfium from `library` when given, then the environment override,
    /// then `./`, then the system library.
    pub fn new(library: Option<&Path>) -> Result<Self> {
        let explicit = library
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(PDFIUM_LIBRARY_ENV).map(PathBuf::from))
            .filter(|path| !path.as_os_str().is_empty());

        let pdfium = match explicit.as_deref().and_then(bind_pdfium_at) {
            Some(pdfium) => pdfium,
            None => bind_pdfium_default()?,
        };
        Ok(Self {
            pdfium: Arc::new(pdfium),
        })
    }
}

#[async_trait]
impl DocumentProvider for PdfiumProvider {
    #[instrument(skip(self, bytes), fields(size = bytes.len()))]
    async fn open(&self, name: &str, bytes: Arc<[u8]>) -> Result<Arc<dyn DocumentBackend>> {
        let document = self
            .pdfium
            .load_pdf_from_byte_vec(bytes.to_vec(), None)
            .with_context(|| format!("failed to open {name}"))?;
        // SAFETY: the document borrows the bindings owned by `pdfium`. It is
        // stored in `PdfiumDocument::document`, which is declared before the
        // `pdfium` field and is therefore dropped first.
        let document = unsafe { mem::transmute::<PdfDocument<'_>, PdfDocument<'static>>(document) };
        let page_count = usize::try_from(document.pages().len()).unwrap_or_default();
        debug!(name, page_count, "opened document");

        Ok(Arc::new(PdfiumDocument {
            name: name.to_string(),
            page_count,
            document: Mutex::new(document),
            _pdfium: Arc::clone(&self.pdfium),
        }))
    }
}

struct PdfiumDocument {
    name: String,
    page_count: usize,
    document: Mutex<PdfDocument<'static>>,
    _pdfium: Arc<Pdfium>,
}

impl PdfiumDocument {
    fn with_page<R, F>(&self, page_index: usize, f: F) -> Result<R>
    where
        F: FnOnce(&PdfPage<'_>) -> Result<R>,
    {
        let document = self.document.lock();
        let index: PdfPageIndex = page_index
            .try_into()
            .map_err(|_| anyhow!("page {} is out of supported range", page_index + 1))?;
        let page = document
            .pages()
            .get(index)
            .with_context(|| format!("page {} out of range in {}", page_index + 1, self.name))?;
        f(&page)
    }
}

impl DocumentBackend for PdfiumDocument {
    fn page_count(&self) -> usize {
        self.page_count
    }

    #[instrument(skip(self), fields(name = %self.name))]
    fn render_page(&self, request: RenderRequest) -> Result<RenderImage> {
        self.with_page(request.page_index, |page| {
            let config = PdfRenderConfig::new().scale_page_by_factor(request.scale.max(0.1));
            let bitmap = page
                .render_with_config(&config)
                .with_context(|| format!("failed to render page {}", request.page_index + 1))?;
            let image = bitmap.as_image().to_rgba8();

            Ok(RenderImage {
                width: u32::try_from(bitmap.width()).unwrap_or_default(),
                height: u32::try_from(bitmap.height()).unwrap_or_default(),
                pixels: image.into_raw(),
            })
        })
    }

    fn text_runs(&self, page_index: usize) -> Result<Vec<TextRun>> {
        self.with_page(page_index, |page| {
            let page_width = page.width().value;
            let page_height = page.height().value;
            if page_width <= 0.0 || page_height <= 0.0 {
                return Ok(Vec::new());
            }

            let text = page
                .text()
                .with_context(|| format!("failed to extract text for page {}", page_index + 1))?;

            let mut runs = Vec::new();
            for segment in text.segments().iter() {
                let content = segment.text();
                if content.trim().is_empty() {
                    continue;
                }
                let rect = normalize(&segment.bounds(), page_width, page_height);
                if !rect.is_valid() {
                    warn!(page = page_index + 1, name = %self.name, "skipping degenerate text segment");
                    continue;
                }
                runs.push(TextRun { text: content, rect });
            }
            Ok(runs)
        })
    }
}

/// Converts a PDF-space rectangle (origin bottom-left) to page-relative
/// coordinates with the origin top-left.
fn normalize(bounds: &PdfRect, page_width: f32, page_height: f32) -> NormalizedRect {
    NormalizedRect {
        left: bounds.left().value / page_width,
        top: 1.0 - bounds.top().value / page_height,
        right: bounds.right().value / page_width,
        bottom: 1.0 - bounds.bottom().value / page_height,
    }
    .clamp()
}

fn bind_pdfium_at(path: &Path) -> Option<Pdfium> {
    let path = if path.is_dir() {
        Pdfium::pdfium_platform_library_name_at_path(path)
    } else {
        path.to_path_buf()
    };
    match Pdfium::bind_to_library(&path) {
        Ok(bindings) => Some(Pdfium::new(bindings)),
        Err(err) => {
            warn!("failed to load Pdfium from {}: {}", path.display(), err);
            None
        }
    }
}

fn bind_pdfium_default() -> Result<Pdfium> {
    let mut errors = Vec::new();

    let cwd_path = Pdfium::pdfium_platform_library_name_at_path("./");
    match Pdfium::bind_to_library(&cwd_path) {
        Ok(bindings) => return Ok(Pdfium::new(bindings)),
        Err(err) => errors.push(format!("{}: {}", cwd_path.display(), err)),
    }

    match Pdfium::bind_to_system_library() {
        Ok(bindings) => Ok(Pdfium::new(bindings)),
        Err(err) => {
            errors.push(format!("system: {err}"));
            Err(anyhow!(
                "failed to bind to a pdfium library; set {} or install it ({})",
                PDFIUM_LIBRARY_ENV,
                errors.join(", ")
            ))
        }
    }
}
