use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of one upload. Two uploads never share an id, even when their
/// display names collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(Uuid);

impl FileId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for FileId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A file handed to the registry, before validation.
#[derive(Debug, Clone)]
pub struct IncomingFile {
    pub name: String,
    pub bytes: Arc<[u8]>,
}

impl IncomingFile {
    pub fn new(name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageCount {
    /// Parsing has not finished yet.
    Pending,
    Ready(usize),
    /// Parsing failed; the file is kept but cannot be viewed.
    Failed(String),
}

impl PageCount {
    /// Pages usable for navigation. Pending and failed documents count as 0.
    pub fn pages(&self) -> usize {
        match self {
            PageCount::Ready(count) => *count,
            PageCount::Pending | PageCount::Failed(_) => 0,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, PageCount::Pending)
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, PageCount::Failed(_))
    }
}

impl fmt::Display for PageCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageCount::Pending => f.write_str("…"),
            PageCount::Ready(count) => write!(f, "{count}"),
            PageCount::Failed(_) => f.write_str("0"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub id: FileId,
    pub name: String,
    pub bytes: Arc<[u8]>,
    pub page_count: PageCount,
}

impl UploadedFile {
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_viewable(&self) -> bool {
        self.page_count.pages() > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderRequest {
    /// 0-based page index.
    pub page_index: usize,
    pub scale: f32,
}

impl Default for RenderRequest {
    fn default() -> Self {
        Self {
            page_index: 0,
            scale: 1.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RenderImage {
    pub width: u32,
    pub height: u32,
    /// RGBA8, row-major.
    pub pixels: Vec<u8>,
}

/// Rectangle in page space normalized to `0.0..=1.0`, origin top-left.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRect {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl NormalizedRect {
    pub fn clamp(self) -> Self {
        let left = self.left.clamp(0.0, 1.0);
        let right = self.right.clamp(0.0, 1.0);
        let top = self.top.clamp(0.0, 1.0);
        let bottom = self.bottom.clamp(0.0, 1.0);
        Self {
            left: left.min(right),
            top: top.min(bottom),
            right: right.max(left),
            bottom: bottom.max(top),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.right > self.left && self.bottom > self.top
    }
}

/// A span of text the adapter extracted from a rendered page.
#[derive(Debug, Clone, PartialEq)]
pub struct TextRun {
    pub text: String,
    pub rect: NormalizedRect,
}

pub trait DocumentBackend: Send + Sync {
    fn page_count(&self) -> usize;
    fn render_page(&self, request: RenderRequest) -> Result<RenderImage>;
    fn text_runs(&self, page_index: usize) -> Result<Vec<TextRun>>;
}

/// Parses raw document bytes into a renderable backend.
#[async_trait::async_trait]
pub trait DocumentProvider: Send + Sync {
    async fn open(&self, name: &str, bytes: Arc<[u8]>) -> Result<Arc<dyn DocumentBackend>>;
}
