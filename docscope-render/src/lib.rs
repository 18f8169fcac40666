mod analyzer;
#[cfg(feature = "pdf")]
mod pdfium;

pub use analyzer::HttpAnalysisService;
#[cfg(feature = "pdf")]
pub use pdfium::{PdfiumProvider, PDFIUM_LIBRARY_ENV};
