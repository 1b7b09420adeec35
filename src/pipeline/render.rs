//! Rasterisation: PDF bytes → [`Document`] of page images.
//!
//! [`Rasterizer`] is the collaborator boundary; the chat pipeline only needs
//! "bytes in, ordered page images out". [`PdfiumRasterizer`] is the
//! production implementation.
//!
//! pdfium keeps thread-local state and is not async-safe, so all pdfium
//! work runs inside `spawn_blocking`. Pages are PNG-encoded and wrapped as
//! base64 `ImageData` with `detail: "high"` so small print on plan sheets
//! stays legible to the model.

use crate::config::ChatConfig;
use crate::document::Document;
use crate::error::PdfChatError;
use crate::pipeline::input::PdfUpload;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::io::Cursor;
use tracing::{debug, info};

/// Turns an uploaded PDF into an ordered page sequence.
#[async_trait]
pub trait Rasterizer: Send + Sync {
    async fn rasterize(&self, upload: PdfUpload) -> Result<Document, PdfChatError>;
}

/// Rasteriser backed by the pdfium library.
///
/// The library is located through `PDFIUM_LIB_PATH` when set, otherwise the
/// system library search path.
#[derive(Debug, Clone)]
pub struct PdfiumRasterizer {
    dpi: u32,
    max_pixels: u32,
    password: Option<String>,
}

impl PdfiumRasterizer {
    pub fn new(config: &ChatConfig) -> Self {
        Self {
            dpi: config.dpi,
            max_pixels: config.max_rendered_pixels,
            password: config.password.clone(),
        }
    }
}

#[async_trait]
impl Rasterizer for PdfiumRasterizer {
    async fn rasterize(&self, upload: PdfUpload) -> Result<Document, PdfChatError> {
        let dpi = self.dpi;
        let max_pixels = self.max_pixels;
        let password = self.password.clone();

        tokio::task::spawn_blocking(move || {
            rasterize_blocking(&upload, dpi, max_pixels, password.as_deref())
        })
        .await
        .map_err(|e| PdfChatError::Internal(format!("Render task panicked: {}", e)))?
    }
}

fn bind_pdfium() -> Result<Pdfium, PdfChatError> {
    let bindings = match std::env::var("PDFIUM_LIB_PATH") {
        Ok(path) if !path.is_empty() => Pdfium::bind_to_library(&path),
        _ => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| PdfChatError::PdfiumBindingFailed(format!("{:?}", e)))?;
    Ok(Pdfium::new(bindings))
}

fn rasterize_blocking(
    upload: &PdfUpload,
    dpi: u32,
    max_pixels: u32,
    password: Option<&str>,
) -> Result<Document, PdfChatError> {
    let pdfium = bind_pdfium()?;

    let document = pdfium
        .load_pdf_from_byte_slice(&upload.bytes, password)
        .map_err(|e| {
            let err_str = format!("{:?}", e);
            if err_str.to_lowercase().contains("password") {
                if password.is_some() {
                    PdfChatError::WrongPassword {
                        source_name: upload.name.clone(),
                    }
                } else {
                    PdfChatError::PasswordRequired {
                        source_name: upload.name.clone(),
                    }
                }
            } else {
                PdfChatError::CorruptPdf {
                    source_name: upload.name.clone(),
                    detail: err_str,
                }
            }
        })?;

    // Scale from PDF points (72 per inch), capped on both axes.
    let render_config = PdfRenderConfig::new()
        .scale_page_by_factor(dpi as f32 / 72.0)
        .set_maximum_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let pages = document.pages();
    info!("{}: {} pages", upload.name, pages.len());

    let mut images = Vec::with_capacity(pages.len() as usize);
    for (idx, page) in pages.iter().enumerate() {
        let rendered = page
            .render_with_config(&render_config)
            .map_err(|e| PdfChatError::RasterisationFailed {
                page: idx + 1,
                detail: format!("{:?}", e),
            })?
            .as_image();

        debug!(
            "Rendered page {} → {}x{} px",
            idx + 1,
            rendered.width(),
            rendered.height()
        );

        let encoded = encode_png(&rendered).map_err(|e| PdfChatError::RasterisationFailed {
            page: idx + 1,
            detail: format!("Image encoding failed: {}", e),
        })?;
        images.push(encoded);
    }

    Ok(Document::new(upload.name.clone(), images))
}

/// Encode a rendered page as base64 PNG `ImageData`.
pub fn encode_png(img: &DynamicImage) -> Result<ImageData, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    Ok(ImageData::new(STANDARD.encode(&buf), "image/png").with_detail("high"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn encode_png_is_valid_base64() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(8, 4, Rgba([0, 0, 255, 255])));
        let data = encode_png(&img).expect("encode should succeed");
        assert_eq!(data.mime_type, "image/png");
        let decoded = STANDARD.decode(&data.data).expect("valid base64");
        assert!(decoded.starts_with(&[0x89, b'P', b'N', b'G']));
    }

    #[test]
    fn rasterizer_reads_config() {
        let config = ChatConfig::builder()
            .dpi(200)
            .max_rendered_pixels(1200)
            .password("secret")
            .build()
            .unwrap();
        let r = PdfiumRasterizer::new(&config);
        assert_eq!(r.dpi, 200);
        assert_eq!(r.max_pixels, 1200);
        assert_eq!(r.password.as_deref(), Some("secret"));
    }
}
