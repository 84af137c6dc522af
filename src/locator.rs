//! Optical text location.
//!
//! When neither a structural selector nor coordinates identify a click
//! target, the resolver falls back to reading the screenshot and looking for
//! the target text on screen. [`TextLocator`] is the seam; the production
//! implementation runs a screenshot through an [`OcrBackend`].

use std::sync::Arc;

use async_trait::async_trait;
use image::ImageFormat;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::driver::BrowserDriver;
use crate::errors::{PilotError, PilotResult};

/// Viewport coordinates, CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: i64,
    pub y: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpanBounds {
    pub left: i64,
    pub top: i64,
    pub width: i64,
    pub height: i64,
}

impl SpanBounds {
    pub fn center(&self) -> Point {
        Point {
            x: self.left + self.width / 2,
            y: self.top + self.height / 2,
        }
    }
}

/// One recognized word with its confidence (0-100) and bounding box.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OcrSpan {
    pub text: String,
    pub confidence: i64,
    pub bounds: SpanBounds,
}

/// Turns raw screenshot bytes into recognized word spans. Synchronous;
/// the loop is strictly sequential, so recognition runs inline.
pub trait OcrBackend: Send + Sync {
    fn recognize(&self, image_png: &[u8]) -> PilotResult<Vec<OcrSpan>>;
}

#[async_trait]
pub trait TextLocator: Send + Sync {
    /// Find on-screen text matching `target` and return a point inside it.
    /// `Ok(None)` means nothing on screen matched above the threshold.
    async fn locate(&self, target: &str, confidence_threshold: i64) -> PilotResult<Option<Point>>;
}

/// Screenshot-driven locator. Grayscales the capture before recognition;
/// color carries no signal for text and slows the backend down.
pub struct OcrTextLocator<B> {
    driver: Arc<dyn BrowserDriver>,
    backend: B,
}

impl<B: OcrBackend> OcrTextLocator<B> {
    pub fn new(driver: Arc<dyn BrowserDriver>, backend: B) -> Self {
        Self { driver, backend }
    }
}

#[async_trait]
impl<B: OcrBackend + 'static> TextLocator for OcrTextLocator<B> {
    async fn locate(&self, target: &str, confidence_threshold: i64) -> PilotResult<Option<Point>> {
        let screenshot = self.driver.screenshot().await?;

        let gray = image::load_from_memory(&screenshot)
            .map_err(|err| PilotError::Vision(format!("screenshot decode failed: {err}")))?
            .to_luma8();
        let mut png = Vec::new();
        image::DynamicImage::ImageLuma8(gray)
            .write_to(&mut std::io::Cursor::new(&mut png), ImageFormat::Png)
            .map_err(|err| PilotError::Vision(format!("screenshot re-encode failed: {err}")))?;

        let spans = self.backend.recognize(&png)?;
        debug!(spans = spans.len(), target, "ocr pass finished");
        Ok(first_match(&spans, target, confidence_threshold))
    }
}

/// Scan spans in recognition order and return the center of the first one
/// whose text contains `target` (case-insensitive) with confidence strictly
/// above the threshold.
///
/// First match, not best match: a page with the target text in several
/// places resolves to whichever the backend reported first. Known
/// limitation, kept for predictability.
pub fn first_match(spans: &[OcrSpan], target: &str, confidence_threshold: i64) -> Option<Point> {
    let needle = target.to_lowercase();
    spans
        .iter()
        .find(|span| {
            span.confidence > confidence_threshold
                && span.text.to_lowercase().contains(&needle)
        })
        .map(|span| span.bounds.center())
}

/// Locator used when the crate is built without the `ocr` feature. Every
/// lookup misses, which pushes resolution to the descriptive-selector tier.
pub struct DisabledOcr;

#[async_trait]
impl TextLocator for DisabledOcr {
    async fn locate(&self, _target: &str, _confidence_threshold: i64) -> PilotResult<Option<Point>> {
        Ok(None)
    }
}

#[cfg(feature = "ocr")]
pub use tesseract_backend::TesseractBackend;

#[cfg(feature = "ocr")]
mod tesseract_backend {
    use tesseract::Tesseract;

    use super::{OcrBackend, OcrSpan, SpanBounds};
    use crate::errors::{PilotError, PilotResult};

    /// Tesseract-backed recognition. A fresh engine per call keeps the
    /// backend `Sync` without sharing the non-thread-safe handle.
    pub struct TesseractBackend {
        language: String,
    }

    impl TesseractBackend {
        pub fn new(language: impl Into<String>) -> Self {
            Self {
                language: language.into(),
            }
        }
    }

    impl OcrBackend for TesseractBackend {
        fn recognize(&self, image_png: &[u8]) -> PilotResult<Vec<OcrSpan>> {
            let tsv = Tesseract::new(None, Some(&self.language))
                .map_err(|err| PilotError::Vision(format!("tesseract init failed: {err}")))?
                .set_image_from_mem(image_png)
                .map_err(|err| PilotError::Vision(format!("tesseract image load failed: {err}")))?
                .get_tsv_text(0)
                .map_err(|err| PilotError::Vision(format!("tesseract recognition failed: {err}")))?;
            Ok(parse_tsv(&tsv))
        }
    }

    /// Word rows in Tesseract TSV output are level 5 with twelve columns:
    /// level, page, block, par, line, word, left, top, width, height, conf,
    /// text.
    fn parse_tsv(tsv: &str) -> Vec<OcrSpan> {
        let mut spans = Vec::new();
        for line in tsv.lines() {
            let cols: Vec<&str> = line.split('\t').collect();
            if cols.len() < 12 || cols[0] != "5" {
                continue;
            }
            let text = cols[11].trim();
            if text.is_empty() {
                continue;
            }
            let parse = |s: &str| s.trim().parse::<f64>().ok().map(|v| v as i64);
            let (Some(left), Some(top), Some(width), Some(height), Some(confidence)) = (
                parse(cols[6]),
                parse(cols[7]),
                parse(cols[8]),
                parse(cols[9]),
                parse(cols[10]),
            ) else {
                continue;
            };
            spans.push(OcrSpan {
                text: text.to_string(),
                confidence,
                bounds: SpanBounds {
                    left,
                    top,
                    width,
                    height,
                },
            });
        }
        spans
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(text: &str, confidence: i64, left: i64, top: i64, width: i64, height: i64) -> OcrSpan {
        OcrSpan {
            text: text.to_string(),
            confidence,
            bounds: SpanBounds {
                left,
                top,
                width,
                height,
            },
        }
    }

    #[test]
    fn first_match_returns_span_center() {
        let spans = vec![
            span("Menu", 90, 0, 0, 40, 20),
            span("Add to cart", 75, 100, 200, 50, 20),
        ];
        assert_eq!(
            first_match(&spans, "add to cart", 60),
            Some(Point { x: 125, y: 210 })
        );
    }

    #[test]
    fn threshold_is_strictly_greater() {
        let spans = vec![span("Checkout", 60, 10, 10, 80, 20)];
        assert_eq!(first_match(&spans, "Checkout", 60), None);

        let spans = vec![span("Checkout", 61, 10, 10, 80, 20)];
        assert!(first_match(&spans, "Checkout", 60).is_some());
    }

    #[test]
    fn match_is_case_insensitive_substring() {
        let spans = vec![span("SUBMIT ORDER", 80, 0, 0, 120, 30)];
        assert_eq!(
            first_match(&spans, "submit", 60),
            Some(Point { x: 60, y: 15 })
        );
        assert_eq!(first_match(&spans, "cancel", 60), None);
    }

    #[test]
    fn earlier_span_wins_over_higher_confidence() {
        let spans = vec![
            span("Buy now", 65, 0, 0, 60, 20),
            span("Buy now", 99, 300, 400, 60, 20),
        ];
        assert_eq!(first_match(&spans, "Buy now", 60), Some(Point { x: 30, y: 10 }));
    }

    #[tokio::test]
    async fn disabled_ocr_never_matches() {
        let located = DisabledOcr.locate("anything", 0).await.unwrap();
        assert!(located.is_none());
    }
}
