//! Ingested documents: an ordered, immutable sequence of page images.

use edgequake_llm::ImageData;
use std::ops::Range;

/// One rasterised page. The image payload is opaque to the chat pipeline;
/// it is only forwarded to the model.
#[derive(Debug, Clone)]
pub struct Page {
    /// 0-based position in the source document.
    pub index: usize,
    pub image: ImageData,
}

/// A rasterised document.
///
/// Page order is the rasterizer's output order and is authoritative: page
/// `i` of the document is always `pages()[i]`. The page list cannot be
/// changed after construction.
#[derive(Debug, Clone)]
pub struct Document {
    name: String,
    pages: Vec<Page>,
}

impl Document {
    /// Build a document from page images in reading order.
    pub fn new(name: impl Into<String>, images: Vec<ImageData>) -> Self {
        let pages = images
            .into_iter()
            .enumerate()
            .map(|(index, image)| Page { index, image })
            .collect();
        Self {
            name: name.into(),
            pages,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Split the pages into consecutive request groups of at most `size`
    /// pages, each tagged with the 0-based page range it covers.
    pub fn batches(&self, size: usize) -> impl Iterator<Item = (Range<usize>, &[Page])> {
        let size = size.max(1);
        self.pages.chunks(size).enumerate().map(move |(i, chunk)| {
            let start = i * size;
            (start..start + chunk.len(), chunk)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(tag: &str) -> ImageData {
        ImageData::new(tag.to_string(), "image/png")
    }

    #[test]
    fn pages_are_indexed_in_order() {
        let doc = Document::new("plan.pdf", vec![image("a"), image("b"), image("c")]);
        assert_eq!(doc.name(), "plan.pdf");
        assert_eq!(doc.page_count(), 3);
        let indices: Vec<usize> = doc.pages().iter().map(|p| p.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(doc.pages()[1].image.data, "b");
    }

    #[test]
    fn batches_cover_every_page_once() {
        let doc = Document::new("plan.pdf", (0..7).map(|i| image(&i.to_string())).collect());
        let ranges: Vec<Range<usize>> = doc.batches(3).map(|(r, _)| r).collect();
        assert_eq!(ranges, vec![0..3, 3..6, 6..7]);

        let singles = doc.batches(1).count();
        assert_eq!(singles, 7);
    }

    #[test]
    fn empty_document_has_no_batches() {
        let doc = Document::new("empty.pdf", Vec::new());
        assert!(doc.is_empty());
        assert_eq!(doc.batches(13).count(), 0);
    }
}
