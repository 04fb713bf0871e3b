//! Paginated documents: images normalized to RGB JPEG, one per PDF page.

use std::io::Cursor;

use image::{codecs::jpeg::JpegEncoder, DynamicImage};

pub const DEFAULT_JPEG_QUALITY: u8 = 90;

/// Upper bound on the fixed bytes of a document (header, catalog, page tree,
/// xref header, trailer).
pub const DOC_OVERHEAD: usize = 1024;
/// Upper bound on the bytes one page adds besides its image data (page,
/// image and content objects, page-tree kid, xref rows).
pub const PAGE_OVERHEAD: usize = 1024;

/// One normalized page image.
#[derive(Clone, Debug)]
pub struct Page {
    pub jpeg: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Page {
    pub fn cost(&self) -> usize {
        self.jpeg.len() + PAGE_OVERHEAD
    }
}

/// Decode any supported image and re-encode it as 8-bit RGB JPEG.
pub fn normalize_page(bytes: &[u8], quality: u8) -> Result<Page, image::ImageError> {
    let rgb = image::load_from_memory(bytes)?.to_rgb8();
    let (width, height) = rgb.dimensions();

    let mut out = Cursor::new(Vec::new());
    let encoder = JpegEncoder::new_with_quality(&mut out, quality);
    DynamicImage::ImageRgb8(rgb).write_with_encoder(encoder)?;

    Ok(Page {
        jpeg: out.into_inner(),
        width,
        height,
    })
}

/// How pages are grouped into documents under a size ceiling.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DocumentPlan {
    /// Page indices per document, ascending, every kept page exactly once.
    pub documents: Vec<Vec<usize>>,
    /// Pages that exceed the ceiling on their own.
    pub oversized: Vec<usize>,
}

/// Greedily fill documents in page order, starting a new one whenever the
/// next page would push the current one past `limit`.
///
/// `page_costs` are per-page byte costs including [`PAGE_OVERHEAD`].
pub fn plan_documents(page_costs: &[usize], limit: usize) -> DocumentPlan {
    let mut plan = DocumentPlan::default();
    let mut current: Vec<usize> = Vec::new();
    let mut current_size = DOC_OVERHEAD;

    for (idx, &cost) in page_costs.iter().enumerate() {
        if DOC_OVERHEAD + cost > limit {
            plan.oversized.push(idx);
            continue;
        }
        if current_size + cost > limit {
            plan.documents.push(std::mem::take(&mut current));
            current_size = DOC_OVERHEAD;
        }
        current.push(idx);
        current_size += cost;
    }
    if !current.is_empty() {
        plan.documents.push(current);
    }
    plan
}

/// Minimal PDF 1.4 writer: every page is one full-bleed DCT image.
pub fn write_pdf(pages: &[&Page]) -> Vec<u8> {
    let mut w = PdfWriter::new(2 + 3 * pages.len());

    w.raw(b"%PDF-1.4\n%\xE2\xE3\xCF\xD3\n");
    w.object(1, "<< /Type /Catalog /Pages 2 0 R >>");

    let kids = (0..pages.len())
        .map(|i| format!("{} 0 R", page_obj(i)))
        .collect::<Vec<_>>()
        .join(" ");
    w.object(
        2,
        &format!("<< /Type /Pages /Kids [{kids}] /Count {} >>", pages.len()),
    );

    for (i, page) in pages.iter().enumerate() {
        let (p, img, content) = (page_obj(i), page_obj(i) + 1, page_obj(i) + 2);
        w.object(
            p,
            &format!(
                "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {w} {h}] \
                 /Resources << /XObject << /Im0 {img} 0 R >> >> /Contents {content} 0 R >>",
                w = page.width,
                h = page.height,
            ),
        );
        w.stream(
            img,
            &format!(
                "/Type /XObject /Subtype /Image /Width {} /Height {} /ColorSpace /DeviceRGB \
                 /BitsPerComponent 8 /Filter /DCTDecode",
                page.width, page.height
            ),
            &page.jpeg,
        );
        let draw = format!("q {} 0 0 {} 0 0 cm /Im0 Do Q", page.width, page.height);
        w.stream(content, "", draw.as_bytes());
    }

    w.finish()
}

fn page_obj(i: usize) -> usize {
    3 + 3 * i
}

struct PdfWriter {
    buf: Vec<u8>,
    offsets: Vec<usize>,
}

impl PdfWriter {
    fn new(objects: usize) -> Self {
        Self {
            buf: Vec::new(),
            offsets: vec![0; objects + 1],
        }
    }

    fn raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    fn begin(&mut self, num: usize) {
        self.offsets[num] = self.buf.len();
        self.raw(format!("{num} 0 obj\n").as_bytes());
    }

    fn object(&mut self, num: usize, dict: &str) {
        self.begin(num);
        self.raw(dict.as_bytes());
        self.raw(b"\nendobj\n");
    }

    fn stream(&mut self, num: usize, dict_entries: &str, data: &[u8]) {
        self.begin(num);
        let sep = if dict_entries.is_empty() { "" } else { " " };
        self.raw(format!("<< {dict_entries}{sep}/Length {} >>\nstream\n", data.len()).as_bytes());
        self.raw(data);
        self.raw(b"\nendstream\nendobj\n");
    }

    fn finish(mut self) -> Vec<u8> {
        let xref_at = self.buf.len();
        let count = self.offsets.len();
        let mut xref = format!("xref\n0 {count}\n0000000000 65535 f \n");
        for off in &self.offsets[1..] {
            xref.push_str(&format!("{off:010} 00000 n \n"));
        }
        xref.push_str(&format!(
            "trailer\n<< /Size {count} /Root 1 0 R >>\nstartxref\n{xref_at}\n%%EOF\n"
        ));
        self.raw(xref.as_bytes());
        self.buf
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    /// A small RGBA PNG; exercises the color normalization path.
    pub(crate) fn png(width: u32, height: u32, shade: u8) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, Rgba([shade, 255 - shade, 40, 200]));
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(img)
            .write_to(&mut out, image::ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    fn flatten(plan: &DocumentPlan) -> Vec<usize> {
        plan.documents.iter().flatten().copied().collect()
    }

    #[test]
    fn normalizes_rgba_to_rgb_jpeg() {
        let page = normalize_page(&png(8, 4, 10), DEFAULT_JPEG_QUALITY).unwrap();
        assert_eq!((page.width, page.height), (8, 4));
        assert_eq!(&page.jpeg[..2], &[0xFF, 0xD8]);
        assert!(normalize_page(b"not an image", DEFAULT_JPEG_QUALITY).is_err());
    }

    #[test]
    fn plan_at_just_under_and_over_the_ceiling() {
        let costs = vec![5000, 5000, 5000];
        let exact = DOC_OVERHEAD + 15000;

        let at = plan_documents(&costs, exact);
        assert_eq!(at.documents, vec![vec![0, 1, 2]]);

        let under = plan_documents(&costs, exact + 1);
        assert_eq!(under.documents, vec![vec![0, 1, 2]]);

        let over = plan_documents(&costs, exact - 1);
        assert_eq!(over.documents, vec![vec![0, 1], vec![2]]);
        assert!(over.oversized.is_empty());
    }

    #[test]
    fn plan_preserves_order_and_count_for_many_documents() {
        let costs: Vec<usize> = (0..50).map(|i| 1000 + (i * 37) % 900).collect();
        for limit in [DOC_OVERHEAD + 1900, DOC_OVERHEAD + 4000, DOC_OVERHEAD + 20_000] {
            let plan = plan_documents(&costs, limit);
            assert_eq!(flatten(&plan), (0..50).collect::<Vec<_>>(), "limit {limit}");
            for doc in &plan.documents {
                assert!(!doc.is_empty());
                let size: usize = DOC_OVERHEAD + doc.iter().map(|&i| costs[i]).sum::<usize>();
                assert!(size <= limit);
            }
        }
    }

    #[test]
    fn single_oversized_page_is_dropped_not_fatal() {
        let limit = DOC_OVERHEAD + 3000;
        let plan = plan_documents(&[1000, 3001, 1000], limit);
        assert_eq!(plan.oversized, vec![1]);
        assert_eq!(plan.documents, vec![vec![0, 2]]);

        let fits = plan_documents(&[3000], limit);
        assert_eq!(fits.documents, vec![vec![0]]);
    }

    #[test]
    fn written_pdf_is_within_estimate_and_well_formed() {
        let pages: Vec<Page> = (0..3)
            .map(|i| normalize_page(&png(20 + i, 30, i as u8 * 60), 80).unwrap())
            .collect();
        let refs: Vec<&Page> = pages.iter().collect();
        let pdf = write_pdf(&refs);

        let estimate = DOC_OVERHEAD + pages.iter().map(Page::cost).sum::<usize>();
        assert!(pdf.len() <= estimate);
        assert!(pdf.starts_with(b"%PDF-1.4"));
        assert!(pdf.ends_with(b"%%EOF\n"));

        let text = String::from_utf8_lossy(&pdf);
        assert!(text.contains("/Count 3"));
        assert_eq!(text.matches("/Type /Page ").count(), 3);

        // startxref points at the xref table.
        let tail = text.rsplit("startxref\n").next().unwrap();
        let offset: usize = tail.lines().next().unwrap().parse().unwrap();
        assert!(pdf[offset..].starts_with(b"xref\n"));
    }
}
