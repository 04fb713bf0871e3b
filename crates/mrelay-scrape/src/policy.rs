//! Which markup marks a sub-resource, per supported source.

use mrelay_core::fetch::{ExtractedPage, ExtractionPolicy, FetchError};
use scraper::{Html, Selector};
use url::Url;

/// Default selector for chapter page images on WordPress manga themes.
pub const CHAPTER_IMAGE_SELECTOR: &str = "img.wp-manga-chapter-img";

fn selector(css: &str) -> Result<Selector, FetchError> {
    Selector::parse(css).map_err(|e| FetchError::parse_failure(format!("selector {css:?}: {e:?}")))
}

fn base_url(page_url: &str) -> Result<Url, FetchError> {
    Url::parse(page_url).map_err(|e| FetchError::parse_failure(format!("page url {page_url:?}: {e}")))
}

/// Resolve an attribute value against the page. Inline `data:` images and
/// anything that is not http(s) after resolution are skipped.
fn resolve(base: &Url, raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() || raw.starts_with("data:") {
        return None;
    }
    let url = base.join(raw).ok()?;
    matches!(url.scheme(), "http" | "https").then(|| url.to_string())
}

fn page_title(doc: &Html) -> Option<String> {
    let sel = Selector::parse("title").ok()?;
    doc.select(&sel)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Chapter pages: the ordered page images, nothing else.
#[derive(Clone, Debug)]
pub struct ChapterImagesPolicy {
    pub image_selector: String,
}

impl Default for ChapterImagesPolicy {
    fn default() -> Self {
        Self {
            image_selector: CHAPTER_IMAGE_SELECTOR.to_string(),
        }
    }
}

impl ExtractionPolicy for ChapterImagesPolicy {
    fn name(&self) -> &str {
        "chapter-images"
    }

    fn extract(&self, page_url: &str, html: &str) -> Result<ExtractedPage, FetchError> {
        let base = base_url(page_url)?;
        let images = selector(&self.image_selector)?;
        let doc = Html::parse_document(html);

        // Lazy-loading themes keep the real address in data-src.
        let locators = doc
            .select(&images)
            .filter_map(|img| {
                let el = img.value();
                el.attr("data-src")
                    .filter(|s| !s.trim().is_empty())
                    .or_else(|| el.attr("src"))
            })
            .filter_map(|raw| resolve(&base, raw))
            .collect();

        Ok(ExtractedPage {
            title: page_title(&doc),
            body: None,
            locators,
        })
    }
}

/// Whole-page snapshots: cleaned markup plus every image on the page.
#[derive(Clone, Copy, Debug, Default)]
pub struct WebPagePolicy;

impl ExtractionPolicy for WebPagePolicy {
    fn name(&self) -> &str {
        "web-page"
    }

    fn extract(&self, page_url: &str, html: &str) -> Result<ExtractedPage, FetchError> {
        let base = base_url(page_url)?;
        let mut doc = Html::parse_document(html);

        let images = selector("img[src]")?;
        let mut locators: Vec<String> = Vec::new();
        for raw in doc.select(&images).filter_map(|img| img.value().attr("src")) {
            if let Some(url) = resolve(&base, raw) {
                if !locators.contains(&url) {
                    locators.push(url);
                }
            }
        }

        let noise = selector("script, style, noscript")?;
        let ids: Vec<_> = doc.select(&noise).map(|el| el.id()).collect();
        for id in ids {
            if let Some(mut node) = doc.tree.get_mut(id) {
                node.detach();
            }
        }

        Ok(ExtractedPage {
            title: page_title(&doc),
            body: Some(doc.html()),
            locators,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHAPTER: &str = r#"
        <html><head><title>One Piece - Chapter 1090</title></head><body>
          <div class="reading-content">
            <img class="wp-manga-chapter-img" src="
                https://cdn.example/one-piece/1090/01.jpg ">
            <img class="wp-manga-chapter-img" src="/uploads/02.jpg">
            <img class="wp-manga-chapter-img lazy" src="data:image/gif;base64,R0lG" data-src="03.jpg">
            <img class="site-logo" src="/logo.png">
          </div>
        </body></html>"#;

    #[test]
    fn chapter_images_in_order_resolved_against_page() {
        let page = ChapterImagesPolicy::default()
            .extract("https://lekmanga.net/manga/one-piece/1090/", CHAPTER)
            .unwrap();
        assert_eq!(
            page.locators,
            vec![
                "https://cdn.example/one-piece/1090/01.jpg",
                "https://lekmanga.net/uploads/02.jpg",
                "https://lekmanga.net/manga/one-piece/1090/03.jpg",
            ]
        );
        assert_eq!(page.title.as_deref(), Some("One Piece - Chapter 1090"));
        assert!(page.body.is_none());
    }

    #[test]
    fn chapter_without_images_yields_no_locators() {
        let page = ChapterImagesPolicy::default()
            .extract("https://lekmanga.net/manga/x/1/", "<html><body><p>gone</p></body></html>")
            .unwrap();
        assert!(page.locators.is_empty());
    }

    #[test]
    fn bad_page_url_or_selector_is_parse_failure() {
        let err = ChapterImagesPolicy::default().extract("not a url", CHAPTER).unwrap_err();
        assert_eq!(err.kind, mrelay_core::fetch::FetchErrorKind::ParseFailure);

        let broken = ChapterImagesPolicy {
            image_selector: "img[".to_string(),
        };
        let err = broken.extract("https://lekmanga.net/", CHAPTER).unwrap_err();
        assert_eq!(err.kind, mrelay_core::fetch::FetchErrorKind::ParseFailure);
    }

    #[test]
    fn web_page_strips_scripts_and_collects_images() {
        let html = r#"<html><head><title>Article</title>
            <style>body { color: red }</style>
            <script>alert("x")</script></head>
            <body><h1>Hello</h1>
              <img src="/a.png"><img src="/a.png"><img src="https://img.example/b.jpg">
              <script src="/tracker.js"></script>
            </body></html>"#;

        let page = WebPagePolicy.extract("https://example.com/post", html).unwrap();
        let body = page.body.unwrap();
        assert!(body.contains("<h1>Hello</h1>"));
        assert!(!body.contains("alert"));
        assert!(!body.contains("color: red"));
        assert!(!body.contains("tracker.js"));
        assert_eq!(page.title.as_deref(), Some("Article"));
        assert_eq!(
            page.locators,
            vec!["https://example.com/a.png", "https://img.example/b.jpg"]
        );
    }
}
