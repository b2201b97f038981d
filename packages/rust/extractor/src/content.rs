//! Readable-text extraction from HTML.
//!
//! Chrome (scripts, navigation, banners, footers) is detached from the parsed
//! tree first. The main content is then the first candidate selector whose
//! text is long enough, falling back to the whole body.

use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};

use pagebrief_shared::{ExtractorConfig, PageBriefError, Result};

use crate::ExtractedPage;

static CHROME: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(
        r#"script, style, nav, footer, header, aside, iframe, noscript, svg,
           [role="navigation"], [role="banner"], [role="contentinfo"]"#,
    )
    .expect("valid chrome selector")
});

/// Main-content candidates, highest priority first.
static MAIN_CANDIDATES: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    ["article", "main", r#"[role="main"]"#, ".content", "#content"]
        .into_iter()
        .map(|s| Selector::parse(s).expect("valid main-content selector"))
        .collect()
});

static BODY: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("body").expect("valid body selector"));
static TITLE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("title").expect("valid title selector"));
static OG_TITLE: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(r#"meta[property="og:title"]"#).expect("valid og:title selector")
});
static H1: LazyLock<Selector> = LazyLock::new(|| Selector::parse("h1").expect("valid h1 selector"));

/// Extract title and readable text from an HTML document.
pub fn extract_from_html(html: &str, config: &ExtractorConfig) -> Result<ExtractedPage> {
    let mut doc = Html::parse_document(html);
    strip_chrome(&mut doc);

    let title = resolve_title(&doc);
    let text = main_text(&doc, config.min_main_content_chars);

    if text.is_empty() {
        return Err(PageBriefError::EmptyContent);
    }

    Ok(ExtractedPage {
        title,
        text: truncate_chars(text, config.max_content_chars),
    })
}

/// Extract from a `text/plain` body. Plain text has no title.
pub fn extract_from_text(body: &str, config: &ExtractorConfig) -> Result<ExtractedPage> {
    let text = collapse_whitespace(body);
    if text.is_empty() {
        return Err(PageBriefError::EmptyContent);
    }

    Ok(ExtractedPage {
        title: String::new(),
        text: truncate_chars(text, config.max_content_chars),
    })
}

/// Detach every non-content element from the tree.
fn strip_chrome(doc: &mut Html) {
    let ids: Vec<_> = doc.select(&CHROME).map(|el| el.id()).collect();
    for id in ids {
        if let Some(mut node) = doc.tree.get_mut(id) {
            node.detach();
        }
    }
}

/// `<title>` → `og:title` → first `<h1>` → empty.
fn resolve_title(doc: &Html) -> String {
    first_text(doc, &TITLE)
        .or_else(|| {
            doc.select(&OG_TITLE)
                .next()
                .and_then(|el| el.value().attr("content"))
                .map(collapse_whitespace)
                .filter(|t| !t.is_empty())
        })
        .or_else(|| first_text(doc, &H1))
        .unwrap_or_default()
}

fn first_text(doc: &Html, selector: &Selector) -> Option<String> {
    doc.select(selector)
        .next()
        .map(|el| collapse_whitespace(&element_text(el)))
        .filter(|t| !t.is_empty())
}

fn main_text(doc: &Html, min_chars: usize) -> String {
    for selector in MAIN_CANDIDATES.iter() {
        let raw: String = doc.select(selector).map(element_text).collect();
        let text = collapse_whitespace(&raw);
        if text.chars().count() > min_chars {
            return text;
        }
    }

    let body: String = doc.select(&BODY).map(element_text).collect();
    collapse_whitespace(&body)
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect()
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Truncate to at most `max` characters (not bytes).
fn truncate_chars(text: String, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((byte_idx, _)) => text[..byte_idx].trim_end().to_string(),
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filler(words: usize) -> String {
        vec!["lorem ipsum dolor"; words].join(" ")
    }

    fn config() -> ExtractorConfig {
        ExtractorConfig::default()
    }

    #[test]
    fn falls_back_to_body_when_no_main_candidate() {
        let html = format!(
            "<html><head><title>Example</title></head>\
             <body><div><p>{}</p></div></body></html>",
            filler(20)
        );
        let page = extract_from_html(&html, &config()).unwrap();
        assert_eq!(page.title, "Example");
        assert!(page.text.starts_with("lorem ipsum dolor"));
        assert!(page.text.chars().count() > 200);
    }

    #[test]
    fn prefers_article_over_body() {
        let html = format!(
            "<html><body><p>Sidebar blurb</p><article><p>{}</p></article></body></html>",
            filler(20)
        );
        let page = extract_from_html(&html, &config()).unwrap();
        assert!(!page.text.contains("Sidebar blurb"));
    }

    #[test]
    fn short_article_is_skipped_for_longer_main() {
        let html = format!(
            "<html><body><article>Too short</article><main>{}</main></body></html>",
            filler(20)
        );
        let page = extract_from_html(&html, &config()).unwrap();
        assert!(!page.text.contains("Too short"));
        assert!(page.text.starts_with("lorem"));
    }

    #[test]
    fn short_candidates_fall_back_to_body() {
        let html = "<html><body><main>Tiny main</main>\n<p>And a tail</p></body></html>";
        let page = extract_from_html(html, &config()).unwrap();
        assert_eq!(page.text, "Tiny main And a tail");
    }

    #[test]
    fn strips_chrome_elements() {
        let html = format!(
            r#"<html><body>
                <header>Site header</header>
                <nav>Home | About</nav>
                <div role="banner">Cookie banner</div>
                <script>var analytics = 1;</script>
                <style>p {{ color: red; }}</style>
                <p>{}</p>
                <aside>Related links</aside>
                <footer>Copyright</footer>
            </body></html>"#,
            filler(5)
        );
        let page = extract_from_html(&html, &config()).unwrap();
        for chrome in [
            "Site header",
            "Home | About",
            "Cookie banner",
            "analytics",
            "color: red",
            "Related links",
            "Copyright",
        ] {
            assert!(!page.text.contains(chrome), "leaked: {chrome}");
        }
        assert!(page.text.contains("lorem ipsum"));
    }

    #[test]
    fn title_resolution_order() {
        let og = r#"<html><head><meta property="og:title" content=" From OG "></head>
                    <body><h1>Heading</h1><p>text</p></body></html>"#;
        assert_eq!(extract_from_html(og, &config()).unwrap().title, "From OG");

        let h1 = "<html><body><h1> Heading  One </h1><p>text</p></body></html>";
        assert_eq!(extract_from_html(h1, &config()).unwrap().title, "Heading One");

        let none = "<html><body><p>text</p></body></html>";
        assert_eq!(extract_from_html(none, &config()).unwrap().title, "");
    }

    #[test]
    fn heading_inside_header_is_not_a_title() {
        let html = "<html><body><header><h1>Brand</h1></header><p>text</p></body></html>";
        assert_eq!(extract_from_html(html, &config()).unwrap().title, "");
    }

    #[test]
    fn collapses_whitespace() {
        let html = "<html><body><p>  one\n\n  two\t three  </p></body></html>";
        assert_eq!(extract_from_html(html, &config()).unwrap().text, "one two three");
    }

    #[test]
    fn truncates_to_max_chars() {
        let html = format!("<html><body><p>{}</p></body></html>", "é".repeat(50));
        let cfg = ExtractorConfig {
            max_content_chars: 10,
            ..config()
        };
        let page = extract_from_html(&html, &cfg).unwrap();
        assert_eq!(page.text.chars().count(), 10);
    }

    #[test]
    fn default_bound_is_ten_thousand_chars() {
        let html = format!("<html><body><p>{}</p></body></html>", "a".repeat(25_000));
        let page = extract_from_html(&html, &config()).unwrap();
        assert_eq!(page.text.chars().count(), 10_000);
    }

    #[test]
    fn empty_after_cleanup_is_empty_content() {
        let html = "<html><head><title>Only chrome</title></head>\
                    <body><nav>menu</nav><script>x()</script>   </body></html>";
        let err = extract_from_html(html, &config()).unwrap_err();
        assert!(matches!(err, PageBriefError::EmptyContent));
    }

    #[test]
    fn plain_text_is_collapsed_and_untitled() {
        let page = extract_from_text("first line\n\nsecond   line", &config()).unwrap();
        assert_eq!(page.title, "");
        assert_eq!(page.text, "first line second line");

        assert!(matches!(
            extract_from_text(" \n\t ", &config()),
            Err(PageBriefError::EmptyContent)
        ));
    }
}
