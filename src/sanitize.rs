//! Makes scraped chapter markup self-contained.
//!
//! Links and resource sources are resolved against the page address, lazily
//! loaded images get a real `src`, inline handlers and `script`/`style`
//! elements are dropped, and the absolute image URLs are collected for
//! download.

use std::collections::HashSet;

use ego_tree::NodeId;
use html5ever::{LocalName, Namespace, QualName};
use scraper::node::Element;
use scraper::{ElementRef, Html, Node};
use url::Url;

/// Attributes checked, in order, for an image that has no `src`.
pub const LAZY_SRC_ATTRS: &[&str] = &["data-src", "data-original", "data-lazy", "data-url"];

#[derive(Debug)]
pub struct SanitizedContent {
    pub document: Html,
    /// Absolute http(s) image sources in document order, without duplicates.
    pub image_urls: Vec<String>,
}

pub fn sanitize(raw_html: &str, base_url: &str) -> SanitizedContent {
    let mut document = Html::parse_fragment(raw_html);
    let base = match Url::parse(base_url) {
        Ok(base) => Some(base),
        Err(err) => {
            tracing::debug!(base_url, ?err, "base url does not parse; links stay relative");
            None
        }
    };

    let doomed = element_ids(&document, |name| name == "script" || name == "style");
    for id in doomed {
        if let Some(mut node) = document.tree.get_mut(id) {
            node.detach();
        }
    }

    for id in element_ids(&document, |name| matches!(name, "a" | "img" | "source")) {
        with_element_mut(&mut document, id, |element| {
            let attr = if element.name() == "a" { "href" } else { "src" };
            // An empty placeholder would join to the page address itself.
            if let Some(value) = element.attr(attr)
                && !value.trim().is_empty()
            {
                let resolved = resolve(base.as_ref(), value);
                set_attr(element, attr, &resolved);
            }
        });
    }

    for id in element_ids(&document, |name| name == "img") {
        with_element_mut(&mut document, id, |element| {
            promote_lazy_src(element, base.as_ref());
            element
                .attrs
                .retain(|name, _| !name.local.to_ascii_lowercase().starts_with("on"));
        });
    }

    let image_urls = collect_image_urls(&document);
    SanitizedContent {
        document,
        image_urls,
    }
}

fn promote_lazy_src(element: &mut Element, base: Option<&Url>) {
    if element.attr("src").is_some_and(|src| !src.trim().is_empty()) {
        return;
    }
    let lazy = LAZY_SRC_ATTRS
        .iter()
        .filter_map(|attr| element.attr(attr))
        .find(|value| !value.trim().is_empty())
        .map(|value| resolve(base, value));
    if let Some(src) = lazy {
        set_attr(element, "src", &src);
    }
}

fn collect_image_urls(document: &Html) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut urls = Vec::new();
    for element in elements(document).filter(|el| el.value().name() == "img") {
        let Some(src) = element.value().attr("src") else {
            continue;
        };
        if !(src.starts_with("http://") || src.starts_with("https://")) {
            continue;
        }
        if seen.insert(src) {
            urls.push(src.to_owned());
        }
    }
    urls
}

fn resolve(base: Option<&Url>, value: &str) -> String {
    match base.map(|base| base.join(value)) {
        Some(Ok(url)) => url.to_string(),
        _ => value.to_owned(),
    }
}

pub(crate) fn elements(document: &Html) -> impl Iterator<Item = ElementRef<'_>> {
    document.root_element().descendants().filter_map(ElementRef::wrap)
}

pub(crate) fn element_ids(document: &Html, mut by_name: impl FnMut(&str) -> bool) -> Vec<NodeId> {
    elements(document)
        .filter(|el| by_name(el.value().name()))
        .map(|el| el.id())
        .collect()
}

pub(crate) fn with_element_mut(document: &mut Html, id: NodeId, f: impl FnOnce(&mut Element)) {
    if let Some(mut node) = document.tree.get_mut(id)
        && let Node::Element(element) = node.value()
    {
        f(element);
    }
}

pub(crate) fn set_attr(element: &mut Element, name: &str, value: &str) {
    let name = QualName::new(None, Namespace::from(""), LocalName::from(name));
    element.attrs.insert(name, value.into());
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://novel.example/chapter/12?titleId=3";

    fn attrs_of(doc: &Html, tag: &str, attr: &str) -> Vec<Option<String>> {
        elements(doc)
            .filter(|el| el.value().name() == tag)
            .map(|el| el.value().attr(attr).map(str::to_owned))
            .collect()
    }

    #[test]
    fn relative_links_and_sources_become_absolute() {
        let html = r#"<p><a href="../13">next</a><img src="/img/a.png">
            <picture><source src="b.webp"></picture></p>"#;
        let out = sanitize(html, BASE);

        assert_eq!(
            attrs_of(&out.document, "a", "href"),
            vec![Some("https://novel.example/13".to_string())]
        );
        assert_eq!(
            attrs_of(&out.document, "img", "src"),
            vec![Some("https://novel.example/img/a.png".to_string())]
        );
        assert_eq!(
            attrs_of(&out.document, "source", "src"),
            vec![Some("https://novel.example/chapter/b.webp".to_string())]
        );
    }

    #[test]
    fn absolute_links_are_left_alone() {
        let html = r#"<a href="https://other.example/x">x</a>"#;
        let out = sanitize(html, BASE);
        assert_eq!(
            attrs_of(&out.document, "a", "href"),
            vec![Some("https://other.example/x".to_string())]
        );
    }

    #[test]
    fn lazy_image_source_is_promoted_first_non_empty_wins() {
        let html = r#"<img data-src="" data-original="/big/1.jpg" data-url="/other.jpg">
            <img src="" data-lazy="2.png">"#;
        let out = sanitize(html, BASE);
        assert_eq!(
            attrs_of(&out.document, "img", "src"),
            vec![
                Some("https://novel.example/big/1.jpg".to_string()),
                Some("https://novel.example/chapter/2.png".to_string()),
            ]
        );
    }

    #[test]
    fn empty_src_placeholder_is_not_collected_as_the_page_itself() {
        let html = r#"<img src="" data-src="/real.png"><img src="  "><a href="">top</a>"#;
        let out = sanitize(html, "https://novel.example/chapter/12");
        assert_eq!(out.image_urls, vec!["https://novel.example/real.png"]);
        assert_eq!(
            attrs_of(&out.document, "img", "src"),
            vec![Some("https://novel.example/real.png".to_string()), Some("  ".to_string())]
        );
        assert_eq!(attrs_of(&out.document, "a", "href"), vec![Some(String::new())]);
    }

    #[test]
    fn existing_src_is_not_replaced_by_lazy_attribute() {
        let html = r#"<img src="/real.png" data-src="/lazy.png">"#;
        let out = sanitize(html, BASE);
        assert_eq!(out.image_urls, vec!["https://novel.example/real.png"]);
    }

    #[test]
    fn image_event_handlers_are_removed() {
        let html = r#"<img src="/a.png" onload="steal()" ONERROR="x()" title="keep">"#;
        let out = sanitize(html, BASE);
        let img = elements(&out.document)
            .find(|el| el.value().name() == "img")
            .expect("img survives");
        assert!(img.value().attr("onload").is_none());
        assert!(img.value().attr("onerror").is_none());
        assert_eq!(img.value().attr("title"), Some("keep"));
    }

    #[test]
    fn scripts_and_styles_are_removed_with_contents() {
        let html = "<p>before</p><script>alert(1)</script><style>p{color:red}</style><p>after</p>";
        let out = sanitize(html, BASE);
        assert!(elements(&out.document).all(|el| !matches!(el.value().name(), "script" | "style")));
        let inner = out.document.root_element().inner_html();
        assert!(!inner.contains("alert(1)"));
        assert!(!inner.contains("color:red"));
        assert!(inner.contains("before") && inner.contains("after"));
    }

    #[test]
    fn image_urls_are_deduplicated_in_first_seen_order() {
        let html = r#"<img src="https://cdn.example/a.png"><img src="https://cdn.example/b.png">
            <img src="https://cdn.example/a.png"><img src="https://cdn.example/c.png">"#;
        let out = sanitize(html, BASE);
        assert_eq!(
            out.image_urls,
            vec![
                "https://cdn.example/a.png",
                "https://cdn.example/b.png",
                "https://cdn.example/c.png",
            ]
        );
    }

    #[test]
    fn non_http_sources_are_not_collected() {
        let html = r#"<img src="data:image/png;base64,AAAA"><img src="/x.gif">"#;
        let out = sanitize(html, BASE);
        assert_eq!(out.image_urls, vec!["https://novel.example/x.gif"]);
    }

    #[test]
    fn unparsable_base_keeps_relative_values() {
        let out = sanitize(r#"<img src="a.png">"#, "not a url");
        assert_eq!(attrs_of(&out.document, "img", "src"), vec![Some("a.png".to_string())]);
        assert!(out.image_urls.is_empty());
    }

    #[test]
    fn malformed_markup_does_not_fail() {
        let out = sanitize("<p><b>unclosed <img src='/a.png'", BASE);
        assert!(out.document.root_element().inner_html().contains("unclosed"));
    }
}
