use scraper::Html;

use crate::epub::STYLESHEET_PATH;
use crate::images::ImageMap;
use crate::sanitize::{element_ids, set_attr, with_element_mut};

/// Rewrites image sources to their archive paths and wraps the document body
/// into a standalone XHTML chapter.
pub fn render_chapter(title: &str, lang: &str, document: &mut Html, images: &ImageMap) -> String {
    for id in element_ids(document, |name| name == "img") {
        with_element_mut(document, id, |element| {
            let archived = element
                .attr("src")
                .and_then(|src| images.get(src))
                .map(|image| image.path.clone());
            if let Some(path) = archived {
                set_attr(element, "src", &path);
            }
            if element.attr("alt").is_none() {
                set_attr(element, "alt", "");
            }
        });
    }

    let body = document.root_element().inner_html();
    let body = ensure_xhtml_void_tags(&body).replace("&nbsp;", "&#160;");
    wrap_xhtml_document(title, lang, &body)
}

/// Page titles become file-system and TOC friendly chapter titles.
pub fn chapter_title(page_title: &str, index: u32) -> String {
    if page_title.trim().is_empty() {
        return format!("Chapter {index}");
    }

    let mut replaced = String::with_capacity(page_title.len());
    let mut in_forbidden_run = false;
    for ch in page_title.chars() {
        if matches!(ch, '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|') {
            if !in_forbidden_run {
                replaced.push('_');
            }
            in_forbidden_run = true;
        } else {
            replaced.push(ch);
            in_forbidden_run = false;
        }
    }

    let cleaned = replaced.split_whitespace().collect::<Vec<_>>().join(" ");
    if cleaned.is_empty() {
        "chapter".to_string()
    } else {
        cleaned
    }
}

pub fn escape_text(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn wrap_xhtml_document(title: &str, lang: &str, body_html: &str) -> String {
    let title = escape_text(title);
    let lang = escape_text(lang);
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    out.push_str("<!DOCTYPE html>\n");
    out.push_str(&format!(
        "<html xmlns=\"http://www.w3.org/1999/xhtml\" lang=\"{lang}\" xml:lang=\"{lang}\">\n"
    ));
    out.push_str("<head>\n");
    out.push_str("  <meta charset=\"utf-8\" />\n");
    out.push_str(&format!("  <title>{title}</title>\n"));
    out.push_str(&format!(
        "  <link rel=\"stylesheet\" type=\"text/css\" href=\"{STYLESHEET_PATH}\" />\n"
    ));
    out.push_str("</head>\n");
    out.push_str("<body>\n");
    out.push_str(&format!("<h1>{title}</h1>\n"));
    out.push_str(body_html);
    if !body_html.ends_with('\n') {
        out.push('\n');
    }
    out.push_str("</body>\n");
    out.push_str("</html>\n");
    out
}

fn ensure_xhtml_void_tags(html: &str) -> String {
    // `<img ...>` becomes `<img ... />` so the chapter stays well-formed XML.
    const VOID_TAGS: &[&str] = &[
        "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
        "source", "track", "wbr",
    ];

    let bytes = html.as_bytes();
    let mut out = String::with_capacity(html.len());
    let mut cursor = 0;

    while let Some(rel_lt) = html[cursor..].find('<') {
        let lt = cursor + rel_lt;
        out.push_str(&html[cursor..lt]);

        let mut in_quote: Option<u8> = None;
        let mut gt = lt + 1;
        while gt < bytes.len() {
            let b = bytes[gt];
            if let Some(q) = in_quote {
                if b == q {
                    in_quote = None;
                }
                gt += 1;
                continue;
            }
            if b == b'"' || b == b'\'' {
                in_quote = Some(b);
                gt += 1;
                continue;
            }
            if b == b'>' {
                break;
            }
            gt += 1;
        }
        if gt >= bytes.len() {
            out.push_str(&html[lt..]);
            return out;
        }

        let raw_tag = &html[lt..=gt];
        if raw_tag
            .as_bytes()
            .get(1)
            .is_some_and(|b| matches!(b, b'!' | b'?' | b'/'))
        {
            out.push_str(raw_tag);
            cursor = gt + 1;
            continue;
        }

        let name_start = lt + 1;
        let mut name_end = name_start;
        while name_end < gt && bytes[name_end].is_ascii_alphabetic() {
            name_end += 1;
        }
        let tag_name = html[name_start..name_end].to_ascii_lowercase();
        if tag_name.is_empty() || !VOID_TAGS.contains(&tag_name.as_str()) {
            push_escaping_quoted_angles(&mut out, raw_tag);
            cursor = gt + 1;
            continue;
        }

        let tag_without_gt = &html[lt..gt];
        if tag_without_gt.trim_end().ends_with('/') {
            push_escaping_quoted_angles(&mut out, raw_tag);
        } else {
            push_escaping_quoted_angles(&mut out, tag_without_gt);
            out.push_str(" />");
        }
        cursor = gt + 1;
    }

    out.push_str(&html[cursor..]);
    out
}

/// The HTML serializer leaves `<` and `>` raw inside attribute values, which
/// XML does not allow.
fn push_escaping_quoted_angles(out: &mut String, tag: &str) {
    let mut in_quote: Option<char> = None;
    for ch in tag.chars() {
        match (in_quote, ch) {
            (Some(q), c) if c == q => {
                in_quote = None;
                out.push(c);
            }
            (Some(_), '<') => out.push_str("&lt;"),
            (Some(_), '>') => out.push_str("&gt;"),
            (None, '"' | '\'') => {
                in_quote = Some(ch);
                out.push(ch);
            }
            _ => out.push(ch),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::images::ImageRef;
    use crate::sanitize::sanitize;

    fn map(entries: &[(&str, &str)]) -> ImageMap {
        entries
            .iter()
            .map(|(url, path)| {
                (
                    url.to_string(),
                    ImageRef {
                        path: path.to_string(),
                        id: "img".to_string(),
                    },
                )
            })
            .collect()
    }

    #[test]
    fn title_is_escaped_in_title_and_heading() {
        let mut doc = Html::parse_fragment("<p>body</p>");
        let out = render_chapter("A & B <C>", "zh", &mut doc, &ImageMap::new());
        assert!(out.contains("<title>A &amp; B &lt;C&gt;</title>"));
        assert!(out.contains("<h1>A &amp; B &lt;C&gt;</h1>"));
        assert!(!out.contains("<C>"));
    }

    #[test]
    fn mapped_images_point_into_the_archive_and_others_stay_remote() {
        let mut doc = sanitize(
            r#"<img src="https://cdn.example/a.png"><img src="https://cdn.example/broken.png" alt="b">"#,
            "https://novel.example/",
        )
        .document;
        let images = map(&[("https://cdn.example/a.png", "images/img_1_1.png")]);
        let out = render_chapter("t", "zh", &mut doc, &images);

        assert!(out.contains(r#"<img src="images/img_1_1.png" alt="" />"#), "{out}");
        assert!(out.contains(r#"<img src="https://cdn.example/broken.png" alt="b" />"#), "{out}");
    }

    #[test]
    fn every_image_gets_an_alt_attribute() {
        let mut doc = Html::parse_fragment(r#"<p><img src="x.png"><img src="y.png" alt="kept"></p>"#);
        render_chapter("t", "zh", &mut doc, &ImageMap::new());
        let alts: Vec<_> = crate::sanitize::elements(&doc)
            .filter(|el| el.value().name() == "img")
            .map(|el| el.value().attr("alt").map(str::to_owned))
            .collect();
        assert_eq!(alts, vec![Some(String::new()), Some("kept".to_string())]);
    }

    #[test]
    fn output_is_a_standalone_xhtml_document() {
        let mut doc = Html::parse_fragment("<p>line<br>next&nbsp;word</p><hr>");
        let out = render_chapter("第1章", "zh-Hant", &mut doc, &ImageMap::new());
        assert!(out.starts_with("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<!DOCTYPE html>\n"));
        assert!(out.contains(r#"xmlns="http://www.w3.org/1999/xhtml" lang="zh-Hant""#));
        assert!(out.contains("<meta charset=\"utf-8\" />"));
        assert!(out.contains("<br />"));
        assert!(out.contains("<hr />"));
        assert!(out.contains("next&#160;word"));
        assert!(out.trim_end().ends_with("</html>"));
    }

    #[test]
    fn void_tag_pass_preserves_utf8_text() {
        let out = ensure_xhtml_void_tags("<p>日本語のテスト</p><img src=\"x.png\">");
        assert!(out.contains("日本語のテスト"));
        assert!(out.contains("<img src=\"x.png\" />"));
    }

    #[test]
    fn angle_brackets_inside_attribute_values_are_escaped() {
        let mut doc = Html::parse_fragment(r#"<p title="1 < 2">x</p><img src="a.png" alt="<3">"#);
        let out = render_chapter("t", "zh", &mut doc, &ImageMap::new());
        assert!(out.contains(r#"<p title="1 &lt; 2">x</p>"#), "{out}");
        assert!(out.contains(r#"<img src="a.png" alt="&lt;3" />"#), "{out}");
    }

    #[test]
    fn quoted_angles_in_non_void_and_self_closed_tags() {
        let out = ensure_xhtml_void_tags(r#"<span data-x='a>b'>t</span><br data-y="<" />"#);
        assert_eq!(out, r#"<span data-x='a&gt;b'>t</span><br data-y="&lt;" />"#);
    }

    #[test]
    fn chapter_title_replaces_forbidden_runs_and_collapses_spaces() {
        assert_eq!(chapter_title("Vol 1:  Ch <2>|x", 3), "Vol 1_ Ch _2_x");
        assert_eq!(chapter_title("  第三章   出發  ", 3), "第三章 出發");
    }

    #[test]
    fn chapter_title_fallbacks() {
        assert_eq!(chapter_title("   ", 4), "Chapter 4");
        assert_eq!(chapter_title("???", 4), "_");
    }
}
