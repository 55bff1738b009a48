use std::fs::{self, OpenOptions};
use std::io::Write as _;
use std::path::Path;

use anyhow::Context as _;
use chrono::Utc;
use zip::write::SimpleFileOptions;

use crate::config::BookConfig;

/// Stylesheet location inside `OEBPS/`, linked from every document.
pub const STYLESHEET_PATH: &str = "style/book.css";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookMetadata {
    pub identifier: String,
    pub title: String,
    pub language: String,
    pub author: String,
}

impl BookMetadata {
    pub fn from_config(book: &BookConfig) -> Self {
        let identifier = book
            .identifier
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| format!("urn:uuid:{}", uuid::Uuid::new_v4()));
        Self {
            identifier,
            title: book.title.clone(),
            language: book.language.clone(),
            author: book.author.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chapter {
    pub index: u32,
    pub title: String,
    /// Fully rendered XHTML document.
    pub xhtml: String,
}

impl Chapter {
    pub fn id(&self) -> String {
        format!("chap_{:04}", self.index)
    }

    pub fn file_name(&self) -> String {
        format!("{}.xhtml", self.id())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageResource {
    pub id: String,
    /// Path relative to `OEBPS/`, e.g. `images/img_1_1.png`.
    pub path: String,
    pub media_type: &'static str,
    pub data: Vec<u8>,
}

/// The in-progress book: chapters in spine order plus every embedded image.
#[derive(Debug)]
pub struct EpubBook {
    metadata: BookMetadata,
    chapters: Vec<Chapter>,
    images: Vec<ImageResource>,
}

impl EpubBook {
    pub fn new(metadata: BookMetadata) -> Self {
        Self {
            metadata,
            chapters: Vec::new(),
            images: Vec::new(),
        }
    }

    pub fn metadata(&self) -> &BookMetadata {
        &self.metadata
    }

    pub fn chapters(&self) -> &[Chapter] {
        &self.chapters
    }

    pub fn images(&self) -> &[ImageResource] {
        &self.images
    }

    pub fn add_chapter(&mut self, chapter: Chapter) {
        self.chapters.push(chapter);
    }

    pub fn add_image(&mut self, image: ImageResource) {
        self.images.push(image);
    }

    pub fn write_to(&self, out_path: &Path, force: bool) -> anyhow::Result<()> {
        if out_path.exists() && !force {
            anyhow::bail!("epub output already exists: {}", out_path.display());
        }
        if let Some(parent) = out_path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("create epub parent dir: {}", parent.display()))?;
        }

        let modified = Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
        let container_xml = render_container_xml();
        let content_opf = render_content_opf(&self.metadata, &modified, &self.chapters, &self.images);
        let nav_xhtml = render_nav_xhtml(&self.metadata, &self.chapters);
        let toc_ncx = render_toc_ncx(&self.metadata, &self.chapters);

        let mut out_options = OpenOptions::new();
        out_options.write(true);
        if force {
            out_options.create(true).truncate(true);
        } else {
            out_options.create_new(true);
        }
        let out_file = out_options
            .open(out_path)
            .with_context(|| format!("open epub output: {}", out_path.display()))?;

        let mut zip = zip::ZipWriter::new(out_file);

        // `mimetype` must be the first entry and must be stored uncompressed.
        let mimetype_options = SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored)
            .unix_permissions(0o644);
        zip.start_file("mimetype", mimetype_options)
            .context("epub start_file mimetype")?;
        zip.write_all(b"application/epub+zip")
            .context("epub write mimetype")?;

        let deflated_options = SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated)
            .unix_permissions(0o644);

        let documents = [
            ("META-INF/container.xml", container_xml.as_str()),
            ("OEBPS/content.opf", content_opf.as_str()),
            ("OEBPS/nav.xhtml", nav_xhtml.as_str()),
            ("OEBPS/toc.ncx", toc_ncx.as_str()),
            ("OEBPS/style/book.css", BOOK_CSS),
        ];
        for (name, contents) in documents {
            zip.start_file(name, deflated_options)
                .with_context(|| format!("epub start_file {name}"))?;
            zip.write_all(contents.as_bytes())
                .with_context(|| format!("epub write {name}"))?;
        }

        for chapter in &self.chapters {
            let name = format!("OEBPS/{}", chapter.file_name());
            zip.start_file(name.as_str(), deflated_options)
                .with_context(|| format!("epub start_file chapter: {name}"))?;
            zip.write_all(chapter.xhtml.as_bytes())
                .with_context(|| format!("epub write chapter: {name}"))?;
        }

        // Image formats are already compressed.
        let image_options = SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored)
            .unix_permissions(0o644);
        for image in &self.images {
            let name = format!("OEBPS/{}", image.path);
            zip.start_file(name.as_str(), image_options)
                .with_context(|| format!("epub start_file image: {name}"))?;
            zip.write_all(&image.data)
                .with_context(|| format!("epub write image: {name}"))?;
        }

        zip.finish().context("epub finish zip")?;
        Ok(())
    }
}

const BOOK_CSS: &str = r#"@charset "utf-8";

body { font-family: serif; line-height: 1.6; }
img { max-width: 100%; height: auto; }
h1 { font-size: 1.4em; margin: 0.6em 0; }
"#;

fn render_container_xml() -> String {
    r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>
"#
    .to_string()
}

fn render_nav_xhtml(metadata: &BookMetadata, chapters: &[Chapter]) -> String {
    let lang = xml_escape(&metadata.language);
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    out.push_str("<!DOCTYPE html>\n");
    out.push_str(&format!(
        "<html xmlns=\"http://www.w3.org/1999/xhtml\" xmlns:epub=\"http://www.idpf.org/2007/ops\" lang=\"{lang}\" xml:lang=\"{lang}\">\n"
    ));
    out.push_str("<head>\n");
    out.push_str(&format!("  <title>{}</title>\n", xml_escape(&metadata.title)));
    out.push_str("  <meta charset=\"utf-8\" />\n");
    out.push_str(&format!(
        "  <link rel=\"stylesheet\" type=\"text/css\" href=\"{STYLESHEET_PATH}\" />\n"
    ));
    out.push_str("</head>\n");
    out.push_str("<body>\n");
    out.push_str(&format!("  <h1>{}</h1>\n", xml_escape(&metadata.title)));
    out.push_str("  <nav epub:type=\"toc\" id=\"toc\">\n");
    out.push_str("    <ol>\n");
    for ch in chapters {
        out.push_str(&format!(
            "      <li><a href=\"{}\">{}</a></li>\n",
            xml_escape(&ch.file_name()),
            xml_escape(&ch.title)
        ));
    }
    out.push_str("    </ol>\n");
    out.push_str("  </nav>\n");
    out.push_str("</body>\n");
    out.push_str("</html>\n");
    out
}

fn render_toc_ncx(metadata: &BookMetadata, chapters: &[Chapter]) -> String {
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    out.push_str(
        "<!DOCTYPE ncx PUBLIC \"-//NISO//DTD ncx 2005-1//EN\" \"http://www.daisy.org/z3986/2005/ncx-2005-1.dtd\">\n",
    );
    out.push_str("<ncx xmlns=\"http://www.daisy.org/z3986/2005/ncx/\" version=\"2005-1\">\n");
    out.push_str("  <head>\n");
    out.push_str(&format!(
        "    <meta name=\"dtb:uid\" content=\"{}\" />\n",
        xml_escape(&metadata.identifier)
    ));
    out.push_str("    <meta name=\"dtb:depth\" content=\"1\" />\n");
    out.push_str("    <meta name=\"dtb:totalPageCount\" content=\"0\" />\n");
    out.push_str("    <meta name=\"dtb:maxPageNumber\" content=\"0\" />\n");
    out.push_str("  </head>\n");
    out.push_str("  <docTitle><text>");
    out.push_str(&xml_escape(&metadata.title));
    out.push_str("</text></docTitle>\n");
    out.push_str("  <docAuthor><text>");
    out.push_str(&xml_escape(&metadata.author));
    out.push_str("</text></docAuthor>\n");
    out.push_str("  <navMap>\n");
    for (idx, ch) in chapters.iter().enumerate() {
        let play = idx + 1;
        out.push_str(&format!(
            "    <navPoint id=\"navPoint-{play}\" playOrder=\"{play}\">\n"
        ));
        out.push_str("      <navLabel><text>");
        out.push_str(&xml_escape(&ch.title));
        out.push_str("</text></navLabel>\n");
        out.push_str(&format!(
            "      <content src=\"{}\" />\n",
            xml_escape(&ch.file_name())
        ));
        out.push_str("    </navPoint>\n");
    }
    out.push_str("  </navMap>\n");
    out.push_str("</ncx>\n");
    out
}

fn render_content_opf(
    metadata: &BookMetadata,
    modified: &str,
    chapters: &[Chapter],
    images: &[ImageResource],
) -> String {
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    out.push_str(&format!(
        "<package xmlns=\"http://www.idpf.org/2007/opf\" unique-identifier=\"bookid\" version=\"3.0\" xml:lang=\"{}\">\n",
        xml_escape(&metadata.language)
    ));
    out.push_str("  <metadata xmlns:dc=\"http://purl.org/dc/elements/1.1/\">\n");
    out.push_str(&format!(
        "    <dc:identifier id=\"bookid\">{}</dc:identifier>\n",
        xml_escape(&metadata.identifier)
    ));
    out.push_str(&format!(
        "    <dc:title>{}</dc:title>\n",
        xml_escape(&metadata.title)
    ));
    out.push_str(&format!(
        "    <dc:language>{}</dc:language>\n",
        xml_escape(&metadata.language)
    ));
    out.push_str(&format!(
        "    <dc:creator>{}</dc:creator>\n",
        xml_escape(&metadata.author)
    ));
    out.push_str(&format!(
        "    <meta property=\"dcterms:modified\">{}</meta>\n",
        xml_escape(modified)
    ));
    out.push_str("  </metadata>\n");
    out.push_str("  <manifest>\n");
    out.push_str(
        "    <item id=\"nav\" href=\"nav.xhtml\" media-type=\"application/xhtml+xml\" properties=\"nav\" />\n",
    );
    out.push_str(
        "    <item id=\"ncx\" href=\"toc.ncx\" media-type=\"application/x-dtbncx+xml\" />\n",
    );
    out.push_str(&format!(
        "    <item id=\"css\" href=\"{STYLESHEET_PATH}\" media-type=\"text/css\" />\n"
    ));

    for ch in chapters {
        out.push_str(&format!(
            "    <item id=\"{}\" href=\"{}\" media-type=\"application/xhtml+xml\" />\n",
            xml_escape(&ch.id()),
            xml_escape(&ch.file_name())
        ));
    }

    for image in images {
        out.push_str(&format!(
            "    <item id=\"{}\" href=\"{}\" media-type=\"{}\" />\n",
            xml_escape(&image.id),
            xml_escape(&image.path),
            xml_escape(image.media_type)
        ));
    }

    out.push_str("  </manifest>\n");
    out.push_str("  <spine toc=\"ncx\">\n");
    out.push_str("    <itemref idref=\"nav\" />\n");
    for ch in chapters {
        out.push_str(&format!(
            "    <itemref idref=\"{}\" />\n",
            xml_escape(&ch.id())
        ));
    }
    out.push_str("  </spine>\n");
    out.push_str("</package>\n");
    out
}

fn xml_escape(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
