//! Rendering backends

use super::document::ReportDocument;
use super::RenderError;
use pulldown_cmark::{html, Event, Options, Parser};

/// Turns a composed document into artifact bytes.
pub trait ReportBackend: Send + Sync {
    /// Short name used in logs and errors.
    fn name(&self) -> &str;

    /// File extension of the produced artifact, without the dot.
    fn extension(&self) -> &str;

    fn render(&self, document: &ReportDocument) -> Result<Vec<u8>, RenderError>;
}

const STYLESHEET: &str = "\
body { font-family: Arial, sans-serif; line-height: 1.5; margin: 1.5cm; font-size: 10pt; }
h1 { color: #2c3e50; font-size: 18pt; border-bottom: 1px solid #eee; padding-bottom: 8px; }
h2 { color: #34495e; font-size: 14pt; margin-top: 20px; border-bottom: 1px solid #eee; padding-bottom: 5px; }
blockquote { border-left: 3px solid #c0392b; margin-left: 0; padding-left: 10px; color: #555; }
table { border-collapse: collapse; width: 100%; margin: 15px 0; font-size: 9pt; }
th, td { border: 1px solid #ddd; padding: 6px; text-align: left; }
th { background-color: #f2f2f2; font-weight: bold; }
tr:nth-child(even) { background-color: #f9f9f9; }
";

/// Standalone HTML page with an embedded stylesheet.
#[derive(Debug, Clone, Default)]
pub struct HtmlRenderer;

impl HtmlRenderer {
    pub fn new() -> Self {
        Self
    }
}

impl ReportBackend for HtmlRenderer {
    fn name(&self) -> &str {
        "html"
    }

    fn extension(&self) -> &str {
        "html"
    }

    fn render(&self, document: &ReportDocument) -> Result<Vec<u8>, RenderError> {
        let markdown = document.to_markdown();
        let mut options = Options::empty();
        options.insert(Options::ENABLE_TABLES);
        // finding text comes from the capability; raw HTML in it is shown, never interpreted
        let parser = Parser::new_ext(&markdown, options).map(|event| match event {
            Event::Html(raw) | Event::InlineHtml(raw) => Event::Text(raw),
            other => other,
        });

        let mut body = String::with_capacity(markdown.len() * 2);
        html::push_html(&mut body, parser);

        let page = format!(
            "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n<title>{}</title>\n<style>\n{}</style>\n</head>\n<body>\n{}</body>\n</html>\n",
            escape_html(&document.title()),
            STYLESHEET,
            body
        );
        Ok(page.into_bytes())
    }
}

/// Plain Markdown; the fallback when the primary backend fails.
#[derive(Debug, Clone, Default)]
pub struct MarkdownRenderer;

impl MarkdownRenderer {
    pub fn new() -> Self {
        Self
    }
}

impl ReportBackend for MarkdownRenderer {
    fn name(&self) -> &str {
        "markdown"
    }

    fn extension(&self) -> &str {
        "md"
    }

    fn render(&self, document: &ReportDocument) -> Result<Vec<u8>, RenderError> {
        Ok(document.to_markdown().into_bytes())
    }
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}
