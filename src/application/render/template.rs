//! Static inspection of documents that carry their own page header or footer.
//!
//! An element with `id="header"` or `id="footer"` is lifted out of the body
//! and turned into a print template, together with the document's inline
//! styles, since the engine renders templates in a separate context.

use std::{cell::RefCell, rc::Rc};

use lol_html::{RewriteStrSettings, element, html_content::ContentType, rewrite_str, text};
use thiserror::Error;

pub const HEADER_ID: &str = "header";
pub const FOOTER_ID: &str = "footer";

/// Template used for a missing header or footer so the engine's default
/// (title, date, url) is suppressed.
pub const EMPTY_TEMPLATE: &str = "<span></span>";

const HEADER_START: &str = "<!--pressroom:header:start-->";
const HEADER_END: &str = "<!--pressroom:header:end-->";
const FOOTER_START: &str = "<!--pressroom:footer:start-->";
const FOOTER_END: &str = "<!--pressroom:footer:end-->";

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("failed to parse document: {message}")]
    Document { message: String },
}

/// A document split into its body and print templates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateParts {
    /// Document with the marker elements removed.
    pub body: String,
    /// Concatenated text of every inline `<style>` block.
    pub styles: String,
    pub header: Option<String>,
    pub footer: Option<String>,
}

impl TemplateParts {
    pub fn has_templates(&self) -> bool {
        self.header.is_some() || self.footer.is_some()
    }

    /// Header template ready for the engine.
    pub fn header_template(&self, styles: &str) -> String {
        wrap_template(styles, self.header.as_deref())
    }

    /// Footer template ready for the engine.
    pub fn footer_template(&self, styles: &str) -> String {
        wrap_template(styles, self.footer.as_deref())
    }
}

fn wrap_template(styles: &str, markup: Option<&str>) -> String {
    match markup {
        Some(markup) => format!("<style>{styles}</style>{markup}"),
        None => EMPTY_TEMPLATE.to_string(),
    }
}

#[derive(Default)]
struct ScanState {
    styles: String,
    header_seen: bool,
    footer_seen: bool,
}

/// Splits `html` into body, styles and header/footer markup.
///
/// Only the first element carrying each marker id is extracted.
pub fn extract_templates(html: &str) -> Result<TemplateParts, TemplateError> {
    let state = Rc::new(RefCell::new(ScanState::default()));

    let rewritten = rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![
                text!("style", {
                    let state = Rc::clone(&state);
                    move |chunk| {
                        let mut state = state.borrow_mut();
                        state.styles.push_str(chunk.as_str());
                        if chunk.last_in_text_node() && !state.styles.ends_with('\n') {
                            state.styles.push('\n');
                        }
                        Ok(())
                    }
                }),
                element!("#header", {
                    let state = Rc::clone(&state);
                    move |el| {
                        let mut state = state.borrow_mut();
                        if !state.header_seen {
                            state.header_seen = true;
                            el.before(HEADER_START, ContentType::Html);
                            el.after(HEADER_END, ContentType::Html);
                        }
                        Ok(())
                    }
                }),
                element!("#footer", {
                    let state = Rc::clone(&state);
                    move |el| {
                        let mut state = state.borrow_mut();
                        if !state.footer_seen {
                            state.footer_seen = true;
                            el.before(FOOTER_START, ContentType::Html);
                            el.after(FOOTER_END, ContentType::Html);
                        }
                        Ok(())
                    }
                }),
            ],
            ..RewriteStrSettings::default()
        },
    )
    .map_err(|err| TemplateError::Document {
        message: err.to_string(),
    })?;

    let styles = std::mem::take(&mut state.borrow_mut().styles);

    let (body, header) = cut_between(rewritten, HEADER_START, HEADER_END);
    let (body, footer) = cut_between(body, FOOTER_START, FOOTER_END);

    // A marker nested inside the other one leaves its sentinels behind.
    let header = header.map(|markup| strip_sentinels(&markup));
    let footer = footer.map(|markup| strip_sentinels(&markup));
    let body = if header.is_some() || footer.is_some() {
        strip_sentinels(&body)
    } else {
        body
    };

    Ok(TemplateParts {
        body,
        styles: styles.trim_end().to_string(),
        header,
        footer,
    })
}

fn cut_between(document: String, start: &str, end: &str) -> (String, Option<String>) {
    let Some(start_at) = document.find(start) else {
        return (document, None);
    };
    let content_from = start_at + start.len();
    let Some(end_offset) = document[content_from..].find(end) else {
        return (document, None);
    };
    let content_to = content_from + end_offset;

    let markup = document[content_from..content_to].to_string();
    let mut body = String::with_capacity(document.len() - markup.len());
    body.push_str(&document[..start_at]);
    body.push_str(&document[content_to + end.len()..]);
    (body, Some(markup))
}

fn strip_sentinels(markup: &str) -> String {
    [HEADER_START, HEADER_END, FOOTER_START, FOOTER_END]
        .iter()
        .fold(markup.to_string(), |acc, sentinel| acc.replace(sentinel, ""))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOCUMENT: &str = r#"<html><head><style>body { color: red; }</style><style>.h { font-size: 8px; }</style></head><body><div id="header" class="h">Invoice <span class="pageNumber"></span></div><p>Body text</p><footer id="footer">Page footer</footer></body></html>"#;

    #[test]
    fn plain_document_has_no_templates() {
        let html = "<html><body><p>Hello</p></body></html>";
        let parts = extract_templates(html).expect("parsed");

        assert!(!parts.has_templates());
        assert_eq!(parts.body, html);
    }

    #[test]
    fn extracts_header_footer_and_styles() {
        let parts = extract_templates(DOCUMENT).expect("parsed");

        assert_eq!(
            parts.header.as_deref(),
            Some(r#"<div id="header" class="h">Invoice <span class="pageNumber"></span></div>"#)
        );
        assert_eq!(
            parts.footer.as_deref(),
            Some(r#"<footer id="footer">Page footer</footer>"#)
        );
        assert!(parts.styles.contains("body { color: red; }"));
        assert!(parts.styles.contains(".h { font-size: 8px; }"));

        assert!(!parts.body.contains("id=\"header\""));
        assert!(!parts.body.contains("id=\"footer\""));
        assert!(!parts.body.contains("pressroom:"));
        assert!(parts.body.contains("<p>Body text</p>"));
    }

    #[test]
    fn missing_footer_becomes_empty_template() {
        let html = r#"<style>p { margin: 0; }</style><div id="header">Top</div><p>x</p>"#;
        let parts = extract_templates(html).expect("parsed");

        assert_eq!(
            parts.header_template(&parts.styles),
            r#"<style>p { margin: 0; }</style><div id="header">Top</div>"#
        );
        assert_eq!(parts.footer_template(&parts.styles), EMPTY_TEMPLATE);
    }

    #[test]
    fn only_first_marker_is_extracted() {
        let html = r#"<div id="footer">one</div><div id="footer">two</div>"#;
        let parts = extract_templates(html).expect("parsed");

        assert_eq!(parts.footer.as_deref(), Some(r#"<div id="footer">one</div>"#));
        assert_eq!(parts.body, r#"<div id="footer">two</div>"#);
    }
}
