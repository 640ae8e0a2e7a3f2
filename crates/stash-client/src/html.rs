//! Parsing of PEP 503 simple-index pages.
//!
//! The PEP does not specify where in the document the anchors live, so every
//! `<a>` element anywhere in the page is considered.

use crate::Error;

/// The anchors of a simple-index package page.
#[derive(Debug, Clone)]
pub struct SimpleIndexPage {
    pub anchors: Vec<Anchor>,
}

/// A single `<a>` element: the link text names the file, the href points at
/// it (possibly relative), and `data-yanked` marks yanked releases.
#[derive(Debug, Clone)]
pub struct Anchor {
    pub text: String,
    pub href: Option<String>,
    pub yanked: bool,
}

impl SimpleIndexPage {
    /// Parse the anchors out of a simple-index HTML page.
    pub fn parse(text: &str) -> Result<Self, Error> {
        let dom = tl::parse(text, tl::ParserOptions::default())?;
        let parser = dom.parser();

        let anchors = dom
            .nodes()
            .iter()
            .filter_map(|node| node.as_tag())
            .filter(|tag| tag.name().as_bytes() == b"a")
            .map(|tag| {
                let text = html_escape::decode_html_entities(tag.inner_text(parser).trim())
                    .into_owned();
                let href = tag
                    .attributes()
                    .get("href")
                    .flatten()
                    .map(|href| href.as_utf8_str().into_owned());
                // PEP 592: presence of the attribute is what marks the file
                // as yanked; the value, if any, is just a reason.
                let yanked = tag.attributes().get("data-yanked").is_some();
                Anchor { text, href, yanked }
            })
            .collect();

        Ok(Self { anchors })
    }
}
