use pulldown_cmark::{
    Event as MdEvent, LinkType, Options, Parser as MdParser, Tag as MdTag, TagEnd as MdTagEnd,
};
use std::ops::Range;

pub use pulldown_cmark;

pub fn vera_md_options() -> Options {
    let mut md_options = Options::empty();
    // Explicit rather than Options::all() so link detection stays reproducible across
    // pulldown-cmark releases.
    md_options.insert(Options::ENABLE_DEFINITION_LIST);
    md_options.insert(Options::ENABLE_FOOTNOTES);
    md_options.insert(Options::ENABLE_GFM);
    md_options.insert(Options::ENABLE_MATH);
    md_options.insert(Options::ENABLE_STRIKETHROUGH);
    md_options.insert(Options::ENABLE_TABLES);
    md_options.insert(Options::ENABLE_TASKLISTS);
    md_options
}

/// A markdown link found in content, with its byte range in the scanned text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineLink {
    pub dest: String,
    pub label: String,
    pub range: Range<usize>,
}

#[derive(Debug, Clone)]
struct LinkAccumulator {
    dest: String,
    range: Range<usize>,
    label: String,
}

impl LinkAccumulator {
    fn push_text(&mut self, text: &str) {
        let text = text
            .split('\n')
            .map(|line| line.trim())
            .collect::<Vec<&str>>()
            .join(" ");
        if !self.label.is_empty() && !self.label.ends_with(' ') && !text.starts_with(' ') {
            self.label.push(' ');
        }
        self.label += &text;
    }
}

fn is_resolved_link(link_type: &LinkType) -> bool {
    matches!(
        link_type,
        // `[foo](bar)`, plus reference-style links whose definition exists in the text.
        LinkType::Inline | LinkType::Reference | LinkType::Collapsed | LinkType::Shortcut
    )
}

/// Collect every resolved markdown link in `text`. Links inside code spans and fenced code are
/// not links to pulldown-cmark and are therefore skipped.
#[tracing::instrument(skip_all)]
pub fn inline_links(text: &str) -> Vec<InlineLink> {
    let mut links = vec![];
    let mut collector: Option<LinkAccumulator> = None;
    for (event, range) in MdParser::new_ext(text, vera_md_options()).into_offset_iter() {
        match event {
            MdEvent::Start(MdTag::Link {
                link_type,
                dest_url,
                ..
            }) if is_resolved_link(&link_type) => {
                collector = Some(LinkAccumulator {
                    dest: dest_url.to_string(),
                    range,
                    label: String::new(),
                });
            }
            MdEvent::End(MdTagEnd::Link) => {
                if let Some(link) = collector.take() {
                    links.push(InlineLink {
                        dest: link.dest,
                        label: link.label.trim().to_string(),
                        range: link.range,
                    });
                }
            }
            MdEvent::Text(text) | MdEvent::Code(text) => {
                if let Some(link) = collector.as_mut() {
                    link.push_text(&text);
                }
            }
            _ => {}
        }
    }
    links
}

/// Split a link destination into `(document path, identifier)` when it addresses an entity:
/// `#id` or `path#id`. External URLs and fragment-less links are not entity references.
pub fn split_reference_target(dest: &str) -> Option<(Option<String>, String)> {
    let dest = dest.trim();
    if dest.contains("://") || dest.starts_with("mailto:") {
        return None;
    }
    let (path, id) = dest.split_once('#')?;
    if id.is_empty() {
        return None;
    }
    let path = path.strip_prefix("./").unwrap_or(path);
    let path = match path.is_empty() {
        true => None,
        false => Some(path.to_string()),
    };
    Some((path, id.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inline_links_with_ranges() {
        let text = "As shown in [Theorem 1](#thm-main), see [Entropy](definitions.md#term-entropy).";
        let links = inline_links(text);
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].dest, "#thm-main");
        assert_eq!(links[0].label, "Theorem 1");
        assert_eq!(&text[links[0].range.clone()], "[Theorem 1](#thm-main)");
        assert_eq!(links[1].dest, "definitions.md#term-entropy");
    }

    #[test]
    fn test_code_spans_are_not_links() {
        let text = "Write `[x](#not-a-ref)` literally.\n\n```\n[y](#also-not)\n```\n";
        assert!(inline_links(text).is_empty());
    }

    #[test]
    fn test_reference_style_link_resolves_definition() {
        let text = "See [the lemma][lem].\n\n[lem]: #lemma-2\n";
        let links = inline_links(text);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].dest, "#lemma-2");
        assert_eq!(links[0].label, "the lemma");
    }

    #[test]
    fn test_split_reference_target() {
        assert_eq!(
            split_reference_target("#thm-main"),
            Some((None, "thm-main".to_string()))
        );
        assert_eq!(
            split_reference_target("./defs.md#term"),
            Some((Some("defs.md".to_string()), "term".to_string()))
        );
        assert_eq!(split_reference_target("https://example.org/#frag"), None);
        assert_eq!(split_reference_target("notes.md"), None);
        assert_eq!(split_reference_target("notes.md#"), None);
    }
}
