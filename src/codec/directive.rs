//! Line-oriented directive scanner.
//!
//! Turns document text into a tree of [`RawNode`]s without any knowledge of entity semantics.
//! Nesting is tracked with an explicit stack of open frames rather than recursion, so the depth
//! bound is enforced as a plain comparison and pathological input cannot exhaust the call stack.
//!
//! ```text
//! :::theorem_block{#thm-fund variant="theorem"}   <- opener: pushes a frame
//! ::statement                                     <- labeled sub-block of the top frame
//! Every integer > 1 is prime or product of primes.
//! :::proof_block                                  <- nested opener: pushes another frame
//! By induction on n.
//! :::                                             <- closer: pops proof_block
//! :::                                             <- closer: pops theorem_block
//! ```

use once_cell::sync::Lazy;
use regex::Regex;

use crate::{
    codec::{
        attributes::{parse_attributes, RawAttribute},
        diagnostic::{Diagnostic, DiagnosticKind, DiagnosticSink},
        frontmatter::{scan_frontmatter, FrontmatterScan, RawFrontmatter},
        md::{inline_links, split_reference_target},
    },
    properties::{content_hash, LabeledSection, LineIndex, Reference, ReferenceOrigin, Span},
};

/// Default bound on directive nesting.
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Label used for rich provenance sub-blocks (`::_provenance` or a bare `#_provenance` line).
pub const PROVENANCE_LABEL: &str = "_provenance";

static OPENER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^:::([A-Za-z_][A-Za-z0-9_-]*)(.*)$").expect("opener pattern is valid")
});

static SECTION_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^::(_?[A-Za-z][A-Za-z0-9_-]*)$").expect("section marker pattern is valid")
});

/// A directive block as scanned, before any schema is applied.
#[derive(Debug, Clone, PartialEq)]
pub struct RawNode {
    /// Position in [`RawDocument::nodes`]; equals declaration order.
    pub index: usize,
    pub kind: String,
    /// The `#id` shorthand.
    pub id: Option<String>,
    pub attributes: Vec<RawAttribute>,
    pub parent: Option<usize>,
    pub depth: usize,
    pub children: Vec<usize>,
    pub sections: Vec<LabeledSection>,
    /// Content lines not belonging to a nested directive or a labeled section.
    pub text: String,
    /// Opener line through closer line (or end of input when unclosed).
    pub span: Span,
    /// The opener line only.
    pub header: Span,
    /// Byte offset of the first content line.
    pub body_start: usize,
    /// Byte offset where content ends (start of the closer line).
    pub body_end: usize,
    pub closed: bool,
}

impl RawNode {
    fn contains_body_offset(&self, offset: usize) -> bool {
        self.body_start <= offset && offset < self.body_end
    }
}

/// Output of [`DirectiveParser::parse`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawDocument {
    pub frontmatter: Option<RawFrontmatter>,
    pub nodes: Vec<RawNode>,
    pub roots: Vec<usize>,
    /// Pending references; `source` is the innermost enclosing node index.
    pub references: Vec<Reference>,
    /// Hex SHA-256 of the scanned text.
    pub content_hash: String,
}

#[derive(Debug)]
struct OpenSection {
    label: String,
    start: usize,
    text: String,
    last_end: usize,
}

#[derive(Debug)]
enum Frame {
    Node {
        index: usize,
        text: String,
        section: Option<OpenSection>,
    },
    /// Opened beyond the depth bound; only counted so closers still balance.
    Overflow,
}

/// Append a line to a text buffer, dropping leading blank lines.
fn push_line(buffer: &mut String, line: &str) {
    if buffer.is_empty() && line.trim().is_empty() {
        return;
    }
    buffer.push_str(line);
}

fn finish_text(buffer: &str) -> String {
    buffer.trim_end().to_string()
}

/// Replace everything but newlines with spaces, preserving byte length.
fn blank_out(out: &mut String, text: &str) {
    for ch in text.chars() {
        match ch {
            '\n' => out.push('\n'),
            ch => out.extend(std::iter::repeat_n(' ', ch.len_utf8())),
        }
    }
}

/// An open code fence: the fence character and the length of its opening run.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Fence {
    marker: char,
    len: usize,
}

impl Fence {
    /// Recognize an opening fence of three or more backticks or tildes. A backtick fence's
    /// info string may not itself contain a backtick.
    fn open(trimmed: &str) -> Option<Fence> {
        let marker = trimmed.chars().next().filter(|c| *c == '`' || *c == '~')?;
        let len = trimmed.chars().take_while(|c| *c == marker).count();
        if len < 3 {
            return None;
        }
        let info = &trimmed[len..];
        if marker == '`' && info.contains('`') {
            return None;
        }
        Some(Fence { marker, len })
    }

    /// A closing fence is a run of the same character at least as long as the opener, with
    /// nothing after it.
    fn closes(&self, trimmed: &str) -> bool {
        let len = trimmed.chars().take_while(|c| *c == self.marker).count();
        len >= self.len && trimmed[len..].is_empty()
    }
}

/// Stateless apart from its depth bound; one instance can parse any number of documents.
#[derive(Debug, Clone)]
pub struct DirectiveParser {
    max_depth: usize,
}

impl Default for DirectiveParser {
    fn default() -> Self {
        DirectiveParser::new(DEFAULT_MAX_DEPTH)
    }
}

struct ScanState {
    lines: LineIndex,
    nodes: Vec<RawNode>,
    roots: Vec<usize>,
    stack: Vec<Frame>,
}

impl ScanState {
    /// Index of the innermost non-overflow frame.
    fn top_node(&mut self) -> Option<&mut Frame> {
        self.stack
            .iter_mut()
            .rev()
            .find(|frame| matches!(frame, Frame::Node { .. }))
    }

    fn close_section(&mut self, frame_index: usize) {
        if let Some(Frame::Node { index, section, .. }) = self.stack.get_mut(frame_index) {
            if let Some(open) = section.take() {
                let span = self.lines.span(open.start, open.last_end.max(open.start));
                self.nodes[*index].sections.push(LabeledSection {
                    label: open.label,
                    text: finish_text(&open.text),
                    span,
                });
            }
        }
    }

    fn close_top_section(&mut self) {
        if let Some(position) = self
            .stack
            .iter()
            .rposition(|frame| matches!(frame, Frame::Node { .. }))
        {
            self.close_section(position);
        }
    }

    fn push_content(&mut self, line: &str, line_end: usize) {
        if let Some(Frame::Node { text, section, .. }) = self.top_node() {
            match section {
                Some(open) => {
                    push_line(&mut open.text, line);
                    if !line.trim().is_empty() {
                        open.last_end = line_end;
                    }
                }
                None => push_line(text, line),
            }
        }
    }

    /// Pop the top frame and finalize its node. `end` is the byte offset after the closer
    /// line, `body_end` where content stopped.
    fn pop_frame(&mut self, body_end: usize, end: usize, closed: bool) {
        let position = self.stack.len() - 1;
        self.close_section(position);
        if let Some(Frame::Node { index, text, .. }) = self.stack.pop() {
            let node = &mut self.nodes[index];
            node.text = finish_text(&text);
            node.body_end = body_end;
            node.span = self.lines.span(node.header.start, end);
            node.closed = closed;
        }
    }
}

impl DirectiveParser {
    pub fn new(max_depth: usize) -> Self {
        DirectiveParser {
            max_depth: max_depth.max(1),
        }
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Scan `text` into a [`RawDocument`], reporting syntax problems to `sink`. Never fails:
    /// unbalanced input still yields a structurally complete tree.
    #[tracing::instrument(skip_all, fields(document = sink.document_id()))]
    pub fn parse(&self, text: &str, sink: &mut DiagnosticSink) -> RawDocument {
        let lines = LineIndex::new(text);
        let (frontmatter, body_start) = match scan_frontmatter(text, &lines) {
            FrontmatterScan::Found(raw) => {
                let start = raw.body_start;
                (Some(raw), start)
            }
            FrontmatterScan::Unterminated(span) => {
                sink.report(
                    DiagnosticKind::MalformedFrontmatter,
                    span,
                    "frontmatter opened with `---` is never closed",
                );
                (None, 0)
            }
            FrontmatterScan::Absent => (None, 0),
        };

        let mut state = ScanState {
            lines,
            nodes: vec![],
            roots: vec![],
            stack: vec![],
        };
        // Same byte layout as `text`, with structural lines blanked out so the markdown pass
        // only sees content and reports offsets valid in the original.
        let mut masked = String::with_capacity(text.len());
        blank_out(&mut masked, &text[..body_start]);
        let mut fence: Option<Fence> = None;
        let mut offset = body_start;

        for line in text[body_start..].split_inclusive('\n') {
            let line_start = offset;
            let line_end = offset + line.len();
            offset = line_end;
            let trimmed = line.trim();

            if let Some(open) = fence {
                if open.closes(trimmed) {
                    fence = None;
                }
                state.push_content(line, line_end);
                masked.push_str(line);
                continue;
            }
            if let Some(open) = Fence::open(trimmed) {
                fence = Some(open);
                state.push_content(line, line_end);
                masked.push_str(line);
                continue;
            }

            let structural = if trimmed == ":::" {
                self.close(&mut state, sink, line_start, line_end);
                true
            } else if trimmed.starts_with(":::") {
                self.open(&mut state, sink, trimmed, line_start, line_end)
            } else if let Some(label) = section_label(trimmed) {
                self.open_section(&mut state, label, line_start, line_end)
            } else {
                false
            };

            if structural {
                blank_out(&mut masked, line);
            } else {
                state.push_content(line, line_end);
                masked.push_str(line);
            }
        }

        let end = text.len();
        let unclosed: Vec<usize> = state
            .stack
            .iter()
            .filter_map(|frame| match frame {
                Frame::Node { index, .. } => Some(*index),
                Frame::Overflow => None,
            })
            .collect();
        for index in unclosed {
            let node = &state.nodes[index];
            sink.report(
                DiagnosticKind::UnclosedDirective,
                node.header,
                format!(
                    "directive `:::{}` opened on line {} is never closed",
                    node.kind, node.header.line
                ),
            );
        }
        while !state.stack.is_empty() {
            state.pop_frame(end, end, false);
        }

        let references = collect_references(&masked, &state.lines, &state.nodes);
        tracing::debug!(
            "scanned {} directive(s), {} reference(s)",
            state.nodes.len(),
            references.len()
        );
        RawDocument {
            frontmatter,
            nodes: state.nodes,
            roots: state.roots,
            references,
            content_hash: content_hash(text),
        }
    }

    /// Handle a `:::kind{...}` line. Returns whether the line was consumed as structure.
    fn open(
        &self,
        state: &mut ScanState,
        sink: &mut DiagnosticSink,
        trimmed: &str,
        line_start: usize,
        line_end: usize,
    ) -> bool {
        let header = state.lines.span(line_start, line_end);
        let Some(captures) = OPENER.captures(trimmed) else {
            sink.report(
                DiagnosticKind::MalformedDirective,
                header,
                format!("`{trimmed}` is not a directive: expected `:::kind{{attributes}}`"),
            );
            return false;
        };
        let kind = captures[1].to_string();
        let rest = captures[2].trim();

        let attr_text = if rest.is_empty() {
            ""
        } else if let Some(inner) = rest.strip_prefix('{') {
            match inner.strip_suffix('}') {
                Some(inner) => inner,
                None => {
                    sink.report(
                        DiagnosticKind::MalformedDirective,
                        header,
                        format!("attribute block of `:::{kind}` is missing its closing `}}`"),
                    );
                    inner
                }
            }
        } else {
            sink.report(
                DiagnosticKind::MalformedDirective,
                header,
                format!("unexpected text `{rest}` after `:::{kind}`"),
            );
            ""
        };

        state.close_top_section();

        if state.stack.len() >= self.max_depth {
            if !matches!(state.stack.last(), Some(Frame::Overflow)) {
                sink.report(
                    DiagnosticKind::NestingTooDeep,
                    header,
                    format!(
                        "`:::{kind}` exceeds the maximum nesting depth of {}; its content is folded into the enclosing block",
                        self.max_depth
                    ),
                );
            }
            state.stack.push(Frame::Overflow);
            return true;
        }

        let parsed = parse_attributes(attr_text);
        for error in parsed.errors {
            sink.report(
                DiagnosticKind::MalformedAttributes,
                header,
                format!("`:::{kind}`: {error}"),
            );
        }

        let index = state.nodes.len();
        let parent = match state.top_node() {
            Some(Frame::Node { index, .. }) => Some(*index),
            _ => None,
        };
        match parent {
            Some(parent) => state.nodes[parent].children.push(index),
            None => state.roots.push(index),
        }
        state.nodes.push(RawNode {
            index,
            kind,
            id: parsed.id,
            attributes: parsed.attributes,
            parent,
            depth: state.stack.len(),
            children: vec![],
            sections: vec![],
            text: String::new(),
            span: header,
            header,
            body_start: line_end,
            body_end: line_end,
            closed: false,
        });
        state.stack.push(Frame::Node {
            index,
            text: String::new(),
            section: None,
        });
        true
    }

    fn close(
        &self,
        state: &mut ScanState,
        sink: &mut DiagnosticSink,
        line_start: usize,
        line_end: usize,
    ) {
        if state.stack.is_empty() {
            sink.report(
                DiagnosticKind::UnbalancedCloser,
                state.lines.span(line_start, line_end),
                "closing `:::` without a matching open directive",
            );
            return;
        }
        state.pop_frame(line_start, line_end, true);
    }

    fn open_section(
        &self,
        state: &mut ScanState,
        label: &str,
        line_start: usize,
        line_end: usize,
    ) -> bool {
        if !matches!(state.stack.last(), Some(Frame::Node { .. })) {
            return false;
        }
        state.close_top_section();
        if let Some(Frame::Node { section, .. }) = state.stack.last_mut() {
            *section = Some(OpenSection {
                label: label.to_string(),
                start: line_start,
                text: String::new(),
                last_end: line_end,
            });
        }
        true
    }
}

/// `caption` for `::caption`, [`PROVENANCE_LABEL`] for `#_provenance`.
fn section_label(trimmed: &str) -> Option<&str> {
    if trimmed == "#_provenance" {
        return Some(PROVENANCE_LABEL);
    }
    SECTION_MARKER
        .captures(trimmed)
        .and_then(|captures| captures.get(1))
        .map(|label| label.as_str())
}

/// Tokenize inline references over the masked text and attribute each to its innermost
/// enclosing node.
fn collect_references(masked: &str, lines: &LineIndex, nodes: &[RawNode]) -> Vec<Reference> {
    inline_links(masked)
        .into_iter()
        .filter_map(|link| {
            let (target_document, target) = split_reference_target(&link.dest)?;
            let source = nodes
                .iter()
                .filter(|node| node.contains_body_offset(link.range.start))
                .max_by_key(|node| node.depth)
                .map(|node| node.index);
            Some(Reference {
                source,
                target_document,
                target,
                label: link.label,
                origin: ReferenceOrigin::Inline,
                span: lines.span(link.range.start, link.range.end),
            })
        })
        .collect()
}

/// Parse `text` with default settings, returning the raw tree and any syntax diagnostics.
pub fn parse(text: &str) -> (RawDocument, Vec<Diagnostic>) {
    let mut sink = DiagnosticSink::new("");
    let raw = DirectiveParser::default().parse(text, &mut sink);
    (raw, sink.into_vec())
}
