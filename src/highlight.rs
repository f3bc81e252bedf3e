//! Field-to-text highlighting.
//!
//! Given the raw OCR text of a document and its extracted fields, work out which
//! substrings of the text belong to which field. The result is a set of
//! non-overlapping spans, sorted by position, that partition the text into plain
//! and highlighted segments.
//!
//! Matching rules:
//! 1. Fields without a usable value (empty or the "not found" literal) never match.
//! 2. Longer values are matched first, so a short value that happens to be a
//!    substring of a longer one cannot fragment it. Equal lengths keep list order.
//! 3. Every exact, case-sensitive occurrence is a candidate. The scan restarts one
//!    character after each hit so runs of identical characters are all found.
//! 4. Only when a value has no exact occurrence anywhere is the text searched again
//!    with both sides lower-cased.
//! 5. A candidate that overlaps an already accepted span is dropped. First accepted
//!    wins; a later field can never evict an earlier claim.
//!
//! Offsets are byte offsets into the original text and always fall on `char`
//! boundaries.

use serde::Serialize;

use crate::models::{FieldSelection, HoverTarget};
use crate::types::ExtractedField;

/// Half-open byte range of `text` attributed to `fields[field_index]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HighlightSpan {
    pub start: usize,
    pub end: usize,
    pub field_index: usize,
}

impl HighlightSpan {
    fn overlaps(&self, start: usize, end: usize) -> bool {
        start < self.end && self.start < end
    }
}

/// Compute the highlighted spans for `fields` over `text`.
pub fn index_highlights(text: &str, fields: &[ExtractedField]) -> Vec<HighlightSpan> {
    if text.is_empty() || fields.is_empty() {
        return Vec::new();
    }

    let mut order: Vec<(usize, &ExtractedField)> = fields
        .iter()
        .enumerate()
        .filter(|(_, f)| f.has_value())
        .collect();
    // Stable: ties keep list order.
    order.sort_by(|(_, a), (_, b)| b.value.chars().count().cmp(&a.value.chars().count()));

    let mut folded: Option<FoldedText> = None;
    let mut accepted: Vec<HighlightSpan> = Vec::new();

    for (field_index, field) in order {
        let mut candidates = find_all(text, &field.value);
        if candidates.is_empty() {
            let haystack = folded.get_or_insert_with(|| FoldedText::new(text));
            candidates = haystack.find_all(&field.value);
        }

        for (start, end) in candidates {
            if accepted.iter().any(|s| s.overlaps(start, end)) {
                continue;
            }
            accepted.push(HighlightSpan {
                start,
                end,
                field_index,
            });
        }
    }

    accepted.sort_by_key(|s| s.start);
    accepted
}

/// Every start of `needle` in `haystack`, including overlapping ones.
fn find_all(haystack: &str, needle: &str) -> Vec<(usize, usize)> {
    let mut out = Vec::new();
    if needle.is_empty() {
        return out;
    }
    let mut from = 0;
    while from < haystack.len() {
        let Some(pos) = haystack[from..].find(needle) else {
            break;
        };
        let idx = from + pos;
        out.push((idx, idx + needle.len()));
        from = idx + next_char_len(haystack, idx);
    }
    out
}

fn next_char_len(s: &str, at: usize) -> usize {
    s[at..].chars().next().map_or(1, char::len_utf8)
}

/// Lower-cased copy of a text that remembers where each byte came from.
///
/// Case folding can change byte lengths (and even char counts), so matches found
/// in the folded copy are mapped back through `origin`.
struct FoldedText<'a> {
    source: &'a str,
    folded: String,
    /// For every byte of `folded`, the byte offset of the source char it came from.
    origin: Vec<usize>,
}

impl<'a> FoldedText<'a> {
    fn new(source: &'a str) -> Self {
        let (folded, origin) = fold_with_origin(source);
        Self {
            source,
            folded,
            origin,
        }
    }

    fn find_all(&self, needle: &str) -> Vec<(usize, usize)> {
        let (needle, _) = fold_with_origin(needle);
        let mut out: Vec<(usize, usize)> = Vec::new();
        for (start, end) in find_all(&self.folded, &needle) {
            let src_start = self.origin[start];
            let last = self.origin[end - 1];
            let src_end = last + next_char_len(self.source, last);
            // Several folded positions can land inside one source char.
            if out.last() != Some(&(src_start, src_end)) {
                out.push((src_start, src_end));
            }
        }
        out
    }
}

fn fold_with_origin(s: &str) -> (String, Vec<usize>) {
    let mut folded = String::with_capacity(s.len());
    let mut origin = Vec::with_capacity(s.len());
    for (i, ch) in s.char_indices() {
        for lower in ch.to_lowercase() {
            let before = folded.len();
            folded.push(lower);
            origin.extend(std::iter::repeat(i).take(folded.len() - before));
        }
    }
    (folded, origin)
}

/// One piece of the text partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextSegment<'a> {
    pub text: &'a str,
    pub start: usize,
    pub field_index: Option<usize>,
}

/// Split `text` into plain gaps and highlighted spans. `spans` must come from
/// [`index_highlights`] (sorted, non-overlapping).
pub fn partition<'a>(text: &'a str, spans: &[HighlightSpan]) -> Vec<TextSegment<'a>> {
    let mut segments = Vec::with_capacity(spans.len() * 2 + 1);
    let mut cursor = 0;
    for span in spans {
        if span.start > cursor {
            segments.push(TextSegment {
                text: &text[cursor..span.start],
                start: cursor,
                field_index: None,
            });
        }
        segments.push(TextSegment {
            text: &text[span.start..span.end],
            start: span.start,
            field_index: Some(span.field_index),
        });
        cursor = span.end;
    }
    if cursor < text.len() {
        segments.push(TextSegment {
            text: &text[cursor..],
            start: cursor,
            field_index: None,
        });
    }
    segments
}

/// A segment ready for display: highlighted pieces carry the owning field's
/// state for the tooltip and the current emphasis.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentView {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    pub is_corrected: bool,
    pub selected: bool,
    pub hovered: bool,
}

/// Attach field state and emphasis to a partition. Emphasis never changes the
/// partition itself, only the flags.
pub fn render_segments(
    segments: &[TextSegment<'_>],
    fields: &[ExtractedField],
    selection: &FieldSelection,
    hover: &HoverTarget,
) -> Vec<SegmentView> {
    segments
        .iter()
        .map(|seg| {
            let field = seg
                .field_index
                .and_then(|i| fields.get(i).map(|f| (i, f)));
            match field {
                Some((i, f)) => SegmentView {
                    text: seg.text.to_string(),
                    field_index: Some(i),
                    field_name: Some(f.name.clone()),
                    confidence: Some(f.confidence),
                    is_corrected: f.is_corrected,
                    selected: selection.matches(i, f),
                    hovered: hover.matches(i, f),
                },
                None => SegmentView {
                    text: seg.text.to_string(),
                    field_index: None,
                    field_name: None,
                    confidence: None,
                    is_corrected: false,
                    selected: false,
                    hovered: false,
                },
            }
        })
        .collect()
}

/// Index, partition and decorate in one go.
pub fn highlight_text(
    text: &str,
    fields: &[ExtractedField],
    selection: &FieldSelection,
    hover: &HoverTarget,
) -> Vec<SegmentView> {
    let spans = index_highlights(text, fields);
    render_segments(&partition(text, &spans), fields, selection, hover)
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    // Mixed case plus characters whose lower-case form changes byte length.
    const ALPHABET: &[&str] = &["a", "A", "b", "B", "i", "İ", "ß", "ẞ", "σ", "Σ", "ς", "0", "1", " ", "."];

    fn text_from(chars: Vec<&str>) -> String {
        chars.concat()
    }

    fn text_strategy(max: usize) -> impl Strategy<Value = String> {
        proptest::collection::vec(proptest::sample::select(ALPHABET.to_vec()), 0..max).prop_map(text_from)
    }

    fn fields_strategy() -> impl Strategy<Value = Vec<ExtractedField>> {
        proptest::collection::vec((0usize..4, text_strategy(6)), 0..6).prop_map(|pairs| {
            pairs
                .into_iter()
                .map(|(name, value)| ExtractedField::new(format!("f{}", name), value))
                .collect()
        })
    }

    proptest! {
        #[test]
        fn prop_spans_sorted_disjoint_and_on_boundaries(
            text in text_strategy(40),
            fields in fields_strategy()
        ) {
            let spans = index_highlights(&text, &fields);
            for span in &spans {
                prop_assert!(span.start < span.end);
                prop_assert!(span.end <= text.len());
                prop_assert!(text.is_char_boundary(span.start));
                prop_assert!(text.is_char_boundary(span.end));
                prop_assert!(fields[span.field_index].has_value());
            }
            for pair in spans.windows(2) {
                prop_assert!(pair[0].end <= pair[1].start);
            }
        }

        #[test]
        fn prop_partition_rebuilds_text(
            text in text_strategy(40),
            fields in fields_strategy()
        ) {
            let spans = index_highlights(&text, &fields);
            let rebuilt: String = partition(&text, &spans).iter().map(|s| s.text).collect();
            prop_assert_eq!(rebuilt, text);
        }

        #[test]
        fn prop_single_verbatim_occurrence_gives_one_span(
            prefix in text_strategy(20),
            suffix in text_strategy(20),
            value in proptest::collection::vec(proptest::sample::select(vec!["x", "y", "Z", "ж"]), 1..5)
                .prop_map(text_from)
        ) {
            let text = format!("{}{}{}", prefix, value, suffix);
            let fields = vec![ExtractedField::new("code", value.clone())];
            let spans = index_highlights(&text, &fields);
            prop_assert_eq!(
                spans,
                vec![HighlightSpan { start: prefix.len(), end: prefix.len() + value.len(), field_index: 0 }]
            );
        }
    }
}
