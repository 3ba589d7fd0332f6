//! Structure-aware chunking.
//!
//! Splitting prefers, in order: configured structural markers (needs at least
//! two hits), blank-line paragraphs, then plain word packing. Segments are packed
//! greedily into chunks of at most `max_size` chars, and every chunk then borrows
//! context from each neighbour, so a chunk never exceeds `max_size + 2 * overlap`
//! chars. Borrowed context is set off by a newline that counts against the
//! `overlap` budget: a chunk takes the last `overlap - 1` chars of the previous
//! core and the first `overlap - 1` of the next, so `overlap = 1` adds only the
//! separators.

use regex::{Regex, RegexBuilder};
use tracing::debug;

use polaris_core::config::{ChunkingSettings, MarkerSpec};
use polaris_core::error::{Error, Result};
use polaris_core::types::{Chunk, Document};

pub const GENERIC: &str = "generic";
const OVERLAP_JOIN: char = '\n';

/// Byte range into the source text, already trimmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitStrategy {
    Structural,
    Paragraph,
    Words,
}

impl SplitStrategy {
    /// Separator placed between packed segments.
    pub fn joiner(self) -> &'static str {
        match self {
            SplitStrategy::Structural | SplitStrategy::Paragraph => "\n\n",
            SplitStrategy::Words => " ",
        }
    }
}

struct Marker {
    label: String,
    regex: Regex,
}

pub struct Chunker {
    markers: Vec<Marker>,
    any_marker: Option<Regex>,
    paragraph_break: Regex,
    word: Regex,
    max_size: usize,
    overlap: usize,
}

impl Chunker {
    pub fn new(settings: &ChunkingSettings) -> Result<Self> {
        let markers = settings.markers.iter().map(compile_marker).collect::<Result<Vec<_>>>()?;
        let any_marker = if settings.markers.is_empty() {
            None
        } else {
            let union = settings.markers.iter().map(|m| format!("(?:{})", m.pattern)).collect::<Vec<_>>().join("|");
            Some(case_insensitive(&union)?)
        };
        Ok(Self {
            markers,
            any_marker,
            paragraph_break: case_insensitive(r"\n[ \t\r]*\n")?,
            word: case_insensitive(r"\S+")?,
            max_size: settings.max_size.max(1),
            overlap: settings.overlap,
        })
    }

    /// Chunk a document with the configured size and overlap.
    pub fn chunk_document(&self, doc: &Document) -> Vec<Chunk> {
        let mut chunks = self.chunk(&doc.raw_text, self.max_size, self.overlap);
        for c in &mut chunks { c.document_id = doc.id.clone(); }
        debug!(document_id = %doc.id, chunks = chunks.len(), "document chunked");
        chunks
    }

    /// Split `text` into ordered, overlapping chunks. Empty or whitespace-only
    /// input yields no chunks; any other input yields at least one.
    pub fn chunk(&self, text: &str, max_size: usize, overlap: usize) -> Vec<Chunk> {
        let max_size = max_size.max(1);
        let (segments, strategy) = self.segments(text);
        if segments.is_empty() { return Vec::new(); }
        let joiner = strategy.joiner();
        let cores = self.pack(text, &segments, max_size, joiner);
        self.with_overlap(text, &cores, overlap, joiner)
    }

    /// The segmentation step alone, in document order.
    pub fn segments(&self, text: &str) -> (Vec<Segment>, SplitStrategy) {
        if text.trim().is_empty() { return (Vec::new(), SplitStrategy::Words); }

        if let Some(any) = &self.any_marker {
            let starts: Vec<usize> = any.find_iter(text).map(|m| m.start()).collect();
            if starts.len() >= 2 {
                let mut bounds = Vec::with_capacity(starts.len() + 2);
                bounds.push(0);
                bounds.extend(starts);
                bounds.push(text.len());
                bounds.dedup();
                let segments = bounds.windows(2).filter_map(|w| trimmed(text, w[0], w[1])).collect();
                return (segments, SplitStrategy::Structural);
            }
        }

        let mut paragraphs = Vec::new();
        let mut start = 0;
        for m in self.paragraph_break.find_iter(text) {
            paragraphs.extend(trimmed(text, start, m.start()));
            start = m.end();
        }
        paragraphs.extend(trimmed(text, start, text.len()));
        if paragraphs.len() >= 2 { return (paragraphs, SplitStrategy::Paragraph); }

        let words = self.word.find_iter(text).map(|m| Segment { start: m.start(), end: m.end() }).collect();
        (words, SplitStrategy::Words)
    }

    /// Label of the first marker (in priority order) found in `text`.
    pub fn classify(&self, text: &str) -> &str {
        self.markers.iter().find(|m| m.regex.is_match(text)).map_or(GENERIC, |m| m.label.as_str())
    }

    /// Greedy packing of segments into cores of at most `max_size` chars.
    /// Segments longer than `max_size` are first cut at word boundaries.
    fn pack(&self, text: &str, segments: &[Segment], max_size: usize, joiner: &str) -> Vec<Vec<Segment>> {
        let join_len = joiner.chars().count();
        let mut cores: Vec<Vec<Segment>> = Vec::new();
        let mut current: Vec<Segment> = Vec::new();
        let mut current_len = 0usize;
        for seg in segments.iter().flat_map(|s| self.fit(text, *s, max_size)) {
            let len = text[seg.start..seg.end].chars().count();
            let added = if current.is_empty() { len } else { current_len + join_len + len };
            if added <= max_size {
                current.push(seg);
                current_len = added;
            } else {
                if !current.is_empty() { cores.push(std::mem::take(&mut current)); }
                current.push(seg);
                current_len = len;
            }
        }
        if !current.is_empty() { cores.push(current); }
        cores
    }

    /// Cut an oversized segment into word-packed pieces; a single word longer
    /// than `max_size` is cut at char boundaries.
    fn fit(&self, text: &str, seg: Segment, max_size: usize) -> Vec<Segment> {
        if text[seg.start..seg.end].chars().count() <= max_size { return vec![seg]; }
        let mut pieces = Vec::new();
        let mut piece: Option<(Segment, usize)> = None;
        for m in self.word.find_iter(&text[seg.start..seg.end]) {
            let word = Segment { start: seg.start + m.start(), end: seg.start + m.end() };
            let word_len = text[word.start..word.end].chars().count();
            if word_len > max_size {
                if let Some((p, _)) = piece.take() { pieces.push(p); }
                pieces.extend(split_chars(text, word, max_size));
                continue;
            }
            piece = match piece {
                Some((p, len)) => {
                    let extended = len + text[p.end..word.end].chars().count();
                    if extended <= max_size {
                        Some((Segment { start: p.start, end: word.end }, extended))
                    } else {
                        pieces.push(p);
                        Some((word, word_len))
                    }
                }
                None => Some((word, word_len)),
            };
        }
        if let Some((p, _)) = piece { pieces.push(p); }
        pieces
    }

    fn with_overlap(&self, text: &str, cores: &[Vec<Segment>], overlap: usize, joiner: &str) -> Vec<Chunk> {
        let bodies: Vec<String> = cores
            .iter()
            .map(|segs| segs.iter().map(|s| &text[s.start..s.end]).collect::<Vec<_>>().join(joiner))
            .collect();
        // One char of each overlap budget goes to the separator.
        let take = overlap.saturating_sub(1);
        let mut chunks = Vec::with_capacity(bodies.len());
        for (i, body) in bodies.iter().enumerate() {
            let mut chunk_text = String::new();
            let mut before = 0;
            let mut after = 0;
            if overlap > 0 && i > 0 {
                let tail = last_chars(&bodies[i - 1], take);
                chunk_text.push_str(tail);
                chunk_text.push(OVERLAP_JOIN);
                before = tail.chars().count() + 1;
            }
            chunk_text.push_str(body);
            if overlap > 0 && i + 1 < bodies.len() {
                let head = first_chars(&bodies[i + 1], take);
                chunk_text.push(OVERLAP_JOIN);
                chunk_text.push_str(head);
                after = head.chars().count() + 1;
            }
            let segs = &cores[i];
            let char_count = chunk_text.chars().count();
            chunks.push(Chunk {
                document_id: String::new(),
                chunk_index: i,
                structural_type: self.classify(body).to_string(),
                text: chunk_text,
                char_count,
                start_offset: segs.first().map_or(0, |s| s.start),
                end_offset: segs.last().map_or(0, |s| s.end),
                overlap_before: before,
                overlap_after: after,
            });
        }
        chunks
    }
}

fn compile_marker(spec: &MarkerSpec) -> Result<Marker> {
    Ok(Marker { label: spec.label.clone(), regex: case_insensitive(&spec.pattern)? })
}

fn case_insensitive(pattern: &str) -> Result<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|e| Error::InvalidConfig(format!("marker pattern {pattern:?}: {e}")))
}

fn trimmed(text: &str, start: usize, end: usize) -> Option<Segment> {
    let slice = &text[start..end];
    let lead = slice.len() - slice.trim_start().len();
    let trail = slice.len() - slice.trim_end().len();
    let seg = Segment { start: start + lead, end: end - trail };
    (seg.start < seg.end).then_some(seg)
}

fn split_chars(text: &str, word: Segment, max_size: usize) -> Vec<Segment> {
    let slice = &text[word.start..word.end];
    let mut cuts: Vec<usize> = slice.char_indices().map(|(i, _)| i).step_by(max_size).collect();
    cuts.push(slice.len());
    cuts.windows(2).map(|w| Segment { start: word.start + w[0], end: word.start + w[1] }).collect()
}

fn last_chars(s: &str, n: usize) -> &str {
    let count = s.chars().count();
    if n >= count { return s; }
    let start = s.char_indices().nth(count - n).map_or(s.len(), |(i, _)| i);
    &s[start..]
}

fn first_chars(s: &str, n: usize) -> &str {
    let end = s.char_indices().nth(n).map_or(s.len(), |(i, _)| i);
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker() -> Chunker { Chunker::new(&ChunkingSettings::default()).unwrap() }

    #[test]
    fn empty_input_yields_no_chunks() {
        assert!(chunker().chunk("", 100, 10).is_empty());
        assert!(chunker().chunk(" \n\t\n ", 100, 10).is_empty());
    }

    #[test]
    fn two_article_markers_split_structurally() {
        let text = "Art. 1º Direito à vida. Art. 2º Direito à liberdade.";
        let (segments, strategy) = chunker().segments(text);
        assert_eq!(strategy, SplitStrategy::Structural);
        let parts: Vec<&str> = segments.iter().map(|s| &text[s.start..s.end]).collect();
        assert_eq!(parts, vec!["Art. 1º Direito à vida.", "Art. 2º Direito à liberdade."]);
    }

    #[test]
    fn single_marker_falls_back_to_paragraphs() {
        let text = "Artigo 5º Direitos sociais.\n\nSegundo parágrafo.\n   \nTerceiro.";
        let (segments, strategy) = chunker().segments(text);
        assert_eq!(strategy, SplitStrategy::Paragraph);
        assert_eq!(segments.len(), 3);
    }

    #[test]
    fn preamble_before_first_marker_is_kept() {
        let text = "Preâmbulo da lei. Art. 1 Primeiro. Art. 2 Segundo.";
        let (segments, _) = chunker().segments(text);
        assert_eq!(&text[segments[0].start..segments[0].end], "Preâmbulo da lei.");
        assert_eq!(segments.len(), 3);
    }

    #[test]
    fn packing_respects_max_size_and_classifies() {
        let text = "Art. 1 aaaa aaaa. Art. 2 bbbb bbbb. Art. 3 cccc cccc.";
        let chunks = chunker().chunk(text, 40, 0);
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.char_count <= 40));
        assert!(chunks.iter().all(|c| c.structural_type == "article"));
        assert_eq!(chunks[0].text, "Art. 1 aaaa aaaa.\n\nArt. 2 bbbb bbbb.");
    }

    #[test]
    fn overlap_borrows_from_both_neighbours() {
        let text = "first paragraph here\n\nsecond paragraph here\n\nthird paragraph here";
        let chunks = chunker().chunk(text, 25, 5);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].text, "first paragraph here\nseco");
        assert_eq!(chunks[1].text, "here\nsecond paragraph here\nthir");
        assert_eq!(chunks[1].overlap_before, 5);
        assert_eq!(chunks[1].overlap_after, 5);
        assert_eq!(chunks[1].core(), "second paragraph here");
        assert_eq!(chunks[2].overlap_after, 0);
    }

    #[test]
    fn long_unbroken_text_is_word_packed() {
        let text = "palavra ".repeat(100);
        let chunks = chunker().chunk(&text, 50, 10);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.char_count <= 50 + 2 * 10, "chunk too long: {}", c.char_count);
            assert!(c.core().chars().count() <= 50);
        }
    }

    #[test]
    fn single_paragraph_keeps_word_spacing() {
        let text = "Artigo 5º Direitos sociais incluem saúde.";
        let (_, strategy) = chunker().segments(text);
        assert_eq!(strategy, SplitStrategy::Words);
        let chunks = chunker().chunk(text, 1000, 200);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, text);
        assert_eq!(chunks[0].structural_type, "article");
    }

    #[test]
    fn giant_word_is_cut_at_char_boundaries() {
        let text = "ç".repeat(25);
        let chunks = chunker().chunk(&text, 10, 0);
        assert_eq!(chunks.iter().map(|c| c.char_count).collect::<Vec<_>>(), vec![10, 10, 5]);
    }

    #[test]
    fn offsets_point_at_core_region() {
        let text = "  Seção I Das disposições.\n\nCapítulo II Dos direitos.  ";
        let chunks = chunker().chunk(text, 30, 0);
        assert_eq!(chunks.len(), 2);
        assert_eq!(&text[chunks[0].start_offset..chunks[0].end_offset], "Seção I Das disposições.");
        assert_eq!(chunks[0].structural_type, "section");
        assert_eq!(chunks[1].structural_type, "chapter");
    }

    #[test]
    fn unmarked_text_is_generic() {
        assert_eq!(chunker().classify("texto comum sem marcadores"), GENERIC);
        assert_eq!(chunker().classify("conforme § 2 acima"), "paragraph");
    }

    #[test]
    fn invalid_marker_is_config_error() {
        let settings = ChunkingSettings { markers: vec![MarkerSpec { label: "x".into(), pattern: "(".into() }], ..Default::default() };
        assert!(matches!(Chunker::new(&settings), Err(Error::InvalidConfig(_))));
    }

    /// Small deterministic generator so the property loops need no extra crate.
    struct Lcg(u64);

    impl Lcg {
        fn next(&mut self, bound: usize) -> usize {
            self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            ((self.0 >> 33) as usize) % bound
        }
    }

    fn random_text(rng: &mut Lcg) -> String {
        const PIECES: &[&str] = &[
            "Art. 12", "Artigo 3", "Capítulo IV", "Seção II", "§ 2", "Inciso V", "direito", "à", "moradia",
            "contratação", "ç", "lei", "\n\n", "\n", "  ", "propriedadeimobiliáriaurbanaresidencial",
        ];
        let mut text = String::new();
        for _ in 0..rng.next(60) {
            text.push_str(PIECES[rng.next(PIECES.len())]);
            text.push(' ');
        }
        text
    }

    fn squeeze(s: &str) -> String { s.chars().filter(|c| !c.is_whitespace()).collect() }

    #[test]
    fn cores_rebuild_the_segmentation_in_order() {
        let c = chunker();
        let structural = "Art. 1 Fica instituído o programa.\n\nArt. 2 O programa atende famílias.\n\nArt. 3 Compete ao município.\n\nArt. 4 Esta lei entra em vigor.";
        let paragraphs = "Primeiro parágrafo sobre moradia.\n\nSegundo parágrafo sobre saúde.\n\nTerceiro parágrafo sobre educação.\n\nQuarto e último.";
        for (text, expected) in [(structural, SplitStrategy::Structural), (paragraphs, SplitStrategy::Paragraph)] {
            let (segments, strategy) = c.segments(text);
            assert_eq!(strategy, expected);
            let joiner = strategy.joiner();
            let packed: Vec<String> = c
                .pack(text, &segments, 40, joiner)
                .iter()
                .map(|segs| segs.iter().map(|s| &text[s.start..s.end]).collect::<Vec<_>>().join(joiner))
                .collect();

            let chunks = c.chunk(text, 40, 8);
            assert!(chunks.len() > 2);
            assert_eq!(chunks.iter().map(Chunk::core).collect::<Vec<_>>(), packed);
            assert!(chunks.windows(2).all(|w| w[0].start_offset < w[1].start_offset && w[0].end_offset <= w[1].start_offset));
            let rebuilt = chunks.iter().map(Chunk::core).collect::<Vec<_>>().join(joiner);
            let original = segments.iter().map(|s| &text[s.start..s.end]).collect::<Vec<_>>().join(joiner);
            assert_eq!(rebuilt, original);
        }
    }

    #[test]
    fn random_inputs_keep_size_and_order_bounds() {
        let c = chunker();
        let mut rng = Lcg(0x5eed);
        for round in 0..1500 {
            let text = random_text(&mut rng);
            let max_size = 10 + rng.next(90);
            let overlap = rng.next(25);
            let chunks = c.chunk(&text, max_size, overlap);
            assert_eq!(chunks.is_empty(), text.trim().is_empty(), "round {round}");
            for (i, chunk) in chunks.iter().enumerate() {
                assert_eq!(chunk.chunk_index, i);
                assert!(chunk.char_count <= max_size + 2 * overlap, "round {round}: {} > {max_size} + 2*{overlap}", chunk.char_count);
                assert!(chunk.core().chars().count() <= max_size, "round {round}");
            }
            assert!(chunks.windows(2).all(|w| w[0].end_offset <= w[1].start_offset), "round {round}");
            let cores: String = chunks.iter().map(Chunk::core).collect();
            assert_eq!(squeeze(&cores), squeeze(&text), "round {round}");
        }
    }
}
