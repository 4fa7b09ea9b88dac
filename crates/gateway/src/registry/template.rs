//! Precompiled RFC 6570-style resource URI templates: literal segments must
//! match exactly, variable segments (`{name}`) match any non-`/` sequence.
//! Tie-break is descending count of literal segments, then lexicographic
//! template order (spec §4.3 resolution algorithm, Design Notes §9).

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Variable(String),
}

#[derive(Debug, Clone)]
pub struct CompiledTemplate {
    pub raw: String,
    segments: Vec<Segment>,
    literal_count: usize,
}

impl CompiledTemplate {
    pub fn compile(template: &str) -> Self {
        let segments: Vec<Segment> = template
            .split('/')
            .map(|s| {
                if let Some(var) = s.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                    Segment::Variable(var.to_string())
                } else {
                    Segment::Literal(s.to_string())
                }
            })
            .collect();
        let literal_count = segments
            .iter()
            .filter(|s| matches!(s, Segment::Literal(_)))
            .count();
        Self {
            raw: template.to_string(),
            segments,
            literal_count,
        }
    }

    /// Returns `Some(literal_count)` (used for tie-break ranking) if `uri`
    /// matches this template's shape.
    pub fn matches(&self, uri: &str) -> Option<usize> {
        let parts: Vec<&str> = uri.split('/').collect();
        if parts.len() != self.segments.len() {
            return None;
        }
        for (seg, part) in self.segments.iter().zip(parts.iter()) {
            match seg {
                Segment::Literal(l) => {
                    if l != part {
                        return None;
                    }
                }
                Segment::Variable(_) => {
                    if part.is_empty() {
                        return None;
                    }
                }
            }
        }
        Some(self.literal_count)
    }
}

/// Picks the best match among `candidates` for `uri`: most literal segments
/// wins, ties broken by lexicographically-smaller template string.
pub fn best_match<'a>(
    candidates: impl Iterator<Item = &'a CompiledTemplate>,
    uri: &str,
) -> Option<&'a CompiledTemplate> {
    candidates
        .filter_map(|t| t.matches(uri).map(|score| (score, t)))
        .max_by(|(score_a, a), (score_b, b)| {
            score_a
                .cmp(score_b)
                .then_with(|| b.raw.cmp(&a.raw))
        })
        .map(|(_, t)| t)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_segments_must_match_exactly() {
        let t = CompiledTemplate::compile("files/{path}");
        assert!(t.matches("files/a.txt").is_some());
        assert!(t.matches("other/a.txt").is_none());
        assert!(t.matches("files/a/b").is_none());
    }

    #[test]
    fn more_literal_segments_wins_tie_break() {
        let general = CompiledTemplate::compile("{kind}/{id}");
        let specific = CompiledTemplate::compile("files/{id}");
        let best = best_match([&general, &specific].into_iter(), "files/42").unwrap();
        assert_eq!(best.raw, "files/{id}");
    }
}
