/// Lexical TF-IDF scoring over the chunk corpus
///
/// Term frequency is the number of case-insensitive substring occurrences of
/// a keyword in a chunk, so "dog" also matches "dogs". Query keywords come
/// from the caller; [`KeywordIndex::extract_keywords`] is the tokenizer
/// fallback used when no LLM extractor is available.
use crate::chunking::Chunk;
use std::collections::BTreeSet;
use tantivy::tokenizer::{
    LowerCaser, RemoveLongFilter, SimpleTokenizer, StopWordFilter, TextAnalyzer, TokenStream,
};

/// Tokens longer than this are dropped by the fallback tokenizer
const MAX_TOKEN_LENGTH: usize = 40;

const STOP_WORDS: &[&str] = &[
    "a", "about", "an", "and", "are", "as", "at", "be", "been", "but", "by", "can", "could",
    "did", "do", "does", "for", "from", "had", "has", "have", "how", "i", "if", "in", "into",
    "is", "it", "its", "me", "my", "of", "on", "or", "our", "should", "so", "that", "the",
    "their", "them", "then", "there", "these", "they", "this", "to", "was", "we", "were", "what",
    "when", "where", "which", "who", "why", "will", "with", "would", "you", "your", "的", "是",
    "在", "和", "了", "吗", "呢", "什么", "怎么", "如何",
];

/// Scoring knobs for one lexical pass
#[derive(Debug, Clone, Copy)]
pub struct LexicalWeights {
    /// Multiplier when the whole query occurs verbatim in the chunk
    pub verbatim_boost: f32,
    /// Added once per keyword found in the chunk's file path
    pub path_bonus: f32,
}

impl Default for LexicalWeights {
    fn default() -> Self {
        Self {
            verbatim_boost: 2.0,
            path_bonus: 0.1,
        }
    }
}

/// Lexical hit: corpus position and score normalised to `(0, 1]`
#[derive(Debug, Clone, PartialEq)]
pub struct KeywordSearchResult {
    pub id: usize,
    pub score: f32,
}

/// Lower-cased view of one chunk
#[derive(Debug, Clone)]
struct LexicalDoc {
    text: String,
    path: String,
}

/// In-memory lexical index, rebuilt with the vector index
#[derive(Clone)]
pub struct KeywordIndex {
    docs: Vec<LexicalDoc>,
    analyzer: TextAnalyzer,
}

impl KeywordIndex {
    pub fn new() -> Self {
        let stop_words: Vec<String> = STOP_WORDS.iter().map(|s| s.to_string()).collect();
        let analyzer = TextAnalyzer::builder(SimpleTokenizer::default())
            .filter(RemoveLongFilter::limit(MAX_TOKEN_LENGTH))
            .filter(LowerCaser)
            .filter(StopWordFilter::remove(stop_words))
            .build();

        Self {
            docs: Vec::new(),
            analyzer,
        }
    }

    /// Replace the indexed corpus; positions follow `chunks`
    pub fn rebuild(&mut self, chunks: &[Chunk]) {
        self.docs = chunks
            .iter()
            .map(|c| LexicalDoc {
                text: c.content.to_lowercase(),
                path: c.file_path.to_lowercase(),
            })
            .collect();
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Stopword-filtered, lower-cased, de-duplicated query tokens in order
    pub fn extract_keywords(&self, query: &str) -> Vec<String> {
        // token_stream needs &mut; the analyzer is cheap to clone
        let mut analyzer = self.analyzer.clone();
        let mut stream = analyzer.token_stream(query);
        let mut seen = BTreeSet::new();
        let mut keywords = Vec::new();

        while stream.advance() {
            let text = stream.token().text.clone();
            let meaningful = text.chars().count() > 1 || !text.is_ascii();
            if meaningful && seen.insert(text.clone()) {
                keywords.push(text);
            }
        }
        keywords
    }

    /// Score every chunk against `keywords`; only positive scores are
    /// returned, normalised by the best one and sorted by descending score
    /// then corpus position
    pub fn search(
        &self,
        query: &str,
        keywords: &[String],
        weights: LexicalWeights,
    ) -> Vec<KeywordSearchResult> {
        let total = self.docs.len();
        if total == 0 {
            return Vec::new();
        }

        let keywords: Vec<String> = keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if keywords.is_empty() {
            return Vec::new();
        }

        // tf[k][d]
        let tf: Vec<Vec<usize>> = keywords
            .iter()
            .map(|k| self.docs.iter().map(|d| d.text.matches(k.as_str()).count()).collect())
            .collect();
        let idf: Vec<f32> = tf
            .iter()
            .map(|counts| {
                let df = counts.iter().filter(|&&c| c > 0).count();
                if df == 0 {
                    0.0
                } else {
                    (total as f32 / df as f32).ln()
                }
            })
            .collect();

        let phrase = query.trim().to_lowercase();
        let mut raw: Vec<KeywordSearchResult> = Vec::new();
        for (id, doc) in self.docs.iter().enumerate() {
            let mut score: f32 = (0..keywords.len())
                .map(|k| tf[k][id] as f32 * idf[k])
                .sum();

            if !phrase.is_empty() && doc.text.contains(&phrase) {
                score *= weights.verbatim_boost;
            }
            let path_hits = keywords
                .iter()
                .filter(|k| doc.path.contains(k.as_str()))
                .count();
            score += path_hits as f32 * weights.path_bonus;

            if score > 0.0 {
                raw.push(KeywordSearchResult { id, score });
            }
        }

        let max = raw.iter().map(|r| r.score).fold(0.0f32, f32::max);
        if max <= 0.0 {
            return Vec::new();
        }
        for r in raw.iter_mut() {
            r.score /= max;
        }
        raw.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.id.cmp(&b.id))
        });
        raw
    }
}

impl Default for KeywordIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corpus(docs: &[(&str, &str)]) -> KeywordIndex {
        let chunks: Vec<Chunk> = docs
            .iter()
            .flat_map(|(path, text)| Chunk::from_parts(vec![text.to_string()], path, "text", "h"))
            .collect();
        let mut index = KeywordIndex::new();
        index.rebuild(&chunks);
        index
    }

    fn kw(words: &[&str]) -> Vec<String> {
        words.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_keyword_fallback_drops_stopwords() {
        let index = KeywordIndex::new();
        assert_eq!(
            index.extract_keywords("What is the loyal Dog doing? The dog!"),
            kw(&["loyal", "dog", "doing"])
        );
        assert!(index.extract_keywords("the a of").is_empty());
    }

    #[test]
    fn test_idf_prefers_rare_terms() {
        let index = corpus(&[
            ("a.txt", "Cats are great pets. Dogs are loyal companions."),
            ("b.txt", "The quick brown fox jumps. The lazy dog sleeps all day."),
        ]);
        let hits = index.search("loyal dog", &kw(&["loyal", "dog"]), LexicalWeights::default());
        // "dog" occurs everywhere, so only "loyal" separates the chunks
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, 0);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_verbatim_match_is_boosted() {
        let index = corpus(&[
            ("a.txt", "error handling in rust is explicit"),
            ("b.txt", "rust error types and handling"),
            ("c.txt", "unrelated text"),
        ]);
        let hits = index.search(
            "error handling",
            &kw(&["error", "handling"]),
            LexicalWeights::default(),
        );
        assert_eq!(hits[0].id, 0);
        assert!(hits[1].score < hits[0].score);
        assert!((hits[1].score - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_path_bonus() {
        let index = corpus(&[("docs/install.md", "run the script"), ("notes.md", "nothing here")]);
        let hits = index.search("install", &kw(&["install"]), LexicalWeights::default());
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, 0);
    }

    #[test]
    fn test_empty_inputs() {
        let index = corpus(&[]);
        assert!(index.search("x", &kw(&["x"]), LexicalWeights::default()).is_empty());

        let index = corpus(&[("a.txt", "some text")]);
        assert!(index.search("", &[], LexicalWeights::default()).is_empty());
    }
}
