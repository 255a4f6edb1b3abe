//! Token-budgeted prompt assembly for `ask`

use crate::retrieval::ScoredChunk;

/// Average characters per token for non-CJK text
const CHARS_PER_TOKEN: usize = 4;

/// Rough token count: one per CJK character, one per four other characters
pub fn estimate_tokens(text: &str) -> usize {
    let (cjk, other) = text.chars().fold((0usize, 0usize), |(cjk, other), c| {
        if is_cjk(c) {
            (cjk + 1, other)
        } else {
            (cjk, other + 1)
        }
    });
    cjk + other.div_ceil(CHARS_PER_TOKEN)
}

fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{3040}'..='\u{30ff}'
        | '\u{3400}'..='\u{4dbf}'
        | '\u{4e00}'..='\u{9fff}'
        | '\u{ac00}'..='\u{d7af}'
        | '\u{f900}'..='\u{faff}'
        | '\u{ff00}'..='\u{ffef}')
}

/// Results of one file, chunks in file order
#[derive(Debug)]
pub struct FileGroup<'a> {
    pub file_path: &'a str,
    pub chunks: Vec<&'a ScoredChunk>,
}

impl FileGroup<'_> {
    fn content(&self) -> String {
        self.chunks
            .iter()
            .map(|c| c.chunk.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Group results by file, in order of each file's best-ranked chunk
pub fn group_by_file(results: &[ScoredChunk]) -> Vec<FileGroup<'_>> {
    let mut groups: Vec<FileGroup<'_>> = Vec::new();
    for result in results {
        match groups
            .iter_mut()
            .find(|g| g.file_path == result.chunk.file_path)
        {
            Some(group) => group.chunks.push(result),
            None => groups.push(FileGroup {
                file_path: &result.chunk.file_path,
                chunks: vec![result],
            }),
        }
    }
    for group in groups.iter_mut() {
        group.chunks.sort_by_key(|c| c.chunk.chunk_index);
    }
    groups
}

/// Prompt text plus the files that made it into the context
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledPrompt {
    pub prompt: String,
    pub sources: Vec<String>,
    pub context_tokens: usize,
}

/// Build the answer prompt, adding file groups until the next one would push
/// the context past `budget` tokens. A first group that alone exceeds the
/// budget is cut to fit so the model always sees some context.
pub fn assemble_prompt(question: &str, results: &[ScoredChunk], budget: usize) -> AssembledPrompt {
    let mut context = String::new();
    let mut sources = Vec::new();
    let mut used = 0;

    for group in group_by_file(results) {
        let block = format!(
            "Source file: {}\nContent: {}\n---\n",
            group.file_path,
            group.content()
        );
        let tokens = estimate_tokens(&block);

        if used + tokens > budget {
            if sources.is_empty() {
                let cut = truncate_to_tokens(&block, budget);
                used = estimate_tokens(&cut);
                context.push_str(&cut);
                context.push('\n');
                sources.push(group.file_path.to_string());
            }
            break;
        }

        used += tokens;
        context.push_str(&block);
        sources.push(group.file_path.to_string());
    }

    let prompt = format!(
        "Question: {}\n\n\
         Answer the question using only the documents below.\n\n\
         {}\n\
         If the documents do not contain enough information to answer, say so clearly \
         instead of guessing.",
        question, context
    );

    AssembledPrompt {
        prompt,
        sources,
        context_tokens: used,
    }
}

/// Longest prefix of `text` whose estimate fits in `budget`
fn truncate_to_tokens(text: &str, budget: usize) -> String {
    let mut out = String::new();
    let (mut cjk, mut other) = (0usize, 0usize);
    for c in text.chars() {
        let (next_cjk, next_other) = if is_cjk(c) { (cjk + 1, other) } else { (cjk, other + 1) };
        if next_cjk + next_other.div_ceil(CHARS_PER_TOKEN) > budget {
            break;
        }
        cjk = next_cjk;
        other = next_other;
        out.push(c);
    }
    out
}
