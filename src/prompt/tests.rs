use super::*;
use crate::retrieval::{ContextChunk, Provenance};
use crate::store::models::chunk_id;

/// Chunks of `size` chars overlapping by `overlap`, cut from `text`
fn overlapping_chunks(document_id: &str, text: &str, size: usize, overlap: usize) -> Vec<Chunk> {
    let chars: Vec<char> = text.chars().collect();
    let mut chunks = Vec::new();
    let mut start = 0;
    loop {
        let end = (start + size).min(chars.len());
        let sequence_index = u32::try_from(chunks.len()).expect("small test");
        chunks.push(Chunk {
            id: chunk_id(document_id, sequence_index),
            document_id: document_id.to_string(),
            sequence_index,
            text: chars[start..end].iter().collect(),
            char_start: start,
            char_end: end,
            token_count: 1,
        });
        if end == chars.len() {
            break;
        }
        start = end - overlap;
    }
    chunks
}

fn block(document_id: &str, filename: &str, chunks: Vec<Chunk>, matched: &[u32]) -> ContextBlock {
    ContextBlock {
        document_id: document_id.to_string(),
        filename: filename.to_string(),
        chunks: chunks
            .into_iter()
            .map(|chunk| ContextChunk {
                provenance: if matched.contains(&chunk.sequence_index) {
                    Provenance::Matched {
                        score: 0.9,
                        rank: 1,
                    }
                } else {
                    Provenance::Expanded
                },
                chunk,
            })
            .collect(),
    }
}

fn simple_block(document_id: &str, text: &str) -> ContextBlock {
    block(
        document_id,
        &format!("{document_id}.txt"),
        overlapping_chunks(document_id, text, 1000, 0),
        &[0],
    )
}

fn context(blocks: Vec<ContextBlock>) -> ContextSet {
    ContextSet {
        hits: Vec::new(),
        blocks,
    }
}

#[test]
fn stitching_removes_overlap() {
    let text = "The quick brown fox jumps over the lazy dog near the river bank.";
    let chunks = overlapping_chunks("doc", text, 20, 6);
    assert!(chunks.len() > 2);

    assert_eq!(stitch_chunks(&chunks), text);
}

#[test]
fn stitching_a_subrange_starts_at_its_first_chunk() {
    let text = "abcdefghijklmnopqrstuvwxyz0123456789";
    let chunks = overlapping_chunks("doc", text, 10, 3);

    let stitched = stitch_chunks(&chunks[1..3]);
    assert_eq!(stitched, "hijklmnopqrstuvwx");
}

#[test]
fn prompt_contains_frame_context_and_query() {
    let assembler = PromptAssembler::new("Use the notes.");
    let assembled = assembler
        .assemble(
            &context(vec![simple_block("a", "Alpha facts.")]),
            "  What about alpha?  ",
            10_000,
        )
        .expect("should assemble");

    assert!(assembled.prompt.starts_with("Use the notes.\n\nContext:\n"));
    assert!(assembled.prompt.contains("[Source: a.txt, chunks 0-0]\nAlpha facts."));
    assert!(
        assembled
            .prompt
            .ends_with("Question:\nWhat about alpha?\n\nAnswer:")
    );
    assert_eq!(assembled.trimmed_blocks, 0);
    assert_eq!(assembled.sources.len(), 1);
    assert_eq!(assembled.sources[0].sequence, 0..=0);
    assert_eq!(assembled.sources[0].matched, 1);
}

#[test]
fn blocks_keep_context_order() {
    let assembled = PromptAssembler::default()
        .assemble(
            &context(vec![
                simple_block("second", "Ranked first."),
                simple_block("first", "Ranked second."),
            ]),
            "order?",
            10_000,
        )
        .expect("should assemble");

    let first = assembled.prompt.find("Ranked first.").expect("present");
    let second = assembled.prompt.find("Ranked second.").expect("present");
    assert!(first < second);
    assert!(assembled.prompt.contains(BLOCK_SEPARATOR));
    let ids: Vec<&str> = assembled
        .sources
        .iter()
        .map(|s| s.document_id.as_str())
        .collect();
    assert_eq!(ids, vec!["second", "first"]);
}

#[test]
fn over_budget_trims_whole_blocks_from_the_end() {
    let assembler = PromptAssembler::default();
    let set = context(vec![
        simple_block("a", &"alpha ".repeat(40)),
        simple_block("b", &"bravo ".repeat(40)),
        simple_block("c", &"charlie ".repeat(40)),
    ]);
    let full = assembler
        .assemble(&set, "question", 100_000)
        .expect("should assemble");
    let full_chars = full.prompt.chars().count();

    let budget = full_chars - 1;
    let trimmed = assembler
        .assemble(&set, "question", budget)
        .expect("should assemble within budget");

    assert!(trimmed.prompt.chars().count() <= budget);
    assert_eq!(trimmed.trimmed_blocks, 1);
    assert_eq!(trimmed.sources.len(), 2);
    assert!(trimmed.prompt.contains(TRUNCATION_MARKER));
    assert!(!trimmed.prompt.contains("charlie"));
    // Kept blocks are intact
    assert!(trimmed.prompt.contains(&"bravo ".repeat(40).trim().to_string()));
}

#[test]
fn exact_fit_keeps_every_block() {
    let assembler = PromptAssembler::default();
    let set = context(vec![
        simple_block("a", &"alpha ".repeat(20)),
        simple_block("b", "Yes."),
    ]);
    let full = assembler
        .assemble(&set, "question", 100_000)
        .expect("should assemble");
    let full_chars = full.prompt.chars().count();
    // The tail block is much smaller than the truncation marker
    assert!(TRUNCATION_MARKER.chars().count() > 40);

    let exact = assembler
        .assemble(&set, "question", full_chars)
        .expect("an untrimmed prompt that fits must be accepted");

    assert_eq!(exact.prompt, full.prompt);
    assert_eq!(exact.trimmed_blocks, 0);
    assert_eq!(exact.sources.len(), 2);
    assert!(!exact.prompt.contains(TRUNCATION_MARKER));
}

#[test]
fn budget_is_never_exceeded() {
    let assembler = PromptAssembler::default();
    let set = context(vec![
        simple_block("a", &"one ".repeat(30)),
        simple_block("b", &"two ".repeat(30)),
        simple_block("c", &"three ".repeat(30)),
        simple_block("d", &"four ".repeat(30)),
    ]);

    for budget in (300..1200).step_by(37) {
        match assembler.assemble(&set, "q", budget) {
            Ok(assembled) => {
                assert!(assembled.prompt.chars().count() <= budget);
                assert_eq!(assembled.sources.len() + assembled.trimmed_blocks, 4);
            }
            Err(RagError::BudgetExhausted { required, .. }) => assert!(required > budget),
            Err(other) => panic!("unexpected error {other:?}"),
        }
    }
}

#[test]
fn block_that_cannot_fit_exhausts_budget() {
    let set = context(vec![simple_block("a", &"long text ".repeat(50))]);

    let result = PromptAssembler::default().assemble(&set, "question", 200);

    match result {
        Err(RagError::BudgetExhausted { budget, required }) => {
            assert_eq!(budget, 200);
            assert!(required > 200);
        }
        other => panic!("expected BudgetExhausted, got {other:?}"),
    }
}

#[test]
fn empty_context_is_an_error() {
    let result = PromptAssembler::default().assemble(&ContextSet::default(), "question", 1000);
    assert!(matches!(result, Err(RagError::EmptyContext)));
}

#[test]
fn invalid_inputs_are_rejected() {
    let set = context(vec![simple_block("a", "text")]);
    let assembler = PromptAssembler::default();

    assert!(matches!(
        assembler.assemble(&set, " ", 1000),
        Err(RagError::Validation(_))
    ));
    assert!(matches!(
        assembler.assemble(&set, "question", 0),
        Err(RagError::Validation(_))
    ));
}

#[test]
fn expanded_blocks_render_without_repeated_overlap() {
    let text = "Sentence one is here. Sentence two follows. Sentence three ends it.";
    let chunks = overlapping_chunks("doc", text, 30, 8);
    let count = u32::try_from(chunks.len()).expect("small");
    let set = context(vec![block("doc", "notes.md", chunks, &[1])]);

    let assembled = PromptAssembler::default()
        .assemble(&set, "question", 10_000)
        .expect("should assemble");

    assert!(assembled.prompt.contains(text));
    assert_eq!(assembled.sources[0].sequence, 0..=count - 1);
    assert_eq!(assembled.sources[0].matched, 1);
}
