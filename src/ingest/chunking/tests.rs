use super::*;

fn config(max_size: usize, overlap: usize, boundary: BoundaryPolicy) -> ChunkingConfig {
    ChunkingConfig {
        max_size,
        overlap,
        boundary,
    }
}

fn sample_text() -> String {
    let mut text = String::new();
    for paragraph in 0..12 {
        for sentence in 0..4 {
            text.push_str(&format!(
                "Paragraph {} sentence {} talks about retrieval. ",
                paragraph, sentence
            ));
        }
        text.push_str("\n\n");
    }
    text
}

fn char_slice(text: &str, start: usize, end: usize) -> String {
    text.chars().skip(start).take(end - start).collect()
}

#[test]
fn estimate_token_count() {
    assert_eq!(super::estimate_token_count("hello world"), 2);
    assert_eq!(super::estimate_token_count("This is a test."), 5);
    assert_eq!(super::estimate_token_count(""), 0);
}

#[test]
fn empty_and_whitespace_yield_nothing() {
    let config = ChunkingConfig::default();
    assert!(chunk_text("", &config).expect("should chunk").is_empty());
    assert!(
        chunk_text("   \n\n\t  ", &config)
            .expect("should chunk")
            .is_empty()
    );
}

#[test]
fn short_text_is_one_chunk() {
    let chunks = chunk_text("  A short note.\n", &ChunkingConfig::default()).expect("should chunk");

    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].text, "A short note.");
    assert_eq!(chunks[0].sequence_index, 0);
    assert_eq!(chunks[0].char_start, 2);
    assert_eq!(chunks[0].char_end, 15);
}

#[test]
fn overlap_must_be_smaller_than_max_size() {
    let result = chunk_text("some text", &config(50, 50, BoundaryPolicy::Paragraph));
    assert!(matches!(result, Err(RagError::Validation(_))));

    let result = chunk_text("some text", &config(0, 0, BoundaryPolicy::Paragraph));
    assert!(matches!(result, Err(RagError::Validation(_))));
}

#[test]
fn sequence_indices_are_dense() {
    let chunks =
        chunk_text(&sample_text(), &config(200, 40, BoundaryPolicy::Paragraph)).expect("chunks");

    assert!(chunks.len() > 3);
    for (expected, chunk) in chunks.iter().enumerate() {
        assert_eq!(chunk.sequence_index as usize, expected);
    }
}

#[test]
fn chunks_are_exact_slices_within_max_size() {
    let text = sample_text();
    for boundary in [
        BoundaryPolicy::Paragraph,
        BoundaryPolicy::Sentence,
        BoundaryPolicy::Word,
        BoundaryPolicy::Fixed,
    ] {
        let chunks = chunk_text(&text, &config(150, 30, boundary)).expect("should chunk");
        for chunk in &chunks {
            assert!(chunk.char_end - chunk.char_start <= 150);
            assert_eq!(
                chunk.text,
                char_slice(&text, chunk.char_start, chunk.char_end)
            );
        }
    }
}

#[test]
fn adjacent_chunks_share_exact_overlap() {
    let text = sample_text();
    let overlap = 35;
    for boundary in [
        BoundaryPolicy::Paragraph,
        BoundaryPolicy::Sentence,
        BoundaryPolicy::Word,
        BoundaryPolicy::Fixed,
    ] {
        let chunks = chunk_text(&text, &config(180, overlap, boundary)).expect("should chunk");
        for pair in chunks.windows(2) {
            let tail: String = pair[0]
                .text
                .chars()
                .skip(pair[0].text.chars().count() - overlap)
                .collect();
            let head: String = pair[1].text.chars().take(overlap).collect();
            assert_eq!(tail, head);
            assert_eq!(pair[1].char_start, pair[0].char_end - overlap);
        }
    }
}

#[test]
fn zero_overlap_chunks_abut() {
    let text = sample_text();
    let chunks = chunk_text(&text, &config(120, 0, BoundaryPolicy::Sentence)).expect("chunks");

    for pair in chunks.windows(2) {
        assert_eq!(pair[1].char_start, pair[0].char_end);
    }
    let rebuilt: String = chunks.iter().map(|c| c.text.as_str()).collect();
    assert_eq!(rebuilt, text.trim());
}

#[test]
fn paragraph_breaks_are_preferred() {
    let text = format!("{}\n\n{}", "a".repeat(70), "b ".repeat(60));
    let chunks = chunk_text(&text, &config(100, 0, BoundaryPolicy::Paragraph)).expect("chunks");

    assert!(chunks[0].text.ends_with("\n\n"));
    assert!(chunks[0].text.chars().all(|c| c == 'a' || c == '\n'));
}

#[test]
fn sentence_boundaries_are_preferred_over_words() {
    let text = "One sentence here that runs long. Another sentence follows it and keeps going on and on.";
    let chunks = chunk_text(text, &config(60, 0, BoundaryPolicy::Sentence)).expect("chunks");

    assert_eq!(chunks[0].text, "One sentence here that runs long. ");
}

#[test]
fn hard_cut_without_boundaries() {
    let text = "x".repeat(250);
    let chunks = chunk_text(&text, &config(100, 10, BoundaryPolicy::Paragraph)).expect("chunks");

    let lengths: Vec<usize> = chunks.iter().map(|c| c.char_end - c.char_start).collect();
    assert_eq!(lengths, vec![100, 100, 70]);
    assert_eq!(chunks[1].char_start, 90);
    assert_eq!(chunks[2].char_start, 180);
}

#[test]
fn multibyte_text_is_split_on_char_boundaries() {
    let text = "ñandú café résumé ".repeat(30);
    let chunks = chunk_text(&text, &config(64, 8, BoundaryPolicy::Word)).expect("chunks");

    assert!(chunks.len() > 1);
    for chunk in &chunks {
        assert_eq!(
            chunk.text,
            char_slice(&text, chunk.char_start, chunk.char_end)
        );
    }
}

#[test]
fn chunking_is_deterministic() {
    let text = sample_text();
    let config = config(210, 50, BoundaryPolicy::Paragraph);

    let first = chunk_text(&text, &config).expect("chunks");
    let second = chunk_text(&text, &config).expect("chunks");

    assert_eq!(first, second);
}

#[test]
fn last_chunk_reaches_end_of_text() {
    let text = sample_text();
    let chunks = chunk_text(&text, &config(160, 20, BoundaryPolicy::Paragraph)).expect("chunks");

    let last = chunks.last().expect("at least one chunk");
    assert_eq!(last.char_end, text.trim_end().chars().count());
    assert_eq!(chunks[0].char_start, 0);
}
