//! Fixed-size, non-overlapping context windows

use serde::{Deserialize, Serialize};

/// A contiguous slice of the context. Offsets are in characters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub start: usize,
    pub end: usize,
    pub text: String,
}

/// Stable zero-padded chunk id
pub fn chunk_id(index: usize) -> String {
    format!("c{index:04}")
}

/// Split `text` into windows of `chunk_chars` characters (at least 1).
///
/// Concatenating the chunk texts in order reproduces `text` exactly.
pub fn chunk_text(text: &str, chunk_chars: usize) -> Vec<Chunk> {
    let size = chunk_chars.max(1);
    let mut chunks = Vec::new();
    let mut start_byte = 0;
    let mut start_char = 0;
    let mut count = 0;

    let push = |chunks: &mut Vec<Chunk>, from: usize, to: usize, start: usize, len: usize| {
        chunks.push(Chunk {
            id: chunk_id(chunks.len()),
            start,
            end: start + len,
            text: text[from..to].to_string(),
        });
    };

    for (byte_idx, _) in text.char_indices() {
        if count == size {
            push(&mut chunks, start_byte, byte_idx, start_char, count);
            start_byte = byte_idx;
            start_char += count;
            count = 0;
        }
        count += 1;
    }
    if count > 0 {
        push(&mut chunks, start_byte, text.len(), start_char, count);
    }
    chunks
}
