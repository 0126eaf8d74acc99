//! Token-budgeted semantic splitting of input documents.
//!
//! - Budget: every chunk stays within `TEXT_SPLITTER_CHUNK_SIZE` tokens so a single model call
//!   never overflows the context window.
//! - Overlap: `TEXT_SPLITTER_CHUNK_OVERLAP` prepends the tail of the previous chunk so sentences
//!   cut at a boundary stay visible to the model.
//! - Token counting: `tiktoken-rs` for known models and encodings; unknown names fall back to
//!   `cl100k_base`.

use crate::config::PipelineSettings;
use anyhow::Error as TokenizerError;
use semchunk_rs::Chunker;
use std::sync::Arc;
use tiktoken_rs::{
    CoreBPE, cl100k_base, get_bpe_from_model, o200k_base, p50k_base, p50k_edit, r50k_base,
};

use super::types::{Chunk, InputError};

type TokenCounter = Arc<dyn Fn(&str) -> usize + Send + Sync>;

/// Split `text` into ordered chunks belonging to `job_id`.
///
/// Whitespace-only input is an [`InputError::Empty`]: a job needs at least one chunk.
pub fn split_into_chunks(
    job_id: &str,
    text: &str,
    settings: &PipelineSettings,
) -> Result<Vec<Chunk>, InputError> {
    let segments = chunk_text(
        text,
        settings.chunk_size,
        settings.chunk_overlap,
        &settings.tokenizer_model,
    )?;
    let chunks: Vec<Chunk> = segments
        .into_iter()
        .filter(|segment| !segment.trim().is_empty())
        .enumerate()
        .map(|(sequence_index, text)| Chunk {
            sequence_index,
            text,
            parent_job_id: job_id.to_string(),
        })
        .collect();

    if chunks.is_empty() {
        return Err(InputError::Empty);
    }
    Ok(chunks)
}

/// Chunk text into semantic segments no larger than `chunk_size` tokens.
pub(crate) fn chunk_text(
    text: &str,
    chunk_size: usize,
    overlap: usize,
    tokenizer_model: &str,
) -> Result<Vec<String>, InputError> {
    if chunk_size == 0 {
        return Err(InputError::InvalidChunkSize);
    }
    if text.trim().is_empty() {
        return Err(InputError::Empty);
    }

    let token_counter = build_tiktoken_counter(tokenizer_model)?;
    Ok(chunk_text_with_counter(
        text,
        chunk_size,
        overlap,
        token_counter,
    ))
}

fn build_tiktoken_counter(model: &str) -> Result<TokenCounter, InputError> {
    let normalized = model.trim();
    let target = if normalized.is_empty() {
        "cl100k_base"
    } else {
        normalized
    };
    let encoding = resolve_encoding(target).map_err(|source| InputError::Tokenizer {
        model: target.to_string(),
        source,
    })?;
    let encoding = Arc::new(encoding);

    Ok(Arc::new(move |segment: &str| {
        encoding.encode_ordinary(segment).len()
    }))
}

fn resolve_encoding(model: &str) -> Result<CoreBPE, TokenizerError> {
    match get_bpe_from_model(model) {
        Ok(encoding) => Ok(encoding),
        Err(model_err) => {
            tracing::debug!(
                model,
                error = %model_err,
                "Tokenizer model lookup failed; trying encoding name"
            );
            if let Some(candidate) = encoding_from_name(model) {
                candidate
            } else {
                tracing::warn!(
                    model,
                    "Falling back to 'cl100k_base' encoding for token counting"
                );
                cl100k_base()
            }
        }
    }
}

fn encoding_from_name(name: &str) -> Option<Result<CoreBPE, TokenizerError>> {
    match name {
        "cl100k_base" => Some(cl100k_base()),
        "o200k_base" => Some(o200k_base()),
        "p50k_base" => Some(p50k_base()),
        "p50k_edit" => Some(p50k_edit()),
        "r50k_base" | "gpt2" => Some(r50k_base()),
        _ => None,
    }
}

#[cfg(test)]
fn whitespace_token_counter() -> TokenCounter {
    Arc::new(|segment: &str| {
        let tokens = segment.split_whitespace().count();
        if tokens == 0 && !segment.is_empty() {
            1
        } else {
            tokens
        }
    })
}

fn chunk_text_with_counter(
    text: &str,
    chunk_size: usize,
    overlap: usize,
    token_counter: TokenCounter,
) -> Vec<String> {
    let counter_for_chunker = token_counter.clone();
    let chunker = Chunker::new(
        chunk_size,
        Box::new(move |segment: &str| counter_for_chunker.as_ref()(segment)),
    );
    let base_chunks = chunker.chunk(text);
    apply_overlap(base_chunks, chunk_size, overlap, &token_counter)
}

/// Prefix each chunk with up to `overlap` tokens from the end of its predecessor, trimming the
/// front so the result still fits `chunk_size`.
fn apply_overlap(
    chunks: Vec<String>,
    chunk_size: usize,
    overlap: usize,
    token_counter: &TokenCounter,
) -> Vec<String> {
    let effective_overlap = overlap.min(chunk_size.saturating_sub(1));
    if effective_overlap == 0 || chunks.len() < 2 {
        return chunks;
    }

    let mut overlapped = Vec::with_capacity(chunks.len());
    let mut previous: Option<String> = None;

    for current in chunks {
        let next = match &previous {
            Some(prior) => build_overlapped_chunk(
                prior,
                &current,
                effective_overlap,
                chunk_size,
                token_counter,
            ),
            None => current.clone(),
        };
        overlapped.push(next);
        previous = Some(current);
    }

    overlapped
}

fn build_overlapped_chunk(
    previous: &str,
    current: &str,
    overlap: usize,
    chunk_size: usize,
    token_counter: &TokenCounter,
) -> String {
    let tail = suffix_within_budget(previous, overlap, token_counter);
    let mut combined = String::with_capacity(tail.len() + current.len() + 1);

    if !tail.is_empty() {
        combined.push_str(tail);
        let tail_ends_blank = tail.chars().next_back().is_some_and(char::is_whitespace);
        let current_starts_blank = current.chars().next().is_some_and(char::is_whitespace);
        if !tail_ends_blank && !current_starts_blank {
            combined.push(' ');
        }
    }

    combined.push_str(current);
    suffix_within_budget(&combined, chunk_size, token_counter).to_string()
}

/// Longest trimmed suffix of `text` whose token count fits `budget`.
fn suffix_within_budget<'a>(text: &'a str, budget: usize, token_counter: &TokenCounter) -> &'a str {
    if budget == 0 {
        return "";
    }

    let trimmed = text.trim_start();
    if token_counter.as_ref()(trimmed) <= budget {
        return trimmed;
    }

    for (offset, _) in text.char_indices().skip(1) {
        let candidate = text[offset..].trim_start();
        if token_counter.as_ref()(candidate) <= budget {
            return candidate;
        }
    }

    ""
}
