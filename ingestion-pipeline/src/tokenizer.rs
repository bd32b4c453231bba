//! Deterministic, stateless text <-> token-id bijection used by the chunker
//! and by every token-budget check in the merge engine. Backed by
//! `tiktoken-rs`'s bundled `cl100k_base` ranks so token counts are stable
//! across calls without a network fetch at startup (the teacher's own
//! `text-splitter` tokenizer needed `Tokenizer::from_pretrained`, which
//! requires network access; `tiktoken-rs` ships its BPE ranks in the
//! binary, which is a better fit for a deterministic, offline-testable
//! core).

use std::sync::OnceLock;

use common::error::AppError;
use tiktoken_rs::CoreBPE;

fn bpe() -> Result<&'static CoreBPE, AppError> {
    static BPE: OnceLock<Result<CoreBPE, String>> = OnceLock::new();
    match BPE.get_or_init(|| tiktoken_rs::cl100k_base().map_err(|e| e.to_string())) {
        Ok(bpe) => Ok(bpe),
        Err(err) => Err(AppError::InternalError(format!(
            "failed to initialize tokenizer: {err}"
        ))),
    }
}

/// Encodes `text` into a sequence of token ids. Empty input yields an empty
/// list.
pub fn encode(text: &str) -> Result<Vec<usize>, AppError> {
    if text.is_empty() {
        return Ok(Vec::new());
    }
    Ok(bpe()?.encode_with_special_tokens(text))
}

/// Decodes a token-id sequence back into text. `decode(encode(x.trim()))`
/// need not equal `x` byte-for-byte, but token counts are stable.
pub fn decode(tokens: &[usize]) -> Result<String, AppError> {
    if tokens.is_empty() {
        return Ok(String::new());
    }
    bpe()?
        .decode(tokens.to_vec())
        .map_err(|e| AppError::InternalError(format!("failed to decode tokens: {e}")))
}

pub fn count_tokens(text: &str) -> Result<usize, AppError> {
    Ok(encode(text)?.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_yields_empty_token_list() {
        assert_eq!(encode("").unwrap(), Vec::<usize>::new());
        assert_eq!(count_tokens("").unwrap(), 0);
    }

    #[test]
    fn token_counts_are_stable_across_calls() {
        let text = "ALPHA introduces BETA. BETA extends ALPHA.";
        let a = count_tokens(text).unwrap();
        let b = count_tokens(text).unwrap();
        assert_eq!(a, b);
        assert!(a > 0);
    }

    #[test]
    fn decode_of_encode_preserves_token_count() {
        let text = "the quick brown fox jumps over the lazy dog";
        let tokens = encode(text).unwrap();
        let decoded = decode(&tokens).unwrap();
        assert_eq!(encode(&decoded).unwrap().len(), tokens.len());
    }
}
