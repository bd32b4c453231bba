//! Map-reduce description summariser. Collapses a list of per-chunk entity
//! or relation descriptions into a single string, calling the LLM only when
//! the token budget or description count demands it.

use common::collaborators::llm::DescriptionKind;
use common::collaborators::LlmClient;
use common::domain::SEP;
use common::error::AppError;

use crate::tokenizer;

#[derive(Debug, Clone, Copy)]
pub struct DescriptionMergeConfig {
    pub summary_context_size: usize,
    pub summary_max_tokens: usize,
    pub force_llm_summary_on_merge: usize,
    pub summary_length_recommended: usize,
}

/// Merges `descriptions` into one string. Returns whether the LLM was
/// invoked at least once, so callers that need to distinguish a verbatim
/// join from a summarised result can do so.
pub async fn merge_descriptions(
    llm: &dyn LlmClient,
    kind: DescriptionKind,
    name: &str,
    mut descriptions: Vec<String>,
    cfg: DescriptionMergeConfig,
) -> Result<(String, bool), AppError> {
    if descriptions.is_empty() {
        return Ok((String::new(), false));
    }
    if descriptions.len() == 1 {
        return Ok((descriptions.remove(0), false));
    }

    let mut llm_was_used = false;
    loop {
        let total_tokens = total_tokens(&descriptions)?;

        if total_tokens <= cfg.summary_context_size || descriptions.len() <= 2 {
            if descriptions.len() < cfg.force_llm_summary_on_merge && total_tokens < cfg.summary_max_tokens {
                return Ok((descriptions.join(SEP), llm_was_used));
            }
            let merged = llm
                .summarise(kind, name, &descriptions, cfg.summary_length_recommended)
                .await?;
            return Ok((merged, true));
        }

        let packed = pack_into_budget(&descriptions, cfg.summary_context_size)?;
        let mut next_round = Vec::with_capacity(packed.len());
        for group in packed {
            if group.len() == 1 {
                next_round.extend(group);
            } else {
                let summary = llm
                    .summarise(kind, name, &group, cfg.summary_length_recommended)
                    .await?;
                llm_was_used = true;
                next_round.push(summary);
            }
        }
        descriptions = next_round;
    }
}

fn total_tokens(descriptions: &[String]) -> Result<usize, AppError> {
    descriptions
        .iter()
        .try_fold(0usize, |acc, d| Ok(acc + tokenizer::count_tokens(d)?))
}

/// Greedily packs `descriptions` into groups each bounded by `budget`
/// tokens. Every group holds at least 2 descriptions unless a single
/// description alone already exceeds the budget, in which case it stands
/// alone; a buffer holding exactly one (budget-fitting) description is
/// force-packed with the next description even if that overflows the
/// budget, to avoid emitting a singleton group.
fn pack_into_budget(descriptions: &[String], budget: usize) -> Result<Vec<Vec<String>>, AppError> {
    let mut chunks = Vec::new();
    let mut buffer: Vec<String> = Vec::new();
    let mut buffer_tokens = 0usize;

    for d in descriptions {
        let dt = tokenizer::count_tokens(d)?;

        if buffer.is_empty() {
            buffer.push(d.clone());
            buffer_tokens = dt;
            continue;
        }

        if buffer.len() == 1 && buffer_tokens > budget {
            tracing::warn!(tokens = buffer_tokens, budget, "description alone exceeds summary budget");
            chunks.push(std::mem::take(&mut buffer));
            buffer.push(d.clone());
            buffer_tokens = dt;
            continue;
        }

        if buffer_tokens.saturating_add(dt) <= budget {
            buffer.push(d.clone());
            buffer_tokens += dt;
        } else if buffer.len() == 1 {
            buffer.push(d.clone());
            buffer_tokens += dt;
            chunks.push(std::mem::take(&mut buffer));
            buffer_tokens = 0;
        } else {
            chunks.push(std::mem::take(&mut buffer));
            buffer.push(d.clone());
            buffer_tokens = dt;
        }
    }
    if !buffer.is_empty() {
        if buffer.len() == 1 && buffer_tokens > budget {
            tracing::warn!(tokens = buffer_tokens, budget, "description alone exceeds summary budget");
        }
        chunks.push(buffer);
    }

    Ok(chunks)
}
