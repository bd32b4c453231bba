//! FIFO/KEEP windowing of chunk-id (and file-path) lists, shared by the
//! entity and relation mergers. FIFO keeps the newest entries (the tail of
//! the insertion-ordered list); KEEP keeps the oldest (the head).

use common::config::SourceIdsLimitMethod;
use common::domain::TruncationMarker;

/// The bounded view of an unlimited, insertion-order-preserved id list that
/// is actually written to the graph as `source_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimitedWindow {
    pub kept: Vec<String>,
    pub truncate: TruncationMarker,
}

/// Applies `method` to `all_ids`, keeping at most `max` entries.
pub fn apply_limit(all_ids: &[String], max: usize, method: &SourceIdsLimitMethod) -> LimitedWindow {
    let total = all_ids.len();
    if max == 0 || total <= max {
        return LimitedWindow {
            kept: all_ids.to_vec(),
            truncate: TruncationMarker::None,
        };
    }

    match method {
        SourceIdsLimitMethod::Fifo => LimitedWindow {
            kept: all_ids[total - max..].to_vec(),
            truncate: TruncationMarker::Fifo { kept: max, total },
        },
        SourceIdsLimitMethod::Keep => LimitedWindow {
            kept: all_ids[..max].to_vec(),
            truncate: TruncationMarker::KeepOld,
        },
    }
}

const TRUNCATED_FIFO_MARKER: &str = "...truncated...(FIFO)";
const TRUNCATED_KEEP_MARKER: &str = "...truncated...(KEEP Old)";

/// Same windowing policy applied to a `file_path` list, appending a marker
/// entry in place of the dropped tail/head when truncation occurs.
pub fn apply_limit_with_marker(
    all_paths: &[String],
    max: usize,
    method: &SourceIdsLimitMethod,
) -> Vec<String> {
    if max == 0 || all_paths.len() <= max {
        return all_paths.to_vec();
    }

    let marker = match method {
        SourceIdsLimitMethod::Fifo => TRUNCATED_FIFO_MARKER,
        SourceIdsLimitMethod::Keep => TRUNCATED_KEEP_MARKER,
    };

    // Reserve one slot for the marker entry itself.
    let keep_count = max.saturating_sub(1);
    let mut kept = match method {
        SourceIdsLimitMethod::Fifo => all_paths[all_paths.len() - keep_count..].to_vec(),
        SourceIdsLimitMethod::Keep => all_paths[..keep_count].to_vec(),
    };
    match method {
        SourceIdsLimitMethod::Fifo => kept.insert(0, marker.to_string()),
        SourceIdsLimitMethod::Keep => kept.push(marker.to_string()),
    }
    kept
}
