//! MD5 content-hashed ids, retained verbatim (per the design notes) for
//! interoperability with persisted state produced by non-Rust deployments.

const SEP_BYTE: u8 = b'\n';

fn md5_hex(bytes: &[u8]) -> String {
    format!("{:x}", md5::compute(bytes))
}

fn hash_id(prefix: &str, parts: &[&str]) -> String {
    let mut buf = Vec::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            buf.push(SEP_BYTE);
        }
        buf.extend_from_slice(part.as_bytes());
    }
    format!("{prefix}{}", md5_hex(&buf))
}

pub fn doc_id(content: &str) -> String {
    hash_id("doc-", &[content])
}

pub fn chunk_id(content: &str) -> String {
    hash_id("chunk-", &[content])
}

pub fn entity_id(name: &str) -> String {
    hash_id("ent-", &[name])
}

pub fn relation_id(source: &str, target: &str) -> String {
    let (a, b) = sorted_pair(source, target);
    hash_id("rel-", &[a, b])
}

pub fn task_id(doc_id: &str, content: &str, now_nanos: i64) -> String {
    hash_id("task-", &[doc_id, content, &now_nanos.to_string()])
}

/// Canonical ordering used as the merge key for an undirected relation pair.
pub fn sorted_pair<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}
