//! Civilization name sentinels.

/// Sentinel name for a civilization id missing from the seed table.
pub fn unknown_civ_name(raw: impl std::fmt::Display) -> String {
    format!("Unknown ({})", raw)
}

/// Whether a civilization name is a sentinel rather than a real name.
pub fn is_unknown_civ_name(name: &str) -> bool {
    name.is_empty() || name == "Unknown" || name.starts_with("Unknown (")
}

/// Name to store for a civilization dictionary row, or `None` to keep the
/// current one. A sentinel may be upgraded to a real name, never the reverse.
pub fn merge_civ_name(existing: &str, incoming: &str) -> Option<String> {
    let incoming = incoming.trim();
    if incoming.is_empty() || incoming == existing {
        return None;
    }
    if is_unknown_civ_name(existing) && !is_unknown_civ_name(incoming) {
        return Some(incoming.to_string());
    }
    None
}
