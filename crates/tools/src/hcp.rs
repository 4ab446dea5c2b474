//! Static HCP directory
//!
//! Fallback name-to-id table used when the warehouse is unreachable or has
//! no match. Declaration order is the tie-break for substring matches.

/// Known HCPs in declaration order
pub const HCP_NAME_TO_ID: &[(&str, &str)] = &[
    ("Dr. William Harper", "0013K000013ez2RQAQ"),
    ("Dr. Susan Carter", "0013K000013ez2SQAQ"),
    ("Dr. James Lawson", "0013K000013ez2TQAQ"),
    ("Dr. Emily Hughes", "0013K000013ez2UQAQ"),
    ("Dr. Richard Thompson", "0013K000013ez2VQAQ"),
    ("Dr. Sarah Phillips", "0013K000013ez2WQAQ"),
    ("Dr. John Anderson", "0013K000013ez2XQAQ"),
    ("Dr. Lisa Collins", "0013K000013ez2YQAQ"),
    ("Dr. David Harris", "0013K000013ez2ZQAQ"),
    ("Dr. Amy Scott", "0013K000013ez2aQAA"),
    ("Dr. Olivia Wells", "0013K000013ez2bQAA"),
    ("Dr. Benjamin Stone", "0013K000013ez2cQAA"),
    ("Dr. Grace Mitchell", "0013K000013ez2dQAA"),
    ("Dr. Lucas Chang", "0013K000013ez2eQAA"),
    ("Dr. Sophia Patel", "0013K000013ez2fQAA"),
    ("Dr. Nathan Rivera", "0013K000013ez2gQAA"),
];

/// Look up an HCP id by name: case-insensitive exact match first, then
/// substring containment in either direction.
pub fn lookup_hcp_id(name: &str) -> Option<&'static str> {
    let needle = name.trim().to_lowercase();
    if needle.is_empty() {
        return None;
    }

    for (known, id) in HCP_NAME_TO_ID {
        if known.to_lowercase() == needle {
            tracing::info!(name, id, "Exact match in static HCP table");
            return Some(id);
        }
    }

    for (known, id) in HCP_NAME_TO_ID {
        let known_lower = known.to_lowercase();
        if known_lower.contains(&needle) || needle.contains(&known_lower) {
            tracing::info!(name, matched = known, id, "Partial match in static HCP table");
            return Some(id);
        }
    }

    tracing::warn!(name, "No HCP id found in static table");
    None
}

/// Resolve the canonical full name for a (possibly partial) name
pub fn full_hcp_name(name: &str) -> Option<&'static str> {
    let needle = name.trim().to_lowercase();
    if needle.is_empty() {
        return None;
    }

    for (known, _) in HCP_NAME_TO_ID {
        if known.to_lowercase() == needle {
            return Some(known);
        }
    }
    for (known, _) in HCP_NAME_TO_ID {
        let known_lower = known.to_lowercase();
        if known_lower.contains(&needle) || needle.contains(&known_lower) {
            return Some(known);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_is_case_insensitive() {
        assert_eq!(lookup_hcp_id("dr. susan carter"), Some("0013K000013ez2SQAQ"));
        assert_eq!(lookup_hcp_id("DR. WILLIAM HARPER"), Some("0013K000013ez2RQAQ"));
    }

    #[test]
    fn partial_match_in_either_direction() {
        // Input contained in a known name
        assert_eq!(lookup_hcp_id("Susan Carter"), Some("0013K000013ez2SQAQ"));
        // Known name contained in the input
        assert_eq!(lookup_hcp_id("Dr. Lucas Chang, MD"), Some("0013K000013ez2eQAA"));
    }

    #[test]
    fn unknown_name_returns_none() {
        assert_eq!(lookup_hcp_id("Dr. Nobody"), None);
        assert_eq!(lookup_hcp_id(""), None);
    }

    #[test]
    fn full_name_resolves_from_partial() {
        assert_eq!(full_hcp_name("grace mitchell"), Some("Dr. Grace Mitchell"));
        assert_eq!(full_hcp_name("Dr. Nobody"), None);
    }
}
