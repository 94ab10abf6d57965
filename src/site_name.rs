// src/site_name.rs
//
// Tenant hostname normalization. The normalized name is the permanent
// correlation key between transactions and site snapshots: it is computed
// once at transaction creation and persisted, never re-derived. Changing
// these rules breaks correlation for historical rows.

/// Normalize a requested site name into a canonical tenant hostname:
/// lowercase, whitespace removed, any existing dotted suffix stripped,
/// the configured tenant domain appended.
pub fn normalize(raw: &str, domain: &str) -> String {
    let site_name: String = raw
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();

    if site_name.ends_with(domain) {
        return site_name;
    }

    // Everything after the first dot is treated as a TLD-ish suffix.
    let base = site_name.split('.').next().unwrap_or("");
    if base.is_empty() {
        return format!("{site_name}{domain}");
    }

    format!("{base}{domain}")
}

/// Validate an already-normalized site name: total length in [3, 63], the
/// leading label is `[a-z0-9][a-z0-9-]*[a-z0-9]`, and the suffix is exactly
/// the configured tenant domain.
pub fn validate(site_name: &str, domain: &str) -> bool {
    if site_name.is_empty() {
        return false;
    }
    if site_name.len() < 3 || site_name.len() > 63 {
        return false;
    }
    if !site_name.ends_with(domain) {
        return false;
    }

    valid_label(&site_name[..site_name.len() - domain.len()])
}

fn valid_label(label: &str) -> bool {
    let bytes = label.as_bytes();
    let Some((&first, rest)) = bytes.split_first() else {
        return false;
    };
    // Single-character labels fail the first/last requirement.
    let Some((&last, middle)) = rest.split_last() else {
        return false;
    };

    let alnum = |c: u8| c.is_ascii_lowercase() || c.is_ascii_digit();
    alnum(first) && alnum(last) && middle.iter().all(|&c| alnum(c) || c == b'-')
}
