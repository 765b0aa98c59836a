//! Allowlist enforcement for the Telegram adapter (spec.md §6: numeric
//! Telegram user ids only — no wildcard or username matching).
//!
//! Deny-by-default: an empty allowlist means no one is allowed.

/// Returns `true` when `user_id` appears in the configured allowlist.
pub fn is_allowed(allowlist: &[i64], user_id: i64) -> bool {
    !allowlist.is_empty() && allowlist.contains(&user_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_list_denies_all() {
        assert!(!is_allowed(&[], 111));
    }

    #[test]
    fn matches_listed_numeric_id() {
        let list = vec![111, 222];
        assert!(is_allowed(&list, 111));
        assert!(is_allowed(&list, 222));
        assert!(!is_allowed(&list, 333));
    }
}
