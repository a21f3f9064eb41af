//! Credential Selector (C3, §4.3): picks the best enabled API key for a
//! Provider out of possibly several (weighted pool, preferred key, etc).

use crate::domain::ApiKey;

/// 1. filter to usable keys, 2. restrict to `is_preferred` if any qualify,
/// 3. sort by weight desc / id asc, 4. take the first.
pub fn select_best_key<'a>(keys: impl Iterator<Item = &'a ApiKey>) -> Option<ApiKey> {
    let mut usable: Vec<&ApiKey> = keys.filter(|k| k.is_usable()).collect();
    if usable.is_empty() {
        return None;
    }
    if usable.iter().any(|k| k.is_preferred) {
        usable.retain(|k| k.is_preferred);
    }
    usable.sort_by(|a, b| b.weight.cmp(&a.weight).then(a.id.cmp(&b.id)));
    usable.into_iter().next().cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(id: u64, weight: u32, preferred: bool, enabled: bool, quota: Option<u64>, used: u64) -> ApiKey {
        ApiKey {
            id,
            provider_id: 1,
            name: None,
            secret: format!("sk-{id}"),
            weight,
            is_preferred: preferred,
            is_enabled: enabled,
            daily_quota: quota,
            usage_count: used,
        }
    }

    #[test]
    fn prefers_preferred_key_even_with_lower_weight() {
        let keys = vec![key(1, 100, false, true, None, 0), key(2, 1, true, true, None, 0)];
        let best = select_best_key(keys.iter()).unwrap();
        assert_eq!(best.id, 2);
    }

    #[test]
    fn ties_break_on_id_ascending() {
        let keys = vec![key(2, 50, false, true, None, 0), key(1, 50, false, true, None, 0)];
        let best = select_best_key(keys.iter()).unwrap();
        assert_eq!(best.id, 1);
    }

    #[test]
    fn excludes_disabled_and_quota_exhausted() {
        let keys = vec![
            key(1, 100, false, false, None, 0),
            key(2, 90, false, true, Some(10), 10),
            key(3, 1, false, true, Some(10), 5),
        ];
        let best = select_best_key(keys.iter()).unwrap();
        assert_eq!(best.id, 3);
    }

    #[test]
    fn no_usable_keys_returns_none() {
        let keys = vec![key(1, 100, false, false, None, 0)];
        assert!(select_best_key(keys.iter()).is_none());
    }
}
