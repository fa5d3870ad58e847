/// Check whether `topic` is covered by the subscription `filter`
///
/// `+` matches exactly one level at any position. `#` matches the rest of
/// the topic including the parent level itself, so `a/#` covers `a`.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Whether a filter is well formed (`#` only as the last level, wildcards
/// never mixed into a level)
pub fn is_valid_filter(filter: &str) -> bool {
    if filter.is_empty() {
        return false;
    }
    let levels: Vec<&str> = filter.split('/').collect();
    levels.iter().enumerate().all(|(i, level)| match *level {
        "#" => i == levels.len() - 1,
        "+" => true,
        other => !other.contains('#') && !other.contains('+'),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        assert!(topic_matches("zb2m/lamp", "zb2m/lamp"));
        assert!(!topic_matches("zb2m/lamp", "zb2m/lamp2"));
        assert!(!topic_matches("zb2m/lamp", "zb2m/lamp/set"));
        assert!(!topic_matches("zb2m/lamp/set", "zb2m/lamp"));
    }

    #[test]
    fn test_multi_level_wildcard() {
        assert!(topic_matches("a/b/#", "a/b"));
        assert!(topic_matches("a/b/#", "a/b/c"));
        assert!(topic_matches("a/b/#", "a/b/c/d"));
        assert!(!topic_matches("a/b/#", "a/x/c"));
        assert!(topic_matches("#", "anything/at/all"));
    }

    #[test]
    fn test_single_level_wildcard() {
        assert!(topic_matches("a/+/c", "a/x/c"));
        assert!(!topic_matches("a/+/c", "a/x/y/c"));
        assert!(!topic_matches("a/+/c", "a/c"));
        assert!(topic_matches("zb2m-sumika/+", "zb2m-sumika/hall_light"));
        assert!(!topic_matches("zb2m-sumika/+", "zb2m-sumika/bridge/devices"));
        assert!(topic_matches("+/+/#", "a/b"));
    }

    #[test]
    fn test_filter_validation() {
        assert!(is_valid_filter("a/+/c"));
        assert!(is_valid_filter("a/b/#"));
        assert!(!is_valid_filter("a/#/c"));
        assert!(!is_valid_filter("a/b+"));
        assert!(!is_valid_filter(""));
    }
}
