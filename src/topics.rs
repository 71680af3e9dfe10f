//! Topic helpers for probe traffic
//!
//! Every probe works on a fresh random topic so that concurrent users of the
//! broker (and earlier probe runs) cannot interfere. This module also holds the
//! MQTT topic-filter matching rules, used by the session layer to dispatch
//! deliveries and by the in-memory test broker.

use uuid::Uuid;

/// Byte used to build oversized payloads, topics and client identifiers
pub const FILLER_BYTE: u8 = b'a';

/// Prefix of MQTT 5 shared subscription filters
pub const SHARED_PREFIX: &str = "$share/";

/// Build a string of `len` filler bytes
pub fn filled(len: usize) -> String {
    char::from(FILLER_BYTE).to_string().repeat(len)
}

/// Generate a random topic, truncated to `max_len` bytes when a limit is known
///
/// The topic is never shorter than one byte, since brokers reject empty topics.
pub fn random_topic(max_len: Option<usize>) -> String {
    let mut topic = Uuid::new_v4().simple().to_string();
    if let Some(max_len) = max_len {
        topic.truncate(max_len.max(1));
    }
    topic
}

/// Generate a random shared subscription group name
pub fn random_group() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Build a shared subscription filter: `$share/{group}/{filter}`
pub fn shared_filter(group: &str, filter: &str) -> String {
    format!("{SHARED_PREFIX}{group}/{filter}")
}

/// Split a shared subscription filter into `(group, filter)`
pub fn split_shared(filter: &str) -> Option<(&str, &str)> {
    filter.strip_prefix(SHARED_PREFIX)?.split_once('/')
}

/// Check whether `topic` matches the subscription `filter`
///
/// Supports `+` (single level) and `#` (multi level, also matching the parent
/// level). Shared filters are matched on their inner filter. Topics starting
/// with `$` never match a leading wildcard.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let filter = split_shared(filter).map_or(filter, |(_, inner)| inner);

    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');
    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn random_topic_respects_limit(max_len in 0usize..64) {
            let topic = random_topic(Some(max_len));
            prop_assert!(topic.len() <= max_len.max(1));
            prop_assert!(!topic.is_empty());
        }

        #[test]
        fn exact_topic_matches_itself(topic in "[a-z0-9]{1,8}(/[a-z0-9]{1,8}){0,4}") {
            prop_assert!(topic_matches(&topic, &topic));
        }

        #[test]
        fn multi_level_wildcard_matches_any_suffix(
            prefix in "[a-z0-9]{1,8}",
            suffix in "[a-z0-9]{1,8}(/[a-z0-9]{1,8}){0,4}"
        ) {
            let filter = format!("{prefix}/#");
            let topic = format!("{prefix}/{suffix}");
            prop_assert!(topic_matches(&filter, &topic));
        }
    }

    #[test]
    fn test_filled() {
        assert_eq!(filled(0), "");
        assert_eq!(filled(3), "aaa");
        assert_eq!(filled(1024).len(), 1024);
    }

    #[test]
    fn test_random_topic_unbounded() {
        let topic = random_topic(None);
        assert_eq!(topic.len(), 32);
        assert_ne!(topic, random_topic(None));
    }

    #[test]
    fn test_random_topic_zero_limit_keeps_one_byte() {
        assert_eq!(random_topic(Some(0)).len(), 1);
    }

    #[test]
    fn test_shared_filter_round_trip() {
        let filter = shared_filter("group1", "a/b");
        assert_eq!(filter, "$share/group1/a/b");
        assert_eq!(split_shared(&filter), Some(("group1", "a/b")));
        assert_eq!(split_shared("a/b"), None);
    }

    #[test]
    fn test_single_level_wildcard() {
        assert!(topic_matches("root/+", "root/test"));
        assert!(!topic_matches("root/+", "root/test/subtopic"));
        assert!(!topic_matches("root/+", "root"));
        assert!(topic_matches("+/+", "a/b"));
    }

    #[test]
    fn test_multi_level_wildcard() {
        assert!(topic_matches("root/#", "root/test/subtopic"));
        assert!(topic_matches("root/#", "root"));
        assert!(topic_matches("#", "anything/at/all"));
        assert!(!topic_matches("other/#", "root/test"));
    }

    #[test]
    fn test_dollar_topics_skip_leading_wildcards() {
        assert!(!topic_matches("#", "$SYS/broker/uptime"));
        assert!(!topic_matches("+/broker/uptime", "$SYS/broker/uptime"));
        assert!(topic_matches("$SYS/#", "$SYS/broker/uptime"));
    }

    #[test]
    fn test_shared_filter_matches_inner_topic() {
        let filter = shared_filter("g", "sensors/+");
        assert!(topic_matches(&filter, "sensors/temp"));
        assert!(!topic_matches(&filter, "other/temp"));
    }
}
