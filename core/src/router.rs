//! Key grammar validation and exchange routing decisions.
//!
//! Keys are `.`-separated segments of ASCII letters, digits and `_`. The empty key is
//! accepted. Binding keys may additionally use whole-segment `*` (exactly one segment)
//! and `#` (zero or more segments).

use crate::model::{Binding, ExchangeType, Message};
use crate::{RelaymqError, Result};

fn is_word(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

fn check_key(key: &str, allow_wildcards: bool) -> bool {
    if key.is_empty() {
        return true;
    }
    // split() yields an empty segment for a leading/trailing `.` or for `..`
    key.split('.').all(|segment| {
        is_word(segment) || (allow_wildcards && (segment == "*" || segment == "#"))
    })
}

pub fn check_binding_key(key: &str) -> bool {
    check_key(key, true)
}

pub fn check_routing_key(key: &str) -> bool {
    check_key(key, false)
}

/// Decides whether `message` should follow `binding` on an exchange of the given type.
///
/// DIRECT exchanges never reach the router; asking for one is an error.
pub fn route(exchange_type: ExchangeType, binding: &Binding, message: &Message) -> Result<bool> {
    match exchange_type {
        ExchangeType::Fanout => Ok(true),
        ExchangeType::Topic => Ok(topic_matches(&binding.binding_key, message.routing_key())),
        ExchangeType::Direct => Err(RelaymqError::InvalidRoute(format!(
            "direct exchange routes by queue name, binding {} -> {}",
            binding.exchange_name, binding.queue_name
        ))),
    }
}

fn tokens(key: &str) -> Vec<&str> {
    if key.is_empty() {
        Vec::new()
    } else {
        key.split('.').collect()
    }
}

/// Segment-wise wildcard match of `routing_key` against `binding_key`.
///
/// `dp[i][j]` holds whether the first `i` routing tokens match the first `j` binding
/// tokens.
pub fn topic_matches(binding_key: &str, routing_key: &str) -> bool {
    let routing = tokens(routing_key);
    let binding = tokens(binding_key);
    let (m, n) = (routing.len(), binding.len());

    let mut dp = vec![vec![false; n + 1]; m + 1];
    dp[0][0] = true;
    for j in 1..=n {
        if binding[j - 1] != "#" {
            break;
        }
        dp[0][j] = true;
    }

    for i in 1..=m {
        for j in 1..=n {
            dp[i][j] = match binding[j - 1] {
                "#" => dp[i - 1][j] || dp[i][j - 1],
                "*" => dp[i - 1][j - 1],
                literal => dp[i - 1][j - 1] && literal == routing[i - 1],
            };
        }
    }

    dp[m][n]
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn binding(key: &str) -> Binding {
        Binding {
            exchange_name: "ex".to_string(),
            queue_name: "q".to_string(),
            binding_key: key.to_string(),
        }
    }

    #[test]
    fn test_routing_key_grammar() {
        assert!(check_routing_key(""));
        assert!(check_routing_key("aaa"));
        assert!(check_routing_key("aaa.bbb_1.CCC"));
        assert!(!check_routing_key(".aaa"));
        assert!(!check_routing_key("aaa."));
        assert!(!check_routing_key("aaa..bbb"));
        assert!(!check_routing_key("aaa.*"));
        assert!(!check_routing_key("aaa.#"));
        assert!(!check_routing_key("a-b"));
    }

    #[test]
    fn test_binding_key_grammar() {
        assert!(check_binding_key(""));
        assert!(check_binding_key("aaa.*.bbb"));
        assert!(check_binding_key("#"));
        assert!(check_binding_key("#.aaa.#"));
        assert!(!check_binding_key("foo*"));
        assert!(!check_binding_key("aaa.#b"));
        assert!(!check_binding_key("aaa..*"));
        assert!(!check_binding_key("*."));
    }

    #[test]
    fn test_topic_matching() {
        assert!(topic_matches("aaa.*.bbb", "aaa.ccc.bbb"));
        assert!(!topic_matches("aaa.*.bbb", "aaa.bbb"));
        assert!(!topic_matches("aaa.*.bbb", "aaa.ccc.ddd.bbb"));

        assert!(topic_matches("aaa.#", "aaa"));
        assert!(topic_matches("aaa.#", "aaa.b"));
        assert!(topic_matches("aaa.#", "aaa.b.c"));
        assert!(!topic_matches("aaa.#", "bbb.aaa"));

        assert!(topic_matches("#", ""));
        assert!(topic_matches("#", "a.b.c"));
        assert!(topic_matches("#.c", "a.b.c"));
        assert!(topic_matches("a.#.c", "a.c"));
        assert!(topic_matches("a.#.c", "a.x.y.c"));

        assert!(topic_matches("aaa", "aaa"));
        assert!(!topic_matches("aaa", "aab"));
        assert!(topic_matches("", ""));
        assert!(!topic_matches("*", ""));
    }

    #[test]
    fn test_route_by_exchange_type() {
        let message = Message::new("order.eu.created", None, "x");
        assert!(route(ExchangeType::Fanout, &binding("nothing.alike"), &message).unwrap());
        assert!(route(ExchangeType::Topic, &binding("order.*.created"), &message).unwrap());
        assert!(!route(ExchangeType::Topic, &binding("order.*"), &message).unwrap());
        assert!(matches!(
            route(ExchangeType::Direct, &binding("q"), &message),
            Err(RelaymqError::InvalidRoute(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_valid_keys_have_no_empty_or_partial_wildcard_segments(
            key in "[a-z_*#.]{0,16}"
        ) {
            if check_binding_key(&key) && !key.is_empty() {
                for segment in key.split('.') {
                    prop_assert!(!segment.is_empty());
                    if segment.contains('*') || segment.contains('#') {
                        prop_assert!(segment == "*" || segment == "#");
                    }
                }
            }
            if check_routing_key(&key) {
                prop_assert!(!key.contains('*') && !key.contains('#'));
            }
        }

        #[test]
        fn prop_hash_matches_any_routing_key(
            segments in proptest::collection::vec("[a-z0-9_]{1,6}", 0..6)
        ) {
            let key = segments.join(".");
            prop_assert!(check_routing_key(&key));
            prop_assert!(topic_matches("#", &key));
            prop_assert!(topic_matches(&key, &key));
        }
    }
}
