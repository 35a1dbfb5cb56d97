//! `${name}` placeholder expansion.
//!
//! Used for header, query, form and body values as well as attachment
//! field names. Expansion never fails: an unknown name expands to the
//! empty string and is reported with a warning.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use tracing::warn;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([0-9A-Za-z]+)\}").expect("static placeholder regex"));

/// Replace every `${identifier}` token in `template` with its value.
///
/// Substituted text is inserted verbatim and never re-expanded. Tokens
/// without a closing brace are not tokens and stay as literal text.
pub fn expand(template: &str, values: &HashMap<String, String>) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures<'_>| {
            let key = &caps[1];
            match values.get(key) {
                Some(value) => value.clone(),
                None => {
                    warn!(placeholder = %key, "No value for placeholder, substituting empty string");
                    String::new()
                }
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn missing_key_becomes_empty() {
        assert_eq!(expand("${a}-${b}", &values(&[("a", "x")])), "x-");
    }

    #[test]
    fn substitutes_every_occurrence() {
        let v = values(&[("id", "42")]);
        assert_eq!(expand("${id}/${id}", &v), "42/42");
    }

    #[test]
    fn substituted_text_is_not_reexpanded() {
        let v = values(&[("a", "${b}"), ("b", "nope")]);
        assert_eq!(expand("${a}", &v), "${b}");
    }

    #[test]
    fn unterminated_token_is_literal() {
        let v = values(&[("a", "x")]);
        assert_eq!(expand("${a", &v), "${a");
        assert_eq!(expand("cost: $5 ${a}", &v), "cost: $5 x");
    }

    #[test]
    fn non_alphanumeric_identifier_is_literal() {
        let v = values(&[("my-key", "x")]);
        assert_eq!(expand("${my-key}", &v), "${my-key}");
    }

    #[test]
    fn template_without_tokens_is_unchanged() {
        assert_eq!(expand("plain text", &HashMap::new()), "plain text");
        assert_eq!(expand("", &HashMap::new()), "");
    }

    #[test]
    fn json_body_template() {
        let v = values(&[("invoiceId", "123"), ("total", "42.00")]);
        assert_eq!(
            expand(r#"{"id":"${invoiceId}","total":"${total}"}"#, &v),
            r#"{"id":"123","total":"42.00"}"#
        );
    }
}
