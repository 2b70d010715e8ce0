//! Recursive `${key[:default]}` placeholder expansion.
//!
//! Keys may themselves contain placeholders (`${${outer}.inner}`) and
//! defaults may too (`${a:${b}}`). The active key chain travels with the
//! recursion; re-entering a key on the chain is a circular reference.

use crate::error::{EnvError, EnvResult};

const PREFIX: &str = "${";
const SUFFIX: char = '}';
const SEPARATOR: char = ':';

/// Key lookup used during expansion.
pub type Lookup<'a> = dyn Fn(&str) -> Option<String> + 'a;

/// Placeholder expansion policy.
///
/// With `ignore_unresolvable` set, a placeholder whose key has no value and
/// no default is left in the text literally instead of failing.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaceholderResolver {
    ignore_unresolvable: bool,
}

impl PlaceholderResolver {
    /// Strict resolver: unresolvable placeholders are errors.
    pub fn new() -> Self {
        Self::default()
    }

    /// Lenient resolver: unresolvable placeholders stay literal.
    pub fn lenient() -> Self {
        Self {
            ignore_unresolvable: true,
        }
    }

    /// Whether unresolvable placeholders are left in place.
    pub fn is_lenient(&self) -> bool {
        self.ignore_unresolvable
    }

    /// Expand all placeholders in `text` under this resolver's policy.
    pub fn resolve(&self, text: &str, lookup: &Lookup<'_>) -> EnvResult<String> {
        let mut visiting = Vec::new();
        self.parse(text, lookup, !self.ignore_unresolvable, &mut visiting)
    }

    /// Expand all placeholders, failing on any unresolvable one regardless
    /// of policy.
    pub fn resolve_required(&self, text: &str, lookup: &Lookup<'_>) -> EnvResult<String> {
        let mut visiting = Vec::new();
        self.parse(text, lookup, true, &mut visiting)
    }

    fn parse(
        &self,
        text: &str,
        lookup: &Lookup<'_>,
        required: bool,
        visiting: &mut Vec<String>,
    ) -> EnvResult<String> {
        let mut result = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(start) = rest.find(PREFIX) {
            result.push_str(&rest[..start]);
            let after_prefix = &rest[start + PREFIX.len()..];
            let Some(end) = find_closing(after_prefix) else {
                // Unbalanced: keep the tail literally.
                result.push_str(&rest[start..]);
                return Ok(result);
            };
            let inner = &after_prefix[..end];
            result.push_str(&self.expand(inner, lookup, required, visiting)?);
            rest = &after_prefix[end + 1..];
        }
        result.push_str(rest);
        Ok(result)
    }

    /// Expand the body of one placeholder (without its `${` / `}`).
    fn expand(
        &self,
        inner: &str,
        lookup: &Lookup<'_>,
        required: bool,
        visiting: &mut Vec<String>,
    ) -> EnvResult<String> {
        let (raw_key, default) = split_default(inner);
        // The key expression may itself contain placeholders.
        let key = self.parse(raw_key, lookup, required, visiting)?;

        if visiting.iter().any(|k| k == &key) {
            visiting.push(key);
            return Err(EnvError::circular_reference(visiting));
        }

        if let Some(value) = lookup(&key) {
            visiting.push(key);
            let resolved = self.parse(&value, lookup, required, visiting);
            visiting.pop();
            return resolved;
        }

        if let Some(default) = default {
            return self.parse(default, lookup, required, visiting);
        }

        if required {
            Err(EnvError::unresolved(key))
        } else {
            // Leave the placeholder literally, key already expanded.
            let mut literal = String::from(PREFIX);
            literal.push_str(&key);
            literal.push(SUFFIX);
            Ok(literal)
        }
    }
}

/// Index of the `}` matching the opening `${` that `inner` follows.
///
/// Scans raw bytes: the delimiters are ASCII, so they never collide with
/// UTF-8 continuation bytes and every returned index is a char boundary.
fn find_closing(inner: &str) -> Option<usize> {
    let bytes = inner.as_bytes();
    let mut depth = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' && bytes.get(i + 1) == Some(&b'{') {
            depth += 1;
            i += PREFIX.len();
            continue;
        }
        if bytes[i] == SUFFIX as u8 {
            if depth == 0 {
                return Some(i);
            }
            depth -= 1;
        }
        i += 1;
    }
    None
}

/// Split `key[:default]` at the first separator outside nested placeholders.
fn split_default(inner: &str) -> (&str, Option<&str>) {
    let bytes = inner.as_bytes();
    let mut depth = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' && bytes.get(i + 1) == Some(&b'{') {
            depth += 1;
            i += PREFIX.len();
            continue;
        }
        match bytes[i] {
            b if b == SUFFIX as u8 && depth > 0 => depth -= 1,
            b if b == SEPARATOR as u8 && depth == 0 => {
                return (&inner[..i], Some(&inner[i + 1..]));
            }
            _ => {}
        }
        i += 1;
    }
    (inner, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn table() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("user.name", "Arvin"),
            ("user.nick", "${user.name}"),
            ("greet", "Hello:${user.name}"),
            ("outer", "user"),
            ("a", "${b}"),
            ("b", "${a}"),
        ])
    }

    fn lookup<'a>(map: &'a HashMap<&str, &str>) -> impl Fn(&str) -> Option<String> + 'a {
        move |key| map.get(key).map(|v| v.to_string())
    }

    #[test]
    fn test_plain_text_passes_through() {
        let r = PlaceholderResolver::new();
        let map = table();
        assert_eq!(r.resolve("no placeholders", &lookup(&map)).unwrap(), "no placeholders");
        assert_eq!(r.resolve("", &lookup(&map)).unwrap(), "");
    }

    #[test]
    fn test_basic_substitution() {
        let r = PlaceholderResolver::new();
        let map = table();
        assert_eq!(
            r.resolve("Hello:${user.name}", &lookup(&map)).unwrap(),
            "Hello:Arvin"
        );
        // Resolved value may itself carry placeholders.
        assert_eq!(r.resolve("${greet}", &lookup(&map)).unwrap(), "Hello:Arvin");
        assert_eq!(r.resolve("${user.nick}", &lookup(&map)).unwrap(), "Arvin");
    }

    #[test]
    fn test_defaults() {
        let r = PlaceholderResolver::new();
        let map = table();
        assert_eq!(r.resolve("${user.no:Go}", &lookup(&map)).unwrap(), "Go");
        // Empty default is a valid empty value.
        assert_eq!(r.resolve("${user.no:}", &lookup(&map)).unwrap(), "");
        assert_eq!(
            r.resolve("Hello:${user.no:}--${user.name}", &lookup(&map)).unwrap(),
            "Hello:--Arvin"
        );
        // Default only applies when the key is absent.
        assert_eq!(r.resolve("${user.name:Go}", &lookup(&map)).unwrap(), "Arvin");
        // Default may itself be a placeholder.
        assert_eq!(
            r.resolve("${user.no:${user.name}}", &lookup(&map)).unwrap(),
            "Arvin"
        );
        assert_eq!(
            r.resolve("${user.no:${user.other:deep}}", &lookup(&map)).unwrap(),
            "deep"
        );
    }

    #[test]
    fn test_multibyte_text_and_values() {
        let r = PlaceholderResolver::new();
        let map = HashMap::from([("名前", "かもめ"), ("greeting", "héllo ${名前}")]);
        assert_eq!(r.resolve("${名前}", &lookup(&map)).unwrap(), "かもめ");
        assert_eq!(
            r.resolve("こんにちは、${名前}さん", &lookup(&map)).unwrap(),
            "こんにちは、かもめさん"
        );
        assert_eq!(r.resolve("${greeting}", &lookup(&map)).unwrap(), "héllo かもめ");
        // Multibyte defaults split on the separator, not a byte offset.
        assert_eq!(r.resolve("${user.no:héllo}", &lookup(&map)).unwrap(), "héllo");
        assert_eq!(
            r.resolve("${user.no:${名前}}", &lookup(&map)).unwrap(),
            "かもめ"
        );
    }

    #[test]
    fn test_nested_key_expression() {
        let r = PlaceholderResolver::new();
        let map = table();
        assert_eq!(r.resolve("${${outer}.name}", &lookup(&map)).unwrap(), "Arvin");
    }

    #[test]
    fn test_unresolvable() {
        let map = table();
        let strict = PlaceholderResolver::new();
        assert!(matches!(
            strict.resolve("${user.no}", &lookup(&map)),
            Err(EnvError::UnresolvedPlaceholder { .. })
        ));

        let lenient = PlaceholderResolver::lenient();
        assert_eq!(
            lenient.resolve("x ${user.no} y", &lookup(&map)).unwrap(),
            "x ${user.no} y"
        );
        // Resolution continues past an unresolvable placeholder.
        assert_eq!(
            lenient
                .resolve("Hello:${user.no}--${user.name}", &lookup(&map))
                .unwrap(),
            "Hello:${user.no}--Arvin"
        );
        // resolve_required overrides leniency.
        assert!(matches!(
            lenient.resolve_required("${user.no}", &lookup(&map)),
            Err(EnvError::UnresolvedPlaceholder { .. })
        ));
    }

    #[test]
    fn test_unbalanced_stays_literal() {
        let r = PlaceholderResolver::new();
        let map = table();
        assert_eq!(r.resolve("${user.name", &lookup(&map)).unwrap(), "${user.name");
        assert_eq!(
            r.resolve("ok ${user.name} ${tail", &lookup(&map)).unwrap(),
            "ok Arvin ${tail"
        );
    }

    #[test]
    fn test_circular_reference() {
        let r = PlaceholderResolver::new();
        let map = table();
        let err = r.resolve("${a}", &lookup(&map)).unwrap_err();
        match err {
            EnvError::CircularReference { chain } => {
                assert_eq!(chain, "a -> b -> a");
            }
            other => panic!("expected circular reference, got {other}"),
        }
    }

    #[test]
    fn test_repeated_key_is_not_a_cycle() {
        // The same key twice in sequence is fine; only re-entry on the
        // active chain is circular.
        let r = PlaceholderResolver::new();
        let map = table();
        assert_eq!(
            r.resolve("${user.name}-${user.name}", &lookup(&map)).unwrap(),
            "Arvin-Arvin"
        );
    }
}
