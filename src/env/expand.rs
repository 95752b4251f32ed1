//! Shell-style placeholder expansion
//!
//! Supported forms:
//!
//! - `${VAR}` and `$VAR`: the value, or empty when unset
//! - `${VAR:-default}`: the value when set and non-empty, else the expanded default
//! - `${VAR:?message}`: the value when set and non-empty, else a
//!   [`StackError::MissingVariable`] in strict mode (empty otherwise)
//! - `${VAR:+alternate}`: the alternate verbatim when set and non-empty, else empty
//! - `${VAR:=default}`: like `:-`, and assigns the default when mutation is allowed
//!
//! A variable set to the empty string counts as unset in every form. A braced
//! placeholder owns everything up to its matching `}`, so a nested default is
//! only evaluated when the outer variable is unset.

use super::map::{EnvironmentMap, VarLookup};
use crate::error::{Result, StackError};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Maximum number of scan-and-replace passes over a string
pub const MAX_PASSES: usize = 10;

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*").expect("variable name pattern is valid")
    })
}

/// A parsed placeholder
#[derive(Debug, PartialEq, Eq)]
struct Placeholder<'t> {
    name: &'t str,
    op: Option<char>,
    body: &'t str,
    /// Byte length of the whole placeholder, `$` included
    len: usize,
}

/// Parse the placeholder starting at the `$` that begins `text`
fn parse_placeholder(text: &str) -> Option<Placeholder<'_>> {
    let rest = text.strip_prefix('$')?;

    let Some(inner_start) = rest.strip_prefix('{') else {
        let name = name_pattern().find(rest)?.as_str();
        return Some(Placeholder {
            name,
            op: None,
            body: "",
            len: 1 + name.len(),
        });
    };

    let mut depth = 1usize;
    let mut close = None;
    for (idx, c) in inner_start.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    close = Some(idx);
                    break;
                }
            }
            _ => {}
        }
    }
    let close = close?;
    let inner = &inner_start[..close];
    let len = 2 + close + 1;

    let name = name_pattern().find(inner)?.as_str();
    let tail = &inner[name.len()..];
    if tail.is_empty() {
        return Some(Placeholder {
            name,
            op: None,
            body: "",
            len,
        });
    }

    let mut chars = tail.chars();
    match (chars.next(), chars.next()) {
        (Some(':'), Some(op @ ('-' | '?' | '+' | '='))) => Some(Placeholder {
            name,
            op: Some(op),
            body: &tail[2..],
            len,
        }),
        _ => None,
    }
}

/// Expanded text, split into parts later passes may rescan and parts they
/// must leave alone
#[derive(Debug, Default)]
struct Pieces {
    parts: Vec<(String, bool)>,
}

impl Pieces {
    fn push(&mut self, text: &str, frozen: bool) {
        if text.is_empty() {
            return;
        }
        match self.parts.last_mut() {
            Some((last, last_frozen)) if *last_frozen == frozen => last.push_str(text),
            _ => self.parts.push((text.to_string(), frozen)),
        }
    }

    fn extend(&mut self, other: Pieces) {
        for (text, frozen) in other.parts {
            self.push(&text, frozen);
        }
    }

    fn text(&self) -> String {
        self.parts.iter().map(|(text, _)| text.as_str()).collect()
    }

    fn into_string(self) -> String {
        self.parts.into_iter().map(|(text, _)| text).collect()
    }
}

/// Placeholder expander
#[derive(Debug, Clone, Copy, Default)]
pub struct Expander {
    strict: bool,
    mutate: bool,
}

impl Expander {
    /// Lenient, non-mutating expander
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail on `${VAR:?message}` when VAR is unset
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Allow `${VAR:=default}` to assign into the working map
    pub fn mutating(mut self, mutate: bool) -> Self {
        self.mutate = mutate;
        self
    }

    /// Expand `text` against read-only variables.
    ///
    /// `:=` assignments are visible for the rest of this call only.
    pub fn expand<V: VarLookup + ?Sized>(&self, text: &str, vars: &V) -> Result<String> {
        let mut assigned = BTreeMap::new();
        Ok(self.run(text, vars, &mut assigned)?.into_string())
    }

    /// Expand `text` and merge `:=` assignments back into `vars`.
    ///
    /// Assignments are merged once, after the whole expansion succeeded.
    /// Nothing is merged when expansion fails or mutation is off.
    pub fn expand_into(&self, text: &str, vars: &mut EnvironmentMap) -> Result<String> {
        let mut assigned = BTreeMap::new();
        let expanded = self.run(text, &*vars, &mut assigned)?.into_string();
        if self.mutate {
            for (name, value) in assigned {
                vars.set(name, value);
            }
        }
        Ok(expanded)
    }

    /// Scan until nothing changes or [`MAX_PASSES`] is reached
    fn run<V: VarLookup + ?Sized>(
        &self,
        text: &str,
        vars: &V,
        assigned: &mut BTreeMap<String, String>,
    ) -> Result<Pieces> {
        let mut current = Pieces::default();
        current.push(text, false);

        for _ in 0..MAX_PASSES {
            let mut next = Pieces::default();
            let mut changed = false;
            for (part, frozen) in current.parts {
                if frozen {
                    next.push(&part, true);
                } else {
                    changed |= self.scan(&part, vars, assigned, &mut next)?;
                }
            }
            current = next;
            if !changed {
                return Ok(current);
            }
        }

        tracing::debug!("Expansion stopped after {} passes: {}", MAX_PASSES, text);
        Ok(current)
    }

    /// One left-to-right pass. Returns whether any placeholder was replaced.
    fn scan<V: VarLookup + ?Sized>(
        &self,
        text: &str,
        vars: &V,
        assigned: &mut BTreeMap<String, String>,
        out: &mut Pieces,
    ) -> Result<bool> {
        let mut changed = false;
        let mut pos = 0;

        while let Some(offset) = text[pos..].find('$') {
            let start = pos + offset;
            out.push(&text[pos..start], false);
            match parse_placeholder(&text[start..]) {
                Some(placeholder) => {
                    self.substitute(&placeholder, vars, assigned, out)?;
                    pos = start + placeholder.len;
                    changed = true;
                }
                None => {
                    out.push("$", false);
                    pos = start + 1;
                }
            }
        }
        out.push(&text[pos..], false);

        Ok(changed)
    }

    fn substitute<V: VarLookup + ?Sized>(
        &self,
        placeholder: &Placeholder<'_>,
        vars: &V,
        assigned: &mut BTreeMap<String, String>,
        out: &mut Pieces,
    ) -> Result<()> {
        let Placeholder { name, op, body, .. } = *placeholder;
        let value = assigned
            .get(name)
            .map(String::as_str)
            .or_else(|| vars.lookup(name))
            .filter(|v| !v.is_empty())
            .map(str::to_string);

        match (op, value) {
            (Some('+'), Some(_)) => out.push(body, true),
            (Some('+'), None) => {}
            (_, Some(value)) => out.push(&value, false),
            (None, None) => {}
            (Some('-'), None) => out.extend(self.run(body, vars, assigned)?),
            (Some('='), None) => {
                let default = self.run(body, vars, assigned)?;
                if self.mutate {
                    assigned.insert(name.to_string(), default.text());
                }
                out.extend(default);
            }
            (Some(_), None) if self.strict => {
                return Err(StackError::MissingVariable {
                    name: name.to_string(),
                    message: if body.is_empty() {
                        "parameter null or not set".to_string()
                    } else {
                        body.to_string()
                    },
                });
            }
            (Some(_), None) => {}
        }
        Ok(())
    }
}

/// Lenient, non-mutating expansion
pub fn expand<V: VarLookup + ?Sized>(text: &str, vars: &V) -> String {
    Expander::new()
        .expand(text, vars)
        .unwrap_or_else(|_| text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_plain_text_is_untouched() {
        let env = vars(&[("A", "x")]);
        assert_eq!(expand("no placeholders here", &env), "no placeholders here");
        assert_eq!(expand("price: 5$", &env), "price: 5$");
        assert_eq!(expand("", &env), "");
    }

    #[test]
    fn test_simple_forms() {
        let env = vars(&[("A", "x"), ("EMPTY", "")]);
        assert_eq!(expand("${A}", &env), "x");
        assert_eq!(expand("$A/bin", &env), "x/bin");
        assert_eq!(expand("${MISSING}", &env), "");
        assert_eq!(expand("[$EMPTY]", &env), "[]");
    }

    #[test]
    fn test_default_form() {
        assert_eq!(expand("${A:-d}", &vars(&[])), "d");
        assert_eq!(expand("${A:-d}", &vars(&[("A", "x")])), "x");
        assert_eq!(expand("${A:-d}", &vars(&[("A", "")])), "d");
    }

    #[test]
    fn test_alternate_form() {
        assert_eq!(expand("${A:+y}", &vars(&[("A", "x")])), "y");
        assert_eq!(expand("${A:+y}", &vars(&[])), "");
        assert_eq!(expand("${A:+y}", &vars(&[("A", "")])), "");
    }

    #[test]
    fn test_nested_defaults() {
        assert_eq!(expand("${A:-${B:-z}}", &vars(&[])), "z");
        assert_eq!(expand("${A:-${B:-z}}", &vars(&[("B", "b")])), "b");
        assert_eq!(expand("${A:-${B:-z}}", &vars(&[("A", "a")])), "a");
        assert_eq!(expand("${A:-$B}", &vars(&[("B", "b")])), "b");
    }

    #[test]
    fn test_required_form() {
        let strict = Expander::new().strict(true);
        let err = strict.expand("${A:?missing}", &vars(&[])).unwrap_err();
        match err {
            StackError::MissingVariable { name, message } => {
                assert_eq!(name, "A");
                assert_eq!(message, "missing");
            }
            other => panic!("unexpected error: {other}"),
        }

        let lenient = Expander::new().strict(false);
        assert_eq!(lenient.expand("${A:?missing}", &vars(&[])).unwrap(), "");
        assert_eq!(
            strict.expand("${A:?missing}", &vars(&[("A", "x")])).unwrap(),
            "x"
        );
    }

    #[test]
    fn test_assign_form_mutates_map() {
        let mut env = EnvironmentMap::new();
        let expander = Expander::new().mutating(true);
        assert_eq!(expander.expand_into("${A:=d}", &mut env).unwrap(), "d");
        assert_eq!(env.get("A"), Some("d"));
        assert_eq!(expand("${A}", &env), "d");
    }

    #[test]
    fn test_assign_form_without_mutation() {
        let mut env = EnvironmentMap::new();
        let expander = Expander::new();
        assert_eq!(expander.expand_into("${A:=d}", &mut env).unwrap(), "d");
        assert_eq!(env.get("A"), None);
    }

    #[test]
    fn test_assignment_visible_later_in_same_text() {
        let mut env = EnvironmentMap::new();
        let expander = Expander::new().mutating(true);
        let out = expander.expand_into("${A:=one}-${A}", &mut env).unwrap();
        assert_eq!(out, "one-one");
    }

    #[test]
    fn test_failed_expansion_merges_nothing() {
        let mut env = EnvironmentMap::new();
        let expander = Expander::new().mutating(true).strict(true);
        let result = expander.expand_into("${A:=d} ${B:?need B}", &mut env);
        assert!(result.is_err());
        assert_eq!(env.get("A"), None);
    }

    #[test]
    fn test_self_reference_terminates() {
        let env = vars(&[("A", "${A}x")]);
        let out = expand("${A}", &env);
        assert!(out.ends_with("x"));
        assert_eq!(out.matches('x').count(), MAX_PASSES);
    }

    #[test]
    fn test_value_expanding_to_placeholder() {
        let env = vars(&[("A", "${B}"), ("B", "deep")]);
        assert_eq!(expand("${A}", &env), "deep");
    }

    #[test]
    fn test_nested_required_default_only_checked_when_needed() {
        let strict = Expander::new().strict(true);
        assert_eq!(
            strict
                .expand("${A:-${B:?need B}}", &vars(&[("A", "x")]))
                .unwrap(),
            "x"
        );

        let err = strict.expand("${A:-${B:?need B}}", &vars(&[])).unwrap_err();
        assert!(matches!(err, StackError::MissingVariable { ref name, .. } if name == "B"));
    }

    #[test]
    fn test_nested_assignment_only_when_outer_unset() {
        let expander = Expander::new().mutating(true);

        let mut env = EnvironmentMap::from_pairs([("A", "x")]);
        assert_eq!(expander.expand_into("${A:-${B:=d}}", &mut env).unwrap(), "x");
        assert_eq!(env.get("B"), None);

        let mut env = EnvironmentMap::new();
        assert_eq!(expander.expand_into("${A:-${B:=d}}", &mut env).unwrap(), "d");
        assert_eq!(env.get("B"), Some("d"));
        assert_eq!(env.get("A"), None);
    }

    #[test]
    fn test_alternate_is_not_expanded() {
        let env = vars(&[("A", "x"), ("B", "b")]);
        assert_eq!(expand("${A:+$B}", &env), "$B");
        assert_eq!(expand("${A:+${B}}-$B", &env), "${B}-b");
        assert_eq!(expand("${MISSING:+${B}}", &env), "");
    }

    #[test]
    fn test_malformed_placeholders_stay_literal() {
        let env = vars(&[("A", "x")]);
        assert_eq!(expand("${A", &env), "${A");
        assert_eq!(expand("${1A}", &env), "${1A}");
        assert_eq!(expand("${A-d} $A", &env), "${A-d} x");
        assert_eq!(expand("cost: $5", &env), "cost: $5");
    }

    #[test]
    fn test_parse_placeholder_matches_braces() {
        let parsed = parse_placeholder("${A:-${B:-z}}rest").unwrap();
        assert_eq!(parsed.name, "A");
        assert_eq!(parsed.op, Some('-'));
        assert_eq!(parsed.body, "${B:-z}");
        assert_eq!(parsed.len, "${A:-${B:-z}}".len());
    }

    proptest! {
        #[test]
        fn property_text_without_placeholders_is_unchanged(
            text in "[^$]{0,64}",
            env in proptest::collection::hash_map("[A-Za-z_][A-Za-z0-9_]{0,8}", ".{0,16}", 0..6),
        ) {
            prop_assert_eq!(expand(&text, &env), text.clone());
            let strict = Expander::new().strict(true).mutating(true);
            prop_assert_eq!(strict.expand(&text, &env).unwrap(), text);
        }
    }
}
