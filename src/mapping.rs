//! Repository path mapping rules
//!
//! A rule pairs a source pattern with a destination template. Patterns come in
//! two flavors:
//!
//! - **wildcard**: `*` matches one path segment, `**` matches one or more
//!   segments, `?` matches a single non-separator character. Each `*`/`**`
//!   is a numbered capture group, left to right.
//! - **regex**: a pattern starting with `^` or containing `(` is a regular
//!   expression. `*` keeps its regex meaning, and groups (including named
//!   `(?P<name>...)` groups) are the captures.
//!
//! Templates reference captures as `$1`, `${1}` or `${name}`; `$$` is a literal
//! dollar. For wildcard rules a bare `*` in the template is replaced with the
//! first capture. Every pattern must match the whole repository name.

use crate::error::{ReplicationError, Result};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingRule {
    pub source: String,
    pub destination: String,
    /// Only tags matching this wildcard are replicated by the rule
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag_filter: Option<String>,
}

impl MappingRule {
    pub fn new(source: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            tag_filter: None,
        }
    }

    pub fn with_tag_filter(mut self, filter: impl Into<String>) -> Self {
        self.tag_filter = Some(filter.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PatternKind {
    Wildcard,
    Regex,
}

#[derive(Debug, Clone)]
struct CompiledRule {
    rule: MappingRule,
    kind: PatternKind,
    regex: Regex,
    tag_filter: Option<WildcardPattern>,
}

impl CompiledRule {
    fn compile(rule: MappingRule) -> Result<Self> {
        let (kind, regex) = if rule.source.starts_with('^') || rule.source.contains('(') {
            (PatternKind::Regex, Regex::new(&format!("^(?:{})$", rule.source))?)
        } else {
            (PatternKind::Wildcard, Regex::new(&wildcard_regex(&rule.source, true))?)
        };
        let tag_filter = rule.tag_filter.as_deref().map(WildcardPattern::new).transpose()?;
        Ok(Self {
            rule,
            kind,
            regex,
            tag_filter,
        })
    }

    fn apply(&self, source: &str) -> Option<String> {
        let captures = self.regex.captures(source)?;
        if self.rule.source == self.rule.destination {
            return Some(source.to_string());
        }
        Some(expand(&self.rule.destination, &captures, self.kind))
    }
}

/// Ordered rule list; the first matching rule decides the destination.
#[derive(Debug, Clone, Default)]
pub struct RepositoryMapper {
    rules: Vec<CompiledRule>,
}

impl RepositoryMapper {
    /// Compile `rules`, failing on the first invalid pattern.
    pub fn new(rules: Vec<MappingRule>) -> Result<Self> {
        let rules = rules
            .into_iter()
            .map(|rule| {
                let source = rule.source.clone();
                CompiledRule::compile(rule).map_err(|e| {
                    ReplicationError::Configuration(format!("mapping rule '{}': {}", source, e))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn rules(&self) -> impl Iterator<Item = &MappingRule> {
        self.rules.iter().map(|compiled| &compiled.rule)
    }

    /// Destination for `source`, or `None` when no rule matches.
    pub fn resolve(&self, source: &str) -> Option<String> {
        self.rules.iter().find_map(|rule| rule.apply(source))
    }

    /// Destination for `source`, falling back to `default`.
    pub fn resolve_or(&self, source: &str, default: &str) -> String {
        self.resolve(source).unwrap_or_else(|| default.to_string())
    }

    /// Whether the rule that maps `repository` accepts `tag`.
    ///
    /// Repositories no rule matches accept every tag.
    pub fn accepts_tag(&self, repository: &str, tag: &str) -> bool {
        match self.rules.iter().find(|rule| rule.regex.is_match(repository)) {
            Some(rule) => rule.tag_filter.as_ref().is_none_or(|filter| filter.matches(tag)),
            None => true,
        }
    }
}

fn expand(template: &str, captures: &Captures<'_>, kind: PatternKind) -> String {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.char_indices().peekable();

    while let Some((pos, ch)) = chars.next() {
        match ch {
            '$' => match chars.peek().map(|&(_, next)| next) {
                Some('$') => {
                    chars.next();
                    out.push('$');
                }
                Some('{') => {
                    let rest = &template[pos + 2..];
                    match rest.find('}') {
                        Some(close) => {
                            let name = &rest[..close];
                            out.push_str(group(captures, name));
                            // skip '{', the name and '}'
                            for _ in 0..name.chars().count() + 2 {
                                chars.next();
                            }
                        }
                        None => out.push('$'),
                    }
                }
                Some(next) if next.is_ascii_digit() => {
                    let digits: String = template[pos + 1..]
                        .chars()
                        .take_while(char::is_ascii_digit)
                        .collect();
                    out.push_str(group(captures, &digits));
                    for _ in 0..digits.len() {
                        chars.next();
                    }
                }
                _ => out.push('$'),
            },
            '*' if kind == PatternKind::Wildcard && captures.len() > 1 => {
                out.push_str(captures.get(1).map_or("", |m| m.as_str()));
            }
            other => out.push(other),
        }
    }
    out
}

fn group<'h>(captures: &Captures<'h>, name: &str) -> &'h str {
    let found = match name.parse::<usize>() {
        Ok(index) => captures.get(index),
        Err(_) => captures.name(name),
    };
    found.map_or("", |m| m.as_str())
}

/// Translate a wildcard into an anchored regex, capturing `*` and `**` when
/// `capture` is set.
fn wildcard_regex(pattern: &str, capture: bool) -> String {
    let mut out = String::from("^");
    let mut chars = pattern.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                out.push_str(if capture { "(.+)" } else { ".*" });
            }
            '*' => out.push_str(if capture { "([^/]+)" } else { "[^/]*" }),
            '?' => out.push_str("[^/]"),
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    out
}

/// Shell-style wildcard used for include/exclude filters
#[derive(Debug, Clone)]
pub struct WildcardPattern {
    pattern: String,
    regex: Regex,
}

impl WildcardPattern {
    pub fn new(pattern: &str) -> Result<Self> {
        Ok(Self {
            pattern: pattern.to_string(),
            regex: Regex::new(&wildcard_regex(pattern, false))?,
        })
    }

    pub fn matches(&self, value: &str) -> bool {
        self.regex.is_match(value)
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }
}

/// True when any pattern in `patterns` matches `value`
pub fn matches_any(patterns: &[WildcardPattern], value: &str) -> bool {
    patterns.iter().any(|pattern| pattern.matches(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapper(rules: &[(&str, &str)]) -> RepositoryMapper {
        RepositoryMapper::new(rules.iter().map(|(s, d)| MappingRule::new(*s, *d)).collect()).unwrap()
    }

    #[test]
    fn test_multiple_captures_are_reordered() {
        let mapper = mapper(&[("source/*/group/*", "dest/$2/$1")]);
        assert_eq!(
            mapper.resolve("source/team-a/group/service-x").as_deref(),
            Some("dest/service-x/team-a")
        );
        assert_eq!(mapper.resolve("source/team-a/other/service-x"), None);
    }

    #[test]
    fn test_first_matching_rule_wins() {
        let mapper = mapper(&[
            ("prod/*", "mirror/prod-$1"),
            ("*/*", "mirror/$1/$2"),
        ]);
        assert_eq!(mapper.resolve("prod/api").as_deref(), Some("mirror/prod-api"));
        assert_eq!(mapper.resolve("dev/api").as_deref(), Some("mirror/dev/api"));
    }

    #[test]
    fn test_single_star_does_not_cross_segments() {
        let mapper = mapper(&[("team/*", "t/$1"), ("team/**", "deep/$1")]);
        assert_eq!(mapper.resolve("team/api").as_deref(), Some("t/api"));
        assert_eq!(mapper.resolve("team/api/v2").as_deref(), Some("deep/api/v2"));
    }

    #[test]
    fn test_bare_star_template_uses_first_capture() {
        let mapper = mapper(&[("legacy/*", "modern/*")]);
        assert_eq!(mapper.resolve("legacy/app").as_deref(), Some("modern/app"));
    }

    #[test]
    fn test_identity_and_many_to_one() {
        let mapper = mapper(&[("keep/*/x/*", "keep/*/x/*"), ("apps/*", "apps-all")]);
        assert_eq!(mapper.resolve("keep/a/x/b").as_deref(), Some("keep/a/x/b"));
        assert_eq!(mapper.resolve("apps/web").as_deref(), Some("apps-all"));
    }

    #[test]
    fn test_regex_rules_with_named_groups() {
        let mapper = mapper(&[(r"^(?P<org>[a-z]+)/(?P<app>.+)-service$", "svc/${app}/${org}")]);
        assert_eq!(mapper.resolve("acme/billing-service").as_deref(), Some("svc/billing/acme"));
        assert_eq!(mapper.resolve("acme/billing"), None);
    }

    #[test]
    fn test_dollar_escape_and_braced_numbers() {
        let mapper = mapper(&[("cost/*", "price$$/${1}0")]);
        assert_eq!(mapper.resolve("cost/ten").as_deref(), Some("price$/ten0"));
    }

    #[test]
    fn test_default_when_nothing_matches() {
        let mapper = mapper(&[("a/*", "b/$1")]);
        assert_eq!(mapper.resolve_or("c/d", "c/d"), "c/d");
        assert_eq!(RepositoryMapper::default().resolve_or("x", "y"), "y");
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let mapper = mapper(&[("*/*", "$2/$1"), ("**", "flat/$1")]);
        let first = mapper.resolve("one/two");
        for _ in 0..100 {
            assert_eq!(mapper.resolve("one/two"), first);
        }
    }

    #[test]
    fn test_invalid_regex_is_a_configuration_error() {
        let result = RepositoryMapper::new(vec![MappingRule::new("^(unclosed", "x")]);
        assert!(matches!(result, Err(ReplicationError::Configuration(_))));
    }

    #[test]
    fn test_tag_filters() {
        let mapper = RepositoryMapper::new(vec![
            MappingRule::new("release/*", "r/$1").with_tag_filter("v*"),
        ])
        .unwrap();
        assert!(mapper.accepts_tag("release/app", "v1.2"));
        assert!(!mapper.accepts_tag("release/app", "latest"));
        assert!(mapper.accepts_tag("other/app", "latest"));
    }

    #[test]
    fn test_wildcard_filters() {
        let pattern = WildcardPattern::new("*/test-*").unwrap();
        assert!(pattern.matches("team/test-api"));
        assert!(!pattern.matches("team/sub/test-api"));
        assert!(WildcardPattern::new("**/tmp").unwrap().matches("a/b/tmp"));
        assert!(WildcardPattern::new("1.2?").unwrap().matches("1.25"));
        assert!(!WildcardPattern::new("1.2?").unwrap().matches("1.2"));
    }
}
