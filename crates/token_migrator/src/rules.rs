// SPDX-License-Identifier: Apache-2.0
//! Regex-driven literal rewriting.
//!
//! Rules operate on raw text, never on a parsed stylesheet or component. A
//! rule pattern locates a declaration and must expose the literal through a
//! named capture group `value`; only that span is replaced, so the property
//! name, separators and trailing syntax are preserved byte for byte.
//!
//! # Matching policy
//!
//! 1. **Literal-shaped**: patterns target digits, hex and `rgba(...)` shapes,
//!    so text that already holds `var(--...)` never matches again.
//! 2. **Comment-averse**: matches touching `/* */`, `<!-- -->` or a `//` tail
//!    are left alone, even when the `//` is really part of a URL.
//! 3. **First claim wins**: rules run in declaration order; every match a rule
//!    makes (replaced or not) claims its span, and later rules skip claimed
//!    spans.
//! 4. **Bounded values**: a value must be followed by whitespace, `;`, `}`,
//!    `!`, a quote, `)` `,` or end of text. This keeps `0.5rem` from being read
//!    as `0`.

use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::Arc;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{MigrateError, Result};
use crate::mapping::{Category, MappingTable, ValueKind, normalize_literal};
use crate::report::FileFix;

/// Name of the capture group holding the literal to replace.
pub const VALUE_GROUP: &str = "value";

// ── Rule definitions ────────────────────────────────────────────────────

/// Serialized rule definition, as it appears in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSpec {
    pub id: String,
    pub category: Category,
    pub pattern: String,
    #[serde(default)]
    pub description: String,
    /// Treat the captured value as a whitespace-separated list (`8px 16px`)
    /// and map each item on its own.
    #[serde(default)]
    pub split_values: bool,
}

/// A compiled, stateless rule.
#[derive(Debug, Clone)]
pub struct Rule {
    pub id: String,
    pub category: Category,
    pub description: String,
    pub split_values: bool,
    pattern: Regex,
}

impl Rule {
    pub fn compile(spec: &RuleSpec) -> Result<Self> {
        let id = spec.id.trim();
        if id.is_empty() {
            return Err(MigrateError::pattern("<unnamed>", "rule id cannot be empty"));
        }

        let pattern =
            Regex::new(&spec.pattern).map_err(|error| MigrateError::pattern(id, error.to_string()))?;

        if !pattern
            .capture_names()
            .flatten()
            .any(|name| name == VALUE_GROUP)
        {
            return Err(MigrateError::pattern(
                id,
                format!("pattern has no named capture group `{VALUE_GROUP}`"),
            ));
        }

        if pattern.is_match("") {
            return Err(MigrateError::pattern(id, "pattern matches empty text"));
        }

        Ok(Self {
            id: id.to_string(),
            category: spec.category,
            description: spec.description.clone(),
            split_values: spec.split_values,
            pattern,
        })
    }

    #[must_use]
    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }
}

// ── Outcomes ────────────────────────────────────────────────────────────

/// Per-rule counters for one pass over one text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleStats {
    pub rule_id: String,
    /// Pattern matches outside claimed spans.
    pub matched: usize,
    /// Literals replaced by a token.
    pub replaced: usize,
    /// Literals with no mapping entry, left as-is.
    pub unmapped: usize,
    /// Matches skipped because they touch a comment.
    pub in_comment: usize,
    /// Unmapped literals as written, with occurrence counts.
    pub unmapped_literals: BTreeMap<String, usize>,
}

impl RuleStats {
    fn new(rule_id: &str) -> Self {
        Self {
            rule_id: rule_id.to_string(),
            ..Self::default()
        }
    }

    fn record_unmapped(&mut self, literal: &str) {
        self.unmapped += 1;
        *self
            .unmapped_literals
            .entry(literal.trim().to_string())
            .or_insert(0) += 1;
    }
}

/// Result of running a whole rule set over one text.
#[derive(Debug, Clone)]
pub struct Rewrite {
    pub text: String,
    pub stats: Vec<RuleStats>,
}

impl Rewrite {
    #[must_use]
    pub fn total_replaced(&self) -> usize {
        self.stats.iter().map(|stat| stat.replaced).sum()
    }

    #[must_use]
    pub fn total_unmapped(&self) -> usize {
        self.stats.iter().map(|stat| stat.unmapped).sum()
    }

    #[must_use]
    pub fn changed(&self) -> bool {
        self.total_replaced() > 0
    }

    /// One [`FileFix`] per rule that replaced at least one literal.
    #[must_use]
    pub fn fixes(&self) -> Vec<FileFix> {
        self.stats
            .iter()
            .filter(|stat| stat.replaced > 0)
            .map(|stat| FileFix {
                rule_id: stat.rule_id.clone(),
                match_count: stat.replaced,
            })
            .collect()
    }
}

// ── Rule set ────────────────────────────────────────────────────────────

/// Ordered rules sharing one immutable mapping table.
#[derive(Debug, Clone)]
pub struct RuleSet {
    name: String,
    rules: Vec<Rule>,
    mappings: Arc<MappingTable>,
}

#[derive(Debug, Clone, Copy)]
struct Edit {
    at: usize,
    old_len: usize,
    new_len: usize,
}

impl RuleSet {
    pub fn new(name: &str, rules: Vec<Rule>, mappings: Arc<MappingTable>) -> Result<Self> {
        if rules.is_empty() {
            return Err(MigrateError::invalid(format!("rule set {name} has no rules")));
        }
        for (index, rule) in rules.iter().enumerate() {
            if rules[..index].iter().any(|prior| prior.id == rule.id) {
                return Err(MigrateError::pattern(
                    &rule.id,
                    format!("duplicate rule id in rule set {name}"),
                ));
            }
        }
        Ok(Self {
            name: name.to_string(),
            rules,
            mappings,
        })
    }

    /// Compile every spec, failing on the first malformed rule.
    pub fn compile(name: &str, specs: &[RuleSpec], mappings: Arc<MappingTable>) -> Result<Self> {
        let rules = specs.iter().map(Rule::compile).collect::<Result<Vec<_>>>()?;
        Self::new(name, rules, mappings)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    #[must_use]
    pub fn mappings(&self) -> &MappingTable {
        &self.mappings
    }

    /// Apply a single rule with no prior claims. Returns the new text and the
    /// number of literals replaced.
    #[must_use]
    pub fn apply(&self, rule: &Rule, text: &str) -> (String, usize) {
        let mut claims = Vec::new();
        let mut stats = RuleStats::new(&rule.id);
        let rewritten = self.apply_rule(rule, text, &mut claims, &mut stats);
        (rewritten, stats.replaced)
    }

    /// Apply every rule in order, each scanning only what earlier rules left
    /// unclaimed.
    #[must_use]
    pub fn rewrite(&self, text: &str) -> Rewrite {
        let mut current = text.to_string();
        let mut claims: Vec<Range<usize>> = Vec::new();
        let mut stats = Vec::with_capacity(self.rules.len());

        for rule in &self.rules {
            let mut rule_stats = RuleStats::new(&rule.id);
            current = self.apply_rule(rule, &current, &mut claims, &mut rule_stats);
            tracing::trace!(
                rule = %rule.id,
                matched = rule_stats.matched,
                replaced = rule_stats.replaced,
                unmapped = rule_stats.unmapped,
                "rule applied"
            );
            stats.push(rule_stats);
        }

        Rewrite {
            text: current,
            stats,
        }
    }

    fn apply_rule(
        &self,
        rule: &Rule,
        text: &str,
        claims: &mut Vec<Range<usize>>,
        stats: &mut RuleStats,
    ) -> String {
        let comments = comment_spans(text);
        let mut out = String::with_capacity(text.len());
        let mut cursor = 0;
        let mut edits = Vec::new();
        let mut fresh_claims = Vec::new();

        for caps in rule.pattern.captures_iter(text) {
            let (Some(whole), Some(value)) = (caps.get(0), caps.name(VALUE_GROUP)) else {
                continue;
            };
            if value.as_str().trim().is_empty() {
                continue;
            }
            let span = whole.start()..whole.end();
            if overlaps_any(&span, claims) || !value_is_bounded(text, value.end()) {
                continue;
            }

            stats.matched += 1;
            fresh_claims.push(span.clone());

            if overlaps_any(&span, &comments) {
                stats.in_comment += 1;
                continue;
            }

            let Some(replacement) = self.substitute(rule, value.as_str(), stats) else {
                continue;
            };

            out.push_str(&text[cursor..value.start()]);
            out.push_str(&replacement);
            cursor = value.end();
            edits.push(Edit {
                at: value.start(),
                old_len: value.len(),
                new_len: replacement.len(),
            });
        }
        out.push_str(&text[cursor..]);

        claims.extend(fresh_claims);
        if !edits.is_empty() {
            for claim in claims.iter_mut() {
                *claim = remap(claim.start, &edits)..remap(claim.end, &edits);
            }
        }

        out
    }

    fn substitute(&self, rule: &Rule, value: &str, stats: &mut RuleStats) -> Option<String> {
        if !rule.split_values {
            return self.substitute_one(rule, value, stats);
        }

        let mut out = String::with_capacity(value.len());
        let mut replaced_any = false;
        for piece in split_keep_whitespace(value) {
            if piece.trim().is_empty() {
                out.push_str(piece);
                continue;
            }
            match self.substitute_one(rule, piece, stats) {
                Some(token) => {
                    out.push_str(&token);
                    replaced_any = true;
                }
                None => out.push_str(piece),
            }
        }

        replaced_any.then_some(out)
    }

    fn substitute_one(&self, rule: &Rule, literal: &str, stats: &mut RuleStats) -> Option<String> {
        match self.mappings.lookup(literal, rule.category) {
            Some(token) => {
                stats.replaced += 1;
                Some(token.to_string())
            }
            None => {
                if !is_neutral_zero(literal, rule.category) {
                    stats.record_unmapped(literal);
                }
                None
            }
        }
    }
}

// ── Helpers ─────────────────────────────────────────────────────────────

/// Map an offset in the pre-edit text to the post-edit text. Only edits that
/// end at or before `pos` move it.
fn remap(pos: usize, edits: &[Edit]) -> usize {
    let (grow, shrink) = edits
        .iter()
        .filter(|edit| edit.at + edit.old_len <= pos)
        .fold((0, 0), |(grow, shrink), edit| {
            (grow + edit.new_len, shrink + edit.old_len)
        });
    pos + grow - shrink
}

fn overlaps_any(span: &Range<usize>, spans: &[Range<usize>]) -> bool {
    spans
        .iter()
        .any(|other| span.start < other.end && other.start < span.end)
}

fn value_is_bounded(text: &str, end: usize) -> bool {
    match text[end..].chars().next() {
        None => true,
        Some(next) => {
            next.is_whitespace() || matches!(next, ';' | '}' | '!' | '"' | '\'' | ')' | ',')
        }
    }
}

/// Unitless `0` needs no token and is not reported as unmapped.
fn is_neutral_zero(literal: &str, category: Category) -> bool {
    category.value_kind() == ValueKind::Length
        && normalize_literal(literal, ValueKind::Length).trim_start_matches('-') == "0"
        && !literal.trim().chars().any(|c| c.is_ascii_alphabetic())
}

fn split_keep_whitespace(value: &str) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut in_space = None;
    for (index, ch) in value.char_indices() {
        let is_space = ch.is_whitespace();
        match in_space {
            Some(previous) if previous != is_space => {
                pieces.push(&value[start..index]);
                start = index;
            }
            _ => {}
        }
        in_space = Some(is_space);
    }
    if start < value.len() {
        pieces.push(&value[start..]);
    }
    pieces
}

/// Byte ranges that look like comments. Unterminated block comments run to
/// the end of the text.
#[must_use]
pub fn comment_spans(text: &str) -> Vec<Range<usize>> {
    const OPENERS: [(&str, Option<&str>); 3] = [("/*", Some("*/")), ("<!--", Some("-->")), ("//", None)];

    let mut spans = Vec::new();
    let mut index = 0;
    while index < text.len() {
        let rest = &text[index..];
        let opener = OPENERS.iter().find(|(open, _)| rest.starts_with(open));
        let Some((open, close)) = opener else {
            index += rest.chars().next().map_or(1, char::len_utf8);
            continue;
        };

        let body_start = index + open.len();
        let end = match close {
            Some(close) => text[body_start..]
                .find(close)
                .map_or(text.len(), |offset| body_start + offset + close.len()),
            None => text[body_start..]
                .find('\n')
                .map_or(text.len(), |offset| body_start + offset),
        };
        spans.push(index..end);
        index = end;
    }
    spans
}
