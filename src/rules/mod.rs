//! Rule model and the rule book consumed by the engine.
//!
//! A rule selects a row/column range and says how numbers found there are
//! compared: an action, a tolerance composition, a set of behavior flags,
//! operand overrides, and an ordered list of register operations.

mod config;

pub use config::{ConfigError, RulesConfig};

use crate::registers::{RegOp, Registers};
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Range with stride over 1-based ordinals (rows or numeric columns).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slice {
    pub first: u32,
    pub last: u32,
    pub stride: u32,
}

impl Slice {
    pub const FULL: Slice = Slice {
        first: 1,
        last: u32::MAX,
        stride: 1,
    };

    pub const fn single(at: u32) -> Self {
        Self {
            first: at,
            last: at,
            stride: 1,
        }
    }

    pub fn is_element(&self, at: u32) -> bool {
        at >= self.first && at <= self.last && (at - self.first) % self.stride == 0
    }

    pub fn is_full(&self) -> bool {
        self.first <= 1 && self.last == u32::MAX && self.stride == 1
    }
}

impl Default for Slice {
    fn default() -> Self {
        Self::FULL
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceParseError {
    text: String,
    reason: &'static str,
}

impl Display for SliceParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid slice '{}': {}", self.text, self.reason)
    }
}

impl std::error::Error for SliceParseError {}

impl FromStr for Slice {
    type Err = SliceParseError;

    /// Accepts `*`, `N`, `A-B`, `A-*` and `A-B/S`.
    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let fail = |reason| SliceParseError {
            text: text.to_string(),
            reason,
        };

        let text = text.trim();
        if text == "*" {
            return Ok(Self::FULL);
        }

        let (range, stride) = match text.split_once('/') {
            Some((range, stride)) => {
                let stride: u32 = stride
                    .trim()
                    .parse()
                    .map_err(|_| fail("stride is not a positive integer"))?;
                if stride == 0 {
                    return Err(fail("stride is not a positive integer"));
                }
                (range, stride)
            }
            None => (text, 1),
        };

        let (first, last) = match range.split_once('-') {
            Some((first, last)) => {
                let first: u32 = first
                    .trim()
                    .parse()
                    .map_err(|_| fail("range start is not a positive integer"))?;
                let last = match last.trim() {
                    "*" => u32::MAX,
                    last => last
                        .parse()
                        .map_err(|_| fail("range end is not a positive integer"))?,
                };
                (first, last)
            }
            None => {
                let at: u32 = range
                    .trim()
                    .parse()
                    .map_err(|_| fail("ordinal is not a positive integer"))?;
                (at, at)
            }
        };

        if first == 0 {
            return Err(fail("ordinals are 1-based"));
        }
        if last < first {
            return Err(fail("range end precedes range start"));
        }

        Ok(Self {
            first,
            last,
            stride,
        })
    }
}

/// Scalar operand of a rule, either a literal or a register read.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Operand {
    pub value: f64,
    pub reg: usize,
}

impl Operand {
    pub const fn literal(value: f64) -> Self {
        Self { value, reg: 0 }
    }

    pub const fn register(reg: usize) -> Self {
        Self { value: 0.0, reg }
    }

    pub fn resolve(&self, regs: &Registers) -> f64 {
        regs.get(self.reg, self.value)
    }
}

/// Upper bound with an optional explicit lower bound; without one the
/// lower bound mirrors the resolved upper bound negated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundPair {
    pub upper: Operand,
    pub lower: Option<Operand>,
}

impl BoundPair {
    pub const fn symmetric(upper: f64) -> Self {
        Self {
            upper: Operand::literal(upper),
            lower: None,
        }
    }

    pub fn resolve(&self, regs: &Registers) -> (f64, f64) {
        let upper = self.upper.resolve(regs);
        let lower = match &self.lower {
            Some(operand) => operand.resolve(regs),
            None => -upper,
        };
        (lower, upper)
    }
}

/// Where an effective comparison value comes from.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum ValueSource {
    #[default]
    Parsed,
    Literal(f64),
    Register(usize),
}

impl ValueSource {
    pub fn resolve(&self, regs: &Registers, parsed: f64) -> f64 {
        match *self {
            Self::Parsed => parsed,
            Self::Literal(value) => value,
            Self::Register(reg) => regs.get(reg, parsed),
        }
    }

    pub fn is_parsed(&self) -> bool {
        matches!(self, Self::Parsed)
    }
}

/// Line-level action of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Action {
    /// Discard this line on both sides without comparing.
    Skip,
    /// Advance both sides to the next line containing the tag.
    GotoTag,
    /// Advance both sides to the next line whose selected column holds
    /// the tag value.
    GotoNum,
    #[default]
    Compare,
}

impl Action {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Skip => "skip",
            Self::GotoTag => "goto_tag",
            Self::GotoNum => "goto_num",
            Self::Compare => "compare",
        }
    }
}

/// Tolerance composition: which error metrics apply, with strict
/// representation equality as an exclusive alternative.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Tolerance {
    pub exact: bool,
    pub abs: Option<BoundPair>,
    pub rel: Option<BoundPair>,
    pub dig: Option<BoundPair>,
    /// Accept the pair when any one requested metric is within bounds.
    pub any: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags {
    pub ignore: bool,
    pub omit: bool,
    /// Search digits only, skipping non-digit bytes on each side
    /// independently.
    pub digits_only: bool,
    /// Exchange effective values after parsing (set by the number seek).
    pub swap: bool,
    /// Write registers even when the pair failed.
    pub save: bool,
    /// Do not report or count failures.
    pub nofail: bool,
    /// Fire the rule book's failure hook.
    pub onfail: bool,
    pub trace: bool,
    pub trace_regs: bool,
    /// First rule of a new logical section; breaks the column loop.
    pub group_start: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub rows: Slice,
    pub cols: Slice,
    pub action: Action,
    pub tol: Tolerance,
    pub flags: Flags,
    pub lhs: ValueSource,
    pub rhs: ValueSource,
    pub scale: Operand,
    pub offset: Operand,
    pub tag: String,
    /// Register whose value stands in for the tag when non-zero.
    pub tag_reg: usize,
    pub ops: Vec<RegOp>,
    /// Ordinal of the rule in its source file; 0 for built-ins.
    pub source_line: usize,
}

impl Default for Rule {
    fn default() -> Self {
        Self {
            rows: Slice::FULL,
            cols: Slice::FULL,
            action: Action::Compare,
            tol: Tolerance::default(),
            flags: Flags::default(),
            lhs: ValueSource::Parsed,
            rhs: ValueSource::Parsed,
            scale: Operand::literal(1.0),
            offset: Operand::literal(0.0),
            tag: String::new(),
            tag_reg: 0,
            ops: Vec::new(),
            source_line: 0,
        }
    }
}

impl Rule {
    /// Catch-all strict-equality rule seeding every book.
    fn catch_all() -> Self {
        Self {
            tol: Tolerance {
                exact: true,
                ..Tolerance::default()
            },
            ..Self::default()
        }
    }

    fn selector_text(slice: &Slice) -> String {
        if slice.is_full() {
            "*".to_string()
        } else if slice.first == slice.last {
            format!("{}", slice.first)
        } else {
            let last = if slice.last == u32::MAX {
                "*".to_string()
            } else {
                format!("{}", slice.last)
            };
            if slice.stride == 1 {
                format!("{}-{}", slice.first, last)
            } else {
                format!("{}-{}/{}", slice.first, last, slice.stride)
            }
        }
    }

    pub fn summary(&self) -> String {
        let mut parts = vec![
            format!("rows {}", Self::selector_text(&self.rows)),
            format!("cols {}", Self::selector_text(&self.cols)),
            self.action.as_str().to_string(),
        ];
        if self.tol.exact {
            parts.push("exact".to_string());
        }
        if self.tol.abs.is_some() {
            parts.push("abs".to_string());
        }
        if self.tol.rel.is_some() {
            parts.push("rel".to_string());
        }
        if self.tol.dig.is_some() {
            parts.push("dig".to_string());
        }
        if self.tol.any {
            parts.push("any".to_string());
        }
        let flags = [
            (self.flags.ignore, "ignore"),
            (self.flags.omit, "omit"),
            (self.flags.digits_only, "digits-only"),
            (self.flags.save, "save"),
            (self.flags.nofail, "nofail"),
            (self.flags.onfail, "onfail"),
            (self.flags.trace, "trace"),
            (self.flags.trace_regs, "trace-regs"),
            (self.flags.group_start, "group"),
        ];
        for (set, name) in flags {
            if set {
                parts.push(name.to_string());
            }
        }
        if !self.tag.is_empty() {
            parts.push(format!("tag '{}'", self.tag));
        }
        parts.join(" ")
    }
}

/// Incremental lookup state, owned by the engine: remembers how many
/// leading rules can no longer match any future row.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleCursor {
    pub start: usize,
}

/// Lookup interface the engine drives. Both lookups must agree for every
/// `(row, col)`; the engine's check mode cross-validates them.
pub trait RuleContext {
    /// Rule applying at `(row, col)`, advancing the cursor past rules
    /// that are permanently exhausted for the monotonically non-decreasing
    /// row sequence.
    fn advance<'a>(&'a self, cursor: &mut RuleCursor, row: u32, col: u32) -> Option<&'a Rule>;

    /// Rule applying at `(row, col)` without any state.
    fn rule_at(&self, row: u32, col: u32) -> Option<&Rule>;

    /// Failure hook fired for rules that request it.
    fn on_fail(&self, rule: &Rule);

    /// Position of a rule previously returned by a lookup.
    fn find_index(&self, rule: &Rule) -> Option<usize>;

    /// Source-file ordinal of a rule previously returned by a lookup.
    fn find_line(&self, rule: &Rule) -> Option<usize>;

    /// Human-readable dump of the whole rule list.
    fn render(&self) -> String;
}

/// Ordered rule list: among the rules matching a position, the last one
/// in file order wins. Index 0 is the built-in strict-equality catch-all,
/// so lookups never come back empty.
#[derive(Debug, Clone)]
pub struct RuleBook {
    rules: Vec<Rule>,
    failed: RefCell<BTreeSet<usize>>,
}

impl RuleBook {
    pub fn new(rules: Vec<Rule>) -> Self {
        let mut all = Vec::with_capacity(rules.len() + 1);
        all.push(Rule::catch_all());
        all.extend(rules);
        Self {
            rules: all,
            failed: RefCell::new(BTreeSet::new()),
        }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Indices recorded by the failure hook, in ascending order.
    pub fn failed_rules(&self) -> Vec<usize> {
        self.failed.borrow().iter().copied().collect()
    }

    fn lookup_from(&self, start: usize, row: u32, col: u32) -> Option<&Rule> {
        self.rules[start..]
            .iter()
            .filter(|rule| rule.rows.is_element(row))
            .filter(|rule| col == 0 || rule.cols.is_element(col))
            .last()
    }
}

impl Default for RuleBook {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl RuleContext for RuleBook {
    fn advance<'a>(&'a self, cursor: &mut RuleCursor, row: u32, col: u32) -> Option<&'a Rule> {
        while cursor.start < self.rules.len() && self.rules[cursor.start].rows.last < row {
            cursor.start += 1;
        }
        self.lookup_from(cursor.start, row, col)
    }

    fn rule_at(&self, row: u32, col: u32) -> Option<&Rule> {
        self.lookup_from(0, row, col)
    }

    fn on_fail(&self, rule: &Rule) {
        if let Some(index) = self.find_index(rule) {
            self.failed.borrow_mut().insert(index);
        }
    }

    fn find_index(&self, rule: &Rule) -> Option<usize> {
        self.rules
            .iter()
            .position(|candidate| std::ptr::eq(candidate, rule))
    }

    fn find_line(&self, rule: &Rule) -> Option<usize> {
        self.find_index(rule).map(|index| self.rules[index].source_line)
    }

    fn render(&self) -> String {
        self.rules
            .iter()
            .enumerate()
            .map(|(index, rule)| {
                format!("#{} (line {}) {}", index, rule.source_line, rule.summary())
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::{
        Action, BoundPair, Operand, Rule, RuleBook, RuleContext, RuleCursor, Slice, Tolerance,
        ValueSource,
    };
    use crate::registers::Registers;

    #[test]
    fn slice_parsing_covers_all_forms() {
        let full: Slice = "*".parse().expect("full slice should parse");
        assert!(full.is_full());

        let single: Slice = "7".parse().expect("single slice should parse");
        assert_eq!(single, Slice::single(7));

        let range: Slice = "3-9".parse().expect("range should parse");
        assert_eq!(range, Slice { first: 3, last: 9, stride: 1 });

        let strided: Slice = "3-9/2".parse().expect("strided range should parse");
        assert!(strided.is_element(3));
        assert!(!strided.is_element(4));
        assert!(strided.is_element(9));

        let open: Slice = "5-*".parse().expect("open range should parse");
        assert!(open.is_element(1_000_000));
        assert!(!open.is_element(4));
    }

    #[test]
    fn slice_parsing_rejects_malformed_text() {
        assert!("0".parse::<Slice>().is_err());
        assert!("9-3".parse::<Slice>().is_err());
        assert!("3-9/0".parse::<Slice>().is_err());
        assert!("a-b".parse::<Slice>().is_err());
    }

    #[test]
    fn operand_resolution_prefers_register_content() {
        let mut regs = Registers::new(0);
        regs.set(10, 2.5);

        assert_eq!(Operand::literal(1.5).resolve(&regs), 1.5);
        assert_eq!(Operand::register(10).resolve(&regs), 2.5);
        // index 0 is not a register, the literal stands
        assert_eq!(Operand { value: 4.0, reg: 0 }.resolve(&regs), 4.0);
    }

    #[test]
    fn bound_pair_mirrors_upper_without_lower() {
        let regs = Registers::new(0);
        let symmetric = BoundPair::symmetric(1e-6);
        assert_eq!(symmetric.resolve(&regs), (-1e-6, 1e-6));

        let explicit = BoundPair {
            upper: Operand::literal(2.0),
            lower: Some(Operand::literal(-0.5)),
        };
        assert_eq!(explicit.resolve(&regs), (-0.5, 2.0));
    }

    #[test]
    fn value_source_resolution_order() {
        let mut regs = Registers::new(0);
        regs.set(12, 9.0);

        assert_eq!(ValueSource::Parsed.resolve(&regs, 3.0), 3.0);
        assert_eq!(ValueSource::Literal(5.0).resolve(&regs, 3.0), 5.0);
        assert_eq!(ValueSource::Register(12).resolve(&regs, 3.0), 9.0);
    }

    #[test]
    fn book_seeds_a_strict_catch_all() {
        let book = RuleBook::default();
        let rule = book.rule_at(1, 1).expect("catch-all should match anywhere");
        assert!(rule.tol.exact);
        assert_eq!(rule.action, Action::Compare);
    }

    #[test]
    fn last_matching_rule_wins() {
        let loose = Rule {
            tol: Tolerance {
                abs: Some(BoundPair::symmetric(1e-3)),
                ..Tolerance::default()
            },
            ..Rule::default()
        };
        let narrow = Rule {
            rows: Slice::single(5),
            tol: Tolerance {
                abs: Some(BoundPair::symmetric(1e-9)),
                ..Tolerance::default()
            },
            ..Rule::default()
        };
        let book = RuleBook::new(vec![loose, narrow]);

        let general = book.rule_at(1, 1).expect("row 1 should match");
        let refined = book.rule_at(5, 1).expect("row 5 should match");
        assert_eq!(book.find_index(general), Some(1));
        assert_eq!(book.find_index(refined), Some(2));
    }

    #[test]
    fn advance_agrees_with_random_access_lookup() {
        let early = Rule {
            rows: Slice { first: 1, last: 3, stride: 1 },
            ..Rule::default()
        };
        let late = Rule {
            rows: Slice { first: 4, last: u32::MAX, stride: 1 },
            ..Rule::default()
        };
        let book = RuleBook::new(vec![early, late]);
        let mut cursor = RuleCursor::default();

        for row in 1..10 {
            let incremental = book
                .advance(&mut cursor, row, 1)
                .expect("incremental lookup should match");
            let random = book.rule_at(row, 1).expect("random lookup should match");
            assert!(std::ptr::eq(incremental, random), "row {row}");
        }
    }

    #[test]
    fn failure_hook_records_rule_indices() {
        let book = RuleBook::default();
        let rule = book.rule_at(1, 1).expect("catch-all should match");
        book.on_fail(rule);
        assert_eq!(book.failed_rules(), vec![0]);
    }
}
