//! The diff engine: owns the line pair, the cursors and the register
//! file, and walks both sides in lockstep under the active rule.

mod buffer;
mod comparator;
mod driver;
mod seek;
mod tokenizer;

pub use buffer::{LineBuf, PairCursor, MIN_BUF};

use crate::registers::Registers;
use crate::report::{diff_header, Emitter};
use crate::rules::{Rule, RuleContext, RuleCursor, RulesConfig};
use crate::scan::KeptSet;
use crate::source::{LineEnd, LineSource};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::io::{self, Write};
use std::ops::{BitOr, BitOrAssign};

/// Outcome bits of a numeric comparison. Empty means the pair passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Failure(u8);

impl Failure {
    pub const NONE: Self = Self(0);
    /// Strict representations differ.
    pub const EXACT: Self = Self(1);
    pub const ABSOLUTE: Self = Self(1 << 1);
    pub const RELATIVE: Self = Self(1 << 2);
    pub const DIGITS: Self = Self(1 << 3);
    /// A number was present on one side only.
    pub const MISSING: Self = Self(1 << 4);
    /// All tolerance-metric bits.
    pub const METRICS: Self = Self(Self::ABSOLUTE.0 | Self::RELATIVE.0 | Self::DIGITS.0);

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersection(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }
}

impl BitOr for Failure {
    type Output = Self;

    fn bitor(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl BitOrAssign for Failure {
    fn bitor_assign(&mut self, other: Self) {
        self.0 |= other.0;
    }
}

/// Non-EOF / EOF marker returned by the line and seek operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    Ok,
    Eof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Lhs,
    Rhs,
}

impl Display for Side {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Lhs => "lhs",
            Self::Rhs => "rhs",
        })
    }
}

#[derive(Debug)]
pub enum EngineError {
    Io { side: Side, source: io::Error },
    Write { source: io::Error },
    InvalidOption(String),
    NoRule { row: u32, col: u32 },
    RuleMismatch { row: u32, col: u32 },
}

impl Display for EngineError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { side, source } => write!(f, "read failure on {} input: {}", side, source),
            Self::Write { source } => write!(f, "write failure on echo output: {}", source),
            Self::InvalidOption(message) => write!(f, "invalid engine option: {}", message),
            Self::NoRule { row, col } => {
                write!(f, "no rule applies at line {} column {}", row, col)
            }
            Self::RuleMismatch { row, col } => {
                write!(
                    f,
                    "incremental and random-access rule lookups disagree at line {} column {}",
                    row, col
                )
            }
        }
    }
}

impl Error for EngineError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } | Self::Write { source } => Some(source),
            _ => None,
        }
    }
}

impl From<EngineError> for crate::domain::NumdiffError {
    fn from(error: EngineError) -> Self {
        let message = error.to_string();
        match error {
            EngineError::Io { .. } | EngineError::Write { .. } => {
                Self::io_system("IO.ENGINE", message)
            }
            EngineError::InvalidOption(_) => Self::input_validation("INPUT.ENGINE_OPTION", message),
            EngineError::NoRule { .. } | EngineError::RuleMismatch { .. } => {
                Self::internal("SYS.RULE_LOOKUP", message)
            }
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Engine options; the kept set and the blank/report defaults usually
/// come from the rule file.
#[derive(Debug, Clone)]
pub struct Options {
    /// Cap on reported diffs; further diffs are counted silently.
    pub max_reported: u32,
    /// Fold runs of blanks on both sides into one step.
    pub fold_blanks: bool,
    /// Cross-validate incremental rule lookup against random access.
    pub cross_check: bool,
    pub kept: KeptSet,
    pub lhs_name: String,
    pub rhs_name: String,
    pub test_id: Option<String>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            max_reported: 25,
            fold_blanks: false,
            cross_check: false,
            kept: KeptSet::default(),
            lhs_name: "lhs".to_string(),
            rhs_name: "rhs".to_string(),
            test_id: None,
        }
    }
}

/// Counters exposed to embedders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Info {
    pub row: u32,
    pub col: u32,
    pub diffs: u32,
    pub numbers: u64,
}

/// Everything the tokenizer and comparator need besides the buffers, so
/// the seek operations can run them against substitute buffers.
pub(crate) struct Core<'a> {
    pub(crate) ctx: &'a dyn RuleContext,
    pub(crate) emit: &'a mut dyn Emitter,
    pub(crate) regs: Registers,
    pub(crate) opts: Options,
    pub(crate) row: u32,
    pub(crate) col: u32,
    pub(crate) cnt: u32,
    pub(crate) num: u64,
    pub(crate) cursor: RuleCursor,
    pub(crate) trace_scope: bool,
}

impl<'a> Core<'a> {
    pub(crate) fn trace(&mut self, message: impl FnOnce() -> String) {
        if self.trace_scope || self.emit.trace_enabled() {
            let message = message();
            self.emit.trace(&message);
        }
    }

    /// Count a failure against the cap. Returns whether it should be
    /// reported, emitting the one-shot header before the first report.
    pub(crate) fn count_failure(&mut self, nofail: bool) -> bool {
        if nofail {
            return false;
        }
        self.cnt += 1;
        if self.cnt > self.opts.max_reported {
            return false;
        }
        if self.cnt == 1 {
            let header = diff_header(
                &self.opts.lhs_name,
                &self.opts.rhs_name,
                self.opts.test_id.as_deref(),
            );
            self.emit.warning(&header);
        }
        true
    }

    /// Rule applying at `(row, col)`; in check mode the incremental and
    /// random-access lookups are cross-validated and a disagreement dumps
    /// both candidates with the whole book before failing.
    pub(crate) fn lookup(&mut self, row: u32, col: u32) -> EngineResult<&'a Rule> {
        let ctx = self.ctx;
        let rule = ctx
            .advance(&mut self.cursor, row, col)
            .ok_or(EngineError::NoRule { row, col })?;

        if self.opts.cross_check {
            let random = ctx.rule_at(row, col);
            let agree = random.is_some_and(|candidate| std::ptr::eq(candidate, rule));
            if !agree {
                self.emit
                    .warning(&format!("rule lookups disagree at {}:{}", row, col));
                self.emit.warning(&format!(
                    "incremental lookup selects #{}",
                    index_text(ctx.find_index(rule))
                ));
                self.emit.warning(&format!(
                    "random-access lookup selects #{}",
                    index_text(random.and_then(|candidate| ctx.find_index(candidate)))
                ));
                self.emit.warning("rule list:");
                let rendered = ctx.render();
                for line in rendered.lines() {
                    self.emit.warning(line);
                }
                return Err(EngineError::RuleMismatch { row, col });
            }
        }

        Ok(rule)
    }

    pub(crate) fn trace_rule(&mut self, rule: &Rule) {
        let index = index_text(self.ctx.find_index(rule));
        let line = self.ctx.find_line(rule).unwrap_or(0);
        let summary = rule.summary();
        self.emit
            .trace(&format!("~>active: rule #{index}, line {line}: {summary}"));
    }
}

fn index_text(index: Option<usize>) -> String {
    index.map_or_else(|| "?".to_string(), |index| index.to_string())
}

pub struct Engine<'a, S> {
    lhs_src: S,
    rhs_src: S,
    lhs_buf: LineBuf,
    rhs_buf: LineBuf,
    cur: PairCursor,
    core: Core<'a>,
}

impl<'a, S: LineSource> Engine<'a, S> {
    /// Build an engine over two line sources. Buffer capacity and
    /// register count are clamped to their floors (the register count
    /// also to its cap).
    pub fn new(
        lhs_src: S,
        rhs_src: S,
        ctx: &'a dyn RuleContext,
        emit: &'a mut dyn Emitter,
        buf_capacity: usize,
        registers: usize,
    ) -> Self {
        let capacity = buf_capacity.max(MIN_BUF);
        Self {
            lhs_src,
            rhs_src,
            lhs_buf: LineBuf::with_capacity(capacity),
            rhs_buf: LineBuf::with_capacity(capacity),
            cur: PairCursor::default(),
            core: Core {
                ctx,
                emit,
                regs: Registers::new(registers),
                opts: Options::default(),
                row: 0,
                col: 0,
                cnt: 0,
                num: 0,
                cursor: RuleCursor::default(),
                trace_scope: false,
            },
        }
    }

    /// Reset buffers, registers and counters; configuration stays.
    pub fn clear(&mut self) {
        self.lhs_buf.clear();
        self.rhs_buf.clear();
        self.cur = PairCursor::default();
        self.core.regs.clear();
        self.core.row = 0;
        self.core.col = 0;
        self.core.cnt = 0;
        self.core.num = 0;
        self.core.cursor = RuleCursor::default();
        self.core.trace_scope = false;
    }

    pub fn set_options(
        &mut self,
        keep: Option<u32>,
        blank: Option<bool>,
        check: Option<bool>,
    ) -> EngineResult<()> {
        if let Some(keep) = keep {
            if keep == 0 {
                return Err(EngineError::InvalidOption(
                    "number of kept diffs must be positive".to_string(),
                ));
            }
            self.core.opts.max_reported = keep;
        }
        if let Some(blank) = blank {
            self.core.opts.fold_blanks = blank;
        }
        if let Some(check) = check {
            self.core.opts.cross_check = check;
        }
        Ok(())
    }

    /// Take the rule file's global options: kept punctuation, blank
    /// folding and the report cap.
    pub fn apply_config(&mut self, config: &RulesConfig) {
        self.core.opts.kept = config.kept;
        self.core.opts.fold_blanks = config.fold_blanks;
        self.core.opts.max_reported = config.max_reported;
    }

    pub fn set_labels(&mut self, lhs_name: &str, rhs_name: &str, test_id: Option<&str>) {
        self.core.opts.lhs_name = lhs_name.to_string();
        self.core.opts.rhs_name = rhs_name.to_string();
        self.core.opts.test_id = test_id.map(str::to_string);
    }

    pub fn kept(&self) -> KeptSet {
        self.core.opts.kept
    }

    pub fn set_kept(&mut self, kept: KeptSet) {
        self.core.opts.kept = kept;
    }

    pub fn registers(&self) -> &Registers {
        &self.core.regs
    }

    pub fn get_info(&self) -> Info {
        Info {
            row: self.core.row,
            col: self.core.col,
            diffs: self.core.cnt,
            numbers: self.core.num,
        }
    }

    /// EOF state of the inputs: both sides, or either side.
    pub fn feof(&self, both: bool) -> bool {
        if both {
            self.lhs_src.at_eof() && self.rhs_src.at_eof()
        } else {
            self.lhs_src.at_eof() || self.rhs_src.at_eof()
        }
    }

    /// Both cursors sit on the end of their lines.
    pub fn is_empty(&self) -> bool {
        self.lhs_buf.byte(self.cur.lhs) == 0 && self.rhs_buf.byte(self.cur.rhs) == 0
    }

    fn reset_line(&mut self) {
        self.lhs_buf.clear();
        self.rhs_buf.clear();
        self.cur = PairCursor::default();
    }

    fn enter_line(&mut self) {
        self.core.col = 0;
        self.core.row += 1;
    }

    pub fn read_line(&mut self) -> EngineResult<ReadStatus> {
        self.reset_line();

        let lhs_end = self
            .lhs_buf
            .fill_from(&mut self.lhs_src)
            .map_err(|source| EngineError::Io {
                side: Side::Lhs,
                source,
            })?;
        let rhs_end = self
            .rhs_buf
            .fill_from(&mut self.rhs_src)
            .map_err(|source| EngineError::Io {
                side: Side::Rhs,
                source,
            })?;

        self.enter_line();
        let (row, lhs, rhs) = (
            self.core.row,
            self.lhs_buf.snippet(0),
            self.rhs_buf.snippet(0),
        );
        self.core
            .trace(move || format!("read line {}: '{}'|'{}'", row, lhs, rhs));

        Ok(read_status(lhs_end, rhs_end))
    }

    pub fn skip_line(&mut self) -> EngineResult<ReadStatus> {
        self.reset_line();

        let lhs_end = self.lhs_src.skip_line().map_err(|source| EngineError::Io {
            side: Side::Lhs,
            source,
        })?;
        let rhs_end = self.rhs_src.skip_line().map_err(|source| EngineError::Io {
            side: Side::Rhs,
            source,
        })?;

        self.enter_line();
        Ok(read_status(lhs_end, rhs_end))
    }

    /// Inject a pre-made line pair instead of reading the sources.
    pub fn fill_line(&mut self, lhs: &str, rhs: &str) -> ReadStatus {
        self.reset_line();
        self.lhs_buf.set_text(lhs);
        self.rhs_buf.set_text(rhs);
        self.enter_line();
        ReadStatus::Ok
    }

    /// Echo the held pair to the optional output sinks.
    pub fn out_line(
        &mut self,
        lhs_out: Option<&mut dyn Write>,
        rhs_out: Option<&mut dyn Write>,
    ) -> EngineResult<()> {
        if let Some(out) = lhs_out {
            write_echo(out, self.lhs_buf.as_slice())?;
        }
        if let Some(out) = rhs_out {
            write_echo(out, self.rhs_buf.as_slice())?;
        }
        Ok(())
    }

    /// Advance to the next pair of numeric spans under `rule`. Returns
    /// the 1-based numeric column, or 0 at end of line or on a reported
    /// text difference.
    pub fn next_num(&mut self, rule: &Rule) -> u32 {
        self.core
            .next_num(&self.lhs_buf, &self.rhs_buf, &mut self.cur, rule)
    }

    /// Compare the pair of numeric spans under the cursors against
    /// `rule`, advancing past them. Returns the failure bits.
    pub fn test_num(&mut self, rule: &Rule) -> Failure {
        self.core
            .test_num(&self.lhs_buf, &self.rhs_buf, &mut self.cur, rule)
    }
}

fn read_status(lhs: LineEnd, rhs: LineEnd) -> ReadStatus {
    if lhs == LineEnd::Eof || rhs == LineEnd::Eof {
        ReadStatus::Eof
    } else {
        ReadStatus::Ok
    }
}

fn write_echo(out: &mut dyn Write, line: &[u8]) -> EngineResult<()> {
    out.write_all(line)
        .and_then(|()| out.write_all(b"\n"))
        .map_err(|source| EngineError::Write { source })
}
