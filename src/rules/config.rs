use super::{Action, BoundPair, Flags, Operand, Rule, RuleBook, Slice, SliceParseError, Tolerance, ValueSource};
use crate::registers::{RegOp, RegOperator, REG_MAX};
use crate::scan::{parse_number, KeptSet};
use serde::Deserialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::fs;
use std::path::{Path, PathBuf};

/// Rule file loaded and compiled: global options plus the rule book.
#[derive(Debug, Clone)]
pub struct RulesConfig {
    pub kept: KeptSet,
    pub fold_blanks: bool,
    pub max_reported: u32,
    pub book: RuleBook,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            kept: KeptSet::default(),
            fold_blanks: false,
            max_reported: 25,
            book: RuleBook::default(),
        }
    }
}

impl RulesConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        let raw: RawRuleFile =
            serde_json::from_str(&content).map_err(|source| ConfigError::ParseFile {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_raw(raw)
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let raw: RawRuleFile =
            serde_json::from_str(json).map_err(|source| ConfigError::ParseFile {
                path: PathBuf::from("<inline-rules>"),
                source,
            })?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawRuleFile) -> Result<Self, ConfigError> {
        if raw.max_reported == 0 {
            return Err(ConfigError::InvalidOption(
                "maxReported must be positive".to_string(),
            ));
        }
        if !raw.kept_punctuation.is_ascii() {
            return Err(ConfigError::InvalidOption(
                "keptPunctuation must be ASCII".to_string(),
            ));
        }

        let mut rules = Vec::with_capacity(raw.rules.len());
        for (index, rule) in raw.rules.into_iter().enumerate() {
            rules.push(compile_rule(index + 1, rule)?);
        }

        Ok(Self {
            kept: KeptSet::from_bytes(raw.kept_punctuation.as_bytes()),
            fold_blanks: raw.fold_blanks,
            max_reported: raw.max_reported,
            book: RuleBook::new(rules),
        })
    }
}

fn compile_rule(ordinal: usize, raw: RawRule) -> Result<Rule, ConfigError> {
    let rows = parse_slice(ordinal, "rows", &raw.rows)?;
    let cols = parse_slice(ordinal, "cols", &raw.cols)?;

    let action = match raw.action {
        RawAction::Compare => Action::Compare,
        RawAction::Skip => Action::Skip,
        RawAction::GotoTag => Action::GotoTag,
        RawAction::GotoNum => Action::GotoNum,
    };

    let tag = raw.tag.unwrap_or_default();
    let tag_reg = match raw.tag_register {
        Some(reg) => operand_register(ordinal, reg)?,
        None => 0,
    };
    match action {
        Action::GotoTag if tag.is_empty() && tag_reg == 0 => {
            return Err(ConfigError::MissingTag { ordinal, action });
        }
        Action::GotoNum if tag_reg == 0 => {
            let shape = parse_number(tag.as_bytes());
            if shape.len == 0 || shape.len != tag.len() {
                return Err(ConfigError::BadNumericTag {
                    ordinal,
                    tag: tag.clone(),
                });
            }
        }
        _ => {}
    }

    let tol = Tolerance {
        exact: raw.exact,
        abs: bound_pair(ordinal, "abs", raw.abs, raw.abs_lower)?,
        rel: bound_pair(ordinal, "rel", raw.rel, raw.rel_lower)?,
        dig: bound_pair(ordinal, "dig", raw.dig, raw.dig_lower)?,
        any: raw.any,
    };

    let mut ops = Vec::with_capacity(raw.ops.len());
    for op in raw.ops {
        let operator = RegOperator::from_keyword(&op.op).ok_or_else(|| {
            ConfigError::UnknownOperator {
                ordinal,
                keyword: op.op.clone(),
            }
        })?;
        ops.push(RegOp {
            dst: operand_register(ordinal, op.dst)?,
            op: operator,
            src: operand_register(ordinal, op.src)?,
            src2: operand_register(ordinal, op.src2)?,
        });
    }

    Ok(Rule {
        rows,
        cols,
        action,
        tol,
        flags: Flags {
            ignore: raw.ignore,
            omit: raw.omit,
            digits_only: raw.digits_only,
            swap: false,
            save: raw.save,
            nofail: raw.no_fail,
            onfail: raw.on_fail,
            trace: raw.trace,
            trace_regs: raw.trace_regs,
            group_start: action != Action::Compare,
        },
        lhs: value_source(ordinal, raw.lhs)?,
        rhs: value_source(ordinal, raw.rhs)?,
        scale: operand(ordinal, raw.scale)?.unwrap_or(Operand::literal(1.0)),
        offset: operand(ordinal, raw.offset)?.unwrap_or(Operand::literal(0.0)),
        tag,
        tag_reg,
        ops,
        source_line: ordinal,
    })
}

fn parse_slice(ordinal: usize, field: &'static str, text: &str) -> Result<Slice, ConfigError> {
    text.parse().map_err(|source| ConfigError::InvalidSlice {
        ordinal,
        field,
        source,
    })
}

fn operand_register(ordinal: usize, reg: u32) -> Result<usize, ConfigError> {
    let reg = reg as usize;
    if reg >= REG_MAX {
        return Err(ConfigError::RegisterOutOfRange { ordinal, index: reg });
    }
    Ok(reg)
}

fn operand(ordinal: usize, raw: Option<RawOperand>) -> Result<Option<Operand>, ConfigError> {
    match raw {
        None => Ok(None),
        Some(RawOperand::Literal(value)) => Ok(Some(Operand::literal(value))),
        Some(RawOperand::Register { reg }) => {
            let reg = operand_register(ordinal, reg)?;
            if reg == 0 {
                return Err(ConfigError::RegisterOutOfRange { ordinal, index: 0 });
            }
            Ok(Some(Operand::register(reg)))
        }
    }
}

fn value_source(ordinal: usize, raw: Option<RawOperand>) -> Result<ValueSource, ConfigError> {
    Ok(match operand(ordinal, raw)? {
        None => ValueSource::Parsed,
        Some(op) if op.reg > 0 => ValueSource::Register(op.reg),
        Some(op) => ValueSource::Literal(op.value),
    })
}

fn bound_pair(
    ordinal: usize,
    metric: &'static str,
    upper: Option<RawOperand>,
    lower: Option<RawOperand>,
) -> Result<Option<BoundPair>, ConfigError> {
    match (operand(ordinal, upper)?, operand(ordinal, lower)?) {
        (None, None) => Ok(None),
        (None, Some(_)) => Err(ConfigError::LowerBoundAlone { ordinal, metric }),
        (Some(upper), lower) => Ok(Some(BoundPair { upper, lower })),
    }
}

#[derive(Debug)]
pub enum ConfigError {
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },
    ParseFile {
        path: PathBuf,
        source: serde_json::Error,
    },
    InvalidOption(String),
    InvalidSlice {
        ordinal: usize,
        field: &'static str,
        source: SliceParseError,
    },
    MissingTag {
        ordinal: usize,
        action: Action,
    },
    BadNumericTag {
        ordinal: usize,
        tag: String,
    },
    UnknownOperator {
        ordinal: usize,
        keyword: String,
    },
    RegisterOutOfRange {
        ordinal: usize,
        index: usize,
    },
    LowerBoundAlone {
        ordinal: usize,
        metric: &'static str,
    },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReadFile { path, source } => {
                write!(f, "failed to read rule file '{}': {}", path.display(), source)
            }
            Self::ParseFile { path, source } => {
                write!(f, "failed to parse rule file '{}': {}", path.display(), source)
            }
            Self::InvalidOption(message) => write!(f, "invalid rule file option: {}", message),
            Self::InvalidSlice {
                ordinal,
                field,
                source,
            } => write!(f, "rule {}: {} selector: {}", ordinal, field, source),
            Self::MissingTag { ordinal, action } => {
                write!(f, "rule {}: action '{}' needs a tag", ordinal, action.as_str())
            }
            Self::BadNumericTag { ordinal, tag } => {
                write!(f, "rule {}: tag '{}' is not a numeric literal", ordinal, tag)
            }
            Self::UnknownOperator { ordinal, keyword } => {
                write!(f, "rule {}: unknown register operator '{}'", ordinal, keyword)
            }
            Self::RegisterOutOfRange { ordinal, index } => {
                write!(f, "rule {}: register {} is out of range", ordinal, index)
            }
            Self::LowerBoundAlone { ordinal, metric } => {
                write!(
                    f,
                    "rule {}: {} lower bound given without an upper bound",
                    ordinal, metric
                )
            }
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::ReadFile { source, .. } => Some(source),
            Self::ParseFile { source, .. } => Some(source),
            Self::InvalidSlice { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<ConfigError> for crate::domain::NumdiffError {
    fn from(error: ConfigError) -> Self {
        let message = error.to_string();
        match error {
            ConfigError::ReadFile { .. } => Self::io_system("IO.RULE_FILE", message),
            _ => Self::input_validation("INPUT.RULE_FILE", message),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawRuleFile {
    #[serde(rename = "keptPunctuation", default)]
    kept_punctuation: String,
    #[serde(rename = "foldBlanks", default)]
    fold_blanks: bool,
    #[serde(rename = "maxReported", default = "default_max_reported")]
    max_reported: u32,
    #[serde(default)]
    rules: Vec<RawRule>,
}

fn default_max_reported() -> u32 {
    25
}

fn default_selector() -> String {
    "*".to_string()
}

#[derive(Debug, Deserialize)]
struct RawRule {
    #[serde(default = "default_selector")]
    rows: String,
    #[serde(default = "default_selector")]
    cols: String,
    #[serde(default)]
    action: RawAction,
    #[serde(default)]
    tag: Option<String>,
    #[serde(rename = "tagRegister", default)]
    tag_register: Option<u32>,
    #[serde(default)]
    exact: bool,
    #[serde(default)]
    abs: Option<RawOperand>,
    #[serde(rename = "absLower", default)]
    abs_lower: Option<RawOperand>,
    #[serde(default)]
    rel: Option<RawOperand>,
    #[serde(rename = "relLower", default)]
    rel_lower: Option<RawOperand>,
    #[serde(default)]
    dig: Option<RawOperand>,
    #[serde(rename = "digLower", default)]
    dig_lower: Option<RawOperand>,
    #[serde(default)]
    any: bool,
    #[serde(default)]
    scale: Option<RawOperand>,
    #[serde(default)]
    offset: Option<RawOperand>,
    #[serde(default)]
    lhs: Option<RawOperand>,
    #[serde(default)]
    rhs: Option<RawOperand>,
    #[serde(default)]
    ignore: bool,
    #[serde(default)]
    omit: bool,
    #[serde(rename = "digitsOnly", default)]
    digits_only: bool,
    #[serde(default)]
    save: bool,
    #[serde(rename = "noFail", default)]
    no_fail: bool,
    #[serde(rename = "onFail", default)]
    on_fail: bool,
    #[serde(default)]
    trace: bool,
    #[serde(rename = "traceRegisters", default)]
    trace_regs: bool,
    #[serde(default)]
    ops: Vec<RawRegOp>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
enum RawAction {
    #[default]
    Compare,
    Skip,
    GotoTag,
    GotoNum,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawOperand {
    Literal(f64),
    Register { reg: u32 },
}

#[derive(Debug, Deserialize)]
struct RawRegOp {
    dst: u32,
    op: String,
    src: u32,
    #[serde(default)]
    src2: u32,
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, RulesConfig};
    use crate::registers::RegOperator;
    use crate::rules::{Action, ValueSource};

    #[test]
    fn loads_global_options_and_rules() {
        let config = RulesConfig::from_json(
            r#"
            {
              "keptPunctuation": "_",
              "foldBlanks": true,
              "maxReported": 5,
              "rules": [
                {
                  "rows": "2-10/2",
                  "cols": "3",
                  "abs": 1e-6,
                  "rel": {"reg": 20},
                  "save": true,
                  "ops": [{"dst": 10, "op": "add", "src": 1, "src2": 2}]
                }
              ]
            }
            "#,
        )
        .expect("rule file should parse");

        assert_eq!(config.kept.as_slice(), b"_");
        assert!(config.fold_blanks);
        assert_eq!(config.max_reported, 5);

        // catch-all plus the user rule
        assert_eq!(config.book.rules().len(), 2);
        let rule = &config.book.rules()[1];
        assert_eq!(rule.source_line, 1);
        assert!(rule.rows.is_element(4));
        assert!(!rule.rows.is_element(5));
        assert!(rule.flags.save);
        assert_eq!(rule.tol.abs.expect("abs bound should be set").upper.value, 1e-6);
        assert_eq!(rule.tol.rel.expect("rel bound should be set").upper.reg, 20);
        assert_eq!(rule.ops.len(), 1);
        assert_eq!(rule.ops[0].op, RegOperator::Add);
    }

    #[test]
    fn seek_actions_are_marked_as_group_starts() {
        let config = RulesConfig::from_json(
            r#"
            {
              "rules": [
                {"rows": "5-*", "action": "goto_tag", "tag": "=== RESULT ==="},
                {"rows": "9", "action": "skip"}
              ]
            }
            "#,
        )
        .expect("rule file should parse");

        let rules = config.book.rules();
        assert_eq!(rules[1].action, Action::GotoTag);
        assert!(rules[1].flags.group_start);
        assert_eq!(rules[2].action, Action::Skip);
        assert!(rules[2].flags.group_start);
    }

    #[test]
    fn literal_overrides_become_value_sources() {
        let config = RulesConfig::from_json(
            r#"
            {
              "rules": [
                {"lhs": 1.5, "rhs": {"reg": 30}, "abs": 0.1}
              ]
            }
            "#,
        )
        .expect("rule file should parse");

        let rule = &config.book.rules()[1];
        assert_eq!(rule.lhs, ValueSource::Literal(1.5));
        assert_eq!(rule.rhs, ValueSource::Register(30));
    }

    #[test]
    fn goto_num_requires_a_numeric_tag() {
        let result = RulesConfig::from_json(
            r#"
            {
              "rules": [
                {"action": "goto_num", "tag": "not-a-number"}
              ]
            }
            "#,
        );
        assert!(matches!(result, Err(ConfigError::BadNumericTag { .. })));

        let by_register = RulesConfig::from_json(
            r#"
            {
              "rules": [
                {"action": "goto_num", "tagRegister": 15, "cols": "2", "abs": 1e-9}
              ]
            }
            "#,
        )
        .expect("register tag should be accepted");
        assert_eq!(by_register.book.rules()[1].tag_reg, 15);
    }

    #[test]
    fn rejects_unknown_operator_and_zero_report_cap() {
        let bad_op = RulesConfig::from_json(
            r#"{"rules": [{"ops": [{"dst": 10, "op": "xor", "src": 1, "src2": 2}]}]}"#,
        );
        assert!(matches!(bad_op, Err(ConfigError::UnknownOperator { .. })));

        let bad_cap = RulesConfig::from_json(r#"{"maxReported": 0}"#);
        assert!(matches!(bad_cap, Err(ConfigError::InvalidOption(_))));
    }

    #[test]
    fn rejects_lower_bound_without_upper() {
        let result = RulesConfig::from_json(r#"{"rules": [{"absLower": -1.0}]}"#);
        assert!(matches!(result, Err(ConfigError::LowerBoundAlone { .. })));
    }
}
