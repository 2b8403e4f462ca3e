//! Batch mode: run the engine over a manifest of file pairs, selecting a
//! rule file per pair through a glob policy, and emit a JSON report with
//! a human summary.

use crate::domain::{NumdiffError, NumdiffResult};
use crate::engine::{Engine, EngineError};
use crate::report::LogEmitter;
use crate::rules::{ConfigError, RulesConfig};
use crate::source::ByteLines;
use globset::{Glob, GlobMatcher};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone)]
pub struct SuiteRunnerConfig {
    pub manifest_path: PathBuf,
    pub policy_path: Option<PathBuf>,
    pub report_path: PathBuf,
}

impl Default for SuiteRunnerConfig {
    fn default() -> Self {
        Self {
            manifest_path: PathBuf::from("manifest.json"),
            policy_path: None,
            report_path: PathBuf::from("numdiff-report.json"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SuiteRunReport {
    pub generated_at_unix_seconds: u64,
    pub passed: bool,
    pub manifest_path: String,
    pub policy_path: Option<String>,
    pub pair_count: usize,
    pub passed_pair_count: usize,
    pub failed_pair_count: usize,
    pub pairs: Vec<PairReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PairReport {
    pub pair_id: String,
    pub lhs_path: String,
    pub rhs_path: String,
    pub rules_path: Option<String>,
    pub passed: bool,
    pub diff_count: u32,
    pub number_count: u64,
    pub row_count: u32,
    pub failed_rules: Vec<usize>,
}

pub fn run_suite(config: &SuiteRunnerConfig) -> NumdiffResult<SuiteRunReport> {
    let manifest = load_manifest(&config.manifest_path).map_err(NumdiffError::from)?;
    let policy = match &config.policy_path {
        Some(path) => Some(load_policy(path).map_err(NumdiffError::from)?),
        None => None,
    };

    let mut pairs = Vec::with_capacity(manifest.pairs.len());
    for pair in &manifest.pairs {
        pairs.push(compare_pair(pair, policy.as_ref()).map_err(NumdiffError::from)?);
    }

    let pair_count = pairs.len();
    let passed_pair_count = pairs.iter().filter(|pair| pair.passed).count();
    let failed_pair_count = pair_count.saturating_sub(passed_pair_count);

    let report = SuiteRunReport {
        generated_at_unix_seconds: current_unix_timestamp_seconds(),
        passed: failed_pair_count == 0,
        manifest_path: config.manifest_path.display().to_string(),
        policy_path: config
            .policy_path
            .as_ref()
            .map(|path| path.display().to_string()),
        pair_count,
        passed_pair_count,
        failed_pair_count,
        pairs,
    };

    write_report_file(&config.report_path, &report).map_err(NumdiffError::from)?;
    Ok(report)
}

pub fn render_human_summary(report: &SuiteRunReport) -> String {
    let mut lines = Vec::new();
    let status = if report.passed { "PASS" } else { "FAIL" };
    lines.push(format!("Suite status: {}", status));
    lines.push(format!(
        "Pairs: {} total ({} passed, {} failed)",
        report.pair_count, report.passed_pair_count, report.failed_pair_count
    ));

    for pair in &report.pairs {
        let pair_status = if pair.passed { "PASS" } else { "FAIL" };
        lines.push(format!(
            "Pair {}: {} ({} numbers over {} rows, {} diffs)",
            pair.pair_id, pair_status, pair.number_count, pair.row_count, pair.diff_count
        ));
        if !pair.failed_rules.is_empty() {
            let failed: Vec<String> = pair
                .failed_rules
                .iter()
                .map(|index| format!("#{index}"))
                .collect();
            lines.push(format!("  failing rules: {}", failed.join(", ")));
        }
    }

    lines.join("\n")
}

fn compare_pair(pair: &ManifestPair, policy: Option<&CompiledPolicy>) -> Result<PairReport, SuiteError> {
    let rules_path = policy.and_then(|policy| policy.rules_for(pair));
    let rules = match rules_path {
        Some(path) => RulesConfig::from_path(path).map_err(SuiteError::Rules)?,
        None => RulesConfig::default(),
    };

    let lhs = ByteLines::open(&pair.lhs_path).map_err(|source| SuiteError::OpenInput {
        path: PathBuf::from(&pair.lhs_path),
        source,
    })?;
    let rhs = ByteLines::open(&pair.rhs_path).map_err(|source| SuiteError::OpenInput {
        path: PathBuf::from(&pair.rhs_path),
        source,
    })?;

    let mut emitter = LogEmitter;
    let mut engine = Engine::new(lhs, rhs, &rules.book, &mut emitter, 0, 0);
    engine.apply_config(&rules);
    engine.set_labels(&pair.lhs_path, &pair.rhs_path, Some(&pair.id));
    engine.run(None, None).map_err(SuiteError::Engine)?;

    let info = engine.get_info();
    Ok(PairReport {
        pair_id: pair.id.clone(),
        lhs_path: pair.lhs_path.clone(),
        rhs_path: pair.rhs_path.clone(),
        rules_path: rules_path.map(|path| path.display().to_string()),
        passed: info.diffs == 0,
        diff_count: info.diffs,
        number_count: info.numbers,
        row_count: info.row,
        failed_rules: rules.book.failed_rules(),
    })
}

fn current_unix_timestamp_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}

fn load_manifest(path: &Path) -> Result<Manifest, SuiteError> {
    let content = fs::read_to_string(path).map_err(|source| SuiteError::ReadManifest {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| SuiteError::ParseManifest {
        path: path.to_path_buf(),
        source,
    })
}

fn load_policy(path: &Path) -> Result<CompiledPolicy, SuiteError> {
    let content = fs::read_to_string(path).map_err(|source| SuiteError::ReadPolicy {
        path: path.to_path_buf(),
        source,
    })?;
    let raw: RawPolicy =
        serde_json::from_str(&content).map_err(|source| SuiteError::ParsePolicy {
            path: path.to_path_buf(),
            source,
        })?;

    let mut categories = Vec::with_capacity(raw.categories.len());
    for category in raw.categories {
        let mut matchers = Vec::with_capacity(category.pair_globs.len());
        for pattern in category.pair_globs {
            let matcher = Glob::new(&pattern)
                .map_err(|source| SuiteError::InvalidGlob {
                    pattern: pattern.clone(),
                    source,
                })?
                .compile_matcher();
            matchers.push(matcher);
        }
        categories.push(CompiledCategory {
            rules_path: category.rules_path,
            matchers,
        });
    }

    Ok(CompiledPolicy {
        default_rules_path: raw.default_rules_path,
        categories,
    })
}

fn write_report_file(path: &Path, report: &SuiteRunReport) -> Result<(), SuiteError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|source| SuiteError::WriteReport {
                path: path.to_path_buf(),
                source,
            })?;
        }
    }
    let json = serde_json::to_string_pretty(report).map_err(|source| SuiteError::RenderReport {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, json).map_err(|source| SuiteError::WriteReport {
        path: path.to_path_buf(),
        source,
    })
}

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default)]
    pairs: Vec<ManifestPair>,
}

#[derive(Debug, Deserialize)]
struct ManifestPair {
    id: String,
    #[serde(rename = "lhsPath")]
    lhs_path: String,
    #[serde(rename = "rhsPath")]
    rhs_path: String,
}

#[derive(Debug, Deserialize)]
struct RawPolicy {
    #[serde(rename = "defaultRulesPath", default)]
    default_rules_path: Option<PathBuf>,
    #[serde(default)]
    categories: Vec<RawPolicyCategory>,
}

#[derive(Debug, Deserialize)]
struct RawPolicyCategory {
    #[serde(rename = "pairGlobs", default)]
    pair_globs: Vec<String>,
    #[serde(rename = "rulesPath")]
    rules_path: PathBuf,
}

#[derive(Debug)]
struct CompiledPolicy {
    default_rules_path: Option<PathBuf>,
    categories: Vec<CompiledCategory>,
}

#[derive(Debug)]
struct CompiledCategory {
    rules_path: PathBuf,
    matchers: Vec<GlobMatcher>,
}

impl CompiledPolicy {
    /// First category whose globs match the pair id or the lhs path;
    /// otherwise the default rule file.
    fn rules_for(&self, pair: &ManifestPair) -> Option<&Path> {
        for category in &self.categories {
            let matches = category.matchers.iter().any(|matcher| {
                matcher.is_match(Path::new(&pair.id)) || matcher.is_match(Path::new(&pair.lhs_path))
            });
            if matches {
                return Some(&category.rules_path);
            }
        }
        self.default_rules_path.as_deref()
    }
}

#[derive(Debug)]
pub enum SuiteError {
    ReadManifest {
        path: PathBuf,
        source: std::io::Error,
    },
    ParseManifest {
        path: PathBuf,
        source: serde_json::Error,
    },
    ReadPolicy {
        path: PathBuf,
        source: std::io::Error,
    },
    ParsePolicy {
        path: PathBuf,
        source: serde_json::Error,
    },
    InvalidGlob {
        pattern: String,
        source: globset::Error,
    },
    Rules(ConfigError),
    OpenInput {
        path: PathBuf,
        source: std::io::Error,
    },
    Engine(EngineError),
    RenderReport {
        path: PathBuf,
        source: serde_json::Error,
    },
    WriteReport {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl Display for SuiteError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReadManifest { path, source } => {
                write!(f, "failed to read manifest '{}': {}", path.display(), source)
            }
            Self::ParseManifest { path, source } => {
                write!(f, "failed to parse manifest '{}': {}", path.display(), source)
            }
            Self::ReadPolicy { path, source } => {
                write!(f, "failed to read policy '{}': {}", path.display(), source)
            }
            Self::ParsePolicy { path, source } => {
                write!(f, "failed to parse policy '{}': {}", path.display(), source)
            }
            Self::InvalidGlob { pattern, source } => {
                write!(f, "invalid glob pattern '{}': {}", pattern, source)
            }
            Self::Rules(source) => write!(f, "{}", source),
            Self::OpenInput { path, source } => {
                write!(f, "failed to open input '{}': {}", path.display(), source)
            }
            Self::Engine(source) => write!(f, "{}", source),
            Self::RenderReport { path, source } => {
                write!(f, "failed to render report '{}': {}", path.display(), source)
            }
            Self::WriteReport { path, source } => {
                write!(f, "failed to write report '{}': {}", path.display(), source)
            }
        }
    }
}

impl Error for SuiteError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::ReadManifest { source, .. }
            | Self::ReadPolicy { source, .. }
            | Self::OpenInput { source, .. }
            | Self::WriteReport { source, .. } => Some(source),
            Self::ParseManifest { source, .. }
            | Self::ParsePolicy { source, .. }
            | Self::RenderReport { source, .. } => Some(source),
            Self::InvalidGlob { source, .. } => Some(source),
            Self::Rules(source) => Some(source),
            Self::Engine(source) => Some(source),
        }
    }
}

impl From<SuiteError> for NumdiffError {
    fn from(error: SuiteError) -> Self {
        let message = error.to_string();
        match error {
            SuiteError::ReadManifest { .. }
            | SuiteError::OpenInput { .. }
            | SuiteError::WriteReport { .. } => Self::io_system("IO.SUITE", message),
            SuiteError::ParseManifest { .. }
            | SuiteError::ReadPolicy { .. }
            | SuiteError::ParsePolicy { .. }
            | SuiteError::InvalidGlob { .. } => Self::input_validation("INPUT.SUITE", message),
            SuiteError::Rules(source) => Self::from(source),
            SuiteError::Engine(source) => Self::from(source),
            SuiteError::RenderReport { .. } => Self::internal("SYS.SUITE_REPORT", message),
        }
    }
}
