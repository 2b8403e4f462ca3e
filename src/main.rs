use env_logger::Env;
use numdiff::domain::NumdiffError;
use numdiff::engine::Engine;
use numdiff::report::LogEmitter;
use numdiff::rules::RulesConfig;
use numdiff::source::ByteLines;
use numdiff::suite::{render_human_summary, run_suite, SuiteRunnerConfig};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("warn")).init();

    let exit_code = match run_cli() {
        Ok(code) => code,
        Err(error) => {
            eprintln!("Error: {}", error);
            error.exit_code()
        }
    };
    std::process::exit(exit_code);
}

fn run_cli() -> Result<i32, CliError> {
    let mut args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() {
        return Err(CliError::Usage(usage_text().to_string()));
    }

    let command = args.remove(0);
    match command.as_str() {
        "compare" => run_compare_command(args),
        "suite" => run_suite_command(args),
        "help" | "--help" | "-h" => {
            println!("{}", usage_text());
            Ok(0)
        }
        other => Err(CliError::Usage(format!(
            "Unknown command '{}'.\n{}",
            other,
            usage_text()
        ))),
    }
}

#[derive(Debug, Default)]
struct CompareArgs {
    lhs_path: Option<String>,
    rhs_path: Option<String>,
    rules_path: Option<PathBuf>,
    keep: Option<u32>,
    blank: bool,
    check: bool,
    echo_lhs: Option<PathBuf>,
    echo_rhs: Option<PathBuf>,
    test_id: Option<String>,
}

fn run_compare_command(args: Vec<String>) -> Result<i32, CliError> {
    if args.iter().any(|arg| arg == "--help" || arg == "-h") {
        println!("{}", compare_usage_text());
        return Ok(0);
    }

    let args = parse_compare_args(args)?;
    let lhs_path = args
        .lhs_path
        .ok_or_else(|| CliError::Usage(compare_usage_text().to_string()))?;
    let rhs_path = args
        .rhs_path
        .ok_or_else(|| CliError::Usage(compare_usage_text().to_string()))?;

    let rules = match &args.rules_path {
        Some(path) => RulesConfig::from_path(path).map_err(NumdiffError::from)?,
        None => RulesConfig::default(),
    };

    let lhs = ByteLines::open(&lhs_path).map_err(|source| {
        NumdiffError::io_system("IO.OPEN_LHS", format!("cannot open '{}': {}", lhs_path, source))
    })?;
    let rhs = ByteLines::open(&rhs_path).map_err(|source| {
        NumdiffError::io_system("IO.OPEN_RHS", format!("cannot open '{}': {}", rhs_path, source))
    })?;

    let mut echo_lhs = open_echo(args.echo_lhs.as_deref())?;
    let mut echo_rhs = open_echo(args.echo_rhs.as_deref())?;

    let mut emitter = LogEmitter;
    let mut engine = Engine::new(lhs, rhs, &rules.book, &mut emitter, 0, 0);
    engine.apply_config(&rules);
    engine
        .set_options(args.keep, Some(args.blank || rules.fold_blanks), Some(args.check))
        .map_err(NumdiffError::from)?;
    engine.set_labels(&lhs_path, &rhs_path, args.test_id.as_deref());

    engine
        .run(
            echo_lhs.as_mut().map(|file| file as &mut dyn Write),
            echo_rhs.as_mut().map(|file| file as &mut dyn Write),
        )
        .map_err(NumdiffError::from)?;

    let info = engine.get_info();
    if info.diffs == 0 {
        println!(
            "files match: {} numbers compared over {} lines",
            info.numbers, info.row
        );
        Ok(0)
    } else {
        println!(
            "files differ: {} diffs, {} numbers compared over {} lines",
            info.diffs, info.numbers, info.row
        );
        Ok(1)
    }
}

fn parse_compare_args(args: Vec<String>) -> Result<CompareArgs, CliError> {
    let mut parsed = CompareArgs::default();
    let mut index = 0;
    while index < args.len() {
        let option = &args[index];
        let next_index = index + 1;

        match option.as_str() {
            "--rules" => {
                parsed.rules_path = Some(PathBuf::from(value_for_option(&args, next_index, option)?));
                index += 2;
            }
            "--keep" => {
                let value = value_for_option(&args, next_index, option)?;
                let keep: u32 = value.parse().map_err(|_| {
                    CliError::Usage(format!("--keep expects a positive integer, got '{}'", value))
                })?;
                parsed.keep = Some(keep);
                index += 2;
            }
            "--blank" => {
                parsed.blank = true;
                index += 1;
            }
            "--check" => {
                parsed.check = true;
                index += 1;
            }
            "--echo-lhs" => {
                parsed.echo_lhs = Some(PathBuf::from(value_for_option(&args, next_index, option)?));
                index += 2;
            }
            "--echo-rhs" => {
                parsed.echo_rhs = Some(PathBuf::from(value_for_option(&args, next_index, option)?));
                index += 2;
            }
            "--test-id" => {
                parsed.test_id = Some(value_for_option(&args, next_index, option)?.to_string());
                index += 2;
            }
            other if other.starts_with("--") => {
                return Err(CliError::Usage(format!(
                    "Unknown option '{}'.\n{}",
                    other,
                    compare_usage_text()
                )));
            }
            _ => {
                if parsed.lhs_path.is_none() {
                    parsed.lhs_path = Some(option.clone());
                } else if parsed.rhs_path.is_none() {
                    parsed.rhs_path = Some(option.clone());
                } else {
                    return Err(CliError::Usage(format!(
                        "Unexpected argument '{}'.\n{}",
                        option,
                        compare_usage_text()
                    )));
                }
                index += 1;
            }
        }
    }

    Ok(parsed)
}

fn run_suite_command(args: Vec<String>) -> Result<i32, CliError> {
    if args.iter().any(|arg| arg == "--help" || arg == "-h") {
        println!("{}", suite_usage_text());
        return Ok(0);
    }

    let config = parse_suite_args(args)?;
    let report = run_suite(&config).map_err(CliError::Run)?;
    println!("{}", render_human_summary(&report));
    println!("JSON report: {}", config.report_path.display());

    if report.passed { Ok(0) } else { Ok(1) }
}

fn parse_suite_args(args: Vec<String>) -> Result<SuiteRunnerConfig, CliError> {
    let mut config = SuiteRunnerConfig::default();
    let mut index = 0;
    while index < args.len() {
        let option = &args[index];
        let next_index = index + 1;

        match option.as_str() {
            "--manifest" => {
                config.manifest_path = PathBuf::from(value_for_option(&args, next_index, option)?);
                index += 2;
            }
            "--policy" => {
                config.policy_path =
                    Some(PathBuf::from(value_for_option(&args, next_index, option)?));
                index += 2;
            }
            "--report" => {
                config.report_path = PathBuf::from(value_for_option(&args, next_index, option)?);
                index += 2;
            }
            _ => {
                return Err(CliError::Usage(format!(
                    "Unknown option '{}'.\n{}",
                    option,
                    suite_usage_text()
                )));
            }
        }
    }

    Ok(config)
}

fn open_echo(path: Option<&std::path::Path>) -> Result<Option<File>, CliError> {
    match path {
        None => Ok(None),
        Some(path) => File::create(path).map(Some).map_err(|source| {
            CliError::Run(NumdiffError::io_system(
                "IO.ECHO_OUTPUT",
                format!("cannot create '{}': {}", path.display(), source),
            ))
        }),
    }
}

fn value_for_option<'a>(
    args: &'a [String],
    value_index: usize,
    option: &str,
) -> Result<&'a str, CliError> {
    args.get(value_index)
        .map(|value| value.as_str())
        .ok_or_else(|| CliError::Usage(format!("Missing value for option '{}'.", option)))
}

fn usage_text() -> &'static str {
    "Usage:
  numdiff compare <lhs> <rhs> [options]
  numdiff suite [options]
  numdiff help

Run `numdiff compare --help` or `numdiff suite --help` for command options."
}

fn compare_usage_text() -> &'static str {
    "Usage:
  numdiff compare <lhs> <rhs> [options]

Options:
  --rules <path>     Rule file (default: strict byte equality of numbers)
  --keep <n>         Cap on reported diffs (default: 25 or rule file value)
  --blank            Fold runs of blanks on both sides
  --check            Cross-validate incremental rule lookup
  --echo-lhs <path>  Echo matching lhs lines to a file
  --echo-rhs <path>  Echo matching rhs lines to a file
  --test-id <label>  Label used in the diff header"
}

fn suite_usage_text() -> &'static str {
    "Usage:
  numdiff suite [options]

Options:
  --manifest <path>  Pair manifest path (default: manifest.json)
  --policy <path>    Rule-selection policy path (default: built-in rules)
  --report <path>    JSON report output path (default: numdiff-report.json)"
}

#[derive(Debug)]
enum CliError {
    Usage(String),
    Run(NumdiffError),
}

impl CliError {
    fn exit_code(&self) -> i32 {
        match self {
            Self::Usage(_) => 2,
            Self::Run(error) => error.exit_code(),
        }
    }
}

impl Display for CliError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Usage(message) => f.write_str(message),
            Self::Run(source) => write!(f, "{}", source),
        }
    }
}

impl Error for CliError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Usage(_) => None,
            Self::Run(source) => Some(source),
        }
    }
}

impl From<NumdiffError> for CliError {
    fn from(error: NumdiffError) -> Self {
        Self::Run(error)
    }
}
