use numdiff::engine::{Engine, Failure, Info, ReadStatus};
use numdiff::registers::{R_ABS, R_LHS, R_RHS};
use numdiff::report::BufferedEmitter;
use numdiff::rules::{BoundPair, Flags, Rule, RuleBook, RulesConfig, Slice, Tolerance};
use numdiff::source::ByteLines;

fn run_diff(lhs: &str, rhs: &str, rules_json: &str) -> (Info, BufferedEmitter) {
    let rules = RulesConfig::from_json(rules_json).expect("rule file should parse");
    let mut emitter = BufferedEmitter::new();
    let mut engine = Engine::new(
        ByteLines::from_text(lhs),
        ByteLines::from_text(rhs),
        &rules.book,
        &mut emitter,
        0,
        0,
    );
    engine.apply_config(&rules);
    engine.run(None, None).expect("run should succeed");
    let info = engine.get_info();
    drop(engine);
    (info, emitter)
}

#[test]
fn identical_lines_match_and_echo() {
    let rules = RulesConfig::from_json(r#"{"rules": [{"abs": 1e-6}]}"#)
        .expect("rule file should parse");
    let mut emitter = BufferedEmitter::new();
    let mut engine = Engine::new(
        ByteLines::from_text("x = 1.0\n"),
        ByteLines::from_text("x = 1.0\n"),
        &rules.book,
        &mut emitter,
        0,
        0,
    );
    engine.apply_config(&rules);

    let mut lhs_echo = Vec::new();
    engine
        .run(Some(&mut lhs_echo), None)
        .expect("run should succeed");

    let info = engine.get_info();
    assert_eq!(info.diffs, 0);
    assert_eq!(info.numbers, 1);
    assert_eq!(String::from_utf8_lossy(&lhs_echo), "x = 1.0\n\n");
}

#[test]
fn float_drift_within_absolute_tolerance_passes() {
    let rule = Rule {
        tol: Tolerance {
            abs: Some(BoundPair::symmetric(1e-6)),
            ..Tolerance::default()
        },
        ..Rule::default()
    };
    let book = RuleBook::default();
    let mut emitter = BufferedEmitter::new();
    let mut engine = Engine::new(
        ByteLines::from_text(""),
        ByteLines::from_text(""),
        &book,
        &mut emitter,
        0,
        0,
    );

    engine.fill_line("3.1415926", "3.1415930");
    assert_eq!(engine.next_num(&rule), 1);
    assert_eq!(engine.test_num(&rule), Failure::NONE);

    let abs_err = engine.registers().get(R_ABS, f64::NAN);
    assert!((abs_err.abs() - 4e-7).abs() < 1e-12, "abs_err={abs_err}");
}

#[test]
fn float_drift_outside_relative_tolerance_fails() {
    let (info, emitter) = run_diff(
        "1.0e3\n",
        "1.0e6\n",
        r#"{"rules": [{"rel": 1e-3}]}"#,
    );

    assert_eq!(info.diffs, 1);
    assert!(
        emitter
            .warnings
            .iter()
            .any(|line| line.contains("relative error")),
        "warnings: {:?}",
        emitter.warnings
    );
}

#[test]
fn strict_equality_rejects_different_representations() {
    let rule = Rule {
        tol: Tolerance {
            exact: true,
            ..Tolerance::default()
        },
        ..Rule::default()
    };
    let book = RuleBook::default();
    let mut emitter = BufferedEmitter::new();
    let mut engine = Engine::new(
        ByteLines::from_text(""),
        ByteLines::from_text(""),
        &book,
        &mut emitter,
        0,
        0,
    );

    engine.fill_line("1.0", "1.00");
    assert_eq!(engine.next_num(&rule), 1);
    assert_eq!(engine.test_num(&rule), Failure::EXACT);
}

#[test]
fn digit_tolerance_skips_integer_pairs() {
    let (info, _) = run_diff("42\n", "43\n", r#"{"rules": [{"dig": 0.1}]}"#);
    assert_eq!(info.diffs, 0);
    assert_eq!(info.numbers, 1);
}

#[test]
fn non_numeric_text_difference_is_reported() {
    let (info, emitter) = run_diff("foo bar\n", "foo baz\n", r#"{"rules": [{"abs": 1.0}]}"#);

    assert_eq!(info.diffs, 1);
    assert_eq!(info.numbers, 0);
    assert!(
        emitter
            .warnings
            .iter()
            .any(|line| line.contains("files differ at line 1")),
        "warnings: {:?}",
        emitter.warnings
    );
}

#[test]
fn omitted_identifiers_are_skipped_silently() {
    let (info, emitter) = run_diff(
        "NaN value\n",
        "Inf value\n",
        r#"{"rules": [{"omit": true, "tag": " value"}]}"#,
    );

    assert_eq!(info.diffs, 0, "warnings: {:?}", emitter.warnings);
}

#[test]
fn omit_tag_guards_numbers_that_follow_it() {
    // the elapsed time differs, everything else matches
    let (info, _) = run_diff(
        "time= 1.23 result= 7.5\n",
        "time= 4.56 result= 7.5\n",
        r#"{"rules": [{"omit": true, "tag": "time= ", "exact": true}]}"#,
    );
    assert_eq!(info.diffs, 0);

    // without the omit tag the same drift is a failure
    let (info, _) = run_diff(
        "time= 1.23 result= 7.5\n",
        "time= 4.56 result= 7.5\n",
        r#"{"rules": [{"exact": true}]}"#,
    );
    assert_eq!(info.diffs, 1);
}

#[test]
fn saved_registers_feed_rule_arithmetic() {
    let rules = RulesConfig::from_json(
        r#"
        {
          "rules": [
            {
              "abs": 1e-9,
              "save": true,
              "ops": [
                {"dst": 10, "op": "add", "src": 1, "src2": 2},
                {"dst": 11, "op": "div", "src": 10, "src2": 2}
              ]
            }
          ]
        }
        "#,
    )
    .expect("rule file should parse");

    let mut emitter = BufferedEmitter::new();
    let mut engine = Engine::new(
        ByteLines::from_text("1.5\n"),
        ByteLines::from_text("1.5\n"),
        &rules.book,
        &mut emitter,
        0,
        0,
    );
    engine.apply_config(&rules);
    engine.run(None, None).expect("run should succeed");

    assert_eq!(engine.registers().get(R_LHS, f64::NAN), 1.5);
    assert_eq!(engine.registers().get(R_RHS, f64::NAN), 1.5);
    // R10 = lhs + rhs, R11 = R10 / rhs
    assert_eq!(engine.registers().get(10, f64::NAN), 3.0);
    assert_eq!(engine.registers().get(11, f64::NAN), 2.0);
}

#[test]
fn goto_line_advances_by_the_smaller_side() {
    let lhs = "a\nb\nc\nd\n=== RESULT ===\nvalue 1\n";
    let rhs = "a\nb\nc\nd\ne\nf\n=== RESULT ===\nvalue 1\n";

    let book = RuleBook::default();
    let mut emitter = BufferedEmitter::new();
    let mut engine = Engine::new(
        ByteLines::from_text(lhs),
        ByteLines::from_text(rhs),
        &book,
        &mut emitter,
        0,
        0,
    );

    let rule = Rule {
        tag: "=== RESULT ===".to_string(),
        ..Rule::default()
    };
    let status = engine.goto_line(&rule).expect("seek should succeed");

    assert_eq!(status, ReadStatus::Ok);
    assert_eq!(engine.get_info().row, 5);
    // both buffers hold their tagged lines
    assert!(!engine.is_empty());
}

#[test]
fn diff_cap_limits_reports_but_not_counting() {
    let lhs: String = (0..10).map(|i| format!("{i}.5\n")).collect();
    let rhs: String = (0..10).map(|i| format!("{i}.9\n")).collect();

    let (info, emitter) = run_diff(&lhs, &rhs, r#"{"maxReported": 2, "rules": [{"abs": 1e-6}]}"#);

    assert_eq!(info.diffs, 10);
    // one header, then three lines per reported diff, two diffs reported
    assert_eq!(emitter.warnings.len(), 1 + 2 * 3);
}

#[test]
fn comparing_a_file_against_itself_never_differs() {
    let text = "header alpha\n x: 1.25 y: -3e4\n 0.001 42 7.\nfooter\n";
    let (info, emitter) = run_diff(
        text,
        text,
        r#"{"rules": [{"rel": 1e-12}, {"rows": "2", "dig": 0.5}]}"#,
    );

    assert_eq!(info.diffs, 0, "warnings: {:?}", emitter.warnings);
    assert_eq!(info.numbers, 5);
}

#[test]
fn driver_runs_are_repeatable() {
    let lhs = "a 1.0\nb 2.0\nc 3.5\n";
    let rhs = "a 1.1\nb 2.0\nc 3.4\n";
    let rules = r#"{"rules": [{"abs": 0.01}]}"#;

    let (first, _) = run_diff(lhs, rhs, rules);
    let (second, _) = run_diff(lhs, rhs, rules);

    assert_eq!(first, second);
    assert_eq!(first.diffs, 2);
    assert_eq!(first.numbers, 3);
}

#[test]
fn skip_rule_ignores_a_line_wholesale() {
    let (info, _) = run_diff(
        "garbage !!!\nx 1.0\n",
        "other ???\nx 1.0\n",
        r#"{"rules": [{"abs": 1e-6}, {"rows": "1", "action": "skip"}]}"#,
    );
    assert_eq!(info.diffs, 0);
    assert_eq!(info.numbers, 1);
}

#[test]
fn goto_rule_resynchronizes_on_a_tag_mid_run() {
    let lhs = "preamble junk 9\n=== RESULT ===\nx 1.0\n";
    let rhs = "other junk 7\nmore noise\n=== RESULT ===\nx 1.0\n";

    let (info, emitter) = run_diff(
        lhs,
        rhs,
        r#"{"rules": [{"abs": 1e-6}, {"rows": "1", "action": "goto_tag", "tag": "=== RESULT ==="}]}"#,
    );

    assert_eq!(info.diffs, 0, "warnings: {:?}", emitter.warnings);
    assert_eq!(info.numbers, 1);
}

#[test]
fn goto_num_seeks_the_matching_column() {
    let lhs = "step 1 val 10.0\nstep 2 val 20.0\nstep 3 val 30.0\nend 1\n";
    let rhs = "step 2 val 20.0\nstep 3 val 30.0\nend 1\n";

    let book = RuleBook::default();
    let mut emitter = BufferedEmitter::new();
    let mut engine = Engine::new(
        ByteLines::from_text(lhs),
        ByteLines::from_text(rhs),
        &book,
        &mut emitter,
        0,
        0,
    );

    let rule = Rule {
        cols: Slice::single(1),
        tag: "3".to_string(),
        tol: Tolerance {
            abs: Some(BoundPair::symmetric(1e-9)),
            ..Tolerance::default()
        },
        ..Rule::default()
    };
    engine.goto_num(&rule).expect("seek should succeed");

    // lhs consumed 3 lines, rhs consumed 2: resume from the smaller
    assert_eq!(engine.get_info().row, 2);
    // probing for the target never reports
    assert_eq!(engine.get_info().diffs, 0);
    // both buffers hold their matching lines, cursors at line start
    assert!(!engine.is_empty());
}

#[test]
fn any_mode_accepts_one_passing_metric() {
    // abs fails (0.1 > 1e-3) but rel passes (0.1/100 <= 1e-2)
    let (info, _) = run_diff(
        "100.0\n",
        "100.1\n",
        r#"{"rules": [{"abs": 1e-3, "rel": 1e-2, "any": true}]}"#,
    );
    assert_eq!(info.diffs, 0);

    // both metrics fail, the failure stands
    let (info, _) = run_diff(
        "100.0\n",
        "150.0\n",
        r#"{"rules": [{"abs": 1e-3, "rel": 1e-2, "any": true}]}"#,
    );
    assert_eq!(info.diffs, 1);
}

#[test]
fn numeric_versus_word_content_is_a_text_difference() {
    let (info, emitter) = run_diff(
        "count 5\n",
        "count five\n",
        r#"{"rules": [{"abs": 1e-6}]}"#,
    );

    assert_eq!(info.diffs, 1);
    assert!(
        emitter
            .warnings
            .iter()
            .any(|line| line.contains("files differ")),
        "warnings: {:?}",
        emitter.warnings
    );
}

#[test]
fn missing_number_on_one_side_is_reported() {
    let rule = Rule {
        tol: Tolerance {
            abs: Some(BoundPair::symmetric(1e-6)),
            ..Tolerance::default()
        },
        ..Rule::default()
    };
    let book = RuleBook::default();
    let mut emitter = BufferedEmitter::new();
    let mut engine = Engine::new(
        ByteLines::from_text(""),
        ByteLines::from_text(""),
        &book,
        &mut emitter,
        0,
        0,
    );

    // the lhs cursor does not sit on a number
    engine.fill_line("abc", "1.5");
    let ret = engine.test_num(&rule);
    assert!(ret.contains(Failure::MISSING));
    assert_eq!(engine.get_info().diffs, 1);

    // ignore + digits-only search accepts the asymmetry silently
    let lenient = Rule {
        flags: Flags {
            ignore: true,
            digits_only: true,
            ..Flags::default()
        },
        ..Rule::default()
    };
    engine.fill_line("abc", "1.5");
    assert_eq!(engine.test_num(&lenient), Failure::NONE);
}

#[test]
fn nofail_rules_neither_report_nor_count() {
    let (info, emitter) = run_diff(
        "1.0\n",
        "2.0\n",
        r#"{"rules": [{"abs": 1e-9, "noFail": true}]}"#,
    );

    assert_eq!(info.diffs, 0);
    assert!(emitter.warnings.is_empty());
}

#[test]
fn scale_and_offset_shape_the_error() {
    // dif = -1.0, scaled by 0.5 and offset by 0.5 -> abs error 0
    let (info, _) = run_diff(
        "1.0\n",
        "2.0\n",
        r#"{"rules": [{"abs": 1e-12, "scale": 0.5, "offset": 0.5}]}"#,
    );
    assert_eq!(info.diffs, 0);
}

#[test]
fn kept_punctuation_binds_numbers_to_identifiers() {
    // with '_' kept, "v_1" stays one identifier and the digits inside
    // are not numeric columns
    let (info, _) = run_diff(
        "v_1 2.0\n",
        "v_1 2.0\n",
        r#"{"keptPunctuation": "_", "rules": [{"abs": 1e-6}]}"#,
    );
    assert_eq!(info.numbers, 1);
}

#[test]
fn blank_folding_tolerates_alignment_drift() {
    let (info, _) = run_diff(
        "x   1.0\n",
        "x 1.0\n",
        r#"{"foldBlanks": true, "rules": [{"abs": 1e-6}]}"#,
    );
    assert_eq!(info.diffs, 0);
    assert_eq!(info.numbers, 1);

    // without folding the width change is a text difference
    let (info, _) = run_diff("x   1.0\n", "x 1.0\n", r#"{"rules": [{"abs": 1e-6}]}"#);
    assert_eq!(info.diffs, 1);
}

#[test]
fn check_mode_accepts_a_consistent_rule_book() {
    let rules = RulesConfig::from_json(
        r#"{"rules": [{"rows": "1-2", "abs": 1e-6}, {"rows": "3-*", "rel": 1e-6}]}"#,
    )
    .expect("rule file should parse");
    let mut emitter = BufferedEmitter::new();
    let mut engine = Engine::new(
        ByteLines::from_text("1.0\n2.0\n3.0\n4.0\n"),
        ByteLines::from_text("1.0\n2.0\n3.0\n4.0\n"),
        &rules.book,
        &mut emitter,
        0,
        0,
    );
    engine.apply_config(&rules);
    engine
        .set_options(None, None, Some(true))
        .expect("options should apply");

    engine.run(None, None).expect("consistent book should pass check mode");
    assert_eq!(engine.get_info().diffs, 0);
}

#[test]
fn reserved_register_outputs_are_consistent() {
    use numdiff::registers::{R_DIF, R_ERR, R_MIN, R_REL, R_RHS as R2};

    let rule = Rule {
        tol: Tolerance {
            abs: Some(BoundPair::symmetric(10.0)),
            ..Tolerance::default()
        },
        ..Rule::default()
    };
    let book = RuleBook::default();
    let mut emitter = BufferedEmitter::new();
    let mut engine = Engine::new(
        ByteLines::from_text(""),
        ByteLines::from_text(""),
        &book,
        &mut emitter,
        0,
        0,
    );

    engine.fill_line("6.5 ", "2.0 ");
    assert_eq!(engine.next_num(&rule), 1);
    assert_eq!(engine.test_num(&rule), Failure::NONE);

    let regs = engine.registers();
    let (r1, r2) = (regs.get(R_LHS, f64::NAN), regs.get(R2, f64::NAN));
    assert_eq!(regs.get(R_DIF, f64::NAN), r1 - r2);
    assert_eq!(regs.get(R_ABS, f64::NAN), regs.get(R_ERR, f64::NAN));
    assert_eq!(
        regs.get(R_REL, f64::NAN),
        regs.get(R_ABS, f64::NAN) / regs.get(R_MIN, f64::NAN)
    );
    assert_eq!(regs.get(R_MIN, f64::NAN), 2.0);
}

#[test]
fn trace_rules_emit_flow_details() {
    let (info, emitter) = run_diff(
        "1.0\n",
        "1.0\n",
        r#"{"rules": [{"abs": 1e-6, "trace": true}]}"#,
    );

    assert_eq!(info.diffs, 0);
    assert!(
        emitter.traces.iter().any(|line| line.contains("~>active")),
        "traces: {:?}",
        emitter.traces
    );
}
