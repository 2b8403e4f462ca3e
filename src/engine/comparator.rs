use super::buffer::{LineBuf, PairCursor};
use super::tokenizer::omit_matches;
use super::{Core, Failure};
use crate::registers::{R_ABS, R_DIF, R_DIG, R_ERR, R_LHS, R_MIN, R_POW, R_REL, R_RHS};
use crate::rules::{Rule, Tolerance};
use crate::scan::{parse_number, pow10, span_value};

/// Resolved bounds per metric, kept for the diagnostics.
#[derive(Debug, Clone, Copy, Default)]
struct MetricBounds {
    abs: (f64, f64),
    rel: (f64, f64),
    dig: (f64, f64),
}

fn requested_metrics(tol: &Tolerance) -> Failure {
    let mut requested = Failure::NONE;
    if tol.abs.is_some() {
        requested |= Failure::ABSOLUTE;
    }
    if tol.rel.is_some() {
        requested |= Failure::RELATIVE;
    }
    if tol.dig.is_some() {
        requested |= Failure::DIGITS;
    }
    requested
}

impl<'a> Core<'a> {
    /// Compare the numeric spans under the cursors against `rule`:
    /// parse both sides, build the error vector, check the requested
    /// tolerances, report failures, update registers, and advance the
    /// cursors past the spans.
    pub(crate) fn test_num(
        &mut self,
        lhs: &LineBuf,
        rhs: &LineBuf,
        cur: &mut PairCursor,
        rule: &Rule,
    ) -> Failure {
        let l0 = cur.lhs;
        let r0 = cur.rhs;
        let shape1 = parse_number(lhs.tail(l0));
        let shape2 = parse_number(rhs.tail(r0));
        let (l1, l2) = (shape1.len, shape2.len);
        let lhs_span = &lhs.tail(l0)[..l1];
        let rhs_span = &rhs.tail(r0)[..l2];

        let mut ret = Failure::NONE;
        let mut bounds = MetricBounds::default();

        let mut lhs_d = 0.0;
        let mut rhs_d = 0.0;
        let mut dif_d = 0.0;
        let mut err_d = 0.0;
        let mut abs_d = 0.0;
        let mut rel_d = 0.0;
        let mut dig_d = 0.0;
        let mut min_d = 0.0;
        let mut pow_d = 0.0;

        if l1 == 0 || l2 == 0 {
            // a number on one side only; digits-only search may ignore it
            if !(rule.flags.ignore && rule.flags.digits_only) {
                ret |= Failure::MISSING;
            }
        } else {
            lhs_d = rule.lhs.resolve(&self.regs, span_value(lhs_span));
            rhs_d = rule.rhs.resolve(&self.regs, span_value(rhs_span));
            let scl_d = rule.scale.resolve(&self.regs);
            let off_d = rule.offset.resolve(&self.regs);
            min_d = lhs_d.abs().min(rhs_d.abs());
            pow_d = pow10(-(shape1.digits.max(shape2.digits) as i32));

            // one side zero: relative error degrades to absolute
            if !(min_d > 0.0) {
                min_d = 1.0;
            }

            if rule.flags.swap {
                std::mem::swap(&mut lhs_d, &mut rhs_d);
            }

            dif_d = lhs_d - rhs_d;
            err_d = scl_d * dif_d;
            abs_d = err_d + off_d;
            rel_d = abs_d / min_d;
            dig_d = abs_d / (min_d * pow_d);

            let ndig = shape1.digits.max(shape2.digits);
            self.trace(move || format!("  abs={abs_d:e}, rel={rel_d:e}, ndig={ndig}"));

            if rule.flags.ignore {
                let (lhs_text, rhs_text) = (lhs.snippet(l0), rhs.snippet(r0));
                self.trace(move || format!("  ignoring numbers '{lhs_text}'|'{rhs_text}'"));
            } else if rule.flags.omit && omit_matches(lhs, l0, rhs, r0, rule.tag.as_bytes()) {
                let (lhs_text, rhs_text) = (lhs.snippet(l0), rhs.snippet(r0));
                self.trace(move || format!("  omitting numbers '{lhs_text}'|'{rhs_text}'"));
            } else if rule.tol.exact {
                if l1 != l2 || lhs_span != rhs_span {
                    ret |= Failure::EXACT;
                }
            } else {
                if let Some(pair) = &rule.tol.abs {
                    let (lower, upper) = pair.resolve(&self.regs);
                    bounds.abs = (lower, upper);
                    if abs_d > upper || abs_d < lower {
                        ret |= Failure::ABSOLUTE;
                    }
                }
                if let Some(pair) = &rule.tol.rel {
                    let (lower, upper) = pair.resolve(&self.regs);
                    bounds.rel = (lower, upper);
                    if rel_d > upper || rel_d < lower {
                        ret |= Failure::RELATIVE;
                    }
                }
                // digit-based tolerance applies to floats only
                if let Some(pair) = &rule.tol.dig {
                    if shape1.is_float || shape2.is_float {
                        let (lower, upper) = pair.resolve(&self.regs);
                        bounds.dig = (lower, upper);
                        if dig_d > upper || dig_d < lower {
                            ret |= Failure::DIGITS;
                        }
                    }
                }
                // one passing metric suffices: clear unless every
                // requested metric failed
                if rule.tol.any
                    && ret.intersection(Failure::METRICS) != requested_metrics(&rule.tol)
                {
                    ret = Failure::NONE;
                }
            }
        }

        if !ret.is_empty() {
            if self.count_failure(rule.flags.nofail) {
                self.report_failure(
                    lhs, rhs, l0, r0, l1, l2, ret, bounds, abs_d, rel_d, pow_d,
                    shape1.digits.max(shape2.digits),
                    rule,
                );
            }
            if rule.flags.onfail {
                self.ctx.on_fail(rule);
            }
        }

        if ret.is_empty() || rule.flags.save {
            let r1 = if rule.lhs.is_parsed() {
                lhs_d
            } else {
                span_value(if rule.flags.swap { rhs_span } else { lhs_span })
            };
            let r2 = if rule.rhs.is_parsed() {
                rhs_d
            } else {
                span_value(if rule.flags.swap { lhs_span } else { rhs_span })
            };
            self.regs.set(R_LHS, r1);
            self.regs.set(R_RHS, r2);
            self.regs.set(R_DIF, dif_d);
            self.regs.set(R_ERR, err_d);
            self.regs.set(R_ABS, abs_d);
            self.regs.set(R_REL, rel_d);
            self.regs.set(R_DIG, dig_d);
            self.regs.set(R_MIN, min_d);
            self.regs.set(R_POW, pow_d);

            if rule.flags.trace_regs {
                self.trace_registers(bounds, rule);
            } else {
                for op in &rule.ops {
                    self.regs.eval(*op);
                }
            }
        }

        cur.lhs = l0 + l1;
        cur.rhs = r0 + l2;
        ret
    }

    #[allow(clippy::too_many_arguments)]
    fn report_failure(
        &mut self,
        lhs: &LineBuf,
        rhs: &LineBuf,
        l0: usize,
        r0: usize,
        l1: usize,
        l2: usize,
        ret: Failure,
        bounds: MetricBounds,
        abs_d: f64,
        rel_d: f64,
        pow_d: f64,
        ndig: u32,
        rule: &Rule,
    ) {
        let cnt = self.cnt;
        let row = self.row;
        let col = self.col;
        self.emit.warning(&format!(
            "({cnt}) files differ at line {row} column {col} between char-columns {}|{} and {}|{}",
            l0 + 1,
            r0 + 1,
            l0 + 1 + l1,
            r0 + 1 + l2
        ));

        let lhs_text = String::from_utf8_lossy(&lhs.tail(l0)[..l1]).into_owned();
        let rhs_text = String::from_utf8_lossy(&rhs.tail(r0)[..l2]).into_owned();
        self.emit
            .warning(&format!("({cnt}) numbers: '{lhs_text}'|'{rhs_text}'"));

        let rule_index = self
            .ctx
            .find_index(rule)
            .map_or_else(|| "?".to_string(), |index| index.to_string());
        let rule_line = self.ctx.find_line(rule).unwrap_or(0);

        if ret.contains(Failure::MISSING) {
            self.emit.warning(&format!(
                "({cnt}) one number is missing (column count can be wrong)"
            ));
        }
        if ret.contains(Failure::EXACT) {
            self.emit
                .warning(&format!("({cnt}) numbers strict representation differ"));
        }
        if ret.contains(Failure::ABSOLUTE) {
            let (lower, upper) = bounds.abs;
            self.emit.warning(&format!(
                "({cnt}) absolute error (rule #{rule_index}, line {rule_line}: \
                 {lower:.2e}<=abs<={upper:.2e}) abs={abs_d:.2e}, rel={rel_d:.2e}, ndig={ndig}"
            ));
        }
        if ret.contains(Failure::RELATIVE) {
            let (lower, upper) = bounds.rel;
            self.emit.warning(&format!(
                "({cnt}) relative error (rule #{rule_index}, line {rule_line}: \
                 {lower:.2e}<=rel<={upper:.2e}) abs={abs_d:.2e}, rel={rel_d:.2e}, ndig={ndig}"
            ));
        }
        if ret.contains(Failure::DIGITS) {
            let (lower, upper) = bounds.dig;
            self.emit.warning(&format!(
                "({cnt}) significant-digit error (rule #{rule_index}, line {rule_line}: \
                 {:.2e}<=rel<={:.2e}) abs={abs_d:.2e}, rel={rel_d:.2e}, ndig={ndig}",
                lower * pow_d,
                upper * pow_d
            ));
        }
    }

    fn trace_registers(&mut self, bounds: MetricBounds, rule: &Rule) {
        let (abs, rel, dig) = (bounds.abs, bounds.rel, bounds.dig);
        self.trace(move || {
            format!(
                "  abs={:.17e}, _abs={:.17e}, rel={:.17e}, _rel={:.17e}, dig={:.17e}, _dig={:.17e}",
                abs.1, abs.0, rel.1, rel.0, dig.1, dig.0
            )
        });
        let regs: Vec<String> = (R_LHS..=R_POW)
            .map(|idx| format!("R{}={:.17e}", idx, self.regs.get(idx, 0.0)))
            .collect();
        self.trace(move || format!("  {}", regs.join(", ")));

        let mut results = Vec::with_capacity(rule.ops.len());
        for op in &rule.ops {
            self.regs.eval(*op);
            results.push(format!("R{}={:.17e}", op.dst, self.regs.get(op.dst, 0.0)));
        }
        if !results.is_empty() {
            self.trace(move || format!("  {}", results.join(", ")));
        }
    }
}
