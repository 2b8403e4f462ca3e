use super::{Engine, EngineError, EngineResult, Failure, Side};
use crate::rules::Action;
use crate::source::LineSource;
use std::io::Write;

fn reborrow<'a>(opt: &'a mut Option<&mut dyn Write>) -> Option<&'a mut dyn Write> {
    match opt {
        Some(w) => Some(&mut **w),
        None => None,
    }
}

impl<'a, S: LineSource> Engine<'a, S> {
    /// Walk both inputs to EOF: per row, look up the rule, execute its
    /// action, then compare numeric columns until the line ends or a new
    /// rule group activates. Rows without failures are echoed to the
    /// optional output sinks.
    pub fn run(
        &mut self,
        mut lhs_out: Option<&mut dyn Write>,
        mut rhs_out: Option<&mut dyn Write>,
    ) -> EngineResult<()> {
        let mut row = self.core.row;

        while !self.feof(false) {
            row += 1;
            let mut ret = Failure::NONE;

            let rule = self.core.lookup(row, 0)?;
            if rule.flags.trace && rule.flags.group_start {
                self.core.trace_rule(rule);
            }

            match rule.action {
                Action::Skip => {
                    self.skip_line()?;
                    continue;
                }
                Action::GotoTag => {
                    self.goto_line(rule)?;
                    row = self.core.row;
                }
                Action::GotoNum => {
                    self.goto_num(rule)?;
                    row = self.core.row;
                }
                Action::Compare => {
                    self.read_line()?;
                    if self.is_empty() {
                        self.out_line(reborrow(&mut lhs_out), reborrow(&mut rhs_out))?;
                        continue;
                    }
                }
            }

            let mut active = rule;
            loop {
                let col = self.next_num(active);
                if col == 0 {
                    break;
                }

                let next = self.core.lookup(row, col)?;
                // a newly activated group hands the row back to the
                // outer loop
                if next.flags.group_start {
                    break;
                }
                active = next;

                if active.flags.trace {
                    self.core.trace_scope = true;
                    self.core.trace_rule(active);
                }
                ret |= self.test_num(active);
                self.core.trace_scope = false;
            }

            if ret.is_empty() {
                self.out_line(reborrow(&mut lhs_out), reborrow(&mut rhs_out))?;
            }
        }

        if self.core.opts.fold_blanks {
            self.lhs_src
                .skip_space()
                .map_err(|source| EngineError::Io {
                    side: Side::Lhs,
                    source,
                })?;
            self.rhs_src
                .skip_space()
                .map_err(|source| EngineError::Io {
                    side: Side::Rhs,
                    source,
                })?;
        }

        Ok(())
    }
}
