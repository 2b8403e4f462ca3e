use super::buffer::{LineBuf, PairCursor};
use super::{Engine, EngineError, EngineResult, ReadStatus, Side};
use crate::rules::Rule;
use crate::scan::parse_number;
use crate::source::{LineEnd, LineSource};

fn contains_subslice(haystack: &[u8], needle: &[u8]) -> bool {
    needle.is_empty() || haystack.windows(needle.len()).any(|window| window == needle)
}

fn seek_status(lhs: LineEnd, rhs: LineEnd) -> ReadStatus {
    if lhs == LineEnd::Eof || rhs == LineEnd::Eof {
        ReadStatus::Eof
    } else {
        ReadStatus::Ok
    }
}

impl<'a, S: LineSource> Engine<'a, S> {
    /// Tag held by the rule, read from a register when one is named.
    fn resolve_tag(&self, rule: &Rule) -> String {
        if rule.tag_reg != 0 {
            format!("{}", self.core.regs.get(rule.tag_reg, 0.0))
        } else {
            rule.tag.clone()
        }
    }

    /// Advance each side independently to its next line containing the
    /// rule's tag as a substring. The row count advances by the smaller
    /// of the two line counts, so comparison resumes from whichever side
    /// moved less.
    pub fn goto_line(&mut self, rule: &Rule) -> EngineResult<ReadStatus> {
        let tag = self.resolve_tag(rule);
        let tag_bytes = tag.as_bytes();

        let mut lhs_end = LineEnd::Newline;
        let mut lhs_lines = 0u32;
        loop {
            self.cur.lhs = 0;
            self.lhs_buf.clear();
            if lhs_end == LineEnd::Eof {
                break;
            }
            lhs_end = self
                .lhs_buf
                .fill_from(&mut self.lhs_src)
                .map_err(|source| EngineError::Io {
                    side: Side::Lhs,
                    source,
                })?;
            lhs_lines += 1;
            if contains_subslice(self.lhs_buf.as_slice(), tag_bytes) {
                break;
            }
        }

        let mut rhs_end = LineEnd::Newline;
        let mut rhs_lines = 0u32;
        loop {
            self.cur.rhs = 0;
            self.rhs_buf.clear();
            if rhs_end == LineEnd::Eof {
                break;
            }
            rhs_end = self
                .rhs_buf
                .fill_from(&mut self.rhs_src)
                .map_err(|source| EngineError::Io {
                    side: Side::Rhs,
                    source,
                })?;
            rhs_lines += 1;
            if contains_subslice(self.rhs_buf.as_slice(), tag_bytes) {
                break;
            }
        }

        self.core.col = 0;
        self.core.row += lhs_lines.min(rhs_lines);
        let (row, tag_text) = (self.core.row, tag);
        self.core
            .trace(move || format!("sought tag '{tag_text}' to line {row} ({lhs_lines}|{rhs_lines})"));

        Ok(seek_status(lhs_end, rhs_end))
    }

    /// Advance each side independently until a number in the selected
    /// column equals the rule's tag value, comparing the live side
    /// against a buffer holding the tag (the second pass swaps the
    /// orientation). Scanning never reports or counts differences.
    pub fn goto_num(&mut self, rule: &Rule) -> EngineResult<ReadStatus> {
        let mut work = rule.clone();
        if work.tag_reg != 0 {
            work.tag = self.resolve_tag(rule);
            work.tag_reg = 0;
        }

        // strict equality over every column degrades to a substring seek
        if work.tol.exact && work.cols.is_full() {
            return self.goto_line(&work);
        }

        work.flags.nofail = true;
        work.flags.digits_only = true;

        let tag_buf = LineBuf::from_text(&work.tag);

        let mut lhs_end = LineEnd::Newline;
        let mut lhs_lines = 0u32;
        self.core.col = 0;
        'lhs: loop {
            self.cur.lhs = 0;
            self.lhs_buf.clear();
            if lhs_end == LineEnd::Eof {
                break;
            }
            lhs_end = self
                .lhs_buf
                .fill_from(&mut self.lhs_src)
                .map_err(|source| EngineError::Io {
                    side: Side::Lhs,
                    source,
                })?;
            lhs_lines += 1;

            let mut scan = PairCursor::default();
            loop {
                scan.rhs = 0;
                let col = self
                    .core
                    .next_num(&self.lhs_buf, &tag_buf, &mut scan, &work);
                if col == 0 {
                    break;
                }
                if work.cols.is_element(col) {
                    if self
                        .core
                        .test_num(&self.lhs_buf, &tag_buf, &mut scan, &work)
                        .is_empty()
                    {
                        break 'lhs;
                    }
                } else {
                    scan.lhs += parse_number(self.lhs_buf.tail(scan.lhs)).len;
                }
            }
        }

        let mut swapped = work.clone();
        swapped.flags.swap = true;

        let mut rhs_end = LineEnd::Newline;
        let mut rhs_lines = 0u32;
        self.core.col = 0;
        'rhs: loop {
            self.cur.rhs = 0;
            self.rhs_buf.clear();
            if rhs_end == LineEnd::Eof {
                break;
            }
            rhs_end = self
                .rhs_buf
                .fill_from(&mut self.rhs_src)
                .map_err(|source| EngineError::Io {
                    side: Side::Rhs,
                    source,
                })?;
            rhs_lines += 1;

            let mut scan = PairCursor::default();
            loop {
                scan.lhs = 0;
                let col = self
                    .core
                    .next_num(&tag_buf, &self.rhs_buf, &mut scan, &swapped);
                if col == 0 {
                    break;
                }
                if swapped.cols.is_element(col) {
                    if self
                        .core
                        .test_num(&tag_buf, &self.rhs_buf, &mut scan, &swapped)
                        .is_empty()
                    {
                        break 'rhs;
                    }
                } else {
                    scan.rhs += parse_number(self.rhs_buf.tail(scan.rhs)).len;
                }
            }
        }

        self.cur = PairCursor::default();
        self.core.col = 0;
        self.core.row += lhs_lines.min(rhs_lines);
        let (row, tag_text) = (self.core.row, work.tag.clone());
        self.core.trace(move || {
            format!("sought number '{tag_text}' to line {row} ({lhs_lines}|{rhs_lines})")
        });

        Ok(seek_status(lhs_end, rhs_end))
    }
}
