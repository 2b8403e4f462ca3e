use super::buffer::{LineBuf, PairCursor};
use super::Core;
use crate::rules::Rule;
use crate::scan::{backtrack_number, is_blank, is_number, is_number_start, is_separator, KeptSet};

/// Does the tag end exactly before both cursors? The comparison is
/// right-aligned and stops at the line start, so a cursor too close to
/// the start matches vacuously.
pub(super) fn omit_matches(
    lhs: &LineBuf,
    mut lhs_at: usize,
    rhs: &LineBuf,
    mut rhs_at: usize,
    tag: &[u8],
) -> bool {
    let mut t = tag.len();
    while t > 0 && lhs_at > 0 && rhs_at > 0 {
        t -= 1;
        lhs_at -= 1;
        rhs_at -= 1;
        if tag[t] != lhs.byte(lhs_at) || tag[t] != rhs.byte(rhs_at) {
            return false;
        }
    }
    true
}

fn skip_to_separator(buf: &LineBuf, mut at: usize, kept: KeptSet) -> usize {
    while !is_separator(buf.byte(at), kept) {
        at += 1;
    }
    at
}

impl<'a> Core<'a> {
    /// Advance both cursors in lockstep to the next pair of numeric
    /// spans. Returns the new 1-based numeric column, or 0 at end of
    /// line or after reporting a text difference.
    pub(crate) fn next_num(
        &mut self,
        lhs: &LineBuf,
        rhs: &LineBuf,
        cur: &mut PairCursor,
        rule: &Rule,
    ) -> u32 {
        let kept = self.opts.kept;
        let mut li = cur.lhs;
        let mut ri = cur.rhs;

        let (row, col) = (self.row, self.col);
        self.trace(|| format!("->next_num line {row}, column {col}, char-columns {li}|{ri}"));

        if lhs.byte(li) == 0 && rhs.byte(ri) == 0 {
            return self.end_of_line(cur, li, ri);
        }

        loop {
            let (li0, ri0) = (li, ri);

            if rule.flags.digits_only {
                while lhs.byte(li) != 0 && !lhs.byte(li).is_ascii_digit() {
                    li += 1;
                }
                while rhs.byte(ri) != 0 && !rhs.byte(ri).is_ascii_digit() {
                    ri += 1;
                }
            } else {
                while lhs.byte(li) != 0
                    && lhs.byte(li) == rhs.byte(ri)
                    && !lhs.byte(li).is_ascii_digit()
                {
                    li += 1;
                    ri += 1;
                }

                if self.opts.fold_blanks && (is_blank(lhs.byte(li)) || is_blank(rhs.byte(ri))) {
                    while is_blank(lhs.byte(li)) {
                        li += 1;
                    }
                    while is_blank(rhs.byte(ri)) {
                        ri += 1;
                    }
                    continue;
                }
            }

            if lhs.byte(li) == 0 && rhs.byte(ri) == 0 {
                return self.end_of_line(cur, li, ri);
            }

            if lhs.byte(li) != rhs.byte(ri)
                && (!is_number(lhs.tail(li)) || !is_number(rhs.tail(ri)))
            {
                // a mismatched token whose left context carries the omit
                // tag is skipped, not reported
                if rule.flags.omit && omit_matches(lhs, li, rhs, ri, rule.tag.as_bytes()) {
                    let skipped_lhs = skip_to_separator(lhs, li, kept);
                    let skipped_rhs = skip_to_separator(rhs, ri, kept);
                    if skipped_lhs > li || skipped_rhs > ri {
                        li = skipped_lhs;
                        ri = skipped_rhs;
                        continue;
                    }
                    // nothing to skip on either side: report after all
                }
                return self.text_diff(lhs, rhs, cur, li, ri, rule);
            }

            let lb = backtrack_number(lhs.as_slice(), li);
            let rb = backtrack_number(rhs.as_slice(), ri);

            if !is_number_start(lhs.as_slice(), lb, kept)
                || !is_number_start(rhs.as_slice(), rb, kept)
            {
                if rule.flags.digits_only {
                    // each side rejects its pseudo-number independently,
                    // always making forward progress
                    if is_number_start(lhs.as_slice(), lb, kept) {
                        li = lb;
                    } else {
                        li = skip_to_separator(lhs, lb, kept);
                        if li <= li0 {
                            li = li0 + 1;
                        }
                    }
                    if is_number_start(rhs.as_slice(), rb, kept) {
                        ri = rb;
                    } else {
                        ri = skip_to_separator(rhs, rb, kept);
                        if ri <= ri0 {
                            ri = ri0 + 1;
                        }
                    }
                    continue;
                }

                let strict = !(rule.flags.omit
                    && omit_matches(lhs, lb, rhs, rb, rule.tag.as_bytes()));
                if strict {
                    // skip the matching identifier prefix in lockstep; a
                    // mismatch inside it is a text difference
                    let (mut p, mut q) = (lb, rb);
                    while lhs.byte(p) == rhs.byte(q) && !is_separator(lhs.byte(p), kept) {
                        p += 1;
                        q += 1;
                    }
                    if lhs.byte(p) != rhs.byte(q)
                        && !is_separator(lhs.byte(p), kept)
                        && !is_separator(rhs.byte(q), kept)
                    {
                        return self.text_diff(lhs, rhs, cur, p, q, rule);
                    }
                    li = p;
                    ri = q;
                } else {
                    li = skip_to_separator(lhs, lb, kept);
                    ri = skip_to_separator(rhs, rb, kept);
                }

                // backtracking can run into a separator (a dot inside an
                // identifier) where no skip makes progress; step over it,
                // or report when the stalled bytes differ
                if li <= li0 && ri <= ri0 {
                    if lhs.byte(li0) != rhs.byte(ri0) {
                        return self.text_diff(lhs, rhs, cur, li0, ri0, rule);
                    }
                    li = li0 + 1;
                    ri = ri0 + 1;
                }
                continue;
            }

            // numbers found
            cur.lhs = lb;
            cur.rhs = rb;
            self.num += 1;
            self.col += 1;
            let (col, lhs_text, rhs_text) = (self.col, lhs.snippet(lb), rhs.snippet(rb));
            self.trace(move || format!("  numbers at column {col}: '{lhs_text}'|'{rhs_text}'"));
            return self.col;
        }
    }

    fn end_of_line(&mut self, cur: &mut PairCursor, li: usize, ri: usize) -> u32 {
        cur.lhs = li + 1;
        cur.rhs = ri + 1;
        self.col = 0;
        0
    }

    fn text_diff(
        &mut self,
        lhs: &LineBuf,
        rhs: &LineBuf,
        cur: &mut PairCursor,
        li: usize,
        ri: usize,
        rule: &Rule,
    ) -> u32 {
        cur.lhs = li + 1;
        cur.rhs = ri + 1;

        if self.count_failure(rule.flags.nofail) {
            let (cnt, row) = (self.cnt, self.row);
            self.emit.warning(&format!(
                "({cnt}) files differ at line {row} and char-columns {}|{}",
                li + 1,
                ri + 1
            ));
            self.emit.warning(&format!(
                "({cnt}) strings: '{}'|'{}'",
                lhs.snippet(li),
                rhs.snippet(ri)
            ));
        }
        if rule.flags.onfail {
            self.ctx.on_fail(rule);
        }

        self.col = 0;
        0
    }
}
