// src/diff.rs
// Structural delta between two observations of the same target.
//
// Pure computation over already-fetched data: no I/O, no retries. Anything
// panicking in here is a programming defect and the orchestrator treats it
// as fatal for the run rather than an operational failure.
//
// Alignment runs over the normalized text's lines (the unit the fetcher's
// text extraction produces), using recursive longest-matching-block
// decomposition. The similarity ratio is the standard matching ratio
// `2 * matched / (len_old + len_new)`, weighted in characters so a handful
// of changed lines on a large page still reads as near-identical.

use std::collections::HashMap;

use crate::types::{Delta, Edit, EditKind, Observation};

/// Edits beyond this cap are dropped, by order of appearance — a known
/// precision/cost tradeoff; `change_count` still reports the full count.
pub const MAX_EDITS: usize = 10;
/// Per-fragment storage bound.
pub const MAX_FRAGMENT_CHARS: usize = 200;
/// Surrounding text retained on each side of a changed region.
pub const CONTEXT_CHARS: usize = 100;

/// Compare the latest stored observation (if any) against the current one.
///
/// `previous = None` is the terminal first-observation case, not an error.
/// Equal digests short-circuit before any alignment work.
pub fn diff(previous: Option<&Observation>, current: &Observation) -> Delta {
    let Some(prev) = previous else {
        return Delta {
            older: None,
            newer: current.id,
            has_changes: false,
            is_first: true,
            similarity: 1.0,
            change_count: 0,
            edits: Vec::new(),
        };
    };

    debug_assert_eq!(prev.target_id, current.target_id);

    if prev.digest == current.digest {
        return Delta {
            older: Some(prev.id),
            newer: current.id,
            has_changes: false,
            is_first: false,
            similarity: 1.0,
            change_count: 0,
            edits: Vec::new(),
        };
    }

    let (similarity, change_count, edits) = text_delta(&prev.text, &current.text);
    Delta {
        older: Some(prev.id),
        newer: current.id,
        has_changes: true,
        is_first: false,
        similarity,
        change_count,
        edits,
    }
}

/// Align two normalized text bodies; returns (similarity, total edit count,
/// capped edit list).
pub(crate) fn text_delta(old: &str, new: &str) -> (f64, usize, Vec<Edit>) {
    let old_lines: Vec<&str> = old.lines().collect();
    let new_lines: Vec<&str> = new.lines().collect();

    let matcher = LineMatcher::new(&old_lines, &new_lines);
    let blocks = matcher.matching_blocks();
    let opcodes = opcodes_from_blocks(&blocks);

    let similarity = char_ratio(&old_lines, &new_lines, &blocks);

    let old_offsets = line_char_offsets(&old_lines);
    let new_offsets = line_char_offsets(&new_lines);

    let changed: Vec<&Opcode> = opcodes.iter().filter(|op| op.tag != Tag::Equal).collect();
    let change_count = changed.len();

    let edits = changed
        .into_iter()
        .take(MAX_EDITS)
        .map(|op| {
            let kind = match op.tag {
                Tag::Replace => EditKind::Replace,
                Tag::Delete => EditKind::Delete,
                Tag::Insert => EditKind::Insert,
                Tag::Equal => unreachable!("equal opcodes filtered above"),
            };
            Edit {
                kind,
                old_fragment: fragment(&old_lines[op.i1..op.i2]),
                new_fragment: fragment(&new_lines[op.j1..op.j2]),
                old_context: context(old, &old_offsets, op.i1, op.i2),
                new_context: context(new, &new_offsets, op.j1, op.j2),
            }
        })
        .collect();

    (similarity, change_count, edits)
}

// ------------------------------------------------------------
// Line alignment
// ------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tag {
    Equal,
    Replace,
    Delete,
    Insert,
}

#[derive(Debug, Clone, Copy)]
struct Opcode {
    tag: Tag,
    i1: usize,
    i2: usize,
    j1: usize,
    j2: usize,
}

/// (old index, new index, run length) of one matched block.
type Block = (usize, usize, usize);

struct LineMatcher<'a> {
    a: &'a [&'a str],
    b: &'a [&'a str],
    b2j: HashMap<&'a str, Vec<usize>>,
}

impl<'a> LineMatcher<'a> {
    fn new(a: &'a [&'a str], b: &'a [&'a str]) -> Self {
        let mut b2j: HashMap<&str, Vec<usize>> = HashMap::new();
        for (j, line) in b.iter().enumerate() {
            b2j.entry(line).or_default().push(j);
        }
        Self { a, b, b2j }
    }

    /// Longest block of lines matching between a[alo..ahi] and b[blo..bhi].
    /// Ties resolve to the earliest position in `a`, then in `b`, so output
    /// is stable across runs.
    fn longest_match(&self, alo: usize, ahi: usize, blo: usize, bhi: usize) -> Block {
        let (mut best_i, mut best_j, mut best_size) = (alo, blo, 0usize);
        // j2len[j] = length of the longest match ending at a[i-1], b[j].
        let mut j2len: HashMap<usize, usize> = HashMap::new();

        for i in alo..ahi {
            let mut next: HashMap<usize, usize> = HashMap::new();
            if let Some(indices) = self.b2j.get(self.a[i]) {
                for &j in indices {
                    if j < blo {
                        continue;
                    }
                    if j >= bhi {
                        break;
                    }
                    let k = if j == 0 {
                        1
                    } else {
                        j2len.get(&(j - 1)).copied().unwrap_or(0) + 1
                    };
                    next.insert(j, k);
                    if k > best_size {
                        best_i = i + 1 - k;
                        best_j = j + 1 - k;
                        best_size = k;
                    }
                }
            }
            j2len = next;
        }

        (best_i, best_j, best_size)
    }

    /// All matched blocks, in order, adjacent runs merged, terminated by the
    /// zero-length sentinel at (len_a, len_b).
    fn matching_blocks(&self) -> Vec<Block> {
        let (la, lb) = (self.a.len(), self.b.len());
        let mut queue = vec![(0usize, la, 0usize, lb)];
        let mut raw: Vec<Block> = Vec::new();

        while let Some((alo, ahi, blo, bhi)) = queue.pop() {
            let (i, j, k) = self.longest_match(alo, ahi, blo, bhi);
            if k > 0 {
                raw.push((i, j, k));
                if alo < i && blo < j {
                    queue.push((alo, i, blo, j));
                }
                if i + k < ahi && j + k < bhi {
                    queue.push((i + k, ahi, j + k, bhi));
                }
            }
        }

        raw.sort_unstable();

        let mut blocks: Vec<Block> = Vec::new();
        for (i, j, k) in raw {
            match blocks.last_mut() {
                Some(last) if last.0 + last.2 == i && last.1 + last.2 == j => last.2 += k,
                _ => blocks.push((i, j, k)),
            }
        }
        blocks.push((la, lb, 0));
        blocks
    }
}

fn opcodes_from_blocks(blocks: &[Block]) -> Vec<Opcode> {
    let mut ops = Vec::new();
    let (mut i, mut j) = (0usize, 0usize);
    for &(ai, bj, size) in blocks {
        let tag = match (i < ai, j < bj) {
            (true, true) => Some(Tag::Replace),
            (true, false) => Some(Tag::Delete),
            (false, true) => Some(Tag::Insert),
            (false, false) => None,
        };
        if let Some(tag) = tag {
            ops.push(Opcode { tag, i1: i, i2: ai, j1: j, j2: bj });
        }
        if size > 0 {
            ops.push(Opcode {
                tag: Tag::Equal,
                i1: ai,
                i2: ai + size,
                j1: bj,
                j2: bj + size,
            });
        }
        i = ai + size;
        j = bj + size;
    }
    ops
}

/// `2 * matched / (len_old + len_new)` in characters; matched lines are
/// identical by construction, so their length counts once per side.
fn char_ratio(a: &[&str], b: &[&str], blocks: &[Block]) -> f64 {
    let total: usize = a.iter().map(|l| l.chars().count()).sum::<usize>()
        + b.iter().map(|l| l.chars().count()).sum::<usize>();
    if total == 0 {
        return 1.0;
    }
    let matched: usize = blocks
        .iter()
        .flat_map(|&(i, _, k)| a[i..i + k].iter())
        .map(|l| l.chars().count())
        .sum();
    (2.0 * matched as f64) / total as f64
}

// ------------------------------------------------------------
// Edit assembly
// ------------------------------------------------------------

fn fragment(lines: &[&str]) -> String {
    let joined = lines.join("\n");
    if joined.chars().count() <= MAX_FRAGMENT_CHARS {
        joined
    } else {
        joined.chars().take(MAX_FRAGMENT_CHARS).collect()
    }
}

/// Char offset of each line's start within the newline-joined text; the
/// final entry is the total length of the joined text.
fn line_char_offsets(lines: &[&str]) -> Vec<usize> {
    let mut offsets = Vec::with_capacity(lines.len() + 1);
    let mut running = 0usize;
    for line in lines {
        offsets.push(running);
        running += line.chars().count() + 1; // '\n'
    }
    offsets.push(if lines.is_empty() { 0 } else { running - 1 });
    offsets
}

/// The changed region plus up to CONTEXT_CHARS of surrounding text on each
/// side, sliced out of the joined text.
fn context(text: &str, offsets: &[usize], l1: usize, l2: usize) -> String {
    let total = *offsets.last().unwrap_or(&0);
    let start = offsets.get(l1).copied().unwrap_or(total);
    let end = if l2 > l1 {
        offsets.get(l2).map(|o| o.saturating_sub(1)).unwrap_or(total)
    } else {
        start
    };
    let from = start.saturating_sub(CONTEXT_CHARS);
    let to = (end + CONTEXT_CHARS).min(total);
    text.chars()
        .skip(from)
        .take(to.saturating_sub(from))
        .collect()
}
