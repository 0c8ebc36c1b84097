//! Line-based three-way merge used when hidden changes are put back on top
//! of a fixer's edits.

pub const OURS_MARKER: &str = "<<<<<<< ours (fixed)";
pub const SEPARATOR: &str = "=======";
pub const THEIRS_MARKER: &str = ">>>>>>> theirs (unstaged)";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Ours,
    Theirs,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    /// inclusive line index in base
    pub start: usize,
    /// exclusive line index in base
    pub end: usize,
    pub lines: Vec<String>,
    pub side: Side,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Merged {
    pub content: String,
    pub conflicts: usize,
}

impl Merged {
    pub fn is_clean(&self) -> bool {
        self.conflicts == 0
    }
}

/// Line hunks turning `base` into `other`, from a longest-common-subsequence walk.
pub fn diff_hunks(base: &str, other: &str, side: Side) -> Vec<Hunk> {
    if base == other {
        return vec![];
    }
    let a: Vec<&str> = base.split_inclusive('\n').collect();
    let b: Vec<&str> = other.split_inclusive('\n').collect();
    let n = a.len();
    let m = b.len();
    let mut dp = vec![vec![0usize; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            dp[i][j] = if a[i] == b[j] {
                dp[i + 1][j + 1] + 1
            } else {
                dp[i + 1][j].max(dp[i][j + 1])
            };
        }
    }

    let mut hunks = vec![];
    let mut current: Option<Hunk> = None;
    let (mut i, mut j) = (0, 0);
    while i < n || j < m {
        if i < n && j < m && a[i] == b[j] {
            if let Some(mut h) = current.take() {
                h.end = i;
                hunks.push(h);
            }
            i += 1;
            j += 1;
            continue;
        }
        let h = current.get_or_insert_with(|| Hunk {
            start: i,
            end: i,
            lines: vec![],
            side,
        });
        if j >= m || (i < n && dp[i + 1][j] >= dp[i][j + 1]) {
            // base line dropped
            i += 1;
        } else {
            h.lines.push(b[j].to_string());
            j += 1;
        }
    }
    if let Some(mut h) = current.take() {
        h.end = n;
        hunks.push(h);
    }
    hunks
}

/// Merges `ours` and `theirs`, both derived from `base`. Regions changed on
/// only one side are taken from that side; regions both sides changed
/// differently are written with conflict markers so neither edit is lost.
pub fn merge3(base: &str, ours: &str, theirs: &str) -> Merged {
    if ours == theirs || theirs == base {
        return Merged {
            content: ours.to_string(),
            conflicts: 0,
        };
    }
    if ours == base {
        return Merged {
            content: theirs.to_string(),
            conflicts: 0,
        };
    }

    let base_lines: Vec<&str> = base.split_inclusive('\n').collect();
    let mut hunks = diff_hunks(base, ours, Side::Ours);
    hunks.extend(diff_hunks(base, theirs, Side::Theirs));
    hunks.sort_by_key(|h| (h.start, h.end));

    let mut out = String::new();
    let mut conflicts = 0;
    let mut idx = 0;
    for cluster in clusters(hunks) {
        let start = cluster.iter().map(|h| h.start).min().unwrap_or(idx);
        let end = cluster.iter().map(|h| h.end).max().unwrap_or(idx);
        out.extend(base_lines[idx..start].iter().copied());
        idx = end;

        let has = |side| cluster.iter().any(|h| h.side == side);
        let ours_text = apply(&base_lines, start, end, &cluster, Side::Ours);
        if !has(Side::Theirs) {
            out.push_str(&ours_text);
            continue;
        }
        let theirs_text = apply(&base_lines, start, end, &cluster, Side::Theirs);
        if !has(Side::Ours) || ours_text == theirs_text {
            out.push_str(&theirs_text);
            continue;
        }
        conflicts += 1;
        push_line(&mut out, OURS_MARKER);
        push_block(&mut out, &ours_text);
        push_line(&mut out, SEPARATOR);
        push_block(&mut out, &theirs_text);
        push_line(&mut out, THEIRS_MARKER);
    }
    out.extend(base_lines[idx.min(base_lines.len())..].iter().copied());
    Merged {
        content: out,
        conflicts,
    }
}

/// Groups sorted hunks that touch the same base lines. An insertion at the
/// boundary of another change is grouped with it since their order is ambiguous.
fn clusters(hunks: Vec<Hunk>) -> Vec<Vec<Hunk>> {
    let mut clusters: Vec<Vec<Hunk>> = vec![];
    let mut cluster_start = 0;
    let mut cluster_end = 0;
    for h in hunks {
        let joins = match clusters.last() {
            Some(_) => {
                h.start < cluster_end
                    || h.start == cluster_start
                    || (h.start == cluster_end && h.start == h.end)
            }
            None => false,
        };
        if joins {
            cluster_end = cluster_end.max(h.end);
            if let Some(last) = clusters.last_mut() {
                last.push(h);
            }
        } else {
            cluster_start = h.start;
            cluster_end = h.end;
            clusters.push(vec![h]);
        }
    }
    clusters
}

/// Base lines `start..end` with only `side`'s hunks applied.
fn apply(base: &[&str], start: usize, end: usize, cluster: &[Hunk], side: Side) -> String {
    let mut out = String::new();
    let mut idx = start;
    for h in cluster.iter().filter(|h| h.side == side) {
        out.extend(base[idx..h.start].iter().copied());
        out.extend(h.lines.iter().map(String::as_str));
        idx = h.end;
    }
    out.extend(base[idx..end].iter().copied());
    out
}

fn push_line(out: &mut String, line: &str) {
    out.push_str(line);
    out.push('\n');
}

fn push_block(out: &mut String, block: &str) {
    out.push_str(block);
    if !block.is_empty() && !block.ends_with('\n') {
        out.push('\n');
    }
}
