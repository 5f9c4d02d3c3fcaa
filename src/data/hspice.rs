use std::cmp::Reverse;

use super::units::parse_value;

// ---------------------------------------------------------------------------
// Fixed-width listing tables
// ---------------------------------------------------------------------------
//
// HSPICE listings print each result table between a line holding only `x`
// and a line holding only `y`:
//
//   x
//
//       time      v(out)
//                 (V)
//     0.          1.2000
//     1.0000n     1.1970
//   y
//
// Column boundaries are not delimited; they are recovered from "gutters",
// character positions that are blank in every line of the block.

/// Half-open character range `[start, end)` of one column in a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnSpan {
    pub start: usize,
    pub end: usize,
}

/// One table extracted from a listing.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    /// Column headers, each the two stacked header lines joined.
    pub headers: Vec<String>,
    /// Data rows; every row has exactly `headers.len()` values.
    pub rows: Vec<Vec<f64>>,
}

/// Extract every `x` … `y` block from `text`.
///
/// Malformed input never fails: text before the first marker is ignored,
/// blocks without detectable columns are dropped, and data lines that do not
/// fill every column are skipped.
pub fn parse_blocks(text: &str) -> Vec<Block> {
    let lines: Vec<&str> = text.lines().collect();
    let mut blocks = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        if lines[i].trim() != "x" {
            i += 1;
            continue;
        }
        i += 1;

        let Some(header_1) = next_non_blank(&lines, &mut i) else {
            break;
        };
        let Some(header_2) = next_non_blank(&lines, &mut i) else {
            break;
        };

        let data_start = i;
        while i < lines.len() && lines[i].trim() != "y" {
            i += 1;
        }
        let data_lines = &lines[data_start..i];
        if i < lines.len() {
            // consume the closing `y`
            i += 1;
        }

        if let Some(block) = decode_block(header_1, header_2, data_lines) {
            blocks.push(block);
        }
    }

    blocks
}

/// Advance past blank lines and return the next non-blank one.
fn next_non_blank<'a>(lines: &[&'a str], i: &mut usize) -> Option<&'a str> {
    while *i < lines.len() && lines[*i].trim().is_empty() {
        *i += 1;
    }
    let line = lines.get(*i).copied()?;
    *i += 1;
    Some(line)
}

fn decode_block(header_1: &str, header_2: &str, data_lines: &[&str]) -> Option<Block> {
    let header_1: Vec<char> = header_1.chars().collect();
    let header_2: Vec<char> = header_2.chars().collect();
    let data: Vec<Vec<char>> = data_lines
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.chars().collect())
        .collect();

    let mut all: Vec<&[char]> = vec![header_1.as_slice(), header_2.as_slice()];
    all.extend(data.iter().map(Vec::as_slice));

    let spans = detect_column_spans(&all);
    if spans.is_empty() {
        return None;
    }

    let top = slice_line(&header_1, &spans);
    let bottom = slice_line(&header_2, &spans);
    // Columns are the spans the header lines name.  A span only data lines
    // reach comes from a stray trailing field and marks that line as odd.
    let named: Vec<bool> = top
        .iter()
        .zip(&bottom)
        .map(|(a, b)| !a.is_empty() || !b.is_empty())
        .collect();
    if !named.contains(&true) {
        return None;
    }
    let data_fields: Vec<Vec<String>> = data.iter().map(|l| slice_line(l, &spans)).collect();

    // Single-space separated tables have no gutters between their columns,
    // which shows up as a named field holding several tokens.
    if !single_tokens(pick(&top, &named))
        || data_fields.iter().any(|f| !single_tokens(pick(f, &named)))
    {
        return decode_by_tokens(&header_1, &header_2, &data);
    }

    let headers = join_headers(
        &pick(&top, &named).cloned().collect::<Vec<_>>(),
        &pick(&bottom, &named).cloned().collect::<Vec<_>>(),
    );

    let rows = data_fields
        .iter()
        .filter_map(|fields| {
            let stray = fields.iter().zip(&named).any(|(f, &n)| !n && !f.is_empty());
            // A short line leaves trailing columns empty; such rows are
            // dropped rather than zero-filled.
            if stray || pick(fields, &named).any(String::is_empty) {
                return None;
            }
            Some(pick(fields, &named).map(|f| parse_value(f)).collect())
        })
        .collect();

    Some(Block { headers, rows })
}

/// Fields of the spans flagged in `named`.
fn pick<'a>(fields: &'a [String], named: &'a [bool]) -> impl Iterator<Item = &'a String> + 'a {
    fields.iter().zip(named).filter(|&(_, &n)| n).map(|(f, _)| f)
}

/// Fallback for blocks whose columns are separated by single spaces: split
/// every line on whitespace.  Data fields pair with columns by position;
/// each second-line header token joins the first-line token it sits under.
fn decode_by_tokens(header_1: &[char], header_2: &[char], data: &[Vec<char>]) -> Option<Block> {
    let top = tokens(header_1);
    if top.is_empty() {
        return None;
    }
    let columns: Vec<ColumnSpan> = top.iter().map(|(span, _)| *span).collect();

    let mut units = vec![String::new(); columns.len()];
    for (span, text) in tokens(header_2) {
        if let Some(i) = nearest_column(span, &columns) {
            if !units[i].is_empty() {
                units[i].push(' ');
            }
            units[i].push_str(&text);
        }
    }
    let names: Vec<String> = top.into_iter().map(|(_, text)| text).collect();
    let headers = join_headers(&names, &units);

    let rows = data
        .iter()
        .map(|line| tokens(line))
        .filter(|fields| fields.len() == headers.len())
        .map(|fields| fields.iter().map(|(_, f)| parse_value(f)).collect())
        .collect();

    Some(Block { headers, rows })
}

/// Whitespace-separated tokens of `line` with their character ranges.
fn tokens(line: &[char]) -> Vec<(ColumnSpan, String)> {
    let mut out = Vec::new();
    let mut start = None;
    for (offset, ch) in line.iter().enumerate() {
        match (start, ch.is_whitespace()) {
            (None, false) => start = Some(offset),
            (Some(s), true) => {
                out.push((ColumnSpan { start: s, end: offset }, line[s..offset].iter().collect()));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        out.push((ColumnSpan { start: s, end: line.len() }, line[s..].iter().collect()));
    }
    out
}

/// The column `token` sits under: most overlap first, then the closest
/// centre, then the leftmost.
fn nearest_column(token: ColumnSpan, columns: &[ColumnSpan]) -> Option<usize> {
    let overlap = |c: &ColumnSpan| c.end.min(token.end).saturating_sub(c.start.max(token.start));
    let distance = |c: &ColumnSpan| (c.start + c.end).abs_diff(token.start + token.end);
    (0..columns.len()).min_by_key(|&i| (Reverse(overlap(&columns[i])), distance(&columns[i])))
}

fn join_headers(top: &[String], bottom: &[String]) -> Vec<String> {
    top.iter()
        .zip(bottom)
        .map(|(a, b)| format!("{a} {b}").trim().to_string())
        .collect()
}

fn single_tokens<'a>(mut fields: impl Iterator<Item = &'a String>) -> bool {
    fields.all(|f| !f.contains(char::is_whitespace))
}

/// Find column spans across all lines of a block.
///
/// A character offset is a gutter when every line is either shorter than the
/// offset or has whitespace there.  A span starts at each gutter → text
/// transition and ends at the next text → gutter transition (or the end of
/// the longest line).
pub fn detect_column_spans(lines: &[&[char]]) -> Vec<ColumnSpan> {
    let width = lines.iter().map(|l| l.len()).max().unwrap_or(0);
    let mut gutter = vec![true; width];
    for line in lines {
        for (offset, ch) in line.iter().enumerate() {
            if !ch.is_whitespace() {
                gutter[offset] = false;
            }
        }
    }

    let mut spans = Vec::new();
    let mut start = None;
    for (offset, &is_gutter) in gutter.iter().enumerate() {
        match (start, is_gutter) {
            (None, false) => start = Some(offset),
            (Some(s), true) => {
                spans.push(ColumnSpan { start: s, end: offset });
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        spans.push(ColumnSpan { start: s, end: width });
    }
    spans
}

/// Cut a line into one trimmed field per span.  Spans past the end of the
/// line yield empty fields.
pub fn slice_line(line: &[char], spans: &[ColumnSpan]) -> Vec<String> {
    spans
        .iter()
        .map(|span| {
            let start = span.start.min(line.len());
            let end = span.end.min(line.len());
            line[start..end].iter().collect::<String>().trim().to_string()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chars(lines: &[&str]) -> Vec<Vec<char>> {
        lines.iter().map(|l| l.chars().collect()).collect()
    }

    #[test]
    fn single_block_end_to_end() {
        let text = "x\nTime Drain\n(ns) (A)\n0.0 1.0e-6\n1.0 2.0e-6\ny\n";
        let blocks = parse_blocks(text);

        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].headers, vec!["Time (ns)", "Drain (A)"]);
        assert_eq!(blocks[0].rows, vec![vec![0.0, 1e-6], vec![1.0, 2e-6]]);
    }

    #[test]
    fn preamble_and_blank_lines_are_skipped() {
        let text = "\
garbage line
   x

   Time      Drain

   (ns)      (A)
   0.0       1.0n

   1.0       2.0n
   y
trailing text
";
        let blocks = parse_blocks(text);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].headers, vec!["Time (ns)", "Drain (A)"]);
        assert_eq!(blocks[0].rows.len(), 2);
        assert_eq!(blocks[0].rows[1], vec![1.0, 2.0 * 1e-9]);
    }

    #[test]
    fn multiple_blocks_keep_order() {
        let text = "\
x
Time      Drain
(ns)      (A)
0.0       1.0e-6
y
x
Vg        Id
(V)       (A)
0.0       1.0E-12
1.0       2.0D-12
y
";
        let blocks = parse_blocks(text);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[1].headers, vec!["Vg (V)", "Id (A)"]);
        assert_eq!(blocks[1].rows, vec![vec![0.0, 1.0e-12], vec![1.0, 2.0]]);
    }

    #[test]
    fn unterminated_block_runs_to_end_of_input() {
        let blocks = parse_blocks("x\na   b\nu   v\n1   2\n3   4");
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].rows, vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
    }

    #[test]
    fn missing_markers_yield_nothing() {
        assert!(parse_blocks("").is_empty());
        assert!(parse_blocks("Time Drain\n0.0 1.0\n").is_empty());
        // marker with no header lines after it
        assert!(parse_blocks("x\n\n\n").is_empty());
    }

    #[test]
    fn ragged_row_is_dropped() {
        let text = "\
x
Time    Drain
(ns)    (A)
0.0     1.0
1.0
2.0     3.0
3.0     4.0
y
";
        let blocks = parse_blocks(text);
        assert_eq!(blocks[0].rows.len(), 3);
        assert_eq!(blocks[0].rows[1], vec![2.0, 3.0]);
    }

    #[test]
    fn stray_trailing_field_drops_only_its_line() {
        let blocks = parse_blocks("x\nt    v\ns    V\n0    1\n1    2\n2    3\n3    4    9\ny\n");

        assert_eq!(blocks[0].headers, vec!["t s", "v V"]);
        assert_eq!(
            blocks[0].rows,
            vec![vec![0.0, 1.0], vec![1.0, 2.0], vec![2.0, 3.0]]
        );
    }

    #[test]
    fn two_column_groups_give_two_spans() {
        let lines = chars(&["  time    v(out)", "  (s)     (V)", "  0.      1.2", "  1.0n    1.19"]);
        let refs: Vec<&[char]> = lines.iter().map(Vec::as_slice).collect();

        let spans = detect_column_spans(&refs);
        assert_eq!(
            spans,
            vec![ColumnSpan { start: 2, end: 6 }, ColumnSpan { start: 10, end: 16 }]
        );
    }

    #[test]
    fn spans_never_cover_gutters() {
        let lines = chars(&["ab  cd e", " b   d  ", "a   c   "]);
        let refs: Vec<&[char]> = lines.iter().map(Vec::as_slice).collect();

        for span in detect_column_spans(&refs) {
            for offset in span.start..span.end {
                assert!(refs.iter().any(|l| l.get(offset).is_some_and(|c| !c.is_whitespace())));
            }
        }
    }

    #[test]
    fn short_line_slices_to_empty_fields() {
        let line: Vec<char> = "ab".chars().collect();
        let spans = [ColumnSpan { start: 0, end: 2 }, ColumnSpan { start: 4, end: 6 }];
        assert_eq!(slice_line(&line, &spans), vec!["ab", ""]);
    }

    #[test]
    fn single_space_columns_fall_back_to_tokens() {
        let text = "x\nVg Id Ig\n(V) (A)\n0.0 1p 2f\n0.5 3p\n1.0 4p 5f\ny\n";
        let blocks = parse_blocks(text);

        assert_eq!(blocks[0].headers, vec!["Vg (V)", "Id (A)", "Ig"]);
        assert_eq!(blocks[0].rows.len(), 2);
        assert_eq!(blocks[0].rows[1], vec![1.0, 4.0 * 1e-12, 5.0 * 1e-15]);
    }

    #[test]
    fn single_space_units_join_the_column_above() {
        let text = "x\ntime v(out)\n     (V)\n0. 1.2\n1n 1.1\ny\n";
        let blocks = parse_blocks(text);

        assert_eq!(blocks[0].headers, vec!["time", "v(out) (V)"]);
        assert_eq!(blocks[0].rows, vec![vec![0.0, 1.2], vec![1e-9, 1.1]]);
    }

    #[test]
    fn header_with_single_line_unit_row() {
        let text = "x\n   time     v(out)\n            (V)\n 0.       1.2\ny\n";
        let blocks = parse_blocks(text);
        assert_eq!(blocks[0].headers.len(), 2);
        assert_eq!(blocks[0].headers[1], "v(out) (V)");
    }
}
