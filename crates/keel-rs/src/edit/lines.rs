//! Pure line arithmetic for the editor. No I/O.

use crate::EngineError;

/// Line terminator style of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEnding {
    Lf,
    CrLf,
}

impl LineEnding {
    /// Style of the first terminator in `text`. Files without any use LF.
    pub fn detect(text: &str) -> Self {
        match text.find('\n') {
            Some(idx) if text.get(..idx).is_some_and(|head| head.ends_with('\r')) => LineEnding::CrLf,
            _ => LineEnding::Lf,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LineEnding::Lf => "\n",
            LineEnding::CrLf => "\r\n",
        }
    }
}

/// Lines of `text`, each keeping its own terminator.
pub fn split_lines(text: &str) -> Vec<&str> {
    text.split_inclusive('\n').collect()
}

/// Strip a single trailing `\n` or `\r\n`.
pub fn strip_terminator(line: &str) -> &str {
    line.strip_suffix('\n')
        .map(|l| l.strip_suffix('\r').unwrap_or(l))
        .unwrap_or(line)
}

/// Check `1 <= start <= end <= total`.
pub fn check_range(start: usize, end: usize, total: usize) -> crate::Result<()> {
    if start == 0 || end < start || end > total {
        return Err(EngineError::RangeInvalid { start, end, total });
    }
    Ok(())
}

/// Result of [`splice`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spliced {
    pub content: String,
    pub old_line_count: usize,
    pub new_line_count: usize,
}

/// Replace lines `start..=end` of `original` with `new_content`.
///
/// Bytes outside the range are copied unchanged. The replacement is
/// re-terminated in the file's own line-ending style, and ends with a
/// terminator iff the last replaced line had one. Empty `new_content`
/// deletes the range.
pub fn splice(original: &str, start: usize, end: usize, new_content: &str) -> crate::Result<Spliced> {
    let lines = split_lines(original);
    check_range(start, end, lines.len())?;

    let eol = LineEnding::detect(original);
    let replaced = &lines[start - 1..end];
    let keep_terminator = replaced.last().is_some_and(|l| l.ends_with('\n'));

    let body = new_content.strip_suffix('\n').map(|b| b.strip_suffix('\r').unwrap_or(b));
    let body = body.unwrap_or(new_content);
    let new_lines: Vec<&str> = if new_content.is_empty() {
        Vec::new()
    } else {
        body.split('\n')
            .map(|l| l.strip_suffix('\r').unwrap_or(l))
            .collect()
    };

    let mut content = String::with_capacity(original.len() + new_content.len());
    for l in &lines[..start - 1] {
        content.push_str(l);
    }
    if !new_lines.is_empty() {
        content.push_str(&new_lines.join(eol.as_str()));
        if keep_terminator {
            content.push_str(eol.as_str());
        }
    }
    for l in &lines[end..] {
        content.push_str(l);
    }

    Ok(Spliced {
        content,
        old_line_count: end - start + 1,
        new_line_count: new_lines.len(),
    })
}

/// Lines `start..=end` without terminators.
pub fn select(text: &str, start: usize, end: usize) -> crate::Result<Vec<String>> {
    let lines = split_lines(text);
    check_range(start, end, lines.len())?;
    Ok(lines[start - 1..end]
        .iter()
        .map(|l| strip_terminator(l).to_string())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_endings() {
        assert_eq!(LineEnding::detect("a\r\nb\r\n"), LineEnding::CrLf);
        assert_eq!(LineEnding::detect("a\nb\r\n"), LineEnding::Lf);
        assert_eq!(LineEnding::detect("single"), LineEnding::Lf);
    }

    #[test]
    fn splice_middle_preserves_outside_bytes() {
        let out = splice("one\ntwo\nthree\nfour\n", 2, 3, "TWO\nTHREE\nEXTRA").unwrap();
        assert_eq!(out.content, "one\nTWO\nTHREE\nEXTRA\nfour\n");
        assert_eq!((out.old_line_count, out.new_line_count), (2, 3));
    }

    #[test]
    fn splice_keeps_crlf() {
        let out = splice("a\r\nb\r\nc\r\n", 2, 2, "x\ny\n").unwrap();
        assert_eq!(out.content, "a\r\nx\r\ny\r\nc\r\n");
    }

    #[test]
    fn splice_last_line_without_terminator() {
        let out = splice("a\nb", 2, 2, "B\n").unwrap();
        assert_eq!(out.content, "a\nB");
    }

    #[test]
    fn splice_empty_content_deletes() {
        let out = splice("a\nb\nc\n", 2, 2, "").unwrap();
        assert_eq!(out.content, "a\nc\n");
        assert_eq!(out.new_line_count, 0);
    }

    #[test]
    fn invalid_ranges_rejected() {
        let text = "a\nb\nc\n";
        for (s, e) in [(0, 1), (2, 1), (1, 4), (4, 4)] {
            assert!(matches!(
                splice(text, s, e, "x"),
                Err(EngineError::RangeInvalid { total: 3, .. })
            ));
        }
        assert!(select("", 1, 1).is_err());
    }

    #[test]
    fn splice_then_select_round_trip() {
        let original = "l1\nl2\nl3\nl4\nl5\n";
        let new_content = "n1\nn2";
        let out = splice(original, 2, 4, new_content).unwrap();
        let back = select(&out.content, 2, 2 + out.new_line_count - 1).unwrap();
        assert_eq!(back.join("\n"), new_content);
        assert!(out.content.starts_with("l1\n"));
        assert!(out.content.ends_with("l5\n"));
    }
}
