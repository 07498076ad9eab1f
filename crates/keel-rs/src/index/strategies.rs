//! Built-in scan strategies.
//!
//! - [`BraceStrategy`]: block-delimiter balance plus keyword recognition for
//!   C-family languages, Rust and Go.
//! - [`IndentStrategy`]: indentation depth for Python.
//! - [`LineCountStrategy`]: never finds symbols, never fails.

use super::{ScanStrategy, SymbolEntry, SymbolKind};

pub(crate) const FALLBACK_NAME: &str = "lines";

/// A declaration may put its opening brace this many lines below the name.
const MAX_SIGNATURE_LINES: usize = 8;

const MODIFIERS: &[&str] = &[
    "pub", "crate", "super", "in", "async", "unsafe", "const", "extern", "export", "default",
    "static", "public", "private", "protected", "internal", "abstract", "final", "override",
    "virtual", "inline", "sealed", "open", "data", "partial", "readonly", "suspend",
];

const CONTROL: &[&str] = &[
    "if", "else", "for", "foreach", "while", "do", "switch", "match", "case", "catch", "try",
    "finally", "return", "throw", "new", "synchronized", "using", "lock", "sizeof", "typeof",
    "when", "await", "delete", "function", "elif", "with",
];

fn is_control(word: &str) -> bool {
    CONTROL.contains(&word)
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// Attach the innermost open symbol to its parent (or the top level).
fn close_innermost(open: &mut Vec<(SymbolEntry, usize)>, top: &mut Vec<SymbolEntry>, end_line: usize) {
    if let Some((mut entry, _)) = open.pop() {
        entry.end_line = end_line.max(entry.start_line);
        match open.last_mut() {
            Some((parent, _)) => parent.children.push(entry),
            None => top.push(entry),
        }
    }
}

fn nested_kind(kind: SymbolKind, parent: Option<&SymbolEntry>) -> SymbolKind {
    match (kind, parent) {
        (SymbolKind::Function, Some(p)) if p.kind == SymbolKind::Class => SymbolKind::Method,
        (k, _) => k,
    }
}

// ── Tokens ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tok<'a> {
    Word(&'a str),
    Punct(char),
}

fn tokenize(code: &str) -> Vec<Tok<'_>> {
    let mut toks = Vec::new();
    let mut word_start: Option<usize> = None;
    for (i, c) in code.char_indices() {
        if is_ident_char(c) {
            word_start.get_or_insert(i);
            continue;
        }
        if let Some(start) = word_start.take()
            && let Some(w) = code.get(start..i)
        {
            toks.push(Tok::Word(w));
        }
        if !c.is_whitespace() {
            toks.push(Tok::Punct(c));
        }
    }
    if let Some(start) = word_start
        && let Some(w) = code.get(start..)
    {
        toks.push(Tok::Word(w));
    }
    toks
}

/// Index just past the group closed by the bracket matching `toks[open]`.
fn skip_group(toks: &[Tok<'_>], open: usize, opener: char, closer: char) -> Option<usize> {
    let mut depth = 0usize;
    for (i, t) in toks.iter().enumerate().skip(open) {
        match t {
            Tok::Punct(c) if *c == opener => depth += 1,
            Tok::Punct(c) if *c == closer => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

// ── Comment and literal stripping ──────────────────────────────────

/// Blanks out comments and string contents so braces inside them are not
/// counted. Block comments carry across lines.
struct Cleaner {
    in_block_comment: bool,
    single_quote_strings: bool,
}

impl Cleaner {
    fn clean(&mut self, line: &str) -> String {
        let chars: Vec<char> = line.chars().collect();
        let mut out = String::with_capacity(line.len());
        let mut i = 0;
        while i < chars.len() {
            let c = chars[i];
            let next = chars.get(i + 1).copied();
            if self.in_block_comment {
                if c == '*' && next == Some('/') {
                    self.in_block_comment = false;
                    i += 2;
                } else {
                    i += 1;
                }
                continue;
            }
            match c {
                '/' if next == Some('/') => break,
                '/' if next == Some('*') => {
                    self.in_block_comment = true;
                    i += 2;
                }
                '"' | '`' => {
                    i = skip_quoted(&chars, i, c);
                    out.push(' ');
                }
                '\'' if self.single_quote_strings => {
                    i = skip_quoted(&chars, i, c);
                    out.push(' ');
                }
                '\'' => {
                    // Char literal ('x', '\n') or a lifetime / label.
                    if next == Some('\\') {
                        i = skip_quoted(&chars, i, c);
                        out.push(' ');
                    } else if chars.get(i + 2) == Some(&'\'') {
                        i += 3;
                        out.push(' ');
                    } else {
                        out.push(c);
                        i += 1;
                    }
                }
                _ => {
                    out.push(c);
                    i += 1;
                }
            }
        }
        out
    }
}

/// Position just past the literal opened by `chars[start] == quote`.
fn skip_quoted(chars: &[char], start: usize, quote: char) -> usize {
    let mut i = start + 1;
    while i < chars.len() && chars[i] != quote {
        if chars[i] == '\\' {
            i += 1;
        }
        i += 1;
    }
    i + 1
}

// ── BraceStrategy ──────────────────────────────────────────────────

/// Tracks `{`/`}` balance and opens a symbol at the first brace after a
/// recognised declaration.
#[derive(Debug, Clone)]
pub struct BraceStrategy {
    /// Also recognise `type name(args) {` method definitions without a keyword.
    keywordless_methods: bool,
    /// Treat `'...'` as a string literal rather than a char / lifetime.
    single_quote_strings: bool,
}

impl BraceStrategy {
    /// Rust, Go: declarations always carry a keyword.
    pub fn keyword_only() -> Self {
        Self {
            keywordless_methods: false,
            single_quote_strings: false,
        }
    }

    /// C, C++, Java, C#, JS/TS, Kotlin, Swift, PHP, Scala.
    pub fn c_like() -> Self {
        Self {
            keywordless_methods: true,
            single_quote_strings: true,
        }
    }

    fn declaration(&self, toks: &[Tok<'_>]) -> Option<(String, SymbolKind)> {
        keyword_declaration(toks).or_else(|| {
            if self.keywordless_methods {
                c_style_declaration(toks)
            } else {
                None
            }
        })
    }
}

fn keyword_declaration(toks: &[Tok<'_>]) -> Option<(String, SymbolKind)> {
    let mut i = 0;
    while i < toks.len() {
        match toks[i] {
            Tok::Punct('#') if toks.get(i + 1) == Some(&Tok::Punct('[')) => {
                i = skip_group(toks, i + 1, '[', ']')?;
            }
            // Annotations such as `@Override`.
            Tok::Punct('@') => i += 2,
            // `pub(crate)`
            Tok::Punct('(') | Tok::Punct(')') => i += 1,
            Tok::Word(w) if MODIFIERS.contains(&w) => i += 1,
            Tok::Word(w) => return declaration_after(w, toks, i),
            Tok::Punct(_) => return None,
        }
    }
    None
}

/// The identifier at `i`. After an explicit keyword any word is a name,
/// `new` and `delete` included.
fn word_at(toks: &[Tok<'_>], i: usize) -> Option<String> {
    match toks.get(i) {
        Some(Tok::Word(w)) => Some((*w).to_string()),
        _ => None,
    }
}

/// Like [`word_at`], but control words are not names. Used where there is
/// no keyword and `while (x) {` must not look like a function.
fn plain_name_at(toks: &[Tok<'_>], i: usize) -> Option<String> {
    word_at(toks, i).filter(|w| !is_control(w))
}

fn declaration_after(keyword: &str, toks: &[Tok<'_>], at: usize) -> Option<(String, SymbolKind)> {
    match keyword {
        "fn" | "function" | "def" | "fun" => {
            // `function* gen()`
            let i = if toks.get(at + 1) == Some(&Tok::Punct('*')) { at + 2 } else { at + 1 };
            word_at(toks, i).map(|n| (n, SymbolKind::Function))
        }
        "func" => {
            // Go method receivers: `func (s *Server) Start()`.
            let i = if toks.get(at + 1) == Some(&Tok::Punct('(')) {
                skip_group(toks, at + 1, '(', ')')?
            } else {
                at + 1
            };
            word_at(toks, i).map(|n| (n, SymbolKind::Function))
        }
        "class" | "struct" | "enum" | "trait" | "interface" | "object" | "protocol" | "union"
        | "record" | "type" => word_at(toks, at + 1).map(|n| (n, SymbolKind::Class)),
        "mod" | "namespace" | "module" => word_at(toks, at + 1).map(|n| (n, SymbolKind::Other)),
        "impl" => Some((impl_name(toks.get(at + 1..).unwrap_or_default()), SymbolKind::Class)),
        _ => None,
    }
}

/// `impl<T> fmt::Display for Wrapper<T> where ...` becomes `impl fmt::Display for Wrapper`.
fn impl_name(rest: &[Tok<'_>]) -> String {
    let mut name = String::from("impl");
    let mut depth = 0i32;
    for t in rest {
        match t {
            Tok::Punct('<') => depth += 1,
            Tok::Punct('>') => depth -= 1,
            Tok::Punct('{') => break,
            Tok::Word("where") if depth == 0 => break,
            Tok::Punct(':') if depth == 0 => name.push(':'),
            Tok::Word(w) if depth == 0 => {
                if !name.ends_with(':') {
                    name.push(' ');
                }
                name.push_str(w);
            }
            _ => {}
        }
    }
    name
}

/// `int main(void) {`, `public void run() {`, `render() {`, `const f = (x) => {`.
/// The opening brace must be on the same line.
fn c_style_declaration(toks: &[Tok<'_>]) -> Option<(String, SymbolKind)> {
    if toks.last() != Some(&Tok::Punct('{')) {
        return None;
    }
    let open = toks.iter().position(|t| *t == Tok::Punct('('))?;

    let is_arrow = toks
        .windows(2)
        .any(|w| w[0] == Tok::Punct('=') && w[1] == Tok::Punct('>'));
    if is_arrow {
        let eq = toks.iter().position(|t| *t == Tok::Punct('='))?;
        if eq == 0 || eq > open {
            return None;
        }
        return plain_name_at(toks, eq - 1).map(|n| (n, SymbolKind::Function));
    }

    let name = plain_name_at(toks, open.checked_sub(1)?)?;
    for t in toks.get(..open - 1).unwrap_or_default() {
        match t {
            Tok::Word(w) if is_control(w) => return None,
            Tok::Word(_) => {}
            Tok::Punct(c) if "*&:<>,[]?@".contains(*c) => {}
            Tok::Punct(_) => return None,
        }
    }
    let close = skip_group(toks, open, '(', ')')?;
    for t in toks.get(close..).unwrap_or_default() {
        if let Tok::Punct(c) = t
            && "=;(.".contains(*c)
        {
            return None;
        }
    }
    Some((name, SymbolKind::Function))
}

impl ScanStrategy for BraceStrategy {
    fn name(&self) -> &'static str {
        "brace"
    }

    fn scan(&self, source: &str) -> Option<Vec<SymbolEntry>> {
        let mut cleaner = Cleaner {
            in_block_comment: false,
            single_quote_strings: self.single_quote_strings,
        };
        let mut depth = 0usize;
        // Open symbols with the brace depth they opened at.
        let mut open: Vec<(SymbolEntry, usize)> = Vec::new();
        let mut top = Vec::new();
        // Declared but brace not yet seen: entry + declaration line.
        let mut pending: Option<(SymbolEntry, usize)> = None;

        for (idx, raw) in source.lines().enumerate() {
            let line_no = idx + 1;
            let code = cleaner.clean(raw);
            let toks = tokenize(&code);

            if let Some((name, kind)) = self.declaration(&toks) {
                let kind = nested_kind(kind, open.last().map(|(e, _)| e));
                pending = Some((SymbolEntry::new(name, kind, line_no, line_no), line_no));
            } else if pending
                .as_ref()
                .is_some_and(|(_, declared)| line_no - declared > MAX_SIGNATURE_LINES)
            {
                pending = None;
            }

            let mut group = 0i32;
            for c in code.chars() {
                match c {
                    '(' | '[' => group += 1,
                    ')' | ']' => group -= 1,
                    '{' => {
                        if let Some((entry, _)) = pending.take() {
                            open.push((entry, depth));
                        }
                        depth += 1;
                    }
                    '}' => {
                        depth = depth.checked_sub(1)?;
                        if open.last().is_some_and(|(_, d)| *d == depth) {
                            close_innermost(&mut open, &mut top, line_no);
                        }
                    }
                    // Forward declarations: `fn f();`, `struct S;`.
                    ';' if group <= 0 => pending = None,
                    _ => {}
                }
            }
        }

        if depth != 0 || !open.is_empty() || cleaner.in_block_comment {
            return None;
        }
        Some(top)
    }
}

// ── IndentStrategy ─────────────────────────────────────────────────

/// Python: a `def`/`class` block ends at the last code line before the next
/// line indented at or above its own level.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndentStrategy;

fn indent_width(line: &str) -> usize {
    line.chars()
        .take_while(|c| c.is_whitespace())
        .map(|c| if c == '\t' { 4 } else { 1 })
        .sum()
}

fn python_declaration(trimmed: &str) -> Option<(String, SymbolKind)> {
    let rest = trimmed.strip_prefix("async ").map(str::trim_start).unwrap_or(trimmed);
    let (rest, kind) = if let Some(r) = rest.strip_prefix("def ") {
        (r, SymbolKind::Function)
    } else if let Some(r) = rest.strip_prefix("class ") {
        (r, SymbolKind::Class)
    } else {
        return None;
    };
    let name: String = rest
        .trim_start()
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_')
        .collect();
    if name.is_empty() { None } else { Some((name, kind)) }
}

/// Net change in bracket nesting, ignoring strings and `#` comments.
fn bracket_delta(code: &str) -> i32 {
    let mut delta = 0;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for c in code.chars() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '#' => break,
            '"' | '\'' => quote = Some(c),
            '(' | '[' | '{' => delta += 1,
            ')' | ']' | '}' => delta -= 1,
            _ => {}
        }
    }
    delta
}

impl ScanStrategy for IndentStrategy {
    fn name(&self) -> &'static str {
        "indent"
    }

    fn scan(&self, source: &str) -> Option<Vec<SymbolEntry>> {
        let mut open: Vec<(SymbolEntry, usize)> = Vec::new();
        let mut top = Vec::new();
        let mut last_code_line = 0;
        let mut in_triple: Option<&'static str> = None;
        let mut brackets = 0i32;

        for (idx, raw) in source.lines().enumerate() {
            let line_no = idx + 1;
            let trimmed = raw.trim();

            if let Some(q) = in_triple {
                if raw.matches(q).count() % 2 == 1 {
                    in_triple = None;
                }
                last_code_line = line_no;
                continue;
            }
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let continuation = brackets > 0;
            if !trimmed.contains("\"\"\"") && !trimmed.contains("'''") {
                brackets = (brackets + bracket_delta(trimmed)).max(0);
            }
            in_triple = ["\"\"\"", "'''"]
                .into_iter()
                .find(|q| trimmed.matches(q).count() % 2 == 1);

            if !continuation {
                let indent = indent_width(raw);
                while open.last().is_some_and(|(_, i)| *i >= indent) {
                    close_innermost(&mut open, &mut top, last_code_line);
                }
                if let Some((name, kind)) = python_declaration(trimmed) {
                    let kind = nested_kind(kind, open.last().map(|(e, _)| e));
                    open.push((SymbolEntry::new(name, kind, line_no, line_no), indent));
                }
            }
            last_code_line = line_no;
        }

        if in_triple.is_some() {
            return None;
        }
        while !open.is_empty() {
            close_innermost(&mut open, &mut top, last_code_line);
        }
        Some(top)
    }
}

// ── LineCountStrategy ──────────────────────────────────────────────

/// Finds no symbols. Register it to force line-count-only maps for an extension.
#[derive(Debug, Clone, Copy, Default)]
pub struct LineCountStrategy;

impl ScanStrategy for LineCountStrategy {
    fn name(&self) -> &'static str {
        FALLBACK_NAME
    }

    fn scan(&self, _source: &str) -> Option<Vec<SymbolEntry>> {
        Some(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(entries: &[SymbolEntry]) -> Vec<(&str, SymbolKind, usize, usize)> {
        entries
            .iter()
            .map(|e| (e.name.as_str(), e.kind, e.start_line, e.end_line))
            .collect()
    }

    #[test]
    fn braces_in_strings_and_comments_ignored() {
        let src = "fn a() {\n    let s = \"}}}\"; // {\n    /* { */\n}\n";
        let out = BraceStrategy::keyword_only().scan(src).unwrap();
        assert_eq!(names(&out), vec![("a", SymbolKind::Function, 1, 4)]);
    }

    #[test]
    fn lifetimes_do_not_open_char_literals() {
        let src = "impl<'a> Iterator for Iter<'a> {\n    fn next(&mut self) -> Option<&'a str> {\n        None\n    }\n}\n";
        let out = BraceStrategy::keyword_only().scan(src).unwrap();
        assert_eq!(out[0].name, "impl Iterator for Iter");
        assert_eq!(names(&out[0].children), vec![("next", SymbolKind::Method, 2, 4)]);
    }

    #[test]
    fn forward_declarations_are_skipped() {
        let src = "trait T {\n    fn f(&self, buf: [u8; 4]);\n    fn g(&self) {}\n}\n";
        let out = BraceStrategy::keyword_only().scan(src).unwrap();
        assert_eq!(names(&out[0].children), vec![("g", SymbolKind::Method, 3, 3)]);
    }

    #[test]
    fn names_after_keywords_may_be_control_words() {
        let src = "impl Locks {\n    pub fn new() -> Self {\n        Self\n    }\n    fn lock(&self) {}\n    fn delete(&self) {}\n}\n";
        let out = BraceStrategy::keyword_only().scan(src).unwrap();
        assert_eq!(
            names(&out[0].children),
            vec![
                ("new", SymbolKind::Method, 2, 4),
                ("lock", SymbolKind::Method, 5, 5),
                ("delete", SymbolKind::Method, 6, 6),
            ]
        );

        // Without a keyword, control words still are not declarations.
        let c = "int main() {\n    while (x) {\n    }\n}\n";
        let out = BraceStrategy::c_like().scan(c).unwrap();
        assert_eq!(names(&out), vec![("main", SymbolKind::Function, 1, 4)]);
        assert!(out[0].children.is_empty());
    }

    #[test]
    fn brace_on_next_line() {
        let src = "fn long(\n    a: u8,\n) -> u8\n{\n    a\n}\n";
        let out = BraceStrategy::keyword_only().scan(src).unwrap();
        assert_eq!(names(&out), vec![("long", SymbolKind::Function, 1, 6)]);
    }

    #[test]
    fn go_receiver_methods() {
        let src = "type Server struct {\n\taddr string\n}\n\nfunc (s *Server) Start() error {\n\treturn nil\n}\n";
        let out = BraceStrategy::keyword_only().scan(src).unwrap();
        assert_eq!(
            names(&out),
            vec![
                ("Server", SymbolKind::Class, 1, 3),
                ("Start", SymbolKind::Function, 5, 7)
            ]
        );
    }

    #[test]
    fn c_like_keywordless_methods() {
        let src = "\
public class Greeter {
    @Override
    public String toString() {
        if (x) {
            return \"{\";
        }
        return name;
    }
}
";
        let out = BraceStrategy::c_like().scan(src).unwrap();
        assert_eq!(names(&out), vec![("Greeter", SymbolKind::Class, 1, 9)]);
        assert_eq!(names(&out[0].children), vec![("toString", SymbolKind::Method, 3, 8)]);
    }

    #[test]
    fn js_functions_and_arrows() {
        let src = "\
export function load(path) {
  return fetch(path).then((r) => {
    return r.json();
  });
}
const save = async (data) => {
  write(data);
};
";
        let out = BraceStrategy::c_like().scan(src).unwrap();
        assert_eq!(
            names(&out),
            vec![
                ("load", SymbolKind::Function, 1, 5),
                ("save", SymbolKind::Function, 6, 8)
            ]
        );
    }

    #[test]
    fn unbalanced_returns_none() {
        assert!(BraceStrategy::keyword_only().scan("}\n").is_none());
        assert!(BraceStrategy::keyword_only().scan("fn a() {\n").is_none());
    }

    #[test]
    fn python_classes_and_methods() {
        let src = "\
import os


class Store:
    \"\"\"Docs.

Unindented docstring line.
    \"\"\"

    def get(self, key):
        return self.data[key]

    @property
    def size(self):
        return len(
    self.data)


async def main():
    pass
";
        let out = IndentStrategy.scan(src).unwrap();
        assert_eq!(
            names(&out),
            vec![
                ("Store", SymbolKind::Class, 4, 16),
                ("main", SymbolKind::Function, 19, 20)
            ]
        );
        assert_eq!(
            names(&out[0].children),
            vec![
                ("get", SymbolKind::Method, 10, 11),
                ("size", SymbolKind::Method, 14, 16)
            ]
        );
    }

    #[test]
    fn python_unterminated_docstring_falls_back() {
        assert!(IndentStrategy.scan("def f():\n    \"\"\"never closed\n").is_none());
    }

    #[test]
    fn line_count_strategy_never_finds_symbols() {
        assert_eq!(LineCountStrategy.scan("fn a() {}").unwrap(), Vec::new());
        assert_eq!(LineCountStrategy.name(), "lines");
    }

    #[test]
    fn tokenize_splits_words_and_punctuation() {
        assert_eq!(
            tokenize("pub(crate) fn x"),
            vec![
                Tok::Word("pub"),
                Tok::Punct('('),
                Tok::Word("crate"),
                Tok::Punct(')'),
                Tok::Word("fn"),
                Tok::Word("x")
            ]
        );
    }
}
