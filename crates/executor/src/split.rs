//! Statement splitting and classification.
//!
//! Raw input is split on `;` outside string literals, quoted identifiers,
//! dollar-quoted bodies and comments. Comments are stripped, fragments are
//! trimmed, and empty fragments are dropped. A fragment ending in
//! [`EXPANDED_SUFFIX`] requests expanded display for that statement only.

/// Suffix requesting expanded display for one statement.
pub const EXPANDED_SUFFIX: &str = "\\G";

/// One classified statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    /// Statement text, directive suffix removed
    pub sql: String,
    /// Whether the statement asked for expanded display
    pub expanded: bool,
}

/// Split and classify raw input.
pub fn split_statements(raw: &str) -> Vec<Fragment> {
    split(raw).into_iter().map(classify).collect()
}

/// Recognize the expanded-display directive.
pub fn classify(sql: String) -> Fragment {
    match sql.strip_suffix(EXPANDED_SUFFIX) {
        Some(stripped) => Fragment {
            sql: stripped.trim().to_string(),
            expanded: true,
        },
        None => Fragment {
            sql,
            expanded: false,
        },
    }
}

/// Split raw input into trimmed statements without terminators or comments.
pub fn split(raw: &str) -> Vec<String> {
    let chars: Vec<char> = raw.chars().collect();
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            ';' => {
                push_statement(&mut statements, &current);
                current.clear();
                i += 1;
            }
            '\'' => {
                let escapes = is_escape_string(&chars, i);
                i = copy_quoted(&chars, i, '\'', escapes, &mut current);
            }
            '"' => {
                i = copy_quoted(&chars, i, '"', false, &mut current);
            }
            '-' if next == Some('-') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                current.push(' ');
            }
            '/' if next == Some('*') => {
                i = skip_block_comment(&chars, i);
                current.push(' ');
            }
            '$' => match dollar_tag(&chars, i) {
                Some(tag) => i = copy_dollar_quoted(&chars, i, &tag, &mut current),
                None => {
                    current.push(c);
                    i += 1;
                }
            },
            _ => {
                current.push(c);
                i += 1;
            }
        }
    }
    push_statement(&mut statements, &current);
    statements
}

fn push_statement(statements: &mut Vec<String>, raw: &str) {
    let sql = raw.trim().trim_end_matches(';').trim();
    if !sql.is_empty() {
        statements.push(sql.to_string());
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// `E'...'` strings honour backslash escapes.
fn is_escape_string(chars: &[char], quote: usize) -> bool {
    if quote == 0 || !matches!(chars[quote - 1], 'E' | 'e') {
        return false;
    }
    quote < 2 || !is_ident_char(chars[quote - 2])
}

/// Copy a quoted run starting at `start`; returns the index after it.
/// A doubled delimiter is an escaped delimiter. Unterminated runs extend to
/// the end of input.
fn copy_quoted(chars: &[char], start: usize, delim: char, escapes: bool, out: &mut String) -> usize {
    out.push(delim);
    let mut i = start + 1;
    while i < chars.len() {
        let c = chars[i];
        out.push(c);
        if escapes && c == '\\' {
            if let Some(&escaped) = chars.get(i + 1) {
                out.push(escaped);
            }
            i += 2;
            continue;
        }
        if c == delim {
            if chars.get(i + 1) == Some(&delim) {
                out.push(delim);
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    i
}

/// Block comments nest.
fn skip_block_comment(chars: &[char], start: usize) -> usize {
    let mut depth = 0;
    let mut i = start;
    while i < chars.len() {
        match (chars[i], chars.get(i + 1).copied()) {
            ('/', Some('*')) => {
                depth += 1;
                i += 2;
            }
            ('*', Some('/')) => {
                depth -= 1;
                i += 2;
                if depth == 0 {
                    return i;
                }
            }
            _ => i += 1,
        }
    }
    i
}

/// The `$tag$` opening at `start`, if any. `$1` parameters and `$` inside
/// identifiers are not tags.
fn dollar_tag(chars: &[char], start: usize) -> Option<String> {
    if start > 0 && is_ident_char(chars[start - 1]) {
        return None;
    }
    let mut i = start + 1;
    if let Some(&first) = chars.get(i) {
        if first.is_ascii_digit() {
            return None;
        }
    }
    while i < chars.len() && is_ident_char(chars[i]) {
        i += 1;
    }
    if chars.get(i) == Some(&'$') {
        Some(chars[start..=i].iter().collect())
    } else {
        None
    }
}

fn copy_dollar_quoted(chars: &[char], start: usize, tag: &str, out: &mut String) -> usize {
    let tag: Vec<char> = tag.chars().collect();
    out.extend(tag.iter());
    let mut i = start + tag.len();
    while i < chars.len() {
        if chars[i..].starts_with(&tag) {
            out.extend(tag.iter());
            return i + tag.len();
        }
        out.push(chars[i]);
        i += 1;
    }
    i
}
