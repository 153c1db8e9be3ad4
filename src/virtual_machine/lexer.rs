//! Source text to lexical words.
//!
//! # Syntax
//!
//! ```text
//! 2 3 + println          # words are separated by whitespace #>
//! "hello world" println  # string literals may contain spaces
//! ```
//!
//! - A word starting with `#` opens a comment that runs until a `#>` word or
//!   the end of the line
//! - Double-quoted spans are string literals; they must close on the same line
//!   and support the escapes `\n`, `\t`, `\"` and `\\`
//! - Every word carries its 1-based line and column

use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::program::SourcePos;

const COMMENT_CHAR: char = '#';
const COMMENT_END: &str = "#>";
const QUOTE: char = '"';

/// One lexical word handed to the builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Word {
    /// Word text; for literals, the de-quoted and unescaped contents.
    pub text: String,
    /// True when the word came from a `"..."` literal.
    pub literal: bool,
    pub pos: SourcePos,
}

impl Word {
    pub fn new(text: impl Into<String>, literal: bool, pos: SourcePos) -> Self {
        Self {
            text: text.into(),
            literal,
            pos,
        }
    }
}

/// Splits `source` into words, dropping comments.
pub fn tokenize(source: &str) -> Result<Vec<Word>, VMError> {
    let mut out = Vec::new();
    for (line_no, line) in source.lines().enumerate() {
        tokenize_line(line_no + 1, line, &mut out)?;
    }
    Ok(out)
}

/// Tokenizes one line, appending its words to `out`.
fn tokenize_line(line_no: usize, line: &str, out: &mut Vec<Word>) -> Result<(), VMError> {
    let chars: Vec<char> = line.chars().collect();
    let mut in_comment = false;
    let mut i = 0;

    while i < chars.len() {
        if chars[i].is_whitespace() {
            i += 1;
            continue;
        }
        let pos = SourcePos::new(line_no, i + 1);

        if chars[i] == QUOTE && !in_comment {
            let (text, next) = read_literal(&chars, i, pos)?;
            out.push(Word::new(text, true, pos));
            i = next;
            continue;
        }

        let start = i;
        while i < chars.len() && !chars[i].is_whitespace() {
            i += 1;
        }
        let text: String = chars[start..i].iter().collect();

        if in_comment {
            if text == COMMENT_END {
                in_comment = false;
            }
        } else if text.starts_with(COMMENT_CHAR) && text != COMMENT_END {
            in_comment = true;
        } else {
            out.push(Word::new(text, false, pos));
        }
    }

    Ok(())
}

/// Reads a string literal starting at the opening quote `chars[start]`.
///
/// Returns the unescaped contents and the index just past the closing quote.
fn read_literal(chars: &[char], start: usize, pos: SourcePos) -> Result<(String, usize), VMError> {
    let mut text = String::new();
    let mut i = start + 1;

    while i < chars.len() {
        match chars[i] {
            QUOTE => {
                let next = i + 1;
                if next < chars.len() && !chars[next].is_whitespace() {
                    return Err(VMError::syntax(format!(
                        "unexpected `{}` after string literal",
                        chars[next]
                    ))
                    .at(pos.line, next + 1));
                }
                return Ok((text, next));
            }
            '\\' => {
                let escaped = chars.get(i + 1).copied().ok_or_else(|| {
                    VMError::syntax("unterminated string literal (missing closing quote)")
                        .at(pos.line, pos.column)
                })?;
                text.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    '"' => '"',
                    '\\' => '\\',
                    other => {
                        return Err(VMError::syntax(format!("unknown escape `\\{other}`"))
                            .at(pos.line, i + 1));
                    }
                });
                i += 2;
            }
            c => {
                text.push(c);
                i += 1;
            }
        }
    }

    Err(VMError::syntax("unterminated string literal (missing closing quote)").at(pos.line, pos.column))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(source: &str) -> Vec<(String, bool)> {
        tokenize(source)
            .unwrap()
            .into_iter()
            .map(|w| (w.text, w.literal))
            .collect()
    }

    #[test]
    fn splits_on_whitespace() {
        assert_eq!(
            texts("2 3\t+\n print"),
            vec![
                ("2".to_string(), false),
                ("3".to_string(), false),
                ("+".to_string(), false),
                ("print".to_string(), false),
            ]
        );
    }

    #[test]
    fn records_positions() {
        let words = tokenize("1 2\n  println").unwrap();
        assert_eq!(words[0].pos, SourcePos::new(1, 1));
        assert_eq!(words[1].pos, SourcePos::new(1, 3));
        assert_eq!(words[2].pos, SourcePos::new(2, 3));
    }

    #[test]
    fn literal_keeps_spaces() {
        assert_eq!(
            texts(r#""hello  world" println"#),
            vec![
                ("hello  world".to_string(), true),
                ("println".to_string(), false),
            ]
        );
    }

    #[test]
    fn literal_escapes() {
        assert_eq!(texts(r#""a\"b\\c\nd""#), vec![("a\"b\\c\nd".to_string(), true)]);
    }

    #[test]
    fn empty_literal() {
        assert_eq!(texts(r#""""#), vec![(String::new(), true)]);
    }

    #[test]
    fn literal_that_looks_like_keyword_stays_literal() {
        assert_eq!(texts(r#""print""#), vec![("print".to_string(), true)]);
    }

    #[test]
    fn comment_until_terminator() {
        assert_eq!(
            texts("1 # skipped words #> 2"),
            vec![("1".to_string(), false), ("2".to_string(), false)]
        );
    }

    #[test]
    fn comment_until_end_of_line() {
        assert_eq!(
            texts("1 #comment \"not a literal\nprint"),
            vec![("1".to_string(), false), ("print".to_string(), false)]
        );
    }

    #[test]
    fn unterminated_literal() {
        let err = tokenize("1 \"abc").unwrap_err();
        assert_eq!(err.position(), Some((1, 3)));
        assert!(matches!(err.root(), VMError::SyntaxError { .. }));
    }

    #[test]
    fn literal_must_be_followed_by_whitespace() {
        let err = tokenize("\"ab\"cd").unwrap_err();
        assert_eq!(err.position(), Some((1, 5)));
    }

    #[test]
    fn unknown_escape() {
        assert!(tokenize(r#""\q""#).is_err());
    }
}
