//! Early-return rewriting.
//!
//! Every `return` statement in a snippet body is turned into a jump to the
//! wrapper's exit block so POST fragments and write-back run exactly once.
//! Comments, string and character literals (including C++ raw strings) are
//! skipped, as are the bodies of C++ lambdas, whose `return`s belong to the
//! lambda. Newlines are preserved so `#line` markers stay accurate.

/// Label of the shared exit block.
pub const EXIT_LABEL: &str = "embedc_exit";

/// Local holding the wrapper result.
pub const RESULT_VAR: &str = "embedc_result";

/// Output of [`rewrite_returns`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rewritten {
    pub text: String,
    /// Number of `return` statements rewritten.
    pub count: usize,
}

/// Rewrite `return expr;` and `return;` into jumps to [`EXIT_LABEL`].
pub fn rewrite_returns(body: &str) -> Rewritten {
    let bytes = body.as_bytes();
    let mut out = String::with_capacity(body.len() + 64);
    let mut count = 0;
    let mut copied = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'/' if bytes.get(i + 1) == Some(&b'/') => i = skip_line_comment(bytes, i),
            b'/' if bytes.get(i + 1) == Some(&b'*') => i = skip_block_comment(bytes, i),
            b'"' => i = skip_quoted(bytes, i, b'"'),
            b'\'' => i = skip_quoted(bytes, i, b'\''),
            b'[' => i = lambda_end(bytes, i).unwrap_or(i + 1),
            c if is_ident_start(c) => {
                let start = i;
                while i < bytes.len() && is_ident_continue(bytes[i]) {
                    i += 1;
                }
                let ident = &body[start..i];

                if ident.ends_with('R') && bytes.get(i) == Some(&b'"') && is_raw_prefix(ident) {
                    i = skip_raw_string(bytes, i);
                    continue;
                }

                if ident == "return"
                    && let Some(semi) = statement_end(bytes, i)
                {
                    let expr = &body[i..semi];
                    out.push_str(&body[copied..start]);
                    if expr.trim().is_empty() {
                        out.push_str(&format!("{}goto {};", expr, EXIT_LABEL));
                    } else {
                        out.push_str(&format!(
                            "do {{ {} = ({}); goto {}; }} while (0);",
                            RESULT_VAR, expr, EXIT_LABEL
                        ));
                    }
                    copied = semi + 1;
                    i = semi + 1;
                    count += 1;
                }
            }
            _ => i += 1,
        }
    }

    out.push_str(&body[copied..]);
    Rewritten { text: out, count }
}

/// Index of the `;` ending the statement that starts at `from`.
fn statement_end(bytes: &[u8], from: usize) -> Option<usize> {
    let mut depth: usize = 0;
    let mut i = from;
    while i < bytes.len() {
        match bytes[i] {
            b'/' if bytes.get(i + 1) == Some(&b'/') => i = skip_line_comment(bytes, i),
            b'/' if bytes.get(i + 1) == Some(&b'*') => i = skip_block_comment(bytes, i),
            b'"' => i = skip_quoted(bytes, i, b'"'),
            b'\'' => i = skip_quoted(bytes, i, b'\''),
            b'(' | b'[' | b'{' => {
                depth += 1;
                i += 1;
            }
            b')' | b']' | b'}' => {
                if depth == 0 {
                    return None;
                }
                depth -= 1;
                i += 1;
            }
            b';' if depth == 0 => return Some(i),
            _ => i += 1,
        }
    }
    None
}

/// End of a lambda expression whose capture list opens at `open`, or `None`
/// when the bracket is a subscript, an attribute or a designator.
fn lambda_end(bytes: &[u8], open: usize) -> Option<usize> {
    let prev = bytes[..open].iter().rev().find(|c| !c.is_ascii_whitespace());
    if prev.is_some_and(|&c| is_ident_continue(c) || c == b')' || c == b']') {
        return None;
    }

    let mut i = skip_whitespace(bytes, skip_balanced(bytes, open)?);
    if bytes.get(i) == Some(&b'(') {
        i = skip_balanced(bytes, i)?;
    } else if bytes.get(i) != Some(&b'{') {
        return None;
    }
    // Specifiers and a trailing return type may sit before the body.
    while i < bytes.len() {
        match bytes[i] {
            b'{' => return skip_balanced(bytes, i),
            b'(' | b'<' => i = skip_balanced(bytes, i)?,
            b';' | b',' | b')' | b'}' | b'=' => return None,
            _ => i += 1,
        }
    }
    None
}

/// Index just past the bracket matching the one at `open`.
fn skip_balanced(bytes: &[u8], open: usize) -> Option<usize> {
    let close = match bytes[open] {
        b'(' => b')',
        b'[' => b']',
        b'{' => b'}',
        b'<' => b'>',
        _ => return None,
    };
    let mut depth: usize = 0;
    let mut i = open;
    while i < bytes.len() {
        match bytes[i] {
            b'/' if bytes.get(i + 1) == Some(&b'/') => i = skip_line_comment(bytes, i),
            b'/' if bytes.get(i + 1) == Some(&b'*') => i = skip_block_comment(bytes, i),
            b'"' => i = skip_quoted(bytes, i, b'"'),
            b'\'' => i = skip_quoted(bytes, i, b'\''),
            c if c == bytes[open] => {
                depth += 1;
                i += 1;
            }
            c if c == close => {
                depth -= 1;
                i += 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => i += 1,
        }
    }
    None
}

fn skip_whitespace(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    i
}

fn skip_line_comment(bytes: &[u8], start: usize) -> usize {
    let mut i = start + 2;
    while i < bytes.len() && bytes[i] != b'\n' {
        i += 1;
    }
    i
}

fn skip_block_comment(bytes: &[u8], start: usize) -> usize {
    let mut i = start + 2;
    while i + 1 < bytes.len() {
        if bytes[i] == b'*' && bytes[i + 1] == b'/' {
            return i + 2;
        }
        i += 1;
    }
    bytes.len()
}

fn skip_quoted(bytes: &[u8], start: usize, quote: u8) -> usize {
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'\n' => return i,
            c if c == quote => return i + 1,
            _ => i += 1,
        }
    }
    bytes.len()
}

/// `R"delim( ... )delim"`, starting at the opening quote.
fn skip_raw_string(bytes: &[u8], quote: usize) -> usize {
    let mut i = quote + 1;
    let delim_start = i;
    while i < bytes.len() && bytes[i] != b'(' {
        i += 1;
    }
    let delim = &bytes[delim_start..i.min(bytes.len())];
    while i < bytes.len() {
        if bytes[i] == b')'
            && bytes[i + 1..].starts_with(delim)
            && bytes.get(i + 1 + delim.len()) == Some(&b'"')
        {
            return i + delim.len() + 2;
        }
        i += 1;
    }
    bytes.len()
}

fn is_raw_prefix(ident: &str) -> bool {
    matches!(ident, "R" | "LR" | "uR" | "UR" | "u8R")
}

fn is_ident_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_'
}

fn is_ident_continue(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rewrites_value_return() {
        let r = rewrite_returns("if (x > 0) return x * 2;");
        assert_eq!(r.count, 1);
        assert_eq!(
            r.text,
            "if (x > 0) do { embedc_result = ( x * 2); goto embedc_exit; } while (0);"
        );
    }

    #[test]
    fn test_rewrites_bare_return() {
        let r = rewrite_returns("if (done) return;\nx++;");
        assert_eq!(r.count, 1);
        assert_eq!(r.text, "if (done) goto embedc_exit;\nx++;");
    }

    #[test]
    fn test_multiple_returns_and_else() {
        let r = rewrite_returns("if (a) return 1; else return 2;");
        assert_eq!(r.count, 2);
        assert!(r.text.contains("while (0); else do {"));
    }

    #[test]
    fn test_skips_comments_and_literals() {
        let body =
            "// return 1;\n/* return 2; */\nputs(\"return 3;\");\nchar c = ';';\nint returned = 0;";
        let r = rewrite_returns(body);
        assert_eq!(r.count, 0);
        assert_eq!(r.text, body);
    }

    #[test]
    fn test_skips_raw_strings() {
        let body = "const char *s = R\"x(return 1;)x\";";
        let r = rewrite_returns(body);
        assert_eq!(r.count, 0);
    }

    #[test]
    fn test_expression_with_nested_semicolon_in_string() {
        let r = rewrite_returns("return strlen(\"a;b\");");
        assert_eq!(r.count, 1);
        assert!(r.text.contains("embedc_result = ( strlen(\"a;b\"));"));
    }

    #[test]
    fn test_preserves_newlines() {
        let body = "return\n  a +\n  b;\nz = 1;";
        let r = rewrite_returns(body);
        assert_eq!(r.count, 1);
        assert_eq!(r.text.lines().count(), body.lines().count());
    }

    #[test]
    fn test_lambda_bodies_keep_their_returns() {
        let body = "auto twice = [](int a) { return a * 2; };\nif (x) return 1;";
        let r = rewrite_returns(body);
        assert_eq!(r.count, 1);
        assert!(r.text.starts_with("auto twice = [](int a) { return a * 2; };\n"));
        assert!(r.text.ends_with("do { embedc_result = ( 1); goto embedc_exit; } while (0);"));

        let body = "auto f = [&x]() mutable -> int { if (x) return x; return 0; };";
        assert_eq!(rewrite_returns(body).count, 0);
        let body = "std::sort(v.begin(), v.end(), [](int a, int b) { return a > b; });";
        assert_eq!(rewrite_returns(body).count, 0);
    }

    #[test]
    fn test_subscripts_and_designators_are_not_lambdas() {
        let r = rewrite_returns("a[i] = 1; return a[0];");
        assert_eq!(r.count, 1);

        let r = rewrite_returns("int t[2] = { [0] = 1 };\nif (t[0]) return t[0];");
        assert_eq!(r.count, 1);
        assert!(r.text.starts_with("int t[2] = { [0] = 1 };\n"));
    }
}
