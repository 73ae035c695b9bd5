//! Formula preprocessing.
//!
//! Formulas are written in a JavaScript-flavoured expression syntax. Before
//! Rhai compiles them they are rewritten:
//!
//! - **Strings**: `'text'` becomes `"text"`; literals are masked while the
//!   rest of the rewriting runs so nothing inside them is touched
//! - **Operators**: `===`/`!==` become `==`/`!=`
//! - **Values**: `null`/`undefined` become `()`
//! - **Closures**: `x => e` and `(a, b) => e` become `|x| e` and `|a, b| e`
//! - **Namespaces**: `Math.f` becomes `Math::f`, `_.f` becomes `agg::f`
//! - **Conditionals**: `c ? a : b` becomes `(if truthy(c) { a } else { b })`
//! - **Logic**: `!x` becomes `!truthy(x)`; `a || b` and `a && b` become blocks
//!   that test `a` with `truthy` and yield one of the operands, short-circuiting

use std::sync::OnceLock;

use regex::Regex;

/// Rewrite a formula expression into a Rhai script.
pub fn preprocess_expression(expr: &str) -> String {
    let (masked, literals) = mask_string_literals(expr);
    let rewritten = rewrite_tokens(&masked);
    let rewritten = rewrite_ternaries(&rewritten);
    restore_string_literals(&rewritten, &literals)
}

fn placeholder(idx: usize) -> String {
    format!("@@@{}@@@", idx)
}

/// Replace every string literal with a placeholder, normalising single-quoted
/// strings to Rhai double-quoted ones. Backtick strings are kept verbatim.
fn mask_string_literals(expr: &str) -> (String, Vec<String>) {
    let mut out = String::with_capacity(expr.len());
    let mut literals: Vec<String> = Vec::new();
    let mut chars = expr.chars().peekable();

    while let Some(c) = chars.next() {
        if !matches!(c, '"' | '\'' | '`') {
            out.push(c);
            continue;
        }
        let quote = c;
        let mut literal = String::from(if quote == '`' { '`' } else { '"' });
        let mut closed = false;
        while let Some(ch) = chars.next() {
            if ch == '\\' && quote != '`' {
                match chars.next() {
                    Some('\'') if quote == '\'' => literal.push('\''),
                    Some(next) => {
                        literal.push('\\');
                        literal.push(next);
                    }
                    None => literal.push('\\'),
                }
                continue;
            }
            if ch == quote {
                closed = true;
                break;
            }
            if ch == '"' && quote == '\'' {
                literal.push_str("\\\"");
                continue;
            }
            literal.push(ch);
        }
        if closed {
            literal.push(if quote == '`' { '`' } else { '"' });
        }
        out.push_str(&placeholder(literals.len()));
        literals.push(literal);
    }

    (out, literals)
}

fn restore_string_literals(script: &str, literals: &[String]) -> String {
    if literals.is_empty() {
        return script.to_string();
    }
    placeholder_re()
        .replace_all(script, |caps: &regex::Captures| {
            caps[1]
                .parse::<usize>()
                .ok()
                .and_then(|idx| literals.get(idx))
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .to_string()
}

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"@@@(\d+)@@@").unwrap())
}

struct TokenRules {
    nullish: Regex,
    var_decl: Regex,
    console_log: Regex,
    math_ns: Regex,
    lodash_ns: Regex,
    arrow_params: Regex,
    arrow_single: Regex,
}

fn token_rules() -> &'static TokenRules {
    static RULES: OnceLock<TokenRules> = OnceLock::new();
    RULES.get_or_init(|| TokenRules {
        nullish: Regex::new(r"\b(?:null|undefined)\b").unwrap(),
        var_decl: Regex::new(r"\bvar\b").unwrap(),
        console_log: Regex::new(r"\bconsole\s*\.\s*log\s*\(").unwrap(),
        math_ns: Regex::new(r"\bMath\s*\.\s*").unwrap(),
        lodash_ns: Regex::new(r"(^|[^\w.])_\s*\.\s*").unwrap(),
        arrow_params: Regex::new(r"\(\s*([A-Za-z_]\w*(?:\s*,\s*[A-Za-z_]\w*)*)?\s*\)\s*=>").unwrap(),
        arrow_single: Regex::new(r"\b([A-Za-z_]\w*)\s*=>").unwrap(),
    })
}

/// Token-level rewrites. Runs on masked text, so string contents are safe.
fn rewrite_tokens(code: &str) -> String {
    let rules = token_rules();
    let code = code.replace("!==", "!=").replace("===", "==");
    let code = rules.nullish.replace_all(&code, "()");
    let code = rules.var_decl.replace_all(&code, "let");
    let code = rules.console_log.replace_all(&code, "print(");
    let code = rules.math_ns.replace_all(&code, "Math::");
    let code = rules.lodash_ns.replace_all(&code, "${1}agg::");
    let code = rules
        .arrow_params
        .replace_all(&code, |caps: &regex::Captures| {
            let params = caps
                .get(1)
                .map(|m| {
                    m.as_str()
                        .split(',')
                        .map(str::trim)
                        .collect::<Vec<_>>()
                        .join(", ")
                })
                .unwrap_or_default();
            format!("|{}|", params)
        });
    let code = rules.arrow_single.replace_all(&code, "|${1}|");
    rewrite_not(&code)
}

/// `!x` becomes `!truthy(x)` so negation accepts any value.
fn rewrite_not(code: &str) -> String {
    let chars: Vec<char> = code.chars().collect();
    let mut out = String::with_capacity(code.len());
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '!' && is_unary_not(&chars, i) {
            let end = operand_end(&chars, i + 1);
            let operand: String = chars[i + 1..end].iter().collect();
            if !operand.trim().is_empty() {
                out.push_str("!truthy(");
                out.push_str(&rewrite_not(operand.trim()));
                out.push(')');
                i = end;
                continue;
            }
        }
        out.push(chars[i]);
        i += 1;
    }
    out
}

fn is_unary_not(chars: &[char], idx: usize) -> bool {
    match chars.get(idx + 1) {
        Some('=') => false,
        Some('i') => !(chars.get(idx + 2) == Some(&'n')
            && !chars
                .get(idx + 3)
                .is_some_and(|c| c.is_alphanumeric() || *c == '_')),
        _ => true,
    }
}

/// End of the operand of a unary `!` starting at `start`: nested `!`s, then
/// a path of identifiers, `::`, `.` and bracket groups.
fn operand_end(chars: &[char], start: usize) -> usize {
    let mut i = start;
    while i < chars.len() && chars[i].is_whitespace() {
        i += 1;
    }
    if chars.get(i) == Some(&'!') {
        return operand_end(chars, i + 1);
    }
    let begin = i;
    while i < chars.len() {
        let c = chars[i];
        if closing_for(c).is_some() {
            match find_matching(chars, i) {
                Some(end) => i = end + 1,
                None => return chars.len(),
            }
        } else if c.is_alphanumeric() || matches!(c, '_' | '@' | '.') {
            i += 1;
        } else if c == ':' && chars.get(i + 1) == Some(&':') {
            i += 2;
        } else {
            break;
        }
    }
    if i == begin { start } else { i }
}

fn closing_for(c: char) -> Option<char> {
    match c {
        '(' => Some(')'),
        '[' => Some(']'),
        '{' => Some('}'),
        _ => None,
    }
}

/// Index of the bracket closing the group opened at `open`.
fn find_matching(chars: &[char], open: usize) -> Option<usize> {
    let mut stack: Vec<char> = Vec::new();
    for (idx, &c) in chars.iter().enumerate().skip(open) {
        if let Some(close) = closing_for(c) {
            stack.push(close);
        } else if matches!(c, ')' | ']' | '}') {
            if stack.pop() != Some(c) {
                return None;
            }
            if stack.is_empty() {
                return Some(idx);
            }
        }
    }
    None
}

/// Rewrite `c ? a : b` into Rhai `if` expressions.
///
/// Bracket groups are rewritten innermost first; each level is then split on
/// top-level `,` and `;` so a conditional never swallows its neighbours.
fn rewrite_ternaries(code: &str) -> String {
    let chars: Vec<char> = code.chars().collect();
    rewrite_sequence(&chars)
}

fn rewrite_sequence(chars: &[char]) -> String {
    let mut rebuilt: Vec<char> = Vec::with_capacity(chars.len());
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if closing_for(c).is_some() {
            if let Some(end) = find_matching(chars, i) {
                rebuilt.push(c);
                rebuilt.extend(rewrite_sequence(&chars[i + 1..end]).chars());
                rebuilt.push(chars[end]);
                i = end + 1;
                continue;
            }
        }
        rebuilt.push(c);
        i += 1;
    }

    let mut out = String::with_capacity(rebuilt.len());
    let mut depth = 0usize;
    let mut start = 0usize;
    for (idx, &c) in rebuilt.iter().enumerate() {
        match c {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            ',' | ';' if depth == 0 => {
                out.push_str(&rewrite_segment(&rebuilt[start..idx]));
                out.push(c);
                start = idx + 1;
            }
            _ => {}
        }
    }
    out.push_str(&rewrite_segment(&rebuilt[start..]));
    out
}

fn is_ternary_question(chars: &[char], idx: usize) -> bool {
    if chars[idx] != '?' {
        return false;
    }
    let prev = idx.checked_sub(1).map(|p| chars[p]);
    let next = chars.get(idx + 1).copied();
    prev != Some('?') && !matches!(next, Some('?') | Some('.') | Some('['))
}

fn is_ternary_colon(chars: &[char], idx: usize) -> bool {
    if chars[idx] != ':' {
        return false;
    }
    let prev = idx.checked_sub(1).map(|p| chars[p]);
    let next = chars.get(idx + 1).copied();
    prev != Some(':') && next != Some(':')
}

fn rewrite_segment(seg: &[char]) -> String {
    let mut depth = 0usize;
    let mut question = None;
    for (idx, &c) in seg.iter().enumerate() {
        match c {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            '?' if depth == 0 && is_ternary_question(seg, idx) => {
                question = Some(idx);
                break;
            }
            _ => {}
        }
    }
    let Some(q) = question else {
        return rewrite_logical(&seg.iter().collect::<String>());
    };

    let mut depth = 0usize;
    let mut nested = 0usize;
    let mut colon = None;
    for idx in q + 1..seg.len() {
        match seg[idx] {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            '?' if depth == 0 && is_ternary_question(seg, idx) => nested += 1,
            ':' if depth == 0 && is_ternary_colon(seg, idx) => {
                if nested == 0 {
                    colon = Some(idx);
                    break;
                }
                nested -= 1;
            }
            _ => {}
        }
    }
    let Some(colon) = colon else {
        return seg.iter().collect();
    };

    let head: String = seg[..q].iter().collect();
    let (prefix, condition) = split_condition_prefix(&head);
    let then_part = rewrite_segment(&seg[q + 1..colon]);
    let else_part = rewrite_segment(&seg[colon + 1..]);
    let trailing: String = seg[colon + 1..]
        .iter()
        .rev()
        .take_while(|c| c.is_whitespace())
        .collect();

    let separator = if prefix.is_empty() || prefix.ends_with(char::is_whitespace) {
        ""
    } else {
        " "
    };
    format!(
        "{}{}(if truthy({}) {{ {} }} else {{ {} }}){}",
        prefix,
        separator,
        rewrite_logical(condition.trim()),
        then_part.trim(),
        else_part.trim(),
        trailing
    )
}

fn lvalue_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(?:(?:let|const)\s+)?[A-Za-z_][\w.@\[\]]*\s*$").unwrap())
}

/// Split off the parts of a conditional's head that do not belong to the
/// condition: closure headers, `return`, and assignment targets.
fn split_condition_prefix(head: &str) -> (String, String) {
    let mut prefix = String::new();
    let mut rest = head.to_string();
    loop {
        let trimmed = rest.trim_start();
        let leading = &rest[..rest.len() - trimmed.len()];

        if let Some(after) = trimmed.strip_prefix('|') {
            if let Some(end) = after.find('|') {
                let header_len = leading.len() + 1 + end + 1;
                prefix.push_str(&rest[..header_len]);
                rest = rest[header_len..].to_string();
                continue;
            }
        }

        if let Some(end) = closure_header_end(&rest) {
            prefix.push_str(&rest[..end]);
            rest = rest[end..].to_string();
            continue;
        }

        if let Some(after) = trimmed.strip_prefix("return") {
            if after.starts_with(char::is_whitespace) {
                let keyword_len = leading.len() + "return".len();
                prefix.push_str(&rest[..keyword_len]);
                rest = rest[keyword_len..].to_string();
                continue;
            }
        }

        if let Some(split) = assignment_split(&rest) {
            prefix.push_str(&rest[..split]);
            rest = rest[split..].to_string();
            continue;
        }

        break;
    }
    (prefix, rest)
}

/// Byte offset just past the last closure header `|` before any `||`/`&&`,
/// e.g. the tail `b| ` of a `|a, b| ...` split on its comma.
fn closure_header_end(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut end = None;
    for (idx, &b) in bytes.iter().enumerate() {
        match b {
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => depth = depth.saturating_sub(1),
            b'|' | b'&' if depth == 0 && bytes.get(idx + 1) == Some(&b) => break,
            b'|' if depth == 0 => end = Some(idx + 1),
            _ => {}
        }
    }
    end
}

/// Block-local name holding the left operand of a rewritten `||`/`&&`.
const LOGICAL_TEMP: &str = "js_lhs";

const STATEMENT_KEYWORDS: &[&str] = &["if", "while", "for", "loop", "do", "switch", "fn"];

fn starts_with_word(text: &str, word: &str) -> bool {
    text.strip_prefix(word)
        .is_some_and(|rest| !rest.starts_with(|c: char| c.is_alphanumeric() || c == '_'))
}

/// Split on a top-level binary operator. An operator with nothing before it
/// (a `||` closure header) is not a split point.
fn split_top_level<'a>(text: &'a str, op: &str) -> Vec<&'a str> {
    let bytes = text.as_bytes();
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    let mut idx = 0;
    while idx < bytes.len() {
        match bytes[idx] {
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => depth = depth.saturating_sub(1),
            _ if depth == 0
                && bytes[idx..].starts_with(op.as_bytes())
                && !text[start..idx].trim().is_empty() =>
            {
                parts.push(&text[start..idx]);
                idx += op.len();
                start = idx;
                continue;
            }
            _ => {}
        }
        idx += 1;
    }
    parts.push(&text[start..]);
    parts
}

/// JavaScript `a && b`: `a` when falsy, otherwise `b`.
fn rewrite_and(text: &str) -> String {
    split_top_level(text, "&&")
        .into_iter()
        .map(|part| part.trim().to_string())
        .reduce(|acc, next| {
            format!(
                "({{ let {v} = {acc}; if truthy({v}) {{ {next} }} else {{ {v} }} }})",
                v = LOGICAL_TEMP
            )
        })
        .unwrap_or_default()
}

/// Rewrite `||` and `&&` in a conditional-free segment. `&&` binds tighter.
fn rewrite_logical(text: &str) -> String {
    let (prefix, rest) = split_condition_prefix(text);
    let body = rest.trim();
    if STATEMENT_KEYWORDS.iter().any(|k| starts_with_word(body, k)) {
        return text.to_string();
    }
    let alternatives = split_top_level(body, "||");
    if alternatives.len() == 1 && split_top_level(body, "&&").len() == 1 {
        return text.to_string();
    }
    let expr = alternatives
        .into_iter()
        .map(rewrite_and)
        .reduce(|acc, next| {
            format!(
                "({{ let {v} = {acc}; if truthy({v}) {{ {v} }} else {{ {next} }} }})",
                v = LOGICAL_TEMP
            )
        })
        .unwrap_or_default();
    let trailing: String = rest
        .chars()
        .rev()
        .take_while(|c| c.is_whitespace())
        .collect();
    let separator = if prefix.is_empty() || prefix.ends_with(char::is_whitespace) {
        ""
    } else {
        " "
    };
    format!("{}{}{}{}", prefix, separator, expr, trailing)
}

/// Byte offset just past a leading `target =` / `target += ` assignment.
fn assignment_split(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    for (idx, &b) in bytes.iter().enumerate() {
        match b {
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => depth = depth.saturating_sub(1),
            b'=' if depth == 0 => {
                let next = bytes.get(idx + 1).copied();
                let prev = idx.checked_sub(1).map(|p| bytes[p]);
                if next == Some(b'=') || matches!(prev, Some(b'=' | b'!' | b'<' | b'>')) {
                    return None;
                }
                let mut target = &text[..idx];
                if let Some(stripped) = target.strip_suffix(['+', '-', '*', '/', '%']) {
                    target = stripped;
                }
                return lvalue_re().is_match(target).then_some(idx + 1);
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strict_equality_becomes_rhai_equality() {
        assert_eq!(preprocess_expression("a === b"), "a == b");
        assert_eq!(preprocess_expression("a !== b"), "a != b");
    }

    #[test]
    fn test_string_contents_are_untouched() {
        assert_eq!(
            preprocess_expression(r#""a === b ? c : d""#),
            r#""a === b ? c : d""#
        );
    }

    #[test]
    fn test_single_quotes_become_double_quotes() {
        assert_eq!(preprocess_expression("r.values['Num']"), r#"r.values["Num"]"#);
        assert_eq!(preprocess_expression(r#"'say "hi"'"#), r#""say \"hi\"""#);
        assert_eq!(preprocess_expression(r"'it\'s'"), r#""it's""#);
    }

    #[test]
    fn test_null_and_undefined_become_unit() {
        assert_eq!(preprocess_expression("x == null"), "x == ()");
        assert_eq!(preprocess_expression("undefined"), "()");
    }

    #[test]
    fn test_arrow_functions_become_closures() {
        assert_eq!(preprocess_expression("rows.map(r => r.x)"), "rows.map(|r| r.x)");
        assert_eq!(
            preprocess_expression("(row, col, rows) => { rows[row] }"),
            "|row, col, rows| { rows[row] }"
        );
        assert_eq!(preprocess_expression("() => 1"), "|| 1");
    }

    #[test]
    fn test_namespaces() {
        assert_eq!(preprocess_expression("Math.max(1, 2)"), "Math::max(1, 2)");
        assert_eq!(preprocess_expression("_.sum(xs)"), "agg::sum(xs)");
        assert_eq!(preprocess_expression("a_.b"), "a_.b");
    }

    #[test]
    fn test_simple_ternary() {
        assert_eq!(
            preprocess_expression(r#"prop("Done") === "はい" ? "OK" : "NG""#),
            r#"(if truthy(prop("Done") == "はい") { "OK" } else { "NG" })"#
        );
    }

    #[test]
    fn test_nested_ternary_is_right_associative() {
        assert_eq!(
            preprocess_expression("a ? 1 : b ? 2 : 3"),
            "(if truthy(a) { 1 } else { (if truthy(b) { 2 } else { 3 }) })"
        );
        assert_eq!(
            preprocess_expression("a ? b ? 1 : 2 : 3"),
            "(if truthy(a) { (if truthy(b) { 1 } else { 2 }) } else { 3 })"
        );
    }

    #[test]
    fn test_ternary_inside_call_arguments() {
        assert_eq!(
            preprocess_expression("f(x ? 1 : 2, y)"),
            "f((if truthy(x) { 1 } else { 2 }), y)"
        );
    }

    #[test]
    fn test_ternary_in_closure_body_keeps_header() {
        assert_eq!(
            preprocess_expression("rows.map(r => r.n > 1 ? 1 : 0)"),
            "rows.map(|r| (if truthy(r.n > 1) { 1 } else { 0 }))"
        );
    }

    #[test]
    fn test_ternary_after_let_and_return() {
        assert_eq!(
            preprocess_expression("let x = a ? 1 : 2; x"),
            "let x = (if truthy(a) { 1 } else { 2 }); x"
        );
        assert_eq!(
            preprocess_expression("{ return a ? 1 : 2 }"),
            "{ return (if truthy(a) { 1 } else { 2 }) }"
        );
    }

    #[test]
    fn test_not_tests_truthiness() {
        assert_eq!(preprocess_expression("!prop('Done')"), r#"!truthy(prop("Done"))"#);
        assert_eq!(preprocess_expression("!!x"), "!truthy(!truthy(x))");
        assert_eq!(preprocess_expression("!(a.b[0])"), "!truthy((a.b[0]))");
        assert_eq!(preprocess_expression("a != b"), "a != b");
        assert_eq!(preprocess_expression("a !== b"), "a != b");
    }

    #[test]
    fn test_or_yields_an_operand() {
        assert_eq!(
            preprocess_expression("a || 'x'"),
            r#"({ let js_lhs = a; if truthy(js_lhs) { js_lhs } else { "x" } })"#
        );
    }

    #[test]
    fn test_and_binds_tighter_than_or() {
        assert_eq!(
            preprocess_expression("a && b || c"),
            "({ let js_lhs = ({ let js_lhs = a; if truthy(js_lhs) { b } else { js_lhs } }); \
             if truthy(js_lhs) { js_lhs } else { c } })"
        );
    }

    #[test]
    fn test_logic_inside_closures_and_conditions() {
        assert_eq!(
            preprocess_expression("rows.filter(r => r.a && r.b)"),
            "rows.filter(|r| ({ let js_lhs = r.a; if truthy(js_lhs) { r.b } else { js_lhs } }))"
        );
        assert_eq!(
            preprocess_expression("a || b ? 1 : 2"),
            "(if truthy(({ let js_lhs = a; if truthy(js_lhs) { js_lhs } else { b } })) { 1 } else { 2 })"
        );
    }

    #[test]
    fn test_zero_arg_closures_are_not_logic() {
        assert_eq!(preprocess_expression("f(|| 1)"), "f(|| 1)");
        assert_eq!(
            preprocess_expression("f(|a, b| a ? 1 : 2)"),
            "f(|a, b| (if truthy(a) { 1 } else { 2 }))"
        );
    }

    #[test]
    fn test_optional_chaining_and_paths_are_not_ternaries() {
        assert_eq!(preprocess_expression("a?.b"), "a?.b");
        assert_eq!(preprocess_expression("a ?? b"), "a ?? b");
        assert_eq!(preprocess_expression("Math::PI"), "Math::PI");
    }
}
