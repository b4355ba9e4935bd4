//! Keyword-level SQL shape checks. This is not a parser: a statement that
//! is misclassified as row-producing still runs, because a failure to open
//! a stream falls back to buffered execution.

const ROW_PRODUCING_KEYWORDS: [&str; 4] = ["SELECT", "WITH", "VALUES", "TABLE"];

/// True when `query` is a single statement whose leading keyword produces
/// rows and can therefore be paged.
#[must_use]
pub fn is_select_like(query: &str) -> bool {
    let statements = split_statements(query);
    let [statement] = statements.as_slice() else {
        return false;
    };

    leading_keyword(statement)
        .is_some_and(|keyword| ROW_PRODUCING_KEYWORDS.contains(&keyword.as_str()))
}

/// Removes trailing terminators and `--` or `/* */` comments so the
/// statement can be embedded in an outer query. `#` is kept: PostgreSQL
/// reads it as an operator.
#[must_use]
pub fn strip_statement_terminator(query: &str) -> &str {
    let mut end = 0;
    let mut quote: Option<char> = None;
    let mut chars = query.char_indices().peekable();

    while let Some((index, ch)) = chars.next() {
        if let Some(open) = quote {
            if ch == open {
                quote = None;
            }
            end = index + ch.len_utf8();
            continue;
        }

        match ch {
            '-' if matches!(chars.peek(), Some((_, '-'))) => {
                while chars.next_if(|(_, ch)| *ch != '\n').is_some() {}
            }
            '/' if matches!(chars.peek(), Some((_, '*'))) => {
                chars.next();
                let mut previous = ' ';
                for (_, ch) in chars.by_ref() {
                    if previous == '*' && ch == '/' {
                        break;
                    }
                    previous = ch;
                }
            }
            '\'' | '"' | '`' => {
                quote = Some(ch);
                end = index + ch.len_utf8();
            }
            ';' => {}
            ch if ch.is_whitespace() => {}
            _ => end = index + ch.len_utf8(),
        }
    }

    &query[..end]
}

fn split_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut chars = sql.chars().peekable();

    let mut in_single_quote = false;
    let mut in_double_quote = false;
    let mut in_backtick = false;
    let mut in_line_comment = false;
    let mut in_block_comment = false;

    while let Some(ch) = chars.next() {
        if in_line_comment {
            if ch == '\n' {
                in_line_comment = false;
                current.push(' ');
            }
            continue;
        }

        if in_block_comment {
            if ch == '*' && chars.peek() == Some(&'/') {
                chars.next();
                in_block_comment = false;
                current.push(' ');
            }
            continue;
        }

        let quoted = in_single_quote || in_double_quote || in_backtick;
        if !quoted {
            if ch == '-' && chars.peek() == Some(&'-') {
                chars.next();
                in_line_comment = true;
                continue;
            }

            if ch == '#' {
                in_line_comment = true;
                continue;
            }

            if ch == '/' && chars.peek() == Some(&'*') {
                chars.next();
                in_block_comment = true;
                continue;
            }
        }

        match ch {
            '\'' if !in_double_quote && !in_backtick => {
                in_single_quote = !in_single_quote;
                current.push(ch);
            }
            '"' if !in_single_quote && !in_backtick => {
                in_double_quote = !in_double_quote;
                current.push(ch);
            }
            '`' if !in_single_quote && !in_double_quote => {
                in_backtick = !in_backtick;
                current.push(ch);
            }
            ';' if !quoted => {
                let statement = current.trim();
                if !statement.is_empty() {
                    statements.push(statement.to_string());
                }
                current.clear();
            }
            _ => current.push(ch),
        }
    }

    let trailing = current.trim();
    if !trailing.is_empty() {
        statements.push(trailing.to_string());
    }

    statements
}

fn leading_keyword(statement: &str) -> Option<String> {
    let body = statement.trim_start_matches(|ch: char| ch == '(' || ch.is_whitespace());
    let keyword: String = body
        .chars()
        .take_while(char::is_ascii_alphabetic)
        .collect();
    (!keyword.is_empty()).then(|| keyword.to_ascii_uppercase())
}
