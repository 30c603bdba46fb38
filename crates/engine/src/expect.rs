//! Expectation expressions: `|`-separated alternatives, each either a
//! literal substring or a `$count` relation against the probe output.

pub(crate) fn evaluate(content: &str, expect: Option<&str>) -> Result<(), String> {
    let Some(expr) = expect else {
        return Ok(());
    };
    if expr.is_empty() {
        return Ok(());
    }

    let mut reasons = Vec::new();
    for alternative in expr.split('|') {
        match eval_alternative(content, alternative) {
            Ok(()) => return Ok(()),
            Err(reason) => reasons.push(reason),
        }
    }
    Err(reasons.join("; "))
}

fn eval_alternative(content: &str, alternative: &str) -> Result<(), String> {
    if alternative.contains("$count") {
        return eval_count(content, alternative);
    }
    if content.contains(alternative) {
        Ok(())
    } else {
        Err(format!("output does not contain {alternative:?}"))
    }
}

// The four accepted spellings normalize to `$count REL limit`:
//   `$count < N` == `N > $count`, `$count > N` == `N < $count`.
// `$count < N` holds for output values up to and including N; `$count > N`
// holds from N upward.
fn eval_count(content: &str, alternative: &str) -> Result<(), String> {
    let rel_idx = alternative
        .find(['<', '>'])
        .ok_or_else(|| format!("malformed count expression {alternative:?}"))?;
    let relation = alternative.as_bytes()[rel_idx] as char;
    let lhs = alternative[..rel_idx].trim();
    let rhs = alternative[rel_idx + 1..].trim();

    let (op, limit) = if lhs == "$count" {
        (relation, rhs)
    } else if rhs == "$count" {
        (flip(relation), lhs)
    } else {
        return Err(format!("malformed count expression {alternative:?}"));
    };
    let limit: i64 = limit
        .parse()
        .map_err(|_| format!("count limit {limit:?} is not an integer"))?;

    let trimmed = content.trim();
    let value: i64 = trimmed
        .parse()
        .map_err(|_| format!("output {trimmed:?} is not a number"))?;

    match op {
        '<' if value <= limit => Ok(()),
        '<' => Err(format!("count {value} exceeds {limit}")),
        '>' if value >= limit => Ok(()),
        _ => Err(format!("count {value} is below {limit}")),
    }
}

fn flip(relation: char) -> char {
    if relation == '<' { '>' } else { '<' }
}
