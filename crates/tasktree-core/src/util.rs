//! Small helpers: weighted shuffle, truthiness, lenient JSON parsing

use rand::Rng;
use serde_json::Value;

/// Weighted shuffle without replacement: repeatedly sample one remaining
/// index with probability proportional to its weight, remove it, append it.
/// With no weights every index is uniform. Deterministic for a seeded rng.
pub fn weighted_shuffle<R: Rng>(rng: &mut R, len: usize, weights: Option<&[f64]>) -> Vec<usize> {
    let weight_of = |i: usize| weights.map_or(1.0, |w| w[i]);
    let mut remaining: Vec<usize> = (0..len).collect();
    let mut order = Vec::with_capacity(len);
    while !remaining.is_empty() {
        let total: f64 = remaining.iter().map(|&i| weight_of(i)).sum();
        let mut pick = rng.gen_range(0.0..total);
        let mut chosen = remaining.len() - 1;
        for (pos, &i) in remaining.iter().enumerate() {
            let w = weight_of(i);
            if pick < w {
                chosen = pos;
                break;
            }
            pick -= w;
        }
        order.push(remaining.remove(chosen));
    }
    order
}

/// Loose truthiness over JSON values, used by attribute-name conditions
/// on If and While. Empty containers and zero are false.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Strip a surrounding markdown code fence (```json ... ```), if present.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(newline) = rest.find('\n') else {
        return trimmed;
    };
    let body = &rest[newline + 1..];
    body.strip_suffix("```").unwrap_or(body).trim()
}

/// Parse JSON leniently: strict first, then a best-effort repair pass that
/// closes unterminated strings, drops trailing commas and balances brackets.
/// Returns None when the input cannot be made parseable.
pub fn parse_lenient(text: &str) -> Option<Value> {
    let cleaned = strip_code_fences(text);
    if let Ok(value) = serde_json::from_str(cleaned) {
        return Some(value);
    }
    serde_json::from_str(&repair_pass(cleaned)).ok()
}

fn trim_trailing_comma(out: &mut String) {
    let trimmed = out.trim_end().len();
    if out[..trimmed].ends_with(',') {
        out.truncate(trimmed - 1);
    }
}

fn repair_pass(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 4);
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for c in text.chars() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '{' | '[' => {
                stack.push(c);
                out.push(c);
            }
            '}' => {
                if stack.last() == Some(&'{') {
                    stack.pop();
                }
                trim_trailing_comma(&mut out);
                out.push(c);
            }
            ']' => {
                if stack.last() == Some(&'[') {
                    stack.pop();
                }
                trim_trailing_comma(&mut out);
                out.push(c);
            }
            _ => out.push(c),
        }
    }

    if in_string {
        out.push('"');
    }
    trim_trailing_comma(&mut out);
    while let Some(open) = stack.pop() {
        out.push(if open == '{' { '}' } else { ']' });
    }
    out
}
