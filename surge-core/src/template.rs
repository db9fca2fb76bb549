use std::collections::HashMap;

use common_types::ParamValue;
use once_cell::sync::Lazy;
use rand::seq::SliceRandom;
use rand::Rng;

/// Built-in vocabulary for `{{random.*}}` tokens.
static NAMES: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "avery", "blake", "casey", "devon", "ellis", "finley", "harper", "jordan", "morgan",
        "quinn", "riley", "rowan", "sage", "skyler", "taylor",
    ]
});

static STATUSES: Lazy<Vec<&'static str>> =
    Lazy::new(|| vec!["active", "pending", "archived", "suspended", "deleted"]);

static TITLES: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "quarterly report",
        "launch checklist",
        "incident review",
        "capacity plan",
        "release notes",
        "meeting minutes",
    ]
});

static WORDS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "robust", "signal", "window", "stream", "beacon", "ledger", "filter", "bundle", "anchor",
        "socket", "vector", "margin",
    ]
});

fn random_token(name: &str) -> Option<String> {
    let mut rng = rand::thread_rng();
    match name {
        "random.id" => Some(rng.gen_range(1u64..=1_000_000).to_string()),
        "random.name" => NAMES.choose(&mut rng).map(|s| (*s).to_owned()),
        "random.email" => {
            let name = NAMES.choose(&mut rng)?;
            Some(format!("{name}{}@example.com", rng.gen_range(1u32..1000)))
        }
        "random.status" => STATUSES.choose(&mut rng).map(|s| (*s).to_owned()),
        "random.title" => TITLES.choose(&mut rng).map(|s| (*s).to_owned()),
        "random.description" => {
            let mut words: Vec<&str> = Vec::with_capacity(6);
            for _ in 0..6 {
                words.push(WORDS.choose(&mut rng).copied()?);
            }
            Some(words.join(" "))
        }
        _ => None,
    }
}

fn render(value: &ParamValue) -> String {
    match value {
        ParamValue::Str(s) => s.clone(),
        ParamValue::Int(v) => v.to_string(),
        ParamValue::Float(v) => v.to_string(),
        ParamValue::Bool(v) => v.to_string(),
        ParamValue::Duration(v) => format!("{}ms", v.as_millis()),
        other => other.to_json().to_string(),
    }
}

/// Replace `{{name}}` tokens with values from the param map, falling back to
/// the built-in random vocabulary. Unknown tokens are left in place so a
/// typo is visible in the traffic instead of silently vanishing.
pub fn substitute(input: &str, params: &HashMap<String, ParamValue>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        let Some(close) = after.find("}}") else {
            out.push_str(&rest[open..]);
            return out;
        };
        let token = after[..close].trim();
        match params.get(token).map(render).or_else(|| random_token(token)) {
            Some(value) => out.push_str(&value),
            None => {
                out.push_str("{{");
                out.push_str(&after[..close]);
                out.push_str("}}");
            }
        }
        rest = &after[close + 2..];
    }
    out.push_str(rest);
    out
}

/// Walk a JSON body and substitute tokens in every string leaf; nested maps
/// and sequences are walked recursively.
pub fn substitute_json(
    value: &serde_json::Value,
    params: &HashMap<String, ParamValue>,
) -> serde_json::Value {
    match value {
        serde_json::Value::String(s) => serde_json::Value::String(substitute(s, params)),
        serde_json::Value::Array(items) => serde_json::Value::Array(
            items.iter().map(|item| substitute_json(item, params)).collect(),
        ),
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), substitute_json(v, params)))
                .collect(),
        ),
        other => other.clone(),
    }
}
