//! Placeholder substitution for node prompts and condition text.
//!
//! Only two forms are recognised: `{input}` and `{steps[N]}` where `N` is
//! any integer. Negative indices count from the end of the step log, so
//! `{steps[-1]}` is the most recent step. Any other brace pattern is copied
//! through untouched.

use std::sync::OnceLock;

use regex::Regex;

use flowhost_core::error::{FlowhostError, Result};

const PLACEHOLDER: &str = r"\{(input|steps\[(-?\d+)\])\}";

fn placeholder() -> Result<&'static Regex> {
    static RE: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(PLACEHOLDER))
        .as_ref()
        .map_err(|e| FlowhostError::Config(format!("template pattern: {e}")))
}

/// Map a possibly negative step index onto `0..len`.
pub fn resolve_index(len: usize, index: i64) -> Option<usize> {
    if index >= 0 {
        let i = usize::try_from(index).ok()?;
        (i < len).then_some(i)
    } else {
        let back = usize::try_from(index.unsigned_abs()).ok()?;
        len.checked_sub(back)
    }
}

/// Substitute placeholders in `template` from the run's input and steps.
pub fn render(template: &str, input: &str, steps: &[String]) -> Result<String> {
    let re = placeholder()?;
    let mut out = String::with_capacity(template.len());
    let mut last = 0;

    for caps in re.captures_iter(template) {
        let Some(whole) = caps.get(0) else { continue };
        out.push_str(&template[last..whole.start()]);

        match caps.get(2) {
            None => out.push_str(input),
            Some(raw) => {
                // Digits that overflow i64 are out of range whichever way they point.
                let index = raw.as_str().parse::<i64>().unwrap_or(if raw.as_str().starts_with('-') {
                    i64::MIN
                } else {
                    i64::MAX
                });
                let i = resolve_index(steps.len(), index).ok_or(FlowhostError::Render {
                    index,
                    len: steps.len(),
                })?;
                out.push_str(&steps[i]);
            }
        }
        last = whole.end();
    }

    out.push_str(&template[last..]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn steps(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_resolve_index() {
        assert_eq!(resolve_index(3, 0), Some(0));
        assert_eq!(resolve_index(3, 2), Some(2));
        assert_eq!(resolve_index(3, 3), None);
        assert_eq!(resolve_index(3, -1), Some(2));
        assert_eq!(resolve_index(3, -3), Some(0));
        assert_eq!(resolve_index(3, -4), None);
        assert_eq!(resolve_index(0, 0), None);
        assert_eq!(resolve_index(0, -1), None);
        assert_eq!(resolve_index(2, i64::MIN), None);
    }

    #[test]
    fn test_render_input_and_steps() {
        let out = render(
            "Suggest things to do for '{input}' given this weather: {steps[1]}",
            "Weather and things to do in Lisbon",
            &steps(&["Lisbon", r#"{"temp_c":21}"#]),
        )
        .unwrap();
        assert_eq!(
            out,
            r#"Suggest things to do for 'Weather and things to do in Lisbon' given this weather: {"temp_c":21}"#
        );
    }

    #[test]
    fn test_negative_index_is_most_recent() {
        let s = steps(&["a", "b", "c"]);
        assert_eq!(render("{steps[-1]}", "", &s).unwrap(), "c");
        assert_eq!(render("{steps[-3]}|{steps[0]}", "", &s).unwrap(), "a|a");
    }

    #[test]
    fn test_out_of_range_is_render_error() {
        let err = render("Polish: {steps[0]}", "q", &[]).unwrap_err();
        assert!(matches!(err, FlowhostError::Render { index: 0, len: 0 }));

        let err = render("{steps[-2]}", "q", &steps(&["only"])).unwrap_err();
        assert!(matches!(err, FlowhostError::Render { index: -2, len: 1 }));

        let err = render("{steps[99999999999999999999]}", "q", &steps(&["only"])).unwrap_err();
        assert!(matches!(err, FlowhostError::Render { index: i64::MAX, len: 1 }));
    }

    #[test]
    fn test_unrecognised_braces_left_verbatim() {
        let template = r#"Reply as JSON {"city": "{input}"} not {steps} or {steps[x]} or { input }"#;
        assert_eq!(
            render(template, "Porto", &[]).unwrap(),
            r#"Reply as JSON {"city": "Porto"} not {steps} or {steps[x]} or { input }"#
        );
    }

    #[test]
    fn test_substituted_values_are_not_re_expanded() {
        let out = render("{input}", "literal {steps[0]}", &[]).unwrap();
        assert_eq!(out, "literal {steps[0]}");
    }
}
