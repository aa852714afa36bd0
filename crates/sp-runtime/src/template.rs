use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;

use regex::Regex;
use sp_core::{PropertyId, ScriptPlayError, Value};

/// Locate every `open…close` span in `text`. Returns the byte range of the
/// full span and the inner tag text.
pub fn find_tags<'t>(text: &'t str, open: &str, close: &str) -> Vec<(Range<usize>, &'t str)> {
    let pattern = format!("(?s){}(.*?){}", regex::escape(open), regex::escape(close));
    let regex = Regex::new(&pattern).expect("escaped tag pattern must compile");
    regex
        .captures_iter(text)
        .filter_map(|captures| {
            let full = captures.get(0)?;
            let inner = captures.get(1)?;
            Some((full.range(), inner.as_str()))
        })
        .collect()
}

/// Substitute `open<propertyId>close` tags with formatted property values.
/// Every tag must be a decimal id recognized by `known`; any bad tag fails
/// the whole call, producing no partial output. Unset properties render as
/// empty text. Rich mode wraps non-empty values in `<b>…</b>` and converts
/// newlines to `<br/>`.
pub fn render_template(
    text: &str,
    open: &str,
    close: &str,
    known: &BTreeSet<PropertyId>,
    values: &BTreeMap<PropertyId, Value>,
    rich: bool,
) -> Result<String, ScriptPlayError> {
    let tags = find_tags(text, open, close);

    let mut found = Vec::with_capacity(tags.len());
    for (range, inner) in &tags {
        let id = inner
            .trim()
            .parse::<u32>()
            .ok()
            .filter(|id| *id > 0)
            .map(PropertyId::new)
            .ok_or_else(|| {
                ScriptPlayError::new(
                    "TEMPLATE_BAD_TAG",
                    format!("Text parsing error. Bad property id: {}\n({})", inner, text),
                )
            })?;
        if !known.contains(&id) {
            return Err(ScriptPlayError::new(
                "TEMPLATE_UNKNOWN_PROPERTY",
                format!(
                    "Text parsing error. Property id not found: {}\n({})",
                    inner, text
                ),
            ));
        }
        found.push((range.clone(), id));
    }

    // Replace right-to-left so earlier offsets stay valid.
    let mut parsed = text.to_string();
    for (range, id) in found.into_iter().rev() {
        let mut value = values
            .get(&id)
            .map(|value| value.to_text().trim().to_string())
            .unwrap_or_default();
        if rich && !value.is_empty() {
            value = format!("<b>{}</b>", value);
        }
        parsed.replace_range(range, &value);
    }

    if rich {
        parsed = parsed.replace('\n', "<br/>");
    }

    Ok(parsed)
}
