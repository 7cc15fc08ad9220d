//! Placeholder substitution for `{{KEY}}` templates.

use std::collections::BTreeMap;

/// Replace every `{{KEY}}` with its value. Unknown placeholders are kept.
pub fn render_map(template: &str, variables: &BTreeMap<String, String>) -> String {
    let mut result = template.to_string();

    for (key, value) in variables {
        let placeholder = format!("{{{{{}}}}}", key);
        result = result.replace(&placeholder, value);
    }

    result
}
