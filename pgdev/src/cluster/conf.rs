use std::path::Path;

pub const CONF_FILE: &'static str = "postgresql.conf";

/// Set `key = value` in the text of a `postgresql.conf`.  The first active line for
/// `key` is replaced, otherwise the setting is appended.  Commented lines (`#port = ...`)
/// are left alone.  The result always ends with a newline.
pub fn upsert_parameter(text: &str, key: &str, value: &str) -> String {
    let setting = format!("{} = {}", key, value);
    let mut lines: Vec<String> = text.lines().map(|line| line.to_string()).collect();
    match lines.iter_mut().find(|line| sets(line, key)) {
        Some(line) => *line = setting,
        None => lines.push(setting),
    }
    let mut text = lines.join("\n");
    text.push('\n');
    text
}

/// true when `line` assigns `key`
fn sets(line: &str, key: &str) -> bool {
    match line.trim().strip_prefix(key) {
        Some(rest) => rest.is_empty() || rest.starts_with(|c: char| c.is_whitespace() || c == '='),
        None => false,
    }
}

/// [`upsert_parameter`] applied to `<data_dir>/postgresql.conf`
pub async fn set_parameter(data_dir: &Path, key: &str, value: &str) -> Result<(), std::io::Error> {
    let path = data_dir.join(CONF_FILE);
    let text = tokio::fs::read_to_string(&path).await?;
    tokio::fs::write(&path, upsert_parameter(&text, key, value)).await
}

/// the value of the first active line for `key`
pub fn parameter(text: &str, key: &str) -> Option<String> {
    text.lines()
        .find(|line| sets(line, key))
        .and_then(|line| line.split_once('='))
        .map(|(_, value)| value.trim().to_string())
}
