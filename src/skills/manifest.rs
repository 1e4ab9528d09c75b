//! Skill manifest parsing.
//!
//! A manifest is a UTF-8 text file: a `---`-delimited header of `key: value`
//! lines (with optional `- item` list continuations), followed by a body
//! that is carried through verbatim. Parsing is pure and deterministic.

use std::collections::BTreeMap;
use std::path::Path;

use thiserror::Error;

/// A parsed skill manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    /// Unique identifier within a registry.
    pub name: String,
    /// Free-text description, used in the skills catalog.
    pub description: String,
    /// Optional client class the executor synthesizes a call against.
    pub client_class: Option<String>,
    /// Optional method name the executor synthesizes a call against.
    pub default_method: Option<String>,
    /// If false, this manifest is documentation-only and must not be dispatched.
    pub executable: bool,
    /// Names of related skills whose documentation travels with this one.
    pub related_tools: Vec<String>,
    /// Unrecognized header keys, preserved verbatim.
    pub extra: BTreeMap<String, String>,
    /// The body text, unmodified, following the closing header delimiter.
    pub body: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ManifestError {
    #[error("manifest is missing the opening `---` header delimiter")]
    MissingHeader,
    #[error("manifest header is never terminated by a closing `---` line")]
    UnterminatedHeader,
    #[error("manifest header defines key `{0}` more than once")]
    DuplicateKey(String),
    #[error("manifest is missing a required `name` field")]
    MissingName,
    #[error("manifest is missing a required `description` field")]
    MissingDescription,
    #[error("failed to read manifest file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

const HEADER_DELIM: &str = "---";

/// Parse manifest file content into a typed record.
pub fn parse_manifest(content: &str) -> Result<Manifest, ManifestError> {
    let mut lines = content.lines();

    let first_non_blank = lines
        .by_ref()
        .find(|line| !line.trim().is_empty())
        .ok_or(ManifestError::MissingHeader)?;
    if first_non_blank.trim() != HEADER_DELIM {
        return Err(ManifestError::MissingHeader);
    }

    let mut header_lines = Vec::new();
    let mut closed = false;
    let mut body_lines: Vec<&str> = Vec::new();
    for line in lines.by_ref() {
        if line.trim() == HEADER_DELIM {
            closed = true;
            break;
        }
        header_lines.push(line);
    }
    if !closed {
        return Err(ManifestError::UnterminatedHeader);
    }
    body_lines.extend(lines);
    // Preserve the original newline-joined body, including leading blank lines
    // immediately after the closing delimiter, but drop exactly one leading
    // blank line introduced by the delimiter's own line break.
    let mut body = body_lines.join("\n");
    if content.ends_with('\n') && !body.is_empty() {
        body.push('\n');
    }

    let fields = parse_header(&header_lines)?;

    let name = fields
        .get("name")
        .cloned()
        .ok_or(ManifestError::MissingName)?;
    let description = fields
        .get("description")
        .cloned()
        .ok_or(ManifestError::MissingDescription)?;
    let client_class = fields.get("client_class").cloned();
    let default_method = fields.get("default_method").cloned();
    let executable = fields
        .get("executable")
        .map(|v| parse_bool(v))
        .unwrap_or(true);
    let related_tools = fields
        .get("related_tools")
        .map(|v| parse_list(v))
        .unwrap_or_default();

    let mut extra = BTreeMap::new();
    for (key, value) in fields.into_iter() {
        if matches!(
            key.as_str(),
            "name" | "description" | "client_class" | "default_method" | "executable"
                | "related_tools"
        ) {
            continue;
        }
        extra.insert(key, value);
    }

    Ok(Manifest {
        name,
        description,
        client_class,
        default_method,
        executable,
        related_tools,
        extra,
        body,
    })
}

/// A raw header value: either a scalar (`key: value`) or a list
/// (`key:` followed by `- item` lines). Lists are joined with `\n` so
/// `parse_list` can split them back apart; this keeps the intermediate
/// map a plain `String -> String`.
fn parse_header(lines: &[&str]) -> Result<BTreeMap<String, String>, ManifestError> {
    let mut map = BTreeMap::new();
    let mut current_key: Option<String> = None;
    let mut current_is_list = false;
    let mut current_items: Vec<String> = Vec::new();
    let mut current_scalar = String::new();

    macro_rules! flush {
        () => {
            if let Some(key) = current_key.take() {
                if map.contains_key(&key) {
                    return Err(ManifestError::DuplicateKey(key));
                }
                let value = if current_is_list {
                    current_items.join("\n")
                } else {
                    current_scalar.trim().to_string()
                };
                map.insert(key, value);
                current_items = Vec::new();
                current_scalar = String::new();
                current_is_list = false;
            }
        };
    }

    for raw_line in lines {
        let line = *raw_line;
        if line.trim().is_empty() {
            continue;
        }
        let is_list_item = line.trim_start().starts_with("- ") || line.trim() == "-";
        let is_indented = line.starts_with(' ') || line.starts_with('\t');

        if is_indented && is_list_item && current_key.is_some() {
            let item = line.trim_start().trim_start_matches('-').trim().to_string();
            current_is_list = true;
            current_items.push(item);
            continue;
        }

        if let Some(colon) = line.find(':') {
            flush!();
            let key = line[..colon].trim().to_string();
            let rest = line[colon + 1..].trim();
            current_key = Some(key);
            if rest.is_empty() {
                current_is_list = false;
                current_items.clear();
                current_scalar.clear();
            } else {
                current_is_list = false;
                current_scalar = rest.to_string();
            }
        } else {
            // Continuation of a scalar value on a following indented line.
            if current_key.is_some() && !current_is_list {
                if !current_scalar.is_empty() {
                    current_scalar.push(' ');
                }
                current_scalar.push_str(line.trim());
            }
        }
    }
    flush!();

    Ok(map)
}

fn parse_bool(raw: &str) -> bool {
    matches!(raw.trim().to_ascii_lowercase().as_str(), "true" | "yes" | "1")
}

fn parse_list(raw: &str) -> Vec<String> {
    if raw.contains('\n') {
        raw.lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect()
    } else {
        raw.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

/// Read and parse a manifest file from disk.
pub fn parse_manifest_file(path: &Path) -> Result<Manifest, ManifestError> {
    let content = std::fs::read_to_string(path).map_err(|e| ManifestError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    parse_manifest(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_manifest() {
        let content = "---\nname: websearch_service\ndescription: Search the web.\n---\nUsage notes.\n";
        let m = parse_manifest(content).unwrap();
        assert_eq!(m.name, "websearch_service");
        assert_eq!(m.description, "Search the web.");
        assert!(m.executable);
        assert!(m.related_tools.is_empty());
        assert_eq!(m.body, "Usage notes.\n");
    }

    #[test]
    fn parses_full_header() {
        let content = "---\nname: finance\ndescription: Finance lookups.\nclient_class: FinanceClient\ndefault_method: lookup\nexecutable: false\nrelated_tools:\n  - finance_docs\n  - finance_faq\nowner: platform-team\n---\nBody text\nsecond line\n";
        let m = parse_manifest(content).unwrap();
        assert_eq!(m.client_class.as_deref(), Some("FinanceClient"));
        assert_eq!(m.default_method.as_deref(), Some("lookup"));
        assert!(!m.executable);
        assert_eq!(m.related_tools, vec!["finance_docs", "finance_faq"]);
        assert_eq!(m.extra.get("owner").unwrap(), "platform-team");
        assert_eq!(m.body, "Body text\nsecond line\n");
    }

    #[test]
    fn missing_header_errors() {
        let content = "name: x\ndescription: y\n";
        assert_eq!(parse_manifest(content), Err(ManifestError::MissingHeader));
    }

    #[test]
    fn unterminated_header_errors() {
        let content = "---\nname: x\ndescription: y\n";
        assert_eq!(
            parse_manifest(content),
            Err(ManifestError::UnterminatedHeader)
        );
    }

    #[test]
    fn duplicate_key_errors() {
        let content = "---\nname: x\nname: y\ndescription: z\n---\nbody\n";
        assert_eq!(
            parse_manifest(content),
            Err(ManifestError::DuplicateKey("name".to_string()))
        );
    }

    #[test]
    fn missing_name_errors() {
        let content = "---\ndescription: z\n---\nbody\n";
        assert_eq!(parse_manifest(content), Err(ManifestError::MissingName));
    }

    #[test]
    fn empty_body_permitted() {
        let content = "---\nname: x\ndescription: y\n---\n";
        let m = parse_manifest(content).unwrap();
        assert_eq!(m.body, "");
    }

    #[test]
    fn comma_separated_related_tools() {
        let content =
            "---\nname: x\ndescription: y\nrelated_tools: a, b, c\n---\nbody\n";
        let m = parse_manifest(content).unwrap();
        assert_eq!(m.related_tools, vec!["a", "b", "c"]);
    }

    #[test]
    fn round_trips_body_bytes() {
        let body = "line one\n\nline two with trailing space \nline three";
        let content = format!("---\nname: x\ndescription: y\n---\n{body}");
        let m = parse_manifest(&content).unwrap();
        assert_eq!(m.body, body);
    }
}
