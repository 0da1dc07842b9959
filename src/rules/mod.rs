//! Tag redaction rules loaded from CSV.
//!
//! # Rule File Format
//!
//! The first row is a header and is always skipped, whatever it contains
//! (the conventional header is `tag,delete`). Every following row names
//! one tag and a flag:
//!
//! ```text
//! tag,delete
//! "0x0010,0x0010",True
//! 0x0010,0x0020,true
//! "(0008,0090)",false
//! ```
//!
//! The tag is two hexadecimal components, either quoted into one column or
//! spread over two columns; a `0x` prefix and surrounding parentheses are
//! optional. The flag is a case-insensitive boolean token (`true`/`false`,
//! `yes`/`no`, `1`/`0`). Lines starting with `#` are comments.
//!
//! Despite the conventional `delete` header, a `true` flag means the
//! attribute's value is overwritten, never that the attribute is removed.
//!
//! # Semantics
//!
//! - Rows flagged `false` are parsed (and must be well-formed) but are not
//!   part of the active set: redaction is opt-in.
//! - When a tag appears more than once, the last row wins.
//! - Any malformed row fails the whole load; there is no partial table.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use serde::Serialize;

use crate::dicom::Tag;
use crate::error::ScrubError;

/// One parsed rule row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Rule {
    pub tag: Tag,
    pub redact: bool,
}

/// The active rule set: every tag whose last row was flagged `true`.
///
/// Immutable once loaded; shared read-only by every job in a batch.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RuleTable {
    rules: BTreeMap<Tag, bool>,
    /// Number of non-header rows read.
    pub rows_read: usize,
}

impl RuleTable {
    /// Builds a table from rules in file order (last duplicate wins).
    pub fn from_rules(rules: impl IntoIterator<Item = Rule>) -> Self {
        let mut table = Self::default();
        for rule in rules {
            table.rows_read += 1;
            table.rules.insert(rule.tag, rule.redact);
        }
        table
    }

    /// Tags that should be redacted, in tag order.
    pub fn active_tags(&self) -> impl Iterator<Item = Tag> + '_ {
        self.rules
            .iter()
            .filter(|(_, &redact)| redact)
            .map(|(&tag, _)| tag)
    }

    /// Active rules, in tag order.
    pub fn active(&self) -> Vec<Rule> {
        self.active_tags()
            .map(|tag| Rule { tag, redact: true })
            .collect()
    }

    /// Returns true if the tag is in the active set.
    pub fn is_active(&self, tag: Tag) -> bool {
        self.rules.get(&tag).copied().unwrap_or(false)
    }

    /// Number of active rules.
    pub fn len(&self) -> usize {
        self.active_tags().count()
    }

    /// Returns true if no tag is active.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of distinct tags whose final flag is `false`.
    pub fn disabled_count(&self) -> usize {
        self.rules.values().filter(|&&redact| !redact).count()
    }

    /// Active tags that describe pixel data. Redacting them leaves every
    /// written file inconsistent, so such rules make each job fail.
    pub fn pixel_attribute_tags(&self) -> Vec<Tag> {
        self.active_tags()
            .filter(|tag| tag.is_pixel_descriptive())
            .collect()
    }
}

impl fmt::Display for RuleTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} active rule(s) from {} row(s), {} disabled",
            self.len(),
            self.rows_read,
            self.disabled_count()
        )?;
        for tag in self.active_tags() {
            writeln!(f, "  {}", tag)?;
        }
        Ok(())
    }
}

/// Loads the active rule set from a CSV file.
///
/// # Errors
/// Returns `MalformedRule` for the first row whose tag or flag cannot be
/// parsed, and `RuleCsv`/`Io` if the file cannot be read.
pub fn load_rules(path: &Path) -> Result<RuleTable, ScrubError> {
    let file = File::open(path).map_err(ScrubError::Io)?;
    let table = parse_rules(BufReader::new(file), path)?;
    for tag in table.pixel_attribute_tags() {
        log::warn!(
            "{}: active rule for pixel attribute {} will fail every file",
            path.display(),
            tag
        );
    }
    Ok(table)
}

/// Loads the active rule set from a CSV string.
///
/// Useful for testing without file I/O.
pub fn from_rules_str(csv_str: &str) -> Result<RuleTable, ScrubError> {
    from_rules_slice(csv_str.as_bytes())
}

/// Loads the active rule set from CSV bytes.
///
/// Useful for fuzzing and processing raw bytes without requiring UTF-8 upfront.
pub fn from_rules_slice(bytes: &[u8]) -> Result<RuleTable, ScrubError> {
    parse_rules(bytes, Path::new("<bytes>"))
}

fn parse_rules<R: Read>(reader: R, path: &Path) -> Result<RuleTable, ScrubError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .comment(Some(b'#'))
        .from_reader(reader);

    let mut rules = Vec::new();
    for result in csv_reader.byte_records() {
        let record = result.map_err(|source| ScrubError::RuleCsv {
            path: path.to_path_buf(),
            source,
        })?;
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        let malformed = |message: String| ScrubError::MalformedRule {
            path: path.to_path_buf(),
            line,
            message,
        };

        let fields: Vec<String> = record
            .iter()
            .map(|f| String::from_utf8_lossy(f).into_owned())
            .collect();
        let (tag_text, flag_text) = match fields.as_slice() {
            [tag, flag] => (tag.clone(), flag.as_str()),
            [group, element, flag] => (format!("{},{}", group, element), flag.as_str()),
            other => {
                return Err(malformed(format!(
                    "expected `tag,flag` but found {} column(s)",
                    other.len()
                )))
            }
        };

        let tag = parse_tag(&tag_text).map_err(&malformed)?;
        let redact = parse_flag(flag_text).map_err(&malformed)?;
        rules.push(Rule { tag, redact });
    }

    Ok(RuleTable::from_rules(rules))
}

/// Parses `0xGGGG,0xEEEE`, `GGGG,EEEE` or `(GGGG,EEEE)`.
pub fn parse_tag(text: &str) -> Result<Tag, String> {
    let trimmed = text.trim();
    let inner = trimmed
        .strip_prefix('(')
        .and_then(|t| t.strip_suffix(')'))
        .unwrap_or(trimmed);

    let parts: Vec<&str> = inner.split(',').collect();
    let [group, element] = parts.as_slice() else {
        return Err(format!(
            "tag '{}' must have two hexadecimal components",
            text
        ));
    };
    Ok(Tag::new(parse_hex_u16(group, text)?, parse_hex_u16(element, text)?))
}

fn parse_hex_u16(component: &str, whole: &str) -> Result<u16, String> {
    let component = component.trim();
    let digits = component
        .strip_prefix("0x")
        .or_else(|| component.strip_prefix("0X"))
        .unwrap_or(component);
    if digits.is_empty() || digits.len() > 4 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(format!(
            "'{}' in tag '{}' is not a 16-bit hexadecimal number",
            component, whole
        ));
    }
    u16::from_str_radix(digits, 16).map_err(|e| format!("tag '{}': {}", whole, e))
}

/// Parses a case-insensitive boolean token.
pub fn parse_flag(text: &str) -> Result<bool, String> {
    match text.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        other => Err(format!("'{}' is not a boolean (use true or false)", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dicom::tags;

    #[test]
    fn test_quoted_tag_rows() {
        let table = from_rules_str("tag,delete\n\"0x0010,0x0010\",True\n\"0x0010,0x0020\",False\n")
            .expect("parse");
        assert_eq!(table.rows_read, 2);
        assert_eq!(table.active(), vec![Rule { tag: tags::PATIENT_NAME, redact: true }]);
        assert!(!table.is_active(tags::PATIENT_ID));
        assert_eq!(table.disabled_count(), 1);
    }

    #[test]
    fn test_unquoted_three_column_rows() {
        let table = from_rules_str("tag,delete\n0x0010,0x0010,True\n").expect("parse");
        assert!(table.is_active(tags::PATIENT_NAME));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_header_row_is_always_skipped() {
        // Even a header that looks like a rule is not a rule.
        let table = from_rules_str("0x0010,0x0020,true\n0x0010,0x0010,true\n").expect("parse");
        assert_eq!(table.active_tags().collect::<Vec<_>>(), vec![tags::PATIENT_NAME]);
    }

    #[test]
    fn test_pixel_attribute_rules_are_listed() {
        let table = from_rules_str(
            "tag,delete\n0x0010,0x0010,true\n0x7FE0,0x0010,true\n0x0028,0x0010,true\n0x0028,0x0100,false\n",
        )
        .expect("parse");
        assert_eq!(table.pixel_attribute_tags(), vec![tags::ROWS, tags::PIXEL_DATA]);
        assert!(from_rules_str("tag,delete\n0x0010,0x0010,true\n")
            .expect("parse")
            .pixel_attribute_tags()
            .is_empty());
    }

    #[test]
    fn test_last_duplicate_wins() {
        let on_then_off = "tag,delete\n0x0010,0x0010,true\n0x0010,0x0010,false\n";
        assert!(from_rules_str(on_then_off).expect("parse").is_empty());

        let off_then_on = "tag,delete\n0x0010,0x0010,false\n0x0010,0x0010,TRUE\n";
        assert_eq!(from_rules_str(off_then_on).expect("parse").len(), 1);
    }

    #[test]
    fn test_tag_spellings() {
        assert_eq!(parse_tag("0x0010,0x0010"), Ok(tags::PATIENT_NAME));
        assert_eq!(parse_tag("(0010,0010)"), Ok(tags::PATIENT_NAME));
        assert_eq!(parse_tag(" 7fe0 , 0010 "), Ok(tags::PIXEL_DATA));
        assert!(parse_tag("0x0010").is_err());
        assert!(parse_tag("0x0010,0x0010,0x0010").is_err());
        assert!(parse_tag("0xGGGG,0x0010").is_err());
        assert!(parse_tag("0x10000,0x0010").is_err());
    }

    #[test]
    fn test_flag_tokens() {
        assert_eq!(parse_flag("TRUE"), Ok(true));
        assert_eq!(parse_flag("yes"), Ok(true));
        assert_eq!(parse_flag("False"), Ok(false));
        assert_eq!(parse_flag("0"), Ok(false));
        assert!(parse_flag("maybe").is_err());
        assert!(parse_flag("").is_err());
    }

    #[test]
    fn test_malformed_row_fails_whole_load() {
        let err = from_rules_str("tag,delete\n0x0010,0x0010,true\nnot-a-tag,true\n").unwrap_err();
        match err {
            ScrubError::MalformedRule { line, .. } => assert_eq!(line, 3),
            other => panic!("expected MalformedRule, got {:?}", other),
        }
    }

    #[test]
    fn test_bad_flag_is_malformed() {
        let err = from_rules_str("tag,delete\n0x0010,0x0010,sometimes\n").unwrap_err();
        assert!(matches!(err, ScrubError::MalformedRule { .. }));
    }

    #[test]
    fn test_comments_and_blank_lines() {
        let table =
            from_rules_str("tag,delete\n# patient module\n\n0x0010,0x0030,true\n").expect("parse");
        assert_eq!(table.rows_read, 1);
        assert!(table.is_active(tags::PATIENT_BIRTH_DATE));
    }

    #[test]
    fn test_empty_file_is_empty_table() {
        assert!(from_rules_str("").expect("parse").is_empty());
        assert!(from_rules_str("tag,delete\n").expect("parse").is_empty());
    }
}
