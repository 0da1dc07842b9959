//! Rule-driven overwrite of identifying attributes.
//!
//! Every active rule whose tag is present in the main data set has its
//! value replaced; the attribute itself stays in place. Absent tags are
//! skipped silently. Only top-level attributes are considered: a rule for
//! a tag that occurs only inside a sequence item does not match.
//!
//! Not every value representation can hold the sentinel text. Those values
//! are emptied instead:
//!
//! | VR                              | New value         |
//! |---------------------------------|-------------------|
//! | character strings, `UN`         | `REDACTED`        |
//! | `SQ`                            | no items          |
//! | binary numbers, `AT`, `O*`      | zero-length value |

use serde::Serialize;

use crate::dicom::{DataSet, Tag, Value, Vr};
use crate::rules::RuleTable;

/// Value written into redacted character-string attributes.
pub const SENTINEL: &str = "REDACTED";

/// How a single attribute was redacted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Redaction {
    /// Value replaced by [`SENTINEL`].
    Overwritten,
    /// Value emptied because its VR cannot hold text.
    Emptied,
}

/// Applies the active rules to a data set and returns what was changed,
/// in tag order.
pub fn redact_metadata(dataset: &mut DataSet, rules: &RuleTable) -> Vec<(Tag, Redaction)> {
    let mut changed = Vec::new();
    for tag in rules.active_tags() {
        let Some(element) = dataset.get_mut(tag) else {
            continue;
        };
        let redaction = if element.vr.is_text() || element.vr == Vr::UN {
            element.value = Value::Bytes(SENTINEL.as_bytes().to_vec());
            Redaction::Overwritten
        } else if element.vr == Vr::SQ {
            element.value = Value::Sequence(Vec::new());
            Redaction::Emptied
        } else {
            element.value = Value::Bytes(Vec::new());
            Redaction::Emptied
        };
        log::debug!("redacted {} ({})", tag, element.vr);
        changed.push((tag, redaction));
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dicom::{tags, Element};
    use crate::rules::{from_rules_str, Rule};

    fn sample() -> DataSet {
        let mut ds = DataSet::new();
        ds.put_str(tags::PATIENT_NAME, Vr::PN, "DOE^JANE");
        ds.put_str(tags::PATIENT_ID, Vr::LO, "12345");
        ds.put_str(tags::MODALITY, Vr::CS, "CT");
        ds.put_u16(tags::ROWS, 2);
        ds
    }

    #[test]
    fn test_active_present_tags_are_overwritten() {
        let mut ds = sample();
        let rules = from_rules_str("tag,delete\n\"0x0010,0x0010\",true\n").expect("rules");
        let changed = redact_metadata(&mut ds, &rules);
        assert_eq!(changed, vec![(tags::PATIENT_NAME, Redaction::Overwritten)]);
        assert_eq!(ds.get_str(tags::PATIENT_NAME).as_deref(), Some(SENTINEL));
        assert_eq!(ds.get(tags::PATIENT_NAME).map(|e| e.vr), Some(Vr::PN));
        assert_eq!(ds.get_str(tags::PATIENT_ID).as_deref(), Some("12345"));
        assert_eq!(ds.get_str(tags::MODALITY).as_deref(), Some("CT"));
    }

    #[test]
    fn test_disabled_and_absent_rules_change_nothing() {
        let mut ds = sample();
        let before = ds.clone();
        let rules = from_rules_str(
            "tag,delete\n0x0010,0x0020,false\n0x0010,0x0030,true\n",
        )
        .expect("rules");
        assert!(redact_metadata(&mut ds, &rules).is_empty());
        assert_eq!(ds, before);
    }

    #[test]
    fn test_binary_values_are_emptied() {
        let mut ds = sample();
        let rules = RuleTable::from_rules([Rule {
            tag: tags::ROWS,
            redact: true,
        }]);
        let changed = redact_metadata(&mut ds, &rules);
        assert_eq!(changed, vec![(tags::ROWS, Redaction::Emptied)]);
        assert_eq!(ds.get(tags::ROWS).map(Element::value_len), Some(0));
    }

    #[test]
    fn test_sequences_lose_their_items() {
        let mut ds = sample();
        let seq_tag = Tag::new(0x0008, 0x1110);
        let mut item = DataSet::new();
        item.put_str(tags::PATIENT_NAME, Vr::PN, "NESTED");
        ds.put(Element::sequence(seq_tag, vec![item]));

        let rules = RuleTable::from_rules([
            Rule { tag: seq_tag, redact: true },
        ]);
        redact_metadata(&mut ds, &rules);
        assert_eq!(ds.get(seq_tag).map(|e| &e.value), Some(&Value::Sequence(Vec::new())));
    }

    #[test]
    fn test_unknown_vr_gets_sentinel() {
        let mut ds = DataSet::new();
        let private = Tag::new(0x0009, 0x1001);
        ds.put(Element::new(private, Vr::UN, b"secret".to_vec()));
        let rules = RuleTable::from_rules([Rule { tag: private, redact: true }]);
        redact_metadata(&mut ds, &rules);
        assert_eq!(ds.get_str(private).as_deref(), Some(SENTINEL));
    }
}
