//! Ordered ABI field names of each contract record.
//!
//! Managed engines must declare exactly these names in exactly this order.

/// Routine every engine exports to report its [`EngineInfo`](super::EngineInfo).
pub const CAPABILITY_ROUTINE: &str = "GetInformation";

/// Routine every engine exports to synthesize one note.
pub const SYNTHESIS_ROUTINE: &str = "DoResampler";

pub const FLAG_ITEM_FIELDS: &[&str] = &["flagStr", "ThreeLetterName", "Max", "Min", "Default"];

pub const ENGINE_INFO_FIELDS: &[&str] = &[
    "Name",
    "Version",
    "Author",
    "Usage",
    "FlagItemCount",
    "FlagItem",
];

pub const ENGINE_INPUT_FIELDS: &[&str] = &[
    "inputWaveFile",
    "intermediateWaveFile",
    "outputWaveFile",
    "NoteString",
    "Velocity",
    "StrFlags",
    "Offset",
    "RequiredLength",
    "Consonant",
    "Cutoff",
    "Volume",
    "Modulation",
    "Tempo",
    "nPitchBend",
    "pitchBend",
    "stp",
    "durTick",
    "adjustment",
    "envelope",
    "lastnote",
];

pub const ENGINE_OUTPUT_FIELDS: &[&str] = &["nWavData", "wavData"];

/// Compare a declared field list against one of the tables above.
///
/// Returns a description of the first divergence, if any.
pub fn shape_mismatch(expected: &[&str], declared: &[String]) -> Option<String> {
    for (index, name) in expected.iter().enumerate() {
        match declared.get(index) {
            Some(found) if found == name => {}
            Some(found) => {
                return Some(format!(
                    "field {} is `{}`, expected `{}`",
                    index, found, name
                ))
            }
            None => return Some(format!("missing field `{}` at position {}", name, index)),
        }
    }
    if declared.len() > expected.len() {
        return Some(format!(
            "unexpected extra field `{}`",
            declared[expected.len()]
        ));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{EngineInfo, EngineInput, EngineOutput, FlagItem};
    use std::collections::BTreeSet;

    fn keys(value: serde_json::Value) -> BTreeSet<String> {
        value
            .as_object()
            .map(|map| map.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn names(table: &[&str]) -> BTreeSet<String> {
        table.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn test_serialized_records_use_schema_names() {
        let input = serde_json::to_value(EngineInput::default()).unwrap();
        assert_eq!(keys(input), names(ENGINE_INPUT_FIELDS));

        let info = serde_json::to_value(EngineInfo::unnamed("x")).unwrap();
        assert_eq!(keys(info), names(ENGINE_INFO_FIELDS));

        let output = serde_json::to_value(EngineOutput::new(vec![1, 2])).unwrap();
        assert_eq!(keys(output), names(ENGINE_OUTPUT_FIELDS));

        let flag = serde_json::to_value(FlagItem::new("g", "GEN", 100.0, -100.0, 0.0)).unwrap();
        assert_eq!(keys(flag), names(FLAG_ITEM_FIELDS));
    }

    #[test]
    fn test_shape_mismatch_reports_order() {
        let declared: Vec<String> = vec!["wavData".into(), "nWavData".into()];
        let mismatch = shape_mismatch(ENGINE_OUTPUT_FIELDS, &declared).unwrap();
        assert!(mismatch.contains("field 0"));
    }

    #[test]
    fn test_shape_mismatch_reports_missing_and_extra() {
        let declared: Vec<String> = vec!["nWavData".into()];
        assert!(shape_mismatch(ENGINE_OUTPUT_FIELDS, &declared)
            .unwrap()
            .contains("missing field `wavData`"));

        let declared: Vec<String> = vec!["nWavData".into(), "wavData".into(), "rate".into()];
        assert!(shape_mismatch(ENGINE_OUTPUT_FIELDS, &declared)
            .unwrap()
            .contains("extra field `rate`"));

        let declared: Vec<String> = vec!["nWavData".into(), "wavData".into()];
        assert!(shape_mismatch(ENGINE_OUTPUT_FIELDS, &declared).is_none());
    }
}
