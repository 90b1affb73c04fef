use serde::Serialize;
use crate::error::{PipelineError, Result};

/// Which segments of the scene a render keeps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SegmentSelection {
    All,
    TextPrompt { prompt: String },
    Ids { ids: Vec<u32> },
}

impl SegmentSelection {
    pub fn from_args(text_prompt: Option<&str>, segment_ids: Option<&[u32]>) -> Result<Self> {
        match (text_prompt, segment_ids) {
            (Some(_), Some(_)) => Err(PipelineError::InvalidConfig(
                "--text_prompt and --segment_ids are mutually exclusive".to_owned(),
            )),
            (Some(prompt), None) => {
                let prompt = prompt.trim();
                if prompt.is_empty() {
                    return Err(PipelineError::InvalidConfig("--text_prompt is empty".to_owned()));
                }
                Ok(SegmentSelection::TextPrompt { prompt: prompt.to_owned() })
            }
            (None, Some(ids)) if !ids.is_empty() => {
                let mut ids = ids.to_vec();
                ids.sort_unstable();
                ids.dedup();
                Ok(SegmentSelection::Ids { ids })
            }
            _ => Ok(SegmentSelection::All),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_sorted_and_unique() {
        let sel = SegmentSelection::from_args(None, Some(&[7, 2, 7, 0])).unwrap();
        assert_eq!(sel, SegmentSelection::Ids { ids: vec![0, 2, 7] });
        assert_eq!(SegmentSelection::from_args(None, Some(&[])).unwrap(), SegmentSelection::All);
    }

    #[test]
    fn prompts_are_trimmed_and_required() {
        let sel = SegmentSelection::from_args(Some(" red chair "), None).unwrap();
        assert_eq!(sel, SegmentSelection::TextPrompt { prompt: "red chair".to_owned() });
        assert!(SegmentSelection::from_args(Some("  "), None).is_err());
        assert!(SegmentSelection::from_args(Some("chair"), Some(&[1])).is_err());
    }

    #[test]
    fn serializes_with_kind_tag() {
        let json = serde_json::to_value(SegmentSelection::Ids { ids: vec![3] }).unwrap();
        assert_eq!(json, serde_json::json!({ "kind": "ids", "ids": [3] }));
        let json = serde_json::to_value(SegmentSelection::All).unwrap();
        assert_eq!(json, serde_json::json!({ "kind": "all" }));
    }
}
