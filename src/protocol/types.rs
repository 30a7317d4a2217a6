use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// One phase of the council pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    /// Independent responses from every council member.
    Stage1,
    /// Anonymised peer ranking of the stage 1 responses.
    Stage2,
    /// Chairman synthesis.
    Stage3,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Stage1, Stage::Stage2, Stage::Stage3];

    /// 1-based stage number as used on the wire (`stage1_start`, ...).
    pub fn number(self) -> u8 {
        match self {
            Stage::Stage1 => 1,
            Stage::Stage2 => 2,
            Stage::Stage3 => 3,
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Stage::Stage1 => "Individual responses",
            Stage::Stage2 => "Peer rankings",
            Stage::Stage3 => "Final synthesis",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Stage {}", self.number())
    }
}

/// A pipeline transition decoded from the message stream.
///
/// Wire form is `{"type": "<kind>", "data"?: ..., "metadata"?: ..., "message"?: ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StageEvent {
    #[serde(rename = "stage1_start")]
    Stage1Start,
    #[serde(rename = "stage1_complete")]
    Stage1Complete {
        #[serde(default)]
        data: Option<Vec<ModelResponse>>,
    },
    #[serde(rename = "stage2_start")]
    Stage2Start,
    #[serde(rename = "stage2_complete")]
    Stage2Complete {
        #[serde(default)]
        data: Option<Vec<PeerRanking>>,
        #[serde(default)]
        metadata: Option<RankingMetadata>,
    },
    #[serde(rename = "stage3_start")]
    Stage3Start,
    #[serde(rename = "stage3_complete")]
    Stage3Complete {
        #[serde(default)]
        data: Option<Synthesis>,
    },
    #[serde(rename = "title_complete")]
    TitleComplete {
        #[serde(default)]
        data: Option<TitleUpdate>,
    },
    #[serde(rename = "complete")]
    Complete,
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        message: Option<String>,
    },
}

impl StageEvent {
    /// Every discriminator this client understands.
    pub const KINDS: [&'static str; 9] = [
        "stage1_start",
        "stage1_complete",
        "stage2_start",
        "stage2_complete",
        "stage3_start",
        "stage3_complete",
        "title_complete",
        "complete",
        "error",
    ];

    /// The wire discriminator of this event.
    pub fn kind(&self) -> &'static str {
        match self {
            StageEvent::Stage1Start => "stage1_start",
            StageEvent::Stage1Complete { .. } => "stage1_complete",
            StageEvent::Stage2Start => "stage2_start",
            StageEvent::Stage2Complete { .. } => "stage2_complete",
            StageEvent::Stage3Start => "stage3_start",
            StageEvent::Stage3Complete { .. } => "stage3_complete",
            StageEvent::TitleComplete { .. } => "title_complete",
            StageEvent::Complete => "complete",
            StageEvent::Error { .. } => "error",
        }
    }

    /// The stage this event starts or completes, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            StageEvent::Stage1Start | StageEvent::Stage1Complete { .. } => Some(Stage::Stage1),
            StageEvent::Stage2Start | StageEvent::Stage2Complete { .. } => Some(Stage::Stage2),
            StageEvent::Stage3Start | StageEvent::Stage3Complete { .. } => Some(Stage::Stage3),
            StageEvent::TitleComplete { .. } | StageEvent::Complete | StageEvent::Error { .. } => {
                None
            }
        }
    }

    /// `complete` and `error` end a send; nothing after them is applied.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StageEvent::Complete | StageEvent::Error { .. })
    }
}

/// A council member's stage 1 answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelResponse {
    pub model: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub response: String,
    /// Token usage as reported by the provider; shape varies per provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Value>,
}

/// A council member's stage 2 evaluation of the anonymised responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerRanking {
    pub model: String,
    /// Full evaluation text, ending in a `FINAL RANKING:` list.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub ranking: String,
    /// Labels (`Response A`, ...) in ranked order, as parsed by the backend.
    #[serde(default)]
    pub parsed_ranking: Vec<String>,
}

/// Stage 3 output. Older backends send a bare string, newer ones name the chairman.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Synthesis {
    Text(String),
    Model {
        model: String,
        #[serde(default, deserialize_with = "null_as_empty")]
        response: String,
    },
}

impl Synthesis {
    pub fn text(&self) -> &str {
        match self {
            Synthesis::Text(text) => text,
            Synthesis::Model { response, .. } => response,
        }
    }

    pub fn model(&self) -> Option<&str> {
        match self {
            Synthesis::Text(_) => None,
            Synthesis::Model { model, .. } => Some(model),
        }
    }
}

/// Side data attached to `stage2_complete`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RankingMetadata {
    /// Anonymous label (`Response A`) to the model that wrote it.
    #[serde(default)]
    pub label_to_model: BTreeMap<String, String>,
    /// Model to its mean position across all peer rankings (lower is better).
    #[serde(default)]
    pub aggregate_rankings: BTreeMap<String, f64>,
}

impl RankingMetadata {
    /// Aggregate rankings ordered best first.
    pub fn leaderboard(&self) -> Vec<(&str, f64)> {
        let mut rows: Vec<(&str, f64)> = self
            .aggregate_rankings
            .iter()
            .map(|(model, rank)| (model.as_str(), *rank))
            .collect();
        rows.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(b.0)));
        rows
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TitleUpdate {
    pub title: String,
}

/// Providers report a refused or empty completion as `null` content.
fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Body of `POST /api/conversations/{id}/message/stream`.
#[derive(Debug, Clone, Serialize)]
pub struct SendMessageRequest<'a> {
    pub content: &'a str,
}

/// Body of `PUT /api/conversations/{id}`.
#[derive(Debug, Clone, Serialize)]
pub struct RenameRequest<'a> {
    pub title: &'a str,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn stage2_complete_carries_metadata() {
        let line = r#"{"type":"stage2_complete","data":[{"model":"GPT-4","ranking":"...","parsed_ranking":["Response B","Response A"]}],"metadata":{"label_to_model":{"Response A":"Grok","Response B":"GPT-4"},"aggregate_rankings":{"GPT-4":1.0,"Grok":2.0}}}"#;
        let event: StageEvent = serde_json::from_str(line).unwrap();
        let StageEvent::Stage2Complete { data, metadata } = event else {
            panic!("expected stage2_complete");
        };
        assert_eq!(data.unwrap()[0].parsed_ranking, ["Response B", "Response A"]);
        let metadata = metadata.unwrap();
        assert_eq!(metadata.label_to_model["Response A"], "Grok");
        assert_eq!(metadata.leaderboard(), vec![("GPT-4", 1.0), ("Grok", 2.0)]);
    }

    #[test]
    fn synthesis_accepts_both_shapes() {
        let text: Synthesis = serde_json::from_str(r#""The board decides.""#).unwrap();
        assert_eq!(text.text(), "The board decides.");
        assert_eq!(text.model(), None);

        let model: Synthesis =
            serde_json::from_str(r#"{"model":"Chairman","response":"Ship it."}"#).unwrap();
        assert_eq!(model.text(), "Ship it.");
        assert_eq!(model.model(), Some("Chairman"));
    }

    #[test]
    fn null_model_content_reads_as_empty() {
        let line = r#"{"type":"stage1_complete","data":[{"model":"A","response":"a"},{"model":"B","response":null}]}"#;
        let event: StageEvent = serde_json::from_str(line).unwrap();
        let StageEvent::Stage1Complete { data } = event else {
            panic!("expected stage1_complete");
        };
        let data = data.unwrap();
        assert_eq!(data.len(), 2);
        assert_eq!(data[1].response, "");

        let synthesis: Synthesis =
            serde_json::from_str(r#"{"model":"Chairman","response":null}"#).unwrap();
        assert_eq!(synthesis.model(), Some("Chairman"));
        assert_eq!(synthesis.text(), "");
    }

    #[test]
    fn unit_events_ignore_extra_fields() {
        let event: StageEvent =
            serde_json::from_str(r#"{"type":"stage1_start","data":null,"extra":1}"#).unwrap();
        assert_eq!(event, StageEvent::Stage1Start);
    }

    #[test]
    fn kinds_match_serialized_tags() {
        let events = [
            StageEvent::Stage1Start,
            StageEvent::Stage1Complete { data: None },
            StageEvent::Stage2Start,
            StageEvent::Stage2Complete {
                data: None,
                metadata: None,
            },
            StageEvent::Stage3Start,
            StageEvent::Stage3Complete { data: None },
            StageEvent::TitleComplete { data: None },
            StageEvent::Complete,
            StageEvent::Error { message: None },
        ];
        for (event, kind) in events.iter().zip(StageEvent::KINDS) {
            let value = serde_json::to_value(event).unwrap();
            assert_eq!(value["type"], kind);
            assert_eq!(event.kind(), kind);
        }
    }

    #[test]
    fn leaderboard_breaks_ties_by_name() {
        let metadata = RankingMetadata {
            label_to_model: BTreeMap::new(),
            aggregate_rankings: [("b".to_string(), 1.5), ("a".to_string(), 1.5)]
                .into_iter()
                .collect(),
        };
        assert_eq!(metadata.leaderboard(), vec![("a", 1.5), ("b", 1.5)]);
    }
}
