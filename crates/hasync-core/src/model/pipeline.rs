// ── Assist pipelines ──

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub conversation_engine: Option<String>,
    #[serde(default)]
    pub stt_engine: Option<String>,
    #[serde(default)]
    pub tts_engine: Option<String>,
}

/// Result of `assist_pipeline/pipeline/list`, also the cached blob shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineList {
    #[serde(default)]
    pub pipelines: Vec<Pipeline>,
    #[serde(default)]
    pub preferred_pipeline: Option<String>,
}

impl PipelineList {
    /// Pick the pipeline to use.
    ///
    /// Keeps `current` if set; otherwise the first pipeline whose
    /// conversation engine is `voice_agent`; otherwise the preferred one.
    pub fn select(&self, current: Option<&str>, voice_agent: Option<&str>) -> Option<String> {
        if let Some(current) = current {
            return Some(current.to_owned());
        }
        if let Some(agent) = voice_agent {
            if let Some(p) = self
                .pipelines
                .iter()
                .find(|p| p.conversation_engine.as_deref() == Some(agent))
            {
                return Some(p.id.clone());
            }
        }
        self.preferred_pipeline.clone()
    }

    pub fn get(&self, id: &str) -> Option<&Pipeline> {
        self.pipelines.iter().find(|p| p.id == id)
    }
}
