use crate::error::LoadError;
use crate::fingerprint::{fingerprint_image, Fingerprint};
use serde::{Deserialize, Serialize};

/// One scripted line attached to a poster.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Dialogue {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
    #[serde(alias = "line", alias = "content")]
    pub text: String,
}

/// Manifest entry as served by the remote source and the bundled assets.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub image_url: String,
    #[serde(default)]
    pub dialogues: Vec<Dialogue>,
}

/// Fingerprinted reference image. Never mutated after construction.
#[derive(Clone, Debug, PartialEq)]
pub struct ReferenceTemplate {
    pub id: String,
    pub display_name: String,
    pub description: Option<String>,
    pub fingerprint: Fingerprint,
    pub dialogues: Vec<Dialogue>,
}

impl ReferenceTemplate {
    /// Decode `image_bytes`, bound it to `max_side` and fingerprint it.
    pub fn from_record(
        record: TemplateRecord,
        image_bytes: &[u8],
        max_side: u32,
    ) -> Result<Self, LoadError> {
        let image = image::load_from_memory(image_bytes)?;
        let fingerprint = fingerprint_image(&image, max_side)
            .ok_or_else(|| LoadError::EmptyImage(record.id.clone()))?;

        Ok(Self {
            id: record.id,
            display_name: record.name,
            description: record.description,
            fingerprint,
            dialogues: record.dialogues,
        })
    }
}

/// Parse a manifest document: either a bare array or `{"posters": [...]}`.
pub fn parse_manifest(bytes: &[u8]) -> Result<Vec<TemplateRecord>, LoadError> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Manifest {
        List(Vec<TemplateRecord>),
        Wrapped { posters: Vec<TemplateRecord> },
    }

    let records = match serde_json::from_slice::<Manifest>(bytes)? {
        Manifest::List(records) => records,
        Manifest::Wrapped { posters } => posters,
    };

    Ok(records)
}
