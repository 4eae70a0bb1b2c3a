use std::io::Cursor;

use anyhow::{bail, Context, Result};
use image::{ImageFormat, Rgb, RgbImage};
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::backend::{
    ContentPart, Credential, JobHandle, MediaBytes, MediaKind, MediaRequest, ModelBackend,
    TextRequest,
};

const DRYRUN_MEDIA_SCHEME: &str = "dryrun://media/";
const DRYRUN_IMAGE_SIZE: u32 = 256;

/// Offline backend with deterministic output. Needs no API key.
#[derive(Debug, Default, Clone)]
pub struct DryrunBackend;

impl DryrunBackend {
    pub fn new() -> Self {
        Self
    }

    fn refine(request: &TextRequest) -> String {
        let images = request.parts.iter().filter(|part| part.is_image()).count();
        let text = request
            .parts
            .iter()
            .filter_map(ContentPart::as_text)
            .collect::<Vec<&str>>()
            .join(" ");
        let subject = if text.trim().is_empty() {
            "untitled subject".to_string()
        } else {
            text.trim().to_string()
        };
        format!(
            "### ANALYSIS\n- references: {images}\n- grounding: {}\n\n### FORMULA\n[subject], [style], [lighting]\n\n### FINAL PROMPT\n{subject}, highly detailed, cohesive lighting, sharp focus",
            request.grounding
        )
    }

    fn diagnostic(request: &TextRequest) -> String {
        let text_len: usize = request
            .parts
            .iter()
            .filter_map(ContentPart::as_text)
            .map(str::len)
            .sum();
        let score = 40 + (text_len % 50);
        json!({
            "score": score,
            "potential": if score >= 70 { "High" } else { "Medium" },
            "target_sectors": ["Advertising", "Social media"],
            "monetization": ["Stock licensing", "Client commissions"],
            "risk_factors": ["Offline estimate"],
            "summary": "Dryrun assessment; no model was called.",
        })
        .to_string()
    }

    fn render_png(prompt: &str) -> Result<Vec<u8>> {
        let (r, g, b) = color_from_prompt(prompt);
        let mut image = RgbImage::new(DRYRUN_IMAGE_SIZE, DRYRUN_IMAGE_SIZE);
        for pixel in image.pixels_mut() {
            *pixel = Rgb([r, g, b]);
        }
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .context("failed encoding dryrun image")?;
        Ok(bytes)
    }
}

impl ModelBackend for DryrunBackend {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn generate_text(&self, request: &TextRequest, _credential: &Credential) -> Result<String> {
        if request.response_schema.is_some() {
            return Ok(Self::diagnostic(request));
        }
        Ok(Self::refine(request))
    }

    fn generate_image(&self, request: &MediaRequest, _credential: &Credential) -> Result<MediaBytes> {
        Ok(MediaBytes {
            bytes: Self::render_png(&request.prompt)?,
            mime_type: Some("image/png".to_string()),
        })
    }

    fn submit_video(&self, request: &MediaRequest, _credential: &Credential) -> Result<JobHandle> {
        if request.kind != MediaKind::Video {
            bail!("submit_video called with a {} request", request.kind.as_str());
        }
        Ok(JobHandle::pending(format!(
            "dryrun/operations/{}",
            short_id(&request.prompt)
        )))
    }

    fn poll_operation(&self, job: &JobHandle, _credential: &Credential) -> Result<JobHandle> {
        let id = job.name.rsplit('/').next().unwrap_or_default();
        Ok(JobHandle {
            name: job.name.clone(),
            done: true,
            result_uri: Some(format!("{DRYRUN_MEDIA_SCHEME}{id}.mp4")),
            error: None,
        })
    }

    fn fetch_media(&self, uri: &str, _credential: &Credential) -> Result<MediaBytes> {
        let Some(id) = uri.strip_prefix(DRYRUN_MEDIA_SCHEME) else {
            bail!("dryrun backend cannot fetch {uri}");
        };
        let mut bytes = b"\x00\x00\x00\x18ftypmp42\x00\x00\x00\x00mp42isom".to_vec();
        bytes.extend_from_slice(id.as_bytes());
        Ok(MediaBytes {
            bytes,
            mime_type: Some("video/mp4".to_string()),
        })
    }

    fn host_key_selection(&self) -> bool {
        true
    }
}

fn color_from_prompt(prompt: &str) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    let digest = hasher.finalize();
    (digest[0], digest[1], digest[2])
}

fn short_id(prompt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hex::encode(&hasher.finalize()[..4])
}
