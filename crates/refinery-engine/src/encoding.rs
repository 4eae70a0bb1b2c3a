use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use refinery_contracts::error::{RefineryError, RefineryResult};

use crate::backend::ContentPart;

pub const MAX_ATTACHMENTS: usize = 5;
pub const MAX_ATTACHMENT_BYTES: usize = 5 * 1024 * 1024;

/// A reference image attached to a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAttachment {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl ImageAttachment {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }

    pub fn from_path(path: &Path) -> RefineryResult<Self> {
        let name = path.display().to_string();
        let bytes = std::fs::read(path)
            .map_err(|err| RefineryError::encoding(name.clone(), err.to_string()))?;
        Ok(Self { name, bytes })
    }
}

/// Convert an attachment into an inline image part.
pub fn encode_attachment(attachment: &ImageAttachment) -> RefineryResult<ContentPart> {
    if attachment.bytes.is_empty() {
        return Err(RefineryError::encoding(&attachment.name, "file is empty"));
    }
    if attachment.bytes.len() > MAX_ATTACHMENT_BYTES {
        return Err(RefineryError::encoding(
            &attachment.name,
            format!(
                "{} bytes exceeds the {} byte limit",
                attachment.bytes.len(),
                MAX_ATTACHMENT_BYTES
            ),
        ));
    }
    Ok(ContentPart::InlineImage {
        mime_type: detect_mime(&attachment.bytes, &attachment.name).to_string(),
        data: BASE64.encode(&attachment.bytes),
    })
}

/// Encode a batch, preserving attachment order.
pub fn encode_attachments(attachments: &[ImageAttachment]) -> RefineryResult<Vec<ContentPart>> {
    if attachments.len() > MAX_ATTACHMENTS {
        return Err(RefineryError::encoding(
            format!("{} attachments", attachments.len()),
            format!("at most {MAX_ATTACHMENTS} images can be attached"),
        ));
    }
    attachments.iter().map(encode_attachment).collect()
}

pub fn detect_mime(bytes: &[u8], name: &str) -> &'static str {
    if let Ok(format) = image::guess_format(bytes) {
        return format.to_mime_type();
    }
    mime_for_name(name).unwrap_or("image/png")
}

pub fn extension_for_mime(mime: &str) -> &'static str {
    match mime.trim().to_ascii_lowercase().as_str() {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "video/mp4" => "mp4",
        "video/webm" => "webm",
        "video/quicktime" => "mov",
        _ => "png",
    }
}

fn mime_for_name(name: &str) -> Option<&'static str> {
    let ext = Path::new(name)
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use base64::Engine as _;
    use refinery_contracts::error::RefineryError;

    use super::*;

    const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

    #[test]
    fn sniffs_mime_from_bytes_before_extension() -> anyhow::Result<()> {
        let part = encode_attachment(&ImageAttachment::new("photo.jpg", PNG_SIGNATURE.to_vec()))?;
        let ContentPart::InlineImage { mime_type, data } = part else {
            panic!("expected an image part");
        };
        assert_eq!(mime_type, "image/png");
        assert_eq!(BASE64.decode(data)?, PNG_SIGNATURE.to_vec());
        Ok(())
    }

    #[test]
    fn falls_back_to_extension_then_png() {
        assert_eq!(detect_mime(b"????", "ref.webp"), "image/webp");
        assert_eq!(detect_mime(b"????", "ref.bin"), "image/png");
    }

    #[test]
    fn rejects_empty_oversized_and_too_many() {
        assert!(matches!(
            encode_attachment(&ImageAttachment::new("empty.png", Vec::new())),
            Err(RefineryError::Encoding { .. })
        ));
        assert!(matches!(
            encode_attachment(&ImageAttachment::new(
                "huge.png",
                vec![0u8; MAX_ATTACHMENT_BYTES + 1]
            )),
            Err(RefineryError::Encoding { .. })
        ));
        let six = vec![ImageAttachment::new("a.png", PNG_SIGNATURE.to_vec()); 6];
        assert!(matches!(
            encode_attachments(&six),
            Err(RefineryError::Encoding { .. })
        ));
    }

    #[test]
    fn missing_file_is_an_encoding_error() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let err = ImageAttachment::from_path(&temp.path().join("nope.png")).unwrap_err();
        assert!(matches!(err, RefineryError::Encoding { .. }));
        Ok(())
    }

    #[test]
    fn keeps_attachment_order() -> anyhow::Result<()> {
        let parts = encode_attachments(&[
            ImageAttachment::new("a.webp", b"first".to_vec()),
            ImageAttachment::new("b.gif", b"second".to_vec()),
        ])?;
        let mimes: Vec<String> = parts
            .into_iter()
            .filter_map(|part| match part {
                ContentPart::InlineImage { mime_type, .. } => Some(mime_type),
                ContentPart::Text(_) => None,
            })
            .collect();
        assert_eq!(mimes, vec!["image/webp", "image/gif"]);
        Ok(())
    }
}
