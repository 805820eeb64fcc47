//! User turn input: text plus optional inline images.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hive_types::llm::{ChatMessage, ContentBlock, ImageSource, MessageRole};

/// Media type assumed when an image carries no `data:` prefix.
pub const DEFAULT_IMAGE_MEDIA_TYPE: &str = "image/jpeg";

/// One user message as supplied by a channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnInput {
    pub text: String,
    /// `data:<media>;base64,<payload>` URIs or bare base64 payloads.
    pub images: Vec<String>,
}

impl TurnInput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            images: Vec::new(),
        }
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.images.push(image.into());
        self
    }

    /// The user message: image blocks first, then the text block.
    ///
    /// Images whose payload is not valid base64 are skipped.
    pub fn to_message(&self) -> ChatMessage {
        let mut content: Vec<ContentBlock> = self
            .images
            .iter()
            .filter_map(|uri| match parse_image(uri) {
                Some(source) => Some(ContentBlock::Image { source }),
                None => {
                    tracing::warn!(len = uri.len(), "skipping image with invalid base64 payload");
                    None
                }
            })
            .collect();
        content.push(ContentBlock::text(self.text.clone()));
        ChatMessage::new(MessageRole::User, content)
    }
}

impl From<&str> for TurnInput {
    fn from(text: &str) -> Self {
        Self::text(text)
    }
}

impl From<String> for TurnInput {
    fn from(text: String) -> Self {
        Self::text(text)
    }
}

/// Split a data URI into media type and payload.
fn parse_image(uri: &str) -> Option<ImageSource> {
    let (media_type, data) = match uri.strip_prefix("data:") {
        Some(rest) => match rest.split_once(';') {
            Some((media, tail)) => {
                let payload = tail.split_once(',').map(|(_, p)| p).unwrap_or(tail);
                (normalize_media_type(media), payload)
            }
            None => (DEFAULT_IMAGE_MEDIA_TYPE.to_string(), uri),
        },
        None => (DEFAULT_IMAGE_MEDIA_TYPE.to_string(), uri),
    };
    STANDARD.decode(data).ok()?;
    Some(ImageSource::base64(media_type, data))
}

fn normalize_media_type(media: &str) -> String {
    let media = media.trim().to_ascii_lowercase();
    match media.as_str() {
        "" => DEFAULT_IMAGE_MEDIA_TYPE.to_string(),
        "image/jpg" => "image/jpeg".to_string(),
        _ => media,
    }
}
