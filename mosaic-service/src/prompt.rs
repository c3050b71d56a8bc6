//! Prompt assembly.
//!
//! Merges the caller's conversation with image captions and document text
//! into the single conversation handed to the engine. The order is fixed:
//! caller messages, then one caption message per image in upload order, then
//! one message per document in upload order.

use tracing::debug;

use crate::error::{ServiceError, ServiceResult};
use crate::models::{AssembledPrompt, CanonicalImage, ChatMessage, ExtractedContent};
use crate::vision;

/// A normalized direct upload and its caption
#[derive(Debug, Clone)]
pub struct CaptionedImage {
    pub image: CanonicalImage,
    pub caption: String,
}

pub fn caption_message(filename: &str, caption: &str) -> ChatMessage {
    ChatMessage::user(format!("image caption ({}): {}", filename, caption))
}

pub fn document_message(filename: &str, text: &str) -> ChatMessage {
    ChatMessage::user(format!("file content ({}):\n{}", filename, text))
}

/// Build the outbound conversation.
///
/// At most one image is attached: the first direct upload if there is one,
/// otherwise the first decodable image embedded in a document.
pub fn assemble(
    messages: Vec<ChatMessage>,
    images: Vec<CaptionedImage>,
    documents: Vec<ExtractedContent>,
) -> ServiceResult<AssembledPrompt> {
    let mut conversation = messages;
    conversation.reserve(images.len() + documents.len());

    for captioned in &images {
        conversation.push(caption_message(&captioned.image.filename, &captioned.caption));
    }
    for document in &documents {
        conversation.push(document_message(&document.source_filename, &document.text));
    }

    if conversation.is_empty() {
        return Err(ServiceError::EmptyInput);
    }

    let attached_image = match images.into_iter().next() {
        Some(captioned) => Some(captioned.image),
        None => first_embedded_image(&documents),
    };

    debug!(
        messages = conversation.len(),
        attached_image = attached_image.as_ref().map(|i| i.filename.as_str()).unwrap_or("none"),
        "Prompt assembled"
    );

    Ok(AssembledPrompt {
        conversation,
        attached_image,
    })
}

/// Embedded images are often vector formats the decoder cannot read; those
/// are passed over rather than failing the request.
fn first_embedded_image(documents: &[ExtractedContent]) -> Option<CanonicalImage> {
    for document in documents {
        for (index, data) in document.embedded_images.iter().enumerate() {
            let name = format!("{}#image{}", document.source_filename, index + 1);
            match vision::decode_image(&name, data) {
                Ok(image) => return Some(image),
                Err(e) => debug!(image = %name, error = %e, "Skipping undecodable embedded image"),
            }
        }
    }
    None
}
