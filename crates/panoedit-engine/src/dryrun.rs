use std::io::Cursor;

use image::{DynamicImage, ImageFormat, Rgba};
use panoedit_contracts::catalog::STATIC_EXAMPLE_PROMPTS;
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::backend::{EditReply, EditRequest, GenerativeBackend, InlineImage, SuggestionRequest};
use crate::error::BackendError;

/// Offline backend with deterministic behaviour.
///
/// Edits tint the source towards a colour hashed from the instruction. An
/// instruction ending in `?` gets a clarifying question back and the bare
/// instruction `refuse` gets an empty reply.
pub struct DryrunBackend;

impl GenerativeBackend for DryrunBackend {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn edit(&self, request: &EditRequest) -> Result<EditReply, BackendError> {
        let instruction = request.instruction.trim();
        if instruction == "refuse" {
            return Ok(EditReply::default());
        }
        if instruction.ends_with('?') {
            return Ok(EditReply {
                image: None,
                text: Some(format!(
                    "Could you be more specific about \"{}\"? Name the object and where it should go.",
                    instruction.trim_end_matches('?').trim()
                )),
            });
        }

        let source = image::load_from_memory(request.image.content()).map_err(|err| {
            BackendError::InvalidResponse(format!("dryrun could not decode the source: {err}"))
        })?;
        let tint = color_from_instruction(instruction);
        let mut tinted = source.to_rgba8();
        for pixel in tinted.pixels_mut() {
            *pixel = blend(*pixel, tint);
        }
        let mut bytes = Vec::new();
        DynamicImage::ImageRgba8(tinted)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .map_err(|err| BackendError::InvalidResponse(format!("dryrun encode failed: {err}")))?;

        Ok(EditReply {
            image: Some(InlineImage {
                bytes,
                media_type: Some("image/png".to_string()),
            }),
            text: Some(format!("Applied \"{instruction}\".")),
        })
    }

    fn suggest(&self, _request: &SuggestionRequest) -> Result<String, BackendError> {
        Ok(json!({ "prompts": STATIC_EXAMPLE_PROMPTS }).to_string())
    }
}

fn color_from_instruction(instruction: &str) -> (u8, u8, u8) {
    let digest = Sha256::digest(instruction.as_bytes());
    (digest[0], digest[1], digest[2])
}

fn blend(pixel: Rgba<u8>, (r, g, b): (u8, u8, u8)) -> Rgba<u8> {
    let mix = |base: u8, tint: u8| -> u8 { ((u16::from(base) * 3 + u16::from(tint)) / 4) as u8 };
    Rgba([mix(pixel[0], r), mix(pixel[1], g), mix(pixel[2], b), pixel[3]])
}
