//! Static prompt and template catalogs shipped with the editor.

/// Upper bound on contextual suggestions kept from the backend.
pub const MAX_SUGGESTIONS: usize = 5;

/// Fallback suggestions shown before (or instead of) contextual ones.
pub const STATIC_EXAMPLE_PROMPTS: &[&str] = &[
    "Make the walls painted white",
    "Add a large, leafy monstera plant in the corner",
    "Change the sofa to a blue velvet mid-century modern one",
    "Turn this into a futuristic sci-fi scene",
    "Change the time to a golden hour sunset",
];

/// Fixed instruction sent alongside the image when asking for suggestions.
pub const SUGGESTION_INSTRUCTION: &str = "Analyze this 360-degree photo of a room. Suggest 5 short, creative prompts for an AI to edit this image. The prompts should describe specific changes, like adding an object, changing wall colors, or altering the mood. Focus on actionable design ideas.";

pub const REFUSAL_MESSAGE: &str =
    "The model did not return an image or a message. It may have refused the request.";

pub const VALIDATION_MESSAGE: &str = "Please ensure an image is loaded and a prompt is provided.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemplateImage {
    pub name: &'static str,
    pub url: &'static str,
}

pub const TEMPLATE_IMAGES: &[TemplateImage] = &[
    TemplateImage {
        name: "Copacabana Palace",
        url: "https://i.imgur.com/rt9lKET.jpeg",
    },
    TemplateImage {
        name: "Hotel Imperial",
        url: "https://i.imgur.com/Wj4BXsb.jpeg",
    },
    TemplateImage {
        name: "Casa Santos Dumont",
        url: "https://i.imgur.com/Ko6rpMp.jpeg",
    },
    TemplateImage {
        name: "Museu Imperial",
        url: "https://i.imgur.com/D7r3uoe.jpeg",
    },
];

pub fn static_prompts() -> Vec<String> {
    STATIC_EXAMPLE_PROMPTS
        .iter()
        .map(|prompt| (*prompt).to_string())
        .collect()
}

/// Finds a template by 1-based position or case-insensitive name.
pub fn find_template(key: &str) -> Option<&'static TemplateImage> {
    let trimmed = key.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(position) = trimmed.parse::<usize>() {
        return position
            .checked_sub(1)
            .and_then(|index| TEMPLATE_IMAGES.get(index));
    }
    let lowered = trimmed.to_ascii_lowercase();
    TEMPLATE_IMAGES
        .iter()
        .find(|template| template.name.to_ascii_lowercase() == lowered)
}
