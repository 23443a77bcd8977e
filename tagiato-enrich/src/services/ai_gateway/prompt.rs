//! Prompt templates
//!
//! Templates use `{name}` placeholders; `{{` and `}}` render literal braces so
//! the JSON output schema can be spelled out inside a template. Unknown
//! placeholders are left verbatim.

use tagiato_common::AiOperation;

use super::AiRequest;

pub const LOCATE_TEMPLATE: &str = r#"You are a geolocation expert. Determine the EXACT GPS coordinates of the place shown.

Input:
{image_line}- Capture date: {timestamp}
{user_hint_line}

INSTRUCTIONS:
1. Use everything available to identify the specific place (building, landmark, street, park, ...).
2. If you recognise the place with certainty, return its precise coordinates (centre of the building or landmark).
3. If you are not sure, return null for gps.
4. Be conservative: null is better than wrong coordinates.

CONFIDENCE:
- "high": the specific building or landmark is unambiguous
- "medium": the kind of place and the area are clear, the exact spot is not
- "low": a guess

OUTPUT JSON:
{{
    "gps": {{"lat": float, "lng": float}} or null,
    "confidence": "high" | "medium" | "low",
    "location_name": "Name of the recognised place",
    "reasoning": "Short explanation of why the place was or was not recognised"
}}
"#;

pub const DESCRIBE_TEMPLATE: &str = r#"You write terse travel captions. Write a micro-caption for the place shown.

Input:
{image_line}{context_lines}{user_hint_line}
{nearby_descriptions_line}
CAPTION FORMAT:
1. First sentence: the EXACT NAME of the place or object.
2. Second sentence: one technical or historical hard fact about it.
3. Nothing else. No introductions, no feelings.

LIMITS:
- At most two short sentences (about 20-30 words).
- Encyclopedic, telegraphic style.

EXAMPLES:
- "Petronas Towers, Kuala Lumpur. The two-storey skybridge on the 41st floor is not fixed, so the towers can sway independently."
- "Reynisfjara beach, Iceland. The black sand formed when hot lava met the ocean and shattered."

OUTPUT JSON:
{{
"description": "Your caption..."
}}
"#;

/// Built-in template for an operation
pub fn default_template(operation: AiOperation) -> &'static str {
    match operation {
        AiOperation::Describe => DESCRIBE_TEMPLATE,
        AiOperation::Locate => LOCATE_TEMPLATE,
    }
}

/// Render the full prompt for `request`
///
/// `image_in_prompt` selects whether the image path is written into the text
/// (backends without an image flag read it from the prompt).
pub fn build_prompt(request: &AiRequest, template: Option<&str>, image_in_prompt: bool) -> String {
    let template = template.unwrap_or_else(|| default_template(request.operation));

    let image_line = match (&request.image_path, request.include_image && image_in_prompt) {
        (Some(path), true) => format!("- Analyse this image: {}\n", path.display()),
        _ => String::new(),
    };

    let user_hint_line = request
        .user_hint
        .as_deref()
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .map(|h| format!("- The user adds: {}", h))
        .unwrap_or_default();

    let timestamp = request
        .timestamp
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let vars = [
        ("image_line", image_line),
        ("timestamp", timestamp),
        ("user_hint_line", user_hint_line),
        ("context_lines", context_lines(request)),
        ("nearby_descriptions_line", nearby_block(&request.nearby_descriptions)),
    ];

    render_template(template, &vars)
}

fn context_lines(request: &AiRequest) -> String {
    let mut lines = Vec::new();
    if let Some(gps) = request.gps {
        lines.push(format!("- GPS: {}", gps));
    }
    if let Some(name) = &request.location_name {
        lines.push(format!("- Recognised place: {}", name));
    }
    if let Some(name) = &request.place_name {
        lines.push(format!("- Area (rough): {}", name));
    }
    if let Some(ts) = request.timestamp {
        lines.push(format!("- Date: {}", ts.format("%Y-%m-%d %H:%M")));
    }

    if lines.is_empty() {
        String::new()
    } else {
        lines.join("\n") + "\n"
    }
}

fn nearby_block(descriptions: &[String]) -> String {
    if descriptions.is_empty() {
        return String::new();
    }
    let listed: Vec<String> = descriptions.iter().map(|d| format!("- {}", d)).collect();
    format!(
        "EXISTING CAPTIONS NEARBY:\n{}\n\nIMPORTANT: never repeat facts from the captions above. Pick a DIFFERENT fact about the place.\n",
        listed.join("\n")
    )
}

/// Substitute `{name}` placeholders and unescape doubled braces
pub fn render_template(template: &str, vars: &[(&str, String)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(pos) = rest.find(['{', '}']) {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        if tail.starts_with("{{") || tail.starts_with("}}") {
            out.push_str(&tail[..1]);
            rest = &tail[2..];
            continue;
        }

        if tail.starts_with('{') {
            if let Some(end) = tail.find('}') {
                let name = &tail[1..end];
                if let Some((_, value)) = vars.iter().find(|(k, _)| *k == name) {
                    out.push_str(value);
                    rest = &tail[end + 1..];
                    continue;
                }
            }
        }

        out.push_str(&tail[..1]);
        rest = &tail[1..];
    }

    out.push_str(rest);
    out
}
