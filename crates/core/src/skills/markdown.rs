//! Markdown helpers shared by the skill parsers.

use regex::Regex;

/// Remove a wrapping code fence (```` ```markdown ... ``` ````) if present.
pub fn strip_fences(raw: &str) -> String {
    let mut text = raw.trim();
    if text.starts_with("```") {
        text = match text.find('\n') {
            Some(newline) => &text[newline + 1..],
            None => "",
        };
    }
    if let Some(stripped) = text.strip_suffix("```") {
        text = stripped.trim_end();
    }
    text.to_string()
}

/// A `## <Label> N: <Title>` header and the text up to the next header
#[derive(Debug, Clone, PartialEq)]
pub struct NumberedBlock<'a> {
    pub number: u32,
    pub title: String,
    pub body: &'a str,
}

/// Split `markdown` on numbered level-2 headers such as `## Prompt 3: Auth`.
///
/// Headers whose number does not fit a `u32` are skipped.
pub fn numbered_blocks<'a>(markdown: &'a str, header: &Regex) -> Vec<NumberedBlock<'a>> {
    let headers: Vec<_> = header.captures_iter(markdown).collect();
    let mut blocks = Vec::with_capacity(headers.len());

    for (i, caps) in headers.iter().enumerate() {
        let (Some(whole), Some(number), Some(title)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let Ok(number) = number.as_str().parse::<u32>() else {
            continue;
        };
        let end = headers
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map(|m| m.start())
            .unwrap_or(markdown.len());

        blocks.push(NumberedBlock {
            number,
            title: title.as_str().trim().to_string(),
            body: &markdown[whole.end()..end],
        });
    }

    blocks
}
