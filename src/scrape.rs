//! Character profile scraping from wiki pages.
//!
//! Wiki farms differ wildly in markup, so every extraction is a sequence of
//! selector heuristics with a default when nothing matches. A failed fetch or
//! an unparseable page yields a fallback profile, never an error.

use lazy_static::lazy_static;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use url::Url;

use crate::http::HttpClient;
use crate::text::{clean_text, truncate_chars};

pub const DEFAULT_CHARACTER_NAME: &str = "Character";
pub const SCRAPE_FAILED_DESCRIPTION: &str = "Failed to load character data";

/// Headings that introduce personality-adjacent sections.
const PERSONALITY_KEYWORDS: [&str; 8] = [
    "personality",
    "character",
    "traits",
    "behavior",
    "appearance",
    "abilities",
    "skills",
    "background",
];

/// Headings that introduce speech/quote sections.
const SPEECH_KEYWORDS: [&str; 10] = [
    "speech",
    "dialogue",
    "quotes",
    "voice",
    "talking",
    "personality",
    "character",
    "traits",
    "style",
    "catchphrase",
];

lazy_static! {
    static ref NAME_SELECTORS: Vec<Selector> = [
        "h1.page-header__title",
        "h1#firstHeading",
        "h1.page-title__text",
    ]
    .iter()
    .map(|s| Selector::parse(s).unwrap())
    .collect();
    static ref CONTENT_BLOCK: Selector = Selector::parse("div.mw-parser-output").unwrap();
    static ref CONTENT_PARAGRAPHS: Selector =
        Selector::parse("div.mw-parser-output > p").unwrap();
    static ref PROSE_BLOCKS: Selector = Selector::parse("p, h2, h3").unwrap();
    static ref SECTION_HEADINGS: Selector = Selector::parse("h2, h3").unwrap();
    static ref SPEECH_HEADINGS: Selector = Selector::parse("h2, h3, h4").unwrap();
    static ref LIST_ITEMS: Selector = Selector::parse("li").unwrap();
    static ref QUOTE_SELECTORS: Vec<Selector> = [
        "blockquote",
        ".quote",
        "dl dd",
        ".poem",
        "div.quote",
        ".quote-box",
        ".citation",
        ".dialogue",
    ]
    .iter()
    .map(|s| Selector::parse(s).unwrap())
    .collect();
    static ref IMAGE_SOURCES: Vec<(Selector, &'static str)> = [
        (".pi-image-thumbnail", "src"),
        (".mw-parser-output img", "src"),
        ("meta[property=\"og:image\"]", "content"),
        ("meta[name=\"twitter:image\"]", "content"),
        (".image img", "src"),
        (".thumbimage", "src"),
        (".character-image img", "src"),
        (".infobox-image img", "src"),
    ]
    .iter()
    .map(|(s, a)| (Selector::parse(s).unwrap(), *a))
    .collect();
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CharacterProfile {
    pub name: String,
    pub description: String,
    pub personality: String,
    pub speech_style: String,
    pub image_url: String,
    pub source_url: String,
}

impl CharacterProfile {
    /// Profile substituted when the wiki page cannot be fetched or parsed.
    pub fn fallback(source_url: &str) -> Self {
        Self {
            name: DEFAULT_CHARACTER_NAME.to_string(),
            description: SCRAPE_FAILED_DESCRIPTION.to_string(),
            source_url: source_url.to_string(),
            ..Self::default()
        }
    }

    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            DEFAULT_CHARACTER_NAME
        } else {
            &self.name
        }
    }
}

/// Fetch a wiki page and extract a character profile from it.
pub async fn scrape_character(client: &HttpClient, url: &str) -> CharacterProfile {
    info!(url, "scraping character data");

    match client.get_text(url).await {
        Ok(html) => {
            let profile = parse_character_profile(&html, url);
            info!(
                name = %profile.name,
                description_len = profile.description.chars().count(),
                has_image = !profile.image_url.is_empty(),
                "character scraped"
            );
            profile
        }
        Err(e) => {
            warn!(error = %e, url, "scrape failed, using fallback profile");
            CharacterProfile::fallback(url)
        }
    }
}

/// Extract a character profile from raw page HTML.
pub fn parse_character_profile(html: &str, url: &str) -> CharacterProfile {
    let doc = Html::parse_document(html);

    let name = extract_name(&doc);
    let description = extract_description(&doc);

    let mut personality = extract_personality(&doc);
    if personality.is_empty() && !description.is_empty() {
        personality = truncate_chars(&description, 1000).to_string();
    }

    let speech_style = extract_speech_style(&doc);
    let image_url = extract_image_url(&doc, url).unwrap_or_default();

    CharacterProfile {
        name,
        description,
        personality,
        speech_style,
        image_url,
        source_url: url.to_string(),
    }
}

fn element_text(el: ElementRef) -> String {
    el.text().collect::<String>()
}

fn extract_name(doc: &Html) -> String {
    for selector in NAME_SELECTORS.iter() {
        if let Some(el) = doc.select(selector).next() {
            let name = element_text(el).trim().to_string();
            if !name.is_empty() {
                return name;
            }
        }
    }
    DEFAULT_CHARACTER_NAME.to_string()
}

fn extract_description(doc: &Html) -> String {
    let mut valid_paragraphs = Vec::new();
    for p in doc.select(&CONTENT_PARAGRAPHS) {
        let text = clean_text(&element_text(p));
        if text.chars().count() >= 50 {
            valid_paragraphs.push(text);
        }
        if valid_paragraphs.len() >= 3 {
            break;
        }
    }
    let mut description = valid_paragraphs.join("\n");

    // Thin lead sections: look for the first long prose run between headings.
    if description.chars().count() < 100 {
        if let Some(content) = doc.select(&CONTENT_BLOCK).next() {
            let mut current_section = String::new();
            for el in content.select(&PROSE_BLOCKS) {
                if el.value().name() == "p" {
                    current_section.push_str(&clean_text(&element_text(el)));
                    current_section.push('\n');
                } else {
                    if current_section.chars().count() > 100 {
                        description = current_section;
                        break;
                    }
                    current_section.clear();
                }
            }
        }
    }

    description
}

/// Collect `<p>`/`<ul>` sibling content following `heading`, stopping at the
/// next heading in `stop_tags`.
fn collect_section(heading: ElementRef, stop_tags: &[&str]) -> String {
    let mut content = String::new();
    for node in heading.next_siblings() {
        let Some(el) = ElementRef::wrap(node) else {
            continue;
        };
        let tag = el.value().name();
        if stop_tags.contains(&tag) {
            break;
        }
        match tag {
            "p" => {
                content.push_str(&clean_text(&element_text(el)));
                content.push('\n');
            }
            "ul" => {
                for li in el.select(&LIST_ITEMS) {
                    content.push_str("- ");
                    content.push_str(&clean_text(&element_text(li)));
                    content.push('\n');
                }
            }
            _ => {}
        }
    }
    content
}

fn extract_personality(doc: &Html) -> String {
    let mut personality = String::new();

    for heading in doc.select(&SECTION_HEADINGS) {
        let heading_text = element_text(heading);
        let lower = heading_text.to_lowercase();
        if PERSONALITY_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
            let content = collect_section(heading, &["h2", "h3"]);
            if !content.is_empty() {
                personality.push_str(&format!("## {}\n{}\n", heading_text.trim(), content));
            }
        }
    }

    personality.trim().to_string()
}

fn extract_speech_style(doc: &Html) -> String {
    // Direct quotes beat heading-based extraction when present.
    let mut quotes = Vec::new();
    for selector in QUOTE_SELECTORS.iter() {
        for el in doc.select(selector) {
            let text = clean_text(&element_text(el));
            let len = text.chars().count();
            if len > 10 && len < 500 {
                quotes.push(text);
            }
        }
    }

    if !quotes.is_empty() {
        let mut style = String::from("Character is known to say things like:\n");
        style.push_str(
            &quotes
                .iter()
                .take(3)
                .map(|q| format!("- {}", q))
                .collect::<Vec<_>>()
                .join("\n"),
        );
        return style;
    }

    for heading in doc.select(&SPEECH_HEADINGS) {
        let lower = element_text(heading).to_lowercase();
        if SPEECH_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
            let content = collect_section(heading, &["h2", "h3", "h4"]);
            if !content.is_empty() {
                return truncate_chars(&content, 1000).to_string();
            }
        }
    }

    String::new()
}

fn extract_image_url(doc: &Html, base_url: &str) -> Option<String> {
    for (selector, attr) in IMAGE_SOURCES.iter() {
        if let Some(el) = doc.select(selector).next() {
            if let Some(raw) = el.value().attr(attr) {
                return Some(normalize_image_url(raw, base_url));
            }
        }
    }
    None
}

fn normalize_image_url(raw: &str, base_url: &str) -> String {
    if raw.starts_with("//") {
        format!("https:{}", raw)
    } else if raw.starts_with('/') {
        match Url::parse(base_url).and_then(|base| base.join(raw)) {
            Ok(joined) => joined.to_string(),
            Err(_) => raw.to_string(),
        }
    } else {
        raw.to_string()
    }
}
