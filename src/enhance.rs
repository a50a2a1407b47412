//! Best-effort character profile enhancement from secondary sources.
//!
//! Runs only when the scraped profile is thin. Each source is independently
//! best-effort: a failed or empty lookup logs a warning and the next source
//! still runs.

use std::collections::HashMap;

use lazy_static::lazy_static;
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::Result;
use crate::http::HttpClient;
use crate::scrape::CharacterProfile;
use crate::text::{clean_text, truncate_chars};

pub const WIKIPEDIA_BASE: &str = "https://en.wikipedia.org";
pub const QUOTES_BASE: &str = "https://quotefancy.com";
pub const CHARWIKI_BASE: &str = "https://characterprofile.fandom.com";

const DEFAULT_ENHANCE_TIMEOUT_SECS: u64 = 5;
const RICH_DESCRIPTION_CHARS: usize = 300;
const RICH_PERSONALITY_CHARS: usize = 500;
const SPEECH_STYLE_FALLBACK: &str = "No specific speech style information available";

lazy_static! {
    static ref SEARCH_RESULT: Selector =
        Selector::parse(".unified-search__result__content").unwrap();
    static ref RESULT_LINK: Selector = Selector::parse("a").unwrap();
    static ref PERSONALITY_ANCHOR: Selector = Selector::parse("#Personality").unwrap();
    static ref PROFILE_IMAGE: Selector = Selector::parse(".pi-image-thumbnail").unwrap();
    static ref LIST_ITEMS: Selector = Selector::parse("li").unwrap();
}

/// Upstream endpoints for the enhancement sources.
///
/// Overridable so integration tests can point every source at a local mock
/// server instead of the production hosts.
#[derive(Debug, Clone)]
pub struct EnhancerConfig {
    pub wikipedia_base: String,
    pub quotes_base: String,
    pub charwiki_base: String,
    pub timeout_secs: u64,
}

impl Default for EnhancerConfig {
    fn default() -> Self {
        Self {
            wikipedia_base: WIKIPEDIA_BASE.to_string(),
            quotes_base: QUOTES_BASE.to_string(),
            charwiki_base: CHARWIKI_BASE.to_string(),
            timeout_secs: DEFAULT_ENHANCE_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WikipediaResponse {
    #[serde(default)]
    query: Option<WikipediaQuery>,
}

#[derive(Debug, Deserialize)]
struct WikipediaQuery {
    #[serde(default)]
    pages: HashMap<String, WikipediaPage>,
}

#[derive(Debug, Deserialize)]
struct WikipediaPage {
    #[serde(default)]
    extract: Option<String>,
    #[serde(default)]
    thumbnail: Option<WikipediaThumbnail>,
}

#[derive(Debug, Deserialize)]
struct WikipediaThumbnail {
    source: String,
}

#[derive(Debug, Deserialize)]
struct QuoteSearchResponse {
    #[serde(default)]
    quotes: Vec<QuoteEntry>,
}

#[derive(Debug, Deserialize)]
struct QuoteEntry {
    #[serde(default)]
    content: String,
}

/// Supplement a scraped profile from secondary sources.
///
/// No-op when the profile already carries a rich description and an image.
pub async fn enhance_character_profile(config: &EnhancerConfig, profile: &mut CharacterProfile) {
    if profile.description.chars().count() >= RICH_DESCRIPTION_CHARS
        && !profile.image_url.is_empty()
    {
        return;
    }

    info!(name = %profile.display_name(), "enhancing character data");

    let client = match HttpClient::with_timeout(config.timeout_secs) {
        Ok(client) => client,
        Err(e) => {
            warn!(error = %e, "enhancement skipped: client construction failed");
            finalize(profile);
            return;
        }
    };

    if let Err(e) = enhance_from_wikipedia(config, &client, profile).await {
        warn!(error = %e, "encyclopedia enhancement failed");
    }

    if profile.speech_style.is_empty() {
        if let Err(e) = enhance_from_quotes(config, &client, profile).await {
            warn!(error = %e, "quote enhancement failed");
        }
    }

    if profile.personality.chars().count() < RICH_PERSONALITY_CHARS {
        if let Err(e) = enhance_from_character_wiki(config, &client, profile).await {
            warn!(error = %e, "character wiki enhancement failed");
        }
    }

    finalize(profile);
}

/// Backstops applied after all sources ran (or failed).
fn finalize(profile: &mut CharacterProfile) {
    if profile.speech_style.is_empty() {
        profile.speech_style = SPEECH_STYLE_FALLBACK.to_string();
    }
}

async fn enhance_from_wikipedia(
    config: &EnhancerConfig,
    client: &HttpClient,
    profile: &mut CharacterProfile,
) -> Result<()> {
    let url = Url::parse_with_params(
        &format!("{}/w/api.php", config.wikipedia_base),
        &[
            ("action", "query"),
            ("format", "json"),
            ("prop", "extracts|pageimages"),
            ("exintro", ""),
            ("explaintext", ""),
            ("titles", &profile.name),
        ],
    )?;

    let response: WikipediaResponse = client.get_json(url.as_str()).await?;
    let Some(query) = response.query else {
        return Ok(());
    };

    for page in query.pages.values() {
        let Some(ref extract) = page.extract else {
            continue;
        };

        if profile.description.chars().count() < RICH_DESCRIPTION_CHARS {
            profile.description.push_str("\n\n");
            profile.description.push_str(truncate_chars(extract, 500));
            debug!("appended encyclopedia extract to description");
        }

        if profile.image_url.is_empty() {
            if let Some(ref thumbnail) = page.thumbnail {
                profile.image_url = thumbnail.source.clone();
                info!(image_url = %profile.image_url, "added encyclopedia image");
            }
        }
    }

    Ok(())
}

async fn enhance_from_quotes(
    config: &EnhancerConfig,
    client: &HttpClient,
    profile: &mut CharacterProfile,
) -> Result<()> {
    let url = Url::parse_with_params(
        &format!("{}/api/search", config.quotes_base),
        &[("query", profile.name.as_str()), ("page", "1")],
    )?;

    let response: QuoteSearchResponse = client.get_json(url.as_str()).await?;
    if response.quotes.is_empty() {
        return Ok(());
    }

    let mut style = String::from("Character is known for quotes like:\n");
    for quote in response.quotes.iter().take(3) {
        style.push_str(&format!("- {}\n", quote.content));
    }
    profile.speech_style = style;
    info!("added quotes from quote search");

    Ok(())
}

async fn enhance_from_character_wiki(
    config: &EnhancerConfig,
    client: &HttpClient,
    profile: &mut CharacterProfile,
) -> Result<()> {
    let search_url = Url::parse_with_params(
        &format!("{}/wiki/Special:Search", config.charwiki_base),
        &[("query", profile.name.as_str())],
    )?;

    let search_html = client.get_text(search_url.as_str()).await?;
    let Some(result_url) = first_search_result(&search_html) else {
        return Ok(());
    };
    info!(url = %result_url, "found character profile page");

    let profile_html = client.get_text(&result_url).await?;
    apply_profile_page(&profile_html, profile);

    Ok(())
}

/// First result link of a character wiki search page, if any.
fn first_search_result(html: &str) -> Option<String> {
    let doc = Html::parse_document(html);
    let result = doc.select(&SEARCH_RESULT).next()?;
    let link = result.select(&RESULT_LINK).next()?;
    link.value().attr("href").map(|href| href.to_string())
}

fn apply_profile_page(html: &str, profile: &mut CharacterProfile) {
    let doc = Html::parse_document(html);

    if let Some(anchor) = doc.select(&PERSONALITY_ANCHOR).next() {
        let heading = resolve_heading(anchor);
        let content = collect_until_h2(heading);
        if !content.is_empty() {
            profile.personality.push_str("\n\n");
            profile.personality.push_str(&content);
            info!("added personality from character wiki");
        }
    }

    if profile.image_url.is_empty() {
        if let Some(img) = doc.select(&PROFILE_IMAGE).next() {
            if let Some(src) = img.value().attr("src") {
                profile.image_url = src.to_string();
                info!(image_url = %profile.image_url, "added image from character wiki");
            }
        }
    }
}

/// The `#Personality` anchor is usually a headline span inside the heading;
/// walk up to the enclosing `h2`/`h3` so the sibling walk starts at section
/// level.
fn resolve_heading(anchor: ElementRef) -> ElementRef {
    if matches!(anchor.value().name(), "h2" | "h3") {
        return anchor;
    }
    anchor
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(|el| matches!(el.value().name(), "h2" | "h3"))
        .unwrap_or(anchor)
}

fn collect_until_h2(heading: ElementRef) -> String {
    let mut content = String::new();
    for node in heading.next_siblings() {
        let Some(el) = ElementRef::wrap(node) else {
            continue;
        };
        let tag = el.value().name();
        if tag == "h2" {
            break;
        }
        match tag {
            "p" => {
                content.push_str(&clean_text(&el.text().collect::<String>()));
                content.push('\n');
            }
            "ul" => {
                for li in el.select(&LIST_ITEMS) {
                    content.push_str("- ");
                    content.push_str(&clean_text(&li.text().collect::<String>()));
                    content.push('\n');
                }
            }
            _ => {}
        }
    }
    content
}
