use std::collections::HashMap;

/// Minimal cookie jar over a request `Cookie:` header.
///
/// Format: `key=val; key2=val2`, with an optional `Cookie:` prefix.
#[derive(Debug, Clone, Default)]
pub struct CookieJar {
    cookies: HashMap<String, String>,
}

impl CookieJar {
    pub fn parse(input: &str) -> Self {
        let trimmed = input.trim();

        let cookie_str = if trimmed.to_lowercase().starts_with("cookie:") {
            trimmed[7..].trim()
        } else {
            trimmed
        };

        let mut cookies = HashMap::new();
        for pair in cookie_str.split(';') {
            let pair = pair.trim();
            if let Some(idx) = pair.find('=') {
                let name = pair[..idx].trim();
                let value = pair[idx + 1..].trim();
                if !name.is_empty() {
                    cookies.insert(name.to_string(), value.to_string());
                }
            }
        }

        Self { cookies }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(|s| s.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }
}

/// Build a `Set-Cookie` header value for a browser-session cookie.
pub fn session_set_cookie(name: &str, value: &str) -> String {
    format!("{}={}; Path=/; HttpOnly; SameSite=Lax", name, value)
}
