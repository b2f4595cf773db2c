//! Recovers the selected contact from a call page link.
use crate::view::Locale;
use serde::{Deserialize, Serialize};
use tracing::info;
use url::{form_urlencoded, Url};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedContact {
    pub name: String,
    /// Normalized number. A link without a phone (or with an empty one) gives
    /// `None` instead of a bare country code such as `+81`, so nothing can dial it.
    pub phone: Option<String>,
}

/// Fragment parameters win over the query string whenever the fragment is non-empty.
pub fn link_params(url: &Url) -> (Option<String>, Option<String>) {
    let source = match url.fragment() {
        Some(fragment) if !fragment.is_empty() => fragment,
        _ => url.query().unwrap_or_default(),
    };
    let mut name = None;
    let mut phone = None;
    for (key, value) in form_urlencoded::parse(source.as_bytes()) {
        match key.as_ref() {
            "name" if name.is_none() => name = Some(value.into_owned()),
            "phone" if phone.is_none() => phone = Some(value.into_owned()),
            _ => {}
        }
    }
    (name, phone)
}

/// A `+` sent unencoded arrives as a space; put it back, then prefix the
/// country code unless the number is already international.
pub fn normalize_phone(raw: &str, country_code: &str) -> String {
    let restored: String = raw
        .chars()
        .map(|c| if c.is_whitespace() { '+' } else { c })
        .collect();
    let trimmed = restored.trim();
    if trimmed.starts_with('+') {
        return trimmed.to_string();
    }
    let national = trimmed.strip_prefix('0').unwrap_or(trimmed);
    format!("{}{}", country_code, national)
}

pub fn resolve(url: &Url, locale: Locale, country_code: &str) -> SelectedContact {
    let (name, phone) = link_params(url);
    let name = name
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| locale.person_in_charge().to_string());
    let phone = phone
        .filter(|p| !p.trim().is_empty())
        .map(|p| normalize_phone(&p, country_code));
    info!(name, phone = ?phone, "selected contact from link");
    SelectedContact { name, phone }
}
