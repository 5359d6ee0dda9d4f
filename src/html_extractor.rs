use std::collections::HashMap;

use scraper::{Html, Selector};

use crate::transport::FetchResponse;

/// A fetched document plus its parsed signals, handed to every matcher of a cascade.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfilePage {
    pub url: String,
    pub body: String,
    pub signals: PageSignals,
}

impl ProfilePage {
    pub fn parse(url: impl Into<String>, body: impl Into<String>) -> Self {
        let body = body.into();
        let signals = PageSignals::from_html(&body);
        Self {
            url: url.into(),
            body,
            signals,
        }
    }
}

impl From<FetchResponse> for ProfilePage {
    fn from(resp: FetchResponse) -> Self {
        ProfilePage::parse(resp.url, resp.body)
    }
}

/// Owned view of the parts of a profile page the cascades look at.
///
/// `scraper::Html` is not `Send`, so documents are parsed and dropped inside
/// [`PageSignals::from_html`] and only plain strings cross await points.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageSignals {
    /// Keyed by `property`, `name` or `itemprop`, first occurrence wins.
    pub meta: HashMap<String, String>,
    /// Script bodies keyed by element id.
    pub scripts: HashMap<String, String>,
    /// `(id, src)` for every iframe carrying a `src`.
    pub iframes: Vec<(Option<String>, String)>,
    pub has_login_form: bool,
}

impl PageSignals {
    pub fn from_html(html: &str) -> Self {
        let document = Html::parse_document(html);
        Self {
            meta: extract_meta(&document),
            scripts: extract_scripts(&document),
            iframes: extract_iframes(&document),
            has_login_form: detect_login_form(&document),
        }
    }

    pub fn meta_content(&self, key: &str) -> Option<&str> {
        self.meta.get(key).map(String::as_str)
    }

    pub fn script_by_id(&self, id: &str) -> Option<&str> {
        self.scripts.get(id).map(String::as_str)
    }

    pub fn iframe_src(&self, id: &str) -> Option<&str> {
        self.iframes
            .iter()
            .find(|(iframe_id, _)| iframe_id.as_deref() == Some(id))
            .map(|(_, src)| src.as_str())
    }
}

fn extract_meta(document: &Html) -> HashMap<String, String> {
    let mut meta = HashMap::new();
    let Ok(meta_sel) = Selector::parse("meta") else {
        return meta;
    };

    for element in document.select(&meta_sel) {
        let value = element.value();
        let key = value
            .attr("property")
            .or_else(|| value.attr("name"))
            .or_else(|| value.attr("itemprop"))
            .unwrap_or("");
        let content = value.attr("content").unwrap_or("");
        if key.is_empty() || content.is_empty() {
            continue;
        }
        meta.entry(key.to_string())
            .or_insert_with(|| content.to_string());
    }
    meta
}

fn extract_scripts(document: &Html) -> HashMap<String, String> {
    let mut scripts = HashMap::new();
    let Ok(script_sel) = Selector::parse("script[id]") else {
        return scripts;
    };

    for script in document.select(&script_sel) {
        if let Some(id) = script.value().attr("id") {
            let text = script.text().collect::<String>();
            if !text.trim().is_empty() {
                scripts.insert(id.to_string(), text);
            }
        }
    }
    scripts
}

fn extract_iframes(document: &Html) -> Vec<(Option<String>, String)> {
    let Ok(iframe_sel) = Selector::parse("iframe[src]") else {
        return Vec::new();
    };

    document
        .select(&iframe_sel)
        .filter_map(|iframe| {
            let value = iframe.value();
            let src = value.attr("src")?.trim();
            if src.is_empty() {
                return None;
            }
            Some((value.attr("id").map(String::from), src.to_string()))
        })
        .collect()
}

fn detect_login_form(document: &Html) -> bool {
    let Ok(sel) = Selector::parse(
        "form#loginForm, form[action*='login'], input[name='password'], input[type='password']",
    ) else {
        return false;
    };
    document.select(&sel).next().is_some()
}
