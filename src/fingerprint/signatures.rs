use crate::crawler::FetchedPage;
use crate::fingerprint::TechSignal;
use crate::ScanError;
use regex::Regex;
use scraper::{Html, Selector};
use serde::Deserialize;
use std::path::Path;
use tracing::debug;

const BUILTIN_SIGNATURES: &str = include_str!("default_signatures.toml");

/// Where in a response a signature looks
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureSource {
    /// Value of the named response header (lowercase name)
    Header(String),
    /// `name=value` part of every `Set-Cookie` header
    Cookie,
    /// Raw response body
    Body,
    /// `content` of `<meta name="generator">`
    MetaGenerator,
}

#[derive(Debug, Deserialize)]
struct SignatureFile {
    #[serde(rename = "signature", default)]
    signatures: Vec<RawSignature>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum RawSource {
    Header,
    Cookie,
    Body,
    MetaGenerator,
}

#[derive(Debug, Deserialize)]
struct RawSignature {
    name: String,
    source: RawSource,
    header: Option<String>,
    pattern: String,
    /// Capture group holding the version
    version: Option<usize>,
}

#[derive(Debug, Clone)]
struct Signature {
    name: String,
    source: SignatureSource,
    regex: Regex,
    version_group: Option<usize>,
}

impl Signature {
    fn compile(raw: RawSignature) -> Result<Self, ScanError> {
        let source = match raw.source {
            RawSource::Header => {
                let header = raw.header.ok_or_else(|| {
                    ScanError::Signatures(format!(
                        "signature '{}' uses source 'header' without a header name",
                        raw.name
                    ))
                })?;
                SignatureSource::Header(header.to_ascii_lowercase())
            }
            RawSource::Cookie => SignatureSource::Cookie,
            RawSource::Body => SignatureSource::Body,
            RawSource::MetaGenerator => SignatureSource::MetaGenerator,
        };

        let regex = Regex::new(&raw.pattern).map_err(|e| {
            ScanError::Signatures(format!("signature '{}' has an invalid pattern: {}", raw.name, e))
        })?;

        if let Some(group) = raw.version {
            if group == 0 || group >= regex.captures_len() {
                return Err(ScanError::Signatures(format!(
                    "signature '{}' names version group {} but the pattern has {}",
                    raw.name,
                    group,
                    regex.captures_len() - 1
                )));
            }
        }

        Ok(Self {
            name: raw.name,
            source,
            regex,
            version_group: raw.version,
        })
    }

    fn match_text(&self, text: &str) -> Option<TechSignal> {
        let captures = self.regex.captures(text)?;
        let version = self
            .version_group
            .and_then(|group| captures.get(group))
            .map(|m| m.as_str().to_string())
            .filter(|v| !v.is_empty());
        Some(TechSignal::new(self.name.clone(), version))
    }
}

/// Compiled table of technology signatures
#[derive(Debug, Clone)]
pub struct SignatureTable {
    signatures: Vec<Signature>,
    uses_meta: bool,
}

impl SignatureTable {
    /// Returns the table compiled into the binary
    pub fn builtin() -> Result<Self, ScanError> {
        Self::from_toml_str(BUILTIN_SIGNATURES)
    }

    /// Loads a signature table from a TOML file
    pub fn load(path: &Path) -> Result<Self, ScanError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parses and compiles a TOML signature table
    pub fn from_toml_str(content: &str) -> Result<Self, ScanError> {
        let file: SignatureFile =
            toml::from_str(content).map_err(|e| ScanError::Signatures(e.to_string()))?;

        let signatures = file
            .signatures
            .into_iter()
            .map(Signature::compile)
            .collect::<Result<Vec<_>, _>>()?;

        let uses_meta = signatures
            .iter()
            .any(|s| s.source == SignatureSource::MetaGenerator);

        debug!("Compiled {} technology signatures", signatures.len());

        Ok(Self {
            signatures,
            uses_meta,
        })
    }

    /// Number of signatures in the table
    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    /// Detects technologies on a fetched page
    ///
    /// Each technology is reported at most once per page. When the same name
    /// matches both with and without a version, the versioned match wins.
    pub fn detect(&self, page: &FetchedPage) -> Vec<TechSignal> {
        let generators = if self.uses_meta {
            meta_generators(&page.body)
        } else {
            Vec::new()
        };

        let mut found: Vec<TechSignal> = Vec::new();

        for signature in &self.signatures {
            let signal = match &signature.source {
                SignatureSource::Header(name) => page
                    .headers_named(name)
                    .find_map(|value| signature.match_text(value)),
                SignatureSource::Cookie => page
                    .headers_named("set-cookie")
                    .map(|value| value.split(';').next().unwrap_or("").trim())
                    .find_map(|cookie| signature.match_text(cookie)),
                SignatureSource::Body => signature.match_text(&page.body),
                SignatureSource::MetaGenerator => generators
                    .iter()
                    .find_map(|content| signature.match_text(content)),
            };

            if let Some(signal) = signal {
                merge_signal(&mut found, signal);
            }
        }

        found
    }
}

fn merge_signal(found: &mut Vec<TechSignal>, signal: TechSignal) {
    match found.iter_mut().find(|s| s.name == signal.name) {
        Some(existing) => {
            if existing.version.is_none() {
                existing.version = signal.version;
            }
        }
        None => found.push(signal),
    }
}

fn meta_generators(body: &str) -> Vec<String> {
    let Ok(selector) = Selector::parse("meta[name][content]") else {
        return Vec::new();
    };
    let document = Html::parse_document(body);
    document
        .select(&selector)
        .filter(|el| {
            el.value()
                .attr("name")
                .is_some_and(|name| name.eq_ignore_ascii_case("generator"))
        })
        .filter_map(|el| el.value().attr("content"))
        .map(str::to_string)
        .collect()
}
