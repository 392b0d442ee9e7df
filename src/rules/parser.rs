use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use sha2::{Digest, Sha256};
use std::io::{Cursor, Read};

use super::rule::{CertificateHash, DeploymentRule, LocationPattern, RuleAction};
use super::{RuleSet, RuleSetError};

/// Entry name of the rule document inside a rule package.
pub const RULESET_ENTRY: &str = "ruleset.xml";

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

/// Parse rule package bytes into an ordered rule list.
pub fn load_rules(bytes: &[u8]) -> Result<Vec<DeploymentRule>, RuleSetError> {
    parse_package(bytes).map(|ruleset| ruleset.rules)
}

/// Parse either a zip container holding `ruleset.xml` or a bare XML document.
pub fn parse_package(bytes: &[u8]) -> Result<RuleSet, RuleSetError> {
    let document = if bytes.starts_with(ZIP_MAGIC) {
        extract_document(bytes)?
    } else {
        String::from_utf8(bytes.to_vec()).map_err(|e| RuleSetError::Xml(e.to_string()))?
    };

    let mut ruleset = parse_document(&document)?;
    ruleset.digest = Some(digest(bytes));
    Ok(ruleset)
}

/// Hex SHA-256 of the raw package, used for change detection.
pub fn digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn extract_document(bytes: &[u8]) -> Result<String, RuleSetError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| RuleSetError::Package(e.to_string()))?;

    let mut entry = match archive.by_name(RULESET_ENTRY) {
        Ok(entry) => entry,
        Err(zip::result::ZipError::FileNotFound) => {
            return Err(RuleSetError::MissingDocument(RULESET_ENTRY))
        }
        Err(e) => return Err(RuleSetError::Package(e.to_string())),
    };

    let mut document = String::new();
    entry.read_to_string(&mut document)?;
    Ok(document)
}

/// Parse a `<ruleset>` document or a bare sequence of `<rule>` elements.
pub fn parse_document(xml: &str) -> Result<RuleSet, RuleSetError> {
    let roots = read_elements(xml)?;
    if roots.is_empty() {
        return Err(RuleSetError::MissingRoot);
    }

    let mut version = None;
    let mut rules = Vec::new();

    for root in &roots {
        match root.name.as_str() {
            "ruleset" => {
                if version.is_none() {
                    version = root.attribute("version").map(str::to_string);
                }
                for child in root.children_named("rule") {
                    rules.push(parse_rule(rules.len() + 1, child)?);
                }
            }
            "rule" => rules.push(parse_rule(rules.len() + 1, root)?),
            other => return Err(RuleSetError::UnexpectedRoot(other.to_string())),
        }
    }

    if rules.is_empty() {
        return Err(RuleSetError::NoRules);
    }

    Ok(RuleSet {
        rules,
        version,
        digest: None,
    })
}

fn parse_rule(index: usize, element: &Element) -> Result<DeploymentRule, RuleSetError> {
    let invalid = |reason: String| RuleSetError::InvalidRule { index, reason };

    let action = element
        .child("action")
        .ok_or_else(|| invalid("rule has no <action>".to_string()))?;

    let permission = action
        .attribute("permission")
        .ok_or_else(|| invalid("<action> has no permission".to_string()))?;
    let action_kind = RuleAction::from_permission(permission)
        .ok_or_else(|| invalid(format!("unknown permission \"{permission}\"")))?;

    let message = action
        .child("message")
        .map(|m| m.text.trim().to_string())
        .filter(|m| !m.is_empty());

    let mut title = None;
    let mut location = None;
    let mut certificate_hash = None;

    if let Some(id) = element.child("id") {
        title = id.attribute("title").map(str::to_string);

        if let Some(raw) = id.attribute("location") {
            location = Some(LocationPattern::new(raw)?);
        }

        let mut certificates = id.children_named("certificate");
        if let Some(certificate) = certificates.next() {
            if certificates.next().is_some() {
                return Err(invalid("more than one <certificate> in <id>".to_string()));
            }

            let algorithm = certificate.attribute("algorithm").unwrap_or("SHA-256");
            if !matches!(algorithm.to_uppercase().as_str(), "SHA-256" | "SHA256") {
                return Err(invalid(format!("unsupported hash algorithm \"{algorithm}\"")));
            }

            let hash = certificate
                .attribute("hash")
                .ok_or_else(|| invalid("<certificate> has no hash".to_string()))?;
            certificate_hash = Some(CertificateHash::parse(hash).map_err(invalid)?);
        }
    }

    Ok(DeploymentRule {
        index,
        title,
        location,
        certificate_hash,
        action: action_kind,
        message,
    })
}

/// Minimal element tree; rule documents are small.
#[derive(Debug, Default)]
struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<Element>,
    text: String,
}

impl Element {
    fn from_start(start: &BytesStart<'_>) -> Result<Self, RuleSetError> {
        let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();

        let mut attributes = Vec::new();
        for attribute in start.attributes() {
            let attribute = attribute.map_err(xml_error)?;
            let key = String::from_utf8_lossy(attribute.key.local_name().as_ref()).into_owned();
            let value = attribute.unescape_value().map_err(xml_error)?.into_owned();
            attributes.push((key, value));
        }

        Ok(Element {
            name,
            attributes,
            ..Default::default()
        })
    }

    fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }
}

fn read_elements(xml: &str) -> Result<Vec<Element>, RuleSetError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Element> = Vec::new();
    let mut roots = Vec::new();

    loop {
        match reader.read_event().map_err(xml_error)? {
            Event::Start(start) => stack.push(Element::from_start(&start)?),
            Event::Empty(start) => {
                let element = Element::from_start(&start)?;
                attach(&mut stack, &mut roots, element);
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| RuleSetError::Xml("unbalanced end tag".to_string()))?;
                attach(&mut stack, &mut roots, element);
            }
            Event::Text(text) => {
                let text = text.unescape().map_err(xml_error)?;
                match stack.last_mut() {
                    Some(top) => top.text.push_str(&text),
                    None => {
                        return Err(RuleSetError::Xml(
                            "text outside of the root element".to_string(),
                        ))
                    }
                }
            }
            Event::CData(data) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(RuleSetError::Xml(format!("unclosed element <{}>", open.name)));
    }

    Ok(roots)
}

fn attach(stack: &mut [Element], roots: &mut Vec<Element>, element: Element) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None => roots.push(element),
    }
}

fn xml_error(err: impl std::fmt::Display) -> RuleSetError {
    RuleSetError::Xml(err.to_string())
}
