//! Small path walker over `xmltree` documents.
//!
//! A path is an ordered list of [`Step`]s. Each step is applied to every
//! node matched by the previous one, so `Children` steps fan out over
//! repeated siblings and later steps run on each of them.
//!
//! Names carry an optional namespace URI. Matching is tolerant: the local
//! names must be equal and, when both the step and the element carry a
//! namespace, those must be equal too. Sony firmwares are not consistent
//! about declaring the UPnP default namespace, hence the tolerance.

use xmltree::{Element, XMLNode};

use crate::errors::SonyError;

pub const UPNP_DEVICE_NS: &str = "urn:schemas-upnp-org:device-1-0";
pub const SONY_AV_NS: &str = "urn:schemas-sony-com:av";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Name<'a> {
    pub ns: Option<&'a str>,
    pub local: &'a str,
}

impl<'a> Name<'a> {
    pub const fn local(local: &'a str) -> Self {
        Name { ns: None, local }
    }

    pub const fn qualified(ns: &'a str, local: &'a str) -> Self {
        Name {
            ns: Some(ns),
            local,
        }
    }

    pub fn matches(&self, element: &Element) -> bool {
        if element.name != self.local {
            return false;
        }
        match (self.ns, element.namespace.as_deref()) {
            (Some(expected), Some(actual)) => expected == actual,
            _ => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step<'a> {
    /// First direct child with that name.
    Child(Name<'a>),
    /// All direct children with that name.
    Children(Name<'a>),
    /// All elements with that name anywhere below, document order.
    Descendants(Name<'a>),
}

impl<'a> Step<'a> {
    pub const fn upnp(local: &'a str) -> Self {
        Step::Child(Name::qualified(UPNP_DEVICE_NS, local))
    }

    pub const fn upnp_all(local: &'a str) -> Self {
        Step::Children(Name::qualified(UPNP_DEVICE_NS, local))
    }

    pub const fn av(local: &'a str) -> Self {
        Step::Child(Name::qualified(SONY_AV_NS, local))
    }

    pub const fn child(local: &'a str) -> Self {
        Step::Child(Name::local(local))
    }

    pub const fn children(local: &'a str) -> Self {
        Step::Children(Name::local(local))
    }

    pub const fn descendants(local: &'a str) -> Self {
        Step::Descendants(Name::local(local))
    }

    fn apply<'e>(&self, element: &'e Element, out: &mut Vec<&'e Element>) {
        match self {
            Step::Child(name) => {
                if let Some(found) = child_elements(element).find(|e| name.matches(e)) {
                    out.push(found);
                }
            }
            Step::Children(name) => {
                out.extend(child_elements(element).filter(|e| name.matches(e)));
            }
            Step::Descendants(name) => collect_descendants(element, name, out),
        }
    }
}

pub fn parse_document(text: &str) -> Result<Element, SonyError> {
    Ok(Element::parse(text.trim_start().as_bytes())?)
}

/// Every node reached by `path`, starting below `root`.
pub fn find_all<'e>(root: &'e Element, path: &[Step<'_>]) -> Vec<&'e Element> {
    let mut current = vec![root];
    for step in path {
        let mut next = Vec::new();
        for element in current {
            step.apply(element, &mut next);
        }
        if next.is_empty() {
            return next;
        }
        current = next;
    }
    current
}

pub fn find<'e>(root: &'e Element, path: &[Step<'_>]) -> Option<&'e Element> {
    find_all(root, path).into_iter().next()
}

/// Trimmed text of the first node reached by `path`; empty text is `None`.
pub fn find_text(root: &Element, path: &[Step<'_>]) -> Option<String> {
    find(root, path).and_then(text_of)
}

pub fn text_of(element: &Element) -> Option<String> {
    element
        .get_text()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

pub fn attribute<'e>(element: &'e Element, name: &str) -> Option<&'e str> {
    element
        .attributes
        .iter()
        .find(|(k, _)| attribute_local_name(k) == name)
        .map(|(_, v)| v.as_str())
}

fn attribute_local_name(key: &str) -> &str {
    key.rsplit(':').next().unwrap_or(key)
}

pub fn child_elements(element: &Element) -> impl Iterator<Item = &Element> {
    element.children.iter().filter_map(|node| match node {
        XMLNode::Element(e) => Some(e),
        _ => None,
    })
}

fn collect_descendants<'e>(element: &'e Element, name: &Name<'_>, out: &mut Vec<&'e Element>) {
    for child in child_elements(element) {
        if name.matches(child) {
            out.push(child);
        }
        collect_descendants(child, name, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"<?xml version="1.0"?>
<root xmlns="urn:schemas-upnp-org:device-1-0" xmlns:av="urn:schemas-sony-com:av">
  <device>
    <friendlyName> Living room </friendlyName>
    <serviceList>
      <service><serviceId>urn:a</serviceId></service>
      <service><serviceId>urn:b</serviceId></service>
    </serviceList>
    <av:X_UNR_DeviceInfo>
      <av:X_CERS_ActionList_URL>http://10.0.0.2:50002/actionList</av:X_CERS_ActionList_URL>
    </av:X_UNR_DeviceInfo>
  </device>
</root>"#;

    #[test]
    fn walks_qualified_paths() {
        let root = parse_document(DOC).unwrap();
        let url = find_text(
            &root,
            &[
                Step::upnp("device"),
                Step::av("X_UNR_DeviceInfo"),
                Step::av("X_CERS_ActionList_URL"),
            ],
        );
        assert_eq!(url.as_deref(), Some("http://10.0.0.2:50002/actionList"));
    }

    #[test]
    fn fans_out_over_repeated_siblings() {
        let root = parse_document(DOC).unwrap();
        let ids: Vec<String> = find_all(
            &root,
            &[
                Step::upnp("device"),
                Step::upnp("serviceList"),
                Step::upnp_all("service"),
                Step::upnp("serviceId"),
            ],
        )
        .into_iter()
        .filter_map(text_of)
        .collect();
        assert_eq!(ids, vec!["urn:a", "urn:b"]);
    }

    #[test]
    fn wrong_namespace_does_not_match() {
        let root = parse_document(DOC).unwrap();
        assert!(find(&root, &[Step::av("device")]).is_none());
        // unqualified steps match any namespace
        assert_eq!(
            find_text(&root, &[Step::child("device"), Step::child("friendlyName")]).as_deref(),
            Some("Living room")
        );
    }

    #[test]
    fn descendants_and_missing_nodes() {
        let root = parse_document(DOC).unwrap();
        assert_eq!(find_all(&root, &[Step::descendants("serviceId")]).len(), 2);
        assert!(find(&root, &[Step::upnp("device"), Step::upnp("iconList")]).is_none());
    }

    #[test]
    fn malformed_document_is_a_parse_error() {
        let err = parse_document("<root><unclosed></root>").unwrap_err();
        assert!(matches!(err, SonyError::Parse(_)));
    }
}
