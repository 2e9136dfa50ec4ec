//! SOAP envelopes for IRCC and the UPnP media renderer services.

use xmltree::{Element, XMLNode};

use crate::errors::SonyError;
use crate::xml_path::{child_elements, parse_document, text_of};

pub const IRCC_SERVICE: &str = "urn:schemas-sony-com:service:IRCC:1";
pub const AV_TRANSPORT_SERVICE: &str = "urn:schemas-upnp-org:service:AVTransport:1";
pub const RENDERING_CONTROL_SERVICE: &str = "urn:schemas-upnp-org:service:RenderingControl:1";

/// `SOAPACTION` header value: `"urn#Action"`, quotes included.
pub fn soap_action(service_urn: &str, action: &str) -> String {
    format!(r#""{}#{}""#, service_urn, action)
}

pub fn build_soap_request(
    service_urn: &str,
    action: &str,
    args: &[(&str, &str)],
) -> Result<String, SonyError> {
    let mut request = Element::new(&format!("u:{}", action));
    request
        .attributes
        .insert("xmlns:u".to_string(), service_urn.to_string());

    for (name, value) in args {
        let mut child = Element::new(name);
        child.children.push(XMLNode::Text((*value).to_string()));
        request.children.push(XMLNode::Element(child));
    }

    let mut body = Element::new("s:Body");
    body.children.push(XMLNode::Element(request));

    let mut envelope = Element::new("s:Envelope");
    envelope.attributes.insert(
        "xmlns:s".to_string(),
        "http://schemas.xmlsoap.org/soap/envelope/".to_string(),
    );
    envelope.attributes.insert(
        "s:encodingStyle".to_string(),
        "http://schemas.xmlsoap.org/soap/encoding/".to_string(),
    );
    envelope.children.push(XMLNode::Element(body));

    let mut buf = Vec::new();
    let config = xmltree::EmitterConfig::new()
        .write_document_declaration(true)
        .perform_indent(true)
        .indent_string("  ");
    envelope
        .write_with_config(&mut buf, config)
        .map_err(|e| SonyError::parse(format!("cannot write SOAP envelope: {}", e)))?;

    String::from_utf8(buf).map_err(|e| SonyError::parse(format!("SOAP envelope is not UTF-8: {}", e)))
}

/// `X_SendIRCC` request carrying one button code.
pub fn ircc_request(code: &str) -> Result<String, SonyError> {
    build_soap_request(IRCC_SERVICE, "X_SendIRCC", &[("IRCCCode", code)])
}

/// Text of the first element named `name` (any prefix) in a SOAP answer.
pub fn response_value(body: &str, name: &str) -> Result<Option<String>, SonyError> {
    let root = parse_document(body)?;
    Ok(find_named(&root, name).and_then(text_of))
}

fn find_named<'a>(parent: &'a Element, name: &str) -> Option<&'a Element> {
    child_elements(parent).find_map(|child| {
        if child.name == name {
            Some(child)
        } else {
            find_named(child, name)
        }
    })
}
