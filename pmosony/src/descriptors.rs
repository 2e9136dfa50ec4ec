//! Extraction of device facts out of the Sony descriptor documents.
//!
//! Every function here is pure: it receives the raw document and the URL it
//! was fetched from, and returns what it found. A document that does not
//! parse is a [`SonyError::Parse`]; a missing optional field is just `None`.

use quick_xml::escape::resolve_predefined_entity;
use quick_xml::{Error as XmlError, Reader, events::Event};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::errors::SonyError;
use crate::registry::{CapabilityRecord, CommandRecord};
use crate::version::{ProtocolVersion, classify};
use crate::xml_path::{
    Name, SONY_AV_NS, Step, attribute, find_all, find_text, parse_document, text_of,
};

const IRCC_SERVICE_ID: &str = "urn:schemas-sony-com:serviceId:IRCC";
const AV_TRANSPORT_SERVICE_ID: &str = "urn:upnp-org:serviceId:AVTransport";
const RENDERING_CONTROL_SERVICE_ID: &str = "urn:upnp-org:serviceId:RenderingControl";

/// Model metadata of the `<device>` element.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub friendly_name: Option<String>,
    pub manufacturer: Option<String>,
    pub manufacturer_url: Option<String>,
    pub model_description: Option<String>,
    pub model_name: Option<String>,
    pub model_number: Option<String>,
    pub model_url: Option<String>,
    /// Absolute icon URLs.
    pub icons: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IrccDescriptor {
    pub action_list_url: Option<String>,
    pub control_url: Option<String>,
    /// Base64 IR category identifiers (`X_CategoryInfo`).
    pub categories: Vec<String>,
    pub info: DeviceInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DmrDescriptor {
    pub version: ProtocolVersion,
    pub av_transport_url: Option<String>,
    pub rendering_control_url: Option<String>,
    /// ScalarWebAPI base URL, always ending with `/`.
    pub scalar_base_url: Option<String>,
}

/// `control_url` joined onto the URL of the descriptor that announced it.
/// An unparsable descriptor URL leaves `control_url` untouched.
pub fn resolve_control_url(description_url: &str, control_url: &str) -> String {
    Url::parse(description_url)
        .and_then(|base| base.join(control_url))
        .map(String::from)
        .unwrap_or_else(|err| {
            debug!(description_url, control_url, "Cannot resolve URL: {}", err);
            control_url.to_string()
        })
}

fn service_control_url(
    root: &xmltree::Element,
    description_url: &str,
    service_id_token: &str,
) -> Option<String> {
    let services = find_all(
        root,
        &[
            Step::upnp_all("device"),
            Step::upnp("serviceList"),
            Step::upnp_all("service"),
        ],
    );

    services.into_iter().find_map(|service| {
        let id = find_text(service, &[Step::upnp("serviceId")])?;
        if !id.contains(service_id_token) {
            return None;
        }
        let control = find_text(service, &[Step::upnp("controlURL")])?;
        Some(resolve_control_url(description_url, &control))
    })
}

/// IRCC descriptor (`Ircc.xml`): action list URL, IRCC control endpoint,
/// IR categories and model metadata.
pub fn parse_ircc(text: &str, ircc_url: &str) -> Result<IrccDescriptor, SonyError> {
    let root = parse_document(text)?;

    let action_list_url = find_text(
        &root,
        &[
            Step::upnp("device"),
            Step::av("X_UNR_DeviceInfo"),
            Step::av("X_CERS_ActionList_URL"),
        ],
    );

    let control_url = service_control_url(&root, ircc_url, IRCC_SERVICE_ID);
    if control_url.is_none() {
        debug!(url = ircc_url, "No IRCC service advertised");
    }

    let categories = find_all(
        &root,
        &[Step::Descendants(Name::qualified(SONY_AV_NS, "X_CategoryInfo"))],
    )
    .into_iter()
    .filter_map(text_of)
    .collect();

    Ok(IrccDescriptor {
        action_list_url,
        control_url,
        categories,
        info: parse_device_info(text, ircc_url)?,
    })
}

/// Media renderer descriptor (`dmr.xml`).
pub fn parse_dmr(text: &str, dmr_url: &str) -> Result<DmrDescriptor, SonyError> {
    let root = parse_document(text)?;
    let version = classify(&root);

    let scalar_base_url = if version == ProtocolVersion::ScalarWebApi {
        find_text(
            &root,
            &[
                Step::upnp_all("device"),
                Step::Children(Name::qualified(SONY_AV_NS, "X_ScalarWebAPI_DeviceInfo")),
                Step::av("X_ScalarWebAPI_BaseURL"),
            ],
        )
        .map(|url| normalize_base_url(&url))
    } else {
        None
    };

    Ok(DmrDescriptor {
        version,
        av_transport_url: service_control_url(&root, dmr_url, AV_TRANSPORT_SERVICE_ID),
        rendering_control_url: service_control_url(&root, dmr_url, RENDERING_CONTROL_SERVICE_ID),
        scalar_base_url,
    })
}

pub fn normalize_base_url(url: &str) -> String {
    let url = url.trim();
    if url.ends_with('/') {
        url.to_string()
    } else {
        format!("{}/", url)
    }
}

/// Action list document. Entries without `url` are reached through
/// `<action_list_url>?action=<name>`; the `register` URL gets the client
/// identity appended.
pub fn parse_action_list(
    text: &str,
    action_list_url: &str,
    nickname: &str,
    client_id: &str,
) -> Result<Vec<CapabilityRecord>, SonyError> {
    let root = parse_document(text)?;
    let mut actions = Vec::new();

    for element in find_all(&root, &[Step::children("action")]) {
        let Some(mut action) = CapabilityRecord::from_element(element) else {
            warn!(url = action_list_url, "Skipping action without name");
            continue;
        };
        if action.url.is_none() {
            action.url = Some(format!("{}?action={}", action_list_url, action.name));
        }
        if action.name == "register" {
            action.url = Some(registration_url(&action, nickname, client_id)?);
        }
        actions.push(action);
    }

    Ok(actions)
}

fn registration_url(
    action: &CapabilityRecord,
    nickname: &str,
    client_id: &str,
) -> Result<String, SonyError> {
    let base = action.url.as_deref().unwrap_or_default();
    let mut url = Url::parse(base)?;
    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("name", nickname)
            .append_pair("registrationType", "initial")
            .append_pair("deviceId", client_id);
        if action.mode == Some(3) {
            query.append_pair("wolSupport", "true");
        }
    }
    Ok(url.to_string())
}

/// Capabilities of a ScalarWebAPI device, derived from its base URL since
/// such devices publish no action list.
pub fn synthesize_scalar_capabilities(base_url: &str) -> Vec<CapabilityRecord> {
    let base = normalize_base_url(base_url);
    vec![
        CapabilityRecord::new("register")
            .with_url(format!("{}accessControl", base))
            .with_mode(4),
        CapabilityRecord::new("getRemoteCommandList")
            .with_url(format!("{}system", base))
            .with_value("getRemoteControllerInfo"),
    ]
}

pub fn scalar_control_url(base_url: &str) -> String {
    format!("{}IRCC", normalize_base_url(base_url))
}

/// MAC address of the `WOL` function of `getSystemInformation`.
pub fn parse_system_information(text: &str) -> Result<Option<String>, SonyError> {
    let root = parse_document(text)?;
    let functions = find_all(
        &root,
        &[Step::descendants("supportFunction"), Step::children("function")],
    );

    Ok(functions
        .into_iter()
        .filter(|f| attribute(f, "name") == Some("WOL"))
        .flat_map(|f| find_all(f, &[Step::children("functionItem")]))
        .find_map(|item| attribute(item, "value").map(str::to_string)))
}

/// `error` member of a JSON-RPC answer, if it is set to anything truthy.
pub fn rpc_error(response: &Value) -> Option<&Value> {
    response.get("error").filter(|e| match e {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64() != Some(0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    })
}

fn rpc_result(response: &Value, index: usize) -> Result<&Vec<Value>, SonyError> {
    if let Some(error) = rpc_error(response) {
        return Err(SonyError::parse(format!("JSON request error: {}", error)));
    }
    response
        .get("result")
        .and_then(|r| r.get(index))
        .and_then(Value::as_array)
        .ok_or_else(|| SonyError::parse(format!("JSON result[{}] is not an array", index)))
}

/// MAC address from a `getSystemSupportedFunction` answer.
pub fn parse_supported_functions(response: &Value) -> Result<Option<String>, SonyError> {
    let options = rpc_result(response, 0)?;
    Ok(options
        .iter()
        .filter(|o| o.get("option").and_then(Value::as_str) == Some("WOL"))
        .find_map(|o| o.get("value").and_then(Value::as_str).map(str::to_string)))
}

/// `<command>` entries of a legacy command list document.
pub fn parse_command_list(text: &str) -> Result<Vec<CommandRecord>, SonyError> {
    let root = parse_document(text)?;
    Ok(find_all(&root, &[Step::children("command")])
        .into_iter()
        .filter_map(CommandRecord::from_element)
        .collect())
}

/// Commands of a `getRemoteControllerInfo` answer (`result[1]`).
pub fn parse_command_list_v4(response: &Value) -> Result<Vec<CommandRecord>, SonyError> {
    let entries = rpc_result(response, 1)?;
    Ok(entries
        .iter()
        .filter_map(CommandRecord::from_json)
        .map(|mut command| {
            if command.name == "PowerOff" {
                command.name = "Power".to_string();
            }
            command
        })
        .collect())
}

/// DIAL application list: `<app><id/><name/></app>` entries.
pub fn parse_app_list(text: &str) -> Result<Vec<CapabilityRecord>, SonyError> {
    let root = parse_document(text)?;
    Ok(find_all(&root, &[Step::descendants("app")])
        .into_iter()
        .filter_map(|app| {
            let name = find_text(app, &[Step::child("name")])?;
            let id = find_text(app, &[Step::child("id")])?;
            Some(CapabilityRecord::new(name).with_identifier(id))
        })
        .collect())
}

/// Streams through the `<device>` metadata. The first value of each field
/// wins, so embedded devices never override the root device.
pub fn parse_device_info(text: &str, description_url: &str) -> Result<DeviceInfo, SonyError> {
    let mut reader = Reader::from_str(text);

    let mut info = DeviceInfo::default();
    let mut device_depth = 0usize;
    let mut in_icon = false;
    let mut current_tag: Option<String> = None;
    let mut value = String::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                value.clear();
                match name.as_str() {
                    "device" => {
                        device_depth += 1;
                        current_tag = None;
                    }
                    "icon" if device_depth > 0 => {
                        in_icon = true;
                        current_tag = None;
                    }
                    _ => {
                        current_tag = (device_depth > 0).then_some(name);
                    }
                }
            }
            Event::End(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                if let Some(tag) = current_tag.take() {
                    if tag == name {
                        store_field(&mut info, &tag, in_icon, value.trim(), description_url);
                    }
                }
                match name.as_str() {
                    "device" => device_depth = device_depth.saturating_sub(1),
                    "icon" => in_icon = false,
                    _ => {}
                }
                value.clear();
            }
            Event::Text(e) => {
                if current_tag.is_some() {
                    value.push_str(&e.decode().map_err(XmlError::Encoding)?);
                }
            }
            // `&amp;`, `&#233;` and friends come as separate events
            Event::GeneralRef(e) => {
                if current_tag.is_some() {
                    match e.resolve_char_ref()? {
                        Some(ch) => value.push(ch),
                        None => {
                            let entity = e.decode().map_err(XmlError::Encoding)?;
                            match resolve_predefined_entity(&entity) {
                                Some(resolved) => value.push_str(resolved),
                                None => {
                                    warn!(entity = %entity, "Unknown XML entity kept verbatim");
                                    value.push('&');
                                    value.push_str(&entity);
                                    value.push(';');
                                }
                            }
                        }
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(info)
}

fn store_field(info: &mut DeviceInfo, tag: &str, in_icon: bool, value: &str, description_url: &str) {
    if value.is_empty() {
        return;
    }
    let slot = match tag {
        "url" if in_icon => {
            info.icons.push(resolve_control_url(description_url, value));
            return;
        }
        "friendlyName" => &mut info.friendly_name,
        "manufacturer" => &mut info.manufacturer,
        "manufacturerURL" => &mut info.manufacturer_url,
        "modelDescription" => &mut info.model_description,
        "modelName" => &mut info.model_name,
        "modelNumber" => &mut info.model_number,
        "modelURL" => &mut info.model_url,
        _ => return,
    };
    if slot.is_none() {
        *slot = Some(value.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn control_url_resolution() {
        assert_eq!(
            resolve_control_url("http://test:50001/Ircc.xml", "/upnp/control/IRCC"),
            "http://test:50001/upnp/control/IRCC"
        );
        assert_eq!(
            resolve_control_url("http://test:50001/Ircc.xml", "upnp/control/IRCC"),
            "http://test:50001/upnp/control/IRCC"
        );
        assert_eq!(
            resolve_control_url("http://test:50001/Ircc.xml", "http://other/ctl"),
            "http://other/ctl"
        );
        assert_eq!(
            resolve_control_url("http://test:52323/dmr/desc.xml", "control/AVTransport"),
            "http://test:52323/dmr/control/AVTransport"
        );
        assert_eq!(resolve_control_url("not a url", "/ctl"), "/ctl");
    }

    #[test]
    fn register_url_carries_identity() {
        let xml = r#"<actionList>
  <action name="register" mode="3" url="http://10.0.0.2:50002/register"/>
  <action name="getStatus"/>
</actionList>"#;
        let actions =
            parse_action_list(xml, "http://10.0.0.2:50002/actionList", "my tv", "client-1")
                .unwrap();
        assert_eq!(actions.len(), 2);
        assert_eq!(
            actions[0].url.as_deref(),
            Some(
                "http://10.0.0.2:50002/register?name=my+tv&registrationType=initial&deviceId=client-1&wolSupport=true"
            )
        );
        assert_eq!(
            actions[1].url.as_deref(),
            Some("http://10.0.0.2:50002/actionList?action=getStatus")
        );
    }

    #[test]
    fn register_below_mode_three_has_no_wol_flag() {
        let xml = r#"<actionList><action name="register" mode="2" url="http://h/register"/></actionList>"#;
        let actions = parse_action_list(xml, "http://h/actionList", "tv", "tv").unwrap();
        assert_eq!(
            actions[0].url.as_deref(),
            Some("http://h/register?name=tv&registrationType=initial&deviceId=tv")
        );
    }

    #[test]
    fn scalar_capabilities_are_synthesized() {
        let actions = synthesize_scalar_capabilities("http://192.168.170.23/sony");
        assert_eq!(actions[0].name, "register");
        assert_eq!(
            actions[0].url.as_deref(),
            Some("http://192.168.170.23/sony/accessControl")
        );
        assert_eq!(actions[0].mode, Some(4));
        assert_eq!(actions[1].url.as_deref(), Some("http://192.168.170.23/sony/system"));
        assert_eq!(actions[1].value.as_deref(), Some("getRemoteControllerInfo"));
        assert_eq!(
            scalar_control_url("http://192.168.170.23/sony/"),
            "http://192.168.170.23/sony/IRCC"
        );
    }

    #[test]
    fn system_information_without_wol_is_none() {
        let xml = r#"<systemInformation><name>BDPlayer</name><supportFunction>
  <function name="Notification"><functionItem field="x" value="y"/></function>
</supportFunction></systemInformation>"#;
        assert_eq!(parse_system_information(xml).unwrap(), None);
    }

    #[test]
    fn v4_commands_rename_power_off() {
        let response = json!({
            "id": 1,
            "result": [
                {"bundled": true, "type": "IR_REMOTE_BUNDLE_TYPE_AEP_N"},
                [
                    {"name": "PowerOff", "value": "AAAAAQAAAAEAAAAvAw=="},
                    {"name": "Input", "value": "AAAAAQAAAAEAAAAlAw=="}
                ]
            ]
        });
        let commands = parse_command_list_v4(&response).unwrap();
        let names: Vec<_> = commands.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Power", "Input"]);
    }

    #[test]
    fn rpc_errors_are_reported() {
        assert!(rpc_error(&json!({"error": 402})).is_some());
        assert!(rpc_error(&json!({"error": null})).is_none());
        assert!(rpc_error(&json!({})).is_none());
        assert!(matches!(
            parse_command_list_v4(&json!({"error": [403, "Forbidden"]})),
            Err(SonyError::Parse(_))
        ));
        assert!(parse_supported_functions(&json!({"result": []})).is_err());
    }

    #[test]
    fn device_info_first_value_wins() {
        let xml = r#"<root xmlns="urn:schemas-upnp-org:device-1-0"><device>
  <friendlyName>Blu-ray Disc Player</friendlyName>
  <manufacturer>Sony Corporation</manufacturer>
  <iconList><icon><url>/icon.png</url></icon></iconList>
  <deviceList><device><friendlyName>Embedded</friendlyName></device></deviceList>
</device></root>"#;
        let info = parse_device_info(xml, "http://test:50001/Ircc.xml").unwrap();
        assert_eq!(info.friendly_name.as_deref(), Some("Blu-ray Disc Player"));
        assert_eq!(info.manufacturer.as_deref(), Some("Sony Corporation"));
        assert_eq!(info.model_number, None);
        assert_eq!(info.icons, vec!["http://test:50001/icon.png"]);
    }

    #[test]
    fn device_info_resolves_entities() {
        let xml = r#"<root><device>
  <friendlyName>Tom &amp; Jerry TV</friendlyName>
  <manufacturer>Soci&#233;t&#xE9; &lt;Sony&gt;</manufacturer>
  <modelURL>http://www.sony.net/?model=KD-55&amp;region=eu</modelURL>
</device></root>"#;
        let info = parse_device_info(xml, "http://test:50001/Ircc.xml").unwrap();
        assert_eq!(info.friendly_name.as_deref(), Some("Tom & Jerry TV"));
        assert_eq!(info.manufacturer.as_deref(), Some("Soci\u{e9}t\u{e9} <Sony>"));
        assert_eq!(
            info.model_url.as_deref(),
            Some("http://www.sony.net/?model=KD-55&region=eu")
        );
    }
}
