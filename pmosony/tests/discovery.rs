mod common;

use common::{NICKNAME, device_for, fixture, init_tracing, legacy_server, scalar_server, serve};
use mockito::Server;
use pmosony::{ProtocolVersion, SonyDevice, SonyError};

#[test]
fn cers_player_is_fully_discovered() -> anyhow::Result<()> {
    init_tracing();
    let (server, mocks) = legacy_server(3);
    let base = server.url();
    let mut device = device_for(&server);

    device.initialize()?;

    for mock in &mocks[..5] {
        mock.assert();
    }
    assert_eq!(device.api_version(), ProtocolVersion::Cers);
    assert_eq!(device.discovery_passes(), 1);

    assert_eq!(device.actions().len(), 10);
    for name in [
        "getText",
        "sendText",
        "getContentInformation",
        "getSystemInformation",
        "getRemoteCommandList",
        "getStatus",
        "getHistoryList",
        "getContentUrl",
        "sendContentUrl",
    ] {
        let action = device.capability(name)?;
        assert_eq!(action.url.as_deref(), Some(format!("{}/{}", base, name).as_str()));
    }

    let register = device.capability("register")?;
    assert_eq!(register.mode, Some(3));
    let register_url = register.url.as_deref().unwrap_or_default();
    assert!(register_url.starts_with(&format!("{}/register?", base)));
    assert!(register_url.contains("name=pmosony-test"));
    assert!(register_url.contains("registrationType=initial"));
    assert!(register_url.contains("deviceId=pmosony-test"));
    assert!(register_url.contains("wolSupport=true"));

    let urls = device.urls();
    assert_eq!(urls.action_list_url.as_deref(), Some(format!("{}/actionList", base).as_str()));
    assert_eq!(
        urls.control_url.as_deref(),
        Some(format!("{}/upnp/control/IRCC", base).as_str())
    );
    assert_eq!(
        urls.av_transport_url.as_deref(),
        Some(format!("{}/upnp/control/AVTransport", base).as_str())
    );
    assert_eq!(
        urls.rendering_control_url.as_deref(),
        Some(format!("{}/upnp/control/RenderingControl", base).as_str())
    );

    assert_eq!(device.mac(), Some("30-52-cb-cc-16-ee"));
    assert_eq!(device.ircc_categories(), ["AAMAABxa".to_string()]);
    assert_eq!(device.commands().len(), 48);
    assert_eq!(device.registry().command("Play")?.kind.as_deref(), Some("ircc"));
    assert_eq!(device.registry().command("Netflix")?.kind.as_deref(), Some("url"));

    // not registered yet: no application list
    assert!(device.apps().is_empty());
    Ok(())
}

#[test]
fn device_information_comes_from_ircc_descriptor() -> anyhow::Result<()> {
    let (server, _mocks) = legacy_server(3);
    let base = server.url();
    let mut device = device_for(&server);
    device.initialize()?;

    let info = device.info();
    assert_eq!(info.friendly_name.as_deref(), Some("Blu-ray Disc Player"));
    assert_eq!(info.manufacturer.as_deref(), Some("Sony Corporation"));
    assert_eq!(info.manufacturer_url.as_deref(), Some("http://www.sony.net/"));
    assert_eq!(info.model_name.as_deref(), Some("Blu-ray Disc Player"));
    assert_eq!(info.model_description, None);
    assert_eq!(info.model_number, None);
    assert_eq!(info.model_url, None);
    assert_eq!(
        info.icons,
        vec![
            format!("{}/bdp_ax3d_device_icon_large.jpg", base),
            format!("{}/bdp_ax3d_device_icon_large.png", base),
            format!("{}/bdp_ax3d_device_icon_small.jpg", base),
            format!("{}/bdp_ax3d_device_icon_small.png", base),
        ]
    );
    Ok(())
}

#[test]
fn register_mode_pins_legacy_version() -> anyhow::Result<()> {
    for (mode, version) in [
        (1, ProtocolVersion::Legacy1),
        (2, ProtocolVersion::Legacy2),
        (3, ProtocolVersion::Cers),
    ] {
        let (server, _mocks) = legacy_server(mode);
        let mut device = device_for(&server);
        device.initialize()?;
        assert_eq!(device.api_version(), version, "mode {}", mode);
        assert_eq!(device.commands().len(), 48, "mode {}", mode);

        let register_url = device.capability("register")?.url.clone().unwrap_or_default();
        assert_eq!(register_url.contains("wolSupport=true"), mode == 3);
    }
    Ok(())
}

#[test]
fn ircc_without_namespaces_is_accepted() -> anyhow::Result<()> {
    let mut server = Server::new();
    let base = server.url();
    serve(&mut server, "GET", "/dmr.xml", fixture("dmr_v3.xml", &base));
    serve(&mut server, "GET", "/Ircc.xml", fixture("ircc_no_schema.xml", &base));
    serve(&mut server, "GET", "/actionList", fixture("actionlist.xml", &base));
    serve(
        &mut server,
        "GET",
        "/getRemoteCommandList",
        fixture("getRemoteCommandList.xml", &base),
    );

    let mut device = device_for(&server);
    device.initialize()?;

    assert_eq!(device.api_version(), ProtocolVersion::Cers);
    assert_eq!(device.actions().len(), 10);
    assert_eq!(device.commands().len(), 48);
    assert_eq!(
        device.urls().control_url.as_deref(),
        Some(format!("{}/upnp/control/IRCC", base).as_str())
    );
    // unreachable system information leaves the MAC unknown
    assert_eq!(device.mac(), None);
    Ok(())
}

#[test]
fn actions_without_url_derive_it_from_the_action_list() -> anyhow::Result<()> {
    let mut server = Server::new();
    let base = server.url();
    serve(&mut server, "GET", "/dmr.xml", fixture("dmr_v3.xml", &base));
    serve(&mut server, "GET", "/Ircc.xml", fixture("ircc.xml", &base));
    serve(&mut server, "GET", "/actionList", fixture("actionlist_no_url.xml", &base));

    let mut device = device_for(&server);
    device.initialize()?;

    assert_eq!(device.actions().len(), 10);
    assert_eq!(
        device.capability("getRemoteCommandList")?.url.as_deref(),
        Some(format!("{}/actionList?action=getRemoteCommandList", base).as_str())
    );
    let register_url = device.capability("register")?.url.clone().unwrap_or_default();
    assert!(register_url.starts_with(&format!("{}/actionList?action=register&", base)));
    Ok(())
}

#[test]
fn code_only_player_uses_builtin_table() -> anyhow::Result<()> {
    let mut server = Server::new();
    let base = server.url();
    serve(&mut server, "GET", "/dmr.xml", fixture("dmr_v3.xml", &base));
    serve(&mut server, "GET", "/Ircc.xml", fixture("ircc_code_only.xml", &base));

    let mut device = device_for(&server);
    device.initialize()?;

    assert_eq!(device.api_version(), ProtocolVersion::CodeOnly);
    assert!(device.actions().is_empty());
    assert_eq!(device.ircc_categories().len(), 2);
    // the unknown category contributes nothing
    assert_eq!(device.commands().len(), 43);
    assert_eq!(
        device.registry().command("Play")?.value.as_deref(),
        Some("AAAAAwAAHFoAAAAaAw==")
    );
    Ok(())
}

#[test]
fn ircc_without_action_list_or_categories_fails() {
    let mut server = Server::new();
    let base = server.url();
    serve(&mut server, "GET", "/dmr.xml", fixture("dmr_v3.xml", &base));
    let ircc = fixture("ircc.xml", &base);
    let start = ircc.find("<av:X_IRCC_DeviceInfo").unwrap();
    let end = ircc.find("</device>").unwrap();
    let stripped = format!("{}{}", &ircc[..start], &ircc[end..]);
    serve(&mut server, "GET", "/Ircc.xml", stripped);

    let mut device = device_for(&server);
    let err = device.initialize().unwrap_err();
    assert!(matches!(err, SonyError::MissingCapability(name) if name == "X_CERS_ActionList_URL"));
}

#[test]
fn unreachable_dmr_fails_discovery() {
    let mut server = Server::new();
    server.mock("GET", "/dmr.xml").with_status(404).create();

    let mut device = device_for(&server);
    let err = device.initialize().unwrap_err();
    assert!(matches!(err, SonyError::HttpStatus { status: 404, .. }));
    assert!(!device.is_initialized());
    assert_eq!(device.discovery_passes(), 1);
}

#[test]
fn scalar_tv_synthesizes_its_capabilities() -> anyhow::Result<()> {
    init_tracing();
    let (server, mocks) = scalar_server();
    let base = server.url();
    let mut device = device_for(&server);

    device.initialize()?;
    mocks[1].assert();

    assert_eq!(device.api_version(), ProtocolVersion::ScalarWebApi);
    assert_eq!(device.urls().base_url.as_deref(), Some(format!("{}/sony/", base).as_str()));
    assert_eq!(
        device.urls().control_url.as_deref(),
        Some(format!("{}/sony/IRCC", base).as_str())
    );

    let register = device.capability("register")?;
    assert_eq!(register.mode, Some(4));
    assert_eq!(
        register.url.as_deref(),
        Some(format!("{}/sony/accessControl", base).as_str())
    );
    let commands = device.capability("getRemoteCommandList")?;
    assert_eq!(commands.url.as_deref(), Some(format!("{}/sony/system", base).as_str()));
    assert_eq!(commands.value.as_deref(), Some("getRemoteControllerInfo"));

    assert_eq!(device.mac(), Some("10:08:B1:31:81:B5"));
    // command list needs a registration first
    assert!(device.commands().is_empty());
    Ok(())
}

#[test]
fn discovery_is_idempotent() -> anyhow::Result<()> {
    let (server, _mocks) = legacy_server(3);
    let mut device = device_for(&server);

    device.initialize()?;
    let registry = device.registry().clone();
    let urls = device.urls().clone();

    device.initialize()?;
    assert_eq!(device.registry(), &registry);
    assert_eq!(device.urls(), &urls);
    assert_eq!(device.discovery_passes(), 2);
    Ok(())
}

#[test]
fn discovered_device_survives_json_round_trip() -> anyhow::Result<()> {
    let (server, _mocks) = legacy_server(3);
    let mut device = device_for(&server);
    device.initialize()?;

    let restored = SonyDevice::load_from_json(&device.save_to_json()?)?;
    assert_eq!(restored.registry(), device.registry());
    assert_eq!(restored.urls(), device.urls());
    assert_eq!(restored.info(), device.info());
    assert_eq!(restored.api_version(), ProtocolVersion::Cers);
    assert_eq!(restored.nickname(), NICKNAME);
    Ok(())
}

#[test]
fn unreachable_action_list_keeps_learned_version() -> anyhow::Result<()> {
    let (mut server, mocks) = legacy_server(3);
    let mut device = device_for(&server);
    device.initialize()?;
    let play = device.registry().command("Play")?.value.clone();

    mocks[2].remove();
    server.mock("GET", "/actionList").with_status(503).create();

    device.initialize()?;
    assert_eq!(device.discovery_passes(), 2);
    assert_eq!(device.api_version(), ProtocolVersion::Cers);
    assert_eq!(device.capability("register")?.mode, Some(3));
    // no built-in IR code leaks into the device's own table
    assert_eq!(device.registry().command("Play")?.value, play);
    assert_ne!(play.as_deref(), Some("AAAAAwAAHFoAAAAaAw=="));
    assert_eq!(device.commands().len(), 48);
    Ok(())
}
