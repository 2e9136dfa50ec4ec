#![allow(dead_code)]

use std::path::PathBuf;

use mockito::{Matcher, Mock, Server, ServerGuard};
use pmosony::SonyDevice;

pub const NICKNAME: &str = "pmosony-test";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Fixture of `tests/data`, with `{base}` replaced by the mock server URL.
pub fn fixture(name: &str, base: &str) -> String {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("data")
        .join(name);
    std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("cannot read fixture {}: {}", path.display(), e))
        .replace("{base}", base)
}

/// A device whose IRCC, DMR and application ports all point at the mock.
pub fn device_for(server: &ServerGuard) -> SonyDevice {
    let port = server.socket_address().port();
    SonyDevice::new("127.0.0.1", NICKNAME).with_ports(port, port, port)
}

pub fn serve(server: &mut ServerGuard, method: &str, path: &str, body: String) -> Mock {
    server
        .mock(method, Matcher::Regex(format!("^{}", regex_escape(path))))
        .with_status(200)
        .with_header("content-type", "text/xml; charset=\"utf-8\"")
        .with_body(body)
        .create()
}

fn regex_escape(path: &str) -> String {
    path.replace('.', "\\.").replace('?', "\\?")
}

/// Descriptors of a CERS Blu-ray player whose action list declares
/// `register_mode`.
pub fn legacy_server(register_mode: u8) -> (ServerGuard, Vec<Mock>) {
    let mut server = Server::new();
    let base = server.url();
    let action_list = fixture("actionlist.xml", &base)
        .replace("mode=\"3\"", &format!("mode=\"{}\"", register_mode));

    let mocks = vec![
        serve(&mut server, "GET", "/dmr.xml", fixture("dmr_v3.xml", &base)),
        serve(&mut server, "GET", "/Ircc.xml", fixture("ircc.xml", &base)),
        serve(&mut server, "GET", "/actionList", action_list),
        serve(
            &mut server,
            "GET",
            "/getSystemInformation",
            fixture("getSysteminformation.xml", &base),
        ),
        serve(
            &mut server,
            "GET",
            "/getRemoteCommandList",
            fixture("getRemoteCommandList.xml", &base),
        ),
        serve(&mut server, "GET", "/appslist", fixture("appsList.xml", &base)),
    ];
    (server, mocks)
}

/// Descriptors of a ScalarWebAPI TV. The supported functions answer is
/// served for any `system` call but the ones a test mocks itself.
pub fn scalar_server() -> (ServerGuard, Vec<Mock>) {
    let mut server = Server::new();
    let base = server.url();

    let mocks = vec![
        serve(&mut server, "GET", "/dmr.xml", fixture("dmr_v4.xml", &base)),
        server
            .mock("POST", "/sony/system")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "method": "getSystemSupportedFunction"
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(fixture("systemInformation.json", &base))
            .create(),
    ];
    (server, mocks)
}
