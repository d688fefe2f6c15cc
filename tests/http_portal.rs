//! Host-level tests for the portal's HTTP handling, driven through scripted clients.

mod common;

use common::{
    AcceptStep, ConnectionRecord, FakeDatagramSocket, FakeRadio, MemoryStorage,
    ScriptedConnection, ScriptedListener, Timeline, Transcript, fast_config, get, post_configure,
};
use embassy_futures::block_on;
use wifi_portal::WifiAuto;
use wifi_portal::credential_store::MAX_PROFILES;

type Portal = WifiAuto<FakeRadio, MemoryStorage>;

/// Serve `steps` on one worker, then close the portal with a `/success` visit. Returns
/// the records for `steps` only.
fn serve(portal: &Portal, timeline: &Timeline, transcript: &Transcript, mut steps: Vec<AcceptStep>) -> Vec<ConnectionRecord> {
    let served = steps
        .iter()
        .filter(|step| matches!(step, AcceptStep::Client(_)))
        .count();
    steps.push(get(transcript, "/success"));
    let dns = FakeDatagramSocket::new(timeline, Vec::new());
    let listener = ScriptedListener::new(timeline, steps);
    block_on(portal.run_captive_portal(dns, [listener])).unwrap();

    let records = transcript.borrow();
    assert_eq!(records.len(), served + 1, "every client is closed exactly once");
    records[..served].to_vec()
}

fn portal_with(radio: impl FnOnce(FakeRadio) -> FakeRadio, storage: MemoryStorage) -> (Portal, Timeline) {
    let timeline = Timeline::default();
    let radio = radio(FakeRadio::new(&timeline));
    (WifiAuto::new(radio, storage, fast_config()), timeline)
}

#[test]
fn configure_joins_saves_and_redirects() {
    let (portal, timeline) =
        portal_with(|radio| radio.with_network("MyNet", "secret123"), MemoryStorage::default());
    let transcript = Transcript::default();
    let records = serve(
        &portal,
        &timeline,
        &transcript,
        vec![post_configure(&transcript, "id=MyNet&password=secret123")],
    );

    assert_eq!(records[0].status_line(), "HTTP/1.0 302 Found");
    assert!(records[0].response.contains("Location: /success\r\n"));
    assert_eq!(timeline.joins(), ["MyNet"]);
    let (_radio, store) = portal.into_parts();
    assert_eq!(store.into_inner().text().as_deref(), Some("MyNet;secret123\n"));
}

#[test]
fn portal_form_field_names_are_accepted() {
    let (portal, timeline) =
        portal_with(|radio| radio.with_network("MyNet", "pw"), MemoryStorage::default());
    let transcript = Transcript::default();
    let records = serve(
        &portal,
        &timeline,
        &transcript,
        vec![post_configure(&transcript, "ssid=MyNet&password=pw")],
    );
    assert_eq!(records[0].status_line(), "HTTP/1.0 302 Found");
}

#[test]
fn body_without_password_field_is_rejected() {
    let (portal, timeline) = portal_with(|radio| radio, MemoryStorage::default());
    let transcript = Transcript::default();
    let records = serve(
        &portal,
        &timeline,
        &transcript,
        vec![post_configure(&transcript, "id=MyNet&pass=secret123")],
    );

    assert_eq!(records[0].status_line(), "HTTP/1.0 400 Bad Request");
    assert_eq!(records[0].body(), "Invalid data!");
    assert!(timeline.joins().is_empty());
}

#[test]
fn missing_content_length_is_rejected_before_reading_body() {
    let (portal, timeline) = portal_with(|radio| radio, MemoryStorage::default());
    let transcript = Transcript::default();
    let client = ScriptedConnection::new(
        &transcript,
        &[
            b"POST /configure HTTP/1.1\r\nHost: 10.0.0.1\r\n\r\n",
            b"id=MyNet&password=secret123",
        ],
    );
    let records = serve(&portal, &timeline, &transcript, vec![AcceptStep::Client(client)]);

    assert_eq!(records[0].status_line(), "HTTP/1.0 400 Bad Request");
    assert_eq!(records[0].body(), "Missing Content-Length");
    assert_eq!(records[0].unread_chunks, 1);
    assert!(timeline.joins().is_empty());
}

#[test]
fn non_numeric_content_length_is_rejected() {
    let (portal, timeline) = portal_with(|radio| radio, MemoryStorage::default());
    let transcript = Transcript::default();
    let client = ScriptedConnection::new(
        &transcript,
        &[b"POST /configure HTTP/1.1\r\nContent-Length: lots\r\n\r\nid=a&password=b"],
    );
    let records = serve(&portal, &timeline, &transcript, vec![AcceptStep::Client(client)]);
    assert_eq!(records[0].status_line(), "HTTP/1.0 400 Bad Request");
    assert_eq!(records[0].body(), "Invalid data!");
}

#[test]
fn truncated_body_is_a_server_error() {
    let (portal, timeline) = portal_with(|radio| radio, MemoryStorage::default());
    let transcript = Transcript::default();
    let client = ScriptedConnection::new(
        &transcript,
        &[b"POST /configure HTTP/1.1\r\nContent-Length: 50\r\n\r\nid=MyNet&pa"],
    );
    let records = serve(&portal, &timeline, &transcript, vec![AcceptStep::Client(client)]);
    assert_eq!(records[0].status_line(), "HTTP/1.0 500 Internal Server Error");
    assert_eq!(records[0].body(), "Error processing request.");
}

#[test]
fn failed_join_reports_and_stores_nothing() {
    let (portal, timeline) =
        portal_with(|radio| radio.with_network("MyNet", "right"), MemoryStorage::default());
    let transcript = Transcript::default();
    let records = serve(
        &portal,
        &timeline,
        &transcript,
        vec![post_configure(&transcript, "id=MyNet&password=wrong")],
    );

    assert_eq!(records[0].status_line(), "HTTP/1.0 200 OK");
    assert_eq!(
        records[0].body(),
        "Failed to connect to the network. Please try again."
    );
    let (_radio, store) = portal.into_parts();
    assert_eq!(store.into_inner().writes, 0);
}

#[test]
fn configure_against_full_store_still_saves_and_redirects() {
    let text: String = (0..MAX_PROFILES).map(|i| format!("net{i};pw\n")).collect();
    let (portal, timeline) = portal_with(
        |radio| radio.with_network("NewNet", "pw"),
        MemoryStorage::with_text(&text),
    );
    let transcript = Transcript::default();
    let steps = vec![
        post_configure(&transcript, "id=NewNet&password=pw"),
        get(&transcript, "/success"),
    ];
    let dns = FakeDatagramSocket::new(&timeline, Vec::new());
    let listener = ScriptedListener::new(&timeline, steps);
    let joined = block_on(portal.run_captive_portal(dns, [listener])).unwrap();

    assert!(joined);
    assert_eq!(transcript.borrow()[0].status_line(), "HTTP/1.0 302 Found");
    let (_radio, store) = portal.into_parts();
    let saved = store.into_inner().text().unwrap();
    assert!(saved.ends_with("NewNet;pw\n"));
    assert!(!saved.contains("net0;"));
    assert_eq!(saved.lines().count(), MAX_PROFILES);
}

#[test]
fn slow_client_sending_byte_triplets_is_handled() {
    let (portal, timeline) =
        portal_with(|radio| radio.with_network("MyNet", "secret123"), MemoryStorage::default());
    let transcript = Transcript::default();
    let request = b"POST /configure HTTP/1.1\r\nContent-Length: 27\r\n\r\nid=MyNet&password=secret123";
    let chunks: Vec<&[u8]> = request.chunks(3).collect();
    let client = ScriptedConnection::new(&transcript, &chunks);
    let records = serve(&portal, &timeline, &transcript, vec![AcceptStep::Client(client)]);
    assert_eq!(records[0].status_line(), "HTTP/1.0 302 Found");
}

#[test]
fn selection_page_lists_unique_escaped_networks() {
    let (portal, timeline) = portal_with(
        |radio| radio.with_scan(&["Home", "", "Home", "<b>&Co</b>", "Cabin"]),
        MemoryStorage::default(),
    );
    let transcript = Transcript::default();
    let records = serve(&portal, &timeline, &transcript, vec![get(&transcript, "/")]);

    let page = &records[0];
    assert_eq!(page.status_line(), "HTTP/1.0 200 OK");
    assert!(page.response.contains("Content-Type: text/html"));
    assert!(page.body().contains("<select id=\"ssid\" name=\"ssid\">"));
    assert_eq!(page.body().matches("<option value=\"Home\">Home</option>").count(), 1);
    assert!(page.body().contains("&lt;b&gt;&amp;Co&lt;/b&gt;"));
    assert!(page.body().contains("<option value=\"Cabin\">Cabin</option>"));
    assert!(!page.body().contains("<option value=\"\">"));
    assert!(page.body().contains("action=\"/configure\""));
    assert!(page.body().contains("pageshow"));
}

#[test]
fn unknown_paths_get_the_selection_page() {
    let (portal, timeline) = portal_with(|radio| radio.with_scan(&["Home"]), MemoryStorage::default());
    let transcript = Transcript::default();
    let records = serve(
        &portal,
        &timeline,
        &transcript,
        vec![get(&transcript, "/generate_204"), get(&transcript, "/hotspot-detect.html")],
    );
    for record in &records {
        assert_eq!(record.status_line(), "HTTP/1.0 200 OK");
        assert!(record.body().contains("<option value=\"Home\">Home</option>"));
    }
}

#[test]
fn success_page_confirms_connection() {
    let (portal, timeline) = portal_with(|radio| radio, MemoryStorage::default());
    let transcript = Transcript::default();
    serve(&portal, &timeline, &transcript, Vec::new());

    let records = transcript.borrow();
    assert_eq!(records[0].status_line(), "HTTP/1.0 200 OK");
    assert!(records[0].body().contains("Connected!"));
}

#[test]
fn oversized_request_line_is_rejected() {
    let (portal, timeline) = portal_with(|radio| radio, MemoryStorage::default());
    let transcript = Transcript::default();
    let request = format!("GET /{} HTTP/1.1\r\n\r\n", "a".repeat(400));
    let client = ScriptedConnection::new(&transcript, &[request.as_bytes()]);
    let records = serve(&portal, &timeline, &transcript, vec![AcceptStep::Client(client)]);
    assert_eq!(records[0].status_line(), "HTTP/1.0 400 Bad Request");
}

#[test]
fn oversized_header_is_ignored() {
    let (portal, timeline) = portal_with(|radio| radio.with_scan(&["Home"]), MemoryStorage::default());
    let transcript = Transcript::default();
    let request = format!("GET / HTTP/1.1\r\nCookie: {}\r\nHost: 10.0.0.1\r\n\r\n", "c".repeat(300));
    let client = ScriptedConnection::new(&transcript, &[request.as_bytes()]);
    let records = serve(&portal, &timeline, &transcript, vec![AcceptStep::Client(client)]);
    assert_eq!(records[0].status_line(), "HTTP/1.0 200 OK");
    assert!(records[0].body().contains("<option value=\"Home\">Home</option>"));
}

#[test]
fn client_that_disconnects_silently_gets_no_response() {
    let (portal, timeline) = portal_with(|radio| radio, MemoryStorage::default());
    let transcript = Transcript::default();
    let client = ScriptedConnection::new(&transcript, &[b"GET / HT"]);
    let records = serve(&portal, &timeline, &transcript, vec![AcceptStep::Client(client)]);
    assert_eq!(records[0].response, "");
}
