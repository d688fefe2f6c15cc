//! HTTP handler for the captive portal: routing, the two pages, and the `/configure` form.

#![allow(clippy::future_not_send, reason = "single-threaded")]

use embedded_io_async::{Read, Write};
use heapless::String;

use super::http::{
    ContentType, HttpRequest, MAX_BODY_LEN, RequestReader, ResponseHead, Status, write_all,
    write_response,
};
use super::{PortalSession, WifiAuto};
use crate::credential_store::{NetworkName, ProfileStorage, Secret};
use crate::radio::{Radio, ScanResults, dedup_names};
use crate::{Error, Result};

const NAME_KEY: &str = "id=";
const SECRET_KEY: &str = "&password=";
const SUCCESS_PATH: &str = "/success";
const OPTION_BUFFER_LEN: usize = 512;

const MISSING_LENGTH_BODY: &str = "Missing Content-Length";
const INVALID_DATA_BODY: &str = "Invalid data!";
const JOIN_FAILED_BODY: &str = "Failed to connect to the network. Please try again.";
const SERVER_ERROR_BODY: &str = "Error processing request.";
const BAD_REQUEST_BODY: &str = "Bad request";

/// The three things the portal serves, chosen by prefix match on the request line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Route {
    /// `POST /configure`: test and store submitted credentials.
    Configure,
    /// `GET /success`: confirmation page, then the portal closes.
    Success,
    /// Anything else: the network selection form.
    Selection,
}

impl Route {
    /// Route a raw request line such as `GET /generate_204 HTTP/1.1`.
    #[must_use]
    pub fn from_request_line(request_line: &str) -> Self {
        if request_line.starts_with("POST /configure") {
            Self::Configure
        } else if request_line.starts_with("GET /success") {
            Self::Success
        } else {
            Self::Selection
        }
    }
}

/// Pull the network name and secret out of a form body.
///
/// Finds the first `id=` whose value (the run of characters up to the next `&`) is
/// directly followed by `&password=`. The secret is everything after that, up to the
/// first newline. Nothing is percent-decoded. The portal form's `ssid=` field matches
/// because it ends in `id=`.
#[must_use]
pub fn extract_credentials(body: &str) -> Option<(&str, &str)> {
    let mut search_from = 0;
    while let Some(offset) = body.get(search_from..)?.find(NAME_KEY) {
        let key_at = search_from + offset;
        let rest = &body[key_at + NAME_KEY.len()..];
        let value_len = rest.find('&').unwrap_or(rest.len());
        if let Some(secret) = rest[value_len..].strip_prefix(SECRET_KEY) {
            let secret = secret.split('\n').next().unwrap_or_default();
            return Some((&rest[..value_len], secret));
        }
        search_from = key_at + 1;
    }
    None
}

/// Append `value` to `out` with HTML special characters escaped.
pub fn escape_html<const N: usize>(out: &mut String<N>, value: &str) -> Result<()> {
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;")?,
            '<' => out.push_str("&lt;")?,
            '>' => out.push_str("&gt;")?,
            '"' => out.push_str("&quot;")?,
            '\'' => out.push_str("&#39;")?,
            _ => out.push(ch)?,
        }
    }
    Ok(())
}

type Reply = (ResponseHead<'static>, &'static str);

const fn text_reply(status: Status, body: &'static str) -> Reply {
    (
        ResponseHead::new(status).with_content_type(ContentType::TextPlain),
        body,
    )
}

impl<R: Radio, S: ProfileStorage> WifiAuto<R, S> {
    /// Serve one request on `conn`. The caller closes the connection afterwards.
    ///
    /// Malformed requests are answered, never propagated. An error return means the
    /// client went away or the connection failed mid-response.
    pub(super) async fn handle_connection<C: Read + Write>(
        &self,
        conn: &mut C,
        session: &PortalSession,
    ) -> Result<()> {
        let mut reader = RequestReader::new(conn);
        let request = match HttpRequest::read_head(&mut reader).await {
            Ok(request) => request,
            Err(Error::RequestTooLarge | Error::MalformedRequest) => {
                let (head, body) = text_reply(Status::BadRequest, BAD_REQUEST_BODY);
                return write_response(reader.connection(), &head, body).await;
            }
            Err(err) => return Err(err),
        };
        info!("HTTP: {}", request.request_line());

        match Route::from_request_line(request.request_line()) {
            Route::Configure => {
                let (head, body) = match self.configure(&mut reader, &request, session).await {
                    Ok(reply) => reply,
                    Err(err) => {
                        warn!("Error while processing POST data: {:?}", err);
                        text_reply(Status::InternalServerError, SERVER_ERROR_BODY)
                    }
                };
                write_response(reader.connection(), &head, body).await
            }
            Route::Success => {
                let head = ResponseHead::new(Status::Ok).with_content_type(ContentType::TextHtml);
                write_response(reader.connection(), &head, SUCCESS_PAGE).await?;
                session.request_close();
                Ok(())
            }
            Route::Selection => self.write_selection_page(reader.connection()).await,
        }
    }

    /// `POST /configure`. `Err` becomes a 500 in the caller.
    async fn configure<C: Read>(
        &self,
        reader: &mut RequestReader<'_, C>,
        request: &HttpRequest,
        session: &PortalSession,
    ) -> Result<Reply> {
        let length = match request.content_length() {
            Ok(Some(length)) => length,
            Ok(None) => {
                info!("No Content-Length header found");
                return Ok(text_reply(Status::BadRequest, MISSING_LENGTH_BODY));
            }
            Err(_) => return Ok(text_reply(Status::BadRequest, INVALID_DATA_BODY)),
        };
        if length > MAX_BODY_LEN {
            warn!("Rejecting {}-byte form body", length);
            return Ok(text_reply(Status::BadRequest, INVALID_DATA_BODY));
        }

        let mut buffer = [0u8; MAX_BODY_LEN];
        let body = &mut buffer[..length];
        reader.read_exact(body).await?;
        let body = core::str::from_utf8(body).map_err(|_| Error::MalformedRequest)?;

        let Some((name, secret)) = extract_credentials(body) else {
            return Ok(text_reply(Status::BadRequest, INVALID_DATA_BODY));
        };
        let (Ok(name), Ok(secret)) = (NetworkName::try_from(name), Secret::try_from(secret)) else {
            return Ok(text_reply(Status::BadRequest, INVALID_DATA_BODY));
        };

        if !self.attempt_one(&name, &secret).await {
            info!("Failed to connect to {}", name.as_str());
            return Ok(text_reply(Status::Ok, JOIN_FAILED_BODY));
        }

        info!("Successfully connected to {}", name.as_str());
        self.store.lock().await.add(&name, &secret)?;
        session.mark_connected();
        Ok((
            ResponseHead::new(Status::Found).with_location(SUCCESS_PATH),
            "",
        ))
    }

    async fn write_selection_page<C: Write>(&self, conn: &mut C) -> Result<()> {
        let mut networks = match self.radio.lock().await.scan().await {
            Ok(networks) => networks,
            Err(err) => {
                warn!("WiFi scan failed: {:?}", err);
                ScanResults::new()
            }
        };
        dedup_names(&mut networks);
        info!("Portal listing {} network(s)", networks.len());

        let head = ResponseHead::new(Status::Ok).with_content_type(ContentType::TextHtml);
        write_response(conn, &head, SELECTION_PAGE_HEAD).await?;
        for name in &networks {
            let mut option = String::<OPTION_BUFFER_LEN>::new();
            option.push_str("<option value=\"")?;
            escape_html(&mut option, name)?;
            option.push_str("\">")?;
            escape_html(&mut option, name)?;
            option.push_str("</option>\n")?;
            write_all(conn, option.as_bytes()).await?;
        }
        write_all(conn, SELECTION_PAGE_TAIL.as_bytes()).await
    }
}

const SELECTION_PAGE_HEAD: &str = "\
<!DOCTYPE html>\
<html lang=\"en\">\
<head>\
    <meta charset=\"UTF-8\">\
    <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\
    <title>WiFi Setup</title>\
    <link rel=\"icon\" href=\"data:,\">\
    <style>\
        body { font-family: Arial, sans-serif; max-width: 500px; margin: 50px auto; padding: 20px; background: #f0f0f0; color: #333; }\
        h1 { font-size: 24px; text-align: center; }\
        form { background: #fff; padding: 20px; border-radius: 8px; box-shadow: 0 2px 10px rgba(0, 0, 0, 0.1); }\
        label { display: block; margin-top: 10px; }\
        select, input { width: 100%; padding: 10px; margin: 10px 0; box-sizing: border-box; font-size: 16px; }\
        button { width: 100%; padding: 12px; background-color: #4CAF50; color: white; border: none; cursor: pointer; font-size: 16px; }\
        button:hover { background-color: #45a049; }\
        button:disabled { background-color: #ccc; cursor: not-allowed; }\
    </style>\
    <script>\
        function setConnecting(busy) {\
            var button = document.getElementById('connect');\
            button.disabled = busy;\
            button.textContent = busy ? 'Connecting...' : 'Connect';\
        }\
        window.addEventListener('load', function () { setConnecting(false); });\
        window.addEventListener('pageshow', function () { setConnecting(false); });\
        window.addEventListener('popstate', function () { setConnecting(false); });\
    </script>\
</head>\
<body>\
    <h1>Configure WiFi</h1>\
    <form method=\"POST\" action=\"/configure\" onsubmit=\"setConnecting(true)\">\
        <label for=\"ssid\">WiFi Network Name (SSID):</label>\
        <select id=\"ssid\" name=\"ssid\">\n";

const SELECTION_PAGE_TAIL: &str = "\
        </select>\
        <label for=\"password\">Password:</label>\
        <input type=\"password\" id=\"password\" name=\"password\" required>\
        <button type=\"submit\" id=\"connect\">Connect</button>\
    </form>\
</body>\
</html>";

const SUCCESS_PAGE: &str = "\
<!DOCTYPE html>\
<html lang=\"en\">\
<head>\
    <meta charset=\"UTF-8\">\
    <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\
    <title>Connected</title>\
    <style>\
        body { font-family: Arial, sans-serif; max-width: 500px; margin: 50px auto; padding: 20px; text-align: center; }\
        h1 { color: #4CAF50; }\
        p { font-size: 18px; }\
    </style>\
</head>\
<body>\
    <h1>Connected!</h1>\
    <p>The device has joined your WiFi network.</p>\
    <p>This setup network is closing. You can close this page.</p>\
</body>\
</html>";
