//! SSDP datagram parsing and M-SEARCH construction.
//!
//! SSDP messages are HTTP-like: a start line followed by `Name: value`
//! header lines and an empty line. Header names are case-insensitive, may
//! appear in any order, and unknown headers must be ignored. Some devices
//! send bare `\n` line endings, so both forms are accepted.

use crate::protocol_constants::{
    NTS_ALIVE, NTS_BYEBYE, NTS_UPDATE, SSDP_ALL, SSDP_HOST, USER_AGENT_PRODUCT,
};
use crate::registry::DeviceAnnouncement;
use crate::utils::{find_ignore_ascii_case, starts_with_ignore_ascii_case};

use super::types::ParseError;

/// The three SSDP message shapes we can receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// `NOTIFY * HTTP/1.1` multicast announcement.
    Notify,
    /// `M-SEARCH * HTTP/1.1` from another control point.
    Search,
    /// `HTTP/1.1 200 OK` unicast reply to one of our searches.
    SearchResponse,
}

/// A parsed SSDP header block borrowing from the datagram text.
#[derive(Debug)]
pub struct SsdpMessage<'a> {
    /// Which start line the message carried.
    pub kind: MessageKind,
    headers: Vec<(&'a str, &'a str)>,
}

impl<'a> SsdpMessage<'a> {
    /// Parses the start line and header block.
    ///
    /// Lines without a colon are skipped rather than rejected.
    pub fn parse(text: &'a str) -> Result<Self, ParseError> {
        let mut lines = text.split('\n').map(|l| l.trim_end_matches('\r'));

        let start = lines
            .by_ref()
            .find(|l| !l.trim().is_empty())
            .ok_or(ParseError::Empty)?
            .trim();
        let kind = classify_start_line(start)?;

        let headers = lines
            .take_while(|l| !l.trim().is_empty())
            .filter_map(|l| {
                let (name, value) = l.split_once(':')?;
                let name = name.trim();
                (!name.is_empty()).then(|| (name, value.trim()))
            })
            .collect();

        Ok(Self { kind, headers })
    }

    /// Returns the first header with the given name (ASCII case-insensitive).
    pub fn header(&self, name: &str) -> Option<&'a str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| *v)
    }

    fn required(&self, name: &'static str) -> Result<&'a str, ParseError> {
        match self.header(name) {
            Some(v) if !v.is_empty() => Ok(v),
            _ => Err(ParseError::MissingHeader(name)),
        }
    }
}

fn classify_start_line(start: &str) -> Result<MessageKind, ParseError> {
    if starts_with_ignore_ascii_case(start, "NOTIFY ") {
        return Ok(MessageKind::Notify);
    }
    if starts_with_ignore_ascii_case(start, "M-SEARCH ") {
        return Ok(MessageKind::Search);
    }
    if starts_with_ignore_ascii_case(start, "HTTP/1.") && start.split_whitespace().nth(1) == Some("200")
    {
        return Ok(MessageKind::SearchResponse);
    }
    Err(ParseError::UnknownStartLine(start.to_string()))
}

/// A device announcement extracted from a datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SsdpAnnouncement {
    /// `ssdp:alive` NOTIFY, `ssdp:update` NOTIFY, or a search response.
    Alive(DeviceAnnouncement),
    /// `ssdp:byebye` NOTIFY.
    Byebye {
        /// Device identifier derived from the USN.
        device_id: String,
        /// Full USN as received.
        usn: String,
    },
}

/// Parses a raw datagram into an announcement.
///
/// Returns `Ok(None)` for messages that are valid but of no interest:
/// searches from other control points and responses to a search target
/// other than `search_target`.
pub fn parse_datagram(
    data: &[u8],
    search_target: &str,
) -> Result<Option<SsdpAnnouncement>, ParseError> {
    let text = std::str::from_utf8(data).map_err(|_| ParseError::NotUtf8)?;
    let msg = SsdpMessage::parse(text)?;

    match msg.kind {
        MessageKind::Search => Ok(None),
        MessageKind::SearchResponse => {
            let st = msg.header("ST").unwrap_or_default();
            if !matches_search_target(search_target, st) {
                return Ok(None);
            }
            parse_alive(&msg, st).map(|a| Some(SsdpAnnouncement::Alive(a)))
        }
        MessageKind::Notify => {
            let nts = msg.required("NTS")?;
            if nts.eq_ignore_ascii_case(NTS_BYEBYE) {
                let usn = msg.required("USN")?;
                Ok(Some(SsdpAnnouncement::Byebye {
                    device_id: device_id_from_usn(usn).to_string(),
                    usn: usn.to_string(),
                }))
            } else if nts.eq_ignore_ascii_case(NTS_ALIVE) || nts.eq_ignore_ascii_case(NTS_UPDATE) {
                let nt = msg.header("NT").unwrap_or_default();
                parse_alive(&msg, nt).map(|a| Some(SsdpAnnouncement::Alive(a)))
            } else {
                Err(ParseError::UnknownNotificationType(nts.to_string()))
            }
        }
    }
}

fn parse_alive(msg: &SsdpMessage<'_>, type_token: &str) -> Result<DeviceAnnouncement, ParseError> {
    let usn = msg.required("USN")?;
    let location = msg.required("LOCATION")?;
    let max_age_secs = parse_max_age(msg.required("CACHE-CONTROL")?)?;

    let device_type = if type_token.is_empty() {
        usn.split_once("::").map(|(_, t)| t).unwrap_or_default()
    } else {
        type_token
    };

    Ok(DeviceAnnouncement {
        device_id: device_id_from_usn(usn).to_string(),
        usn: usn.to_string(),
        location: location.to_string(),
        device_type: device_type.to_string(),
        server: msg.header("SERVER").map(str::to_string),
        max_age_secs,
    })
}

/// Extracts `max-age=<seconds>` from a CACHE-CONTROL value.
///
/// Tolerates other directives and whitespace around `=`.
pub fn parse_max_age(cache_control: &str) -> Result<u64, ParseError> {
    let invalid = || ParseError::InvalidMaxAge(cache_control.to_string());

    let idx = find_ignore_ascii_case(cache_control, "max-age").ok_or_else(invalid)?;
    let rest = cache_control[idx + "max-age".len()..].trim_start();
    let rest = rest.strip_prefix('=').ok_or_else(invalid)?.trim_start();
    let end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());

    rest[..end].parse().map_err(|_| invalid())
}

/// Strips the `::<type>` suffix from a USN, leaving the device UDN.
///
/// `uuid:abc::urn:schemas-upnp-org:device:MediaServer:1` → `uuid:abc`
pub fn device_id_from_usn(usn: &str) -> &str {
    match usn.find("::") {
        Some(idx) => &usn[..idx],
        None => usn,
    }
}

fn matches_search_target(filter: &str, st: &str) -> bool {
    filter.eq_ignore_ascii_case(SSDP_ALL) || filter.eq_ignore_ascii_case(st)
}

/// Builds the M-SEARCH request.
///
/// HOST always names the multicast group, even for unicast searches.
pub fn build_msearch_message(search_target: &str, mx: u64) -> String {
    format!(
        "M-SEARCH * HTTP/1.1\r\n\
         HOST: {}\r\n\
         MAN: \"ssdp:discover\"\r\n\
         MX: {}\r\n\
         ST: {}\r\n\
         USER-AGENT: {}/{} UPnP/1.1 {}/{}\r\n\r\n",
        SSDP_HOST,
        mx,
        search_target,
        std::env::consts::OS,
        env!("CARGO_PKG_VERSION"),
        USER_AGENT_PRODUCT,
        env!("CARGO_PKG_VERSION"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const MEDIA_SERVER: &str = "urn:schemas-upnp-org:device:MediaServer:1";

    fn alive(result: Result<Option<SsdpAnnouncement>, ParseError>) -> DeviceAnnouncement {
        match result {
            Ok(Some(SsdpAnnouncement::Alive(a))) => a,
            other => panic!("expected alive announcement, got {:?}", other),
        }
    }

    #[test]
    fn test_build_msearch_message() {
        let msg = build_msearch_message(MEDIA_SERVER, 2);
        assert!(msg.starts_with("M-SEARCH * HTTP/1.1\r\n"));
        assert!(msg.contains("HOST: 239.255.255.250:1900\r\n"));
        assert!(msg.contains("MAN: \"ssdp:discover\"\r\n"));
        assert!(msg.contains("MX: 2\r\n"));
        assert!(msg.contains("ST: urn:schemas-upnp-org:device:MediaServer:1\r\n"));
        assert!(msg.ends_with("\r\n\r\n"));
    }

    #[test]
    fn parses_notify_alive() {
        let datagram = "NOTIFY * HTTP/1.1\r\n\
HOST: 239.255.255.250:1900\r\n\
CACHE-CONTROL: max-age=1800\r\n\
LOCATION: http://10.0.0.5:8200/desc.xml\r\n\
NT: urn:schemas-upnp-org:device:MediaServer:1\r\n\
NTS: ssdp:alive\r\n\
SERVER: Linux/5.10 UPnP/1.0 MiniDLNA/1.3\r\n\
USN: uuid:4d696e69-444c::urn:schemas-upnp-org:device:MediaServer:1\r\n\
\r\n";
        let a = alive(parse_datagram(datagram.as_bytes(), SSDP_ALL));
        assert_eq!(a.device_id, "uuid:4d696e69-444c");
        assert_eq!(a.location, "http://10.0.0.5:8200/desc.xml");
        assert_eq!(a.device_type, MEDIA_SERVER);
        assert_eq!(a.max_age_secs, 1800);
        assert_eq!(a.server.as_deref(), Some("Linux/5.10 UPnP/1.0 MiniDLNA/1.3"));
    }

    #[test]
    fn parses_search_response_with_lowercase_headers_in_any_order() {
        let datagram = "HTTP/1.1 200 OK\n\
usn: uuid:abc::urn:schemas-upnp-org:device:MediaServer:1\n\
x-vendor-flag: 1\n\
st: urn:schemas-upnp-org:device:MediaServer:1\n\
location: http://192.168.1.20:49152/description.xml\n\
ext:\n\
cache-control: no-cache=\"Ext\", max-age = 900\n\
\n";
        let a = alive(parse_datagram(datagram.as_bytes(), MEDIA_SERVER));
        assert_eq!(a.device_id, "uuid:abc");
        assert_eq!(a.usn, "uuid:abc::urn:schemas-upnp-org:device:MediaServer:1");
        assert_eq!(a.max_age_secs, 900);
        assert_eq!(a.server, None);
    }

    #[test]
    fn parses_byebye_without_location_or_cache_control() {
        let datagram = "NOTIFY * HTTP/1.1\r\n\
HOST: 239.255.255.250:1900\r\n\
NT: upnp:rootdevice\r\n\
NTS: ssdp:byebye\r\n\
USN: uuid:abc::upnp:rootdevice\r\n\r\n";
        let parsed = parse_datagram(datagram.as_bytes(), SSDP_ALL).unwrap();
        assert_eq!(
            parsed,
            Some(SsdpAnnouncement::Byebye {
                device_id: "uuid:abc".into(),
                usn: "uuid:abc::upnp:rootdevice".into(),
            })
        );
    }

    #[test]
    fn update_notification_is_treated_as_alive() {
        let datagram = "NOTIFY * HTTP/1.1\r\n\
LOCATION: http://10.0.0.9/d.xml\r\n\
NTS: ssdp:update\r\n\
CACHE-CONTROL: max-age=60\r\n\
USN: uuid:xyz\r\n\r\n";
        let a = alive(parse_datagram(datagram.as_bytes(), SSDP_ALL));
        assert_eq!(a.device_id, "uuid:xyz");
        assert_eq!(a.device_type, "");
    }

    #[test]
    fn device_type_falls_back_to_usn_suffix() {
        let datagram = "HTTP/1.1 200 OK\r\n\
LOCATION: http://10.0.0.9/d.xml\r\n\
CACHE-CONTROL: max-age=60\r\n\
USN: uuid:xyz::urn:schemas-upnp-org:device:MediaRenderer:1\r\n\r\n";
        let a = alive(parse_datagram(datagram.as_bytes(), SSDP_ALL));
        assert_eq!(a.device_type, "urn:schemas-upnp-org:device:MediaRenderer:1");
    }

    #[test]
    fn missing_location_is_a_parse_error() {
        let datagram = "NOTIFY * HTTP/1.1\r\n\
CACHE-CONTROL: max-age=1800\r\n\
NT: upnp:rootdevice\r\n\
NTS: ssdp:alive\r\n\
USN: uuid:abc::upnp:rootdevice\r\n\r\n";
        assert_eq!(
            parse_datagram(datagram.as_bytes(), SSDP_ALL),
            Err(ParseError::MissingHeader("LOCATION"))
        );
    }

    #[test]
    fn missing_usn_and_cache_control_are_parse_errors() {
        let no_usn = "HTTP/1.1 200 OK\r\nLOCATION: http://a/\r\nCACHE-CONTROL: max-age=5\r\n\r\n";
        assert_eq!(
            parse_datagram(no_usn.as_bytes(), SSDP_ALL),
            Err(ParseError::MissingHeader("USN"))
        );

        let no_cc = "HTTP/1.1 200 OK\r\nLOCATION: http://a/\r\nUSN: uuid:a\r\n\r\n";
        assert_eq!(
            parse_datagram(no_cc.as_bytes(), SSDP_ALL),
            Err(ParseError::MissingHeader("CACHE-CONTROL"))
        );
    }

    #[test]
    fn rejects_unknown_nts_and_start_lines() {
        let datagram = "NOTIFY * HTTP/1.1\r\nNTS: ssdp:weird\r\nUSN: uuid:a\r\n\r\n";
        assert!(matches!(
            parse_datagram(datagram.as_bytes(), SSDP_ALL),
            Err(ParseError::UnknownNotificationType(_))
        ));

        assert!(matches!(
            parse_datagram(b"HTTP/1.1 404 Not Found\r\n\r\n", SSDP_ALL),
            Err(ParseError::UnknownStartLine(_))
        ));
        assert!(matches!(
            parse_datagram(b"GET / HTTP/1.1\r\n\r\n", SSDP_ALL),
            Err(ParseError::UnknownStartLine(_))
        ));
    }

    #[test]
    fn rejects_empty_and_binary_datagrams() {
        assert_eq!(parse_datagram(b"", SSDP_ALL), Err(ParseError::Empty));
        assert_eq!(parse_datagram(b"\r\n\r\n", SSDP_ALL), Err(ParseError::Empty));
        assert_eq!(
            parse_datagram(&[0xff, 0xfe, 0x00], SSDP_ALL),
            Err(ParseError::NotUtf8)
        );
    }

    #[test]
    fn truncated_datagram_is_a_parse_error() {
        let datagram = "NOTIFY * HTTP/1.1\r\nNTS: ssdp:alive\r\nUSN: uuid:abc\r\nLOCA";
        assert!(parse_datagram(datagram.as_bytes(), SSDP_ALL).is_err());
    }

    #[test]
    fn searches_from_other_control_points_are_ignored() {
        let msg = build_msearch_message(SSDP_ALL, 1);
        assert_eq!(parse_datagram(msg.as_bytes(), SSDP_ALL), Ok(None));
    }

    #[test]
    fn responses_for_other_search_targets_are_ignored() {
        let datagram = "HTTP/1.1 200 OK\r\n\
ST: urn:schemas-upnp-org:device:MediaRenderer:1\r\n\
LOCATION: http://10.0.0.9/d.xml\r\n\
CACHE-CONTROL: max-age=60\r\n\
USN: uuid:xyz::urn:schemas-upnp-org:device:MediaRenderer:1\r\n\r\n";
        assert_eq!(parse_datagram(datagram.as_bytes(), MEDIA_SERVER), Ok(None));
        assert!(parse_datagram(datagram.as_bytes(), SSDP_ALL)
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_parse_max_age() {
        assert_eq!(parse_max_age("max-age=1800"), Ok(1800));
        assert_eq!(parse_max_age("MAX-AGE = 60"), Ok(60));
        assert_eq!(parse_max_age("no-cache=\"Ext\", max-age=30, private"), Ok(30));
        assert!(parse_max_age("max-age=").is_err());
        assert!(parse_max_age("max-age=abc").is_err());
        assert!(parse_max_age("no-cache").is_err());
    }

    #[test]
    fn test_device_id_from_usn() {
        assert_eq!(
            device_id_from_usn("uuid:1::urn:schemas-upnp-org:device:MediaServer:1"),
            "uuid:1"
        );
        assert_eq!(device_id_from_usn("uuid:1::upnp:rootdevice"), "uuid:1");
        assert_eq!(device_id_from_usn("uuid:1"), "uuid:1");
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let msg = SsdpMessage::parse("NOTIFY * HTTP/1.1\r\nLocation: x\r\n\r\n").unwrap();
        assert_eq!(msg.kind, MessageKind::Notify);
        assert_eq!(msg.header("LOCATION"), Some("x"));
        assert_eq!(msg.header("location"), Some("x"));
        assert_eq!(msg.header("usn"), None);
    }
}
