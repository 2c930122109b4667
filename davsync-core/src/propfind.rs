use std::time::UNIX_EPOCH;

use quick_xml::Reader;
use quick_xml::events::Event;

use crate::client::WebdavError;

/// One `<response>` element of a PROPFIND multistatus document.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MultistatusEntry {
    pub href: String,
    pub is_collection: bool,
    pub size: Option<u64>,
    pub modified: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TextField {
    Href,
    Size,
    Modified,
}

/// Parses a multistatus body into its response entries. Namespace prefixes
/// vary between servers, so elements are matched on local name only.
pub fn parse_multistatus(xml: &str) -> Result<Vec<MultistatusEntry>, WebdavError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut entries = Vec::new();
    let mut current: Option<MultistatusEntry> = None;
    let mut in_resourcetype = false;
    let mut text_field: Option<TextField> = None;
    let mut saw_multistatus = false;

    loop {
        match reader.read_event()? {
            Event::Start(start) => match start.local_name().as_ref() {
                b"multistatus" => saw_multistatus = true,
                b"response" => current = Some(MultistatusEntry::default()),
                b"href" => text_field = Some(TextField::Href),
                b"getcontentlength" => text_field = Some(TextField::Size),
                b"getlastmodified" => text_field = Some(TextField::Modified),
                b"resourcetype" => in_resourcetype = true,
                b"collection" if in_resourcetype => {
                    if let Some(entry) = current.as_mut() {
                        entry.is_collection = true;
                    }
                }
                _ => {}
            },
            Event::Empty(empty) => {
                if in_resourcetype
                    && empty.local_name().as_ref() == b"collection"
                    && let Some(entry) = current.as_mut()
                {
                    entry.is_collection = true;
                }
            }
            Event::Text(text) => {
                if let (Some(entry), Some(field)) = (current.as_mut(), text_field) {
                    let value = text.unescape().map_err(quick_xml::Error::from)?;
                    match field {
                        TextField::Href => entry.href = value.into_owned(),
                        TextField::Size => entry.size = value.trim().parse().ok(),
                        TextField::Modified => {
                            entry.modified = httpdate::parse_http_date(value.trim())
                                .ok()
                                .and_then(|stamp| stamp.duration_since(UNIX_EPOCH).ok())
                                .map(|elapsed| elapsed.as_millis() as i64);
                        }
                    }
                }
            }
            Event::End(end) => match end.local_name().as_ref() {
                b"response" => {
                    if let Some(entry) = current.take()
                        && !entry.href.is_empty()
                    {
                        entries.push(entry);
                    }
                }
                b"resourcetype" => in_resourcetype = false,
                b"href" | b"getcontentlength" | b"getlastmodified" => text_field = None,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_multistatus {
        return Err(WebdavError::Multistatus(
            "missing multistatus root element".to_string(),
        ));
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NEXTCLOUD_STYLE: &str = r#"<?xml version="1.0"?>
<d:multistatus xmlns:d="DAV:">
  <d:response>
    <d:href>/remote.php/dav/sync/</d:href>
    <d:propstat>
      <d:prop><d:resourcetype><d:collection/></d:resourcetype></d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
  </d:response>
  <d:response>
    <d:href>/remote.php/dav/sync/a.json</d:href>
    <d:propstat>
      <d:prop>
        <d:resourcetype/>
        <d:getcontentlength>42</d:getcontentlength>
        <d:getlastmodified>Mon, 01 Jan 2024 00:00:00 GMT</d:getlastmodified>
      </d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
  </d:response>
</d:multistatus>"#;

    #[test]
    fn parses_prefixed_multistatus() {
        let entries = parse_multistatus(NEXTCLOUD_STYLE).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].is_collection);
        assert_eq!(entries[0].href, "/remote.php/dav/sync/");
        assert!(!entries[1].is_collection);
        assert_eq!(entries[1].size, Some(42));
        assert_eq!(entries[1].modified, Some(1_704_067_200_000));
    }

    #[test]
    fn parses_default_namespace() {
        let xml = r#"<?xml version="1.0"?>
<multistatus xmlns="DAV:">
  <response>
    <href>/dav/sync/chunks/</href>
    <propstat>
      <prop><resourcetype><collection/></resourcetype></prop>
      <status>HTTP/1.1 200 OK</status>
    </propstat>
  </response>
</multistatus>"#;
        let entries = parse_multistatus(xml).unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].is_collection);
    }

    #[test]
    fn tolerates_not_found_propstat_blocks() {
        let xml = r#"<?xml version="1.0"?>
<d:multistatus xmlns:d="DAV:">
  <d:response>
    <d:href>/dav/sync/b.json</d:href>
    <d:propstat>
      <d:prop><d:resourcetype/></d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
    <d:propstat>
      <d:prop><d:getcontentlength/><d:getlastmodified/></d:prop>
      <d:status>HTTP/1.1 404 Not Found</d:status>
    </d:propstat>
  </d:response>
</d:multistatus>"#;
        let entries = parse_multistatus(xml).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].size, None);
        assert_eq!(entries[0].modified, None);
    }

    #[test]
    fn rejects_body_without_multistatus_root() {
        let err = parse_multistatus("<html><body>login page</body></html>").unwrap_err();
        assert!(matches!(err, WebdavError::Multistatus(_)));
    }
}
