use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

use crate::util::validate_address;

/// SEC-003: Maximum allowed nesting depth for OPML outline elements.
/// Prevents stack overflow attacks from maliciously crafted deeply nested OPMLs.
const MAX_OPML_DEPTH: usize = 50;

/// Errors that can occur during OPML parsing.
#[derive(Debug, Error)]
pub enum OpmlError {
    /// SEC-003: OPML nesting depth exceeds safety limit.
    #[error("OPML nesting depth exceeds maximum of {0} levels")]
    MaxDepthExceeded(usize),

    /// XML parsing failed.
    #[error("XML parse error: {0}")]
    XmlParse(String),

    /// File I/O error.
    #[error("Failed to read OPML file: {0}")]
    Io(#[from] std::io::Error),
}

impl From<quick_xml::Error> for OpmlError {
    fn from(e: quick_xml::Error) -> Self {
        OpmlError::XmlParse(e.to_string())
    }
}

/// One feed subscription listed in an OPML document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpmlEntry {
    /// `title` attribute, else `text`, else the address itself.
    pub title: String,
    pub address: String,
}

/// Reads and parses an OPML file from disk.
pub async fn read_file(path: &std::path::Path) -> Result<Vec<OpmlEntry>, OpmlError> {
    let content = tokio::fs::read_to_string(path).await?;
    parse_opml(&content)
}

/// Extracts every `<outline xmlUrl=..>` at any nesting depth.
///
/// Folder outlines without `xmlUrl` are traversed but not returned. Entries
/// whose address fails validation (non-HTTP scheme, localhost, private
/// ranges) are skipped with a warning.
pub fn parse_opml(content: &str) -> Result<Vec<OpmlEntry>, OpmlError> {
    // SEC-002: quick-xml 0.37 never expands <!ENTITY> declarations; custom
    // entities surface as an unescape error. Stay on decode_and_unescape_value
    // (not the `_with` variant) so that remains true.
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut entries = Vec::new();
    let mut buf = Vec::new();
    let mut depth: usize = 0;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.name().as_ref() == b"outline" => {
                depth += 1;
                if depth > MAX_OPML_DEPTH {
                    return Err(OpmlError::MaxDepthExceeded(MAX_OPML_DEPTH));
                }
                if let Some(entry) = outline_entry(&e, &reader)? {
                    entries.push(entry);
                }
            }
            Ok(Event::Empty(e)) if e.name().as_ref() == b"outline" => {
                if let Some(entry) = outline_entry(&e, &reader)? {
                    entries.push(entry);
                }
            }
            Ok(Event::End(e)) if e.name().as_ref() == b"outline" => {
                depth = depth.saturating_sub(1);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(OpmlError::XmlParse(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(entries)
}

fn outline_entry(
    e: &BytesStart<'_>,
    reader: &Reader<&[u8]>,
) -> Result<Option<OpmlEntry>, OpmlError> {
    let mut address = None;
    let mut title = None;
    let mut text = None;
    let decoder = reader.decoder();

    for attr in e.attributes() {
        let attr = match attr {
            Ok(attr) => attr,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed OPML attribute");
                continue;
            }
        };
        match attr.key.as_ref() {
            b"xmlUrl" => address = Some(attr.decode_and_unescape_value(decoder)?.trim().to_string()),
            b"title" => title = Some(attr.decode_and_unescape_value(decoder)?.to_string()),
            b"text" => text = Some(attr.decode_and_unescape_value(decoder)?.to_string()),
            _ => {}
        }
    }

    let Some(address) = address else {
        return Ok(None);
    };

    if let Err(e) = validate_address(&address) {
        tracing::warn!(url = %address, error = %e, "Skipping invalid feed URL in OPML");
        return Ok(None);
    }

    let title = title
        .or(text)
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| address.clone());

    Ok(Some(OpmlEntry { title, address }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_flat_opml() {
        let opml = r#"<?xml version="1.0"?>
<opml version="2.0">
  <head><title>Subs</title></head>
  <body>
    <outline type="rss" text="Rust Blog" xmlUrl="https://blog.rust-lang.org/feed.xml"/>
    <outline type="rss" title="Titled" text="Ignored" xmlUrl="https://example.com/rss"/>
  </body>
</opml>"#;

        let entries = parse_opml(opml).unwrap();
        assert_eq!(
            entries,
            vec![
                OpmlEntry {
                    title: "Rust Blog".into(),
                    address: "https://blog.rust-lang.org/feed.xml".into(),
                },
                OpmlEntry {
                    title: "Titled".into(),
                    address: "https://example.com/rss".into(),
                },
            ]
        );
    }

    #[test]
    fn test_nested_folders() {
        let opml = r#"<opml version="2.0"><body>
    <outline text="Tech">
      <outline text="Inner">
        <outline text="Deep" xmlUrl="https://deep.example.com/feed"/>
      </outline>
    </outline>
    <outline text="Top" xmlUrl="https://top.example.com/feed"></outline>
</body></opml>"#;

        let entries = parse_opml(opml).unwrap();
        let addresses: Vec<_> = entries.iter().map(|e| e.address.as_str()).collect();
        assert_eq!(
            addresses,
            vec!["https://deep.example.com/feed", "https://top.example.com/feed"]
        );
    }

    #[test]
    fn test_invalid_addresses_skipped() {
        let opml = r#"<opml><body>
    <outline text="Local" xmlUrl="http://localhost/feed"/>
    <outline text="File" xmlUrl="file:///etc/passwd"/>
    <outline text="Ok" xmlUrl="https://ok.example.com/feed"/>
</body></opml>"#;

        let entries = parse_opml(opml).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].title, "Ok");
    }

    #[test]
    fn test_missing_title_uses_address() {
        let opml = r#"<opml><body><outline xmlUrl="https://a.example.com/rss"/></body></opml>"#;
        let entries = parse_opml(opml).unwrap();
        assert_eq!(entries[0].title, "https://a.example.com/rss");
    }

    #[test]
    fn test_depth_limit() {
        let mut opml = String::from("<opml><body>");
        for _ in 0..=MAX_OPML_DEPTH {
            opml.push_str("<outline text=\"x\">");
        }
        for _ in 0..=MAX_OPML_DEPTH {
            opml.push_str("</outline>");
        }
        opml.push_str("</body></opml>");

        assert!(matches!(
            parse_opml(&opml),
            Err(OpmlError::MaxDepthExceeded(MAX_OPML_DEPTH))
        ));
    }

    #[test]
    fn test_custom_entity_rejected() {
        let opml = r#"<?xml version="1.0"?>
<!DOCTYPE opml [<!ENTITY xxe SYSTEM "file:///etc/passwd">]>
<opml><body><outline text="&xxe;" xmlUrl="https://a.example.com/rss"/></body></opml>"#;
        assert!(parse_opml(opml).is_err());
    }

    #[test]
    fn test_malformed_xml() {
        assert!(matches!(
            parse_opml("<opml><body></opml>"),
            Err(OpmlError::XmlParse(_))
        ));
    }
}
