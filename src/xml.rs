//! S3 XML bodies.
//!
//! Provider responses are XML documents; this module turns the handful
//! the adapter needs into typed values, and renders the two request
//! bodies it sends, using `quick-xml`.

use chrono::{DateTime, Utc};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::io::Cursor;

use crate::errors::{Error, Result};
use crate::storage::backend::{BucketSummary, CompletedPart, ListObjectsPage, ObjectSummary};

const S3_NAMESPACE: &str = "http://s3.amazonaws.com/doc/2006-03-01/";

// ── ListBucketResult (v1) ───────────────────────────────────────────

/// Parse a `<ListBucketResult>` page.
///
/// ```xml
/// <ListBucketResult>
///   <IsTruncated>true</IsTruncated>
///   <NextMarker>a/c.txt</NextMarker>
///   <Contents>
///     <Key>a/b.txt</Key>
///     <LastModified>2009-10-12T17:50:30.000Z</LastModified>
///     <ETag>"fba9dede5f27731c9771645a39863328"</ETag>
///     <Size>434234</Size>
///   </Contents>
///   <CommonPrefixes><Prefix>photos/</Prefix></CommonPrefixes>
/// </ListBucketResult>
/// ```
pub fn parse_list_objects(body: &[u8]) -> Result<ListObjectsPage> {
    let mut page = ListObjectsPage::default();
    let mut current = ObjectSummary::default();
    let mut root = String::new();

    walk(body, |path, text| {
        let names: Vec<&str> = path.iter().map(String::as_str).collect();
        match names.as_slice() {
            [r] => root = r.to_string(),
            [_, "IsTruncated"] => page.is_truncated = text.trim() == "true",
            [_, "NextMarker"] if !text.is_empty() => page.next_marker = Some(text),
            [_, "Contents", "Key"] => current.key = text,
            [_, "Contents", "Size"] => current.size = text.trim().parse().unwrap_or(0),
            [_, "Contents", "ETag"] => current.etag = text,
            [_, "Contents", "LastModified"] => current.last_modified = parse_timestamp(&text),
            [_, "Contents"] => page.contents.push(std::mem::take(&mut current)),
            [_, "CommonPrefixes", "Prefix"] => page.common_prefixes.push(text),
            _ => {}
        }
    })?;

    expect_root(&root, "ListBucketResult")?;
    Ok(page)
}

// ── ListAllMyBucketsResult ──────────────────────────────────────────

/// Parse the `<ListAllMyBucketsResult>` answer to `GET /`.
pub fn parse_list_buckets(body: &[u8]) -> Result<Vec<BucketSummary>> {
    let mut buckets = Vec::new();
    let mut current = BucketSummary::default();
    let mut root = String::new();

    walk(body, |path, text| {
        let names: Vec<&str> = path.iter().map(String::as_str).collect();
        match names.as_slice() {
            [r] => root = r.to_string(),
            [_, "Buckets", "Bucket", "Name"] => current.name = text,
            [_, "Buckets", "Bucket", "CreationDate"] => {
                current.creation_date = parse_timestamp(&text)
            }
            [_, "Buckets", "Bucket"] => buckets.push(std::mem::take(&mut current)),
            _ => {}
        }
    })?;

    expect_root(&root, "ListAllMyBucketsResult")?;
    Ok(buckets)
}

// ── Multipart and copy results ──────────────────────────────────────

/// Extract `<UploadId>` from `<InitiateMultipartUploadResult>`.
pub fn parse_upload_id(body: &[u8]) -> Result<String> {
    let mut upload_id = None;
    let mut root = String::new();

    walk(body, |path, text| match path {
        [r] => root = r.clone(),
        [_, leaf] if leaf == "UploadId" => upload_id = Some(text),
        _ => {}
    })?;

    expect_root(&root, "InitiateMultipartUploadResult")?;
    upload_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| Error::MalformedResponse("missing UploadId".to_string()))
}

// ── Error response ──────────────────────────────────────────────────

/// Provider error details from an `<Error>` document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorBody {
    pub code: Option<String>,
    pub message: Option<String>,
}

/// Parse an `<Error>` document. Returns `None` for anything else,
/// including empty and non-XML bodies.
pub fn parse_error(body: &[u8]) -> Option<ErrorBody> {
    let mut parsed = ErrorBody::default();
    let mut root = String::new();

    walk(body, |path, text| match path {
        [r] => root = r.clone(),
        [_, leaf] if leaf == "Code" => parsed.code = Some(text),
        [_, leaf] if leaf == "Message" => parsed.message = Some(text),
        _ => {}
    })
    .ok()?;

    (root == "Error").then_some(parsed)
}

// ── Request bodies ──────────────────────────────────────────────────

/// Render `<CreateBucketConfiguration>` carrying a location constraint.
pub fn render_create_bucket_configuration(location_constraint: &str) -> String {
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    write_decl(&mut writer);

    let root = BytesStart::new("CreateBucketConfiguration")
        .with_attributes([("xmlns", S3_NAMESPACE)]);
    writer.write_event(Event::Start(root)).expect("start root");
    write_text_element(&mut writer, "LocationConstraint", location_constraint);
    writer
        .write_event(Event::End(BytesEnd::new("CreateBucketConfiguration")))
        .expect("end root");

    String::from_utf8(writer.into_inner().into_inner()).expect("valid utf-8")
}

/// Render `<CompleteMultipartUpload>` listing the uploaded parts.
pub fn render_complete_multipart_upload(parts: &[CompletedPart]) -> String {
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    write_decl(&mut writer);

    writer
        .write_event(Event::Start(BytesStart::new("CompleteMultipartUpload")))
        .expect("start root");
    for part in parts {
        write_simple_element_group(
            &mut writer,
            "Part",
            &[
                ("PartNumber", &part.part_number.to_string()),
                ("ETag", &part.etag),
            ],
        );
    }
    writer
        .write_event(Event::End(BytesEnd::new("CompleteMultipartUpload")))
        .expect("end root");

    String::from_utf8(writer.into_inner().into_inner()).expect("valid utf-8")
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Walk a document, calling `visit(path, text)` as each element closes.
///
/// `path` is the stack of local element names ending with the closing
/// element; `text` is the element's own unescaped text (empty for
/// parents and empty elements).
fn walk<F>(body: &[u8], mut visit: F) -> Result<()>
where
    F: FnMut(&[String], String),
{
    let mut reader = Reader::from_reader(body);
    let mut path: Vec<String> = Vec::new();
    let mut text = String::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                path.push(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
                text.clear();
            }
            Ok(Event::Empty(ref e)) => {
                path.push(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
                visit(&path, String::new());
                path.pop();
            }
            Ok(Event::Text(ref e)) => {
                let unescaped = e
                    .unescape()
                    .map_err(|e| Error::MalformedResponse(e.to_string()))?;
                text.push_str(&unescaped);
            }
            Ok(Event::CData(e)) => {
                text.push_str(&String::from_utf8_lossy(&e.into_inner()));
            }
            Ok(Event::End(_)) => {
                visit(&path, std::mem::take(&mut text));
                path.pop();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::MalformedResponse(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(())
}

fn expect_root(root: &str, want: &str) -> Result<()> {
    if root == want {
        Ok(())
    } else {
        Err(Error::MalformedResponse(format!(
            "expected <{want}>, got <{root}>"
        )))
    }
}

fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text.trim())
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn write_decl(writer: &mut Writer<Cursor<Vec<u8>>>) {
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .expect("xml decl");
}

/// Write a `<tag>text</tag>` element.
fn write_text_element(writer: &mut Writer<Cursor<Vec<u8>>>, tag: &str, text: &str) {
    writer
        .write_event(Event::Start(BytesStart::new(tag)))
        .expect("start tag");
    writer
        .write_event(Event::Text(BytesText::new(text)))
        .expect("text");
    writer
        .write_event(Event::End(BytesEnd::new(tag)))
        .expect("end tag");
}

/// Write a parent element containing a flat list of child text elements.
fn write_simple_element_group(
    writer: &mut Writer<Cursor<Vec<u8>>>,
    parent: &str,
    children: &[(&str, &str)],
) {
    writer
        .write_event(Event::Start(BytesStart::new(parent)))
        .expect("start parent");
    for (tag, value) in children {
        write_text_element(writer, tag, value);
    }
    writer
        .write_event(Event::End(BytesEnd::new(parent)))
        .expect("end parent");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_list_objects_page() {
        let body = br#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Name>demo</Name>
  <Prefix></Prefix>
  <Marker></Marker>
  <MaxKeys>2</MaxKeys>
  <IsTruncated>true</IsTruncated>
  <NextMarker>b.txt</NextMarker>
  <Contents>
    <Key>a &amp; b.txt</Key>
    <LastModified>2009-10-12T17:50:30.000Z</LastModified>
    <ETag>&quot;fba9dede5f27731c9771645a39863328&quot;</ETag>
    <Size>434234</Size>
    <StorageClass>STANDARD</StorageClass>
  </Contents>
  <Contents>
    <Key>b.txt</Key>
    <ETag>"abc-2"</ETag>
    <Size>0</Size>
  </Contents>
  <CommonPrefixes><Prefix>photos/</Prefix></CommonPrefixes>
</ListBucketResult>"#;
        let page = parse_list_objects(body).unwrap();
        assert!(page.is_truncated);
        assert_eq!(page.next_marker.as_deref(), Some("b.txt"));
        assert_eq!(page.contents.len(), 2);
        assert_eq!(page.contents[0].key, "a & b.txt");
        assert_eq!(page.contents[0].size, 434234);
        assert_eq!(page.contents[0].etag, "\"fba9dede5f27731c9771645a39863328\"");
        assert_eq!(
            page.contents[0].last_modified,
            Some(Utc.with_ymd_and_hms(2009, 10, 12, 17, 50, 30).unwrap())
        );
        assert_eq!(page.contents[1].key, "b.txt");
        assert!(page.contents[1].last_modified.is_none());
        assert_eq!(page.common_prefixes, vec!["photos/".to_string()]);
    }

    #[test]
    fn test_parse_list_objects_keeps_key_whitespace() {
        let body = b"<ListBucketResult><IsTruncated>false</IsTruncated>\
<Contents><Key> spaced </Key><Size>1</Size></Contents></ListBucketResult>";
        let page = parse_list_objects(body).unwrap();
        assert!(!page.is_truncated);
        assert!(page.next_marker.is_none());
        assert_eq!(page.contents[0].key, " spaced ");
    }

    #[test]
    fn test_parse_list_objects_wrong_root() {
        let err = parse_list_objects(b"<Error><Code>NoSuchBucket</Code></Error>").unwrap_err();
        assert!(matches!(err, Error::MalformedResponse(_)));
    }

    #[test]
    fn test_parse_list_buckets() {
        let body = br#"<ListAllMyBucketsResult>
  <Owner><ID>1</ID><DisplayName>me</DisplayName></Owner>
  <Buckets>
    <Bucket><Name>alpha</Name><CreationDate>2020-01-02T03:04:05.000Z</CreationDate></Bucket>
    <Bucket><Name>beta</Name><CreationDate>garbage</CreationDate></Bucket>
  </Buckets>
</ListAllMyBucketsResult>"#;
        let buckets = parse_list_buckets(body).unwrap();
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].name, "alpha");
        assert!(buckets[0].creation_date.is_some());
        assert_eq!(buckets[1].name, "beta");
        assert!(buckets[1].creation_date.is_none());
    }

    #[test]
    fn test_parse_upload_id() {
        let body = b"<InitiateMultipartUploadResult><Bucket>b</Bucket><Key>k</Key>\
<UploadId>VXBsb2FkIElE</UploadId></InitiateMultipartUploadResult>";
        assert_eq!(parse_upload_id(body).unwrap(), "VXBsb2FkIElE");
        assert!(parse_upload_id(b"<InitiateMultipartUploadResult/>").is_err());
    }

    #[test]
    fn test_parse_error() {
        let body = b"<?xml version=\"1.0\"?><Error><Code>BucketAlreadyOwnedByYou</Code>\
<Message>Your previous request succeeded</Message><RequestId>x</RequestId></Error>";
        let parsed = parse_error(body).unwrap();
        assert_eq!(parsed.code.as_deref(), Some("BucketAlreadyOwnedByYou"));
        assert_eq!(parsed.message.as_deref(), Some("Your previous request succeeded"));

        assert!(parse_error(b"").is_none());
        assert!(parse_error(b"<CopyObjectResult/>").is_none());
    }

    #[test]
    fn test_render_create_bucket_configuration() {
        let xml = render_create_bucket_configuration("eu-west-1");
        assert!(xml.starts_with("<?xml"));
        assert!(xml.contains("<LocationConstraint>eu-west-1</LocationConstraint>"));
        assert!(xml.contains(S3_NAMESPACE));
    }

    #[test]
    fn test_render_complete_multipart_upload() {
        let parts = vec![
            CompletedPart {
                part_number: 1,
                etag: "\"aaa\"".to_string(),
            },
            CompletedPart {
                part_number: 2,
                etag: "\"bbb\"".to_string(),
            },
        ];
        let xml = render_complete_multipart_upload(&parts);
        assert!(xml.contains("<Part><PartNumber>1</PartNumber><ETag>&quot;aaa&quot;</ETag></Part>"));
        assert!(xml.contains("<PartNumber>2</PartNumber>"));
    }
}
