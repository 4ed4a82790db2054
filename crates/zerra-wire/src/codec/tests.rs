//! Unit tests for content negotiation and the three codecs.

use rstest::rstest;
use serde::{Deserialize, Serialize};

use super::*;
use crate::envelope::{Blob, Claim, RequestData};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Pet {
    name: String,
    age: u8,
    tags: Vec<String>,
    owner: Option<Owner>,
    kind: Kind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Owner {
    id: u32,
    display: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Kind {
    Cat,
    Dog { barks: bool },
    Other(String),
}

fn sample_pet() -> Pet {
    Pet {
        name: "Rex".into(),
        age: 3,
        tags: vec!["good".into(), "loud".into()],
        owner: Some(Owner {
            id: 7,
            display: "Ada".into(),
        }),
        kind: Kind::Dog { barks: true },
    }
}

// ---------------------------------------------------------------------------
// Header negotiation
// ---------------------------------------------------------------------------

#[rstest]
#[case("application/octet-stream", ContentType::Bytes)]
#[case("application/json", ContentType::Json)]
#[case("application/json; charset=utf-8", ContentType::Json)]
#[case("Application/JSON", ContentType::Json)]
#[case("application/jsonnameless", ContentType::JsonNameless)]
#[case("APPLICATION/JSONNAMELESS; charset=utf-8", ContentType::JsonNameless)]
fn header_values_resolve_by_prefix(#[case] header: &str, #[case] expected: ContentType) {
    assert_eq!(ContentType::from_header(header), Some(expected));
}

#[rstest]
#[case("text/plain")]
#[case("")]
#[case("application/xml")]
fn unknown_header_values_are_rejected(#[case] header: &str) {
    assert_eq!(ContentType::from_header(header), None);
}

#[rstest]
#[case("bytes", ContentType::Bytes)]
#[case("JSON", ContentType::Json)]
#[case(" jsonnameless ", ContentType::JsonNameless)]
#[case("application/octet-stream", ContentType::Bytes)]
fn configuration_names_parse(#[case] input: &str, #[case] expected: ContentType) {
    assert_eq!(input.parse::<ContentType>(), Ok(expected));
}

#[test]
fn configuration_name_errors_echo_the_value() {
    let error = "yaml".parse::<ContentType>().expect_err("unknown name");
    assert_eq!(error.value, "yaml");
    assert!(error.to_string().contains("jsonnameless"));
}

// ---------------------------------------------------------------------------
// Round trips
// ---------------------------------------------------------------------------

#[rstest]
#[case(ContentType::Bytes)]
#[case(ContentType::Json)]
#[case(ContentType::JsonNameless)]
fn values_survive_every_codec(#[case] content_type: ContentType) {
    let pet = sample_pet();
    let encoded = serialize(content_type, &pet).expect("serialize");
    let decoded: Pet = deserialize(content_type, &encoded).expect("deserialize");
    assert_eq!(decoded, pet);
}

#[rstest]
#[case(ContentType::Bytes)]
#[case(ContentType::Json)]
#[case(ContentType::JsonNameless)]
fn envelopes_survive_every_codec(#[case] content_type: ContentType) {
    let argument = serialize(content_type, &sample_pet()).expect("argument");
    let request = RequestData::query("IPetsQueryProvider", "Adopt", vec![Blob::new(argument)], "web")
        .with_claims(vec![Claim::new("name", "ada")]);

    let encoded = serialize(content_type, &request).expect("serialize");
    let decoded: RequestData = deserialize(content_type, &encoded).expect("deserialize");
    assert_eq!(decoded, request);
}

// ---------------------------------------------------------------------------
// Nameless shape
// ---------------------------------------------------------------------------

#[test]
fn nameless_json_omits_field_names() {
    let encoded = serialize(ContentType::JsonNameless, &sample_pet()).expect("serialize");
    let text = String::from_utf8(encoded).expect("utf8");
    assert_eq!(
        text,
        r#"["Rex",3,["good","loud"],[7,"Ada"],{"Dog":[true]}]"#
    );
    assert!(!text.contains("name"));
    assert!(!text.contains("owner"));
}

#[test]
fn nameless_json_keeps_map_keys() {
    let mut map = std::collections::BTreeMap::new();
    map.insert("rex".to_owned(), Owner {
        id: 1,
        display: "Ada".into(),
    });
    let encoded = serialize(ContentType::JsonNameless, &map).expect("serialize");
    assert_eq!(encoded, br#"{"rex":[1,"Ada"]}"#);
}

#[test]
fn named_json_reads_into_the_same_type_as_nameless() {
    let named = serialize(ContentType::Json, &sample_pet()).expect("named");
    let decoded: Pet = deserialize(ContentType::JsonNameless, &named).expect("decode");
    assert_eq!(decoded, sample_pet());
}

#[test]
fn malformed_input_is_a_codec_error() {
    let error = deserialize::<Pet>(ContentType::Json, b"{not json").expect_err("malformed");
    assert!(matches!(error, CodecError::Json(_)));

    let error = deserialize::<Pet>(ContentType::Bytes, &[1, 2]).expect_err("short");
    assert!(matches!(error, CodecError::Binary(_)));
}

fn forged_length_prefix() -> Vec<u8> {
    // `Some(provider_type)` followed by a string length of one terabyte.
    let mut bytes = vec![1_u8];
    bytes.extend_from_slice(&(1_u64 << 40).to_le_bytes());
    bytes
}

#[test]
fn forged_length_prefixes_fail_without_allocating() {
    let error = deserialize::<RequestData>(ContentType::Bytes, &forged_length_prefix())
        .expect_err("length exceeds the input");
    match error {
        CodecError::Binary(inner) => {
            assert!(matches!(*inner, bincode::ErrorKind::SizeLimit), "got {inner:?}");
        }
        other => panic!("expected a binary codec error, got {other:?}"),
    }
}

#[test]
fn forged_blob_lengths_fail_without_allocating() {
    let mut bytes = (1_u64 << 40).to_le_bytes().to_vec();
    bytes.extend_from_slice(b"tail");
    let error = deserialize::<Blob>(ContentType::Bytes, &bytes).expect_err("length exceeds input");
    assert!(matches!(error, CodecError::Binary(_)));
}

#[test]
fn stream_limits_bound_binary_reads() {
    let encoded = serialize(ContentType::Bytes, &sample_pet()).expect("serialize");
    let decoded: Pet =
        deserialize_from(ContentType::Bytes, encoded.as_slice(), encoded.len()).expect("decode");
    assert_eq!(decoded, sample_pet());

    let error = deserialize_from::<_, Pet>(ContentType::Bytes, encoded.as_slice(), 4)
        .expect_err("limit is smaller than the value");
    assert!(matches!(error, CodecError::Binary(_)));
}

#[test]
fn json_blobs_are_base64_strings() {
    let encoded = serialize(ContentType::Json, &Blob::new(vec![1, 2, 3])).expect("serialize");
    assert_eq!(encoded, br#""AQID""#);
}
