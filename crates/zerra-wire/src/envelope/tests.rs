//! Unit tests for envelope validation.

use rstest::rstest;

use super::*;

fn blob(bytes: &[u8]) -> Blob {
    Blob::new(bytes.to_vec())
}

#[test]
fn query_constructor_produces_query_call() {
    let request = RequestData::query("IPetsQueryProvider", "GetPets", Vec::new(), "web");
    let call = request.into_call().expect("valid query");
    let RemoteCall::Query(call) = call else {
        panic!("expected query call");
    };
    assert_eq!(call.provider_type(), "IPetsQueryProvider");
    assert_eq!(call.method(), "GetPets");
    assert!(call.arguments().is_empty());
    assert_eq!(call.source(), "web");
}

#[test]
fn dispatch_constructor_produces_dispatch() {
    let request = RequestData::dispatch("AdoptPet", blob(b"{}"), true, false, "web");
    let call = request.into_call().expect("valid dispatch");
    let RemoteCall::Dispatch(dispatch) = call else {
        panic!("expected dispatch");
    };
    assert_eq!(dispatch.message_type(), "AdoptPet");
    assert!(dispatch.wait());
    assert!(!dispatch.want_result());
    assert_eq!(dispatch.data().as_bytes(), b"{}");
}

#[test]
fn rejects_envelope_with_both_types() {
    let mut request = RequestData::query("IPetsQueryProvider", "GetPets", Vec::new(), "web");
    request.message_type = Some("AdoptPet".into());
    request.message_data = Some(blob(b"{}"));
    assert_eq!(request.into_call(), Err(EnvelopeError::Ambiguous));
}

#[test]
fn rejects_envelope_with_neither_type() {
    let request = RequestData {
        source: "web".into(),
        ..RequestData::default()
    };
    assert_eq!(request.into_call(), Err(EnvelopeError::Empty));
}

#[rstest]
#[case::empty("")]
#[case::whitespace("   ")]
fn blank_type_names_count_as_absent(#[case] name: &str) {
    let request = RequestData {
        provider_type: Some(name.into()),
        message_type: Some(name.into()),
        ..RequestData::default()
    };
    assert_eq!(request.into_call(), Err(EnvelopeError::Empty));
}

#[test]
fn query_requires_method() {
    let request = RequestData {
        provider_type: Some("IPetsQueryProvider".into()),
        ..RequestData::default()
    };
    assert_eq!(
        request.into_call(),
        Err(EnvelopeError::MissingField {
            field: "provider_method"
        })
    );
}

#[test]
fn dispatch_requires_payload() {
    let request = RequestData {
        message_type: Some("AdoptPet".into()),
        ..RequestData::default()
    };
    let error = request.into_call().expect_err("payload missing");
    assert!(error.to_string().contains("message_data"));
}

#[test]
fn claims_are_carried_into_the_call() {
    let request = RequestData::query("IPetsQueryProvider", "GetPets", Vec::new(), "web")
        .with_claims(vec![Claim::new("role", "keeper")]);
    let call = request.into_call().expect("valid");
    assert_eq!(call.claims(), &[Claim::new("role", "keeper")]);
    assert_eq!(call.type_name(), "IPetsQueryProvider");
}

#[test]
fn blob_debug_hides_contents() {
    assert_eq!(format!("{:?}", blob(b"secret")), "Blob(6 bytes)");
}
