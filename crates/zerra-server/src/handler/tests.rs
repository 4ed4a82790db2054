//! Unit tests for the handler registration table.

use std::io;

use rstest::{fixture, rstest};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use zerra_wire::{Blob, ContentType, RemoteCall, RequestData, codec};

use super::*;
use crate::auth::Identity;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct AdoptPet {
    name: String,
    age: u8,
}

fn context(content_type: ContentType) -> RequestContext {
    RequestContext::new(
        "unit",
        Identity::anonymous(),
        content_type,
        CancellationToken::new(),
    )
}

fn blob<T: Serialize>(content_type: ContentType, value: &T) -> Blob {
    Blob::new(codec::serialize(content_type, value).expect("encode"))
}

fn query(provider: &str, method: &str, arguments: Vec<Blob>) -> ProviderCall {
    match RequestData::query(provider, method, arguments, "unit")
        .into_call()
        .expect("well formed")
    {
        RemoteCall::Query(call) => call,
        RemoteCall::Dispatch(_) => panic!("query expected"),
    }
}

fn dispatch(message_type: &str, data: Blob, want_result: bool) -> MessageDispatch {
    match RequestData::dispatch(message_type, data, true, want_result, "unit")
        .into_call()
        .expect("well formed")
    {
        RemoteCall::Dispatch(dispatch) => dispatch,
        RemoteCall::Query(_) => panic!("dispatch expected"),
    }
}

#[fixture]
fn table() -> HandlerTable {
    HandlerTable::new()
        .query("IPetsQueryProvider", "GetPets", |_arguments, _context| async {
            Ok::<_, HandlerError>(vec!["Rex".to_owned(), "Tom".to_owned()])
        })
        .query("IPetsQueryProvider", "Greet", |arguments, _context| async move {
            let name: String = arguments.get(0)?;
            let times: u32 = arguments.get(1)?;
            Ok::<_, HandlerError>(format!("hello {name} x{times}"))
        })
        .command_with_result::<AdoptPet, _, _, _>("AdoptPet", |command, _context| async move {
            if command.age > 20 {
                return Err(HandlerError::from_error(&io::Error::other("too old")));
            }
            Ok(format!("{} adopted", command.name))
        })
}

fn bytes(response: CallResponse) -> Vec<u8> {
    match response {
        CallResponse::Bytes(bytes) => bytes,
        other => panic!("expected bytes, got {other:?}"),
    }
}

#[rstest]
#[case::bytes(ContentType::Bytes)]
#[case::json(ContentType::Json)]
#[case::nameless(ContentType::JsonNameless)]
#[tokio::test]
async fn query_results_use_request_codec(table: HandlerTable, #[case] content_type: ContentType) {
    let response = table
        .call_provider(query("IPetsQueryProvider", "GetPets", Vec::new()), context(content_type))
        .await
        .expect("query succeeds");
    let pets: Vec<String> = codec::deserialize(content_type, &bytes(response)).expect("decode");
    assert_eq!(pets, ["Rex", "Tom"]);
}

#[rstest]
#[tokio::test]
async fn positional_arguments_decode_by_index(table: HandlerTable) {
    let content_type = ContentType::Json;
    let arguments = vec![blob(content_type, &"Ada"), blob(content_type, &3_u32)];
    let response = table
        .call_provider(query("IPetsQueryProvider", "Greet", arguments), context(content_type))
        .await
        .expect("query succeeds");
    let greeting: String = codec::deserialize(content_type, &bytes(response)).expect("decode");
    assert_eq!(greeting, "hello Ada x3");
}

#[rstest]
#[tokio::test]
async fn missing_arguments_are_invalid(table: HandlerTable) {
    let content_type = ContentType::Json;
    let error = table
        .call_provider(
            query("IPetsQueryProvider", "Greet", vec![blob(content_type, &"Ada")]),
            context(content_type),
        )
        .await
        .expect_err("second argument missing");
    assert_eq!(error.kind(), HandlerErrorKind::InvalidArguments);
    assert!(error.remote().message().contains("argument 1 missing"));
}

#[rstest]
#[tokio::test]
async fn unknown_methods_are_not_wired(table: HandlerTable) {
    let error = table
        .call_provider(
            query("IPetsQueryProvider", "Vanish", Vec::new()),
            context(ContentType::Json),
        )
        .await
        .expect_err("not wired");
    assert!(error.is_configuration_fault());
    assert!(error.remote().message().contains("IPetsQueryProvider.Vanish"));
}

#[rstest]
#[case::wanted(true)]
#[case::unwanted(false)]
#[tokio::test]
async fn awaited_commands_honour_result_flag(table: HandlerTable, #[case] want_result: bool) {
    let content_type = ContentType::Bytes;
    let data = blob(content_type, &AdoptPet { name: "Rex".into(), age: 3 });
    let response = table
        .handle_command_await(dispatch("AdoptPet", data, want_result), context(content_type))
        .await
        .expect("command succeeds");
    if want_result {
        let text: String = codec::deserialize(content_type, &bytes(response)).expect("decode");
        assert_eq!(text, "Rex adopted");
    } else {
        assert!(response.is_void());
    }
}

#[rstest]
#[tokio::test]
async fn business_failures_keep_their_chain(table: HandlerTable) {
    let content_type = ContentType::Json;
    let data = blob(content_type, &AdoptPet { name: "Old Tom".into(), age: 30 });
    let pending = table
        .prepare_command(dispatch("AdoptPet", data, false), context(content_type))
        .unwrap_or_else(|error| panic!("payload decodes: {error}"));
    let error = pending.await.expect_err("too old");
    assert_eq!(error.kind(), HandlerErrorKind::Business);
    assert_eq!(error.remote().message(), "too old");
}

fn preparation_error(
    table: &HandlerTable,
    message_type: &str,
    data: Blob,
) -> HandlerError {
    match table.prepare_command(dispatch(message_type, data, false), context(ContentType::Json)) {
        Ok(_) => panic!("preparing '{message_type}' should fail"),
        Err(error) => error,
    }
}

#[rstest]
fn malformed_message_data_is_rejected_before_running(table: HandlerTable) {
    let error = preparation_error(&table, "AdoptPet", Blob::new(b"{not json".to_vec()));
    assert_eq!(error.kind(), HandlerErrorKind::InvalidArguments);
}

#[rstest]
fn unwired_commands_are_rejected_before_running(table: HandlerTable) {
    let data = blob(ContentType::Json, &AdoptPet { name: "Rex".into(), age: 3 });
    let error = preparation_error(&table, "FeedPet", data);
    assert_eq!(error.kind(), HandlerErrorKind::NotWired);
}

#[rstest]
#[tokio::test]
async fn malformed_awaited_commands_are_invalid(table: HandlerTable) {
    let data = Blob::new(b"{not json".to_vec());
    let error = table
        .handle_command_await(dispatch("AdoptPet", data, true), context(ContentType::Json))
        .await
        .expect_err("malformed");
    assert_eq!(error.kind(), HandlerErrorKind::InvalidArguments);
}

#[rstest]
fn registered_types_are_listed(table: HandlerTable) {
    assert_eq!(table.provider_types().collect::<Vec<_>>(), ["IPetsQueryProvider"]);
    assert_eq!(table.message_types().collect::<Vec<_>>(), ["AdoptPet"]);
}
