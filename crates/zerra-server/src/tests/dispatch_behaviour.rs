//! Behavioural tests for the request dispatch state machine.

use std::cell::RefCell;
use std::sync::Arc;

use axum::Router;
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use tokio::runtime::Runtime;
use zerra_wire::{Blob, ContentType, RemoteError, RequestData, codec};

use super::support::{
    ADOPT_PET, AdoptPet, Kennel, PETS_PROVIDER, Pet, Reply, decode_body, encode_request, post,
    send, send_request,
};
use crate::receive::ReceiveGuard;
use crate::server::{CqrsServer, ServerSettings};

const CODEC: ContentType = ContentType::Json;

struct DispatchWorld {
    runtime: Runtime,
    kennel: Kennel,
    settings: ServerSettings,
    capacity: usize,
    server: Option<CqrsServer>,
    held: Vec<ReceiveGuard>,
    reply: Option<Reply>,
}

impl DispatchWorld {
    fn new() -> Self {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime should build");
        Self {
            runtime,
            kennel: Kennel::default(),
            settings: ServerSettings::default(),
            capacity: 1,
            server: None,
            held: Vec::new(),
            reply: None,
        }
    }

    fn server(&mut self) -> CqrsServer {
        if let Some(server) = &self.server {
            return server.clone();
        }
        let server = CqrsServer::builder(self.settings.clone(), Arc::new(self.kennel.table()))
            .throttle(PETS_PROVIDER, self.capacity)
            .throttle(ADOPT_PET, self.capacity)
            .build();
        self.server = Some(server.clone());
        server
    }

    fn router(&mut self) -> Router {
        self.server().into_router()
    }

    fn post_envelope(&mut self, request: &RequestData) {
        let router = self.router();
        let reply = self
            .runtime
            .block_on(send_request(&router, CODEC, None, request));
        self.reply = Some(reply);
    }

    fn post_raw(&mut self, media_type: &str, origin: Option<&str>, body: Vec<u8>) {
        let router = self.router();
        let reply = self
            .runtime
            .block_on(send(&router, post(media_type, origin, body)));
        self.reply = Some(reply);
    }

    fn reply(&self) -> &Reply {
        self.reply.as_ref().expect("a request should have been sent")
    }
}

fn query(method: &str, arguments: Vec<Blob>) -> RequestData {
    RequestData::query(PETS_PROVIDER, method, arguments, "bdd")
}

fn argument<T: serde::Serialize>(value: &T) -> Blob {
    Blob::new(codec::serialize(CODEC, value).expect("argument should encode"))
}

/// Strips surrounding double quotes from a string if present.
fn strip_quotes(s: &str) -> &str {
    s.trim_matches('"')
}

#[fixture]
fn world() -> RefCell<DispatchWorld> {
    RefCell::new(DispatchWorld::new())
}

#[given("a pets server allowing {capacity} concurrent calls per type")]
fn given_pets_server(world: &RefCell<DispatchWorld>, capacity: usize) {
    world.borrow_mut().capacity = capacity;
}

#[given(r#"the server only accepts origin "{origin}""#)]
fn given_origin_allow_list(world: &RefCell<DispatchWorld>, origin: String) {
    world
        .borrow_mut()
        .settings
        .allowed_origins
        .push(strip_quotes(&origin).to_owned());
}

#[given("the receive ceiling is {ceiling}")]
fn given_receive_ceiling(world: &RefCell<DispatchWorld>, ceiling: usize) {
    world.borrow_mut().settings.max_concurrent_receive = Some(ceiling);
}

#[given("{count} command is already being received")]
fn given_commands_in_flight(world: &RefCell<DispatchWorld>, count: usize) {
    let mut world = world.borrow_mut();
    let server = world.server();
    for _ in 0..count {
        let guard = server
            .receive_counter()
            .try_begin()
            .expect("ceiling should admit the held command");
        world.held.push(guard);
    }
}

#[when(r#"the client queries "{method}""#)]
fn when_query(world: &RefCell<DispatchWorld>, method: String) {
    let request = query(strip_quotes(&method), Vec::new());
    world.borrow_mut().post_envelope(&request);
}

#[when(r#"a client at origin "{origin}" queries "{method}""#)]
fn when_query_from_origin(world: &RefCell<DispatchWorld>, origin: String, method: String) {
    let body = encode_request(CODEC, None, &query(strip_quotes(&method), Vec::new()));
    world
        .borrow_mut()
        .post_raw(CODEC.media_type(), Some(strip_quotes(&origin)), body);
}

#[when(r#"the client posts a query as "{media_type}""#)]
fn when_query_with_media_type(world: &RefCell<DispatchWorld>, media_type: String) {
    let body = encode_request(CODEC, None, &query("GetPets", Vec::new()));
    world
        .borrow_mut()
        .post_raw(strip_quotes(&media_type), None, body);
}

#[when(r#"the client dispatches the unregistered message "{message_type}""#)]
fn when_dispatch_unregistered(world: &RefCell<DispatchWorld>, message_type: String) {
    let data = argument(&AdoptPet {
        name: "Rex".to_owned(),
    });
    let request = RequestData::dispatch(strip_quotes(&message_type), data, true, false, "bdd");
    world.borrow_mut().post_envelope(&request);
}

#[when(r#"the client adopts "{name}""#)]
fn when_adopt(world: &RefCell<DispatchWorld>, name: String) {
    let data = argument(&AdoptPet {
        name: strip_quotes(&name).to_owned(),
    });
    let request = RequestData::dispatch(ADOPT_PET, data, true, true, "bdd");
    world.borrow_mut().post_envelope(&request);
}

#[when("the client posts an envelope naming both a provider and a message")]
fn when_ambiguous_envelope(world: &RefCell<DispatchWorld>) {
    let mut request = query("GetPets", Vec::new());
    request.message_type = Some(ADOPT_PET.to_owned());
    world.borrow_mut().post_envelope(&request);
}

#[when(r#"the client asks for the pet "{name}""#)]
fn when_get_pet(world: &RefCell<DispatchWorld>, name: String) {
    let request = query("GetPet", vec![argument(&strip_quotes(&name))]);
    world.borrow_mut().post_envelope(&request);
}

#[then("the response status is {status}")]
fn then_status(world: &RefCell<DispatchWorld>, status: u16) {
    assert_eq!(world.borrow().reply().status.as_u16(), status);
}

#[then("the response lists the kennel's pets")]
fn then_lists_pets(world: &RefCell<DispatchWorld>) {
    let world = world.borrow();
    let pets: Vec<Pet> = decode_body(CODEC, None, world.reply());
    assert_eq!(pets, world.kennel.pets());
}

#[then("the response body is empty")]
fn then_empty_body(world: &RefCell<DispatchWorld>) {
    assert!(world.borrow().reply().body.is_empty());
}

#[then(r#"the error body names "{type_name}""#)]
fn then_error_type(world: &RefCell<DispatchWorld>, type_name: String) {
    let error: RemoteError = decode_body(CODEC, None, world.borrow().reply());
    assert_eq!(error.type_name(), strip_quotes(&type_name));
}

#[then("the handler was not invoked")]
fn then_not_invoked(world: &RefCell<DispatchWorld>) {
    assert_eq!(world.borrow().kennel.invocations(), 0);
}

#[then(r#"the "{type_name}" throttle has {available} permits available"#)]
fn then_permits_available(world: &RefCell<DispatchWorld>, type_name: String, available: usize) {
    let server = world.borrow_mut().server();
    assert_eq!(
        server.throttles().available(strip_quotes(&type_name)),
        Some(available)
    );
}

#[then("the throttle registry holds {count} types")]
fn then_registry_size(world: &RefCell<DispatchWorld>, count: usize) {
    let server = world.borrow_mut().server();
    assert_eq!(server.throttles().len(), count);
}

#[then("{count} commands are in flight")]
fn then_in_flight(world: &RefCell<DispatchWorld>, count: usize) {
    let server = world.borrow_mut().server();
    assert_eq!(server.receive_counter().in_flight(), count);
}

#[scenario(path = "tests/features/cqrs_dispatch.feature", index = 0)]
fn provider_query_succeeds(#[from(world)] world: RefCell<DispatchWorld>) {
    drop(world);
}

#[scenario(path = "tests/features/cqrs_dispatch.feature", index = 1)]
fn unlisted_origin_is_rejected(#[from(world)] world: RefCell<DispatchWorld>) {
    drop(world);
}

#[scenario(path = "tests/features/cqrs_dispatch.feature", index = 2)]
fn unsupported_content_type_is_rejected(#[from(world)] world: RefCell<DispatchWorld>) {
    drop(world);
}

#[scenario(path = "tests/features/cqrs_dispatch.feature", index = 3)]
fn unregistered_message_consumes_nothing(#[from(world)] world: RefCell<DispatchWorld>) {
    drop(world);
}

#[scenario(path = "tests/features/cqrs_dispatch.feature", index = 4)]
fn receive_ceiling_refuses_commands(#[from(world)] world: RefCell<DispatchWorld>) {
    drop(world);
}

#[scenario(path = "tests/features/cqrs_dispatch.feature", index = 5)]
fn ambiguous_envelope_is_malformed(#[from(world)] world: RefCell<DispatchWorld>) {
    drop(world);
}

#[scenario(path = "tests/features/cqrs_dispatch.feature", index = 6)]
fn business_errors_reach_the_caller(#[from(world)] world: RefCell<DispatchWorld>) {
    drop(world);
}
