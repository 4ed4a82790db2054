//! Request state machine.
//!
//! One [`Exchange`] walks a POST through `ParsingEnvelope`, `Authorizing`,
//! `ResolvingThrottle`, `Invoking` and `Responding`. Any failure becomes a
//! [`Fault`] tagged with the stage it interrupted and is turned into a
//! response in exactly one place. Throttle permits, receive admissions and
//! request cancellation live in [`CallGuards`], so they are released on every
//! exit path including a dropped connection.

use std::borrow::Cow;

use axum::body::Body;
use axum::extract::Request;
use axum::http::header::{CONTENT_TYPE, ORIGIN};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::Response;
use bytes::BytesMut;
use futures::StreamExt;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, info, trace, warn};
use zerra_wire::{
    ContentType, DecryptReader, MessageDispatch, ProviderCall, RemoteCall, RequestData, codec,
};

use super::DISPATCH_TARGET;
use super::errors::{DispatchError, FaultClass};
use super::response::{self, ResponseHead};
use super::stage::{Fault, Stage};
use crate::auth::Identity;
use crate::handler::{CallResponse, HandlerErrorKind, RequestContext};
use crate::receive::ReceiveGuard;
use crate::server::{CqrsServer, ServerState};
use crate::throttle::ThrottlePermit;

/// Resources held for the lifetime of one handler call.
#[derive(Debug)]
pub(crate) struct CallGuards {
    _permit: ThrottlePermit,
    _receive: Option<ReceiveGuard>,
    _cancel: Option<DropGuard>,
}

impl CallGuards {
    fn new(
        permit: ThrottlePermit,
        receive: Option<ReceiveGuard>,
        cancel: Option<DropGuard>,
    ) -> Self {
        Self {
            _permit: permit,
            _receive: receive,
            _cancel: cancel,
        }
    }
}

/// Runs one POST through the router and always produces a response.
pub(crate) async fn dispatch(server: CqrsServer, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let mut exchange = Exchange::new(&server.inner, &parts.headers);
    match exchange.run(&parts.headers, body).await {
        Ok(response) => response,
        Err(fault) => exchange.fault_response(fault),
    }
}

struct Exchange<'a> {
    state: &'a ServerState,
    stage: Stage,
    head: ResponseHead,
    type_name: Option<String>,
}

impl<'a> Exchange<'a> {
    fn new(state: &'a ServerState, headers: &HeaderMap) -> Self {
        let mut head = ResponseHead::new(StatusCode::OK);
        head.cors_origin = headers.get(ORIGIN).cloned();
        Self {
            state,
            stage: Stage::Idle,
            head,
            type_name: None,
        }
    }

    fn advance(&mut self, stage: Stage) {
        trace!(
            target: DISPATCH_TARGET,
            from = %self.stage,
            to = %stage,
            type_name = self.type_name.as_deref().unwrap_or_default(),
            "dispatch stage"
        );
        self.stage = stage;
    }

    fn fault(&self, error: impl Into<DispatchError>) -> Fault {
        Fault::new(self.stage, error.into())
    }

    async fn run(&mut self, headers: &HeaderMap, body: Body) -> Result<Response, Fault> {
        self.advance(Stage::ParsingEnvelope);
        let content_type = self.negotiate(headers)?;
        // Untrusted origins are turned away before their body is read.
        self.admit_origin(headers)?;
        let bytes = self.read_body(body).await?;
        let call = self.decode(content_type, &bytes)?;
        self.type_name = Some(call.type_name().to_owned());

        self.advance(Stage::Authorizing);
        let identity = self.authorize(headers, &call)?;

        match call {
            RemoteCall::Query(call) => self.query(call, identity, content_type).await,
            RemoteCall::Dispatch(dispatch) => {
                self.command(dispatch, identity, content_type).await
            }
        }
    }

    fn negotiate(&mut self, headers: &HeaderMap) -> Result<ContentType, Fault> {
        let raw = headers
            .get(CONTENT_TYPE)
            .map(|value| String::from_utf8_lossy(value.as_bytes()))
            .unwrap_or_default();
        let content_type = ContentType::from_header(&raw)
            .ok_or_else(|| self.fault(DispatchError::unsupported_content_type(raw.as_ref())))?;
        if let Some(expected) = self
            .state
            .settings
            .content_type
            .filter(|expected| *expected != content_type)
        {
            return Err(self.fault(DispatchError::ContentTypeMismatch {
                expected: expected.to_string(),
                received: content_type.to_string(),
            }));
        }
        self.head.content_type = Some(content_type);
        Ok(content_type)
    }

    async fn read_body(&self, body: Body) -> Result<BytesMut, Fault> {
        let limit = self.state.settings.max_request_bytes;
        let mut stream = body.into_data_stream();
        let mut collected = BytesMut::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|error| {
                self.fault(DispatchError::UnreadableBody {
                    message: error.to_string(),
                })
            })?;
            if collected.len().saturating_add(chunk.len()) > limit {
                return Err(self.fault(DispatchError::BodyTooLarge { limit }));
            }
            collected.extend_from_slice(&chunk);
        }
        Ok(collected)
    }

    fn decode(&self, content_type: ContentType, bytes: &[u8]) -> Result<RemoteCall, Fault> {
        let request: RequestData = match &self.state.settings.encryption_key {
            Some(key) => {
                let mut reader = DecryptReader::new(key, bytes).map_err(|error| {
                    self.fault(DispatchError::transport("failed to start request cipher", error))
                })?;
                let decoded = codec::deserialize_from(content_type, &mut reader, bytes.len());
                // A cipher failure surfaces through the codec too; report the
                // cipher, not the symptom.
                if let Err(error) = reader.finish() {
                    return Err(self.fault(DispatchError::transport(
                        "failed to decrypt request",
                        error,
                    )));
                }
                decoded.map_err(|error| self.fault(DispatchError::Decode(error)))?
            }
            None => codec::deserialize(content_type, bytes)
                .map_err(|error| self.fault(DispatchError::Decode(error)))?,
        };
        request.into_call().map_err(|error| self.fault(error))
    }

    fn admit_origin(&self, headers: &HeaderMap) -> Result<(), Fault> {
        let origin: Option<Cow<'_, str>> = headers
            .get(ORIGIN)
            .map(|value| String::from_utf8_lossy(value.as_bytes()));
        if self.state.origins.permits(origin.as_deref()) {
            return Ok(());
        }
        Err(self.fault(DispatchError::OriginNotAllowed {
            origin: origin.map(Cow::into_owned).unwrap_or_default(),
        }))
    }

    fn authorize(&self, headers: &HeaderMap, call: &RemoteCall) -> Result<Identity, Fault> {
        match &self.state.authorizer {
            Some(authorizer) => authorizer
                .authorize(headers)
                .map_err(|rejection| self.fault(rejection)),
            None => Ok(self.state.binder.bind(call.claims())),
        }
    }

    fn context(
        &self,
        source: &str,
        identity: Identity,
        content_type: ContentType,
    ) -> (RequestContext, CancellationToken) {
        let token = self.state.shutdown.child_token();
        let context = RequestContext::new(source, identity, content_type, token.clone());
        (context, token)
    }

    async fn query(
        &mut self,
        call: ProviderCall,
        identity: Identity,
        content_type: ContentType,
    ) -> Result<Response, Fault> {
        self.head.provider_type = HeaderValue::from_str(call.provider_type()).ok();

        self.advance(Stage::ResolvingThrottle);
        let throttle = self
            .state
            .throttles
            .resolve(call.provider_type())
            .map_err(|error| self.fault(error))?;
        let permit = throttle.acquire().await.map_err(|error| self.fault(error))?;

        let (context, token) = self.context(call.source(), identity, content_type);
        let guards = CallGuards::new(permit, None, Some(token.drop_guard()));

        self.advance(Stage::Invoking);
        let result = self
            .state
            .handler
            .call_provider(call, context)
            .await
            .map_err(|error| self.fault(error))?;
        self.respond(result, Some(guards))
    }

    async fn command(
        &mut self,
        dispatch: MessageDispatch,
        identity: Identity,
        content_type: ContentType,
    ) -> Result<Response, Fault> {
        self.advance(Stage::ResolvingThrottle);
        // Resolve before admission so an unregistered type consumes nothing.
        let throttle = self
            .state
            .throttles
            .resolve(dispatch.message_type())
            .map_err(|error| self.fault(error))?;
        let receive = self
            .state
            .receive
            .try_begin()
            .ok_or_else(|| self.fault(DispatchError::ReceiveCeiling))?;
        let permit = throttle.acquire().await.map_err(|error| self.fault(error))?;

        let (context, token) = self.context(dispatch.source(), identity, content_type);
        self.advance(Stage::Invoking);

        if dispatch.wait() {
            let guards = CallGuards::new(permit, Some(receive), Some(token.drop_guard()));
            let result = self
                .state
                .handler
                .handle_command_await(dispatch, context)
                .await
                .map_err(|error| self.fault(error))?;
            return self.respond(result, Some(guards));
        }

        let message_type = dispatch.message_type().to_owned();
        let pending = self
            .state
            .handler
            .prepare_command(dispatch, context)
            .map_err(|error| self.fault(error))?;
        let guards = CallGuards::new(permit, Some(receive), None);
        tokio::spawn(async move {
            let outcome = pending.await;
            drop(guards);
            if let Err(failure) = outcome {
                match failure.kind() {
                    HandlerErrorKind::NotWired => error!(
                        target: DISPATCH_TARGET,
                        message_type = message_type.as_str(),
                        error = %failure,
                        "command handler not wired"
                    ),
                    HandlerErrorKind::Business | HandlerErrorKind::InvalidArguments => warn!(
                        target: DISPATCH_TARGET,
                        message_type = message_type.as_str(),
                        error = %failure,
                        "fire-and-forget command failed"
                    ),
                }
            }
        });
        self.respond(CallResponse::Void, None)
    }

    fn respond(
        &mut self,
        result: CallResponse,
        guards: Option<CallGuards>,
    ) -> Result<Response, Fault> {
        self.advance(Stage::Responding);
        self.head.status = StatusCode::OK;
        response::write(
            &self.head,
            self.state.settings.encryption_key.as_ref(),
            result,
            &self.state.buffers,
            guards,
        )
        .map_err(|error| self.fault(error))
    }

    fn fault_response(&self, fault: Fault) -> Response {
        let Fault { stage, error: failure } = fault;
        let status = failure.status_code();
        let type_name = self.type_name.as_deref().unwrap_or_default();
        match failure.class() {
            FaultClass::Configuration => error!(
                target: DISPATCH_TARGET,
                stage = %stage,
                type_name,
                kind = failure.kind_name(),
                error = %failure,
                "request failed: server is misconfigured"
            ),
            FaultClass::Transport => error!(
                target: DISPATCH_TARGET,
                stage = %stage,
                type_name,
                error = %failure,
                "request failed in transport"
            ),
            FaultClass::Admission => warn!(
                target: DISPATCH_TARGET,
                stage = %stage,
                type_name,
                error = %failure,
                "request rejected: at capacity"
            ),
            FaultClass::Unauthorized => info!(
                target: DISPATCH_TARGET,
                stage = %stage,
                type_name,
                error = %failure,
                "request rejected: unauthorized"
            ),
            FaultClass::Malformed | FaultClass::Handler => debug!(
                target: DISPATCH_TARGET,
                stage = %stage,
                type_name,
                kind = failure.kind_name(),
                error = %failure,
                "request failed"
            ),
        }
        let mut head = self.head.clone();
        head.status = status;
        response::remote_error(
            &head,
            self.state.settings.encryption_key.as_ref(),
            &failure.remote_error(),
        )
    }
}
