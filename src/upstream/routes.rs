//! Built-in routes that relay client calls to the cryptonode.

use axum::http::{header, HeaderValue};

use crate::context::Context;
use crate::routing::{HandlerTriad, Methods, Router, Vars};
use crate::task::{Input, Output, PayloadError, Status};
use crate::upstream::types::MulticastAck;

/// Path the relay listens on and forwards to.
pub const JSON_RPC_PATH: &str = "/json_rpc";

/// Register `POST /json_rpc`: the body goes to the cryptonode verbatim and
/// its reply goes back to the client.
pub fn register_forward_routes(router: &mut Router) {
    router.add_route(JSON_RPC_PATH, Methods::POST, HandlerTriad::new(relay_json_rpc));
}

/// Answer a multicast callback from the cryptonode with `{"status":"OK"}`.
pub fn acknowledge(output: &mut Output) -> Result<(), PayloadError> {
    output.load(&MulticastAck::default())
}

fn relay_json_rpc(_: &Vars, input: &Input, ctx: &mut Context, output: &mut Output) -> Status {
    output.set_body(input.body.to_vec());
    output
        .headers
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if ctx.last_status() == Status::Forward {
        return Status::Ok;
    }
    output.path = JSON_RPC_PATH.to_string();
    Status::Forward
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Method;

    #[test]
    fn relay_is_registered_for_post_only() {
        let mut router = Router::new();
        register_forward_routes(&mut router);
        router.compile().unwrap();
        assert!(router.match_route(JSON_RPC_PATH, &Method::POST).is_ok());
        assert!(router.match_route(JSON_RPC_PATH, &Method::GET).is_err());
    }

    #[test]
    fn relay_forwards_once_then_returns_reply() {
        let mut ctx = Context::new(std::sync::Arc::new(crate::context::GlobalContext::new()));
        let input = Input::from_body(r#"{"method":"get_info"}"#);
        let mut output = Output::default();

        assert_eq!(relay_json_rpc(&Vars::new(), &input, &mut ctx, &mut output), Status::Forward);
        assert_eq!(output.path, JSON_RPC_PATH);
        assert_eq!(output.body, input.body.to_vec());

        ctx.set_last_status(Status::Forward);
        let mut output = Output::default();
        assert_eq!(relay_json_rpc(&Vars::new(), &input, &mut ctx, &mut output), Status::Ok);
    }

    #[test]
    fn acknowledge_writes_ok_status() {
        let mut output = Output::default();
        acknowledge(&mut output).unwrap();
        assert_eq!(output.body, br#"{"status":"OK"}"#.to_vec());
        assert_eq!(output.headers[header::CONTENT_TYPE], "application/json");
    }
}
