use app::user;
use okapi::openapi3::{Object, SecurityRequirement, SecurityScheme, SecuritySchemeData};
use rocket::{
    async_trait,
    http::Status,
    request::{FromRequest, Outcome},
    Request,
};
use rocket_okapi::{
    gen::OpenApiGenerator,
    request::{OpenApiFromRequest, RequestHeaderInput},
};
use thiserror::Error;

use crate::state::RocketState;

/// A request guard proving the caller presented a valid API key. Every route handler that acts on
/// behalf of a user takes one of these; `authenticate` is the single piece of request
/// authentication the core retains.
pub struct AuthGuard(user::Id);

impl AuthGuard {
    pub fn user_id(&self) -> user::Id {
        self.0
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("access denied")]
    AccessDenied(#[from] app::auth::AccessDenied),
    #[error("rate limit exceeded")]
    RateLimited,
}

const TOKEN_HEADER: &str = "X-Auth-Token";

#[async_trait]
impl<'r> FromRequest<'r> for AuthGuard {
    type Error = Error;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let Some(token) = req.headers().get_one(TOKEN_HEADER) else {
            return Outcome::Failure((Status::Forbidden, app::auth::AccessDenied.into()));
        };

        let state = req.rocket().state::<RocketState>().unwrap();
        match app::auth::authenticate(&state.db, token).await {
            Ok(user_id) => {
                if state.rate_limit.limit(user_id) {
                    log::info!("rate limiting user {:?}", user_id);
                    Outcome::Failure((Status::TooManyRequests, Error::RateLimited))
                } else {
                    Outcome::Success(AuthGuard(user_id))
                }
            }
            Err(e) => Outcome::Failure((Status::Forbidden, e.into())),
        }
    }
}

impl<'a> OpenApiFromRequest<'a> for AuthGuard {
    fn from_request_input(
        _gen: &mut OpenApiGenerator,
        _name: String,
        _required: bool,
    ) -> rocket_okapi::Result<RequestHeaderInput> {
        Ok(openapi_auth())
    }
}

fn openapi_auth() -> RequestHeaderInput {
    let security_scheme = SecurityScheme {
        description: Some(format!(
            "Requires an API key to access: \"{}\".",
            TOKEN_HEADER
        )),
        data: SecuritySchemeData::ApiKey {
            name: TOKEN_HEADER.to_owned(),
            location: "header".to_owned(),
        },
        extensions: Object::default(),
    };
    let mut security_req = SecurityRequirement::new();
    security_req.insert(TOKEN_HEADER.to_owned(), Vec::new());
    RequestHeaderInput::Security(TOKEN_HEADER.to_owned(), security_scheme, security_req)
}
