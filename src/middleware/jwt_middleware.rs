/// JWT Authentication Middleware
///
/// Validates the bearer access token and stores the resolved user id in
/// request extensions for downstream handlers.

use actix_web::{
    dev::{forward_ready, Payload, Service, ServiceRequest, ServiceResponse, Transform},
    web, Error, FromRequest, HttpMessage, HttpRequest,
};
use futures::future::{ready, LocalBoxFuture, Ready};
use std::rc::Rc;

use crate::auth::AuthService;
use crate::error::{AppError, AuthError};

/// The authenticated caller, set by `JwtMiddleware`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: i64,
}

impl FromRequest for AuthenticatedUser {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(
            req.extensions()
                .get::<AuthenticatedUser>()
                .copied()
                .ok_or(AppError::Auth(AuthError::MissingSecurityContext)),
        )
    }
}

/// JWT middleware for protecting routes
pub struct JwtMiddleware {
    auth: web::Data<AuthService>,
}

impl JwtMiddleware {
    pub fn new(auth: web::Data<AuthService>) -> Self {
        Self { auth }
    }
}

impl<S, B> Transform<S, ServiceRequest> for JwtMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = JwtMiddlewareService<S>;
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(JwtMiddlewareService {
            service: Rc::new(service),
            auth: self.auth.clone(),
        }))
    }
}

pub struct JwtMiddlewareService<S> {
    service: Rc<S>,
    auth: web::Data<AuthService>,
}

fn bearer_token(req: &ServiceRequest) -> Option<String> {
    req.headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

impl<S, B> Service<ServiceRequest> for JwtMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let token = match bearer_token(&req) {
            Some(token) => token,
            None => {
                tracing::warn!(path = %req.path(), "Missing or invalid Authorization header");
                let err = Error::from(AppError::Auth(AuthError::MissingToken));
                return Box::pin(async move { Err(err) });
            }
        };

        match self.auth.verify(&token) {
            Ok(user_id) => {
                req.extensions_mut().insert(AuthenticatedUser { user_id });
                tracing::debug!(user_id = user_id, "JWT validated successfully");

                let service = self.service.clone();
                Box::pin(async move { service.call(req).await })
            }
            Err(e) => {
                tracing::warn!(path = %req.path(), error = %e, "JWT validation failed");
                let err = Error::from(e);
                Box::pin(async move { Err(err) })
            }
        }
    }
}
