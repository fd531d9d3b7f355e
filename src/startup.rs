use actix_web::dev::Server;
use actix_web::{error::JsonPayloadError, middleware::Logger, web, App, HttpRequest, HttpServer};
use sqlx::PgPool;
use std::net::TcpListener;
use std::sync::Arc;

use crate::auth::{AuthService, BcryptHasher};
use crate::configuration::JwtSettings;
use crate::error::{AppError, ValidationError};
use crate::ledger::PgLedger;
use crate::logger::LoggerMiddleware;
use crate::middleware::JwtMiddleware;
use crate::routes::{health_check, login, logout, refresh};
use crate::users::PgUserDirectory;

/// Wire the auth service to Postgres-backed collaborators
///
/// # Errors
/// Returns `AppError::Config` if the JWT settings are unusable
pub fn build_auth_service(pool: PgPool, jwt: JwtSettings) -> Result<AuthService, AppError> {
    AuthService::new(
        Arc::new(PgLedger::new(pool.clone())),
        Arc::new(PgUserDirectory::new(pool)),
        Arc::new(BcryptHasher::default()),
        jwt,
    )
}

fn json_error_handler(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    AppError::from(ValidationError::MalformedBody(err.to_string())).into()
}

pub fn run(listener: TcpListener, auth_service: AuthService) -> Result<Server, std::io::Error> {
    let auth = web::Data::new(auth_service);

    let server = HttpServer::new(move || {
        App::new()
            // Global middleware
            .wrap(Logger::default())
            .wrap(LoggerMiddleware)
            // Shared state
            .app_data(auth.clone())
            .app_data(web::JsonConfig::default().error_handler(json_error_handler))
            // Public routes
            .route("/health_check", web::get().to(health_check))
            .service(
                web::scope("/auth")
                    .route("/login", web::post().to(login))
                    .route("/refresh", web::post().to(refresh))
                    // Protected routes (require JWT authentication)
                    .service(
                        web::resource("/logout")
                            .wrap(JwtMiddleware::new(auth.clone()))
                            .route(web::post().to(logout)),
                    ),
            )
    })
    .listen(listener)?
    .run();

    Ok(server)
}
