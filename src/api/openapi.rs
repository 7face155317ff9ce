//! `OpenAPI` document served at `/openapi.json`.
//!
//! Title, version and contact come from Cargo metadata so the document never
//! drifts from the crate it describes.

#![allow(clippy::needless_for_each)]

use utoipa::{
    openapi::{Contact, License},
    OpenApi,
};

use crate::{
    api::{
        error::ErrorBody,
        handlers::{admin, auth, health, recovery},
        types,
    },
    model::{Identity, LoginAttempt, Role, Session},
};

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        auth::login,
        auth::logout,
        auth::refresh,
        auth::session,
        auth::sessions,
        auth::change_password,
        auth::resend_verification,
        recovery::forgot,
        recovery::reset,
        recovery::verify_email,
        admin::set_role,
        admin::deactivate,
        admin::reactivate,
        admin::unlock,
        admin::attempts,
    ),
    components(schemas(
        health::Health,
        ErrorBody,
        Identity,
        Session,
        LoginAttempt,
        Role,
        types::LoginRequest,
        types::TokenResponse,
        types::RefreshRequest,
        types::SessionsResponse,
        types::ChangePasswordRequest,
        types::ForgotPasswordRequest,
        types::ResetPasswordRequest,
        types::VerifyEmailRequest,
        types::MessageResponse,
        types::SetRoleRequest,
        types::DeactivateResponse,
        types::AttemptsResponse,
    )),
    tags(
        (name = "health", description = "Liveness and database reachability"),
        (name = "auth", description = "Login, sessions and password change"),
        (name = "recovery", description = "Password reset and email verification"),
        (name = "admin", description = "Account administration, admin level only"),
    )
)]
struct ApiDoc;

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    let mut doc = ApiDoc::openapi();
    doc.info.title = env!("CARGO_PKG_NAME").to_string();
    doc.info.version = env!("CARGO_PKG_VERSION").to_string();
    doc.info.description = optional_str(env!("CARGO_PKG_DESCRIPTION")).map(str::to_string);
    doc.info.contact = cargo_contact();
    doc.info.license = optional_str(env!("CARGO_PKG_LICENSE")).map(|identifier| {
        let mut license = License::new(identifier);
        license.identifier = Some(identifier.to_string());
        license
    });
    doc
}

fn cargo_contact() -> Option<Contact> {
    // Cargo authors are `:` separated and may include "Name <email>".
    let primary = env!("CARGO_PKG_AUTHORS").split(':').next().map(str::trim)?;
    let (name, email) = parse_author(primary);
    if name.is_none() && email.is_none() {
        return None;
    }
    let mut contact = Contact::new();
    contact.name = name.map(str::to_string);
    contact.email = email.map(str::to_string);
    Some(contact)
}

fn optional_str(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

fn parse_author(author: &str) -> (Option<&str>, Option<&str>) {
    match author.split_once('<') {
        Some((name, rest)) => (
            optional_str(name),
            optional_str(rest.trim_end_matches('>')),
        ),
        None => (optional_str(author), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_every_route() {
        let doc = openapi();
        assert_eq!(doc.info.title, "sigma");
        for path in [
            "/health",
            "/v1/auth/login",
            "/v1/auth/logout",
            "/v1/auth/refresh",
            "/v1/auth/session",
            "/v1/auth/sessions",
            "/v1/auth/password/change",
            "/v1/auth/password/forgot",
            "/v1/auth/password/reset",
            "/v1/auth/email/verify",
            "/v1/auth/email/resend",
            "/v1/admin/accounts/{id}/role",
            "/v1/admin/accounts/{id}/attempts",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }

    #[test]
    fn author_parsing() {
        assert_eq!(
            parse_author("Ana Lima <ana@example.com>"),
            (Some("Ana Lima"), Some("ana@example.com"))
        );
        assert_eq!(parse_author("Ana"), (Some("Ana"), None));
        assert_eq!(parse_author(""), (None, None));
    }
}
