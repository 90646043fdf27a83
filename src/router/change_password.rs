use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::AppState;
use crate::error::{Message, Result};
use crate::passwd::{self, ChangeRequest};
use crate::router::Valid;

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Body {
    #[validate(length(min = 1, message = "Username is required."))]
    username: String,
    #[validate(length(min = 1, message = "Current password is required."))]
    current_password: String,
    #[validate(length(
        min = 8,
        max = 255,
        message = "New password must contain at least 8 characters."
    ))]
    new_password: String,
    #[validate(must_match(
        other = "new_password",
        message = "New password and confirmation do not match."
    ))]
    confirm_password: String,
}

fn same_password() -> ValidationErrors {
    let mut errors = ValidationErrors::new();
    errors.add(
        "new_password",
        ValidationError::new("must_differ").with_message(
            "New password must differ from the current password.".into(),
        ),
    );
    errors
}

/// Handler to change the caller's directory password.
pub async fn handler(
    State(state): State<AppState>,
    Valid(body): Valid<Body>,
) -> Result<(StatusCode, Json<Message>)> {
    if body.new_password == body.current_password {
        return Err(same_password().into());
    }

    let request = ChangeRequest {
        username: body.username,
        current_password: body.current_password,
        new_password: body.new_password,
    };

    passwd::change_password(state.directory.as_ref(), &state.config.ldap, &request)
        .await?;

    Ok((
        StatusCode::OK,
        Json(Message::ok("password changed successfully")),
    ))
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::json;

    use crate::error::Message;
    use crate::ldap::testing::{Call, FakeDirectory};
    use crate::{app, make_request, test_state};

    const ADMIN_DN: &str = "cn=admin,dc=example,dc=com";
    const ALICE_DN: &str = "uid=alice,ou=users,dc=example,dc=com";

    fn directory_with_alice() -> FakeDirectory {
        FakeDirectory::new()
            .with_password(ADMIN_DN, "admin-secret")
            .with_password(ALICE_DN, "oldpass1")
            .with_search_results([ALICE_DN])
    }

    fn alice_body() -> serde_json::Value {
        json!({
            "username": "alice",
            "currentPassword": "oldpass1",
            "newPassword": "newpass1",
            "confirmPassword": "newpass1",
        })
    }

    async fn post_change(
        directory: FakeDirectory,
        body: serde_json::Value,
    ) -> (StatusCode, Message) {
        let app = app(test_state(directory));

        let response = make_request(
            app,
            Method::POST,
            "/api/change-password",
            body.to_string(),
        )
        .await;

        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let message: Message = serde_json::from_slice(&bytes).unwrap();
        (status, message)
    }

    #[tokio::test]
    async fn change_password_succeeds() {
        let directory = directory_with_alice();

        let (status, message) =
            post_change(directory.clone(), alice_body()).await;

        assert_eq!(status, StatusCode::OK);
        assert!(message.success);
        assert_eq!(message.message, "password changed successfully");

        let calls = directory.calls();
        assert!(calls.contains(&Call::Modify {
            conn: 1,
            dn: ALICE_DN.into(),
            value: "newpass1".into(),
        }));
        // Both connections released.
        assert_eq!(
            calls
                .iter()
                .filter(|call| matches!(call, Call::Unbind { .. }))
                .count(),
            2
        );
    }

    #[tokio::test]
    async fn unknown_user_is_reported() {
        // No search results configured: nothing matches the filter.
        let directory =
            FakeDirectory::new().with_password(ADMIN_DN, "admin-secret");

        let body = json!({
            "username": "ghost",
            "currentPassword": "oldpass1",
            "newPassword": "newpass1",
            "confirmPassword": "newpass1",
        });
        let (status, message) = post_change(directory.clone(), body).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(!message.success);
        assert_eq!(message.message, "user does not exist");
        assert!(!directory
            .calls()
            .iter()
            .any(|call| matches!(call, Call::Modify { .. })));
    }

    #[tokio::test]
    async fn wrong_current_password_is_reported() {
        let directory = FakeDirectory::new()
            .with_password(ADMIN_DN, "admin-secret")
            .with_password(ALICE_DN, "somethingelse")
            .with_search_results([ALICE_DN]);

        let (status, message) =
            post_change(directory.clone(), alice_body()).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(!message.success);
        assert_eq!(message.message, "current password incorrect");
        assert!(!directory
            .calls()
            .iter()
            .any(|call| matches!(call, Call::Modify { .. })));
    }

    #[tokio::test]
    async fn directory_outage_is_a_generic_failure() {
        let directory = directory_with_alice().failing_connect_at(1);

        let (status, message) = post_change(directory, alice_body()).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!message.success);
        assert_eq!(message.message, "password change failed");
    }

    #[tokio::test]
    async fn missing_field_is_rejected_before_any_connection() {
        let directory = FakeDirectory::new();

        let body = json!({
            "username": "alice",
            "currentPassword": "oldpass1",
            "newPassword": "newpass1",
        });
        let (status, message) = post_change(directory.clone(), body).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(!message.success);
        assert_eq!(directory.connections_opened(), 0);
    }

    #[tokio::test]
    async fn empty_username_is_rejected_before_any_connection() {
        let directory = FakeDirectory::new();

        let body = json!({
            "username": "",
            "currentPassword": "oldpass1",
            "newPassword": "newpass1",
            "confirmPassword": "newpass1",
        });
        let (status, message) = post_change(directory.clone(), body).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(message.message, "Username is required.");
        assert_eq!(directory.connections_opened(), 0);
    }

    #[tokio::test]
    async fn short_new_password_is_rejected_before_any_connection() {
        let directory = FakeDirectory::new();

        let body = json!({
            "username": "alice",
            "currentPassword": "oldpass1",
            "newPassword": "short1",
            "confirmPassword": "short1",
        });
        let (status, message) = post_change(directory.clone(), body).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            message.message,
            "New password must contain at least 8 characters."
        );
        assert_eq!(directory.connections_opened(), 0);
    }

    #[tokio::test]
    async fn mismatched_confirmation_is_rejected_before_any_connection() {
        let directory = FakeDirectory::new();

        let body = json!({
            "username": "alice",
            "currentPassword": "oldpass1",
            "newPassword": "newpass1",
            "confirmPassword": "newpass2",
        });
        let (status, message) = post_change(directory.clone(), body).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            message.message,
            "New password and confirmation do not match."
        );
        assert_eq!(directory.connections_opened(), 0);
    }

    #[tokio::test]
    async fn unchanged_password_is_rejected_before_any_connection() {
        let directory = FakeDirectory::new();

        let body = json!({
            "username": "alice",
            "currentPassword": "oldpass1",
            "newPassword": "oldpass1",
            "confirmPassword": "oldpass1",
        });
        let (status, message) = post_change(directory.clone(), body).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            message.message,
            "New password must differ from the current password."
        );
        assert_eq!(directory.connections_opened(), 0);
    }
}
