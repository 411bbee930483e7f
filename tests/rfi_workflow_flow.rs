mod common;

use anyhow::Result;
use axum::http::StatusCode;
use chrono::NaiveDate;
use common::{acquire_db_lock, body_to_vec, TestApp};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Deserialize)]
struct RfiView {
    id: Uuid,
    number: i32,
    status: String,
    stage: String,
    response: Option<String>,
    overdue: bool,
}

async fn read_rfi(app: &TestApp, rfi_id: Uuid, token: &str) -> Result<RfiView> {
    let response = app
        .get(&format!("/api/rfis/{rfi_id}"), Some(token), None)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_vec(response.into_body()).await?;
    Ok(serde_json::from_slice(&body)?)
}

#[tokio::test]
async fn full_lifecycle_walks_every_stage() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let company_id = app.insert_company("Acme Builders").await?;
    let admin = app
        .seed_member("admin@acme.test", "admin-pass", company_id, "admin")
        .await?;
    let project_id = app.insert_project(company_id, admin, "Tower refit").await?;
    let token = app.login_token("admin@acme.test", "admin-pass").await?;

    #[derive(serde::Serialize)]
    struct CreateRfi<'a> {
        subject: &'a str,
        question: &'a str,
    }
    let create = app
        .post_json(
            &format!("/api/projects/{project_id}/rfis"),
            &CreateRfi {
                subject: "Slab penetration",
                question: "Can we core through grid line 4?",
            },
            Some(&token),
            None,
        )
        .await?;
    assert_eq!(create.status(), StatusCode::CREATED);
    let body = body_to_vec(create.into_body()).await?;
    let rfi: RfiView = serde_json::from_slice(&body)?;
    assert_eq!(rfi.number, 1);
    assert_eq!(rfi.status, "draft");
    assert_eq!(rfi.stage, "submitted");

    let activate = app
        .post_json(
            &format!("/api/rfis/{}/activate", rfi.id),
            &serde_json::json!({}),
            Some(&token),
            None,
        )
        .await?;
    assert_eq!(activate.status(), StatusCode::OK);

    let field_work = app
        .post_json(
            &format!("/api/rfis/{}/field-work", rfi.id),
            &serde_json::json!({}),
            Some(&token),
            None,
        )
        .await?;
    assert_eq!(field_work.status(), StatusCode::OK);

    #[derive(serde::Serialize)]
    struct Submit {
        due_date: NaiveDate,
        assigned_to: Uuid,
    }
    let submit = app
        .post_json(
            &format!("/api/rfis/{}/submit", rfi.id),
            &Submit {
                due_date: NaiveDate::from_ymd_opt(2026, 9, 1).unwrap(),
                assigned_to: admin,
            },
            Some(&token),
            None,
        )
        .await?;
    assert_eq!(submit.status(), StatusCode::OK);
    let current = read_rfi(&app, rfi.id, &token).await?;
    assert_eq!(current.status, "active");
    assert_eq!(current.stage, "sent_to_client");

    #[derive(serde::Serialize)]
    struct Respond<'a> {
        response: &'a str,
    }
    let respond = app
        .post_json(
            &format!("/api/rfis/{}/respond", rfi.id),
            &Respond {
                response: "Approved, keep 150mm clear of the tendon.",
            },
            Some(&token),
            None,
        )
        .await?;
    assert_eq!(respond.status(), StatusCode::OK);

    let close = app
        .post_json(
            &format!("/api/rfis/{}/close", rfi.id),
            &serde_json::json!({}),
            Some(&token),
            None,
        )
        .await?;
    assert_eq!(close.status(), StatusCode::OK);

    let final_state = read_rfi(&app, rfi.id, &token).await?;
    assert_eq!(final_state.status, "closed");
    // Closing freezes the stage so history keeps where the RFI stopped.
    assert_eq!(final_state.stage, "response_received");
    assert_eq!(
        final_state.response.as_deref(),
        Some("Approved, keep 150mm clear of the tendon.")
    );

    let status_events = app.notifications_by_type("status_changed").await?;
    assert_eq!(status_events.len(), 4);
    let response_events = app.notifications_by_type("response_received").await?;
    assert_eq!(response_events.len(), 1);
    assert_eq!(response_events[0].metadata["performed_by_type"], "user");

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn rfi_user_without_submit_permission_is_forbidden_and_nothing_moves() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let company_id = app.insert_company("Acme Builders").await?;
    let field_engineer = app
        .seed_member("engineer@acme.test", "engineer-pass", company_id, "rfi_user")
        .await?;
    let project_id = app
        .insert_project(company_id, field_engineer, "Tower refit")
        .await?;
    let rfi_id = app.insert_rfi(project_id, field_engineer).await?;
    let token = app.login_token("engineer@acme.test", "engineer-pass").await?;

    let submit = app
        .post_json(
            &format!("/api/rfis/{rfi_id}/submit"),
            &serde_json::json!({}),
            Some(&token),
            None,
        )
        .await?;
    assert_eq!(submit.status(), StatusCode::FORBIDDEN);

    let unchanged = read_rfi(&app, rfi_id, &token).await?;
    assert_eq!(unchanged.status, "draft");
    assert_eq!(unchanged.stage, "submitted");

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn stale_transition_conflicts_and_leaves_state_alone() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let company_id = app.insert_company("Acme Builders").await?;
    let admin = app
        .seed_member("admin@acme.test", "admin-pass", company_id, "admin")
        .await?;
    let project_id = app.insert_project(company_id, admin, "Tower refit").await?;
    let rfi_id = app.insert_rfi(project_id, admin).await?;
    let token = app.login_token("admin@acme.test", "admin-pass").await?;

    let first = app
        .post_json(
            &format!("/api/rfis/{rfi_id}/activate"),
            &serde_json::json!({}),
            Some(&token),
            None,
        )
        .await?;
    assert_eq!(first.status(), StatusCode::OK);

    // The second caller's expected `from` state is stale now.
    let second = app
        .post_json(
            &format!("/api/rfis/{rfi_id}/activate"),
            &serde_json::json!({}),
            Some(&token),
            None,
        )
        .await?;
    assert_eq!(second.status(), StatusCode::CONFLICT);

    let unchanged = read_rfi(&app, rfi_id, &token).await?;
    assert_eq!(unchanged.status, "active");
    assert_eq!(unchanged.stage, "in_review");

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn empty_response_text_is_a_validation_error() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let company_id = app.insert_company("Acme Builders").await?;
    let admin = app
        .seed_member("admin@acme.test", "admin-pass", company_id, "admin")
        .await?;
    let project_id = app.insert_project(company_id, admin, "Tower refit").await?;
    let rfi_id = app.insert_rfi(project_id, admin).await?;
    let token = app.login_token("admin@acme.test", "admin-pass").await?;

    for step in ["activate", "submit"] {
        let response = app
            .post_json(
                &format!("/api/rfis/{rfi_id}/{step}"),
                &serde_json::json!({}),
                Some(&token),
                None,
            )
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let respond = app
        .post_json(
            &format!("/api/rfis/{rfi_id}/respond"),
            &serde_json::json!({ "response": "   " }),
            Some(&token),
            None,
        )
        .await?;
    assert_eq!(respond.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let unchanged = read_rfi(&app, rfi_id, &token).await?;
    assert_eq!(unchanged.stage, "sent_to_client");
    assert_eq!(unchanged.response, None);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn overdue_is_derived_and_vanishes_outside_open_stages() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let company_id = app.insert_company("Acme Builders").await?;
    let admin = app
        .seed_member("admin@acme.test", "admin-pass", company_id, "admin")
        .await?;
    let project_id = app.insert_project(company_id, admin, "Tower refit").await?;
    let rfi_id = app.insert_rfi(project_id, admin).await?;
    let token = app.login_token("admin@acme.test", "admin-pass").await?;

    // Well past any five-business-day window.
    let long_ago = NaiveDate::from_ymd_opt(2024, 1, 1)
        .unwrap()
        .and_hms_opt(9, 0, 0)
        .unwrap();
    app.set_rfi_created_at(rfi_id, long_ago).await?;

    let draft = read_rfi(&app, rfi_id, &token).await?;
    assert!(draft.overdue, "submitted is an open stage");

    for step in ["activate", "submit"] {
        let response = app
            .post_json(
                &format!("/api/rfis/{rfi_id}/{step}"),
                &serde_json::json!({}),
                Some(&token),
                None,
            )
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let sent = read_rfi(&app, rfi_id, &token).await?;
    assert_eq!(sent.stage, "sent_to_client");
    assert!(!sent.overdue, "sent_to_client is not an open stage");

    app.cleanup().await?;
    Ok(())
}
