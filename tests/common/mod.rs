use std::env;

use anyhow::{anyhow, ensure, Context, Result};
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use chrono::NaiveDateTime;
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::PgConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use http_body_util::BodyExt;
use once_cell::sync::Lazy;
use rfihub::auth::jwt::JwtService;
use rfihub::auth::password::hash_password;
use rfihub::config::AppConfig;
use rfihub::db::{self, PgPool};
use rfihub::models::{NewCompany, NewCompanyUser, NewProject, NewRfi, NewUser, Notification};
use rfihub::routes;
use rfihub::state::AppState;
use rfihub::workflow::{Stage, Status};
use serde::Serialize;
use tokio::sync::Mutex;
use tower::util::ServiceExt;
use uuid::Uuid;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

static DB_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

pub struct TestApp {
    pub state: AppState,
    router: Router,
}

impl TestApp {
    pub async fn new() -> Result<Self> {
        let database_url = env::var("TEST_DATABASE_URL")
            .context("TEST_DATABASE_URL must be set for integration tests")?;

        let config = AppConfig {
            database_url: database_url.clone(),
            database_max_pool_size: db::DEFAULT_MAX_POOL_SIZE,
            server_host: "127.0.0.1".to_string(),
            server_port: 0,
            jwt_secret: "test-secret".to_string(),
            jwt_issuer: "test-issuer".to_string(),
            jwt_audience: "test-audience".to_string(),
            jwt_expiry_minutes: 60,
            refresh_token_expiry_days: 30,
            refresh_cookie_secure: false,
            refresh_cookie_domain: None,
            cors_allowed_origin: None,
            client_link_expiry_days: 14,
            dispatch_poll_seconds: 2,
        };

        let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
        prepare_database(&pool).await?;

        let jwt = JwtService::from_config(&config)?;
        let state = AppState::new(pool.clone(), config, jwt);
        let router = routes::create_router(state.clone());

        Ok(Self { state, router })
    }

    pub async fn cleanup(&self) -> Result<()> {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get cleanup connection: {err}"))?;
            truncate_all(&mut conn)?;
            Ok(())
        })
        .await
        .context("cleanup task panicked")?
    }

    pub async fn insert_company(&self, name: &str) -> Result<Uuid> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            let company = NewCompany {
                id: Uuid::new_v4(),
                name,
            };
            diesel::insert_into(rfihub::schema::companies::table)
                .values(&company)
                .execute(conn)
                .context("failed to insert company")?;
            Ok(company.id)
        })
        .await
    }

    pub async fn insert_user(&self, email: &str, password: &str) -> Result<Uuid> {
        let email = email.to_string();
        let password = password.to_string();
        self.with_conn(move |conn| {
            let password_hash = hash_password(&password)?;
            let user = NewUser {
                id: Uuid::new_v4(),
                email: email.clone(),
                password_hash,
                display_name: email,
            };
            diesel::insert_into(rfihub::schema::users::table)
                .values(&user)
                .execute(conn)
                .context("failed to insert user")?;
            Ok(user.id)
        })
        .await
    }

    pub async fn insert_membership(
        &self,
        user_id: Uuid,
        company_id: Uuid,
        role: &str,
    ) -> Result<()> {
        let role = role.to_string();
        self.with_conn(move |conn| {
            let membership = NewCompanyUser {
                user_id,
                company_id,
                role,
            };
            diesel::insert_into(rfihub::schema::company_users::table)
                .values(&membership)
                .execute(conn)
                .context("failed to insert membership")?;
            Ok(())
        })
        .await
    }

    /// User plus membership in one go; most tests want exactly that.
    pub async fn seed_member(
        &self,
        email: &str,
        password: &str,
        company_id: Uuid,
        role: &str,
    ) -> Result<Uuid> {
        let user_id = self.insert_user(email, password).await?;
        self.insert_membership(user_id, company_id, role).await?;
        Ok(user_id)
    }

    #[allow(dead_code)]
    pub async fn insert_project(
        &self,
        company_id: Uuid,
        created_by: Uuid,
        name: &str,
    ) -> Result<Uuid> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            let project = NewProject {
                id: Uuid::new_v4(),
                company_id,
                name,
                client_company_name: "Client & Co".to_string(),
                created_by,
            };
            diesel::insert_into(rfihub::schema::projects::table)
                .values(&project)
                .execute(conn)
                .context("failed to insert project")?;
            Ok(project.id)
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn insert_rfi(&self, project_id: Uuid, created_by: Uuid) -> Result<Uuid> {
        self.with_conn(move |conn| {
            let rfi = NewRfi {
                id: Uuid::new_v4(),
                project_id,
                number: 1,
                subject: "Seeded question".to_string(),
                question: "Where does this duct terminate?".to_string(),
                status: Status::Draft.as_str().to_string(),
                stage: Stage::Submitted.as_str().to_string(),
                due_date: None,
                assigned_to: None,
                created_by,
            };
            diesel::insert_into(rfihub::schema::rfis::table)
                .values(&rfi)
                .execute(conn)
                .context("failed to insert rfi")?;
            Ok(rfi.id)
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn set_rfi_created_at(&self, rfi_id: Uuid, created_at: NaiveDateTime) -> Result<()> {
        self.with_conn(move |conn| {
            use rfihub::schema::rfis::dsl;
            diesel::update(dsl::rfis.find(rfi_id))
                .set(dsl::created_at.eq(created_at))
                .execute(conn)
                .context("failed to backdate rfi")?;
            Ok(())
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn expire_client_links(&self, rfi_id: Uuid) -> Result<()> {
        self.with_conn(move |conn| {
            use rfihub::schema::client_access_tokens::dsl;
            let past = chrono::Utc::now().naive_utc() - chrono::Duration::days(1);
            diesel::update(dsl::client_access_tokens.filter(dsl::rfi_id.eq(rfi_id)))
                .set(dsl::expires_at.eq(past))
                .execute(conn)
                .context("failed to expire client links")?;
            Ok(())
        })
        .await
    }

    pub async fn login_token(&self, email: &str, password: &str) -> Result<String> {
        #[derive(Serialize)]
        struct LoginPayload<'a> {
            email: &'a str,
            password: &'a str,
        }

        let response = self
            .post_json("/api/auth/login", &LoginPayload { email, password }, None, None)
            .await?;

        ensure!(
            response.status() == StatusCode::OK,
            "login failed with status {}",
            response.status()
        );

        let body = body_to_vec(response.into_body()).await?;
        #[derive(serde::Deserialize)]
        struct LoginResponse {
            access_token: String,
        }
        let parsed: LoginResponse = serde_json::from_slice(&body)?;
        Ok(parsed.access_token)
    }

    #[allow(dead_code)]
    pub async fn notifications_by_type(&self, ty: &str) -> Result<Vec<Notification>> {
        let ty = ty.to_string();
        self.with_conn(move |conn| {
            use rfihub::schema::notifications::dsl::{
                event_type as event_type_col, notifications as notifications_table,
            };
            let rows = notifications_table
                .filter(event_type_col.eq(&ty))
                .load::<Notification>(conn)
                .context("failed to load notifications")?;
            Ok(rows)
        })
        .await
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
        company: Option<Uuid>,
    ) -> Result<hyper::Response<Body>> {
        let body = serde_json::to_vec(payload)?;
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        if let Some(company) = company {
            builder = builder.header("x-company-id", company.to_string());
        }
        let request = builder.body(Body::from(body))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    #[allow(dead_code)]
    pub async fn patch_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
        company: Option<Uuid>,
    ) -> Result<hyper::Response<Body>> {
        let body = serde_json::to_vec(payload)?;
        let mut builder = Request::builder()
            .method(Method::PATCH)
            .uri(path)
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        if let Some(company) = company {
            builder = builder.header("x-company-id", company.to_string());
        }
        let request = builder.body(Body::from(body))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    pub async fn get(
        &self,
        path: &str,
        token: Option<&str>,
        company: Option<Uuid>,
    ) -> Result<hyper::Response<Body>> {
        let mut builder = Request::builder().method(Method::GET).uri(path);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        if let Some(company) = company {
            builder = builder.header("x-company-id", company.to_string());
        }
        let request = builder.body(Body::empty())?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    #[allow(dead_code)]
    pub async fn get_with_preview(
        &self,
        path: &str,
        token: &str,
        company: Option<Uuid>,
        preview_role: &str,
    ) -> Result<hyper::Response<Body>> {
        let mut builder = Request::builder()
            .method(Method::GET)
            .uri(path)
            .header("authorization", format!("Bearer {token}"))
            .header("x-preview-role", preview_role);
        if let Some(company) = company {
            builder = builder.header("x-company-id", company.to_string());
        }
        let request = builder.body(Body::empty())?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    #[allow(dead_code)]
    pub async fn delete(
        &self,
        path: &str,
        token: Option<&str>,
        company: Option<Uuid>,
    ) -> Result<hyper::Response<Body>> {
        let mut builder = Request::builder().method(Method::DELETE).uri(path);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        if let Some(company) = company {
            builder = builder.header("x-company-id", company.to_string());
        }
        let request = builder.body(Body::empty())?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut PgConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get database connection: {err}"))?;
            f(&mut conn)
        })
        .await
        .context("connection task panicked")?
    }
}

pub async fn acquire_db_lock() -> tokio::sync::MutexGuard<'static, ()> {
    DB_LOCK.lock().await
}

pub async fn body_to_vec(body: Body) -> Result<Vec<u8>> {
    let collected = body
        .collect()
        .await
        .map_err(|err| anyhow!("failed to read response body: {err}"))?;
    Ok(collected.to_bytes().to_vec())
}

async fn prepare_database(pool: &PgPool) -> Result<()> {
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut conn = pool
            .get()
            .map_err(|err| anyhow!("failed to acquire connection: {err}"))?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|err| anyhow!("failed to run migrations: {err}"))?;
        truncate_all(&mut conn)?;
        Ok(())
    })
    .await
    .context("migration task panicked")?
}

fn truncate_all(conn: &mut PgConnection) -> Result<()> {
    conn.batch_execute(
        "TRUNCATE TABLE notifications, client_access_tokens, rfis, projects, company_users, refresh_tokens, users, companies RESTART IDENTITY CASCADE;",
    )
    .context("failed to truncate tables")?;
    Ok(())
}
