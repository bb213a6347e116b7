// Sign-in demo: await a request the way a UI form handler would.
//
// Run with: RUST_LOG=debug cargo run --example sign_in

use std::time::Duration;

use anyhow::{Context, Result};
use promise_actions::{
    Action, ActionTriple, PromiseMiddleware, Rejection, RequestAction, Scheduler, StoreBuilder,
    WorkerContext,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone)]
struct Credentials {
    user: String,
    password: String,
}

#[derive(Debug, Clone)]
struct Session {
    token: String,
}

#[derive(Debug, Clone)]
struct AuthError {
    message: String,
}

#[derive(Debug, Default)]
struct AuthState {
    token: Option<String>,
    attempts: u32,
}

fn auth_reducer(state: &mut AuthState, action: &Action) {
    if action.is("SIGN_IN_REQUEST") {
        state.attempts += 1;
    }
    if let Some(session) = action.payload_ref::<Session>() {
        state.token = Some(session.token.clone());
    }
}

async fn authenticate(
    request: RequestAction<Credentials, Session, AuthError>,
    ctx: WorkerContext<AuthState>,
) -> Result<Session, AuthError> {
    let credentials = request.payload();
    tracing::info!(user = %credentials.user, "checking credentials");

    // Stand-in for a network round trip.
    ctx.call(tokio::time::sleep(Duration::from_millis(100)))
        .await
        .map_err(|err| AuthError {
            message: err.to_string(),
        })?;

    if credentials.password == "correct horse" {
        Ok(Session {
            token: format!("token-for-{}", credentials.user),
        })
    } else {
        Err(AuthError {
            message: "invalid password".to_string(),
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,promise_actions=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let sign_in: ActionTriple<Credentials, Session, AuthError> = ActionTriple::new("SIGN_IN");

    let store = StoreBuilder::new(AuthState::default())
        .with_middleware(PromiseMiddleware::new())
        .with_reducer(auth_reducer)
        .build();

    let scheduler = Scheduler::new(store.clone());
    let watch = scheduler.watch_leading(&sign_in, authenticate);

    for password in ["hunter2", "correct horse"] {
        let promise = store
            .dispatch_request(sign_in.request(Credentials {
                user: "ada".to_string(),
                password: password.to_string(),
            }))
            .context("promise middleware is not installed")?;

        match promise.await {
            Ok(session) => tracing::info!(token = %session.token, "signed in"),
            Err(Rejection::Failed(err)) => {
                tracing::warn!(reason = %err.message, "sign in rejected")
            }
            Err(other) => tracing::warn!(%other, "sign in never settled"),
        }
    }

    let (token, attempts) = store.select(|s| (s.token.clone(), s.attempts));
    tracing::info!(?token, attempts, "final auth state");

    watch.shutdown().await;
    Ok(())
}
