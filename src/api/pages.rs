//! Landing pages
//!
//! `/` (home) and `/welcome` (post-login) both show pending flash
//! messages and who is signed in.

use axum::{
    Router,
    extract::State,
    response::Html,
    routing::get,
};
use axum_extra::extract::CookieJar;
use html_escape::{encode_double_quoted_attribute, encode_text};

use crate::AppState;
use crate::auth::Session;
use crate::data::User;
use crate::error::AppError;
use crate::messages::{self, FlashMessage};

pub fn pages_router() -> Router<AppState> {
    Router::new()
        .route("/", get(home))
        .route("/welcome", get(welcome))
}

/// GET /
async fn home(
    State(state): State<AppState>,
    session: Session,
    jar: CookieJar,
) -> Result<(CookieJar, Html<String>), AppError> {
    render_landing_page(&state, session, jar, "Home").await
}

/// GET /welcome
async fn welcome(
    State(state): State<AppState>,
    session: Session,
    jar: CookieJar,
) -> Result<(CookieJar, Html<String>), AppError> {
    render_landing_page(&state, session, jar, "Welcome").await
}

async fn render_landing_page(
    state: &AppState,
    mut session: Session,
    jar: CookieJar,
    title: &str,
) -> Result<(CookieJar, Html<String>), AppError> {
    let pending = messages::drain(&mut session.data);

    let user = match session.data.user_id.as_deref() {
        Some(user_id) => state.users.find_by_id(user_id).await?,
        None => None,
    };

    let html = render_page(title, state.provider.provider_name(), user.as_ref(), &pending);

    // Anonymous visitors without a session don't get one just for looking.
    let jar = if session.id().is_some() {
        session.save(state, jar).await?
    } else {
        jar
    };

    Ok((jar, Html(html)))
}

fn render_page(
    title: &str,
    provider_name: &str,
    user: Option<&User>,
    pending: &[FlashMessage],
) -> String {
    let mut messages_html = String::new();
    if !pending.is_empty() {
        messages_html.push_str("<ul class=\"messages\">");
        for message in pending {
            messages_html.push_str(&format!(
                "<li class=\"{}\">{}</li>",
                encode_double_quoted_attribute(message.level.as_str()),
                encode_text(&message.text)
            ));
        }
        messages_html.push_str("</ul>");
    }

    let account_html = match user {
        Some(user) => format!(
            "<p>Signed in as <strong>{}</strong></p><p><a href=\"/logout\">Log out</a></p>",
            encode_text(&user.username)
        ),
        None => format!(
            "<p><a href=\"/oauth/login\">Sign in with {}</a></p>",
            encode_text(provider_name)
        ),
    };

    format!(
        r#"<!DOCTYPE html>
<html>
<head><title>{title}</title></head>
<body>
    <h1>{title}</h1>
    {messages_html}
    {account_html}
</body>
</html>
"#,
        title = encode_text(title),
    )
}
