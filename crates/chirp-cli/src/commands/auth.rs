use std::io::{self, BufRead, Write};
use std::path::Path;

use anyhow::{Context, Result};
use tracing::warn;

use chirp_core::{AuthError, Config, NewAccount, SessionController, SessionState, UserProfile};

/// Read a line from stdin after printing `prompt` to stderr.
fn prompt_line(prompt: &str) -> Result<String> {
    eprint!("{}", prompt);
    io::stderr().flush()?;
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read from stdin")?;
    Ok(line.trim().to_string())
}

fn password_or_prompt(password: Option<String>) -> Result<String> {
    match password {
        Some(p) => Ok(p),
        None => rpassword::prompt_password("Password: ").context("Failed to read password"),
    }
}

/// Persist the email used for a successful sign-in.
///
/// Re-reads the file so environment and flag overrides are not written back.
fn remember_email(config_path: Option<&Path>, email: &str) {
    let result = match config_path {
        Some(path) => Config::load_from(path).and_then(|mut c| {
            c.last_email = Some(email.to_string());
            c.save_to(path)
        }),
        None => Config::load().and_then(|mut c| {
            c.last_email = Some(email.to_string());
            c.save()
        }),
    };
    if let Err(e) = result {
        warn!(error = %e, "Failed to save last email to config");
    }
}

/// Explain an auth failure in terms the user can act on.
fn describe(err: &AuthError) -> String {
    match err {
        AuthError::Network(_) => format!("{} - check the API URL and your connection", err),
        AuthError::IdentityUnavailable => {
            format!("{} - try `chirp whoami` in a moment", err)
        }
        _ => err.to_string(),
    }
}

fn print_profile(user: &UserProfile) {
    println!("{} (@{})", user.display_name(), user.username);
    println!("  email: {}", user.email);
    if let Some(ref id) = user.id {
        println!("  id:    {}", id);
    }
    if let Some(ref bio) = user.bio {
        println!("  bio:   {}", bio);
    }
    if let Some(ref url) = user.profile_picture_url {
        println!("  photo: {}", url);
    }
}

pub async fn login(
    controller: &SessionController,
    config: &Config,
    config_path: Option<&Path>,
    email: Option<String>,
    password: Option<String>,
) -> Result<()> {
    let email = match email.or_else(|| config.last_email.clone()) {
        Some(email) => email,
        None => prompt_line("Email: ")?,
    };
    if email.is_empty() {
        anyhow::bail!("An email address is required");
    }
    let password = password_or_prompt(password)?;

    controller
        .sign_in(&email, &password)
        .await
        .map_err(|e| anyhow::anyhow!("Sign-in failed: {}", describe(&e)))?;
    remember_email(config_path, &email);

    if let Some(user) = controller.state().user() {
        eprintln!("Signed in as {}", user.display_name());
    }
    Ok(())
}

pub async fn register(
    controller: &SessionController,
    config_path: Option<&Path>,
    username: String,
    email: String,
    full_name: Option<String>,
    password: Option<String>,
) -> Result<()> {
    let password = password_or_prompt(password)?;
    let account = NewAccount {
        username,
        email: email.clone(),
        password,
        full_name,
    };

    controller
        .sign_up(account)
        .await
        .map_err(|e| anyhow::anyhow!("Sign-up failed: {}", describe(&e)))?;
    remember_email(config_path, &email);

    if let Some(user) = controller.state().user() {
        eprintln!("Welcome, {}! You are signed in.", user.display_name());
    }
    Ok(())
}

pub async fn logout(controller: &SessionController) -> Result<()> {
    controller.sign_out().await;
    eprintln!("Signed out");
    Ok(())
}

pub async fn whoami(controller: &SessionController, json: bool) -> Result<()> {
    if !controller.start().await {
        anyhow::bail!("Not signed in - run `chirp login`");
    }
    let state = controller.state();
    let user = state
        .user()
        .ok_or_else(|| anyhow::anyhow!("Not signed in - run `chirp login`"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(user)?);
    } else {
        print_profile(user);
    }
    Ok(())
}

/// Print the session state. Never fails on an unauthenticated session.
pub async fn status(controller: &SessionController, json: bool) -> Result<()> {
    controller.start().await;
    let state = controller.state();

    if json {
        println!("{}", serde_json::to_string_pretty(&state)?);
        return Ok(());
    }

    match state {
        SessionState::Authenticated(ref user) => {
            println!("{}: {} (@{})", state.label(), user.display_name(), user.username)
        }
        _ => println!("{}", state.label()),
    }
    println!("api: {}", controller.client().base_url());
    Ok(())
}
