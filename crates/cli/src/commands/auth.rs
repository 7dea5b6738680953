//! Auth commands.

use std::io::{BufRead, Write};

use cartwheel_storefront::CartContext;
use secrecy::SecretString;

use super::CliError;

/// Sign in and keep the credential.
///
/// # Errors
///
/// Returns an error if the credentials are refused or cannot be stored.
pub async fn sign_in(
    ctx: &CartContext,
    username: &str,
    password: Option<String>,
    out: &mut impl Write,
) -> Result<(), CliError> {
    let password = password_or_stdin(password)?;
    let user = ctx.auth().sign_in(username, &password).await?;
    writeln!(out, "Signed in as {} (#{})", user.username, user.id)?;
    Ok(())
}

/// Register a new account.
///
/// # Errors
///
/// Returns an error if validation fails or the backend refuses.
pub async fn sign_up(
    ctx: &CartContext,
    username: &str,
    email: &str,
    password: Option<String>,
    out: &mut impl Write,
) -> Result<(), CliError> {
    let password = password_or_stdin(password)?;
    ctx.auth().sign_up(username, email, &password).await?;
    writeln!(out, "Registered {username}. Sign in to continue.")?;
    Ok(())
}

/// Forget the stored credential.
///
/// # Errors
///
/// Returns an error if client storage fails.
pub fn sign_out(ctx: &CartContext, out: &mut impl Write) -> Result<(), CliError> {
    ctx.auth().sign_out()?;
    writeln!(out, "Signed out.")?;
    Ok(())
}

/// Show the signed-in user.
///
/// # Errors
///
/// Returns an error if output cannot be written.
pub fn whoami(ctx: &CartContext, out: &mut impl Write) -> Result<(), CliError> {
    match ctx.auth().current_user() {
        Some(user) => {
            writeln!(out, "{} (#{})", user.username, user.id)?;
            if let Some(email) = &user.email {
                writeln!(out, "  Email: {email}")?;
            }
            if !user.roles.is_empty() {
                writeln!(out, "  Roles: {}", user.roles.join(", "))?;
            }
        }
        None => writeln!(out, "Not signed in.")?,
    }
    Ok(())
}

fn password_or_stdin(password: Option<String>) -> Result<SecretString, CliError> {
    if let Some(password) = password {
        return Ok(SecretString::from(password));
    }

    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(SecretString::from(line.trim_end_matches(['\r', '\n']).to_string()))
}
